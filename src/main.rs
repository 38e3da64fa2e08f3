use anyhow::{Context, Result};
use tracing::info;

use autograder::config::AssignmentConfig;
use autograder::gradebook::CanvasGradebook;
use autograder::orchestrator::BatchOrchestrator;
use autograder::suites;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("autograder=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let submissions_dir = std::env::args()
        .nth(1)
        .context("Usage: autograder <submissions-dir>")?;

    // The one fatal startup condition: nowhere to read submissions from
    let metadata = std::fs::metadata(&submissions_dir).with_context(|| {
        format!(
            "Submissions directory {:?} is not accessible",
            submissions_dir
        )
    })?;
    anyhow::ensure!(
        metadata.is_dir(),
        "{:?} is not a directory",
        submissions_dir
    );

    let config_path =
        std::env::var("ASSIGNMENT_CONFIG").unwrap_or_else(|_| "./assignment.toml".into());
    let config = AssignmentConfig::from_toml_file(&config_path)?;
    info!("Loaded assignment config from {}", config_path);

    let suite_name = std::env::var("TEST_SUITE").unwrap_or_else(|_| "http-smoke".into());
    let suite = suites::resolve(&suite_name)
        .with_context(|| format!("Unknown test suite {:?}", suite_name))?;
    info!("Using test suite {:?}", suite_name);

    let mut orchestrator = BatchOrchestrator::new(&submissions_dir, config, suite);

    match (
        std::env::var("CANVAS_API_KEY"),
        std::env::var("CANVAS_COURSE_ID"),
        std::env::var("CANVAS_ASSIGNMENT_ID"),
    ) {
        (Ok(api_key), Ok(course_id), Ok(assignment_id)) => {
            let gradebook = CanvasGradebook::new(api_key, course_id, assignment_id)?;
            orchestrator = orchestrator.with_gradebook(Box::new(gradebook));
            info!("Gradebook upload enabled");
        }
        _ => {
            info!("No gradebook credentials in the environment; results stay local");
        }
    }

    let report = orchestrator.run().await?;
    info!(
        "Batch finished: {} graded, {} queued for upload{}",
        report.graded.len(),
        report.queued.len(),
        if report.halted {
            " (halted early on a fatal error)"
        } else {
            ""
        }
    );

    Ok(())
}
