use color_eyre::{Report, eyre::WrapErr};
use ddb_importer::{
    config::{self, Command},
    db::{DB, init_database},
    import::{
        ImportCarrier, ImportOutcome,
        coordinator::{ImportCoordinator, ImportSettings},
        queue::ImportQueue,
    },
    task::TaskStore,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    color_eyre::install()?;

    let config = config::config();

    init_database(&config.db_config).await?;
    let store = TaskStore::new(DB.clone(), config.import_config.data_dir());
    tracing::debug!("Task data directory: {}", store.data_dir().display());

    match config.command {
        Command::Create => {
            let task = store.create_task().await?;
            tracing::info!("Created task {}", task.task_id);
            println!("{}", task.task_id);
        }
        Command::Import { task_id, carrier } => {
            let json = tokio::fs::read_to_string(&carrier)
                .await
                .wrap_err_with(|| format!("Failed to read carrier {}", carrier.display()))?;
            let carrier = ImportCarrier::from_json(&json)?;

            let settings = ImportSettings::from(&config.import_config);
            let queue = ImportQueue::new(ImportCoordinator::new(store, settings)?);
            let mut handle = queue.enqueue(task_id, carrier).await?;

            let result = tokio::select! {
                result = handle.wait() => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, cancelling import of {}", handle.task_id);
                    handle.cancel();
                    handle.wait().await
                }
            };

            match result {
                Ok(ImportOutcome::Completed { images }) => {
                    println!("Imported {images} images into task {task_id}");
                }
                Ok(outcome @ ImportOutcome::Cancelled { .. }) => {
                    println!(
                        "Import of task {task_id} cancelled after {} images",
                        outcome.images()
                    );
                }
                Err(e) => {
                    return Err(Report::new(e).wrap_err(format!("Import of task {task_id} failed")));
                }
            }
        }
        Command::Show { task_id } => {
            let task = store.require(task_id).await?;
            let images = store.images(task_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "task": task, "images": images }))?
            );
        }
    }

    Ok(())
}
