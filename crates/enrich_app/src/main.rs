//! Command-line driver: loads an item file, generates explanations and audio
//! for the selected items, and writes the results back.
//!
//! Usage: `enrich_app <items.ron> [id ...]`. Without ids, every item that is
//! not already `Complete` is generated.

mod persistence;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use enrich_core::{ItemId, JobOutcome, MemoryItemStore, RejectionReason, Status};
use enrich_engine::{
    BatchOrchestrator, BatchRunner, ConfigError, EngineConfig, FsAssetStore, GenerationEndpoint,
    HttpProvider, LocalTransport, ProviderError,
};
use enrich_logging::{enrich_error, enrich_info, LogDestination};
use thiserror::Error;

use crate::persistence::ItemFileError;

#[derive(Debug, Error)]
enum AppError {
    #[error("usage: enrich_app <items.ron> [id ...]")]
    Usage,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Items(#[from] ItemFileError),
    #[error("job rejected: {0}")]
    Rejected(#[from] RejectionReason),
}

#[tokio::main]
async fn main() -> ExitCode {
    enrich_logging::initialize(LogDestination::Both, enrich_logging::level_from_env());
    match run(std::env::args().skip(1).collect()).await {
        Ok(outcome) if outcome.is_completed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            enrich_error!("{err}");
            eprintln!("{err}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Vec<String>) -> Result<JobOutcome, AppError> {
    let mut args = args.into_iter();
    let items_path = args.next().map(PathBuf::from).ok_or(AppError::Usage)?;
    let requested: Vec<ItemId> = args.collect();

    let config = EngineConfig::from_env()?;
    let items = persistence::load_items(&items_path)?;
    let ids: Vec<ItemId> = if requested.is_empty() {
        items
            .iter()
            .filter(|item| item.status != Status::Complete)
            .map(|item| item.id.clone())
            .collect()
    } else {
        requested
    };

    let store = Arc::new(MemoryItemStore::with_items(items));
    let provider = Arc::new(HttpProvider::new(config.provider.clone())?);
    let assets = Arc::new(FsAssetStore::new(config.asset_dir.clone()));
    let runner = BatchRunner::new(provider, assets).with_settings(config.runner.clone());
    let endpoint = Arc::new(GenerationEndpoint::new(store.clone(), runner));
    let transport = LocalTransport::new(endpoint).with_buffer_size(config.transport_buffer);
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        Arc::new(transport),
        config.orchestrator.clone(),
    );

    let started = Utc::now();
    let handle = orchestrator.submit(&ids, |item| item.group_key.clone())?;
    enrich_info!("Job {} started for {} ids", handle.job_id(), ids.len());

    let mut updates = handle.progress();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let line = progress::progress_line(&updates.borrow_and_update());
            println!("{line}");
        }
    });

    let outcome = handle.wait().await;
    reporter.abort();

    let elapsed = (Utc::now() - started).num_seconds();
    match &outcome {
        JobOutcome::Completed { successful, failed } => {
            println!("done in {elapsed}s: {successful} succeeded, {failed} failed");
        }
        JobOutcome::Failed { message } => {
            println!("aborted after {elapsed}s: {message}");
        }
    }

    persistence::save_items(&items_path, &store.snapshot())?;
    Ok(outcome)
}
