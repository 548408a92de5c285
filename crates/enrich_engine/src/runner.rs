use std::sync::Arc;
use std::time::Duration;

use enrich_core::{Item, ItemResult, ProgressEvent};
use enrich_logging::{enrich_debug, enrich_error, enrich_info, enrich_warn};
use tokio::io::AsyncWrite;

use crate::codec::{StreamEncoder, TransportError};
use crate::{AssetStore, GenerationProvider, GroupConfig};

#[derive(Debug, Clone, Default)]
pub struct RunnerSettings {
    /// Upper bound for one item's explain + synthesize + store.
    pub item_timeout: Option<Duration>,
    /// Pause before each item after the first, to stay under provider rate limits.
    pub pause_between_items: Duration,
}

/// What happened to one group run, from the producer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the group ended without a `complete` record.
    pub aborted: Option<String>,
}

/// Executes one group of items strictly one after another.
#[derive(Clone)]
pub struct BatchRunner {
    provider: Arc<dyn GenerationProvider>,
    assets: Arc<dyn AssetStore>,
    settings: RunnerSettings,
}

impl BatchRunner {
    pub fn new(provider: Arc<dyn GenerationProvider>, assets: Arc<dyn AssetStore>) -> Self {
        Self {
            provider,
            assets,
            settings: RunnerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs the group and streams its records through `encoder`, which is
    /// closed on every exit path.
    pub async fn run<W>(
        &self,
        items: &[Item],
        config: &GroupConfig,
        encoder: &mut StreamEncoder<W>,
    ) -> RunSummary
    where
        W: AsyncWrite + Unpin,
    {
        let summary = match self.preflight(items) {
            Err(message) => {
                enrich_warn!("Group {:?} not started: {}", config.key, message);
                if let Err(err) = encoder.send(&ProgressEvent::Error { message: message.clone() }).await {
                    enrich_debug!("Could not report precondition failure: {err}");
                }
                RunSummary {
                    total: items.len(),
                    succeeded: 0,
                    failed: 0,
                    aborted: Some(message),
                }
            }
            Ok(()) => self.drive(items, config, encoder).await,
        };
        encoder.close().await;
        summary
    }

    /// Generates one item; provider and storage failures become a failed result.
    pub async fn generate(&self, text: &str, config: &GroupConfig) -> ItemResult {
        let attempt = self.generate_inner(text, config);
        let outcome = match self.settings.item_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(format!("timed out after {}s", limit.as_secs_f64())),
            },
            None => attempt.await,
        };
        match outcome {
            Ok((explanation, asset_path)) => ItemResult::succeeded(text, explanation, asset_path),
            Err(message) => ItemResult::failed(text, message),
        }
    }

    pub fn check_ready(&self) -> Result<(), String> {
        self.provider.check_ready().map_err(|err| err.to_string())
    }

    fn preflight(&self, items: &[Item]) -> Result<(), String> {
        if items.is_empty() {
            return Err("no items to generate".to_string());
        }
        self.check_ready()
    }

    async fn generate_inner(
        &self,
        text: &str,
        config: &GroupConfig,
    ) -> Result<(String, String), String> {
        let explanation = self
            .provider
            .explain(text, config)
            .await
            .map_err(|err| err.to_string())?;
        let audio = self
            .provider
            .synthesize(&explanation, config)
            .await
            .map_err(|err| err.to_string())?;
        let asset_path = self
            .assets
            .store(text, config, &audio)
            .map_err(|err| err.to_string())?;
        Ok((explanation, asset_path))
    }

    async fn drive<W>(
        &self,
        items: &[Item],
        config: &GroupConfig,
        encoder: &mut StreamEncoder<W>,
    ) -> RunSummary
    where
        W: AsyncWrite + Unpin,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        enrich_info!("Group {:?}: generating {} items", config.key, total);

        match self.drive_loop(items, config, encoder, &mut results).await {
            Ok(()) => {
                let summary = summarize(total, &results, None);
                let complete = ProgressEvent::Complete {
                    processed_in_group: total,
                    total_in_group: total,
                    all_results: results,
                };
                if let Err(err) = encoder.send(&complete).await {
                    enrich_warn!("Group {:?}: completion not delivered: {}", config.key, err);
                }
                enrich_info!(
                    "Group {:?}: {} succeeded, {} failed",
                    config.key,
                    summary.succeeded,
                    summary.failed
                );
                summary
            }
            Err(err) => {
                enrich_error!("Group {:?}: transport failed: {}", config.key, err);
                let message = format!("stream write failed: {err}");
                let _ = encoder
                    .send(&ProgressEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                summarize(total, &results, Some(message))
            }
        }
    }

    async fn drive_loop<W>(
        &self,
        items: &[Item],
        config: &GroupConfig,
        encoder: &mut StreamEncoder<W>,
        results: &mut Vec<ItemResult>,
    ) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let total = items.len();
        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.settings.pause_between_items.is_zero() {
                tokio::time::sleep(self.settings.pause_between_items).await;
            }
            encoder
                .send(&ProgressEvent::Progress {
                    processed_in_group: index,
                    total_in_group: total,
                    current_item_text: Some(item.text.clone()),
                })
                .await?;

            let result = self.generate(&item.text, config).await;
            if let Some(message) = &result.error_message {
                enrich_warn!("Item {} ({:?}) failed: {}", item.id, item.text, message);
            }
            results.push(result.clone());

            encoder
                .send(&ProgressEvent::Result {
                    processed_in_group: index + 1,
                    total_in_group: total,
                    item: result,
                })
                .await?;
        }
        Ok(())
    }
}

fn summarize(total: usize, results: &[ItemResult], aborted: Option<String>) -> RunSummary {
    let succeeded = results.iter().filter(|result| result.success).count();
    RunSummary {
        total,
        succeeded,
        failed: results.len() - succeeded,
        aborted,
    }
}
