use std::sync::Arc;

use enrich_core::{Item, ItemId, ItemStore};
use enrich_logging::enrich_info;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::codec::StreamEncoder;
use crate::runner::{BatchRunner, RunSummary};
use crate::GroupConfig;

/// Body of a streaming group request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    pub ids: Vec<ItemId>,
    #[serde(default)]
    pub config: GroupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRequest {
    pub id: ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_asset_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SingleResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result_asset_path: None,
            result_text: None,
            error_message: Some(message.into()),
        }
    }
}

/// Producer-side entry point: resolves ids against the store and runs the
/// generation for them.
#[derive(Clone)]
pub struct GenerationEndpoint {
    store: Arc<dyn ItemStore>,
    runner: BatchRunner,
}

impl GenerationEndpoint {
    pub fn new(store: Arc<dyn ItemStore>, runner: BatchRunner) -> Self {
        Self { store, runner }
    }

    /// Streams the group's progress records into `writer` as JSON Lines.
    /// Ids missing from the store are skipped.
    pub async fn stream_group<W>(&self, request: GroupRequest, writer: W) -> RunSummary
    where
        W: AsyncWrite + Unpin,
    {
        let items = self.resolve(&request.ids);
        enrich_info!(
            "Streaming group {:?}: {} of {} ids resolved",
            request.config.key,
            items.len(),
            request.ids.len()
        );
        let mut encoder = StreamEncoder::new(writer);
        self.runner.run(&items, &request.config, &mut encoder).await
    }

    /// Generates one item and answers synchronously.
    pub async fn generate_single(&self, request: SingleRequest, config: &GroupConfig) -> SingleResponse {
        let Some(item) = self.store.get(&request.id) else {
            return SingleResponse::failure(format!("item {} not found", request.id));
        };
        if let Err(message) = self.runner.check_ready() {
            return SingleResponse::failure(message);
        }
        let result = self.runner.generate(&item.text, config).await;
        SingleResponse {
            success: result.success,
            result_asset_path: result.result_asset_path,
            result_text: result.result_text,
            error_message: result.error_message,
        }
    }

    fn resolve(&self, ids: &[ItemId]) -> Vec<Item> {
        ids.iter().filter_map(|id| self.store.get(id)).collect()
    }
}
