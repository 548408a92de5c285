use serde::{Deserialize, Serialize};

/// Outcome of one item inside a group run, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub text: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_asset_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemResult {
    pub fn succeeded(
        text: impl Into<String>,
        result_text: impl Into<String>,
        result_asset_path: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            success: true,
            result_text: Some(result_text.into()),
            result_asset_path: Some(result_asset_path.into()),
            error_message: None,
        }
    }

    pub fn failed(text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
            result_text: None,
            result_asset_path: None,
            error_message: Some(message.into()),
        }
    }
}

/// One record of the group progress stream.
///
/// Encoded as a JSON object whose `type` field selects the variant, e.g.
/// `{"type":"progress","processedInGroup":0,"totalInGroup":2,"currentItemText":"hola"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Progress {
        processed_in_group: usize,
        total_in_group: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_item_text: Option<String>,
    },
    Result {
        processed_in_group: usize,
        total_in_group: usize,
        item: ItemResult,
    },
    Complete {
        processed_in_group: usize,
        total_in_group: usize,
        all_results: Vec<ItemResult>,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// `complete` and `error` end a group's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Result { .. } => "result",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}
