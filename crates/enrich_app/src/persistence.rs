use std::fs;
use std::path::{Path, PathBuf};

use enrich_core::Item;
use enrich_engine::{AtomicFileWriter, PersistError};
use enrich_logging::{enrich_info, enrich_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ItemFileError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("failed to serialize items: {0}")]
    Serialize(#[from] ron::Error),
    #[error("{path:?} has no file name")]
    NotAFile { path: PathBuf },
    #[error("failed to write items: {0}")]
    Write(#[from] PersistError),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ItemFile {
    items: Vec<Item>,
}

/// Reads the item list. Items left `Pending` or `Generating` by an
/// interrupted run are loaded as they are; admission requeues them.
pub(crate) fn load_items(path: &Path) -> Result<Vec<Item>, ItemFileError> {
    let content = fs::read_to_string(path).map_err(|source| ItemFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ItemFile = ron::from_str(&content).map_err(|source| ItemFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let stale = file
        .items
        .iter()
        .filter(|item| item.status.is_in_flight())
        .count();
    if stale > 0 {
        enrich_warn!("{} items in {:?} were left in flight by an earlier run", stale, path);
    }
    enrich_info!("Loaded {} items from {:?}", file.items.len(), path);
    Ok(file.items)
}

/// Writes the item list back in place, replacing the file atomically.
pub(crate) fn save_items(path: &Path, items: &[Item]) -> Result<(), ItemFileError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ItemFileError::NotAFile {
            path: path.to_path_buf(),
        })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let file = ItemFile {
        items: items.to_vec(),
    };
    let pretty = ron::ser::PrettyConfig::new();
    let content = ron::ser::to_string_pretty(&file, pretty)?;

    AtomicFileWriter::new(dir).write(filename, content.as_bytes())?;
    enrich_info!("Saved {} items to {:?}", items.len(), path);
    Ok(())
}
