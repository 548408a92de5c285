use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::GroupConfig;

const AUDIO_EXTENSION: &str = "mp3";
const MAX_STEM_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("asset directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Where synthesized audio ends up. Returns the reference path recorded on the item.
pub trait AssetStore: Send + Sync {
    fn store(&self, text: &str, config: &GroupConfig, audio: &[u8]) -> Result<String, PersistError>;
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Writes `{dir}/{filename}` through a temp file in the same directory, so
/// readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Audio files on local disk, one per (group, text).
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    writer: AtomicFileWriter,
}

impl FsAssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.into()),
        }
    }
}

impl AssetStore for FsAssetStore {
    fn store(&self, text: &str, config: &GroupConfig, audio: &[u8]) -> Result<String, PersistError> {
        let filename = asset_filename(&config.key, text);
        let path = self.writer.write(&filename, audio)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Filesystem-safe, deterministic name: `{sanitized_text}--{short_hash(group, text)}.mp3`.
pub fn asset_filename(group_key: &str, text: &str) -> String {
    let stem = sanitize_stem(text);
    let hash = short_hash(group_key, text);
    format!("{stem}--{hash}.{AUDIO_EXTENSION}")
}

fn sanitize_stem(input: &str) -> String {
    let mut stem = String::with_capacity(input.len().min(MAX_STEM_LEN));
    let mut prev_underscore = false;
    for c in input.trim().chars() {
        let c = if is_forbidden(c) || c.is_whitespace() { '_' } else { c };
        if c == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        if stem.len() + c.len_utf8() > MAX_STEM_LEN {
            break;
        }
        stem.push(c);
    }
    let stem = stem.trim_matches(&['_', '.'][..]);
    if stem.is_empty() {
        "item".to_string()
    } else {
        stem.to_string()
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn short_hash(group_key: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
