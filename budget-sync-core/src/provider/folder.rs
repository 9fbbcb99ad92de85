//! Provider over a plain directory, typically one kept in sync across
//! machines by a desktop file-sync client.
//!
//! ```text
//! <root>/<account>/batches/<received micros>_<batch-id>.batch
//! ```
//!
//! The receipt timestamp prefix is written by the uploading device, and the
//! file-sync client may deliver another device's file long after this
//! device has listed newer ones. Receipt order is therefore not reliable:
//! the engine lists the folder in full and skips batch IDs it has already
//! seen.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{ProviderError, SealedBatch, StorageProvider, UploadAck};
use crate::batch::BatchId;
use crate::credentials::ProviderAuth;
use crate::fs_atomic::write_atomic;
use crate::state::ProviderKind;

const EXTENSION: &str = "batch";

/// Folder-backed storage provider.
#[derive(Debug, Clone)]
pub struct FolderProvider {
    root: PathBuf,
}

/// A batch file found in the folder.
#[derive(Debug)]
struct Entry {
    received_at: DateTime<Utc>,
    id: BatchId,
    path: PathBuf,
}

impl FolderProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn batches_dir(&self, auth: &ProviderAuth) -> Result<PathBuf, ProviderError> {
        if auth.token.trim().is_empty() {
            return Err(ProviderError::Unauthorized);
        }
        if !is_safe_segment(&auth.account) {
            return Err(ProviderError::Storage(format!(
                "invalid account name '{}'",
                auth.account
            )));
        }
        Ok(self.root.join(&auth.account).join("batches"))
    }
}

/// Account names become a directory; reject anything that could escape the root.
fn is_safe_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\'])
        && !s.contains('\0')
}

fn storage_error(path: &Path, e: io::Error) -> ProviderError {
    ProviderError::Storage(format!("{}: {}", path.display(), e))
}

fn parse_entry(path: PathBuf) -> Option<Entry> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (received, id) = stem.split_once('_')?;
    let received_at = DateTime::from_timestamp_micros(received.parse().ok()?)?;
    let id = id.parse().ok()?;
    Some(Entry {
        received_at,
        id,
        path,
    })
}

fn scan(dir: &Path) -> Result<Vec<Entry>, ProviderError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_error(dir, e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| storage_error(dir, e))?;
        if let Some(parsed) = parse_entry(entry.path()) {
            found.push(parsed);
        }
    }
    found.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(found)
}

fn store(dir: &Path, batch: &SealedBatch) -> Result<(), ProviderError> {
    let existing = scan(dir)?;
    if existing.iter().any(|e| e.id == batch.id) {
        debug!(batch = %batch.id, "Batch already in folder");
        return Ok(());
    }

    // Receipt times stay unique so later uploads always sort after earlier ones
    let mut received_at = crate::batch::truncate_micros(Utc::now());
    if let Some(last) = existing.last() {
        if received_at <= last.received_at {
            received_at = last.received_at + Duration::microseconds(1);
        }
    }

    let name = format!(
        "{:020}_{}.{}",
        received_at.timestamp_micros(),
        batch.id,
        EXTENSION
    );
    let path = dir.join(name);
    write_atomic(&path, &batch.payload).map_err(|e| storage_error(&path, e))
}

fn fetch(dir: &Path, since: Option<DateTime<Utc>>) -> Result<Vec<SealedBatch>, ProviderError> {
    let mut batches = Vec::new();
    for entry in scan(dir)? {
        if since.is_some_and(|since| entry.received_at <= since) {
            continue;
        }
        let payload = fs::read(&entry.path).map_err(|e| storage_error(&entry.path, e))?;
        batches.push(SealedBatch {
            id: entry.id,
            payload,
            received_at: Some(entry.received_at),
        });
    }
    Ok(batches)
}

async fn blocking<T, F>(f: F) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProviderError::Storage(format!("folder task failed: {}", e)))?
}

#[async_trait]
impl StorageProvider for FolderProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalFolder
    }

    fn has_ordered_receipts(&self) -> bool {
        false
    }

    async fn upload_batch(
        &self,
        auth: &ProviderAuth,
        batch: &SealedBatch,
    ) -> Result<UploadAck, ProviderError> {
        let dir = self.batches_dir(auth)?;
        let sealed = batch.clone();
        blocking(move || store(&dir, &sealed)).await?;
        Ok(UploadAck { batch_id: batch.id })
    }

    async fn download_since(
        &self,
        auth: &ProviderAuth,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SealedBatch>, ProviderError> {
        let dir = self.batches_dir(auth)?;
        blocking(move || fetch(&dir, since)).await
    }
}
