//! Upload Gate
//!
//! Fail-fast checks before anything touches disk, streamed writes under
//! generated names, and all-or-nothing validation of the saved batch.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::cache::current_timestamp_ms;
use crate::error::UploadError;
use crate::upload::{
    allowed_extensions, allowed_mime_types, check_file, check_for_malicious_content,
    check_required_documents, config_for_field, create_secure_directory, extension_of,
    generate_secure_filename, DocumentConfig, FileMeta, SecurityPolicy, UploadStore,
};

const MIB: f64 = 1024.0 * 1024.0;

// == Stored File ==
/// A file written to disk for the current request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[serde(flatten)]
    pub meta: FileMeta,
    /// Generated storage name
    pub file_name: String,
    /// Path relative to the upload root
    pub path: String,
    #[serde(skip)]
    pub absolute_path: PathBuf,
}

// == Upload Gate ==
#[derive(Debug, Clone)]
pub struct UploadGate {
    policy: SecurityPolicy,
    store: UploadStore,
}

impl UploadGate {
    pub fn new(policy: SecurityPolicy, store: UploadStore) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    // == Pre-save Filter ==
    /// Checks an incoming file before it is written: blocked extension,
    /// then the global MIME whitelist, then what the service's documents
    /// accept.
    pub fn check_incoming(
        &self,
        original_name: &str,
        mime_type: &str,
        configs: &[DocumentConfig],
    ) -> Result<(), UploadError> {
        let ext = extension_of(original_name).to_lowercase();
        if self.policy.is_blocked_extension(&ext) {
            return Err(UploadError::InvalidExtension(format!(
                "Extension blocked for security reasons: {}",
                ext
            )));
        }

        if !self.policy.is_allowed_mime_type(mime_type) {
            return Err(UploadError::InvalidMimeType(format!(
                "MIME type not allowed: {}",
                mime_type
            )));
        }

        if !configs.is_empty() {
            let formats: Vec<&str> = configs
                .iter()
                .flat_map(|config| config.accepted_formats.iter().map(String::as_str))
                .collect();

            if !allowed_mime_types(&formats).contains(mime_type) {
                return Err(UploadError::InvalidMimeType(format!(
                    "File type not accepted by this service: {}",
                    mime_type
                )));
            }
            if !allowed_extensions(&formats).contains(ext.as_str()) {
                return Err(UploadError::InvalidExtension(format!(
                    "Extension not accepted by this service: {}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// Per-file byte limit: the policy's, lowered to the largest size the
    /// service's documents allow.
    pub fn file_size_limit(&self, configs: &[DocumentConfig]) -> u64 {
        configs
            .iter()
            .map(DocumentConfig::max_size_bytes)
            .max()
            .map_or(self.policy.max_file_size, |largest| {
                largest.min(self.policy.max_file_size)
            })
    }

    // == Secure Write ==
    /// Streams a file into the dated upload directory under a generated
    /// name. Files over `max_size` are removed and rejected.
    pub async fn store_file<S, B, E>(
        &self,
        meta: FileMeta,
        user_id: Option<&str>,
        chunks: S,
        max_size: u64,
    ) -> Result<StoredFile, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        let dir = self.store.destination_dir(Local::now());
        create_secure_directory(&dir)
            .await
            .map_err(|err| storage_failure(&meta, &dir, err))?;

        let file_name =
            generate_secure_filename(&meta.original_name, user_id, current_timestamp_ms());
        let path = dir.join(&file_name);

        match write_chunks(&path, chunks, max_size, &meta).await {
            Ok(written) => {
                debug!(
                    file = %file_name,
                    original = %meta.original_name,
                    bytes = written,
                    "upload stored"
                );
                Ok(StoredFile {
                    path: self.store.relative(&path),
                    meta: FileMeta {
                        size: written,
                        ..meta
                    },
                    file_name,
                    absolute_path: path,
                })
            }
            Err(err) => {
                self.store.secure_delete_file(&path).await;
                Err(err)
            }
        }
    }

    /// Deletes every file of a rejected request.
    pub async fn discard(&self, files: &[StoredFile]) {
        for file in files {
            self.store.secure_delete_file(&file.absolute_path).await;
        }
    }

    // == Batch Validation ==
    /// Validates the saved files of one request. On any failure every file
    /// of the batch is deleted.
    pub async fn validate_batch(
        &self,
        files: &[StoredFile],
        configs: &[DocumentConfig],
    ) -> Result<(), UploadError> {
        if files.is_empty() {
            return Err(UploadError::NoFiles);
        }

        let outcome = self.check_batch(files, configs).await;
        match &outcome {
            Ok(()) => info!(files = files.len(), "upload batch accepted"),
            Err(err) => {
                warn!(files = files.len(), code = err.code(), error = %err, "upload batch rejected");
                self.discard(files).await;
            }
        }
        outcome
    }

    async fn check_batch(
        &self,
        files: &[StoredFile],
        configs: &[DocumentConfig],
    ) -> Result<(), UploadError> {
        for file in files {
            let name = &file.meta.original_name;
            let on_disk = match tokio::fs::metadata(&file.absolute_path).await {
                Ok(metadata) if metadata.is_file() => metadata.len(),
                _ => {
                    return Err(UploadError::Validation(format!(
                        "File was not saved correctly: {}",
                        name
                    )))
                }
            };

            if check_for_malicious_content(&file.absolute_path).await {
                return Err(UploadError::Validation(format!(
                    "Suspicious file detected: {}",
                    name
                )));
            }

            if on_disk != file.meta.size {
                warn!(
                    file = %name,
                    reported = file.meta.size,
                    on_disk,
                    "upload size mismatch"
                );
            }

            if let Some(config) = config_for_field(configs, &file.meta.field_name) {
                check_file(&file.meta, config)
                    .map_err(|err| UploadError::Validation(err.to_string()))?;
            }
        }

        if files.len() > self.policy.max_files {
            return Err(UploadError::TooManyFiles(self.policy.max_files));
        }

        let metas: Vec<FileMeta> = files.iter().map(|file| file.meta.clone()).collect();
        check_required_documents(&metas, configs)
    }
}

async fn write_chunks<S, B, E>(
    path: &Path,
    chunks: S,
    max_size: u64,
    meta: &FileMeta,
) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|err| storage_failure(meta, path, err))?;

    let mut written: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| {
            UploadError::Validation(format!(
                "Upload of {} was interrupted: {}",
                meta.original_name, err
            ))
        })?;
        let bytes = chunk.as_ref();
        written += bytes.len() as u64;
        if written > max_size {
            return Err(UploadError::FileTooLarge(format!(
                "File {} exceeds the maximum size of {}MB",
                meta.original_name,
                max_size as f64 / MIB
            )));
        }
        file.write_all(bytes)
            .await
            .map_err(|err| storage_failure(meta, path, err))?;
    }

    file.flush()
        .await
        .map_err(|err| storage_failure(meta, path, err))?;
    Ok(written)
}

fn storage_failure(meta: &FileMeta, path: &Path, err: io::Error) -> UploadError {
    error!(path = %path.display(), error = %err, "failed to write upload");
    UploadError::Validation(format!("Could not save file {}", meta.original_name))
}
