//! Upload security policy.

use crate::config::Config;

pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MAX_FILES: usize = 20;
pub const FIELD_SIZE: u64 = 10 * 1024 * 1024;

/// MIME types any upload may declare.
pub const ALLOWED_MIME_TYPES: [&str; 8] = [
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Extensions rejected regardless of declared type.
pub const BLOCKED_EXTENSIONS: [&str; 16] = [
    ".exe", ".bat", ".cmd", ".com", ".pif", ".scr", ".vbs", ".js", ".jar", ".wsf", ".sh", ".app",
    ".deb", ".rpm", ".dmg", ".pkg",
];

/// Slack for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    /// Bytes per file
    pub max_file_size: u64,
    /// Files per request
    pub max_files: usize,
    /// Bytes per non-file field
    pub field_size: u64,
    pub allowed_mime_types: Vec<String>,
    /// Lowercase, with leading dot
    pub blocked_extensions: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_files: MAX_FILES,
            field_size: FIELD_SIZE,
            allowed_mime_types: ALLOWED_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            blocked_extensions: BLOCKED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl SecurityPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_size: config.upload_max_file_size,
            max_files: config.upload_max_files,
            field_size: config.upload_field_size,
            ..Self::default()
        }
    }

    /// `ext` is compared case-insensitively.
    pub fn is_blocked_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.blocked_extensions.iter().any(|blocked| *blocked == ext)
    }

    pub fn is_allowed_mime_type(&self, mime: &str) -> bool {
        self.allowed_mime_types.iter().any(|allowed| allowed == mime)
    }

    /// Largest request body worth reading: one file over the count limit
    /// so the count check can still fire, plus one field.
    pub fn request_limit(&self) -> usize {
        let files = self.max_files as u64 + 1;
        let limit = self
            .max_file_size
            .saturating_mul(files)
            .saturating_add(self.field_size)
            .saturating_add(MULTIPART_OVERHEAD);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}
