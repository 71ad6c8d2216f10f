//! Document requirements of a service and the checks derived from them.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::upload::extension_of;

const DEFAULT_FORMATS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];
const DEFAULT_MAX_SIZE_MB: f64 = 5.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Format name to the MIME types it is uploaded as.
fn mime_types_for(format: &str) -> &'static [&'static str] {
    match format {
        "pdf" => &["application/pdf"],
        "jpg" | "jpeg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        _ => &[],
    }
}

/// Format name to the file extensions it may carry.
fn extensions_for(format: &str) -> &'static [&'static str] {
    match format {
        "pdf" => &[".pdf"],
        "jpg" | "jpeg" => &[".jpg", ".jpeg"],
        "png" => &[".png"],
        "gif" => &[".gif"],
        "doc" => &[".doc"],
        "docx" => &[".docx"],
        "xls" => &[".xls"],
        "xlsx" => &[".xlsx"],
        _ => &[],
    }
}

// == Document Config ==
/// One document a service asks citizens for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_formats")]
    pub accepted_formats: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_camera_upload: bool,
    #[serde(rename = "maxSizeMB", default = "default_max_size_mb")]
    pub max_size_mb: f64,
}

fn default_formats() -> Vec<String> {
    DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_max_size_mb() -> f64 {
    DEFAULT_MAX_SIZE_MB
}

impl DocumentConfig {
    /// A config with every field at its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            accepted_formats: default_formats(),
            allow_camera_upload: true,
            max_size_mb: DEFAULT_MAX_SIZE_MB,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        (self.max_size_mb * MIB) as u64
    }

    /// Whether a multipart field name refers to this document, either by
    /// exact name or as the lowercased name with whitespace runs as `_`.
    pub fn matches_field(&self, field_name: &str) -> bool {
        self.name == field_name || self.field_key() == field_name
    }

    fn field_key(&self) -> String {
        self.name
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Normalizes stored document requirements.
///
/// Accepts an array whose items are either a bare document name or an
/// object; missing object fields take their defaults. Anything that is not
/// an array yields no configs.
pub fn normalize_document_configs(raw: &Value) -> Vec<DocumentConfig> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(DocumentConfig::named(name.as_str())),
            Value::Object(fields) => {
                let mut config = DocumentConfig::named(
                    fields.get("name").and_then(Value::as_str).unwrap_or_default(),
                );
                if let Some(description) = fields.get("description").and_then(Value::as_str) {
                    config.description = description.to_string();
                }
                if let Some(required) = fields.get("required").and_then(Value::as_bool) {
                    config.required = required;
                }
                if let Some(formats) = fields.get("acceptedFormats").and_then(Value::as_array) {
                    config.accepted_formats = formats
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }
                if let Some(camera) = fields.get("allowCameraUpload").and_then(Value::as_bool) {
                    config.allow_camera_upload = camera;
                }
                match fields.get("maxSizeMB").and_then(Value::as_f64) {
                    Some(size) if size > 0.0 => config.max_size_mb = size,
                    _ => {}
                }
                Some(config)
            }
            _ => None,
        })
        .collect()
}

// == Format Tables ==
/// MIME types accepted for any of `formats`, deduplicated.
pub fn allowed_mime_types<S: AsRef<str>>(formats: &[S]) -> BTreeSet<&'static str> {
    formats
        .iter()
        .flat_map(|f| mime_types_for(&f.as_ref().to_lowercase()).iter().copied())
        .collect()
}

/// Extensions (with leading dot) accepted for any of `formats`.
pub fn allowed_extensions<S: AsRef<str>>(formats: &[S]) -> BTreeSet<&'static str> {
    formats
        .iter()
        .flat_map(|f| extensions_for(&f.as_ref().to_lowercase()).iter().copied())
        .collect()
}

pub fn is_image_format(format: &str) -> bool {
    matches!(
        format.to_lowercase().as_str(),
        "jpg" | "jpeg" | "png" | "gif"
    )
}

/// Camera capture only makes sense for documents that accept images.
pub fn can_use_camera_upload(config: &DocumentConfig) -> bool {
    config.allow_camera_upload && config.accepted_formats.iter().any(|f| is_image_format(f))
}

/// Value for an HTML `accept` attribute: MIME types then extensions.
pub fn accept_attribute<S: AsRef<str>>(formats: &[S]) -> String {
    allowed_mime_types(formats)
        .into_iter()
        .chain(allowed_extensions(formats))
        .collect::<Vec<_>>()
        .join(",")
}

// == File Validation ==
/// What a client said about an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub field_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl From<Result<(), UploadError>> for ValidationResult {
    fn from(outcome: Result<(), UploadError>) -> Self {
        match outcome {
            Ok(()) => Self {
                valid: true,
                error: None,
                error_code: None,
            },
            Err(err) => Self {
                valid: false,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Checks size, then MIME type, then extension.
pub fn check_file(file: &FileMeta, config: &DocumentConfig) -> Result<(), UploadError> {
    if file.size > config.max_size_bytes() {
        return Err(UploadError::FileTooLarge(format!(
            "File {} exceeds the maximum size of {}MB",
            file.original_name, config.max_size_mb
        )));
    }

    if !allowed_mime_types(&config.accepted_formats).contains(file.mime_type.as_str()) {
        return Err(UploadError::InvalidMimeType(format!(
            "File type not allowed for {}. Accepted formats: {}",
            config.name,
            config.accepted_formats.join(", ").to_uppercase()
        )));
    }

    let ext = extension_of(&file.original_name).to_lowercase();
    let extensions = allowed_extensions(&config.accepted_formats);
    if !extensions.contains(ext.as_str()) {
        return Err(UploadError::InvalidExtension(format!(
            "File extension not allowed for {}. Accepted extensions: {}",
            config.name,
            extensions.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    Ok(())
}

pub fn validate_file(file: &FileMeta, config: &DocumentConfig) -> ValidationResult {
    check_file(file, config).into()
}

/// The config a file is checked against: the one its field names, else
/// the one accepting the most formats (first wins on ties).
pub fn config_for_field<'a>(
    configs: &'a [DocumentConfig],
    field_name: &str,
) -> Option<&'a DocumentConfig> {
    configs
        .iter()
        .find(|config| config.matches_field(field_name))
        .or_else(|| {
            configs
                .iter()
                .rev()
                .max_by_key(|config| config.accepted_formats.len())
        })
}

/// Fails on the first required document no field provides.
pub fn check_required_documents(
    files: &[FileMeta],
    configs: &[DocumentConfig],
) -> Result<(), UploadError> {
    for config in configs.iter().filter(|c| c.required) {
        if !files.iter().any(|f| config.matches_field(&f.field_name)) {
            return Err(UploadError::RequiredDocumentMissing(format!(
                "Required document missing: {}",
                config.name
            )));
        }
    }
    Ok(())
}

/// Checks every file against its config, then that required documents are
/// present.
pub fn validate_documents(files: &[FileMeta], configs: &[DocumentConfig]) -> ValidationResult {
    let outcome = files
        .iter()
        .try_for_each(|file| match config_for_field(configs, &file.field_name) {
            Some(config) => check_file(file, config),
            None => Ok(()),
        })
        .and_then(|()| check_required_documents(files, configs));
    outcome.into()
}

// == Document Catalog ==
/// Document requirements per service id.
#[derive(Debug, Clone, Default)]
pub struct DocumentCatalog {
    services: HashMap<String, Vec<DocumentConfig>>,
}

impl DocumentCatalog {
    /// Builds a catalog from `{ "<service id>": [ ...requirements ] }`.
    pub fn from_value(raw: &Value) -> Self {
        let services = raw
            .as_object()
            .map(|services| {
                services
                    .iter()
                    .map(|(id, docs)| (id.clone(), normalize_document_configs(docs)))
                    .collect()
            })
            .unwrap_or_default();
        Self { services }
    }

    /// Loads a catalog file. A missing or unreadable file yields an empty
    /// catalog.
    pub fn load(path: &Path) -> Self {
        let parsed = fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|err| err.to_string()));

        match parsed {
            Ok(raw) => {
                let catalog = Self::from_value(&raw);
                info!(path = %path.display(), services = catalog.len(), "document catalog loaded");
                catalog
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load document catalog");
                Self::default()
            }
        }
    }

    /// Configs for a service; unknown services have none.
    pub fn configs(&self, service_id: &str) -> &[DocumentConfig] {
        self.services
            .get(service_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
