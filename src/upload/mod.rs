//! Upload Module
//!
//! Secure document uploads: security policy, per-service document
//! requirements, filename handling, content sniffing, confined storage and
//! the validation gate tying them together.

mod documents;
mod filename;
mod gate;
mod policy;
mod scan;
mod storage;

pub use documents::{
    accept_attribute, allowed_extensions, allowed_mime_types, can_use_camera_upload, check_file,
    check_required_documents, config_for_field, is_image_format, normalize_document_configs,
    validate_documents, validate_file, DocumentCatalog, DocumentConfig, FileMeta,
    ValidationResult,
};
pub use filename::{
    basename, extension_of, generate_secure_filename, sanitize_filename, MAX_FILENAME_LENGTH,
};
pub use gate::{StoredFile, UploadGate};
pub use policy::{SecurityPolicy, ALLOWED_MIME_TYPES, BLOCKED_EXTENSIONS};
pub use scan::{check_for_malicious_content, detect_signature};
pub use storage::{create_secure_directory, UploadStore, DOCUMENTS_DIR};
