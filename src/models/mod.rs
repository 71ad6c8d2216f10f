//! Request and Response models for the HTTP API
//!
//! DTOs for the cache tier endpoints and the document upload endpoints.

pub mod requests;
pub mod responses;

pub use requests::{DeleteUploadRequest, SetRequest};
pub use responses::{
    CleanupResponse, ClearResponse, DeleteResponse, DeleteUploadResponse, GetResponse,
    HealthResponse, SetResponse, StatsResponse, UploadErrorResponse, UploadResponse,
};
