//! # Object Store
//!
//! Single-attempt uploads to S3-compatible storage.
//!
//! Callers hand over a [`ByteStream`](aws_sdk_s3::primitives::ByteStream) so
//! large files are streamed from disk rather than buffered. Failures are
//! classified into [`UploadError`] so the caller can decide whether to retry.

pub mod content_type;
pub mod error;
pub mod s3;
pub mod store;

pub use aws_sdk_s3::primitives::ByteStream;
pub use content_type::content_type_for;
pub use error::{Result, UploadError};
pub use s3::{S3ObjectStore, S3Settings, StaticCredentials};
pub use store::ObjectStore;
