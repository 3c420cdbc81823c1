//! The object store seam used by the upload pipeline.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::Result;

/// Trait for object stores.
///
/// Implementations perform exactly one attempt per call; retrying is the
/// caller's business.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get the name of this store, for logs.
    fn name(&self) -> &str;

    /// Upload `body` to `bucket` under `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> Result<()>;

    /// Check that `bucket` is reachable.
    async fn probe(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }
}
