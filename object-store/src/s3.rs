//! S3-compatible object store built on `aws-sdk-s3`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::content_type::content_type_for;
use crate::error::{Result, UploadError};
use crate::store::ObjectStore;

/// Region used when none is configured. Most S3-compatible servers ignore it
/// but SigV4 needs one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    /// Endpoint base URL.
    pub endpoint_url: String,

    /// Signing region.
    pub region: String,

    /// Static credentials, if any were supplied.
    pub credentials: Option<StaticCredentials>,

    /// Address buckets as `endpoint/bucket` rather than `bucket.endpoint`.
    pub force_path_style: bool,

    /// Upper bound for a single request attempt.
    pub timeout: Duration,
}

impl S3Settings {
    /// Settings for `endpoint_url` with default region and no credentials.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            region: DEFAULT_REGION.to_string(),
            credentials: None,
            force_path_style: true,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the credentials.
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some(StaticCredentials {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        });
        self
    }

    /// Set the signing region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

/// An access key pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .finish()
    }
}

/// Object store backed by an S3-compatible endpoint.
pub struct S3ObjectStore {
    client: Client,
    has_credentials: bool,
}

impl S3ObjectStore {
    /// Build a client for `settings`.
    ///
    /// SDK retries are disabled: every `put` is a single attempt.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint_url)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(settings.timeout)
                    .build(),
            );

        loader = match &settings.credentials {
            Some(creds) => loader.credentials_provider(Credentials::new(
                &creds.access_key,
                &creds.secret_key,
                None,
                None,
                "s3watch-static",
            )),
            None => loader.no_credentials(),
        };

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style)
            .build();

        info!(
            "S3 endpoint {} (region {}, path-style {})",
            settings.endpoint_url, settings.region, settings.force_path_style
        );

        Self::from_client(Client::from_conf(config), settings.credentials.is_some())
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, has_credentials: bool) -> Self {
        Self {
            client,
            has_credentials,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> Result<()> {
        if !self.has_credentials {
            return Err(UploadError::CredentialsMissing);
        }

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(body)
            .send()
            .await
            .map_err(|e| classify_sdk_error(bucket, e))?;

        debug!("put {bucket}/{key} complete");
        Ok(())
    }

    async fn probe(&self, bucket: &str) -> Result<()> {
        if !self.has_credentials {
            return Err(UploadError::CredentialsMissing);
        }

        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify_sdk_error(bucket, e))?;
        Ok(())
    }
}

/// Map an SDK failure onto the upload error taxonomy.
fn classify_sdk_error<E>(bucket: &str, err: SdkError<E, HttpResponse>) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(ctx) => classify_service_error(
            bucket,
            ctx.raw().status().as_u16(),
            ctx.err().code(),
            detail,
        ),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            UploadError::Transient(detail)
        }
        _ => UploadError::Permanent(detail),
    }
}

/// Classify an error response by status and S3 error code.
pub fn classify_service_error(
    bucket: &str,
    status: u16,
    code: Option<&str>,
    detail: String,
) -> UploadError {
    match code {
        Some("InvalidAccessKeyId" | "SignatureDoesNotMatch" | "InvalidToken" | "ExpiredToken") => {
            UploadError::CredentialsMissing
        }
        Some("NoSuchBucket") => UploadError::NotFound(bucket.to_string()),
        Some(
            "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" | "Throttling"
            | "ThrottlingException",
        ) => UploadError::Transient(detail),
        _ if status >= 500 || status == 429 || status == 408 => UploadError::Transient(detail),
        // HEAD responses carry no body, so a missing bucket has no code.
        None if status == 404 => UploadError::NotFound(bucket.to_string()),
        _ => UploadError::Permanent(detail),
    }
}
