//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as CredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{MetadataDirective, ServerSideEncryption};
use bytes::Bytes;
use ferry_core::StorageConfig;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

const DEFAULT_REGION: &str = "us-east-1";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag carried in ambient-credential failures so they surface as
/// configuration errors rather than transport errors.
const AMBIENT_CREDENTIALS_TAG: &str = "ferry-s3-ambient-credentials";

/// Connection settings for [`S3Backend`].
#[derive(Clone, Debug, Default)]
pub struct S3Options {
    pub bucket: String,
    /// Custom endpoint. A bare `host:port` is taken as plain HTTP.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Key prefix inside the bucket; surrounding slashes are ignored.
    pub prefix: Option<String>,
    /// Static credentials. Both or neither must be set; neither means the
    /// default AWS chain, resolved on first request.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO.
    pub force_path_style: bool,
    /// Request AES256 encryption on every write.
    pub server_side_encryption: bool,
}

impl S3Options {
    /// Settings named by an S3 storage configuration, `None` for other
    /// backends.
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        match config {
            StorageConfig::S3 {
                bucket,
                endpoint,
                region,
                prefix,
                access_key_id,
                secret_access_key,
                force_path_style,
                server_side_encryption,
            } => Some(Self {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                force_path_style: *force_path_style,
                server_side_encryption: *server_side_encryption,
            }),
            StorageConfig::Filesystem { .. } => None,
        }
    }

    fn endpoint_url(&self) -> Option<String> {
        self.endpoint.as_ref().map(|raw| {
            let lower = raw.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                raw.clone()
            } else {
                format!("http://{raw}")
            }
        })
    }

    fn key_prefix(&self) -> Option<String> {
        self.prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

/// Default AWS credential chain built on first use, so constructing a
/// backend never probes the environment.
#[derive(Debug)]
struct AmbientCredentials {
    region: aws_config::Region,
    chain: OnceCell<DefaultCredentialsChain>,
}

impl AmbientCredentials {
    fn new(region: aws_config::Region) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_try_init(|| {
                let region = self.region.clone();
                async move {
                    tokio::spawn(async move {
                        DefaultCredentialsChain::builder().region(region).build().await
                    })
                    .await
                    .map_err(|e| {
                        CredentialsError::provider_error(format!(
                            "{AMBIENT_CREDENTIALS_TAG}: credential chain setup panicked: {e}"
                        ))
                    })
                }
            })
            .await?;
        chain.provide_credentials().await.map_err(|e| {
            CredentialsError::provider_error(format!(
                "{AMBIENT_CREDENTIALS_TAG}: no usable AWS credentials: {e}"
            ))
        })
    }
}

impl ProvideCredentials for AmbientCredentials {
    fn provide_credentials<'a>(&'a self) -> CredentialsFuture<'a>
    where
        Self: 'a,
    {
        CredentialsFuture::new(self.resolve())
    }
}

fn is_missing<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service) if service.raw().status().as_u16() == 404)
}

fn sdk_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if err.to_string().contains(AMBIENT_CREDENTIALS_TAG) {
        return StorageError::Config(
            "no AWS credentials available; set storage credentials or provide them through the \
             environment"
                .to_string(),
        );
    }
    StorageError::S3(Box::new(err))
}

fn keyed_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if is_missing(&err) {
        StorageError::NotFound(key.to_string())
    } else {
        sdk_error(err)
    }
}

fn timestamp(dt: &DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.secs()).ok()
}

fn byte_len(len: Option<i64>) -> u64 {
    len.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

/// Object store over an S3 bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    encryption: Option<ServerSideEncryption>,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("encryption", &self.encryption)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client for `options`. No network traffic happens here.
    pub fn new(options: S3Options) -> StorageResult<Self> {
        let region = options
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let sdk_region = aws_config::Region::new(region.clone());

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(sdk_region.clone())
            .force_path_style(options.force_path_style);

        builder = match (&options.access_key_id, &options.secret_access_key) {
            (Some(key_id), Some(secret)) => builder.credentials_provider(
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "ferry-config"),
            ),
            (None, None) => builder.credentials_provider(AmbientCredentials::new(sdk_region)),
            _ => {
                return Err(StorageError::Config(
                    "s3 access_key_id and secret_access_key must be set together".to_string(),
                ));
            }
        };

        let endpoint_url = options.endpoint_url();
        if let Some(url) = &endpoint_url {
            builder = builder.endpoint_url(url);
            if url.to_ascii_lowercase().starts_with("http://") {
                builder = builder.http_client(aws_smithy_http_client::Builder::new().build_http());
            }
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            prefix: options.key_prefix(),
            encryption: options
                .server_side_encryption
                .then_some(ServerSideEncryption::Aes256),
            endpoint: endpoint_url.unwrap_or_else(|| format!("s3.{region}.amazonaws.com")),
            bucket: options.bucket,
            region,
        })
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Region requests are signed for.
    pub fn region(&self) -> &str {
        &self.region
    }

    fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn logical_key<'a>(&self, object_key: &'a str) -> &'a str {
        self.prefix
            .as_deref()
            .and_then(|prefix| object_key.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(object_key)
    }

    fn user_metadata(attributes: &ObjectAttributes) -> Option<HashMap<String, String>> {
        (!attributes.metadata.is_empty()).then(|| {
            attributes
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(sdk_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| keyed_error(e, key))?;

        let metadata: BTreeMap<String, String> = head
            .metadata()
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(ObjectMeta {
            size: byte_len(head.content_length()),
            last_modified: head.last_modified().and_then(timestamp),
            content_type: head.content_type().map(str::to_string),
            version_id: head.version_id().map(str::to_string),
            metadata,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| keyed_error(e, key))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(body.into_bytes())
    }

    #[instrument(skip(self, data, attributes), fields(backend = "s3", size = data.len()))]
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        let written = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .set_content_type(attributes.content_type.clone())
            .set_metadata(Self::user_metadata(attributes))
            .set_server_side_encryption(self.encryption.clone())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutReceipt {
            version_id: written.version_id().map(str::to_string),
        })
    }

    #[instrument(skip(self, attributes), fields(backend = "s3"))]
    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt> {
        // The source key must be URL-encoded.
        let source = format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(&self.object_key(from), NON_ALPHANUMERIC)
        );

        let mut request = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(self.object_key(to))
            .copy_source(source)
            .set_server_side_encryption(self.encryption.clone());
        if let Some(attributes) = attributes {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_content_type(attributes.content_type.clone())
                .set_metadata(Self::user_metadata(attributes));
        }

        let copied = request.send().await.map_err(|e| keyed_error(e, from))?;
        Ok(PutReceipt {
            version_id: copied.version_id().map(str::to_string),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds for absent keys.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.object_key(prefix))
            .into_paginator()
            .send();

        let mut summaries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(sdk_error)?;
            summaries.extend(page.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: self.logical_key(key).to_string(),
                    size: byte_len(object.size()),
                    last_modified: object.last_modified().and_then(timestamp),
                })
            }));
        }

        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.client.head_bucket().bucket(&self.bucket).send();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
            Ok(result) => result.map(|_| ()).map_err(sdk_error),
            Err(_) => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("bucket {} did not answer within {HEALTH_CHECK_TIMEOUT:?}", self.bucket),
            ))),
        }
    }
}
