//! Publisher identity providers.
//!
//! The principal string is recorded in the `uploaded-by` metadata tag of
//! every artifact write.

use crate::error::{PublishError, PublishResult};
use async_trait::async_trait;
use ferry_core::config::{IdentityConfig, StorageConfig};
use std::sync::Arc;

/// Resolves "who am I" for the publishing process.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_principal(&self) -> PublishResult<String>;
}

/// Caller ARN from AWS STS `GetCallerIdentity`.
#[derive(Debug, Clone)]
pub struct StsIdentity {
    client: aws_sdk_sts::Client,
}

impl StsIdentity {
    /// Build a client from the ambient AWS configuration.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self {
            client: aws_sdk_sts::Client::new(&config),
        }
    }
}

#[async_trait]
impl IdentityProvider for StsIdentity {
    async fn current_principal(&self) -> PublishResult<String> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| PublishError::Identity(format!("sts:GetCallerIdentity failed: {e}")))?;
        output
            .arn()
            .map(str::to_string)
            .ok_or_else(|| PublishError::Identity("sts returned no caller ARN".to_string()))
    }
}

/// A fixed principal.
#[derive(Debug, Clone)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_principal(&self) -> PublishResult<String> {
        Ok(self.0.clone())
    }
}

/// `user@hostname` of the running process.
#[derive(Debug, Clone, Default)]
pub struct LocalIdentity;

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn current_principal(&self) -> PublishResult<String> {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        Ok(format!("{user}@{host}"))
    }
}

/// Build the provider named by configuration. STS uses the storage region
/// when the storage backend is S3.
pub async fn from_config(
    identity: &IdentityConfig,
    storage: &StorageConfig,
) -> Arc<dyn IdentityProvider> {
    match identity {
        IdentityConfig::Sts => {
            let region = match storage {
                StorageConfig::S3 { region, .. } => region.clone(),
                StorageConfig::Filesystem { .. } => None,
            };
            Arc::new(StsIdentity::from_env(region).await)
        }
        IdentityConfig::Static { principal } => Arc::new(StaticIdentity::new(principal.clone())),
        IdentityConfig::Local => Arc::new(LocalIdentity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_identity() {
        let id = StaticIdentity::new("arn:aws:iam::123456789012:user/ci");
        assert_eq!(
            id.current_principal().await.unwrap(),
            "arn:aws:iam::123456789012:user/ci"
        );
    }

    #[tokio::test]
    async fn test_local_identity_has_user_and_host() {
        let principal = LocalIdentity.current_principal().await.unwrap();
        let (user, host) = principal.split_once('@').unwrap();
        assert!(!user.is_empty());
        assert!(!host.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_static() {
        let provider = from_config(
            &IdentityConfig::Static {
                principal: "ci@build".to_string(),
            },
            &StorageConfig::default(),
        )
        .await;
        assert_eq!(provider.current_principal().await.unwrap(), "ci@build");
    }
}
