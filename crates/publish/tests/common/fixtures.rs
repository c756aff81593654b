use ferry_core::config::PublishConfig;
use ferry_publish::{Publisher, StaticIdentity};
use ferry_storage::ObjectStore;
use std::sync::Arc;

pub const PRINCIPAL: &str = "arn:aws:iam::123456789012:user/deployer";

/// Publisher with default configuration and a fixed identity.
pub fn publisher(store: Arc<dyn ObjectStore>) -> Publisher {
    publisher_with(store, PublishConfig::default())
}

pub fn publisher_with(store: Arc<dyn ObjectStore>, config: PublishConfig) -> Publisher {
    Publisher::new(store, Arc::new(StaticIdentity::new(PRINCIPAL)), &config).unwrap()
}
