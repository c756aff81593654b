use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::{
    MemoryBackend, ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt,
    StorageError, StorageResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which operation the wrapped store refuses.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
    None,
    Put,
    Copy,
}

/// Memory store that fails selected operations and counts calls.
#[allow(dead_code)]
pub struct FailingStore {
    pub inner: Arc<MemoryBackend>,
    pub mode: FailureMode,
    pub puts: AtomicUsize,
    pub copies: AtomicUsize,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: Arc<MemoryBackend>, mode: FailureMode) -> Arc<Self> {
        Arc::new(Self {
            inner,
            mode,
            puts: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        })
    }

    fn injected(op: &str) -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            format!("injected {op} failure"),
        ))
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.mode == FailureMode::Put {
            return Err(Self::injected("put"));
        }
        self.inner.put(key, data, attributes).await
    }

    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        if self.mode == FailureMode::Copy {
            return Err(Self::injected("copy"));
        }
        self.inner.copy(from, to, attributes).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
