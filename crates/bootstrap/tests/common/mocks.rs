use async_trait::async_trait;
use bytes::Bytes;
use ferry_bootstrap::{ApplyError, ApplyReport, ApplySink, ReadinessProbe};
use ferry_core::{Artifact, DatabaseTarget, Fingerprint};
use ferry_storage::{
    MemoryBackend, ObjectAttributes, ObjectMeta, ObjectStore, ObjectSummary, PutReceipt,
    StorageError, StorageResult,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// What one `get` call does.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Return an I/O error.
    Fail,
    /// Return the stored bytes with one bit flipped.
    Corrupt,
    /// Return the stored bytes.
    Serve,
}

/// Memory store whose `get` follows a script and counts calls.
pub struct ScriptedStore {
    inner: Arc<MemoryBackend>,
    steps: Mutex<VecDeque<Step>>,
    then: Step,
    pub gets: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedStore {
    /// Run `steps` in order, then repeat `then`.
    pub fn new(inner: Arc<MemoryBackend>, steps: Vec<Step>, then: Step) -> Arc<Self> {
        Arc::new(Self {
            inner,
            steps: Mutex::new(steps.into()),
            then,
            gets: AtomicU32::new(0),
        })
    }

    pub fn serving(inner: Arc<MemoryBackend>) -> Arc<Self> {
        Self::new(inner, Vec::new(), Step::Serve)
    }

    pub fn always(inner: Arc<MemoryBackend>, step: Step) -> Arc<Self> {
        Self::new(inner, Vec::new(), step)
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.then);
        match step {
            Step::Fail => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "injected get failure",
            ))),
            Step::Corrupt => {
                let mut data = self.inner.get(key).await?.to_vec();
                data[0] ^= 0x01;
                Ok(Bytes::from(data))
            }
            Step::Serve => self.inner.get(key).await,
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<PutReceipt> {
        self.inner.put(key, data, attributes).await
    }

    async fn copy(
        &self,
        from: &str,
        to: &str,
        attributes: Option<&ObjectAttributes>,
    ) -> StorageResult<PutReceipt> {
        self.inner.copy(from, to, attributes).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Probe that reports ready on a given call, or never.
pub struct ScriptedProbe {
    ready_on: Option<u32>,
    pub calls: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedProbe {
    pub fn ready() -> Arc<Self> {
        Self::ready_on(1)
    }

    pub fn ready_on(call: u32) -> Arc<Self> {
        Arc::new(Self {
            ready_on: Some(call),
            calls: AtomicU32::new(0),
        })
    }

    pub fn never() -> Arc<Self> {
        Arc::new(Self {
            ready_on: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn is_ready(&self, _target: &DatabaseTarget) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_on.is_some_and(|n| call >= n)
    }
}

/// Sink that records what it was asked to apply.
pub struct RecordingSink {
    fail: bool,
    pub applied: Mutex<Vec<Fingerprint>>,
    pub staged: Mutex<Vec<Vec<u8>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            applied: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            applied: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        })
    }

    pub fn applies(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl ApplySink for RecordingSink {
    async fn apply(&self, artifact: &Artifact, staged: &Path) -> Result<ApplyReport, ApplyError> {
        self.applied.lock().unwrap().push(artifact.fingerprint());
        self.staged.lock().unwrap().push(std::fs::read(staged)?);
        if self.fail {
            return Err(ApplyError::CommandFailed {
                program: "psql".to_string(),
                status: "exit status: 3".to_string(),
                stderr: "ERROR:  relation \"t\" already exists".to_string(),
            });
        }
        Ok(ApplyReport::Command {
            program: "recording".to_string(),
        })
    }

    fn sink_name(&self) -> &'static str {
        "recording"
    }
}
