//! Test harness for isolated pipeline runs.
//!
//! Real SQLite and filesystem stores live in a temp directory; OCR and the
//! chat model are scripted so tests never need Tesseract or a network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use docintake::classify::{ChatTransport, RetryPolicy};
use docintake::error::{ClassifyError, OcrError, StoreError};
use docintake::maintenance::EvictionTrigger;
use docintake::model::{Document, Upload};
use docintake::ocr::OcrEngine;
use docintake::pipeline::{Pipeline, PipelineDeps, PipelineSettings};
use docintake::prompt::TemplateRegistry;
use docintake::store::{DocumentStore, FileObjectStore, ObjectStore, SqliteDocumentStore};

pub const BUCKET: &str = "documents";

/// OCR double mapping the gray level of a 1x1 image to a text.
#[derive(Default)]
pub struct ScriptedOcr {
    texts: HashMap<u8, String>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, gray: u8, text: &str) -> Self {
        self.texts.insert(gray, text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(&self, image: &[u8], _language: &str) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let decoded =
            image::load_from_memory(image).map_err(|e| OcrError::LoadImage(e.to_string()))?;
        let gray = decoded.to_luma8().get_pixel(0, 0)[0];
        self.texts
            .get(&gray)
            .cloned()
            .ok_or_else(|| OcrError::Recognition(format!("no script for gray {}", gray)))
    }
}

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    TransportError,
    Status(u16),
}

impl Reply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Chat double replaying a queue of replies; the last one repeats.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn always(reply: Reply) -> Self {
        Self::new(vec![reply])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifyError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Status(status)) => Err(ClassifyError::HttpStatus {
                status,
                body: "scripted".to_string(),
            }),
            Some(Reply::TransportError) | None => {
                Err(ClassifyError::Transport("connection refused".to_string()))
            }
        }
    }
}

/// Object store wrapper that can be told to fail.
pub struct FlakyObjectStore {
    inner: FileObjectStore,
    pub fail_put: bool,
    pub fail_delete: bool,
    /// Fails deletes of this key only.
    pub fail_delete_key: Option<String>,
}

impl FlakyObjectStore {
    fn failure(op: &str) -> StoreError {
        StoreError::Io {
            path: PathBuf::from(op),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable"),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        if self.fail_put {
            return Err(Self::failure("put"));
        }
        self.inner.put(bucket, key, bytes, content_type).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        if self.fail_delete || self.fail_delete_key.as_deref() == Some(key) {
            return Err(Self::failure("delete"));
        }
        self.inner.delete(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(bucket, key).await
    }
}

/// Isolated environment for pipeline tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub objects: Arc<FileObjectStore>,
    pub documents: Arc<SqliteDocumentStore>,
    pub ocr: Arc<ScriptedOcr>,
    pub llm: Arc<ScriptedTransport>,
}

impl TestHarness {
    pub fn new(llm: ScriptedTransport) -> Self {
        Self::with_ocr(llm, ScriptedOcr::new())
    }

    pub fn with_ocr(llm: ScriptedTransport, ocr: ScriptedOcr) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let objects = Arc::new(FileObjectStore::new(temp_dir.path().join("objects")));
        let documents =
            Arc::new(SqliteDocumentStore::open_in_memory().expect("Failed to open database"));

        Self {
            temp_dir,
            objects,
            documents,
            ocr: Arc::new(ocr),
            llm: Arc::new(llm),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            bucket: BUCKET.to_string(),
            max_chunk_size: 12_000,
            min_text_chars: 10,
            ocr_enabled: true,
            ocr_language: "por".to_string(),
            ocr_workers: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
        }
    }

    pub fn deps(&self) -> PipelineDeps {
        self.deps_with_objects(self.objects.clone())
    }

    pub fn deps_with_objects(&self, objects: Arc<dyn ObjectStore>) -> PipelineDeps {
        PipelineDeps {
            object_store: objects,
            document_store: self.documents.clone(),
            ocr_engine: self.ocr.clone(),
            transport: self.llm.clone(),
            templates: TemplateRegistry::builtin(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(self.settings(), None)
    }

    pub fn pipeline_with(
        &self,
        settings: PipelineSettings,
        eviction: Option<EvictionTrigger>,
    ) -> Pipeline {
        Pipeline::new(self.deps(), settings, eviction).expect("Failed to build pipeline")
    }

    /// A pipeline whose object store fails as configured.
    pub fn flaky_pipeline(&self, fail_put: bool, fail_delete: bool) -> Pipeline {
        let flaky = Arc::new(FlakyObjectStore {
            inner: FileObjectStore::new(self.temp_dir.path().join("objects")),
            fail_put,
            fail_delete,
            fail_delete_key: None,
        });
        Pipeline::new(self.deps_with_objects(flaky), self.settings(), None)
            .expect("Failed to build pipeline")
    }

    /// The harness object store, except deletes of `key` fail.
    pub fn objects_failing_delete_of(&self, key: &str) -> Arc<FlakyObjectStore> {
        Arc::new(FlakyObjectStore {
            inner: FileObjectStore::new(self.temp_dir.path().join("objects")),
            fail_put: false,
            fail_delete: false,
            fail_delete_key: Some(key.to_string()),
        })
    }

    pub async fn object_exists(&self, document: &Document) -> bool {
        self.objects
            .get(&document.bucket_name, &document.storage_key)
            .await
            .is_ok()
    }

    pub async fn stored(&self, id: &str) -> Document {
        self.documents
            .find_by_id(id)
            .await
            .expect("lookup failed")
            .expect("document missing")
    }

    pub async fn all_documents(&self) -> Vec<Document> {
        self.documents.find_oldest(1000).await.expect("lookup failed")
    }
}

pub fn upload(name: &str, bytes: Vec<u8>) -> Upload {
    Upload::pdf(name, "tester", bytes)
}
