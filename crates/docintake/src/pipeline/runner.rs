use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classify::{ClassificationClient, ChatTransport, HttpChatTransport, RetryPolicy};
use crate::config::Config;
use crate::consolidate::{AnalysisText, Consolidator, ConsolidatorSettings};
use crate::error::{DocintakeError, StoreError};
use crate::extractor::PdfExtractor;
use crate::maintenance::EvictionTrigger;
use crate::model::{Classification, Document, DocumentStatus, Upload, NOT_IDENTIFIED};
use crate::ocr::tesseract::TesseractEngine;
use crate::ocr::OcrEngine;
use crate::prompt::templates;
use crate::prompt::{PromptRequest, TemplateRegistry};
use crate::sanitize;
use crate::store::{DocumentStore, FileObjectStore, ObjectStore, SqliteDocumentStore};

use super::context::{IngestionOutcome, PipelineContext};
use super::error::{PipelineError, PipelineStep, StepFailure};

/// Collaborators the pipeline talks to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub object_store: Arc<dyn ObjectStore>,
    pub document_store: Arc<dyn DocumentStore>,
    pub ocr_engine: Arc<dyn OcrEngine>,
    pub transport: Arc<dyn ChatTransport>,
    pub templates: TemplateRegistry,
}

impl PipelineDeps {
    /// Production collaborators: file object store, SQLite records,
    /// Tesseract and the HTTP chat endpoint.
    pub fn from_config(config: &Config) -> Result<Self, DocintakeError> {
        let object_store = FileObjectStore::new(&config.object_store.root);
        let document_store = SqliteDocumentStore::open(&config.database_path)?;
        let ocr_engine = TesseractEngine::new(config.ocr.data_path.clone());

        let api_key = config.llm.api_key().map_err(crate::error::ConfigError::from)?;
        let transport = HttpChatTransport::new(
            &config.llm.endpoint,
            &config.llm.model,
            api_key,
            config.llm.timeout(),
        )?
        .with_temperature(config.llm.temperature);

        Ok(Self {
            object_store: Arc::new(object_store),
            document_store: Arc::new(document_store),
            ocr_engine: Arc::new(ocr_engine),
            transport: Arc::new(transport),
            templates: templates::builtin(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub max_chunk_size: usize,
    /// Below this many characters the LLM is not consulted.
    pub min_text_chars: usize,
    pub ocr_enabled: bool,
    pub ocr_language: String,
    pub ocr_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "documents".to_string(),
            max_chunk_size: 12_000,
            min_text_chars: 10,
            ocr_enabled: true,
            ocr_language: "por".to_string(),
            ocr_workers: num_cpus::get().clamp(1, 4),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.object_store.bucket.clone(),
            max_chunk_size: config.analysis.max_chunk_size,
            min_text_chars: config.analysis.min_text_chars,
            ocr_enabled: config.ocr.enabled,
            ocr_language: config.ocr.language.clone(),
            ocr_workers: config.ocr.workers,
            retry: config.llm.retry_policy(),
        }
    }
}

struct PipelineInner {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    extractor: PdfExtractor,
    consolidator: Consolidator,
    templates: TemplateRegistry,
    classifier: ClassificationClient,
    eviction: Option<EvictionTrigger>,
    settings: PipelineSettings,
}

/// Drives one upload from storage to a terminal status.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(
        deps: PipelineDeps,
        settings: PipelineSettings,
        eviction: Option<EvictionTrigger>,
    ) -> Result<Self, DocintakeError> {
        deps.templates.validate()?;

        let extractor = if settings.ocr_enabled {
            PdfExtractor::new()
        } else {
            PdfExtractor::text_only()
        };
        let consolidator = Consolidator::new(
            deps.ocr_engine,
            ConsolidatorSettings {
                max_chunk_size: settings.max_chunk_size,
                ocr_language: settings.ocr_language.clone(),
                ocr_workers: settings.ocr_workers.max(1),
            },
        );
        let classifier = ClassificationClient::new(deps.transport, settings.retry);

        Ok(Self {
            inner: Arc::new(PipelineInner {
                objects: deps.object_store,
                documents: deps.document_store,
                extractor,
                consolidator,
                templates: deps.templates,
                classifier,
                eviction,
                settings,
            }),
        })
    }

    /// Production pipeline built from `config`.
    pub fn from_config(
        config: &Config,
        eviction: Option<EvictionTrigger>,
    ) -> Result<Self, DocintakeError> {
        Self::new(
            PipelineDeps::from_config(config)?,
            PipelineSettings::from_config(config),
            eviction,
        )
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Ingests one upload. The work runs on its own task, so dropping the
    /// returned future does not leave a document half-processed.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestionOutcome, PipelineError> {
        let this = self.clone();
        tokio::spawn(async move { this.run(upload).await })
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))?
    }

    async fn run(&self, upload: Upload) -> Result<IngestionOutcome, PipelineError> {
        let document = Document::new_uploaded(&upload, &self.inner.settings.bucket);
        let span = info_span!("pipeline",
            document_id = %document.id,
            filename = %sanitize::redact_file_name(&upload.file_name),
            size = document.file_size,
        );

        async move {
            let mut ctx = self.step_register(upload, document).await?;

            // Step 3: mark PROCESSING
            if let Err(e) = self
                .persist(&mut ctx, DocumentStatus::Processing, None)
                .instrument(info_span!("mark_processing"))
                .await
            {
                return Err(self.fail(&ctx, PipelineStep::MarkProcessing, e.into()).await);
            }

            // Step 4: extract + consolidate
            let analysis = match self.step_analyze(&mut ctx).await {
                Ok(analysis) => analysis,
                Err(e) => return Err(self.fail(&ctx, PipelineStep::Extract, e).await),
            };

            // Step 5: classify (or short-circuit)
            let classified = self.step_classify(&mut ctx, &analysis).await;
            ctx.analysis = Some(analysis);
            if let Err((step, e)) = classified {
                return Err(self.fail(&ctx, step, e).await);
            }

            // Step 6: persist PROCESSED
            let classification = ctx.classification.clone();
            if let Err(e) = self
                .persist(&mut ctx, DocumentStatus::Processed, classification)
                .instrument(info_span!("persist"))
                .await
            {
                return Err(self.fail(&ctx, PipelineStep::Persist, e.into()).await);
            }

            if let Some(trigger) = &self.inner.eviction {
                trigger.trigger();
            }

            let analysis = ctx.analysis.as_ref();
            info!(
                category = ctx
                    .document
                    .classification
                    .as_ref()
                    .map(|c| c.category.as_str())
                    .unwrap_or(""),
                short_circuited = ctx.short_circuited,
                "Document processed"
            );

            Ok(IngestionOutcome {
                analysis_chars: analysis.map(AnalysisText::char_count).unwrap_or(0),
                ocr_invocations: analysis.map(|a| a.ocr_invocations).unwrap_or(0),
                short_circuited: ctx.short_circuited,
                prompt_template: ctx.prompt.as_ref().map(|p| p.template),
                document: ctx.document,
            })
        }
        .instrument(span)
        .await
    }

    /// Steps 1 and 2: store the bytes, then the UPLOADED record. A record
    /// that cannot be written takes its object with it.
    async fn step_register(
        &self,
        upload: Upload,
        document: Document,
    ) -> Result<PipelineContext, PipelineError> {
        let inner = &self.inner;

        inner
            .objects
            .put(
                &document.bucket_name,
                &document.storage_key,
                &upload.bytes,
                &document.content_type,
            )
            .instrument(info_span!("store_object"))
            .await
            .map_err(PipelineError::StoreObject)?;

        if let Err(e) = inner
            .documents
            .insert(&document)
            .instrument(info_span!("register"))
            .await
        {
            error!("Failed to register document: {}", e);
            self.rollback_object(&document).await;
            return Err(PipelineError::Step {
                document_id: document.id,
                step: PipelineStep::Register,
                source: e.into(),
            });
        }

        debug!("Document registered as {}", DocumentStatus::Uploaded);
        Ok(PipelineContext::new(upload, document))
    }

    /// Step 4 on the blocking pool. The extractor and consolidator open
    /// their own spans.
    async fn step_analyze(&self, ctx: &mut PipelineContext) -> Result<AnalysisText, StepFailure> {
        let inner = Arc::clone(&self.inner);
        let bytes = std::mem::take(&mut ctx.upload.bytes);
        let span = tracing::Span::current();

        let analysis = tokio::task::spawn_blocking(move || {
            let _entered = span.entered();
            let pages = inner.extractor.extract(&bytes)?;
            Ok::<_, StepFailure>(inner.consolidator.consolidate(&pages))
        })
        .await
        .map_err(|e| StepFailure::Join(e.to_string()))??;

        Ok(analysis)
    }

    async fn step_classify(
        &self,
        ctx: &mut PipelineContext,
        analysis: &AnalysisText,
    ) -> Result<(), (PipelineStep, StepFailure)> {
        let inner = &self.inner;

        if !analysis.is_classifiable(inner.settings.min_text_chars) {
            info!(
                chars = analysis.char_count(),
                "Too little text, skipping classification"
            );
            ctx.classification = Some(not_identified(analysis));
            ctx.short_circuited = true;
            return Ok(());
        }

        let upload = &ctx.upload;
        let spec = inner
            .templates
            .select(upload.context.as_deref(), upload.sub_context.as_deref())
            .map_err(|e| (PipelineStep::AssemblePrompt, e.into()))?;

        let known_categories = if spec.uses_known_categories {
            match inner.documents.known_categories().await {
                Ok(categories) => categories,
                Err(e) => {
                    warn!("Could not load known categories: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let prompt = inner
            .templates
            .assemble(&PromptRequest {
                context: upload.context.as_deref(),
                sub_context: upload.sub_context.as_deref(),
                instruction: upload.instruction.as_deref(),
                known_categories: &known_categories,
                analysis_text: &analysis.text,
                extra: Vec::new(),
            })
            .map_err(|e| (PipelineStep::AssemblePrompt, e.into()))?;

        let result = inner
            .classifier
            .classify(&prompt.text)
            .instrument(info_span!("classify", template = prompt.template))
            .await
            .map_err(|e| (PipelineStep::Classify, e.into()))?;

        ctx.classification = Some(result.clone().into_classification());
        ctx.raw_result = Some(result);
        ctx.prompt = Some(prompt);
        Ok(())
    }

    /// Writes a status change and keeps `ctx.document` in step with the
    /// stored row.
    async fn persist(
        &self,
        ctx: &mut PipelineContext,
        status: DocumentStatus,
        classification: Option<Classification>,
    ) -> Result<(), StoreError> {
        let updated = self
            .inner
            .documents
            .update_status_and_classification(&ctx.document.id, status, classification.as_ref())
            .await?;
        ctx.document = updated;
        Ok(())
    }

    /// Records the failure on the document and removes its object.
    async fn fail(
        &self,
        ctx: &PipelineContext,
        step: PipelineStep,
        failure: StepFailure,
    ) -> PipelineError {
        let message = failure.to_string();
        error!(step = %step, "Ingestion failed: {}", message);

        let classification = Classification::failure(step.as_str(), &message);
        if let Err(e) = self
            .inner
            .documents
            .update_status_and_classification(
                &ctx.document.id,
                DocumentStatus::Failed,
                Some(&classification),
            )
            .await
        {
            error!("Failed to mark document {} as FAILED: {}", ctx.document.id, e);
        }

        self.rollback_object(&ctx.document).await;

        PipelineError::Step {
            document_id: ctx.document.id.clone(),
            step,
            source: failure,
        }
    }

    async fn rollback_object(&self, document: &Document) {
        if let Err(e) = self
            .inner
            .objects
            .delete(&document.bucket_name, &document.storage_key)
            .await
        {
            warn!(
                "Rollback of stored object {} failed: {}",
                document.storage_key, e
            );
        }
    }
}

fn not_identified(analysis: &AnalysisText) -> Classification {
    let mut attributes = Map::new();
    attributes.insert(
        "summary".to_string(),
        Value::String("Not enough readable text to classify the document".to_string()),
    );
    attributes.insert(
        "extracted_chars".to_string(),
        Value::from(analysis.char_count()),
    );
    Classification::new(NOT_IDENTIFIED, attributes)
}
