use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, BoxStream, Stream};
use futures::StreamExt;
use ragline_core::{
    Filter, GenerationClient, GenerationParams, KvCache, PipelineError, PromptMessage, QueryResult,
    QueryStage, RetrievalMode, RetrievedFragment, Settings, TextStream,
};
use uuid::Uuid;

use crate::compress::{CompressionStrategy, ContextCompressor};
use crate::prompt::PromptBuilder;
use crate::response_cache::ResponseCache;
use crate::retriever::Retriever;

/// One question against one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub tenant_id: String,
    pub top_k: usize,
    pub score_threshold: f32,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub use_hybrid: bool,
    pub alpha: f32,
    pub filters: Option<Filter>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            top_k: 5,
            score_threshold: 0.7,
            temperature: 0.7,
            max_tokens: None,
            use_hybrid: false,
            alpha: 0.5,
            filters: None,
        }
    }

    /// Request defaults taken from the `retrieval` and `generation` sections.
    pub fn from_settings(query: impl Into<String>, tenant_id: impl Into<String>, settings: &Settings) -> Self {
        Self {
            top_k: settings.retrieval.top_k,
            score_threshold: settings.retrieval.score_threshold,
            temperature: settings.generation.temperature,
            max_tokens: settings.generation.max_tokens,
            use_hybrid: settings.retrieval.use_hybrid,
            alpha: settings.retrieval.alpha,
            ..Self::new(query, tenant_id)
        }
    }

    fn params(&self) -> GenerationParams {
        GenerationParams { temperature: self.temperature, max_tokens: self.max_tokens }
    }
}

/// Item of a streamed answer. `Error` is always the last item.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Error { stage: QueryStage, message: String },
}

/// A streamed answer. Dropping it cancels generation.
pub struct QueryStream {
    query_id: Uuid,
    fragments: Vec<RetrievedFragment>,
    retrieval_mode: RetrievalMode,
    inner: BoxStream<'static, StreamChunk>,
}

impl QueryStream {
    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Fragments the generation is conditioned on, in prompt order.
    pub fn fragments(&self) -> &[RetrievedFragment] {
        &self.fragments
    }

    pub fn retrieval_mode(&self) -> RetrievalMode {
        self.retrieval_mode
    }
}

impl Stream for QueryStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Stage bookkeeping and logging for a single query.
struct QueryRun {
    query_id: Uuid,
    tenant_id: String,
    started: Instant,
    stage: QueryStage,
}

impl QueryRun {
    fn start(request: &QueryRequest) -> Self {
        let run = Self {
            query_id: Uuid::new_v4(),
            tenant_id: request.tenant_id.clone(),
            started: Instant::now(),
            stage: QueryStage::Retrieving,
        };
        tracing::info!(
            query_id = %run.query_id,
            tenant_id = %run.tenant_id,
            query_len = request.query.len(),
            top_k = request.top_k,
            hybrid = request.use_hybrid,
            "rag query started"
        );
        run
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            self.stage = next;
            tracing::debug!(
                query_id = %self.query_id,
                stage = %self.stage,
                elapsed_ms = self.elapsed_ms(),
                "stage entered"
            );
        }
    }

    fn complete(&mut self, tokens_used: Option<u32>) {
        while !self.stage.is_terminal() {
            self.advance();
        }
        tracing::info!(
            query_id = %self.query_id,
            tenant_id = %self.tenant_id,
            elapsed_ms = self.elapsed_ms(),
            tokens_used,
            "rag query complete"
        );
    }

    fn fail(&mut self, err: &PipelineError) {
        tracing::error!(
            query_id = %self.query_id,
            tenant_id = %self.tenant_id,
            stage = %err.stage(),
            elapsed_ms = self.elapsed_ms(),
            transient = err.is_transient(),
            error = %err,
            "rag query failed"
        );
        self.stage = QueryStage::Failed;
    }
}

struct Prepared {
    fragments: Vec<RetrievedFragment>,
    mode: RetrievalMode,
    messages: Vec<PromptMessage>,
}

/// Retrieval, compression, prompt assembly and generation for one query at
/// a time; independent queries may run concurrently on a shared pipeline.
pub struct RagPipeline {
    retriever: Retriever,
    generator: Arc<dyn GenerationClient>,
    compressor: ContextCompressor,
    prompts: PromptBuilder,
    response_cache: Option<ResponseCache>,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, generator: Arc<dyn GenerationClient>) -> Self {
        Self {
            retriever,
            generator,
            compressor: ContextCompressor::default(),
            prompts: PromptBuilder::default(),
            response_cache: None,
        }
    }

    /// Wires compression, prompts and the optional response cache from `settings`.
    pub fn from_settings(
        settings: &Settings,
        retriever: Retriever,
        generator: Arc<dyn GenerationClient>,
        cache: Arc<dyn KvCache>,
    ) -> Self {
        let mut prompts = PromptBuilder::new();
        if let Some(system) = &settings.context.system_prompt {
            prompts = prompts.with_system_prompt(system.clone());
        }
        let mut pipeline = Self::new(retriever, generator)
            .with_compression(CompressionStrategy::TokenLimit(settings.context.max_tokens))
            .with_prompt_builder(prompts);
        if settings.cache.enabled && settings.cache.response_cache {
            let ttl = Duration::from_secs(settings.cache.response_ttl_secs);
            pipeline = pipeline.with_response_cache(ResponseCache::new(cache).with_ttl(ttl));
        }
        pipeline
    }

    pub fn with_compression(mut self, strategy: CompressionStrategy) -> Self {
        self.compressor = ContextCompressor::new(strategy);
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_response_cache(mut self, cache: ResponseCache) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Answers `request` in one shot.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult, PipelineError> {
        if let Some(cache) = &self.response_cache {
            if let Some(hit) = cache.get(&request, self.generator.model()).await {
                tracing::info!(
                    query_id = %hit.query_id,
                    tenant_id = %request.tenant_id,
                    "rag query served from cache"
                );
                return Ok(hit);
            }
        }

        let mut run = QueryRun::start(&request);
        match self.answer(&mut run, &request).await {
            Ok(result) => {
                run.complete(Some(result.tokens_used));
                if let Some(cache) = &self.response_cache {
                    cache.put(&request, self.generator.model(), &result).await;
                }
                Ok(result)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// Streams the answer to `request`. Failures before generation starts
    /// are returned here; later ones end the stream with
    /// [`StreamChunk::Error`].
    pub async fn query_stream(&self, request: QueryRequest) -> Result<QueryStream, PipelineError> {
        let mut run = QueryRun::start(&request);
        let prepared = match self.prepare(&mut run, &request).await {
            Ok(prepared) => prepared,
            Err(err) => {
                run.fail(&err);
                return Err(err);
            }
        };

        run.advance();
        let text = match self.generator.generate_stream(&prepared.messages, &request.params()).await {
            Ok(text) => text,
            Err(err) => {
                let err = PipelineError::from(err);
                run.fail(&err);
                return Err(err);
            }
        };

        Ok(QueryStream {
            query_id: run.query_id,
            fragments: prepared.fragments,
            retrieval_mode: prepared.mode,
            inner: relay(text, run),
        })
    }

    /// Drops every cached answer for `tenant_id`; call after its documents change.
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        if let Some(cache) = &self.response_cache {
            cache.invalidate_tenant(tenant_id).await;
        }
    }

    async fn answer(&self, run: &mut QueryRun, request: &QueryRequest) -> Result<QueryResult, PipelineError> {
        let prepared = self.prepare(run, request).await?;

        run.advance();
        let completion = self.generator.generate(&prepared.messages, &request.params()).await?;

        Ok(QueryResult {
            query_id: run.query_id,
            query: request.query.clone(),
            answer: completion.content,
            fragments: prepared.fragments,
            model_used: completion.model,
            tokens_used: completion.usage.total_tokens,
            usage: completion.usage,
            processing_time_secs: run.started.elapsed().as_secs_f64(),
            retrieval_mode: prepared.mode,
            created_at: Utc::now(),
            cached: false,
        })
    }

    /// Retrieval, compression and prompt assembly.
    async fn prepare(&self, run: &mut QueryRun, request: &QueryRequest) -> Result<Prepared, PipelineError> {
        let filters = request.filters.as_ref();
        let (fragments, mode) = if request.use_hybrid {
            let hybrid = self
                .retriever
                .hybrid_retrieve(&request.query, &request.tenant_id, request.top_k, request.alpha, filters)
                .await?;
            (hybrid.fragments, hybrid.mode)
        } else {
            let fragments = self
                .retriever
                .retrieve(&request.query, &request.tenant_id, request.top_k, request.score_threshold, filters)
                .await?;
            (fragments, RetrievalMode::Vector)
        };
        tracing::info!(query_id = %run.query_id, fragments = fragments.len(), mode = ?mode, "retrieval complete");

        run.advance();
        let retrieved = fragments.len();
        let fragments = self.compressor.compress(fragments)?;
        tracing::info!(query_id = %run.query_id, retrieved, kept = fragments.len(), "context compressed");

        run.advance();
        let messages = self.prompts.build_messages(&request.query, &fragments);

        Ok(Prepared { fragments, mode, messages })
    }
}

/// Forwards generated text, ending after the first error.
fn relay(text: TextStream, run: QueryRun) -> BoxStream<'static, StreamChunk> {
    stream::unfold(Some((text, run)), |state| async move {
        let (mut text, mut run) = state?;
        match text.next().await {
            Some(Ok(chunk)) => Some((StreamChunk::Text(chunk), Some((text, run)))),
            Some(Err(err)) => {
                let err = PipelineError::from(err);
                run.fail(&err);
                Some((StreamChunk::Error { stage: err.stage(), message: err.to_string() }, None))
            }
            None => {
                run.complete(None);
                None
            }
        }
    })
    .boxed()
}
