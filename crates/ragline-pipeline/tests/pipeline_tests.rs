use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use ragline_core::config::{ChunkStrategy, ChunkingConfig};
use ragline_core::{
    Completion, Filter, GenerationClient, GenerationError, GenerationParams, KvCache, Metadata,
    PipelineError, PromptMessage, QueryStage, RetrievalMode, SearchRequest, Settings, TextStream,
    TokenUsage, VectorIndex, VectorIndexError, VectorMatch, VectorPoint,
};
use ragline_embed::{BatchProcessor, HashEmbedder, MemoryCache};
use ragline_ingest::{Chunker, DocumentIndexer};
use ragline_pipeline::{QueryRequest, RagPipeline, ResponseCache, Retriever, StreamChunk};
use ragline_vector::MemoryVectorIndex;
use serde_json::json;

/// Index that returns a fixed, unsorted set of matches and records every search.
struct FixedIndex {
    matches: Vec<VectorMatch>,
    searches: Mutex<Vec<(String, SearchRequest)>>,
}

impl FixedIndex {
    fn new(scored: &[(&str, f32)]) -> Self {
        let matches = scored
            .iter()
            .enumerate()
            .map(|(i, (content, score))| {
                let payload = json!({
                    "content": content,
                    "document_id": "manual",
                    "chunk_index": i,
                    "metadata": {"page": i + 1},
                });
                VectorMatch {
                    id: format!("manual_{i}"),
                    score: *score,
                    payload: payload.as_object().cloned().unwrap_or_default(),
                }
            })
            .collect();
        Self { matches, searches: Mutex::new(Vec::new()) }
    }

    fn last_search(&self) -> (String, SearchRequest) {
        self.searches.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn collection_exists(&self, _name: &str) -> Result<bool, VectorIndexError> {
        Ok(true)
    }

    async fn create_collection(&self, _name: &str, _dimension: usize) -> Result<(), VectorIndexError> {
        Ok(())
    }

    async fn upsert(&self, _collection: &str, _points: Vec<VectorPoint>) -> Result<(), VectorIndexError> {
        Ok(())
    }

    async fn search(&self, collection: &str, request: SearchRequest) -> Result<Vec<VectorMatch>, VectorIndexError> {
        self.searches.lock().unwrap().push((collection.to_string(), request));
        Ok(self.matches.clone())
    }

    async fn delete(&self, _collection: &str, _ids: &[String]) -> Result<(), VectorIndexError> {
        Ok(())
    }
}

/// Generation client with a canned answer, canned stream and optional failure.
struct ScriptedGenerator {
    model: String,
    answer: String,
    chunks: Vec<Result<String, String>>,
    fail: Option<fn() -> GenerationError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedGenerator {
    fn answering(answer: &str) -> Self {
        Self {
            model: "scripted-1".into(),
            answer: answer.to_string(),
            chunks: Vec::new(),
            fail: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn streaming(chunks: Vec<Result<&str, &str>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(|c| c.map(str::to_string).map_err(str::to_string)).collect(),
            ..Self::answering("")
        }
    }

    fn failing(fail: fn() -> GenerationError) -> Self {
        Self { fail: Some(fail), ..Self::answering("") }
    }

    fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_user_prompt(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts.last().unwrap()[1].content.clone()
    }

    fn record(&self, messages: &[PromptMessage]) -> Result<(), GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        match self.fail {
            Some(fail) => Err(fail()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[PromptMessage],
        _params: &GenerationParams,
    ) -> Result<Completion, GenerationError> {
        self.record(messages)?;
        Ok(Completion {
            content: self.answer.clone(),
            model: self.model.clone(),
            usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
            finish_reason: "stop".into(),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
        _params: &GenerationParams,
    ) -> Result<TextStream, GenerationError> {
        self.record(messages)?;
        let items: Vec<Result<String, GenerationError>> = self
            .chunks
            .iter()
            .cloned()
            .map(|c| c.map_err(GenerationError::Streaming))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

fn embeddings(dim: usize) -> Arc<BatchProcessor> {
    Arc::new(BatchProcessor::new(Arc::new(HashEmbedder::new(dim).unwrap()), Arc::new(MemoryCache::new(1000))))
}

fn fixed_index() -> Arc<FixedIndex> {
    Arc::new(FixedIndex::new(&[("low", 0.3), ("high", 0.95), ("mid", 0.6)]))
}

fn pipeline(index: Arc<dyn VectorIndex>, generator: Arc<ScriptedGenerator>) -> RagPipeline {
    RagPipeline::new(Retriever::new(embeddings(16), index), generator)
}

fn request() -> QueryRequest {
    QueryRequest { score_threshold: 0.5, ..QueryRequest::new("what is in the manual?", "acme") }
}

#[tokio::test]
async fn end_to_end_orders_fragments_and_numbers_context() {
    let generator = Arc::new(ScriptedGenerator::answering("It covers wiring."));
    let rag = pipeline(fixed_index(), generator.clone());

    let result = rag.query(request()).await.unwrap();

    let scores: Vec<f32> = result.fragments.iter().map(|f| f.score).collect();
    assert_eq!(scores, vec![0.95, 0.6]);
    assert_eq!(result.fragments[0].content, "high");
    assert_eq!(result.fragments[0].chunk_id, "manual_1");
    assert_eq!(result.fragments[0].metadata["page"], json!(2));
    assert_eq!(result.answer, "It covers wiring.");
    assert_eq!(result.model_used, "scripted-1");
    assert_eq!(result.tokens_used, 15);
    assert_eq!(result.retrieval_mode, RetrievalMode::Vector);
    assert!(!result.cached);

    let prompt = generator.last_user_prompt();
    let first = prompt.find("[1] high").unwrap();
    let second = prompt.find("[2] mid").unwrap();
    assert!(first < second);
    assert!(!prompt.contains("[3]"));
}

#[tokio::test]
async fn each_query_gets_its_own_id() {
    let generator = Arc::new(ScriptedGenerator::answering("ok"));
    let rag = pipeline(fixed_index(), generator);
    let a = rag.query(request()).await.unwrap();
    let b = rag.query(request()).await.unwrap();
    assert_ne!(a.query_id, b.query_id);
}

#[tokio::test]
async fn tenant_filter_overrides_caller_filter() {
    let index = fixed_index();
    let rag = pipeline(index.clone(), Arc::new(ScriptedGenerator::answering("ok")));

    let mut filters = Filter::new();
    filters.insert("tenant_id".into(), json!("someone-else"));
    filters.insert("source".into(), json!("wiki"));
    rag.query(QueryRequest { filters: Some(filters), ..request() }).await.unwrap();

    let (collection, search) = index.last_search();
    assert_eq!(collection, "tenant_acme");
    let filter = search.filter.unwrap();
    assert_eq!(filter["tenant_id"], json!("acme"));
    assert_eq!(filter["source"], json!("wiki"));
    assert_eq!(search.limit, 5);
    assert_eq!(search.score_threshold, Some(0.5));
}

#[tokio::test]
async fn tenants_with_identical_content_stay_isolated() {
    let index = Arc::new(MemoryVectorIndex::new());
    let embeddings = embeddings(64);
    let config = ChunkingConfig { chunk_size: 200, chunk_overlap: 20, strategy: ChunkStrategy::Sentence };
    let chunker = Chunker::new(config).unwrap();
    let indexer = DocumentIndexer::new(chunker, embeddings.clone(), index.clone());

    let text = "Rainwater barrels need a mesh screen. Empty them before the first frost.";
    indexer.index_document("north", "north-guide", text, &Metadata::new()).await.unwrap();
    indexer.index_document("south", "south-guide", text, &Metadata::new()).await.unwrap();

    let retriever = Retriever::new(embeddings, index);
    for (tenant, own) in [("north", "north-guide"), ("south", "south-guide")] {
        let fragments = retriever.retrieve(text, tenant, 10, 0.0, None).await.unwrap();
        assert!(!fragments.is_empty());
        assert!(fragments.iter().all(|f| f.document_id == own), "{tenant} saw foreign fragments");
    }
}

#[tokio::test]
async fn unknown_tenant_gets_empty_context() {
    let generator = Arc::new(ScriptedGenerator::answering("I don't know."));
    let rag = pipeline(Arc::new(MemoryVectorIndex::new()), generator.clone());

    let result = rag.query(request()).await.unwrap();
    assert!(result.fragments.is_empty());
    assert_eq!(generator.calls(), 1);
    assert!(generator.last_user_prompt().contains("---\n\n---"));
}

#[tokio::test]
async fn hybrid_request_runs_degraded_without_threshold() {
    let index = fixed_index();
    let rag = pipeline(index.clone(), Arc::new(ScriptedGenerator::answering("ok")));

    let result = rag
        .query(QueryRequest { use_hybrid: true, score_threshold: 0.9, alpha: 0.3, ..request() })
        .await
        .unwrap();

    assert_eq!(result.retrieval_mode, RetrievalMode::HybridDegraded);
    assert_eq!(result.fragments.len(), 3);
    assert_eq!(index.last_search().1.score_threshold, Some(0.0));
}

#[tokio::test]
async fn invalid_alpha_fails_in_retrieval() {
    let generator = Arc::new(ScriptedGenerator::answering("ok"));
    let rag = pipeline(fixed_index(), generator.clone());

    let err = rag.query(QueryRequest { use_hybrid: true, alpha: 1.5, ..request() }).await.unwrap_err();
    assert_eq!(err.stage(), QueryStage::Retrieving);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn index_errors_are_retrieval_failures() {
    let index = Arc::new(MemoryVectorIndex::new());
    index.create_collection("tenant_acme", 8).await.unwrap();
    let rag = pipeline(index, Arc::new(ScriptedGenerator::answering("ok")));

    let err = rag.query(request()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Retrieval(_)));
    assert_eq!(err.stage(), QueryStage::Retrieving);
}

#[tokio::test]
async fn generation_failure_is_attributed_and_transient() {
    let generator = Arc::new(ScriptedGenerator::failing(|| GenerationError::RateLimited { retry_after_secs: Some(3) }));
    let rag = pipeline(fixed_index(), generator);

    let err = rag.query(request()).await.unwrap_err();
    assert_eq!(err.stage(), QueryStage::Generating);
    assert!(err.is_transient());
}

#[tokio::test]
async fn stream_yields_text_and_exposes_context() {
    let generator = Arc::new(ScriptedGenerator::streaming(vec![Ok("Hel"), Ok("lo")]));
    let rag = pipeline(fixed_index(), generator);

    let stream = rag.query_stream(request()).await.unwrap();
    assert_eq!(stream.fragments().len(), 2);
    assert_eq!(stream.retrieval_mode(), RetrievalMode::Vector);
    assert!(!stream.query_id().is_nil());

    let chunks: Vec<StreamChunk> = stream.collect().await;
    assert_eq!(chunks, vec![StreamChunk::Text("Hel".into()), StreamChunk::Text("lo".into())]);
}

#[tokio::test]
async fn mid_stream_failure_ends_with_one_error_marker() {
    let generator = Arc::new(ScriptedGenerator::streaming(vec![Ok("partial"), Err("connection reset"), Ok("never")]));
    let rag = pipeline(fixed_index(), generator);

    let chunks: Vec<StreamChunk> = rag.query_stream(request()).await.unwrap().collect().await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], StreamChunk::Text("partial".into()));
    match &chunks[1] {
        StreamChunk::Error { stage, message } => {
            assert_eq!(*stage, QueryStage::Generating);
            assert!(message.contains("connection reset"));
        }
        other => panic!("expected error marker, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_failures_before_generation_are_returned() {
    let generator = Arc::new(ScriptedGenerator::failing(|| GenerationError::Provider("down".into())));
    let rag = pipeline(fixed_index(), generator);
    let err = rag.query_stream(request()).await.err().unwrap();
    assert_eq!(err.stage(), QueryStage::Generating);

    let rag = pipeline(fixed_index(), Arc::new(ScriptedGenerator::streaming(vec![Ok("x")])));
    let err = rag.query_stream(QueryRequest { use_hybrid: true, alpha: -0.1, ..request() }).await.err().unwrap();
    assert_eq!(err.stage(), QueryStage::Retrieving);
}

#[tokio::test]
async fn response_cache_serves_repeats_until_tenant_is_invalidated() {
    let generator = Arc::new(ScriptedGenerator::answering("cached answer"));
    let rag = pipeline(fixed_index(), generator.clone())
        .with_response_cache(ResponseCache::new(Arc::new(MemoryCache::new(100))));

    let first = rag.query(request()).await.unwrap();
    let second = rag.query(request()).await.unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_ne!(first.query_id, second.query_id);
    assert_eq!(second.answer, "cached answer");
    assert_eq!(second.fragments, first.fragments);
    assert_eq!(generator.calls(), 1);

    let other_params = rag.query(QueryRequest { top_k: 2, ..request() }).await.unwrap();
    assert!(!other_params.cached);
    assert_eq!(generator.calls(), 2);

    rag.invalidate_tenant("acme").await;
    let third = rag.query(request()).await.unwrap();
    assert!(!third.cached);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn response_cache_is_separated_per_model() {
    let shared: Arc<dyn KvCache> = Arc::new(MemoryCache::new(100));
    let small = Arc::new(ScriptedGenerator::answering("small answer").with_model("small-1"));
    let large = Arc::new(ScriptedGenerator::answering("large answer").with_model("large-1"));
    let index = fixed_index();
    let rag_small = pipeline(index.clone(), small.clone()).with_response_cache(ResponseCache::new(shared.clone()));
    let rag_large = pipeline(index, large.clone()).with_response_cache(ResponseCache::new(shared));

    let first = rag_small.query(request()).await.unwrap();
    let second = rag_large.query(request()).await.unwrap();
    assert!(!first.cached);
    assert!(!second.cached);
    assert_eq!(second.model_used, "large-1");
    assert_eq!(second.answer, "large answer");
    assert_eq!(large.calls(), 1);

    let repeat = rag_small.query(request()).await.unwrap();
    assert!(repeat.cached);
    assert_eq!(repeat.model_used, "small-1");
    assert_eq!(small.calls(), 1);
}

#[tokio::test]
async fn streaming_bypasses_response_cache() {
    let generator = Arc::new(ScriptedGenerator::streaming(vec![Ok("a")]));
    let rag = pipeline(fixed_index(), generator.clone())
        .with_response_cache(ResponseCache::new(Arc::new(MemoryCache::new(100))));

    for _ in 0..2 {
        let _: Vec<StreamChunk> = rag.query_stream(request()).await.unwrap().collect().await;
    }
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn settings_supply_system_prompt_and_request_defaults() {
    let mut settings = Settings::default();
    settings.context.system_prompt = Some("Answer in one sentence.".into());
    settings.retrieval.score_threshold = 0.5;
    settings.retrieval.top_k = 1;

    let generator = Arc::new(ScriptedGenerator::answering("ok"));
    let retriever = Retriever::new(embeddings(16), fixed_index());
    let rag = RagPipeline::from_settings(&settings, retriever, generator.clone(), Arc::new(MemoryCache::new(10)));

    let result = rag.query(QueryRequest::from_settings("q", "acme", &settings)).await.unwrap();
    assert_eq!(result.fragments.len(), 1);
    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts[0][0].content, "Answer in one sentence.");
}
