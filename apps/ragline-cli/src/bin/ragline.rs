//! ragline command line.
//!
//! ```bash
//! # Index a directory into an in-memory store and ask a question
//! ragline ask --docs ./notes "How do I winterise the rain barrels?"
//!
//! # Show how a file is chunked
//! ragline chunk --strategy sentence notes/water.md
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ragline_core::config::{expand_path, ChunkStrategy, LogFormat, LoggingConfig};
use ragline_core::{Config, Settings};
use ragline_embed::{create_cache, create_embedding_provider, BatchProcessor};
use ragline_ingest::{document_id_for, Chunker, DocumentIndexer, DocumentLoader};
use ragline_llm::create_generation_client;
use ragline_pipeline::{QueryRequest, RagPipeline, Retriever, StreamChunk};
use ragline_vector::MemoryVectorIndex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragline")]
#[command(about = "Retrieval-augmented question answering over local documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory in memory, then answer a question from it
    Ask {
        /// Directory of .txt / .md files
        #[arg(long)]
        docs: String,

        #[arg(long, default_value = "default")]
        tenant: String,

        /// Overrides retrieval.top_k
        #[arg(long)]
        top_k: Option<usize>,

        /// Overrides retrieval.score_threshold
        #[arg(long)]
        threshold: Option<f32>,

        /// Request hybrid retrieval (runs degraded, vector-only)
        #[arg(long)]
        hybrid: bool,

        /// Print the answer as it is generated
        #[arg(long, conflicts_with = "json")]
        stream: bool,

        /// Print the full query result as JSON
        #[arg(long)]
        json: bool,

        question: String,
    },

    /// Chunk a file and print one JSON object per chunk
    Chunk {
        file: String,

        #[arg(long)]
        strategy: Option<ChunkStrategy>,

        #[arg(long)]
        size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}",
        )
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Indexes every supported file under `root` for `tenant`; returns the chunk count.
async fn ingest(indexer: &DocumentIndexer, tenant: &str, root: &Path) -> Result<usize> {
    let pb = progress_bar();
    let report = indexer
        .index_directory_with_progress(tenant, root, |progress| {
            pb.set_length(progress.total as u64);
            pb.set_message(document_id_for(root, progress.path));
            if let Err(e) = progress.outcome {
                pb.println(format!("skipped {}: {e}", progress.path.display()));
            }
            pb.inc(1);
        })
        .await
        .with_context(|| format!("indexing --docs {}", root.display()))?;
    let chunks = report.total_chunks();
    pb.finish_with_message(format!("{chunks} chunks"));
    Ok(chunks)
}

async fn ask(settings: &Settings, docs: &Path, request: QueryRequest, stream: bool, json: bool) -> Result<()> {
    let provider = create_embedding_provider(&settings.embedding).context("creating embedding provider")?;
    let cache = create_cache(&settings.cache);
    let embeddings = Arc::new(
        BatchProcessor::new(provider, cache.clone())
            .with_ttl(Duration::from_secs(settings.embedding.cache_ttl_secs)),
    );
    let index = Arc::new(MemoryVectorIndex::new());
    let chunker = Chunker::new(settings.chunking.clone())?;
    let indexer = DocumentIndexer::new(chunker, embeddings.clone(), index.clone());

    let chunks = ingest(&indexer, &request.tenant_id, docs).await?;
    if chunks == 0 {
        tracing::warn!(docs = %docs.display(), "no indexable documents, answering without context");
    }

    let generator = create_generation_client(&settings.generation).context("creating generation client")?;
    let pipeline = RagPipeline::from_settings(settings, Retriever::new(embeddings, index), generator, cache);

    if stream {
        let mut answer = pipeline.query_stream(request).await?;
        let mut stdout = std::io::stdout();
        while let Some(chunk) = answer.next().await {
            match chunk {
                StreamChunk::Text(text) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                StreamChunk::Error { stage, message } => {
                    writeln!(stdout)?;
                    anyhow::bail!("generation failed during {stage}: {message}");
                }
            }
        }
        writeln!(stdout)?;
        print_sources(answer.fragments().iter().map(|f| (&f.document_id, &f.chunk_id, f.score)));
        return Ok(());
    }

    let result = pipeline.query(request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!("{}", result.answer);
    print_sources(result.fragments.iter().map(|f| (&f.document_id, &f.chunk_id, f.score)));
    println!(
        "\n{} · {} tokens · {:.2}s",
        result.model_used, result.tokens_used, result.processing_time_secs
    );
    Ok(())
}

fn print_sources<'a>(sources: impl Iterator<Item = (&'a String, &'a String, f32)>) {
    let mut sources = sources.peekable();
    if sources.peek().is_none() {
        return;
    }
    println!("\nSources:");
    for (i, (document_id, chunk_id, score)) in sources.enumerate() {
        println!("  [{}] {document_id} ({chunk_id}, score {score:.3})", i + 1);
    }
}

fn chunk_file(settings: &Settings, file: &Path) -> Result<()> {
    let doc = DocumentLoader::new().load(file).with_context(|| format!("loading {}", file.display()))?;
    let chunker = Chunker::new(settings.chunking.clone())?;
    let mut stdout = std::io::stdout().lock();
    for chunk in chunker.chunk(&doc.content, &doc.metadata) {
        writeln!(stdout, "{}", serde_json::to_string(&chunk)?)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let mut settings = config.settings().clone();
    init_logging(&settings.logging);

    match cli.command {
        Commands::Ask { docs, tenant, top_k, threshold, hybrid, stream, json, question } => {
            let mut request = QueryRequest::from_settings(question, tenant, &settings);
            if let Some(top_k) = top_k {
                request.top_k = top_k;
            }
            if let Some(threshold) = threshold {
                request.score_threshold = threshold;
            }
            request.use_hybrid |= hybrid;
            let docs: PathBuf = expand_path(&docs);
            ask(&settings, &docs, request, stream, json).await?;
        }
        Commands::Chunk { file, strategy, size, overlap } => {
            if let Some(strategy) = strategy {
                settings.chunking.strategy = strategy;
            }
            if let Some(size) = size {
                settings.chunking.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                settings.chunking.chunk_overlap = overlap;
            }
            settings.validate()?;
            chunk_file(&settings, &expand_path(&file))?;
        }
    }
    Ok(())
}
