use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragline_core::types::payload_keys;
use ragline_core::{
    chunk_point_id, tenant_collection, IngestError, Metadata, Payload, VectorIndex, VectorPoint,
};
use ragline_embed::BatchProcessor;
use serde_json::Value;

use crate::chunker::Chunker;
use crate::loader::DocumentLoader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub tenant_id: String,
    pub document_id: String,
    pub collection: String,
    pub num_chunks: usize,
}

#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub indexed: Vec<IndexedDocument>,
    pub skipped: Vec<(PathBuf, String)>,
}

impl DirectoryReport {
    pub fn total_chunks(&self) -> usize {
        self.indexed.iter().map(|d| d.num_chunks).sum()
    }
}

/// Per-file progress reported while indexing a directory.
#[derive(Debug)]
pub struct FileProgress<'a> {
    pub path: &'a Path,
    /// 1-based position of `path` among `total` files.
    pub position: usize,
    pub total: usize,
    pub outcome: Result<&'a IndexedDocument, &'a IngestError>,
}

/// Chunk, embed and upsert documents into tenant collections.
pub struct DocumentIndexer {
    chunker: Chunker,
    loader: DocumentLoader,
    embeddings: Arc<BatchProcessor>,
    index: Arc<dyn VectorIndex>,
}

impl DocumentIndexer {
    pub fn new(chunker: Chunker, embeddings: Arc<BatchProcessor>, index: Arc<dyn VectorIndex>) -> Self {
        Self { chunker, loader: DocumentLoader::new(), embeddings, index }
    }

    pub fn with_loader(mut self, loader: DocumentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    pub async fn index_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        text: &str,
        metadata: &Metadata,
    ) -> Result<IndexedDocument, IngestError> {
        let collection = tenant_collection(tenant_id);
        let chunks = self.chunker.chunk(text, metadata);
        if chunks.is_empty() {
            tracing::warn!(tenant_id, document_id, "document produced no chunks");
            return Ok(IndexedDocument {
                tenant_id: tenant_id.to_string(),
                document_id: document_id.to_string(),
                collection,
                num_chunks: 0,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        if !self.index.collection_exists(&collection).await? {
            self.index.create_collection(&collection, self.embeddings.dimension()).await?;
        }

        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload = Payload::new();
                payload.insert(payload_keys::CONTENT.into(), Value::String(chunk.content));
                payload.insert(payload_keys::DOCUMENT_ID.into(), Value::String(document_id.to_string()));
                payload.insert(payload_keys::CHUNK_INDEX.into(), Value::from(chunk.index));
                payload.insert(payload_keys::TENANT_ID.into(), Value::String(tenant_id.to_string()));
                payload.insert(payload_keys::METADATA.into(), Value::Object(chunk.metadata));
                VectorPoint { id: chunk_point_id(document_id, chunk.index), vector, payload }
            })
            .collect();
        let num_chunks = points.len();
        self.index.upsert(&collection, points).await?;

        tracing::info!(tenant_id, document_id, num_chunks, "document indexed");
        Ok(IndexedDocument {
            tenant_id: tenant_id.to_string(),
            document_id: document_id.to_string(),
            collection,
            num_chunks,
        })
    }

    /// Indexes a changed document that previously produced `previous_chunks`
    /// chunks. Points past the new chunk count are deleted so the old tail
    /// is no longer retrievable.
    pub async fn reindex_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        text: &str,
        metadata: &Metadata,
        previous_chunks: usize,
    ) -> Result<IndexedDocument, IngestError> {
        let doc = self.index_document(tenant_id, document_id, text, metadata).await?;
        if previous_chunks > doc.num_chunks && self.index.collection_exists(&doc.collection).await? {
            let stale: Vec<String> =
                (doc.num_chunks..previous_chunks).map(|i| chunk_point_id(document_id, i)).collect();
            self.index.delete(&doc.collection, &stale).await?;
            tracing::info!(tenant_id, document_id, removed = stale.len(), "stale chunks deleted");
        }
        Ok(doc)
    }

    /// Loads `path` and indexes it under `document_id`. Loader metadata is
    /// merged over `extra`.
    pub async fn index_file(
        &self,
        tenant_id: &str,
        document_id: &str,
        path: &Path,
        extra: &Metadata,
    ) -> Result<IndexedDocument, IngestError> {
        let doc = self.loader.load(path)?;
        let mut metadata = extra.clone();
        metadata.extend(doc.metadata);
        self.index_document(tenant_id, document_id, &doc.content, &metadata).await
    }

    pub async fn delete_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        num_chunks: usize,
    ) -> Result<(), IngestError> {
        let collection = tenant_collection(tenant_id);
        if !self.index.collection_exists(&collection).await? {
            return Ok(());
        }
        let ids: Vec<String> = (0..num_chunks).map(|i| chunk_point_id(document_id, i)).collect();
        self.index.delete(&collection, &ids).await?;
        tracing::info!(tenant_id, document_id, num_chunks, "document deleted");
        Ok(())
    }

    /// Indexes every supported file under `dir`; the document id is the path
    /// relative to `dir`. Files that fail to load or index are skipped.
    pub async fn index_directory(&self, tenant_id: &str, dir: &Path) -> Result<DirectoryReport, IngestError> {
        self.index_directory_with_progress(tenant_id, dir, |_| {}).await
    }

    /// [`index_directory`](Self::index_directory) that calls `on_file` once
    /// per file, after the file is indexed or skipped.
    pub async fn index_directory_with_progress(
        &self,
        tenant_id: &str,
        dir: &Path,
        mut on_file: impl FnMut(FileProgress<'_>),
    ) -> Result<DirectoryReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            )));
        }
        let files = self.loader.collect_files(dir);
        let total = files.len();
        let mut report = DirectoryReport::default();
        for (i, path) in files.into_iter().enumerate() {
            let document_id = document_id_for(dir, &path);
            let result = self.index_file(tenant_id, &document_id, &path, &Metadata::new()).await;
            on_file(FileProgress { path: &path, position: i + 1, total, outcome: result.as_ref() });
            match result {
                Ok(doc) => report.indexed.push(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file");
                    report.skipped.push((path, e.to_string()));
                }
            }
        }
        tracing::info!(
            tenant_id,
            documents = report.indexed.len(),
            skipped = report.skipped.len(),
            chunks = report.total_chunks(),
            "directory indexed"
        );
        Ok(report)
    }
}

/// Relative path with `/` separators.
pub fn document_id_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
