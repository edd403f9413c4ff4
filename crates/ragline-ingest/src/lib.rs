pub mod chunker;
pub mod indexer;
pub mod loader;

pub use chunker::Chunker;
pub use indexer::{document_id_for, DirectoryReport, DocumentIndexer, FileProgress, IndexedDocument};
pub use loader::{DocumentLoader, LoadedDocument, DEFAULT_MAX_FILE_SIZE, SUPPORTED_EXTENSIONS};
