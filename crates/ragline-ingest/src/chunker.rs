use ragline_core::config::{ChunkStrategy, ChunkingConfig};
use ragline_core::{Chunk, IngestError, Metadata};
use regex::Regex;

/// Splits extracted document text into ordered, non-empty chunks.
///
/// All sizes are counted in characters (Unicode scalar values).
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    sentence_break: Regex,
    paragraph_break: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.chunk_size == 0 {
            return Err(IngestError::InvalidChunking("chunk_size must be greater than 0".into()));
        }
        let sentence_break =
            Regex::new(r"[.!?]\s+").map_err(|e| IngestError::InvalidChunking(e.to_string()))?;
        let paragraph_break =
            Regex::new(r"\n\s*\n").map_err(|e| IngestError::InvalidChunking(e.to_string()))?;
        Ok(Self { config, sentence_break, paragraph_break })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let pieces = match self.config.strategy {
            ChunkStrategy::Fixed => self.chunk_fixed(text),
            ChunkStrategy::Sentence => self.chunk_sentences(text),
            ChunkStrategy::Paragraph => self.chunk_paragraphs(text),
        };
        let total = pieces.len();
        tracing::debug!(
            strategy = ?self.config.strategy,
            text_len = text.len(),
            num_chunks = total,
            "text chunked"
        );
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                content,
                index,
                total_in_collection: total,
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn chunk_fixed(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let mut end = (start + size).min(len);
            if end < len {
                // last space strictly after the window start
                if let Some(pos) = chars[start + 1..end].iter().rposition(|c| *c == ' ') {
                    end = start + 1 + pos;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= len {
                break;
            }
            let next = end.saturating_sub(overlap);
            if next <= start {
                break;
            }
            start = next;
        }
        chunks
    }

    fn chunk_sentences(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut last = 0;
        for m in self.sentence_break.find_iter(text) {
            // keep the terminal punctuation, drop the whitespace run
            let cut = m.start() + 1;
            sentences.push(&text[last..cut]);
            last = m.end();
        }
        sentences.push(&text[last..]);

        self.pack(sentences.into_iter().map(str::trim), " ")
    }

    fn chunk_paragraphs(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut acc = String::new();
        let mut acc_len = 0;

        for paragraph in self.paragraph_break.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            let len = paragraph.chars().count();
            if acc_len + len <= self.config.chunk_size {
                if !acc.is_empty() {
                    acc.push_str("\n\n");
                    acc_len += 2;
                }
                acc.push_str(paragraph);
                acc_len += len;
                continue;
            }

            flush(&mut chunks, &mut acc);
            acc_len = 0;
            if len > self.config.chunk_size {
                chunks.extend(self.chunk_fixed(paragraph));
            } else {
                acc.push_str(paragraph);
                acc_len = len;
            }
        }
        flush(&mut chunks, &mut acc);
        chunks
    }

    /// Greedy packing of consecutive pieces. A piece that alone exceeds the
    /// size ends up as its own chunk.
    fn pack<'a>(&self, pieces: impl Iterator<Item = &'a str>, sep: &str) -> Vec<String> {
        let sep_len = sep.chars().count();
        let mut chunks = Vec::new();
        let mut acc = String::new();
        let mut acc_len = 0;

        for piece in pieces.filter(|p| !p.is_empty()) {
            let len = piece.chars().count();
            if acc_len + len <= self.config.chunk_size {
                if !acc.is_empty() {
                    acc.push_str(sep);
                    acc_len += sep_len;
                }
                acc.push_str(piece);
                acc_len += len;
            } else {
                flush(&mut chunks, &mut acc);
                acc.push_str(piece);
                acc_len = len;
            }
        }
        flush(&mut chunks, &mut acc);
        chunks
    }
}

fn flush(chunks: &mut Vec<String>, acc: &mut String) {
    let trimmed = acc.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    acc.clear();
}
