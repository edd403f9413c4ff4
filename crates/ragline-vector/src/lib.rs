//! Vector index backends.
//!
//! `MemoryVectorIndex` keeps every collection in process and answers
//! searches with an exact cosine scan. Collections are created with a fixed
//! dimension and reject vectors of any other length.
pub mod memory;

pub use memory::{cosine_similarity, MemoryVectorIndex};
