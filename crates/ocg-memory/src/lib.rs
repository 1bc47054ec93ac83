//! # ocg-memory
//!
//! Long-term vector memory: SQLite rows with embedded vectors, an FTS5
//! keyword index, and an optional HNSW approximate-nearest-neighbor index
//! persisted as a flat dump beside the database. Search blends vector and
//! keyword signals (hybrid ranking) and degrades gracefully when either side
//! is unavailable.

pub mod embedding;
pub mod index;
pub mod store;

pub use embedding::{
    select_provider, EmbeddingProvider, LocalProvider, PlaceholderProvider, RemoteProvider,
};
pub use index::{DistanceMetric, HnswConfig, HnswIndex};
pub use store::{
    cosine_similarity, detect_category, deserialize_vector, normalize_vector, serialize_vector,
    MemoryConfig, MemoryEntry, MemoryResult, VectorMemoryStore, MEMORY_CATEGORIES,
};
