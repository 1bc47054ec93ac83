use async_trait::async_trait;
use ocg_core::Result;
use ocg_memory::{
    cosine_similarity, EmbeddingProvider, MemoryConfig, PlaceholderProvider, VectorMemoryStore,
};

/// Embeds each text onto a distinct axis so tests control similarity exactly.
/// Texts sharing a first word land on the same axis.
struct AxisProvider {
    dim: usize,
}

#[async_trait]
impl EmbeddingProvider for AxisProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let word = text.split_whitespace().next().unwrap_or("");
        let axis = word.bytes().map(|b| b as usize).sum::<usize>() % self.dim;
        let mut v = vec![0.0; self.dim];
        v[axis] = 1.0;
        Ok(v)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> String {
        "axis".into()
    }
}

fn axis_store(dir: &tempfile::TempDir, hnsw: bool) -> VectorMemoryStore {
    let cfg = MemoryConfig {
        hnsw_enabled: hnsw,
        hnsw_path: hnsw.then(|| dir.path().join("vector.index")),
        ..MemoryConfig::default()
    };
    VectorMemoryStore::open_with_provider(
        dir.path().join("mem.db"),
        cfg,
        Some(Box::new(AxisProvider { dim: 32 })),
    )
    .unwrap()
}

#[tokio::test]
async fn store_then_search_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = axis_store(&dir, true);

    store
        .store("alpha memory about rust", "fact", 0.8)
        .await
        .unwrap();
    store
        .store("bravo memory about python", "fact", 0.8)
        .await
        .unwrap();

    let results = store
        .search("alpha memory about rust", 1, 0.0)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.text, "alpha memory about rust");
    assert!(results[0].score >= 0.99);
}

#[tokio::test]
async fn stored_vectors_are_unit_norm_under_cosine() {
    let dir = tempfile::tempdir().unwrap();
    let store = axis_store(&dir, false);

    let id = store.store("charlie fact", "fact", 0.5).await.unwrap();
    let entry = store.get(&id).unwrap();
    let norm: f32 = entry.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
    assert_eq!(entry.vector.len(), entry.embedding_dim);
}

#[tokio::test]
async fn hybrid_score_is_bounded_by_weights() {
    let dir = tempfile::tempdir().unwrap();
    let store = axis_store(&dir, false);
    let cfg = store.config().clone();
    assert!(cfg.hybrid_enabled());

    store.store("delta walks the dog", "other", 0.5).await.unwrap();
    store.store("echo reads a book", "other", 0.5).await.unwrap();

    let results = store.search("delta walks the dog", 5, 0.0).await.unwrap();
    let bound = cfg.vector_weight + cfg.text_weight;
    for r in &results {
        assert!(
            r.score <= bound + 1e-5,
            "score {} exceeds hybrid bound {}",
            r.score,
            bound
        );
    }
}

#[tokio::test]
async fn linear_fallback_when_hnsw_disabled() {
    // Placeholder vectors are identical for every text, so the keyword side
    // of the hybrid score is what separates the matching row.
    let dir = tempfile::tempdir().unwrap();
    let cfg = MemoryConfig {
        hnsw_enabled: false,
        ..MemoryConfig::default()
    };
    let store = VectorMemoryStore::open_with_provider(
        dir.path().join("mem.db"),
        cfg,
        Some(Box::new(PlaceholderProvider::new(64))),
    )
    .unwrap();
    assert!(!store.hnsw_active());

    store.store("likes espresso in the morning", "preference", 0.6).await.unwrap();
    store.store("deploy happens on fridays", "fact", 0.6).await.unwrap();
    store.store("team uses trunk development", "decision", 0.6).await.unwrap();

    let results = store
        .search("deploy happens on fridays", 1, 0.0)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.text, "deploy happens on fridays");
    assert!(results[0].score >= 0.99);
}

#[tokio::test]
async fn keyword_only_without_provider() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorMemoryStore::open_with_provider(
        dir.path().join("mem.db"),
        MemoryConfig::default(),
        None,
    )
    .unwrap();
    assert!(!store.has_embedding());

    store
        .store("the database lives on disk", "fact", 0.5)
        .await
        .unwrap();
    store.store("unrelated note", "other", 0.5).await.unwrap();

    let results = store.search("database", 5, 0.0).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].entry.text.contains("database"));
    assert_eq!(results[0].score, 1.0);
}

#[tokio::test]
async fn update_reembeds_changed_text() {
    let dir = tempfile::tempdir().unwrap();
    let store = axis_store(&dir, true);

    let id = store.store("foxtrot old text", "fact", 0.5).await.unwrap();
    let before = store.get(&id).unwrap();
    store.update(&id, "golf new text", "", 0.0).await.unwrap();
    let after = store.get(&id).unwrap();

    assert_eq!(after.text, "golf new text");
    assert_eq!(after.category, "fact");
    assert!(cosine_similarity(&before.vector, &after.vector) < 0.99);

    let results = store.search("golf new text", 1, 0.0).await.unwrap();
    assert_eq!(results[0].entry.id, id);
}

#[tokio::test]
async fn delete_removes_row_and_rebuilds_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = axis_store(&dir, true);

    let id = store.store("hotel stays open", "fact", 0.5).await.unwrap();
    store.store("india lives on", "fact", 0.5).await.unwrap();
    assert_eq!(store.count().unwrap(), 2);

    assert!(store.delete(&id).await.unwrap());
    assert!(!store.delete(&id).await.unwrap());
    assert_eq!(store.count().unwrap(), 1);

    let results = store.search("hotel stays open", 5, 0.0).await.unwrap();
    assert!(results.iter().all(|r| r.entry.id != id));
}

#[tokio::test]
async fn dump_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = axis_store(&dir, true);
        store.store("juliet persists", "fact", 0.5).await.unwrap();
        store.store("kilo persists too", "fact", 0.5).await.unwrap();
    }

    let store = axis_store(&dir, true);
    assert!(store.hnsw_active());
    let results = store.search("juliet persists", 1, 0.0).await.unwrap();
    assert_eq!(results[0].entry.text, "juliet persists");
}

#[tokio::test]
async fn mismatched_dimension_rows_are_skipped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mem.db");
    {
        let store = VectorMemoryStore::open_with_provider(
            &db_path,
            MemoryConfig::default(),
            Some(Box::new(AxisProvider { dim: 16 })),
        )
        .unwrap();
        store.store("lima short vector", "fact", 0.5).await.unwrap();
    }

    // Reopen with a wider provider: the 16-dim row must be skipped by the
    // index but kept in the table.
    let store = VectorMemoryStore::open_with_provider(
        &db_path,
        MemoryConfig::default(),
        Some(Box::new(AxisProvider { dim: 32 })),
    )
    .unwrap();
    assert_eq!(store.count().unwrap(), 1);

    let id = store.store("mike wide vector", "fact", 0.5).await.unwrap();
    let results = store.search("mike wide vector", 1, 0.0).await.unwrap();
    assert_eq!(results[0].entry.id, id);
}
