use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use tracing::{debug, info, warn};

use ocg_core::{OcgError, Result};

/// Distance metric for the ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    L2,
    Ip,
    #[default]
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Ip => "ip",
            DistanceMetric::Cosine => "cosine",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "l2" => DistanceMetric::L2,
            "ip" => DistanceMetric::Ip,
            _ => DistanceMetric::Cosine,
        }
    }

    /// Vectors are L2-normalized at write time under these metrics.
    pub fn normalizes(&self) -> bool {
        matches!(self, DistanceMetric::Ip | DistanceMetric::Cosine)
    }

    fn hora_metric(&self) -> Metric {
        match self {
            DistanceMetric::L2 => Metric::Euclidean,
            DistanceMetric::Ip => Metric::DotProduct,
            DistanceMetric::Cosine => Metric::CosineSimilarity,
        }
    }
}

/// HNSW index configuration.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub dim: usize,
    /// Connections per node.
    pub m: usize,
    pub ef_search: usize,
    pub ef_construct: usize,
    pub metric: DistanceMetric,
    /// Flat-dump persistence path. `None` disables persistence.
    pub storage_path: Option<PathBuf>,
}

impl HnswConfig {
    pub fn new(dim: usize, storage_path: Option<PathBuf>) -> Self {
        Self {
            dim,
            m: 16,
            ef_search: 100,
            ef_construct: 200,
            metric: DistanceMetric::Cosine,
            storage_path,
        }
    }
}

/// In-memory HNSW index plus the flat vector mirror that backs persistence.
///
/// The dump format is: i32 dimension, u64 count, then count·dimension f32
/// values, all little-endian. The graph itself is rebuilt from the vectors on
/// load; the dump is a cache, and any inconsistency with the database is
/// repaired by a full rebuild.
pub struct HnswIndex {
    index: HNSWIndex<f32, usize>,
    vectors: Vec<Vec<f32>>,
    cfg: HnswConfig,
    loaded: bool,
}

impl HnswIndex {
    /// Create an empty index, ignoring any dump on disk. The storage path is
    /// kept so `save` still persists. Used for rebuilds, where the database
    /// is the source of truth and a stale dump must not be resurrected.
    pub fn new_empty(cfg: HnswConfig) -> Result<Self> {
        if cfg.dim == 0 {
            return Err(OcgError::Memory("invalid index dimension: 0".into()));
        }

        let params = HNSWParams::<f32> {
            n_neighbor: cfg.m,
            ef_build: cfg.ef_construct,
            ef_search: cfg.ef_search,
            ..Default::default()
        };
        let index = HNSWIndex::<f32, usize>::new(cfg.dim, &params);

        Ok(Self {
            index,
            vectors: Vec::new(),
            cfg,
            loaded: false,
        })
    }

    /// Create a fresh index. If the config points at a non-empty dump with a
    /// matching dimension, its vectors are restored.
    pub fn new(cfg: HnswConfig) -> Result<Self> {
        let mut idx = Self::new_empty(cfg)?;

        if let Some(path) = idx.cfg.storage_path.clone() {
            match read_flat_dump(&path) {
                Ok(Some((dim, vectors))) if dim == idx.cfg.dim => {
                    let count = vectors.len();
                    if let Err(e) = idx.add_all(&vectors) {
                        warn!(error = %e, "failed to restore vectors from dump, starting empty");
                        idx.reset();
                    } else {
                        idx.loaded = true;
                        info!(count, path = %path.display(), "HNSW index restored from dump");
                    }
                }
                Ok(Some((dim, _))) => {
                    warn!(
                        dump_dim = dim,
                        index_dim = idx.cfg.dim,
                        "HNSW dump dimension mismatch, ignoring dump"
                    );
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to read HNSW dump"),
            }
        }

        debug!(
            dim = idx.cfg.dim,
            m = idx.cfg.m,
            metric = idx.cfg.metric.as_str(),
            "HNSW index created"
        );
        Ok(idx)
    }

    pub fn config(&self) -> &HnswConfig {
        &self.cfg
    }

    pub fn metric(&self) -> DistanceMetric {
        self.cfg.metric
    }

    pub fn dim(&self) -> usize {
        self.cfg.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Whether the vectors were restored from disk at construction.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    fn reset(&mut self) {
        let params = HNSWParams::<f32> {
            n_neighbor: self.cfg.m,
            ef_build: self.cfg.ef_construct,
            ef_search: self.cfg.ef_search,
            ..Default::default()
        };
        self.index = HNSWIndex::<f32, usize>::new(self.cfg.dim, &params);
        self.vectors.clear();
        self.loaded = false;
    }

    /// Append vectors. Labels are positions in insertion order.
    pub fn add_all(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        for v in vectors {
            if v.len() != self.cfg.dim {
                return Err(OcgError::Memory(format!(
                    "vector dimension mismatch: got {}, expected {}",
                    v.len(),
                    self.cfg.dim
                )));
            }
            let label = self.vectors.len();
            self.index
                .add(v, label)
                .map_err(|e| OcgError::Memory(format!("hnsw add failed: {e}")))?;
            self.vectors.push(v.clone());
        }
        self.index
            .build(self.cfg.metric.hora_metric())
            .map_err(|e| OcgError::Memory(format!("hnsw build failed: {e}")))?;
        Ok(())
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        self.add_all(&[vector.to_vec()])
    }

    /// K-nearest search. Returns `(label, score)` pairs, best first.
    /// Score: raw similarity for ip/cosine, `1/(1+dist)` for l2.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.cfg.dim {
            return Err(OcgError::Memory(format!(
                "query dimension mismatch: got {}, expected {}",
                query.len(),
                self.cfg.dim
            )));
        }
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let k = if k == 0 { 5 } else { k };
        let labels = self.index.search(query, k.min(self.vectors.len()));

        let mut results: Vec<(usize, f32)> = labels
            .into_iter()
            .filter_map(|label| {
                let stored = self.vectors.get(label)?;
                let score = match self.cfg.metric {
                    DistanceMetric::L2 => {
                        let dist: f32 = query
                            .iter()
                            .zip(stored.iter())
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum::<f32>()
                            .sqrt();
                        1.0 / (1.0 + dist)
                    }
                    // Stored vectors are normalized, so the dot product is
                    // both the inner-product score and the cosine similarity.
                    DistanceMetric::Ip | DistanceMetric::Cosine => {
                        query.iter().zip(stored.iter()).map(|(a, b)| a * b).sum()
                    }
                };
                Some((label, score))
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Persist the flat vector dump.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.cfg.storage_path else {
            return Ok(());
        };
        write_flat_dump(path, self.cfg.dim, &self.vectors)?;
        debug!(count = self.vectors.len(), path = %path.display(), "HNSW dump saved");
        Ok(())
    }
}

/// Read a flat dump. `Ok(None)` means the file is missing or empty.
fn read_flat_dump(path: &Path) -> Result<Option<(usize, Vec<Vec<f32>>)>> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }

    let mut header = [0u8; 12];
    file.read_exact(&mut header)
        .map_err(|e| OcgError::Memory(format!("truncated index dump: {e}")))?;
    let dim = i32::from_le_bytes(header[0..4].try_into().unwrap());
    let count = u64::from_le_bytes(header[4..12].try_into().unwrap());
    if dim <= 0 {
        return Err(OcgError::Memory(format!("bad dump dimension: {dim}")));
    }
    let dim = dim as usize;

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)?;
    let expected = count as usize * dim * 4;
    if payload.len() < expected {
        return Err(OcgError::Memory(format!(
            "truncated index dump: have {} bytes, need {expected}",
            payload.len()
        )));
    }

    let mut vectors = Vec::with_capacity(count as usize);
    for chunk in payload[..expected].chunks_exact(dim * 4) {
        let vector: Vec<f32> = chunk
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        vectors.push(vector);
    }
    Ok(Some((dim, vectors)))
}

fn write_flat_dump(path: &Path, dim: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(&(dim as i32).to_le_bytes())?;
    file.write_all(&(vectors.len() as u64).to_le_bytes())?;
    for v in vectors {
        for f in v {
            file.write_all(&f.to_le_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn search_finds_nearest_under_cosine() {
        let mut idx = HnswIndex::new(HnswConfig::new(16, None)).unwrap();
        idx.add_all(&[unit(16, 0), unit(16, 5), unit(16, 9)]).unwrap();

        let results = idx.search(&unit(16, 5), 1).unwrap();
        assert_eq!(results[0].0, 1);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn l2_scores_are_inverse_distance() {
        let cfg = HnswConfig {
            metric: DistanceMetric::L2,
            ..HnswConfig::new(4, None)
        };
        let mut idx = HnswIndex::new(cfg).unwrap();
        idx.add_all(&[unit(4, 0), unit(4, 1)]).unwrap();

        let results = idx.search(&unit(4, 0), 2).unwrap();
        assert_eq!(results[0].0, 0);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        // Orthogonal unit vectors are sqrt(2) apart.
        assert!((results[1].1 - 1.0 / (1.0 + 2f32.sqrt())).abs() < 1e-5);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = HnswIndex::new(HnswConfig::new(8, None)).unwrap();
        assert!(idx.add(&[1.0, 2.0]).is_err());
        assert!(idx.search(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn flat_dump_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector.index");

        let cfg = HnswConfig::new(8, Some(path.clone()));
        let mut idx = HnswIndex::new(cfg.clone()).unwrap();
        idx.add_all(&[unit(8, 2), unit(8, 6)]).unwrap();
        idx.save().unwrap();

        // Verify the binary header: i32 dim, u64 count, little-endian.
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(i32::from_le_bytes(raw[0..4].try_into().unwrap()), 8);
        assert_eq!(u64::from_le_bytes(raw[4..12].try_into().unwrap()), 2);
        assert_eq!(raw.len(), 12 + 2 * 8 * 4);

        let restored = HnswIndex::new(cfg).unwrap();
        assert!(restored.loaded());
        assert_eq!(restored.len(), 2);
        let results = restored.search(&unit(8, 6), 1).unwrap();
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn empty_dump_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector.index");
        std::fs::write(&path, b"").unwrap();

        let idx = HnswIndex::new(HnswConfig::new(8, Some(path))).unwrap();
        assert!(!idx.loaded());
        assert!(idx.is_empty());
    }
}
