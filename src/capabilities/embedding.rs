//! Embedding capability: text-to-vector conversion.
//!
//! The drift detector and query façade only ever see this trait; the real
//! model backend lives outside this crate. [`TokenHashEmbedder`] is the
//! built-in deterministic implementation used by the CLI and tests: it
//! carries no semantics beyond token overlap, but it is stable across runs,
//! which is what the determinism guarantee on drift evaluation needs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Fingerprint cache keyed by plan id.
///
/// Approved plans are immutable, so a fingerprint computed once is valid
/// forever — the cache has no invalidation. The inner mutex is only held
/// for map access, never across the embed await; a racing double-compute
/// produces the same vector and is harmless.
pub struct FingerprintCache {
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<String, Arc<Vec<f32>>>>,
}

impl FingerprintCache {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fingerprint for an immutable text identified by `key`.
    pub async fn fingerprint(&self, key: &str, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(hit) = self
            .cache
            .lock()
            .expect("fingerprint cache poisoned")
            .get(key)
        {
            return Ok(hit.clone());
        }

        let vector = Arc::new(self.embedder.embed(text).await?);
        self.cache
            .lock()
            .expect("fingerprint cache poisoned")
            .insert(key.to_string(), vector.clone());
        Ok(vector)
    }

    /// One-off embedding with no caching (activity events, ad hoc queries).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }
}

/// Cosine similarity mapped into [0, 1].
///
/// Mismatched dimensions or a zero vector yield 0 rather than an error:
/// an unembeddable event aligns with nothing, which is exactly the
/// "unexplained" verdict the drift policy wants.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Deterministic hashed bag-of-tokens embedder.
///
/// Lowercased alphanumeric tokens are hashed into a fixed number of
/// buckets; the bucket counts, L2-normalized, are the vector. Two texts
/// sharing vocabulary land in the same buckets and score high; disjoint
/// texts score near zero.
pub struct TokenHashEmbedder {
    dimensions: usize,
}

impl TokenHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(bytes) % self.dimensions as u64) as usize
    }
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for TokenHashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimensions == 0 {
            return Err(Error::Embedding("embedder has zero dimensions".into()));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let embedder = TokenHashEmbedder::default();
        let a = embedder.embed("added REST handler for /users").await.unwrap();
        let b = embedder.embed("added REST handler for /users").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher_than_disjoint() {
        let embedder = TokenHashEmbedder::default();
        let plan = embedder.embed("use REST for all public APIs").await.unwrap();
        let aligned = embedder.embed("added REST handler for /users").await.unwrap();
        let unrelated = embedder.embed("tweaked gradient shader uniforms").await.unwrap();

        assert!(cosine_similarity(&plan, &aligned) > cosine_similarity(&plan, &unrelated));
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
