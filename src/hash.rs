//! Content hashing for sacred plans.
//!
//! A plan's content hash is computed once at draft time and never again
//! written; approval re-derives it from the stored body and requires exact
//! equality. Fields are length-prefixed before hashing so that shuffling
//! bytes between title and body cannot produce the same digest.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash of the normalized plan content: (project id, title, body).
///
/// Normalization trims surrounding whitespace and canonicalizes line
/// endings, so cosmetic edits do not mint a new plan.
pub fn content_hash(project_id: Uuid, title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, project_id.to_string().as_bytes());
    hash_field(&mut hasher, normalize(title).as_bytes());
    hash_field(&mut hasher, normalize(body).as_bytes());
    hex::encode(hasher.finalize())
}

/// Plan identity: content hash plus creation timestamp, so a re-drafted
/// plan (same text, drafted later, after its predecessor was rejected or
/// superseded) gets a distinct id.
pub fn plan_id(content_hash: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, content_hash.as_bytes());
    hash_field(&mut hasher, created_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn normalize(text: &str) -> String {
    text.trim().replace("\r\n", "\n")
}
