use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted chunk row; `embedding` holds little-endian `f32` values.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub id: String,
    pub position: i64,
    pub text: String,
    pub source: String,
    pub url: String,
    pub title: String,
    pub section: String,
    pub credibility: String,
    pub organization: String,
    pub source_type: String,
    pub embedding: Vec<u8>,
}

/// The columns needed to score a chunk against a query.
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddingRow {
    pub id: String,
    pub position: i64,
    pub embedding: Vec<u8>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IndexMeta {
    pub key: String,
    pub value: String,
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Returns `None` when the blob length is not a whole number of `f32`s.
pub fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_blob_is_rejected() {
        let mut blob = encode_vector(&[1.0, -2.5]);
        assert_eq!(decode_vector(&blob), Some(vec![1.0, -2.5]));
        blob.pop();
        assert_eq!(decode_vector(&blob), None);
    }
}
