use providers::{EmbeddingProvider, ProviderError, ProviderRegistry};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("embedding model returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Embeds `texts` and checks the model returned one vector of the declared
/// dimension per input.
pub async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let resp = provider.embed(texts).await?;
    if resp.vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            got: resp.vectors.len(),
        });
    }
    let expected = provider.dimension();
    if let Some(bad) = resp.vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            got: bad.len(),
        });
    }
    Ok(resp.vectors)
}

/// Resolves the embedding model once at startup; the same instance must serve
/// ingestion and queries for a given index.
pub fn resolve(
    registry: &ProviderRegistry,
    name: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    registry.embedding(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::hashing::HashingEmbedder;
    use providers::EmbedResponse;

    struct ShortVectors;

    #[async_trait::async_trait]
    impl EmbeddingProvider for ShortVectors {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse {
                vectors: vec![vec![0.5; 3]; texts.len()],
            })
        }

        fn model_id(&self) -> String {
            "short".into()
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn rejects_vectors_of_the_wrong_dimension() {
        let err = embed_checked(&ShortVectors, &["x".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: 4, got: 3 }
        ));
    }

    #[tokio::test]
    async fn resolves_preferred_model_from_registry() {
        let registry = ProviderRegistry::new()
            .with_embedding("hashing", Arc::new(HashingEmbedder::new(12)))
            .set_preferred_embedding("hashing");
        let model = resolve(&registry, None).unwrap();
        let vectors = embed_checked(model.as_ref(), &["a b".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 12);
    }
}
