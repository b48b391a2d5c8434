//! Paper centroid: the mean of its chunk embeddings.

use tracing::debug;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use crate::models::Chunk;

/// Embed every chunk and return the element-wise mean vector.
///
/// # Errors
/// - `EmbeddingError::EmptyInput` if `chunks` is empty
/// - any error from the provider's `embed_batch`
pub async fn compute_centroid<E>(chunks: &[Chunk], provider: &E) -> EmbeddingResult<Vec<f32>>
where
    E: EmbeddingProvider + ?Sized,
{
    if chunks.is_empty() {
        return Err(EmbeddingError::EmptyInput("Cannot compute centroid of empty chunks".to_string()));
    }
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = provider.embed_batch(&texts).await?;
    debug!("Computing centroid over {} chunk embeddings", vectors.len());
    mean_vector(&vectors)
}

/// Element-wise arithmetic mean of equally sized vectors.
///
/// # Errors
/// - `EmbeddingError::EmptyInput` if `vectors` is empty
/// - `EmbeddingError::InvalidInput` if the vectors differ in length
pub fn mean_vector<V: AsRef<[f32]>>(vectors: &[V]) -> EmbeddingResult<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| EmbeddingError::EmptyInput("Cannot compute mean of zero vectors".to_string()))?;
    let dimension = first.as_ref().len();

    let mut sums = vec![0.0f64; dimension];
    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != dimension {
            return Err(EmbeddingError::InvalidInput(format!(
                "vector dimension mismatch: expected {}, got {}",
                dimension,
                vector.len()
            )));
        }
        for (sum, value) in sums.iter_mut().zip(vector) {
            *sum += f64::from(*value);
        }
    }

    let count = vectors.len() as f64;
    Ok(sums.into_iter().map(|sum| (sum / count) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedEmbeddings(HashMap<&'static str, Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| EmbeddingError::InvalidInput(text.to_string()))
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            paper_id: "p".into(),
            chunk_id: format!("p-{}", text),
            text: text.into(),
            section: None,
            page_start: None,
            page_end: None,
            token_count: None,
        }
    }

    #[tokio::test]
    async fn test_centroid_of_three_vectors() {
        let provider = FixedEmbeddings(HashMap::from([
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.0, 1.0]),
            ("c", vec![1.0, 1.0]),
        ]));
        let centroid = compute_centroid(&[chunk("a"), chunk("b"), chunk("c")], &provider).await.unwrap();
        assert_eq!(centroid.len(), 2);
        assert!((centroid[0] - 0.6667).abs() < 1e-3);
        assert!((centroid[1] - 0.6667).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_centroid_of_no_chunks_fails() {
        let provider = FixedEmbeddings(HashMap::new());
        let result = compute_centroid(&[], &provider).await;
        assert!(matches!(result, Err(EmbeddingError::EmptyInput(_))));
    }

    #[tokio::test]
    async fn test_centroid_propagates_provider_error() {
        let provider = FixedEmbeddings(HashMap::new());
        let result = compute_centroid(&[chunk("missing")], &provider).await;
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
    }

    #[test]
    fn test_mean_vector_rejects_ragged_input() {
        let result = mean_vector(&[vec![1.0, 2.0], vec![1.0]]);
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(matches!(mean_vector(&empty), Err(EmbeddingError::EmptyInput(_))));
    }
}
