//! Local sentence-embedding model (all-MiniLM-L6-v2) run through ONNX Runtime.
//!
//! The model and tokenizer are fetched from Hugging Face into `cache_dir` on
//! first use. Token embeddings are mean-pooled under the attention mask and
//! L2-normalised, matching sentence-transformers output.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::info;

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// sentence-transformers model name, e.g. `all-MiniLM-L6-v2`.
    pub model: String,
    pub cache_dir: PathBuf,
    pub dimension: usize,
    /// Tokens beyond this are truncated.
    pub max_length: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            cache_dir: PathBuf::from("models/all-MiniLM-L6-v2"),
            dimension: 384,
            max_length: 256,
        }
    }
}

struct Model {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    max_length: usize,
}

#[derive(Clone)]
pub struct OnnxEmbedder {
    model: Arc<Model>,
    name: String,
}

fn model_err(context: &str, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Model(format!("{context}: {err}"))
}

impl OnnxEmbedder {
    /// Loads the model, downloading it first when it is not cached.
    pub async fn load(cfg: &OnnxConfig) -> Result<Self, ProviderError> {
        info!("Initializing ONNX embedder with model: {}", cfg.model);
        std::fs::create_dir_all(&cfg.cache_dir)
            .map_err(|e| model_err("create cache directory", e))?;

        let model_path = cfg.cache_dir.join("model.onnx");
        let tokenizer_path = cfg.cache_dir.join("tokenizer.json");
        if !model_path.exists() {
            download(&cfg.model, "onnx/model.onnx", &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download(&cfg.model, "tokenizer.json", &tokenizer_path).await?;
        }

        let session = Session::builder()
            .map_err(|e| model_err("session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| model_err("optimization level", e))?
            .with_intra_threads(4)
            .map_err(|e| model_err("intra threads", e))?
            .commit_from_file(&model_path)
            .map_err(|e| model_err("load model", e))?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| model_err("load tokenizer", e))?;

        info!("ONNX embedder ready");
        Ok(Self {
            model: Arc::new(Model {
                session: Mutex::new(session),
                tokenizer,
                dimension: cfg.dimension,
                max_length: cfg.max_length.max(1),
            }),
            name: cfg.model.clone(),
        })
    }
}

impl Model {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| model_err("tokenize", e))?;
        let rows: Vec<(&[u32], &[u32], &[u32])> = encodings
            .iter()
            .map(|e| (e.get_ids(), e.get_attention_mask(), e.get_type_ids()))
            .collect();
        let batch = pad_batch(&rows, self.max_length);
        let (n, seq) = (batch.rows, batch.seq_len);

        let tensor = |name: &str, data: Vec<i64>| {
            Tensor::from_array((vec![n, seq], data.into_boxed_slice()))
                .map(|t| t.into_dyn())
                .map_err(|e| model_err(name, e))
        };
        let inputs = vec![
            ("input_ids", tensor("input_ids", batch.input_ids)?),
            ("attention_mask", tensor("attention_mask", batch.attention_mask.clone())?),
            ("token_type_ids", tensor("token_type_ids", batch.token_type_ids)?),
        ];

        let mut session = self
            .session
            .lock()
            .map_err(|_| ProviderError::Model("session lock poisoned".into()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| model_err("inference", e))?;
        let output_list: Vec<_> = outputs.iter().collect();
        let (_, hidden) = output_list
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| output_list.first())
            .ok_or_else(|| ProviderError::Model("model produced no output".into()))?;
        let (shape, data) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| model_err("extract output", e))?;
        let hidden_size = shape.get(2).map(|&d| d as usize).unwrap_or(self.dimension);

        Ok(mean_pool(data, &batch.attention_mask, n, seq, hidden_size))
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        if texts.is_empty() {
            return Ok(EmbedResponse { vectors: vec![] });
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        // Inference is CPU-bound; keep it off the async workers.
        let vectors = tokio::task::spawn_blocking(move || model.embed_batch(texts))
            .await
            .map_err(|e| ProviderError::Model(format!("embedding task failed: {e}")))??;
        Ok(EmbedResponse { vectors })
    }

    fn model_id(&self) -> String {
        format!("onnx:{}", self.name)
    }

    fn dimension(&self) -> usize {
        self.model.dimension
    }
}

async fn download(model: &str, file: &str, dest: &Path) -> Result<(), ProviderError> {
    let url = format!("https://huggingface.co/sentence-transformers/{model}/resolve/main/{file}");
    info!("Downloading {}", url);
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(ProviderError::Status {
            status: resp.status().as_u16(),
            body: format!("download of {url} failed"),
        });
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    std::fs::write(dest, &bytes).map_err(|e| model_err("save download", e))?;
    info!(bytes = bytes.len(), "saved {}", dest.display());
    Ok(())
}

/// Row-major `[rows, seq_len]` model inputs, zero-padded.
#[derive(Debug, PartialEq)]
struct PaddedBatch {
    rows: usize,
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

fn pad_batch(rows: &[(&[u32], &[u32], &[u32])], max_length: usize) -> PaddedBatch {
    let seq_len = rows
        .iter()
        .map(|(ids, _, _)| ids.len())
        .max()
        .unwrap_or(0)
        .min(max_length);
    let size = rows.len() * seq_len;
    let mut batch = PaddedBatch {
        rows: rows.len(),
        seq_len,
        input_ids: vec![0; size],
        attention_mask: vec![0; size],
        token_type_ids: vec![0; size],
    };
    for (i, (ids, mask, types)) in rows.iter().enumerate() {
        for j in 0..ids.len().min(seq_len) {
            let at = i * seq_len + j;
            batch.input_ids[at] = i64::from(ids[j]);
            batch.attention_mask[at] = i64::from(mask[j]);
            batch.token_type_ids[at] = i64::from(types[j]);
        }
    }
    batch
}

/// Averages token vectors where the mask is set, then L2-normalises.
fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    rows: usize,
    seq_len: usize,
    hidden_size: usize,
) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|i| {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;
            for j in 0..seq_len {
                if mask[i * seq_len + j] == 0 {
                    continue;
                }
                let base = (i * seq_len + j) * hidden_size;
                if let Some(token) = hidden.get(base..base + hidden_size) {
                    for (s, v) in sum.iter_mut().zip(token) {
                        *s += v;
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|v| *v /= count);
            }
            let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                sum.iter_mut().for_each(|v| *v /= norm);
            }
            sum
        })
        .collect()
}
