use crate::config::{AppConfig, ConfigError, CorpusConfig};
use crate::corpus;
use crate::embeddings;
use crate::generation::{self, GenerationOutcome, GenerationParams};
use crate::models::{AnswerEnvelope, RetrievalHit, SourceRef};
use crate::prompt;
use crate::safety::{SafetyClassifier, SafetyLevel, SafetyVerdict};
use crate::vectorstore::{AddReport, IndexError, SqliteVectorIndex, VectorIndex};
use anyhow::Context;
use providers::hashing::HashingEmbedder;
use providers::onnx::{OnnxConfig, OnnxEmbedder};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{LlmProvider, ProviderRegistry};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const NO_RESULTS_MESSAGE: &str = "I couldn't find relevant information in my database about this topic. \
Please consult a healthcare professional for accurate, personalized information.";

pub const RETRIEVAL_UNAVAILABLE_MESSAGE: &str = "Health information search is temporarily unavailable. \
Please try again later, or consult a healthcare professional.";

/// Environment variables checked, in order, for the generation API key.
pub const API_KEY_VARS: &[&str] = &["OPENROUTER_API_KEY", "OPENAI_API_KEY"];

/// Answers health questions from retrieved passages. Holds no per-query state,
/// so one instance may serve concurrent calls.
pub struct Orchestrator {
    safety: SafetyClassifier,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmProvider>,
    params: GenerationParams,
}

impl Orchestrator {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmProvider>,
        params: GenerationParams,
    ) -> Self {
        Self {
            safety: SafetyClassifier::new(),
            index,
            llm,
            params,
        }
    }

    pub fn with_classifier(mut self, safety: SafetyClassifier) -> Self {
        self.safety = safety;
        self
    }

    /// Refuses to start without a generation provider, since every answer depends on it.
    pub fn from_config(
        cfg: &AppConfig,
        registry: &ProviderRegistry,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, ConfigError> {
        let llm = registry
            .llm(Some(&cfg.generation.provider))
            .map_err(|_| ConfigError::MissingCredentials("OPENROUTER_API_KEY or OPENAI_API_KEY"))?;
        Ok(Self::new(index, llm, generation_params(cfg)))
    }

    pub fn classify(&self, query: &str) -> SafetyVerdict {
        self.safety.classify(query)
    }

    /// Raw retrieval for collaborators that do not need generation.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        self.index.search(query, k).await
    }

    /// Safety check, retrieval, source deduplication, prompt assembly,
    /// generation and packaging. Emergencies stop before retrieval; an empty
    /// result set stops before generation. Never fails: service problems come
    /// back as explanatory answer text.
    pub async fn answer(&self, query: &str, k: usize) -> AnswerEnvelope {
        let verdict = self.safety.classify(query);
        info!(
            level = %verdict.level,
            keyword = verdict.matched_keyword.as_deref().unwrap_or(""),
            "safety check"
        );
        if verdict.level == SafetyLevel::Emergency {
            let message = verdict.canned_message.clone().unwrap_or_default();
            return AnswerEnvelope {
                answer_text: message,
                sources: Vec::new(),
                is_emergency: true,
                safety_verdict: verdict,
            };
        }

        let hits = match self.index.search(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("retrieval failed: {}", e);
                return terminal(RETRIEVAL_UNAVAILABLE_MESSAGE, verdict);
            }
        };
        debug!(hits = hits.len(), "retrieved");
        if hits.is_empty() {
            return terminal(NO_RESULTS_MESSAGE, verdict);
        }

        let sources = dedupe_sources(&hits);
        let messages = prompt::build_messages(query, &hits);

        let answer_text =
            match generation::generate_with_retry(self.llm.as_ref(), &messages, &self.params).await
            {
                GenerationOutcome::Completed(raw) => {
                    let text = generation::postprocess(&raw);
                    if text.is_empty() {
                        warn!("generator returned an empty answer");
                        NO_RESULTS_MESSAGE.to_string()
                    } else {
                        text
                    }
                }
                GenerationOutcome::Failed(err) => {
                    warn!("generation failed: {}", err);
                    generation::failure_message(&err)
                }
            };

        AnswerEnvelope {
            answer_text,
            sources,
            is_emergency: false,
            safety_verdict: verdict,
        }
    }
}

fn terminal(message: &str, verdict: SafetyVerdict) -> AnswerEnvelope {
    AnswerEnvelope {
        answer_text: message.to_string(),
        sources: Vec::new(),
        is_emergency: false,
        safety_verdict: verdict,
    }
}

/// Unique `(source, url)` pairs in relevance order; the first hit supplies the details.
pub fn dedupe_sources(hits: &[RetrievalHit]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert((h.chunk.source.as_str(), h.chunk.url.as_str())))
        .map(|h| SourceRef::from(&h.chunk))
        .collect()
}

pub fn generation_params(cfg: &AppConfig) -> GenerationParams {
    GenerationParams {
        temperature: cfg.generation.temperature,
        max_tokens: cfg.generation.max_tokens,
        max_attempts: cfg.generation.max_retries.max(1),
        retry_base: Duration::from_millis(cfg.generation.retry_base_ms),
    }
}

fn api_key() -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|k| !k.trim().is_empty())
}

fn is_local(url: &str) -> bool {
    ["http://localhost", "http://127.0.0.1", "http://[::1]"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

/// Builds the embedding and generation providers once for the process.
/// A remote generation endpoint is only registered when an API key is present.
/// The local sentence model is only loaded when it is the configured embedder.
pub async fn build_registry(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    config.validate()?;
    let emb = &config.embeddings;
    let mut reg = ProviderRegistry::new()
        .with_embedding("hashing", Arc::new(HashingEmbedder::new(emb.dimension)));

    if emb.provider == "onnx" {
        let onnx = OnnxEmbedder::load(&OnnxConfig {
            model: emb.model.clone(),
            cache_dir: PathBuf::from(&emb.cache_dir),
            dimension: emb.dimension,
            max_length: emb.max_length,
        })
        .await
        .context("load local embedding model")?;
        reg = reg.with_embedding("onnx", Arc::new(onnx));
    }

    let key = api_key();
    let gcfg = &config.generation;
    let openai_cfg = |base_url: String| OpenAiConfig {
        api_key: key.clone(),
        base_url,
        embedding_model: config.embeddings.model.clone(),
        embedding_dimension: config.embeddings.dimension,
        chat_model: gcfg.model.clone(),
        timeout: Duration::from_secs(gcfg.timeout_secs),
        site_url: gcfg.site_url.clone(),
        site_name: gcfg.site_name.clone(),
    };

    if key.is_some() || is_local(&gcfg.base_url) {
        let provider = OpenAiProvider::new(openai_cfg(gcfg.base_url.clone()))?;
        reg = reg.with_llm("openai", Arc::new(provider));
    } else {
        debug!("no generation API key found; generation provider not registered");
    }

    if config.embeddings.provider == "openai" {
        let base = config
            .embeddings
            .base_url
            .clone()
            .unwrap_or_else(|| gcfg.base_url.clone());
        let provider = OpenAiProvider::new(openai_cfg(base))?;
        reg = reg.with_embedding("openai", Arc::new(provider));
    }

    Ok(reg
        .set_preferred_embedding(&config.embeddings.provider)
        .set_preferred_llm(&gcfg.provider))
}

/// Opens the persistent index with the configured embedding model.
pub async fn open_index(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<Arc<SqliteVectorIndex>> {
    let embedder = embeddings::resolve(registry, Some(&config.embeddings.provider))?;
    let index = SqliteVectorIndex::connect(
        &config.database.path,
        embedder,
        config.embeddings.batch_size,
    )
    .await
    .context("open vector index")?;
    Ok(Arc::new(index))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
    pub report: AddReport,
    pub total_indexed: usize,
}

/// Loads raw documents from `dir`, chunks them and adds them to `index`.
pub async fn ingest_directory(
    index: &dyn VectorIndex,
    dir: &Path,
    corpus_cfg: &CorpusConfig,
) -> anyhow::Result<IngestSummary> {
    info!("Loading raw documents from {}", dir.display());
    let documents = corpus::load_raw_documents(dir)?;
    let chunks = corpus::build_corpus(&documents, corpus_cfg);
    info!("Embedding {} chunks...", chunks.len());
    let report = index.add(&chunks).await.context("add chunks to index")?;
    let total_indexed = index.stats().await?.total_chunks;
    if report.stored + report.duplicates < chunks.len() {
        warn!(
            expected = chunks.len(),
            stored = report.stored,
            "ingestion incomplete"
        );
    }
    Ok(IngestSummary {
        documents: documents.len(),
        chunks: chunks.len(),
        report,
        total_indexed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use providers::EmbeddingProvider;

    fn hit(source: &str, url: &str, title: &str, distance: f32) -> RetrievalHit {
        RetrievalHit {
            chunk: Chunk {
                id: format!("{source}{url}{distance}"),
                text: "text".into(),
                source: source.into(),
                url: url.into(),
                title: title.into(),
                section: "Summary".into(),
                credibility: "high".into(),
                organization: source.into(),
                source_type: "government".into(),
            },
            distance,
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence_in_relevance_order() {
        let hits = vec![
            hit("CDC", "u1", "first", 0.1),
            hit("MedlinePlus", "u1", "other source", 0.2),
            hit("CDC", "u1", "later chunk", 0.3),
            hit("CDC", "u2", "second page", 0.4),
        ];
        let sources = dedupe_sources(&hits);
        let pairs: Vec<_> = sources
            .iter()
            .map(|s| (s.source.as_str(), s.url.as_str(), s.title.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("CDC", "u1", "first"),
                ("MedlinePlus", "u1", "other source"),
                ("CDC", "u2", "second page"),
            ]
        );
        assert!(dedupe_sources(&[]).is_empty());
    }

    #[test]
    fn local_endpoints_need_no_key() {
        assert!(is_local("http://localhost:1234/v1"));
        assert!(!is_local("https://openrouter.ai/api/v1"));
    }

    #[tokio::test]
    async fn registry_rejects_invalid_config() {
        let mut cfg = AppConfig::default();
        cfg.embeddings.provider = "word2vec".into();
        assert!(build_registry(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn hashing_registry_needs_no_model_files() {
        let mut cfg = AppConfig::default();
        cfg.embeddings.provider = "hashing".into();
        let registry = build_registry(&cfg).await.unwrap();
        let model = registry.embedding(None).unwrap();
        assert_eq!(model.model_id(), "hashing-v1-384");
    }
}
