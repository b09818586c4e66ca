use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/compass.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `onnx` (local sentence model, default), `hashing` (offline, no model
    /// files) or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub base_url: Option<String>,
    /// Where the `onnx` provider keeps its model and tokenizer.
    pub cache_dir: String,
    pub max_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "onnx".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 100,
            base_url: None,
            cache_dir: "models/all-MiniLM-L6-v2".to_string(),
            max_length: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub site_url: Option<String>,
    pub site_name: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "mistralai/mistral-7b-instruct:free".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            temperature: 0.2,
            max_tokens: 1500,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_ms: 500,
            site_url: None,
            site_name: Some("Health Compass".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    pub min_words: usize,
    pub sources: Vec<SourceProfile>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 50,
            min_chunk_chars: 100,
            min_words: 50,
            sources: vec![
                SourceProfile {
                    name: "MedlinePlus".to_string(),
                    organization: "National Library of Medicine".to_string(),
                    credibility: "high".to_string(),
                    source_type: "government".to_string(),
                    default_section: "Summary".to_string(),
                },
                SourceProfile {
                    name: "CDC".to_string(),
                    organization: "Centers for Disease Control".to_string(),
                    credibility: "high".to_string(),
                    source_type: "government".to_string(),
                    default_section: "Main Content".to_string(),
                },
            ],
        }
    }
}

impl CorpusConfig {
    /// Case-insensitive lookup; unknown sources get a medium-trust placeholder profile.
    pub fn profile_for(&self, source: &str) -> SourceProfile {
        self.sources
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(source))
            .cloned()
            .unwrap_or_else(|| SourceProfile::unknown(source))
    }
}

/// Provenance tags attached to every chunk from one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    pub organization: String,
    pub credibility: String,
    pub source_type: String,
    pub default_section: String,
}

impl SourceProfile {
    pub fn unknown(name: &str) -> Self {
        Self {
            name: if name.is_empty() { "Unknown" } else { name }.to_string(),
            organization: "Unknown".to_string(),
            credibility: "medium".to_string(),
            source_type: "unknown".to_string(),
            default_section: "General".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    InvalidOverlap { size: usize, overlap: usize },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },
    #[error("missing credentials: set {0}")]
    MissingCredentials(&'static str),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let corpus = &self.corpus;
        if corpus.chunk_size == 0 {
            return Err(ConfigError::Zero("corpus.chunk_size"));
        }
        if corpus.chunk_overlap >= corpus.chunk_size {
            return Err(ConfigError::InvalidOverlap {
                size: corpus.chunk_size,
                overlap: corpus.chunk_overlap,
            });
        }
        if self.embeddings.dimension == 0 {
            return Err(ConfigError::Zero("embeddings.dimension"));
        }
        if self.embeddings.batch_size == 0 {
            return Err(ConfigError::Zero("embeddings.batch_size"));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Zero("retrieval.top_k"));
        }
        if !matches!(self.embeddings.provider.as_str(), "onnx" | "hashing" | "openai") {
            return Err(ConfigError::UnknownProvider {
                kind: "embedding",
                name: self.embeddings.provider.clone(),
            });
        }
        if self.generation.provider != "openai" {
            return Err(ConfigError::UnknownProvider {
                kind: "generation",
                name: self.generation.provider.clone(),
            });
        }
        Ok(())
    }
}

/// Loads `config/default` (or the given file), then `COMPASS__SECTION__KEY` environment overrides.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("COMPASS")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let mut cfg = AppConfig::default();
        cfg.corpus.chunk_overlap = 400;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidOverlap {
                size: 400,
                overlap: 400
            })
        );
    }

    #[test]
    fn unknown_sources_fall_back_to_medium_credibility() {
        let corpus = CorpusConfig::default();
        assert_eq!(corpus.profile_for("cdc").organization, "Centers for Disease Control");
        let other = corpus.profile_for("WHO");
        assert_eq!(other.credibility, "medium");
        assert_eq!(other.name, "WHO");
    }

    #[test]
    fn partial_file_is_filled_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("compass.toml");
        std::fs::write(&file, "[retrieval]\ntop_k = 3\n").unwrap();
        let cfg = load(Some(file.to_str().unwrap())).unwrap();
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.corpus.chunk_size, 400);
        assert_eq!(cfg.corpus.sources.len(), 2);
        assert_eq!(cfg.embeddings.provider, "onnx");
        assert_eq!(cfg.embeddings.model, "all-MiniLM-L6-v2");
    }
}
