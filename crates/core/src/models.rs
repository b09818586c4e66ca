use crate::safety::SafetyVerdict;
use serde::{Deserialize, Serialize};

/// A scraped document handed to the corpus builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub url: String,
    pub title: String,
    /// Originating organisation name; matched against configured source profiles.
    pub source: String,
    pub sections: Vec<RawSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSection {
    /// `None` means the source profile's default section label applies.
    pub heading: Option<String>,
    pub content: String,
}

impl RawDocument {
    pub fn single(source: &str, url: &str, title: &str, text: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            sections: vec![RawSection {
                heading: None,
                content: text.to_string(),
            }],
        }
    }
}

/// A cleaned, source-attributed unit of indexed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub url: String,
    pub title: String,
    pub section: String,
    pub credibility: String,
    pub organization: String,
    pub source_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    /// Cosine distance; 0.0 is identical.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub url: String,
    pub title: String,
    pub organization: String,
    pub credibility: String,
}

impl From<&Chunk> for SourceRef {
    fn from(chunk: &Chunk) -> Self {
        Self {
            source: chunk.source.clone(),
            url: chunk.url.clone(),
            title: chunk.title.clone(),
            organization: chunk.organization.clone(),
            credibility: chunk.credibility.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEnvelope {
    pub answer_text: String,
    pub sources: Vec<SourceRef>,
    pub is_emergency: bool,
    pub safety_verdict: SafetyVerdict,
}
