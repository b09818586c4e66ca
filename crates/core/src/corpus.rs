//! Turns scraped documents into cleaned, overlapping, source-attributed chunks.

use crate::config::{CorpusConfig, SourceProfile};
use crate::models::{Chunk, RawDocument, RawSection};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Punctuation kept by [`clean_text`] besides word characters and whitespace.
const KEPT_PUNCTUATION: &[char] = &['-', ',', '.', '(', ')', '[', ']', ':', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub window: usize,
    pub overlap: usize,
    pub min_chars: usize,
    pub min_words: usize,
}

impl From<&CorpusConfig> for ChunkParams {
    fn from(cfg: &CorpusConfig) -> Self {
        Self {
            window: cfg.chunk_size,
            overlap: cfg.chunk_overlap,
            min_chars: cfg.min_chunk_chars,
            min_words: cfg.min_words,
        }
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        (&CorpusConfig::default()).into()
    }
}

/// Drops scraping artifacts while keeping tokens such as "5-HT" or "(mg/dL)",
/// then collapses whitespace runs to single spaces.
pub fn clean_text(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || *c == '_' || c.is_whitespace() || KEPT_PUNCTUATION.contains(c)
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits cleaned text into word windows of `window` words advancing by
/// `window - overlap`, stopping once a window reaches the end of the text.
///
/// Text shorter than `min_words` words is returned whole, provided it has at
/// least `min_chars` characters. Windows shorter than `min_chars` are dropped.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<String> {
    if text.chars().count() < params.min_chars {
        return Vec::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < params.min_words {
        return vec![words.join(" ")];
    }

    let step = params.window.saturating_sub(params.overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + params.window).min(words.len());
        let chunk = words[start..end].join(" ");
        if chunk.chars().count() >= params.min_chars {
            chunks.push(chunk);
        }
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn validate(doc: &RawDocument) -> Result<(), &'static str> {
    if doc.url.trim().is_empty() && doc.title.trim().is_empty() {
        return Err("document has neither url nor title");
    }
    if doc.sections.iter().all(|s| s.content.trim().is_empty()) {
        return Err("document has no text content");
    }
    Ok(())
}

fn chunk_id(source: &str, url: &str, section: &str, index: usize, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [source, url, section, &index.to_string(), text] {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// Cleans and chunks every document, tagging chunks with the provenance of
/// their source profile. Invalid documents are skipped with a warning.
pub fn build_corpus(documents: &[RawDocument], cfg: &CorpusConfig) -> Vec<Chunk> {
    let params = ChunkParams::from(cfg);
    let mut chunks = Vec::new();
    let mut seen = HashSet::new();

    for doc in documents {
        if let Err(reason) = validate(doc) {
            warn!(url = %doc.url, title = %doc.title, "skipping document: {}", reason);
            continue;
        }
        let profile = cfg.profile_for(&doc.source);
        for section in &doc.sections {
            let label = section
                .heading
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .unwrap_or(&profile.default_section);
            let cleaned = clean_text(&section.content);
            for (index, text) in chunk_text(&cleaned, &params).into_iter().enumerate() {
                let id = chunk_id(&profile.name, &doc.url, label, index, &text);
                if !seen.insert(id.clone()) {
                    debug!(url = %doc.url, section = label, "duplicate chunk dropped");
                    continue;
                }
                chunks.push(make_chunk(id, text, doc, label, &profile));
            }
        }
    }

    info!(
        documents = documents.len(),
        chunks = chunks.len(),
        "corpus built"
    );
    chunks
}

fn make_chunk(
    id: String,
    text: String,
    doc: &RawDocument,
    section: &str,
    profile: &SourceProfile,
) -> Chunk {
    Chunk {
        id,
        text,
        source: profile.name.clone(),
        url: doc.url.clone(),
        title: doc.title.clone(),
        section: section.to_string(),
        credibility: profile.credibility.clone(),
        organization: profile.organization.clone(),
        source_type: profile.source_type.clone(),
    }
}

/// On-disk shapes produced by the scrapers, one JSON object per file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Plain {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
        text: String,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        section: Option<String>,
    },
    Itemised {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
        content: Vec<ContentItem>,
        #[serde(default)]
        source: Option<String>,
    },
    Sectioned {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        sections: Vec<SectionRecord>,
        #[serde(default)]
        source: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct SectionRecord {
    #[serde(default)]
    heading: Option<String>,
    #[serde(default)]
    content: String,
}

impl RawRecord {
    fn into_document(self, fallback_source: &str) -> RawDocument {
        let pick = |source: Option<String>| {
            source
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback_source.to_string())
        };
        match self {
            RawRecord::Plain {
                url,
                title,
                text,
                source,
                section,
            } => RawDocument {
                url,
                title,
                source: pick(source),
                sections: vec![RawSection {
                    heading: section,
                    content: text,
                }],
            },
            RawRecord::Itemised {
                url,
                title,
                content,
                source,
            } => {
                let joined = content
                    .into_iter()
                    .map(|item| item.text)
                    .collect::<Vec<_>>()
                    .join(" ");
                RawDocument {
                    url,
                    title,
                    source: pick(source),
                    sections: vec![RawSection {
                        heading: None,
                        content: joined,
                    }],
                }
            }
            RawRecord::Sectioned {
                url,
                title,
                summary,
                sections,
                source,
            } => {
                let mut parts = Vec::new();
                if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
                    parts.push(RawSection {
                        heading: Some("Summary".to_string()),
                        content: summary,
                    });
                }
                parts.extend(sections.into_iter().map(|s| RawSection {
                    heading: Some(s.heading.unwrap_or_else(|| "Content".to_string())),
                    content: s.content,
                }));
                RawDocument {
                    url,
                    title,
                    source: pick(source),
                    sections: parts,
                }
            }
        }
    }
}

/// Parses one scraped JSON record. The source name defaults to `fallback_source`.
pub fn parse_raw_document(json: &str, fallback_source: &str) -> anyhow::Result<RawDocument> {
    let record: RawRecord = serde_json::from_str(json)?;
    Ok(record.into_document(fallback_source))
}

/// Reads every `*.json` file below `dir`. The name of a file's parent
/// directory serves as its source when the record does not name one.
/// Unreadable or unparsable files are skipped with a warning.
pub fn load_raw_documents(dir: &Path) -> anyhow::Result<Vec<RawDocument>> {
    anyhow::ensure!(dir.is_dir(), "corpus directory not found: {}", dir.display());
    let mut paths: Vec<_> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    // Stable order keeps rebuilds reproducible.
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let fallback = path
            .parent()
            .filter(|p| *p != dir)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("Unknown")
            .to_string();
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|json| parse_raw_document(&json, &fallback));
        match parsed {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!(path = %path.display(), "skipping raw document: {}", e),
        }
    }
    Ok(documents)
}
