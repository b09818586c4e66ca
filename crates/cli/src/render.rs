//! Plain-text rendering of pipeline results for the terminal.

use compass_core::models::{AnswerEnvelope, RetrievalHit};
use compass_core::safety::{SafetyLevel, SafetyVerdict};
use compass_core::vectorstore::IndexStats;
use std::fmt::Write;

pub const DISCLAIMER: &str = "This information is for educational purposes only and is not a substitute \
for professional medical advice. Always consult a qualified healthcare provider.";

pub fn render_answer(envelope: &AnswerEnvelope) -> String {
    let mut out = String::new();
    if envelope.is_emergency {
        let _ = writeln!(out, "!!! EMERGENCY !!!\n");
        let _ = writeln!(out, "{}", envelope.answer_text);
        return out;
    }
    if envelope.safety_verdict.level == SafetyLevel::Urgent {
        if let Some(msg) = &envelope.safety_verdict.canned_message {
            let _ = writeln!(out, "{msg}\n");
        }
    }
    let _ = writeln!(out, "{}", envelope.answer_text);
    if !envelope.sources.is_empty() {
        let _ = writeln!(out, "\nSources:");
        for (i, s) in envelope.sources.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} - {} ({}, credibility: {})\n     {}",
                i + 1,
                s.source,
                s.title,
                s.organization,
                s.credibility,
                s.url
            );
        }
    }
    let _ = writeln!(out, "\n{DISCLAIMER}");
    out
}

pub fn render_hits(hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return "no results\n".to_string();
    }
    let mut out = String::new();
    for hit in hits {
        let c = &hit.chunk;
        let snippet: String = c.text.chars().take(160).collect();
        let _ = writeln!(
            out,
            "{:.4}  [{}] {} / {}\n        {}",
            hit.distance, c.source, c.title, c.section, snippet
        );
    }
    out
}

pub fn render_verdict(verdict: &SafetyVerdict) -> String {
    let mut out = format!("level: {}", verdict.level);
    if let Some(k) = &verdict.matched_keyword {
        let _ = write!(out, "\nmatched: {k}");
    }
    if let Some(msg) = &verdict.canned_message {
        let _ = write!(out, "\n\n{msg}");
    }
    out.push('\n');
    out
}

pub fn render_stats(stats: &IndexStats, documents: usize) -> String {
    let created = stats
        .created_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "chunks: {}\ndocuments: {}\nembedding model: {} ({} dims)\ncreated: {}\n",
        stats.total_chunks, documents, stats.embedding_model, stats.embedding_dimension, created
    )
}
