use cli::render::{render_answer, render_hits, render_stats, render_verdict, DISCLAIMER};
use compass_core::models::{AnswerEnvelope, Chunk, RetrievalHit, SourceRef};
use compass_core::safety::SafetyClassifier;
use compass_core::vectorstore::IndexStats;

fn source() -> SourceRef {
    SourceRef {
        source: "CDC".into(),
        url: "https://www.cdc.gov/diabetes".into(),
        title: "Diabetes Basics".into(),
        organization: "Centers for Disease Control".into(),
        credibility: "high".into(),
    }
}

#[test]
fn urgent_answers_carry_a_banner_before_the_body() {
    let verdict = SafetyClassifier::new().classify("I have a high fever that won't go down");
    let envelope = AnswerEnvelope {
        answer_text: "Fever is the body's response to infection.".into(),
        sources: vec![source()],
        is_emergency: false,
        safety_verdict: verdict.clone(),
    };
    let out = render_answer(&envelope);
    let banner = verdict.canned_message.unwrap();
    let banner_at = out.find(&banner).unwrap();
    let body_at = out.find("Fever is the body's").unwrap();
    assert!(banner_at < body_at);
    assert!(
        out.contains("1. CDC - Diabetes Basics (Centers for Disease Control, credibility: high)")
    );
    assert!(out.trim_end().ends_with(DISCLAIMER));
}

#[test]
fn emergency_output_is_only_the_canned_message() {
    let verdict = SafetyClassifier::new().classify("chest pain and can't breathe");
    let envelope = AnswerEnvelope {
        answer_text: verdict.canned_message.clone().unwrap(),
        sources: vec![],
        is_emergency: true,
        safety_verdict: verdict,
    };
    let out = render_answer(&envelope);
    assert!(out.contains("911"));
    assert!(!out.contains("Sources:"));
    assert!(!out.contains(DISCLAIMER));
}

#[test]
fn hits_and_verdicts_render_compactly() {
    assert_eq!(render_hits(&[]), "no results\n");
    let hit = RetrievalHit {
        chunk: Chunk {
            id: "x".into(),
            text: "Diabetes is a chronic condition.".into(),
            source: "CDC".into(),
            url: "u".into(),
            title: "Diabetes".into(),
            section: "Main Content".into(),
            credibility: "high".into(),
            organization: "Centers for Disease Control".into(),
            source_type: "government".into(),
        },
        distance: 0.125,
    };
    let out = render_hits(&[hit]);
    assert!(out.starts_with("0.1250  [CDC] Diabetes / Main Content"));

    let info = render_verdict(&SafetyClassifier::new().classify("what is asthma"));
    assert_eq!(info, "level: INFO\n");
}

#[test]
fn stats_show_model_and_creation_time() {
    let stats = IndexStats {
        total_chunks: 12,
        embedding_dimension: 384,
        embedding_model: "hashing-v1-384".into(),
        created_at: None,
    };
    let out = render_stats(&stats, 3);
    assert!(out.contains("chunks: 12\ndocuments: 3\n"));
    assert!(out.contains("hashing-v1-384 (384 dims)"));
    assert!(out.contains("created: -"));
    let dated = IndexStats {
        created_at: Some(chrono::Utc::now()),
        ..stats
    };
    assert!(!render_stats(&dated, 3).contains("created: -"));
}
