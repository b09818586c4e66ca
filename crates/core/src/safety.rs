//! Keyword triage of user queries into emergency, urgent and informational tiers.
//!
//! Matching is plain case-insensitive substring containment. Emergency
//! patterns are checked first and the first hit wins, so an ambiguous query
//! always resolves to the more severe tier. Negation is not understood: "no
//! chest pain" still triggers an emergency. False positives are tolerated,
//! false negatives are not.

use serde::{Deserialize, Serialize};

pub const EMERGENCY_PATTERNS: &[&str] = &[
    // cardiac
    "chest pain",
    "heart attack",
    "severe chest pressure",
    "crushing chest pain",
    "chest discomfort radiating",
    // respiratory
    "can't breathe",
    "cannot breathe",
    "difficulty breathing",
    "choking",
    "severe shortness of breath",
    "gasping for air",
    "blue lips",
    "blue face",
    // neurological
    "stroke",
    "loss of consciousness",
    "passed out",
    "fainted",
    "unresponsive",
    "severe head injury",
    "head trauma",
    "seizure",
    "sudden confusion",
    "can't speak",
    "slurred speech",
    "face drooping",
    "arm weakness",
    "sudden numbness",
    // bleeding and trauma
    "severe bleeding",
    "bleeding won't stop",
    "heavy bleeding",
    "major injury",
    "severe trauma",
    "broken neck",
    "spinal injury",
    // allergic reactions
    "severe allergic reaction",
    "anaphylaxis",
    "anaphylactic shock",
    "throat swelling",
    "throat closing",
    "can't swallow",
    // mental health
    "suicidal",
    "want to die",
    "kill myself",
    "end my life",
    "suicide plan",
    "going to kill",
    // other
    "severe pain",
    "unbearable pain",
    "excruciating pain",
    "poisoning",
    "overdose",
    "took too many pills",
    "severe burn",
    "third degree burn",
    "compound fracture",
    "bone through skin",
];

pub const URGENT_PATTERNS: &[&str] = &[
    "high fever",
    "fever over 103",
    "fever won't go down",
    "persistent vomiting",
    "can't keep anything down",
    "severe dehydration",
    "dizzy and weak",
    "signs of infection",
    "wound infection",
    "red streaks",
    "pregnancy complications",
    "bleeding during pregnancy",
    "broken bone",
    "think i broke",
    "deep cut",
    "eye injury",
    "something in eye",
    "severe headache",
    "worst headache of life",
    "stiff neck with fever",
];

pub const EMERGENCY_MESSAGE: &str = "MEDICAL EMERGENCY - CALL 911 (OR YOUR LOCAL EMERGENCY NUMBER) IMMEDIATELY

The symptoms you described may be a life-threatening emergency.
Do not wait. Call emergency services or go to the nearest emergency room now.

Call for help right away if you are experiencing:
- Chest pain or severe pressure
- Difficulty breathing
- Signs of stroke (face drooping, arm weakness, speech difficulty)
- Severe bleeding that won't stop
- Loss of consciousness or unresponsiveness
- Seizures
- Severe allergic reaction (throat swelling, difficulty breathing)
- Thoughts of suicide or harming yourself
- Severe trauma or injury

Do not drive yourself.
If you are having thoughts of suicide, call or text 988 (Suicide & Crisis Lifeline).

Online information cannot help in an emergency. Seek immediate professional help.";

pub const URGENT_MESSAGE: &str = "URGENT MEDICAL ATTENTION RECOMMENDED

The symptoms you described may require prompt medical care.

1. Contact your doctor or healthcare provider within 24 hours
2. Visit an urgent care clinic if your doctor is unavailable
3. Go to the emergency room if symptoms worsen
4. Call 911 if you develop emergency symptoms

Do not rely solely on online information for urgent medical concerns.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyLevel {
    Emergency,
    Urgent,
    Info,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Emergency => "EMERGENCY",
            SafetyLevel::Urgent => "URGENT",
            SafetyLevel::Info => "INFO",
        }
    }
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub level: SafetyLevel,
    pub matched_keyword: Option<String>,
    pub canned_message: Option<String>,
}

impl SafetyVerdict {
    pub fn info() -> Self {
        Self {
            level: SafetyLevel::Info,
            matched_keyword: None,
            canned_message: None,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.level == SafetyLevel::Emergency
    }
}

#[derive(Debug, Clone)]
pub struct SafetyClassifier {
    emergency_patterns: Vec<String>,
    urgent_patterns: Vec<String>,
}

impl Default for SafetyClassifier {
    fn default() -> Self {
        Self::with_patterns(
            EMERGENCY_PATTERNS.iter().map(|s| s.to_string()).collect(),
            URGENT_PATTERNS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl SafetyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patterns are lowercased; list order is the match order.
    pub fn with_patterns(emergency: Vec<String>, urgent: Vec<String>) -> Self {
        let prepare = |patterns: Vec<String>| {
            patterns
                .into_iter()
                .map(|p| normalize(&p))
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            emergency_patterns: prepare(emergency),
            urgent_patterns: prepare(urgent),
        }
    }

    pub fn classify(&self, query: &str) -> SafetyVerdict {
        let query = normalize(query);

        if let Some(keyword) = first_match(&self.emergency_patterns, &query) {
            return SafetyVerdict {
                level: SafetyLevel::Emergency,
                matched_keyword: Some(keyword.to_string()),
                canned_message: Some(EMERGENCY_MESSAGE.to_string()),
            };
        }

        if let Some(keyword) = first_match(&self.urgent_patterns, &query) {
            return SafetyVerdict {
                level: SafetyLevel::Urgent,
                matched_keyword: Some(keyword.to_string()),
                canned_message: Some(URGENT_MESSAGE.to_string()),
            };
        }

        SafetyVerdict::info()
    }
}

fn first_match<'a>(patterns: &'a [String], query: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| query.contains(p.as_str()))
        .map(String::as_str)
}

// Typographic apostrophes would otherwise defeat patterns like "can't breathe".
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_phrase_wins_regardless_of_case_and_context() {
        let classifier = SafetyClassifier::new();
        for query in [
            "severe chest pain",
            "I have SEVERE CHEST PAIN since this morning",
            "my dad says he has Chest Pain, what should we do?",
        ] {
            let verdict = classifier.classify(query);
            assert_eq!(verdict.level, SafetyLevel::Emergency, "{query}");
            assert_eq!(verdict.canned_message.as_deref(), Some(EMERGENCY_MESSAGE));
        }
    }

    #[test]
    fn reports_the_first_emergency_keyword_in_list_order() {
        let verdict =
            SafetyClassifier::new().classify("I have severe chest pain and can't breathe");
        assert_eq!(verdict.matched_keyword.as_deref(), Some("chest pain"));
    }

    #[test]
    fn emergency_outranks_urgent_when_both_match() {
        let verdict = SafetyClassifier::new().classify("high fever and a seizure");
        assert_eq!(verdict.level, SafetyLevel::Emergency);
        assert_eq!(verdict.matched_keyword.as_deref(), Some("seizure"));
    }

    #[test]
    fn urgent_phrase_is_advisory() {
        let verdict = SafetyClassifier::new().classify("high fever that won't go down");
        assert_eq!(verdict.level, SafetyLevel::Urgent);
        assert_eq!(verdict.matched_keyword.as_deref(), Some("high fever"));
        assert_eq!(verdict.canned_message.as_deref(), Some(URGENT_MESSAGE));
    }

    #[test]
    fn plain_questions_are_informational() {
        let classifier = SafetyClassifier::new();
        for query in ["What causes diabetes?", "I have a headache", ""] {
            assert_eq!(classifier.classify(query), SafetyVerdict::info(), "{query}");
        }
    }

    #[test]
    fn negation_is_not_understood() {
        let verdict = SafetyClassifier::new().classify("I have no chest pain, just a cough");
        assert!(verdict.is_emergency());
    }

    #[test]
    fn curly_apostrophes_still_match() {
        let verdict = SafetyClassifier::new().classify("I can\u{2019}t breathe");
        assert_eq!(verdict.matched_keyword.as_deref(), Some("can't breathe"));
    }

    #[test]
    fn custom_patterns_are_lowercased() {
        let classifier =
            SafetyClassifier::with_patterns(vec!["Sepsis".into()], vec!["Rash".into(), "".into()]);
        assert_eq!(classifier.classify("signs of SEPSIS").level, SafetyLevel::Emergency);
        assert_eq!(classifier.classify("a rash on my arm").level, SafetyLevel::Urgent);
        assert_eq!(classifier.classify("anything").level, SafetyLevel::Info);
    }
}
