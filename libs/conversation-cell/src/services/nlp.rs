use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use shared_utils::normalize::normalize_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Option1,
    Option2,
    ExplicitSchedule,
    AmbiguousSchedule,
    Stop,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpResult {
    pub intent: Intent,
    pub confidence: f64,
}

/// Regex pattern groups, overridable per deployment. All patterns run
/// against the normalized text.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub stop: Vec<String>,
    pub option_1: Vec<String>,
    pub option_2: Vec<String>,
    pub explicit_schedule: Vec<String>,
    pub ambiguous_schedule: Vec<String>,
    pub ambiguous_phrases: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            stop: vec![r"^(parar|sair|cancelar|encerrar|stop)$".to_string()],
            option_1: vec![r"^1$".to_string(), r"^(opcao|op)\s*1$".to_string()],
            option_2: vec![r"^2$".to_string(), r"^(opcao|op)\s*2$".to_string()],
            explicit_schedule: vec![
                // Booking verb with an object after it.
                r"\b(agendar|marcar|remarcar)\s+\S+".to_string(),
                r"\bquero\s+(agendar|marcar)\b".to_string(),
            ],
            ambiguous_schedule: vec![
                // Bare booking verb or noun, no object.
                r"^(agenda|agendar|agendamento|marcar|horario|hora)$".to_string(),
            ],
            ambiguous_phrases: vec![
                r"^(sei la|tanto faz|qualquer|qualquer um|algo|alguma coisa)$".to_string(),
                r"^(o que voces fazem|o que tem)\??$".to_string(),
            ],
        }
    }
}

/// Deterministic regex classifier for booking intent.
///
/// Ties resolve in fixed priority: stop > option > explicit > ambiguous >
/// unknown, with the confidences 0.95 / 0.9 / 0.85 / 0.6 / 0.
pub struct Analyzer {
    stop: Vec<Regex>,
    option_1: Vec<Regex>,
    option_2: Vec<Regex>,
    explicit_schedule: Vec<Regex>,
    ambiguous_schedule: Vec<Regex>,
    ambiguous_phrases: Vec<Regex>,
}

const GLUE_WORDS: &[&str] = &[
    "um", "uma", "uns", "umas", "o", "a", "os", "as", "de", "do", "da", "dos", "das", "e", "ou",
    "para", "pra", "com", "em", "no", "na", "por", "favor", "quero", "queria", "fazer", "gostaria",
    "oi", "ola", "bom", "dia", "boa", "tarde", "noite",
];

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
        };
        Self {
            stop: compile(&config.stop),
            option_1: compile(&config.option_1),
            option_2: compile(&config.option_2),
            explicit_schedule: compile(&config.explicit_schedule),
            ambiguous_schedule: compile(&config.ambiguous_schedule),
            ambiguous_phrases: compile(&config.ambiguous_phrases),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(AnalyzerConfig::default())
    }

    pub fn analyze(&self, text: &str) -> NlpResult {
        let normalized = normalize_text(text);

        let result = if matches_any(&self.stop, &normalized) {
            NlpResult {
                intent: Intent::Stop,
                confidence: 0.95,
            }
        } else if matches_any(&self.option_1, &normalized) {
            NlpResult {
                intent: Intent::Option1,
                confidence: 0.9,
            }
        } else if matches_any(&self.option_2, &normalized) {
            NlpResult {
                intent: Intent::Option2,
                confidence: 0.9,
            }
        } else if matches_any(&self.explicit_schedule, &normalized) {
            NlpResult {
                intent: Intent::ExplicitSchedule,
                confidence: 0.85,
            }
        } else if matches_any(&self.ambiguous_schedule, &normalized) {
            NlpResult {
                intent: Intent::AmbiguousSchedule,
                confidence: 0.6,
            }
        } else {
            NlpResult {
                intent: Intent::Unknown,
                confidence: 0.0,
            }
        };

        debug!("Analyzed {:?} -> {:?}", normalized, result.intent);
        result
    }

    /// Peels booking verbs and politeness off the front of an explicit
    /// request so the catalog sees the service itself:
    /// "quero agendar escova progressiva" -> "escova progressiva".
    pub fn extract_service_query(&self, text: &str) -> String {
        const LEADING: &[&str] = &[
            "oi", "ola", "quero", "queria", "gostaria", "de", "agendar", "marcar", "remarcar",
            "fazer", "um", "uma", "o", "a", "para", "pra", "por", "favor",
        ];
        let normalized = normalize_text(text);
        let all_words: Vec<&str> = normalized.split(' ').collect();
        let mut words: &[&str] = &all_words;
        while let Some((first, rest)) = words.split_first() {
            if rest.is_empty() || !LEADING.contains(first) {
                break;
            }
            words = rest;
        }
        words.join(" ")
    }

    /// An utterance too vague to search the catalog with: shorter than three
    /// characters, one of the configured vague phrases, or nothing but glue
    /// words.
    pub fn is_ambiguous_phrase(&self, text: &str) -> bool {
        let normalized = normalize_text(text);
        if normalized.chars().count() < 3 {
            return true;
        }
        if matches_any(&self.ambiguous_phrases, &normalized) {
            return true;
        }
        normalized
            .split(' ')
            .all(|word| GLUE_WORDS.contains(&word))
    }
}

fn matches_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}
