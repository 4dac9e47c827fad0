use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use catalog_cell::{CatalogStore, ServiceSuggestion};
use shared_utils::normalize::normalize_text;

use crate::error::ConversationError;
use crate::services::nlp::Analyzer;

const EXPLICIT_THRESHOLD: f64 = 0.85;
const CATEGORY_THRESHOLD: f64 = 0.60;
const AMBIGUOUS_THRESHOLD: f64 = 0.30;
const SUGGESTION_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Explicit,
    Category,
    Ambiguous,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub kind: QueryKind,
    pub confidence: f64,
    pub suggestions: Vec<ServiceSuggestion>,
}

/// Decides whether an utterance names one service, a whole category, or
/// nothing bookable. A booking may only proceed from an `Explicit` result.
pub struct DisambiguationService {
    catalog: Arc<CatalogStore>,
    analyzer: Arc<Analyzer>,
}

impl DisambiguationService {
    pub fn new(catalog: Arc<CatalogStore>, analyzer: Arc<Analyzer>) -> Self {
        Self { catalog, analyzer }
    }

    #[instrument(skip(self))]
    pub async fn classify(
        &self,
        tenant: &str,
        text: &str,
    ) -> Result<Classification, ConversationError> {
        if self.analyzer.is_ambiguous_phrase(text) {
            return Ok(Classification {
                kind: QueryKind::Ambiguous,
                confidence: 0.0,
                suggestions: Vec::new(),
            });
        }

        let suggestions = self
            .catalog
            .search_suggestions(tenant, text, 10)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;

        if suggestions.is_empty() {
            return Ok(Classification {
                kind: QueryKind::Invalid,
                confidence: 0.0,
                suggestions: Vec::new(),
            });
        }

        let normalized_query = normalize_text(text);
        let top = &suggestions[0];
        let top_category = self
            .catalog
            .normalized_category_of(tenant, top.service_id)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;
        let confidence = confidence_of(&normalized_query, &top.name, top_category.as_deref());

        let exact_name = normalize_text(&top.name) == normalized_query;
        if exact_name && confidence >= EXPLICIT_THRESHOLD {
            debug!("Explicit match for {:?}", normalized_query);
            return Ok(Classification {
                kind: QueryKind::Explicit,
                confidence,
                suggestions: vec![top.clone()],
            });
        }

        let generic = self
            .catalog
            .is_category_generic(tenant, text)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;

        if generic || confidence >= CATEGORY_THRESHOLD {
            // Broad family of services: rank by what actually gets booked.
            let top3 = if generic {
                let ranked = self
                    .catalog
                    .top_n_by_category_30d(tenant, &normalized_query, SUGGESTION_COUNT)
                    .await
                    .map_err(|e| ConversationError::ToolCall(e.to_string()))?;
                if ranked.is_empty() {
                    head(&suggestions)
                } else {
                    ranked
                }
            } else {
                head(&suggestions)
            };
            return Ok(Classification {
                kind: QueryKind::Category,
                confidence,
                suggestions: top3,
            });
        }

        if confidence >= AMBIGUOUS_THRESHOLD {
            return Ok(Classification {
                kind: QueryKind::Ambiguous,
                confidence,
                suggestions: head(&suggestions),
            });
        }

        Ok(Classification {
            kind: QueryKind::Invalid,
            confidence,
            suggestions: Vec::new(),
        })
    }
}

fn head(suggestions: &[ServiceSuggestion]) -> Vec<ServiceSuggestion> {
    suggestions.iter().take(SUGGESTION_COUNT).cloned().collect()
}

/// Exact match scores 1.0. Otherwise the fraction of query words present in
/// the candidate name, plus 0.2 when the candidate's category is a substring
/// of the query, clamped to [0, 1].
pub fn confidence_of(
    normalized_query: &str,
    candidate_name: &str,
    candidate_category: Option<&str>,
) -> f64 {
    let normalized_candidate = normalize_text(candidate_name);
    if normalized_candidate == normalized_query {
        return 1.0;
    }

    let query_words: Vec<&str> = normalized_query.split(' ').filter(|w| !w.is_empty()).collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let candidate_words: Vec<&str> = normalized_candidate.split(' ').collect();
    let matched = query_words
        .iter()
        .filter(|w| candidate_words.contains(*w))
        .count();

    let mut score = matched as f64 / query_words.len() as f64;
    if let Some(category) = candidate_category {
        if !category.is_empty() && normalized_query.contains(category) {
            score += 0.2;
        }
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_cell::AppointmentAuditLog;
    use chrono::Utc;
    use catalog_cell::CatalogItem;
    use shared_storage::{KeyValueStore, MemoryStore};

    fn item(service_id: i64, name: &str, category: &str, price: Option<f64>) -> CatalogItem {
        CatalogItem {
            tenant: "default".to_string(),
            service_id,
            professional_id: 0,
            service_name: name.to_string(),
            normalized_name: normalize_text(name),
            category: category.to_string(),
            normalized_category: normalize_text(category),
            duration_min: 60,
            price,
            visible: true,
            active: true,
            last_synced_at: Utc::now(),
        }
    }

    async fn fixture() -> DisambiguationService {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let catalog = Arc::new(CatalogStore::new(kv, audit));
        catalog
            .upsert(
                "default",
                vec![
                    item(1, "Corte de Cabelo Feminino", "Cabelo", Some(90.0)),
                    item(2, "Corte de Cabelo Masculino", "Cabelo", Some(60.0)),
                    item(3, "Escova Progressiva", "Cabelo", Some(180.0)),
                    item(4, "Manicure", "Unhas", Some(40.0)),
                ],
            )
            .await
            .unwrap();
        DisambiguationService::new(catalog, Arc::new(Analyzer::with_default_config()))
    }

    #[tokio::test]
    async fn exact_service_name_is_explicit() {
        let service = fixture().await;
        let result = service
            .classify("default", "Corte de Cabelo Feminino")
            .await
            .unwrap();
        assert_eq!(result.kind, QueryKind::Explicit);
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.suggestions[0].service_id, 1);
    }

    #[tokio::test]
    async fn category_name_is_category_with_top3() {
        let service = fixture().await;
        let result = service.classify("default", "cabelo").await.unwrap();
        assert_eq!(result.kind, QueryKind::Category);
        assert!(!result.suggestions.is_empty());
        assert!(result.suggestions.len() <= 3);
    }

    #[tokio::test]
    async fn partial_match_is_ambiguous_with_suggestions() {
        let service = fixture().await;
        // "corte" hits two services but is not a category and not exact.
        let result = service.classify("default", "corte").await.unwrap();
        assert!(matches!(result.kind, QueryKind::Ambiguous | QueryKind::Category));
        assert!(!result.suggestions.is_empty());
    }

    #[tokio::test]
    async fn vague_phrase_short_circuits_to_ambiguous() {
        let service = fixture().await;
        let result = service.classify("default", "oi").await.unwrap();
        assert_eq!(result.kind, QueryKind::Ambiguous);
        assert!(result.suggestions.is_empty());
    }

    #[tokio::test]
    async fn no_catalog_hit_is_invalid() {
        let service = fixture().await;
        let result = service.classify("default", "aula de pilates").await.unwrap();
        assert_eq!(result.kind, QueryKind::Invalid);
    }

    #[test]
    fn confidence_math() {
        assert_eq!(confidence_of("corte feminino", "Corte Feminino", None), 1.0);
        // One of two words matched.
        let half = confidence_of("corte especial", "Corte Feminino", None);
        assert!((half - 0.5).abs() < 1e-9);
        // Category substring bonus.
        let bonus = confidence_of("corte cabelo", "Corte Feminino", Some("cabelo"));
        assert!((bonus - 0.7).abs() < 1e-9);
        // Clamped at 1.0.
        let clamped = confidence_of("corte feminino cabelo", "Corte Feminino Cabelo Longo", Some("cabelo"));
        assert!(clamped <= 1.0);
    }
}
