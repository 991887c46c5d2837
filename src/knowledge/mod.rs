//! Knowledge retrieval for grounding generated replies.
//!
//! Lookup order: the static FAQ pack for a known topic first (cheap), then
//! on-the-fly translation of the source-language pack when the localized one
//! is missing, then similarity search over the embedded knowledge base for
//! open-ended questions. Every failure degrades to an empty result set;
//! retrieval never fails a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::classify::Topic;
use crate::detect::Language;
use crate::error::AppResult;

/// A retrievable unit of reference text. Read-only; owned by the
/// knowledge-base collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub topic: Option<String>,
    pub language: Language,
    pub text: String,
    /// Machine-translated from the source language: degraded quality,
    /// flagged so the generator and later audits can adjust for it.
    #[serde(default)]
    pub translated: bool,
    /// Similarity distance when the chunk came from vector search.
    #[serde(default)]
    pub distance: Option<f64>,
}

/// Translation collaborator, used only as a degraded-quality fallback for
/// missing localized FAQ content.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: Language, target: Language)
        -> AppResult<String>;
}

/// Vector similarity search collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        language: Language,
        topic: Option<Topic>,
        k: usize,
    ) -> AppResult<Vec<KnowledgeChunk>>;
}

/// Static FAQ pack lookup keyed by topic and language.
fn faq_pack(topic: Topic, language: Language) -> &'static [&'static str] {
    match (topic, language) {
        (Topic::Stress, Language::En) => &[
            "Short-term stress responds well to slow breathing: inhale for 4 seconds, hold for 4, exhale for 6, repeated for two minutes.",
            "Naming the specific source of pressure, and writing down one next step, reliably reduces the feeling of being overwhelmed.",
        ],
        (Topic::Stress, Language::Sw) => &[
            "Msongo wa muda mfupi hupungua kwa kupumua taratibu: vuta pumzi sekunde 4, shikilia 4, toa sekunde 6, rudia kwa dakika mbili.",
        ],
        (Topic::Anxiety, Language::En) => &[
            "Grounding with the 5-4-3-2-1 technique (five things you see, four you feel, three you hear, two you smell, one you taste) interrupts anxiety spirals.",
            "Caffeine and missed sleep both amplify anxiety; reducing either is a fast, practical lever.",
        ],
        (Topic::Depression, Language::En) => &[
            "Low mood that lasts more than two weeks, or that stops daily activities, deserves an assessment by a counselor or clinician.",
            "Behavioural activation - scheduling one small, concrete, pleasant activity per day - is an evidence-based first step.",
        ],
        (Topic::Sleep, Language::En) => &[
            "A fixed wake-up time, even after a bad night, is the single strongest signal for resetting sleep rhythm.",
            "Screens within an hour of bed delay sleep onset; swapping to audio or paper helps most people within a week.",
        ],
        (Topic::Hiv, Language::En) => &[
            "HIV self-test kits are reliable when instructions are followed; a reactive result always needs confirmation at a clinic.",
            "Self-testing is private: no one else sees the result, and counselors are available by phone before and after.",
        ],
        (Topic::Hiv, Language::Sw) => &[
            "Vipimo vya HIV vya kujipima ni vya kuaminika vikitumiwa kwa maelekezo; matokeo tendaji yanahitaji uthibitisho kliniki.",
        ],
        (Topic::Circumcision, Language::En) => &[
            "Voluntary medical male circumcision is a short, safe procedure; healing typically takes about six weeks.",
            "People with bleeding disorders need an individual clinical assessment before booking the procedure.",
        ],
        (Topic::Inventory, Language::En) => &[
            "Stock counts should be reconciled against the system at least weekly; expiry-first (FEFO) picking reduces write-offs.",
        ],
        (Topic::Orders, Language::En) => &[
            "Supplier orders placed before the weekly cutoff ship in the next consolidated delivery; later orders roll over.",
        ],
        _ => &[],
    }
}

/// Knowledge retriever over static packs, translation fallback, and vector
/// search.
pub struct KnowledgeRetriever {
    translator: Option<Box<dyn Translator>>,
    index: Option<Box<dyn SimilaritySearch>>,
}

impl KnowledgeRetriever {
    /// Retriever with no collaborators: static packs only.
    pub fn new() -> Self {
        Self {
            translator: None,
            index: None,
        }
    }

    /// Attach a translation collaborator.
    pub fn with_translator(mut self, translator: Box<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Attach a similarity-search collaborator.
    pub fn with_index(mut self, index: Box<dyn SimilaritySearch>) -> Self {
        self.index = Some(index);
        self
    }

    /// Retrieve up to `top_k` chunks for a query. May return empty; never
    /// returns an error - degraded paths are logged and swallowed.
    pub async fn search(
        &self,
        query: &str,
        language: Language,
        topic: Option<Topic>,
        top_k: usize,
    ) -> Vec<KnowledgeChunk> {
        if let Some(topic) = topic {
            let localized = faq_pack(topic, language);
            if !localized.is_empty() {
                return localized
                    .iter()
                    .take(top_k)
                    .map(|text| KnowledgeChunk {
                        topic: Some(topic.to_string()),
                        language,
                        text: (*text).to_string(),
                        translated: false,
                        distance: None,
                    })
                    .collect();
            }

            // Localized pack missing: translate the source-language pack on
            // the fly and mark the result as degraded quality.
            let source = faq_pack(topic, Language::En);
            if !source.is_empty() && language != Language::En {
                return self
                    .translate_pack(source, topic, language, top_k)
                    .await;
            }
        }

        // Open-ended question: similarity search, scoped by language/topic.
        match &self.index {
            Some(index) => match index.search(query, language, topic, top_k).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(error = %e, "Similarity search failed, continuing without knowledge");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    async fn translate_pack(
        &self,
        source: &[&str],
        topic: Topic,
        target: Language,
        top_k: usize,
    ) -> Vec<KnowledgeChunk> {
        let Some(translator) = &self.translator else {
            // No translator: serve the source language untranslated rather
            // than nothing.
            return source
                .iter()
                .take(top_k)
                .map(|text| KnowledgeChunk {
                    topic: Some(topic.to_string()),
                    language: Language::En,
                    text: (*text).to_string(),
                    translated: false,
                    distance: None,
                })
                .collect();
        };

        let mut chunks = Vec::new();
        for text in source.iter().take(top_k) {
            match translator.translate(text, Language::En, target).await {
                Ok(translated) => chunks.push(KnowledgeChunk {
                    topic: Some(topic.to_string()),
                    language: target,
                    text: translated,
                    translated: true,
                    distance: None,
                }),
                Err(e) => {
                    warn!(error = %e, topic = %topic, "Translation failed, keeping source text");
                    chunks.push(KnowledgeChunk {
                        topic: Some(topic.to_string()),
                        language: Language::En,
                        text: (*text).to_string(),
                        translated: false,
                        distance: None,
                    });
                }
            }
        }
        chunks
    }
}

impl Default for KnowledgeRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_localized_pack_served_directly() {
        let retriever = KnowledgeRetriever::new();
        let chunks = retriever
            .search("nina msongo", Language::Sw, Some(Topic::Stress), 3)
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].translated);
        assert_eq!(chunks[0].language, Language::Sw);
    }

    #[tokio::test]
    async fn test_missing_localized_pack_translates_and_flags() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .returning(|text, _, _| Ok(format!("[sw] {}", text)));

        let retriever = KnowledgeRetriever::new().with_translator(Box::new(translator));
        let chunks = retriever
            .search("usingizi", Language::Sw, Some(Topic::Sleep), 2)
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.translated));
        assert!(chunks[0].text.starts_with("[sw] "));
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_source_text() {
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(|_, _, _| {
            Err(AppError::Internal {
                message: "translator down".to_string(),
            })
        });

        let retriever = KnowledgeRetriever::new().with_translator(Box::new(translator));
        let chunks = retriever
            .search("usingizi", Language::Sw, Some(Topic::Sleep), 2)
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.translated));
        assert!(chunks.iter().all(|c| c.language == Language::En));
    }

    #[tokio::test]
    async fn test_open_ended_question_uses_similarity_search() {
        let mut index = MockSimilaritySearch::new();
        index.expect_search().returning(|_, language, _, _| {
            Ok(vec![KnowledgeChunk {
                topic: None,
                language,
                text: "indexed answer".to_string(),
                translated: false,
                distance: Some(0.12),
            }])
        });

        let retriever = KnowledgeRetriever::new().with_index(Box::new(index));
        let chunks = retriever
            .search("how long do antibiotics take", Language::En, None, 3)
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].distance, Some(0.12));
    }

    #[tokio::test]
    async fn test_search_failure_degrades_to_empty() {
        let mut index = MockSimilaritySearch::new();
        index.expect_search().returning(|_, _, _, _| {
            Err(AppError::Internal {
                message: "vector store unreachable".to_string(),
            })
        });

        let retriever = KnowledgeRetriever::new().with_index(Box::new(index));
        let chunks = retriever.search("anything", Language::En, None, 3).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_no_collaborators_no_topic_is_empty() {
        let retriever = KnowledgeRetriever::new();
        let chunks = retriever.search("anything", Language::En, None, 3).await;
        assert!(chunks.is_empty());
    }
}
