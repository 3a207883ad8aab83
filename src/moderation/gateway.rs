//! Fan-out of both content checks for one chunk.

use crate::error::Result;
use crate::moderation::{ContentClassifier, TermScreener, has_offensive_term};
use serde::Serialize;
use std::sync::Arc;

/// Combined verdict for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationVerdict {
    pub blocked: bool,
    /// Raw provider payloads keyed by provider name.
    pub provider_details: serde_json::Map<String, serde_json::Value>,
}

/// Runs the classifier and the term screener concurrently and blocks a
/// chunk when either flags it.
pub struct ModerationGateway {
    classifier: Arc<dyn ContentClassifier>,
    screener: Arc<dyn TermScreener>,
    allow_list: Vec<String>,
}

impl ModerationGateway {
    pub fn new(
        classifier: Arc<dyn ContentClassifier>,
        screener: Arc<dyn TermScreener>,
        allow_list: Vec<String>,
    ) -> Self {
        Self {
            classifier,
            screener,
            allow_list,
        }
    }

    /// Either provider failing fails the whole check.
    pub async fn check(&self, chunk: &str) -> Result<ModerationVerdict> {
        let (classification, screen) = tokio::try_join!(
            self.classifier.classify(chunk),
            self.screener.screen(chunk)
        )?;

        let is_offensive = has_offensive_term(screen.terms.as_deref(), &self.allow_list);
        let blocked = classification.is_adult || is_offensive;

        tracing::debug!(
            is_adult = classification.is_adult,
            is_offensive,
            blocked,
            "moderated chunk"
        );

        let mut provider_details = serde_json::Map::new();
        provider_details.insert("google_language_service".into(), classification.raw);
        provider_details.insert("azure_content_moderator".into(), screen.raw);

        Ok(ModerationVerdict {
            blocked,
            provider_details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModerationError;
    use crate::moderation::{ClassifierVerdict, ScreenerVerdict, Term};

    struct StaticClassifier(bool);

    #[async_trait::async_trait]
    impl ContentClassifier for StaticClassifier {
        async fn classify(&self, _text: &str) -> Result<ClassifierVerdict> {
            Ok(ClassifierVerdict {
                is_adult: self.0,
                raw: serde_json::json!({"categories": []}),
            })
        }
    }

    struct StaticScreener(Option<Vec<&'static str>>);

    #[async_trait::async_trait]
    impl TermScreener for StaticScreener {
        async fn screen(&self, _text: &str) -> Result<ScreenerVerdict> {
            Ok(ScreenerVerdict {
                terms: self
                    .0
                    .as_ref()
                    .map(|terms| terms.iter().map(|term| Term::new(*term)).collect()),
                raw: serde_json::json!({"Terms": self.0}),
            })
        }
    }

    struct FailingScreener;

    #[async_trait::async_trait]
    impl TermScreener for FailingScreener {
        async fn screen(&self, _text: &str) -> Result<ScreenerVerdict> {
            Err(ModerationError::Status {
                provider: "azure_content_moderator",
                status: 503,
                body: "unavailable".into(),
            }
            .into())
        }
    }

    fn gateway(adult: bool, terms: Option<Vec<&'static str>>) -> ModerationGateway {
        ModerationGateway::new(
            Arc::new(StaticClassifier(adult)),
            Arc::new(StaticScreener(terms)),
            vec!["えた".into(), "クリ".into()],
        )
    }

    #[tokio::test]
    async fn verdict_is_or_of_providers() {
        let cases = [
            (false, None, false),
            (true, None, true),
            (false, Some(vec!["offensive"]), true),
            (false, Some(vec!["えた"]), false),
            (true, Some(vec!["クリ"]), true),
        ];

        for (adult, terms, expected) in cases {
            let verdict = gateway(adult, terms.clone())
                .check("テスト")
                .await
                .expect("check should succeed");
            assert_eq!(verdict.blocked, expected, "adult={adult} terms={terms:?}");
        }
    }

    #[tokio::test]
    async fn keeps_both_payloads_when_clean() {
        let verdict = gateway(false, None)
            .check("テスト")
            .await
            .expect("check should succeed");

        assert!(!verdict.blocked);
        assert!(verdict.provider_details.contains_key("google_language_service"));
        assert!(verdict.provider_details.contains_key("azure_content_moderator"));
    }

    #[tokio::test]
    async fn provider_failure_surfaces() {
        let gateway = ModerationGateway::new(
            Arc::new(StaticClassifier(false)),
            Arc::new(FailingScreener),
            Vec::new(),
        );
        let error = gateway.check("テスト").await.expect_err("failure must surface");
        assert!(error.to_string().contains("503"));
    }
}
