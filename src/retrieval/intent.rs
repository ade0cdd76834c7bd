//! Query intent classification.
//!
//! A classifier returns a free-form label; [`QueryIntent::from_label`] turns
//! it into one of three routes. Anything unrecognized is treated as mixed.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Which modalities of the query drive the coarse stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    TextOnly,
    ImageOnly,
    #[default]
    Mixed,
}

impl QueryIntent {
    /// Normalize a classifier label. Unknown labels map to `Mixed`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "text_only" => Self::TextOnly,
            "image_only" => Self::ImageOnly,
            "mixed" | "mixed_query" => Self::Mixed,
            other => {
                tracing::debug!(target: "retrieval", "Unrecognized intent label '{other}', using mixed");
                Self::Mixed
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextOnly => "text_only",
            Self::ImageOnly => "image_only",
            Self::Mixed => "mixed",
        }
    }
}

#[derive(Error, Debug)]
#[error("Intent classification failed: {0}")]
pub struct IntentError(pub String);

pub trait IntentClassifier: Send + Sync {
    /// Label a query. Errors are absorbed by the caller.
    fn classify(&self, text: Option<&str>, has_image: bool) -> Result<String, IntentError>;
}

static GENERIC_IMAGE_INSTRUCTION: OnceLock<Option<Regex>> = OnceLock::new();

fn generic_image_instruction() -> Option<&'static Regex> {
    GENERIC_IMAGE_INSTRUCTION
        .get_or_init(|| {
            Regex::new(
                r"(?ix)^\s*(please\s+)?
                (describe|explain|analy[sz]e|interpret|summari[sz]e|read|what\s+(is|does)|what's)
                \s+(in\s+|shown\s+in\s+)?
                (this|the|attached)\s+
                (image|picture|photo|scan|x-?ray|figure)
                (\s+show(s)?)?\s*[?.!]*\s*$",
            )
            .ok()
        })
        .as_ref()
}

/// Classifier driven by which modalities are present.
///
/// Text alone is `text_only`, an image alone is `image_only`. With both, a
/// generic instruction such as "describe this image" carries no retrieval
/// signal, so the query is routed as `image_only`; otherwise it is `mixed`.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl IntentClassifier for RuleBasedClassifier {
    fn classify(&self, text: Option<&str>, has_image: bool) -> Result<String, IntentError> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());

        let label = match (text, has_image) {
            (Some(_), false) => QueryIntent::TextOnly,
            (None, true) => QueryIntent::ImageOnly,
            (Some(t), true) => {
                if generic_image_instruction().is_some_and(|re| re.is_match(t)) {
                    QueryIntent::ImageOnly
                } else {
                    QueryIntent::Mixed
                }
            }
            (None, false) => {
                return Err(IntentError("query has neither text nor image".to_string()));
            }
        };
        Ok(label.as_str().to_string())
    }
}
