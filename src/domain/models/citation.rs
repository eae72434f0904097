//! Citations extracted from tool outputs.

use serde::{Deserialize, Serialize};

/// A structured reference to an external source.
///
/// Citations are numbered `1..N` at collection time in first-seen order;
/// that numbering is the contract between synthesis and the source list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default)]
    pub credibility_score: f64,
    #[serde(default)]
    pub quality_score: f64,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}
