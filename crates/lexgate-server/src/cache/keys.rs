//! Result kinds and cache key scopes.

use std::fmt;
use std::str::FromStr;

use lexgate_core::CoreError;
use serde::{Deserialize, Serialize};

/// A kind of derived result computed from a text document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    WordCount,
    CharacterCount,
    SentenceCount,
    ParagraphCount,
    LongestWords,
    /// Bulk result holding every individual metric.
    FullAnalysis,
}

impl ResultKind {
    pub const ALL: [ResultKind; 6] = [
        ResultKind::WordCount,
        ResultKind::CharacterCount,
        ResultKind::SentenceCount,
        ResultKind::ParagraphCount,
        ResultKind::LongestWords,
        ResultKind::FullAnalysis,
    ];

    /// Kinds that the combined result supersedes.
    pub const INDIVIDUAL: [ResultKind; 5] = [
        ResultKind::WordCount,
        ResultKind::CharacterCount,
        ResultKind::SentenceCount,
        ResultKind::ParagraphCount,
        ResultKind::LongestWords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::WordCount => "word_count",
            ResultKind::CharacterCount => "character_count",
            ResultKind::SentenceCount => "sentence_count",
            ResultKind::ParagraphCount => "paragraph_count",
            ResultKind::LongestWords => "longest_words",
            ResultKind::FullAnalysis => "full_analysis",
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self, ResultKind::FullAnalysis)
    }

    /// `"{kind}:{entity_id}"`
    pub fn cache_key(&self, entity_id: &str) -> String {
        format!("{}:{}", self.as_str(), entity_id)
    }
}

impl FromStr for ResultKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::invalid_result_kind(s))
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependent cache entry dropped alongside an entity's derived results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// One exact key.
    Key(String),
    /// Every key starting with this prefix.
    Prefix(String),
}

impl CacheScope {
    pub fn key(key: impl Into<String>) -> Self {
        CacheScope::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        CacheScope::Prefix(prefix.into())
    }

    /// List and aggregate caches that embed a text owned by `owner_id`:
    /// the single-text view, every page of the owner's text list, and the
    /// owner's text count.
    pub fn text_dependents(text_id: &str, owner_id: &str) -> Vec<CacheScope> {
        vec![
            CacheScope::Key(format!("text:{text_id}:{owner_id}")),
            CacheScope::Prefix(format!("user_texts:{owner_id}:")),
            CacheScope::Key(format!("user_text_count:{owner_id}")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(ResultKind::WordCount.cache_key("42"), "word_count:42");
        assert_eq!(ResultKind::FullAnalysis.cache_key("t-1"), "full_analysis:t-1");
    }

    #[test]
    fn test_kind_parsing() {
        for kind in ResultKind::ALL {
            assert_eq!(kind.as_str().parse::<ResultKind>().unwrap(), kind);
        }
        assert!("syllable_count".parse::<ResultKind>().is_err());
    }

    #[test]
    fn test_individual_excludes_combined() {
        assert!(ResultKind::INDIVIDUAL.iter().all(|k| !k.is_combined()));
        assert!(ResultKind::FullAnalysis.is_combined());
    }

    #[test]
    fn test_text_dependents() {
        let scopes = CacheScope::text_dependents("t1", "u9");
        assert_eq!(
            scopes,
            vec![
                CacheScope::key("text:t1:u9"),
                CacheScope::prefix("user_texts:u9:"),
                CacheScope::key("user_text_count:u9"),
            ]
        );
    }
}
