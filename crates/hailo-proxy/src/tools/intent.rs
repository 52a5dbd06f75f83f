//! Keyword-based detection of tool intent in a user message.

/// Decides whether a request should get tool handling.
///
/// Small models emit tool JSON on plain conversational turns when the
/// prompt advertises tools, so tool support is only switched on when the
/// user asks for it in so many words.
#[derive(Debug, Clone)]
pub struct IntentDetector {
    keywords: Vec<String>,
}

impl IntentDetector {
    pub fn new<I>(keywords: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn detects(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INTENT_KEYWORDS;

    #[test]
    fn test_default_keywords() {
        let detector = IntentDetector::new(DEFAULT_INTENT_KEYWORDS);
        assert!(detector.detects("Please RUN the backup script"));
        assert!(detector.detects("use the molt skill"));
        assert!(detector.detects("execute ls"));
        assert!(!detector.detects("What is the capital of France?"));
    }

    #[test]
    fn test_empty_keywords_never_match() {
        let detector = IntentDetector::new(["", ""]);
        assert!(!detector.detects("anything at all"));
    }
}
