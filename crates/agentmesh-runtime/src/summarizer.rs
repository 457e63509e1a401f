//! Cycle summarization interface
//!
//! The runner treats summarization as an injectable collaborator. The
//! default implementation is extractive: leading sentences, hard-capped.

use async_trait::async_trait;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_chars: usize) -> String;
}

/// Takes the first sentences up to the budget. No model calls.
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, max_chars: usize) -> String {
        let mut out = String::new();
        for sentence in text.split_inclusive(['.', '!', '?']) {
            if out.len() + sentence.len() > max_chars {
                break;
            }
            out.push_str(sentence);
        }
        if out.is_empty() {
            let mut cut = max_chars.min(text.len());
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            out = text[..cut].to_string();
        }
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extractive_keeps_leading_sentences() {
        let s = ExtractiveSummarizer;
        let text = "First point. Second point. Third point that is quite a bit longer.";
        let summary = s.summarize(text, 30).await;
        assert_eq!(summary, "First point. Second point.");
    }

    #[tokio::test]
    async fn extractive_falls_back_to_prefix() {
        let s = ExtractiveSummarizer;
        let summary = s.summarize("no sentence boundaries here at all", 10).await;
        assert_eq!(summary, "no sentenc");
    }
}
