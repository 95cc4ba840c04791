// src/nlp.rs
// Tagging contract for the pipeline. The real model is an external
// collaborator; the trait keeps it swappable. `LexiconTagger` is the
// built-in stand-in: lexicon sentiment with a short negation window,
// plus naive keyword/entity extraction.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::model::Tags;

/// `tag` is a pure function of the text; no side effects are assumed.
pub trait Tagger: Send + Sync {
    fn tag(&self, text: &str) -> Tags;
}

static LEXICON: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    // Small general-purpose polarity list; scores in [-2, 2].
    let entries: &[(&str, i32)] = &[
        ("love", 2),
        ("amazing", 2),
        ("excellent", 2),
        ("best", 2),
        ("win", 1),
        ("good", 1),
        ("great", 1),
        ("happy", 1),
        ("growth", 1),
        ("success", 1),
        ("support", 1),
        ("bad", -1),
        ("poor", -1),
        ("sad", -1),
        ("fail", -1),
        ("drop", -1),
        ("problem", -1),
        ("angry", -1),
        ("hate", -2),
        ("terrible", -2),
        ("worst", -2),
        ("disaster", -2),
        ("scandal", -2),
    ];
    entries.iter().copied().collect()
});

static STOPWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "the", "and", "for", "that", "this", "with", "from", "have", "has", "was", "were", "are",
        "will", "would", "been", "they", "them", "their", "about", "into", "just", "what", "when",
        "where", "while", "your", "you", "not", "but", "all", "out", "more", "than", "very",
    ]
});

const MAX_KEYWORDS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct LexiconTagger;

impl LexiconTagger {
    pub fn new() -> Self {
        Self
    }
}

impl Tagger for LexiconTagger {
    fn tag(&self, text: &str) -> Tags {
        let tokens: Vec<String> = tokenize(text).collect();

        // Sentiment: lexicon hits, sign inverted when a negator appears in
        // the preceding 1..=3 tokens.
        let mut score = 0i32;
        let mut hits = 0u32;
        for i in 0..tokens.len() {
            let base = *LEXICON.get(tokens[i].as_str()).unwrap_or(&0);
            if base != 0 {
                let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
                score += if negated { -base } else { base };
                hits += 1;
            }
        }
        let sentiment = if hits == 0 {
            0.0
        } else {
            (f64::from(score) / f64::from(hits * 2)).clamp(-1.0, 1.0)
        };

        // Keywords: longer non-stopword tokens, first occurrence order.
        let mut keywords = Vec::new();
        for t in &tokens {
            if t.len() > 3 && !STOPWORDS.contains(&t.as_str()) && !keywords.contains(t) {
                keywords.push(t.clone());
                if keywords.len() >= MAX_KEYWORDS {
                    break;
                }
            }
        }

        // Entities: capitalized words from the raw text, not at the start
        // of a sentence heuristic — good enough for a stand-in tagger.
        let mut entities = Vec::new();
        let mut prev_boundary = true;
        for word in text.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            let capitalized = cleaned.chars().next().is_some_and(|c| c.is_uppercase());
            if capitalized && !prev_boundary && cleaned.len() > 2 {
                let lower = cleaned.to_lowercase();
                if !STOPWORDS.contains(&lower.as_str()) && !entities.contains(&cleaned) {
                    entities.push(cleaned.clone());
                }
            }
            prev_boundary = word.ends_with(['.', '!', '?']);
        }

        Tags {
            entities,
            keywords,
            sentiment,
            sentiment_label: label_for(sentiment).to_string(),
        }
    }
}

/// The topic a mention is attributed to: first named entity, falling back
/// to the strongest keyword.
pub fn topics_for(tags: &Tags) -> Vec<String> {
    if !tags.entities.is_empty() {
        return tags.entities.iter().map(|e| e.to_lowercase()).collect();
    }
    tags.keywords.first().cloned().into_iter().collect()
}

pub fn label_for(sentiment: f64) -> &'static str {
    if sentiment > 0.1 {
        "positive"
    } else if sentiment < -0.1 {
        "negative"
    } else {
        "neutral"
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(tok, "not" | "no" | "never" | "without" | "cannot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_is_bounded_and_signed() {
        let t = LexiconTagger::new();
        let pos = t.tag("What a great and amazing launch");
        assert!(pos.sentiment > 0.0 && pos.sentiment <= 1.0);
        assert_eq!(pos.sentiment_label, "positive");

        let neg = t.tag("a terrible disaster, the worst");
        assert!(neg.sentiment < 0.0 && neg.sentiment >= -1.0);
        assert_eq!(neg.sentiment_label, "negative");

        let flat = t.tag("scheduled maintenance window tonight");
        assert_eq!(flat.sentiment, 0.0);
        assert_eq!(flat.sentiment_label, "neutral");
    }

    #[test]
    fn negation_flips_polarity() {
        let t = LexiconTagger::new();
        let a = t.tag("the update is good");
        let b = t.tag("the update is not good");
        assert!(a.sentiment > 0.0);
        assert!(b.sentiment < 0.0);
    }

    #[test]
    fn topics_prefer_entities_over_keywords() {
        let t = LexiconTagger::new();
        let tags = t.tag("Everyone is talking about Quantia and its new chip");
        assert!(topics_for(&tags).contains(&"quantia".to_string()));

        let no_entity = t.tag("battery life improvements landed today");
        let topics = topics_for(&no_entity);
        assert_eq!(topics.len(), 1);
    }
}
