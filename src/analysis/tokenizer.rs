use rust_stemmers::{Algorithm, Stemmer};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::metaphone::metaphone;
use crate::analysis::token::Token;
use crate::schema::table::TokenizeMode;

/// User-supplied tokenizer. Gets the column name and raw text; returning
/// `None` falls back to the built-in pipeline.
pub type TokenizerHook = Arc<dyn Fn(&str, &str) -> Option<Vec<Token>> + Send + Sync>;

/// Turn a text column value into ordered tokens.
///
/// Pipeline: lowercase, strip punctuation/tabs/newlines, collapse
/// whitespace, split into words; then the mode's normalization:
/// Raw keeps the word, EnglishStem stems, EnglishMeta takes the metaphone,
/// English takes the metaphone of the stem.
pub fn tokenize(
    mode: TokenizeMode,
    column: &str,
    text: &str,
    hook: Option<&TokenizerHook>,
) -> Vec<Token> {
    if let Some(hook) = hook {
        if let Some(tokens) = hook(column, text) {
            return tokens;
        }
    }

    let lowered = text.to_lowercase();
    let stemmer = Stemmer::create(Algorithm::English);

    lowered
        .unicode_words()
        .enumerate()
        .map(|(position, word)| {
            let normalized = match mode {
                TokenizeMode::Raw => word.to_string(),
                TokenizeMode::EnglishStem => stemmer.stem(word).to_string(),
                TokenizeMode::EnglishMeta => metaphone(word),
                TokenizeMode::English => metaphone(&stemmer.stem(word)),
            };
            Token::new(word, normalized, position as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mode_lowercases_and_strips() {
        let tokens = tokenize(TokenizeMode::Raw, "body", "The quick,\tbrown\n fox!", None);
        let words: Vec<&str> = tokens.iter().map(|t| t.normalized.as_str()).collect();
        assert_eq!(words, vec!["the", "quick", "brown", "fox"]);
        assert_eq!(tokens[2].position, 2);
        assert_eq!(tokens[2].original, "brown");
    }

    #[test]
    fn stem_mode_stems() {
        let tokens = tokenize(TokenizeMode::EnglishStem, "body", "running dogs", None);
        assert_eq!(tokens[0].normalized, "run");
        assert_eq!(tokens[0].original, "running");
    }

    #[test]
    fn meta_mode_collapses_spelling() {
        let a = tokenize(TokenizeMode::EnglishMeta, "body", "brown", None);
        let b = tokenize(TokenizeMode::EnglishMeta, "body", "browne", None);
        assert_eq!(a[0].normalized, b[0].normalized);
    }

    #[test]
    fn hook_preempts_pipeline() {
        let hook: TokenizerHook =
            Arc::new(|_col, _text| Some(vec![Token::new("x", "x", 0)]));
        let tokens = tokenize(TokenizeMode::Raw, "body", "a b c", Some(&hook));
        assert_eq!(tokens.len(), 1);

        let fallthrough: TokenizerHook = Arc::new(|_col, _text| None);
        let tokens = tokenize(TokenizeMode::Raw, "body", "a b c", Some(&fallthrough));
        assert_eq!(tokens.len(), 3);
    }
}
