use serde::{Deserialize, Serialize};

/// One word of a tokenized text column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The word as it appeared (lowercased, punctuation stripped).
    pub original: String,
    /// Index form after the column's tokenize mode is applied.
    pub normalized: String,
    /// Word position in the column value.
    pub position: u32,
}

impl Token {
    pub fn new(original: impl Into<String>, normalized: impl Into<String>, position: u32) -> Self {
        Token {
            original: original.into(),
            normalized: normalized.into(),
            position,
        }
    }
}
