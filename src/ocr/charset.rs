//! Recognizer vocabulary: maps model class indices to symbols.
//!
//! CTC models reserve one class for "blank". Depending on how the weights
//! were exported it sits at index 0 or after the last symbol.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RecognitionError;

/// Where the CTC blank class sits in the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankPosition {
    #[default]
    First,
    Last,
}

/// Symbols in class order, plus the blank class.
#[derive(Debug, Clone)]
pub struct Charset {
    symbols: Vec<String>,
    blank: BlankPosition,
}

impl Charset {
    /// Build from symbols in class order (blank excluded).
    pub fn from_symbols<I, S>(symbols: I, blank: BlankPosition) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            blank,
        }
    }

    /// Printable ASCII: digits, upper case, lower case, punctuation, space.
    pub fn ascii() -> Self {
        let mut symbols: Vec<String> = Vec::with_capacity(95);
        symbols.extend(('0'..='9').map(String::from));
        symbols.extend(('A'..='Z').map(String::from));
        symbols.extend(('a'..='z').map(String::from));
        symbols.extend(
            "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"
                .chars()
                .map(String::from),
        );
        symbols.push(" ".to_string());
        Self::from_symbols(symbols, BlankPosition::First)
    }

    /// Parse a dictionary file body: one symbol per line, empty lines skipped.
    pub fn from_dictionary(content: &str, blank: BlankPosition) -> Result<Self, RecognitionError> {
        let symbols: Vec<String> = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if symbols.is_empty() {
            return Err(RecognitionError::ModelLoad(
                "character dictionary is empty".to_string(),
            ));
        }
        Ok(Self::from_symbols(symbols, blank))
    }

    /// Load a dictionary file from disk.
    pub fn load(path: &Path, blank: BlankPosition) -> Result<Self, RecognitionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecognitionError::ModelLoad(format!(
                "failed to read dictionary {}: {}",
                path.display(),
                e
            ))
        })?;
        let charset = Self::from_dictionary(&content, blank)?;
        log::info!(
            "[OCR] Loaded charset with {} symbols from {}",
            charset.symbols.len(),
            path.display()
        );
        Ok(charset)
    }

    /// Number of model classes, blank included.
    pub fn class_count(&self) -> usize {
        self.symbols.len() + 1
    }

    pub fn blank_index(&self) -> usize {
        match self.blank {
            BlankPosition::First => 0,
            BlankPosition::Last => self.symbols.len(),
        }
    }

    /// Symbol for a class index. `None` for blank or out of range.
    pub fn symbol(&self, class: usize) -> Option<&str> {
        let offset = match self.blank {
            BlankPosition::First => class.checked_sub(1)?,
            BlankPosition::Last => class,
        };
        self.symbols.get(offset).map(String::as_str)
    }

    /// Class index of a symbol (first occurrence).
    pub fn class_of(&self, symbol: &str) -> Option<usize> {
        let pos = self.symbols.iter().position(|s| s == symbol)?;
        Some(match self.blank {
            BlankPosition::First => pos + 1,
            BlankPosition::Last => pos,
        })
    }
}
