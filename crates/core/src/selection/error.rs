//! Selection language error types with caret positions.

use std::fmt;

use thiserror::Error;

/// A query that could not be tokenized or fully parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    /// Byte offset into `input` of the first token that could not be consumed.
    pub offset: usize,
    pub input: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize, input: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
            input: input.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        // Caret column counts characters, not bytes.
        let column = self
            .input
            .get(..self.offset)
            .map(|s| s.chars().count())
            .unwrap_or(self.offset);
        write!(f, "\n  {}", self.input)?;
        write!(f, "\n  {}^", " ".repeat(column))
    }
}

impl std::error::Error for SyntaxError {}

/// Error type for query compilation, evaluation and proximity search.
#[derive(Error, Debug, Clone)]
pub enum SelectionError {
    #[error("SelectionError: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("SelectionError: division by zero in numeric expression")]
    DivisionByZero,
    #[error("SelectionError: {0}")]
    Configuration(String),
    #[error("SelectionError: {0}")]
    Index(String),
}

impl SelectionError {
    pub fn syntax(message: impl Into<String>, offset: usize, input: impl Into<String>) -> Self {
        SelectionError::Syntax(SyntaxError::new(message, offset, input))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        SelectionError::Configuration(message.into())
    }

    pub fn index(message: impl Into<String>) -> Self {
        SelectionError::Index(message.into())
    }

    /// Offset of the offending token for syntax errors.
    pub fn offset(&self) -> Option<usize> {
        match self {
            SelectionError::Syntax(e) => Some(e.offset),
            _ => None,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, SelectionError::Syntax(_))
    }
}
