//! Stache Lexer
//!
//! Tokenizes Mustache-family templates into a stream of positioned tokens.
//! Handles text and whitespace runs, newlines, special characters, comments,
//! delimiter changes and every tag sigil (`# ^ / > < $ & {`).
//!
//! # Example
//!
//! ```
//! use stache_lexer::Scanner;
//!
//! let tokens = Scanner::tokenize("inline", "").unwrap();
//! assert_eq!(tokens.len(), 1); // Just EOF
//! ```

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{NewlineKind, Position, SpecialChar, TagKind, Token, TokenKind};

/// Lexer error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lexer error at line {line}, column {column}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}
