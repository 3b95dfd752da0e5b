//! Expression tokenizer and parser.

pub mod parse;
pub mod stream;
pub mod token;

pub use parse::{is_expression, literal_text, parse};
pub use token::{Token, TokenKind, TokenStream};
