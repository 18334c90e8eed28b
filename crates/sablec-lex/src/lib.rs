//! sablec-lex - Lexical Analyzer
//!
//! The first phase of the Sable compiler: UTF-8 source text in, a finite
//! token sequence terminated by `Eof` out.
//!
//! Sable is an indentation-significant language, so alongside the usual
//! keyword/literal/operator tokenization the lexer synthesizes layout
//! markers: one `Indent` token per unit of indentation increase and one
//! `Dedent` per unit of decrease, measured in a configurable indent width
//! (default 4; a tab counts as one unit). Blank lines and comment-only
//! lines never affect the indentation level, and the stream always balances
//! because trailing `Dedent`s are emitted at end of input.
//!
//! Template literals are pre-chunked here: the lexer emits the text
//! fragments and the raw source of each `${...}` substitution as separate
//! tokens, and the parser re-lexes the substitution sources as full
//! expressions.
//!
//! All diagnostics carry stable `L`-prefixed codes; recovery is isolated so
//! one bad literal never poisons the rest of the file.

pub mod cursor;
pub mod lexer;
pub mod token;

pub use lexer::{
    float_value, int_value, tokenize_source, tokenize_with, LexOptions, Lexer,
};
pub use token::{keyword_from_str, Token, TokenKind};
