//! Shell-syntax commands for the document store.
//!
//! Turns `use`, `show ...` and `db.<collection>.<method>(<args>)` text into a
//! [`ShellCommand`] that a document-store connector can execute.
//!
//! # Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Literal normalization | `literals` | JSON-compatible text |
//! | Tokenizing | `lexer` | [`Token`]s |
//! | Parsing | `parser` | [`ShellCommand`] |
//! | Argument typing | `command` | [`CollectionOp`] |

mod command;
mod lexer;
mod literals;
mod parser;

pub use command::{CollectionOp, Document, IndexTarget, ShellCommand, default_index_name};
pub use lexer::{Token, TokenKind, tokenize};
pub use literals::{LITERAL_RULES, LiteralRule, normalize_literals};
pub use parser::{parse_arguments, parse_command};
