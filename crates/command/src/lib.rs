//! Command tokenizer/parser and per-action validator.
//!
//! This crate is pure: no collaborator touches, no side effects. Raw text
//! goes in, a `ParsedCommand` and a `ValidationResult` come out.

pub mod parser;
pub mod validator;

pub use parser::{is_phone_number, parse};
pub use validator::validate;
