//! The L0 reader: S-expression source text to values in the arena.
//!
//! The reader desugars the quote family (`'`, `` ` ``, `,`, `,@`) while
//! parsing, so the evaluator's special-form set stays small. Errors carry
//! the one-indexed line and column at which recognition failed.

mod reader;
pub use reader::{
   parse_all,
   parse_one,
};
