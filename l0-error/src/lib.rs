//! Error handling for the L0 core.
//!
//! Every fallible operation in the workspace returns [`Result`]. The C
//! runtime's global error slot becomes data attached to the error value
//! itself; callers that need the slot semantics (the `get-last-error-*`
//! primitives) record the error on the machine instead.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// A one-indexed position in L0 source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
   /// The line number. One indexed.
   pub line:   u32,
   /// The column. One indexed, counted in bytes consumed on the line.
   pub column: u32,
}

impl Position {
   #[must_use]
   pub fn new(line: u32, column: u32) -> Self {
      Self { line, column }
   }
}

impl fmt::Display for Position {
   fn fmt(&self, writer: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(writer, "{line}:{column}", line = self.line, column = self.column)
   }
}

/// What went wrong, at the granularity the driver and the error-reporting
/// primitives care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
   /// The reader ran out of input mid-form.
   UnexpectedEof,
   /// The reader could not recognize a token.
   InvalidSyntax,
   /// Allocation failure. The Rust core aborts on exhaustion instead, but
   /// the kind stays part of the surface for parity with the C runtime,
   /// which can fail a block request.
   Memory,
   /// Everything the evaluator, the primitives, and the emitter report.
   Runtime,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Error {
   pub kind:     Kind,
   pub message:  String,
   pub position: Option<Position>,
}

impl Error {
   #[must_use]
   pub fn new(kind: Kind, message: impl Into<String>) -> Self {
      Self {
         kind,
         message: message.into(),
         position: None,
      }
   }

   #[must_use]
   pub fn runtime(message: impl Into<String>) -> Self {
      Self::new(Kind::Runtime, message)
   }

   #[must_use]
   pub fn at(mut self, position: Position) -> Self {
      self.position = Some(position);
      self
   }
}

/// Returns a [`Kind::Runtime`] error from the enclosing function.
#[macro_export]
macro_rules! bail {
   ($($argument:tt)*) => {
      return Err($crate::Error::runtime(format!($($argument)*)))
   };
}
