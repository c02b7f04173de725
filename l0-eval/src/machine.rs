use l0_error::Error;
use l0_value::{
   Arena,
   EnvRef,
};

use crate::primitives;

/// The mutable world of one interpreter or compiler session: the arena,
/// the observable error slot, and the argument vector captured at program
/// start for the `command-line-args` primitive.
///
/// Execution is single threaded; the machine is simply passed down every
/// call.
pub struct Machine {
   pub arena: Arena,

   last_error: Option<Error>,
   argv:       Vec<String>,
}

impl Default for Machine {
   fn default() -> Self {
      Self::new()
   }
}

impl Machine {
   #[must_use]
   pub fn new() -> Self {
      Self::with_args(Vec::new())
   }

   /// `argv` excludes the program name.
   #[must_use]
   pub fn with_args(argv: Vec<String>) -> Self {
      Self {
         arena: Arena::new(),

         last_error: None,
         argv,
      }
   }

   /// Creates a root environment with `*macro-table*` and every primitive
   /// registered.
   pub fn global_env(&mut self) -> EnvRef {
      let env = self.arena.env_create(None);
      primitives::register(self, env);
      env
   }

   #[must_use]
   pub fn argv(&self) -> &[String] {
      &self.argv
   }

   /// Records an error in the slot the `get-last-error-*` primitives read,
   /// then hands it back for propagation.
   pub fn record(&mut self, error: Error) -> Error {
      self.last_error = Some(error.clone());
      error
   }

   pub fn clear_error(&mut self) {
      self.last_error = None;
   }

   #[must_use]
   pub fn last_error(&self) -> Option<&Error> {
      self.last_error.as_ref()
   }
}
