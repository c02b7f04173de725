//! The L0 evaluator: machine state, `eval`/`apply`, the macro expansion
//! pass, and the host primitive set.
//!
//! Evaluation is synchronous recursion on the host stack with a depth cap;
//! the final positions of `if`/`cond`/`begin`/`let`/`and`/`or` and macro
//! re-entry loop instead of recursing.

mod machine;
pub use machine::Machine;

mod eval;
pub use eval::{
   apply,
   eval,
};

mod expand;
pub use expand::macroexpand;

pub mod primitives;

use l0_error::Result;
use l0_value::{
   EnvRef,
   ValueRef,
};

/// Parses and evaluates every form in `source`, returning the value of the
/// last one (nil for empty input). Clears the error slot on entry.
pub fn run_program(machine: &mut Machine, env: EnvRef, source: &str) -> Result<ValueRef> {
   machine.clear_error();

   let forms = match l0_syntax::parse_all(&mut machine.arena, source) {
      Ok(forms) => forms,
      Err(error) => return Err(machine.record(error)),
   };

   let forms = machine
      .arena
      .collect_list(forms)
      .expect("parse_all must return a proper list");

   let mut result = machine.arena.nil();
   for form in forms {
      result = match eval(machine, form, env) {
         Ok(value) => value,
         Err(error) => return Err(machine.record(error)),
      };
   }

   Ok(result)
}
