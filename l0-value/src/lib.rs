//! The L0 value model and its arena.
//!
//! Every L0 value, string, symbol name, and environment frame lives in one
//! [`Arena`]. Values reference each other through opaque `u32` indices, so
//! [`Value`] itself is `Copy` and the evaluator never holds a borrow across
//! an allocation. Reclamation is whole-arena only: [`Arena::reset`] or drop.

mod arena;
pub use arena::{
   Arena,
   DEFAULT_BLOCK_VALUES,
   ListIter,
   StrRef,
   Symbol,
   ValueRef,
};

mod env;
pub use env::EnvRef;

mod value;
pub use value::{
   Closure,
   Primitive,
   PrimitiveId,
   Show,
   Value,
};
