use l0_error::{
   Error,
   Result,
};

use crate::{
   Arena,
   Symbol,
   Value,
   ValueRef,
};

#[cold]
#[inline(never)]
fn exhausted(len: usize) -> ! {
   panic!("arena exhausted: frame table has {len} entries, the u32 index space is full")
}

/// A lexical environment: a frame of bindings plus the chain of enclosing
/// frames, all allocated in the arena. The frame itself is an association
/// list of `(symbol . value)` pairs, mutated in place by `define`/`set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef(u32);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
   pub bindings: ValueRef,
   pub outer:    Option<EnvRef>,
}

impl Arena {
   /// Creates an empty frame. `None` for `outer` makes a root environment.
   pub fn env_create(&mut self, outer: Option<EnvRef>) -> EnvRef {
      let Ok(index) = u32::try_from(self.frames.len()) else {
         exhausted(self.frames.len());
      };

      self.frames.push(Frame {
         bindings: ValueRef::NIL,
         outer,
      });

      EnvRef(index)
   }

   fn frame(&self, env: EnvRef) -> Frame {
      self.frames[env.0 as usize]
   }
}

impl EnvRef {
   /// A fresh inner scope whose outer pointer is `self`.
   pub fn extend(self, arena: &mut Arena) -> Self {
      arena.env_create(Some(self))
   }

   /// Walks the chain, innermost frame first. The first match wins. A
   /// cyclic frame list is reported as a runtime error instead of looping.
   pub fn lookup(self, arena: &Arena, symbol: Symbol) -> Result<Option<ValueRef>> {
      let mut env = Some(self);

      while let Some(current) = env {
         let frame = arena.frame(current);

         if let Some(binding) = scan_frame(arena, frame.bindings, symbol)? {
            return Ok(arena.cdr(binding));
         }

         env = frame.outer;
      }

      Ok(None)
   }

   /// Adds or updates a binding in this frame only. An existing binding is
   /// updated through its pair; otherwise a new one is prepended.
   pub fn define(self, arena: &mut Arena, symbol: Symbol, value: ValueRef) {
      if let Some(binding) = scan_frame_unchecked(arena, arena.frame(self).bindings, symbol) {
         arena.set_cdr(binding, value);
         return;
      }

      let name = arena.alloc(Value::Symbol(symbol));
      let binding = arena.pair(name, value);
      let head = arena.pair(binding, arena.frame(self).bindings);

      arena.frames[self.0 as usize].bindings = head;
   }

   /// Updates the nearest binding in the chain. Returns false when the
   /// symbol is bound nowhere.
   pub fn set(self, arena: &mut Arena, symbol: Symbol, value: ValueRef) -> bool {
      let mut env = Some(self);

      while let Some(current) = env {
         let frame = arena.frame(current);

         if let Some(binding) = scan_frame_unchecked(arena, frame.bindings, symbol) {
            arena.set_cdr(binding, value);
            return true;
         }

         env = frame.outer;
      }

      false
   }
}

/// Scans one frame's association list for a symbol, returning the binding
/// pair. Tortoise/hare detects a cyclic frame.
fn scan_frame(arena: &Arena, bindings: ValueRef, symbol: Symbol) -> Result<Option<ValueRef>> {
   let mut current = bindings;
   let mut tortoise = bindings;
   let mut steps = 0_usize;

   while let Value::Pair(binding, next) = arena.get(current) {
      if binding_matches(arena, binding, symbol) {
         return Ok(Some(binding));
      }

      current = next;
      steps += 1;

      if steps % 2 == 0 {
         tortoise = arena.cdr(tortoise).unwrap_or(ValueRef::NIL);

         if tortoise == current {
            log::warn!("cyclic environment frame reached during lookup");
            return Err(Error::runtime(
               "Cycle detected in environment frame during lookup",
            ));
         }
      }
   }

   Ok(None)
}

fn scan_frame_unchecked(arena: &Arena, bindings: ValueRef, symbol: Symbol) -> Option<ValueRef> {
   let mut current = bindings;

   while let Value::Pair(binding, next) = arena.get(current) {
      if binding_matches(arena, binding, symbol) {
         return Some(binding);
      }

      current = next;
   }

   None
}

fn binding_matches(arena: &Arena, binding: ValueRef, symbol: Symbol) -> bool {
   match arena.get(binding) {
      Value::Pair(name, _) => arena.get(name) == Value::Symbol(symbol),
      _ => false,
   }
}
