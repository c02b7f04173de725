use std::fmt;

use derive_more::{
   From,
   IsVariant,
};

use crate::{
   Arena,
   EnvRef,
   StrRef,
   Symbol,
   ValueRef,
};

const SHOW_DEPTH_LIMIT: usize = 100;

/// An opaque handle naming a host primitive. The machine that registers
/// the primitives owns the table the id indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveId(u16);

impl PrimitiveId {
   #[must_use]
   pub fn new(index: u16) -> Self {
      Self(index)
   }

   #[must_use]
   pub fn index(self) -> usize {
      usize::from(self.0)
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
   pub handler: PrimitiveId,
   /// Display name, used by the printer and error messages.
   pub name:    Symbol,
}

/// A user-defined function: parameter list, body sequence, and the
/// environment captured at the `lambda`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
   pub params: ValueRef,
   pub body:   ValueRef,
   pub env:    EnvRef,
}

/// An L0 value. All indirections are arena indices, so values are `Copy`
/// and mutation happens only through [`Arena::set_car`]/[`Arena::set_cdr`].
#[derive(Debug, Clone, Copy, PartialEq, From, IsVariant)]
pub enum Value {
   Nil,

   Boolean(bool),
   Integer(i64),
   Float(f64),

   Symbol(Symbol),
   String(StrRef),

   #[from(ignore)]
   Pair(ValueRef, ValueRef),

   Primitive(Primitive),
   Closure(Closure),

   #[from(ignore)]
   Ref(ValueRef),
}

impl Value {
   /// Only `#f` is false. `0`, `""`, and `()` are all truthy.
   #[must_use]
   pub fn is_truthy(self) -> bool {
      !matches!(self, Self::Boolean(false))
   }

   /// Anything that is neither a pair nor nil.
   #[must_use]
   pub fn is_atom(self) -> bool {
      !self.is_pair() && !self.is_nil()
   }

   /// The tag's name, for error messages.
   #[must_use]
   pub fn type_name(self) -> &'static str {
      match self {
         Self::Nil => "nil",
         Self::Boolean(_) => "boolean",
         Self::Integer(_) => "integer",
         Self::Float(_) => "float",
         Self::Symbol(_) => "symbol",
         Self::String(_) => "string",
         Self::Pair(..) => "pair",
         Self::Primitive(_) => "primitive",
         Self::Closure(_) => "closure",
         Self::Ref(_) => "ref",
      }
   }
}

impl Arena {
   /// Renders a value in reader syntax.
   #[must_use]
   pub fn show(&self, value: ValueRef) -> Show<'_> {
      Show { arena: self, value }
   }
}

/// Reader-syntax rendering of a value, produced by [`Arena::show`].
pub struct Show<'a> {
   arena: &'a Arena,
   value: ValueRef,
}

impl fmt::Display for Show<'_> {
   fn fmt(&self, writer: &mut fmt::Formatter<'_>) -> fmt::Result {
      write_value(writer, self.arena, self.value, 0)
   }
}

fn write_value(
   writer: &mut fmt::Formatter<'_>,
   arena: &Arena,
   value: ValueRef,
   depth: usize,
) -> fmt::Result {
   if depth > SHOW_DEPTH_LIMIT {
      return write!(writer, "...");
   }

   match arena.get(value) {
      Value::Nil => write!(writer, "()"),

      Value::Boolean(true) => write!(writer, "#t"),
      Value::Boolean(false) => write!(writer, "#f"),

      Value::Integer(n) => write!(writer, "{n}"),
      Value::Float(n) => write!(writer, "{n}"),

      Value::Symbol(symbol) => write!(writer, "{}", arena.resolve(symbol)),

      Value::String(content) => write_string(writer, arena.text(content)),

      Value::Pair(..) => {
         write!(writer, "(")?;

         let mut current = value;
         let mut first = true;
         while let Value::Pair(car, cdr) = arena.get(current) {
            if !first {
               write!(writer, " ")?;
            }
            write_value(writer, arena, car, depth + 1)?;
            first = false;
            current = cdr;
         }

         if !matches!(arena.get(current), Value::Nil) {
            write!(writer, " . ")?;
            write_value(writer, arena, current, depth + 1)?;
         }

         write!(writer, ")")
      },

      Value::Primitive(primitive) => {
         write!(writer, "<primitive:{}>", arena.resolve(primitive.name))
      },
      Value::Closure(_) => write!(writer, "<closure>"),

      Value::Ref(referred) => {
         write!(writer, "&")?;
         write_value(writer, arena, referred, depth + 1)
      },
   }
}

fn write_string(writer: &mut fmt::Formatter<'_>, content: &str) -> fmt::Result {
   write!(writer, "\"")?;

   for c in content.chars() {
      match c {
         '"' => write!(writer, "\\\"")?,
         '\\' => write!(writer, "\\\\")?,
         '\n' => write!(writer, "\\n")?,
         '\t' => write!(writer, "\\t")?,
         c if c.is_ascii_control() => write!(writer, "\\x{:02x}", c as u32)?,
         c => write!(writer, "{c}")?,
      }
   }

   write!(writer, "\"")
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn truthiness() {
      let mut arena = Arena::new();

      let zero = arena.integer(0);
      let empty = arena.string("");
      let no = arena.boolean(false);

      assert!(arena.get(zero).is_truthy());
      assert!(arena.get(empty).is_truthy());
      assert!(arena.get(arena.nil()).is_truthy());
      assert!(!arena.get(no).is_truthy());
   }

   #[test]
   fn predicates_are_tag_checks() {
      let mut arena = Arena::new();

      let n = arena.integer(1);
      let s = arena.symbol("x");

      assert!(arena.get(n).is_integer());
      assert!(arena.get(n).is_atom());
      assert!(arena.get(s).is_symbol());
      assert!(arena.get(arena.nil()).is_nil());
      assert!(!arena.get(arena.nil()).is_atom());
   }

   #[test]
   fn show_atoms() {
      let mut arena = Arena::new();

      let t = arena.boolean(true);
      let n = arena.integer(-42);
      let f = arena.float(2.5);
      let sym = arena.symbol("hello?");

      assert_eq!(arena.show(t).to_string(), "#t");
      assert_eq!(arena.show(n).to_string(), "-42");
      assert_eq!(arena.show(f).to_string(), "2.5");
      assert_eq!(arena.show(sym).to_string(), "hello?");
      assert_eq!(arena.show(arena.nil()).to_string(), "()");
   }

   #[test]
   fn show_escapes_strings() {
      let mut arena = Arena::new();

      let plain = arena.string("hi");
      let tricky = arena.string("a\"b\\c\nd\te");

      assert_eq!(arena.show(plain).to_string(), "\"hi\"");
      assert_eq!(arena.show(tricky).to_string(), r#""a\"b\\c\nd\te""#);
   }

   #[test]
   fn show_lists() {
      let mut arena = Arena::new();

      let one = arena.integer(1);
      let two = arena.integer(2);
      let sym = arena.symbol("a");
      let inner = arena.list(&[two]);
      let list = arena.list(&[one, sym, inner]);

      assert_eq!(arena.show(list).to_string(), "(1 a (2))");

      let improper = arena.pair(one, two);
      assert_eq!(arena.show(improper).to_string(), "(1 . 2)");
   }
}
