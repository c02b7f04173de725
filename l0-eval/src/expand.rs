use l0_error::{
   Result,
   bail,
};
use l0_value::{
   EnvRef,
   Value,
   ValueRef,
};

use crate::{
   Machine,
   eval::{
      self,
      apply_at,
      scan_macro_table,
   },
};

const MAX_EXPAND_DEPTH: usize = 500;

/// Expands every macro invocation in an AST, to a fixed point at each
/// head. Does not descend into `(quote ...)`; descends into everything
/// else, quasiquote templates included, so residual unquotes are expanded
/// templates whose evaluation happens later.
pub fn macroexpand(machine: &mut Machine, expr: ValueRef, env: EnvRef) -> Result<ValueRef> {
   expand_at(machine, expr, env, 0)
}

fn expand_at(machine: &mut Machine, expr: ValueRef, env: EnvRef, depth: usize) -> Result<ValueRef> {
   if depth > MAX_EXPAND_DEPTH {
      bail!("Stack overflow suspected in macro expansion.");
   }

   let Value::Pair(op, args) = machine.arena.get(expr) else {
      return Ok(expr);
   };

   if let Value::Symbol(symbol) = machine.arena.get(op)
      && machine.arena.resolve(symbol) == "quote"
   {
      return Ok(expr);
   }

   if let Some(transformer) = find_transformer(machine, op, env)? {
      log::trace!("macroexpand rewriting {form}", form = machine.arena.show(expr));

      let expanded = apply_at(machine, transformer, args, env, 0)?;

      // The rewrite may itself be (or contain) a macro invocation. Counting
      // the iteration against the depth bound catches self-expanding
      // runaways.
      return expand_at(machine, expanded, env, depth + 1);
   }

   let expanded_op = expand_at(machine, op, env, depth + 1)?;
   let expanded_args = expand_at(machine, args, env, depth + 1)?;

   if expanded_op == op && expanded_args == args {
      return Ok(expr);
   }

   Ok(machine.arena.pair(expanded_op, expanded_args))
}

/// Finds a transformer for the operator, tolerating a missing macro table
/// (no macros defined yet). A table that exists but is malformed, or an
/// entry that is not a closure, is an error.
fn find_transformer(machine: &mut Machine, op: ValueRef, env: EnvRef) -> Result<Option<ValueRef>> {
   let Value::Symbol(name) = machine.arena.get(op) else {
      return Ok(None);
   };

   let table_symbol = machine.arena.intern(eval::MACRO_TABLE);
   let Some(table) = env.lookup(&machine.arena, table_symbol)? else {
      return Ok(None);
   };

   if !machine.arena.is_list(table) {
      bail!("Runtime error: '{table}' is not a list.", table = eval::MACRO_TABLE);
   }

   let Some(transformer) = scan_macro_table(&machine.arena, table, name) else {
      return Ok(None);
   };

   if !machine.arena.get(transformer).is_closure() {
      bail!(
         "Macro transformer for '{name}' is not a closure.",
         name = machine.arena.resolve(name),
      );
   }

   Ok(Some(transformer))
}

#[cfg(test)]
mod tests {
   use super::*;

   fn machine_with(source: &str) -> (Machine, EnvRef) {
      let mut machine = Machine::new();
      let env = machine.global_env();
      crate::run_program(&mut machine, env, source).expect("setup must evaluate");
      (machine, env)
   }

   fn expand_one(machine: &mut Machine, env: EnvRef, source: &str) -> ValueRef {
      let forms = l0_syntax::parse_all(&mut machine.arena, source).unwrap();
      let form = machine.arena.car(forms).unwrap();
      macroexpand(machine, form, env).unwrap()
   }

   #[test]
   fn expands_a_simple_macro() {
      let (mut machine, env) =
         machine_with("(defmacro when (c body) `(if ,c ,body #f))");

      let expanded = expand_one(&mut machine, env, "(when (> 10 5) 42)");
      assert_eq!(
         machine.arena.show(expanded).to_string(),
         "(if (> 10 5) 42 #f)",
      );
   }

   #[test]
   fn expansion_is_a_fixed_point() {
      let (mut machine, env) = machine_with(
         "(defmacro when (c body) `(if ,c ,body #f))
          (defmacro unless (c body) `(when (not ,c) ,body))",
      );

      let expanded = expand_one(&mut machine, env, "(unless #f (when #t 1))");
      let again = macroexpand(&mut machine, expanded, env).unwrap();

      assert_eq!(
         machine.arena.show(expanded).to_string(),
         machine.arena.show(again).to_string(),
      );
      assert_eq!(
         machine.arena.show(expanded).to_string(),
         "(if (not #f) (if #t 1 #f) #f)",
      );
   }

   #[test]
   fn does_not_descend_into_quote() {
      let (mut machine, env) =
         machine_with("(defmacro when (c body) `(if ,c ,body #f))");

      let expanded = expand_one(&mut machine, env, "(quote (when 1 2))");
      assert_eq!(machine.arena.show(expanded).to_string(), "(quote (when 1 2))");
   }

   #[test]
   fn descends_into_subforms() {
      let (mut machine, env) =
         machine_with("(defmacro twice (x) `(+ ,x ,x))");

      let expanded = expand_one(&mut machine, env, "(define y (twice 3))");
      assert_eq!(machine.arena.show(expanded).to_string(), "(define y (+ 3 3))");
   }

   #[test]
   fn unexpanded_forms_are_returned_as_is() {
      let (mut machine, env) = machine_with("(define x 1)");

      let forms = l0_syntax::parse_all(&mut machine.arena, "(+ x 2)").unwrap();
      let form = machine.arena.car(forms).unwrap();
      let expanded = macroexpand(&mut machine, form, env).unwrap();

      assert_eq!(expanded, form, "no rewrite must mean no reallocation");
   }

   #[test]
   fn runaway_expansion_is_caught() {
      let (mut machine, env) = machine_with("(defmacro loop (x) `(loop ,x))");

      let forms = l0_syntax::parse_all(&mut machine.arena, "(loop 1)").unwrap();
      let form = machine.arena.car(forms).unwrap();
      let error = macroexpand(&mut machine, form, env).unwrap_err();

      assert!(error.message.contains("macro expansion"));
   }
}
