use l0_error::{
   Error,
   Result,
   bail,
};
use l0_value::{
   Arena,
   EnvRef,
   Symbol,
   Value,
   ValueRef,
};
use smallvec::SmallVec;

use crate::{
   Machine,
   primitives,
};

const MAX_EVAL_DEPTH: usize = 1000;

pub(crate) const MACRO_TABLE: &str = "*macro-table*";

/// The closed set of special forms. Dispatch happens before macro lookup
/// and before ordinary application, by exact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Special {
   Quote,
   Quasiquote,
   Unquote,
   UnquoteSplicing,
   If,
   Cond,
   And,
   Or,
   Begin,
   Let,
   Define,
   Set,
   Lambda,
   Defmacro,
}

static SPECIAL_FORMS: phf::Map<&'static str, Special> = phf::phf_map! {
   "quote" => Special::Quote,
   "quasiquote" => Special::Quasiquote,
   "unquote" => Special::Unquote,
   "unquote-splicing" => Special::UnquoteSplicing,
   "if" => Special::If,
   "cond" => Special::Cond,
   "and" => Special::And,
   "or" => Special::Or,
   "begin" => Special::Begin,
   "let" => Special::Let,
   "define" => Special::Define,
   "set!" => Special::Set,
   "lambda" => Special::Lambda,
   "defmacro" => Special::Defmacro,
};

/// Evaluates one expression in the given environment.
pub fn eval(machine: &mut Machine, expr: ValueRef, env: EnvRef) -> Result<ValueRef> {
   eval_at(machine, expr, env, 0)
}

pub(crate) fn eval_at(
   machine: &mut Machine,
   expr: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<ValueRef> {
   if depth > MAX_EVAL_DEPTH {
      bail!("Maximum recursion depth ({MAX_EVAL_DEPTH}) exceeded in eval");
   }

   // Tail positions loop by replacing `expr` (and sometimes `env`) instead
   // of recursing.
   let mut expr = expr;
   let mut env = env;

   loop {
      match machine.arena.get(expr) {
         // Self-evaluating atoms.
         Value::Nil
         | Value::Boolean(_)
         | Value::Integer(_)
         | Value::Float(_)
         | Value::String(_) => return Ok(expr),

         Value::Symbol(symbol) => {
            return match env.lookup(&machine.arena, symbol)? {
               Some(value) => Ok(value),
               None => {
                  bail!("Unbound variable: {name}", name = machine.arena.resolve(symbol));
               },
            };
         },

         Value::Pair(op, args) => {
            let Value::Symbol(op_symbol) = machine.arena.get(op) else {
               // Operator is an expression. Evaluate it, then apply.
               let function = eval_at(machine, op, env, depth + 1)?;

               let applicable = machine.arena.get(function);
               if !applicable.is_primitive() && !applicable.is_closure() {
                  bail!(
                     "Attempted to apply non-function value (type {type_name}) obtained from \
                      evaluating operator expression.",
                     type_name = applicable.type_name(),
                  );
               }

               let argv = eval_list(machine, args, env, depth)?;
               return apply_at(machine, function, argv, env, depth);
            };

            let special = SPECIAL_FORMS
               .get(machine.arena.resolve(op_symbol))
               .copied();

            let Some(form) = special else {
               // Macro dispatch: transformers run on unevaluated arguments
               // and the resulting form re-enters evaluation in this same
               // environment (tail position).
               if let Some(transformer) = lookup_macro_strict(machine, op_symbol, env)? {
                  log::trace!(
                     "expanding macro {name}",
                     name = machine.arena.resolve(op_symbol),
                  );
                  expr = apply_at(machine, transformer, args, env, depth)?;
                  continue;
               }

               // Ordinary application with a symbol operator: the operator
               // must be applicable before arguments are evaluated.
               let Some(function) = env.lookup(&machine.arena, op_symbol)? else {
                  bail!(
                     "Unbound function/variable in operator position: {name}",
                     name = machine.arena.resolve(op_symbol),
                  );
               };

               let applicable = machine.arena.get(function);
               if !applicable.is_primitive() && !applicable.is_closure() {
                  bail!(
                     "Attempted to apply non-function value (type {type_name}) obtained from \
                      symbol '{name}'.",
                     type_name = applicable.type_name(),
                     name = machine.arena.resolve(op_symbol),
                  );
               }

               let argv = eval_list(machine, args, env, depth)?;
               return apply_at(machine, function, argv, env, depth);
            };

            match form {
               Special::Quote => {
                  let [quoted] = forms_exact(&machine.arena, args, "quote")?;
                  return Ok(quoted);
               },

               Special::Quasiquote => {
                  let [template] = forms_exact(&machine.arena, args, "quasiquote")?;
                  return quasiquote(machine, template, env, depth, 1);
               },

               Special::Unquote | Special::UnquoteSplicing => {
                  bail!(
                     "'{name}' cannot appear outside of a quasiquote.",
                     name = machine.arena.resolve(op_symbol),
                  );
               },

               Special::If => {
                  let forms = proper_forms(&machine.arena, args, "if")?;
                  let (condition, then_branch, else_branch) = match *forms.as_slice() {
                     [condition, then_branch] => (condition, then_branch, None),
                     [condition, then_branch, else_branch] => {
                        (condition, then_branch, Some(else_branch))
                     },
                     _ => {
                        bail!(
                           "Special form 'if' requires 2 or 3 arguments: (if condition \
                            true-expr [false-expr]).",
                        );
                     },
                  };

                  let condition = eval_at(machine, condition, env, depth + 1)?;
                  if machine.arena.get(condition).is_truthy() {
                     expr = then_branch;
                  } else {
                     match else_branch {
                        Some(else_branch) => expr = else_branch,
                        None => return Ok(machine.arena.nil()),
                     }
                  }
               },

               Special::Cond => {
                  match cond_select(machine, args, env, depth)? {
                     CondOutcome::Tail(body) => expr = body,
                     CondOutcome::Done(value) => return Ok(value),
                  }
               },

               Special::And => {
                  let forms = proper_forms(&machine.arena, args, "and")?;
                  let Some((&last, init)) = forms.split_last() else {
                     return Ok(machine.arena.boolean(true));
                  };

                  let mut short_circuit = None;
                  for &form in init {
                     let value = eval_at(machine, form, env, depth + 1)?;
                     if !machine.arena.get(value).is_truthy() {
                        short_circuit = Some(value);
                        break;
                     }
                  }

                  match short_circuit {
                     Some(value) => return Ok(value),
                     None => expr = last,
                  }
               },

               Special::Or => {
                  let forms = proper_forms(&machine.arena, args, "or")?;
                  let Some((&last, init)) = forms.split_last() else {
                     return Ok(machine.arena.boolean(false));
                  };

                  let mut short_circuit = None;
                  for &form in init {
                     let value = eval_at(machine, form, env, depth + 1)?;
                     if machine.arena.get(value).is_truthy() {
                        short_circuit = Some(value);
                        break;
                     }
                  }

                  match short_circuit {
                     Some(value) => return Ok(value),
                     None => expr = last,
                  }
               },

               Special::Begin => {
                  let forms = sequence_forms(&machine.arena, args)?;
                  let Some((&last, init)) = forms.split_last() else {
                     return Ok(machine.arena.nil());
                  };

                  for &form in init {
                     eval_at(machine, form, env, depth + 1)?;
                  }

                  expr = last;
               },

               Special::Let => {
                  let (let_env, body) = eval_let(machine, args, env, depth)?;

                  let forms = sequence_forms(&machine.arena, body)?;
                  let (&last, init) = forms
                     .split_last()
                     .expect("let body is checked non-empty");

                  env = let_env;
                  for &form in init {
                     eval_at(machine, form, env, depth + 1)?;
                  }

                  expr = last;
               },

               Special::Define => {
                  eval_define(machine, args, env, depth)?;
                  return Ok(machine.arena.nil());
               },

               Special::Set => {
                  let [target, value_expr] = forms_exact2(
                     &machine.arena,
                     args,
                     "Special form 'set!' requires exactly two arguments: (set! symbol \
                      value-expr).",
                  )?;

                  let Value::Symbol(symbol) = machine.arena.get(target) else {
                     bail!("First argument to 'set!' must be a symbol.");
                  };

                  let value = eval_at(machine, value_expr, env, depth + 1)?;
                  if !env.set(&mut machine.arena, symbol, value) {
                     bail!(
                        "Cannot set! unbound variable: {name}",
                        name = machine.arena.resolve(symbol),
                     );
                  }

                  return Ok(machine.arena.nil());
               },

               Special::Lambda => {
                  let (params, body) = split_lambda(
                     &machine.arena,
                     args,
                     "Special form 'lambda' requires parameters list and at least one body \
                      expression: (lambda (params...) body...).",
                  )?;
                  check_params(&machine.arena, params, "Lambda")?;

                  return Ok(machine.arena.closure(params, body, env));
               },

               Special::Defmacro => {
                  eval_defmacro(machine, args, env)?;
                  return Ok(machine.arena.nil());
               },
            }
         },

         // Applicable values and references only reach here through the
         // `eval` primitive; they do not self-evaluate.
         other => {
            bail!("Cannot evaluate value of type {type_name}.", type_name = other.type_name());
         },
      }
   }
}

/// Applies a primitive or closure to already-evaluated arguments.
pub fn apply(machine: &mut Machine, function: ValueRef, args: ValueRef, env: EnvRef) -> Result<ValueRef> {
   apply_at(machine, function, args, env, 0)
}

pub(crate) fn apply_at(
   machine: &mut Machine,
   function: ValueRef,
   args: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<ValueRef> {
   match machine.arena.get(function) {
      Value::Primitive(primitive) => primitives::run(machine, primitive.handler, args, env),

      Value::Closure(closure) => {
         let call_env = closure.env.extend(&mut machine.arena);

         let mut param = closure.params;
         let mut arg = args;
         loop {
            match (machine.arena.get(param), machine.arena.get(arg)) {
               (Value::Pair(symbol, next_param), Value::Pair(value, next_arg)) => {
                  let Value::Symbol(symbol) = machine.arena.get(symbol) else {
                     bail!("Lambda parameters must be symbols.");
                  };

                  call_env.define(&mut machine.arena, symbol, value);
                  param = next_param;
                  arg = next_arg;
               },

               (Value::Nil, Value::Nil) => break,

               _ => bail!("Function called with incorrect number of arguments."),
            }
         }

         eval_sequence(machine, closure.body, call_env, depth)
      },

      other => {
         bail!(
            "Attempted to apply non-function value (type {type_name}).",
            type_name = other.type_name(),
         );
      },
   }
}

/// Evaluates every element of a proper list, left to right, into a fresh
/// proper list.
pub(crate) fn eval_list(
   machine: &mut Machine,
   list: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<ValueRef> {
   let Some(elements) = machine.arena.collect_list(list) else {
      bail!("Cannot evaluate list: input is not a pair or nil.");
   };

   let mut evaluated = SmallVec::<ValueRef, 8>::new();
   for element in elements {
      evaluated.push(eval_at(machine, element, env, depth + 1)?);
   }

   Ok(machine.arena.list(&evaluated))
}

/// Evaluates a body sequence, returning the last value; nil when empty.
pub(crate) fn eval_sequence(
   machine: &mut Machine,
   body: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<ValueRef> {
   let forms = sequence_forms(&machine.arena, body)?;

   let mut result = machine.arena.nil();
   for form in forms {
      result = eval_at(machine, form, env, depth + 1)?;
   }

   Ok(result)
}

enum CondOutcome {
   /// A clause matched and its body's last form continues in tail position.
   Tail(ValueRef),
   Done(ValueRef),
}

fn cond_select(
   machine: &mut Machine,
   clauses: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<CondOutcome> {
   let Some(clauses) = machine.arena.collect_list(clauses) else {
      bail!("'cond' clauses must form a proper list.");
   };

   let count = clauses.len();
   for (index, clause) in clauses.into_iter().enumerate() {
      if !machine.arena.get(clause).is_pair() {
         bail!("'cond' clause must be a list.");
      }

      let test = machine.arena.car(clause).expect("clause is a pair");
      let body = machine.arena.cdr(clause).expect("clause is a pair");

      let is_else = matches!(
         machine.arena.get(test),
         Value::Symbol(symbol) if machine.arena.resolve(symbol) == "else"
      );

      if is_else && index + 1 != count {
         bail!("'else' clause must be the last clause in 'cond'.");
      }

      let test_value = if is_else {
         None
      } else {
         Some(eval_at(machine, test, env, depth + 1)?)
      };

      let met = match test_value {
         None => true,
         Some(value) => machine.arena.get(value).is_truthy(),
      };

      if !met {
         continue;
      }

      let forms = sequence_forms(&machine.arena, body)?;
      return Ok(match forms.split_last() {
         // A body-less clause yields its test value; a body-less else #t.
         None => {
            match test_value {
               Some(value) => CondOutcome::Done(value),
               None => CondOutcome::Done(machine.arena.boolean(true)),
            }
         },

         Some((&last, init)) => {
            for &form in init {
               eval_at(machine, form, env, depth + 1)?;
            }
            CondOutcome::Tail(last)
         },
      });
   }

   Ok(CondOutcome::Done(machine.arena.nil()))
}

/// Evaluates `let` bindings in the outer environment and populates a fresh
/// frame. Returns the new environment and the (non-empty) body.
fn eval_let(
   machine: &mut Machine,
   args: ValueRef,
   env: EnvRef,
   depth: usize,
) -> Result<(EnvRef, ValueRef)> {
   let (bindings, body) = split_lambda(
      &machine.arena,
      args,
      "Special form 'let' requires bindings list and at least one body expression: (let ((var \
       val)...) body...).",
   )?;

   let Some(bindings) = machine.arena.collect_list(bindings) else {
      bail!("Let bindings list is not a proper list.");
   };

   let let_env = env.extend(&mut machine.arena);

   for binding in bindings {
      let [symbol, value_expr] = forms_exact2(
         &machine.arena,
         binding,
         "Let binding must be a list of two elements: (symbol value-expr).",
      )?;

      let Value::Symbol(symbol) = machine.arena.get(symbol) else {
         bail!("Let binding variable must be a symbol.");
      };

      let value = eval_at(machine, value_expr, env, depth + 1)?;
      let_env.define(&mut machine.arena, symbol, value);
   }

   Ok((let_env, body))
}

fn eval_define(machine: &mut Machine, args: ValueRef, env: EnvRef, depth: usize) -> Result<()> {
   let Value::Pair(target, rest) = machine.arena.get(args) else {
      bail!("Special form 'define' requires at least two arguments: (define symbol value-expr).");
   };

   match machine.arena.get(target) {
      Value::Symbol(symbol) => {
         let [value_expr] = forms_exact(&machine.arena, rest, "define")
            .map_err(|_| Error::runtime(
               "Basic 'define' requires exactly two arguments: (define symbol value-expr).",
            ))?;

         let value = eval_at(machine, value_expr, env, depth + 1)?;
         env.define(&mut machine.arena, symbol, value);
         Ok(())
      },

      Value::Pair(name, params) => {
         let Value::Symbol(symbol) = machine.arena.get(name) else {
            bail!("Function name in definition shorthand must be a symbol.");
         };

         check_params(&machine.arena, params, "Function definition")?;

         if machine.arena.get(rest).is_nil() {
            bail!("Function definition requires at least one body expression.");
         }
         if !machine.arena.is_list(rest) {
            bail!("Body sequence is not a proper list.");
         }

         // (define (s p...) body...) desugars to (define s (lambda ...)).
         let closure = machine.arena.closure(params, rest, env);
         env.define(&mut machine.arena, symbol, closure);
         Ok(())
      },

      _ => bail!("First argument to 'define' must be a symbol or a list for function definition."),
   }
}

fn eval_defmacro(machine: &mut Machine, args: ValueRef, env: EnvRef) -> Result<()> {
   let forms = proper_forms(&machine.arena, args, "defmacro")?;
   if forms.len() < 3 {
      bail!(
         "Special form 'defmacro' requires name, parameters list, and at least one body \
          expression.",
      );
   }

   let Value::Symbol(name) = machine.arena.get(forms[0]) else {
      bail!("First argument to 'defmacro' (name) must be a symbol.");
   };

   let params = forms[1];
   check_params(&machine.arena, params, "Defmacro")?;

   let body = machine
      .arena
      .cdr(args)
      .and_then(|rest| machine.arena.cdr(rest))
      .expect("defmacro has at least three forms");

   let transformer = machine.arena.closure(params, body, env);

   let table_symbol = machine.arena.intern(MACRO_TABLE);
   let Some(table) = env.lookup(&machine.arena, table_symbol)? else {
      bail!("Global variable '{MACRO_TABLE}' is not defined.");
   };

   let name_value = machine.arena.alloc(Value::Symbol(name));
   let entry = machine.arena.pair(name_value, transformer);
   let extended = machine.arena.pair(entry, table);

   if !env.set(&mut machine.arena, table_symbol, extended) {
      bail!("Failed to update '{MACRO_TABLE}' binding.");
   }

   Ok(())
}

/// Quasiquote template expansion; `level` is the quasiquote nesting depth,
/// starting at 1.
fn quasiquote(
   machine: &mut Machine,
   template: ValueRef,
   env: EnvRef,
   depth: usize,
   level: u32,
) -> Result<ValueRef> {
   if depth > MAX_EVAL_DEPTH {
      bail!("Maximum recursion depth ({MAX_EVAL_DEPTH}) exceeded in eval");
   }

   let Value::Pair(head, rest) = machine.arena.get(template) else {
      // Atoms, nil included, expand to themselves.
      return Ok(template);
   };

   match quote_form(&machine.arena, template) {
      Some((QuoteKind::Unquote, unquoted)) => {
         if level == 1 {
            return eval_at(machine, unquoted, env, depth + 1);
         }

         // Nested: reconstruct with the depth reduced inside.
         let rebuilt = quasiquote(machine, rest, env, depth + 1, level - 1)?;
         return Ok(machine.arena.pair(head, rebuilt));
      },

      Some((QuoteKind::UnquoteSplicing, _)) => {
         if level == 1 {
            bail!("'unquote-splicing' cannot appear outside of a list template.");
         }

         let rebuilt = quasiquote(machine, rest, env, depth + 1, level - 1)?;
         return Ok(machine.arena.pair(head, rebuilt));
      },

      Some((QuoteKind::Quasiquote, _)) => {
         let rebuilt = quasiquote(machine, rest, env, depth + 1, level + 1)?;
         return Ok(machine.arena.pair(head, rebuilt));
      },

      None => {},
   }

   // A list element of the form (unquote-splicing x) splices the result of
   // evaluating x into the surrounding list.
   if level == 1
      && let Some((QuoteKind::UnquoteSplicing, spliced_expr)) = quote_form(&machine.arena, head)
   {
      let spliced = eval_at(machine, spliced_expr, env, depth + 1)?;
      let Some(elements) = machine.arena.collect_list(spliced) else {
         bail!("'unquote-splicing' expression must evaluate to a proper list.");
      };

      let expanded_rest = quasiquote(machine, rest, env, depth + 1, level)?;

      let mut spliced_list = expanded_rest;
      for &element in elements.iter().rev() {
         spliced_list = machine.arena.pair(element, spliced_list);
      }
      return Ok(spliced_list);
   }

   let expanded_head = quasiquote(machine, head, env, depth + 1, level)?;
   let expanded_rest = quasiquote(machine, rest, env, depth + 1, level)?;

   if expanded_head == head && expanded_rest == rest {
      return Ok(template);
   }

   Ok(machine.arena.pair(expanded_head, expanded_rest))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteKind {
   Quasiquote,
   Unquote,
   UnquoteSplicing,
}

/// Recognizes `(unquote x)`, `(unquote-splicing x)`, and `(quasiquote x)`
/// shapes, returning the kind and the single argument.
fn quote_form(arena: &Arena, value: ValueRef) -> Option<(QuoteKind, ValueRef)> {
   let Value::Pair(head, rest) = arena.get(value) else {
      return None;
   };
   let Value::Symbol(symbol) = arena.get(head) else {
      return None;
   };

   let kind = match arena.resolve(symbol) {
      "quasiquote" => QuoteKind::Quasiquote,
      "unquote" => QuoteKind::Unquote,
      "unquote-splicing" => QuoteKind::UnquoteSplicing,
      _ => return None,
   };

   let Value::Pair(argument, tail) = arena.get(rest) else {
      return None;
   };
   arena.get(tail).is_nil().then_some((kind, argument))
}

/// Finds a macro transformer for application dispatch. The macro table must
/// exist and be a proper association list.
fn lookup_macro_strict(
   machine: &mut Machine,
   name: Symbol,
   env: EnvRef,
) -> Result<Option<ValueRef>> {
   let table_symbol = machine.arena.intern(MACRO_TABLE);

   let Some(table) = env.lookup(&machine.arena, table_symbol)? else {
      bail!("Macro check failed: Global variable '{MACRO_TABLE}' not found.");
   };

   if !machine.arena.is_list(table) {
      bail!("Macro check failed: Global variable '{MACRO_TABLE}' is not a list.");
   }

   let Some(transformer) = scan_macro_table(&machine.arena, table, name) else {
      return Ok(None);
   };

   if !machine.arena.get(transformer).is_closure() {
      bail!(
         "Macro expansion error: Transformer for '{name}' is not a closure.",
         name = machine.arena.resolve(name),
      );
   }

   Ok(Some(transformer))
}

pub(crate) fn scan_macro_table(arena: &Arena, table: ValueRef, name: Symbol) -> Option<ValueRef> {
   for entry in arena.iter_list(table) {
      let Value::Pair(entry_name, transformer) = arena.get(entry) else {
         continue;
      };

      if arena.get(entry_name) == Value::Symbol(name) {
         return Some(transformer);
      }
   }

   None
}

// Shape helpers shared by the special forms.

fn proper_forms(arena: &Arena, args: ValueRef, form: &str) -> Result<Vec<ValueRef>> {
   arena
      .collect_list(args)
      .ok_or_else(|| Error::runtime(format!("'{form}' arguments must form a proper list.")))
}

fn sequence_forms(arena: &Arena, body: ValueRef) -> Result<Vec<ValueRef>> {
   arena
      .collect_list(body)
      .ok_or_else(|| Error::runtime("Body sequence is not a proper list."))
}

fn forms_exact<const N: usize>(arena: &Arena, args: ValueRef, form: &str) -> Result<[ValueRef; N]> {
   let count = match N {
      1 => "one argument",
      2 => "two arguments",
      _ => "that many arguments",
   };

   arena
      .collect_list(args)
      .and_then(|forms| <[ValueRef; N]>::try_from(forms).ok())
      .ok_or_else(|| Error::runtime(format!("Special form '{form}' requires exactly {count}.")))
}

fn forms_exact2(arena: &Arena, args: ValueRef, message: &str) -> Result<[ValueRef; 2]> {
   arena
      .collect_list(args)
      .and_then(|forms| <[ValueRef; 2]>::try_from(forms).ok())
      .ok_or_else(|| Error::runtime(message))
}

/// Splits `((first ...) body...)` shapes, requiring a non-empty body.
fn split_lambda(arena: &Arena, args: ValueRef, message: &str) -> Result<(ValueRef, ValueRef)> {
   let Value::Pair(first, body) = arena.get(args) else {
      bail!("{message}");
   };
   if !arena.get(body).is_pair() {
      bail!("{message}");
   }

   Ok((first, body))
}

fn check_params(arena: &Arena, params: ValueRef, what: &str) -> Result<()> {
   let mut current = params;

   loop {
      match arena.get(current) {
         Value::Nil => return Ok(()),

         Value::Pair(param, rest) => {
            if !arena.get(param).is_symbol() {
               bail!("{what} parameters must be symbols.");
            }
            current = rest;
         },

         _ => bail!("{what} parameters list is not a proper list."),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn run(source: &str) -> (Machine, Result<ValueRef>) {
      let mut machine = Machine::new();
      let env = machine.global_env();
      let result = crate::run_program(&mut machine, env, source);
      (machine, result)
   }

   fn value_of(source: &str) -> (Machine, ValueRef) {
      let (machine, result) = run(source);
      (machine, result.expect("program must evaluate"))
   }

   fn shown(source: &str) -> String {
      let (machine, value) = value_of(source);
      machine.arena.show(value).to_string()
   }

   fn error_of(source: &str) -> Error {
      let (_, result) = run(source);
      result.expect_err("program must fail")
   }

   #[test]
   fn arithmetic() {
      assert_eq!(shown("(+ 1 2 3)"), "6");
      assert_eq!(shown("(- 10 3 2)"), "5");
      assert_eq!(shown("(- 4)"), "-4");
      assert_eq!(shown("(* 2 3 4)"), "24");
      assert_eq!(shown("(+ 1 2.5)"), "3.5");
      assert_eq!(shown("(/ 6 3)"), "2");
      assert!(matches!(
         {
            let (machine, value) = value_of("(/ 6 3)");
            machine.arena.get(value)
         },
         Value::Float(_),
      ));

      assert!(error_of("(/ 1 0)").message.contains("Division by zero"));
      assert!(error_of("(+ 1 'a)").message.contains("integer or float"));
   }

   #[test]
   fn comparisons() {
      assert_eq!(shown("(= 1 1 1)"), "#t");
      assert_eq!(shown("(= 1 2)"), "#f");
      assert_eq!(shown("(= 1 1.0)"), "#t");
      assert_eq!(shown("(= 1 'a)"), "#f");
      assert_eq!(shown("(< 1 2 3)"), "#t");
      assert_eq!(shown("(< 1 3 2)"), "#f");
      assert_eq!(shown("(> 3 2 1)"), "#t");
   }

   #[test]
   fn factorial() {
      let source = "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 5)";
      assert_eq!(shown(source), "120");
   }

   #[test]
   fn when_macro() {
      let source = "(defmacro when (c body) `(if ,c ,body #f)) (when (> 10 5) 42)";
      assert_eq!(shown(source), "42");
   }

   #[test]
   fn let_binds_in_a_fresh_frame() {
      assert_eq!(shown("(let ((x 1) (y 2)) (+ x y))"), "3");

      // Binding values evaluate in the outer environment.
      assert_eq!(shown("(define x 10) (let ((x 1) (y x)) y)"), "10");
   }

   #[test]
   fn strings() {
      assert_eq!(shown(r#"(string-append "Hello, " "world")"#), "\"Hello, world\"");
      assert_eq!(shown(r#"(string-length "abc")"#), "3");
      assert_eq!(shown(r#"(substring "hello" 1 3)"#), "\"el\"");
      assert_eq!(shown(r#"(substring "hello" 2)"#), "\"llo\"");
      assert_eq!(shown(r#"(string->symbol "foo")"#), "foo");
      assert_eq!(shown("(symbol->string 'foo)"), "\"foo\"");
      assert_eq!(shown("(number->string 42)"), "\"42\"");
      assert_eq!(shown("(number->string 2.5)"), "\"2.5\"");
   }

   #[test]
   fn list_operations() {
      assert_eq!(shown("(car (cons 'a '(b c)))"), "a");
      assert_eq!(shown("(cdr (cons 'a '(b c)))"), "(b c)");
      assert_eq!(shown("(list 1 2 3)"), "(1 2 3)");
      assert_eq!(shown("(append '(1 2) '(3) '())"), "(1 2 3)");
      assert_eq!(shown("(append)"), "()");

      assert!(error_of("(car 5)").message.contains("must be a pair"));
      assert!(error_of("(append 1 '(2))").message.contains("must be lists"));
   }

   #[test]
   fn append_preserves_length_and_order() {
      assert_eq!(shown("(append '(1 2 3) '())"), "(1 2 3)");
      assert_eq!(shown("(append '() '(1 2 3))"), "(1 2 3)");
   }

   #[test]
   fn conditional_boundaries() {
      assert_eq!(shown("(if #f 1)"), "()");
      assert_eq!(shown("(if 0 1 2)"), "1");
      assert_eq!(shown("(and)"), "#t");
      assert_eq!(shown("(or)"), "#f");
   }

   #[test]
   fn and_or_yield_the_deciding_value() {
      assert_eq!(shown("(and 1 2 3)"), "3");
      assert_eq!(shown("(and 1 #f 3)"), "#f");
      assert_eq!(shown("(or #f 5 undefined)"), "5");
      assert_eq!(shown("(or #f #f)"), "#f");
   }

   #[test]
   fn cond_clauses() {
      assert_eq!(shown("(cond (#f 1) (#t 2) (else 3))"), "2");
      assert_eq!(shown("(cond (#f 1) (else 3))"), "3");
      assert_eq!(shown("(cond (#f 1))"), "()");
      // A body-less clause yields its test value; a body-less else #t.
      assert_eq!(shown("(cond (#f) (7))"), "7");
      assert_eq!(shown("(cond (#f 1) (else))"), "#t");

      assert!(error_of("(cond (else 1) (#t 2))").message.contains("last clause"));
   }

   #[test]
   fn begin_sequences() {
      assert_eq!(shown("(begin 1 2 3)"), "3");
      assert_eq!(shown("(begin)"), "()");
   }

   #[test]
   fn define_and_set() {
      assert_eq!(shown("(define x 1) (set! x 2) x"), "2");
      assert_eq!(shown("(define (add2 a b) (+ a b)) (add2 1 2)"), "3");
      assert_eq!(shown("(define (two) 1 2) (two)"), "2");
      assert_eq!(shown("(define x 1)"), "()");

      assert!(error_of("(set! y 1)").message.contains("unbound"));
      assert!(error_of("(define 1 2)").message.contains("must be a symbol"));
   }

   #[test]
   fn closures_capture_the_environment_by_reference() {
      // A later `define` in the captured frame mutates the same binding,
      // so the closure observes the new value.
      assert_eq!(shown("(define g 1) (define (f) g) (define g 2) (f)"), "2");

      // A let-bound capture is its own frame; redefining the global does
      // not touch it.
      let source = "(define g 1)
                    (define f (let ((g 10)) (lambda () g)))
                    (define g 2)
                    (f)";
      assert_eq!(shown(source), "10");
   }

   #[test]
   fn lambda_validation() {
      assert!(error_of("(lambda (x 1) x)").message.contains("must be symbols"));
      assert!(error_of("(lambda (x))").message.contains("at least one body"));
      assert!(error_of("((lambda (x) x) 1 2)").message.contains("incorrect number"));
   }

   #[test]
   fn unbound_reporting() {
      assert!(error_of("nope").message.contains("Unbound variable: nope"));
      assert!(
         error_of("(nope 1)")
            .message
            .contains("Unbound function/variable in operator position: nope"),
      );
      assert!(error_of("(1 2)").message.contains("non-function"));
      assert!(error_of("((+ 1 2) 3)").message.contains("non-function"));
   }

   #[test]
   fn quote_and_quasiquote() {
      assert_eq!(shown("'x"), "x");
      assert_eq!(shown("'(1 2)"), "(1 2)");
      assert_eq!(shown("`(1 ,(+ 1 1) 3)"), "(1 2 3)");
      assert_eq!(shown("`(1 ,@(list 2 3) 4)"), "(1 2 3 4)");
      assert_eq!(shown("`(,@(list 1 2))"), "(1 2)");
      assert_eq!(shown("`x"), "x");
   }

   #[test]
   fn nested_quasiquote_reduces_depth() {
      assert_eq!(shown("`(a `(b ,(c)))"), "(a (quasiquote (b (unquote (c)))))");
      assert_eq!(shown("(define x 5) `(a `(b ,,x))"), "(a (quasiquote (b (unquote 5))))");
   }

   #[test]
   fn quasiquote_errors() {
      assert!(error_of(",x").message.contains("outside of a quasiquote"));
      assert!(error_of(",@x").message.contains("outside of a quasiquote"));
      assert!(error_of("`,@(list 1)").message.contains("outside of a list template"));
      assert!(
         error_of("`(a ,@5)")
            .message
            .contains("must evaluate to a proper list"),
      );
   }

   #[test]
   fn eval_and_apply_primitives() {
      assert_eq!(shown("(eval '(+ 1 2))"), "3");
      assert_eq!(shown("(apply + (list 1 2 3))"), "6");
      assert_eq!(shown("(eval-in-compiler-env '(+ 2 2))"), "4");

      assert!(error_of("(apply 1 '(2))").message.contains("must be a function"));
   }

   #[test]
   fn parse_string_reflection() {
      assert_eq!(shown(r#"(eval (car (parse-string "(+ 2 3)")))"#), "5");
      assert_eq!(shown(r#"(parse-string "")"#), "()");

      // A parse failure yields #f and populates the error slot.
      let source = r#"(define r (parse-string "(")) (list r (get-last-error-message))"#;
      let (machine, value) = value_of(source);
      let rendered = machine.arena.show(value).to_string();
      assert!(rendered.starts_with("(#f \""), "got {rendered}");
   }

   #[test]
   fn error_slot_reflection() {
      let source = r#"(define r (read-file "/no/such/file.l0"))
                      (list r (get-last-error-message))"#;
      let (machine, value) = value_of(source);
      let rendered = machine.arena.show(value).to_string();
      assert!(rendered.contains("#f"), "got {rendered}");
      assert!(rendered.contains("read-file"), "got {rendered}");
   }

   #[test]
   fn references() {
      assert_eq!(shown("(deref (ref 42))"), "42");
      assert!(error_of("(deref 42)").message.contains("must be a reference"));
   }

   #[test]
   fn macro_table_reflection() {
      let source = "(defmacro when (c b) `(if ,c ,b #f))
                    (list (is-macro? 'when *macro-table*)
                          (is-macro? 'unless *macro-table*)
                          (closure? (get-macro-transformer 'when *macro-table*)))";
      assert_eq!(shown(source), "(#t #f #t)");
   }

   #[test]
   fn recursion_depth_is_bounded() {
      let source = "(define (down n) (if (= n 0) 0 (down (- n 1)))) (down 5000)";
      assert!(error_of(source).message.contains("recursion depth"));
   }

   #[test]
   fn tail_positions_do_not_grow_the_stack() {
      // 2000 nested `if`s, each in tail position. A recursive tail would
      // blow the depth cap long before the innermost literal.
      let mut source = "(if #t ".repeat(2000);
      source.push_str("42");
      source.push_str(&")".repeat(2000));

      assert_eq!(shown(&source), "42");
   }

   #[test]
   fn plain_recursion_stays_within_the_cap() {
      let source = "(define (spin n acc)
                      (if (= n 0) acc (spin (- n 1) (+ acc 1))))
                    (spin 200 0)";
      assert_eq!(shown(source), "200");
   }

   #[test]
   fn evaluating_an_applicable_value_fails() {
      assert!(error_of("(eval (car (list car)))").message.contains("Cannot evaluate"));
   }

   #[test]
   fn print_returns_true() {
      assert_eq!(shown(r#"(print "hi" 42)"#), "#t");
   }

   #[test]
   fn printed_forms_reparse() {
      let (mut machine, value) = value_of("'(1 2.5 #t abc \"s\" (nested ()))");
      let printed = machine.arena.show(value).to_string();

      let reparsed = l0_syntax::parse_all(&mut machine.arena, &printed).unwrap();
      let reparsed = machine.arena.car(reparsed).unwrap();

      assert_eq!(machine.arena.show(reparsed).to_string(), printed);
   }

   #[test]
   fn command_line_args_reflects_argv() {
      let mut machine = Machine::with_args(vec!["in.l0".into(), "out.c".into()]);
      let env = machine.global_env();
      let value = crate::run_program(&mut machine, env, "(command-line-args)").unwrap();

      assert_eq!(machine.arena.show(value).to_string(), "(\"in.l0\" \"out.c\")");
   }
}
