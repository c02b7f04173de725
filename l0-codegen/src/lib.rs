//! The L0 emitter: a macro-expanded program to a C translation unit.
//!
//! The output links against the original C runtime; the `l0_*`/`prim_*`
//! names written here are stable contracts between the emitter and that
//! runtime. Each top-level form becomes one error-checked block in `main`,
//! and expressions become GNU statement-expressions over the runtime's
//! constructors.

use std::fmt::Write as _;

use l0_error::{
   Error,
   Result,
   bail,
};
use l0_value::{
   Arena,
   Value,
   ValueRef,
};

const MAX_EMIT_DEPTH: usize = 100;

const EXPECT_WRITE: &str = "writing to a String cannot fail";

/// L0 operators emitted as direct calls into the runtime's primitive
/// functions. Anything else goes through `l0_apply` on a looked-up value.
static PRIMITIVE_IMPORTS: phf::Map<&'static str, &'static str> = phf::phf_map! {
   "+" => "prim_add",
   "-" => "prim_subtract",
   "*" => "prim_multiply",
   "/" => "prim_divide",
   "=" => "prim_equal",
   "<" => "prim_less_than",
   ">" => "prim_greater_than",
   "cons" => "prim_cons",
   "car" => "prim_car",
   "cdr" => "prim_cdr",
   "pair?" => "prim_pair_q",
   "null?" => "prim_null_q",
   "integer?" => "prim_integer_q",
   "boolean?" => "prim_boolean_q",
   "symbol?" => "prim_symbol_q",
   "string?" => "prim_string_q",
   "float?" => "prim_float_q",
   "string-append" => "prim_string_append",
   "string->symbol" => "prim_string_to_symbol",
   "symbol->string" => "prim_symbol_to_string",
   "print" => "prim_print",
   "read-file" => "prim_read_file",
   "write-file" => "prim_write_file",
   "string-length" => "primitive_string_length",
   "string-ref" => "primitive_string_ref",
   "substring" => "primitive_substring",
   "number->string" => "primitive_number_to_string",
   "eval" => "prim_eval",
   "apply" => "prim_apply",
   "append" => "prim_append",
   "closure?" => "prim_closure_p",
   "command-line-args" => "prim_command_line_args",
   "parse-string" => "prim_parse_string",
   "codegen-program" => "prim_codegen_program",
   "get-last-error-message" => "prim_get_last_error_message",
   "get-last-error-line" => "prim_get_last_error_line",
   "get-last-error-col" => "prim_get_last_error_col",
   "eval-in-compiler-env" => "prim_eval_in_compiler_env",
};

/// Globals the prologue defines before the first block runs. The compiler
/// stages written in L0 expect all four.
const GLOBALS: [(&str, &str); 4] = [
   ("*macro-table*", "nil_value"),
   ("*c-declarations*", "nil_value"),
   ("*c-exports-code*", "nil_value"),
   ("*global-scope-id*", "zero_int"),
];

/// Emits a complete C program for a proper list of macro-expanded
/// top-level forms.
pub fn emit_program(arena: &Arena, program: ValueRef) -> Result<String> {
   let Some(forms) = arena.collect_list(program) else {
      bail!("Code generation requires a proper list of top-level expressions.");
   };

   log::debug!("emitting {count} top-level form(s)", count = forms.len());

   let mut emitter = Emitter {
      arena,
      out: String::with_capacity(8 * 1024),
   };

   emitter.prologue();
   for (index, form) in forms.iter().enumerate() {
      emitter.block(*form, index + 1)?;
   }
   emitter.epilogue();

   Ok(emitter.out)
}

struct Emitter<'a> {
   arena: &'a Arena,
   out:   String,
}

impl Emitter<'_> {
   fn push(&mut self, text: &str) {
      self.out.push_str(text);
   }

   fn prologue(&mut self) {
      self.push(
         "#include <stdio.h>\n\
          #include <stdlib.h>\n\
          #include <stdbool.h>\n\
          #include \"l0_arena.h\"\n\
          #include \"l0_types.h\"\n\
          #include \"l0_parser.h\"\n\
          #include \"l0_env.h\"\n\
          #include \"l0_primitives.h\"\n\
          #include \"l0_eval.h\"\n\n\
          // argc/argv are read back by the command-line-args primitive.\n\
          extern int g_argc;\n\
          extern char **g_argv;\n\n\
          int main(int argc, char *argv[]) {\n    \
          g_argc = argc;\n    \
          g_argv = argv;\n\n    \
          L0_Arena* arena = l0_arena_create(1024 * 1024);\n    \
          if (!arena) { fprintf(stdout, \"Failed to create memory arena.\\n\"); return 1; }\n\n    \
          L0_Env* env = l0_env_create(arena, NULL);\n    \
          if (!env) { fprintf(stdout, \"Failed to create global environment.\\n\"); \
          l0_arena_destroy(arena); return 1; }\n\n    \
          if (!l0_register_primitives(env, arena)) {\n        \
          fprintf(stdout, \"Failed to register primitives.\\n\");\n        \
          l0_arena_destroy(arena);\n        \
          return 1;\n    \
          }\n\n    \
          L0_Value* nil_value = L0_NIL;\n    \
          L0_Value* zero_int = l0_make_integer(arena, 0L);\n",
      );

      for (name, initial) in GLOBALS {
         writeln!(
            self.out,
            "    (void)l0_env_define(env, l0_make_symbol(arena, \"{name}\"), {initial});",
         )
         .expect(EXPECT_WRITE);
      }

      self.push(
         "\n    \
          L0_Value* last_result = L0_NIL;\n    \
          L0_Value* temp_result = NULL;\n    \
          int exit_code = 0;\n    \
          (void)last_result;\n\n",
      );
   }

   fn epilogue(&mut self) {
      self.push(
         "\ncleanup:\n    \
          l0_arena_destroy(arena);\n    \
          return exit_code;\n\
          }\n",
      );
   }

   /// One top-level form: evaluate into `temp_result`, then check the
   /// runtime error slot and bail to cleanup on failure. A top-level
   /// `define` is a statement and yields nil by fiat.
   fn block(&mut self, form: ValueRef, number: usize) -> Result<()> {
      writeln!(self.out, "    // --- Block {number} ---").expect(EXPECT_WRITE);

      if self.is_define(form) {
         self.push("    ");
         self.define_statement(form, 1)?;
         self.push("\n    temp_result = L0_NIL;\n");
      } else {
         self.push("    temp_result = ");
         self.expression(form, 1)?;
         self.push(";\n");
      }

      self.push(
         "    if (temp_result == NULL || l0_parser_error_status != L0_PARSE_OK) {\n        \
          fprintf(stdout, \"Runtime Error: %s\\n\", l0_parser_error_message ? \
          l0_parser_error_message : \"(unknown)\");\n        \
          exit_code = 1;\n        \
          goto cleanup;\n    \
          }\n    \
          last_result = temp_result;\n\n",
      );

      Ok(())
   }

   fn is_define(&self, form: ValueRef) -> bool {
      self.head_symbol(form) == Some("define")
   }

   fn head_symbol(&self, form: ValueRef) -> Option<&str> {
      let Value::Pair(op, _) = self.arena.get(form) else {
         return None;
      };
      let Value::Symbol(symbol) = self.arena.get(op) else {
         return None;
      };
      Some(self.arena.resolve(symbol))
   }

   fn expression(&mut self, expr: ValueRef, depth: usize) -> Result<()> {
      if depth > MAX_EMIT_DEPTH {
         bail!("Maximum recursion depth ({MAX_EMIT_DEPTH}) exceeded in code generation.");
      }

      match self.arena.get(expr) {
         Value::Nil
         | Value::Boolean(_)
         | Value::Integer(_)
         | Value::Float(_)
         | Value::String(_) => self.literal(expr, depth + 1),

         Value::Symbol(symbol) => {
            let name = escape_c(self.arena.resolve(symbol));
            write!(self.out, "l0_env_lookup(env, l0_make_symbol(arena, \"{name}\"))")
               .expect(EXPECT_WRITE);
            Ok(())
         },

         Value::Pair(op, args) => self.combination(expr, op, args, depth),

         other => {
            bail!(
               "Cannot generate code for a value of type {type_name}.",
               type_name = other.type_name(),
            );
         },
      }
   }

   fn combination(
      &mut self,
      expr: ValueRef,
      op: ValueRef,
      args: ValueRef,
      depth: usize,
   ) -> Result<()> {
      let head = self.head_symbol(expr).map(str::to_owned);

      match head.as_deref() {
         Some("quote") => {
            let [quoted] = self.forms_exact(args, "quote")?;
            self.literal(quoted, depth + 1)
         },

         // The post-expansion AST must not need evaluation inside a
         // template; verified rather than expanded.
         Some("quasiquote") => {
            let [template] = self.forms_exact(args, "quasiquote")?;
            if template_needs_evaluation(self.arena, template, 1) {
               bail!(
                  "Code generation for quasiquote with unquote is not supported; expand \
                   macros before emission.",
               );
            }
            self.literal(template, depth + 1)
         },

         Some("if") => {
            let forms = self.proper(args, "if")?;
            let (condition, then_branch, else_branch) = match *forms.as_slice() {
               [condition, then_branch] => (condition, then_branch, None),
               [condition, then_branch, else_branch] => {
                  (condition, then_branch, Some(else_branch))
               },
               _ => bail!("Special form 'if' requires 2 or 3 arguments."),
            };

            self.push("({ L0_Value* cond_val = ");
            self.expression(condition, depth + 1)?;
            self.push("; L0_Value* if_res = L0_NIL; if (L0_IS_TRUTHY(cond_val)) { if_res = ");
            self.expression(then_branch, depth + 1)?;
            self.push("; }");

            match else_branch {
               Some(else_branch) => {
                  self.push(" else { if_res = ");
                  self.expression(else_branch, depth + 1)?;
                  self.push("; }");
               },
               None => self.push(" else { if_res = L0_NIL; }"),
            }

            self.push(" if_res; })");
            Ok(())
         },

         Some("begin") => {
            let forms = self.proper(args, "begin")?;
            if forms.is_empty() {
               self.push("L0_NIL");
               return Ok(());
            }

            self.push("(");
            for (index, form) in forms.iter().enumerate() {
               if index > 0 {
                  self.push(", ");
               }
               self.expression(*form, depth + 1)?;
            }
            self.push(")");
            Ok(())
         },

         Some("define") => {
            // Nested define: a statement-expression yielding nil.
            self.push("({ ");
            self.define_statement(expr, depth + 1)?;
            self.push(" L0_NIL; })");
            Ok(())
         },

         Some("lambda") => {
            let Value::Pair(params, body) = self.arena.get(args) else {
               bail!("Special form 'lambda' requires parameters list and a body.");
            };
            if !self.arena.is_list(params) || !self.arena.get(body).is_pair() {
               bail!("Special form 'lambda' requires parameters list and a body.");
            }

            self.push("({ L0_Value* lambda_params = ");
            self.literal(params, depth + 1)?;
            self.push("; L0_Value* lambda_body = ");
            self.literal(body, depth + 1)?;
            self.push("; l0_make_closure(arena, lambda_params, lambda_body, env); })");
            Ok(())
         },

         _ => {
            if let Some(name) = &head
               && let Some(import) = PRIMITIVE_IMPORTS.get(name.as_str())
            {
               write!(self.out, "{import}(").expect(EXPECT_WRITE);
               self.argument_list(args, depth + 1)?;
               self.push(", env, arena)");
               return Ok(());
            }

            // General application through the runtime.
            self.push("l0_apply(");
            self.expression(op, depth + 1)?;
            self.push(", ");
            self.argument_list(args, depth + 1)?;
            self.push(", env, arena)");
            Ok(())
         },
      }
   }

   /// `(define s v)` and `(define (s p...) body...)` as C statements.
   fn define_statement(&mut self, form: ValueRef, depth: usize) -> Result<()> {
      if depth > MAX_EMIT_DEPTH {
         bail!("Maximum recursion depth ({MAX_EMIT_DEPTH}) exceeded in code generation.");
      }

      let args = self.arena.cdr(form).expect("define form is a pair");
      let Value::Pair(target, rest) = self.arena.get(args) else {
         bail!("Special form 'define' requires a target and a value.");
      };

      match self.arena.get(target) {
         Value::Symbol(symbol) => {
            let [value] = self.forms_exact(rest, "define")?;
            let name = escape_c(self.arena.resolve(symbol));

            self.push("{ L0_Value* define_val = ");
            self.expression(value, depth + 1)?;
            self.push("; if (define_val != NULL && l0_parser_error_status == L0_PARSE_OK) { ");
            write!(
               self.out,
               "(void)l0_env_define(env, l0_make_symbol(arena, \"{name}\"), define_val); ",
            )
            .expect(EXPECT_WRITE);
            self.push("} }");
            Ok(())
         },

         Value::Pair(name, params) => {
            let Value::Symbol(symbol) = self.arena.get(name) else {
               bail!("Function name in definition shorthand must be a symbol.");
            };
            if !self.arena.is_list(params) || !self.arena.get(rest).is_pair() {
               bail!("Function definition requires a parameter list and a body.");
            }

            let name = escape_c(self.arena.resolve(symbol));

            // Desugared to a lambda over the same params and body.
            self.push("{ L0_Value* lambda_val = ({ L0_Value* lambda_params = ");
            self.literal(params, depth + 1)?;
            self.push("; L0_Value* lambda_body = ");
            self.literal(rest, depth + 1)?;
            self.push("; l0_make_closure(arena, lambda_params, lambda_body, env); }); ");
            self.push("if (lambda_val != NULL) { ");
            write!(
               self.out,
               "(void)l0_env_define(env, l0_make_symbol(arena, \"{name}\"), lambda_val); ",
            )
            .expect(EXPECT_WRITE);
            self.push("} }");
            Ok(())
         },

         _ => bail!("First argument to 'define' must be a symbol or a list for function definition."),
      }
   }

   /// A quoted datum as runtime constructor calls.
   fn literal(&mut self, value: ValueRef, depth: usize) -> Result<()> {
      if depth > MAX_EMIT_DEPTH {
         bail!("Maximum recursion depth ({MAX_EMIT_DEPTH}) exceeded in code generation.");
      }

      match self.arena.get(value) {
         Value::Nil => {
            self.push("L0_NIL");
            Ok(())
         },

         Value::Boolean(boolean) => {
            write!(self.out, "l0_make_boolean(arena, {boolean})").expect(EXPECT_WRITE);
            Ok(())
         },

         Value::Integer(n) => {
            write!(self.out, "l0_make_integer(arena, {n}L)").expect(EXPECT_WRITE);
            Ok(())
         },

         Value::Float(n) => {
            // Debug formatting is shortest-roundtrip and always a valid C
            // double literal.
            write!(self.out, "l0_make_float(arena, {n:?})").expect(EXPECT_WRITE);
            Ok(())
         },

         Value::Symbol(symbol) => {
            let name = escape_c(self.arena.resolve(symbol));
            write!(self.out, "l0_make_symbol(arena, \"{name}\")").expect(EXPECT_WRITE);
            Ok(())
         },

         Value::String(content) => {
            let content = escape_c_string(self.arena.text(content));
            write!(self.out, "l0_make_string(arena, \"{content}\")").expect(EXPECT_WRITE);
            Ok(())
         },

         Value::Pair(car, cdr) => {
            self.push("l0_make_pair(arena, ");
            self.literal(car, depth + 1)?;
            self.push(", ");
            self.literal(cdr, depth + 1)?;
            self.push(")");
            Ok(())
         },

         other => {
            bail!(
               "Cannot emit a literal of type {type_name}.",
               type_name = other.type_name(),
            );
         },
      }
   }

   /// Builds the runtime argument list for a call: nested `l0_make_pair`
   /// over the evaluated argument expressions.
   fn argument_list(&mut self, args: ValueRef, depth: usize) -> Result<()> {
      if depth > MAX_EMIT_DEPTH {
         bail!("Maximum recursion depth ({MAX_EMIT_DEPTH}) exceeded in code generation.");
      }

      match self.arena.get(args) {
         Value::Nil => {
            self.push("L0_NIL");
            Ok(())
         },

         Value::Pair(car, cdr) => {
            self.push("l0_make_pair(arena, ");
            self.expression(car, depth + 1)?;
            self.push(", ");
            self.argument_list(cdr, depth + 1)?;
            self.push(")");
            Ok(())
         },

         _ => bail!("Argument list is not a proper list."),
      }
   }

   fn proper(&self, args: ValueRef, form: &str) -> Result<Vec<ValueRef>> {
      self
         .arena
         .collect_list(args)
         .ok_or_else(|| Error::runtime(format!("'{form}' arguments must form a proper list.")))
   }

   fn forms_exact<const N: usize>(&self, args: ValueRef, form: &str) -> Result<[ValueRef; N]> {
      self
         .arena
         .collect_list(args)
         .and_then(|forms| <[ValueRef; N]>::try_from(forms).ok())
         .ok_or_else(|| {
            Error::runtime(format!("Special form '{form}' has the wrong number of arguments."))
         })
   }
}

/// Whether a quasiquote template contains a depth-1 unquote, which the
/// quote-style emission cannot honor.
fn template_needs_evaluation(arena: &Arena, template: ValueRef, level: u32) -> bool {
   let Value::Pair(head, rest) = arena.get(template) else {
      return false;
   };

   if let Value::Symbol(symbol) = arena.get(head) {
      match arena.resolve(symbol) {
         "unquote" | "unquote-splicing" => {
            if level == 1 {
               return true;
            }
            return template_needs_evaluation(arena, rest, level - 1);
         },

         "quasiquote" => return template_needs_evaluation(arena, rest, level + 1),

         _ => {},
      }
   }

   template_needs_evaluation(arena, head, level) || template_needs_evaluation(arena, rest, level)
}

fn escape_c(input: &str) -> String {
   let mut escaped = String::with_capacity(input.len());
   for c in input.chars() {
      match c {
         '\\' => escaped.push_str("\\\\"),
         '"' => escaped.push_str("\\\""),
         c => escaped.push(c),
      }
   }
   escaped
}

fn escape_c_string(input: &str) -> String {
   let mut escaped = String::with_capacity(input.len());
   for c in input.chars() {
      match c {
         '\\' => escaped.push_str("\\\\"),
         '"' => escaped.push_str("\\\""),
         '\n' => escaped.push_str("\\n"),
         c => escaped.push(c),
      }
   }
   escaped
}

#[cfg(test)]
mod tests {
   use super::*;

   fn parse(source: &str) -> (Arena, ValueRef) {
      let mut arena = Arena::new();
      let program = l0_syntax::parse_all(&mut arena, source).expect("fixture must parse");
      (arena, program)
   }

   fn emit(source: &str) -> String {
      let (arena, program) = parse(source);
      emit_program(&arena, program).expect("program must emit")
   }

   #[test]
   fn prologue_and_epilogue_frame_the_program() {
      let code = emit(r#"(print "hi")"#);

      assert!(code.contains("l0_arena_create(1024 * 1024)"));
      assert!(code.contains("l0_register_primitives(env, arena)"));
      assert!(code.contains("\"*macro-table*\""));
      assert!(code.contains("\"*global-scope-id*\""));
      assert!(code.contains("cleanup:"));
      assert!(code.contains("return exit_code;"));
   }

   #[test]
   fn known_primitives_are_direct_calls() {
      let code = emit(r#"(print "hi")"#);
      assert!(code.contains(
         "prim_print(l0_make_pair(arena, l0_make_string(arena, \"hi\"), L0_NIL), env, arena)",
      ));

      let code = emit("(+ 1 2)");
      assert!(code.contains(
         "prim_add(l0_make_pair(arena, l0_make_integer(arena, 1L), l0_make_pair(arena, \
          l0_make_integer(arena, 2L), L0_NIL)), env, arena)",
      ));
   }

   #[test]
   fn unknown_operators_go_through_apply() {
      let code = emit("(frobnicate 1)");
      assert!(code.contains(
         "l0_apply(l0_env_lookup(env, l0_make_symbol(arena, \"frobnicate\"))",
      ));
   }

   #[test]
   fn every_block_checks_the_error_slot() {
      let code = emit("(+ 1 2) (+ 3 4)");
      assert_eq!(code.matches("goto cleanup;").count(), 2);
      assert_eq!(code.matches("last_result = temp_result;").count(), 2);
   }

   #[test]
   fn top_level_define_is_a_statement() {
      let code = emit("(define x 42)");

      assert!(code.contains("{ L0_Value* define_val = l0_make_integer(arena, 42L);"));
      assert!(code.contains("l0_env_define(env, l0_make_symbol(arena, \"x\"), define_val)"));
      assert!(code.contains("temp_result = L0_NIL;"));
   }

   #[test]
   fn function_define_desugars_to_a_closure() {
      let code = emit("(define (id x) x)");

      assert!(code.contains("l0_make_closure(arena, lambda_params, lambda_body, env)"));
      assert!(code.contains("l0_env_define(env, l0_make_symbol(arena, \"id\"), lambda_val)"));
      // The parameter list is a quoted datum.
      assert!(code.contains("l0_make_pair(arena, l0_make_symbol(arena, \"x\"), L0_NIL)"));
   }

   #[test]
   fn if_branches_on_runtime_truthiness() {
      let code = emit("(if #t 1 2)");

      assert!(code.contains("L0_IS_TRUTHY(cond_val)"));
      assert!(code.contains("if_res = l0_make_integer(arena, 1L);"));
      assert!(code.contains("else { if_res = l0_make_integer(arena, 2L); }"));

      let code = emit("(if #t 1)");
      assert!(code.contains("else { if_res = L0_NIL; }"));
   }

   #[test]
   fn begin_is_a_comma_sequence() {
      let code = emit("(begin 1 2)");
      assert!(code.contains("(l0_make_integer(arena, 1L), l0_make_integer(arena, 2L))"));
   }

   #[test]
   fn quoted_data_become_constructor_trees() {
      let code = emit("(quote (1 a))");
      assert!(code.contains(
         "l0_make_pair(arena, l0_make_integer(arena, 1L), l0_make_pair(arena, \
          l0_make_symbol(arena, \"a\"), L0_NIL))",
      ));
   }

   #[test]
   fn quasiquote_without_unquote_emits_as_quote() {
      let code = emit("(quasiquote (1 2))");
      assert!(code.contains("l0_make_pair(arena, l0_make_integer(arena, 1L)"));
   }

   #[test]
   fn residual_unquote_is_rejected() {
      let (arena, program) = parse("(quasiquote (unquote x))");
      let error = emit_program(&arena, program).unwrap_err();
      assert!(error.message.contains("quasiquote"));

      // A nested template whose unquote belongs to an inner quasiquote is
      // fine.
      let code = emit("(quasiquote (quasiquote (unquote x)))");
      assert!(code.contains("l0_make_symbol(arena, \"unquote\")"));
   }

   #[test]
   fn floats_emit_as_roundtrip_literals() {
      let code = emit("(quote 2.5)");
      assert!(code.contains("l0_make_float(arena, 2.5)"));
   }

   #[test]
   fn string_escapes_survive_into_c() {
      let (mut arena, _) = parse("");
      let tricky = arena.string("a\"b\\c\nd");
      let program = arena.list(&[tricky]);

      let code = emit_program(&arena, program).unwrap();
      assert!(code.contains(r#"l0_make_string(arena, "a\"b\\c\nd")"#));
   }

   #[test]
   fn depth_guard_catches_pathological_nesting() {
      let mut arena = Arena::new();

      let mut nested = arena.integer(1);
      for _ in 0..(MAX_EMIT_DEPTH + 8) {
         nested = arena.pair(nested, ValueRef::NIL);
      }
      let quote = arena.symbol("quote");
      let tail = arena.list(&[nested]);
      let form = arena.pair(quote, tail);
      let program = arena.list(&[form]);

      let error = emit_program(&arena, program).unwrap_err();
      assert!(error.message.contains("recursion depth"));
   }
}
