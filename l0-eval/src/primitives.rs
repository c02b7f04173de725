//! The host primitive set.
//!
//! Primitives are registered into the global environment in table order;
//! a [`Value::Primitive`] carries its index into [`PRIMITIVES`]. Every
//! handler receives the evaluated argument list, the calling environment,
//! and the machine.

use std::{
   fmt::Write as _,
   fs,
   io::{
      self,
      Write as _,
   },
};

use l0_error::{
   Error,
   Result,
   bail,
};
use l0_value::{
   Arena,
   EnvRef,
   PrimitiveId,
   Value,
   ValueRef,
};

use crate::{
   Machine,
   eval::{
      self,
      apply_at,
      eval_at,
      scan_macro_table,
   },
};

pub type PrimitiveFn = fn(&mut Machine, ValueRef, EnvRef) -> Result<ValueRef>;

pub struct PrimitiveDef {
   pub name: &'static str,
   pub run:  PrimitiveFn,
}

/// Registration order defines the [`PrimitiveId`] space.
pub static PRIMITIVES: &[PrimitiveDef] = &[
   // List operations.
   PrimitiveDef { name: "cons", run: cons },
   PrimitiveDef { name: "car", run: car },
   PrimitiveDef { name: "cdr", run: cdr },
   PrimitiveDef { name: "list", run: list },
   PrimitiveDef { name: "pair?", run: is_pair },
   PrimitiveDef { name: "null?", run: is_null },
   PrimitiveDef { name: "append", run: append },

   // Arithmetic.
   PrimitiveDef { name: "+", run: add },
   PrimitiveDef { name: "-", run: subtract },
   PrimitiveDef { name: "*", run: multiply },
   PrimitiveDef { name: "/", run: divide },

   // Comparison.
   PrimitiveDef { name: "=", run: numeric_equal },
   PrimitiveDef { name: "<", run: less_than },
   PrimitiveDef { name: ">", run: greater_than },

   // Type predicates.
   PrimitiveDef { name: "integer?", run: is_integer },
   PrimitiveDef { name: "boolean?", run: is_boolean },
   PrimitiveDef { name: "symbol?", run: is_symbol },
   PrimitiveDef { name: "string?", run: is_string },
   PrimitiveDef { name: "float?", run: is_float },
   PrimitiveDef { name: "not", run: not },
   PrimitiveDef { name: "closure?", run: is_closure },

   // Strings.
   PrimitiveDef { name: "string-append", run: string_append },
   PrimitiveDef { name: "string->symbol", run: string_to_symbol },
   PrimitiveDef { name: "symbol->string", run: symbol_to_string },
   PrimitiveDef { name: "string-length", run: string_length },
   PrimitiveDef { name: "string-ref", run: string_ref },
   PrimitiveDef { name: "substring", run: substring },
   PrimitiveDef { name: "number->string", run: number_to_string },

   // I/O and reflection.
   PrimitiveDef { name: "print", run: print },
   PrimitiveDef { name: "read-file", run: read_file },
   PrimitiveDef { name: "write-file", run: write_file },
   PrimitiveDef { name: "command-line-args", run: command_line_args },
   PrimitiveDef { name: "parse-string", run: parse_string },
   PrimitiveDef { name: "codegen-program", run: codegen_program },

   // Error slot accessors.
   PrimitiveDef { name: "get-last-error-message", run: last_error_message },
   PrimitiveDef { name: "get-last-error-line", run: last_error_line },
   PrimitiveDef { name: "get-last-error-col", run: last_error_col },

   // Evaluation.
   PrimitiveDef { name: "eval", run: eval },
   PrimitiveDef { name: "apply", run: apply },
   PrimitiveDef { name: "eval-in-compiler-env", run: eval_in_compiler_env },

   // Macro support.
   PrimitiveDef { name: "is-macro?", run: is_macro },
   PrimitiveDef { name: "get-macro-transformer", run: macro_transformer },

   // References.
   PrimitiveDef { name: "ref", run: reference },
   PrimitiveDef { name: "deref", run: deref },
];

pub(crate) fn run(
   machine: &mut Machine,
   handler: PrimitiveId,
   args: ValueRef,
   env: EnvRef,
) -> Result<ValueRef> {
   (PRIMITIVES[handler.index()].run)(machine, args, env)
}

/// Defines `*macro-table*` (empty) and every primitive in `env`.
pub fn register(machine: &mut Machine, env: EnvRef) {
   let table = machine.arena.intern(eval::MACRO_TABLE);
   env.define(&mut machine.arena, table, ValueRef::NIL);

   for (index, def) in PRIMITIVES.iter().enumerate() {
      let id = PrimitiveId::new(u16::try_from(index).expect("primitive table fits u16"));
      let value = machine.arena.primitive(id, def.name);
      let symbol = machine.arena.intern(def.name);
      env.define(&mut machine.arena, symbol, value);
   }

   log::debug!("registered {count} primitives", count = PRIMITIVES.len());
}

// Argument plumbing.

fn collect_args(arena: &Arena, args: ValueRef, name: &str) -> Result<Vec<ValueRef>> {
   arena.collect_list(args).ok_or_else(|| {
      Error::runtime(format!("Primitive '{name}': Argument list is not a proper list."))
   })
}

fn args_exact<const N: usize>(arena: &Arena, args: ValueRef, name: &str) -> Result<[ValueRef; N]> {
   let forms = collect_args(arena, args, name)?;
   let count = forms.len();

   <[ValueRef; N]>::try_from(forms).map_err(|_| {
      Error::runtime(format!(
         "Primitive '{name}': Expected exactly {N} arguments, got {count}.",
      ))
   })
}

fn string_arg(arena: &Arena, value: ValueRef, name: &str, which: &str) -> Result<String> {
   match arena.get(value) {
      Value::String(content) => Ok(arena.text(content).to_owned()),
      _ => Err(Error::runtime(format!("Primitive '{name}': {which} must be a string."))),
   }
}

#[derive(Clone, Copy)]
enum Number {
   Int(i64),
   Float(f64),
}

impl Number {
   fn as_f64(self) -> f64 {
      match self {
         Self::Int(n) => n as f64,
         Self::Float(n) => n,
      }
   }
}

fn numeric(arena: &Arena, value: ValueRef, name: &str) -> Result<Number> {
   match arena.get(value) {
      Value::Integer(n) => Ok(Number::Int(n)),
      Value::Float(n) => Ok(Number::Float(n)),
      _ => Err(Error::runtime(format!(
         "Primitive '{name}': Expected integer or float argument.",
      ))),
   }
}

fn number_value(machine: &mut Machine, number: Number) -> ValueRef {
   match number {
      Number::Int(n) => machine.arena.integer(n),
      Number::Float(n) => machine.arena.float(n),
   }
}

// List operations.

fn cons(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [car, cdr] = args_exact(&machine.arena, args, "cons")?;
   Ok(machine.arena.pair(car, cdr))
}

fn car(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [pair] = args_exact(&machine.arena, args, "car")?;
   machine
      .arena
      .car(pair)
      .ok_or_else(|| Error::runtime("Primitive 'car': Argument must be a pair."))
}

fn cdr(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [pair] = args_exact(&machine.arena, args, "cdr")?;
   machine
      .arena
      .cdr(pair)
      .ok_or_else(|| Error::runtime("Primitive 'cdr': Argument must be a pair."))
}

fn list(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   // The evaluated argument list already is the result.
   if !machine.arena.is_list(args) {
      bail!("Primitive 'list': Internal error - received improper argument list structure.");
   }
   Ok(args)
}

fn append(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let lists = collect_args(&machine.arena, args, "append")?;
   let Some((&last, init)) = lists.split_last() else {
      return Ok(machine.arena.nil());
   };

   // Every operand before the last is copied; the last is shared.
   let mut elements = Vec::new();
   for &operand in init {
      let Some(items) = machine.arena.collect_list(operand) else {
         bail!("Primitive 'append': All arguments must be lists.");
      };
      elements.extend(items);
   }

   if !machine.arena.is_list(last) {
      bail!("Primitive 'append': All arguments must be lists.");
   }

   let mut result = last;
   for &element in elements.iter().rev() {
      result = machine.arena.pair(element, result);
   }
   Ok(result)
}

// Predicates. Each is a constant-time tag check on one argument.

macro_rules! predicate {
   ($function:ident, $name:literal, $test:ident) => {
      fn $function(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
         let [value] = args_exact(&machine.arena, args, $name)?;
         let result = machine.arena.get(value).$test();
         Ok(machine.arena.boolean(result))
      }
   };
}

predicate!(is_pair, "pair?", is_pair);
predicate!(is_null, "null?", is_nil);
predicate!(is_integer, "integer?", is_integer);
predicate!(is_boolean, "boolean?", is_boolean);
predicate!(is_symbol, "symbol?", is_symbol);
predicate!(is_string, "string?", is_string);
predicate!(is_float, "float?", is_float);
predicate!(is_closure, "closure?", is_closure);

fn not(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "not")?;
   let result = !machine.arena.get(value).is_truthy();
   Ok(machine.arena.boolean(result))
}

// Arithmetic. Integer unless any operand is a float; `/` is always float.

fn add(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "+")?;

   let mut sum = Number::Int(0);
   for operand in operands {
      sum = match (sum, numeric(&machine.arena, operand, "+")?) {
         (Number::Int(a), Number::Int(b)) => Number::Int(a + b),
         (a, b) => Number::Float(a.as_f64() + b.as_f64()),
      };
   }

   Ok(number_value(machine, sum))
}

fn multiply(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "*")?;

   let mut product = Number::Int(1);
   for operand in operands {
      product = match (product, numeric(&machine.arena, operand, "*")?) {
         (Number::Int(a), Number::Int(b)) => Number::Int(a * b),
         (a, b) => Number::Float(a.as_f64() * b.as_f64()),
      };
   }

   Ok(number_value(machine, product))
}

fn subtract(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "-")?;
   let Some((&first, rest)) = operands.split_first() else {
      bail!("Primitive '-': Requires at least one argument.");
   };

   let first = numeric(&machine.arena, first, "-")?;

   if rest.is_empty() {
      let negated = match first {
         Number::Int(n) => Number::Int(-n),
         Number::Float(n) => Number::Float(-n),
      };
      return Ok(number_value(machine, negated));
   }

   let mut difference = first;
   for &operand in rest {
      difference = match (difference, numeric(&machine.arena, operand, "-")?) {
         (Number::Int(a), Number::Int(b)) => Number::Int(a - b),
         (a, b) => Number::Float(a.as_f64() - b.as_f64()),
      };
   }

   Ok(number_value(machine, difference))
}

fn divide(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "/")?;
   let Some((&first, rest)) = operands.split_first() else {
      bail!("Primitive '/': Requires at least one argument.");
   };

   let first = numeric(&machine.arena, first, "/")?.as_f64();

   if rest.is_empty() {
      if first == 0.0 {
         bail!("Primitive '/': Division by zero (1/0).");
      }
      return Ok(machine.arena.float(1.0 / first));
   }

   let mut quotient = first;
   for &operand in rest {
      let divisor = numeric(&machine.arena, operand, "/")?.as_f64();
      if divisor == 0.0 {
         bail!("Primitive '/': Division by zero.");
      }
      quotient /= divisor;
   }

   Ok(machine.arena.float(quotient))
}

// Comparison. Numeric, by value, across integers and floats.

fn numeric_equal(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "=")?;
   let Some((&first, rest)) = operands.split_first() else {
      return Ok(machine.arena.boolean(true));
   };

   // Non-numeric operands are simply not numerically equal.
   let Ok(first) = numeric(&machine.arena, first, "=") else {
      return Ok(machine.arena.boolean(false));
   };

   for &operand in rest {
      let Ok(next) = numeric(&machine.arena, operand, "=") else {
         return Ok(machine.arena.boolean(false));
      };

      if first.as_f64() != next.as_f64() {
         return Ok(machine.arena.boolean(false));
      }
   }

   Ok(machine.arena.boolean(true))
}

fn less_than(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   ordered(machine, args, "<", |previous, next| previous < next)
}

fn greater_than(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   ordered(machine, args, ">", |previous, next| previous > next)
}

fn ordered(
   machine: &mut Machine,
   args: ValueRef,
   name: &str,
   holds: fn(f64, f64) -> bool,
) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, name)?;
   let Some((&first, rest)) = operands.split_first() else {
      return Ok(machine.arena.boolean(true));
   };

   let mut previous = numeric(&machine.arena, first, name)?.as_f64();
   for &operand in rest {
      let next = numeric(&machine.arena, operand, name)?.as_f64();
      if !holds(previous, next) {
         return Ok(machine.arena.boolean(false));
      }
      previous = next;
   }

   Ok(machine.arena.boolean(true))
}

// Strings.

fn string_append(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "string-append")?;

   let mut concatenated = String::new();
   for operand in operands {
      let Value::String(content) = machine.arena.get(operand) else {
         bail!("Primitive 'string-append': All arguments must be strings.");
      };
      concatenated.push_str(machine.arena.text(content));
   }

   Ok(machine.arena.string(&concatenated))
}

fn string_to_symbol(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "string->symbol")?;
   let name = string_arg(&machine.arena, value, "string->symbol", "Argument")?;
   Ok(machine.arena.symbol(&name))
}

fn symbol_to_string(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "symbol->string")?;
   let Value::Symbol(symbol) = machine.arena.get(value) else {
      bail!("Primitive 'symbol->string': Argument must be a symbol.");
   };

   let name = machine.arena.resolve(symbol).to_owned();
   Ok(machine.arena.string(&name))
}

fn string_length(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "string-length")?;
   let content = string_arg(&machine.arena, value, "string-length", "Argument")?;
   Ok(machine.arena.integer(content.len() as i64))
}

fn string_ref(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value, index] = args_exact(&machine.arena, args, "string-ref")?;
   let content = string_arg(&machine.arena, value, "string-ref", "First argument")?;

   let Value::Integer(k) = machine.arena.get(index) else {
      bail!("Primitive 'string-ref': Second argument must be an integer index.");
   };

   let byte = usize::try_from(k)
      .ok()
      .and_then(|k| content.as_bytes().get(k).copied());

   match byte {
      Some(byte) => Ok(machine.arena.integer(i64::from(byte))),
      None => {
         bail!(
            "Primitive 'string-ref': Index {k} out of bounds for string of length {len}.",
            len = content.len(),
         );
      },
   }
}

fn substring(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let operands = collect_args(&machine.arena, args, "substring")?;
   if operands.len() != 2 && operands.len() != 3 {
      bail!("Primitive 'substring': Expected 2 or 3 arguments (string start [end]).");
   }

   let content = string_arg(&machine.arena, operands[0], "substring", "First argument")?;

   let Value::Integer(start) = machine.arena.get(operands[1]) else {
      bail!("Primitive 'substring': Second argument (start) must be an integer.");
   };

   let end = match operands.get(2) {
      None => content.len() as i64,
      Some(&end_value) => {
         match machine.arena.get(end_value) {
            Value::Integer(end) => end,
            _ => bail!("Primitive 'substring': Third argument (end) must be an integer if provided."),
         }
      },
   };

   let len = content.len();
   let valid = start >= 0 && end >= start && end <= len as i64;
   if !valid {
      bail!("Primitive 'substring': Index out of bounds (start={start}, end={end}, len={len}).");
   }

   let Some(slice) = content.get(start as usize..end as usize) else {
      bail!("Primitive 'substring': Indices must fall on character boundaries.");
   };

   let slice = slice.to_owned();
   Ok(machine.arena.string(&slice))
}

fn number_to_string(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "number->string")?;

   let text = match machine.arena.get(value) {
      Value::Integer(n) => n.to_string(),
      Value::Float(n) => n.to_string(),
      _ => bail!("Primitive 'number->string': Argument must be an integer or float."),
   };

   Ok(machine.arena.string(&text))
}

// I/O and reflection.

fn print(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let values = collect_args(&machine.arena, args, "print")?;

   let mut line = String::new();
   for (index, value) in values.into_iter().enumerate() {
      if index > 0 {
         line.push(' ');
      }
      let _ = write!(line, "{}", machine.arena.show(value));
   }

   println!("{line}");
   let _ = io::stdout().flush();

   Ok(machine.arena.boolean(true))
}

fn read_file(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [path] = args_exact(&machine.arena, args, "read-file")?;
   let path = string_arg(&machine.arena, path, "read-file", "Argument")?;

   match fs::read_to_string(&path) {
      Ok(content) => Ok(machine.arena.string(&content)),

      Err(_) => {
         machine.record(Error::runtime(format!(
            "Primitive 'read-file': Could not open file '{path}'.",
         )));
         Ok(machine.arena.boolean(false))
      },
   }
}

fn write_file(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [path, content] = args_exact(&machine.arena, args, "write-file")?;
   let path = string_arg(&machine.arena, path, "write-file", "First argument")?;
   let content = string_arg(&machine.arena, content, "write-file", "Second argument")?;

   match fs::write(&path, content) {
      Ok(()) => Ok(machine.arena.boolean(true)),

      Err(_) => {
         machine.record(Error::runtime(format!(
            "Primitive 'write-file': Error writing to file '{path}'.",
         )));
         Ok(machine.arena.boolean(false))
      },
   }
}

fn command_line_args(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [] = args_exact(&machine.arena, args, "command-line-args")?;

   let argv = machine.argv().to_vec();
   let mut list = machine.arena.nil();
   for argument in argv.iter().rev() {
      let string = machine.arena.string(argument);
      list = machine.arena.pair(string, list);
   }

   Ok(list)
}

fn parse_string(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [source] = args_exact(&machine.arena, args, "parse-string")?;
   let source = string_arg(&machine.arena, source, "parse-string", "Argument")?;

   machine.clear_error();
   match l0_syntax::parse_all(&mut machine.arena, &source) {
      Ok(forms) => Ok(forms),

      Err(error) => {
         machine.record(error);
         Ok(machine.arena.boolean(false))
      },
   }
}

fn codegen_program(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [program] = args_exact(&machine.arena, args, "codegen-program")?;

   if !machine.arena.is_list(program) {
      bail!("Primitive 'codegen-program': Argument must be a list (program AST).");
   }

   match l0_codegen::emit_program(&machine.arena, program) {
      Ok(code) => Ok(machine.arena.string(&code)),

      Err(error) => {
         machine.record(error);
         Ok(machine.arena.boolean(false))
      },
   }
}

// Error slot accessors.

fn last_error_message(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [] = args_exact(&machine.arena, args, "get-last-error-message")?;

   match machine.last_error().map(|error| error.message.clone()) {
      Some(message) => Ok(machine.arena.string(&message)),
      None => Ok(machine.arena.boolean(false)),
   }
}

fn last_error_line(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [] = args_exact(&machine.arena, args, "get-last-error-line")?;

   let line = machine
      .last_error()
      .and_then(|error| error.position)
      .map_or(0, |position| i64::from(position.line));
   Ok(machine.arena.integer(line))
}

fn last_error_col(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [] = args_exact(&machine.arena, args, "get-last-error-col")?;

   let column = machine
      .last_error()
      .and_then(|error| error.position)
      .map_or(0, |position| i64::from(position.column));
   Ok(machine.arena.integer(column))
}

// Evaluation.

fn eval(machine: &mut Machine, args: ValueRef, env: EnvRef) -> Result<ValueRef> {
   let [expr] = args_exact(&machine.arena, args, "eval")?;
   eval_at(machine, expr, env, 0)
}

fn apply(machine: &mut Machine, args: ValueRef, env: EnvRef) -> Result<ValueRef> {
   let [function, arguments] = args_exact(&machine.arena, args, "apply")?;

   let applicable = machine.arena.get(function);
   if !applicable.is_primitive() && !applicable.is_closure() {
      bail!("Primitive 'apply': First argument must be a function (closure or primitive).");
   }

   if !machine.arena.is_list(arguments) {
      bail!("Primitive 'apply': Second argument must be a proper list of arguments.");
   }

   apply_at(machine, function, arguments, env, 0)
}

fn eval_in_compiler_env(machine: &mut Machine, args: ValueRef, env: EnvRef) -> Result<ValueRef> {
   let [expr] = args_exact(&machine.arena, args, "eval-in-compiler-env")?;

   // Inside a macro transformer the current environment is the compiler's.
   eval_at(machine, expr, env, 0)
}

// Macro support.

fn is_macro(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [name, table] = args_exact(&machine.arena, args, "is-macro?")?;

   let Value::Symbol(name) = machine.arena.get(name) else {
      return Ok(machine.arena.boolean(false));
   };

   if !machine.arena.is_list(table) {
      bail!("Primitive 'is-macro?': Second argument (table) must be a list.");
   }

   let found = scan_macro_table(&machine.arena, table, name).is_some();
   Ok(machine.arena.boolean(found))
}

fn macro_transformer(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [name, table] = args_exact(&machine.arena, args, "get-macro-transformer")?;

   let Value::Symbol(name) = machine.arena.get(name) else {
      bail!("Primitive 'get-macro-transformer': First argument must be a symbol.");
   };

   if !machine.arena.is_list(table) {
      bail!("Primitive 'get-macro-transformer': Second argument (table) must be a list.");
   }

   match scan_macro_table(&machine.arena, table, name) {
      Some(transformer) if machine.arena.get(transformer).is_closure() => Ok(transformer),
      _ => Ok(machine.arena.boolean(false)),
   }
}

// References.

fn reference(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "ref")?;
   Ok(machine.arena.reference(value))
}

fn deref(machine: &mut Machine, args: ValueRef, _env: EnvRef) -> Result<ValueRef> {
   let [value] = args_exact(&machine.arena, args, "deref")?;

   match machine.arena.get(value) {
      Value::Ref(referred) => Ok(referred),
      _ => bail!("Primitive 'deref': Argument must be a reference (&T)."),
   }
}
