//! `l0c`: the L0 compiler driver.
//!
//! Reads an L0 source file, expands macros (evaluating top-level
//! `defmacro` forms into the compiler environment), emits the C
//! translation, and writes it out. One diagnostic line per failure,
//! prefixed with the failing phase; exit code 1 on any failure.

use std::{
   fmt,
   fmt::Write as _,
   fs,
   path::PathBuf,
   process::ExitCode,
};

use clap::Parser as _;
use l0_error::Error;
use l0_eval::{
   Machine,
   eval,
   macroexpand,
};
use l0_value::{
   Arena,
   Value,
   ValueRef,
};
use yansi::Paint as _;

#[derive(clap::Parser)]
#[command(name = "l0c", version, about)]
struct Cli {
   /// Print every parsed top-level form.
   #[arg(long)]
   dump_ast: bool,

   /// Print every macro-expanded form kept for emission.
   #[arg(long)]
   dump_expanded: bool,

   /// The L0 source file to compile.
   input: PathBuf,

   /// Where to write the generated C translation unit.
   output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
   Parse,
   MacroExpansion,
   Codegen,
   Write,
}

impl fmt::Display for Phase {
   fn fmt(&self, writer: &mut fmt::Formatter<'_>) -> fmt::Result {
      writer.write_str(match self {
         Self::Parse => "parse",
         Self::MacroExpansion => "macro-expansion",
         Self::Codegen => "codegen",
         Self::Write => "write",
      })
   }
}

fn main() -> ExitCode {
   env_logger::init();

   let cli = Cli::parse();

   match compile(&cli) {
      Ok(()) => ExitCode::SUCCESS,

      Err((phase, error)) => {
         report(phase, &error);
         ExitCode::FAILURE
      },
   }
}

/// Diagnostics go to stdout, one line, phase tagged.
fn report(phase: Phase, error: &Error) {
   let mut line = format!(
      "{header} {phase}: {message}",
      header = "error:".red().bold(),
      message = error.message,
   );

   if let Some(position) = error.position {
      let _ = write!(
         line,
         " (line {line}, column {column})",
         line = position.line,
         column = position.column,
      );
   }

   println!("{line}");
}

fn compile(cli: &Cli) -> Result<(), (Phase, Error)> {
   let source = fs::read_to_string(&cli.input).map_err(|error| {
      (
         Phase::Parse,
         Error::runtime(format!(
            "Could not read input file '{input}': {error}",
            input = cli.input.display(),
         )),
      )
   })?;

   let mut machine = Machine::with_args(std::env::args().skip(1).collect());
   let env = machine.global_env();
   machine.clear_error();

   log::info!("parsing {input}", input = cli.input.display());
   let program = l0_syntax::parse_all(&mut machine.arena, &source)
      .map_err(|error| (Phase::Parse, machine.record(error)))?;

   let forms = machine
      .arena
      .collect_list(program)
      .expect("parse_all must return a proper list");

   if cli.dump_ast {
      for &form in &forms {
         println!("{form}", form = machine.arena.show(form));
      }
   }

   // Expand each form in order. Expanded `defmacro` forms are evaluated
   // into the compiler environment so later forms see them, and are
   // withheld from the emitted program.
   log::info!("expanding macros across {count} top-level form(s)", count = forms.len());
   let mut kept = Vec::new();
   for form in forms {
      let expanded = macroexpand(&mut machine, form, env)
         .map_err(|error| (Phase::MacroExpansion, machine.record(error)))?;

      if head_is(&machine.arena, expanded, "defmacro") {
         eval(&mut machine, expanded, env)
            .map_err(|error| (Phase::MacroExpansion, machine.record(error)))?;
         continue;
      }

      kept.push(expanded);
   }

   if cli.dump_expanded {
      for &form in &kept {
         println!("{form}", form = machine.arena.show(form));
      }
   }

   log::info!("generating C for {count} form(s)", count = kept.len());
   let program = machine.arena.list(&kept);
   let code = l0_codegen::emit_program(&machine.arena, program)
      .map_err(|error| (Phase::Codegen, machine.record(error)))?;

   fs::write(&cli.output, &code).map_err(|error| {
      (
         Phase::Write,
         Error::runtime(format!(
            "Could not write output file '{output}': {error}",
            output = cli.output.display(),
         )),
      )
   })?;

   log::info!(
      "wrote {bytes} bytes to {output}",
      bytes = code.len(),
      output = cli.output.display(),
   );
   Ok(())
}

fn head_is(arena: &Arena, form: ValueRef, name: &str) -> bool {
   let Some(op) = arena.car(form) else {
      return false;
   };

   matches!(
      arena.get(op),
      Value::Symbol(symbol) if arena.resolve(symbol) == name
   )
}
