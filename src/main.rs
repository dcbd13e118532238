use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
  /// NASM x86-64 assembly
  Asm,
  /// Syntax tree dump
  Ast,
}

#[derive(Parser)]
#[command(name = "scc", version, about = "Compile a source file to NASM x86-64 assembly")]
struct Cli {
  /// Source file
  file: PathBuf,

  /// Write the output here instead of stdout
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// What to emit
  #[arg(long, value_enum, default_value_t = Emit::Asm)]
  emit: Emit,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let source = match fs::read_to_string(&cli.file) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("{}: {}: {err}", "error".red().bold(), cli.file.display());
      return ExitCode::FAILURE;
    }
  };

  let result = match cli.emit {
    Emit::Asm => scc::generate_assembly(&source),
    Emit::Ast => scc::dump_ast(&source),
  };

  let output = match result {
    Ok(output) => output,
    Err(err) => {
      eprintln!("{} in {}", "error".red().bold(), cli.file.display());
      eprintln!("{}", err.render(&source));
      return ExitCode::FAILURE;
    }
  };

  match &cli.output {
    Some(path) => {
      if let Err(err) = fs::write(path, output) {
        eprintln!("{}: {}: {err}", "error".red().bold(), path.display());
        return ExitCode::FAILURE;
      }
    }
    None => print!("{output}"),
  }
  ExitCode::SUCCESS
}
