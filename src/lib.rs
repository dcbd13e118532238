//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` turns source text into tokens on demand.
//! - `parser` owns the grammar and builds an `ast::TranslationUnit`.
//! - `decorate` resolves names, types and register bindings, filling the
//!   description slots of the tree and the `scope::SymbolTable` arena.
//! - `codegen` lowers the decorated tree into NASM x86-64 assembly.
//! - `error` holds the diagnostics shared by every stage.

pub mod ast;
pub mod codegen;
pub mod decorate;
pub mod error;
pub mod parser;
pub mod register;
pub mod scope;
pub mod tokenizer;
pub mod ty;

pub use ast::TranslationUnit;
pub use codegen::generate;
pub use error::{CompileError, CompileResult, Position};
pub use parser::parse;
pub use scope::{ScopeStack, SymbolTable};

/// Decorate a parsed unit and hand back the symbol arena codegen reads from.
pub fn decorate<'src>(unit: &mut TranslationUnit<'src>) -> CompileResult<SymbolTable<'src>> {
  let mut scopes = ScopeStack::new();
  unit.decorate(&mut scopes)?;
  Ok(scopes.into_symbols())
}

/// Compile a source string into NASM assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let mut unit = parse(source)?;
  let symbols = decorate(&mut unit)?;
  Ok(generate(&unit, &symbols))
}

/// Parse a source string and render its syntax tree.
pub fn dump_ast(source: &str) -> CompileResult<String> {
  Ok(parse(source)?.dump())
}
