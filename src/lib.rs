//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be
//! evolved independently:
//! - `tokenizer` performs lexical analysis and produces a token cursor.
//! - `parser` owns all syntactic knowledge, returns the program AST, and
//!   fills the symbol tables as it resolves names.
//! - `codegen` lowers the AST into x86-64 NASM assembly.
//! - `symtab` holds the variable and function tables that outlive the
//!   individual stages.
//! - `error` centralises the error taxonomy shared by the other modules.

pub mod error;
pub mod parser;
pub mod symtab;
pub mod tokenizer;
pub mod ty;

mod codegen;

pub use error::{CompileError, CompileResult};

use std::fs;
use std::path::Path;

use snafu::ResultExt;
use tracing::debug;

use crate::error::IoSnafu;
use crate::symtab::{FuncTable, VarTable};

/// Compile a source string into NASM assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let mut vars = VarTable::new();
  let mut funcs = FuncTable::with_intrinsics();
  let program = parser::parse(tokens, &mut vars, &mut funcs)?;
  debug!("parsed program:\n{}", program.dump());
  codegen::generate(&program, &mut vars, &funcs)
}

/// Read and compile a single source file.
pub fn compile_file(path: &Path) -> CompileResult<String> {
  let source = fs::read_to_string(path).context(IoSnafu {
    path: path.display().to_string(),
  })?;
  generate_assembly(&source)
}
