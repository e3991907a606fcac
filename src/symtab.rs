//! Symbol tables shared across the pipeline.
//!
//! Both tables are created by the pipeline entry point and outlive the
//! individual stages: the parser is the sole writer of keys, and the
//! generator later fills in each variable's stack slot at its first
//! write. Names are unique within a table.

use std::collections::HashMap;

use crate::error::{AlreadyDeclaredSnafu, CompileResult, UndeclaredSnafu};
use crate::ty::Type;

/// A declared variable. `stack_slot` stays `0` until the generator
/// stores a value for it.
#[derive(Debug, Clone)]
pub struct Variable {
  pub mutable: bool,
  pub ty: Type,
  pub stack_slot: i64,
}

/// A declared function. User functions are emitted under `signature`
/// (`_` + name); intrinsics carry an empty signature and expand inline.
#[derive(Debug, Clone)]
pub struct Function {
  pub mutable: bool,
  pub ty: Type,
  pub signature: String,
  pub num_args: usize,
}

#[derive(Debug, Default)]
pub struct VarTable {
  map: HashMap<String, Variable>,
}

impl VarTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn declare(&mut self, name: &str, mutable: bool, ty: Type) -> CompileResult<()> {
    if self.map.contains_key(name) {
      return AlreadyDeclaredSnafu { name }.fail();
    }
    self.map.insert(
      name.to_string(),
      Variable {
        mutable,
        ty,
        stack_slot: 0,
      },
    );
    Ok(())
  }

  pub fn get(&self, name: &str) -> CompileResult<&Variable> {
    self.map.get(name).ok_or_else(|| UndeclaredSnafu { name }.build())
  }

  pub fn get_mut(&mut self, name: &str) -> CompileResult<&mut Variable> {
    self
      .map
      .get_mut(name)
      .ok_or_else(|| UndeclaredSnafu { name }.build())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.map.contains_key(name)
  }
}

#[derive(Debug)]
pub struct FuncTable {
  map: HashMap<String, Function>,
}

impl FuncTable {
  /// A function table with the two syscall intrinsics pre-installed, so
  /// they are resolvable during parsing and can never be shadowed.
  pub fn with_intrinsics() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "exit".to_string(),
      Function {
        mutable: false,
        ty: Type::Int,
        signature: String::new(),
        num_args: 1,
      },
    );
    map.insert(
      "print".to_string(),
      Function {
        mutable: false,
        ty: Type::Char,
        signature: String::new(),
        num_args: 1,
      },
    );
    Self { map }
  }

  pub fn declare(
    &mut self,
    name: &str,
    mutable: bool,
    ty: Type,
    num_args: usize,
  ) -> CompileResult<()> {
    if self.map.contains_key(name) {
      return AlreadyDeclaredSnafu { name }.fail();
    }
    self.map.insert(
      name.to_string(),
      Function {
        mutable,
        ty,
        signature: format!("_{name}"),
        num_args,
      },
    );
    Ok(())
  }

  pub fn get(&self, name: &str) -> CompileResult<&Function> {
    self.map.get(name).ok_or_else(|| UndeclaredSnafu { name }.build())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.map.contains_key(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;

  #[test]
  fn intrinsics_are_preinstalled_and_unshadowable() {
    let mut funcs = FuncTable::with_intrinsics();
    assert_eq!(funcs.get("exit").unwrap().num_args, 1);
    assert_eq!(funcs.get("print").unwrap().num_args, 1);
    assert!(funcs.get("exit").unwrap().signature.is_empty());

    let err = funcs.declare("print", false, Type::Int, 1).unwrap_err();
    assert!(matches!(err, CompileError::AlreadyDeclared { name } if name == "print"));
  }

  #[test]
  fn user_functions_get_an_underscored_signature() {
    let mut funcs = FuncTable::with_intrinsics();
    funcs.declare("add", false, Type::Int, 2).unwrap();
    assert_eq!(funcs.get("add").unwrap().signature, "_add");
  }

  #[test]
  fn duplicate_variables_are_rejected() {
    let mut vars = VarTable::new();
    vars.declare("x", true, Type::Int).unwrap();
    let err = vars.declare("x", false, Type::Char).unwrap_err();
    assert!(matches!(err, CompileError::AlreadyDeclared { .. }));

    let slot = &mut vars.get_mut("x").unwrap().stack_slot;
    *slot = 3;
    assert_eq!(vars.get("x").unwrap().stack_slot, 3);
  }

  #[test]
  fn missing_names_report_undeclared() {
    let vars = VarTable::new();
    assert!(matches!(
      vars.get("ghost"),
      Err(CompileError::Undeclared { .. })
    ));
  }
}
