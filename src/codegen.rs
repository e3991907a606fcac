//! Code generation: lower the parsed AST into NASM x86-64 assembly.
//!
//! The emitter is a stack machine with a twist: every expression leaves
//! its value pushed, and a variable's storage *is* the push that first
//! wrote it – the simulated stack pointer records which position that
//! was, and later reads address the slot relative to `rbp`. Precedence
//! decides emission order: subtrees that bind at least as tightly as
//! their parent are materialized to the stack first.

use tracing::debug;

use crate::error::{
  CompileResult, IntrinsicInExpressionSnafu, TooManyArgumentsSnafu, UnassignedVariableSnafu,
  UnimplementedIntrinsicSnafu,
};
use crate::parser::{BinaryOp, Expr, FuncDecl, Item, Program, Stmt};
use crate::symtab::{FuncTable, VarTable};
use crate::ty::Type;

/// System V argument registers, in call order. Calls carry at most this
/// many arguments.
const ARG_REGISTERS: [&str; 4] = ["rdi", "rsi", "rdx", "rcx"];

/// Emit the whole program. `main` becomes the `_start` entry point;
/// top-level statements open an implicit one. A default `exit(0)`
/// terminates the text so control can never run off the end.
pub fn generate(
  program: &Program,
  vars: &mut VarTable,
  funcs: &FuncTable,
) -> CompileResult<String> {
  let mut generator = Generator {
    asm: String::new(),
    stack_ptr: 1,
    vars,
    funcs,
  };
  generator.emit_raw("global _start");

  let has_main = program
    .items
    .iter()
    .any(|item| matches!(item, Item::Func(func) if func.name == "main"));

  let mut started = false;
  for item in &program.items {
    match item {
      Item::Func(func) => generator.gen_function(func)?,
      Item::Stmt(stmt) => {
        if !started && !has_main {
          generator.emit_raw("_start:");
          generator.emit("mov rbp, rsp");
          started = true;
        }
        generator.gen_statement(stmt)?;
      }
    }
  }

  if !started && !has_main {
    generator.emit_raw("_start:");
  }
  generator.gen_default_exit();
  Ok(generator.asm)
}

struct Generator<'a> {
  asm: String,
  /// Logical depth of the emitted stack; 1 on function entry, bumped by
  /// pushes, reduced by pops.
  stack_ptr: i64,
  vars: &'a mut VarTable,
  funcs: &'a FuncTable,
}

impl Generator<'_> {
  fn emit_raw(&mut self, line: &str) {
    self.asm.push_str(line);
    self.asm.push('\n');
  }

  fn emit(&mut self, instruction: &str) {
    self.asm.push('\t');
    self.asm.push_str(instruction);
    self.asm.push('\n');
  }

  fn push(&mut self, operand: &str) {
    self.emit(&format!(
      "push {operand}\t\t\t;; stack position: {}",
      self.stack_ptr
    ));
    self.stack_ptr += 1;
  }

  fn pop(&mut self, register: &str) {
    self.emit(&format!("pop {register}"));
    self.stack_ptr -= 1;
  }

  fn gen_function(&mut self, func: &FuncDecl) -> CompileResult<()> {
    debug!(function = %func.name, "generating function");

    if func.params.len() > ARG_REGISTERS.len() {
      return TooManyArgumentsSnafu {
        name: &func.name,
        count: func.params.len(),
        max: ARG_REGISTERS.len(),
      }
      .fail();
    }

    let label = if func.name == "main" {
      "_start".to_string()
    } else {
      self.funcs.get(&func.name)?.signature.clone()
    };
    self.emit_raw(&format!("{label}:"));
    self.emit("push rbp");
    self.emit("mov rbp, rsp");

    let saved = self.stack_ptr;
    self.stack_ptr = 1;

    // Spill arguments in order; each push assigns the parameter's slot.
    for (param, register) in func.params.iter().zip(ARG_REGISTERS) {
      self.vars.get_mut(&param.name)?.stack_slot = self.stack_ptr;
      self.push(register);
    }

    for stmt in &func.body {
      self.gen_statement(stmt)?;
    }

    self.emit("mov rsp, rbp");
    self.emit("pop rbp");
    self.emit("ret");
    self.stack_ptr = saved;
    Ok(())
  }

  fn gen_statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
    debug!(statement = %stmt.describe(), "generating statement");
    match stmt {
      // Takes no code; the slot is assigned at the first write.
      Stmt::Decl(_) => Ok(()),
      Stmt::Assign { target, value } => {
        self.gen_expr(value)?;
        self.store(target.name())
      }
      Stmt::Step { name, value, .. } => {
        self.gen_expr(value)?;
        self.store(name)
      }
      Stmt::Call { name, args } => {
        if let Some(expand) = intrinsic(name) {
          return expand(self, args);
        }
        self.gen_call(name, args)?;
        Ok(())
      }
      Stmt::Return { value } => {
        self.gen_expr(value)?;
        self.pop("rax");
        Ok(())
      }
    }
  }

  /// Store the pushed value on top of the stack into `name`. A first
  /// write adopts the push itself as the variable's slot; later writes
  /// move into the recorded slot without growing the stack.
  fn store(&mut self, name: &str) -> CompileResult<()> {
    let (slot, ty) = {
      let variable = self.vars.get(name)?;
      (variable.stack_slot, variable.ty)
    };

    if slot == 0 {
      let slot = self.stack_ptr - 1;
      self.vars.get_mut(name)?.stack_slot = slot;
      return Ok(());
    }

    self.pop("rax");
    self.emit(&format!(
      "mov {} [rbp - {}], {}",
      word_for(ty),
      8 * slot,
      sized_register("rax", ty)
    ));
    Ok(())
  }

  /// Generate an expression; its value ends up pushed on the stack.
  fn gen_expr(&mut self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::IntLit { value } => {
        self.emit(&format!("mov rax, {}", hex_literal(*value)));
        self.push("rax");
        Ok(())
      }
      Expr::CharLit { value } => {
        self.emit(&format!("mov rax, {}", char_literal(*value)));
        self.push("rax");
        Ok(())
      }
      Expr::Var { name, .. } => {
        self.load_var(name, "rax")?;
        self.push("rax");
        Ok(())
      }
      Expr::Binary { .. } => self.gen_expression(expr),
      Expr::Call { name, args, .. } => {
        if intrinsic(name).is_some() {
          return IntrinsicInExpressionSnafu { name }.fail();
        }
        self.gen_call(name, args)?;
        self.push("rax");
        Ok(())
      }
    }
  }

  /// Evaluate arguments left to right into the fixed register sequence,
  /// then call the function's emitted label. The result is in `rax`.
  fn gen_call(&mut self, name: &str, args: &[Expr]) -> CompileResult<()> {
    if args.len() > ARG_REGISTERS.len() {
      return TooManyArgumentsSnafu {
        name,
        count: args.len(),
        max: ARG_REGISTERS.len(),
      }
      .fail();
    }

    for (arg, register) in args.iter().zip(ARG_REGISTERS) {
      self.gen_expr(arg)?;
      self.pop("rax");
      self.emit(&format!("mov {register}, rax"));
    }

    let signature = self.funcs.get(name)?.signature.clone();
    self.emit(&format!("call {signature}"));
    Ok(())
  }

  /// Precedence-driven emission for an operator node: children binding
  /// at least as tightly as the node go to the stack first, then the
  /// operation collects its operands.
  fn gen_expression(&mut self, expr: &Expr) -> CompileResult<()> {
    let Expr::Binary { op, lhs, rhs, .. } = expr else {
      return Ok(());
    };

    let node_prec = expr.precedence();
    let mut lhs_on_stack = false;
    let mut rhs_on_stack = false;
    if node_prec <= lhs.precedence() {
      self.gen_expression(lhs)?;
      lhs_on_stack = true;
    }
    if node_prec <= rhs.precedence() {
      self.gen_expression(rhs)?;
      rhs_on_stack = true;
    }

    self.gen_binary(*op, lhs, rhs, lhs_on_stack, rhs_on_stack)
  }

  /// Load the operands into `rax`/`rbx` and emit the operation. Operand
  /// sources: stack pops for subtrees, immediates for literals, slot
  /// reads for identifiers.
  fn gen_binary(
    &mut self,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    lhs_on_stack: bool,
    rhs_on_stack: bool,
  ) -> CompileResult<()> {
    // Operands that must travel through the stack but were not emitted
    // by the precedence pass (calls, chiefly) are materialized now,
    // left before right.
    let lhs_now = !lhs_on_stack && needs_stack(lhs);
    let rhs_now = !rhs_on_stack && needs_stack(rhs);
    if lhs_now {
      self.gen_expr(lhs)?;
    }
    if rhs_now {
      self.gen_expr(rhs)?;
    }

    // Pops must come off in reverse push order; the right operand is on
    // top except when the left was materialized after it.
    match (lhs_on_stack || lhs_now, rhs_on_stack || rhs_now) {
      (true, true) => {
        if lhs_now && rhs_on_stack {
          self.pop("rax");
          self.pop("rbx");
        } else {
          self.pop("rbx");
          self.pop("rax");
        }
      }
      (true, false) => {
        self.pop("rax");
        self.load_leaf(rhs, "rbx")?;
      }
      (false, true) => {
        self.pop("rbx");
        self.load_leaf(lhs, "rax")?;
      }
      (false, false) => {
        self.load_leaf(lhs, "rax")?;
        self.load_leaf(rhs, "rbx")?;
      }
    }

    match op {
      BinaryOp::Add => self.emit("add rax, rbx"),
      BinaryOp::Sub => self.emit("sub rax, rbx"),
      BinaryOp::Mul => self.emit("mul rbx"),
      BinaryOp::Div => {
        // `div` divides rdx:rax; the high half must be cleared.
        self.emit("xor rdx, rdx");
        self.emit("div rbx");
      }
    }
    self.push("rax");
    Ok(())
  }

  /// Synthesize a leaf operand directly into a register.
  fn load_leaf(&mut self, expr: &Expr, register: &'static str) -> CompileResult<()> {
    match expr {
      Expr::IntLit { value } => {
        self.emit(&format!("mov {register}, {}", hex_literal(*value)));
        Ok(())
      }
      Expr::CharLit { value } => {
        self.emit(&format!("mov {register}, {}", char_literal(*value)));
        Ok(())
      }
      Expr::Var { name, .. } => self.load_var(name, register),
      _ => {
        self.gen_expr(expr)?;
        self.pop(register);
        Ok(())
      }
    }
  }

  fn load_var(&mut self, name: &str, register: &'static str) -> CompileResult<()> {
    let (slot, ty) = {
      let variable = self.vars.get(name)?;
      (variable.stack_slot, variable.ty)
    };
    if slot == 0 {
      return UnassignedVariableSnafu { name }.fail();
    }
    self.emit(&format!(
      "mov {}, {} [rbp - {}]",
      sized_register(register, ty),
      word_for(ty),
      8 * slot
    ));
    Ok(())
  }

  fn gen_default_exit(&mut self) {
    self.emit("mov rax, 60");
    self.emit("mov rdi, 0");
    self.emit("syscall");
  }
}

fn needs_stack(expr: &Expr) -> bool {
  matches!(expr, Expr::Binary { .. } | Expr::Call { .. })
}

// ----- Intrinsics -----

type IntrinsicFn = fn(&mut Generator<'_>, &[Expr]) -> CompileResult<()>;

/// Registry consulted by call generation; a new intrinsic is a new row
/// here plus its pre-installed function-table entry.
fn intrinsic(name: &str) -> Option<IntrinsicFn> {
  match name {
    "exit" => Some(gen_exit),
    "print" => Some(gen_print),
    _ => None,
  }
}

/// `exit(code)` – syscall 60 with the code in `rdi`.
fn gen_exit(generator: &mut Generator<'_>, args: &[Expr]) -> CompileResult<()> {
  let arg = &args[0];
  if arg.ty() != Type::Int {
    return UnimplementedIntrinsicSnafu {
      name: "exit",
      ty: arg.ty(),
    }
    .fail();
  }
  generator.gen_expr(arg)?;
  generator.pop("rdi");
  generator.emit("mov rax, 60");
  generator.emit("syscall");
  Ok(())
}

/// `print(char)` – write(1, rsp, 1) of the byte left on the stack by
/// the argument.
fn gen_print(generator: &mut Generator<'_>, args: &[Expr]) -> CompileResult<()> {
  let arg = &args[0];
  if arg.ty() != Type::Char {
    return UnimplementedIntrinsicSnafu {
      name: "print",
      ty: arg.ty(),
    }
    .fail();
  }
  generator.gen_expr(arg)?;
  generator.emit("mov rax, 1");
  generator.emit("mov rdi, 1");
  generator.emit("mov rsi, rsp");
  generator.emit("mov rdx, 1");
  generator.emit("syscall");
  generator.pop("rax");
  Ok(())
}

// ----- Operand rendering -----

/// Integer literals use the h-suffix hex form; a leading zero keeps the
/// assembler from reading `FFh` as a symbol.
fn hex_literal(value: i64) -> String {
  let hex = format!("{value:X}h");
  if hex.as_bytes()[0].is_ascii_digit() {
    hex
  } else {
    format!("0{hex}")
  }
}

/// Characters are emitted quoted, except newline which has no printable
/// form and becomes its decimal byte.
fn char_literal(value: char) -> String {
  if value == '\n' {
    "10".to_string()
  } else {
    format!("'{value}'")
  }
}

/// Values of at most two bytes are addressed as words, everything else
/// as qwords; all slots share the 8-byte stack granularity.
fn word_for(ty: Type) -> &'static str {
  match ty.size() {
    Some(size) if size <= 2 => "WORD",
    _ => "QWORD",
  }
}

fn sized_register(register: &'static str, ty: Type) -> &'static str {
  if word_for(ty) == "QWORD" {
    return register;
  }
  match register {
    "rax" => "ax",
    "rbx" => "bx",
    "rdi" => "di",
    _ => register,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn compile(source: &str) -> CompileResult<String> {
    let stream = tokenize(source)?;
    let mut vars = VarTable::new();
    let mut funcs = FuncTable::with_intrinsics();
    let program = parse(stream, &mut vars, &mut funcs)?;
    generate(&program, &mut vars, &funcs)
  }

  fn line_offset(asm: &str, needle: &str) -> usize {
    asm
      .find(needle)
      .unwrap_or_else(|| panic!("'{needle}' not found in:\n{asm}"))
  }

  #[test]
  fn header_entry_and_default_exit() {
    let asm = compile("exit(42)\n").unwrap();
    assert!(asm.starts_with("global _start\n"));
    assert!(asm.contains("_start:\n"));
    assert!(asm.contains("mov rax, 2Ah"));
    assert!(asm.contains("pop rdi"));
    assert!(asm.ends_with("\tmov rax, 60\n\tmov rdi, 0\n\tsyscall\n"));
  }

  #[test]
  fn higher_precedence_subtrees_are_emitted_first() {
    let asm = compile("exit(2 + 3 * 4)\n").unwrap();
    assert!(line_offset(&asm, "mul rbx") < line_offset(&asm, "add rax, rbx"));
    // The product comes back off the stack; the left term is inlined.
    assert!(asm.contains("pop rbx"));
    assert!(asm.contains("mov rax, 2h"));
  }

  #[test]
  fn subtraction_chains_fold_left() {
    let asm = compile("exit(10 - 3 - 2)\n").unwrap();
    let first = line_offset(&asm, "sub rax, rbx");
    let second = asm[first + 1..]
      .find("sub rax, rbx")
      .expect("two subtractions");
    // (10 - 3) materializes first, then the chain pops it back for - 2.
    assert!(line_offset(&asm, "mov rax, 0Ah") < first);
    assert!(asm[first..first + 1 + second].contains("pop rax"));
    assert!(asm.contains("mov rbx, 2h"));
  }

  #[test]
  fn division_clears_the_high_half() {
    let asm = compile("exit(8 / 2)\n").unwrap();
    assert!(line_offset(&asm, "xor rdx, rdx") < line_offset(&asm, "div rbx"));
  }

  #[test]
  fn first_write_adopts_the_push_as_the_slot() {
    let asm = compile("int x = 7\nexit(x)\n").unwrap();
    assert!(asm.contains("mov rax, 7h"));
    assert!(asm.contains(";; stack position: 1"));
    assert!(asm.contains("mov rax, QWORD [rbp - 8]"));
  }

  #[test]
  fn reassignment_moves_into_the_existing_slot() {
    let asm = compile("mut int x = 1\nx = 2\nexit(x)\n").unwrap();
    assert!(asm.contains("mov QWORD [rbp - 8], rax"));
    // Only the declaration grows the stack.
    assert_eq!(asm.matches(";; stack position: 1").count(), 1);
  }

  #[test]
  fn step_statements_read_modify_write() {
    let asm = compile("mut int x = 1\nx++\nexit(x)\n").unwrap();
    assert!(asm.contains("mov rax, QWORD [rbp - 8]"));
    assert!(asm.contains("mov rbx, 1h"));
    assert!(asm.contains("add rax, rbx"));
    assert!(asm.contains("mov QWORD [rbp - 8], rax"));
  }

  #[test]
  fn expression_statements_keep_the_stack_balanced() {
    for source in ["exit(2 + 3 * 4)\n", "print('A')\n", "exit(10 - 3 - 2)\n"] {
      let asm = compile(source).unwrap();
      let pushes = asm.matches("\tpush ").count();
      let pops = asm.matches("\tpop ").count();
      assert_eq!(pushes, pops, "unbalanced stack for {source}:\n{asm}");
    }
  }

  #[test]
  fn functions_get_labels_prologues_and_spilled_arguments() {
    let asm = compile(
      "int add(int a, int b) {\n\treturn a + b\n}\nint main() {\n\texit(add(2, 5))\n}\n",
    )
    .unwrap();

    let add = line_offset(&asm, "_add:");
    let start = line_offset(&asm, "_start:");
    assert!(add < start);

    let body = &asm[add..start];
    assert!(body.contains("push rbp"));
    assert!(body.contains("mov rbp, rsp"));
    assert!(body.contains("push rdi"));
    assert!(body.contains("push rsi"));
    assert!(body.contains("mov rax, QWORD [rbp - 8]"));
    assert!(body.contains("mov rbx, QWORD [rbp - 16]"));
    assert!(body.contains("mov rsp, rbp"));
    assert!(body.contains("pop rbp"));
    assert!(body.contains("ret"));

    let main_body = &asm[start..];
    assert!(main_body.contains("mov rdi, rax"));
    assert!(main_body.contains("mov rsi, rax"));
    assert!(main_body.contains("call _add"));
  }

  #[test]
  fn programs_without_statements_still_get_an_entry_point() {
    let asm = compile("int five() {\n\treturn 5\n}\n").unwrap();
    let start = line_offset(&asm, "_start:");
    assert!(line_offset(&asm, "_five:") < start);
    assert!(asm[start..].contains("mov rax, 60"));
  }

  #[test]
  fn print_writes_the_byte_from_the_stack() {
    let asm = compile("print('A')\n").unwrap();
    assert!(asm.contains("mov rax, 'A'"));
    let write = line_offset(&asm, "mov rsi, rsp");
    assert!(line_offset(&asm, "push rax") < write);
    assert!(asm[write..].contains("pop rax"));
  }

  #[test]
  fn newline_characters_render_as_their_decimal_byte() {
    let asm = compile("print('\\n')\n").unwrap();
    assert!(asm.contains("mov rax, 10\n"));
  }

  #[test]
  fn print_rejects_non_char_arguments() {
    let err = compile("print(5)\n").unwrap_err();
    assert!(matches!(
      err,
      CompileError::UnimplementedIntrinsic { ty: Type::Int, .. }
    ));
  }

  #[test]
  fn intrinsics_cannot_appear_inside_expressions() {
    let err = compile("char c = print('a')\n").unwrap_err();
    assert!(matches!(
      err,
      CompileError::IntrinsicInExpression { name } if name == "print"
    ));
  }

  #[test]
  fn reads_of_unassigned_variables_are_rejected() {
    let err = compile("int x\nexit(x)\n").unwrap_err();
    assert!(matches!(err, CompileError::UnassignedVariable { name } if name == "x"));
  }

  #[test]
  fn more_than_four_parameters_overflow_the_registers() {
    let err =
      compile("int f(int a, int b, int c, int d, int e) {\n\treturn a\n}\n").unwrap_err();
    assert!(matches!(
      err,
      CompileError::TooManyArguments { count: 5, max: 4, .. }
    ));
  }

  #[test]
  fn hex_literals_carry_the_suffix_and_a_leading_digit() {
    assert_eq!(hex_literal(42), "2Ah");
    assert_eq!(hex_literal(10), "0Ah");
    assert_eq!(hex_literal(255), "0FFh");
    assert_eq!(hex_literal(0), "0h");
  }

  #[test]
  fn word_selection_follows_type_size() {
    assert_eq!(word_for(Type::Bool), "WORD");
    assert_eq!(word_for(Type::Int), "QWORD");
    assert_eq!(word_for(Type::Char), "QWORD");
    assert_eq!(sized_register("rax", Type::Bool), "ax");
    assert_eq!(sized_register("rax", Type::Int), "rax");
  }
}
