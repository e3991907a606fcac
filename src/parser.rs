//! Parsing and semantic resolution: token cursor → typed AST.
//!
//! Statement parsing dispatches on leading tokens; expressions use
//! precedence climbing with a minimum-precedence threshold. The parser
//! is also the symbol resolver: declarations install variable and
//! function records as they are parsed, so identifier nodes can mirror
//! the live table entry (type and mutability) at the moment they are
//! built.

use crate::error::{
  ArityMismatchSnafu, AssignToImmutableSnafu, CompileResult, NonIntStepSnafu, TypeMismatchSnafu,
  UnexpectedTokenSnafu, UnrecognizedTokenSnafu,
};
use crate::symtab::{FuncTable, VarTable};
use crate::tokenizer::{Token, TokenKind, TokenStream, describe_token};
use crate::ty::Type;

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl BinaryOp {
  pub fn from_kind(kind: TokenKind) -> Option<BinaryOp> {
    match kind {
      TokenKind::Plus => Some(BinaryOp::Add),
      TokenKind::Minus => Some(BinaryOp::Sub),
      TokenKind::Star => Some(BinaryOp::Mul),
      TokenKind::Slash => Some(BinaryOp::Div),
      _ => None,
    }
  }

  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
    }
  }

  pub fn precedence(self) -> i32 {
    match self {
      BinaryOp::Add | BinaryOp::Sub => 1,
      BinaryOp::Mul | BinaryOp::Div => 2,
    }
  }
}

/// Expression tree produced by the parser.
#[derive(Debug, Clone)]
pub enum Expr {
  IntLit {
    value: i64,
  },
  CharLit {
    value: char,
  },
  Var {
    name: String,
    ty: Type,
    mutable: bool,
  },
  Binary {
    op: BinaryOp,
    ty: Type,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Call {
    name: String,
    ty: Type,
    args: Vec<Expr>,
  },
}

impl Expr {
  pub fn ty(&self) -> Type {
    match self {
      Expr::IntLit { .. } => Type::Int,
      Expr::CharLit { .. } => Type::Char,
      Expr::Var { ty, .. } => *ty,
      Expr::Binary { ty, .. } => *ty,
      Expr::Call { ty, .. } => *ty,
    }
  }

  /// Binding strength used by the generator's emission-order rule: one
  /// above the operator's own precedence for binary nodes, `-1` for
  /// leaves.
  pub fn precedence(&self) -> i32 {
    match self {
      Expr::Binary { op, .. } => op.precedence() + 1,
      _ => -1,
    }
  }

  pub fn is_operator(&self) -> bool {
    matches!(self, Expr::Binary { .. })
  }

  /// Push an assignment's left-hand type into any `Untyped` nodes on
  /// the right-hand side.
  pub fn propagate_type(&mut self, ty: Type) {
    match self {
      Expr::Binary {
        ty: node_ty,
        lhs,
        rhs,
        ..
      } => {
        if *node_ty == Type::Untyped {
          *node_ty = ty;
        }
        lhs.propagate_type(ty);
        rhs.propagate_type(ty);
      }
      Expr::Call { ty: node_ty, .. } => {
        if *node_ty == Type::Untyped {
          *node_ty = ty;
        }
      }
      _ => {}
    }
  }
}

/// A variable binding: name, declared type, mutability.
#[derive(Debug, Clone)]
pub struct VarDecl {
  pub name: String,
  pub ty: Type,
  pub mutable: bool,
}

/// The left side of an assignment: a fresh declaration or an existing
/// mutable binding.
#[derive(Debug, Clone)]
pub enum AssignTarget {
  Decl(VarDecl),
  Var { name: String, ty: Type },
}

impl AssignTarget {
  pub fn name(&self) -> &str {
    match self {
      AssignTarget::Decl(decl) => &decl.name,
      AssignTarget::Var { name, .. } => name,
    }
  }

  pub fn ty(&self) -> Type {
    match self {
      AssignTarget::Decl(decl) => decl.ty,
      AssignTarget::Var { ty, .. } => *ty,
    }
  }
}

#[derive(Debug, Clone)]
pub enum Stmt {
  /// Declaration without an initializer; takes no code, the slot is
  /// assigned at the first write.
  Decl(VarDecl),
  Assign {
    target: AssignTarget,
    value: Expr,
  },
  /// `x++` / `x--`; `value` is the synthesized `x + 1` / `x - 1`.
  Step {
    name: String,
    op: BinaryOp,
    value: Expr,
  },
  Call {
    name: String,
    args: Vec<Expr>,
  },
  Return {
    value: Expr,
  },
}

impl Stmt {
  /// Short label used in generator logging.
  pub fn describe(&self) -> String {
    match self {
      Stmt::Decl(decl) => format!("declare {}", decl.name),
      Stmt::Assign { target, .. } => format!("= {}", target.name()),
      Stmt::Step { name, op, .. } => match op {
        BinaryOp::Add => format!("{name}++"),
        _ => format!("{name}--"),
      },
      Stmt::Call { name, .. } => format!("call {name}"),
      Stmt::Return { .. } => "return".to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
  pub name: String,
  pub ty: Type,
  pub mutable: bool,
  pub params: Vec<VarDecl>,
  pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Item {
  Func(FuncDecl),
  Stmt(Stmt),
}

#[derive(Debug, Clone)]
pub struct Program {
  pub items: Vec<Item>,
}

impl Program {
  /// Indented tree rendering for diagnostics.
  pub fn dump(&self) -> String {
    let mut out = String::from("program\n");
    for item in &self.items {
      match item {
        Item::Func(func) => dump_func(func, &mut out, 1),
        Item::Stmt(stmt) => dump_stmt(stmt, &mut out, 1),
      }
    }
    out
  }
}

fn indent(out: &mut String, depth: usize) {
  for _ in 0..depth {
    out.push_str("  ");
  }
}

fn dump_func(func: &FuncDecl, out: &mut String, depth: usize) {
  indent(out, depth);
  out.push_str(&format!("function {} {}\n", func.name, func.ty));
  for param in &func.params {
    indent(out, depth + 1);
    out.push_str(&format!("param {} {}\n", param.name, param.ty));
  }
  indent(out, depth + 1);
  out.push_str("scope\n");
  for stmt in &func.body {
    dump_stmt(stmt, out, depth + 2);
  }
}

fn dump_stmt(stmt: &Stmt, out: &mut String, depth: usize) {
  indent(out, depth);
  match stmt {
    Stmt::Decl(decl) => out.push_str(&format!("declaration {} {}\n", decl.name, decl.ty)),
    Stmt::Assign { target, value } => {
      out.push_str("statement =\n");
      indent(out, depth + 1);
      match target {
        AssignTarget::Decl(decl) => {
          out.push_str(&format!("declaration {} {}\n", decl.name, decl.ty));
        }
        AssignTarget::Var { name, .. } => out.push_str(&format!("ident {name}\n")),
      }
      dump_expr(value, out, depth + 1);
    }
    Stmt::Step { name, op, .. } => {
      let suffix = match op {
        BinaryOp::Add => "++",
        _ => "--",
      };
      out.push_str(&format!("statement {name}{suffix}\n"));
    }
    Stmt::Call { name, args } => {
      out.push_str(&format!("call {name}\n"));
      for arg in args {
        dump_expr(arg, out, depth + 1);
      }
    }
    Stmt::Return { value } => {
      out.push_str("statement return\n");
      dump_expr(value, out, depth + 1);
    }
  }
}

fn dump_expr(expr: &Expr, out: &mut String, depth: usize) {
  indent(out, depth);
  match expr {
    Expr::IntLit { value } => out.push_str(&format!("term {value}\n")),
    Expr::CharLit { value } => out.push_str(&format!("term {value:?}\n")),
    Expr::Var { name, .. } => out.push_str(&format!("ident {name}\n")),
    Expr::Binary { op, lhs, rhs, .. } => {
      out.push_str(&format!("expr {}\n", op.symbol()));
      dump_expr(lhs, out, depth + 1);
      dump_expr(rhs, out, depth + 1);
    }
    Expr::Call { name, args, .. } => {
      out.push_str(&format!("call {name}\n"));
      for arg in args {
        dump_expr(arg, out, depth + 1);
      }
    }
  }
}

/// A parsed declaration: either a function definition or a statement
/// (declaration with or without initializer).
enum Declared {
  Func(FuncDecl),
  Stmt(Stmt),
}

/// Parse a whole program, filling the symbol tables as a side effect.
pub fn parse(
  mut stream: TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
) -> CompileResult<Program> {
  let mut items = Vec::new();

  skip_newlines(&mut stream)?;
  while !stream.is_eof() {
    let item = match stream.top().kind {
      TokenKind::Mutable | TokenKind::Type => {
        match parse_declaration(&mut stream, vars, funcs)? {
          Declared::Func(func) => Item::Func(func),
          Declared::Stmt(stmt) => Item::Stmt(stmt),
        }
      }
      _ => Item::Stmt(parse_simple_statement(&mut stream, vars, funcs)?),
    };
    items.push(item);
    skip_newlines(&mut stream)?;
  }

  Ok(Program { items })
}

fn skip_newlines(stream: &mut TokenStream) -> CompileResult<()> {
  while stream.top().kind == TokenKind::Newline {
    stream.next()?;
  }
  Ok(())
}

/// Consume the current token if it matches, or fail with what was
/// expected.
fn expect(stream: &mut TokenStream, kind: TokenKind, expected: &str) -> CompileResult<Token> {
  let token = stream.top().clone();
  if token.kind != kind {
    return UnexpectedTokenSnafu {
      expected,
      found: describe_token(&token),
    }
    .fail();
  }
  stream.next()?;
  Ok(token)
}

/// Parse the `[mut|const] <type> <name>` head shared by variable
/// declarations and function parameters. A bare head defaults to
/// immutable.
fn parse_binding(stream: &mut TokenStream) -> CompileResult<VarDecl> {
  let mutable = if stream.top().kind == TokenKind::Mutable {
    let is_mut = stream.top().text == "mut";
    stream.next()?;
    is_mut
  } else {
    false
  };

  let type_token = expect(stream, TokenKind::Type, "a type keyword")?;
  let ty = Type::from_keyword(&type_token.text).ok_or_else(|| {
    UnexpectedTokenSnafu {
      expected: "a type keyword",
      found: type_token.text.clone(),
    }
    .build()
  })?;
  let name = expect(stream, TokenKind::Identifier, "an identifier")?.text;

  Ok(VarDecl { name, ty, mutable })
}

// ----- Declaration parsing -----
fn parse_declaration(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
) -> CompileResult<Declared> {
  let binding = parse_binding(stream)?;

  if stream.top().kind == TokenKind::OpenParen {
    return parse_function(stream, vars, funcs, binding).map(Declared::Func);
  }

  vars.declare(&binding.name, binding.mutable, binding.ty)?;

  if stream.top().kind == TokenKind::Equal {
    stream.next()?;
    let mut value = parse_expression(stream, vars, funcs, 0)?;
    check_assignment_types(binding.ty, &mut value)?;
    return Ok(Declared::Stmt(Stmt::Assign {
      target: AssignTarget::Decl(binding),
      value,
    }));
  }

  Ok(Declared::Stmt(Stmt::Decl(binding)))
}

fn parse_function(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
  binding: VarDecl,
) -> CompileResult<FuncDecl> {
  stream.next()?; // past '('

  let mut params = Vec::new();
  if stream.top().kind != TokenKind::CloseParen {
    loop {
      let param = parse_binding(stream)?;
      vars.declare(&param.name, param.mutable, param.ty)?;
      params.push(param);
      if stream.top().kind == TokenKind::Comma {
        stream.next()?;
        continue;
      }
      break;
    }
  }
  expect(stream, TokenKind::CloseParen, "')'")?;

  // Install the record before the body so the function can call itself.
  funcs.declare(&binding.name, binding.mutable, binding.ty, params.len())?;

  skip_newlines(stream)?;
  expect(stream, TokenKind::OpenBrace, "'{'")?;
  let body = parse_scope(stream, vars, funcs)?;

  Ok(FuncDecl {
    name: binding.name,
    ty: binding.ty,
    mutable: binding.mutable,
    params,
    body,
  })
}

/// Parse statements until the closing `}` of a function body.
fn parse_scope(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
) -> CompileResult<Vec<Stmt>> {
  let mut body = Vec::new();
  loop {
    skip_newlines(stream)?;
    match stream.top().kind {
      TokenKind::CloseBrace => {
        stream.next()?;
        return Ok(body);
      }
      TokenKind::Eof => {
        return UnexpectedTokenSnafu {
          expected: "'}'",
          found: "end of input",
        }
        .fail();
      }
      TokenKind::Mutable | TokenKind::Type => match parse_declaration(stream, vars, funcs)? {
        Declared::Stmt(stmt) => body.push(stmt),
        Declared::Func(func) => {
          return UnexpectedTokenSnafu {
            expected: "a statement",
            found: format!("nested function '{}'", func.name),
          }
          .fail();
        }
      },
      _ => body.push(parse_simple_statement(stream, vars, funcs)?),
    }
  }
}

// ----- Statement parsing -----
fn parse_simple_statement(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
) -> CompileResult<Stmt> {
  match stream.top().kind {
    TokenKind::Return => {
      stream.next()?;
      // The expression may be wrapped in parentheses.
      let value = if stream.top().kind == TokenKind::OpenParen {
        stream.next()?;
        let value = parse_expression(stream, vars, funcs, 0)?;
        expect(stream, TokenKind::CloseParen, "')'")?;
        value
      } else {
        parse_expression(stream, vars, funcs, 0)?
      };
      Ok(Stmt::Return { value })
    }

    TokenKind::StdFunction => {
      let name = stream.top().text.clone();
      stream.next()?;
      let args = parse_call_args(stream, vars, funcs, &name)?;
      Ok(Stmt::Call { name, args })
    }

    TokenKind::Identifier => {
      let name = stream.top().text.clone();
      match stream.peek(1).kind {
        TokenKind::Equal => {
          stream.next()?;
          stream.next()?;
          let (ty, mutable) = {
            let variable = vars.get(&name)?;
            (variable.ty, variable.mutable)
          };
          if !mutable {
            return AssignToImmutableSnafu { name }.fail();
          }
          let mut value = parse_expression(stream, vars, funcs, 0)?;
          check_assignment_types(ty, &mut value)?;
          Ok(Stmt::Assign {
            target: AssignTarget::Var { name, ty },
            value,
          })
        }

        TokenKind::PlusPlus | TokenKind::MinusMinus => {
          let op = if stream.peek(1).kind == TokenKind::PlusPlus {
            BinaryOp::Add
          } else {
            BinaryOp::Sub
          };
          stream.next()?;
          stream.next()?;
          let (ty, mutable) = {
            let variable = vars.get(&name)?;
            (variable.ty, variable.mutable)
          };
          if !mutable {
            return AssignToImmutableSnafu { name }.fail();
          }
          if ty != Type::Int {
            return NonIntStepSnafu { name, ty }.fail();
          }
          let value = Expr::Binary {
            op,
            ty: Type::Int,
            lhs: Box::new(Expr::Var {
              name: name.clone(),
              ty: Type::Int,
              mutable: true,
            }),
            rhs: Box::new(Expr::IntLit { value: 1 }),
          };
          Ok(Stmt::Step { name, op, value })
        }

        TokenKind::OpenParen => {
          stream.next()?;
          let args = parse_call_args(stream, vars, funcs, &name)?;
          Ok(Stmt::Call { name, args })
        }

        _ if funcs.contains(&name) => {
          stream.next()?;
          let args = parse_call_args(stream, vars, funcs, &name)?;
          Ok(Stmt::Call { name, args })
        }

        _ => UnexpectedTokenSnafu {
          expected: "'=', '++', '--', or a call",
          found: describe_token(stream.peek(1)),
        }
        .fail(),
      }
    }

    _ => UnexpectedTokenSnafu {
      expected: "a statement",
      found: describe_token(stream.top()),
    }
    .fail(),
  }
}

/// Assignments require exact type equality; an untyped right side
/// inherits the left side's type instead.
fn check_assignment_types(lhs: Type, value: &mut Expr) -> CompileResult<()> {
  if value.ty() == Type::Untyped {
    value.propagate_type(lhs);
    return Ok(());
  }
  if value.ty() != lhs {
    return TypeMismatchSnafu {
      lhs,
      rhs: value.ty(),
    }
    .fail();
  }
  Ok(())
}

/// Parse a parenthesized, comma-separated argument list and check the
/// count against the callee's arity.
fn parse_call_args(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
  name: &str,
) -> CompileResult<Vec<Expr>> {
  expect(stream, TokenKind::OpenParen, "'('")?;
  let mut args = Vec::new();
  if stream.top().kind != TokenKind::CloseParen {
    loop {
      args.push(parse_expression(stream, vars, funcs, 0)?);
      if stream.top().kind == TokenKind::Comma {
        stream.next()?;
        continue;
      }
      break;
    }
  }
  expect(stream, TokenKind::CloseParen, "')'")?;

  let expected = funcs.get(name)?.num_args;
  if args.len() != expected {
    return ArityMismatchSnafu {
      name,
      expected,
      got: args.len(),
    }
    .fail();
  }
  Ok(args)
}

// ----- Expression parsing -----
/// Precedence climbing. A call in head position is adopted whole along
/// with its return type; everywhere else operands are plain terms.
fn parse_expression(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  funcs: &mut FuncTable,
  min_prec: i32,
) -> CompileResult<Expr> {
  let head = stream.top();
  let is_call = head.kind == TokenKind::StdFunction
    || (head.kind == TokenKind::Identifier
      && funcs.contains(&head.text)
      && stream.peek(1).kind == TokenKind::OpenParen);
  if is_call {
    let name = stream.top().text.clone();
    stream.next()?;
    let args = parse_call_args(stream, vars, funcs, &name)?;
    let ty = funcs.get(&name)?.ty;
    return Ok(Expr::Call { name, ty, args });
  }

  parse_binary(stream, vars, min_prec)
}

fn parse_binary(
  stream: &mut TokenStream,
  vars: &mut VarTable,
  min_prec: i32,
) -> CompileResult<Expr> {
  let mut lhs = parse_term(stream, vars)?;

  loop {
    let kind = stream.top().kind;
    if !kind.is_operator() || kind.precedence() < min_prec {
      break;
    }
    let op = match BinaryOp::from_kind(kind) {
      Some(op) => op,
      None => break,
    };
    stream.next()?;

    // Operands of strictly higher precedence bind to the right side;
    // equal precedence folds left.
    let rhs = parse_binary(stream, vars, op.precedence() + 1)?;
    let ty = lhs.ty();
    lhs = Expr::Binary {
      op,
      ty,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    };
  }

  Ok(lhs)
}

fn parse_term(stream: &mut TokenStream, vars: &mut VarTable) -> CompileResult<Expr> {
  let token = stream.top().clone();
  match token.kind {
    TokenKind::IntLiteral => {
      stream.next()?;
      let value = token
        .value
        .ok_or_else(|| UnrecognizedTokenSnafu { text: &token.text }.build())?;
      Ok(Expr::IntLit { value })
    }
    TokenKind::CharLiteral => {
      stream.next()?;
      let value = token
        .char_value()
        .ok_or_else(|| UnrecognizedTokenSnafu { text: &token.text }.build())?;
      Ok(Expr::CharLit { value })
    }
    TokenKind::Identifier => {
      stream.next()?;
      let variable = vars.get(&token.text)?;
      Ok(Expr::Var {
        name: token.text,
        ty: variable.ty,
        mutable: variable.mutable,
      })
    }
    _ => UnexpectedTokenSnafu {
      expected: "a term",
      found: describe_token(&token),
    }
    .fail(),
  }
}
