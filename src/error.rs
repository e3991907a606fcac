//! Shared error utilities used across the compilation pipeline.
//!
//! Every failure is fatal at the point of detection – there is no local
//! recovery and no multi-error accumulation. Each variant carries the
//! surface text needed to locate the offending construct in the source.

use snafu::Snafu;

use crate::ty::Type;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  /// A byte run that does not form any known lexeme, including an
  /// unterminated character literal.
  #[snafu(display("unrecognized token: '{text}'"))]
  UnrecognizedToken { text: String },

  /// The token cursor was advanced past the end of the stream.
  #[snafu(display("unexpected end of input"))]
  UnexpectedEof,

  /// Statement dispatch fell through, or a required delimiter is missing.
  #[snafu(display("expected {expected}, but got '{found}'"))]
  UnexpectedToken { expected: String, found: String },

  /// Assignment with unequal types; the language has no implicit
  /// conversions.
  #[snafu(display("type mismatch: cannot assign {rhs} to a binding of type {lhs}"))]
  TypeMismatch { lhs: Type, rhs: Type },

  /// `++`/`--` on a binding that is not an `int`.
  #[snafu(display("'{name}' has type {ty}; '++' and '--' require int"))]
  NonIntStep { name: String, ty: Type },

  #[snafu(display("use of undeclared identifier '{name}'"))]
  Undeclared { name: String },

  #[snafu(display("'{name}' is already declared"))]
  AlreadyDeclared { name: String },

  #[snafu(display("cannot assign to immutable binding '{name}'"))]
  AssignToImmutable { name: String },

  #[snafu(display("'{name}' expects {expected} argument(s), but the call passes {got}"))]
  ArityMismatch {
    name: String,
    expected: usize,
    got: usize,
  },

  /// An intrinsic invoked with an argument type its inline expansion
  /// does not cover.
  #[snafu(display("intrinsic '{name}' is not implemented for {ty}"))]
  UnimplementedIntrinsic { name: String, ty: Type },

  /// Intrinsics expand to raw syscall sequences and have no value to
  /// yield into an enclosing expression.
  #[snafu(display("intrinsic '{name}' cannot be used inside an expression"))]
  IntrinsicInExpression { name: String },

  /// More arguments than the fixed register sequence can carry.
  #[snafu(display("'{name}' takes {count} arguments; at most {max} are supported"))]
  TooManyArguments {
    name: String,
    count: usize,
    max: usize,
  },

  /// A variable read before any value was stored in its stack slot.
  #[snafu(display("variable '{name}' is used before it is assigned"))]
  UnassignedVariable { name: String },

  #[snafu(display("failed to read '{path}': {source}"))]
  Io {
    path: String,
    source: std::io::Error,
  },
}
