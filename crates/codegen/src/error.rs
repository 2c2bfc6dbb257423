use alloc::{string::String, vec::Vec};
use core::fmt::{self, Display};
use kestrel_compiler_core::SourceLocation;
use parking_lot::Mutex;
use ruff_text_size::TextRange;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub struct CodegenError {
    pub location: Option<SourceLocation>,
    pub range: TextRange,
    #[source]
    pub error: CodegenErrorType,
    pub source_path: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// A broken compiler invariant. Reported as a failure of the unit being
/// compiled rather than a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InternalError {
    UnpatchedJump { offset: usize },
    DoublePatch { offset: usize },
    ScopeUnderflow,
    NoFunction,
}

impl Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnpatchedJump { offset } => {
                write!(f, "jump at offset {offset} was never patched")
            }
            Self::DoublePatch { offset } => write!(f, "jump at offset {offset} patched twice"),
            Self::ScopeUnderflow => write!(f, "closed more scopes than were opened"),
            Self::NoFunction => write!(f, "no function is being compiled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodegenErrorType {
    /// Break outside of a loop.
    InvalidBreak,
    /// Continue outside of a loop.
    InvalidContinue,
    /// `break$label`/`continue$label` with no enclosing loop of that label.
    LabelNotFound(String),
    /// Literal text that does not parse as its numeric type.
    InvalidLiteral { kind: &'static str, text: String },
    Redeclaration(String),
    UndefinedLocal(String),
    /// Reassignment of a `val`.
    AssignToValue(String),
    /// Invalid assignment, cannot store value in target.
    Assign(&'static str),
    /// Bare `throw` with no caught value to re-raise.
    BareThrow,
    DeclarationNotAllowed(&'static str),
    InvalidNamespaceBody,
    JumpTooFar,
    TooManyConstants,
    TooManyLocals,
    TooManyUpvalues,
    TooManyArguments,
    /// More distinct `break`/`continue` targets leave one `finally` region
    /// than the pending-action tag can encode.
    TooManyExits,
    Internal(InternalError),
}

impl core::error::Error for CodegenErrorType {}

impl fmt::Display for CodegenErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CodegenErrorType::*;
        match self {
            InvalidBreak => write!(f, "cannot break outside of a loop"),
            InvalidContinue => write!(f, "cannot continue outside of a loop"),
            LabelNotFound(label) => write!(f, "label ${label} does not exist or is not attached to an enclosing loop"),
            InvalidLiteral { kind, text } => write!(f, "invalid {kind} literal `{text}`"),
            Redeclaration(name) => write!(f, "cannot redeclare local `{name}`"),
            UndefinedLocal(name) => write!(f, "undefined local `{name}`"),
            AssignToValue(name) => write!(f, "local value `{name}` cannot be reassigned"),
            Assign(target) => write!(f, "cannot assign to {target}"),
            BareThrow => write!(f, "cannot throw without a value outside of a catch clause"),
            DeclarationNotAllowed(what) => {
                write!(f, "{what} cannot appear in this context")
            }
            InvalidNamespaceBody => write!(
                f,
                "namespace bodies may only contain method definitions and namespace declarations"
            ),
            JumpTooFar => write!(f, "too much code to jump over"),
            TooManyConstants => write!(f, "too many constants in one function"),
            TooManyLocals => write!(f, "too many local variables in one function"),
            TooManyUpvalues => write!(f, "too many captured variables in one closure"),
            TooManyArguments => write!(f, "too many arguments in one call"),
            TooManyExits => write!(f, "too many jumps out of one finally-protected region"),
            Internal(err) => write!(f, "internal compiler error: {err}"),
        }
    }
}

impl From<InternalError> for CodegenErrorType {
    fn from(err: InternalError) -> Self {
        Self::Internal(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WarningType {
    AlwaysTruthy,
    AlwaysFalsy,
    LoopNeverExecutes,
    UnreachableCode,
    ImpossibleEquality { left: String, right: String },
    TautologicalInequality { left: String, right: String },
    UnreachableCatch,
}

impl Display for WarningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use WarningType::*;
        match self {
            AlwaysTruthy => write!(f, "this condition will always have a truthy result"),
            AlwaysFalsy => write!(f, "this condition will always have a falsy result"),
            LoopNeverExecutes => write!(f, "this loop will never execute"),
            UnreachableCode => write!(f, "unreachable code"),
            ImpossibleEquality { left, right } => write!(
                f,
                "this equality check is impossible, `{left}` cannot ever be equal to `{right}`"
            ),
            TautologicalInequality { left, right } => write!(
                f,
                "this inequality check is always true, `{left}` cannot ever be equal to `{right}`"
            ),
            UnreachableCatch => {
                write!(f, "unreachable catch clause, a previous clause catches every value")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Failure,
}

impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// A warning or failure. Rendering is left to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: TextRange,
    pub location: Option<SourceLocation>,
    pub source_path: String,
}

impl Diagnostic {
    pub const fn is_failure(&self) -> bool {
        matches!(self.severity, Severity::Failure)
    }
}

impl From<&CodegenError> for Diagnostic {
    fn from(err: &CodegenError) -> Self {
        Self {
            severity: Severity::Failure,
            message: err.error.to_string(),
            range: err.range,
            location: err.location.clone(),
            source_path: err.source_path.clone(),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_path)?;
        if let Some(location) = &self.location {
            write!(f, ":{}:{}", location.line, location.character_offset)?;
        }
        write!(f, ": {}: {}", self.severity, self.message)
    }
}

/// Append-only list of diagnostics, shared by every unit of a build.
#[derive(Debug, Default)]
pub struct DiagnosticList {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    /// Appends a batch without interleaving it with other writers.
    pub fn extend(&self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.lock().extend(diagnostics);
    }

    pub fn len(&self) -> usize {
        self.diagnostics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<Diagnostic> {
        self.diagnostics.into_inner()
    }
}
