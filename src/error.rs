// Compiler error types
// Four taxonomies with distinct propagation rules: the lexer/parser fail
// fast per file, macro expansion fails per call site, semantic analysis
// collects diagnostics as a batch, and codegen/assembly fail fast.

use crate::ast::SourceLocation;
use std::fmt;

/// Lexer and parser errors. The first unrecoverable error aborts the
/// current file; a circular include aborts the whole compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken(String, SourceLocation),
    UnexpectedEndOfFile(SourceLocation),
    InvalidSyntax(String, SourceLocation),
    ExpectedAtom(String, SourceLocation),
    ExpectedRoutineName(SourceLocation),
    ExpectedObjectName(SourceLocation),
    ExpectedPropertyName(SourceLocation),
    ExpectedGlobalName(SourceLocation),
    ExpectedConstantName(SourceLocation),
    ExpectedFilename(SourceLocation),
    ExpectedVersionType(SourceLocation),
    ExpectedParameterName(SourceLocation),
    ExpectedObjectProperty(SourceLocation),
    InvalidParameterSection(String, SourceLocation),
    UnknownDeclaration(String, SourceLocation),
    FileNotFound(String, SourceLocation),
    /// Carries the full include chain, ending with the repeated file.
    CircularInclude(Vec<String>, SourceLocation),
}

impl ParseError {
    pub fn location(&self) -> &SourceLocation {
        match self {
            ParseError::UnexpectedToken(_, loc)
            | ParseError::UnexpectedEndOfFile(loc)
            | ParseError::InvalidSyntax(_, loc)
            | ParseError::ExpectedAtom(_, loc)
            | ParseError::ExpectedRoutineName(loc)
            | ParseError::ExpectedObjectName(loc)
            | ParseError::ExpectedPropertyName(loc)
            | ParseError::ExpectedGlobalName(loc)
            | ParseError::ExpectedConstantName(loc)
            | ParseError::ExpectedFilename(loc)
            | ParseError::ExpectedVersionType(loc)
            | ParseError::ExpectedParameterName(loc)
            | ParseError::ExpectedObjectProperty(loc)
            | ParseError::InvalidParameterSection(_, loc)
            | ParseError::UnknownDeclaration(_, loc)
            | ParseError::FileNotFound(_, loc)
            | ParseError::CircularInclude(_, loc) => loc,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken(found, loc) => {
                write!(f, "{}: error: unexpected token '{}'", loc, found)
            }
            ParseError::UnexpectedEndOfFile(loc) => {
                write!(f, "{}: error: unexpected end of file", loc)
            }
            ParseError::InvalidSyntax(msg, loc) => {
                write!(f, "{}: error: invalid syntax: {}", loc, msg)
            }
            ParseError::ExpectedAtom(found, loc) => {
                write!(f, "{}: error: expected atom, found '{}'", loc, found)
            }
            ParseError::ExpectedRoutineName(loc) => {
                write!(f, "{}: error: expected routine name", loc)
            }
            ParseError::ExpectedObjectName(loc) => {
                write!(f, "{}: error: expected object name", loc)
            }
            ParseError::ExpectedPropertyName(loc) => {
                write!(f, "{}: error: expected property name", loc)
            }
            ParseError::ExpectedGlobalName(loc) => {
                write!(f, "{}: error: expected global name", loc)
            }
            ParseError::ExpectedConstantName(loc) => {
                write!(f, "{}: error: expected constant name", loc)
            }
            ParseError::ExpectedFilename(loc) => {
                write!(f, "{}: error: expected file name string", loc)
            }
            ParseError::ExpectedVersionType(loc) => {
                write!(f, "{}: error: expected version designator", loc)
            }
            ParseError::ExpectedParameterName(loc) => {
                write!(f, "{}: error: expected parameter name", loc)
            }
            ParseError::ExpectedObjectProperty(loc) => {
                write!(f, "{}: error: expected object property clause", loc)
            }
            ParseError::InvalidParameterSection(msg, loc) => {
                write!(f, "{}: error: invalid parameter section: {}", loc, msg)
            }
            ParseError::UnknownDeclaration(name, loc) => {
                write!(f, "{}: error: unknown declaration '{}'", loc, name)
            }
            ParseError::FileNotFound(name, loc) => {
                write!(f, "{}: error: file not found: '{}'", loc, name)
            }
            ParseError::CircularInclude(chain, loc) => {
                write!(f, "{}: error: circular include: {}", loc, chain.join(" -> "))
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Macro definition and expansion errors. Evaluator errors surface as
/// `ExpansionError`; not-evaluable expressions are soft and never reach
/// this type.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroError {
    UndefinedMacro(String, SourceLocation),
    ArgumentCountMismatch {
        name: String,
        min: usize,
        max: Option<usize>,
        found: usize,
        location: SourceLocation,
    },
    /// Carries the expansion chain, ending with the re-entered macro.
    RecursiveExpansion(Vec<String>, SourceLocation),
    VariableCapture(String, SourceLocation),
    ExpansionError(String, SourceLocation),
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MacroError::UndefinedMacro(name, loc) => {
                write!(f, "{}: error: undefined macro '{}'", loc, name)
            }
            MacroError::ArgumentCountMismatch {
                name,
                min,
                max,
                found,
                location,
            } => match max {
                Some(max) => write!(
                    f,
                    "{}: error: macro '{}' expects {} to {} arguments, got {}",
                    location, name, min, max, found
                ),
                None => write!(
                    f,
                    "{}: error: macro '{}' expects at least {} arguments, got {}",
                    location, name, min, found
                ),
            },
            MacroError::RecursiveExpansion(chain, loc) => {
                write!(
                    f,
                    "{}: error: recursive macro expansion: {}",
                    loc,
                    chain.join(" -> ")
                )
            }
            MacroError::VariableCapture(name, loc) => {
                write!(f, "{}: error: variable capture of '{}'", loc, name)
            }
            MacroError::ExpansionError(msg, loc) => {
                write!(f, "{}: error: macro expansion failed: {}", loc, msg)
            }
        }
    }
}

impl std::error::Error for MacroError {}

/// Semantic diagnostic codes. These are collected in a batch and are
/// warnings unless the embedder promotes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    UndefinedSymbol,
    SymbolRedefinition,
    TypeMismatch,
    InvalidPropertyAccess,
    InvalidFlagOperation,
    ScopeViolation,
    ParameterCountMismatch,
    CircularDependency,
    UnreachableCode,
    UnusedSymbol,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::UndefinedSymbol => "undefined-symbol",
            DiagnosticCode::SymbolRedefinition => "symbol-redefinition",
            DiagnosticCode::TypeMismatch => "type-mismatch",
            DiagnosticCode::InvalidPropertyAccess => "invalid-property-access",
            DiagnosticCode::InvalidFlagOperation => "invalid-flag-operation",
            DiagnosticCode::ScopeViolation => "scope-violation",
            DiagnosticCode::ParameterCountMismatch => "parameter-count-mismatch",
            DiagnosticCode::CircularDependency => "circular-dependency",
            DiagnosticCode::UnreachableCode => "unreachable-code",
            DiagnosticCode::UnusedSymbol => "unused-symbol",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One semantic finding, rendered as
/// `file:line:column: severity: message (context)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
    /// Enclosing context, e.g. `routine FOO`.
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn warning(
        code: DiagnosticCode,
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Diagnostic {
            code,
            severity: Severity::Warning,
            message: message.into(),
            location,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

/// Code generation errors. The generator fails fast on the first
/// unlowerable expression since downstream state would be inconsistent.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeGenError {
    UnsupportedExpression(String),
    InvalidFunction(String),
    UndefinedSymbol(String),
    InvalidInstruction(String),
    LabelGenerationFailed(String),
    InvalidOperand(String),
    MemoryLayoutError(String),
    VersionIncompatibility(String),
    InvalidControlFlow(String),
    TypeSystemError(String),
    OptimizationError(String),
    CodeGenerationFailed(String),
    InvalidObjectDefinition(String),
    PropertyTableError(String),
    GlobalTableError(String),
    StringTableError(String),
    BranchTargetError(String),
    StackManagementError(String),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodeGenError::UnsupportedExpression(msg) => {
                write!(f, "unsupported expression: {}", msg)
            }
            CodeGenError::InvalidFunction(msg) => write!(f, "invalid function: {}", msg),
            CodeGenError::UndefinedSymbol(msg) => write!(f, "undefined symbol: {}", msg),
            CodeGenError::InvalidInstruction(msg) => write!(f, "invalid instruction: {}", msg),
            CodeGenError::LabelGenerationFailed(msg) => {
                write!(f, "label generation failed: {}", msg)
            }
            CodeGenError::InvalidOperand(msg) => write!(f, "invalid operand: {}", msg),
            CodeGenError::MemoryLayoutError(msg) => write!(f, "memory layout error: {}", msg),
            CodeGenError::VersionIncompatibility(msg) => {
                write!(f, "version incompatibility: {}", msg)
            }
            CodeGenError::InvalidControlFlow(msg) => write!(f, "invalid control flow: {}", msg),
            CodeGenError::TypeSystemError(msg) => write!(f, "type system error: {}", msg),
            CodeGenError::OptimizationError(msg) => write!(f, "optimization error: {}", msg),
            CodeGenError::CodeGenerationFailed(msg) => {
                write!(f, "code generation failed: {}", msg)
            }
            CodeGenError::InvalidObjectDefinition(msg) => {
                write!(f, "invalid object definition: {}", msg)
            }
            CodeGenError::PropertyTableError(msg) => write!(f, "property table error: {}", msg),
            CodeGenError::GlobalTableError(msg) => write!(f, "global table error: {}", msg),
            CodeGenError::StringTableError(msg) => write!(f, "string table error: {}", msg),
            CodeGenError::BranchTargetError(msg) => write!(f, "branch target error: {}", msg),
            CodeGenError::StackManagementError(msg) => {
                write!(f, "stack management error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CodeGenError {}

/// ZAP assembly and instruction encoding errors. The encoder fails fast
/// on malformed instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembleError {
    VersionMismatch {
        mnemonic: String,
        required: u8,
        current: u8,
    },
    BranchTargetOutOfRange(i32),
    UndefinedLabel(String),
    InvalidInstruction(String),
    InvalidOperand(String),
    InvalidDirective(String),
    LayoutError(String),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AssembleError::VersionMismatch {
                mnemonic,
                required,
                current,
            } => write!(
                f,
                "opcode '{}' requires Z-Machine version {}, target is version {}",
                mnemonic, required, current
            ),
            AssembleError::BranchTargetOutOfRange(offset) => {
                write!(f, "branch offset {} out of range (-8192..8191)", offset)
            }
            AssembleError::UndefinedLabel(name) => write!(f, "undefined label '{}'", name),
            AssembleError::InvalidInstruction(msg) => write!(f, "invalid instruction: {}", msg),
            AssembleError::InvalidOperand(msg) => write!(f, "invalid operand: {}", msg),
            AssembleError::InvalidDirective(msg) => write!(f, "invalid directive: {}", msg),
            AssembleError::LayoutError(msg) => write!(f, "layout error: {}", msg),
        }
    }
}

impl std::error::Error for AssembleError {}

/// Umbrella error for the whole pipeline so `?` composes across stages.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilerError {
    Parse(ParseError),
    Macro(MacroError),
    /// Semantic diagnostics promoted to a hard failure by the caller.
    Semantic(Vec<Diagnostic>),
    CodeGen(CodeGenError),
    Assemble(AssembleError),
    Io(String),
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompilerError::Parse(e) => write!(f, "{}", e),
            CompilerError::Macro(e) => write!(f, "{}", e),
            CompilerError::Semantic(diags) => {
                for (i, d) in diags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", d)?;
                }
                Ok(())
            }
            CompilerError::CodeGen(e) => write!(f, "code generation error: {}", e),
            CompilerError::Assemble(e) => write!(f, "assembly error: {}", e),
            CompilerError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<ParseError> for CompilerError {
    fn from(e: ParseError) -> Self {
        CompilerError::Parse(e)
    }
}

impl From<MacroError> for CompilerError {
    fn from(e: MacroError) -> Self {
        CompilerError::Macro(e)
    }
}

impl From<CodeGenError> for CompilerError {
    fn from(e: CodeGenError) -> Self {
        CompilerError::CodeGen(e)
    }
}

impl From<AssembleError> for CompilerError {
    fn from(e: AssembleError) -> Self {
        CompilerError::Assemble(e)
    }
}
