// zilc - ZIL to Z-Machine compiler
// Pipeline: ZIL text -> tokens -> AST -> expanded AST -> validated AST
// -> ZAP assembly text -> ZAP AST -> story file bytes.

#![allow(dead_code)]

#[macro_use]
extern crate lazy_static;

pub mod assembler;
pub mod ast;
pub mod codegen;
pub mod codegen_builder;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod macros;
pub mod opcodes;
pub mod parser;
pub mod semantic;
pub mod string_pool;
pub mod zap_parser;

use std::fmt;
use std::path::Path;

pub use error::CompilerError;

/// Z-Machine target version. V1 and V2 are historical and not emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZVersion {
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
}

impl ZVersion {
    pub fn number(&self) -> u8 {
        match self {
            ZVersion::V3 => 3,
            ZVersion::V4 => 4,
            ZVersion::V5 => 5,
            ZVersion::V6 => 6,
            ZVersion::V7 => 7,
            ZVersion::V8 => 8,
        }
    }

    pub fn from_number(n: u8) -> Option<ZVersion> {
        match n {
            3 => Some(ZVersion::V3),
            4 => Some(ZVersion::V4),
            5 => Some(ZVersion::V5),
            6 => Some(ZVersion::V6),
            7 => Some(ZVersion::V7),
            8 => Some(ZVersion::V8),
            _ => None,
        }
    }

    /// `<VERSION ...>` designators used by historical sources.
    pub fn from_designator(name: &str) -> Option<ZVersion> {
        match name {
            "ZIP" => Some(ZVersion::V3),
            "EZIP" => Some(ZVersion::V4),
            "XZIP" => Some(ZVersion::V5),
            "YZIP" => Some(ZVersion::V6),
            other => other.parse::<u8>().ok().and_then(ZVersion::from_number),
        }
    }

    /// Packed address divisor for routine and string addresses.
    pub fn packed_divisor(&self) -> u32 {
        match self {
            ZVersion::V3 => 2,
            ZVersion::V4 | ZVersion::V5 | ZVersion::V6 | ZVersion::V7 => 4,
            ZVersion::V8 => 8,
        }
    }

    /// Maximum story file size in bytes.
    pub fn max_file_size(&self) -> u32 {
        match self {
            ZVersion::V3 => 128 * 1024,
            ZVersion::V4 | ZVersion::V5 => 256 * 1024,
            ZVersion::V6 | ZVersion::V7 | ZVersion::V8 => 512 * 1024,
        }
    }

    /// Highest property number available to objects.
    pub fn max_property(&self) -> u8 {
        match self {
            ZVersion::V3 => 31,
            _ => 63,
        }
    }
}

impl fmt::Display for ZVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Main compiler structure. Each instance owns its own lexer, parser,
/// macro processor, analyzer, string pool and generator state; pipelines
/// compose and can run in parallel, one instance per compilation.
pub struct ZilCompiler {
    version: ZVersion,
    optimization_level: u8,
}

impl Default for ZilCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ZilCompiler {
    pub fn new() -> Self {
        ZilCompiler {
            version: ZVersion::V5,
            optimization_level: 1,
        }
    }

    pub fn with_version(version: ZVersion) -> Self {
        ZilCompiler {
            version,
            optimization_level: 1,
        }
    }

    /// 0 keeps the annotated debug output; 1 and up emit production ZAP
    /// and enable the peephole passes.
    pub fn set_optimization_level(&mut self, level: u8) {
        self.optimization_level = level;
    }

    pub fn version(&self) -> ZVersion {
        self.version
    }

    /// Lex, parse and macro-expand a source string. `INSERT-FILE` is
    /// resolved relative to the working directory.
    pub fn compile_to_declarations(
        &self,
        source: &str,
        file: &str,
    ) -> Result<Vec<ast::ZilDeclaration>, CompilerError> {
        let mut parser = parser::Parser::from_source(source, file)?;
        let declarations = parser.parse_program()?;

        let needs_includes = declarations
            .iter()
            .any(|d| matches!(d, ast::ZilDeclaration::InsertFile(_, _)));
        let declarations = if needs_includes {
            let mut include_stack = Vec::new();
            parser::resolve_includes(declarations, Path::new("."), &mut include_stack)?
        } else {
            declarations
        };

        let macro_processor = macros::MacroProcessor::new();
        let declarations = macro_processor.process_declarations(declarations)?;
        Ok(declarations)
    }

    /// Run semantic analysis over a source string and return the full
    /// diagnostic batch.
    pub fn check(&self, source: &str, file: &str) -> Result<Vec<error::Diagnostic>, CompilerError> {
        let declarations = self.compile_to_declarations(source, file)?;
        let analyzer = semantic::SemanticAnalyzer::new();
        Ok(analyzer.analyze(&declarations))
    }

    /// Compile ZIL source to ZAP assembly text.
    pub fn compile_to_zap(&self, source: &str, file: &str) -> Result<String, CompilerError> {
        let declarations = self.compile_to_declarations(source, file)?;
        self.generate_zap(&declarations)
    }

    /// Compile a ZIL file (with include resolution rooted at the file's
    /// directory) to ZAP assembly text.
    pub fn compile_file_to_zap(&self, path: &Path) -> Result<String, CompilerError> {
        let declarations = parser::parse_file(path)?;
        let macro_processor = macros::MacroProcessor::new();
        let declarations = macro_processor.process_declarations(declarations)?;
        self.generate_zap(&declarations)
    }

    fn generate_zap(
        &self,
        declarations: &[ast::ZilDeclaration],
    ) -> Result<String, CompilerError> {
        let analyzer = semantic::SemanticAnalyzer::new();
        let diagnostics = analyzer.analyze(declarations);
        let mut errors = Vec::new();
        for diagnostic in diagnostics {
            match diagnostic.severity {
                error::Severity::Error => errors.push(diagnostic),
                error::Severity::Warning => log::warn!("{}", diagnostic),
            }
        }
        if !errors.is_empty() {
            return Err(CompilerError::Semantic(errors));
        }

        let mut generator = codegen::ZapCodeGen::new(self.version);
        generator.set_optimization_level(self.optimization_level);
        Ok(generator.generate(declarations)?)
    }

    /// Assemble ZAP text into Z-Machine story file bytes.
    pub fn assemble(&self, zap_source: &str) -> Result<Vec<u8>, CompilerError> {
        let statements = zap_parser::parse_zap(zap_source)?;
        let mut assembler = assembler::Assembler::new(self.version);
        Ok(assembler.assemble(&statements)?)
    }

    /// Full pipeline: ZIL source to story file bytes.
    pub fn compile(&self, source: &str, file: &str) -> Result<Vec<u8>, CompilerError> {
        let zap = self.compile_to_zap(source, file)?;
        self.assemble(&zap)
    }

    /// Full pipeline from a file on disk.
    pub fn compile_file(&self, path: &Path) -> Result<Vec<u8>, CompilerError> {
        let zap = self.compile_file_to_zap(path)?;
        self.assemble(&zap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_version_numbers() {
        assert_eq!(ZVersion::V3.number(), 3);
        assert_eq!(ZVersion::V8.number(), 8);
        assert_eq!(format!("{}", ZVersion::V5), "v5");
    }

    #[test]
    fn test_packed_divisors() {
        assert_eq!(ZVersion::V3.packed_divisor(), 2);
        assert_eq!(ZVersion::V4.packed_divisor(), 4);
        assert_eq!(ZVersion::V5.packed_divisor(), 4);
        assert_eq!(ZVersion::V8.packed_divisor(), 8);
    }

    #[test]
    fn test_version_designators() {
        assert_eq!(ZVersion::from_designator("ZIP"), Some(ZVersion::V3));
        assert_eq!(ZVersion::from_designator("EZIP"), Some(ZVersion::V4));
        assert_eq!(ZVersion::from_designator("XZIP"), Some(ZVersion::V5));
        assert_eq!(ZVersion::from_designator("5"), Some(ZVersion::V5));
        assert_eq!(ZVersion::from_designator("BOGUS"), None);
    }
}
