// ZIL Recursive Descent Parser
// Builds a flat, ordered list of declarations from the token stream and
// resolves <INSERT-FILE ...> by splicing included files in place.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenKind};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        // Comments never influence the grammar; drop them up front.
        let tokens = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::LineComment(_)))
            .collect();
        Parser { tokens, current: 0 }
    }

    pub fn from_source(source: &str, file: &str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(source, file);
        let tokens = lexer.tokenize_all()?;
        Ok(Parser::new(tokens))
    }

    /// Parse every top-level declaration. `<INSERT-FILE ...>` nodes are kept
    /// in place; callers that work from the filesystem use
    /// [`parse_file`] / [`resolve_includes`] to splice them.
    pub fn parse_program(&mut self) -> Result<Vec<ZilDeclaration>, ParseError> {
        let mut declarations = Vec::new();

        loop {
            match &self.peek().kind {
                TokenKind::EndOfFile => break,
                // Standalone strings at top level are file banners; skip.
                TokenKind::String(_) => {
                    self.advance();
                }
                TokenKind::LeftAngle => {
                    declarations.push(self.parse_declaration()?);
                }
                _ => {
                    let token = self.peek().clone();
                    return Err(ParseError::UnexpectedToken(token.text, token.location));
                }
            }
        }

        Ok(declarations)
    }

    fn parse_declaration(&mut self) -> Result<ZilDeclaration, ParseError> {
        let open = self.expect(TokenKind::LeftAngle)?;
        let location = open.location.clone();

        let keyword = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => {
                let token = self.peek().clone();
                return Err(ParseError::ExpectedAtom(token.text, token.location));
            }
        };
        self.advance();

        match keyword.as_str() {
            "ROUTINE" => self.parse_routine(location),
            "OBJECT" | "ROOM" => self.parse_object(location),
            "SETG" | "GLOBAL" => self.parse_global(location),
            "PROPDEF" => self.parse_propdef(location),
            "CONSTANT" => self.parse_constant(location),
            "INSERT-FILE" => self.parse_insert_file(location),
            "VERSION" => self.parse_version(location),
            "PRINC" => self.parse_princ(location),
            "SNAME" => self.parse_sname(location),
            "SET" => self.parse_set(location),
            "DIRECTIONS" => {
                let names = self.parse_atom_list()?;
                self.expect(TokenKind::RightAngle)?;
                Ok(ZilDeclaration::Directions(names, location))
            }
            "SYNTAX" => {
                let mut parts = Vec::new();
                while !self.check(&TokenKind::RightAngle) {
                    parts.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RightAngle)?;
                Ok(ZilDeclaration::Syntax(parts, location))
            }
            "SYNONYM" => {
                let names = self.parse_atom_list()?;
                self.expect(TokenKind::RightAngle)?;
                Ok(ZilDeclaration::Synonym(names, location))
            }
            "DEFMAC" => self.parse_defmac(location),
            "BUZZ" => {
                let names = self.parse_atom_list()?;
                self.expect(TokenKind::RightAngle)?;
                Ok(ZilDeclaration::Buzz(names, location))
            }
            _ => {
                // Parse out the rest of the form so the error is local and
                // parsing could resume after it.
                while !self.check(&TokenKind::RightAngle) {
                    if self.check(&TokenKind::EndOfFile) {
                        return Err(ParseError::UnexpectedEndOfFile(
                            self.peek().location.clone(),
                        ));
                    }
                    self.parse_expression()?;
                }
                self.expect(TokenKind::RightAngle)?;
                Err(ParseError::UnknownDeclaration(keyword, location))
            }
        }
    }

    fn parse_routine(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedRoutineName(self.peek().location.clone())),
        };
        self.advance();

        self.expect(TokenKind::LeftParen)?;
        let (parameters, optional_parameters, auxiliary_variables) =
            self.parse_parameter_sections()?;

        let mut body = Vec::new();
        while !self.check(&TokenKind::RightAngle) {
            if self.check(&TokenKind::EndOfFile) {
                return Err(ParseError::UnexpectedEndOfFile(self.peek().location.clone()));
            }
            body.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RightAngle)?;

        let routine = RoutineDecl {
            name,
            parameters,
            optional_parameters,
            auxiliary_variables,
            body,
            location: location.clone(),
        };

        // Z-Machine routines carry at most 15 locals.
        if routine.local_slot_count() > 15 {
            return Err(ParseError::InvalidSyntax(
                format!(
                    "routine {} declares {} local slots; the Z-Machine allows 15",
                    routine.name,
                    routine.local_slot_count()
                ),
                location,
            ));
        }

        Ok(ZilDeclaration::Routine(routine))
    }

    /// Parameter list with `"OPT"` and `"AUX"` section markers.
    /// Defaults are forbidden in the required section.
    fn parse_parameter_sections(
        &mut self,
    ) -> Result<(Vec<String>, Vec<Parameter>, Vec<Parameter>), ParseError> {
        #[derive(PartialEq)]
        enum Section {
            Required,
            Optional,
            Auxiliary,
        }

        let mut section = Section::Required;
        let mut required = Vec::new();
        let mut optional = Vec::new();
        let mut auxiliary = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RightParen => {
                    self.advance();
                    break;
                }
                TokenKind::String(marker) => {
                    self.advance();
                    match marker.as_str() {
                        "OPT" | "OPTIONAL" => section = Section::Optional,
                        "AUX" | "EXTRA" => section = Section::Auxiliary,
                        other => {
                            return Err(ParseError::InvalidParameterSection(
                                format!("unknown section marker \"{}\"", other),
                                token.location,
                            ));
                        }
                    }
                }
                TokenKind::Atom(name) => {
                    self.advance();
                    match section {
                        Section::Required => required.push(name.clone()),
                        Section::Optional => optional.push(Parameter {
                            name: name.clone(),
                            default: None,
                        }),
                        Section::Auxiliary => auxiliary.push(Parameter {
                            name: name.clone(),
                            default: None,
                        }),
                    }
                }
                TokenKind::LeftParen => {
                    if section == Section::Required {
                        return Err(ParseError::InvalidParameterSection(
                            "default values are not allowed for required parameters".to_string(),
                            token.location,
                        ));
                    }
                    self.advance();
                    let name = match &self.peek().kind {
                        TokenKind::Atom(name) => name.clone(),
                        _ => {
                            return Err(ParseError::ExpectedParameterName(
                                self.peek().location.clone(),
                            ))
                        }
                    };
                    self.advance();
                    let default = self.parse_expression()?;
                    self.expect(TokenKind::RightParen)?;
                    let parameter = Parameter {
                        name,
                        default: Some(default),
                    };
                    match section {
                        Section::Optional => optional.push(parameter),
                        Section::Auxiliary => auxiliary.push(parameter),
                        Section::Required => unreachable!(),
                    }
                }
                TokenKind::EndOfFile => {
                    return Err(ParseError::UnexpectedEndOfFile(token.location));
                }
                _ => {
                    return Err(ParseError::ExpectedParameterName(token.location));
                }
            }
        }

        Ok((required, optional, auxiliary))
    }

    fn parse_object(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedObjectName(self.peek().location.clone())),
        };
        self.advance();

        let mut properties = Vec::new();
        while !self.check(&TokenKind::RightAngle) {
            if self.check(&TokenKind::EndOfFile) {
                return Err(ParseError::UnexpectedEndOfFile(self.peek().location.clone()));
            }
            self.expect(TokenKind::LeftParen)?;
            let prop_name = match &self.peek().kind {
                TokenKind::Atom(name) => name.clone(),
                _ => {
                    return Err(ParseError::ExpectedObjectProperty(
                        self.peek().location.clone(),
                    ))
                }
            };
            self.advance();

            let mut values = Vec::new();
            while !self.check(&TokenKind::RightParen) {
                if self.check(&TokenKind::EndOfFile) {
                    return Err(ParseError::UnexpectedEndOfFile(self.peek().location.clone()));
                }
                values.push(self.parse_expression()?);
            }
            self.expect(TokenKind::RightParen)?;

            // Multi-value property forms are wrapped in a list; a single
            // value stays bare. Order is preserved, duplicates allowed.
            let value = match values.len() {
                1 => values.into_iter().next().unwrap(),
                _ => ZilExpression::List(values),
            };
            properties.push(ObjectProperty {
                name: prop_name,
                value,
            });
        }
        self.expect(TokenKind::RightAngle)?;

        Ok(ZilDeclaration::Object(ObjectDecl {
            name,
            properties,
            location,
        }))
    }

    fn parse_global(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedGlobalName(self.peek().location.clone())),
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Global(GlobalDecl {
            name,
            value,
            location,
        }))
    }

    fn parse_propdef(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedPropertyName(self.peek().location.clone())),
        };
        self.advance();
        let default = if self.check(&TokenKind::RightAngle) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Property(PropertyDecl {
            name,
            default,
            location,
        }))
    }

    fn parse_constant(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => {
                return Err(ParseError::ExpectedConstantName(
                    self.peek().location.clone(),
                ))
            }
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Constant(ConstantDecl {
            name,
            value,
            location,
        }))
    }

    fn parse_insert_file(
        &mut self,
        location: SourceLocation,
    ) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::String(name) => name.clone(),
            _ => return Err(ParseError::ExpectedFilename(self.peek().location.clone())),
        };
        self.advance();
        // Historical sources write <INSERT-FILE "name" T>; tolerate trailing atoms.
        while matches!(self.peek().kind, TokenKind::Atom(_)) {
            self.advance();
        }
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::InsertFile(name, location))
    }

    fn parse_version(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let designator = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            TokenKind::Number(n) => n.to_string(),
            _ => {
                return Err(ParseError::ExpectedVersionType(
                    self.peek().location.clone(),
                ))
            }
        };
        self.advance();
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Version(designator, location))
    }

    fn parse_princ(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let text = match &self.peek().kind {
            TokenKind::String(text) => text.clone(),
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedFilename(self.peek().location.clone())),
        };
        self.advance();
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Princ(text, location))
    }

    fn parse_sname(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let text = match &self.peek().kind {
            TokenKind::String(text) => text.clone(),
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedFilename(self.peek().location.clone())),
        };
        self.advance();
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Sname(text, location))
    }

    fn parse_set(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => {
                let token = self.peek().clone();
                return Err(ParseError::ExpectedAtom(token.text, token.location));
            }
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect(TokenKind::RightAngle)?;
        Ok(ZilDeclaration::Set(name, value, location))
    }

    fn parse_defmac(&mut self, location: SourceLocation) -> Result<ZilDeclaration, ParseError> {
        let name = match &self.peek().kind {
            TokenKind::Atom(name) => name.clone(),
            _ => return Err(ParseError::ExpectedRoutineName(self.peek().location.clone())),
        };
        self.advance();

        self.expect(TokenKind::LeftParen)?;
        let parameters = self.parse_macro_parameters()?;

        let body = self.parse_expression()?;
        if !self.check(&TokenKind::RightAngle) {
            return Err(ParseError::InvalidSyntax(
                "macro body must be a single expression".to_string(),
                self.peek().location.clone(),
            ));
        }
        self.expect(TokenKind::RightAngle)?;

        Ok(ZilDeclaration::Defmac(MacroDecl {
            name,
            parameters,
            body,
            location,
        }))
    }

    fn parse_macro_parameters(&mut self) -> Result<Vec<MacroParameter>, ParseError> {
        #[derive(PartialEq)]
        enum Section {
            Standard,
            Optional,
            Args,
        }

        let mut section = Section::Standard;
        let mut parameters = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RightParen => {
                    self.advance();
                    break;
                }
                TokenKind::String(marker) => {
                    self.advance();
                    match marker.as_str() {
                        "OPT" | "OPTIONAL" => section = Section::Optional,
                        "ARGS" | "TUPLE" => section = Section::Args,
                        other => {
                            return Err(ParseError::InvalidParameterSection(
                                format!("unknown macro section marker \"{}\"", other),
                                token.location,
                            ));
                        }
                    }
                }
                TokenKind::Atom(name) => {
                    self.advance();
                    match section {
                        Section::Standard => {
                            // 'NAME marks a quoted (unevaluated) parameter.
                            if let Some(stripped) = name.strip_prefix('\'') {
                                parameters.push(MacroParameter::Quoted(stripped.to_string()));
                            } else {
                                parameters.push(MacroParameter::Standard(name.clone()));
                            }
                        }
                        Section::Optional => {
                            parameters.push(MacroParameter::Optional(name.clone(), None));
                        }
                        Section::Args => {
                            parameters.push(MacroParameter::VariableArgs(name.clone()));
                            section = Section::Standard;
                        }
                    }
                }
                TokenKind::LeftParen if section == Section::Optional => {
                    self.advance();
                    let name = match &self.peek().kind {
                        TokenKind::Atom(name) => name.clone(),
                        _ => {
                            return Err(ParseError::ExpectedParameterName(
                                self.peek().location.clone(),
                            ))
                        }
                    };
                    self.advance();
                    let default = self.parse_expression()?;
                    self.expect(TokenKind::RightParen)?;
                    parameters.push(MacroParameter::Optional(name, Some(default)));
                }
                TokenKind::EndOfFile => {
                    return Err(ParseError::UnexpectedEndOfFile(token.location));
                }
                _ => {
                    return Err(ParseError::ExpectedParameterName(token.location));
                }
            }
        }

        Ok(parameters)
    }

    fn parse_atom_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = Vec::new();
        while !self.check(&TokenKind::RightAngle) {
            match &self.peek().kind {
                TokenKind::Atom(name) => {
                    names.push(name.clone());
                    self.advance();
                }
                TokenKind::EndOfFile => {
                    return Err(ParseError::UnexpectedEndOfFile(self.peek().location.clone()));
                }
                _ => {
                    let token = self.peek().clone();
                    return Err(ParseError::ExpectedAtom(token.text, token.location));
                }
            }
        }
        Ok(names)
    }

    pub fn parse_expression(&mut self) -> Result<ZilExpression, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Atom(name) => {
                self.advance();
                Ok(ZilExpression::Atom(name.clone()))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(ZilExpression::Number(*n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(ZilExpression::String(s.clone()))
            }
            TokenKind::GlobalVariable(name) => {
                self.advance();
                Ok(ZilExpression::GlobalVariable(name.clone()))
            }
            TokenKind::LocalVariable(name) => {
                self.advance();
                Ok(ZilExpression::LocalVariable(name.clone()))
            }
            TokenKind::PropertyReference(name) => {
                self.advance();
                Ok(ZilExpression::PropertyReference(name.clone()))
            }
            TokenKind::FlagReference(name) => {
                self.advance();
                Ok(ZilExpression::FlagReference(name.clone()))
            }
            TokenKind::LeftAngle => {
                self.advance();
                let mut children = Vec::new();
                while !self.check(&TokenKind::RightAngle) {
                    if self.check(&TokenKind::EndOfFile) {
                        return Err(ParseError::UnexpectedEndOfFile(
                            self.peek().location.clone(),
                        ));
                    }
                    children.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RightAngle)?;

                // <TABLE ...> and friends are table literals, not calls.
                if let Some(ZilExpression::Atom(head)) = children.first() {
                    if let Some(kind) = TableKind::from_name(head) {
                        children.remove(0);
                        return Ok(ZilExpression::Table(kind, children));
                    }
                }
                Ok(ZilExpression::List(children))
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut children = Vec::new();
                while !self.check(&TokenKind::RightParen) {
                    if self.check(&TokenKind::EndOfFile) {
                        return Err(ParseError::UnexpectedEndOfFile(
                            self.peek().location.clone(),
                        ));
                    }
                    children.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RightParen)?;
                Ok(ZilExpression::List(children))
            }
            TokenKind::Indirection => {
                self.advance();
                let target = self.parse_expression()?;
                match target {
                    ZilExpression::Atom(_) | ZilExpression::GlobalVariable(_) => {
                        Ok(ZilExpression::Indirection(Box::new(target)))
                    }
                    other => Err(ParseError::InvalidSyntax(
                        format!("indirection target must be an atom or global, got {}", other),
                        token.location,
                    )),
                }
            }
            TokenKind::Invalid(c) => Err(ParseError::InvalidSyntax(
                format!("invalid character '{}'", c),
                token.location,
            )),
            TokenKind::EndOfFile => Err(ParseError::UnexpectedEndOfFile(token.location)),
            TokenKind::RightAngle | TokenKind::RightParen | TokenKind::LineComment(_) => {
                Err(ParseError::UnexpectedToken(token.text, token.location))
            }
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(&kind) {
            let token = self.peek().clone();
            self.advance();
            Ok(token)
        } else {
            let token = self.peek().clone();
            if token.kind == TokenKind::EndOfFile {
                Err(ParseError::UnexpectedEndOfFile(token.location))
            } else {
                Err(ParseError::UnexpectedToken(token.text, token.location))
            }
        }
    }
}

/// Parse a ZIL file from disk, resolving `INSERT-FILE` recursively.
pub fn parse_file(path: &Path) -> Result<Vec<ZilDeclaration>, ParseError> {
    let mut include_stack = Vec::new();
    parse_file_with_stack(path, &mut include_stack)
}

/// Resolve the `INSERT-FILE` declarations of an already-parsed program,
/// splicing included declarations at their textual position.
pub fn resolve_includes(
    declarations: Vec<ZilDeclaration>,
    including_dir: &Path,
    include_stack: &mut Vec<(PathBuf, String)>,
) -> Result<Vec<ZilDeclaration>, ParseError> {
    let mut resolved = Vec::new();

    for declaration in declarations {
        match declaration {
            ZilDeclaration::InsertFile(name, location) => {
                let path = resolve_include_path(&name, including_dir)
                    .ok_or_else(|| ParseError::FileNotFound(name.clone(), location.clone()))?;
                debug!("INSERT-FILE \"{}\" resolved to {}", name, path.display());
                let mut inner = parse_file_with_stack(&path, include_stack).map_err(|e| {
                    // A cycle detected below carries its own chain; pass through.
                    match e {
                        ParseError::CircularInclude(chain, _) => {
                            ParseError::CircularInclude(chain, location.clone())
                        }
                        other => other,
                    }
                })?;
                resolved.append(&mut inner);
            }
            other => resolved.push(other),
        }
    }

    Ok(resolved)
}

fn parse_file_with_stack(
    path: &Path,
    include_stack: &mut Vec<(PathBuf, String)>,
) -> Result<Vec<ZilDeclaration>, ParseError> {
    let canonical = path
        .canonicalize()
        .map_err(|_| entry_not_found(path))?;
    let display_name = display_name_for(path);

    if include_stack.iter().any(|(p, _)| p == &canonical) {
        let mut chain: Vec<String> = include_stack.iter().map(|(_, n)| n.clone()).collect();
        chain.push(display_name);
        return Err(ParseError::CircularInclude(
            chain,
            SourceLocation::new(path.display().to_string(), 0, 0),
        ));
    }

    let source = fs::read_to_string(&canonical).map_err(|_| entry_not_found(path))?;
    include_stack.push((canonical.clone(), display_name));

    // A fresh parser per file: the only shared state is the include stack.
    let result = (|| {
        let mut parser = Parser::from_source(&source, &path.display().to_string())?;
        let declarations = parser.parse_program()?;
        let dir = canonical
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        resolve_includes(declarations, &dir, include_stack)
    })();

    include_stack.pop();
    result
}

/// Candidate resolution order: exact, lowercase, exact+".zil",
/// lowercase+".zil" - first relative to the including file's directory,
/// then the working directory.
fn resolve_include_path(name: &str, including_dir: &Path) -> Option<PathBuf> {
    let candidates = [
        name.to_string(),
        name.to_lowercase(),
        format!("{}.zil", name),
        format!("{}.zil", name.to_lowercase()),
    ];

    for base in [Some(including_dir), None] {
        for candidate in &candidates {
            let path = match base {
                Some(dir) => dir.join(candidate),
                None => PathBuf::from(candidate),
            };
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}

fn display_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| path.display().to_string())
}

fn entry_not_found(path: &Path) -> ParseError {
    ParseError::FileNotFound(
        path.display().to_string(),
        SourceLocation::new(path.display().to_string(), 0, 0),
    )
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
