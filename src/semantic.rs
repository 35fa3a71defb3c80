// Semantic Analysis
// Scoped symbol tables with forward references, declaration validation,
// call arity checks and cyclic-dependency detection. Diagnostics are
// collected as a batch; analysis never aborts early.

use crate::ast::{SourceLocation, ZilDeclaration, ZilExpression};
use crate::error::{Diagnostic, DiagnosticCode};
use indexmap::{IndexMap, IndexSet};
use lazy_static::lazy_static;
use log::debug;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolType {
    Routine {
        parameters: Vec<String>,
        optional_parameters: Vec<String>,
        auxiliary_variables: Vec<String>,
    },
    Object {
        properties: Vec<String>,
        flags: Vec<String>,
    },
    GlobalVariable,
    Constant(ZilExpression),
    LocalVariable,
    Property(Option<ZilExpression>),
    Flag,
    Macro,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub symbol_type: SymbolType,
    pub scope_level: usize,
    pub definition: SourceLocation,
    pub references: Vec<SourceLocation>,
    pub is_defined: bool,
    /// Pre-installed names skip arity checks and unused-symbol reporting.
    pub is_builtin: bool,
}

/// A stack of scope frames. Scope 0 is global; routine analysis pushes a
/// frame on entry and pops it on exit. Forward uses are parked in a
/// pending-reference side table and merged into the symbol when the name
/// is first defined.
pub struct SymbolTable {
    scopes: Vec<IndexMap<String, Symbol>>,
    pending_references: IndexMap<String, Vec<SourceLocation>>,
    /// Non-global scopes popped during analysis, snapshotted for the
    /// unused-symbol check in validate().
    popped_scopes: Vec<IndexMap<String, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![IndexMap::new()],
            pending_references: IndexMap::new(),
            popped_scopes: Vec::new(),
        }
    }

    pub fn current_scope_level(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    /// Pop the innermost scope. The global scope is never popped.
    pub fn pop_scope(&mut self) -> bool {
        if self.scopes.len() <= 1 {
            return false;
        }
        let scope = self.scopes.pop().unwrap();
        self.popped_scopes.push(scope);
        true
    }

    /// Define a name in the current scope. Returns false when the name is
    /// already defined in this scope (redefinition).
    pub fn define_symbol(
        &mut self,
        name: &str,
        symbol_type: SymbolType,
        location: SourceLocation,
    ) -> bool {
        self.define_symbol_inner(name, symbol_type, location, false)
    }

    fn define_symbol_inner(
        &mut self,
        name: &str,
        symbol_type: SymbolType,
        location: SourceLocation,
        is_builtin: bool,
    ) -> bool {
        let scope_level = self.current_scope_level();
        if self.scopes[scope_level].contains_key(name) {
            return false;
        }

        // Forward uses recorded before the definition become ordinary
        // references now.
        let references = self.pending_references.shift_remove(name).unwrap_or_default();

        self.scopes[scope_level].insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                symbol_type,
                scope_level,
                definition: location,
                references,
                is_defined: true,
                is_builtin,
            },
        );
        true
    }

    pub fn lookup_symbol(&self, name: &str) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.get(name) {
                return Some(symbol);
            }
        }
        None
    }

    /// Record a use of a name. Unknown names become pending references
    /// that either merge into a later definition or surface as
    /// undefined-symbol diagnostics in validate().
    pub fn reference_symbol(&mut self, name: &str, location: SourceLocation) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(symbol) = scope.get_mut(name) {
                symbol.references.push(location);
                return true;
            }
        }
        self.pending_references
            .entry(name.to_string())
            .or_default()
            .push(location);
        false
    }

    /// Like reference_symbol but never records a pending reference.
    pub fn reference_if_defined(&mut self, name: &str, location: SourceLocation) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(symbol) = scope.get_mut(name) {
                symbol.references.push(location);
                return true;
            }
        }
        false
    }

    /// Flush pending references as undefined-symbol diagnostics and flag
    /// unreferenced scope-local symbols. Applies to non-global scopes,
    /// including scopes popped during analysis.
    pub fn validate(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (name, locations) in self.pending_references.drain(..) {
            for location in locations {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::UndefinedSymbol,
                    format!("undefined symbol '{}'", name),
                    location,
                ));
            }
        }

        let local_scopes = self
            .popped_scopes
            .iter()
            .chain(self.scopes.iter().skip(1));
        for scope in local_scopes {
            for symbol in scope.values() {
                if !symbol.is_builtin && symbol.references.is_empty() {
                    diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::UnusedSymbol,
                        format!("unused symbol '{}'", symbol.name),
                        symbol.definition.clone(),
                    ));
                }
            }
        }

        diagnostics
    }
}

lazy_static! {
    /// Function atoms understood by the Z-Machine backend; pre-installed
    /// so reference checks succeed without arity validation.
    static ref BUILTIN_FUNCTIONS: IndexSet<&'static str> = {
        let names: &[&str] = &[
            // arithmetic
            "+", "-", "*", "/", "MOD", "RANDOM", "ABS", "BAND", "BOR", "BCOM", "BTST",
            "SHIFT", "ASH", "ASHIFT",
            // comparison
            "EQUAL?", "==?", "=?", "N==?", "N=?", "ZERO?", "0?", "1?", "LESS?", "L?",
            "L=?", "GRTR?", "G?", "G=?", "DLESS?", "IGRTR?",
            // logic and control
            "AND", "OR", "NOT", "COND", "IF", "REPEAT", "WHILE", "PROG", "BIND",
            "RETURN", "AGAIN", "RTRUE", "RFALSE", "APPLY",
            // assignment
            "SET", "SETG", "VALUE", "GASSIGNED?", "ASSIGNED?",
            // objects
            "FSET", "FCLEAR", "FSET?", "MOVE", "REMOVE", "LOC", "FIRST?", "NEXT?",
            "IN?", "GETP", "PUTP", "GETPT", "NEXTP", "PTSIZE",
            // IO
            "TELL", "PRINT", "PRINTI", "PRINTR", "PRINTN", "PRINTD", "PRINTB",
            "PRINC", "CRLF", "CR", "READ", "INPUT", "BUFOUT", "DIRIN", "DIROUT",
            "CURSET", "CURGET", "HLIGHT", "COLOR", "SPLIT", "SCREEN", "CLEAR", "ERASE",
            // parser interface
            "LEX", "ZWSTR", "PERFORM", "PARSE", "UNPARSE", "VERB?", "PRSO?", "PRSI?",
            "ROOM?", "HELD?", "VISIBLE?", "ACCESSIBLE?", "META-LOC", "GLOBAL-IN?",
            "GOTO", "JIGS-UP",
            // stack
            "PUSH", "POP", "RSTACK", "XPUSH", "FSTACK",
            // memory and tables
            "GET", "PUT", "GETB", "PUTB", "TABLE", "ITABLE", "LTABLE", "PTABLE",
            "BTABLE", "REST", "BACK", "LENGTH", "NTH", "INTBL?", "COPYT",
            // type and string
            "TYPE", "TYPE?", "CHTYPE", "SPNAME", "PNAME", "STRING", "SUBSTRING",
            "ASCII", "STRING-CONCAT", "STRING-LENGTH", "STRING-UPPER", "STRING-LOWER",
            "STRING-INDEX",
            // system and game state
            "CALL", "QUIT", "RESTART", "SAVE", "RESTORE", "VERIFY", "ISAVE",
            "IRESTORE", "CATCH", "THROW", "USL", "SOUND", "QUEUE", "INT", "ENABLE",
            "DISABLE", "ORIGINAL?", "VERSION?", "CHECKU", "PICINF", "DISPLAY",
            "DCLEAR", "WINPOS", "WINSIZE", "WINATTR", "MARGIN", "SCROLL", "MENU",
            "MOUSE-INFO", "MOUSE-LIMIT", "PICSET",
            // compiler ops
            "EVAL", "FORM", "QUOTE", "GVAL", "LVAL", "MAPF", "MAPR",
        ];
        names.iter().copied().collect()
    };

    /// Pre-installed constants.
    static ref BUILTIN_CONSTANTS: IndexSet<&'static str> = {
        let names: &[&str] = &["T", "ELSE", "FALSE", "PRSA", "PRSO", "PRSI", "WINNER", "HERE"];
        names.iter().copied().collect()
    };
}

/// Special forms whose argument positions are not ordinary expressions.
const TELL_KEYWORDS: &[&str] = &["CR", "CRLF", "D", "N", "B", "A"];

struct AnalyzerState {
    symbols: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    /// Name -> name call edges gathered at routine scope.
    dependencies: IndexMap<String, IndexSet<String>>,
    current_routine: Option<String>,
}

/// The analyzer's symbol and diagnostic store sits behind one mutex; the
/// lock is held for the duration of a single analyze() call and nothing
/// else.
pub struct SemanticAnalyzer {
    state: Mutex<AnalyzerState>,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        SemanticAnalyzer {
            state: Mutex::new(AnalyzerState {
                symbols: SymbolTable::new(),
                diagnostics: Vec::new(),
                dependencies: IndexMap::new(),
                current_routine: None,
            }),
        }
    }

    /// Analyze a declaration stream and return every diagnostic found.
    pub fn analyze(&self, declarations: &[ZilDeclaration]) -> Vec<Diagnostic> {
        let mut state = self.state.lock().unwrap();
        state.run(declarations)
    }
}

impl AnalyzerState {
    fn run(&mut self, declarations: &[ZilDeclaration]) -> Vec<Diagnostic> {
        self.install_builtins();

        // Pass 1: collect global definitions so forward references resolve.
        for declaration in declarations {
            self.collect(declaration);
        }

        // Pass 2: validate declaration bodies in source order.
        for declaration in declarations {
            self.validate_declaration(declaration);
        }

        self.detect_cycles();

        let mut diagnostics = std::mem::take(&mut self.diagnostics);
        diagnostics.extend(self.symbols.validate());
        debug!("semantic analysis found {} diagnostics", diagnostics.len());
        diagnostics
    }

    fn install_builtins(&mut self) {
        for name in BUILTIN_FUNCTIONS.iter() {
            self.symbols.define_symbol_inner(
                name,
                SymbolType::Routine {
                    parameters: Vec::new(),
                    optional_parameters: Vec::new(),
                    auxiliary_variables: Vec::new(),
                },
                SourceLocation::internal(),
                true,
            );
        }
        for name in BUILTIN_CONSTANTS.iter() {
            self.symbols.define_symbol_inner(
                name,
                SymbolType::Constant(ZilExpression::Number(0)),
                SourceLocation::internal(),
                true,
            );
        }
    }

    fn report(&mut self, code: DiagnosticCode, message: String, location: SourceLocation) {
        let mut diagnostic = Diagnostic::warning(code, message, location);
        if let Some(routine) = &self.current_routine {
            diagnostic = diagnostic.with_context(format!("routine {}", routine));
        }
        self.diagnostics.push(diagnostic);
    }

    fn define_or_report(
        &mut self,
        name: &str,
        symbol_type: SymbolType,
        location: &SourceLocation,
    ) {
        // Shadowing a builtin is allowed; redefining a user symbol in the
        // same scope is a diagnostic, not a fatal.
        let shadows_builtin = self
            .symbols
            .lookup_symbol(name)
            .map(|s| s.is_builtin && s.scope_level == 0)
            .unwrap_or(false);
        if shadows_builtin && self.symbols.current_scope_level() == 0 {
            self.symbols.scopes[0].shift_remove(name);
        }
        if !self
            .symbols
            .define_symbol(name, symbol_type, location.clone())
        {
            self.report(
                DiagnosticCode::SymbolRedefinition,
                format!("symbol '{}' is already defined in this scope", name),
                location.clone(),
            );
        }
    }

    fn collect(&mut self, declaration: &ZilDeclaration) {
        match declaration {
            ZilDeclaration::Routine(routine) => {
                self.define_or_report(
                    &routine.name,
                    SymbolType::Routine {
                        parameters: routine.parameters.clone(),
                        optional_parameters: routine
                            .optional_parameters
                            .iter()
                            .map(|p| p.name.clone())
                            .collect(),
                        auxiliary_variables: routine
                            .auxiliary_variables
                            .iter()
                            .map(|p| p.name.clone())
                            .collect(),
                    },
                    &routine.location,
                );
            }
            ZilDeclaration::Object(object) => {
                let mut properties = Vec::new();
                let mut flags = Vec::new();
                for property in &object.properties {
                    properties.push(property.name.clone());
                    if property.name == "FLAGS" {
                        for flag in flatten_atoms(&property.value) {
                            flags.push(flag.clone());
                            // First definition wins across objects.
                            if self.symbols.lookup_symbol(&flag).is_none() {
                                self.symbols.define_symbol(
                                    &flag,
                                    SymbolType::Flag,
                                    object.location.clone(),
                                );
                            }
                        }
                    }
                }
                self.define_or_report(
                    &object.name,
                    SymbolType::Object { properties, flags },
                    &object.location,
                );
            }
            ZilDeclaration::Global(global) => {
                self.define_or_report(
                    &global.name,
                    SymbolType::GlobalVariable,
                    &global.location,
                );
            }
            ZilDeclaration::Set(name, _, location) => {
                if self.symbols.lookup_symbol(name).is_none() {
                    self.symbols
                        .define_symbol(name, SymbolType::GlobalVariable, location.clone());
                }
            }
            ZilDeclaration::Property(property) => {
                self.define_or_report(
                    &property.name,
                    SymbolType::Property(property.default.clone()),
                    &property.location,
                );
            }
            ZilDeclaration::Constant(constant) => {
                self.define_or_report(
                    &constant.name,
                    SymbolType::Constant(constant.value.clone()),
                    &constant.location,
                );
            }
            ZilDeclaration::Directions(names, location) => {
                for name in names {
                    if self.symbols.lookup_symbol(name).is_none() {
                        self.symbols
                            .define_symbol(name, SymbolType::Property(None), location.clone());
                    }
                }
            }
            ZilDeclaration::Defmac(mac) => {
                self.define_or_report(&mac.name, SymbolType::Macro, &mac.location);
            }
            _ => {}
        }
    }

    fn validate_declaration(&mut self, declaration: &ZilDeclaration) {
        match declaration {
            ZilDeclaration::Routine(routine) => {
                self.current_routine = Some(routine.name.clone());
                self.symbols.push_scope();

                for parameter in &routine.parameters {
                    self.symbols.define_symbol(
                        parameter,
                        SymbolType::LocalVariable,
                        routine.location.clone(),
                    );
                }
                for parameter in routine
                    .optional_parameters
                    .iter()
                    .chain(&routine.auxiliary_variables)
                {
                    self.symbols.define_symbol(
                        &parameter.name,
                        SymbolType::LocalVariable,
                        routine.location.clone(),
                    );
                    if let Some(default) = &parameter.default {
                        self.check_expression(default, &routine.location);
                    }
                }

                for expr in &routine.body {
                    self.check_expression(expr, &routine.location);
                }

                self.symbols.pop_scope();
                self.current_routine = None;
            }
            ZilDeclaration::Global(global) => {
                self.check_data_expression(&global.value, &global.location);
            }
            ZilDeclaration::Constant(constant) => {
                self.check_data_expression(&constant.value, &constant.location);
            }
            ZilDeclaration::Set(_, value, location) => {
                self.check_data_expression(value, location);
            }
            ZilDeclaration::Object(object) => {
                for property in &object.properties {
                    match property.name.as_str() {
                        // Containment references another object by name.
                        "IN" | "LOC" => {
                            if let ZilExpression::Atom(target) = &property.value {
                                self.symbols
                                    .reference_symbol(target, object.location.clone());
                            }
                        }
                        "FLAGS" => {
                            for flag in flatten_atoms(&property.value) {
                                self.symbols
                                    .reference_symbol(&flag, object.location.clone());
                            }
                        }
                        // Vocabulary words and descriptions are data.
                        "SYNONYM" | "ADJECTIVE" | "DESC" | "LDESC" | "FDESC" | "TEXT" => {}
                        _ => {
                            self.check_data_expression(&property.value, &object.location);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Check an expression appearing in a routine body.
    fn check_expression(&mut self, expr: &ZilExpression, location: &SourceLocation) {
        match expr {
            ZilExpression::Atom(name) => {
                self.symbols.reference_symbol(name, location.clone());
            }
            ZilExpression::Number(_) | ZilExpression::String(_) => {}
            ZilExpression::GlobalVariable(name)
            | ZilExpression::LocalVariable(name)
            | ZilExpression::PropertyReference(name)
            | ZilExpression::FlagReference(name) => {
                self.symbols.reference_symbol(name, location.clone());
            }
            ZilExpression::List(children) => {
                self.check_call(children, location);
            }
            ZilExpression::Table(_, children) => {
                for child in children {
                    self.check_table_element(child, location);
                }
            }
            ZilExpression::Indirection(target) => {
                self.check_expression(target, location);
            }
        }
    }

    /// Data positions (global initializers, object properties): bare atoms
    /// are referenced only when defined, so vocabulary words do not flood
    /// the pending table.
    fn check_data_expression(&mut self, expr: &ZilExpression, location: &SourceLocation) {
        match expr {
            ZilExpression::Atom(name) => {
                self.symbols.reference_if_defined(name, location.clone());
            }
            ZilExpression::GlobalVariable(name)
            | ZilExpression::PropertyReference(name)
            | ZilExpression::FlagReference(name) => {
                self.symbols.reference_symbol(name, location.clone());
            }
            ZilExpression::List(children) | ZilExpression::Table(_, children) => {
                for child in children {
                    self.check_data_expression(child, location);
                }
            }
            ZilExpression::Indirection(target) => {
                self.check_data_expression(target, location);
            }
            _ => {}
        }
    }

    fn check_table_element(&mut self, expr: &ZilExpression, location: &SourceLocation) {
        self.check_data_expression(expr, location);
    }

    fn check_call(&mut self, children: &[ZilExpression], location: &SourceLocation) {
        let Some(ZilExpression::Atom(head)) = children.first() else {
            // `(a b c)` data lists and computed heads: check elements.
            for child in children {
                self.check_expression(child, location);
            }
            return;
        };
        let head = head.clone();
        let args = &children[1..];

        match head.as_str() {
            "COND" => {
                for clause in args {
                    if let ZilExpression::List(parts) = clause {
                        for part in parts {
                            self.check_expression(part, location);
                        }
                    } else {
                        self.report(
                            DiagnosticCode::TypeMismatch,
                            "COND clause must be a list".to_string(),
                            location.clone(),
                        );
                    }
                }
                return;
            }
            "TELL" => {
                for arg in args {
                    match arg {
                        ZilExpression::Atom(word)
                            if TELL_KEYWORDS.contains(&word.as_str()) => {}
                        other => self.check_expression(other, location),
                    }
                }
                return;
            }
            "SET" | "SETG" => {
                // First argument is the assignment target.
                if let Some(target) = args.first() {
                    match target {
                        ZilExpression::Atom(name)
                        | ZilExpression::LocalVariable(name)
                        | ZilExpression::GlobalVariable(name) => {
                            self.symbols.reference_symbol(name, location.clone());
                        }
                        other => self.check_expression(other, location),
                    }
                }
                for arg in &args[1..] {
                    self.check_expression(arg, location);
                }
                return;
            }
            "REPEAT" | "PROG" | "BIND" => {
                // Optional leading binding list introduces nothing we track
                // beyond its default expressions.
                let mut rest = args;
                if let Some(ZilExpression::List(bindings)) = args.first() {
                    for binding in bindings {
                        if let ZilExpression::List(pair) = binding {
                            if let Some(default) = pair.get(1) {
                                self.check_expression(default, location);
                            }
                        }
                    }
                    rest = &args[1..];
                }
                for arg in rest {
                    self.check_expression(arg, location);
                }
                return;
            }
            _ => {}
        }

        // Record dependency edges and verify user-routine arity.
        let mut is_user_routine = false;
        let mut required = 0usize;
        let mut optional = 0usize;
        if let Some(symbol) = self.symbols.lookup_symbol(&head) {
            if let SymbolType::Routine {
                parameters,
                optional_parameters,
                ..
            } = &symbol.symbol_type
            {
                if !symbol.is_builtin {
                    is_user_routine = true;
                    required = parameters.len();
                    optional = optional_parameters.len();
                }
            }
        }

        self.symbols.reference_symbol(&head, location.clone());

        if is_user_routine {
            if let Some(current) = &self.current_routine {
                self.dependencies
                    .entry(current.clone())
                    .or_default()
                    .insert(head.clone());
            }
            let count = args.len();
            if count < required || count > required + optional {
                self.report(
                    DiagnosticCode::ParameterCountMismatch,
                    format!(
                        "call to '{}' with {} arguments; expected {}..{}",
                        head,
                        count,
                        required,
                        required + optional
                    ),
                    location.clone(),
                );
            }
        }

        for arg in args {
            self.check_expression(arg, location);
        }
    }

    /// DFS with path tracking over the name -> name call graph; one
    /// diagnostic per discovered cycle.
    fn detect_cycles(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let nodes: Vec<String> = self.dependencies.keys().cloned().collect();
        let mut marks: IndexMap<String, Mark> = nodes
            .iter()
            .map(|n| (n.clone(), Mark::Unvisited))
            .collect();
        let mut reported: IndexSet<Vec<String>> = IndexSet::new();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        fn dfs(
            node: &str,
            dependencies: &IndexMap<String, IndexSet<String>>,
            marks: &mut IndexMap<String, Mark>,
            path: &mut Vec<String>,
            reported: &mut IndexSet<Vec<String>>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            marks.insert(node.to_string(), Mark::OnPath);
            path.push(node.to_string());

            if let Some(callees) = dependencies.get(node) {
                for callee in callees {
                    match marks.get(callee.as_str()).copied() {
                        Some(Mark::OnPath) => {
                            let start = path.iter().position(|n| n == callee).unwrap();
                            let mut chain: Vec<String> = path[start..].to_vec();
                            chain.push(callee.clone());
                            // Normalize so each cycle is reported once.
                            let mut key: Vec<String> = chain[..chain.len() - 1].to_vec();
                            key.sort();
                            if reported.insert(key) {
                                cycles.push(chain);
                            }
                        }
                        Some(Mark::Unvisited) => {
                            dfs(callee, dependencies, marks, path, reported, cycles);
                        }
                        _ => {}
                    }
                }
            }

            path.pop();
            marks.insert(node.to_string(), Mark::Done);
        }

        let dependencies = self.dependencies.clone();
        for node in &nodes {
            if marks.get(node.as_str()).copied() == Some(Mark::Unvisited) {
                let mut path = Vec::new();
                dfs(
                    node,
                    &dependencies,
                    &mut marks,
                    &mut path,
                    &mut reported,
                    &mut cycles,
                );
            }
        }

        for chain in cycles {
            let location = self
                .symbols
                .lookup_symbol(&chain[0])
                .map(|s| s.definition.clone())
                .unwrap_or_else(SourceLocation::internal);
            self.report(
                DiagnosticCode::CircularDependency,
                format!("circular dependency: {}", chain.join(" -> ")),
                location,
            );
        }
    }
}

fn flatten_atoms(expr: &ZilExpression) -> Vec<String> {
    match expr {
        ZilExpression::Atom(name) => vec![name.clone()],
        ZilExpression::List(children) => children.iter().flat_map(flatten_atoms).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "semantic_tests.rs"]
mod tests;
