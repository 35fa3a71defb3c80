// ZAP Code Generator
// Lowers the validated declaration stream to ZAP assembly text in two
// passes: layout (populate the memory model and the string pool) then
// emission (header, constants, globals, properties, objects, functions,
// strings, footer).

use crate::ast::{
    ConstantDecl, ObjectDecl, Parameter, RoutineDecl, TableKind, ZilDeclaration, ZilExpression,
};
use crate::codegen_builder::{escape_zap_string, RoutineBuilder, TableLiteral};
use crate::error::CodeGenError;
use crate::eval::{evaluate, EvalResult};
use crate::string_pool::StringPool;
use crate::ZVersion;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

#[derive(Default)]
struct MemoryLayout {
    constants: IndexMap<String, ZilExpression>,
    globals: IndexMap<String, ZilExpression>,
    /// Property name -> declared default.
    properties: IndexMap<String, Option<ZilExpression>>,
    /// Property name -> assigned number (directions get the top numbers).
    property_numbers: IndexMap<String, u8>,
    /// Flag name -> attribute number.
    flags: IndexMap<String, u8>,
    objects: Vec<ObjectDecl>,
    routines: Vec<RoutineDecl>,
    directions: Vec<String>,
    serial_name: Option<String>,
}

/// Code generation context. One instance per compilation; label numbering
/// is monotonic for the life of the instance.
pub struct ZapCodeGen {
    version: ZVersion,
    optimization_level: u8,
    strings: StringPool,
    tables: Vec<TableLiteral>,
    label_counter: usize,
    layout: MemoryLayout,
}

impl ZapCodeGen {
    pub fn new(version: ZVersion) -> Self {
        ZapCodeGen {
            version,
            optimization_level: 1,
            strings: StringPool::new(),
            tables: Vec::new(),
            label_counter: 0,
            layout: MemoryLayout::default(),
        }
    }

    pub fn set_optimization_level(&mut self, level: u8) {
        self.optimization_level = level;
    }

    pub fn version(&self) -> ZVersion {
        self.version
    }

    /// Generate ZAP assembly for a declaration stream.
    pub fn generate(
        &mut self,
        declarations: &[ZilDeclaration],
    ) -> Result<String, CodeGenError> {
        self.layout_pass(declarations)?;
        self.emission_pass()
    }

    // Pass 1: memory layout

    fn layout_pass(&mut self, declarations: &[ZilDeclaration]) -> Result<(), CodeGenError> {
        for declaration in declarations {
            match declaration {
                ZilDeclaration::Version(designator, _) => {
                    self.version = ZVersion::from_designator(designator).ok_or_else(|| {
                        CodeGenError::VersionIncompatibility(format!(
                            "unknown version designator '{}'",
                            designator
                        ))
                    })?;
                    debug!("target version set to {}", self.version);
                }
                ZilDeclaration::Routine(routine) => {
                    self.collect_strings(&routine.body, routine);
                    self.layout.routines.push(routine.clone());
                }
                ZilDeclaration::Object(object) => {
                    for property in &object.properties {
                        if property.name == "FLAGS" {
                            for flag in flatten_atoms(&property.value) {
                                self.intern_flag(&flag)?;
                            }
                        } else {
                            self.intern_property(&property.name);
                        }
                    }
                    self.layout.objects.push(object.clone());
                }
                ZilDeclaration::Global(global) => {
                    self.pool_data_strings(&global.value, declaration);
                    self.layout
                        .globals
                        .entry(global.name.clone())
                        .or_insert_with(|| global.value.clone());
                }
                ZilDeclaration::Set(name, value, _) => {
                    self.pool_data_strings(value, declaration);
                    self.layout
                        .globals
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
                ZilDeclaration::Property(property) => {
                    self.layout
                        .properties
                        .insert(property.name.clone(), property.default.clone());
                    self.intern_property(&property.name);
                }
                ZilDeclaration::Constant(constant) => {
                    let reduced = self.reduce_constant(constant)?;
                    self.layout.constants.insert(constant.name.clone(), reduced);
                }
                ZilDeclaration::Directions(names, _) => {
                    for name in names {
                        if !self.layout.directions.contains(name) {
                            self.layout.directions.push(name.clone());
                        }
                    }
                }
                ZilDeclaration::InsertFile(name, _) => {
                    // The parser splices includes; one surviving here means
                    // the stream never went through include resolution.
                    return Err(CodeGenError::MemoryLayoutError(format!(
                        "unresolved INSERT-FILE \"{}\"",
                        name
                    )));
                }
                ZilDeclaration::Princ(text, _) => {
                    // Compile-time output.
                    info!("{}", text);
                }
                ZilDeclaration::Sname(name, _) => {
                    self.layout.serial_name = Some(name.clone());
                }
                ZilDeclaration::Defmac(mac) => {
                    debug!("macro {} survived to codegen; ignoring", mac.name);
                }
                ZilDeclaration::Syntax(_, _)
                | ZilDeclaration::Synonym(_, _)
                | ZilDeclaration::Buzz(_, _) => {
                    // Vocabulary feeds the dictionary builder, not codegen.
                }
            }
        }

        self.assign_direction_numbers();
        self.sweep_referenced_names();
        Ok(())
    }

    /// Pool every string literal reachable from a routine body, in source
    /// order, so STRn IDs are deterministic.
    fn collect_strings(&mut self, exprs: &[ZilExpression], routine: &RoutineDecl) {
        for expr in exprs {
            self.collect_strings_expr(expr, routine);
        }
        for parameter in routine
            .optional_parameters
            .iter()
            .chain(&routine.auxiliary_variables)
        {
            if let Some(default) = &parameter.default {
                self.collect_strings_expr(default, routine);
            }
        }
    }

    fn collect_strings_expr(&mut self, expr: &ZilExpression, routine: &RoutineDecl) {
        match expr {
            ZilExpression::String(s) => {
                self.strings.add_string(s, routine.location.clone());
            }
            ZilExpression::List(children) | ZilExpression::Table(_, children) => {
                for child in children {
                    self.collect_strings_expr(child, routine);
                }
            }
            ZilExpression::Indirection(target) => self.collect_strings_expr(target, routine),
            ZilExpression::PropertyReference(name) => {
                let name = name.clone();
                self.intern_property(&name);
            }
            _ => {}
        }
    }

    fn pool_data_strings(&mut self, expr: &ZilExpression, declaration: &ZilDeclaration) {
        match expr {
            ZilExpression::String(s) => {
                self.strings.add_string(s, declaration.location().clone());
            }
            ZilExpression::List(children) | ZilExpression::Table(_, children) => {
                for child in children {
                    self.pool_data_strings(child, declaration);
                }
            }
            _ => {}
        }
    }

    /// Constants reduce through a narrow evaluator: numbers, strings and
    /// atoms stay; computed forms must fold to one of those.
    fn reduce_constant(&mut self, constant: &ConstantDecl) -> Result<ZilExpression, CodeGenError> {
        match &constant.value {
            value @ (ZilExpression::Number(_)
            | ZilExpression::String(_)
            | ZilExpression::Atom(_)) => Ok(value.clone()),
            other => {
                let table: IndexMap<String, ZilExpression> = self
                    .layout
                    .constants
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                match evaluate(other, &table) {
                    EvalResult::Value(
                        value @ (ZilExpression::Number(_)
                        | ZilExpression::String(_)
                        | ZilExpression::Atom(_)),
                    ) => Ok(value),
                    _ => Err(CodeGenError::MemoryLayoutError(format!(
                        "constant {} does not reduce to a number, string, or atom",
                        constant.name
                    ))),
                }
            }
        }
    }

    fn intern_property(&mut self, name: &str) {
        if !self.layout.properties.contains_key(name) {
            self.layout.properties.insert(name.to_string(), None);
        }
    }

    fn intern_flag(&mut self, name: &str) -> Result<(), CodeGenError> {
        if self.layout.flags.contains_key(name) {
            return Ok(());
        }
        let limit: u8 = if self.version == ZVersion::V3 { 32 } else { 48 };
        let number = self.layout.flags.len() as u8;
        if number >= limit {
            return Err(CodeGenError::InvalidObjectDefinition(format!(
                "flag {} exceeds the {} attributes available in {}",
                name, limit, self.version
            )));
        }
        self.layout.flags.insert(name.to_string(), number);
        Ok(())
    }

    /// Directions take the highest property numbers, counting down;
    /// remaining properties follow below them.
    fn assign_direction_numbers(&mut self) {
        let mut next = self.version.max_property();
        let directions = self.layout.directions.clone();
        for direction in &directions {
            self.layout
                .property_numbers
                .insert(direction.clone(), next);
            next = next.saturating_sub(1);
        }
        let names: Vec<String> = self.layout.properties.keys().cloned().collect();
        for name in names {
            if !self.layout.property_numbers.contains_key(&name) {
                self.layout.property_numbers.insert(name, next);
                next = next.saturating_sub(1);
            }
        }
    }

    /// Globals referenced in routine bodies without a declaration still
    /// need a slot; properties referenced via P? still need a number.
    fn sweep_referenced_names(&mut self) {
        let mut referenced_globals = IndexSet::new();
        let routines = self.layout.routines.clone();
        for routine in &routines {
            for expr in &routine.body {
                collect_global_refs(expr, &mut referenced_globals);
            }
        }
        for name in referenced_globals {
            let defines_it = self.layout.globals.contains_key(&name)
                || self.layout.constants.contains_key(&name)
                || self.layout.flags.contains_key(&name)
                || self.layout.objects.iter().any(|o| o.name == name);
            if !defines_it {
                debug!("global {} referenced but never declared; defaulting to 0", name);
                self.layout
                    .globals
                    .insert(name, ZilExpression::Number(0));
            }
        }
    }

    // Pass 2: emission

    fn emission_pass(&mut self) -> Result<String, CodeGenError> {
        let mut out = String::new();
        let debug_mode = self.optimization_level == 0;

        self.emit_header(&mut out, debug_mode);
        self.emit_constants(&mut out, debug_mode);
        self.emit_globals(&mut out, debug_mode)?;
        self.emit_properties(&mut out, debug_mode);
        self.emit_objects(&mut out, debug_mode)?;
        self.emit_functions(&mut out, debug_mode)?;
        self.emit_tables(&mut out, debug_mode)?;
        self.emit_strings(&mut out, debug_mode);
        self.emit_footer(&mut out, debug_mode);

        Ok(out)
    }

    fn emit_header(&self, out: &mut String, debug_mode: bool) {
        if debug_mode {
            out.push_str("; ZAP assembly generated by zilc\n");
            if let Some(name) = &self.layout.serial_name {
                out.push_str(&format!("; Story: {}\n", name));
            }
            out.push_str(&format!(
                "; Target: {} (max file size {}K)\n",
                self.version,
                self.version.max_file_size() / 1024
            ));
        }
        out.push_str(&format!(".ZVERSION {}\n", self.version.number()));
        out.push('\n');
    }

    fn emit_constants(&self, out: &mut String, debug_mode: bool) {
        let has_any = !self.layout.directions.is_empty()
            || !self.layout.flags.is_empty()
            || !self.layout.constants.is_empty()
            || !self.layout.property_numbers.is_empty();
        if !has_any {
            return;
        }
        if debug_mode {
            out.push_str("; ===== Constants =====\n");
        }
        // Directions first (they hold the top numbers), then the rest of
        // the property numbers.
        for direction in &self.layout.directions {
            let number = self.layout.property_numbers[direction];
            out.push_str(&format!(".CONSTANT P?{} {}\n", direction, number));
        }
        for (name, number) in &self.layout.property_numbers {
            if !self.layout.directions.contains(name) {
                out.push_str(&format!(".CONSTANT P?{} {}\n", name, number));
            }
        }
        for (name, number) in &self.layout.flags {
            out.push_str(&format!(".CONSTANT F?{} {}\n", name, number));
        }
        for (name, value) in &self.layout.constants {
            let text = match value {
                ZilExpression::Number(n) => n.to_string(),
                ZilExpression::Atom(a) => a.clone(),
                ZilExpression::String(s) => match self.strings.lookup(s) {
                    Some(id) => format!("STR{}", id),
                    None => format!("\"{}\"", escape_zap_string(s)),
                },
                _ => "0".to_string(),
            };
            out.push_str(&format!(".CONSTANT {} {}\n", name, text));
        }
        out.push('\n');
    }

    fn emit_globals(&mut self, out: &mut String, debug_mode: bool) -> Result<(), CodeGenError> {
        if self.layout.globals.is_empty() {
            return Ok(());
        }
        if debug_mode {
            out.push_str("; ===== Globals =====\n");
        }
        let globals: Vec<(String, ZilExpression)> = self
            .layout
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in globals {
            match &value {
                ZilExpression::Number(0) | ZilExpression::List(_) => {
                    out.push_str(&format!(".GLOBAL\t{}\n", name));
                }
                ZilExpression::Number(n) => {
                    out.push_str(&format!(".GLOBAL\t{}={}\n", name, n));
                }
                ZilExpression::Atom(a) => {
                    out.push_str(&format!(".GLOBAL\t{}={}\n", name, a));
                }
                ZilExpression::String(s) => {
                    let id = self.strings.lookup(s).ok_or_else(|| {
                        CodeGenError::StringTableError(format!("'{}' not pooled", s))
                    })?;
                    out.push_str(&format!(".GLOBAL\t{}=STR{}\n", name, id));
                }
                ZilExpression::Table(kind, values) => {
                    let id = self.tables.len();
                    self.tables.push(TableLiteral {
                        kind: *kind,
                        values: values.clone(),
                    });
                    out.push_str(&format!(".GLOBAL\t{}=TBL{}\n", name, id));
                }
                other => {
                    return Err(CodeGenError::GlobalTableError(format!(
                        "global {} has an unsupported initializer: {}",
                        name, other
                    )));
                }
            }
        }
        out.push('\n');
        Ok(())
    }

    fn emit_properties(&self, out: &mut String, debug_mode: bool) {
        if self.layout.properties.is_empty() {
            return;
        }
        if debug_mode {
            out.push_str("; ===== Properties =====\n");
        }
        for (name, default) in &self.layout.properties {
            match default {
                Some(ZilExpression::Number(n)) => {
                    out.push_str(&format!(".PROPERTY\t{} {}\n", name, n));
                }
                _ => out.push_str(&format!(".PROPERTY\t{}\n", name)),
            }
        }
        out.push('\n');
    }

    fn emit_objects(&mut self, out: &mut String, debug_mode: bool) -> Result<(), CodeGenError> {
        if self.layout.objects.is_empty() {
            return Ok(());
        }
        if debug_mode {
            out.push_str("; ===== Objects =====\n");
        }
        let objects = self.layout.objects.clone();
        for object in &objects {
            out.push_str(&format!(".OBJECT {}\n", object.name));
            for property in &object.properties {
                let mut operands = Vec::new();
                self.object_property_operands(&property.value, &mut operands)?;
                if property.name == "FLAGS" {
                    // Spell attributes through their F? constants.
                    let flags: Vec<String> = flatten_atoms(&property.value)
                        .into_iter()
                        .map(|f| format!("F?{}", f))
                        .collect();
                    out.push_str(&format!("\tFLAGS\t{}\n", flags.join(",")));
                } else if operands.is_empty() {
                    out.push_str(&format!("\t{}\n", property.name));
                } else {
                    out.push_str(&format!("\t{}\t{}\n", property.name, operands.join(",")));
                }
            }
            out.push_str(".ENDOBJECT\n");
        }
        out.push('\n');
        Ok(())
    }

    fn object_property_operands(
        &mut self,
        value: &ZilExpression,
        operands: &mut Vec<String>,
    ) -> Result<(), CodeGenError> {
        match value {
            ZilExpression::Number(n) => operands.push(n.to_string()),
            ZilExpression::Atom(name) => operands.push(name.clone()),
            ZilExpression::String(s) => {
                operands.push(format!("\"{}\"", escape_zap_string(s)));
            }
            ZilExpression::GlobalVariable(name) => operands.push(name.clone()),
            ZilExpression::PropertyReference(name) => operands.push(format!("P?{}", name)),
            ZilExpression::FlagReference(name) => operands.push(format!("F?{}", name)),
            ZilExpression::List(children) => {
                for child in children {
                    self.object_property_operands(child, operands)?;
                }
            }
            ZilExpression::Table(kind, values) => {
                let id = self.tables.len();
                self.tables.push(TableLiteral {
                    kind: *kind,
                    values: values.clone(),
                });
                operands.push(format!("TBL{}", id));
            }
            other => {
                return Err(CodeGenError::InvalidObjectDefinition(format!(
                    "unsupported property value: {}",
                    other
                )));
            }
        }
        Ok(())
    }

    fn emit_functions(&mut self, out: &mut String, debug_mode: bool) -> Result<(), CodeGenError> {
        if debug_mode && !self.layout.routines.is_empty() {
            out.push_str("; ===== Functions =====\n");
        }
        let routines = self.layout.routines.clone();
        for routine in &routines {
            let mut locals: IndexSet<String> = IndexSet::new();
            for name in &routine.parameters {
                locals.insert(name.clone());
            }
            for parameter in routine
                .optional_parameters
                .iter()
                .chain(&routine.auxiliary_variables)
            {
                locals.insert(parameter.name.clone());
            }

            let mut builder = RoutineBuilder::new(
                self.version,
                &self.strings,
                &mut self.tables,
                &mut self.label_counter,
                &routine.name,
                locals,
            );

            // V5+ headers carry no default words, so optional defaults
            // are applied behind an argument-count probe.
            if self.version.number() >= 5 {
                for (index, parameter) in routine.optional_parameters.iter().enumerate() {
                    if let Some(default) = &parameter.default {
                        if !is_trivial_default(default) {
                            let argument_number = routine.parameters.len() + index + 1;
                            builder.generate_optional_default(
                                argument_number,
                                &parameter.name,
                                default,
                            )?;
                        }
                    }
                }
            }

            // Auxiliary defaults have no slot in the header; initialize
            // them at the top of the body.
            for parameter in &routine.auxiliary_variables {
                if let Some(default) = &parameter.default {
                    if !is_trivial_default(default) {
                        let init = ZilExpression::List(vec![
                            ZilExpression::Atom("SET".to_string()),
                            ZilExpression::Atom(parameter.name.clone()),
                            default.clone(),
                        ]);
                        builder.generate_statement(&init)?;
                    }
                }
            }

            builder.generate_body(&routine.body)?;
            let synthesized = builder.synthesized_locals();
            let mut lines = builder.into_lines();

            if self.optimization_level >= 1 {
                lines = peephole_jump_threading(lines);
            }
            let lines = combine_labels(lines);

            if builder_locals_count(routine, &synthesized) > 15 {
                return Err(CodeGenError::StackManagementError(format!(
                    "routine {} needs more than 15 locals after temporaries",
                    routine.name
                )));
            }

            out.push_str(&funct_header(routine, &synthesized));
            for line in &lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(".ENDI\n\n");
        }
        Ok(())
    }

    fn emit_tables(&mut self, out: &mut String, debug_mode: bool) -> Result<(), CodeGenError> {
        if self.tables.is_empty() {
            return Ok(());
        }
        if debug_mode {
            out.push_str("; ===== Tables =====\n");
        }
        let tables = self.tables.clone();
        for (id, table) in tables.iter().enumerate() {
            let mut words = Vec::new();
            match table.kind {
                TableKind::Itable => {
                    // <ITABLE n default...>: n repetitions of the defaults
                    // (zero when omitted).
                    let Some(ZilExpression::Number(count)) = table.values.first() else {
                        return Err(CodeGenError::InvalidOperand(
                            "ITABLE needs a literal element count".to_string(),
                        ));
                    };
                    let defaults = &table.values[1..];
                    for _ in 0..*count {
                        if defaults.is_empty() {
                            words.push("0".to_string());
                        } else {
                            for default in defaults {
                                words.push(self.table_value_text(default)?);
                            }
                        }
                    }
                }
                TableKind::Ltable => {
                    words.push(table.values.len().to_string());
                    for value in &table.values {
                        words.push(self.table_value_text(value)?);
                    }
                }
                TableKind::Table | TableKind::Ptable | TableKind::Btable => {
                    for value in &table.values {
                        words.push(self.table_value_text(value)?);
                    }
                }
            }
            let directive = if table.kind == TableKind::Btable {
                ".BYTE"
            } else {
                ".WORD"
            };
            out.push_str(&format!("TBL{}:\t{}\t{}\n", id, directive, words.join(",")));
        }
        out.push('\n');
        Ok(())
    }

    fn table_value_text(&self, value: &ZilExpression) -> Result<String, CodeGenError> {
        match value {
            ZilExpression::Number(n) => Ok(n.to_string()),
            ZilExpression::Atom(name) => Ok(name.clone()),
            ZilExpression::GlobalVariable(name) => Ok(name.clone()),
            ZilExpression::PropertyReference(name) => Ok(format!("P?{}", name)),
            ZilExpression::FlagReference(name) => Ok(format!("F?{}", name)),
            ZilExpression::String(s) => match self.strings.lookup(s) {
                Some(id) => Ok(format!("STR{}", id)),
                None => Err(CodeGenError::StringTableError(format!(
                    "table string '{}' not pooled",
                    s
                ))),
            },
            other => Err(CodeGenError::InvalidOperand(format!(
                "unsupported table element: {}",
                other
            ))),
        }
    }

    fn emit_strings(&self, out: &mut String, debug_mode: bool) {
        let entries = self.strings.entries();
        if entries.is_empty() {
            return;
        }
        if debug_mode {
            out.push_str("; ===== Strings =====\n");
        }
        for entry in entries {
            out.push_str(&format!(
                ".STRING STR{} \"{}\"\n",
                entry.id,
                escape_zap_string(&entry.content)
            ));
        }
        out.push('\n');
    }

    fn emit_footer(&self, out: &mut String, debug_mode: bool) {
        out.push_str(".END\n");
        if debug_mode {
            out.push_str(&format!(
                "; Statistics: {} routines, {} objects, {} globals, {} strings ({} duplicate uses)\n",
                self.layout.routines.len(),
                self.layout.objects.len(),
                self.layout.globals.len(),
                self.strings.len(),
                self.strings.duplicate_references()
            ));
        }
    }
}

/// `.FUNCT NAME,arg1,...,(opt=default),...,(aux)` with synthesized locals
/// appended.
fn funct_header(routine: &RoutineDecl, synthesized: &[String]) -> String {
    let mut parts = vec![routine.name.clone()];
    for name in &routine.parameters {
        parts.push(name.clone());
    }
    for parameter in &routine.optional_parameters {
        parts.push(optional_spec(parameter));
    }
    for parameter in &routine.auxiliary_variables {
        parts.push(format!("({})", parameter.name));
    }
    for name in synthesized {
        parts.push(format!("({})", name));
    }
    format!(".FUNCT\t{}\n", parts.join(","))
}

fn optional_spec(parameter: &Parameter) -> String {
    match &parameter.default {
        Some(ZilExpression::Number(n)) => format!("({}={})", parameter.name, n),
        Some(ZilExpression::Atom(a)) => format!("({}={})", parameter.name, a),
        _ => format!("({})", parameter.name),
    }
}

fn builder_locals_count(routine: &RoutineDecl, synthesized: &[String]) -> usize {
    routine.local_slot_count() + synthesized.len()
}

fn is_trivial_default(expr: &ZilExpression) -> bool {
    matches!(expr, ZilExpression::Number(0)) || matches!(expr, ZilExpression::List(v) if v.is_empty())
}

/// Remove `JUMP X` immediately followed by the label `X:`.
fn peephole_jump_threading(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut index = 0;
    while index < lines.len() {
        let line = &lines[index];
        let is_redundant_jump = line
            .strip_prefix("\tJUMP\t")
            .map(|target| {
                lines
                    .get(index + 1)
                    .is_some_and(|next| next.trim_end_matches(':') == target && next.ends_with(':'))
            })
            .unwrap_or(false);
        if is_redundant_jump {
            debug!("peephole: dropping {}", lines[index].trim());
            index += 1;
            continue;
        }
        out.push(line.clone());
        index += 1;
    }
    out
}

/// Fold standalone `LABEL:` lines into the next instruction line for
/// Infocom-style density.
fn combine_labels(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut pending: Vec<String> = Vec::new();
    for line in lines {
        if line.ends_with(':') {
            pending.push(line);
        } else if pending.is_empty() {
            out.push(line);
        } else {
            // Multiple labels on one spot chain onto the same line.
            let labels = pending.join("");
            pending.clear();
            out.push(format!("{}{}", labels, line));
        }
    }
    out.extend(pending);
    out
}

fn flatten_atoms(expr: &ZilExpression) -> Vec<String> {
    match expr {
        ZilExpression::Atom(name) => vec![name.clone()],
        ZilExpression::List(children) => children.iter().flat_map(flatten_atoms).collect(),
        _ => Vec::new(),
    }
}

fn collect_global_refs(expr: &ZilExpression, found: &mut IndexSet<String>) {
    match expr {
        ZilExpression::GlobalVariable(name) => {
            found.insert(name.clone());
        }
        ZilExpression::List(children) | ZilExpression::Table(_, children) => {
            for child in children {
                collect_global_refs(child, found);
            }
        }
        ZilExpression::Indirection(target) => collect_global_refs(target, found),
        _ => {}
    }
}

#[cfg(test)]
#[path = "codegen_tests.rs"]
mod tests;
