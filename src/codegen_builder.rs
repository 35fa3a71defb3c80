// Per-routine ZAP instruction builder
// Tracks stack depth, allocates TEMPn temporaries and ?PREFIXn labels,
// and lowers expressions to stack-machine instruction sequences. Results
// prefer the stack while shallow and spill to temporaries past the limit.

use crate::ast::{TableKind, ZilExpression};
use crate::error::CodeGenError;
use crate::string_pool::StringPool;
use crate::ZVersion;
use indexmap::IndexSet;
use log::debug;

/// Below this depth sub-expression results live on the stack; past it a
/// temporary holds the intermediate.
pub const STACK_DEPTH_LIMIT: usize = 8;

/// A generator-level value: where the result of an expression lives and
/// how it spells as a ZAP operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ZValue {
    Number(i16),
    /// String pool ID, spelled STRn.
    String(usize),
    /// Bare ZAP symbol: constants, routine names, object names.
    Atom(String),
    /// Global variable, spelled 'NAME.
    Global(String),
    /// Known local variable of the current routine.
    Local(String),
    /// Property number constant, spelled P?NAME.
    Property(String),
    /// Flag number constant, spelled F?NAME.
    Flag(String),
    /// Table literal ID, spelled TBLn.
    Table(usize),
    /// Top of the evaluation stack.
    Stack,
    /// Temporary local, spelled TEMPn.
    Temp(usize),
    /// No value (statement forms).
    Null,
}

impl ZValue {
    pub fn zap_text(&self) -> String {
        match self {
            ZValue::Number(n) => n.to_string(),
            ZValue::String(id) => format!("STR{}", id),
            ZValue::Atom(name) => name.clone(),
            ZValue::Global(name) => format!("'{}", name),
            ZValue::Local(name) => name.clone(),
            ZValue::Property(name) => format!("P?{}", name),
            ZValue::Flag(name) => format!("F?{}", name),
            ZValue::Table(id) => format!("TBL{}", id),
            ZValue::Stack => "STACK".to_string(),
            ZValue::Temp(n) => format!("TEMP{}", n),
            ZValue::Null => "0".to_string(),
        }
    }
}

/// A table literal lifted out of a routine body or global initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLiteral {
    pub kind: TableKind,
    pub values: Vec<ZilExpression>,
}

struct LoopFrame {
    start_label: String,
    end_label: String,
}

/// Predicate heads that branch natively, with the mnemonic and whether
/// the ZIL sense is the negation of the ZAP branch sense.
fn predicate_for(head: &str) -> Option<(&'static str, bool)> {
    match head {
        "EQUAL?" | "=?" | "==?" => Some(("EQUAL?", false)),
        "N==?" | "N=?" => Some(("EQUAL?", true)),
        "ZERO?" | "0?" => Some(("ZERO?", false)),
        "1?" => Some(("EQUAL?", false)), // <1? x> is <EQUAL? x 1>
        "LESS?" | "L?" => Some(("LESS?", false)),
        "GRTR?" | "G?" => Some(("GRTR?", false)),
        "L=?" => Some(("GRTR?", true)),
        "G=?" => Some(("LESS?", true)),
        "FSET?" => Some(("FSET?", false)),
        "IN?" => Some(("IN?", false)),
        "DLESS?" => Some(("DLESS?", false)),
        "IGRTR?" => Some(("IGRTR?", false)),
        "BTST" => Some(("BTST", false)),
        _ => None,
    }
}

/// Value-producing ops that lower to a single store instruction:
/// (mnemonic, arity).
fn store_op_for(head: &str) -> Option<(&'static str, usize)> {
    match head {
        "GET" => Some(("GET", 2)),
        "GETB" => Some(("GETB", 2)),
        "GETP" => Some(("GETP", 2)),
        "GETPT" => Some(("GETPT", 2)),
        "NEXTP" => Some(("NEXTP", 2)),
        "PTSIZE" => Some(("PTSIZE", 1)),
        "LOC" => Some(("LOC", 1)),
        "RANDOM" => Some(("RANDOM", 1)),
        "BAND" => Some(("BAND", 2)),
        "BOR" => Some(("BOR", 2)),
        "BCOM" => Some(("BCOM", 1)),
        _ => None,
    }
}

/// Statement ops with no result: (mnemonic, arity).
fn statement_op_for(head: &str) -> Option<(&'static str, usize)> {
    match head {
        "PUT" => Some(("PUT", 3)),
        "PUTB" => Some(("PUTB", 3)),
        "PUTP" => Some(("PUTP", 3)),
        "MOVE" => Some(("MOVE", 2)),
        "REMOVE" => Some(("REMOVE", 1)),
        "FSET" => Some(("FSET", 2)),
        "FCLEAR" => Some(("FCLEAR", 2)),
        "PUSH" => Some(("PUSH", 1)),
        "USL" => Some(("USL", 0)),
        "BUFOUT" => Some(("BUFOUT", 1)),
        "DIROUT" => Some(("DIROUT", 1)),
        "DIRIN" => Some(("DIRIN", 1)),
        "CURSET" => Some(("CURSET", 2)),
        "HLIGHT" => Some(("HLIGHT", 1)),
        "SCREEN" => Some(("SCREEN", 1)),
        "SPLIT" => Some(("SPLIT", 1)),
        "CLEAR" => Some(("CLEAR", 1)),
        "ERASE" => Some(("ERASE", 1)),
        "COLOR" => Some(("COLOR", 2)),
        "SOUND" => Some(("SOUND", 1)),
        "COPYT" => Some(("COPYT", 3)),
        "PRINTC" => Some(("PRINTC", 1)),
        _ => None,
    }
}

/// TELL keyword atoms that consume the following argument.
fn tell_prefix_for(head: &str) -> Option<&'static str> {
    match head {
        "D" | "A" => Some("PRINTD"),
        "N" => Some("PRINTN"),
        "B" => Some("PRINTB"),
        "C" => Some("PRINTC"),
        _ => None,
    }
}

pub struct RoutineBuilder<'a> {
    version: ZVersion,
    strings: &'a StringPool,
    tables: &'a mut Vec<TableLiteral>,
    /// Monotonic per code-generator instance.
    label_counter: &'a mut usize,
    routine_name: String,
    locals: IndexSet<String>,
    /// Locals introduced by REPEAT/PROG binding lists.
    extra_locals: Vec<String>,
    lines: Vec<String>,
    temp_counter: usize,
    temp_high_water: usize,
    stack_depth: usize,
    loop_stack: Vec<LoopFrame>,
}

impl<'a> RoutineBuilder<'a> {
    pub fn new(
        version: ZVersion,
        strings: &'a StringPool,
        tables: &'a mut Vec<TableLiteral>,
        label_counter: &'a mut usize,
        routine_name: &str,
        locals: IndexSet<String>,
    ) -> Self {
        RoutineBuilder {
            version,
            strings,
            tables,
            label_counter,
            routine_name: routine_name.to_string(),
            locals,
            extra_locals: Vec::new(),
            lines: Vec::new(),
            temp_counter: 0,
            temp_high_water: 0,
            stack_depth: 0,
            loop_stack: Vec::new(),
        }
    }

    /// Generate the full body. Appends the implicit RTRUE when the last
    /// instruction is not already a return form.
    pub fn generate_body(&mut self, body: &[ZilExpression]) -> Result<(), CodeGenError> {
        for expr in body {
            self.generate_statement(expr)?;
        }
        if !self.ends_with_return() {
            self.emit_line("RTRUE".to_string());
        }
        Ok(())
    }

    /// The emitted instruction lines; labels are standalone `NAME:` lines
    /// to be combined by the formatter.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// TEMPn and binding-list locals that must join the .FUNCT header.
    pub fn synthesized_locals(&self) -> Vec<String> {
        let mut names = self.extra_locals.clone();
        for n in 0..self.temp_high_water {
            names.push(format!("TEMP{}", n));
        }
        names
    }

    fn ends_with_return(&self) -> bool {
        for line in self.lines.iter().rev() {
            if line.ends_with(':') {
                // A label at the tail means control can reach this point.
                return false;
            }
            let mnemonic = line.trim_start().split('\t').next().unwrap_or("");
            return matches!(mnemonic, "RTRUE" | "RFALSE" | "RETURN" | "PRINTR" | "JUMP" | "QUIT");
        }
        false
    }

    // Emission primitives

    fn emit_line(&mut self, text: String) {
        self.lines.push(format!("\t{}", text));
    }

    fn emit_op(&mut self, mnemonic: &str, operands: &[String]) {
        if operands.is_empty() {
            self.emit_line(mnemonic.to_string());
        } else {
            self.emit_line(format!("{}\t{}", mnemonic, operands.join(",")));
        }
    }

    fn emit_store(&mut self, mnemonic: &str, operands: &[String], target: &ZValue) {
        if operands.is_empty() {
            self.emit_line(format!("{} >{}", mnemonic, target.zap_text()));
        } else {
            self.emit_line(format!(
                "{}\t{} >{}",
                mnemonic,
                operands.join(","),
                target.zap_text()
            ));
        }
    }

    fn emit_branch(&mut self, mnemonic: &str, operands: &[String], label: &str, on_true: bool) {
        let polarity = if on_true { '/' } else { '\\' };
        if operands.is_empty() {
            self.emit_line(format!("{} {}{}", mnemonic, polarity, label));
        } else {
            self.emit_line(format!(
                "{}\t{} {}{}",
                mnemonic,
                operands.join(","),
                polarity,
                label
            ));
        }
    }

    pub fn emit_label(&mut self, label: &str) {
        self.lines.push(format!("{}:", label));
    }

    pub fn new_label(&mut self, prefix: &str) -> String {
        let label = format!("?{}{}", prefix, *self.label_counter);
        *self.label_counter += 1;
        label
    }

    fn new_temp(&mut self) -> ZValue {
        let temp = ZValue::Temp(self.temp_counter);
        self.temp_counter += 1;
        if self.temp_counter > self.temp_high_water {
            self.temp_high_water = self.temp_counter;
        }
        temp
    }

    /// Result placement policy: stack while shallow, temporary beyond.
    fn alloc_result(&mut self) -> ZValue {
        if self.stack_depth < STACK_DEPTH_LIMIT {
            self.stack_depth += 1;
            ZValue::Stack
        } else {
            self.new_temp()
        }
    }

    /// Spell an operand, consuming one stack slot for stack values.
    fn use_operand(&mut self, value: &ZValue) -> String {
        if *value == ZValue::Stack && self.stack_depth > 0 {
            self.stack_depth -= 1;
        }
        value.zap_text()
    }

    /// Run `f` in a sub-expression region: the temp counter and stack
    /// base are restored when the region ends, on every exit path.
    fn with_region<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CodeGenError>,
    ) -> Result<R, CodeGenError> {
        let saved_temp = self.temp_counter;
        let saved_depth = self.stack_depth;
        let result = f(self);
        self.temp_counter = saved_temp;
        self.stack_depth = saved_depth;
        result
    }

    // Statements

    pub fn generate_statement(&mut self, expr: &ZilExpression) -> Result<(), CodeGenError> {
        let value = self.generate_expression(expr)?;
        if value == ZValue::Stack {
            // Unconsumed statement result; release the slot.
            debug!(
                "routine {}: discarding stack result of statement",
                self.routine_name
            );
            if self.stack_depth > 0 {
                self.stack_depth -= 1;
            }
        }
        Ok(())
    }

    // Expressions

    pub fn generate_expression(&mut self, expr: &ZilExpression) -> Result<ZValue, CodeGenError> {
        match expr {
            ZilExpression::Number(n) => Ok(ZValue::Number(*n)),
            ZilExpression::String(s) => {
                let id = self
                    .strings
                    .lookup(s)
                    .ok_or_else(|| CodeGenError::StringTableError(format!("'{}' not pooled", s)))?;
                Ok(ZValue::String(id))
            }
            ZilExpression::Atom(name) => Ok(ZValue::Atom(name.clone())),
            ZilExpression::GlobalVariable(name) => Ok(ZValue::Global(name.clone())),
            ZilExpression::LocalVariable(name) => {
                if self.locals.contains(name) {
                    Ok(ZValue::Local(name.clone()))
                } else {
                    // Unknown local falls back to the global spelling.
                    Ok(ZValue::Global(name.clone()))
                }
            }
            ZilExpression::PropertyReference(name) => Ok(ZValue::Property(name.clone())),
            ZilExpression::FlagReference(name) => Ok(ZValue::Flag(name.clone())),
            ZilExpression::Table(kind, values) => {
                let id = self.tables.len();
                self.tables.push(TableLiteral {
                    kind: *kind,
                    values: values.clone(),
                });
                Ok(ZValue::Table(id))
            }
            ZilExpression::Indirection(target) => {
                let operand = self.generate_expression(target)?;
                let text = self.use_operand(&operand);
                let result = self.alloc_result();
                self.emit_store("VALUE", &[text], &result);
                Ok(result)
            }
            ZilExpression::List(children) => self.generate_call(children),
        }
    }

    fn generate_call(&mut self, children: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        // <> is the ZIL false value.
        if children.is_empty() {
            return Ok(ZValue::Number(0));
        }
        let Some(ZilExpression::Atom(head)) = children.first() else {
            return Err(CodeGenError::InvalidFunction(format!(
                "call head must be an atom in routine {}",
                self.routine_name
            )));
        };
        let head = head.clone();
        let args = &children[1..];

        if let Some((mnemonic, negated)) = predicate_for(&head) {
            return self.generate_predicate_value(&head, mnemonic, negated, args);
        }
        if let Some((mnemonic, arity)) = store_op_for(&head) {
            return self.generate_store_op(mnemonic, arity, args);
        }
        if let Some((mnemonic, arity)) = statement_op_for(&head) {
            return self.generate_statement_op(mnemonic, arity, args);
        }

        match head.as_str() {
            "+" => self.generate_arithmetic("ADD", args),
            "-" => self.generate_arithmetic("SUB", args),
            "*" => self.generate_arithmetic("MUL", args),
            "/" => self.generate_arithmetic("DIV", args),
            "MOD" => self.generate_arithmetic("MOD", args),
            "AND" => self.generate_logic_value(true, args),
            "OR" => self.generate_logic_value(false, args),
            "NOT" => self.generate_not_value(args),
            "COND" => self.generate_cond(args),
            "REPEAT" => self.generate_repeat(args),
            "WHILE" => self.generate_while(args),
            "PROG" | "BIND" => self.generate_prog(args),
            "AGAIN" => self.generate_again(),
            "RETURN" => self.generate_return(args),
            "RTRUE" => {
                self.emit_line("RTRUE".to_string());
                Ok(ZValue::Null)
            }
            "RFALSE" => {
                self.emit_line("RFALSE".to_string());
                Ok(ZValue::Null)
            }
            "QUIT" => {
                self.emit_line("QUIT".to_string());
                Ok(ZValue::Null)
            }
            "RESTART" => {
                self.emit_line("RESTART".to_string());
                Ok(ZValue::Null)
            }
            "RSTACK" => {
                self.emit_line("RSTACK".to_string());
                Ok(ZValue::Null)
            }
            "SET" | "SETG" => self.generate_set(&head, args),
            "TELL" => self.generate_tell(args),
            "PRINT" | "PRINTB" | "PRINTN" | "PRINTD" => self.generate_print(&head, args),
            "PRINTI" | "PRINTR" => self.generate_print_literal(&head, args),
            "CRLF" | "CR" => {
                self.emit_line("CRLF".to_string());
                Ok(ZValue::Null)
            }
            "POP" => {
                let result = self.alloc_result();
                self.emit_store("POP", &[], &result);
                Ok(result)
            }
            "READ" => self.generate_read(args),
            "INPUT" => self.generate_input(args),
            "SAVE" => self.generate_save_restore("SAVE"),
            "RESTORE" => self.generate_save_restore("RESTORE"),
            "VERIFY" => {
                // Branch form; the target is the next line either way.
                let next = self.new_label("CNT");
                self.emit_branch("VERIFY", &[], &next, true);
                self.emit_label(&next);
                Ok(ZValue::Null)
            }
            "FIRST?" | "NEXT?" => self.generate_object_probe(&head, args),
            "CATCH" => {
                self.require_version(ZVersion::V5, "CATCH")?;
                let result = self.alloc_result();
                self.emit_store("CATCH", &[], &result);
                Ok(result)
            }
            "THROW" => {
                self.require_version(ZVersion::V5, "THROW")?;
                let operands = self.generate_operands(args)?;
                self.emit_op("THROW", &operands);
                Ok(ZValue::Null)
            }
            "CALL" | "APPLY" => {
                if args.is_empty() {
                    return Err(CodeGenError::InvalidFunction(
                        "CALL needs a routine".to_string(),
                    ));
                }
                self.generate_user_call_values(&args[0].clone(), &args[1..])
            }
            _ => {
                // Unmapped atom: a user routine call.
                self.generate_user_call_values(&ZilExpression::Atom(head), args)
            }
        }
    }

    fn require_version(&self, minimum: ZVersion, what: &str) -> Result<(), CodeGenError> {
        if self.version.number() < minimum.number() {
            return Err(CodeGenError::VersionIncompatibility(format!(
                "{} requires {} or later, target is {}",
                what, minimum, self.version
            )));
        }
        Ok(())
    }

    /// Generate an expression with stack placement disabled, so the value
    /// survives later sub-expression emission in a temporary.
    fn generate_off_stack(&mut self, expr: &ZilExpression) -> Result<ZValue, CodeGenError> {
        let saved = self.stack_depth;
        self.stack_depth = STACK_DEPTH_LIMIT;
        let result = self.generate_expression(expr);
        self.stack_depth = saved;
        result
    }

    /// An operand list for one instruction. Only the last code-emitting
    /// operand may live on the stack; anything evaluated before it would
    /// pop in the wrong order, so those results go to temporaries.
    fn generate_operand_values(
        &mut self,
        args: &[ZilExpression],
    ) -> Result<Vec<ZValue>, CodeGenError> {
        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let later_emits = args[index + 1..].iter().any(emits_code);
            let value = if later_emits {
                self.generate_off_stack(arg)?
            } else {
                self.generate_expression(arg)?
            };
            values.push(value);
        }
        Ok(values)
    }

    fn generate_operands(&mut self, args: &[ZilExpression]) -> Result<Vec<String>, CodeGenError> {
        let values = self.generate_operand_values(args)?;
        Ok(values.iter().map(|v| self.use_operand(v)).collect())
    }

    /// Left-to-right fold; unary minus becomes `SUB 0,x`.
    fn generate_arithmetic(
        &mut self,
        mnemonic: &str,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        if args.is_empty() {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} needs at least one operand",
                mnemonic
            )));
        }

        if args.len() == 1 {
            let value = self.generate_expression(&args[0])?;
            if mnemonic == "SUB" {
                let text = self.use_operand(&value);
                let result = self.alloc_result();
                self.emit_store("SUB", &["0".to_string(), text], &result);
                return Ok(result);
            }
            return Ok(value);
        }

        // The accumulator must outlive emission of the next operand, so it
        // sits in a temporary whenever that operand emits code.
        let mut accumulator = if args[1..].iter().any(emits_code) {
            self.generate_off_stack(&args[0])?
        } else {
            self.generate_expression(&args[0])?
        };
        for (index, arg) in args[1..].iter().enumerate() {
            let rhs = self.generate_expression(arg)?;
            let left = self.use_operand(&accumulator);
            let right = self.use_operand(&rhs);
            let later_emits = args[index + 2..].iter().any(emits_code);
            let result = if later_emits {
                self.new_temp()
            } else {
                self.alloc_result()
            };
            self.emit_store(mnemonic, &[left, right], &result);
            accumulator = result;
        }
        Ok(accumulator)
    }

    /// A predicate in value position: branch to a local TRUE label, store
    /// 0, jump past, store 1 at the label.
    fn generate_predicate_value(
        &mut self,
        head: &str,
        mnemonic: &str,
        negated: bool,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        let mut operands = self.generate_operands(args)?;
        if head == "1?" {
            operands.push("1".to_string());
        }

        let true_label = self.new_label("TRU");
        let end_label = self.new_label("END");
        self.emit_branch(mnemonic, &operands, &true_label, !negated);

        let result = self.alloc_result();
        self.store_constant(&result, 0);
        self.emit_op("JUMP", &[end_label.clone()]);
        self.emit_label(&true_label);
        self.store_constant(&result, 1);
        self.emit_label(&end_label);
        Ok(result)
    }

    fn store_constant(&mut self, target: &ZValue, value: i16) {
        match target {
            ZValue::Stack => self.emit_line(format!("PUSH\t{}", value)),
            other => self.emit_line(format!("SET\t{},{}", other.zap_text(), value)),
        }
    }

    /// AND/OR in value position: direct short-circuit branching with a
    /// single result slot set at the tail, no per-operand temporaries.
    fn generate_logic_value(
        &mut self,
        is_and: bool,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        if args.is_empty() {
            return Ok(ZValue::Number(if is_and { 1 } else { 0 }));
        }

        let short_label = self.new_label(if is_and { "FLS" } else { "TRU" });
        let end_label = self.new_label("END");

        for arg in args {
            // AND bails to FALSE on the first false operand; OR bails to
            // TRUE on the first true operand.
            self.generate_condition(arg, &short_label, !is_and)?;
        }

        // Exactly one of the two stores runs at runtime, so the slot
        // claimed by alloc_result stays balanced.
        let result = self.alloc_result();
        self.store_constant(&result, if is_and { 1 } else { 0 });
        self.emit_op("JUMP", &[end_label.clone()]);
        self.emit_label(&short_label);
        self.store_constant(&result, if is_and { 0 } else { 1 });
        self.emit_label(&end_label);
        Ok(result)
    }

    fn generate_not_value(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        if args.len() != 1 {
            return Err(CodeGenError::InvalidFunction(
                "NOT takes exactly one operand".to_string(),
            ));
        }
        let true_label = self.new_label("TRU");
        let end_label = self.new_label("END");
        // Test once with flipped targets.
        self.generate_condition(&args[0], &true_label, false)?;
        let result = self.alloc_result();
        self.store_constant(&result, 0);
        self.emit_op("JUMP", &[end_label.clone()]);
        self.emit_label(&true_label);
        self.store_constant(&result, 1);
        self.emit_label(&end_label);
        Ok(result)
    }

    /// Direct condition test: predicates emit their bare branch form with
    /// the caller-chosen polarity; AND/OR/NOT flatten into branches; any
    /// other expression is evaluated and tested with ZERO?.
    pub fn generate_condition(
        &mut self,
        expr: &ZilExpression,
        label: &str,
        branch_on_true: bool,
    ) -> Result<(), CodeGenError> {
        // Constant conditions.
        if expr.is_atom_named("T") || expr.is_atom_named("ELSE") {
            if branch_on_true {
                self.emit_op("JUMP", &[label.to_string()]);
            }
            return Ok(());
        }

        if let ZilExpression::List(children) = expr {
            if let Some(ZilExpression::Atom(head)) = children.first() {
                let args = &children[1..];
                if let Some((mnemonic, negated)) = predicate_for(head) {
                    let mut operands = self.generate_operands(args)?;
                    if head == "1?" {
                        operands.push("1".to_string());
                    }
                    self.emit_branch(mnemonic, &operands, label, branch_on_true != negated);
                    return Ok(());
                }
                match head.as_str() {
                    "AND" => {
                        if branch_on_true {
                            // All operands must hold; a false one skips.
                            let skip = self.new_label("FLS");
                            let (last, init) = args.split_last().ok_or_else(|| {
                                CodeGenError::InvalidControlFlow("empty AND".to_string())
                            })?;
                            for arg in init {
                                self.generate_condition(arg, &skip, false)?;
                            }
                            self.generate_condition(last, label, true)?;
                            self.emit_label(&skip);
                        } else {
                            // The first false operand proves AND false.
                            for arg in args {
                                self.generate_condition(arg, label, false)?;
                            }
                        }
                        return Ok(());
                    }
                    "OR" => {
                        if branch_on_true {
                            // The first true operand proves OR true.
                            for arg in args {
                                self.generate_condition(arg, label, true)?;
                            }
                        } else {
                            // All operands must fail; a true one skips.
                            let skip = self.new_label("TRU");
                            let (last, init) = args.split_last().ok_or_else(|| {
                                CodeGenError::InvalidControlFlow("empty OR".to_string())
                            })?;
                            for arg in init {
                                self.generate_condition(arg, &skip, true)?;
                            }
                            self.generate_condition(last, label, false)?;
                            self.emit_label(&skip);
                        }
                        return Ok(());
                    }
                    "NOT" => {
                        let operand = args.first().ok_or_else(|| {
                            CodeGenError::InvalidControlFlow("empty NOT".to_string())
                        })?;
                        return self.generate_condition(operand, label, !branch_on_true);
                    }
                    _ => {}
                }
            }
        }

        // General case: evaluate to a value and test against zero.
        let value = self.generate_expression(expr)?;
        let text = self.use_operand(&value);
        // ZERO? branches on zero, so the polarity flips.
        self.emit_branch("ZERO?", &[text], label, !branch_on_true);
        Ok(())
    }

    /// COND: each clause tests with an on-false branch to its ?ELSn
    /// label; the final clause falls through to the implicit success path.
    fn generate_cond(&mut self, clauses: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let end_label = self.new_label("END");
        let mut end_used = false;

        for (index, clause) in clauses.iter().enumerate() {
            let ZilExpression::List(parts) = clause else {
                return Err(CodeGenError::InvalidControlFlow(
                    "COND clause must be a list".to_string(),
                ));
            };
            let Some((condition, body)) = parts.split_first() else {
                return Err(CodeGenError::InvalidControlFlow(
                    "COND clause must not be empty".to_string(),
                ));
            };

            let is_last = index == clauses.len() - 1;
            let always = condition.is_atom_named("T") || condition.is_atom_named("ELSE");
            let else_label = self.new_label("ELS");

            if !always {
                self.generate_condition(condition, &else_label, false)?;
            }

            self.with_region(|builder| {
                for expr in body {
                    builder.generate_statement(expr)?;
                }
                Ok(())
            })?;

            if !is_last && !self.ends_with_return() {
                self.emit_op("JUMP", &[end_label.clone()]);
                end_used = true;
            }

            if !always {
                self.emit_label(&else_label);
            }

            if always {
                // Later clauses are unreachable.
                break;
            }
        }

        if end_used {
            self.emit_label(&end_label);
        }
        Ok(ZValue::Null)
    }

    /// Binding list entries become locals of the enclosing routine;
    /// entries with defaults are initialized here.
    fn bind_locals(&mut self, bindings: &[ZilExpression]) -> Result<(), CodeGenError> {
        for binding in bindings {
            match binding {
                ZilExpression::Atom(name) => {
                    if self.locals.insert(name.clone()) {
                        self.extra_locals.push(name.clone());
                    }
                }
                ZilExpression::List(pair) => {
                    let [ZilExpression::Atom(name), default] = pair.as_slice() else {
                        return Err(CodeGenError::InvalidControlFlow(
                            "binding must be NAME or (NAME default)".to_string(),
                        ));
                    };
                    if self.locals.insert(name.clone()) {
                        self.extra_locals.push(name.clone());
                    }
                    let value = self.generate_expression(default)?;
                    let text = self.use_operand(&value);
                    self.emit_op("SET", &[name.clone(), text]);
                }
                other => {
                    return Err(CodeGenError::InvalidControlFlow(format!(
                        "binding must be NAME or (NAME default), got {}",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    /// REPEAT/PROG take an optional leading binding list: `()` or a list
    /// of NAME / (NAME default) entries.
    fn split_bindings<'b>(
        args: &'b [ZilExpression],
    ) -> (&'b [ZilExpression], &'b [ZilExpression]) {
        let is_binding = |b: &ZilExpression| match b {
            ZilExpression::Atom(_) => true,
            ZilExpression::List(pair) => {
                pair.len() == 2 && matches!(pair[0], ZilExpression::Atom(_))
            }
            _ => false,
        };
        match args.first() {
            Some(ZilExpression::List(bindings)) if bindings.iter().all(is_binding) => {
                (bindings.as_slice(), &args[1..])
            }
            _ => (&[], args),
        }
    }

    fn generate_repeat(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let (bindings, body) = Self::split_bindings(args);
        self.bind_locals(bindings)?;

        let start_label = self.new_label("PRG");
        let end_label = self.new_label("REP");
        self.emit_label(&start_label);
        self.loop_stack.push(LoopFrame {
            start_label: start_label.clone(),
            end_label: end_label.clone(),
        });

        let result = self.with_region(|builder| {
            for expr in body {
                builder.generate_statement(expr)?;
            }
            Ok(())
        });
        self.loop_stack.pop();
        result?;

        self.emit_op("JUMP", &[start_label]);
        self.emit_label(&end_label);
        Ok(ZValue::Null)
    }

    /// WHILE is REPEAT with a leading test.
    fn generate_while(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let Some((condition, body)) = args.split_first() else {
            return Err(CodeGenError::InvalidControlFlow(
                "WHILE needs a condition".to_string(),
            ));
        };

        let start_label = self.new_label("PRG");
        let end_label = self.new_label("REP");
        self.emit_label(&start_label);
        self.generate_condition(condition, &end_label, false)?;
        self.loop_stack.push(LoopFrame {
            start_label: start_label.clone(),
            end_label: end_label.clone(),
        });

        let result = self.with_region(|builder| {
            for expr in body {
                builder.generate_statement(expr)?;
            }
            Ok(())
        });
        self.loop_stack.pop();
        result?;

        self.emit_op("JUMP", &[start_label]);
        self.emit_label(&end_label);
        Ok(ZValue::Null)
    }

    fn generate_prog(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let (bindings, body) = Self::split_bindings(args);
        self.bind_locals(bindings)?;
        for expr in body {
            self.generate_statement(expr)?;
        }
        Ok(ZValue::Null)
    }

    fn generate_again(&mut self) -> Result<ZValue, CodeGenError> {
        let Some(frame) = self.loop_stack.last() else {
            return Err(CodeGenError::InvalidControlFlow(
                "AGAIN outside of a loop".to_string(),
            ));
        };
        let label = frame.start_label.clone();
        self.emit_op("JUMP", &[label]);
        Ok(ZValue::Null)
    }

    /// Bare RETURN inside a loop exits the loop; RETURN with a value (and
    /// bare RETURN outside a loop) returns from the routine.
    fn generate_return(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        match args.first() {
            None => {
                if let Some(frame) = self.loop_stack.last() {
                    let label = frame.end_label.clone();
                    self.emit_op("JUMP", &[label]);
                } else {
                    self.emit_line("RTRUE".to_string());
                }
            }
            Some(value_expr) => {
                let value = self.generate_expression(value_expr)?;
                let text = self.use_operand(&value);
                self.emit_op("RETURN", &[text]);
            }
        }
        Ok(ZValue::Null)
    }

    /// V5+ routine headers carry no default words; an optional parameter
    /// with a default gets an argument-count probe at routine entry.
    pub fn generate_optional_default(
        &mut self,
        argument_number: usize,
        name: &str,
        default: &ZilExpression,
    ) -> Result<(), CodeGenError> {
        let skip = self.new_label("ARG");
        self.emit_branch("ASSIGNED?", &[argument_number.to_string()], &skip, true);
        let value = self.generate_expression(default)?;
        let text = self.use_operand(&value);
        self.emit_op("SET", &[name.to_string(), text]);
        self.emit_label(&skip);
        Ok(())
    }

    fn generate_set(&mut self, head: &str, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let [target, value_expr] = args else {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} takes a variable and a value",
                head
            )));
        };

        // SETG, or assignment to anything spelled 'NAME, stores a global.
        let (mnemonic, target_text, result) = match target {
            ZilExpression::Atom(name) | ZilExpression::LocalVariable(name)
                if head == "SET" && self.locals.contains(name) =>
            {
                ("SET", name.clone(), ZValue::Local(name.clone()))
            }
            ZilExpression::Atom(name)
            | ZilExpression::LocalVariable(name)
            | ZilExpression::GlobalVariable(name) => (
                "SETG",
                format!("'{}", name),
                ZValue::Global(name.clone()),
            ),
            other => {
                return Err(CodeGenError::InvalidOperand(format!(
                    "{} target must be a variable, got {}",
                    head, other
                )));
            }
        };

        let value = self.generate_expression(value_expr)?;
        let text = self.use_operand(&value);
        self.emit_op(mnemonic, &[target_text, text]);
        // The assignment yields the assigned value without a temporary.
        Ok(result)
    }

    fn generate_store_op(
        &mut self,
        mnemonic: &str,
        arity: usize,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        if args.len() != arity {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} takes {} operands, got {}",
                mnemonic,
                arity,
                args.len()
            )));
        }
        let operands = self.generate_operands(args)?;
        let result = self.alloc_result();
        self.emit_store(mnemonic, &operands, &result);
        Ok(result)
    }

    fn generate_statement_op(
        &mut self,
        mnemonic: &str,
        arity: usize,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        if args.len() != arity {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} takes {} operands, got {}",
                mnemonic,
                arity,
                args.len()
            )));
        }
        let operands = self.generate_operands(args)?;
        self.emit_op(mnemonic, &operands);
        Ok(ZValue::Null)
    }

    /// FIRST?/NEXT? store their result and branch; in value position the
    /// branch simply targets the next line.
    fn generate_object_probe(
        &mut self,
        head: &str,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        if args.len() != 1 {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} takes one operand",
                head
            )));
        }
        let operands = self.generate_operands(args)?;
        let result = self.alloc_result();
        let next = self.new_label("CNT");
        self.emit_line(format!(
            "{}\t{} >{} /{}",
            head,
            operands.join(","),
            result.zap_text(),
            next
        ));
        self.emit_label(&next);
        Ok(result)
    }

    fn generate_tell(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg {
                ZilExpression::String(text) => {
                    self.emit_line(format!("PRINTI \"{}\"", escape_zap_string(text)));
                }
                ZilExpression::Atom(word) if word == "CR" || word == "CRLF" => {
                    self.emit_line("CRLF".to_string());
                }
                ZilExpression::Atom(word) if tell_prefix_for(word).is_some() => {
                    let mnemonic = tell_prefix_for(word).unwrap();
                    let Some(operand_expr) = iter.next() else {
                        return Err(CodeGenError::UnsupportedExpression(format!(
                            "TELL {} needs a following value",
                            word
                        )));
                    };
                    let value = self.generate_expression(operand_expr)?;
                    let text = self.use_operand(&value);
                    self.emit_op(mnemonic, &[text]);
                }
                other => {
                    // A computed value holds a string address; print it
                    // through print_paddr.
                    let value = self.generate_expression(other)?;
                    let text = self.use_operand(&value);
                    self.emit_op("PRINT", &[text]);
                }
            }
        }
        Ok(ZValue::Null)
    }

    fn generate_print(&mut self, head: &str, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        if args.len() != 1 {
            return Err(CodeGenError::InvalidFunction(format!(
                "{} takes one operand",
                head
            )));
        }
        let value = self.generate_expression(&args[0])?;
        let text = self.use_operand(&value);
        self.emit_op(head, &[text]);
        Ok(ZValue::Null)
    }

    /// PRINTI/PRINTR carry their text inline.
    fn generate_print_literal(
        &mut self,
        head: &str,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        match args {
            [ZilExpression::String(text)] => {
                self.emit_line(format!("{} \"{}\"", head, escape_zap_string(text)));
                Ok(ZValue::Null)
            }
            [other] => {
                let value = self.generate_expression(other)?;
                let text = self.use_operand(&value);
                self.emit_op(head, &[text]);
                Ok(ZValue::Null)
            }
            _ => Err(CodeGenError::InvalidFunction(format!(
                "{} takes one operand",
                head
            ))),
        }
    }

    fn generate_read(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        let operands = self.generate_operands(args)?;
        if self.version.number() >= 5 {
            let result = self.alloc_result();
            self.emit_store("READ", &operands, &result);
            Ok(result)
        } else {
            self.emit_op("READ", &operands);
            Ok(ZValue::Null)
        }
    }

    fn generate_input(&mut self, args: &[ZilExpression]) -> Result<ZValue, CodeGenError> {
        self.require_version(ZVersion::V4, "INPUT")?;
        let operands = self.generate_operands(args)?;
        let result = self.alloc_result();
        self.emit_store("INPUT", &operands, &result);
        Ok(result)
    }

    /// SAVE/RESTORE branch in V3 and store in V4+.
    fn generate_save_restore(&mut self, mnemonic: &str) -> Result<ZValue, CodeGenError> {
        if self.version.number() >= 4 {
            let result = self.alloc_result();
            self.emit_store(mnemonic, &[], &result);
            Ok(result)
        } else {
            let next = self.new_label("CNT");
            self.emit_branch(mnemonic, &[], &next, true);
            self.emit_label(&next);
            Ok(ZValue::Null)
        }
    }

    /// A user-routine call: CALL NAME[,args...] with the result stored per
    /// the stack policy.
    fn generate_user_call_values(
        &mut self,
        routine: &ZilExpression,
        args: &[ZilExpression],
    ) -> Result<ZValue, CodeGenError> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(routine.clone());
        all.extend(args.iter().cloned());
        let operands = self.generate_operands(&all)?;
        let result = self.alloc_result();
        self.emit_store("CALL", &operands, &result);
        Ok(result)
    }
}

/// Does lowering this expression emit instructions (as opposed to a bare
/// operand spelling)?
fn emits_code(expr: &ZilExpression) -> bool {
    matches!(
        expr,
        ZilExpression::List(_) | ZilExpression::Indirection(_)
    )
}

/// Escape a string for a quoted ZAP operand.
pub fn escape_zap_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
