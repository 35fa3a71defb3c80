// ZAP Assembler
// Drives the ZAP parser and the instruction encoder into a Z-Machine
// story file: dynamic memory (header, globals, object tables), static
// memory (dictionary, data tables), then high memory (routines, strings)
// with version-correct packed addresses, file length and checksum.

use crate::encoder::{calculate_instruction_size, encode_instruction, AssemblerSymbols};
use crate::error::AssembleError;
use crate::zap_parser::{ZapInstruction, ZapStatement};
use crate::ZVersion;
use indexmap::IndexMap;
use log::{debug, warn};

const HEADER_SIZE: usize = 64;
const GLOBAL_SLOTS: usize = 240;
/// Layout iterations stop shrinking well before this bound.
const MAX_LAYOUT_PASSES: usize = 16;

struct LocalSpec {
    name: String,
    default: Option<String>,
}

enum FunctionItem {
    Label(String),
    Instruction(ZapInstruction),
}

struct FunctionBlock {
    name: String,
    locals: Vec<LocalSpec>,
    items: Vec<FunctionItem>,
}

struct ObjectBlock {
    name: String,
    /// Property name -> raw operand fields, in source order.
    properties: Vec<(String, Vec<String>)>,
}

struct TableBlock {
    label: String,
    byte_wide: bool,
    values: Vec<String>,
}

pub struct Assembler {
    version: ZVersion,
    constants: IndexMap<String, i32>,
    globals: Vec<(String, Option<String>)>,
    /// Property name -> declared default.
    properties: IndexMap<String, Option<i32>>,
    objects: Vec<ObjectBlock>,
    functions: Vec<FunctionBlock>,
    tables: Vec<TableBlock>,
    strings: Vec<(String, String)>,
}

impl Assembler {
    pub fn new(version: ZVersion) -> Self {
        Assembler {
            version,
            constants: IndexMap::new(),
            globals: Vec::new(),
            properties: IndexMap::new(),
            objects: Vec::new(),
            functions: Vec::new(),
            tables: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn assemble(&mut self, statements: &[ZapStatement]) -> Result<Vec<u8>, AssembleError> {
        self.collect(statements)?;
        self.assign_missing_numbers();
        self.build_image()
    }

    // Collection

    fn collect(&mut self, statements: &[ZapStatement]) -> Result<(), AssembleError> {
        enum Context {
            TopLevel,
            Object,
            Function,
        }
        let mut context = Context::TopLevel;
        let mut pending_label: Option<String> = None;

        for statement in statements {
            match statement {
                ZapStatement::Directive { name, args, line } => {
                    match name.as_str() {
                        "ZVERSION" => {
                            let number = args
                                .first()
                                .and_then(|a| a.parse::<u8>().ok())
                                .and_then(ZVersion::from_number)
                                .ok_or_else(|| {
                                    AssembleError::InvalidDirective(format!(
                                        ".ZVERSION needs 3-8 (line {})",
                                        line
                                    ))
                                })?;
                            self.version = number;
                        }
                        "CONSTANT" => {
                            let [name, value] = args.as_slice() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".CONSTANT needs a name and a value (line {})",
                                    line
                                )));
                            };
                            let value = self.constant_value(value).ok_or_else(|| {
                                AssembleError::InvalidDirective(format!(
                                    ".CONSTANT {} has a non-constant value (line {})",
                                    name, line
                                ))
                            })?;
                            self.constants.insert(name.clone(), value);
                        }
                        "GLOBAL" => {
                            let [spec] = args.as_slice() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".GLOBAL needs a name (line {})",
                                    line
                                )));
                            };
                            match spec.split_once('=') {
                                Some((name, init)) => self
                                    .globals
                                    .push((name.to_string(), Some(init.to_string()))),
                                None => self.globals.push((spec.clone(), None)),
                            }
                        }
                        "PROPERTY" => {
                            let Some(name) = args.first() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".PROPERTY needs a name (line {})",
                                    line
                                )));
                            };
                            let default = args.get(1).and_then(|a| a.parse::<i32>().ok());
                            self.properties.insert(name.clone(), default);
                        }
                        "OBJECT" => {
                            let Some(name) = args.first() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".OBJECT needs a name (line {})",
                                    line
                                )));
                            };
                            self.objects.push(ObjectBlock {
                                name: name.clone(),
                                properties: Vec::new(),
                            });
                            context = Context::Object;
                        }
                        "ENDOBJECT" => context = Context::TopLevel,
                        "FUNCT" => {
                            let Some(spec) = args.first() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".FUNCT needs a name (line {})",
                                    line
                                )));
                            };
                            let locals = args[1..]
                                .iter()
                                .map(|a| parse_local_spec(a))
                                .collect::<Result<Vec<_>, _>>()?;
                            if locals.len() > 15 {
                                return Err(AssembleError::LayoutError(format!(
                                    "routine {} declares {} locals; the limit is 15",
                                    spec,
                                    locals.len()
                                )));
                            }
                            self.functions.push(FunctionBlock {
                                name: spec.clone(),
                                locals,
                                items: Vec::new(),
                            });
                            context = Context::Function;
                        }
                        "ENDI" => context = Context::TopLevel,
                        "STRING" => {
                            let [ident, text] = args.as_slice() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".STRING needs an identifier and a string (line {})",
                                    line
                                )));
                            };
                            let Some(text) = unquote_field(text) else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    ".STRING text must be quoted (line {})",
                                    line
                                )));
                            };
                            self.strings.push((ident.clone(), text));
                        }
                        "WORD" | "BYTE" => {
                            let Some(label) = pending_label.take() else {
                                return Err(AssembleError::InvalidDirective(format!(
                                    "data directive needs a label (line {})",
                                    line
                                )));
                            };
                            self.tables.push(TableBlock {
                                label,
                                byte_wide: name == "BYTE",
                                values: args.clone(),
                            });
                        }
                        "END" => break,
                        other => {
                            debug!("ignoring directive .{} (line {})", other, line);
                        }
                    }
                    continue;
                }
                ZapStatement::Label(name, _) => match context {
                    Context::Function => {
                        let function = self.functions.last_mut().unwrap();
                        function.items.push(FunctionItem::Label(name.clone()));
                    }
                    _ => pending_label = Some(name.clone()),
                },
                ZapStatement::Instruction(inst) => match context {
                    Context::Function => {
                        let function = self.functions.last_mut().unwrap();
                        if let Some(label) = &inst.label {
                            function.items.push(FunctionItem::Label(label.clone()));
                        }
                        function.items.push(FunctionItem::Instruction(inst.clone()));
                    }
                    Context::Object => {
                        let object = self.objects.last_mut().unwrap();
                        object
                            .properties
                            .push((inst.opcode.clone(), inst.operands.clone()));
                    }
                    Context::TopLevel => {
                        return Err(AssembleError::InvalidInstruction(format!(
                            "instruction outside a function (line {})",
                            inst.line
                        )));
                    }
                },
            }
        }
        Ok(())
    }

    fn constant_value(&self, text: &str) -> Option<i32> {
        if let Ok(n) = text.parse::<i32>() {
            return Some(n);
        }
        self.constants.get(text).copied()
    }

    /// Property and flag names used without a matching constant get
    /// numbers assigned here: properties count down from the version
    /// maximum, flags count up from zero.
    fn assign_missing_numbers(&mut self) {
        let mut used_property_numbers: Vec<i32> = self
            .constants
            .iter()
            .filter(|(k, _)| k.starts_with("P?"))
            .map(|(_, &v)| v)
            .collect();
        let mut next_property = self.version.max_property() as i32;
        let property_names: Vec<String> = self.properties.keys().cloned().collect();
        for name in property_names {
            let key = format!("P?{}", name);
            if !self.constants.contains_key(&key) {
                while used_property_numbers.contains(&next_property) && next_property > 1 {
                    next_property -= 1;
                }
                self.constants.insert(key, next_property);
                used_property_numbers.push(next_property);
                next_property -= 1;
            }
        }

        let mut next_flag = self
            .constants
            .iter()
            .filter(|(k, _)| k.starts_with("F?"))
            .map(|(_, &v)| v + 1)
            .max()
            .unwrap_or(0);
        let mut flag_names: Vec<String> = Vec::new();
        for object in &self.objects {
            for (prop, values) in &object.properties {
                if prop == "FLAGS" {
                    for value in values {
                        let name = value.strip_prefix("F?").unwrap_or(value);
                        flag_names.push(name.to_string());
                    }
                }
            }
        }
        for name in flag_names {
            let key = format!("F?{}", name);
            if !self.constants.contains_key(&key) {
                self.constants.insert(key, next_flag);
                next_flag += 1;
            }
        }
    }

    // Layout and emission

    fn build_image(&mut self) -> Result<Vec<u8>, AssembleError> {
        let version = self.version.number();
        let divisor = self.version.packed_divisor() as usize;

        if self.globals.len() > GLOBAL_SLOTS {
            return Err(AssembleError::LayoutError(format!(
                "{} globals exceed the {} available slots",
                self.globals.len(),
                GLOBAL_SLOTS
            )));
        }

        let mut symbols = AssemblerSymbols::new(version);
        symbols.constants = self.constants.clone();
        for (index, (name, _)) in self.globals.iter().enumerate() {
            symbols.globals.insert(name.clone(), 16 + index as u8);
        }
        // Objects are addressed by number.
        for (index, object) in self.objects.iter().enumerate() {
            symbols
                .constants
                .insert(object.name.clone(), index as i32 + 1);
        }

        // Fixed-size regions.
        let globals_base = HEADER_SIZE;
        let object_base = globals_base + GLOBAL_SLOTS * 2;
        let object_size = self.object_section_size()?;
        let dictionary_base = object_base + object_size;
        let dictionary_size = 7; // 3 separators, entry length, zero count
        let mut tables_base = dictionary_base + dictionary_size;
        if tables_base % 2 != 0 {
            tables_base += 1;
        }

        let mut address = tables_base;
        for table in &self.tables {
            symbols.labels.insert(table.label.clone(), address);
            address += table_size(table);
        }
        let static_base = dictionary_base;
        let code_base = address;

        // Iterate code layout to a fixpoint: label addresses may shrink
        // branches, which moves labels again.
        let mut code_end = code_base;
        for pass in 0..MAX_LAYOUT_PASSES {
            let (end, changed) = self.layout_code(code_base, divisor, &mut symbols)?;
            code_end = end;
            if !changed {
                debug!("code layout stable after {} passes", pass + 1);
                break;
            }
        }

        // Strings follow the code, aligned for packing.
        let mut string_address = align_to(code_end, divisor);
        for (ident, text) in &self.strings {
            let packed = (string_address / divisor) as u32;
            if packed > 0xFFFF {
                return Err(AssembleError::LayoutError(format!(
                    "string {} lands beyond the packed address range",
                    ident
                )));
            }
            symbols.strings.insert(ident.clone(), packed);
            string_address += encode_zscii(text, version).len();
        }
        let file_end = align_to(string_address, length_divisor(version));

        if file_end > self.version.max_file_size() as usize {
            return Err(AssembleError::LayoutError(format!(
                "story file of {} bytes exceeds the {} limit for v{}",
                file_end,
                self.version.max_file_size(),
                version
            )));
        }

        // Emission.
        let mut image = vec![0u8; file_end];
        self.emit_globals(&mut image, globals_base, &symbols)?;
        self.emit_object_section(&mut image, object_base, &symbols)?;
        emit_dictionary(&mut image, dictionary_base, version);
        self.emit_tables(&mut image, &symbols)?;
        let entry_pc = self.emit_code(&mut image, code_base, divisor, &symbols)?;
        self.emit_strings(&mut image, align_to(code_end, divisor), version);

        self.emit_header(
            &mut image,
            version,
            code_base,
            static_base,
            dictionary_base,
            object_base,
            globals_base,
            entry_pc,
            divisor,
        );

        // Checksum over everything past the header, then the length word.
        let length_word = (file_end / length_divisor(version)) as u16;
        image[0x1A..0x1C].copy_from_slice(&length_word.to_be_bytes());
        let checksum: u32 = image[HEADER_SIZE..]
            .iter()
            .map(|&b| b as u32)
            .sum::<u32>()
            & 0xFFFF;
        image[0x1C..0x1E].copy_from_slice(&(checksum as u16).to_be_bytes());

        Ok(image)
    }

    fn layout_code(
        &self,
        code_base: usize,
        divisor: usize,
        symbols: &mut AssemblerSymbols,
    ) -> Result<(usize, bool), AssembleError> {
        let mut address = code_base;
        let mut changed = false;
        let version = symbols.version;

        for function in &self.functions {
            address = align_to(address, divisor);
            let packed = (address / divisor) as u32;
            if packed > 0xFFFF {
                return Err(AssembleError::LayoutError(format!(
                    "routine {} lands beyond the packed address range",
                    function.name
                )));
            }
            if symbols.routines.insert(function.name.clone(), packed) != Some(packed) {
                changed = true;
            }

            address += 1; // locals count byte
            if version < 5 {
                address += function.locals.len() * 2;
            }

            symbols.locals = local_numbers(function);
            for item in &function.items {
                match item {
                    FunctionItem::Label(label) => {
                        if symbols.labels.insert(label.clone(), address) != Some(address) {
                            changed = true;
                        }
                    }
                    FunctionItem::Instruction(inst) => {
                        address += calculate_instruction_size(inst, address, symbols)?;
                    }
                }
            }
        }
        symbols.locals = IndexMap::new();
        Ok((address, changed))
    }

    fn emit_code(
        &self,
        image: &mut [u8],
        code_base: usize,
        divisor: usize,
        symbols: &AssemblerSymbols,
    ) -> Result<usize, AssembleError> {
        let version = symbols.version;
        let mut symbols = symbols.clone();
        let mut address = code_base;
        let mut entry_pc = 0usize;

        for function in &self.functions {
            address = align_to(address, divisor);
            let function_start = address;
            image[address] = function.locals.len() as u8;
            address += 1;
            if version < 5 {
                for spec in &function.locals {
                    let value = spec
                        .default
                        .as_deref()
                        .and_then(|d| self.constant_value(d))
                        .unwrap_or(0) as u16;
                    image[address..address + 2].copy_from_slice(&value.to_be_bytes());
                    address += 2;
                }
            }

            // The main routine supplies the start of execution: its first
            // instruction for a direct PC, the routine itself for V6's
            // packed main-routine field.
            let is_entry = entry_pc == 0 || function.name == "GO" || function.name == "MAIN";
            if is_entry {
                entry_pc = if version == 6 { function_start } else { address };
            }

            symbols.locals = local_numbers(function);
            for item in &function.items {
                let FunctionItem::Instruction(inst) = item else {
                    continue;
                };
                let bytes = encode_instruction(inst, &symbols, address)?;
                image[address..address + bytes.len()].copy_from_slice(&bytes);
                address += bytes.len();
            }
        }
        Ok(entry_pc)
    }

    fn emit_globals(
        &self,
        image: &mut [u8],
        base: usize,
        symbols: &AssemblerSymbols,
    ) -> Result<(), AssembleError> {
        for (index, (name, init)) in self.globals.iter().enumerate() {
            let value = match init {
                None => 0u16,
                Some(text) => self.resolve_data_word(text, symbols).ok_or_else(|| {
                    AssembleError::UndefinedLabel(format!(
                        "initializer '{}' for global {}",
                        text, name
                    ))
                })?,
            };
            let at = base + index * 2;
            image[at..at + 2].copy_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }

    /// A data word: number, constant, object, routine (packed), string
    /// (packed), or table/label (byte address).
    fn resolve_data_word(&self, text: &str, symbols: &AssemblerSymbols) -> Option<u16> {
        if let Ok(n) = text.parse::<i32>() {
            return Some(n as u16);
        }
        if let Some(&v) = symbols.constants.get(text) {
            return Some(v as u16);
        }
        if let Some(&p) = symbols.routines.get(text) {
            return Some(p as u16);
        }
        if let Some(&p) = symbols.strings.get(text) {
            return Some(p as u16);
        }
        if let Some(&a) = symbols.labels.get(text) {
            return Some(a as u16);
        }
        None
    }

    // Object tables

    fn object_entry_size(&self) -> usize {
        if self.version.number() <= 3 {
            9
        } else {
            14
        }
    }

    fn attribute_bytes(&self) -> usize {
        if self.version.number() <= 3 {
            4
        } else {
            6
        }
    }

    fn object_section_size(&self) -> Result<usize, AssembleError> {
        let defaults = self.version.max_property() as usize * 2;
        let entries = self.objects.len() * self.object_entry_size();
        let mut property_tables = 0;
        for object in &self.objects {
            property_tables += self.property_table_size(object)?;
        }
        Ok(defaults + entries + property_tables)
    }

    fn short_name_of(&self, object: &ObjectBlock) -> String {
        for (name, values) in &object.properties {
            if name == "DESC" {
                if let Some(text) = values.first().and_then(|v| unquote_field(v)) {
                    return text;
                }
            }
        }
        String::new()
    }

    /// Properties stored in an object's table: everything except FLAGS,
    /// IN/LOC (tree links) and a string-valued DESC (the short name).
    fn stored_properties<'a>(
        &self,
        object: &'a ObjectBlock,
    ) -> Vec<(&'a String, &'a Vec<String>)> {
        object
            .properties
            .iter()
            .filter(|(name, values)| {
                !matches!(name.as_str(), "FLAGS" | "IN" | "LOC")
                    && !(name == "DESC" && values.first().is_some_and(|v| v.starts_with('"')))
            })
            .map(|(name, values)| (name, values))
            .collect()
    }

    fn property_table_size(&self, object: &ObjectBlock) -> Result<usize, AssembleError> {
        let version = self.version.number();
        let short_name = self.short_name_of(object);
        let mut size = 1 + encode_zscii(&short_name, version).len();
        for (name, values) in self.stored_properties(object) {
            let data_len = values.len() * 2;
            let limit = if version <= 3 { 8 } else { 64 };
            if data_len > limit {
                return Err(AssembleError::LayoutError(format!(
                    "property {} of {} holds {} bytes; the limit is {}",
                    name, object.name, data_len, limit
                )));
            }
            let header = if version <= 3 {
                1
            } else if data_len <= 2 {
                1
            } else {
                2
            };
            size += header + data_len;
        }
        Ok(size + 1) // terminator
    }

    fn property_number(&self, name: &str) -> Result<u8, AssembleError> {
        self.constants
            .get(&format!("P?{}", name))
            .map(|&v| v as u8)
            .ok_or_else(|| {
                AssembleError::UndefinedLabel(format!("property number for {}", name))
            })
    }

    fn emit_object_section(
        &self,
        image: &mut [u8],
        base: usize,
        symbols: &AssemblerSymbols,
    ) -> Result<(), AssembleError> {
        let version = self.version.number();
        let max_property = self.version.max_property() as usize;

        // Property defaults.
        for (name, default) in &self.properties {
            if let Some(value) = default {
                let number = self.property_number(name)? as usize;
                if number >= 1 && number <= max_property {
                    let at = base + (number - 1) * 2;
                    image[at..at + 2].copy_from_slice(&(*value as u16).to_be_bytes());
                }
            }
        }

        let entries_base = base + max_property * 2;
        let mut property_address =
            entries_base + self.objects.len() * self.object_entry_size();

        // Containment tree: parent, first child and sibling chains in
        // declaration order.
        let count = self.objects.len();
        let mut parents = vec![0usize; count + 1];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count + 1];
        for (index, object) in self.objects.iter().enumerate() {
            let number = index + 1;
            for (name, values) in &object.properties {
                if matches!(name.as_str(), "IN" | "LOC") {
                    if let Some(parent_name) = values.first() {
                        match symbols.constants.get(parent_name) {
                            Some(&p) if p >= 1 && p as usize <= count => {
                                parents[number] = p as usize;
                                children[p as usize].push(number);
                            }
                            _ => warn!(
                                "object {}: unknown container {}",
                                object.name, parent_name
                            ),
                        }
                    }
                }
            }
        }
        let mut siblings = vec![0usize; count + 1];
        let mut first_child = vec![0usize; count + 1];
        for (parent, kids) in children.iter().enumerate() {
            if let Some((&first, rest)) = kids.split_first() {
                first_child[parent] = first;
                let mut previous = first;
                for &kid in rest {
                    siblings[previous] = kid;
                    previous = kid;
                }
            }
        }

        for (index, object) in self.objects.iter().enumerate() {
            let number = index + 1;
            let entry = entries_base + index * self.object_entry_size();

            // Attribute flags.
            let attribute_bytes = self.attribute_bytes();
            for (name, values) in &object.properties {
                if name == "FLAGS" {
                    for value in values {
                        let resolved = symbols
                            .constants
                            .get(value.as_str())
                            .or_else(|| symbols.constants.get(&format!("F?{}", value)));
                        let Some(&bit) = resolved else {
                            warn!("object {}: unknown flag {}", object.name, value);
                            continue;
                        };
                        let bit = bit as usize;
                        if bit / 8 < attribute_bytes {
                            image[entry + bit / 8] |= 0x80 >> (bit % 8);
                        }
                    }
                }
            }

            // Tree links and property table address.
            if version <= 3 {
                image[entry + 4] = parents[number] as u8;
                image[entry + 5] = siblings[number] as u8;
                image[entry + 6] = first_child[number] as u8;
                image[entry + 7..entry + 9]
                    .copy_from_slice(&(property_address as u16).to_be_bytes());
            } else {
                image[entry + 6..entry + 8]
                    .copy_from_slice(&(parents[number] as u16).to_be_bytes());
                image[entry + 8..entry + 10]
                    .copy_from_slice(&(siblings[number] as u16).to_be_bytes());
                image[entry + 10..entry + 12]
                    .copy_from_slice(&(first_child[number] as u16).to_be_bytes());
                image[entry + 12..entry + 14]
                    .copy_from_slice(&(property_address as u16).to_be_bytes());
            }

            property_address = self.emit_property_table(
                image,
                property_address,
                object,
                symbols,
            )?;
        }
        Ok(())
    }

    fn emit_property_table(
        &self,
        image: &mut [u8],
        base: usize,
        object: &ObjectBlock,
        symbols: &AssemblerSymbols,
    ) -> Result<usize, AssembleError> {
        let version = self.version.number();
        let mut at = base;

        let short_name = self.short_name_of(object);
        let encoded = encode_zscii(&short_name, version);
        image[at] = (encoded.len() / 2) as u8;
        at += 1;
        image[at..at + encoded.len()].copy_from_slice(&encoded);
        at += encoded.len();

        // Properties are stored in descending number order.
        let mut stored: Vec<(u8, Vec<u8>)> = Vec::new();
        for (name, values) in self.stored_properties(object) {
            let number = self.property_number(name)?;
            let mut data = Vec::with_capacity(values.len() * 2);
            for value in values {
                let word = self.resolve_data_word(value, symbols).unwrap_or_else(|| {
                    warn!(
                        "object {}: property {} operand '{}' unresolved, using 0",
                        object.name, name, value
                    );
                    0
                });
                data.extend_from_slice(&word.to_be_bytes());
            }
            stored.push((number, data));
        }
        stored.sort_by(|a, b| b.0.cmp(&a.0));

        for (number, data) in stored {
            if version <= 3 {
                image[at] = ((data.len() as u8 - 1) << 5) | number;
                at += 1;
            } else if data.len() <= 2 {
                let two_bit = if data.len() == 2 { 0x40 } else { 0x00 };
                image[at] = two_bit | number;
                at += 1;
            } else {
                image[at] = 0x80 | number;
                image[at + 1] = (data.len() as u8) & 0x3F;
                at += 2;
            }
            image[at..at + data.len()].copy_from_slice(&data);
            at += data.len();
        }

        image[at] = 0; // terminator
        Ok(at + 1)
    }

    fn emit_tables(
        &self,
        image: &mut [u8],
        symbols: &AssemblerSymbols,
    ) -> Result<(), AssembleError> {
        for table in &self.tables {
            let mut at = symbols.labels[&table.label];
            for value in &table.values {
                let word = self.resolve_data_word(value, symbols).ok_or_else(|| {
                    AssembleError::UndefinedLabel(format!(
                        "table {} element '{}'",
                        table.label, value
                    ))
                })?;
                if table.byte_wide {
                    image[at] = word as u8;
                    at += 1;
                } else {
                    image[at..at + 2].copy_from_slice(&word.to_be_bytes());
                    at += 2;
                }
            }
        }
        Ok(())
    }

    fn emit_strings(&self, image: &mut [u8], base: usize, version: u8) {
        let mut at = base;
        for (_, text) in &self.strings {
            let bytes = encode_zscii(text, version);
            image[at..at + bytes.len()].copy_from_slice(&bytes);
            at += bytes.len();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_header(
        &self,
        image: &mut [u8],
        version: u8,
        high_base: usize,
        static_base: usize,
        dictionary_base: usize,
        object_base: usize,
        globals_base: usize,
        entry_pc: usize,
        divisor: usize,
    ) {
        image[0x00] = version;
        image[0x01] = 0; // flags 1
        image[0x02..0x04].copy_from_slice(&1u16.to_be_bytes()); // release
        image[0x04..0x06].copy_from_slice(&(high_base as u16).to_be_bytes());
        let pc_word = if version == 6 {
            (entry_pc / divisor) as u16
        } else {
            entry_pc as u16
        };
        image[0x06..0x08].copy_from_slice(&pc_word.to_be_bytes());
        image[0x08..0x0A].copy_from_slice(&(dictionary_base as u16).to_be_bytes());
        image[0x0A..0x0C].copy_from_slice(&(object_base as u16).to_be_bytes());
        image[0x0C..0x0E].copy_from_slice(&(globals_base as u16).to_be_bytes());
        image[0x0E..0x10].copy_from_slice(&(static_base as u16).to_be_bytes());
        image[0x10..0x12].copy_from_slice(&0u16.to_be_bytes()); // flags 2
        image[0x12..0x18].copy_from_slice(b"000000"); // serial
        image[0x18..0x1A].copy_from_slice(&0u16.to_be_bytes()); // abbreviations
        // 0x1A length and 0x1C checksum are patched by the caller.
        // V6/V7 routine and string offsets; zero keeps packed addresses
        // uniform with V4/V5 semantics.
        image[0x28..0x2A].copy_from_slice(&0u16.to_be_bytes());
        image[0x2A..0x2C].copy_from_slice(&0u16.to_be_bytes());
        // Standard revision 1.1.
        image[0x32] = 1;
        image[0x33] = 1;
    }
}

fn parse_local_spec(text: &str) -> Result<LocalSpec, AssembleError> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    if inner.is_empty() {
        return Err(AssembleError::InvalidDirective(format!(
            "empty local spec '{}'",
            text
        )));
    }
    match inner.split_once('=') {
        Some((name, default)) => Ok(LocalSpec {
            name: name.to_string(),
            default: Some(default.to_string()),
        }),
        None => Ok(LocalSpec {
            name: inner.to_string(),
            default: None,
        }),
    }
}

fn local_numbers(function: &FunctionBlock) -> IndexMap<String, u8> {
    function
        .locals
        .iter()
        .enumerate()
        .map(|(index, spec)| (spec.name.clone(), index as u8 + 1))
        .collect()
}

fn table_size(table: &TableBlock) -> usize {
    if table.byte_wide {
        let n = table.values.len();
        n + (n % 2) // keep the next table word-aligned
    } else {
        table.values.len() * 2
    }
}

fn emit_dictionary(image: &mut [u8], base: usize, version: u8) {
    image[base] = 3;
    image[base + 1] = b'.';
    image[base + 2] = b',';
    image[base + 3] = b'"';
    image[base + 4] = if version <= 3 { 7 } else { 9 }; // entry length
    image[base + 5..base + 7].copy_from_slice(&0u16.to_be_bytes()); // entries
}

fn align_to(address: usize, alignment: usize) -> usize {
    address.div_ceil(alignment) * alignment
}

/// Header file-length units: words in V1-3, 4-byte units in V4-5,
/// 8-byte units in V6+.
fn length_divisor(version: u8) -> usize {
    match version {
        1..=3 => 2,
        4 | 5 => 4,
        _ => 8,
    }
}

fn unquote_field(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => break,
            }
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

// ZSCII string encoding: three 5-bit Z-characters per 16-bit word, high
// bit set on the final word. Alphabet A0 is lowercase, A1 uppercase
// (shift 4), A2 punctuation and digits (shift 5); everything else goes
// through the 10-bit ZSCII escape.

const ALPHABET_A2: &[u8] = b"\n0123456789.,!?_#'\"/\\-:()";

pub fn encode_zscii(text: &str, _version: u8) -> Vec<u8> {
    let mut zchars: Vec<u8> = Vec::with_capacity(text.len() * 2);

    for ch in text.chars() {
        match ch {
            ' ' => zchars.push(0),
            'a'..='z' => zchars.push(ch as u8 - b'a' + 6),
            'A'..='Z' => {
                zchars.push(4);
                zchars.push(ch as u8 - b'A' + 6);
            }
            other => {
                let byte = if other.is_ascii() { other as u8 } else { b'?' };
                match ALPHABET_A2.iter().position(|&c| c == byte) {
                    Some(index) => {
                        zchars.push(5);
                        zchars.push(index as u8 + 7);
                    }
                    None => {
                        // 10-bit ZSCII escape.
                        zchars.push(5);
                        zchars.push(6);
                        zchars.push(byte >> 5);
                        zchars.push(byte & 0x1F);
                    }
                }
            }
        }
    }

    // Pad to a multiple of three with shift-5 (harmless at the tail).
    while zchars.len() % 3 != 0 || zchars.is_empty() {
        zchars.push(5);
    }

    let mut out = Vec::with_capacity(zchars.len() / 3 * 2);
    for (index, triple) in zchars.chunks(3).enumerate() {
        let mut word: u16 =
            ((triple[0] as u16) << 10) | ((triple[1] as u16) << 5) | triple[2] as u16;
        if index == zchars.len() / 3 - 1 {
            word |= 0x8000;
        }
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

#[cfg(test)]
#[path = "assembler_tests.rs"]
mod tests;
