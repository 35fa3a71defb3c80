// Z-Machine Instruction Encoder
// Encodes parsed ZAP instructions into bytecode: form selection by opcode
// byte range, operand type bytes, big-endian operands, result store
// bytes, and 1- or 2-byte branch offsets.

use crate::assembler::encode_zscii;
use crate::error::AssembleError;
use crate::opcodes::lookup_opcode;
use crate::zap_parser::ZapInstruction;
use indexmap::IndexMap;

/// Resolved names visible to the encoder. Routine and string entries hold
/// packed addresses; labels hold byte addresses; globals hold variable
/// numbers 16-255; locals (current routine only) hold 1-15.
#[derive(Debug, Default, Clone)]
pub struct AssemblerSymbols {
    pub version: u8,
    pub labels: IndexMap<String, usize>,
    pub routines: IndexMap<String, u32>,
    pub strings: IndexMap<String, u32>,
    pub constants: IndexMap<String, i32>,
    pub globals: IndexMap<String, u8>,
    pub locals: IndexMap<String, u8>,
}

impl AssemblerSymbols {
    pub fn new(version: u8) -> Self {
        AssemblerSymbols {
            version,
            ..Default::default()
        }
    }

    /// Variable number for a known variable name (STACK, local, global).
    pub fn variable_number(&self, name: &str) -> Option<u8> {
        if name == "STACK" {
            return Some(0);
        }
        if let Some(&n) = self.locals.get(name) {
            return Some(n);
        }
        self.globals.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Small(u8),
    Large(u16),
    Variable(u8),
}

impl Operand {
    fn type_bits(&self) -> u8 {
        match self {
            Operand::Large(_) => 0b00,
            Operand::Small(_) => 0b01,
            Operand::Variable(_) => 0b10,
        }
    }

    fn push_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Operand::Small(v) | Operand::Variable(v) => out.push(*v),
            Operand::Large(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

/// Opcodes whose first operand is a variable *number* (store, inc, dec,
/// dec_chk, inc_chk, pull): a bare variable name there encodes as a small
/// constant holding the number.
fn takes_variable_number(opcode_byte: u8) -> bool {
    matches!(opcode_byte, 0x04 | 0x05 | 0x0D | 0x85 | 0x86 | 0xE9)
}

/// Encode one instruction at `current_address`.
pub fn encode_instruction(
    inst: &ZapInstruction,
    symbols: &AssemblerSymbols,
    current_address: usize,
) -> Result<Vec<u8>, AssembleError> {
    encode_inner(inst, symbols, current_address, false)
}

/// Size of the encoding without producing bytes. Unknown forward symbols
/// are assumed to be large constants and 2-byte branches, matching the
/// final encoding produced once the layout fixpoint is reached.
pub fn calculate_instruction_size(
    inst: &ZapInstruction,
    current_address: usize,
    symbols: &AssemblerSymbols,
) -> Result<usize, AssembleError> {
    Ok(encode_inner(inst, symbols, current_address, true)?.len())
}

fn encode_inner(
    inst: &ZapInstruction,
    symbols: &AssemblerSymbols,
    current_address: usize,
    sizing: bool,
) -> Result<Vec<u8>, AssembleError> {
    let info = lookup_opcode(&inst.opcode, symbols.version)?;
    let opcode_byte = info.byte;
    let mut out = Vec::with_capacity(8);

    // print / print_ret carry inline ZSCII text instead of operands.
    if opcode_byte == 0xB2 || opcode_byte == 0xB3 {
        let [text] = inst.operands.as_slice() else {
            return Err(AssembleError::InvalidInstruction(format!(
                "{} takes one string operand (line {})",
                inst.opcode, inst.line
            )));
        };
        let Some(text) = unquote(text) else {
            return Err(AssembleError::InvalidOperand(format!(
                "{} operand must be a quoted string (line {})",
                inst.opcode, inst.line
            )));
        };
        out.push(opcode_byte);
        out.extend_from_slice(&encode_zscii(&text, symbols.version));
        return Ok(out);
    }

    // jump takes a label and encodes a relative word offset.
    let operands = if opcode_byte == 0x8C && inst.operands.len() == 1 {
        vec![resolve_jump_operand(
            &inst.operands[0],
            symbols,
            current_address,
            sizing,
        )?]
    } else {
        let mut resolved = Vec::with_capacity(inst.operands.len());
        for (index, text) in inst.operands.iter().enumerate() {
            let mut operand = resolve_operand(text, symbols, sizing, inst.line)?;
            if index == 0 && takes_variable_number(opcode_byte) {
                if let Operand::Variable(n) = operand {
                    operand = Operand::Small(n);
                }
            }
            resolved.push(operand);
        }
        resolved
    };

    match opcode_byte {
        // VAR forms, including the VAR re-encoding of 2OP opcodes.
        0xC0..=0xFF => {
            encode_var(opcode_byte, &operands, &mut out, inst)?;
        }
        // 0OP short form.
        0xB0..=0xBF => {
            if !operands.is_empty() {
                return Err(AssembleError::InvalidInstruction(format!(
                    "{} takes no operands (line {})",
                    inst.opcode, inst.line
                )));
            }
            out.push(opcode_byte);
        }
        // 1OP short form: bits 5-4 carry the operand type.
        0x80..=0xAF => {
            let [operand] = operands.as_slice() else {
                return Err(AssembleError::InvalidInstruction(format!(
                    "{} takes exactly one operand (line {})",
                    inst.opcode, inst.line
                )));
            };
            out.push((opcode_byte & 0x8F) | (operand.type_bits() << 4));
            operand.push_bytes(&mut out);
        }
        // 2OP long form; large constants or operand counts other than
        // two force the VAR re-encoding.
        0x00..=0x7F => {
            let needs_var = operands.len() != 2
                || operands.iter().any(|o| matches!(o, Operand::Large(_)));
            if needs_var {
                encode_var(0xC0 | opcode_byte, &operands, &mut out, inst)?;
            } else {
                let mut byte = opcode_byte & 0x1F;
                if matches!(operands[0], Operand::Variable(_)) {
                    byte |= 0x40;
                }
                if matches!(operands[1], Operand::Variable(_)) {
                    byte |= 0x20;
                }
                out.push(byte);
                operands[0].push_bytes(&mut out);
                operands[1].push_bytes(&mut out);
            }
        }
    }

    // Result store byte.
    if let Some(target) = &inst.result_target {
        let number = symbols.variable_number(target).ok_or_else(|| {
            AssembleError::InvalidOperand(format!(
                "unknown store target '{}' (line {})",
                target, inst.line
            ))
        })?;
        out.push(number);
    }

    // Branch offset.
    if let Some(target) = &inst.branch_target {
        encode_branch(
            target,
            inst.branch_on_true,
            symbols,
            current_address,
            out.len(),
            sizing,
            &mut out,
        )?;
    }

    Ok(out)
}

fn encode_var(
    encoded_byte: u8,
    operands: &[Operand],
    out: &mut Vec<u8>,
    inst: &ZapInstruction,
) -> Result<(), AssembleError> {
    // call_vs2 / call_vn2 carry two type bytes and up to eight operands.
    let double = encoded_byte == 0xEC || encoded_byte == 0xFA;
    let max = if double { 8 } else { 4 };
    if operands.len() > max {
        return Err(AssembleError::InvalidInstruction(format!(
            "{} takes at most {} operands (line {})",
            inst.opcode, max, inst.line
        )));
    }

    out.push(encoded_byte);
    let type_byte_count = if double { 2 } else { 1 };
    for byte_index in 0..type_byte_count {
        let mut type_byte = 0u8;
        for slot in 0..4 {
            let bits = operands
                .get(byte_index * 4 + slot)
                .map(|o| o.type_bits())
                .unwrap_or(0b11);
            type_byte |= bits << (6 - 2 * slot);
        }
        out.push(type_byte);
    }
    for operand in operands {
        operand.push_bytes(out);
    }
    Ok(())
}

/// Branch encoding: offset = target - (address after the branch bytes)
/// + 2. Single-byte form for offsets in -32..=31 (bit 7 set, bit 6 =
/// condition, 6-bit offset); otherwise the 14-bit 2-byte form. Offsets 0
/// and 1 are reserved for return-false / return-true.
#[allow(clippy::too_many_arguments)]
fn encode_branch(
    target: &str,
    on_true: bool,
    symbols: &AssemblerSymbols,
    current_address: usize,
    bytes_so_far: usize,
    sizing: bool,
    out: &mut Vec<u8>,
) -> Result<(), AssembleError> {
    let condition_bit = if on_true { 0x40u8 } else { 0x00 };

    // Special targets return directly instead of branching.
    match target {
        "TRUE" | "RTRUE" => {
            out.push(0x80 | condition_bit | 1);
            return Ok(());
        }
        "FALSE" | "RFALSE" => {
            out.push(0x80 | condition_bit);
            return Ok(());
        }
        _ => {}
    }

    let Some(&target_address) = symbols.labels.get(target) else {
        if sizing {
            // Forward reference: assume the 2-byte form.
            out.push(condition_bit);
            out.push(0);
            return Ok(());
        }
        return Err(AssembleError::UndefinedLabel(target.to_string()));
    };

    // Try the short form first: its end address differs from the long
    // form's, so the offset must be computed per form.
    let short_offset =
        target_address as i32 - (current_address + bytes_so_far + 1) as i32 + 2;
    if (-32..=31).contains(&short_offset) && short_offset != 0 && short_offset != 1 {
        out.push(0x80 | condition_bit | (short_offset as u8 & 0x3F));
        return Ok(());
    }

    let long_offset =
        target_address as i32 - (current_address + bytes_so_far + 2) as i32 + 2;
    if !(-8192..=8191).contains(&long_offset) {
        return Err(AssembleError::BranchTargetOutOfRange(long_offset));
    }
    let packed = (long_offset as u16) & 0x3FFF;
    out.push(condition_bit | ((packed >> 8) as u8));
    out.push((packed & 0xFF) as u8);
    Ok(())
}

fn resolve_jump_operand(
    text: &str,
    symbols: &AssemblerSymbols,
    current_address: usize,
    sizing: bool,
) -> Result<Operand, AssembleError> {
    // A literal number is used as-is.
    if let Ok(n) = text.parse::<i32>() {
        return Ok(Operand::Large(n as u16));
    }
    let Some(&target) = symbols.labels.get(text) else {
        if sizing {
            return Ok(Operand::Large(0));
        }
        return Err(AssembleError::UndefinedLabel(text.to_string()));
    };
    // jump: new PC = address after instruction + offset - 2. The
    // instruction is 1 opcode byte + 2 operand bytes.
    let offset = target as i32 - (current_address + 3) as i32 + 2;
    Ok(Operand::Large(offset as u16))
}

fn resolve_operand(
    text: &str,
    symbols: &AssemblerSymbols,
    sizing: bool,
    line: usize,
) -> Result<Operand, AssembleError> {
    if text.starts_with('"') {
        return Err(AssembleError::InvalidOperand(format!(
            "string operand not allowed here (line {})",
            line
        )));
    }

    // Numeric literal: small when it fits a byte, large otherwise.
    if let Ok(n) = text.parse::<i32>() {
        return Ok(constant_operand(n));
    }

    if text == "STACK" {
        return Ok(Operand::Variable(0));
    }

    // 'NAME resolves through the symbol table.
    if let Some(name) = text.strip_prefix('\'') {
        if let Some(&n) = symbols.locals.get(name) {
            return Ok(Operand::Variable(n));
        }
        if let Some(&n) = symbols.globals.get(name) {
            return Ok(Operand::Variable(n));
        }
        if let Some(v) = lookup_constant(symbols, name) {
            return Ok(constant_operand(v));
        }
        if sizing {
            return Ok(Operand::Large(0));
        }
        return Err(AssembleError::UndefinedLabel(name.to_string()));
    }

    if let Some(&n) = symbols.locals.get(text) {
        return Ok(Operand::Variable(n));
    }
    if let Some(v) = lookup_constant(symbols, text) {
        return Ok(constant_operand(v));
    }
    if let Some(&n) = symbols.globals.get(text) {
        return Ok(Operand::Variable(n));
    }
    // Routine and string operands are packed addresses, always large so
    // the size never depends on the final address value.
    if let Some(&packed) = symbols.routines.get(text) {
        return Ok(Operand::Large(packed as u16));
    }
    if let Some(&packed) = symbols.strings.get(text) {
        return Ok(Operand::Large(packed as u16));
    }
    if let Some(&address) = symbols.labels.get(text) {
        return Ok(Operand::Large(address as u16));
    }

    if sizing {
        return Ok(Operand::Large(0));
    }
    Err(AssembleError::UndefinedLabel(text.to_string()))
}

/// Constants by name, falling back to the flag and property numbering
/// spellings so `'TAKEBIT` resolves through `F?TAKEBIT`.
fn lookup_constant(symbols: &AssemblerSymbols, name: &str) -> Option<i32> {
    if let Some(&v) = symbols.constants.get(name) {
        return Some(v);
    }
    if let Some(&v) = symbols.constants.get(&format!("F?{}", name)) {
        return Some(v);
    }
    symbols.constants.get(&format!("P?{}", name)).copied()
}

fn constant_operand(value: i32) -> Operand {
    if (0..=255).contains(&value) {
        Operand::Small(value as u8)
    } else {
        Operand::Large(value as u16)
    }
}

fn unquote(text: &str) -> Option<String> {
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

#[cfg(test)]
#[path = "encoder_tests.rs"]
mod tests;
