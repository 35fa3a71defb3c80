// ZAP Mnemonic to Z-Machine Opcode Mapping
//
// The table value is the ENCODED instruction byte, whose range picks the
// form:
//   0x00-0x7F  2OP, long form (re-encoded as VAR 2OP when an operand
//              needs a large constant)
//   0x80-0xAF  1OP, short form (bits 5-4 carry the operand type)
//   0xB0-0xBF  0OP, short form
//   0xC0-0xDF  VAR form of a 2OP opcode
//   0xE0-0xFF  VAR form
//
// Both canonical ZAP names and ZIL-style aliases are listed. Entries
// with a minimum version throw versionMismatch below it.

use crate::error::AssembleError;
use indexmap::IndexMap;
use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpcodeInfo {
    pub byte: u8,
    pub min_version: u8,
}

const fn op(byte: u8) -> (u8, u8) {
    (byte, 1)
}

const fn op_v(byte: u8, min_version: u8) -> (u8, u8) {
    (byte, min_version)
}

lazy_static! {
    static ref OPCODES: IndexMap<&'static str, (u8, u8)> = {
        let entries: &[(&str, (u8, u8))] = &[
            // 2OP long form
            ("JE", op(0x01)), ("EQUAL?", op(0x01)),
            ("JL", op(0x02)), ("LESS?", op(0x02)),
            ("JG", op(0x03)), ("GRTR?", op(0x03)),
            ("DEC_CHK", op(0x04)), ("DLESS?", op(0x04)),
            ("INC_CHK", op(0x05)), ("IGRTR?", op(0x05)),
            ("JIN", op(0x06)), ("IN?", op(0x06)),
            ("TEST", op(0x07)), ("BTST", op(0x07)),
            ("OR", op(0x08)), ("BOR", op(0x08)),
            ("AND", op(0x09)), ("BAND", op(0x09)),
            ("TEST_ATTR", op(0x0A)), ("FSET?", op(0x0A)),
            ("SET_ATTR", op(0x0B)), ("FSET", op(0x0B)),
            ("CLEAR_ATTR", op(0x0C)), ("FCLEAR", op(0x0C)),
            ("STORE", op(0x0D)), ("SET", op(0x0D)), ("SETG", op(0x0D)),
            ("INSERT_OBJ", op(0x0E)), ("MOVE", op(0x0E)),
            ("LOADW", op(0x0F)), ("GET", op(0x0F)),
            ("LOADB", op(0x10)), ("GETB", op(0x10)),
            ("GET_PROP", op(0x11)), ("GETP", op(0x11)),
            ("GET_PROP_ADDR", op(0x12)), ("GETPT", op(0x12)),
            ("GET_NEXT_PROP", op(0x13)), ("NEXTP", op(0x13)),
            ("ADD", op(0x14)),
            ("SUB", op(0x15)),
            ("MUL", op(0x16)),
            ("DIV", op(0x17)),
            ("MOD", op(0x18)),
            ("CALL_2S", op_v(0x19, 4)),
            ("CALL_2N", op_v(0x1A, 5)),
            ("SET_COLOUR", op_v(0x1B, 5)), ("COLOR", op_v(0x1B, 5)),
            ("THROW", op_v(0x1C, 5)),
            // 1OP short form
            ("JZ", op(0x80)), ("ZERO?", op(0x80)),
            ("GET_SIBLING", op(0x81)), ("NEXT?", op(0x81)),
            ("GET_CHILD", op(0x82)), ("FIRST?", op(0x82)),
            ("GET_PARENT", op(0x83)), ("LOC", op(0x83)),
            ("GET_PROP_LEN", op(0x84)), ("PTSIZE", op(0x84)),
            ("INC", op(0x85)),
            ("DEC", op(0x86)),
            ("PRINT_ADDR", op(0x87)), ("PRINTB", op(0x87)),
            ("CALL_1S", op_v(0x88, 4)),
            ("REMOVE_OBJ", op(0x89)), ("REMOVE", op(0x89)),
            ("PRINT_OBJ", op(0x8A)), ("PRINTD", op(0x8A)),
            ("RET", op(0x8B)), ("RETURN", op(0x8B)),
            ("JUMP", op(0x8C)),
            ("PRINT_PADDR", op(0x8D)), ("PRINT", op(0x8D)),
            ("LOAD", op(0x8E)), ("VALUE", op(0x8E)),
            ("CALL_1N", op_v(0x8F, 5)),
            // 0OP short form
            ("RTRUE", op(0xB0)),
            ("RFALSE", op(0xB1)),
            ("PRINTI", op(0xB2)),
            ("PRINTR", op(0xB3)),
            ("NOP", op(0xB4)),
            ("RESTART", op(0xB7)),
            ("RET_POPPED", op(0xB8)), ("RSTACK", op(0xB8)),
            ("QUIT", op(0xBA)),
            ("NEW_LINE", op(0xBB)), ("CRLF", op(0xBB)),
            ("SHOW_STATUS", op(0xBC)), ("USL", op(0xBC)),
            ("VERIFY", op_v(0xBD, 3)),
            ("PIRACY", op_v(0xBF, 5)),
            // VAR form
            ("CALL", op(0xE0)), ("CALL_VS", op(0xE0)),
            ("STOREW", op(0xE1)), ("PUT", op(0xE1)),
            ("STOREB", op(0xE2)), ("PUTB", op(0xE2)),
            ("PUT_PROP", op(0xE3)), ("PUTP", op(0xE3)),
            ("SREAD", op(0xE4)), ("READ", op(0xE4)),
            ("PRINT_CHAR", op(0xE5)), ("PRINTC", op(0xE5)),
            ("PRINT_NUM", op(0xE6)), ("PRINTN", op(0xE6)),
            ("RANDOM", op(0xE7)),
            ("PUSH", op(0xE8)),
            ("PULL", op(0xE9)),
            ("SPLIT_WINDOW", op_v(0xEA, 3)), ("SPLIT", op_v(0xEA, 3)),
            ("SET_WINDOW", op_v(0xEB, 3)), ("SCREEN", op_v(0xEB, 3)),
            ("CALL_VS2", op_v(0xEC, 4)), ("XCALL", op_v(0xEC, 4)),
            ("ERASE_WINDOW", op_v(0xED, 4)), ("CLEAR", op_v(0xED, 4)),
            ("ERASE_LINE", op_v(0xEE, 4)), ("ERASE", op_v(0xEE, 4)),
            ("SET_CURSOR", op_v(0xEF, 4)), ("CURSET", op_v(0xEF, 4)),
            ("GET_CURSOR", op_v(0xF0, 4)), ("CURGET", op_v(0xF0, 4)),
            ("SET_TEXT_STYLE", op_v(0xF1, 4)), ("HLIGHT", op_v(0xF1, 4)),
            ("BUFFER_MODE", op_v(0xF2, 4)), ("BUFOUT", op_v(0xF2, 4)),
            ("OUTPUT_STREAM", op_v(0xF3, 3)), ("DIROUT", op_v(0xF3, 3)),
            ("INPUT_STREAM", op_v(0xF4, 3)), ("DIRIN", op_v(0xF4, 3)),
            ("SOUND_EFFECT", op_v(0xF5, 3)), ("SOUND", op_v(0xF5, 3)),
            ("READ_CHAR", op_v(0xF6, 4)), ("INPUT", op_v(0xF6, 4)),
            ("SCAN_TABLE", op_v(0xF7, 4)), ("INTBL?", op_v(0xF7, 4)),
            ("CALL_VN", op_v(0xF9, 5)), ("ICALL", op_v(0xF9, 5)),
            ("CALL_VN2", op_v(0xFA, 5)), ("IXCALL", op_v(0xFA, 5)),
            ("TOKENISE", op_v(0xFB, 5)), ("LEX", op_v(0xFB, 5)),
            ("ENCODE_TEXT", op_v(0xFC, 5)), ("ZWSTR", op_v(0xFC, 5)),
            ("COPY_TABLE", op_v(0xFD, 5)), ("COPYT", op_v(0xFD, 5)),
            ("PRINT_TABLE", op_v(0xFE, 5)), ("PRINTT", op_v(0xFE, 5)),
            ("CHECK_ARG_COUNT", op_v(0xFF, 5)), ("ASSIGNED?", op_v(0xFF, 5)),
        ];
        entries.iter().copied().collect()
    };
}

/// Map a mnemonic to its opcode byte for the target version. A few names
/// move between forms across versions and are resolved here.
pub fn lookup_opcode(mnemonic: &str, version: u8) -> Result<OpcodeInfo, AssembleError> {
    // Version-dependent encodings.
    match mnemonic {
        // not: 1OP 0x8F through V4, VAR 0xF8 from V5.
        "NOT" | "BCOM" => {
            let byte = if version >= 5 { 0xF8 } else { 0x8F };
            return Ok(OpcodeInfo {
                byte,
                min_version: 1,
            });
        }
        // pop (discard) through V4; catch replaces it in V5.
        "POP" => {
            return Ok(OpcodeInfo {
                byte: 0xB9,
                min_version: 1,
            });
        }
        "CATCH" => {
            if version < 5 {
                return Err(AssembleError::VersionMismatch {
                    mnemonic: mnemonic.to_string(),
                    required: 5,
                    current: version,
                });
            }
            return Ok(OpcodeInfo {
                byte: 0xB9,
                min_version: 5,
            });
        }
        // save/restore are 0OP branch ops through V3, EXT stores in V5+;
        // V4 keeps the 0OP encoding with a store.
        "SAVE" => {
            return Ok(OpcodeInfo {
                byte: 0xB5,
                min_version: 1,
            });
        }
        "RESTORE" => {
            return Ok(OpcodeInfo {
                byte: 0xB6,
                min_version: 1,
            });
        }
        _ => {}
    }

    let Some(&(byte, min_version)) = OPCODES.get(mnemonic) else {
        return Err(AssembleError::InvalidInstruction(format!(
            "unknown mnemonic '{}'",
            mnemonic
        )));
    };
    if version < min_version {
        return Err(AssembleError::VersionMismatch {
            mnemonic: mnemonic.to_string(),
            required: min_version,
            current: version,
        });
    }
    Ok(OpcodeInfo { byte, min_version })
}

/// True for opcodes whose branch target byte(s) follow the operands.
/// The ZAP text carries the branch explicitly, but the size pre-pass
/// needs to know even when the target is still unresolved.
pub fn opcode_branches(byte: u8, version: u8) -> bool {
    match byte {
        0x01..=0x07 | 0x0A => true,               // je..test, test_attr
        0x80..=0x82 => true,                      // jz, get_sibling, get_child
        0xB5 | 0xB6 => version <= 3,              // save/restore branch in V1-3
        0xBD | 0xBF => true,                      // verify, piracy
        0xF7 => true,                             // scan_table
        0xFF => true,                             // check_arg_count
        _ => false,
    }
}

/// True for opcodes that write a result store byte.
pub fn opcode_stores(byte: u8, version: u8) -> bool {
    match byte {
        0x08 | 0x09 | 0x0F..=0x14 | 0x15..=0x19 => true, // or..call_2s
        0x81..=0x84 | 0x88 | 0x8E => true,
        0x8F => version <= 4,                     // 1OP not stores
        0xB5 | 0xB6 => version == 4,              // save/restore store in V4
        0xB9 => version >= 5,                     // catch
        0xE0 => true,                             // call_vs
        0xE4 => version >= 5,                     // aread
        0xE7 => true,                             // random
        0xE9 => false,                            // pull takes a variable operand
        0xEC => true,                             // call_vs2
        0xF0 => false,                            // get_cursor writes a table
        0xF6 => true,                             // read_char
        0xF7 => true,                             // scan_table
        0xF8 => true,                             // VAR not
        _ => false,
    }
}
