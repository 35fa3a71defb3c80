// Instruction encoder tests

#[cfg(test)]
mod tests {
    use crate::encoder::{calculate_instruction_size, encode_instruction, AssemblerSymbols};
    use crate::error::AssembleError;
    use crate::zap_parser::{parse_zap, ZapInstruction, ZapStatement};
    use test_log::test;

    fn instruction(line: &str) -> ZapInstruction {
        let statements = parse_zap(line).unwrap();
        let [ZapStatement::Instruction(inst)] = statements.as_slice() else {
            panic!("expected one instruction from {}", line);
        };
        inst.clone()
    }

    fn symbols_v(version: u8) -> AssemblerSymbols {
        let mut symbols = AssemblerSymbols::new(version);
        symbols.locals.insert("X".to_string(), 1);
        symbols.locals.insert("Y".to_string(), 2);
        symbols.globals.insert("SCORE".to_string(), 16);
        symbols.constants.insert("LIMIT".to_string(), 100);
        symbols
    }

    #[test]
    fn test_2op_long_small_small() {
        // add 5,3 -> stack: long form, both small constants.
        let bytes =
            encode_instruction(&instruction("\tADD\t5,3 >STACK"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0x14, 5, 3, 0]);
    }

    #[test]
    fn test_2op_long_variable_bits() {
        // Bit 6 marks a variable first operand, bit 5 a variable second.
        let bytes =
            encode_instruction(&instruction("\tADD\tX,3 >STACK"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0x54, 1, 3, 0]);
        let bytes =
            encode_instruction(&instruction("\tADD\t3,Y >STACK"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0x34, 3, 2, 0]);
        let bytes =
            encode_instruction(&instruction("\tADD\tX,Y >STACK"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0x74, 1, 2, 0]);
    }

    #[test]
    fn test_2op_with_large_constant_reencodes_as_var() {
        // 1000 does not fit a small constant; the 2OP re-encodes as VAR.
        let bytes =
            encode_instruction(&instruction("\tADD\t1000,3 >STACK"), &symbols_v(3), 0).unwrap();
        // 0xC0|0x14, type byte large(00) small(01) omitted(11) omitted(11),
        // operand word, operand byte, store.
        assert_eq!(bytes, vec![0xD4, 0b0001_1111, 0x03, 0xE8, 3, 0]);
    }

    #[test]
    fn test_1op_short_operand_types() {
        // jz: bits 5-4 of the opcode byte carry the operand type.
        let small = encode_instruction(&instruction("\tZERO?\t5 /TRUE"), &symbols_v(3), 0).unwrap();
        assert_eq!(small[0], 0x90); // 0x80 | small<<4
        let variable =
            encode_instruction(&instruction("\tZERO?\tX /TRUE"), &symbols_v(3), 0).unwrap();
        assert_eq!(variable[0], 0xA0); // 0x80 | variable<<4
        let large =
            encode_instruction(&instruction("\tZERO?\t1000 /TRUE"), &symbols_v(3), 0).unwrap();
        assert_eq!(large[0], 0x80); // 0x80 | large<<4
    }

    #[test]
    fn test_0op_short() {
        let bytes = encode_instruction(&instruction("\tRTRUE"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0xB0]);
        let bytes = encode_instruction(&instruction("\tQUIT"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0xBA]);
    }

    #[test]
    fn test_var_type_byte_packing() {
        // call with three operands: types pack into bits 6,4,2,0.
        let mut symbols = symbols_v(3);
        symbols.routines.insert("FOO".to_string(), 0x1234);
        let bytes =
            encode_instruction(&instruction("\tCALL\tFOO,5,X >STACK"), &symbols, 0).unwrap();
        // large, small, variable, omitted = 00 01 10 11
        assert_eq!(bytes[0], 0xE0);
        assert_eq!(bytes[1], 0b0001_1011);
        assert_eq!(&bytes[2..4], &[0x12, 0x34]);
        assert_eq!(bytes[4], 5);
        assert_eq!(bytes[5], 1);
        assert_eq!(bytes[6], 0); // store STACK
    }

    #[test]
    fn test_store_byte_targets() {
        let mut symbols = symbols_v(3);
        symbols.globals.insert("G2".to_string(), 17);
        let stack =
            encode_instruction(&instruction("\tRANDOM\t6 >STACK"), &symbols, 0).unwrap();
        assert_eq!(*stack.last().unwrap(), 0);
        let local = encode_instruction(&instruction("\tRANDOM\t6 >X"), &symbols, 0).unwrap();
        assert_eq!(*local.last().unwrap(), 1);
        let global = encode_instruction(&instruction("\tRANDOM\t6 >G2"), &symbols, 0).unwrap();
        assert_eq!(*global.last().unwrap(), 17);
    }

    #[test]
    fn test_store_opcode_takes_variable_number() {
        // SET X,5: the first operand is the variable number as a small
        // constant, not a variable read.
        let bytes = encode_instruction(&instruction("\tSET\tX,5"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes, vec![0x0D, 1, 5]);
        // SETG 'SCORE,5 through the quoted spelling.
        let bytes =
            encode_instruction(&instruction("\tSETG\t'SCORE,5"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes[0] & 0x1F, 0x0D);
        assert_eq!(bytes[1], 16);
    }

    #[test]
    fn test_branch_to_rtrue_rfalse() {
        let bytes =
            encode_instruction(&instruction("\tZERO?\tX /TRUE"), &symbols_v(3), 0).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0x80 | 0x40 | 1);
        let bytes =
            encode_instruction(&instruction("\tZERO?\tX \\FALSE"), &symbols_v(3), 0).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0x80);
    }

    #[test]
    fn test_short_branch_five_ahead() {
        // je 1,2 with a target five bytes past the branch byte: three
        // instruction bytes plus one branch byte, offset 5.
        let mut symbols = symbols_v(3);
        symbols.labels.insert("NEAR".to_string(), 7);
        let inst = instruction("\tEQUAL?\t1,2 /NEAR");
        let bytes = encode_instruction(&inst, &symbols, 0).unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[3], 0x80 | 0x40 | 5);
        assert_eq!(
            calculate_instruction_size(&inst, 0, &symbols).unwrap(),
            bytes.len()
        );
    }

    #[test]
    fn test_short_branch_negative_offset() {
        // A backward branch still fits the single-byte form down to -32.
        let mut symbols = symbols_v(3);
        symbols.labels.insert("BACK".to_string(), 10);
        let inst = instruction("\tZERO?\tX \\BACK");
        // Instruction at 20: short offset = 10 - (20+2+1) + 2 = -11.
        let bytes = encode_instruction(&inst, &symbols, 20).unwrap();
        assert_eq!(bytes.len(), 3);
        assert_eq!(bytes[2], 0x80 | ((-11i8 as u8) & 0x3F));
    }

    #[test]
    fn test_long_branch_form() {
        let mut symbols = symbols_v(3);
        symbols.labels.insert("FAR".to_string(), 500);
        let inst = instruction("\tZERO?\tX /FAR");
        let bytes = encode_instruction(&inst, &symbols, 0).unwrap();
        assert_eq!(bytes.len(), 4);
        // offset = 500 - (0+2+2) + 2 = 498
        let offset = 498u16;
        assert_eq!(bytes[2], 0x40 | (offset >> 8) as u8);
        assert_eq!(bytes[3], (offset & 0xFF) as u8);
        assert_eq!(
            calculate_instruction_size(&inst, 0, &symbols).unwrap(),
            bytes.len()
        );
    }

    #[test]
    fn test_branch_out_of_range() {
        let mut symbols = symbols_v(3);
        symbols.labels.insert("WAY".to_string(), 20000);
        let inst = instruction("\tZERO?\tX /WAY");
        assert!(matches!(
            encode_instruction(&inst, &symbols, 0),
            Err(AssembleError::BranchTargetOutOfRange(_))
        ));
    }

    #[test]
    fn test_sizing_assumes_two_byte_branch_for_forward_refs() {
        let symbols = symbols_v(3);
        let inst = instruction("\tZERO?\tX /NOT-YET");
        // Unknown label: conservative two-byte branch during sizing.
        assert_eq!(calculate_instruction_size(&inst, 0, &symbols).unwrap(), 4);
        // Encoding proper still requires the label.
        assert!(matches!(
            encode_instruction(&inst, &symbols, 0),
            Err(AssembleError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn test_jump_offset_encoding() {
        let mut symbols = symbols_v(3);
        symbols.labels.insert("LOOP".to_string(), 4);
        // jump at 10: operand = 4 - (10+3) + 2 = -7.
        let bytes = encode_instruction(&instruction("\tJUMP\tLOOP"), &symbols, 10).unwrap();
        assert_eq!(bytes[0], 0x8C);
        assert_eq!(&bytes[1..3], &(-7i16 as u16).to_be_bytes());
    }

    #[test]
    fn test_printi_inline_text() {
        let bytes =
            encode_instruction(&instruction("\tPRINTI \"hi\""), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes[0], 0xB2);
        assert!(bytes.len() >= 3);
        // Final ZSCII word carries the terminator bit.
        assert!(bytes[bytes.len() - 2] & 0x80 != 0);
    }

    #[test]
    fn test_constants_resolve() {
        let bytes =
            encode_instruction(&instruction("\tADD\tLIMIT,3 >STACK"), &symbols_v(3), 0)
                .unwrap();
        assert_eq!(bytes, vec![0x14, 100, 3, 0]);
    }

    #[test]
    fn test_negative_literal_is_large() {
        let bytes =
            encode_instruction(&instruction("\tADD\t-1,3 >STACK"), &symbols_v(3), 0).unwrap();
        assert_eq!(bytes[0], 0xD4); // VAR re-encoding
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_undefined_symbol_errors() {
        assert!(matches!(
            encode_instruction(&instruction("\tADD\tNOPE,3 >STACK"), &symbols_v(3), 0),
            Err(AssembleError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn test_size_matches_encoding() {
        let mut symbols = symbols_v(5);
        symbols.routines.insert("FOO".to_string(), 0x0800);
        symbols.labels.insert("L".to_string(), 30);
        for line in [
            "\tADD\t5,3 >STACK",
            "\tADD\tX,Y >X",
            "\tADD\t1000,3 >STACK",
            "\tZERO?\tX /L",
            "\tEQUAL?\tX,1,2,3 /L",
            "\tCALL\tFOO,5,X >STACK",
            "\tRTRUE",
            "\tJUMP\tL",
            "\tPRINTI \"hello there\"",
            "\tSET\tX,200",
            "\tPUTP\tX,5,1000",
        ] {
            let inst = instruction(line);
            let bytes = encode_instruction(&inst, &symbols, 16).unwrap();
            let size = calculate_instruction_size(&inst, 16, &symbols).unwrap();
            assert_eq!(size, bytes.len(), "for {}", line);
        }
    }

    #[test]
    fn test_equal_with_three_operands_uses_var_form() {
        let mut symbols = symbols_v(3);
        symbols.labels.insert("L".to_string(), 2);
        let bytes =
            encode_instruction(&instruction("\tEQUAL?\tX,1,2 /L"), &symbols, 0).unwrap();
        assert_eq!(bytes[0], 0xC1); // VAR re-encoding of je
    }

    #[test]
    fn test_version_mismatch_propagates() {
        let symbols = symbols_v(3);
        assert!(matches!(
            encode_instruction(&instruction("\tINPUT\t1 >STACK"), &symbols, 0),
            Err(AssembleError::VersionMismatch { .. })
        ));
    }
}
