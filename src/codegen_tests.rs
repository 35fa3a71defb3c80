// Code generator tests

#[cfg(test)]
mod tests {
    use crate::codegen::{combine_labels, peephole_jump_threading, ZapCodeGen};
    use crate::parser::Parser;
    use crate::ZVersion;
    use test_log::test;

    fn generate(input: &str) -> String {
        generate_with(input, ZVersion::V5, 1)
    }

    fn generate_with(input: &str, version: ZVersion, level: u8) -> String {
        let mut parser = Parser::from_source(input, "test.zil").unwrap();
        let declarations = parser.parse_program().unwrap();
        let mut generator = ZapCodeGen::new(version);
        generator.set_optimization_level(level);
        generator.generate(&declarations).unwrap()
    }

    fn body_lines(zap: &str, funct: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mut inside = false;
        for line in zap.lines() {
            if line.starts_with(&format!(".FUNCT\t{}", funct)) {
                inside = true;
                continue;
            }
            if inside {
                if line.starts_with(".ENDI") {
                    break;
                }
                lines.push(line.to_string());
            }
        }
        lines
    }

    #[test]
    fn test_hello_routine() {
        let zap = generate("<ROUTINE HI () <TELL \"Hello\" CR> <RTRUE>>");
        assert!(zap.contains(".ZVERSION 5"), "{}", zap);
        assert!(zap.contains(".FUNCT\tHI"), "{}", zap);
        assert!(zap.contains("PRINTI \"Hello\""), "{}", zap);
        assert!(zap.contains("CRLF"), "{}", zap);
        assert!(zap.contains("RTRUE"), "{}", zap);
        assert!(zap.contains(".ENDI"), "{}", zap);
        assert!(zap.contains(".STRING STR0 \"Hello\""), "{}", zap);
        assert!(zap.contains(".END\n"), "{}", zap);
    }

    #[test]
    fn test_flag_test_routine() {
        let zap = generate("<ROUTINE T (O) <COND (<FSET? .O ,INVISIBLE> <RTRUE>)> <RFALSE>>");
        let lines = body_lines(&zap, "T");
        // Probe with the global spelling, then the two returns in order.
        assert!(
            lines[0].contains("FSET?\tO,'INVISIBLE"),
            "lines: {:?}",
            lines
        );
        let text = lines.join("\n");
        let rtrue_at = text.find("RTRUE").unwrap();
        let rfalse_at = text.find("RFALSE").unwrap();
        assert!(rtrue_at < rfalse_at, "lines: {:?}", lines);
    }

    #[test]
    fn test_short_circuit_and_shares_false_label() {
        let zap = generate(
            "<ROUTINE F (X Y) <COND (<AND <FSET? .X ,A> <FSET? .Y ,B>> <RTRUE>)> <RFALSE>>",
        );
        let lines = body_lines(&zap, "F");
        let probes: Vec<&String> = lines.iter().filter(|l| l.contains("FSET?")).collect();
        assert_eq!(probes.len(), 2, "lines: {:?}", lines);
        // Both probes branch-on-false to the same label, no temporaries.
        let label_of = |line: &str| line.rsplit('\\').next().unwrap().to_string();
        assert!(probes[0].contains('\\'), "lines: {:?}", lines);
        assert!(probes[1].contains('\\'), "lines: {:?}", lines);
        assert_eq!(label_of(probes[0]), label_of(probes[1]));
        assert!(!zap.contains("TEMP"), "{}", zap);
    }

    #[test]
    fn test_implicit_rtrue() {
        let zap = generate("<ROUTINE F () <TELL \"hi\">>");
        let lines = body_lines(&zap, "F");
        assert_eq!(lines.last().unwrap().trim(), "RTRUE", "lines: {:?}", lines);
    }

    #[test]
    fn test_no_double_return() {
        let zap = generate("<ROUTINE F () <RFALSE>>");
        let lines = body_lines(&zap, "F");
        assert_eq!(lines.len(), 1, "lines: {:?}", lines);
        assert_eq!(lines[0].trim(), "RFALSE");
    }

    #[test]
    fn test_arithmetic_fold() {
        let zap = generate("<ROUTINE F (A B C) <PRINTN <+ .A .B .C>>>");
        let lines = body_lines(&zap, "F");
        assert!(lines[0].contains("ADD\tA,B >STACK"), "lines: {:?}", lines);
        assert!(
            lines[1].contains("ADD\tSTACK,C >STACK"),
            "lines: {:?}",
            lines
        );
        assert!(lines[2].contains("PRINTN\tSTACK"), "lines: {:?}", lines);
    }

    #[test]
    fn test_unary_minus() {
        let zap = generate("<ROUTINE F (A) <PRINTN <- .A>>>");
        let lines = body_lines(&zap, "F");
        assert!(lines[0].contains("SUB\t0,A"), "lines: {:?}", lines);
    }

    #[test]
    fn test_comparison_as_value() {
        let zap = generate("<ROUTINE F (X \"AUX\" R) <SET R <EQUAL? .X 5>> <PRINTN .R>>");
        let lines = body_lines(&zap, "F").join("\n");
        assert!(lines.contains("EQUAL?\tX,5 /"), "{}", lines);
        assert!(lines.contains("PUSH\t0"), "{}", lines);
        assert!(lines.contains("PUSH\t1"), "{}", lines);
        assert!(lines.contains("SET\tR,STACK"), "{}", lines);
    }

    #[test]
    fn test_setg_for_globals() {
        let zap = generate("<GLOBAL SCORE 0> <ROUTINE F () <SETG SCORE 5> <SET SCORE 6>>");
        let lines = body_lines(&zap, "F").join("\n");
        // Both spell SETG: the target is a global either way.
        assert!(lines.contains("SETG\t'SCORE,5"), "{}", lines);
        assert!(lines.contains("SETG\t'SCORE,6"), "{}", lines);
    }

    #[test]
    fn test_set_for_locals() {
        let zap = generate("<ROUTINE F (\"AUX\" X) <SET X 3> <PRINTN .X>>");
        let lines = body_lines(&zap, "F").join("\n");
        assert!(lines.contains("SET\tX,3"), "{}", lines);
    }

    #[test]
    fn test_user_routine_call() {
        let zap = generate(
            "<ROUTINE HELPER (A) <PRINTN .A>>\
             <ROUTINE F () <HELPER 7>>",
        );
        let lines = body_lines(&zap, "F").join("\n");
        assert!(lines.contains("CALL\tHELPER,7 >STACK"), "{}", lines);
    }

    #[test]
    fn test_repeat_loop() {
        let zap = generate("<ROUTINE F () <REPEAT () <TELL \"x\"> <RETURN>>>");
        let lines = body_lines(&zap, "F");
        let text = lines.join("\n");
        // Loop label, body, bare RETURN exits via the end label, JUMP back.
        assert!(text.contains("?PRG"), "{}", text);
        assert!(text.contains("JUMP\t?REP"), "{}", text);
        assert!(text.contains("JUMP\t?PRG"), "{}", text);
    }

    #[test]
    fn test_while_loop() {
        let zap = generate("<ROUTINE F (N) <WHILE <GRTR? .N 0> <SET N <- .N 1>>>>");
        let text = body_lines(&zap, "F").join("\n");
        // Leading test branches out on false; SUB 1 via the SET form.
        assert!(text.contains("GRTR?\tN,0 \\?REP"), "{}", text);
        assert!(text.contains("SUB\tN,1"), "{}", text);
        assert!(text.contains("JUMP\t?PRG"), "{}", text);
    }

    #[test]
    fn test_return_with_value() {
        let zap = generate("<ROUTINE F (X) <RETURN <+ .X 1>>>");
        let text = body_lines(&zap, "F").join("\n");
        assert!(text.contains("ADD\tX,1 >STACK"), "{}", text);
        assert!(text.contains("RETURN\tSTACK"), "{}", text);
    }

    #[test]
    fn test_tell_forms() {
        let zap = generate("<GLOBAL LAMP 0> <ROUTINE F (N) <TELL \"a\" CR D ,LAMP N .N>>");
        let text = body_lines(&zap, "F").join("\n");
        assert!(text.contains("PRINTI \"a\""), "{}", text);
        assert!(text.contains("CRLF"), "{}", text);
        assert!(text.contains("PRINTD\t'LAMP"), "{}", text);
        assert!(text.contains("PRINTN\tN"), "{}", text);
    }

    #[test]
    fn test_object_access_ops() {
        let zap = generate(
            "<GLOBAL TROPHY 0>\
             <ROUTINE F (O) <PUTP .O P?SIZE <GETP .O P?SIZE>> <MOVE .O ,TROPHY>>",
        );
        let text = body_lines(&zap, "F").join("\n");
        assert!(text.contains("GETP\tO,P?SIZE >STACK"), "{}", text);
        assert!(text.contains("PUTP\tO,P?SIZE,STACK"), "{}", text);
        assert!(text.contains("MOVE\tO,'TROPHY"), "{}", text);
    }

    #[test]
    fn test_funct_header_format() {
        let zap = generate("<ROUTINE F (A B \"OPT\" (C 5) \"AUX\" D) <PRINTN .A>>");
        assert!(zap.contains(".FUNCT\tF,A,B,(C=5),(D)"), "{}", zap);
    }

    #[test]
    fn test_string_dedup() {
        let zap = generate(
            "<ROUTINE A () <TELL \"same\">>\
             <ROUTINE B () <TELL \"same\">>",
        );
        assert_eq!(zap.matches(".STRING STR0 \"same\"").count(), 1, "{}", zap);
        assert!(!zap.contains("STR1"), "{}", zap);
    }

    #[test]
    fn test_directions_become_numbered_constants() {
        let zap = generate_with(
            "<DIRECTIONS NORTH SOUTH EAST>",
            ZVersion::V3,
            1,
        );
        assert!(zap.contains(".CONSTANT P?NORTH 31"), "{}", zap);
        assert!(zap.contains(".CONSTANT P?SOUTH 30"), "{}", zap);
        assert!(zap.contains(".CONSTANT P?EAST 29"), "{}", zap);
    }

    #[test]
    fn test_constants_reduce() {
        let zap = generate("<CONSTANT BASE 5> <CONSTANT DERIVED <+ BASE 2>>");
        assert!(zap.contains(".CONSTANT BASE 5"), "{}", zap);
        assert!(zap.contains(".CONSTANT DERIVED 7"), "{}", zap);
    }

    #[test]
    fn test_unresolved_insert_file_is_an_error() {
        let mut parser =
            Parser::from_source("<INSERT-FILE \"other\">", "test.zil").unwrap();
        let declarations = parser.parse_program().unwrap();
        let mut generator = ZapCodeGen::new(ZVersion::V5);
        assert!(generator.generate(&declarations).is_err());
    }

    #[test]
    fn test_objects_emit_between_markers() {
        let zap = generate(
            "<OBJECT LAMP (DESC \"brass lamp\") (FLAGS TAKEBIT) (SIZE 5)>",
        );
        assert!(zap.contains(".OBJECT LAMP"), "{}", zap);
        assert!(zap.contains("DESC\t\"brass lamp\""), "{}", zap);
        assert!(zap.contains("FLAGS\tF?TAKEBIT"), "{}", zap);
        assert!(zap.contains("SIZE\t5"), "{}", zap);
        assert!(zap.contains(".ENDOBJECT"), "{}", zap);
        assert!(zap.contains(".CONSTANT F?TAKEBIT 0"), "{}", zap);
    }

    #[test]
    fn test_global_table_literal() {
        let zap = generate("<GLOBAL T1 <TABLE 1 2 3>>");
        assert!(zap.contains(".GLOBAL\tT1=TBL0"), "{}", zap);
        assert!(zap.contains("TBL0:\t.WORD\t1,2,3"), "{}", zap);
    }

    #[test]
    fn test_ltable_and_itable() {
        let zap = generate("<GLOBAL A <LTABLE 9 8>> <GLOBAL B <ITABLE 3>>");
        assert!(zap.contains(".WORD\t2,9,8"), "{}", zap);
        assert!(zap.contains(".WORD\t0,0,0"), "{}", zap);
    }

    #[test]
    fn test_debug_mode_banners() {
        let zap = generate_with("<ROUTINE F () <RTRUE>>", ZVersion::V5, 0);
        assert!(zap.contains("; ZAP assembly generated"), "{}", zap);
        assert!(zap.contains("; Statistics:"), "{}", zap);
        let production = generate_with("<ROUTINE F () <RTRUE>>", ZVersion::V5, 1);
        assert!(!production.contains("; ZAP"), "{}", production);
    }

    #[test]
    fn test_version_declaration_switches_target() {
        let zap = generate("<VERSION ZIP> <ROUTINE F () <RTRUE>>");
        assert!(zap.contains(".ZVERSION 3"), "{}", zap);
    }

    #[test]
    fn test_version_gated_op_rejected() {
        let mut parser = Parser::from_source(
            "<ROUTINE F () <THROW 1 2>>",
            "test.zil",
        )
        .unwrap();
        let declarations = parser.parse_program().unwrap();
        let mut generator = ZapCodeGen::new(ZVersion::V3);
        assert!(generator.generate(&declarations).is_err());
    }

    #[test]
    fn test_complex_call_args_use_temps() {
        // Earlier computed arguments spill to temporaries so the stack
        // operands pop in the right order.
        let zap = generate(
            "<ROUTINE H (A B) <PRINTN .A> <PRINTN .B>>\
             <ROUTINE F (X) <H <ZERO? .X> <ZERO? .X>>>",
        );
        let lines = body_lines(&zap, "F").join("\n");
        assert!(lines.contains("TEMP0"), "{}", lines);
        assert!(zap.contains("(TEMP0)"), "{}", zap);
        assert!(lines.contains("CALL\tH,TEMP0,STACK >STACK"), "{}", lines);
    }

    #[test]
    fn test_peephole_jump_threading() {
        let lines = vec![
            "\tJUMP\t?END1".to_string(),
            "?END1:".to_string(),
            "\tRTRUE".to_string(),
        ];
        let out = peephole_jump_threading(lines);
        assert_eq!(out, vec!["?END1:".to_string(), "\tRTRUE".to_string()]);
    }

    #[test]
    fn test_label_combining() {
        let lines = vec![
            "\tRFALSE".to_string(),
            "?ELS1:".to_string(),
            "\tRTRUE".to_string(),
        ];
        let out = combine_labels(lines);
        assert_eq!(
            out,
            vec!["\tRFALSE".to_string(), "?ELS1:\tRTRUE".to_string()]
        );
    }
}
