// Parser tests

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::error::ParseError;
    use crate::parser::{parse_file, Parser};
    use std::fs;
    use std::path::PathBuf;
    use test_log::test;

    fn parse_input(input: &str) -> Vec<ZilDeclaration> {
        let mut parser = Parser::from_source(input, "test.zil").unwrap();
        parser.parse_program().unwrap()
    }

    fn parse_error(input: &str) -> ParseError {
        let mut parser = Parser::from_source(input, "test.zil").unwrap();
        parser.parse_program().unwrap_err()
    }

    #[test]
    fn test_empty_program() {
        assert!(parse_input("").is_empty());
    }

    #[test]
    fn test_comments_and_banners_are_skipped() {
        let decls = parse_input("; header comment\n\"ZORK banner\"\n<CONSTANT C 1>");
        assert_eq!(decls.len(), 1);
    }

    #[test]
    fn test_simple_routine() {
        let decls = parse_input("<ROUTINE HI () <TELL \"Hello\" CR> <RTRUE>>");
        assert_eq!(decls.len(), 1);
        let ZilDeclaration::Routine(routine) = &decls[0] else {
            panic!("expected routine");
        };
        assert_eq!(routine.name, "HI");
        assert!(routine.parameters.is_empty());
        assert_eq!(routine.body.len(), 2);
        assert_eq!(
            routine.body[0],
            ZilExpression::List(vec![
                ZilExpression::Atom("TELL".to_string()),
                ZilExpression::String("Hello".to_string()),
                ZilExpression::Atom("CR".to_string()),
            ])
        );
    }

    #[test]
    fn test_routine_parameter_sections() {
        let decls = parse_input("<ROUTINE F (A B \"OPT\" (C 5) D \"AUX\" E (G <>)) <RTRUE>>");
        let ZilDeclaration::Routine(routine) = &decls[0] else {
            panic!("expected routine");
        };
        assert_eq!(routine.parameters, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(routine.optional_parameters.len(), 2);
        assert_eq!(routine.optional_parameters[0].name, "C");
        assert_eq!(
            routine.optional_parameters[0].default,
            Some(ZilExpression::Number(5))
        );
        assert_eq!(routine.optional_parameters[1].name, "D");
        assert!(routine.optional_parameters[1].default.is_none());
        assert_eq!(routine.auxiliary_variables.len(), 2);
        assert_eq!(
            routine.auxiliary_variables[1].default,
            Some(ZilExpression::List(vec![]))
        );
    }

    #[test]
    fn test_default_forbidden_in_required_section() {
        let err = parse_error("<ROUTINE F ((A 1)) <RTRUE>>");
        assert!(matches!(err, ParseError::InvalidParameterSection(_, _)));
    }

    #[test]
    fn test_routine_local_slot_limit() {
        let err = parse_error(
            "<ROUTINE F (A B C D E \"OPT\" G H I J K \"AUX\" L M N O P Q) <RTRUE>>",
        );
        assert!(matches!(err, ParseError::InvalidSyntax(_, _)));
    }

    #[test]
    fn test_object_declaration() {
        let decls = parse_input(
            "<OBJECT LANTERN (DESC \"brass lantern\") (SYNONYM LAMP LANTERN) (FLAGS TAKEBIT LIGHTBIT)>",
        );
        let ZilDeclaration::Object(object) = &decls[0] else {
            panic!("expected object");
        };
        assert_eq!(object.name, "LANTERN");
        assert_eq!(object.properties.len(), 3);
        assert_eq!(object.properties[0].name, "DESC");
        assert_eq!(
            object.properties[0].value,
            ZilExpression::String("brass lantern".to_string())
        );
        // Multi-value property wraps its values in a list.
        assert_eq!(
            object.properties[1].value,
            ZilExpression::List(vec![
                ZilExpression::Atom("LAMP".to_string()),
                ZilExpression::Atom("LANTERN".to_string()),
            ])
        );
    }

    #[test]
    fn test_global_and_constant() {
        let decls = parse_input("<GLOBAL SCORE 0> <SETG TURNS 0> <CONSTANT M-ENTER 2>");
        assert!(matches!(
            &decls[0],
            ZilDeclaration::Global(g) if g.name == "SCORE"
        ));
        assert!(matches!(
            &decls[1],
            ZilDeclaration::Global(g) if g.name == "TURNS"
        ));
        assert!(matches!(
            &decls[2],
            ZilDeclaration::Constant(c) if c.name == "M-ENTER" && c.value == ZilExpression::Number(2)
        ));
    }

    #[test]
    fn test_version_and_directions() {
        let decls = parse_input("<VERSION ZIP> <DIRECTIONS NORTH SOUTH EAST WEST>");
        assert!(matches!(
            &decls[0],
            ZilDeclaration::Version(v, _) if v == "ZIP"
        ));
        assert!(matches!(
            &decls[1],
            ZilDeclaration::Directions(d, _) if d.len() == 4
        ));
    }

    #[test]
    fn test_table_literals() {
        let decls = parse_input("<GLOBAL T1 <TABLE 1 2 3>> <GLOBAL T2 <LTABLE \"a\" \"b\">>");
        let ZilDeclaration::Global(g1) = &decls[0] else {
            panic!("expected global");
        };
        assert_eq!(
            g1.value,
            ZilExpression::Table(
                TableKind::Table,
                vec![
                    ZilExpression::Number(1),
                    ZilExpression::Number(2),
                    ZilExpression::Number(3),
                ]
            )
        );
        let ZilDeclaration::Global(g2) = &decls[1] else {
            panic!("expected global");
        };
        assert!(matches!(&g2.value, ZilExpression::Table(TableKind::Ltable, v) if v.len() == 2));
    }

    #[test]
    fn test_indirection_targets() {
        let decls = parse_input("<ROUTINE F () <SET X !FOO> <SET Y !,BAR>>");
        let ZilDeclaration::Routine(routine) = &decls[0] else {
            panic!("expected routine");
        };
        let ZilExpression::List(set) = &routine.body[0] else {
            panic!("expected list");
        };
        assert_eq!(
            set[2],
            ZilExpression::Indirection(Box::new(ZilExpression::Atom("FOO".to_string())))
        );

        let err = parse_error("<ROUTINE F () <SET X !5>>");
        assert!(matches!(err, ParseError::InvalidSyntax(_, _)));
    }

    #[test]
    fn test_empty_angle_form_is_false() {
        let decls = parse_input("<GLOBAL EMPTY <>>");
        let ZilDeclaration::Global(global) = &decls[0] else {
            panic!("expected global");
        };
        assert_eq!(global.value, ZilExpression::List(vec![]));
    }

    #[test]
    fn test_unknown_declaration() {
        let err = parse_error("<FROTZ A B (C D)>");
        assert!(matches!(err, ParseError::UnknownDeclaration(name, _) if name == "FROTZ"));
    }

    #[test]
    fn test_defmac() {
        let decls = parse_input("<DEFMAC DOUBLE (X) <FORM + .X .X>>");
        let ZilDeclaration::Defmac(mac) = &decls[0] else {
            panic!("expected macro");
        };
        assert_eq!(mac.name, "DOUBLE");
        assert_eq!(
            mac.parameters,
            vec![MacroParameter::Standard("X".to_string())]
        );
        assert!(matches!(&mac.body, ZilExpression::List(v) if v.len() == 3));
    }

    #[test]
    fn test_defmac_parameter_kinds() {
        let decls = parse_input("<DEFMAC M (A 'B \"OPT\" (C 1) \"ARGS\" REST) <FORM PROG .A>>");
        let ZilDeclaration::Defmac(mac) = &decls[0] else {
            panic!("expected macro");
        };
        assert_eq!(
            mac.parameters,
            vec![
                MacroParameter::Standard("A".to_string()),
                MacroParameter::Quoted("B".to_string()),
                MacroParameter::Optional("C".to_string(), Some(ZilExpression::Number(1))),
                MacroParameter::VariableArgs("REST".to_string()),
            ]
        );
    }

    #[test]
    fn test_unexpected_eof() {
        let err = parse_error("<ROUTINE HI () <TELL \"x\"");
        assert!(matches!(err, ParseError::UnexpectedEndOfFile(_)));
    }

    #[test]
    fn test_pretty_print_reparse_round_trip() {
        let source = "<ROUTINE F (A \"OPT\" (B 2)) <COND (<EQUAL? .A 1> <TELL \"one\">)> <RTRUE>>";
        let decls = parse_input(source);
        let ZilDeclaration::Routine(routine) = &decls[0] else {
            panic!("expected routine");
        };
        // Print each body expression back to text and reparse; ASTs agree.
        for expr in &routine.body {
            let printed = format!("{}", expr);
            let mut parser = Parser::from_source(&printed, "test.zil").unwrap();
            let reparsed = parser.parse_expression().unwrap();
            assert_eq!(&reparsed, expr);
        }
    }

    // Include resolution uses real files under a scratch directory.

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zilc-parser-tests-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_include_splice_order() {
        let dir = scratch_dir("splice");
        fs::write(dir.join("main.zil"), "<CONSTANT A 1> <INSERT-FILE \"sub\"> <CONSTANT C 3>")
            .unwrap();
        fs::write(dir.join("sub.zil"), "<CONSTANT B 2>").unwrap();

        let decls = parse_file(&dir.join("main.zil")).unwrap();
        let names: Vec<_> = decls.iter().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_include_cycle() {
        let dir = scratch_dir("cycle");
        fs::write(dir.join("a.zil"), "<INSERT-FILE \"b\">").unwrap();
        fs::write(dir.join("b.zil"), "<INSERT-FILE \"c\">").unwrap();
        fs::write(dir.join("c.zil"), "<INSERT-FILE \"a\">").unwrap();

        let err = parse_file(&dir.join("a.zil")).unwrap_err();
        let ParseError::CircularInclude(chain, _) = err else {
            panic!("expected circular include, got {:?}", err);
        };
        assert_eq!(chain, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_include_not_found() {
        let dir = scratch_dir("missing");
        fs::write(dir.join("main.zil"), "<INSERT-FILE \"nowhere\">").unwrap();
        let err = parse_file(&dir.join("main.zil")).unwrap_err();
        assert!(matches!(err, ParseError::FileNotFound(name, _) if name == "nowhere"));
    }
}
