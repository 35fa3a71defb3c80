// Compile-time evaluator tests

#[cfg(test)]
mod tests {
    use crate::ast::ZilExpression;
    use crate::eval::{evaluate, EvalResult};
    use crate::parser::Parser;
    use indexmap::IndexMap;
    use test_log::test;

    fn eval_str(input: &str) -> EvalResult {
        let mut parser = Parser::from_source(input, "test.zil").unwrap();
        let expr = parser.parse_expression().unwrap();
        evaluate(&expr, &IndexMap::new())
    }

    fn expect_number(input: &str, expected: i16) {
        assert_eq!(
            eval_str(input),
            EvalResult::Value(ZilExpression::Number(expected)),
            "for input {}",
            input
        );
    }

    fn expect_string(input: &str, expected: &str) {
        assert_eq!(
            eval_str(input),
            EvalResult::Value(ZilExpression::String(expected.to_string())),
            "for input {}",
            input
        );
    }

    #[test]
    fn test_arithmetic() {
        expect_number("<+ 1 2 3>", 6);
        expect_number("<- 10 4>", 6);
        expect_number("<- 5>", -5);
        expect_number("<* 3 4 5>", 60);
        expect_number("</ 20 4>", 5);
        expect_number("<MOD 17 5>", 2);
    }

    #[test]
    fn test_arithmetic_wraps() {
        expect_number("<+ 32767 1>", -32768);
        expect_number("<* 256 256>", 0);
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert!(matches!(eval_str("</ 1 0>"), EvalResult::Error(_)));
        assert!(matches!(eval_str("<MOD 1 0>"), EvalResult::Error(_)));
    }

    #[test]
    fn test_comparisons() {
        expect_number("<= 3 3>", 1);
        expect_number("<= 3 4>", 0);
        expect_number("<EQUAL? 3 3>", 1);
        expect_number("<LESS? 2 3>", 1);
        expect_number("<GRTR? 2 3>", 0);
        expect_number("<= \"abc\" \"abc\">", 1);
        expect_number("<LESS? \"abc\" \"abd\">", 1);
    }

    #[test]
    fn test_incompatible_comparison_is_an_error() {
        assert!(matches!(eval_str("<= 3 \"abc\">"), EvalResult::Error(_)));
    }

    #[test]
    fn test_logic_short_circuit() {
        expect_number("<AND 1 0 </ 1 0>>", 0); // never reaches the division
        expect_number("<NOT 0>", 1);
        expect_number("<NOT 5>", 0);
        assert_eq!(
            eval_str("<OR 0 \"found\" </ 1 0>>"),
            EvalResult::Value(ZilExpression::String("found".to_string()))
        );
        assert_eq!(
            eval_str("<AND 1 2 3>"),
            EvalResult::Value(ZilExpression::Number(3))
        );
    }

    #[test]
    fn test_cond_and_if() {
        expect_number("<COND (<= 1 2> 10) (<= 2 2> 20)>", 20);
        expect_number("<COND (0 10)>", 0); // default
        expect_number("<IF 1 10 20>", 10);
        expect_number("<IF 0 10 20>", 20);
        expect_number("<IF 0 10>", 0);
    }

    #[test]
    fn test_list_operations() {
        expect_number("<LENGTH (1 2 3)>", 3);
        expect_number("<NTH (10 20 30) 2>", 20);
        assert_eq!(
            eval_str("<REST (1 2 3)>"),
            EvalResult::Value(ZilExpression::List(vec![
                ZilExpression::Number(2),
                ZilExpression::Number(3),
            ]))
        );
        assert!(matches!(eval_str("<NTH (1 2) 3>"), EvalResult::Error(_)));
    }

    #[test]
    fn test_string_operations() {
        expect_string("<STRING-CONCAT \"foo\" \"bar\">", "foobar");
        expect_number("<STRING-LENGTH \"hello\">", 5);
        expect_string("<STRING-UPPER \"abc\">", "ABC");
        expect_string("<STRING-LOWER \"AbC\">", "abc");
        expect_string("<SUBSTRING \"hello\" 2 3>", "ell");
        expect_number("<STRING-INDEX \"hello\" \"ll\">", 3);
        expect_number("<STRING-INDEX \"hello\" \"xyz\">", 0);
    }

    #[test]
    fn test_constant_lookup() {
        let mut constants = IndexMap::new();
        constants.insert("M-ENTER".to_string(), ZilExpression::Number(2));
        let mut parser = Parser::from_source("<+ M-ENTER 1>", "test.zil").unwrap();
        let expr = parser.parse_expression().unwrap();
        assert_eq!(
            evaluate(&expr, &constants),
            EvalResult::Value(ZilExpression::Number(3))
        );
    }

    #[test]
    fn test_not_evaluable_is_soft() {
        assert_eq!(eval_str("<GETP ,LANTERN P?SIZE>"), EvalResult::NotEvaluable);
        assert_eq!(eval_str(".LOCAL"), EvalResult::NotEvaluable);
        assert_eq!(eval_str("UNKNOWN-NAME"), EvalResult::NotEvaluable);
    }

    #[test]
    fn test_purity() {
        // Same expression, same constants, same answer.
        let first = eval_str("<+ <* 3 4> <MOD 10 3>>");
        let second = eval_str("<+ <* 3 4> <MOD 10 3>>");
        assert_eq!(first, second);
        assert_eq!(first, EvalResult::Value(ZilExpression::Number(13)));
    }
}
