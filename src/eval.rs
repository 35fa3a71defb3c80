// Compile-Time Evaluator
// Evaluates the restricted expression subset available to <EVAL ...> inside
// macro bodies. Anything outside the subset is NotEvaluable (soft); real
// faults (division by zero, type clashes) are hard errors.

use crate::ast::ZilExpression;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Value(ZilExpression),
    /// The expression is legal but outside the compile-time subset;
    /// expansion proceeds with the expression left as-is.
    NotEvaluable,
    Error(String),
}

impl EvalResult {
    pub fn map_value(self, f: impl FnOnce(ZilExpression) -> EvalResult) -> EvalResult {
        match self {
            EvalResult::Value(v) => f(v),
            other => other,
        }
    }
}

/// ZIL truthiness: zero, the empty string, the empty list and the FALSE
/// atom are false; everything else is true.
pub fn is_truthy(expr: &ZilExpression) -> bool {
    match expr {
        ZilExpression::Number(n) => *n != 0,
        ZilExpression::String(s) => !s.is_empty(),
        ZilExpression::Atom(name) => !name.is_empty() && name != "FALSE",
        ZilExpression::List(children) => !children.is_empty(),
        _ => true,
    }
}

pub fn evaluate(
    expr: &ZilExpression,
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    match expr {
        ZilExpression::Number(_) | ZilExpression::String(_) => EvalResult::Value(expr.clone()),
        ZilExpression::Atom(name) => match name.as_str() {
            "T" | "FALSE" => EvalResult::Value(expr.clone()),
            _ => match constants.get(name) {
                Some(value) => EvalResult::Value(value.clone()),
                None => EvalResult::NotEvaluable,
            },
        },
        ZilExpression::List(children) => {
            let Some(head) = expr.head_atom() else {
                return EvalResult::NotEvaluable;
            };
            let args = &children[1..];
            match head {
                "+" | "-" | "*" | "/" | "MOD" => {
                    evaluate_arithmetic(head, args, constants)
                }
                "=" | "==?" | "EQUAL?" => evaluate_comparison(Cmp::Eq, args, constants),
                "<" | "LESS?" | "L?" => evaluate_comparison(Cmp::Lt, args, constants),
                ">" | "GRTR?" | "G?" => evaluate_comparison(Cmp::Gt, args, constants),
                "<=" | "L=?" => evaluate_comparison(Cmp::Le, args, constants),
                ">=" | "G=?" => evaluate_comparison(Cmp::Ge, args, constants),
                "AND" => evaluate_and(args, constants),
                "OR" => evaluate_or(args, constants),
                "NOT" => {
                    if args.len() != 1 {
                        return EvalResult::Error("NOT takes exactly one argument".to_string());
                    }
                    evaluate(&args[0], constants).map_value(|v| {
                        EvalResult::Value(ZilExpression::Number(if is_truthy(&v) { 0 } else { 1 }))
                    })
                }
                "COND" => evaluate_cond(args, constants),
                "IF" => evaluate_if(args, constants),
                "LENGTH" => evaluate_length(args, constants),
                "NTH" => evaluate_nth(args, constants),
                "REST" => evaluate_rest(args, constants),
                "SUBSTRING" => evaluate_substring(args, constants),
                "STRING-CONCAT" => evaluate_string_concat(args, constants),
                "STRING-LENGTH" => evaluate_string_length(args, constants),
                "STRING-UPPER" => evaluate_string_case(args, constants, true),
                "STRING-LOWER" => evaluate_string_case(args, constants, false),
                "STRING-INDEX" => evaluate_string_index(args, constants),
                _ => EvalResult::NotEvaluable,
            }
        }
        // Variables, tables and indirection need runtime state.
        _ => EvalResult::NotEvaluable,
    }
}

fn evaluate_number(
    expr: &ZilExpression,
    constants: &IndexMap<String, ZilExpression>,
) -> Result<i16, EvalResult> {
    match evaluate(expr, constants) {
        EvalResult::Value(ZilExpression::Number(n)) => Ok(n),
        EvalResult::Value(other) => Err(EvalResult::Error(format!(
            "expected a number, got {}",
            other
        ))),
        other => Err(other),
    }
}

fn evaluate_arithmetic(
    op: &str,
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.is_empty() {
        return EvalResult::Error(format!("{} needs at least one argument", op));
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match evaluate_number(arg, constants) {
            Ok(n) => values.push(n),
            Err(e) => return e,
        }
    }

    // Unary minus negates; other unary applications pass through.
    if values.len() == 1 {
        let value = match op {
            "-" => values[0].wrapping_neg(),
            "/" | "MOD" => return EvalResult::Error(format!("{} needs two arguments", op)),
            _ => values[0],
        };
        return EvalResult::Value(ZilExpression::Number(value));
    }

    let mut acc = values[0];
    for &next in &values[1..] {
        acc = match op {
            "+" => acc.wrapping_add(next),
            "-" => acc.wrapping_sub(next),
            "*" => acc.wrapping_mul(next),
            "/" => {
                if next == 0 {
                    return EvalResult::Error("division by zero".to_string());
                }
                acc.wrapping_div(next)
            }
            "MOD" => {
                if next == 0 {
                    return EvalResult::Error("modulo by zero".to_string());
                }
                acc.wrapping_rem(next)
            }
            _ => unreachable!(),
        };
    }

    EvalResult::Value(ZilExpression::Number(acc))
}

#[derive(Clone, Copy)]
enum Cmp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

fn evaluate_comparison(
    cmp: Cmp,
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 2 {
        return EvalResult::Error("comparison takes exactly two arguments".to_string());
    }

    let left = match evaluate(&args[0], constants) {
        EvalResult::Value(v) => v,
        other => return other,
    };
    let right = match evaluate(&args[1], constants) {
        EvalResult::Value(v) => v,
        other => return other,
    };

    let ordering = match (&left, &right) {
        (ZilExpression::Number(a), ZilExpression::Number(b)) => a.cmp(b),
        (ZilExpression::String(a), ZilExpression::String(b)) => a.cmp(b),
        (ZilExpression::Atom(a), ZilExpression::Atom(b)) => a.cmp(b),
        _ => {
            return EvalResult::Error(format!(
                "cannot compare {} with {}",
                left, right
            ))
        }
    };

    let result = match cmp {
        Cmp::Eq => ordering.is_eq(),
        Cmp::Lt => ordering.is_lt(),
        Cmp::Gt => ordering.is_gt(),
        Cmp::Le => ordering.is_le(),
        Cmp::Ge => ordering.is_ge(),
    };

    EvalResult::Value(ZilExpression::Number(if result { 1 } else { 0 }))
}

fn evaluate_and(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    let mut last = ZilExpression::Number(1);
    for arg in args {
        match evaluate(arg, constants) {
            EvalResult::Value(v) => {
                if !is_truthy(&v) {
                    return EvalResult::Value(ZilExpression::Number(0));
                }
                last = v;
            }
            other => return other,
        }
    }
    EvalResult::Value(last)
}

fn evaluate_or(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    for arg in args {
        match evaluate(arg, constants) {
            EvalResult::Value(v) => {
                if is_truthy(&v) {
                    return EvalResult::Value(v);
                }
            }
            other => return other,
        }
    }
    EvalResult::Value(ZilExpression::Number(0))
}

fn evaluate_cond(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    for clause in args {
        let ZilExpression::List(parts) = clause else {
            return EvalResult::Error("COND clause must be a list".to_string());
        };
        let Some(condition) = parts.first() else {
            return EvalResult::Error("COND clause must not be empty".to_string());
        };

        let value = match evaluate(condition, constants) {
            EvalResult::Value(v) => v,
            other => return other,
        };
        if is_truthy(&value) {
            let mut result = value;
            for body in &parts[1..] {
                match evaluate(body, constants) {
                    EvalResult::Value(v) => result = v,
                    other => return other,
                }
            }
            return EvalResult::Value(result);
        }
    }
    // No clause matched.
    EvalResult::Value(ZilExpression::Number(0))
}

fn evaluate_if(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 2 && args.len() != 3 {
        return EvalResult::Error("IF takes two or three arguments".to_string());
    }

    match evaluate(&args[0], constants) {
        EvalResult::Value(condition) => {
            if is_truthy(&condition) {
                evaluate(&args[1], constants)
            } else if args.len() == 3 {
                evaluate(&args[2], constants)
            } else {
                EvalResult::Value(ZilExpression::Number(0))
            }
        }
        other => other,
    }
}

fn evaluate_list_arg(
    expr: &ZilExpression,
    constants: &IndexMap<String, ZilExpression>,
) -> Result<Vec<ZilExpression>, EvalResult> {
    match evaluate(expr, constants) {
        EvalResult::Value(ZilExpression::List(children)) => Ok(children),
        // A bare list literal evaluates to itself element-wise; anything
        // else is not a list.
        EvalResult::NotEvaluable => match expr {
            ZilExpression::List(children) => Ok(children.clone()),
            _ => Err(EvalResult::NotEvaluable),
        },
        EvalResult::Value(other) => Err(EvalResult::Error(format!(
            "expected a list, got {}",
            other
        ))),
        other => Err(other),
    }
}

fn evaluate_length(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 1 {
        return EvalResult::Error("LENGTH takes exactly one argument".to_string());
    }
    match evaluate_list_arg(&args[0], constants) {
        Ok(children) => EvalResult::Value(ZilExpression::Number(children.len() as i16)),
        Err(e) => e,
    }
}

fn evaluate_nth(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 2 {
        return EvalResult::Error("NTH takes exactly two arguments".to_string());
    }
    let children = match evaluate_list_arg(&args[0], constants) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let index = match evaluate_number(&args[1], constants) {
        Ok(n) => n,
        Err(e) => return e,
    };
    // NTH is 1-based.
    if index < 1 || index as usize > children.len() {
        return EvalResult::Error(format!(
            "NTH index {} out of range 1..{}",
            index,
            children.len()
        ));
    }
    EvalResult::Value(children[index as usize - 1].clone())
}

fn evaluate_rest(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return EvalResult::Error("REST takes one or two arguments".to_string());
    }
    let children = match evaluate_list_arg(&args[0], constants) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let count = if args.len() == 2 {
        match evaluate_number(&args[1], constants) {
            Ok(n) => n,
            Err(e) => return e,
        }
    } else {
        1
    };
    if count < 0 || count as usize > children.len() {
        return EvalResult::Error(format!(
            "REST count {} out of range 0..{}",
            count,
            children.len()
        ));
    }
    EvalResult::Value(ZilExpression::List(
        children[count as usize..].to_vec(),
    ))
}

fn evaluate_string_arg(
    expr: &ZilExpression,
    constants: &IndexMap<String, ZilExpression>,
) -> Result<String, EvalResult> {
    match evaluate(expr, constants) {
        EvalResult::Value(ZilExpression::String(s)) => Ok(s),
        EvalResult::Value(other) => Err(EvalResult::Error(format!(
            "expected a string, got {}",
            other
        ))),
        other => Err(other),
    }
}

fn evaluate_substring(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 3 {
        return EvalResult::Error("SUBSTRING takes a string, a start, and a length".to_string());
    }
    let string = match evaluate_string_arg(&args[0], constants) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let start = match evaluate_number(&args[1], constants) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let length = match evaluate_number(&args[2], constants) {
        Ok(n) => n,
        Err(e) => return e,
    };
    // 1-based start index over characters.
    if start < 1 || length < 0 {
        return EvalResult::Error("SUBSTRING start is 1-based, length non-negative".to_string());
    }
    let chars: Vec<char> = string.chars().collect();
    let begin = (start - 1) as usize;
    if begin + length as usize > chars.len() {
        return EvalResult::Error(format!(
            "SUBSTRING range {}+{} exceeds string length {}",
            start,
            length,
            chars.len()
        ));
    }
    let slice: String = chars[begin..begin + length as usize].iter().collect();
    EvalResult::Value(ZilExpression::String(slice))
}

fn evaluate_string_concat(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    let mut result = String::new();
    for arg in args {
        match evaluate_string_arg(arg, constants) {
            Ok(s) => result.push_str(&s),
            Err(e) => return e,
        }
    }
    EvalResult::Value(ZilExpression::String(result))
}

fn evaluate_string_length(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 1 {
        return EvalResult::Error("STRING-LENGTH takes exactly one argument".to_string());
    }
    match evaluate_string_arg(&args[0], constants) {
        Ok(s) => EvalResult::Value(ZilExpression::Number(s.chars().count() as i16)),
        Err(e) => e,
    }
}

fn evaluate_string_case(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
    upper: bool,
) -> EvalResult {
    if args.len() != 1 {
        return EvalResult::Error("string case conversion takes exactly one argument".to_string());
    }
    match evaluate_string_arg(&args[0], constants) {
        Ok(s) => {
            let converted = if upper {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            };
            EvalResult::Value(ZilExpression::String(converted))
        }
        Err(e) => e,
    }
}

fn evaluate_string_index(
    args: &[ZilExpression],
    constants: &IndexMap<String, ZilExpression>,
) -> EvalResult {
    if args.len() != 2 {
        return EvalResult::Error("STRING-INDEX takes a string and a substring".to_string());
    }
    let haystack = match evaluate_string_arg(&args[0], constants) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let needle = match evaluate_string_arg(&args[1], constants) {
        Ok(s) => s,
        Err(e) => return e,
    };
    // 1-based character position of the first occurrence, 0 when absent.
    let position = match haystack.find(&needle) {
        Some(byte_index) => haystack[..byte_index].chars().count() as i16 + 1,
        None => 0,
    };
    EvalResult::Value(ZilExpression::Number(position))
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
