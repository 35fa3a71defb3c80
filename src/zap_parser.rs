// ZAP Assembly Parser
// Line-oriented: each line is a label, a label plus instruction, a
// directive, or an instruction. Fields split on whitespace and commas
// with quoted strings preserved; branch (/ \) and result (>) prefixes
// are peeled off the trailing operands.

use crate::error::AssembleError;

#[derive(Debug, Clone, PartialEq)]
pub struct ZapInstruction {
    pub opcode: String,
    pub operands: Vec<String>,
    /// Label defined on the same line, if any.
    pub label: Option<String>,
    pub branch_target: Option<String>,
    /// True = branch when the test succeeds (`/`), false = when it fails (`\`).
    pub branch_on_true: bool,
    pub result_target: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZapStatement {
    /// A standalone `NAME:` line.
    Label(String, usize),
    /// `.NAME args...`
    Directive {
        name: String,
        args: Vec<String>,
        line: usize,
    },
    Instruction(ZapInstruction),
}

pub fn parse_zap(source: &str) -> Result<Vec<ZapStatement>, AssembleError> {
    let mut statements = Vec::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;
        let line = strip_comment(raw_line);
        let mut tokens = split_fields(line, line_number)?;
        if tokens.is_empty() {
            continue;
        }

        // Leading labels; several may stack on one line.
        let mut label = None;
        while !tokens.is_empty() && tokens[0].ends_with(':') && tokens[0].len() > 1 {
            let name = tokens.remove(0);
            let name = name.trim_end_matches(':').to_string();
            if let Some(previous) = label.replace(name) {
                // Only the innermost label rides the instruction; emit the
                // outer one as its own statement.
                statements.push(ZapStatement::Label(previous, line_number));
            }
        }

        if tokens.is_empty() {
            if let Some(name) = label {
                statements.push(ZapStatement::Label(name, line_number));
            }
            continue;
        }

        if let Some(directive) = tokens[0].strip_prefix('.') {
            if let Some(name) = label {
                statements.push(ZapStatement::Label(name, line_number));
            }
            statements.push(ZapStatement::Directive {
                name: directive.to_string(),
                args: tokens[1..].to_vec(),
                line: line_number,
            });
            continue;
        }

        let opcode = tokens.remove(0);
        let mut branch_target = None;
        let mut branch_on_true = true;
        let mut result_target = None;

        // Branch and store markers trail the operand list.
        while let Some(last) = tokens.last().cloned() {
            if let Some(target) = last.strip_prefix('/') {
                branch_target = Some(target.to_string());
                branch_on_true = true;
                tokens.pop();
            } else if let Some(target) = last.strip_prefix('\\') {
                branch_target = Some(target.to_string());
                branch_on_true = false;
                tokens.pop();
            } else if let Some(target) = last.strip_prefix('>') {
                result_target = Some(target.to_string());
                tokens.pop();
            } else {
                break;
            }
        }

        statements.push(ZapStatement::Instruction(ZapInstruction {
            opcode,
            operands: tokens,
            label,
            branch_target,
            branch_on_true,
            result_target,
            line: line_number,
        }));
    }

    Ok(statements)
}

/// Truncate at the first `;` outside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

/// Split on whitespace and commas; a quoted string is a single field with
/// its quotes retained.
fn split_fields(line: &str, line_number: usize) -> Result<Vec<String>, AssembleError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in line.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                current.push(ch);
                in_string = true;
            }
            ' ' | '\t' | ',' => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }

    if in_string {
        return Err(AssembleError::InvalidInstruction(format!(
            "unterminated string on line {}",
            line_number
        )));
    }
    if !current.is_empty() {
        fields.push(current);
    }
    Ok(fields)
}

#[cfg(test)]
#[path = "zap_parser_tests.rs"]
mod tests;
