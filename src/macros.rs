// Macro Processor
// Stores DEFMAC definitions, expands call sites with direct parameter
// substitution, intercepts <FORM ...> construction and <EVAL ...>
// compile-time evaluation. The processor is a handle around a
// mutex-guarded state so an embedder can share it across threads; the
// lock is taken once per operation and never across another lock.

use crate::ast::{MacroParameter, SourceLocation, ZilDeclaration, ZilExpression};
use crate::error::MacroError;
use crate::eval::{evaluate, EvalResult};
use indexmap::IndexMap;
use log::debug;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ZilMacro {
    pub name: String,
    pub parameters: Vec<MacroParameter>,
    pub body: ZilExpression,
    pub is_builtin: bool,
}

impl ZilMacro {
    /// Standard and quoted parameters are required.
    pub fn min_arity(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| {
                matches!(
                    p,
                    MacroParameter::Standard(_) | MacroParameter::Quoted(_)
                )
            })
            .count()
    }

    /// None means unbounded (a VariableArgs parameter is present).
    pub fn max_arity(&self) -> Option<usize> {
        if self
            .parameters
            .iter()
            .any(|p| matches!(p, MacroParameter::VariableArgs(_)))
        {
            None
        } else {
            Some(self.parameters.len())
        }
    }
}

#[derive(Default)]
struct MacroState {
    macros: IndexMap<String, ZilMacro>,
    /// Compile-time constant table consulted by <EVAL ...>.
    constants: IndexMap<String, ZilExpression>,
    /// Names currently being expanded; strict LIFO on every exit path.
    expansion_stack: Vec<String>,
}

pub struct MacroProcessor {
    state: Mutex<MacroState>,
}

impl Default for MacroProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroProcessor {
    pub fn new() -> Self {
        MacroProcessor {
            state: Mutex::new(MacroState::default()),
        }
    }

    /// Register a user macro. Redefining a built-in macro is an error;
    /// redefining a user macro replaces it.
    pub fn define_macro(
        &self,
        name: &str,
        parameters: Vec<MacroParameter>,
        body: ZilExpression,
        location: &SourceLocation,
    ) -> Result<(), MacroError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.macros.get(name) {
            if existing.is_builtin {
                return Err(MacroError::ExpansionError(
                    format!("cannot redefine built-in macro '{}'", name),
                    location.clone(),
                ));
            }
        }
        debug!("defining macro {} ({} parameters)", name, parameters.len());
        state.macros.insert(
            name.to_string(),
            ZilMacro {
                name: name.to_string(),
                parameters,
                body,
                is_builtin: false,
            },
        );
        Ok(())
    }

    /// Install a built-in macro that user code cannot replace.
    pub fn define_builtin_macro(
        &self,
        name: &str,
        parameters: Vec<MacroParameter>,
        body: ZilExpression,
    ) {
        let mut state = self.state.lock().unwrap();
        state.macros.insert(
            name.to_string(),
            ZilMacro {
                name: name.to_string(),
                parameters,
                body,
                is_builtin: true,
            },
        );
    }

    pub fn is_macro_defined(&self, name: &str) -> bool {
        self.state.lock().unwrap().macros.contains_key(name)
    }

    /// Register a constant for <EVAL ...> identifier lookup.
    pub fn define_constant(&self, name: &str, value: ZilExpression) {
        self.state
            .lock()
            .unwrap()
            .constants
            .insert(name.to_string(), value);
    }

    /// Expand one macro invocation.
    pub fn expand_macro(
        &self,
        name: &str,
        arguments: &[ZilExpression],
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        let mut state = self.state.lock().unwrap();
        state.expand_invocation(name, arguments, location)
    }

    /// Walk an expression tree, expanding every nested macro call.
    pub fn expand_expression(
        &self,
        expr: ZilExpression,
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        let mut state = self.state.lock().unwrap();
        state.expand_tree(expr, location)
    }

    /// Run the macro pass over a declaration stream: DEFMACs are
    /// registered and removed, constants feed the EVAL table, and every
    /// remaining expression position is expanded.
    pub fn process_declarations(
        &self,
        declarations: Vec<ZilDeclaration>,
    ) -> Result<Vec<ZilDeclaration>, MacroError> {
        let mut output = Vec::with_capacity(declarations.len());

        for declaration in declarations {
            match declaration {
                ZilDeclaration::Defmac(mac) => {
                    self.define_macro(&mac.name, mac.parameters, mac.body, &mac.location)?;
                }
                ZilDeclaration::Constant(mut constant) => {
                    constant.value =
                        self.expand_expression(constant.value, &constant.location)?;
                    // Literal constants become visible to <EVAL ...>.
                    if matches!(
                        constant.value,
                        ZilExpression::Number(_)
                            | ZilExpression::String(_)
                            | ZilExpression::Atom(_)
                    ) {
                        self.define_constant(&constant.name, constant.value.clone());
                    }
                    output.push(ZilDeclaration::Constant(constant));
                }
                ZilDeclaration::Routine(mut routine) => {
                    let location = routine.location.clone();
                    routine.body = routine
                        .body
                        .into_iter()
                        .map(|expr| self.expand_expression(expr, &location))
                        .collect::<Result<Vec<_>, _>>()?;
                    output.push(ZilDeclaration::Routine(routine));
                }
                ZilDeclaration::Global(mut global) => {
                    global.value = self.expand_expression(global.value, &global.location)?;
                    output.push(ZilDeclaration::Global(global));
                }
                ZilDeclaration::Set(name, value, location) => {
                    let value = self.expand_expression(value, &location)?;
                    output.push(ZilDeclaration::Set(name, value, location));
                }
                ZilDeclaration::Object(mut object) => {
                    let location = object.location.clone();
                    for property in &mut object.properties {
                        property.value = self
                            .expand_expression(property.value.clone(), &location)?;
                    }
                    output.push(ZilDeclaration::Object(object));
                }
                other => output.push(other),
            }
        }

        Ok(output)
    }
}

impl MacroState {
    fn expand_invocation(
        &mut self,
        name: &str,
        arguments: &[ZilExpression],
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        let mac = self
            .macros
            .get(name)
            .cloned()
            .ok_or_else(|| MacroError::UndefinedMacro(name.to_string(), location.clone()))?;

        let min = mac.min_arity();
        let max = mac.max_arity();
        if arguments.len() < min || max.is_some_and(|m| arguments.len() > m) {
            return Err(MacroError::ArgumentCountMismatch {
                name: name.to_string(),
                min,
                max,
                found: arguments.len(),
                location: location.clone(),
            });
        }

        // Re-entering an expansion that is already on the stack is a hard
        // error at the call site.
        if self.expansion_stack.iter().any(|n| n == name) {
            let mut chain = self.expansion_stack.clone();
            chain.push(name.to_string());
            return Err(MacroError::RecursiveExpansion(chain, location.clone()));
        }

        debug!("expanding macro {} with {} arguments", name, arguments.len());
        self.expansion_stack.push(name.to_string());
        let result = (|| {
            let bindings = bind_parameters(&mac.parameters, arguments);
            let substituted = self.substitute(&mac.body, &bindings, location)?;
            self.expand_tree(substituted, location)
        })();
        self.expansion_stack.pop();
        result
    }

    /// Walk an expression, expanding any list whose head names a defined
    /// macro. A head already on the expansion stack is left unchanged to
    /// break the cycle instead of erroring - this tolerates mutually
    /// referential call graphs that never actually expand recursively.
    fn expand_tree(
        &mut self,
        expr: ZilExpression,
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        match expr {
            ZilExpression::List(children) => {
                if let Some(ZilExpression::Atom(head)) = children.first() {
                    let head = head.clone();
                    if self.macros.contains_key(&head) {
                        if self.expansion_stack.iter().any(|n| n == &head) {
                            return Ok(ZilExpression::List(children));
                        }
                        return self.expand_invocation(&head, &children[1..], location);
                    }
                }
                let children = children
                    .into_iter()
                    .map(|child| self.expand_tree(child, location))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ZilExpression::List(children))
            }
            ZilExpression::Table(kind, children) => {
                let children = children
                    .into_iter()
                    .map(|child| self.expand_tree(child, location))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ZilExpression::Table(kind, children))
            }
            ZilExpression::Indirection(target) => Ok(ZilExpression::Indirection(Box::new(
                self.expand_tree(*target, location)?,
            ))),
            leaf => Ok(leaf),
        }
    }

    /// Direct, non-hygienic substitution: atoms and local variables whose
    /// name matches a parameter are replaced by the bound argument.
    fn substitute(
        &mut self,
        expr: &ZilExpression,
        bindings: &IndexMap<String, ZilExpression>,
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        match expr {
            ZilExpression::Atom(name) | ZilExpression::LocalVariable(name) => {
                match bindings.get(name) {
                    Some(replacement) => Ok(replacement.clone()),
                    None => Ok(expr.clone()),
                }
            }
            ZilExpression::List(children) => {
                if let Some(ZilExpression::Atom(head)) = children.first() {
                    if head == "FORM" {
                        return self.substitute_form(children, bindings, location);
                    }
                    if head == "EVAL" && children.len() == 2 {
                        return self.substitute_eval(&children[1], bindings, location);
                    }
                }
                let children = children
                    .iter()
                    .map(|child| self.substitute(child, bindings, location))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ZilExpression::List(children))
            }
            ZilExpression::Table(kind, children) => {
                let children = children
                    .iter()
                    .map(|child| self.substitute(child, bindings, location))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ZilExpression::Table(*kind, children))
            }
            ZilExpression::Indirection(target) => Ok(ZilExpression::Indirection(Box::new(
                self.substitute(target, bindings, location)?,
            ))),
            // Strings, numbers and global variables are never substituted.
            leaf => Ok(leaf.clone()),
        }
    }

    /// `<FORM OP a b ...>` builds the call expression `<OP a' b' ...>`.
    fn substitute_form(
        &mut self,
        children: &[ZilExpression],
        bindings: &IndexMap<String, ZilExpression>,
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        if children.len() < 2 {
            return Err(MacroError::ExpansionError(
                "FORM requires an operation".to_string(),
                location.clone(),
            ));
        }
        let op = &children[1];
        if !matches!(
            op,
            ZilExpression::Atom(_)
                | ZilExpression::LocalVariable(_)
                | ZilExpression::GlobalVariable(_)
        ) {
            return Err(MacroError::ExpansionError(
                format!("FORM operation must be an atom or variable, got {}", op),
                location.clone(),
            ));
        }

        // Substituting each element intercepts nested FORMs on the way.
        let mut result = Vec::with_capacity(children.len() - 1);
        for child in &children[1..] {
            result.push(self.substitute(child, bindings, location)?);
        }
        Ok(ZilExpression::List(result))
    }

    /// `<EVAL expr>` evaluates at expansion time. NotEvaluable leaves the
    /// substituted expression in place; evaluator errors are hard.
    fn substitute_eval(
        &mut self,
        argument: &ZilExpression,
        bindings: &IndexMap<String, ZilExpression>,
        location: &SourceLocation,
    ) -> Result<ZilExpression, MacroError> {
        let substituted = self.substitute(argument, bindings, location)?;
        match evaluate(&substituted, &self.constants) {
            EvalResult::Value(value) => Ok(value),
            EvalResult::NotEvaluable => Ok(substituted),
            EvalResult::Error(message) => {
                Err(MacroError::ExpansionError(message, location.clone()))
            }
        }
    }
}

fn bind_parameters(
    parameters: &[MacroParameter],
    arguments: &[ZilExpression],
) -> IndexMap<String, ZilExpression> {
    let mut bindings = IndexMap::new();
    let mut next = 0usize;

    for parameter in parameters {
        match parameter {
            MacroParameter::Standard(name) | MacroParameter::Quoted(name) => {
                // Arity was checked before binding.
                bindings.insert(name.clone(), arguments[next].clone());
                next += 1;
            }
            MacroParameter::Optional(name, default) => {
                if next < arguments.len() {
                    bindings.insert(name.clone(), arguments[next].clone());
                    next += 1;
                } else {
                    let fallback = default
                        .clone()
                        .unwrap_or_else(|| ZilExpression::List(vec![]));
                    bindings.insert(name.clone(), fallback);
                }
            }
            MacroParameter::VariableArgs(name) => {
                let rest: Vec<ZilExpression> = arguments[next..].to_vec();
                next = arguments.len();
                bindings.insert(name.clone(), ZilExpression::List(rest));
            }
        }
    }

    bindings
}

#[cfg(test)]
#[path = "macro_tests.rs"]
mod tests;
