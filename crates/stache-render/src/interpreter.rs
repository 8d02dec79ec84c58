//! Program interpreter.
//!
//! Walks a [`Program`] against JSON data. Bindings live in a stack of scopes:
//! the root scope holds `data`, `context` and `template`, and every loop step
//! and model lambda pushes a scope of its own.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};
use stache_compiler::{Escaping, Expr, Guard, LambdaKind};

use crate::escape::{Escaper, NoEscape};
use crate::node::{ContextNode, NodeError};
use crate::program::{Instruction, Program};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("no lambda registered as '{0}'")]
    UnknownLambda(String),

    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),

    #[error("'{0}' is not a sequence")]
    NotASequence(String),

    #[error("lambda '{0}' returned a model but has no template to render it")]
    UnexpectedModel(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// What a lambda hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaOutput {
    Raw(String),
    Model(Value),
}

/// Called with the raw section body and the value of the enclosing scope.
pub type LambdaFn = dyn Fn(&str, &Value) -> LambdaOutput + Send + Sync;

/// Lambda implementations by name.
#[derive(Default)]
pub struct Lambdas {
    entries: BTreeMap<String, Box<LambdaFn>>,
}

impl Lambdas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        lambda: impl Fn(&str, &Value) -> LambdaOutput + Send + Sync + 'static,
    ) {
        self.entries.insert(name.to_string(), Box::new(lambda));
    }

    pub fn with(
        mut self,
        name: &str,
        lambda: impl Fn(&str, &Value) -> LambdaOutput + Send + Sync + 'static,
    ) -> Self {
        self.register(name, lambda);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LambdaFn> {
        self.entries.get(name).map(|lambda| lambda.as_ref())
    }
}

pub struct RenderInput {
    pub data: Value,
    pub context: ContextNode,
}

impl RenderInput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            context: ContextNode::empty(),
        }
    }

    pub fn with_context(mut self, context: ContextNode) -> Self {
        self.context = context;
        self
    }
}

pub struct Renderer {
    lambdas: Lambdas,
    escaper: Box<dyn Escaper>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            lambdas: Lambdas::default(),
            escaper: Box::new(NoEscape),
        }
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_escaper(mut self, escaper: impl Escaper + 'static) -> Self {
        self.escaper = Box::new(escaper);
        self
    }

    pub fn with_lambdas(mut self, lambdas: Lambdas) -> Self {
        self.lambdas = lambdas;
        self
    }

    pub fn with_lambda(
        mut self,
        name: &str,
        lambda: impl Fn(&str, &Value) -> LambdaOutput + Send + Sync + 'static,
    ) -> Self {
        self.lambdas.register(name, lambda);
        self
    }

    #[tracing::instrument(level = "debug", skip_all, fields(template = %program.name()))]
    pub fn render(&self, program: &Program, input: &RenderInput) -> Result<String, RenderError> {
        let mut root = HashMap::new();
        root.insert("data".to_string(), Slot::Json(input.data.clone()));
        root.insert("context".to_string(), Slot::Node(input.context.clone()));
        root.insert(
            "template".to_string(),
            Slot::Json(json!({ "name": program.name() })),
        );

        let mut interpreter = Interpreter {
            renderer: self,
            scopes: vec![root],
            out: String::new(),
        };
        interpreter.run(program.instructions())?;
        tracing::debug!(bytes = interpreter.out.len(), "rendered");
        Ok(interpreter.out)
    }
}

/// A bound value.
#[derive(Debug, Clone)]
enum Slot {
    Json(Value),
    Node(ContextNode),
    /// Loop state bound to an index name.
    Step { index: usize, len: usize },
    Missing,
}

impl Slot {
    fn into_value(self) -> Value {
        match self {
            Slot::Json(value) => value,
            Slot::Node(node) => node.value(),
            Slot::Step { index, .. } => Value::from(index),
            Slot::Missing => Value::Null,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Slot::Json(Value::Bool(b)) => *b,
            Slot::Json(Value::Null) | Slot::Missing => false,
            Slot::Json(_) | Slot::Step { .. } => true,
            Slot::Node(node) => !node.is_falsey(),
        }
    }

    fn is_present(&self) -> bool {
        match self {
            Slot::Json(Value::Null) | Slot::Missing => false,
            Slot::Node(node) => !node.is_empty(),
            Slot::Json(_) | Slot::Step { .. } => true,
        }
    }

    fn text(self) -> String {
        match self {
            Slot::Json(Value::String(text)) => text,
            Slot::Json(Value::Null) | Slot::Missing => String::new(),
            Slot::Json(other) => other.to_string(),
            Slot::Node(node) => node.render(),
            Slot::Step { index, .. } => index.to_string(),
        }
    }
}

struct Interpreter<'r> {
    renderer: &'r Renderer,
    scopes: Vec<HashMap<String, Slot>>,
    out: String,
}

impl Interpreter<'_> {
    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn set_local(&mut self, name: &str, slot: Slot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn get_var(&self, name: &str) -> Option<&Slot> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn run(&mut self, instructions: &[Instruction]) -> Result<(), RenderError> {
        for instruction in instructions {
            match instruction {
                Instruction::Literal(text) => self.out.push_str(text),
                Instruction::Value { expr, escaping } => {
                    let text = self.eval(expr)?.text();
                    self.write(&text, *escaping);
                }
                Instruction::Section { guard, body } => self.section(guard, body)?,
                Instruction::Inverted { guard, body } => {
                    if !self.passes(guard)? {
                        self.run(body)?;
                    }
                }
                Instruction::Partial { body, .. } | Instruction::Block { body, .. } => {
                    self.run(body)?
                }
                Instruction::Lambda { call, body } => {
                    let renderer = self.renderer;
                    let lambda = renderer
                        .lambdas
                        .get(&call.name)
                        .ok_or_else(|| RenderError::UnknownLambda(call.name.clone()))?;
                    let current = self.eval(&call.current)?.into_value();
                    let start = self.out.len();
                    match (lambda(&call.body, &current), &call.kind, body) {
                        (LambdaOutput::Raw(text), _, _) => self.write(&text, call.escaping),
                        (LambdaOutput::Model(model), LambdaKind::Model { var }, Some(body)) => {
                            self.scoped(|this| {
                                this.set_local(var, Slot::Json(model));
                                this.run(body)
                            })?
                        }
                        (LambdaOutput::Model(_), _, _) => {
                            return Err(RenderError::UnexpectedModel(call.name.clone()))
                        }
                    }
                    if self.out.len() > start {
                        self.out.insert_str(start, &call.indent);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run `f` in a fresh scope, popping it on error too.
    fn scoped(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.push_scope();
        let result = f(self);
        self.pop_scope();
        result
    }

    fn write(&mut self, text: &str, escaping: Escaping) {
        match escaping {
            Escaping::Escaped => self.out.push_str(&self.renderer.escaper.escape(text)),
            Escaping::Raw => self.out.push_str(text),
        }
    }

    fn section(&mut self, guard: &Guard, body: &[Instruction]) -> Result<(), RenderError> {
        match guard {
            Guard::Truthy(expr) => {
                if self.eval(expr)?.is_truthy() {
                    self.run(body)?;
                }
            }
            Guard::Present(expr) => {
                if self.eval(expr)?.is_present() {
                    self.run(body)?;
                }
            }
            Guard::Each {
                items,
                element,
                index,
            } => {
                let items = self.sequence(items)?;
                let len = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    self.step(element, Slot::Json(item), index, i, len, body)?;
                }
            }
            Guard::EachNode {
                node,
                element,
                index,
            } => {
                let nodes: Vec<ContextNode> = self.node(node)?.iter().collect();
                let len = nodes.len();
                for (i, child) in nodes.into_iter().enumerate() {
                    self.step(element, Slot::Node(child), index, i, len, body)?;
                }
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        element: &str,
        value: Slot,
        index: &str,
        i: usize,
        len: usize,
        body: &[Instruction],
    ) -> Result<(), RenderError> {
        self.scoped(|this| {
            this.set_local(element, value);
            this.set_local(index, Slot::Step { index: i, len });
            this.run(body)
        })
    }

    /// Whether a section with this guard would render at least once.
    fn passes(&self, guard: &Guard) -> Result<bool, RenderError> {
        Ok(match guard {
            Guard::Truthy(expr) => self.eval(expr)?.is_truthy(),
            Guard::Present(expr) => self.eval(expr)?.is_present(),
            Guard::Each { items, .. } => !self.sequence(items)?.is_empty(),
            Guard::EachNode { node, .. } => self.node(node)?.iter().next().is_some(),
        })
    }

    fn sequence(&self, expr: &Expr) -> Result<Vec<Value>, RenderError> {
        match self.eval(expr)? {
            Slot::Json(Value::Array(items)) => Ok(items),
            Slot::Json(Value::Null) | Slot::Missing => Ok(Vec::new()),
            Slot::Node(node) => Ok(node.iter().map(|child| child.value()).collect()),
            Slot::Json(_) | Slot::Step { .. } => Err(RenderError::NotASequence(expr.to_string())),
        }
    }

    fn node(&self, expr: &Expr) -> Result<ContextNode, RenderError> {
        match self.eval(expr)? {
            Slot::Node(node) => Ok(node),
            Slot::Missing => Ok(ContextNode::empty()),
            other => Ok(ContextNode::of(other.into_value())?),
        }
    }

    fn step_of(&self, var: &str) -> Result<(usize, usize), RenderError> {
        match self.get_var(var) {
            Some(Slot::Step { index, len }) => Ok((*index, *len)),
            _ => Err(RenderError::UnboundVariable(var.to_string())),
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Slot, RenderError> {
        Ok(match expr {
            Expr::Var(name) => self
                .get_var(name)
                .cloned()
                .ok_or_else(|| RenderError::UnboundVariable(name.clone()))?,
            Expr::Field(base, name) | Expr::Key(base, name) => match self.eval(base)? {
                Slot::Json(Value::Object(mut map)) => {
                    map.remove(name).map_or(Slot::Missing, Slot::Json)
                }
                Slot::Node(node) => node.get(name).map_or(Slot::Missing, Slot::Node),
                _ => Slot::Missing,
            },
            Expr::NodeGet(base, name) => {
                Slot::Node(self.node(base)?.get(name).unwrap_or_else(ContextNode::empty))
            }
            Expr::NodeFind(base, name) => {
                Slot::Node(self.node(base)?.find(name).unwrap_or_else(ContextNode::empty))
            }
            Expr::First(var) => Slot::Json(Value::Bool(self.step_of(var)?.0 == 0)),
            Expr::Last(var) => {
                let (index, len) = self.step_of(var)?;
                Slot::Json(Value::Bool(index + 1 == len))
            }
            Expr::Index { var, one_based } => {
                let (index, _) = self.step_of(var)?;
                Slot::Json(Value::from(index + usize::from(*one_based)))
            }
            Expr::Is(base, variant) => Slot::Json(Value::Bool(matches!(
                self.eval(base)?,
                Slot::Json(Value::String(ref name)) if name == variant
            ))),
        })
    }
}
