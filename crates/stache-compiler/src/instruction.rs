//! The boundary between the compiler and an output backend.
//!
//! The composer describes a template as an ordered series of calls on an
//! [`InstructionSink`]. Values are named by [`Expr`]s, which say where a value
//! lives at render time relative to the bindings the guards introduce.

use std::fmt;

use crate::error::CompileError;

/// Render-time location of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A binding: `data`, `context`, `template`, or a name introduced by a guard.
    Var(String),
    /// Struct field access.
    Field(Box<Expr>, String),
    /// Mapping entry; absent keys evaluate to nothing.
    Key(Box<Expr>, String),
    /// Direct child lookup on a context node.
    NodeGet(Box<Expr>, String),
    /// Child lookup on a context node, continuing through its parents.
    NodeFind(Box<Expr>, String),
    /// True on the first step of the loop bound to the named index.
    First(String),
    /// True on the last step of the loop bound to the named index.
    Last(String),
    Index { var: String, one_based: bool },
    /// True when an enum value is the named variant.
    Is(Box<Expr>, String),
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn field(self, name: &str) -> Self {
        Expr::Field(Box::new(self), name.to_string())
    }

    pub fn key(self, key: &str) -> Self {
        Expr::Key(Box::new(self), key.to_string())
    }

    pub fn node_get(self, name: &str) -> Self {
        Expr::NodeGet(Box::new(self), name.to_string())
    }

    pub fn node_find(self, name: &str) -> Self {
        Expr::NodeFind(Box::new(self), name.to_string())
    }

    pub fn is(self, variant: &str) -> Self {
        Expr::Is(Box::new(self), variant.to_string())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Field(base, name) => write!(f, "{base}.{name}"),
            Expr::Key(base, key) => write!(f, "{base}[{key:?}]"),
            Expr::NodeGet(base, name) => write!(f, "{base}.get({name:?})"),
            Expr::NodeFind(base, name) => write!(f, "{base}.find({name:?})"),
            Expr::First(var) => write!(f, "{var}.first"),
            Expr::Last(var) => write!(f, "{var}.last"),
            Expr::Index { var, one_based } => {
                if *one_based {
                    write!(f, "{var} + 1")
                } else {
                    write!(f, "{var}")
                }
            }
            Expr::Is(base, variant) => write!(f, "{base} is {variant}"),
        }
    }
}

/// Structural wrapper around a section or inverted body.
///
/// A section renders its body once per time the guard passes. An inverted
/// section renders its body exactly when the same guard would pass zero times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Passes once when the value is `true`.
    Truthy(Expr),
    /// Passes once when the value is present.
    Present(Expr),
    /// Passes once per element, binding `element` and the loop state `index`.
    Each {
        items: Expr,
        element: String,
        index: String,
    },
    /// Iterates a context node: children of a sequence, nothing when falsey,
    /// otherwise the node itself once.
    EachNode {
        node: Expr,
        element: String,
        index: String,
    },
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Truthy(expr) => write!(f, "if {expr}"),
            Guard::Present(expr) => write!(f, "if present {expr}"),
            Guard::Each {
                items,
                element,
                index,
            } => write!(f, "for ({index}, {element}) in {items}"),
            Guard::EachNode {
                node,
                element,
                index,
            } => write!(f, "for ({index}, {element}) in node {node}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escaping {
    Escaped,
    Raw,
}

/// How the renderer treats what a lambda returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LambdaKind {
    Raw,
    /// The returned model is bound to `var` while the compiled body runs.
    Model { var: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaCall {
    pub name: String,
    /// Section body exactly as written, tags unprocessed.
    pub body: String,
    /// Value of the scope the section was opened in.
    pub current: Expr,
    pub escaping: Escaping,
    pub kind: LambdaKind,
    /// Partial indentation owed to a standalone lambda's line. Written
    /// before the lambda's output, and only when there is output.
    pub indent: String,
}

/// Compiles a lambda's template into the sink it is given.
pub type SubCompile<'a> = dyn FnMut(&mut dyn InstructionSink) -> Result<(), CompileError> + 'a;

/// Receives the ordered instructions of a compiled template.
///
/// A failed compile may leave a sink with partial state; the caller discards it.
pub trait InstructionSink {
    fn literal(&mut self, text: &str);

    fn emit_value(&mut self, expr: &Expr, escaping: Escaping);

    fn enter_section(&mut self, guard: &Guard);

    fn exit_section(&mut self);

    fn enter_inverted(&mut self, guard: &Guard);

    fn exit_inverted(&mut self);

    /// Start of an inlined partial or parent expansion.
    fn invoke_partial(&mut self, name: &str);

    fn exit_partial(&mut self) {}

    /// Called once per lambda section. The body stays opaque unless the sink
    /// runs `compile`.
    fn invoke_lambda(
        &mut self,
        call: &LambdaCall,
        compile: &mut SubCompile<'_>,
    ) -> Result<(), CompileError>;

    fn enter_block(&mut self, name: &str);

    fn exit_block(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expr_display() {
        let expr = Expr::var("data").field("items").key("a b").node_get("x");
        assert_eq!(expr.to_string(), r#"data.items["a b"].get("x")"#);
        assert_eq!(
            Expr::Index {
                var: "index".into(),
                one_based: true
            }
            .to_string(),
            "index + 1"
        );
    }

    #[test]
    fn test_guard_display() {
        let guard = Guard::Each {
            items: Expr::var("data").field("items"),
            element: "element".into(),
            index: "index".into(),
        };
        assert_eq!(guard.to_string(), "for (index, element) in data.items");
    }
}
