//! Scope resolution.
//!
//! Each open section, partial or lambda model adds a [`Scope`] pointing at
//! the scope it was opened in. Names are resolved by walking that chain:
//!
//! 1. root-only bindings (`@root`, `@context`, `@template`)
//! 2. an upward search that skips mapping and dynamic scopes
//! 3. for sections, a lambda bound on the root value
//! 4. the same search with every scope included
//!
//! Struct scopes answer from their own fields before asking their parent.
//! Mapping and dynamic scopes ask their parent first (skipping other mapping
//! and dynamic scopes) and only then answer themselves, since they claim
//! every key at compile time.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::ResolveError;
use crate::instruction::{Expr, Guard};
use crate::names::NameEnv;
use crate::shape::{LambdaShape, Shape, ShapeProvider, StructShape};

pub const ROOT: &str = "@root";
pub const CONTEXT: &str = "@context";
pub const TEMPLATE: &str = "@template";

/// A value located at render time by `expr`, with its static shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub expr: Expr,
    pub shape: Shape,
}

impl Found {
    pub fn new(expr: Expr, shape: Shape) -> Self {
        Self { expr, shape }
    }
}

/// What the tag that names a value intends to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Variable,
    UnescapedVariable,
    Section,
    Inverted,
    Partial,
    Parent,
    Block,
    /// A non-final segment of a dotted name.
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    SkipMappings,
}

#[derive(Debug)]
pub enum ScopeKind {
    Root { bindings: Vec<(&'static str, Found)> },
    /// A struct, mapping, dynamic node or leaf value.
    Value(Found),
    /// Loop state of an iterated sequence; the element scope is its child.
    Iteration { index: String },
    /// Body of a boolean section. `.` is the boolean.
    Guard(Found),
    /// Body of an inverted section. Adds nothing to lookup.
    Inverted,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<Rc<Scope>>,
}

impl Scope {
    /// Scope for the top-level data, under a synthetic root holding the
    /// root-only bindings.
    pub fn root(shape: &Shape) -> Rc<Scope> {
        let data = Found::new(Expr::var("data"), shape.clone());
        let bindings = vec![
            (ROOT, data.clone()),
            (CONTEXT, Found::new(Expr::var("context"), Shape::Dynamic)),
            (
                TEMPLATE,
                Found::new(Expr::var("template"), Shape::mapping(Shape::Text)),
            ),
        ];
        let root = Rc::new(Scope {
            kind: ScopeKind::Root { bindings },
            parent: None,
        });
        Scope::child(&root, ScopeKind::Value(data))
    }

    pub fn child(parent: &Rc<Scope>, kind: ScopeKind) -> Rc<Scope> {
        Rc::new(Scope {
            kind,
            parent: Some(parent.clone()),
        })
    }

    fn chain(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |scope| scope.parent.as_deref())
    }

    /// The value `.` refers to.
    pub fn current(&self) -> Option<Found> {
        self.chain().find_map(|scope| match &scope.kind {
            ScopeKind::Value(found) | ScopeKind::Guard(found) => Some(found.clone()),
            _ => None,
        })
    }

    pub fn root_binding(&self, name: &str) -> Option<Found> {
        self.chain().find_map(|scope| match &scope.kind {
            ScopeKind::Root { bindings } => bindings
                .iter()
                .find(|(binding, _)| *binding == name)
                .map(|(_, found)| found.clone()),
            _ => None,
        })
    }

    /// One line per scope, innermost first.
    pub fn describe(&self) -> Vec<String> {
        self.chain()
            .map(|scope| match &scope.kind {
                ScopeKind::Root { .. } => "root".to_string(),
                ScopeKind::Value(found) => format!("{} ({})", found.expr, found.shape),
                ScopeKind::Iteration { index } => format!("loop {index}"),
                ScopeKind::Guard(found) => format!("if {}", found.expr),
                ScopeKind::Inverted => "inverted".to_string(),
            })
            .collect()
    }
}

/// Outcome of resolving one tag name.
#[derive(Debug)]
pub enum Resolution {
    Value(Found),
    /// Guards to enter in order, and the scope of the section body.
    Section {
        guards: Vec<Guard>,
        scope: Rc<Scope>,
    },
    Inverted {
        guard: Guard,
        scope: Rc<Scope>,
    },
    Lambda(LambdaShape),
    /// Partials, parents and blocks compile against the scope they appear in.
    Enclosing(Rc<Scope>),
}

enum Lookup {
    Found(Found),
    Lambda(LambdaShape),
}

pub struct Resolver<'a> {
    shapes: &'a dyn ShapeProvider,
    lambdas: &'a BTreeMap<String, LambdaShape>,
}

impl<'a> Resolver<'a> {
    pub fn new(shapes: &'a dyn ShapeProvider, lambdas: &'a BTreeMap<String, LambdaShape>) -> Self {
        Self { shapes, lambdas }
    }

    pub fn resolve(
        &self,
        scope: &Rc<Scope>,
        name: &str,
        purpose: Purpose,
        names: &mut NameEnv,
    ) -> Result<Resolution, ResolveError> {
        // template names go to the loader untouched
        if matches!(purpose, Purpose::Partial | Purpose::Parent | Purpose::Block) {
            return Ok(Resolution::Enclosing(scope.clone()));
        }

        let found = if name == "." {
            scope.current().ok_or_else(|| not_found(name, scope))?
        } else {
            match self.lookup(scope, name, purpose)? {
                Lookup::Found(found) => found,
                Lookup::Lambda(lambda) => return Ok(Resolution::Lambda(lambda)),
            }
        };

        match purpose {
            Purpose::Variable | Purpose::UnescapedVariable => {
                if !found.shape.is_renderable() {
                    return Err(ResolveError::Shape(format!(
                        "Cannot render '{name}' of shape {} as a variable",
                        found.shape
                    )));
                }
                Ok(Resolution::Value(found))
            }
            Purpose::Section => {
                let (guards, scope) = self.open_section(scope, found, names)?;
                Ok(Resolution::Section { guards, scope })
            }
            Purpose::Inverted => {
                let guard = self.inverted_guard(&found, names);
                let scope = Scope::child(scope, ScopeKind::Inverted);
                Ok(Resolution::Inverted { guard, scope })
            }
            Purpose::Path | Purpose::Partial | Purpose::Parent | Purpose::Block => {
                Ok(Resolution::Value(found))
            }
        }
    }

    fn lookup(&self, scope: &Rc<Scope>, name: &str, purpose: Purpose) -> Result<Lookup, ResolveError> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(not_found(name, scope));
        }
        let (first, rest) = segments.split_at(1);
        let first = first[0];

        let mut found = match scope.root_binding(first) {
            Some(found) => found,
            None => match self.find(scope, first, Filter::SkipMappings)? {
                Some(found) => found,
                None => {
                    if rest.is_empty() {
                        if let Some(lambda) = self.lambdas.get(first) {
                            match purpose {
                                Purpose::Section => return Ok(Lookup::Lambda(lambda.clone())),
                                Purpose::Inverted => {
                                    return Err(ResolveError::Shape(format!(
                                        "Lambda section '{name}' cannot be inverted"
                                    )))
                                }
                                _ => {}
                            }
                        }
                    }
                    self.find(scope, first, Filter::All)?
                        .ok_or_else(|| not_found(name, scope))?
                }
            },
        };

        for segment in rest {
            if !matches!(
                found.shape,
                Shape::Struct(_) | Shape::Mapping(_) | Shape::Dynamic | Shape::Enum(_)
            ) {
                return Err(ResolveError::Shape(format!(
                    "Cannot resolve '{segment}' of '{name}' through a value of shape {}",
                    found.shape
                )));
            }
            found = self
                .get(&found, segment)?
                .ok_or_else(|| not_found(name, scope))?;
        }
        Ok(Lookup::Found(found))
    }

    /// Direct child of a value, no upward search.
    pub fn get(&self, found: &Found, name: &str) -> Result<Option<Found>, ResolveError> {
        let child = match &found.shape {
            Shape::Struct(struct_name) => self
                .struct_shape(struct_name)?
                .fields
                .get(name)
                .map(|shape| Found::new(found.expr.clone().field(name), shape.clone())),
            Shape::Enum(enum_name) => {
                let shape = self.shapes.enum_shape(enum_name).ok_or_else(|| {
                    ResolveError::Shape(format!("Unknown enum shape '{enum_name}'"))
                })?;
                shape
                    .variants
                    .iter()
                    .any(|variant| variant == name)
                    .then(|| Found::new(found.expr.clone().is(name), Shape::Bool))
            }
            Shape::Mapping(value) => Some(Found::new(found.expr.clone().key(name), (**value).clone())),
            Shape::Dynamic => Some(Found::new(found.expr.clone().node_get(name), Shape::Dynamic)),
            Shape::Bool
            | Shape::Text
            | Shape::Number
            | Shape::Optional(_)
            | Shape::Sequence(_) => None,
        };
        Ok(child)
    }

    /// Upward search starting at `scope`.
    pub fn find(&self, scope: &Scope, name: &str, filter: Filter) -> Result<Option<Found>, ResolveError> {
        match &scope.kind {
            ScopeKind::Root { .. } => Ok(None),
            ScopeKind::Value(found) if found.shape.is_mapping_like() => {
                if let Some(parent) = &scope.parent {
                    if let Some(hit) = self.find(parent, name, Filter::SkipMappings)? {
                        return Ok(Some(hit));
                    }
                }
                if filter == Filter::SkipMappings {
                    return Ok(None);
                }
                Ok(match &found.shape {
                    Shape::Dynamic => Some(Found::new(found.expr.clone().node_find(name), Shape::Dynamic)),
                    _ => self.get(found, name)?,
                })
            }
            ScopeKind::Value(found) => match self.get(found, name)? {
                Some(hit) => Ok(Some(hit)),
                None => self.find_in_parent(scope, name, filter),
            },
            ScopeKind::Iteration { index } => match loop_binding(index, name) {
                Some(hit) => Ok(Some(hit)),
                None => self.find_in_parent(scope, name, filter),
            },
            ScopeKind::Guard(_) | ScopeKind::Inverted => self.find_in_parent(scope, name, filter),
        }
    }

    fn find_in_parent(&self, scope: &Scope, name: &str, filter: Filter) -> Result<Option<Found>, ResolveError> {
        match &scope.parent {
            Some(parent) => self.find(parent, name, filter),
            None => Ok(None),
        }
    }

    fn struct_shape(&self, name: &str) -> Result<&'a StructShape, ResolveError> {
        self.shapes
            .struct_shape(name)
            .ok_or_else(|| ResolveError::Shape(format!("Unknown struct shape '{name}'")))
    }

    fn open_section(
        &self,
        enclosing: &Rc<Scope>,
        found: Found,
        names: &mut NameEnv,
    ) -> Result<(Vec<Guard>, Rc<Scope>), ResolveError> {
        match found.shape.clone() {
            Shape::Bool => Ok((
                vec![Guard::Truthy(found.expr.clone())],
                Scope::child(enclosing, ScopeKind::Guard(found)),
            )),
            Shape::Optional(inner) => {
                let present = Guard::Present(found.expr.clone());
                let (mut guards, scope) =
                    self.open_section(enclosing, Found::new(found.expr, *inner), names)?;
                if guards.first() != Some(&present) {
                    guards.insert(0, present);
                }
                Ok((guards, scope))
            }
            Shape::Sequence(element) => {
                let element_var = names.introduce("element");
                let index = names.introduce("index");
                let each = Guard::Each {
                    items: found.expr,
                    element: element_var.clone(),
                    index: index.clone(),
                };
                let iteration = Scope::child(enclosing, ScopeKind::Iteration { index });
                let (mut guards, scope) =
                    open_element(&iteration, Found::new(Expr::Var(element_var), *element));
                guards.insert(0, each);
                Ok((guards, scope))
            }
            Shape::Dynamic => {
                let element_var = names.introduce("element");
                let index = names.introduce("index");
                let each = Guard::EachNode {
                    node: found.expr,
                    element: element_var.clone(),
                    index: index.clone(),
                };
                let iteration = Scope::child(enclosing, ScopeKind::Iteration { index });
                let element = Found::new(Expr::Var(element_var), Shape::Dynamic);
                Ok((vec![each], Scope::child(&iteration, ScopeKind::Value(element))))
            }
            Shape::Struct(name) => {
                self.struct_shape(&name)?;
                Ok((
                    vec![Guard::Present(found.expr.clone())],
                    Scope::child(enclosing, ScopeKind::Value(found)),
                ))
            }
            Shape::Mapping(_) | Shape::Text | Shape::Number | Shape::Enum(_) => Ok((
                vec![Guard::Present(found.expr.clone())],
                Scope::child(enclosing, ScopeKind::Value(found)),
            )),
        }
    }

    fn inverted_guard(&self, found: &Found, names: &mut NameEnv) -> Guard {
        match &found.shape {
            Shape::Optional(inner) => {
                self.inverted_guard(&Found::new(found.expr.clone(), (**inner).clone()), names)
            }
            Shape::Bool => Guard::Truthy(found.expr.clone()),
            Shape::Sequence(_) => Guard::Each {
                items: found.expr.clone(),
                element: names.introduce("element"),
                index: names.introduce("index"),
            },
            Shape::Dynamic => Guard::EachNode {
                node: found.expr.clone(),
                element: names.introduce("element"),
                index: names.introduce("index"),
            },
            Shape::Struct(_) | Shape::Mapping(_) | Shape::Text | Shape::Number | Shape::Enum(_) => {
                Guard::Present(found.expr.clone())
            }
        }
    }
}

/// Scope of one sequence element. Boolean and optional elements only render
/// when true or present.
fn open_element(iteration: &Rc<Scope>, element: Found) -> (Vec<Guard>, Rc<Scope>) {
    match element.shape.clone() {
        Shape::Bool => (
            vec![Guard::Truthy(element.expr.clone())],
            Scope::child(iteration, ScopeKind::Guard(element)),
        ),
        Shape::Optional(inner) => {
            let present = Guard::Present(element.expr.clone());
            let (mut guards, scope) = open_element(iteration, Found::new(element.expr, *inner));
            if guards.first() != Some(&present) {
                guards.insert(0, present);
            }
            (guards, scope)
        }
        _ => (Vec::new(), Scope::child(iteration, ScopeKind::Value(element))),
    }
}

fn loop_binding(index: &str, name: &str) -> Option<Found> {
    let (expr, shape) = match name {
        "@first" | "-first" => (Expr::First(index.to_string()), Shape::Bool),
        "@last" | "-last" => (Expr::Last(index.to_string()), Shape::Bool),
        "@index" => (
            Expr::Index {
                var: index.to_string(),
                one_based: false,
            },
            Shape::Number,
        ),
        "-index" => (
            Expr::Index {
                var: index.to_string(),
                one_based: true,
            },
            Shape::Number,
        ),
        _ => return None,
    };
    Some(Found::new(expr, shape))
}

fn not_found(name: &str, scope: &Scope) -> ResolveError {
    ResolveError::NotFound {
        name: name.to_string(),
        scopes: scope.describe(),
    }
}
