//! Static data shapes.
//!
//! A [`Shape`] describes the category of a value the template will be
//! rendered against. Structs and enums are referenced by name and looked up
//! through a [`ShapeProvider`]; [`Schema`] is the provider used by hosts and
//! can be read from JSON:
//!
//! ```json
//! {
//!   "root": { "struct": "Page" },
//!   "structs": {
//!     "Page": {
//!       "fields": { "title": "text", "items": { "sequence": "text" } },
//!       "lambdas": { "bold": { "returns": "raw" } }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Bool,
    Text,
    Number,
    /// Loose JSON-like tree, resolved at render time through a context node.
    Dynamic,
    Optional(Box<Shape>),
    Sequence(Box<Shape>),
    /// String-keyed mapping with values of one shape.
    Mapping(Box<Shape>),
    Struct(String),
    Enum(String),
}

impl Shape {
    pub fn optional(inner: Shape) -> Self {
        Shape::Optional(Box::new(inner))
    }

    pub fn sequence(element: Shape) -> Self {
        Shape::Sequence(Box::new(element))
    }

    pub fn mapping(value: Shape) -> Self {
        Shape::Mapping(Box::new(value))
    }

    pub fn structure(name: &str) -> Self {
        Shape::Struct(name.to_string())
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Shape::Bool)
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Shape::Mapping(_))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Shape::Dynamic)
    }

    /// Mapping and dynamic scopes defer to their parents during upward search.
    pub fn is_mapping_like(&self) -> bool {
        self.is_mapping() || self.is_dynamic()
    }

    /// Whether a value of this shape can be written out by a variable tag.
    pub fn is_renderable(&self) -> bool {
        match self {
            Shape::Bool | Shape::Text | Shape::Number | Shape::Dynamic | Shape::Enum(_) => true,
            Shape::Optional(inner) => inner.is_renderable(),
            Shape::Sequence(_) | Shape::Mapping(_) | Shape::Struct(_) => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Bool => write!(f, "bool"),
            Shape::Text => write!(f, "text"),
            Shape::Number => write!(f, "number"),
            Shape::Dynamic => write!(f, "dynamic"),
            Shape::Optional(inner) => write!(f, "optional<{inner}>"),
            Shape::Sequence(element) => write!(f, "sequence<{element}>"),
            Shape::Mapping(value) => write!(f, "mapping<{value}>"),
            Shape::Struct(name) => write!(f, "struct {name}"),
            Shape::Enum(name) => write!(f, "enum {name}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructShape {
    #[serde(default)]
    pub fields: BTreeMap<String, Shape>,
    #[serde(default)]
    pub lambdas: BTreeMap<String, LambdaShape>,
}

impl StructShape {
    pub fn field(mut self, name: &str, shape: Shape) -> Self {
        self.fields.insert(name.to_string(), shape);
        self
    }

    pub fn lambda(mut self, name: &str, lambda: LambdaShape) -> Self {
        self.lambdas.insert(name.to_string(), lambda);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumShape {
    pub variants: Vec<String>,
}

/// What a lambda hands back to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaReturn {
    /// Finished text, written out as-is or escaped.
    #[default]
    Raw,
    /// A value that is rendered through the lambda's template or its body.
    Model(Shape),
}

/// A lambda bound to a section name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaShape {
    #[serde(default)]
    pub returns: LambdaReturn,
    #[serde(default)]
    pub escaped: bool,
    /// Inline template used for model results instead of the section body.
    #[serde(default)]
    pub template: Option<String>,
    /// Name of a template to load for model results.
    #[serde(default)]
    pub path: Option<String>,
}

impl LambdaShape {
    pub fn raw() -> Self {
        Self::default()
    }

    pub fn model(shape: Shape) -> Self {
        Self {
            returns: LambdaReturn::Model(shape),
            ..Self::default()
        }
    }
}

/// Supplies the named shapes a template refers to.
pub trait ShapeProvider {
    /// Shape of the value the top-level template is rendered against.
    fn root(&self) -> &Shape;

    fn struct_shape(&self, name: &str) -> Option<&StructShape>;

    fn enum_shape(&self, name: &str) -> Option<&EnumShape>;

    /// Lambdas bound by the root value. Empty unless the root is a struct.
    fn lambdas(&self) -> BTreeMap<String, LambdaShape> {
        match self.root() {
            Shape::Struct(name) => self
                .struct_shape(name)
                .map(|s| s.lambdas.clone())
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub root: Shape,
    #[serde(default)]
    pub structs: BTreeMap<String, StructShape>,
    #[serde(default)]
    pub enums: BTreeMap<String, EnumShape>,
}

impl Schema {
    pub fn new(root: Shape) -> Self {
        Self {
            root,
            structs: BTreeMap::new(),
            enums: BTreeMap::new(),
        }
    }

    /// Schema for data known only at render time.
    pub fn dynamic() -> Self {
        Self::new(Shape::Dynamic)
    }

    pub fn with_struct(mut self, name: &str, shape: StructShape) -> Self {
        self.structs.insert(name.to_string(), shape);
        self
    }

    pub fn with_enum(mut self, name: &str, variants: &[&str]) -> Self {
        let variants = variants.iter().map(|v| v.to_string()).collect();
        self.enums.insert(name.to_string(), EnumShape { variants });
        self
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::dynamic()
    }
}

impl ShapeProvider for Schema {
    fn root(&self) -> &Shape {
        &self.root
    }

    fn struct_shape(&self, name: &str) -> Option<&StructShape> {
        self.structs.get(name)
    }

    fn enum_shape(&self, name: &str) -> Option<&EnumShape> {
        self.enums.get(name)
    }
}
