//! Stache Compiler
//!
//! Compiles a template against a statically known data shape into an ordered
//! series of render instructions. Standalone tag lines are normalized,
//! names are resolved through the scope chain, and partials, parents and
//! lambdas are composed inline.
//!
//! ```text
//! NamedTemplate + ShapeProvider → compile() → InstructionSink calls
//! ```
//!
//! The sink decides what the instructions become; `stache-render` records
//! them into an executable program.

pub mod blocks;
mod composer;
pub mod error;
pub mod fragment;
pub mod instruction;
pub mod loader;
pub mod names;
pub mod options;
mod record;
pub mod scope;
pub mod shape;
pub mod stack;
pub mod standalone;

pub use error::{CompileError, LoadError, StructuralError};
pub use instruction::{
    Escaping, Expr, Guard, InstructionSink, LambdaCall, LambdaKind, SubCompile,
};
pub use loader::{DirLoader, MapLoader, NamedTemplate, TemplateLoader, TemplateOrigin};
pub use options::CompileOptions;
pub use shape::{
    EnumShape, LambdaReturn, LambdaShape, Schema, Shape, ShapeProvider, StructShape,
};
pub use stack::{FrameKind, TemplateFrame};

use composer::{CompileEnv, Compiler, Unit};
use record::Recording;
use stache_lexer::Position;

/// Compile one top-level template into `sink`.
///
/// The template is read through its origin; partials and parents it names
/// are resolved through `loader`. Instructions are buffered and reach `sink`
/// only once the whole template compiled; on error the sink sees no calls.
/// A lambda callback the sink runs can still fail from inside its own
/// `invoke_lambda`.
#[tracing::instrument(level = "debug", skip_all, fields(template = %template.name))]
pub fn compile(
    template: &NamedTemplate,
    shapes: &dyn ShapeProvider,
    loader: &dyn TemplateLoader,
    options: &CompileOptions,
    sink: &mut dyn InstructionSink,
) -> Result<(), CompileError> {
    let source = template.read().map_err(|error| CompileError::Loader {
        name: template.name.clone(),
        error,
        position: Position::unknown(),
        templates: template.name.clone(),
    })?;

    let env = CompileEnv::new(shapes, loader, options);
    let unit = Unit::root(&template.name, shapes.root());
    let mut recording = Recording::default();
    Compiler::new(&env, &mut recording, unit).run(&source, None)?;
    recording.replay(sink)
}

/// Convenience wrapper for an inline template.
pub fn compile_str(
    name: &str,
    source: &str,
    shapes: &dyn ShapeProvider,
    loader: &dyn TemplateLoader,
    options: &CompileOptions,
    sink: &mut dyn InstructionSink,
) -> Result<(), CompileError> {
    compile(&NamedTemplate::inline(name, source), shapes, loader, options, sink)
}
