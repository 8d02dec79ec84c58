//! Recorded instruction trees.
//!
//! [`Program`] is an [`InstructionSink`] that keeps what the compiler emits
//! as a nested tree, ready for the interpreter. Adjacent literals are merged.

use std::fmt;

use stache_compiler::{
    CompileError, CompileOptions, Escaping, Expr, Guard, InstructionSink, LambdaCall, LambdaKind,
    NamedTemplate, ShapeProvider, SubCompile, TemplateLoader,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Literal(String),
    Value {
        expr: Expr,
        escaping: Escaping,
    },
    Section {
        guard: Guard,
        body: Vec<Instruction>,
    },
    Inverted {
        guard: Guard,
        body: Vec<Instruction>,
    },
    Partial {
        name: String,
        body: Vec<Instruction>,
    },
    Block {
        name: String,
        body: Vec<Instruction>,
    },
    /// `body` is the compiled template of a model lambda; raw lambdas have none.
    Lambda {
        call: LambdaCall,
        body: Option<Vec<Instruction>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Opening {
    Section(Guard),
    Inverted(Guard),
    Partial(String),
    Block(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    name: String,
    instructions: Vec<Instruction>,
    open: Vec<(Opening, Vec<Instruction>)>,
}

impl Program {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Compile `template` into a fresh program.
    pub fn compile(
        template: &NamedTemplate,
        shapes: &dyn ShapeProvider,
        loader: &dyn TemplateLoader,
        options: &CompileOptions,
    ) -> Result<Self, CompileError> {
        let mut program = Program::new(&template.name);
        stache_compiler::compile(template, shapes, loader, options, &mut program)?;
        Ok(program)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    fn current(&mut self) -> &mut Vec<Instruction> {
        match self.open.last_mut() {
            Some((_, body)) => body,
            None => &mut self.instructions,
        }
    }

    fn push(&mut self, instruction: Instruction) {
        self.current().push(instruction);
    }

    fn open(&mut self, opening: Opening) {
        self.open.push((opening, Vec::new()));
    }

    fn close(&mut self) {
        let Some((opening, body)) = self.open.pop() else {
            return;
        };
        let instruction = match opening {
            Opening::Section(guard) => Instruction::Section { guard, body },
            Opening::Inverted(guard) => Instruction::Inverted { guard, body },
            Opening::Partial(name) => Instruction::Partial { name, body },
            Opening::Block(name) => Instruction::Block { name, body },
        };
        self.push(instruction);
    }
}

impl InstructionSink for Program {
    fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let current = self.current();
        match current.last_mut() {
            Some(Instruction::Literal(previous)) => previous.push_str(text),
            _ => current.push(Instruction::Literal(text.to_string())),
        }
    }

    fn emit_value(&mut self, expr: &Expr, escaping: Escaping) {
        self.push(Instruction::Value {
            expr: expr.clone(),
            escaping,
        });
    }

    fn enter_section(&mut self, guard: &Guard) {
        self.open(Opening::Section(guard.clone()));
    }

    fn exit_section(&mut self) {
        self.close();
    }

    fn enter_inverted(&mut self, guard: &Guard) {
        self.open(Opening::Inverted(guard.clone()));
    }

    fn exit_inverted(&mut self) {
        self.close();
    }

    fn invoke_partial(&mut self, name: &str) {
        self.open(Opening::Partial(name.to_string()));
    }

    fn exit_partial(&mut self) {
        self.close();
    }

    fn invoke_lambda(
        &mut self,
        call: &LambdaCall,
        compile: &mut SubCompile<'_>,
    ) -> Result<(), CompileError> {
        let body = match call.kind {
            LambdaKind::Raw => None,
            LambdaKind::Model { .. } => {
                let mut nested = Program::new(&call.name);
                compile(&mut nested)?;
                Some(nested.instructions)
            }
        };
        self.push(Instruction::Lambda {
            call: call.clone(),
            body,
        });
        Ok(())
    }

    fn enter_block(&mut self, name: &str) {
        self.open(Opening::Block(name.to_string()));
    }

    fn exit_block(&mut self) {
        self.close();
    }
}

/// Indented listing, one instruction per line.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_listing(f, &self.instructions, 0)
    }
}

fn write_listing(f: &mut fmt::Formatter<'_>, instructions: &[Instruction], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for instruction in instructions {
        match instruction {
            Instruction::Literal(text) => writeln!(f, "{pad}text {text:?}")?,
            Instruction::Value { expr, escaping } => match escaping {
                Escaping::Escaped => writeln!(f, "{pad}value {expr}")?,
                Escaping::Raw => writeln!(f, "{pad}raw {expr}")?,
            },
            Instruction::Section { guard, body } => {
                writeln!(f, "{pad}section {guard}")?;
                write_listing(f, body, depth + 1)?;
            }
            Instruction::Inverted { guard, body } => {
                writeln!(f, "{pad}inverted {guard}")?;
                write_listing(f, body, depth + 1)?;
            }
            Instruction::Partial { name, body } => {
                writeln!(f, "{pad}partial {name}")?;
                write_listing(f, body, depth + 1)?;
            }
            Instruction::Block { name, body } => {
                writeln!(f, "{pad}block {name}")?;
                write_listing(f, body, depth + 1)?;
            }
            Instruction::Lambda { call, body } => {
                writeln!(f, "{pad}lambda {} on {} {:?}", call.name, call.current, call.body)?;
                if let Some(body) = body {
                    write_listing(f, body, depth + 1)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stache_compiler::{LambdaShape, MapLoader, Schema, Shape, StructShape};

    fn page_schema() -> Schema {
        Schema::new(Shape::structure("Page"))
            .with_struct(
                "Page",
                StructShape::default()
                    .field("title", Shape::Text)
                    .field("items", Shape::sequence(Shape::Text))
                    .lambda("bold", LambdaShape::raw())
                    .lambda(
                        "card",
                        LambdaShape {
                            template: Some("[{{name}}]".into()),
                            ..LambdaShape::model(Shape::structure("Card"))
                        },
                    ),
            )
            .with_struct("Card", StructShape::default().field("name", Shape::Text))
    }

    fn compile(source: &str, loader: &MapLoader) -> Program {
        Program::compile(
            &NamedTemplate::inline("page", source),
            &page_schema(),
            loader,
            &CompileOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_literals_merge() {
        let program = compile("a{{! note }}b\nc", &MapLoader::new());
        assert_eq!(
            program.instructions(),
            &[Instruction::Literal("ab\nc".into())]
        );
    }

    #[test]
    fn test_nested_tree() {
        let program = compile("{{#items}}<{{.}}>{{/items}}", &MapLoader::new());
        let [Instruction::Section { guard, body }] = program.instructions() else {
            panic!("expected one section, got {:?}", program.instructions());
        };
        assert!(matches!(guard, Guard::Each { .. }));
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], Instruction::Literal("<".into()));
        assert!(matches!(body[1], Instruction::Value { escaping: Escaping::Escaped, .. }));
    }

    #[test]
    fn test_partial_wraps_body() {
        let loader = MapLoader::new().with("footer", "bye");
        let program = compile("{{>footer}}", &loader);
        assert_eq!(
            program.instructions(),
            &[Instruction::Partial {
                name: "footer".into(),
                body: vec![Instruction::Literal("bye".into())],
            }]
        );
    }

    #[test]
    fn test_raw_lambda_has_no_body() {
        let program = compile("{{#bold}}hi {{title}}{{/bold}}", &MapLoader::new());
        let [Instruction::Lambda { call, body }] = program.instructions() else {
            panic!("expected a lambda");
        };
        assert_eq!(call.body, "hi {{title}}");
        assert_eq!(body, &None);
    }

    #[test]
    fn test_model_lambda_compiles_template() {
        let program = compile("{{#card}}ignored{{/card}}", &MapLoader::new());
        let [Instruction::Lambda { body: Some(body), .. }] = program.instructions() else {
            panic!("expected a compiled model lambda");
        };
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], Instruction::Literal("[".into()));
    }

    #[test]
    fn test_listing() {
        let program = compile("T{{#items}}{{{.}}}{{/items}}", &MapLoader::new());
        let listing = program.to_string();
        assert!(listing.starts_with("text \"T\"\nsection for ("));
        assert!(listing.contains("\n  raw "));
    }
}
