//! Template composition.
//!
//! A [`Compiler`] drives one template body through the scanner, the block
//! substitution filter (parent templates only) and the normalizer, and turns
//! the classified tokens into [`InstructionSink`] calls. Partials, parents and
//! lambda bodies are compiled by nested compilers sharing one [`CompileEnv`].

use std::collections::BTreeMap;
use std::rc::Rc;

use stache_lexer::{Position, Scanner, TagKind, Token, TokenKind};

use crate::blocks::{BlockCollector, BlockScope, Substitution};
use crate::error::{CompileError, LoadError, StructuralError};
use crate::fragment;
use crate::instruction::{Escaping, Expr, InstructionSink, LambdaCall, LambdaKind};
use crate::loader::TemplateLoader;
use crate::names::NameEnv;
use crate::options::CompileOptions;
use crate::scope::{Found, Purpose, Resolution, Resolver, Scope, ScopeKind};
use crate::shape::{LambdaReturn, LambdaShape, Shape, ShapeProvider};
use crate::stack::{FrameKind, TemplateFrame};
use crate::standalone::{Classified, Group, Normalizer, ProcessHint};

/// Read-only collaborators shared by every nested compile.
pub(crate) struct CompileEnv<'a> {
    shapes: &'a dyn ShapeProvider,
    loader: &'a dyn TemplateLoader,
    options: &'a CompileOptions,
    lambdas: BTreeMap<String, LambdaShape>,
}

impl<'a> CompileEnv<'a> {
    pub(crate) fn new(
        shapes: &'a dyn ShapeProvider,
        loader: &'a dyn TemplateLoader,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            shapes,
            loader,
            options,
            lambdas: shapes.lambdas(),
        }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.shapes, &self.lambdas)
    }
}

/// Where one template body is compiled and what it inherits from its caller.
pub(crate) struct Unit {
    frame: Rc<TemplateFrame>,
    scope: Rc<Scope>,
    names: NameEnv,
    indent: String,
    blocks: Option<Rc<BlockScope>>,
    at_line_start: bool,
}

impl Unit {
    pub(crate) fn root(name: &str, shape: &Shape) -> Self {
        Self {
            frame: TemplateFrame::root(name),
            scope: Scope::root(shape),
            names: NameEnv::root(),
            indent: String::new(),
            blocks: None,
            at_line_start: true,
        }
    }
}

/// An open section, inverted section or block.
struct Open {
    tag: TagKind,
    name: String,
    position: Position,
    /// Number of `enter_section` calls to undo.
    guards: usize,
    /// Scope and names to restore on close.
    scope: Rc<Scope>,
    names: NameEnv,
}

struct ParentCall {
    collector: BlockCollector,
    indent: String,
    scope: Rc<Scope>,
}

struct LambdaCapture {
    name: String,
    position: Position,
    shape: LambdaShape,
    body: String,
    depth: usize,
    /// Still inside the group holding the opening tag.
    opening: bool,
}

enum Mode {
    Normal,
    Parent(ParentCall),
    Lambda(LambdaCapture),
}

pub(crate) struct Compiler<'e, 's> {
    env: &'e CompileEnv<'e>,
    sink: &'s mut dyn InstructionSink,
    frame: Rc<TemplateFrame>,
    scope: Rc<Scope>,
    names: NameEnv,
    indent: String,
    blocks: Option<Rc<BlockScope>>,
    /// Nothing has been written on the current output line yet.
    at_line_start: bool,
    pending_indent: Option<String>,
    stack: Vec<Open>,
    mode: Mode,
}

impl<'e, 's> Compiler<'e, 's> {
    pub(crate) fn new(env: &'e CompileEnv<'e>, sink: &'s mut dyn InstructionSink, unit: Unit) -> Self {
        Self {
            env,
            sink,
            frame: unit.frame,
            scope: unit.scope,
            names: unit.names,
            indent: unit.indent,
            blocks: unit.blocks,
            at_line_start: unit.at_line_start,
            pending_indent: None,
            stack: Vec::new(),
            mode: Mode::Normal,
        }
    }

    /// Compile `source` into the sink. Returns whether output ended at the
    /// start of a line.
    pub(crate) fn run(
        mut self,
        source: &str,
        mut substitution: Option<Substitution>,
    ) -> Result<bool, CompileError> {
        let tokens = Scanner::tokenize(&self.frame.name, source).map_err(|error| {
            CompileError::Lexer {
                template: self.frame.name.clone(),
                error,
            }
        })?;

        let mut normalizer = Normalizer::new();
        for token in tokens {
            let filtered = match substitution.as_mut() {
                Some(substitution) => substitution.filter(token),
                None => vec![token],
            };
            for token in filtered {
                for group in normalizer.push(token) {
                    self.process_group(group)?;
                }
            }
        }

        self.finish()?;
        Ok(self.at_line_start)
    }

    fn process_group(&mut self, group: Group) -> Result<(), CompileError> {
        let closes_lambda = match &self.mode {
            Mode::Lambda(capture) => {
                capture.depth == 0
                    && group.iter().all(|c| {
                        c.hint != ProcessHint::Normal || c.token.is_end_of(&capture.name)
                    })
            }
            _ => false,
        };
        // a lone close tag is its own group too
        let standalone = closes_lambda && group.len() > 1;

        for classified in group {
            match self.mode {
                Mode::Normal => self.process(classified)?,
                Mode::Parent(_) => self.collect(classified.token)?,
                Mode::Lambda(_) => self.capture(classified, closes_lambda, standalone)?,
            }
        }

        if let Mode::Lambda(capture) = &mut self.mode {
            capture.opening = false;
        }
        Ok(())
    }

    fn process(&mut self, classified: Classified) -> Result<(), CompileError> {
        let Classified { token, hint } = classified;
        match hint {
            ProcessHint::Ignore => {
                if token.is_newline() {
                    self.at_line_start = true;
                }
                return Ok(());
            }
            ProcessHint::Indent => {
                if let TokenKind::Whitespace(text) = token.kind {
                    self.pending_indent = Some(text);
                }
                return Ok(());
            }
            ProcessHint::Eof => return Ok(()),
            ProcessHint::Normal => {}
        }

        let Token { kind, position, .. } = token;
        match kind {
            TokenKind::Text(text) | TokenKind::Whitespace(text) => self.write(&text),
            TokenKind::Special(special) => self.write(special.as_str()),
            TokenKind::Newline(newline) => {
                self.sink.literal(newline.as_str());
                self.at_line_start = true;
            }
            TokenKind::Comment(_) | TokenKind::DelimiterChange { .. } | TokenKind::Eof => {}
            TokenKind::Tag { kind, name } => self.tag(kind, &name, position)?,
        }
        Ok(())
    }

    fn write_indent(&mut self) {
        if self.at_line_start && !self.indent.is_empty() {
            self.sink.literal(&self.indent);
        }
        self.at_line_start = false;
    }

    fn write(&mut self, text: &str) {
        self.write_indent();
        self.sink.literal(text);
    }

    fn tag(&mut self, kind: TagKind, name: &str, position: Position) -> Result<(), CompileError> {
        let indent = self
            .pending_indent
            .take()
            .filter(|_| kind.is_indented())
            .unwrap_or_default();
        match kind {
            TagKind::Variable | TagKind::UnescapedVariable => {
                let (purpose, escaping) = if kind == TagKind::Variable {
                    (Purpose::Variable, Escaping::Escaped)
                } else {
                    (Purpose::UnescapedVariable, Escaping::Raw)
                };
                if let Resolution::Value(found) = self.resolve(name, purpose, &position)? {
                    self.write_indent();
                    self.sink.emit_value(&found.expr, escaping);
                }
            }
            TagKind::BeginSection => match self.resolve(name, Purpose::Section, &position)? {
                Resolution::Section { guards, scope } => {
                    for guard in &guards {
                        self.sink.enter_section(guard);
                    }
                    self.open(kind, name, position, guards.len(), scope);
                }
                Resolution::Lambda(shape) => {
                    tracing::debug!(lambda = name, "capturing lambda body");
                    self.mode = Mode::Lambda(LambdaCapture {
                        name: name.to_string(),
                        position,
                        shape,
                        body: String::new(),
                        depth: 0,
                        opening: true,
                    });
                }
                _ => {}
            },
            TagKind::BeginInverted => {
                if let Resolution::Inverted { guard, scope } =
                    self.resolve(name, Purpose::Inverted, &position)?
                {
                    self.sink.enter_inverted(&guard);
                    self.open(kind, name, position, 1, scope);
                }
            }
            TagKind::EndSection => self.close(name, position)?,
            TagKind::Partial => {
                if let Resolution::Enclosing(scope) = self.resolve(name, Purpose::Partial, &position)? {
                    self.include(FrameKind::Partial, name, &position, &indent, scope, None)?;
                }
            }
            TagKind::BeginParent => {
                if let Resolution::Enclosing(scope) = self.resolve(name, Purpose::Parent, &position)? {
                    tracing::debug!(parent = name, "collecting blocks");
                    self.mode = Mode::Parent(ParentCall {
                        collector: BlockCollector::begin(name, position),
                        indent,
                        scope,
                    });
                }
            }
            TagKind::BeginBlock => {
                if let Resolution::Enclosing(scope) = self.resolve(name, Purpose::Block, &position)? {
                    self.sink.enter_block(name);
                    self.open(kind, name, position, 0, scope);
                }
            }
        }
        Ok(())
    }

    fn resolve(&mut self, name: &str, purpose: Purpose, position: &Position) -> Result<Resolution, CompileError> {
        self.env
            .resolver()
            .resolve(&self.scope, name, purpose, &mut self.names)
            .map_err(|error| CompileError::from_resolve(error, position.clone(), self.frame.describe()))
    }

    fn open(&mut self, tag: TagKind, name: &str, position: Position, guards: usize, scope: Rc<Scope>) {
        let names = self.names.child();
        self.stack.push(Open {
            tag,
            name: name.to_string(),
            position,
            guards,
            scope: std::mem::replace(&mut self.scope, scope),
            names: std::mem::replace(&mut self.names, names),
        });
    }

    fn close(&mut self, name: &str, position: Position) -> Result<(), CompileError> {
        let Some(open) = self.stack.pop() else {
            return Err(self.structural(StructuralError::UnexpectedClose(name.to_string()), position));
        };
        if open.name != name {
            let error = StructuralError::MismatchedClose {
                expected: open.name.clone(),
                found: name.to_string(),
            };
            self.stack.push(open);
            return Err(self.structural(error, position));
        }

        match open.tag {
            TagKind::BeginInverted => self.sink.exit_inverted(),
            TagKind::BeginBlock => self.sink.exit_block(),
            _ => {
                for _ in 0..open.guards {
                    self.sink.exit_section();
                }
            }
        }
        self.scope = open.scope;
        self.names = open.names;
        Ok(())
    }

    fn include(
        &mut self,
        kind: FrameKind,
        name: &str,
        position: &Position,
        indent: &str,
        scope: Rc<Scope>,
        blocks: Option<Rc<BlockScope>>,
    ) -> Result<(), CompileError> {
        let templates = self.frame.describe();
        let max_depth = self.env.options.max_include_depth;
        if self.frame.depth() > max_depth {
            return Err(CompileError::IncludeDepth {
                name: name.to_string(),
                depth: max_depth,
                position: position.clone(),
                templates,
            });
        }

        let (template, source) = load_source(self.env, name, &self.frame, position)?;

        // Parent calls may recur through their overrides; the depth limit bounds them.
        if kind != FrameKind::Parent && self.frame.includes(&template) {
            return Err(CompileError::RecursiveInclude {
                name: template,
                position: position.clone(),
                templates,
            });
        }

        tracing::debug!(%kind, %template, "including template");
        let unit = Unit {
            frame: self.frame.enter(kind, &template),
            scope,
            names: self.names.child(),
            indent: format!("{}{indent}", self.indent),
            blocks: blocks.clone(),
            at_line_start: self.at_line_start,
        };

        self.sink.invoke_partial(name);
        self.at_line_start =
            Compiler::new(self.env, &mut *self.sink, unit).run(&source, blocks.map(Substitution::new))?;
        self.sink.exit_partial();
        Ok(())
    }

    /// Caller side of a parent call: every token goes to the collector.
    fn collect(&mut self, token: Token) -> Result<(), CompileError> {
        let Mode::Parent(call) = &mut self.mode else {
            return Ok(());
        };
        let position = token.position.clone();
        match call.collector.push(token) {
            Ok(false) => Ok(()),
            Ok(true) => self.finish_parent(),
            Err(error) => Err(self.structural(error, position)),
        }
    }

    fn finish_parent(&mut self) -> Result<(), CompileError> {
        let Mode::Parent(call) = std::mem::replace(&mut self.mode, Mode::Normal) else {
            return Ok(());
        };
        let ParentCall {
            collector,
            indent,
            scope,
        } = call;
        let name = collector.parent().to_string();
        let position = collector.position().clone();
        let blocks = Rc::new(BlockScope::new(collector.into_blocks(), self.blocks.clone()));
        self.include(FrameKind::Parent, &name, &position, &indent, scope, Some(blocks))
    }

    /// Lambda body: raw text up to the matching close tag.
    fn capture(
        &mut self,
        classified: Classified,
        closes_lambda: bool,
        standalone: bool,
    ) -> Result<(), CompileError> {
        let Mode::Lambda(capture) = &mut self.mode else {
            return Ok(());
        };
        let Classified { token, hint } = classified;
        if capture.opening && hint == ProcessHint::Ignore {
            return Ok(());
        }

        match token.tag() {
            Some((kind, _)) if kind.opens_section() => {
                capture.depth += 1;
                capture.body.push_str(&token.raw);
            }
            Some((TagKind::EndSection, name)) if capture.depth == 0 => {
                if name != capture.name {
                    let error = StructuralError::MismatchedClose {
                        expected: capture.name.clone(),
                        found: name.to_string(),
                    };
                    return Err(self.structural(error, token.position.clone()));
                }
                return self.finish_lambda(standalone);
            }
            Some((TagKind::EndSection, _)) => {
                capture.depth -= 1;
                capture.body.push_str(&token.raw);
            }
            _ if token.is_eof() => {
                let error = StructuralError::Unclosed(capture.name.clone());
                return Err(self.structural(error, token.position.clone()));
            }
            _ if !closes_lambda => capture.body.push_str(&token.raw),
            _ => {}
        }
        Ok(())
    }

    /// `standalone` when the closing tag sits alone on its line.
    fn finish_lambda(&mut self, standalone: bool) -> Result<(), CompileError> {
        let Mode::Lambda(capture) = std::mem::replace(&mut self.mode, Mode::Normal) else {
            return Ok(());
        };
        let LambdaCapture {
            name,
            position,
            shape,
            body,
            ..
        } = capture;

        let max_depth = self.env.options.max_include_depth;
        if self.frame.depth() > max_depth {
            return Err(CompileError::IncludeDepth {
                name,
                depth: max_depth,
                position,
                templates: self.frame.describe(),
            });
        }

        let current = self
            .scope
            .current()
            .map(|found| found.expr)
            .unwrap_or_else(|| Expr::var("data"));
        let mut names = self.names.child();
        let (kind, scope) = match &shape.returns {
            LambdaReturn::Raw => (LambdaKind::Raw, self.scope.clone()),
            LambdaReturn::Model(model) => {
                let var = names.introduce("model");
                let found = Found::new(Expr::Var(var.clone()), model.clone());
                let scope = Scope::child(&self.scope, ScopeKind::Value(found));
                (LambdaKind::Model { var }, scope)
            }
        };
        let indent = if standalone && self.at_line_start {
            self.indent.clone()
        } else {
            self.write_indent();
            String::new()
        };
        let call = LambdaCall {
            name: name.clone(),
            body,
            current,
            escaping: if shape.escaped {
                Escaping::Escaped
            } else {
                Escaping::Raw
            },
            kind,
            indent,
        };

        let env = self.env;
        let frame = self.frame.enter(FrameKind::Lambda, &name);
        let mut compile = |sink: &mut dyn InstructionSink| -> Result<(), CompileError> {
            let source = lambda_source(env, &shape, &call.body, &frame, &position)?;
            let unit = Unit {
                frame: frame.clone(),
                scope: scope.clone(),
                names: names.clone(),
                indent: String::new(),
                blocks: None,
                at_line_start: true,
            };
            Compiler::new(env, sink, unit).run(&source, None).map(|_| ())
        };

        tracing::debug!(lambda = %name, "invoking lambda");
        self.sink.invoke_lambda(&call, &mut compile)
    }

    fn finish(&self) -> Result<(), CompileError> {
        match &self.mode {
            Mode::Lambda(capture) => {
                let error = StructuralError::Unclosed(capture.name.clone());
                return Err(self.structural(error, capture.position.clone()));
            }
            Mode::Parent(call) => {
                let error = StructuralError::Unclosed(call.collector.parent().to_string());
                return Err(self.structural(error, call.collector.position().clone()));
            }
            Mode::Normal => {}
        }
        match self.stack.last() {
            Some(open) => Err(self.structural(
                StructuralError::Unclosed(open.name.clone()),
                open.position.clone(),
            )),
            None => Ok(()),
        }
    }

    fn structural(&self, error: StructuralError, position: Position) -> CompileError {
        CompileError::Structural {
            error,
            position,
            open: self.open_constructs(),
            templates: self.frame.describe(),
        }
    }

    /// Outermost first, e.g. `#items`, `^empty`, `<layout`.
    fn open_constructs(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .stack
            .iter()
            .map(|open| format!("{}{}", open.tag.sigil(), open.name))
            .collect();
        match &self.mode {
            Mode::Parent(call) => open.push(format!("<{}", call.collector.parent())),
            Mode::Lambda(capture) => open.push(format!("#{}", capture.name)),
            Mode::Normal => {}
        }
        open
    }
}

/// Text a lambda's callback compiles: the declared template of a model
/// lambda, or else the section body.
fn lambda_source(
    env: &CompileEnv<'_>,
    shape: &LambdaShape,
    body: &str,
    frame: &TemplateFrame,
    position: &Position,
) -> Result<String, CompileError> {
    if !matches!(shape.returns, LambdaReturn::Model(_)) {
        return Ok(body.to_string());
    }
    match (&shape.template, &shape.path) {
        (Some(template), _) => Ok(template.clone()),
        (None, Some(path)) => load_source(env, path, frame, position).map(|(_, source)| source),
        (None, None) => Ok(body.to_string()),
    }
}

/// Load an included template by loader name. A `page#item` name compiles
/// only the `item` fragment of `page`. Returns the frame name and source.
fn load_source(
    env: &CompileEnv<'_>,
    name: &str,
    frame: &TemplateFrame,
    position: &Position,
) -> Result<(String, String), CompileError> {
    let loader_error = |error: LoadError| CompileError::Loader {
        name: name.to_string(),
        error,
        position: position.clone(),
        templates: frame.describe(),
    };

    let (path, fragment) = fragment::split(name);
    let template = env.loader.load(path, frame).map_err(loader_error)?;
    let source = template.read().map_err(loader_error)?;
    let Some(fragment) = fragment else {
        return Ok((template.name, source));
    };

    let body = fragment::extract(&template.name, &source, fragment)
        .map_err(|error| CompileError::Lexer {
            template: template.name.clone(),
            error,
        })?
        .ok_or_else(|| {
            loader_error(LoadError::FragmentNotFound {
                template: template.name.clone(),
                fragment: fragment.to_string(),
            })
        })?;
    tracing::debug!(template = %template.name, fragment, "selected fragment");
    Ok((format!("{}#{fragment}", template.name), body))
}
