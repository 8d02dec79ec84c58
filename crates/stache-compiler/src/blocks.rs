//! Parent/block composition.
//!
//! A call `{{<parent}} ... {{/parent}}` is read by a [`BlockCollector`] that
//! emits nothing and records the `{{$name}} ... {{/name}}` overrides found
//! directly inside the call. While the parent template compiles, a
//! [`Substitution`] swaps the parent's own block content for an override
//! found along the chain of enclosing calls.

use std::rc::Rc;

use stache_lexer::{Position, TagKind, Token, TokenKind};

use crate::error::StructuralError;

#[derive(Debug, Clone, PartialEq)]
pub struct BlockCapture {
    pub name: String,
    pub tokens: Vec<Token>,
}

/// Reads the caller side of one parent call.
#[derive(Debug)]
pub struct BlockCollector {
    parent: String,
    position: Position,
    open: Vec<String>,
    capturing: bool,
    blocks: Vec<BlockCapture>,
}

impl BlockCollector {
    pub fn begin(parent: &str, position: Position) -> Self {
        Self {
            parent: parent.to_string(),
            position,
            open: vec![parent.to_string()],
            capturing: false,
            blocks: Vec::new(),
        }
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Consume the next caller token. Returns `true` once the call is closed.
    pub fn push(&mut self, token: Token) -> Result<bool, StructuralError> {
        match &token.kind {
            TokenKind::Tag { kind, name } if kind.opens_section() => {
                if *kind == TagKind::BeginBlock && self.open.len() == 1 {
                    if self.blocks.iter().any(|b| b.name == *name) {
                        return Err(StructuralError::DuplicateBlock {
                            parent: self.parent.clone(),
                            block: name.clone(),
                        });
                    }
                    self.blocks.push(BlockCapture {
                        name: name.clone(),
                        tokens: Vec::new(),
                    });
                    self.capturing = true;
                    self.open.push(name.clone());
                    return Ok(false);
                }
                self.open.push(name.clone());
                self.capture(token);
                Ok(false)
            }
            TokenKind::Tag {
                kind: TagKind::EndSection,
                name,
            } => {
                let expected = self.open.last().cloned().unwrap_or_default();
                if expected != *name {
                    return Err(StructuralError::MismatchedClose {
                        expected,
                        found: name.clone(),
                    });
                }
                self.open.pop();
                match self.open.len() {
                    0 => Ok(true),
                    1 if self.capturing => {
                        self.capturing = false;
                        Ok(false)
                    }
                    _ => {
                        self.capture(token);
                        Ok(false)
                    }
                }
            }
            TokenKind::Eof => Err(StructuralError::Unclosed(self.parent.clone())),
            _ => {
                self.capture(token);
                Ok(false)
            }
        }
    }

    /// Text outside any block is not part of the call.
    fn capture(&mut self, token: Token) {
        if !self.capturing {
            return;
        }
        if let Some(block) = self.blocks.last_mut() {
            block.tokens.push(token);
        }
    }

    pub fn into_blocks(self) -> Vec<BlockCapture> {
        self.blocks
    }
}

/// Overrides visible to one parent template, linked to those of the call
/// that encloses it.
#[derive(Debug)]
pub struct BlockScope {
    captures: Vec<BlockCapture>,
    outer: Option<Rc<BlockScope>>,
}

impl BlockScope {
    pub fn new(captures: Vec<BlockCapture>, outer: Option<Rc<BlockScope>>) -> Self {
        Self { captures, outer }
    }

    /// Innermost call first; the first match wins.
    pub fn find(&self, name: &str) -> Option<&[Token]> {
        std::iter::successors(Some(self), |scope| scope.outer.as_deref())
            .flat_map(|scope| scope.captures.iter())
            .find(|capture| capture.name == name)
            .map(|capture| capture.tokens.as_slice())
    }
}

/// Token filter applied to a parent template before normalization.
#[derive(Debug)]
pub struct Substitution {
    blocks: Rc<BlockScope>,
    depth: usize,
    /// Block whose default content is being replaced, with its open depth.
    replacing: Option<(String, usize)>,
}

impl Substitution {
    pub fn new(blocks: Rc<BlockScope>) -> Self {
        Self {
            blocks,
            depth: 0,
            replacing: None,
        }
    }

    pub fn filter(&mut self, token: Token) -> Vec<Token> {
        match &token.kind {
            TokenKind::Tag { kind, name } if kind.opens_section() => {
                self.depth += 1;
                if self.replacing.is_some() {
                    return Vec::new();
                }
                if *kind == TagKind::BeginBlock {
                    if let Some(tokens) = self.blocks.find(name) {
                        tracing::debug!(block = %name, "substituting block override");
                        let mut replaced = Vec::with_capacity(tokens.len() + 1);
                        replaced.push(token.clone());
                        replaced.extend(tokens.iter().cloned());
                        self.replacing = Some((name.clone(), self.depth));
                        return replaced;
                    }
                }
                vec![token]
            }
            TokenKind::Tag {
                kind: TagKind::EndSection,
                name,
            } => {
                let closing = self.depth;
                self.depth = self.depth.saturating_sub(1);
                match &self.replacing {
                    Some((block, depth)) if *depth == closing && block == name => {
                        self.replacing = None;
                        vec![token]
                    }
                    Some(_) => Vec::new(),
                    None => vec![token],
                }
            }
            TokenKind::Eof => {
                self.replacing = None;
                vec![token]
            }
            _ if self.replacing.is_some() => Vec::new(),
            _ => vec![token],
        }
    }
}
