use std::fmt;
use std::sync::Arc;

/// A position in a template, tracking line and column for error reporting.
///
/// The source line text is shared between all tokens of the same line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub template: Arc<str>,
    pub line: usize,
    pub column: usize,
    pub line_text: Arc<str>,
}

impl Position {
    pub fn new(template: Arc<str>, line: usize, column: usize, line_text: Arc<str>) -> Self {
        Self {
            template,
            line,
            column,
            line_text,
        }
    }

    /// Position used for synthetic tokens and errors raised outside any template.
    pub fn unknown() -> Self {
        Self::new(Arc::from(""), 0, 0, Arc::from(""))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.template, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineKind {
    Lf,
    CrLf,
}

impl NewlineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NewlineKind::Lf => "\n",
            NewlineKind::CrLf => "\r\n",
        }
    }
}

/// Characters that backends usually need to escape when embedding literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialChar {
    Quote,
    Backslash,
}

impl SpecialChar {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialChar::Quote => "\"",
            SpecialChar::Backslash => "\\",
        }
    }
}

/// The sigil-determined kind of a `{{...}}` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Variable,
    UnescapedVariable,
    Partial,
    BeginSection,
    BeginInverted,
    BeginParent,
    BeginBlock,
    EndSection,
}

impl TagKind {
    /// Tags that may stand alone on a line and have that line removed from output.
    pub fn is_standalone(self) -> bool {
        matches!(
            self,
            TagKind::Partial
                | TagKind::BeginSection
                | TagKind::BeginInverted
                | TagKind::BeginParent
                | TagKind::BeginBlock
                | TagKind::EndSection
        )
    }

    /// Tags whose leading whitespace becomes the indent of the included template.
    pub fn is_indented(self) -> bool {
        matches!(self, TagKind::Partial | TagKind::BeginParent)
    }

    pub fn opens_section(self) -> bool {
        matches!(
            self,
            TagKind::BeginSection
                | TagKind::BeginInverted
                | TagKind::BeginParent
                | TagKind::BeginBlock
        )
    }

    pub fn sigil(self) -> &'static str {
        match self {
            TagKind::Variable => "",
            TagKind::UnescapedVariable => "&",
            TagKind::Partial => ">",
            TagKind::BeginSection => "#",
            TagKind::BeginInverted => "^",
            TagKind::BeginParent => "<",
            TagKind::BeginBlock => "$",
            TagKind::EndSection => "/",
        }
    }
}

/// Token classification for template source.
///
/// Data-carrying variants embed their value directly.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    Whitespace(String),
    Newline(NewlineKind),
    Special(SpecialChar),
    Comment(String),
    DelimiterChange { open: String, close: String },
    Tag { kind: TagKind, name: String },
    Eof,
}

/// A token produced by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
    /// Exact source text of the token, delimiters included.
    pub raw: String,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position, raw: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            raw: raw.into(),
        }
    }

    pub fn tag(&self) -> Option<(TagKind, &str)> {
        match &self.kind {
            TokenKind::Tag { kind, name } => Some((*kind, name.as_str())),
            _ => None,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.tag().is_some_and(|(kind, _)| kind.is_standalone())
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace(_))
    }

    pub fn is_newline(&self) -> bool {
        matches!(self.kind, TokenKind::Newline(_))
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_newline_or_eof(&self) -> bool {
        self.is_newline() || self.is_eof()
    }

    /// True for `{{/name}}`.
    pub fn is_end_of(&self, section: &str) -> bool {
        matches!(self.tag(), Some((TagKind::EndSection, name)) if name == section)
    }
}
