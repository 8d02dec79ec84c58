use stache_lexer::{LexerError, Position};

/// Malformed template structure: sections, blocks and parents that do not nest.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("Closing {found} block instead of {expected}")]
    MismatchedClose { expected: String, found: String },
    #[error("Unexpected closing {0} block")]
    UnexpectedClose(String),
    #[error("Unclosed {0} block at end of file")]
    Unclosed(String),
    #[error("Duplicate block {block} in call to parent {parent}")]
    DuplicateBlock { parent: String, block: String },
}

/// Failure to locate or read a partial or parent template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("no section '{fragment}' in template '{template}'")]
    FragmentNotFound { template: String, fragment: String },
}

/// Failure raised by the scope engine before position information is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    NotFound { name: String, scopes: Vec<String> },
    Shape(String),
}

/// Fatal error for one top-level compile.
///
/// Every variant carries the template stack (`inner <- ... <- root`) so a host
/// can tell which partial or parent the failing tag came from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("{position}: {error} (open: [{}]; templates: {templates})", .open.join(", "))]
    Structural {
        error: StructuralError,
        position: Position,
        open: Vec<String>,
        templates: String,
    },
    #[error("{position}: field not found: '{name}' (scopes: {}; templates: {templates})", .scopes.join(" <- "))]
    NotFound {
        name: String,
        position: Position,
        scopes: Vec<String>,
        templates: String,
    },
    #[error("{position}: {message} (templates: {templates})")]
    Shape {
        message: String,
        position: Position,
        templates: String,
    },
    #[error("{position}: cannot load '{name}': {error} (templates: {templates})")]
    Loader {
        name: String,
        #[source]
        error: LoadError,
        position: Position,
        templates: String,
    },
    #[error("{position}: recursive include of '{name}' (templates: {templates})")]
    RecursiveInclude {
        name: String,
        position: Position,
        templates: String,
    },
    #[error("{position}: including '{name}' exceeds the maximum depth of {depth} (templates: {templates})")]
    IncludeDepth {
        name: String,
        depth: usize,
        position: Position,
        templates: String,
    },
    #[error("{template}: {error}")]
    Lexer {
        template: String,
        #[source]
        error: LexerError,
    },
}

impl CompileError {
    pub fn position(&self) -> Option<&Position> {
        match self {
            CompileError::Structural { position, .. }
            | CompileError::NotFound { position, .. }
            | CompileError::Shape { position, .. }
            | CompileError::Loader { position, .. }
            | CompileError::RecursiveInclude { position, .. }
            | CompileError::IncludeDepth { position, .. } => Some(position),
            CompileError::Lexer { .. } => None,
        }
    }

    pub(crate) fn from_resolve(error: ResolveError, position: Position, templates: String) -> Self {
        match error {
            ResolveError::NotFound { name, scopes } => CompileError::NotFound {
                name,
                position,
                scopes,
                templates,
            },
            ResolveError::Shape(message) => CompileError::Shape {
                message,
                position,
                templates,
            },
        }
    }
}
