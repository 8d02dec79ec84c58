use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::LoadError;
use crate::stack::TemplateFrame;

/// Where a template's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOrigin {
    FileBacked(PathBuf),
    Inline(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTemplate {
    pub name: String,
    pub origin: TemplateOrigin,
}

impl NamedTemplate {
    pub fn inline(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: TemplateOrigin::Inline(text.to_string()),
        }
    }

    pub fn file(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            origin: TemplateOrigin::FileBacked(path.into()),
        }
    }

    pub fn read(&self) -> Result<String, LoadError> {
        match &self.origin {
            TemplateOrigin::Inline(text) => Ok(text.clone()),
            TemplateOrigin::FileBacked(path) => {
                std::fs::read_to_string(path).map_err(|e| LoadError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Resolves partial and parent names to templates.
pub trait TemplateLoader {
    fn load(&self, name: &str, caller: &TemplateFrame) -> Result<NamedTemplate, LoadError>;
}

/// In-memory templates keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    templates: HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&mut self, name: &str, text: &str) {
        self.templates.insert(name.to_string(), text.to_string());
    }
}

impl TemplateLoader for MapLoader {
    fn load(&self, name: &str, _caller: &TemplateFrame) -> Result<NamedTemplate, LoadError> {
        self.templates
            .get(name)
            .map(|text| NamedTemplate::inline(name, text))
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }
}

/// Templates stored as files under one directory.
///
/// Names starting with `./` or `../` resolve against the calling template's
/// directory; everything else against the root. A name without an extension
/// also tries the configured one.
#[derive(Debug, Clone)]
pub struct DirLoader {
    root: PathBuf,
    extension: String,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "mustache".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    fn resolve(&self, name: &str, caller: &TemplateFrame) -> String {
        if !(name.starts_with("./") || name.starts_with("../")) {
            return name.to_string();
        }
        let base = Path::new(&caller.name).parent().unwrap_or(Path::new(""));
        let mut parts: Vec<String> = base
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        for part in name.split('/') {
            match part {
                "." | "" => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other.to_string()),
            }
        }
        parts.join("/")
    }
}

impl TemplateLoader for DirLoader {
    fn load(&self, name: &str, caller: &TemplateFrame) -> Result<NamedTemplate, LoadError> {
        let resolved = self.resolve(name, caller);
        let exact = self.root.join(&resolved);
        if exact.is_file() {
            return Ok(NamedTemplate::file(&resolved, exact));
        }
        if Path::new(&resolved).extension().is_none() {
            let with_extension = format!("{resolved}.{}", self.extension);
            let path = self.root.join(&with_extension);
            if path.is_file() {
                return Ok(NamedTemplate::file(&with_extension, path));
            }
        }
        Err(LoadError::NotFound(name.to_string()))
    }
}
