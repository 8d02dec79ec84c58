use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Root,
    Partial,
    Parent,
    Lambda,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FrameKind::Root => "root",
            FrameKind::Partial => "partial",
            FrameKind::Parent => "parent",
            FrameKind::Lambda => "lambda",
        };
        write!(f, "{label}")
    }
}

/// One template being compiled, linked to the template that included it.
///
/// Frames are used for diagnostics, cycle detection and relative loading only.
#[derive(Debug)]
pub struct TemplateFrame {
    pub kind: FrameKind,
    pub name: String,
    pub caller: Option<Rc<TemplateFrame>>,
}

impl TemplateFrame {
    pub fn root(name: &str) -> Rc<Self> {
        Rc::new(Self {
            kind: FrameKind::Root,
            name: name.to_string(),
            caller: None,
        })
    }

    pub fn enter(self: &Rc<Self>, kind: FrameKind, name: &str) -> Rc<Self> {
        Rc::new(Self {
            kind,
            name: name.to_string(),
            caller: Some(self.clone()),
        })
    }

    /// This frame followed by its callers, innermost first.
    pub fn frames(&self) -> impl Iterator<Item = &TemplateFrame> {
        std::iter::successors(Some(self), |frame| frame.caller.as_deref())
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    /// True when a template of this name is already being compiled.
    /// Lambda frames are named after the lambda and never match.
    pub fn includes(&self, name: &str) -> bool {
        self.frames()
            .any(|frame| frame.kind != FrameKind::Lambda && frame.name == name)
    }

    /// `inner <- ... <- root`
    pub fn describe(&self) -> String {
        self.frames()
            .map(|frame| match frame.kind {
                FrameKind::Root => frame.name.clone(),
                kind => format!("{kind} {}", frame.name),
            })
            .collect::<Vec<_>>()
            .join(" <- ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_innermost_first() {
        let root = TemplateFrame::root("page");
        let layout = root.enter(FrameKind::Parent, "layout");
        let item = layout.enter(FrameKind::Partial, "item");
        assert_eq!(item.describe(), "partial item <- parent layout <- page");
        assert_eq!(item.depth(), 3);
    }

    #[test]
    fn test_includes() {
        let root = TemplateFrame::root("page");
        let item = root.enter(FrameKind::Partial, "item");
        assert!(item.includes("item"));
        assert!(item.includes("page"));
        assert!(!item.includes("other"));
    }

    #[test]
    fn test_lambda_frames_do_not_count_as_includes() {
        let root = TemplateFrame::root("page");
        let lambda = root.enter(FrameKind::Lambda, "bold");
        assert!(!lambda.includes("bold"));
    }
}
