use std::borrow::Cow;

/// Applied to escaped values and escaped lambda output.
pub trait Escaper: Send + Sync {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str>;
}

/// Writes text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEscape;

impl Escaper for NoEscape {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEscaper;

impl Escaper for HtmlEscaper {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !text.contains(['&', '<', '>', '"', '\'']) {
            return Cow::Borrowed(text);
        }
        let mut out = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    }
}
