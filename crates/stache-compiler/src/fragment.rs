//! Template fragments.
//!
//! A loader name of the form `page#item` stands for the body of the first
//! `{{$item}}` or `{{#item}}` section of `page`. The standalone lines of the
//! fragment's own open and close tags are dropped. When every body line
//! starts with the opening tag's indentation, that indentation is removed.

use stache_lexer::{LexerError, Scanner, TagKind};

use crate::standalone::{Classified, Normalizer, ProcessHint};

/// `page#item` → (`page`, `Some("item")`).
pub fn split(name: &str) -> (&str, Option<&str>) {
    match name.split_once('#') {
        Some((template, fragment)) => (template, Some(fragment)),
        None => (name, None),
    }
}

struct Opened {
    depth: usize,
    indent: String,
}

/// Source text of `fragment` within `source`, or `None` when no section of
/// that name exists.
pub fn extract(template: &str, source: &str, fragment: &str) -> Result<Option<String>, LexerError> {
    let tokens = Scanner::tokenize(template, source)?;

    let mut depth = 0usize;
    let mut opened: Option<Opened> = None;
    let mut body = String::new();
    for group in Normalizer::classify(tokens) {
        let mut line: Vec<(ProcessHint, String)> = Vec::new();
        let mut line_indent = String::new();
        let mut opened_here = false;

        for Classified { token, hint } in group {
            match token.tag() {
                Some((kind, name)) if kind.opens_section() => {
                    depth += 1;
                    let selects = matches!(kind, TagKind::BeginSection | TagKind::BeginBlock);
                    if opened.is_none() && selects && name == fragment {
                        opened = Some(Opened {
                            depth,
                            indent: std::mem::take(&mut line_indent),
                        });
                        opened_here = true;
                        line.clear();
                        continue;
                    }
                }
                Some((TagKind::EndSection, _)) => {
                    if let Some(open) = opened.as_ref().filter(|open| open.depth == depth) {
                        push_normal(&mut body, &line);
                        return Ok(Some(reindent(&body, &open.indent)));
                    }
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
            if hint == ProcessHint::Indent {
                line_indent = token.raw.clone();
            }
            line.push((hint, token.raw));
        }

        if opened.is_some() {
            if opened_here {
                push_normal(&mut body, &line);
            } else {
                body.extend(line.into_iter().map(|(_, raw)| raw));
            }
        }
    }
    Ok(None)
}

/// Tokens of a fragment tag's own line that are part of the output.
fn push_normal(body: &mut String, line: &[(ProcessHint, String)]) {
    for (hint, raw) in line {
        if *hint == ProcessHint::Normal {
            body.push_str(raw);
        }
    }
}

fn reindent(body: &str, indent: &str) -> String {
    if indent.is_empty() {
        return body.to_string();
    }
    let blank = |line: &str| line.trim().is_empty();
    let shared = body
        .split_inclusive('\n')
        .all(|line| blank(line) || line.starts_with(indent));
    if !shared {
        return body.to_string();
    }
    body.split_inclusive('\n')
        .map(|line| line.strip_prefix(indent).unwrap_or(line))
        .collect()
}
