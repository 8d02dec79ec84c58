//! Standalone tag line detection.
//!
//! A structural tag that is the only non-whitespace content on its line is
//! "standalone": the whitespace around it and its line ending are not part
//! of the output. The normalizer looks at most four tokens ahead and
//! classifies every token exactly once, in order, grouping the tokens of a
//! matched line together.

use std::collections::VecDeque;

use stache_lexer::Token;

const MAX_PENDING: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessHint {
    Normal,
    /// Not part of the output.
    Ignore,
    /// Leading whitespace of a standalone line; becomes the indent of an
    /// included template when the tag after it is a partial or parent.
    Indent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub token: Token,
    pub hint: ProcessHint,
}

impl Classified {
    fn with(token: Token, hint: ProcessHint) -> Self {
        let hint = if token.is_eof() { ProcessHint::Eof } else { hint };
        Self { token, hint }
    }

    fn normal(token: Token) -> Self {
        Self::with(token, ProcessHint::Normal)
    }

    fn ignore(token: Token) -> Self {
        Self::with(token, ProcessHint::Ignore)
    }

    fn indent(token: Token) -> Self {
        Self::with(token, ProcessHint::Indent)
    }
}

/// Tokens classified together, one standalone line or one flushed token.
pub type Group = Vec<Classified>;

#[derive(Debug)]
pub struct Normalizer {
    pending: VecDeque<Token>,
    at_line_start: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(MAX_PENDING + 1),
            at_line_start: true,
        }
    }

    /// Feed one token. Returns the groups that became decidable.
    ///
    /// Before end of input at most one group is released per call; once the
    /// `Eof` token arrives everything left is drained.
    pub fn push(&mut self, token: Token) -> Vec<Group> {
        let eof = token.is_eof();
        self.pending.push_back(token);

        let mut groups = Vec::new();
        loop {
            let size = self.pending.len();
            if size == 0 || (size < 2 && !eof) {
                break;
            }
            if size == 1 {
                if let Some(token) = self.pending.pop_front() {
                    self.at_line_start = true;
                    groups.push(vec![Classified::normal(token)]);
                }
                break;
            }

            if let Some(group) = self.match_standalone() {
                groups.push(group);
            } else if eof || size > MAX_PENDING {
                if let Some(token) = self.pending.pop_front() {
                    self.at_line_start = token.is_newline_or_eof();
                    groups.push(vec![Classified::normal(token)]);
                }
            }

            if !eof {
                break;
            }
        }
        groups
    }

    /// Classify an entire token list, draining through `Eof`.
    pub fn classify(tokens: Vec<Token>) -> Vec<Group> {
        let mut normalizer = Self::new();
        tokens
            .into_iter()
            .flat_map(|token| normalizer.push(token))
            .collect()
    }

    fn match_standalone(&mut self) -> Option<Group> {
        if !self.at_line_start {
            return None;
        }
        let first = self.pending.front()?;
        let second = self.pending.get(1)?;

        // x{{#tag}}
        if !(first.is_newline() || first.is_whitespace()) && second.is_standalone() {
            tracing::trace!(line = first.position.line, "text before tag");
            self.at_line_start = false;
            return Some(self.take(&[ProcessHint::Normal, ProcessHint::Normal]));
        }

        // {{#tag}}\n
        if first.is_standalone() && second.is_newline_or_eof() {
            tracing::trace!(line = first.position.line, "standalone: tag newline");
            self.at_line_start = true;
            return Some(self.take(&[ProcessHint::Normal, ProcessHint::Ignore]));
        }

        let third = self.pending.get(2)?;

        // {{#tag}}  \n
        if first.is_standalone() && second.is_whitespace() && third.is_newline_or_eof() {
            tracing::trace!(line = first.position.line, "standalone: tag space newline");
            self.at_line_start = true;
            return Some(self.take(&[
                ProcessHint::Normal,
                ProcessHint::Ignore,
                ProcessHint::Ignore,
            ]));
        }

        //   {{#tag}}\n
        if first.is_whitespace() && second.is_standalone() && third.is_newline_or_eof() {
            tracing::trace!(line = first.position.line, "standalone: space tag newline");
            self.at_line_start = true;
            return Some(self.take(&[
                ProcessHint::Indent,
                ProcessHint::Normal,
                ProcessHint::Ignore,
            ]));
        }

        let fourth = self.pending.get(3)?;

        //   {{#tag}}  \n
        if first.is_whitespace()
            && second.is_standalone()
            && third.is_whitespace()
            && fourth.is_newline_or_eof()
        {
            tracing::trace!(line = first.position.line, "standalone: space tag space newline");
            self.at_line_start = true;
            return Some(self.take(&[
                ProcessHint::Indent,
                ProcessHint::Normal,
                ProcessHint::Ignore,
                ProcessHint::Ignore,
            ]));
        }

        None
    }

    fn take(&mut self, hints: &[ProcessHint]) -> Group {
        hints
            .iter()
            .filter_map(|hint| {
                self.pending
                    .pop_front()
                    .map(|token| match hint {
                        ProcessHint::Ignore => Classified::ignore(token),
                        ProcessHint::Indent => Classified::indent(token),
                        ProcessHint::Normal | ProcessHint::Eof => Classified::normal(token),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stache_lexer::{Scanner, TokenKind};

    fn groups(source: &str) -> Vec<Group> {
        Normalizer::classify(Scanner::tokenize("test", source).unwrap())
    }

    /// Helper: flatten to (hint, raw text) pairs.
    fn hints(source: &str) -> Vec<(ProcessHint, String)> {
        groups(source)
            .into_iter()
            .flatten()
            .map(|c| (c.hint, c.token.raw))
            .collect()
    }

    /// Helper: text of every token that is not ignored, indent included.
    fn kept(source: &str) -> String {
        groups(source)
            .into_iter()
            .flatten()
            .filter(|c| c.hint == ProcessHint::Normal || c.hint == ProcessHint::Indent)
            .map(|c| c.token.raw)
            .collect()
    }

    fn n(raw: &str) -> (ProcessHint, String) {
        (ProcessHint::Normal, raw.into())
    }

    fn i(raw: &str) -> (ProcessHint, String) {
        (ProcessHint::Ignore, raw.into())
    }

    fn eof() -> (ProcessHint, String) {
        (ProcessHint::Eof, String::new())
    }

    // =========================================================================
    // Patterns
    // =========================================================================

    #[test]
    fn test_tag_newline() {
        assert_eq!(
            hints("{{#a}}\nx"),
            vec![n("{{#a}}"), i("\n"), n("x"), eof()]
        );
    }

    #[test]
    fn test_tag_space_newline() {
        assert_eq!(
            hints("{{/a}}  \nx"),
            vec![n("{{/a}}"), i("  "), i("\n"), n("x"), eof()]
        );
    }

    #[test]
    fn test_space_tag_newline() {
        assert_eq!(
            hints("  {{>p}}\n"),
            vec![(ProcessHint::Indent, "  ".into()), n("{{>p}}"), i("\n"), eof()]
        );
    }

    #[test]
    fn test_space_tag_space_newline() {
        assert_eq!(
            hints("\t{{^a}} \n"),
            vec![
                (ProcessHint::Indent, "\t".into()),
                n("{{^a}}"),
                i(" "),
                i("\n"),
                eof()
            ]
        );
    }

    #[test]
    fn test_text_before_tag_is_not_standalone() {
        assert_eq!(
            hints("x{{#a}}\n"),
            vec![n("x"), n("{{#a}}"), n("\n"), eof()]
        );
    }

    #[test]
    fn test_tag_at_eof() {
        assert_eq!(hints("x\n{{/a}}"), vec![n("x"), n("\n"), n("{{/a}}"), eof()]);
    }

    #[test]
    fn test_variables_are_never_standalone() {
        assert_eq!(hints("{{a}}\n"), vec![n("{{a}}"), n("\n"), eof()]);
    }

    #[test]
    fn test_comments_keep_their_line() {
        assert_eq!(hints("{{! c }}\n"), vec![n("{{! c }}"), n("\n"), eof()]);
    }

    #[test]
    fn test_delimiter_change_keeps_its_line() {
        let hinted = hints("{{hello}}\n{{=<% %>=}}\n<% hello %>\n");
        assert!(hinted.iter().all(|(hint, _)| *hint != ProcessHint::Ignore));
    }

    #[test]
    fn test_two_tags_on_one_line() {
        assert_eq!(
            hints("{{#a}}{{#b}}\n"),
            vec![n("{{#a}}"), n("{{#b}}"), n("\n"), eof()]
        );
    }

    #[test]
    fn test_mid_line_tag_not_standalone() {
        assert_eq!(kept("a {{#x}}\nb"), "a {{#x}}\nb");
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    #[test]
    fn test_standalone_line_is_one_group() {
        let all = groups("A\n  {{#xs}}\nB");
        let line: Vec<ProcessHint> = all
            .iter()
            .find(|g| g.len() == 3)
            .unwrap()
            .iter()
            .map(|c| c.hint)
            .collect();
        assert_eq!(
            line,
            vec![ProcessHint::Indent, ProcessHint::Normal, ProcessHint::Ignore]
        );
    }

    #[test]
    fn test_every_token_classified_once_in_order() {
        let source = "A\n{{#xs}}\n  B {{x}}\n  {{/xs}}  \nC\n{{>p}}";
        let tokens = Scanner::tokenize("test", source).unwrap();
        let expected: Vec<TokenKind> = tokens.iter().map(|t| t.kind.clone()).collect();
        let classified: Vec<TokenKind> = Normalizer::classify(tokens)
            .into_iter()
            .flatten()
            .map(|c| c.token.kind)
            .collect();
        assert_eq!(classified, expected);
    }

    #[test]
    fn test_long_lines_flush_incrementally() {
        let mut normalizer = Normalizer::new();
        let tokens = Scanner::tokenize("test", "a b c d e f g h").unwrap();
        let mut released = 0;
        for token in tokens {
            if token.is_eof() {
                break;
            }
            released += normalizer.push(token).len();
        }
        assert!(released > 0);
        assert!(normalizer.pending.len() <= MAX_PENDING);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[test]
    fn test_standalone_lines_removed() {
        assert_eq!(kept("A\n{{#xs}}\nB\n{{/xs}}\nC\n"), "A\n{{#xs}}B\n{{/xs}}C\n");
    }

    #[test]
    fn test_normalizing_output_again_ignores_nothing() {
        for source in [
            "A\n{{#xs}}\nB\n{{/xs}}\nC\n",
            "  {{>p}}\n",
            "{{<parent}}\n{{$b}}\nx\n{{/b}}\n{{/parent}}\n",
            "a {{#x}}\n  {{/x}} b\n",
        ] {
            let once = kept(source);
            let again = hints(&once);
            assert!(
                again.iter().all(|(hint, _)| *hint != ProcessHint::Ignore),
                "{source:?} -> {once:?} -> {again:?}"
            );
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let source = "x\n  {{#a}}  \n{{/a}}\n";
        assert_eq!(hints(source), hints(source));
    }
}
