use std::sync::Arc;

use crate::token::{NewlineKind, Position, SpecialChar, TagKind, Token, TokenKind};
use crate::LexerError;

pub const DEFAULT_OPEN: &str = "{{";
pub const DEFAULT_CLOSE: &str = "}}";

/// Template source scanner.
///
/// Splits one template body into text, whitespace, newline, special
/// character and tag tokens. Tag delimiters start as `{{ }}` and may be
/// changed mid-template with `{{=<% %>=}}`.
///
/// - `Vec<char>` source for index-based navigation
/// - Position tracking on every token
/// - Source line text shared per line for diagnostics
pub struct Scanner {
    template: Arc<str>,
    chars: Vec<char>,
    lines: Vec<Arc<str>>,
    pos: usize,
    line: usize,
    column: usize,
    open: Vec<char>,
    close: Vec<char>,
    tokens: Vec<Token>,
}

impl Scanner {
    /// Create a new scanner for the given template.
    pub fn new(template: &str, source: &str) -> Self {
        let lines = source
            .split('\n')
            .map(|line| Arc::from(line.strip_suffix('\r').unwrap_or(line)))
            .collect();
        Self {
            template: Arc::from(template),
            chars: source.chars().collect(),
            lines,
            pos: 0,
            line: 1,
            column: 1,
            open: DEFAULT_OPEN.chars().collect(),
            close: DEFAULT_CLOSE.chars().collect(),
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire template into a vector of tokens ending in `Eof`.
    pub fn tokenize(template: &str, source: &str) -> Result<Vec<Token>, LexerError> {
        let mut scanner = Scanner::new(template, source);
        scanner.scan_tokens()?;
        Ok(scanner.tokens)
    }

    fn scan_tokens(&mut self) -> Result<(), LexerError> {
        while !self.is_at_end() {
            self.scan_token()?;
        }
        let position = self.position(self.line, self.column);
        self.tokens.push(Token::new(TokenKind::Eof, position, ""));
        Ok(())
    }

    fn scan_token(&mut self) -> Result<(), LexerError> {
        if self.matches_at(self.pos, &self.open) {
            return self.scan_tag();
        }

        let (line, column, start) = (self.line, self.column, self.pos);
        match self.peek() {
            '\n' => {
                self.advance();
                self.push(TokenKind::Newline(NewlineKind::Lf), line, column, start);
            }
            '\r' if self.peek_next() == '\n' => {
                self.advance();
                self.advance();
                self.push(TokenKind::Newline(NewlineKind::CrLf), line, column, start);
            }
            ' ' | '\t' => {
                while !self.is_at_end() && matches!(self.peek(), ' ' | '\t') {
                    self.advance();
                }
                let text = self.slice(start, self.pos);
                self.push(TokenKind::Whitespace(text), line, column, start);
            }
            '"' => {
                self.advance();
                self.push(TokenKind::Special(SpecialChar::Quote), line, column, start);
            }
            '\\' => {
                self.advance();
                self.push(TokenKind::Special(SpecialChar::Backslash), line, column, start);
            }
            _ => self.scan_text(),
        }
        Ok(())
    }

    /// Scan a run of ordinary characters up to the next boundary.
    fn scan_text(&mut self) {
        let (line, column, start) = (self.line, self.column, self.pos);
        self.advance();
        while !self.is_at_end() && !self.at_text_boundary() {
            self.advance();
        }
        let text = self.slice(start, self.pos);
        self.push(TokenKind::Text(text), line, column, start);
    }

    fn at_text_boundary(&self) -> bool {
        match self.peek() {
            '\n' | ' ' | '\t' | '"' | '\\' => true,
            '\r' => self.peek_next() == '\n',
            _ => self.matches_at(self.pos, &self.open),
        }
    }

    // --- Tags ---

    /// Scan a tag starting at the current open delimiter.
    fn scan_tag(&mut self) -> Result<(), LexerError> {
        let (line, column, start) = (self.line, self.column, self.pos);
        for _ in 0..self.open.len() {
            self.advance();
        }

        if self.is_default_delimiters() && self.peek() == '{' {
            self.advance();
            let content = self.read_until_close("}", line, column)?;
            let name = self.tag_name(&content, line, column)?;
            let kind = TokenKind::Tag {
                kind: TagKind::UnescapedVariable,
                name,
            };
            self.push(kind, line, column, start);
            return Ok(());
        }

        let sigil = self.peek();
        let kind = match sigil {
            '!' => {
                self.advance();
                let content = self.read_until_close("", line, column)?;
                self.push(TokenKind::Comment(content), line, column, start);
                return Ok(());
            }
            '=' => {
                self.advance();
                let content = self.read_until_close("=", line, column)?;
                return self.change_delimiters(&content, line, column, start);
            }
            '&' => Some(TagKind::UnescapedVariable),
            '#' => Some(TagKind::BeginSection),
            '^' => Some(TagKind::BeginInverted),
            '/' => Some(TagKind::EndSection),
            '>' => Some(TagKind::Partial),
            '<' => Some(TagKind::BeginParent),
            '$' => Some(TagKind::BeginBlock),
            _ => None,
        };
        if kind.is_some() {
            self.advance();
        }

        let content = self.read_until_close("", line, column)?;
        let name = self.tag_name(&content, line, column)?;
        let kind = TokenKind::Tag {
            kind: kind.unwrap_or(TagKind::Variable),
            name,
        };
        self.push(kind, line, column, start);
        Ok(())
    }

    /// Read tag content up to `suffix` followed by the close delimiter.
    /// Consumes the suffix and the delimiter; returns the content between.
    fn read_until_close(
        &mut self,
        suffix: &str,
        line: usize,
        column: usize,
    ) -> Result<String, LexerError> {
        let terminator: Vec<char> = suffix.chars().chain(self.close.iter().copied()).collect();
        let content_start = self.pos;
        while !self.is_at_end() {
            if self.matches_at(self.pos, &terminator) {
                let content = self.slice(content_start, self.pos);
                for _ in 0..terminator.len() {
                    self.advance();
                }
                return Ok(content);
            }
            self.advance();
        }
        let close: String = terminator.iter().collect();
        Err(LexerError {
            message: format!("Unterminated tag, expected '{close}'"),
            line,
            column,
        })
    }

    fn tag_name(&self, content: &str, line: usize, column: usize) -> Result<String, LexerError> {
        let name = content.trim();
        if name.is_empty() {
            return Err(LexerError {
                message: "Empty tag name".into(),
                line,
                column,
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(LexerError {
                message: format!("Invalid tag name: '{name}'"),
                line,
                column,
            });
        }
        Ok(name.to_string())
    }

    fn change_delimiters(
        &mut self,
        content: &str,
        line: usize,
        column: usize,
        start: usize,
    ) -> Result<(), LexerError> {
        let parts: Vec<&str> = content.split_whitespace().collect();
        let [open, close] = parts.as_slice() else {
            return Err(LexerError {
                message: format!("Invalid delimiter change: '{}'", content.trim()),
                line,
                column,
            });
        };
        if open.contains('=') || close.contains('=') {
            return Err(LexerError {
                message: format!("Delimiters may not contain '=': '{}'", content.trim()),
                line,
                column,
            });
        }
        let kind = TokenKind::DelimiterChange {
            open: open.to_string(),
            close: close.to_string(),
        };
        self.open = open.chars().collect();
        self.close = close.chars().collect();
        self.push(kind, line, column, start);
        Ok(())
    }

    fn is_default_delimiters(&self) -> bool {
        self.open.iter().copied().eq(DEFAULT_OPEN.chars())
            && self.close.iter().copied().eq(DEFAULT_CLOSE.chars())
    }

    // --- Helpers ---

    fn push(&mut self, kind: TokenKind, line: usize, column: usize, start: usize) {
        let raw = self.slice(start, self.pos);
        let position = self.position(line, column);
        self.tokens.push(Token::new(kind, position, raw));
    }

    fn position(&self, line: usize, column: usize) -> Position {
        let line_text = self
            .lines
            .get(line.saturating_sub(1))
            .cloned()
            .unwrap_or_else(|| Arc::from(""));
        Position::new(self.template.clone(), line, column, line_text)
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn matches_at(&self, at: usize, pattern: &[char]) -> bool {
        !pattern.is_empty()
            && at + pattern.len() <= self.chars.len()
            && self.chars[at..at + pattern.len()] == *pattern
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.pos]
        }
    }

    fn peek_next(&self) -> char {
        if self.pos + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.pos + 1]
        }
    }

    fn advance(&mut self) {
        if self.is_at_end() {
            return;
        }
        if self.chars[self.pos] == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Helper: tokenize and return token kinds (ignoring positions).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::tokenize("test", source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    /// Helper: tokenize and panic on error.
    fn tokens(source: &str) -> Vec<Token> {
        Scanner::tokenize("test", source).unwrap()
    }

    fn text(s: &str) -> TokenKind {
        TokenKind::Text(s.into())
    }

    fn ws(s: &str) -> TokenKind {
        TokenKind::Whitespace(s.into())
    }

    fn tag(kind: TagKind, name: &str) -> TokenKind {
        TokenKind::Tag {
            kind,
            name: name.into(),
        }
    }

    // =========================================================================
    // Structure: empty, newlines, EOF
    // =========================================================================

    #[test]
    fn test_empty_source() {
        let toks = tokens("");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_single_newline() {
        assert_eq!(
            kinds("\n"),
            vec![TokenKind::Newline(NewlineKind::Lf), TokenKind::Eof]
        );
    }

    #[test]
    fn test_windows_line_endings() {
        assert_eq!(
            kinds("a\r\nb"),
            vec![
                text("a"),
                TokenKind::Newline(NewlineKind::CrLf),
                text("b"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_lone_carriage_return_is_text() {
        assert_eq!(kinds("a\rb"), vec![text("a\rb"), TokenKind::Eof]);
    }

    // =========================================================================
    // Text and whitespace
    // =========================================================================

    #[test]
    fn test_text_and_whitespace_runs() {
        assert_eq!(
            kinds("hello  world\t!"),
            vec![
                text("hello"),
                ws("  "),
                text("world"),
                ws("\t"),
                text("!"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_special_characters() {
        assert_eq!(
            kinds("say \"hi\\\""),
            vec![
                text("say"),
                ws(" "),
                TokenKind::Special(SpecialChar::Quote),
                text("hi"),
                TokenKind::Special(SpecialChar::Backslash),
                TokenKind::Special(SpecialChar::Quote),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_single_brace_is_text() {
        assert_eq!(kinds("a{b}"), vec![text("a{b}"), TokenKind::Eof]);
    }

    // =========================================================================
    // Tags
    // =========================================================================

    #[test]
    fn test_variable_tag() {
        assert_eq!(
            kinds("Hi {{ name }}!"),
            vec![
                text("Hi"),
                ws(" "),
                tag(TagKind::Variable, "name"),
                text("!"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_all_sigils() {
        assert_eq!(
            kinds("{{#a}}{{^b}}{{/c}}{{>d}}{{<e}}{{$f}}{{&g}}{{{h}}}"),
            vec![
                tag(TagKind::BeginSection, "a"),
                tag(TagKind::BeginInverted, "b"),
                tag(TagKind::EndSection, "c"),
                tag(TagKind::Partial, "d"),
                tag(TagKind::BeginParent, "e"),
                tag(TagKind::BeginBlock, "f"),
                tag(TagKind::UnescapedVariable, "g"),
                tag(TagKind::UnescapedVariable, "h"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_dotted_name() {
        assert_eq!(
            kinds("{{person.name}}"),
            vec![tag(TagKind::Variable, "person.name"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_comment_spans_lines() {
        let toks = tokens("{{! one\ntwo }}x");
        assert_eq!(toks[0].kind, TokenKind::Comment(" one\ntwo ".into()));
        assert_eq!(toks[1].kind, text("x"));
        assert_eq!(toks[1].position.line, 2);
    }

    #[test]
    fn test_raw_text_preserved() {
        let toks = tokens("{{# items }}{{{ x }}}");
        assert_eq!(toks[0].raw, "{{# items }}");
        assert_eq!(toks[1].raw, "{{{ x }}}");
    }

    // =========================================================================
    // Delimiters
    // =========================================================================

    #[test]
    fn test_delimiter_change() {
        assert_eq!(
            kinds("{{=<% %>=}}<% name %>{{x}}"),
            vec![
                TokenKind::DelimiterChange {
                    open: "<%".into(),
                    close: "%>".into()
                },
                tag(TagKind::Variable, "name"),
                text("{{x}}"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_custom_delimiters_have_no_triple_mustache() {
        assert_eq!(
            kinds("{{=| |=}}|{x}|"),
            vec![
                TokenKind::DelimiterChange {
                    open: "|".into(),
                    close: "|".into()
                },
                tag(TagKind::Variable, "{x}"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_invalid_delimiter_change() {
        let err = Scanner::tokenize("test", "{{=<%=}}").unwrap_err();
        assert!(err.message.contains("Invalid delimiter change"));
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_unterminated_tag() {
        let err = Scanner::tokenize("test", "ab {{name").unwrap_err();
        assert!(err.message.contains("Unterminated tag"));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 4);
    }

    #[test]
    fn test_empty_tag_name() {
        let err = Scanner::tokenize("test", "{{#  }}").unwrap_err();
        assert_eq!(err.message, "Empty tag name");
    }

    #[test]
    fn test_name_with_inner_whitespace() {
        let err = Scanner::tokenize("test", "{{a b}}").unwrap_err();
        assert!(err.message.contains("Invalid tag name"));
    }

    // =========================================================================
    // Positions
    // =========================================================================

    #[test]
    fn test_position_line_column_and_text() {
        let toks = tokens("a\n  {{b}}");
        let b = &toks[3];
        assert_eq!(b.kind, tag(TagKind::Variable, "b"));
        assert_eq!(b.position.line, 2);
        assert_eq!(b.position.column, 3);
        assert_eq!(&*b.position.line_text, "  {{b}}");
        assert_eq!(b.position.to_string(), "test:2:3");
    }
}
