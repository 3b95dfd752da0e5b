use crate::error::{ExpressionError, Result};

/// The maximum number of characters accepted in a single expression.
pub const MAX_EXPRESSION_LENGTH: usize = 24_576;

const BACKSLASH: char = '\\';
const APOSTROPHE: char = '\'';
const COMMA: char = ',';
const PERIOD: char = '.';
const PARENTHESES_OPEN: char = '(';
const PARENTHESES_CLOSE: char = ')';
const BRACKET_OPEN: char = '[';
const BRACKET_CLOSE: char = ']';

const FUNCTION_NAME_STOP: &[char] = &['(', ']', '[', ')', '\'', ' ', ','];
const PROPERTY_STOP: &[char] = &['(', ']', '[', ',', ')', ' ', '\'', '.', '\r', '\n'];

/// A character cursor over a raw expression string.
///
/// The cursor resolves the backslash escapes `\\ \( \) \[ \]` transparently:
/// while positioned on an escape, [`current`](Self::current) returns the
/// escaped character and [`is_escaped`](Self::is_escaped) is true, so the
/// character never matches a stop set.
#[derive(Debug)]
pub struct ExpressionStream<'a> {
    source: &'a str,
    chars: Vec<char>,
    position: usize,
    current: char,
    escape: usize,
}

impl<'a> ExpressionStream<'a> {
    /// Creates a stream over `expression`, rejecting input longer than
    /// [`MAX_EXPRESSION_LENGTH`].
    pub fn new(expression: &'a str) -> Result<Self> {
        let chars: Vec<char> = expression.chars().collect();
        if chars.len() > MAX_EXPRESSION_LENGTH {
            return Err(ExpressionError::TooLong {
                length: chars.len(),
                max: MAX_EXPRESSION_LENGTH,
            });
        }
        let mut stream = Self {
            source: expression,
            chars,
            position: 0,
            current: '\0',
            escape: 0,
        };
        stream.update_current();
        Ok(stream)
    }

    pub fn expression(&self) -> &'a str {
        self.source
    }

    pub fn eof(&self) -> bool {
        self.position >= self.chars.len()
    }

    pub fn current(&self) -> char {
        self.current
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_escaped(&self) -> bool {
        self.escape > 0
    }

    /// Consumes the opening `[` of the expression.
    pub fn start(&mut self) -> bool {
        self.skip(BRACKET_OPEN)
    }

    /// Consumes the closing `]` of the expression.
    pub fn end(&mut self) -> bool {
        self.skip(BRACKET_CLOSE)
    }

    /// Captures a function name or integer literal.
    pub fn try_element(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.current == PERIOD {
            return None;
        }
        let element = self.capture_until(FUNCTION_NAME_STOP);
        if element.is_empty() {
            None
        } else {
            Some(element)
        }
    }

    pub fn is_group_start(&mut self) -> bool {
        self.skip(PARENTHESES_OPEN)
    }

    pub fn is_group_end(&mut self) -> bool {
        self.skip(PARENTHESES_CLOSE)
    }

    pub fn is_index_start(&mut self) -> bool {
        self.skip(BRACKET_OPEN)
    }

    pub fn is_index_end(&mut self) -> bool {
        self.skip(BRACKET_CLOSE)
    }

    /// Captures a `'`-delimited string literal. A doubled `''` inside the
    /// literal is captured as a single quote.
    pub fn capture_string(&mut self) -> Option<String> {
        if self.escape > 0 || !self.skip(APOSTROPHE) {
            return None;
        }
        let mut literal = String::new();
        while !self.eof() {
            if !self.is_escaped() && self.current == APOSTROPHE {
                if self.peek_raw(1) == Some(APOSTROPHE) {
                    literal.push(APOSTROPHE);
                    self.next();
                    self.next();
                    continue;
                }
                break;
            }
            literal.push(self.current);
            self.next();
        }
        self.skip(APOSTROPHE);
        Some(literal)
    }

    /// Captures a `.name` property access.
    pub fn capture_property(&mut self) -> Option<String> {
        if !self.skip(PERIOD) {
            return None;
        }
        Some(self.capture_until(PROPERTY_STOP))
    }

    /// Skips whitespace, at most one comma, then whitespace again.
    pub fn separator(&mut self) {
        self.skip_whitespace();
        self.skip(COMMA);
        self.skip_whitespace();
    }

    pub fn skip_whitespace(&mut self) {
        while !self.eof() && !self.is_escaped() && self.current.is_whitespace() {
            self.next();
        }
    }

    /// Consumes the current character if it equals `c` and is not escaped.
    pub fn skip(&mut self, c: char) -> bool {
        if self.eof() || self.is_escaped() || self.current != c {
            return false;
        }
        self.next();
        true
    }

    /// Advances past the current character, including any escape prefix.
    pub fn next(&mut self) -> bool {
        self.position += self.escape + 1;
        if self.position >= self.chars.len() {
            self.position = self.chars.len();
            self.current = '\0';
            self.escape = 0;
            return false;
        }
        self.update_current();
        true
    }

    /// Returns true if the remaining input, after trailing whitespace, is the
    /// closing bracket of the expression.
    pub fn at_end(&self) -> bool {
        !self.is_escaped() && self.current == BRACKET_CLOSE && {
            let rest = &self.chars[self.position + 1..];
            rest.iter().all(|c| c.is_whitespace())
        }
    }

    fn capture_until(&mut self, stop: &[char]) -> String {
        let mut captured = String::new();
        while !self.eof() {
            if !self.is_escaped() && stop.contains(&self.current) {
                break;
            }
            captured.push(self.current);
            self.next();
        }
        captured
    }

    /// Returns the logical character `offset` positions after the current one.
    fn peek_raw(&self, offset: usize) -> Option<char> {
        let mut pos = self.position + self.escape + offset;
        pos += self.escape_count(pos);
        self.chars.get(pos).copied()
    }

    fn update_current(&mut self) {
        self.escape = self.escape_count(self.position);
        self.current = self
            .chars
            .get(self.position + self.escape)
            .copied()
            .unwrap_or('\0');
    }

    fn escape_count(&self, position: usize) -> usize {
        match (self.chars.get(position), self.chars.get(position + 1)) {
            (Some(&BACKSLASH), Some(next))
                if matches!(
                    *next,
                    BACKSLASH | BRACKET_OPEN | BRACKET_CLOSE | PARENTHESES_OPEN | PARENTHESES_CLOSE
                ) =>
            {
                1
            }
            _ => 0,
        }
    }
}
