use std::fmt;

/// The kind of a lexical unit produced by the expression parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A function name, e.g. `concat`.
    Element,
    /// A property access, e.g. `.name`.
    Property,
    /// A quoted string literal.
    String,
    /// An integer literal.
    Numeric,
    GroupStart,
    GroupEnd,
    IndexStart,
    IndexEnd,
}

/// A single token in an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub content: Option<String>,
    pub value: Option<i64>,
}

impl Token {
    fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            content: None,
            value: None,
        }
    }

    fn with_content(kind: TokenKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: Some(content.into()),
            value: None,
        }
    }

    /// Returns the text content of the token, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Element => write!(f, "{}", self.text()),
            TokenKind::Property => write!(f, ".{}", self.text()),
            TokenKind::String => write!(f, "'{}'", self.text().replace('\'', "''")),
            TokenKind::Numeric => write!(f, "{}", self.value.unwrap_or_default()),
            TokenKind::GroupStart => write!(f, "("),
            TokenKind::GroupEnd => write!(f, ")"),
            TokenKind::IndexStart => write!(f, "["),
            TokenKind::IndexEnd => write!(f, "]"),
        }
    }
}

/// An ordered, repositionable sequence of tokens.
///
/// The parser appends to the stream; the compiler then rewinds it and consumes
/// tokens from the current position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
    position: usize,
}

impl TokenStream {
    /// Creates an empty token stream.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns the current cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor to an absolute position, clamped to the stream length.
    pub fn move_to(&mut self, position: usize) {
        self.position = position.min(self.tokens.len());
    }

    /// Returns the token under the cursor without consuming it.
    pub fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    /// Returns true if the token under the cursor has the given kind.
    pub fn peek(&self, kind: TokenKind) -> bool {
        self.current().is_some_and(|t| t.kind == kind)
    }

    /// Consumes and returns the token under the cursor.
    pub fn pop(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Consumes the token under the cursor if it has the given kind.
    pub fn try_kind(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek(kind) {
            self.pop()
        } else {
            None
        }
    }

    /// Skips the token under the cursor if it has the given kind.
    pub fn skip(&mut self, kind: TokenKind) -> bool {
        self.try_kind(kind).is_some()
    }

    /// Returns all tokens regardless of cursor position.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    pub fn element(&mut self, name: impl Into<String>) {
        self.tokens.push(Token::with_content(TokenKind::Element, name));
    }

    pub fn property(&mut self, name: impl Into<String>) {
        self.tokens.push(Token::with_content(TokenKind::Property, name));
    }

    pub fn string(&mut self, literal: impl Into<String>) {
        self.tokens.push(Token::with_content(TokenKind::String, literal));
    }

    pub fn numeric(&mut self, value: i64) {
        self.tokens.push(Token {
            kind: TokenKind::Numeric,
            content: None,
            value: Some(value),
        });
    }

    pub fn group_start(&mut self) {
        self.tokens.push(Token::new(TokenKind::GroupStart));
    }

    pub fn group_end(&mut self) {
        self.tokens.push(Token::new(TokenKind::GroupEnd));
    }

    pub fn index_start(&mut self) {
        self.tokens.push(Token::new(TokenKind::IndexStart));
    }

    pub fn index_end(&mut self) {
        self.tokens.push(Token::new(TokenKind::IndexEnd));
    }
}

impl fmt::Display for TokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}
