/// Position in source code (byte offset plus line/column, both 0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Position {
    /// Byte offset in source
    pub offset: usize,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed, in characters)
    pub column: usize,
}

impl Position {
    pub fn new() -> Self {
        Self { offset: 0, line: 0, column: 0 }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

/// Span in source code (a range from start position to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn point(position: Position) -> Self {
        Self { start: position, end: position }
    }
}

/// Reserved words of the markup dialect plus the enhanced-script dialect.
///
/// The enhanced-script keywords are recognized here too so that the parser
/// can detect enhanced syntax inside script bodies without re-lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    // Markup
    Text,
    Style,
    Script,
    Template,
    Custom,
    Origin,
    Import,
    Namespace,
    Configuration,
    Use,
    Inherit,
    Delete,
    Insert,
    After,
    Before,
    Replace,
    From,
    As,
    Except,
    // Enhanced script
    Listen,
    Delegate,
    Animate,
    Router,
    Util,
    Vir,
    Fileloader,
}

impl Keyword {
    pub fn lookup(ident: &str) -> Option<Keyword> {
        let kw = match ident {
            "text" => Keyword::Text,
            "style" => Keyword::Style,
            "script" => Keyword::Script,
            "Template" => Keyword::Template,
            "Custom" => Keyword::Custom,
            "Origin" => Keyword::Origin,
            "Import" => Keyword::Import,
            "Namespace" => Keyword::Namespace,
            "Configuration" => Keyword::Configuration,
            "use" => Keyword::Use,
            "inherit" => Keyword::Inherit,
            "delete" => Keyword::Delete,
            "insert" => Keyword::Insert,
            "after" => Keyword::After,
            "before" => Keyword::Before,
            "replace" => Keyword::Replace,
            "from" => Keyword::From,
            "as" => Keyword::As,
            "except" => Keyword::Except,
            "listen" => Keyword::Listen,
            "delegate" => Keyword::Delegate,
            "animate" => Keyword::Animate,
            "router" => Keyword::Router,
            "util" => Keyword::Util,
            "vir" => Keyword::Vir,
            "fileloader" => Keyword::Fileloader,
            _ => return None,
        };
        Some(kw)
    }

    /// True for the keywords that introduce enhanced-script helper calls.
    pub fn is_enhanced_script(self) -> bool {
        matches!(
            self,
            Keyword::Listen
                | Keyword::Delegate
                | Keyword::Animate
                | Keyword::Router
                | Keyword::Util
                | Keyword::Vir
                | Keyword::Fileloader
        )
    }
}

/// Token kinds of the markup/style dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Illegal,
    Ident,
    Str,
    Number,
    Comment,
    /// `#` immediately followed by an alphanumeric run: `#f0f0f0`, `#app`.
    /// The parser decides by position whether this is a color literal or an
    /// ID selector.
    HashName,
    Keyword(Keyword),

    // Punctuation
    Colon,
    Semicolon,
    Comma,
    Dot,
    Hash,
    At,
    Amp,
    Question,
    Bang,
    Assign,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,

    // Two-character operators
    Arrow,
    Eq,
    NotEq,
    Le,
    Ge,
    AndAnd,
    OrOr,
    ColonAssign,
}

impl TokenKind {
    /// Operators meaningful to the style-value expression sub-parser.
    pub fn is_expression_operator(self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Question
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, position: Position) -> Self {
        Self { kind, literal: literal.into(), position }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    /// Identifier-like text usable as a name: identifiers and all keywords.
    /// Keywords double as plain names outside their grammar position
    /// (`after` is a valid attribute name, for example).
    pub fn ident_text(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Ident | TokenKind::Keyword(_) => Some(&self.literal),
            _ => None,
        }
    }
}

/// Hand-rolled lexer for the markup/style dialect.
///
/// `next_token` advances an internal cursor and never blocks; once the input
/// is exhausted it returns an end-of-input token forever.
pub struct Lexer<'a> {
    source: &'a str,
    position: Position,
}

const UNIT_SUFFIXES: &[&str] = &["px", "em", "rem"];

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, position: Position::new() }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.position;
        let Some(c) = self.current_char() else {
            return Token::new(TokenKind::Eof, "", start);
        };

        match c {
            '/' if self.peek_char() == Some('/') => self.read_line_comment(start),
            '/' if self.peek_char() == Some('*') => self.read_block_comment(start),
            '-' if self.peek_char() == Some('-') => self.read_generator_comment(start),
            '"' | '\'' => self.read_string(start, c),
            '#' => {
                if self.peek_char().is_some_and(|p| p.is_ascii_alphanumeric() || p == '_') {
                    self.read_hash_name(start)
                } else {
                    self.bump();
                    Token::new(TokenKind::Hash, "#", start)
                }
            }
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(start),
            _ => self.read_operator(start, c),
        }
    }

    fn read_operator(&mut self, start: Position, c: char) -> Token {
        // Longest match first for the two-character operators
        let two_char = match (c, self.peek_char()) {
            ('-', Some('>')) => Some((TokenKind::Arrow, "->")),
            ('=', Some('=')) => Some((TokenKind::Eq, "==")),
            ('!', Some('=')) => Some((TokenKind::NotEq, "!=")),
            ('<', Some('=')) => Some((TokenKind::Le, "<=")),
            ('>', Some('=')) => Some((TokenKind::Ge, ">=")),
            ('&', Some('&')) => Some((TokenKind::AndAnd, "&&")),
            ('|', Some('|')) => Some((TokenKind::OrOr, "||")),
            (':', Some('=')) => Some((TokenKind::ColonAssign, ":=")),
            _ => None,
        };
        if let Some((kind, literal)) = two_char {
            self.bump();
            self.bump();
            return Token::new(kind, literal, start);
        }

        self.bump();
        let kind = match c {
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '@' => TokenKind::At,
            '&' => TokenKind::Amp,
            '?' => TokenKind::Question,
            '!' => TokenKind::Bang,
            '=' => TokenKind::Assign,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            _ => TokenKind::Illegal,
        };
        Token::new(kind, c.to_string(), start)
    }

    fn read_identifier(&mut self, start: Position) -> Token {
        while let Some(c) = self.current_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
            } else if c == '-'
                && self.peek_char().is_some_and(|p| p.is_ascii_alphanumeric() || p == '_')
            {
                // Hyphenated names like font-size stay one identifier; a
                // trailing or spaced hyphen is the minus operator.
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.source[start.offset..self.position.offset];
        match Keyword::lookup(text) {
            Some(kw) => Token::new(TokenKind::Keyword(kw), text, start),
            None => Token::new(TokenKind::Ident, text, start),
        }
    }

    fn read_hash_name(&mut self, start: Position) -> Token {
        self.bump(); // '#'
        while let Some(c) = self.current_char() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.source[start.offset..self.position.offset];
        Token::new(TokenKind::HashName, text, start)
    }

    fn read_number(&mut self, start: Position) -> Token {
        let mut seen_dot = false;
        while let Some(c) = self.current_char() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !seen_dot && self.peek_char().is_some_and(|p| p.is_ascii_digit())
            {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }

        // A unit suffix immediately after the digits belongs to the number
        if self.current_char() == Some('%') {
            self.bump();
        } else {
            let rest = &self.source[self.position.offset..];
            for unit in UNIT_SUFFIXES {
                if rest.starts_with(unit) {
                    let after = rest[unit.len()..].chars().next();
                    if !after.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                        for _ in 0..unit.len() {
                            self.bump();
                        }
                        break;
                    }
                }
            }
        }

        let text = &self.source[start.offset..self.position.offset];
        Token::new(TokenKind::Number, text, start)
    }

    fn read_string(&mut self, start: Position, quote: char) -> Token {
        self.bump(); // opening quote
        let content_start = self.position.offset;
        while let Some(c) = self.current_char() {
            if c == quote {
                break;
            }
            self.bump();
        }
        let content = &self.source[content_start..self.position.offset];
        // Unterminated string: lexed up to end-of-input without error
        if self.current_char() == Some(quote) {
            self.bump();
        }
        Token::new(TokenKind::Str, content, start)
    }

    fn read_line_comment(&mut self, start: Position) -> Token {
        while let Some(c) = self.current_char() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let text = &self.source[start.offset..self.position.offset];
        Token::new(TokenKind::Comment, text, start)
    }

    fn read_block_comment(&mut self, start: Position) -> Token {
        self.bump(); // '/'
        self.bump(); // '*'
        while let Some(c) = self.current_char() {
            if c == '*' && self.peek_char() == Some('/') {
                self.bump();
                self.bump();
                break;
            }
            self.bump();
        }
        let text = &self.source[start.offset..self.position.offset];
        Token::new(TokenKind::Comment, text, start)
    }

    /// `-- text` comments are preserved into the generated HTML, so the
    /// token keeps its full text for the parser to pick up.
    fn read_generator_comment(&mut self, start: Position) -> Token {
        while let Some(c) = self.current_char() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let text = &self.source[start.offset..self.position.offset];
        Token::new(TokenKind::Comment, text, start)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current_char() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn current_char(&self) -> Option<char> {
        self.source[self.position.offset..].chars().next()
    }

    fn peek_char(&self) -> Option<char> {
        let mut chars = self.source[self.position.offset..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.current_char()?;
        self.position.offset += c.len_utf8();
        if c == '\n' {
            self.position.line += 1;
            self.position.column = 0;
        } else {
            self.position.column += 1;
        }
        Some(c)
    }
}

/// Tokenize an entire source buffer, including the trailing EOF token.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_element_header() {
        let tokens = tokenize("div { id: box; }");
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].literal, "div");
        assert_eq!(tokens[1].kind, TokenKind::LBrace);
        assert_eq!(tokens[2].literal, "id");
        assert_eq!(tokens[3].kind, TokenKind::Colon);
        assert_eq!(tokens[4].literal, "box");
        assert_eq!(tokens[5].kind, TokenKind::Semicolon);
        assert_eq!(tokens[6].kind, TokenKind::RBrace);
        assert_eq!(tokens[7].kind, TokenKind::Eof);
    }

    #[test]
    fn test_number_with_unit() {
        let tokens = tokenize("width: 100px + 1.5em;");
        assert_eq!(tokens[2].kind, TokenKind::Number);
        assert_eq!(tokens[2].literal, "100px");
        assert_eq!(tokens[3].kind, TokenKind::Plus);
        assert_eq!(tokens[4].literal, "1.5em");
    }

    #[test]
    fn test_percent_unit_vs_modulo() {
        let tokens = tokenize("100% 7 % 3");
        assert_eq!(tokens[0].literal, "100%");
        assert_eq!(tokens[1].literal, "7");
        assert_eq!(tokens[2].kind, TokenKind::Percent);
        assert_eq!(tokens[3].literal, "3");
    }

    #[test]
    fn test_color_literal_is_one_token() {
        let tokens = tokenize("color: #f0f0f0;");
        assert_eq!(tokens[2].kind, TokenKind::HashName);
        assert_eq!(tokens[2].literal, "#f0f0f0");
    }

    #[test]
    fn test_bare_hash() {
        let tokens = tokenize("# .box");
        assert_eq!(tokens[0].kind, TokenKind::Hash);
        assert_eq!(tokens[1].kind, TokenKind::Dot);
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("-> == != <= >= && || :="),
            vec![
                TokenKind::Arrow,
                TokenKind::Eq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::ColonAssign,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        let tokens = tokenize("Template Custom use inherit listen");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Template));
        assert_eq!(tokens[1].kind, TokenKind::Keyword(Keyword::Custom));
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::Use));
        assert_eq!(tokens[3].kind, TokenKind::Keyword(Keyword::Inherit));
        assert_eq!(tokens[4].kind, TokenKind::Keyword(Keyword::Listen));
        assert!(Keyword::Listen.is_enhanced_script());
        assert!(!Keyword::Template.is_enhanced_script());
    }

    #[test]
    fn test_hyphenated_identifier() {
        let tokens = tokenize("font-size: 12px; a - b");
        assert_eq!(tokens[0].literal, "font-size");
        assert_eq!(tokens[5].kind, TokenKind::Minus);
    }

    #[test]
    fn test_strings_both_quotes() {
        let tokens = tokenize(r#"'one' "two""#);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].literal, "one");
        assert_eq!(tokens[1].literal, "two");
    }

    #[test]
    fn test_unterminated_string_is_permissive() {
        let tokens = tokenize("\"open ended");
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].literal, "open ended");
        assert_eq!(tokens[1].kind, TokenKind::Eof);
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("// line\n/* block */\n-- generated\nid");
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[1].kind, TokenKind::Comment);
        assert_eq!(tokens[2].kind, TokenKind::Comment);
        assert!(tokens[2].literal.starts_with("--"));
        assert_eq!(tokens[3].kind, TokenKind::Ident);
    }

    #[test]
    fn test_eof_is_idempotent() {
        let mut lexer = Lexer::new("x");
        assert_eq!(lexer.next_token().kind, TokenKind::Ident);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  b");
        assert_eq!(tokens[0].position.line, 0);
        assert_eq!(tokens[1].position.line, 1);
        assert_eq!(tokens[1].position.column, 2);
        assert_eq!(tokens[1].position.offset, 4);
    }

    #[test]
    fn test_illegal_character() {
        let tokens = tokenize("a ~ b");
        assert_eq!(tokens[1].kind, TokenKind::Illegal);
        assert_eq!(tokens[1].literal, "~");
    }
}
