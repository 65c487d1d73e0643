//! Formula tokenizer
//!
//! Converts formula strings like `ROUND($amount * @rate, 2)` into a sequence of
//! tokens that can be parsed into an AST.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, .5, 1.5e10)
    Number(f64),
    /// A string literal (e.g., "male" or 'factor')
    Text(String),
    /// `$id` - a form field value
    FieldRef(String),
    /// `@id` - another formula's result
    FormulaRef(String),
    /// A bare identifier - function name or bare LOOKUP key
    Identifier(String),
    /// Arithmetic and comparison operators: + - * / == != = <> < > <= >=
    Operator(String),
    OpenParen,
    CloseParen,
    /// Argument separator
    Comma,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Tokenize error at position {position}: {message}")]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        // Spreadsheet-style leading '=' is tolerated
        let formula = formula.trim_start();
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        loop {
            self.skip_whitespace();

            let Some(c) = self.peek() else {
                return Ok(None);
            };

            if let Some(token) = self.read_token(c)? {
                return Ok(Some(token));
            }
        }
    }

    /// One token starting at `c`; `None` when `c` is outside the formula
    /// alphabet and was skipped
    fn read_token(&mut self, c: char) -> Result<Option<Token>, TokenizeError> {
        let token = match c {
            '"' | '\'' => self.read_string()?,

            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }

            '+' | '-' | '*' | '/' => {
                self.advance();
                Token::Operator(c.to_string())
            }

            '<' => self.read_less_than_operator(),
            '>' => self.read_greater_than_operator(),
            '=' => self.read_equals_operator(),
            '!' => match self.read_not_equals_operator() {
                Some(token) => token,
                None => return Ok(None),
            },

            '$' => {
                self.advance();
                Token::FieldRef(self.read_reference_name('$')?)
            }
            '@' => {
                self.advance();
                Token::FormulaRef(self.read_reference_name('@')?)
            }

            c if c.is_ascii_digit() || c == '.' => self.read_number()?,

            c if c.is_ascii_alphabetic() || c == '_' => Token::Identifier(self.read_word()),

            c => {
                tracing::debug!(character = %c, position = self.position, "skipping character in formula");
                self.advance();
                return Ok(None);
            }
        };

        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a string literal (double or single quoted, doubled quote escapes)
    fn read_string(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let Some(quote) = self.advance() else {
            return Err(TokenizeError::new("Expected string literal", start_pos));
        };
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new("Unterminated string literal", start_pos));
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => value.push(c),
            }
        }

        Ok(Token::Text(value))
    }

    /// Read a number (integer, decimal, leading-dot decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        self.read_digits(&mut num_str);

        if self.peek() == Some('.') {
            num_str.push('.');
            self.advance();
            self.read_digits(&mut num_str);
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            num_str.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                num_str.push(sign);
                self.advance();
            }
            self.read_digits(&mut num_str);
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    fn read_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    /// Name after a `$` or `@` sigil; must be non-empty
    fn read_reference_name(&mut self, sigil: char) -> Result<String, TokenizeError> {
        let position = self.position;
        let name = self.read_word();
        if name.is_empty() {
            return Err(TokenizeError::new(
                format!("Expected a name after '{}'", sigil),
                position,
            ));
        }
        Ok(name)
    }

    fn read_less_than_operator(&mut self) -> Token {
        self.advance(); // consume '<'

        match self.peek() {
            Some('=') => {
                self.advance();
                Token::Operator("<=".to_string())
            }
            Some('>') => {
                self.advance();
                Token::Operator("!=".to_string())
            }
            _ => Token::Operator("<".to_string()),
        }
    }

    fn read_greater_than_operator(&mut self) -> Token {
        self.advance(); // consume '>'

        if self.peek() == Some('=') {
            self.advance();
            Token::Operator(">=".to_string())
        } else {
            Token::Operator(">".to_string())
        }
    }

    /// `=`, `==` and `===` are all equality
    fn read_equals_operator(&mut self) -> Token {
        self.advance();
        while self.peek() == Some('=') {
            self.advance();
        }
        Token::Operator("==".to_string())
    }

    /// `!=` and `!==`; a lone `!` is skipped like any other stray character
    fn read_not_equals_operator(&mut self) -> Option<Token> {
        let position = self.position;
        self.advance(); // consume '!'

        if self.peek() != Some('=') {
            tracing::debug!(character = "!", position, "skipping character in formula");
            return None;
        }
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
        }
        Some(Token::Operator("!=".to_string()))
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}
