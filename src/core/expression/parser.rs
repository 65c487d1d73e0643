//! Formula parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence:
//! comparison < additive < multiplicative < unary < call/primary.

use super::tokenizer::Token;
use std::fmt;
use thiserror::Error;

/// A reference resolved at evaluation time
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// `$id` - form field
    Field(String),
    /// `@id` - another formula's result
    Formula(String),
    /// Bare identifier, evaluates to its own text (table ids, unquoted keys)
    Name(String),
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Reference(Reference),
    /// Function call: NAME(arg1, arg2, ...)
    FunctionCall { name: String, args: Vec<Expr> },
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary minus / plus
    UnaryOp { op: String, operand: Box<Expr> },
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

const COMPARISON_OPS: [&str; 6] = ["==", "!=", "<", ">", "<=", ">="];

/// Deepest expression tree the parser builds. Parentheses, call arguments,
/// unary chains and binary operator chains all count.
pub const MAX_DEPTH: usize = 256;

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn match_any_operator(&mut self, ops: &[&str]) -> Option<String> {
        if let Some(Token::Operator(s)) = self.peek() {
            if ops.contains(&s.as_str()) {
                let op = s.clone();
                self.position += 1;
                return Some(op);
            }
        }
        None
    }

    /// One level deeper into the tree; fails past `MAX_DEPTH`
    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new("Expression nested too deeply", self.position));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.comparison()
    }

    /// Comparison: term (( "==" | "!=" | "<" | ">" | "<=" | ">=" ) term)*
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut left = self.term()?;

        while let Some(op) = self.match_any_operator(&COMPARISON_OPS) {
            self.descend()?;
            let right = self.term()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.depth = depth;
        Ok(left)
    }

    /// Term: factor (( "+" | "-" ) factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut left = self.factor()?;

        while let Some(op) = self.match_any_operator(&["+", "-"]) {
            self.descend()?;
            let right = self.factor()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.depth = depth;
        Ok(left)
    }

    /// Factor: unary (( "*" | "/" ) unary)*
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut left = self.unary()?;

        while let Some(op) = self.match_any_operator(&["*", "/"]) {
            self.descend()?;
            let right = self.unary()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.depth = depth;
        Ok(left)
    }

    /// Unary: ( "-" | "+" ) unary | primary
    fn unary(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let expr = if let Some(op) = self.match_any_operator(&["-", "+"]) {
            Expr::UnaryOp {
                op,
                operand: Box::new(self.unary()?),
            }
        } else {
            self.primary()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);
        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }

    /// Primary: NUMBER | STRING | $ref | @ref | NAME | NAME "(" args ")" | "(" expr ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.position;

        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::FieldRef(id)) => Ok(Expr::Reference(Reference::Field(id))),
            Some(Token::FormulaRef(id)) => Ok(Expr::Reference(Reference::Formula(id))),
            Some(Token::Identifier(name)) => {
                if self.match_token(&Token::OpenParen) {
                    let args = self.arguments()?;
                    if !self.match_token(&Token::CloseParen) {
                        return Err(ParseError::new(
                            format!("Expected ')' after arguments of {}", name),
                            self.position,
                        ));
                    }
                    Ok(Expr::FunctionCall { name, args })
                } else {
                    Ok(Expr::Reference(Reference::Name(name)))
                }
            }
            Some(Token::OpenParen) => {
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                position,
            )),
            None => Err(ParseError::new("Unexpected end of expression", position)),
        }
    }
}

/// Convenience function to parse tokens into an AST
pub fn parse(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    Parser::new(tokens).parse()
}

//==============================================================================
// Rendering back to formula text
//==============================================================================

fn precedence(op: &str) -> u8 {
    match op {
        "*" | "/" => 3,
        "+" | "-" => 2,
        _ => 1,
    }
}

/// Format a number the way formula authors write it (no trailing `.0`)
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Expr {
    fn write_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8, right_side: bool) -> fmt::Result {
        let needs_parens = match self {
            Expr::BinaryOp { op, .. } => {
                let own = precedence(op);
                own < parent || (right_side && own == parent)
            }
            _ => false,
        };
        if needs_parens {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&format_number(*n)),
            Expr::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Reference(Reference::Field(id)) => write!(f, "${}", id),
            Expr::Reference(Reference::Formula(id)) => write!(f, "@{}", id),
            Expr::Reference(Reference::Name(name)) => f.write_str(name),
            Expr::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::BinaryOp { op, left, right } => {
                let prec = precedence(op);
                left.write_operand(f, prec, false)?;
                write!(f, " {} ", op)?;
                right.write_operand(f, prec, true)
            }
            Expr::UnaryOp { op, operand } => {
                write!(f, "{}", op)?;
                operand.write_operand(f, 4, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::tokenizer::tokenize;

    fn parse_formula(formula: &str) -> Result<Expr, ParseError> {
        let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
        parse(tokens)
    }

    fn field(id: &str) -> Box<Expr> {
        Box::new(Expr::Reference(Reference::Field(id.to_string())))
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(parse_formula("$age").unwrap(), *field("age"));
        assert_eq!(
            parse_formula("@mainPremium").unwrap(),
            Expr::Reference(Reference::Formula("mainPremium".to_string()))
        );
        assert_eq!(
            parse_formula("factor").unwrap(),
            Expr::Reference(Reference::Name("factor".to_string()))
        );
    }

    #[test]
    fn test_parse_operator_precedence_mul_over_add() {
        assert_eq!(
            parse_formula("$a + $b * $c").unwrap(),
            Expr::BinaryOp {
                op: "+".to_string(),
                left: field("a"),
                right: Box::new(Expr::BinaryOp {
                    op: "*".to_string(),
                    left: field("b"),
                    right: field("c"),
                }),
            }
        );
    }

    #[test]
    fn test_parse_subtraction_is_left_associative() {
        assert_eq!(
            parse_formula("10 - 4 - 3").unwrap(),
            Expr::BinaryOp {
                op: "-".to_string(),
                left: Box::new(Expr::BinaryOp {
                    op: "-".to_string(),
                    left: Box::new(Expr::Number(10.0)),
                    right: Box::new(Expr::Number(4.0)),
                }),
                right: Box::new(Expr::Number(3.0)),
            }
        );
    }

    #[test]
    fn test_parse_nested_function_calls() {
        assert_eq!(
            parse_formula("ROUND(MAX($a, LOOKUP(t, 'r', $c)), 2)").unwrap(),
            Expr::FunctionCall {
                name: "ROUND".to_string(),
                args: vec![
                    Expr::FunctionCall {
                        name: "MAX".to_string(),
                        args: vec![
                            *field("a"),
                            Expr::FunctionCall {
                                name: "LOOKUP".to_string(),
                                args: vec![
                                    Expr::Reference(Reference::Name("t".to_string())),
                                    Expr::Text("r".to_string()),
                                    *field("c"),
                                ],
                            },
                        ],
                    },
                    Expr::Number(2.0),
                ],
            }
        );
    }

    #[test]
    fn test_parse_comparison_inside_if() {
        let expr = parse_formula("IF($carValue <= 10, 360, 660)").unwrap();
        let Expr::FunctionCall { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "IF");
        assert_eq!(
            args[0],
            Expr::BinaryOp {
                op: "<=".to_string(),
                left: field("carValue"),
                right: Box::new(Expr::Number(10.0)),
            }
        );
    }

    #[test]
    fn test_parse_unary_minus() {
        assert_eq!(
            parse_formula("-$a").unwrap(),
            Expr::UnaryOp {
                op: "-".to_string(),
                operand: field("a"),
            }
        );
    }

    #[test]
    fn test_parse_empty_argument_list() {
        assert_eq!(
            parse_formula("SUM()").unwrap(),
            Expr::FunctionCall {
                name: "SUM".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_parse_error_dangling_close_paren() {
        let err = parse_formula("$x + )").unwrap_err();
        assert!(err.message.contains("Unexpected token"));
    }

    #[test]
    fn test_parse_error_missing_close_paren() {
        let err = parse_formula("ROUND($a, 2").unwrap_err();
        assert!(err.message.contains("')'"));
    }

    #[test]
    fn test_parse_error_trailing_tokens() {
        assert!(parse_formula("1 2").is_err());
        assert!(parse_formula("(1 + 2))").is_err());
    }

    #[test]
    fn test_parse_error_empty() {
        assert!(parse_formula("").is_err());
    }

    fn nested(depth: usize, inner: &str) -> String {
        format!("{}{}{}", "(".repeat(depth), inner, ")".repeat(depth))
    }

    #[test]
    fn test_parse_nesting_within_limit() {
        assert_eq!(parse_formula(&nested(200, "1")).unwrap(), Expr::Number(1.0));
        assert!(parse_formula(&format!("{}1", "-".repeat(200))).is_ok());
    }

    #[test]
    fn test_parse_error_nested_too_deeply() {
        for formula in [
            nested(10_000, "1"),
            format!("{}1", "-".repeat(10_000)),
            format!("{}1{}", "ABS(".repeat(10_000), ")".repeat(10_000)),
            vec!["1"; 10_000].join(" + "),
        ] {
            let err = parse_formula(&formula).unwrap_err();
            assert_eq!(err.message, "Expression nested too deeply");
        }
    }

    #[test]
    fn test_display_round_trips_structure() {
        for src in [
            "ROUND($a * LOOKUP(t, $r, $c), 2)",
            "($a + $b) * @c",
            "10 - (4 - 3)",
            "IF($x == 'yes', 1, 0)",
            "-($a + 1) / 2",
        ] {
            let expr = parse_formula(src).unwrap();
            let rendered = expr.to_string();
            assert_eq!(parse_formula(&rendered).unwrap(), expr, "{}", src);
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(35.0), "35");
        assert_eq!(format_number(0.671), "0.671");
        assert_eq!(format_number(-2.5), "-2.5");
    }
}
