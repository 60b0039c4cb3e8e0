use std::fmt;

use log::debug;

use crate::error::{syntax_error, Result};
use crate::tokenizer::{Token, TokenKind};

/// Numbers keep the integer/float distinction from the source text through
/// evaluation. Only true division always widens to a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(Number),
    Str(String),
    Boolean(bool),
    Null,
    Identifier(String),
    List(Vec<Node>),
    Map(Vec<(Node, Node)>),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Assignment {
        name: String,
        value: Box<Node>,
    },
    Call {
        name: String,
        args: Vec<Node>,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },
    If {
        condition: Box<Node>,
        then_body: Vec<Node>,
        else_body: Option<Vec<Node>>,
    },
    Loop {
        collection: Box<Node>,
        body: Vec<Node>,
    },
    Return(Option<Box<Node>>),
    Break,
}

#[derive(Debug, PartialEq)]
pub struct Program {
    pub statements: Vec<Node>,
}

pub fn parse(tokens: &[Token]) -> Result<Program> {
    assert!(
        matches!(tokens.last(), Some(token) if token.kind == TokenKind::Eof),
        "token stream must end with EOF"
    );
    let program = Parser::new(tokens).parse_program()?;
    debug!("parsed {} top-level statements", program.statements.len());
    Ok(program)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos];
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        let token = self.peek();
        syntax_error(message, token.line, token.column)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.matches(kind) {
            Ok(())
        } else {
            self.error(format!("Expected {:?}, got {:?}", kind, self.peek().kind))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => self.error(format!("Expected identifier, got {:?}", other)),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            statements.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Node> {
        match self.peek().kind.clone() {
            TokenKind::Plot | TokenKind::Plan => self.parse_function_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::Loop => self.parse_loop(),
            TokenKind::Suicide => self.parse_return(),
            TokenKind::Escape => {
                self.advance();
                self.skip_newlines();
                Ok(Node::Break)
            }
            _ => {
                if let Some(name) = self.assignment_target() {
                    if self.peek_at(1).kind == TokenKind::Assign {
                        return self.parse_assignment(name);
                    }
                }
                let expr = self.parse_expression()?;
                self.skip_newlines();
                Ok(expr)
            }
        }
    }

    /// Any identifier works as an assignment target, and so do the literal
    /// keywords truth/lie/alibi/universe, which bind their own spelling as a
    /// variable name.
    fn assignment_target(&self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => Some(name.clone()),
            TokenKind::Truth => Some("truth".to_string()),
            TokenKind::Lie => Some("lie".to_string()),
            TokenKind::Alibi => Some("alibi".to_string()),
            TokenKind::Universe => Some("universe".to_string()),
            _ => None,
        }
    }

    fn parse_assignment(&mut self, name: String) -> Result<Node> {
        self.advance(); // target
        self.advance(); // '='
        let value = self.parse_expression()?;
        self.skip_newlines();
        Ok(Node::Assignment {
            name,
            value: Box::new(value),
        })
    }

    fn parse_function_def(&mut self) -> Result<Node> {
        self.advance(); // 'plot' or 'plan'
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.expect_identifier()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen)?;
        let body = self.parse_block()?;
        Ok(Node::FunctionDef { name, params, body })
    }

    fn parse_if(&mut self) -> Result<Node> {
        self.advance(); // 'if'
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        self.skip_newlines();
        let else_body = if self.matches(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Node::If {
            condition: Box::new(condition),
            then_body,
            else_body,
        })
    }

    fn parse_loop(&mut self) -> Result<Node> {
        self.advance(); // 'loop'
        let collection = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Node::Loop {
            collection: Box::new(collection),
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Node> {
        self.advance(); // 'suicide'
        let value = if matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent
        ) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.skip_newlines();
        Ok(Node::Return(value))
    }

    /// A block is `:` NEWLINE INDENT statement+ DEDENT. The DEDENT is
    /// tolerated missing at end of input.
    fn parse_block(&mut self) -> Result<Vec<Node>> {
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::Newline)?;
        self.expect(&TokenKind::Indent)?;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek().kind, TokenKind::Dedent | TokenKind::Eof) {
            statements.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.matches(&TokenKind::Dedent);
        Ok(statements)
    }

    fn parse_expression(&mut self) -> Result<Node> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut left = self.parse_and()?;
        while self.matches(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = Node::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut left = self.parse_comparison()?;
        while self.matches(&TokenKind::And) {
            let right = self.parse_comparison()?;
            left = Node::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node> {
        let op = match self.peek().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Node::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Node> {
        match self.peek().kind.clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Node::Number(Number::Int(n)))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(Node::Number(Number::Float(x)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::Str(s))
            }
            TokenKind::Truth => {
                self.advance();
                Ok(Node::Boolean(true))
            }
            TokenKind::Lie => {
                self.advance();
                Ok(Node::Boolean(false))
            }
            TokenKind::Alibi | TokenKind::Universe => {
                self.advance();
                Ok(Node::Null)
            }
            TokenKind::LeftBracket => self.parse_list(),
            TokenKind::LeftBrace => self.parse_map(),
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check(&TokenKind::LeftParen) {
                    self.parse_call(name)
                } else {
                    Ok(Node::Identifier(name))
                }
            }
            TokenKind::Files => self.parse_output_call(),
            other => self.error(format!("Unexpected token: {:?}", other)),
        }
    }

    fn parse_list(&mut self) -> Result<Node> {
        self.advance(); // '['
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RightBracket) {
            loop {
                elements.push(self.parse_expression()?);
                if self.matches(&TokenKind::Comma) {
                    if self.check(&TokenKind::RightBracket) {
                        return self.error("Expected expression after ','");
                    }
                } else if self.check(&TokenKind::RightBracket) {
                    break;
                } else {
                    return self.error("Expected ',' or ']'");
                }
            }
        }
        self.advance(); // ']'
        Ok(Node::List(elements))
    }

    fn parse_map(&mut self) -> Result<Node> {
        self.advance(); // '{'
        let mut entries = Vec::new();
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let key = self.parse_expression()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expression()?;
                entries.push((key, value));
                if self.matches(&TokenKind::Comma) {
                    if self.check(&TokenKind::RightBrace) {
                        return self.error("Expected expression after ','");
                    }
                } else if self.check(&TokenKind::RightBrace) {
                    break;
                } else {
                    return self.error("Expected ',' or '}'");
                }
            }
        }
        self.advance(); // '}'
        Ok(Node::Map(entries))
    }

    fn parse_call(&mut self, name: String) -> Result<Node> {
        self.advance(); // '('
        let mut args = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            args.push(self.parse_expression()?);
            if !self.matches(&TokenKind::Comma) && !self.check(&TokenKind::RightParen) {
                return self.error("Expected ',' or ')'");
            }
        }
        self.advance(); // ')'
        Ok(Node::Call { name, args })
    }

    /// `files` takes either a normal parenthesized call or a bare argument
    /// list running to the end of the line.
    fn parse_output_call(&mut self) -> Result<Node> {
        self.advance(); // 'files'
        if self.check(&TokenKind::LeftParen) {
            return self.parse_call("files".to_string());
        }
        let mut args = Vec::new();
        while !matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Eof | TokenKind::Colon | TokenKind::Dedent
        ) {
            args.push(self.parse_expression()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(Node::Call {
            name: "files".to_string(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn parse_source(source: &str) -> Result<Program> {
        parse(&tokenize(source)?)
    }

    fn statements(source: &str) -> Vec<Node> {
        parse_source(source)
            .expect("parse should succeed")
            .statements
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        assert_eq!(
            statements("2 + 3 * 4"),
            vec![Node::Binary {
                op: BinaryOp::Add,
                left: Box::new(Node::Number(Number::Int(2))),
                right: Box::new(Node::Binary {
                    op: BinaryOp::Multiply,
                    left: Box::new(Node::Number(Number::Int(3))),
                    right: Box::new(Node::Number(Number::Int(4))),
                }),
            }]
        );
    }

    #[test]
    fn test_comparison_binds_looser_than_additive() {
        assert_eq!(
            statements("1 + 2 < 4"),
            vec![Node::Binary {
                op: BinaryOp::Less,
                left: Box::new(Node::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(Node::Number(Number::Int(1))),
                    right: Box::new(Node::Number(Number::Int(2))),
                }),
                right: Box::new(Node::Number(Number::Int(4))),
            }]
        );
    }

    #[test]
    fn test_unary_is_right_recursive() {
        assert_eq!(
            statements("not not truth"),
            vec![Node::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Node::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(Node::Boolean(true)),
                }),
            }]
        );
    }

    #[test]
    fn test_literal_keyword_as_assignment_target() {
        assert_eq!(
            statements("truth = 5"),
            vec![Node::Assignment {
                name: "truth".to_string(),
                value: Box::new(Node::Number(Number::Int(5))),
            }]
        );
    }

    #[test]
    fn test_bare_output_statement() {
        assert_eq!(
            statements("files 1, 2"),
            vec![Node::Call {
                name: "files".to_string(),
                args: vec![
                    Node::Number(Number::Int(1)),
                    Node::Number(Number::Int(2)),
                ],
            }]
        );
    }

    #[test]
    fn test_parenthesized_output_call() {
        assert_eq!(
            statements("files(\"hi\")"),
            vec![Node::Call {
                name: "files".to_string(),
                args: vec![Node::Str("hi".to_string())],
            }]
        );
    }

    #[test]
    fn test_trailing_comma_in_list_rejected() {
        assert!(parse_source("[1, 2,]").is_err());
    }

    #[test]
    fn test_trailing_comma_in_map_rejected() {
        assert!(parse_source("{1: 2,}").is_err());
    }

    #[test]
    fn test_trailing_comma_in_call_args_tolerated() {
        assert_eq!(
            statements("len(x,)"),
            vec![Node::Call {
                name: "len".to_string(),
                args: vec![Node::Identifier("x".to_string())],
            }]
        );
    }

    #[test]
    fn test_map_literal() {
        assert_eq!(
            statements("{\"a\": 1, \"b\": 2}"),
            vec![Node::Map(vec![
                (Node::Str("a".to_string()), Node::Number(Number::Int(1))),
                (Node::Str("b".to_string()), Node::Number(Number::Int(2))),
            ])]
        );
    }

    #[test]
    fn test_function_def_without_params() {
        assert_eq!(
            statements("plot f():\n    suicide 1\n"),
            vec![Node::FunctionDef {
                name: "f".to_string(),
                params: vec![],
                body: vec![Node::Return(Some(Box::new(Node::Number(Number::Int(
                    1
                )))))],
            }]
        );
    }

    #[test]
    fn test_plan_is_synonym_for_plot() {
        assert_eq!(
            statements("plan f():\n    suicide\n"),
            vec![Node::FunctionDef {
                name: "f".to_string(),
                params: vec![],
                body: vec![Node::Return(None)],
            }]
        );
    }

    #[test]
    fn test_if_else() {
        assert_eq!(
            statements("if truth:\n    files 1\nelse:\n    files 2\n"),
            vec![Node::If {
                condition: Box::new(Node::Boolean(true)),
                then_body: vec![Node::Call {
                    name: "files".to_string(),
                    args: vec![Node::Number(Number::Int(1))],
                }],
                else_body: Some(vec![Node::Call {
                    name: "files".to_string(),
                    args: vec![Node::Number(Number::Int(2))],
                }]),
            }]
        );
    }

    #[test]
    fn test_elif_is_reserved_but_unusable() {
        assert!(parse_source("if truth:\n    files 1\nelif lie:\n    files 2\n").is_err());
    }

    #[test]
    fn test_block_at_end_of_input_without_dedent() {
        // Missing final newline means the tokenizer still emits DEDENT, but
        // the parser also tolerates a block cut short at EOF.
        assert!(parse_source("loop [1]:\n    files item").is_ok());
    }

    #[test]
    fn test_bare_return_before_dedent() {
        let program = parse_source("plot f():\n    suicide\nfiles 1\n")
            .expect("parse should succeed");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = "plot f():\n    loop [1, 2]:\n        files item\nf()\n";
        let first = parse_source(source).expect("parse should succeed");
        let second = parse_source(source).expect("parse should succeed");
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_block_after_colon_fails() {
        assert!(parse_source("if truth:\nfiles 1\n").is_err());
    }

    #[test]
    fn test_error_reports_unexpected_token() {
        match parse_source("1 +") {
            Err(crate::error::Error::Syntax { message, .. }) => {
                assert!(message.contains("Unexpected token"), "{}", message);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
