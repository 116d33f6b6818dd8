use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{lex, Token, TokenKind};
use super::EvalError;
use crate::value::Value;

/// Guards against formulas nested deeply enough to overflow the stack.
const MAX_NESTING: usize = 64;

const CONDITIONAL_BP: u8 = 1;
const NOT_OPERAND_BP: u8 = 7;
const UNARY_OPERAND_BP: u8 = 15;
const POSTFIX_BP: u8 = 20;

const KEYWORDS: &[&str] = &["and", "or", "not", "if", "else", "in", "None", "True", "False"];

pub fn parse(src: &str) -> Result<Expr, EvalError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression(0)?;
    parser.expect(&TokenKind::Eof)?;
    Ok(expr)
}

fn infix_binding_power(op: BinaryOp) -> (u8, u8) {
    match op {
        BinaryOp::Or => (3, 4),
        BinaryOp::And => (5, 6),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            (9, 10)
        }
        BinaryOp::Add | BinaryOp::Sub => (11, 12),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => (13, 14),
        // right associative, and the right operand may carry a unary sign: 2 ** -1
        BinaryOp::Pow => (17, UNARY_OPERAND_BP),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            message: message.into(),
            offset: self.peek().offset,
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), EvalError> {
        if &self.peek().kind == kind {
            self.next();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                describe(kind),
                describe(&self.peek().kind)
            )))
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<Expr, EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("expression nesting exceeds {} levels", MAX_NESTING)));
        }
        let result = self.parse_expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_prefix()?;
        let mut chaining = false;

        loop {
            match &self.peek().kind {
                TokenKind::LParen if POSTFIX_BP >= min_bp => {
                    lhs = self.parse_call(lhs)?;
                    chaining = false;
                    continue;
                }
                TokenKind::Dot if POSTFIX_BP >= min_bp => {
                    self.next();
                    let name = match self.next().kind {
                        TokenKind::Ident(name) => name,
                        other => {
                            return Err(self.error(format!(
                                "expected attribute name, found {}",
                                describe(&other)
                            )))
                        }
                    };
                    lhs = Expr::Attribute {
                        target: Box::new(lhs),
                        name,
                    };
                    chaining = false;
                    continue;
                }
                TokenKind::LBracket if POSTFIX_BP >= min_bp => {
                    self.next();
                    let index = self.parse_expression(0)?;
                    self.expect(&TokenKind::RBracket)?;
                    lhs = Expr::Index {
                        target: Box::new(lhs),
                        index: Box::new(index),
                    };
                    chaining = false;
                    continue;
                }
                TokenKind::Ident(name) if name == "if" => {
                    if CONDITIONAL_BP < min_bp {
                        break;
                    }
                    self.next();
                    let condition = self.parse_expression(CONDITIONAL_BP + 1)?;
                    if !self.is_keyword("else") {
                        return Err(self.error("expected 'else' in conditional expression"));
                    }
                    self.next();
                    let otherwise = self.parse_expression(CONDITIONAL_BP)?;
                    lhs = Expr::Conditional {
                        condition: Box::new(condition),
                        then: Box::new(lhs),
                        otherwise: Box::new(otherwise),
                    };
                    chaining = false;
                    continue;
                }
                _ => {}
            }

            let Some(op) = self.peek_binary_op() else {
                break;
            };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expression(r_bp)?;

            if op.is_comparison() {
                lhs = match lhs {
                    Expr::Compare { first, mut rest } if chaining => {
                        rest.push((op, rhs));
                        Expr::Compare { first, rest }
                    }
                    other => Expr::Compare {
                        first: Box::new(other),
                        rest: vec![(op, rhs)],
                    },
                };
                chaining = true;
            } else {
                lhs = Expr::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                };
                chaining = false;
            }
        }

        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match &self.peek().kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::StarStar => BinaryOp::Pow,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Ident(name) if name == "and" => BinaryOp::And,
            TokenKind::Ident(name) if name == "or" => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    fn parse_prefix(&mut self) -> Result<Expr, EvalError> {
        let token = self.next();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Minus | TokenKind::Plus => {
                let op = if token.kind == TokenKind::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Pos
                };
                let operand = self.parse_expression(UNARY_OPERAND_BP)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            TokenKind::LParen => {
                let inner = self.parse_expression(0)?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let items = self.parse_arguments(&TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "None" => Ok(Expr::Literal(Value::Null)),
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "not" => {
                    let operand = self.parse_expression(NOT_OPERAND_BP)?;
                    Ok(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    })
                }
                keyword if KEYWORDS.contains(&keyword) => Err(EvalError::Syntax {
                    message: format!("unexpected keyword '{}'", keyword),
                    offset: token.offset,
                }),
                _ => Ok(Expr::Name(name)),
            },
            other => Err(EvalError::Syntax {
                message: format!("unexpected {}", describe(&other)),
                offset: token.offset,
            }),
        }
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, EvalError> {
        let Expr::Name(function) = callee else {
            return Err(self.error("only named functions can be called"));
        };
        self.next();
        let args = self.parse_arguments(&TokenKind::RParen)?;
        Ok(Expr::Call { function, args })
    }

    /// Comma separated expressions up to `close`, which is consumed. A trailing comma is accepted.
    fn parse_arguments(&mut self, close: &TokenKind) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        loop {
            if &self.peek().kind == close {
                self.next();
                return Ok(items);
            }
            items.push(self.parse_expression(0)?);
            if self.peek().kind == TokenKind::Comma {
                self.next();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(s) => format!("string '{}'", s),
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::StarStar => "'**'".to_string(),
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::Percent => "'%'".to_string(),
        TokenKind::EqEq => "'=='".to_string(),
        TokenKind::Ne => "'!='".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Ge => "'>='".to_string(),
        TokenKind::Eof => "end of expression".to_string(),
    }
}
