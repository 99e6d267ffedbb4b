//! In-process arithmetic evaluator.
//!
//! Sandboxed by construction: a recursive-descent parser over a fixed
//! grammar of numbers, operators, and a couple of math functions. No
//! script runtime, no process execution.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::api::ToolDefinition;
use crate::tools::{Tool, ToolError};

pub struct Calculator;

#[derive(Deserialize)]
struct Arguments {
    expression: String,
}

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "calculator",
            "Evaluates an arithmetic expression exactly (operators + - * / % ^, \
             parentheses, sqrt and abs, constants pi and e).",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The arithmetic expression to evaluate"
                    }
                },
                "required": ["expression"]
            }),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String, ToolError> {
        let args: Arguments = serde_json::from_str(arguments)
            .map_err(|err| ToolError(format!("invalid arguments: {err}")))?;
        let value = evaluate(&args.expression).map_err(ToolError)?;
        Ok(format_number(value))
    }
}

pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expression(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input in '{expression}'"));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = number
                    .parse::<f64>()
                    .map_err(|_| format!("malformed number '{number}'"))?;
                tokens.push(Token::Number(parsed));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident.to_ascii_lowercase()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Precedence climbing. `^` binds tightest and is right-associative.
    fn expression(&mut self, min_precedence: u8) -> Result<f64, String> {
        let mut left = self.primary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            let precedence = match op {
                '+' | '-' => 1,
                '*' | '/' | '%' => 2,
                '^' => 3,
                _ => break,
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            let next_min = if op == '^' { precedence } else { precedence + 1 };
            let right = self.expression(next_min)?;
            left = match op {
                '+' => left + right,
                '-' => left - right,
                '*' => left * right,
                '/' => {
                    if right == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    left / right
                }
                '%' => {
                    if right == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    left % right
                }
                '^' => left.powf(right),
                _ => unreachable!(),
            };
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Op('-')) => Ok(-self.primary()?),
            Some(Token::Op('+')) => self.primary(),
            Some(Token::LParen) => {
                let value = self.expression(0)?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                "sqrt" | "abs" => {
                    match self.next() {
                        Some(Token::LParen) => {}
                        _ => return Err(format!("expected '(' after {name}")),
                    }
                    let argument = self.expression(0)?;
                    self.expect_rparen()?;
                    match name.as_str() {
                        "sqrt" => {
                            if argument < 0.0 {
                                Err("square root of a negative number".to_string())
                            } else {
                                Ok(argument.sqrt())
                            }
                        }
                        _ => Ok(argument.abs()),
                    }
                }
                other => Err(format!("unknown identifier '{other}'")),
            },
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("missing closing parenthesis".to_string()),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}
