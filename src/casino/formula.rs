//! Arithmetic for casino feature formulas
//!
//! Grammar:
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | atom
//! atom   := number | ident | ident '(' args ')' | '(' expr ')'
//! ```
//! Functions: `min(a, b, ...)`, `max(a, b, ...)`, `percent(x)` (= x / 100).

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("expected '{0}'")]
    Expected(char),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("wrong number of arguments for '{0}'")]
    Arity(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("trailing input")]
    Trailing,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse().map_err(|_| FormulaError::UnexpectedChar(c))?;
                tokens.push(Token::Num(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(FormulaError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a HashMap<String, f64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, want: Token, c: char) -> Result<(), FormulaError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            _ => Err(FormulaError::Expected(c)),
        }
    }

    fn expr(&mut self) -> Result<f64, FormulaError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, FormulaError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = if op == '*' {
                value * rhs
            } else {
                if rhs == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                value / rhs
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, FormulaError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, FormulaError> {
        match self.next().ok_or(FormulaError::UnexpectedEnd)? {
            Token::Num(n) => Ok(n),
            Token::LParen => {
                let value = self.expr()?;
                self.expect(Token::RParen, ')')?;
                Ok(value)
            }
            Token::Ident(name) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let args = self.args()?;
                    call(&name, &args)
                } else {
                    self.vars
                        .get(&name.to_lowercase())
                        .copied()
                        .ok_or(FormulaError::UnknownVariable(name))
                }
            }
            Token::Op(c) => Err(FormulaError::UnexpectedChar(c)),
            Token::RParen => Err(FormulaError::UnexpectedChar(')')),
            Token::Comma => Err(FormulaError::UnexpectedChar(',')),
        }
    }

    fn args(&mut self) -> Result<Vec<f64>, FormulaError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(FormulaError::Expected(')')),
            }
        }
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, FormulaError> {
    match name.to_lowercase().as_str() {
        "min" if !args.is_empty() => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" if !args.is_empty() => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "percent" if args.len() == 1 => Ok(args[0] / 100.0),
        "min" | "max" | "percent" => Err(FormulaError::Arity(name.to_string())),
        _ => Err(FormulaError::UnknownFunction(name.to_string())),
    }
}

/// Evaluate `formula` with the given variables (names are case-insensitive)
pub fn evaluate(formula: &str, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    let vars: HashMap<String, f64> = vars.iter().map(|(k, v)| (k.to_lowercase(), *v)).collect();
    let mut parser = Parser {
        tokens: tokenize(formula)?,
        pos: 0,
        vars: &vars,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(FormulaError::Trailing);
    }
    Ok(value)
}

/// Shorthand for formulas over `wager` only
pub fn evaluate_wager(formula: &str, wager: f64) -> Result<f64, FormulaError> {
    let vars = HashMap::from([("wager".to_string(), wager)]);
    evaluate(formula, &vars)
}
