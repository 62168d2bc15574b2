use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::agent::tool_registry::{input_text, Tool};

pub const CALCULATOR_FAILURE: &str = "I don't know how to do that.";

/// Nesting limit for parentheses, calls, exponents and sign runs.
const MAX_DEPTH: usize = 100;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Useful for getting the result of a math expression. The input to this tool should be a valid mathematical expression that could be executed by a simple calculator."
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let expression = input_text(args);
        match evaluate(&expression) {
            Ok(value) => Ok(format_number(value)),
            Err(e) => {
                debug!(expression = %expression, "Calculator rejected expression: {}", e);
                Ok(CALCULATOR_FAILURE.to_string())
            }
        }
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

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow.
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number '{}'", text))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect::<String>().to_lowercase()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '!' => {
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
            other => bail!("unexpected character '{}'", other),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/', '%']) {
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    /// Every nested sub-expression passes through here, so this is where depth is bounded.
    fn unary(&mut self) -> Result<f64> {
        if self.depth >= MAX_DEPTH {
            bail!("expression nests deeper than {} levels", MAX_DEPTH);
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    /// Unary minus binds looser than `^`, so `-2^2` is -4.
    fn signed(&mut self) -> Result<f64> {
        match self.eat_op(&['-', '+']) {
            Some('-') => Ok(-self.unary()?),
            Some(_) => self.unary(),
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.postfix()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<f64> {
        let mut value = self.primary()?;
        while self.eat_op(&['!']).is_some() {
            value = factorial(value)?;
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expression()?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(other) => bail!("unexpected token {:?}", other),
            None => bail!("unexpected end of expression"),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => bail!("expected ',' or ')' in argument list"),
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => bail!("missing closing parenthesis"),
        }
    }
}

fn constant(name: &str) -> Result<f64> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        _ => bail!("unknown constant '{}'", name),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64> {
    let one = || -> Result<f64> {
        match args {
            [x] => Ok(*x),
            _ => bail!("{} takes exactly one argument", name),
        }
    };

    let value = match name {
        "sqrt" => one()?.sqrt(),
        "abs" => one()?.abs(),
        "ln" => one()?.ln(),
        "log" => match args {
            [x] => x.log10(),
            [x, base] => x.log(*base),
            _ => bail!("log takes one or two arguments"),
        },
        "exp" => one()?.exp(),
        "sin" => one()?.sin(),
        "cos" => one()?.cos(),
        "tan" => one()?.tan(),
        "asin" => one()?.asin(),
        "acos" => one()?.acos(),
        "atan" => one()?.atan(),
        "floor" => one()?.floor(),
        "ceil" => one()?.ceil(),
        "round" => one()?.round(),
        "pow" => match args {
            [x, y] => x.powf(*y),
            _ => bail!("pow takes two arguments"),
        },
        "min" | "max" if !args.is_empty() => {
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            args[1..].iter().copied().fold(args[0], fold)
        }
        _ => bail!("unknown function '{}'", name),
    };
    Ok(value)
}

fn factorial(n: f64) -> Result<f64> {
    if n < 0.0 || n.fract() != 0.0 || n > 170.0 {
        bail!("factorial needs a non-negative integer up to 170");
    }
    Ok((1..=n as u64).fold(1.0, |acc, k| acc * k as f64))
}

pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        bail!("empty expression");
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if parser.pos < parser.tokens.len() {
        bail!("unexpected trailing input");
    }
    Ok(value)
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}
