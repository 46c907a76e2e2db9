//! Arithmetic over plain expressions (`5 * (3 + 2)`) and sums of number lists (`[1, 2, 3]`).

use super::{ToolFuture, ToolInfo, ToolOutput, ToolTrait};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{v:.1}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalcError {
    DivisionByZero,
    Syntax,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Pow,
}

fn apply(op: Op, lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    use Number::{Float, Int};

    let int_result = match (op, lhs, rhs) {
        (Op::Add, Int(a), Int(b)) => a.checked_add(b),
        (Op::Sub, Int(a), Int(b)) => a.checked_sub(b),
        (Op::Mul, Int(a), Int(b)) => a.checked_mul(b),
        (Op::Pow, Int(a), Int(b)) if b >= 0 => u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
        (Op::FloorDiv, Int(_), Int(0)) => return Err(CalcError::DivisionByZero),
        (Op::FloorDiv, Int(a), Int(b)) => a.checked_div(b).map(|quotient| {
            if a % b != 0 && ((a < 0) != (b < 0)) { quotient - 1 } else { quotient }
        }),
        _ => None,
    };
    if let Some(value) = int_result {
        return Ok(Int(value));
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let value = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Pow => a.powf(b),
        Op::Div | Op::FloorDiv if b == 0.0 => return Err(CalcError::DivisionByZero),
        Op::Div => a / b,
        Op::FloorDiv => (a / b).floor(),
    };
    Ok(Float(value))
}

/// Nested parentheses, signs and exponents deeper than this are a syntax error.
const MAX_NESTING_DEPTH: usize = 256;

/// Recursive descent with the usual precedence: `**` over unary sign over `* / //` over `+ -`.
struct Evaluator<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            chars: expression.chars().peekable(),
            depth: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().copied()
    }

    fn finish(mut self) -> Result<Number, CalcError> {
        let value = self.expression()?;
        match self.peek() {
            None => Ok(value),
            Some(_) => Err(CalcError::Syntax),
        }
    }

    fn expression(&mut self) -> Result<Number, CalcError> {
        let mut value = self.term()?;
        loop {
            let op = match self.peek() {
                Some('+') => Op::Add,
                Some('-') => Op::Sub,
                _ => return Ok(value),
            };
            self.chars.next();
            let rhs = self.term()?;
            value = apply(op, value, rhs)?;
        }
    }

    fn term(&mut self) -> Result<Number, CalcError> {
        let mut value = self.unary()?;
        loop {
            let op = match self.peek() {
                Some('*') => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'*').is_some() {
                        // `**` belongs to `power`, so two stars here means a stray operator
                        return Err(CalcError::Syntax);
                    }
                    Op::Mul
                }
                Some('/') => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'/').is_some() { Op::FloorDiv } else { Op::Div }
                }
                _ => return Ok(value),
            };
            let rhs = self.unary()?;
            value = apply(op, value, rhs)?;
        }
    }

    // Every recursive path passes through here.
    fn unary(&mut self) -> Result<Number, CalcError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CalcError::Syntax);
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<Number, CalcError> {
        match self.peek() {
            Some('-') => {
                self.chars.next();
                let value = self.unary()?;
                apply(Op::Sub, Number::Int(0), value)
            }
            Some('+') => {
                self.chars.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, CalcError> {
        let base = self.atom()?;
        self.skip_whitespace();

        let mut lookahead = self.chars.clone();
        if lookahead.next() == Some('*') && lookahead.next() == Some('*') {
            self.chars.next();
            self.chars.next();
            let exponent = self.unary()?;
            return apply(Op::Pow, base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, CalcError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expression()?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(value)
                    }
                    _ => Err(CalcError::Syntax),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            _ => Err(CalcError::Syntax),
        }
    }

    fn number(&mut self) -> Result<Number, CalcError> {
        let mut literal = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
            literal.push(c);
        }
        parse_number(&literal).ok_or(CalcError::Syntax)
    }
}

pub(crate) fn parse_number(literal: &str) -> Option<Number> {
    if literal.is_empty() || literal == "." || literal == "-" {
        return None;
    }
    if let Ok(value) = literal.parse::<i64>() {
        return Some(Number::Int(value));
    }
    if literal.chars().filter(|c| *c == '.').count() > 1 || literal.contains(['e', 'E', 'i', 'n', 'N']) {
        return None;
    }
    literal.parse::<f64>().ok().map(Number::Float)
}

pub fn evaluate(expression: &str) -> Result<Number, CalcError> {
    Evaluator::new(expression).finish()
}

/// Sums `[a, b, ...]`. `None` when an element is not a number.
pub fn sum_list(list: &str) -> Option<Number> {
    let inner = list.strip_prefix('[')?.strip_suffix(']')?;
    let mut elements: Vec<&str> = inner.split(',').map(str::trim).collect();
    if elements.last().is_some_and(|last| last.is_empty()) {
        elements.pop();
    }

    let mut total = Number::Int(0);
    for element in elements {
        let value = parse_number(element)?;
        total = apply(Op::Add, total, value).ok()?;
    }
    Some(total)
}

fn is_expression_charset(expression: &str) -> bool {
    expression
        .chars()
        .all(|c| c.is_ascii_digit() || "+-*/(). \t\n\r".contains(c))
        && expression.chars().any(|c| c.is_ascii_digit())
}

pub fn calculate(expression: &str) -> ToolOutput {
    let expression = expression.trim();

    if expression.starts_with('[') && expression.ends_with(']') {
        return match sum_list(expression) {
            Some(total) => ToolOutput::Success(format!("Result: {total}")),
            None => ToolOutput::Failure("Error: Invalid list format or non-numerical content in list.".to_string()),
        };
    }

    if !is_expression_charset(expression) {
        return ToolOutput::Failure(
            "Error: Invalid characters/structure. Use numbers, operators (+,-,*,/), parentheses, or list string like '[1,2,3]'."
                .to_string(),
        );
    }

    match evaluate(expression) {
        Ok(value) => ToolOutput::Success(format!("Result: {value}")),
        Err(CalcError::DivisionByZero) => ToolOutput::Failure("Error: Division by zero.".to_string()),
        Err(CalcError::Syntax) => ToolOutput::Failure(format!("Error: Invalid syntax in '{expression}'.")),
    }
}

#[derive(Debug, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl ToolTrait for CalculatorTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "CalculatorTool".to_string(),
            description: "Evaluates mathematical expressions (e.g., '2+2*4') or sums lists of numbers provided as a string (e.g., '[10000, 12000]')."
                .to_string(),
        }
    }

    fn execute(&self, input: String) -> ToolFuture {
        Box::pin(async move { Ok(calculate(&input)) })
    }
}
