use serde_json::Value;

use shared_utils::template::lookup_path;

use crate::error::ConversationError;

/// Parsed condition AST. The mini-language supports `{{path}}` or bare
/// identifier paths, literals (`true|false|null|number|"string"`), `==`,
/// `!=`, `&&`, `||`, unary `!` and parentheses. The only function call
/// allowed is the whitelisted `nlp.is_ambiguous(<path>)` predicate.
/// Unknown identifiers evaluate to null, which is falsy.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    IsAmbiguous(Box<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Context-bound predicates the evaluator may consult.
pub trait ExprPredicates {
    fn is_ambiguous(&self, text: &str) -> bool;
}

pub struct NoPredicates;

impl ExprPredicates for NoPredicates {
    fn is_ambiguous(&self, _text: &str) -> bool {
        false
    }
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, ConversationError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ConversationError::Expression(format!(
                "trailing input in expression: {}",
                input
            )));
        }
        Ok(expr)
    }

    pub fn eval(&self, scope: &Value, predicates: &dyn ExprPredicates) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Var(path) => lookup_path(scope, path).cloned().unwrap_or(Value::Null),
            Expr::IsAmbiguous(inner) => {
                let value = inner.eval(scope, predicates);
                let text = match &value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                Value::Bool(predicates.is_ambiguous(&text))
            }
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(scope, predicates))),
            Expr::Eq(a, b) => Value::Bool(loose_eq(
                &a.eval(scope, predicates),
                &b.eval(scope, predicates),
            )),
            Expr::Ne(a, b) => Value::Bool(!loose_eq(
                &a.eval(scope, predicates),
                &b.eval(scope, predicates),
            )),
            Expr::And(a, b) => {
                if truthy(&a.eval(scope, predicates)) {
                    Value::Bool(truthy(&b.eval(scope, predicates)))
                } else {
                    Value::Bool(false)
                }
            }
            Expr::Or(a, b) => {
                if truthy(&a.eval(scope, predicates)) {
                    Value::Bool(true)
                } else {
                    Value::Bool(truthy(&b.eval(scope, predicates)))
                }
            }
        }
    }

    pub fn eval_bool(&self, scope: &Value, predicates: &dyn ExprPredicates) -> bool {
        truthy(&self.eval(scope, predicates))
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Not,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConversationError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' if chars.get(i + 1) == Some(&'{') => {
                // {{path}} variable reference
                let mut j = i + 2;
                let mut path = String::new();
                while j < chars.len() && !(chars[j] == '}' && chars.get(j + 1) == Some(&'}')) {
                    path.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ConversationError::Expression(
                        "unterminated {{ in expression".to_string(),
                    ));
                }
                tokens.push(Token::Ident(path.trim().to_string()));
                i = j + 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '"' => {
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j] != '"' {
                    s.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ConversationError::Expression(
                        "unterminated string in expression".to_string(),
                    ));
                }
                tokens.push(Token::Str(s));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut j = i;
                let mut raw = String::new();
                if chars[j] == '-' {
                    raw.push('-');
                    j += 1;
                }
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    raw.push(chars[j]);
                    j += 1;
                }
                let num = raw.parse::<f64>().map_err(|_| {
                    ConversationError::Expression(format!("bad number literal: {}", raw))
                })?;
                tokens.push(Token::Num(num));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i;
                let mut ident = String::new();
                while j < chars.len()
                    && (chars[j].is_ascii_alphanumeric() || chars[j] == '_' || chars[j] == '.')
                {
                    ident.push(chars[j]);
                    j += 1;
                }
                match ident.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "null" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Ident(ident)),
                }
                i = j;
            }
            other => {
                return Err(ConversationError::Expression(format!(
                    "unexpected character {:?} in expression",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ConversationError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConversationError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConversationError> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConversationError> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::EqEq) => {
                self.bump();
                let right = self.parse_primary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::NotEq) => {
                self.bump();
                let right = self.parse_primary()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConversationError> {
        match self.bump() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ConversationError::Expression(
                        "expected closing parenthesis".to_string(),
                    )),
                }
            }
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => {
                // Whitelisted function call or a plain variable path.
                if self.peek() == Some(&Token::LParen) {
                    if name != "nlp.is_ambiguous" {
                        return Err(ConversationError::Expression(format!(
                            "function {} is not allowed",
                            name
                        )));
                    }
                    self.bump();
                    let arg = self.parse_or()?;
                    match self.bump() {
                        Some(Token::RParen) => Ok(Expr::IsAmbiguous(Box::new(arg))),
                        _ => Err(ConversationError::Expression(
                            "expected closing parenthesis after function argument".to_string(),
                        )),
                    }
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(ConversationError::Expression(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}
