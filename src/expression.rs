//! Binding expression parser.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! pipe        := conditional ( '|' IDENT ( ':' conditional )* )*
//! conditional := or ( '?' pipe ':' pipe )?
//! or          := and ( '||' and )*
//! and         := equality ( '&&' equality )*
//! equality    := additive ( ( '==' | '!=' | '===' | '!==' ) additive )*
//! additive    := unary ( '+' unary )*
//! unary       := '!' unary | postfix
//! postfix     := primary ( '.' IDENT ( '(' args ')' )? )*
//! primary     := literal | IDENT ( '(' args ')' )? | '(' pipe ')' | array | map
//! ```
//!
//! Bare identifiers read from the component instance.

use thiserror::Error;

use crate::output::ast::{BinaryOp, Literal};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at column {column} in [{input}]")]
pub struct ExpressionError {
    pub message: String,
    pub column: usize,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingExpr {
    Literal(Literal),
    /// `receiver == None` reads from the component instance.
    PropertyRead {
        receiver: Option<Box<BindingExpr>>,
        name: String,
    },
    MethodCall {
        receiver: Option<Box<BindingExpr>>,
        name: String,
        args: Vec<BindingExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<BindingExpr>,
        rhs: Box<BindingExpr>,
    },
    Not(Box<BindingExpr>),
    Conditional {
        condition: Box<BindingExpr>,
        true_exp: Box<BindingExpr>,
        false_exp: Box<BindingExpr>,
    },
    Pipe {
        exp: Box<BindingExpr>,
        name: String,
        args: Vec<BindingExpr>,
    },
    LiteralArray(Vec<BindingExpr>),
    LiteralMap(Vec<(String, BindingExpr)>),
}

impl BindingExpr {
    /// Names of all pipes used, in source order.
    pub fn pipe_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_pipes(&mut names);
        names
    }

    fn collect_pipes(&self, out: &mut Vec<String>) {
        match self {
            BindingExpr::Literal(_) => {}
            BindingExpr::PropertyRead { receiver, .. } => {
                if let Some(r) = receiver {
                    r.collect_pipes(out);
                }
            }
            BindingExpr::MethodCall { receiver, args, .. } => {
                if let Some(r) = receiver {
                    r.collect_pipes(out);
                }
                args.iter().for_each(|a| a.collect_pipes(out));
            }
            BindingExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_pipes(out);
                rhs.collect_pipes(out);
            }
            BindingExpr::Not(e) => e.collect_pipes(out),
            BindingExpr::Conditional {
                condition,
                true_exp,
                false_exp,
            } => {
                condition.collect_pipes(out);
                true_exp.collect_pipes(out);
                false_exp.collect_pipes(out);
            }
            BindingExpr::Pipe { exp, name, args } => {
                exp.collect_pipes(out);
                out.push(name.clone());
                args.iter().for_each(|a| a.collect_pipes(out));
            }
            BindingExpr::LiteralArray(items) => items.iter().for_each(|i| i.collect_pipes(out)),
            BindingExpr::LiteralMap(entries) => {
                entries.iter().for_each(|(_, v)| v.collect_pipes(out))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Identifier(String),
    Number(f64),
    Str(String),
    Operator(&'static str),
    Char(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    column: usize,
}

const OPERATORS: &[&str] = &["===", "!==", "==", "!=", "&&", "||", "!", "+", "|", "?", ":"];

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            tokens.push(Token {
                kind: TokenKind::Identifier(ident),
                column: start,
            });
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| ExpressionError {
                message: format!("Invalid number '{}'", text),
                column: start,
                input: input.to_string(),
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                column: start,
            });
        } else if c == '\'' || c == '"' {
            i += 1;
            let mut value = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ExpressionError {
                            message: "Unterminated quote".to_string(),
                            column: start,
                            input: input.to_string(),
                        })
                    }
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            value.push(match next {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == c => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        value.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                column: start,
            });
        } else if let Some(op) = OPERATORS.iter().find(|op| {
            let len = op.chars().count();
            i + len <= chars.len() && chars[i..i + len].iter().copied().eq(op.chars())
        }) {
            i += op.chars().count();
            tokens.push(Token {
                kind: TokenKind::Operator(*op),
                column: start,
            });
        } else if "().,[]{}".contains(c) {
            i += 1;
            tokens.push(Token {
                kind: TokenKind::Char(c),
                column: start,
            });
        } else {
            return Err(ExpressionError {
                message: format!("Unexpected character [{}]", c),
                column: start,
                input: input.to_string(),
            });
        }
    }
    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    index: usize,
}

/// Parse a property binding, interpolation part or `*if` condition.
pub fn parse_binding(input: &str) -> Result<BindingExpr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        index: 0,
    };
    if parser.tokens.is_empty() {
        return Err(parser.error("Blank expressions are not allowed"));
    }
    let expr = parser.parse_pipe()?;
    if parser.index < parser.tokens.len() {
        return Err(parser.error("Unexpected token"));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ExpressionError {
        let column = self
            .tokens
            .get(self.index)
            .map(|t| t.column)
            .unwrap_or(self.input.chars().count());
        ExpressionError {
            message: message.to_string(),
            column,
            input: self.input.to_string(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.index).map(|t| &t.kind)
    }

    fn optional_operator(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(TokenKind::Operator(o)) if *o == op) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn optional_char(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(TokenKind::Char(ch)) if *ch == c) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, c: char) -> Result<(), ExpressionError> {
        if self.optional_char(c) {
            Ok(())
        } else {
            Err(self.error(&format!("Missing expected {}", c)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ExpressionError> {
        match self.peek().cloned() {
            Some(TokenKind::Identifier(name)) => {
                self.index += 1;
                Ok(name)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    fn parse_pipe(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_conditional()?;
        while self.optional_operator("|") {
            let name = self.expect_identifier()?;
            let mut args = Vec::new();
            while self.optional_operator(":") {
                args.push(self.parse_conditional()?);
            }
            result = BindingExpr::Pipe {
                exp: Box::new(result),
                name,
                args,
            };
        }
        Ok(result)
    }

    fn parse_conditional(&mut self) -> Result<BindingExpr, ExpressionError> {
        let condition = self.parse_or()?;
        if !self.optional_operator("?") {
            return Ok(condition);
        }
        let true_exp = self.parse_pipe()?;
        if !self.optional_operator(":") {
            return Err(self.error("Conditional expression requires all 3 expressions"));
        }
        let false_exp = self.parse_pipe()?;
        Ok(BindingExpr::Conditional {
            condition: Box::new(condition),
            true_exp: Box::new(true_exp),
            false_exp: Box::new(false_exp),
        })
    }

    fn parse_or(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_and()?;
        while self.optional_operator("||") {
            let rhs = self.parse_and()?;
            result = binary(BinaryOp::Or, result, rhs);
        }
        Ok(result)
    }

    fn parse_and(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_equality()?;
        while self.optional_operator("&&") {
            let rhs = self.parse_equality()?;
            result = binary(BinaryOp::And, result, rhs);
        }
        Ok(result)
    }

    fn parse_equality(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_additive()?;
        loop {
            let op = if self.optional_operator("==") || self.optional_operator("===") {
                BinaryOp::Equals
            } else if self.optional_operator("!=") || self.optional_operator("!==") {
                BinaryOp::NotEquals
            } else {
                return Ok(result);
            };
            let rhs = self.parse_additive()?;
            result = binary(op, result, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_unary()?;
        while self.optional_operator("+") {
            let rhs = self.parse_unary()?;
            result = binary(BinaryOp::Plus, result, rhs);
        }
        Ok(result)
    }

    fn parse_unary(&mut self) -> Result<BindingExpr, ExpressionError> {
        if self.optional_operator("!") {
            return Ok(BindingExpr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<BindingExpr, ExpressionError> {
        let mut result = self.parse_primary()?;
        while self.optional_char('.') {
            let name = self.expect_identifier()?;
            result = self.access_member(Some(Box::new(result)), name)?;
        }
        Ok(result)
    }

    fn access_member(
        &mut self,
        receiver: Option<Box<BindingExpr>>,
        name: String,
    ) -> Result<BindingExpr, ExpressionError> {
        if self.optional_char('(') {
            let args = self.parse_call_arguments()?;
            Ok(BindingExpr::MethodCall {
                receiver,
                name,
                args,
            })
        } else {
            Ok(BindingExpr::PropertyRead { receiver, name })
        }
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<BindingExpr>, ExpressionError> {
        let mut args = Vec::new();
        if self.optional_char(')') {
            return Ok(args);
        }
        loop {
            args.push(self.parse_pipe()?);
            if !self.optional_char(',') {
                break;
            }
        }
        self.expect_char(')')?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<BindingExpr, ExpressionError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("Unexpected end of expression"));
        };
        match token {
            TokenKind::Char('(') => {
                self.index += 1;
                let inner = self.parse_pipe()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            TokenKind::Char('[') => {
                self.index += 1;
                let mut items = Vec::new();
                if !self.optional_char(']') {
                    loop {
                        items.push(self.parse_pipe()?);
                        if !self.optional_char(',') {
                            break;
                        }
                    }
                    self.expect_char(']')?;
                }
                Ok(BindingExpr::LiteralArray(items))
            }
            TokenKind::Char('{') => {
                self.index += 1;
                let mut entries = Vec::new();
                if !self.optional_char('}') {
                    loop {
                        let key = match self.peek().cloned() {
                            Some(TokenKind::Identifier(k)) | Some(TokenKind::Str(k)) => {
                                self.index += 1;
                                k
                            }
                            _ => return Err(self.error("Expected map key")),
                        };
                        if !self.optional_operator(":") {
                            return Err(self.error("Missing expected :"));
                        }
                        entries.push((key, self.parse_pipe()?));
                        if !self.optional_char(',') {
                            break;
                        }
                    }
                    self.expect_char('}')?;
                }
                Ok(BindingExpr::LiteralMap(entries))
            }
            TokenKind::Number(n) => {
                self.index += 1;
                Ok(BindingExpr::Literal(Literal::Number(n)))
            }
            TokenKind::Str(s) => {
                self.index += 1;
                Ok(BindingExpr::Literal(Literal::String(s)))
            }
            TokenKind::Identifier(name) => {
                self.index += 1;
                match name.as_str() {
                    "null" | "undefined" => Ok(BindingExpr::Literal(Literal::Null)),
                    "true" => Ok(BindingExpr::Literal(Literal::Bool(true))),
                    "false" => Ok(BindingExpr::Literal(Literal::Bool(false))),
                    _ => self.access_member(None, name),
                }
            }
            _ => Err(self.error("Unexpected token")),
        }
    }
}

fn binary(op: BinaryOp, lhs: BindingExpr, rhs: BindingExpr) -> BindingExpr {
    BindingExpr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Text split around `{{ }}`: `strings.len() == expressions.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitInterpolation {
    pub strings: Vec<String>,
    pub expressions: Vec<String>,
}

/// `None` when the text contains no interpolation.
pub fn split_interpolation(input: &str) -> Result<Option<SplitInterpolation>, ExpressionError> {
    if !input.contains("{{") {
        return Ok(None);
    }
    let mut strings = Vec::new();
    let mut expressions = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(ExpressionError {
                message: "Unterminated interpolation".to_string(),
                column: input.len() - rest.len() + start,
                input: input.to_string(),
            });
        };
        strings.push(rest[..start].to_string());
        expressions.push(after[..end].trim().to_string());
        rest = &after[end + 2..];
    }
    strings.push(rest.to_string());
    Ok(Some(SplitInterpolation {
        strings,
        expressions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(name: &str) -> BindingExpr {
        BindingExpr::PropertyRead {
            receiver: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_property_paths_and_calls() {
        assert_eq!(
            parse_binding("user.name").unwrap(),
            BindingExpr::PropertyRead {
                receiver: Some(Box::new(read("user"))),
                name: "name".to_string()
            }
        );
        assert!(matches!(
            parse_binding("greet('x', count)").unwrap(),
            BindingExpr::MethodCall { receiver: None, ref args, .. } if args.len() == 2
        ));
    }

    #[test]
    fn test_precedence() {
        let expr = parse_binding("!a && b || c == 'x'").unwrap();
        match expr {
            BindingExpr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                assert!(matches!(*lhs, BindingExpr::Binary { op: BinaryOp::And, .. }));
                assert!(matches!(*rhs, BindingExpr::Binary { op: BinaryOp::Equals, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pipes_with_arguments() {
        let expr = parse_binding("title | truncate:10:'...' | uppercase").unwrap();
        assert_eq!(expr.pipe_names(), vec!["truncate", "uppercase"]);
        match expr {
            BindingExpr::Pipe { name, exp, .. } => {
                assert_eq!(name, "uppercase");
                assert!(matches!(*exp, BindingExpr::Pipe { ref args, .. } if args.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conditional_and_literals() {
        let expr = parse_binding("open ? [1, 'two'] : {a: null}").unwrap();
        assert!(matches!(expr, BindingExpr::Conditional { .. }));
    }

    #[test]
    fn test_errors() {
        assert!(parse_binding("").is_err());
        assert!(parse_binding("a +").is_err());
        assert!(parse_binding("a ? b").is_err());
        let err = parse_binding("a # b").unwrap_err();
        assert_eq!(err.column, 2);
    }

    #[test]
    fn test_split_interpolation() {
        assert_eq!(split_interpolation("plain").unwrap(), None);
        let split = split_interpolation("Hi {{ name }}, you have {{count}}!").unwrap().unwrap();
        assert_eq!(split.strings, vec!["Hi ", ", you have ", "!"]);
        assert_eq!(split.expressions, vec!["name", "count"]);
        assert!(split_interpolation("oops {{ name").is_err());
    }
}
