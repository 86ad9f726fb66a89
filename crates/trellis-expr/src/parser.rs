//! Parser for `${ … }` interpolated strings and the expression grammar used
//! inside them.
//!
//! ```text
//! expr    := or ( "?" expr ":" expr )?
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := cmp ( ("==" | "!=") cmp )*
//! cmp     := add ( ("<" | "<=" | ">" | ">=") add )*
//! add     := mul ( ("+" | "-") mul )*
//! mul     := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("-" | "!") unary | postfix
//! postfix := primary ( "." ident | "[" expr "]" )*
//! primary := number | string | "true" | "false" | "null"
//!          | ident "(" args ")" | ident | "(" expr ")"
//!          | "[" items "]" | "{" entries "}"
//! ```

use crate::ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
use crate::error::ParseError;
use crate::value::Value;

/// Parse a string that may contain `${ expr }` interpolations.
///
/// A string consisting of exactly one interpolation yields the inner
/// expression itself, so `"${var.count}"` evaluates to a number rather than
/// its string form. `$${` produces a literal `${`.
pub fn parse_template(src: &str) -> Result<Expr, ParseError> {
  let mut parser = Parser::new(src);
  let mut parts = Vec::new();
  let mut literal = String::new();

  while let Some(c) = parser.peek() {
    if parser.starts_with("$${") {
      literal.push_str("${");
      parser.pos += 3;
    } else if parser.starts_with("${") {
      parser.pos += 2;
      let expr = parser.expression()?;
      parser.expect('}')?;
      if !literal.is_empty() {
        parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
      }
      parts.push(TemplatePart::Interpolation(expr));
    } else {
      literal.push(c);
      parser.pos += 1;
    }
  }
  if !literal.is_empty() {
    parts.push(TemplatePart::Literal(literal));
  }

  let mut iter = parts.into_iter();
  match (iter.next(), iter.next()) {
    (None, _) => Ok(Expr::Literal(Value::String(String::new()))),
    (Some(TemplatePart::Interpolation(expr)), None) => Ok(expr),
    (Some(TemplatePart::Literal(s)), None) => Ok(Expr::Literal(Value::String(s))),
    (Some(first), Some(second)) => {
      let mut parts = vec![first, second];
      parts.extend(iter);
      Ok(Expr::Template(parts))
    }
  }
}

/// Parse a bare expression (no surrounding `${ }`).
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
  let mut parser = Parser::new(src);
  let expr = parser.expression()?;
  parser.skip_ws();
  if parser.peek().is_some() {
    return Err(parser.error("unexpected trailing input"));
  }
  Ok(expr)
}

/// Convert a JSON definition value into an expression. Strings are parsed as
/// templates; arrays and objects become list and map constructors.
pub fn parse_json(value: &serde_json::Value) -> Result<Expr, ParseError> {
  match value {
    serde_json::Value::String(s) => parse_template(s),
    serde_json::Value::Array(items) => Ok(Expr::List(
      items.iter().map(parse_json).collect::<Result<_, _>>()?,
    )),
    serde_json::Value::Object(entries) => Ok(Expr::Map(
      entries
        .iter()
        .map(|(k, v)| parse_json(v).map(|e| (k.clone(), e)))
        .collect::<Result<_, _>>()?,
    )),
    other => Ok(Expr::Literal(Value::from(other.clone()))),
  }
}

struct Parser<'a> {
  src: &'a str,
  chars: Vec<char>,
  pos: usize,
}

impl<'a> Parser<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src,
      chars: src.chars().collect(),
      pos: 0,
    }
  }

  fn error(&self, message: impl Into<String>) -> ParseError {
    ParseError {
      source_text: self.src.to_string(),
      offset: self.pos,
      message: message.into(),
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<char> {
    self.chars.get(self.pos + offset).copied()
  }

  fn starts_with(&self, s: &str) -> bool {
    s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
  }

  fn skip_ws(&mut self) {
    while self.peek().is_some_and(char::is_whitespace) {
      self.pos += 1;
    }
  }

  /// Consume `token` (after whitespace) if present.
  fn eat(&mut self, token: &str) -> bool {
    self.skip_ws();
    if self.starts_with(token) {
      self.pos += token.chars().count();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, c: char) -> Result<(), ParseError> {
    self.skip_ws();
    if self.peek() == Some(c) {
      self.pos += 1;
      Ok(())
    } else {
      Err(self.error(format!("expected '{}'", c)))
    }
  }

  fn expression(&mut self) -> Result<Expr, ParseError> {
    let condition = self.or()?;
    if self.eat("?") {
      let then = self.expression()?;
      self.expect(':')?;
      let otherwise = self.expression()?;
      return Ok(Expr::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
      });
    }
    Ok(condition)
  }

  fn binary_level(
    &mut self,
    ops: &[(&str, BinaryOp)],
    next: fn(&mut Self) -> Result<Expr, ParseError>,
  ) -> Result<Expr, ParseError> {
    let mut lhs = next(self)?;
    'outer: loop {
      for (token, op) in ops {
        if self.eat(token) {
          let rhs = next(self)?;
          lhs = Expr::Binary {
            op: *op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
          };
          continue 'outer;
        }
      }
      return Ok(lhs);
    }
  }

  fn or(&mut self) -> Result<Expr, ParseError> {
    self.binary_level(&[("||", BinaryOp::Or)], Self::and)
  }

  fn and(&mut self) -> Result<Expr, ParseError> {
    self.binary_level(&[("&&", BinaryOp::And)], Self::equality)
  }

  fn equality(&mut self) -> Result<Expr, ParseError> {
    self.binary_level(
      &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
      Self::comparison,
    )
  }

  fn comparison(&mut self) -> Result<Expr, ParseError> {
    // Two-character operators must be tried first.
    self.binary_level(
      &[
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
      ],
      Self::additive,
    )
  }

  fn additive(&mut self) -> Result<Expr, ParseError> {
    self.binary_level(
      &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
      Self::multiplicative,
    )
  }

  fn multiplicative(&mut self) -> Result<Expr, ParseError> {
    self.binary_level(
      &[
        ("*", BinaryOp::Mul),
        ("/", BinaryOp::Div),
        ("%", BinaryOp::Rem),
      ],
      Self::unary,
    )
  }

  fn unary(&mut self) -> Result<Expr, ParseError> {
    self.skip_ws();
    let op = match self.peek() {
      Some('-') => UnaryOp::Negate,
      Some('!') if self.peek_at(1) != Some('=') => UnaryOp::Not,
      _ => return self.postfix(),
    };
    self.pos += 1;
    let operand = self.unary()?;
    Ok(Expr::Unary {
      op,
      operand: Box::new(operand),
    })
  }

  fn postfix(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.primary()?;
    loop {
      self.skip_ws();
      match self.peek() {
        Some('.') if self.peek_at(1).is_some_and(is_ident_start) => {
          self.pos += 1;
          let name = self.identifier()?;
          expr = expr.get_attr(name);
        }
        Some('[') => {
          self.pos += 1;
          let key = self.expression()?;
          self.expect(']')?;
          expr = expr.index(key);
        }
        _ => return Ok(expr),
      }
    }
  }

  fn primary(&mut self) -> Result<Expr, ParseError> {
    self.skip_ws();
    match self.peek() {
      Some('(') => {
        self.pos += 1;
        let expr = self.expression()?;
        self.expect(')')?;
        Ok(expr)
      }
      Some('[') => {
        self.pos += 1;
        let items = self.separated(']', Self::expression)?;
        Ok(Expr::List(items))
      }
      Some('{') => {
        self.pos += 1;
        let entries = self.separated('}', Self::map_entry)?;
        Ok(Expr::Map(entries))
      }
      Some('"') => self.string().map(|s| Expr::Literal(Value::String(s))),
      Some(c) if c.is_ascii_digit() => self.number(),
      Some(c) if is_ident_start(c) => {
        let name = self.identifier()?;
        match name.as_str() {
          "true" => return Ok(Expr::Literal(Value::Bool(true))),
          "false" => return Ok(Expr::Literal(Value::Bool(false))),
          "null" => return Ok(Expr::Literal(Value::Null)),
          _ => {}
        }
        self.skip_ws();
        if self.peek() == Some('(') {
          self.pos += 1;
          let args = self.separated(')', Self::expression)?;
          Ok(Expr::Call { name, args })
        } else {
          Ok(Expr::Variable(name))
        }
      }
      Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
      None => Err(self.error("unexpected end of expression")),
    }
  }

  /// Parse `item ("," item)* ","? close`, the opening delimiter already consumed.
  fn separated<T>(
    &mut self,
    close: char,
    item: fn(&mut Self) -> Result<T, ParseError>,
  ) -> Result<Vec<T>, ParseError> {
    let mut items = Vec::new();
    loop {
      self.skip_ws();
      if self.peek() == Some(close) {
        self.pos += 1;
        return Ok(items);
      }
      items.push(item(self)?);
      self.skip_ws();
      match self.peek() {
        Some(',') => self.pos += 1,
        Some(c) if c == close => {}
        _ => return Err(self.error(format!("expected ',' or '{}'", close))),
      }
    }
  }

  fn map_entry(&mut self) -> Result<(String, Expr), ParseError> {
    self.skip_ws();
    let key = match self.peek() {
      Some('"') => self.string()?,
      Some(c) if is_ident_start(c) => self.identifier()?,
      _ => return Err(self.error("expected map key")),
    };
    if !(self.eat("=") || self.eat(":")) {
      return Err(self.error("expected '=' or ':' after map key"));
    }
    let value = self.expression()?;
    Ok((key, value))
  }

  fn identifier(&mut self) -> Result<String, ParseError> {
    let start = self.pos;
    while self.peek().is_some_and(is_ident_continue) {
      self.pos += 1;
    }
    if start == self.pos {
      return Err(self.error("expected identifier"));
    }
    Ok(self.chars[start..self.pos].iter().collect())
  }

  fn number(&mut self) -> Result<Expr, ParseError> {
    let start = self.pos;
    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
      self.pos += 1;
    }
    if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
      self.pos += 1;
      while self.peek().is_some_and(|c| c.is_ascii_digit()) {
        self.pos += 1;
      }
    }
    if matches!(self.peek(), Some('e') | Some('E')) {
      self.pos += 1;
      if matches!(self.peek(), Some('+') | Some('-')) {
        self.pos += 1;
      }
      while self.peek().is_some_and(|c| c.is_ascii_digit()) {
        self.pos += 1;
      }
    }
    let text: String = self.chars[start..self.pos].iter().collect();
    text
      .parse::<f64>()
      .map(|n| Expr::Literal(Value::Number(n)))
      .map_err(|_| self.error(format!("invalid number '{}'", text)))
  }

  fn string(&mut self) -> Result<String, ParseError> {
    // Opening quote.
    self.pos += 1;
    let mut out = String::new();
    loop {
      match self.peek() {
        None => return Err(self.error("unterminated string")),
        Some('"') => {
          self.pos += 1;
          return Ok(out);
        }
        Some('\\') => {
          let escaped = match self.peek_at(1) {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('"') => '"',
            Some('\\') => '\\',
            _ => return Err(self.error("invalid escape sequence")),
          };
          out.push(escaped);
          self.pos += 2;
        }
        Some(c) => {
          out.push(c);
          self.pos += 1;
        }
      }
    }
  }
}

fn is_ident_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Whether `name` can be written as a bare identifier in an expression.
pub fn is_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  chars.next().is_some_and(is_ident_start) && chars.all(is_ident_continue)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_single_interpolation_is_unwrapped() {
    let expr = parse_template("${var.count}").unwrap();
    assert_eq!(expr, Expr::variable("var").get_attr("count"));
  }

  #[test]
  fn test_mixed_template() {
    let expr = parse_template("x-${count.index}").unwrap();
    assert_eq!(
      expr,
      Expr::Template(vec![
        TemplatePart::Literal("x-".to_string()),
        TemplatePart::Interpolation(Expr::variable("count").get_attr("index")),
      ])
    );
  }

  #[test]
  fn test_escaped_interpolation_is_literal() {
    let expr = parse_template("cost: $${price}").unwrap();
    assert_eq!(expr, Expr::literal("cost: ${price}"));
  }

  #[test]
  fn test_index_and_attribute_chain() {
    let expr = parse_expression(r#"A["a"].computed_attrs.value"#).unwrap();
    assert_eq!(
      expr,
      Expr::variable("A")
        .index(Expr::literal("a"))
        .get_attr("computed_attrs")
        .get_attr("value")
    );
  }

  #[test]
  fn test_precedence() {
    let expr = parse_expression("1 + 2 * 3").unwrap();
    assert_eq!(expr.to_string(), "(1 + (2 * 3))");

    let expr = parse_expression("a < b == true ? 1 : 2").unwrap();
    assert_eq!(expr.to_string(), "(((a < b) == true) ? 1 : 2)");
  }

  #[test]
  fn test_call_with_collections() {
    let expr = parse_expression(r#"merge({a = 1}, {"b": [1, 2,]})"#).unwrap();
    match expr {
      Expr::Call { name, args } => {
        assert_eq!(name, "merge");
        assert_eq!(args.len(), 2);
      }
      other => panic!("expected call, got {:?}", other),
    }
  }

  #[test]
  fn test_map_literal_inside_template() {
    let expr = parse_template(r#"${{"a" = 1, "b" = 2}}"#).unwrap();
    assert!(matches!(expr, Expr::Map(ref entries) if entries.len() == 2));
  }

  #[test]
  fn test_parse_errors() {
    assert!(parse_template("${var.").is_err());
    assert!(parse_template("${1 +}").is_err());
    assert!(parse_template("${\"open}").is_err());
    assert!(parse_expression("a b").is_err());
  }

  #[test]
  fn test_parse_json_structures() {
    let expr = parse_json(&json!({"names": ["${var.a}", "b"], "port": 80})).unwrap();
    match expr {
      Expr::Map(entries) => {
        assert_eq!(entries.len(), 2);
        let (_, names) = entries.iter().find(|(k, _)| k == "names").unwrap();
        assert!(matches!(names, Expr::List(items) if items.len() == 2));
      }
      other => panic!("expected map, got {:?}", other),
    }
  }

  #[test]
  fn test_is_identifier() {
    for name in ["web", "_x", "db-primary", "a1"] {
      assert!(is_identifier(name), "{name}");
    }
    for name in ["", "1a", "db.primary", "web[0]", "a\"b", "-x", "a b"] {
      assert!(!is_identifier(name), "{name}");
    }
  }
}
