use std::fmt;

use crate::value::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Negate,
  Not,
}

/// Binary operators, lowest precedence last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Mul,
  Div,
  Rem,
  Add,
  Sub,
  Lt,
  Le,
  Gt,
  Ge,
  Eq,
  Ne,
  And,
  Or,
}

impl BinaryOp {
  pub fn symbol(&self) -> &'static str {
    match self {
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
      BinaryOp::Rem => "%",
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Lt => "<",
      BinaryOp::Le => "<=",
      BinaryOp::Gt => ">",
      BinaryOp::Ge => ">=",
      BinaryOp::Eq => "==",
      BinaryOp::Ne => "!=",
      BinaryOp::And => "&&",
      BinaryOp::Or => "||",
    }
  }
}

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
  Literal(String),
  Interpolation(Expr),
}

/// An unevaluated expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Literal(Value),
  /// A root symbol such as `var`, `count` or a resource template name.
  Variable(String),
  GetAttr {
    target: Box<Expr>,
    name: String,
  },
  Index {
    target: Box<Expr>,
    key: Box<Expr>,
  },
  Call {
    name: String,
    args: Vec<Expr>,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Conditional {
    condition: Box<Expr>,
    then: Box<Expr>,
    otherwise: Box<Expr>,
  },
  List(Vec<Expr>),
  Map(Vec<(String, Expr)>),
  Template(Vec<TemplatePart>),
}

impl Expr {
  pub fn literal(value: impl Into<Value>) -> Self {
    Expr::Literal(value.into())
  }

  pub fn variable(name: impl Into<String>) -> Self {
    Expr::Variable(name.into())
  }

  pub fn get_attr(self, name: impl Into<String>) -> Self {
    Expr::GetAttr {
      target: Box::new(self),
      name: name.into(),
    }
  }

  pub fn index(self, key: Expr) -> Self {
    Expr::Index {
      target: Box::new(self),
      key: Box::new(key),
    }
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Literal(v) => write!(f, "{}", v),
      Expr::Variable(name) => write!(f, "{}", name),
      Expr::GetAttr { target, name } => write!(f, "{}.{}", target, name),
      Expr::Index { target, key } => write!(f, "{}[{}]", target, key),
      Expr::Call { name, args } => {
        write!(f, "{}(", name)?;
        for (i, arg) in args.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", arg)?;
        }
        write!(f, ")")
      }
      Expr::Unary { op, operand } => match op {
        UnaryOp::Negate => write!(f, "-{}", operand),
        UnaryOp::Not => write!(f, "!{}", operand),
      },
      Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
      Expr::Conditional {
        condition,
        then,
        otherwise,
      } => write!(f, "({} ? {} : {})", condition, then, otherwise),
      Expr::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
      Expr::Map(entries) => {
        write!(f, "{{")?;
        for (i, (key, value)) in entries.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{:?} = {}", key, value)?;
        }
        write!(f, "}}")
      }
      Expr::Template(parts) => {
        write!(f, "\"")?;
        for part in parts {
          match part {
            TemplatePart::Literal(s) => write!(f, "{}", s.replace("${", "$${"))?,
            TemplatePart::Interpolation(expr) => write!(f, "${{{}}}", expr)?,
          }
        }
        write!(f, "\"")
      }
    }
  }
}
