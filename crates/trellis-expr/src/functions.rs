//! The fixed registry of builtin functions.
//!
//! Every builtin is a pure function of its arguments (`file` reads the file at
//! the given path, which is treated as part of the input). Unknown arguments
//! make the result unknown; structural builtins such as `length` or `keys`
//! only require their direct arguments to be known, so `keys(resource)` works
//! even while the instances' computed attributes are still pending.

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::EvalError;
use crate::value::{Value, format_number};

/// Accepted argument counts for a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
  Exact(usize),
  Range(usize, usize),
  AtLeast(usize),
}

impl Arity {
  pub fn accepts(&self, n: usize) -> bool {
    match *self {
      Arity::Exact(e) => n == e,
      Arity::Range(min, max) => n >= min && n <= max,
      Arity::AtLeast(min) => n >= min,
    }
  }
}

type BuiltinFn = fn(&str, &[Value]) -> Result<Value, EvalError>;

/// A registered builtin.
#[derive(Clone, Copy)]
pub struct Builtin {
  pub arity: Arity,
  /// Structural builtins tolerate unknowns nested inside their arguments.
  pub structural: bool,
  func: BuiltinFn,
}

/// Function registry, looked up by name and arity.
#[derive(Clone)]
pub struct Functions {
  builtins: HashMap<&'static str, Builtin>,
}

impl Default for Functions {
  fn default() -> Self {
    Self::builtins()
  }
}

impl Functions {
  /// The standard builtin set.
  pub fn builtins() -> Self {
    let mut f = Self {
      builtins: HashMap::new(),
    };
    f.register("upper", Arity::Exact(1), false, upper);
    f.register("lower", Arity::Exact(1), false, lower);
    f.register("title", Arity::Exact(1), false, title);
    f.register("trimspace", Arity::Exact(1), false, trimspace);
    f.register("replace", Arity::Exact(3), false, replace);
    f.register("split", Arity::Exact(2), false, split);
    f.register("join", Arity::Exact(2), false, join);
    f.register("format", Arity::AtLeast(1), false, format);
    f.register("length", Arity::Exact(1), true, length);
    f.register("concat", Arity::AtLeast(0), true, concat);
    f.register("keys", Arity::Exact(1), true, keys);
    f.register("values", Arity::Exact(1), true, values);
    f.register("lookup", Arity::Range(2, 3), true, lookup);
    f.register("merge", Arity::AtLeast(0), true, merge);
    f.register("element", Arity::Exact(2), true, element);
    f.register("contains", Arity::Exact(2), false, contains);
    f.register("range", Arity::Range(1, 2), false, range);
    f.register("max", Arity::AtLeast(1), false, max);
    f.register("min", Arity::AtLeast(1), false, min);
    f.register("abs", Arity::Exact(1), false, abs);
    f.register("ceil", Arity::Exact(1), false, ceil);
    f.register("floor", Arity::Exact(1), false, floor);
    f.register("tostring", Arity::Exact(1), false, tostring);
    f.register("tonumber", Arity::Exact(1), false, tonumber);
    f.register("toset", Arity::Exact(1), false, toset);
    f.register("coalesce", Arity::AtLeast(1), false, coalesce);
    f.register("base64encode", Arity::Exact(1), false, base64encode);
    f.register("base64decode", Arity::Exact(1), false, base64decode);
    f.register("jsonencode", Arity::Exact(1), false, jsonencode);
    f.register("jsondecode", Arity::Exact(1), false, jsondecode);
    f.register("file", Arity::Exact(1), false, file);
    f
  }

  fn register(&mut self, name: &'static str, arity: Arity, structural: bool, func: BuiltinFn) {
    self.builtins.insert(
      name,
      Builtin {
        arity,
        structural,
        func,
      },
    );
  }

  /// Look up a builtin accepting `arity` arguments.
  pub fn get(&self, name: &str, arity: usize) -> Option<&Builtin> {
    self
      .builtins
      .get(name)
      .filter(|builtin| builtin.arity.accepts(arity))
  }

  /// Call a builtin, applying unknown propagation.
  pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let builtin = self
      .get(name, args.len())
      .ok_or_else(|| EvalError::FunctionNotFound {
        name: name.to_string(),
        arity: args.len(),
      })?;

    let pending = if builtin.structural {
      args.iter().any(Value::is_unknown)
    } else {
      !args.iter().all(Value::is_wholly_known)
    };
    if pending {
      return Ok(Value::Unknown);
    }

    (builtin.func)(name, args)
  }
}

fn string_arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a str, EvalError> {
  args[i].as_str().ok_or_else(|| {
    EvalError::function(
      name,
      format!("argument {} must be a string, got {}", i + 1, args[i].type_name()),
    )
  })
}

fn number_arg(name: &str, args: &[Value], i: usize) -> Result<f64, EvalError> {
  args[i].as_number().ok_or_else(|| {
    EvalError::function(
      name,
      format!("argument {} must be a number, got {}", i + 1, args[i].type_name()),
    )
  })
}

fn list_arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a [Value], EvalError> {
  args[i].as_list().ok_or_else(|| {
    EvalError::function(
      name,
      format!("argument {} must be a list, got {}", i + 1, args[i].type_name()),
    )
  })
}

fn map_arg<'a>(
  name: &str,
  args: &'a [Value],
  i: usize,
) -> Result<&'a BTreeMap<String, Value>, EvalError> {
  args[i].as_map().ok_or_else(|| {
    EvalError::function(
      name,
      format!("argument {} must be a map, got {}", i + 1, args[i].type_name()),
    )
  })
}

fn upper(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::from(string_arg(name, args, 0)?.to_uppercase()))
}

fn lower(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::from(string_arg(name, args, 0)?.to_lowercase()))
}

fn title(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let s = string_arg(name, args, 0)?;
  let mut out = String::with_capacity(s.len());
  let mut at_word_start = true;
  for c in s.chars() {
    if at_word_start {
      out.extend(c.to_uppercase());
    } else {
      out.push(c);
    }
    at_word_start = c.is_whitespace();
  }
  Ok(Value::from(out))
}

fn trimspace(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::from(string_arg(name, args, 0)?.trim()))
}

fn replace(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let s = string_arg(name, args, 0)?;
  let from = string_arg(name, args, 1)?;
  let to = string_arg(name, args, 2)?;
  Ok(Value::from(s.replace(from, to)))
}

fn split(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let sep = string_arg(name, args, 0)?;
  let s = string_arg(name, args, 1)?;
  Ok(Value::List(s.split(sep).map(Value::from).collect()))
}

fn join(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let sep = string_arg(name, args, 0)?;
  let items = list_arg(name, args, 1)?;
  let parts = items
    .iter()
    .map(|v| {
      v.to_interpolated()
        .ok_or_else(|| EvalError::function(name, format!("cannot join a {}", v.type_name())))
    })
    .collect::<Result<Vec<_>, _>>()?;
  Ok(Value::from(parts.join(sep)))
}

/// `format("%s-%d", a, b)`: `%s` and `%d` consume arguments, `%%` is a literal.
fn format(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let spec = string_arg(name, args, 0)?;
  let mut rest = args[1..].iter();
  let mut out = String::new();
  let mut chars = spec.chars();
  while let Some(c) = chars.next() {
    if c != '%' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('%') => out.push('%'),
      Some(verb @ ('s' | 'd')) => {
        let arg = rest
          .next()
          .ok_or_else(|| EvalError::function(name, "not enough arguments for format string"))?;
        if verb == 'd' && arg.as_number().is_none() {
          return Err(EvalError::function(
            name,
            format!("%d requires a number, got {}", arg.type_name()),
          ));
        }
        let text = arg
          .to_interpolated()
          .ok_or_else(|| EvalError::function(name, format!("cannot format a {}", arg.type_name())))?;
        out.push_str(&text);
      }
      other => {
        return Err(EvalError::function(
          name,
          format!("unsupported format verb '%{}'", other.unwrap_or(' ')),
        ));
      }
    }
  }
  Ok(Value::from(out))
}

fn length(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let n = match &args[0] {
    Value::List(l) => l.len(),
    Value::Map(m) => m.len(),
    Value::String(s) => s.chars().count(),
    other => {
      return Err(EvalError::function(
        name,
        format!("cannot take length of {}", other.type_name()),
      ));
    }
  };
  Ok(Value::Number(n as f64))
}

fn concat(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let mut out = Vec::new();
  for i in 0..args.len() {
    out.extend(list_arg(name, args, i)?.iter().cloned());
  }
  Ok(Value::List(out))
}

fn keys(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::List(
    map_arg(name, args, 0)?.keys().cloned().map(Value::from).collect(),
  ))
}

fn values(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::List(map_arg(name, args, 0)?.values().cloned().collect()))
}

fn lookup(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let map = map_arg(name, args, 0)?;
  let key = string_arg(name, args, 1)?;
  match (map.get(key), args.get(2)) {
    (Some(v), _) => Ok(v.clone()),
    (None, Some(default)) => Ok(default.clone()),
    (None, None) => Err(EvalError::function(
      name,
      format!("key {:?} not found and no default given", key),
    )),
  }
}

fn merge(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let mut out = BTreeMap::new();
  for i in 0..args.len() {
    for (k, v) in map_arg(name, args, i)? {
      out.insert(k.clone(), v.clone());
    }
  }
  Ok(Value::Map(out))
}

/// `element(list, i)` wraps around like modular indexing.
fn element(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let list = list_arg(name, args, 0)?;
  if list.is_empty() {
    return Err(EvalError::function(name, "cannot index an empty list"));
  }
  let index = args[1]
    .as_index()
    .ok_or_else(|| EvalError::function(name, "index must be a non-negative integer"))?;
  Ok(list[index % list.len()].clone())
}

fn contains(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Bool(list_arg(name, args, 0)?.contains(&args[1])))
}

fn range(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let (start, end) = if args.len() == 1 {
    (0.0, number_arg(name, args, 0)?)
  } else {
    (number_arg(name, args, 0)?, number_arg(name, args, 1)?)
  };
  if end - start > 10_000.0 {
    return Err(EvalError::function(name, "range too large"));
  }
  let mut out = Vec::new();
  let mut n = start;
  while n < end {
    out.push(Value::Number(n));
    n += 1.0;
  }
  Ok(Value::List(out))
}

fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, EvalError> {
  (0..args.len()).map(|i| number_arg(name, args, i)).collect()
}

fn max(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Number(
    numbers(name, args)?.into_iter().fold(f64::NEG_INFINITY, f64::max),
  ))
}

fn min(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Number(
    numbers(name, args)?.into_iter().fold(f64::INFINITY, f64::min),
  ))
}

fn abs(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Number(number_arg(name, args, 0)?.abs()))
}

fn ceil(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Number(number_arg(name, args, 0)?.ceil()))
}

fn floor(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::Number(number_arg(name, args, 0)?.floor()))
}

fn tostring(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  args[0]
    .to_interpolated()
    .map(Value::from)
    .ok_or_else(|| EvalError::function(name, format!("cannot convert {} to string", args[0].type_name())))
}

fn tonumber(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  match &args[0] {
    Value::Number(n) => Ok(Value::Number(*n)),
    Value::String(s) => s
      .trim()
      .parse::<f64>()
      .map(Value::Number)
      .map_err(|_| EvalError::function(name, format!("{:?} is not a number", s))),
    other => Err(EvalError::function(
      name,
      format!("cannot convert {} to number", other.type_name()),
    )),
  }
}

/// Sets are maps from each element's string form to itself, which gives them
/// distinct, order-independent keys.
fn toset(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let items = match &args[0] {
    Value::List(items) => items.clone(),
    Value::Map(m) => m.values().cloned().collect(),
    other => {
      return Err(EvalError::function(
        name,
        format!("cannot convert {} to set", other.type_name()),
      ));
    }
  };
  let mut out = BTreeMap::new();
  for item in items {
    let key = match &item {
      Value::String(s) => s.clone(),
      Value::Number(n) => format_number(*n),
      other => {
        return Err(EvalError::function(
          name,
          format!("set elements must be strings or numbers, got {}", other.type_name()),
        ));
      }
    };
    out.insert(key.clone(), Value::String(key));
  }
  Ok(Value::Map(out))
}

fn coalesce(_name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(
    args
      .iter()
      .find(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
      .cloned()
      .unwrap_or(Value::Null),
  )
}

fn base64encode(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  Ok(Value::from(STANDARD.encode(string_arg(name, args, 0)?)))
}

fn base64decode(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let bytes = STANDARD
    .decode(string_arg(name, args, 0)?)
    .map_err(|e| EvalError::function(name, e.to_string()))?;
  String::from_utf8(bytes)
    .map(Value::from)
    .map_err(|e| EvalError::function(name, e.to_string()))
}

fn jsonencode(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let json = args[0]
    .to_json()
    .ok_or_else(|| EvalError::function(name, "cannot encode an unknown value"))?;
  serde_json::to_string(&json)
    .map(Value::from)
    .map_err(|e| EvalError::function(name, e.to_string()))
}

fn jsondecode(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  serde_json::from_str::<serde_json::Value>(string_arg(name, args, 0)?)
    .map(Value::from)
    .map_err(|e| EvalError::function(name, e.to_string()))
}

fn file(name: &str, args: &[Value]) -> Result<Value, EvalError> {
  let path = string_arg(name, args, 0)?;
  std::fs::read_to_string(path)
    .map(Value::from)
    .map_err(|e| EvalError::function(name, format!("{}: {}", path, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    Functions::builtins().call(name, &args)
  }

  #[test]
  fn test_string_functions() {
    assert_eq!(call("upper", vec!["abc".into()]).unwrap(), Value::from("ABC"));
    assert_eq!(
      call("title", vec!["hello big world".into()]).unwrap(),
      Value::from("Hello Big World")
    );
    assert_eq!(
      call("format", vec!["%s-%d%%".into(), "web".into(), Value::Number(3.0)]).unwrap(),
      Value::from("web-3%")
    );
    assert_eq!(
      call(
        "join",
        vec![",".into(), Value::List(vec!["a".into(), Value::Number(1.0)])]
      )
      .unwrap(),
      Value::from("a,1")
    );
  }

  #[test]
  fn test_unknown_wrong_arity_is_function_not_found() {
    assert!(matches!(
      call("upper", vec![]),
      Err(EvalError::FunctionNotFound { arity: 0, .. })
    ));
    assert!(matches!(
      call("nope", vec!["x".into()]),
      Err(EvalError::FunctionNotFound { .. })
    ));
  }

  #[test]
  fn test_unknown_propagation() {
    assert_eq!(call("upper", vec![Value::Unknown]).unwrap(), Value::Unknown);
    assert_eq!(
      call("join", vec![",".into(), Value::List(vec![Value::Unknown])]).unwrap(),
      Value::Unknown
    );
    // Structural builtins only care about the container itself.
    let resources = Value::Map(BTreeMap::from([
      ("a".to_string(), Value::Unknown),
      ("b".to_string(), Value::Unknown),
    ]));
    assert_eq!(
      call("keys", vec![resources.clone()]).unwrap(),
      Value::List(vec!["a".into(), "b".into()])
    );
    assert_eq!(call("length", vec![resources]).unwrap(), Value::Number(2.0));
  }

  #[test]
  fn test_toset_deduplicates() {
    let set = call(
      "toset",
      vec![Value::List(vec!["b".into(), "a".into(), "b".into()])],
    )
    .unwrap();
    let map = set.as_map().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], Value::from("a"));
  }

  #[test]
  fn test_encoding_round_trip() {
    let encoded = call("base64encode", vec!["hello".into()]).unwrap();
    assert_eq!(encoded, Value::from("aGVsbG8="));
    let decoded = call("base64decode", vec![encoded]).unwrap();
    assert_eq!(decoded, Value::from("hello"));

    let json = call("jsondecode", vec![r#"{"a":[1,2]}"#.into()]).unwrap();
    assert_eq!(
      call("jsonencode", vec![json]).unwrap(),
      Value::from(r#"{"a":[1,2]}"#)
    );
  }

  #[test]
  fn test_file_reads_contents() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    write!(tmp, "#!/bin/sh\necho hi\n").unwrap();
    let path = tmp.path().to_string_lossy().to_string();
    assert_eq!(
      call("file", vec![path.into()]).unwrap(),
      Value::from("#!/bin/sh\necho hi\n")
    );
    assert!(call("file", vec!["/definitely/not/here".into()]).is_err());
  }

  #[test]
  fn test_element_wraps_and_lookup_default() {
    let list = Value::List(vec!["a".into(), "b".into()]);
    assert_eq!(
      call("element", vec![list, Value::Number(3.0)]).unwrap(),
      Value::from("b")
    );
    let map = Value::Map(BTreeMap::from([("x".to_string(), Value::Number(1.0))]));
    assert_eq!(
      call("lookup", vec![map.clone(), "y".into(), Value::Number(0.0)]).unwrap(),
      Value::Number(0.0)
    );
    assert!(call("lookup", vec![map, "y".into()]).is_err());
  }
}
