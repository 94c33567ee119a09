use crate::errors::StorageError;
use bson::{Bson, Document};

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
const MAX_NESTING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Compiled form of a filter document, evaluated by the in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, pattern: Pattern },
}

/// A `$regex` operand, compiled once when the filter is compiled.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    #[cfg(feature = "regex")]
    compiled: regex::Regex,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

impl Pattern {
    /// # Errors
    /// Returns [`StorageError::InvalidFilter`] if the pattern does not compile.
    #[cfg(feature = "regex")]
    pub fn new(source: impl Into<String>, case_insensitive: bool) -> Result<Self, StorageError> {
        let source = source.into();
        let compiled = regex::RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| invalid(format!("invalid $regex pattern {source:?}: {e}")))?;
        Ok(Self { source, case_insensitive, compiled })
    }

    /// Without the `regex` feature patterns are matched as plain substrings.
    ///
    /// # Errors
    /// Never fails; the signature matches the `regex` build.
    #[cfg(not(feature = "regex"))]
    pub fn new(source: impl Into<String>, case_insensitive: bool) -> Result<Self, StorageError> {
        Ok(Self { source: source.into(), case_insensitive })
    }

    #[cfg(feature = "regex")]
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }

    #[cfg(not(feature = "regex"))]
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        if self.case_insensitive {
            text.to_lowercase().contains(&self.source.to_lowercase())
        } else {
            text.contains(&self.source)
        }
    }
}

impl Predicate {
    /// Compile a filter document such as `{"age": {"$gte": 18}, "$or": [...]}`.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidFilter`] for unknown operators or malformed operands.
    pub fn compile(filter: &Document) -> Result<Self, StorageError> {
        compile_doc(filter, 0)
    }
}

fn invalid(msg: impl Into<String>) -> StorageError {
    StorageError::InvalidFilter(msg.into())
}

fn compile_doc(filter: &Document, depth: usize) -> Result<Predicate, StorageError> {
    if depth > MAX_NESTING {
        return Err(invalid("filter nested too deeply"));
    }
    let mut parts = Vec::with_capacity(filter.len());
    for (key, value) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                let Bson::Array(items) = value else {
                    return Err(invalid(format!("{key} requires an array")));
                };
                let subs = items
                    .iter()
                    .map(|item| match item {
                        Bson::Document(d) => compile_doc(d, depth + 1),
                        _ => Err(invalid(format!("{key} entries must be documents"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parts.push(if key == "$and" { Predicate::And(subs) } else { Predicate::Or(subs) });
            }
            k if k.starts_with('$') => return Err(invalid(format!("unknown operator {k}"))),
            path => parts.push(compile_field(path, value)?),
        }
    }
    Ok(match parts.len() {
        0 => Predicate::True,
        1 => parts.remove(0),
        _ => Predicate::And(parts),
    })
}

fn is_operator_doc(d: &Document) -> bool {
    !d.is_empty() && d.keys().all(|k| k.starts_with('$'))
}

fn compile_field(path: &str, value: &Bson) -> Result<Predicate, StorageError> {
    let Bson::Document(ops) = value else {
        return Ok(Predicate::Cmp { path: path.to_owned(), op: CmpOp::Eq, value: value.clone() });
    };
    if !is_operator_doc(ops) {
        return Ok(Predicate::Cmp { path: path.to_owned(), op: CmpOp::Eq, value: value.clone() });
    }
    let case_insensitive = matches!(ops.get("$options"), Some(Bson::String(o)) if o.contains('i'));
    let mut parts = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let p = path.to_owned();
        let pred = match op.as_str() {
            "$eq" => Predicate::Cmp { path: p, op: CmpOp::Eq, value: operand.clone() },
            "$ne" => Predicate::Cmp { path: p, op: CmpOp::Ne, value: operand.clone() },
            "$gt" => Predicate::Cmp { path: p, op: CmpOp::Gt, value: operand.clone() },
            "$gte" => Predicate::Cmp { path: p, op: CmpOp::Gte, value: operand.clone() },
            "$lt" => Predicate::Cmp { path: p, op: CmpOp::Lt, value: operand.clone() },
            "$lte" => Predicate::Cmp { path: p, op: CmpOp::Lte, value: operand.clone() },
            "$in" | "$nin" => {
                let Bson::Array(vals) = operand else {
                    return Err(invalid(format!("{op} requires an array")));
                };
                let values = vals.iter().take(MAX_IN_SET).cloned().collect();
                if op == "$in" {
                    Predicate::In { path: p, values }
                } else {
                    Predicate::Nin { path: p, values }
                }
            }
            "$exists" => {
                let exists = match operand {
                    Bson::Boolean(b) => *b,
                    Bson::Int32(i) => *i != 0,
                    Bson::Int64(i) => *i != 0,
                    _ => return Err(invalid("$exists requires a boolean")),
                };
                Predicate::Exists { path: p, exists }
            }
            "$regex" => {
                let Bson::String(pattern) = operand else {
                    return Err(invalid("$regex requires a string pattern"));
                };
                Predicate::Regex { path: p, pattern: Pattern::new(pattern.clone(), case_insensitive)? }
            }
            "$options" => continue,
            other => return Err(invalid(format!("unknown operator {other}"))),
        };
        parts.push(pred);
    }
    Ok(if parts.len() == 1 { parts.remove(0) } else { Predicate::And(parts) })
}
