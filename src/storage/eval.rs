use bson::{Bson, Document};
use std::cmp::Ordering;

use super::predicate::{CmpOp, MAX_IN_SET, MAX_PATH_DEPTH, MAX_SORT_FIELDS, Pattern, Predicate};
use crate::errors::StorageError;
use crate::query::{Order, SortSpec};

pub fn eval_predicate(doc: &Document, pred: &Predicate) -> bool {
    match pred {
        Predicate::True => true,
        Predicate::And(ps) => ps.iter().all(|p| eval_predicate(doc, p)),
        Predicate::Or(ps) => ps.iter().any(|p| eval_predicate(doc, p)),
        Predicate::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Predicate::In { path, values } => get_path(doc, path).is_some_and(|v| is_in_set(v, values)),
        Predicate::Nin { path, values } => {
            !get_path(doc, path).is_some_and(|v| is_in_set(v, values))
        }
        Predicate::Cmp { path, op: CmpOp::Ne, value } => {
            !get_path(doc, path).is_some_and(|v| matches_eq(v, value))
        }
        Predicate::Cmp { path, op, value } => get_path(doc, path).is_some_and(|v| {
            // Array fields match when any element satisfies the comparison.
            if let Bson::Array(items) = v
                && !matches!(value, Bson::Array(_))
            {
                return items.iter().any(|item| cmp_matches(item, *op, value));
            }
            cmp_matches(v, *op, value)
        }),
        Predicate::Regex { path, pattern } => {
            get_path(doc, path).is_some_and(|v| regex_matches(v, pattern))
        }
    }
}

fn cmp_matches(v: &Bson, op: CmpOp, value: &Bson) -> bool {
    // Ordering comparisons only hold between values of the same kind.
    let comparable = (is_num(v) && is_num(value)) || type_rank(v) == type_rank(value);
    match op {
        CmpOp::Eq => bson_eq(v, value),
        CmpOp::Ne => !bson_eq(v, value),
        CmpOp::Gt => comparable && compare_bson(v, value) == Ordering::Greater,
        CmpOp::Gte => comparable && compare_bson(v, value) != Ordering::Less,
        CmpOp::Lt => comparable && compare_bson(v, value) == Ordering::Less,
        CmpOp::Lte => comparable && compare_bson(v, value) != Ordering::Greater,
    }
}

fn matches_eq(v: &Bson, value: &Bson) -> bool {
    match v {
        Bson::Array(items) if !matches!(value, Bson::Array(_)) => {
            items.iter().any(|item| bson_eq(item, value))
        }
        _ => bson_eq(v, value),
    }
}

fn regex_matches(v: &Bson, pattern: &Pattern) -> bool {
    match v {
        Bson::String(s) => pattern.is_match(s),
        Bson::Array(items) => items.iter().any(|i| regex_matches(i, pattern)),
        _ => false,
    }
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    let set = &set[..set.len().min(MAX_IN_SET)];
    match v {
        Bson::Array(items) => items.iter().any(|item| set.iter().any(|x| bson_eq(item, x))),
        _ => set.iter().any(|x| bson_eq(v, x)),
    }
}

/// Equality that treats numerically equal numbers of different widths as equal.
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return compare_bson(a, b) == Ordering::Equal;
    }
    a == b
}

/// Resolve a dotted path inside a document.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for (depth, part) in parts.enumerate() {
        if depth + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        cur = match cur {
            Bson::Document(d) => d.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head.to_owned(), Document::new());
            }
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

pub fn compare_docs(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Total order over BSON values: numbers by value, strings/bools/dates natively,
/// mixed kinds by type rank.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

const fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::Symbol(_) | Bson::String(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 255,
    }
}

/// Apply a projection list. Entries prefixed with `-` exclude; otherwise the list
/// is an inclusion list and `_id` is kept unless excluded explicitly.
#[must_use]
/// Rejects field lists that mix inclusions with exclusions other than `-_id`.
///
/// # Errors
/// Returns [`StorageError::InvalidFilter`] for a mixed projection.
pub fn check_projection(fields: &[String]) -> Result<(), StorageError> {
    let includes = fields.iter().any(|f| !f.starts_with('-'));
    let excludes_other = fields.iter().any(|f| f.starts_with('-') && f != "-_id");
    if includes && excludes_other {
        return Err(StorageError::InvalidFilter(
            "cannot mix inclusion and exclusion in a projection".into(),
        ));
    }
    Ok(())
}

pub fn project(doc: &Document, fields: &[String]) -> Document {
    let excludes: Vec<&str> = fields.iter().filter_map(|f| f.strip_prefix('-')).collect();
    let includes: Vec<&str> =
        fields.iter().filter(|f| !f.starts_with('-')).map(String::as_str).collect();
    if includes.is_empty() {
        let mut out = doc.clone();
        for path in excludes {
            remove_path(&mut out, path);
        }
        return out;
    }
    let mut out = Document::new();
    if !excludes.contains(&"_id")
        && let Some(id) = doc.get("_id")
    {
        out.insert("_id", id.clone());
    }
    for path in includes {
        if let Some(v) = get_path(doc, path) {
            set_path(&mut out, path, v.clone());
        }
    }
    out
}

/// Drop repeated values, keeping first occurrences.
pub(crate) fn dedupe(values: Vec<Bson>) -> Vec<Bson> {
    let mut out: Vec<Bson> = Vec::with_capacity(values.len());
    for v in values {
        if !out.iter().any(|seen| bson_eq(seen, &v)) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn cmp(path: &str, op: CmpOp, value: impl Into<Bson>) -> Predicate {
        Predicate::Cmp { path: path.into(), op, value: value.into() }
    }

    #[test]
    fn numbers_compare_across_widths() {
        let d = doc! {"x": Bson::Int64(30)};
        assert!(eval_predicate(&d, &cmp("x", CmpOp::Eq, 30)));
        assert!(eval_predicate(&d, &cmp("x", CmpOp::Gte, 29.5)));
        assert!(!eval_predicate(&d, &cmp("x", CmpOp::Gt, 30)));
    }

    #[test]
    fn mixed_kinds_never_satisfy_ranges() {
        let d = doc! {"x": "abc"};
        assert!(!eval_predicate(&d, &cmp("x", CmpOp::Gt, 1)));
        assert!(!eval_predicate(&d, &cmp("x", CmpOp::Lt, 1)));
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let d = doc! {"a": {"b": {"c": 5}}, "arr": [1, {"k": "v"}]};
        assert_eq!(get_path(&d, "a.b.c"), Some(&Bson::Int32(5)));
        assert_eq!(get_path(&d, "arr.1.k"), Some(&Bson::String("v".into())));
        assert!(get_path(&d, "a.x").is_none());
    }

    #[test]
    fn array_fields_match_elements() {
        let d = doc! {"tags": ["red", "blue"]};
        assert!(eval_predicate(&d, &cmp("tags", CmpOp::Eq, "red")));
        assert!(!eval_predicate(&d, &cmp("tags", CmpOp::Ne, "blue")));
        let inset = Predicate::In { path: "tags".into(), values: vec!["blue".into()] };
        assert!(eval_predicate(&d, &inset));
    }

    #[test]
    fn ne_and_nin_match_missing_fields() {
        let d = doc! {"a": 1};
        assert!(eval_predicate(&d, &cmp("b", CmpOp::Ne, 1)));
        assert!(eval_predicate(&d, &Predicate::Nin { path: "b".into(), values: vec![1.into()] }));
    }

    #[cfg(feature = "regex")]
    #[test]
    fn regex_honours_case_flag() {
        let d = doc! {"name": "Alice"};
        let p = |ci| Predicate::Regex { path: "name".into(), pattern: Pattern::new("^al", ci).unwrap() };
        assert!(!eval_predicate(&d, &p(false)));
        assert!(eval_predicate(&d, &p(true)));
    }

    #[test]
    fn projection_include_and_exclude() {
        let d = doc! {"_id": 1, "a": {"b": 2, "c": 3}, "d": 4};
        assert_eq!(project(&d, &["a.b".to_string()]), doc! {"_id": 1, "a": {"b": 2}});
        assert_eq!(project(&d, &["d".to_string(), "-_id".to_string()]), doc! {"d": 4});
        assert_eq!(project(&d, &["-a".to_string()]), doc! {"_id": 1, "d": 4});
    }

    #[test]
    fn mixed_projection_is_rejected_except_for_id() {
        let fields = |fs: &[&str]| fs.iter().map(|f| (*f).to_owned()).collect::<Vec<_>>();
        assert!(matches!(
            check_projection(&fields(&["name", "-age"])),
            Err(StorageError::InvalidFilter(_))
        ));
        assert!(check_projection(&fields(&["name", "-_id"])).is_ok());
        assert!(check_projection(&fields(&["-age", "-_id"])).is_ok());
        assert!(check_projection(&fields(&["name", "age"])).is_ok());
    }

    #[test]
    fn sort_uses_paths_and_direction() {
        let a = doc! {"p": {"n": 1}};
        let b = doc! {"p": {"n": 2}};
        assert_eq!(compare_docs(&a, &b, &[SortSpec::asc("p.n")]), Ordering::Less);
        assert_eq!(compare_docs(&a, &b, &[SortSpec::desc("p.n")]), Ordering::Greater);
    }

    #[test]
    fn dedupe_keeps_first_seen() {
        let v = dedupe(vec![Bson::Int32(1), Bson::Double(1.0), "a".into(), "a".into()]);
        assert_eq!(v, vec![Bson::Int32(1), Bson::String("a".into())]);
    }
}
