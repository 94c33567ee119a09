use crate::errors::ParseError;
use crate::logger::{NoopLog, QueryLog};
use bson::Bson;
use percent_encoding::percent_decode_str;
use std::sync::Arc;

use super::coerce::{coerce, coerce_exists};
use super::params::{ParamValue, QueryParams};
use super::types::{
    ExecHints, Explain, Fields, Filter, MapReduceSpec, Operator, QueryDescriptor, QueryMode,
    SortSpec,
};

/// Reserved parameter names. Everything else is a filter field.
pub mod reserved {
    pub const TYPE: &str = "type";
    pub const DISTINCT: &str = "distinct";
    pub const SORT: &str = "sort";
    pub const SKIP: &str = "skip";
    pub const LIMIT: &str = "limit";
    pub const FIELDS: &str = "fields";
    pub const POPULATE: &str = "populate";
    pub const FLATTEN: &str = "flatten";
    pub const MAX_TIME_MS: &str = "maxTimeMS";
    pub const EXPLAIN: &str = "explain";
    pub const MAP: &str = "map";
    pub const REDUCE: &str = "reduce";
    pub const SCOPE: &str = "scope";
    pub const FINALIZE: &str = "finalize";

    pub const ALL: [&str; 14] = [
        TYPE, DISTINCT, SORT, SKIP, LIMIT, FIELDS, POPULATE, FLATTEN, MAX_TIME_MS, EXPLAIN, MAP,
        REDUCE, SCOPE, FINALIZE,
    ];

    #[must_use]
    pub fn is_reserved(key: &str) -> bool {
        ALL.contains(&key)
    }
}

/// Turns flat request parameters into a [`QueryDescriptor`]. Stateless apart from its log.
#[derive(Clone)]
pub struct Translator {
    log: Arc<dyn QueryLog>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(Arc::new(NoopLog))
    }
}

impl Translator {
    pub fn new(log: Arc<dyn QueryLog>) -> Self {
        Self { log }
    }

    /// # Errors
    /// Returns a [`ParseError`] for malformed pagination, flags, map-reduce
    /// programs or scope, or a distinct query without a single target field.
    pub fn translate(&self, params: &QueryParams) -> Result<QueryDescriptor, ParseError> {
        use reserved as r;

        let map_reduce = parse_map_reduce(params)?;
        let mode = if params.contains(r::DISTINCT) {
            QueryMode::Distinct
        } else if map_reduce.is_some() {
            QueryMode::MapReduce
        } else {
            params.get(r::TYPE).map_or(QueryMode::Find, |t| QueryMode::from_token(t.last()))
        };
        if mode == QueryMode::MapReduce && map_reduce.is_none() {
            return Err(ParseError::IncompleteMapReduce);
        }

        let mut desc = QueryDescriptor::with_mode(mode);
        desc.map_reduce = map_reduce;
        desc.fields = parse_fields(&desc.mode, params)?;
        desc.sort = params.get(r::SORT).map(parse_sort).filter(|s| !s.is_empty());
        desc.skip = parse_count(params, r::SKIP)?;
        desc.limit = parse_count(params, r::LIMIT)?;
        desc.populate = params.get(r::POPULATE).map(split_list).unwrap_or_default();
        desc.flatten = parse_flag(params, r::FLATTEN)?;
        desc.exec = ExecHints {
            max_time_ms: parse_count(params, r::MAX_TIME_MS)?,
            explain: params.get(r::EXPLAIN).map(|v| parse_explain(v.last())),
        };
        desc.filter = build_filter(params);

        self.log.debug(&format!(
            "translated {} params into {}: {}",
            params.len(),
            desc.mode.as_str(),
            serde_json::to_string(&desc).unwrap_or_default()
        ));
        Ok(desc)
    }
}

/// Translate with a no-op log.
///
/// # Errors
/// See [`Translator::translate`].
pub fn translate(params: &QueryParams) -> Result<QueryDescriptor, ParseError> {
    Translator::default().translate(params)
}

/// Split `field[op]` into its parts. Unknown operators leave the key untouched.
#[must_use]
pub fn split_operator(key: &str) -> (&str, Option<Operator>) {
    if let Some(inner) = key.strip_suffix(']')
        && let Some(open) = inner.rfind('[')
        && open > 0
        && let Some(op) = Operator::from_token(&inner[open + 1..])
    {
        return (&inner[..open], Some(op));
    }
    (key, None)
}

fn build_filter(params: &QueryParams) -> Filter {
    let mut filter = Filter::new();
    for (key, value) in params.iter().filter(|(k, _)| !reserved::is_reserved(k)) {
        let (field, op) = split_operator(key);
        let (op, operand) = match op {
            None if value.values().len() > 1 => {
                (Operator::In, Bson::Array(value.values().iter().map(|v| coerce(v)).collect()))
            }
            None => (Operator::Eq, coerce(value.last())),
            Some(op @ (Operator::In | Operator::Nin)) => (
                op,
                Bson::Array(split_set(value).iter().map(|v| coerce(v)).collect()),
            ),
            Some(Operator::Regex) => (Operator::Regex, Bson::String(value.last().to_owned())),
            Some(Operator::Exists) => (Operator::Exists, coerce_exists(value.last())),
            Some(op) => (op, coerce(value.last())),
        };
        filter.insert(field.to_owned(), op, operand);
    }
    filter
}

fn split_list(value: &ParamValue) -> Vec<String> {
    value
        .values()
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Like [`split_list`], but `\,` and `\\` inside a member stand for a literal
/// comma and backslash.
fn split_set(value: &ParamValue) -> Vec<String> {
    let mut out = Vec::new();
    for raw in value.values() {
        let mut member = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&next @ (',' | '\\')) => {
                        member.push(next);
                        chars.next();
                    }
                    _ => member.push('\\'),
                },
                ',' => push_member(&mut out, &mut member),
                c => member.push(c),
            }
        }
        push_member(&mut out, &mut member);
    }
    out
}

fn push_member(out: &mut Vec<String>, member: &mut String) {
    let trimmed = member.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_owned());
    }
    member.clear();
}

fn parse_sort(value: &ParamValue) -> Vec<SortSpec> {
    split_list(value)
        .into_iter()
        .map(|item| match item.strip_prefix('-') {
            Some(f) => SortSpec::desc(f),
            None => SortSpec::asc(item.strip_prefix('+').unwrap_or(&item)),
        })
        .filter(|s| !s.field.is_empty())
        .collect()
}

fn parse_fields(mode: &QueryMode, params: &QueryParams) -> Result<Option<Fields>, ParseError> {
    let list = params.get(reserved::FIELDS).map(split_list).unwrap_or_default();
    if *mode != QueryMode::Distinct {
        return Ok((!list.is_empty()).then_some(Fields::Select(list)));
    }
    if let Some(target) = params.get(reserved::DISTINCT) {
        let target = target.last().trim();
        if target.is_empty() {
            return Err(ParseError::MissingDistinctField);
        }
        return Ok(Some(Fields::Distinct(target.to_owned())));
    }
    match <[String; 1]>::try_from(list) {
        Ok([target]) => Ok(Some(Fields::Distinct(target))),
        Err(_) => Err(ParseError::MissingDistinctField),
    }
}

fn parse_count(params: &QueryParams, param: &'static str) -> Result<Option<u64>, ParseError> {
    params
        .get(param)
        .map(|v| {
            let raw = v.last();
            raw.parse::<u64>()
                .map_err(|_| ParseError::InvalidInteger { param, value: raw.to_owned() })
        })
        .transpose()
}

fn parse_flag(params: &QueryParams, param: &'static str) -> Result<bool, ParseError> {
    match params.get(param).map(ParamValue::last) {
        None | Some("false" | "0") => Ok(false),
        Some("" | "true" | "1") => Ok(true),
        Some(other) => Err(ParseError::InvalidFlag { param, value: other.to_owned() }),
    }
}

fn parse_explain(raw: &str) -> Explain {
    match raw {
        "" | "true" => Explain::Flag(true),
        "false" => Explain::Flag(false),
        other => Explain::Verbosity(other.to_owned()),
    }
}

fn decode_program(params: &QueryParams, param: &'static str) -> Result<Option<String>, ParseError> {
    let Some(value) = params.get(param) else { return Ok(None) };
    let text = percent_decode_str(value.last())
        .decode_utf8()
        .map_err(|_| ParseError::InvalidEncoding(param))?;
    if text.trim().is_empty() {
        return Err(ParseError::EmptyProgram(param));
    }
    Ok(Some(text.into_owned()))
}

fn parse_map_reduce(params: &QueryParams) -> Result<Option<MapReduceSpec>, ParseError> {
    use reserved as r;
    let map = decode_program(params, r::MAP)?;
    let reduce = decode_program(params, r::REDUCE)?;
    let (map, reduce) = match (map, reduce) {
        (None, None) => return Ok(None),
        (Some(m), Some(rd)) => (m, rd),
        _ => return Err(ParseError::IncompleteMapReduce),
    };
    let finalize = decode_program(params, r::FINALIZE)?;
    let scope = match params.get(r::SCOPE) {
        None => None,
        Some(v) => {
            let text = percent_decode_str(v.last())
                .decode_utf8()
                .map_err(|_| ParseError::InvalidEncoding(r::SCOPE))?;
            match serde_json::from_str::<serde_json::Value>(&text)? {
                serde_json::Value::Object(obj) => Some(obj),
                _ => return Err(ParseError::InvalidScope("scope must be a JSON object".into())),
            }
        }
    };
    Ok(Some(MapReduceSpec { map, reduce, scope, finalize }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLog;
    use bson::doc;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_params_make_a_plain_find() {
        let d = translate(&QueryParams::new()).unwrap();
        assert_eq!(d, QueryDescriptor::find());
    }

    #[test]
    fn split_operator_recognizes_known_tokens_only() {
        assert_eq!(split_operator("age[gte]"), ("age", Some(Operator::Gte)));
        assert_eq!(split_operator("a.b[in]"), ("a.b", Some(Operator::In)));
        assert_eq!(split_operator("age[between]"), ("age[between]", None));
        assert_eq!(split_operator("[gt]"), ("[gt]", None));
        assert_eq!(split_operator("age"), ("age", None));
    }

    #[test]
    fn operators_build_clauses() {
        let d = translate(&params(&[
            ("age[gte]", "18"),
            ("age[lte]", "65"),
            ("tag[in]", "a, b,,c"),
            ("name[regex]", "123"),
            ("email[exists]", "false"),
            ("status[ne]", "closed"),
        ]))
        .unwrap();
        assert_eq!(
            d.filter.to_document(),
            doc! {
                "age": {"$gte": 18, "$lte": 65},
                "email": {"$exists": false},
                "name": {"$regex": "123"},
                "status": {"$ne": "closed"},
                "tag": {"$in": ["a", "b", "c"]},
            }
        );
    }

    #[test]
    fn repeated_plain_key_becomes_in_set() {
        let d = translate(&params(&[("n", "1"), ("n", "2")])).unwrap();
        assert_eq!(d.filter.to_document(), doc! {"n": {"$in": [1, 2]}});
    }

    #[test]
    fn distinct_param_selects_mode_and_target() {
        let d = translate(&params(&[("distinct", "email"), ("type", "count")])).unwrap();
        assert_eq!(d.mode, QueryMode::Distinct);
        assert_eq!(d.distinct_field(), Some("email"));
        assert!(d.filter.is_empty());
    }

    #[test]
    fn distinct_type_needs_a_single_field() {
        let d = translate(&params(&[("type", "distinct"), ("fields", "email")])).unwrap();
        assert_eq!(d.distinct_field(), Some("email"));
        assert!(d.projection().is_none());
        let err = translate(&params(&[("type", "distinct"), ("fields", "a,b")])).unwrap_err();
        assert!(matches!(err, ParseError::MissingDistinctField));
        let err = translate(&params(&[("type", "distinct")])).unwrap_err();
        assert!(matches!(err, ParseError::MissingDistinctField));
    }

    #[test]
    fn flags_and_hints() {
        let d = translate(&params(&[
            ("flatten", ""),
            ("maxTimeMS", "250"),
            ("explain", "executionStats"),
            ("populate", "owner,tags,owner"),
        ]))
        .unwrap();
        assert!(d.flatten);
        assert_eq!(d.exec.max_time_ms, Some(250));
        assert_eq!(d.exec.explain, Some(Explain::Verbosity("executionStats".into())));
        assert_eq!(d.populate, vec!["owner", "tags", "owner"]);
        assert!(d.filter.is_empty());

        let d = translate(&params(&[("explain", "false")])).unwrap();
        assert_eq!(d.exec.explain, Some(Explain::Flag(false)));
        assert!(d.exec.explain_requested().is_none());

        let err = translate(&params(&[("flatten", "maybe")])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFlag { param: "flatten", .. }));
        let err = translate(&params(&[("maxTimeMS", "soon")])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidInteger { param: "maxTimeMS", .. }));
    }

    #[test]
    fn map_reduce_programs_are_decoded() {
        let d = translate(&params(&[
            ("map", "function()%20%7B%20emit(this.k%2C%201)%3B%20%7D"),
            ("reduce", "function(k, v) { return Array.sum(v); }"),
            ("scope", "%7B%22factor%22%3A2%7D"),
            ("finalize", "function(k, v) { return v * factor; }"),
            ("limit", "5"),
            ("kind", "x"),
        ]))
        .unwrap();
        assert_eq!(d.mode, QueryMode::MapReduce);
        let mr = d.map_reduce.unwrap();
        assert_eq!(mr.map, "function() { emit(this.k, 1); }");
        assert_eq!(mr.scope.unwrap().get("factor"), Some(&serde_json::json!(2)));
        assert!(mr.finalize.is_some());
        assert_eq!(d.limit, Some(5));
        assert_eq!(d.filter.to_document(), doc! {"kind": "x"});
    }

    #[test]
    fn map_reduce_errors() {
        let err = translate(&params(&[("map", "function(){}")])).unwrap_err();
        assert!(matches!(err, ParseError::IncompleteMapReduce));
        let err = translate(&params(&[("type", "mapReduce")])).unwrap_err();
        assert!(matches!(err, ParseError::IncompleteMapReduce));
        let err = translate(&params(&[("map", "f"), ("reduce", "  ")])).unwrap_err();
        assert!(matches!(err, ParseError::EmptyProgram("reduce")));
        let err =
            translate(&params(&[("map", "f"), ("reduce", "g"), ("scope", "{oops")])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidScope(_)));
        let err = translate(&params(&[("map", "f"), ("reduce", "g"), ("scope", "[1]")])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidScope(_)));
        let err = translate(&params(&[("map", "%FF"), ("reduce", "g")])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidEncoding("map")));
    }

    #[test]
    fn logs_the_descriptor_at_debug() {
        let log = Arc::new(MemoryLog::new());
        let t = Translator::new(log.clone());
        t.translate(&params(&[("a", "1")])).unwrap();
        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[DEBUG] translated 1 params into find"));
    }

    #[test]
    fn repeated_keys_with_commas_survive_re_encoding() {
        let orig = translate(&params(&[("n", "a,b"), ("n", "c")])).unwrap().filter;
        assert_eq!(orig.to_document(), doc! {"n": {"$in": ["a,b", "c"]}});
        let back: QueryParams = orig.to_params().into_iter().collect();
        let back = translate(&back).unwrap().filter;
        assert!(orig.semantically_eq(&back), "{orig:?} vs {back:?}");
    }

    #[test]
    fn set_members_unescape_commas_and_backslashes() {
        let d = translate(&params(&[("n[nin]", r"a\,b, c\\d ,e\f"), ("n[nin]", "g")])).unwrap();
        assert_eq!(d.filter.to_document(), doc! {"n": {"$nin": ["a,b", r"c\d", r"e\f", "g"]}});
    }
}
