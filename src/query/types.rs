use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query intent. `Unsupported` keeps the offending token for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    Find,
    FindOne,
    Count,
    Distinct,
    Aggregate,
    MapReduce,
    Unsupported(String),
}

impl QueryMode {
    /// Map a `type` parameter token to a mode. Tokens are case-sensitive.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "find" => Self::Find,
            "findOne" => Self::FindOne,
            "count" => Self::Count,
            "distinct" => Self::Distinct,
            "aggregate" => Self::Aggregate,
            "mapReduce" => Self::MapReduce,
            other => Self::Unsupported(other.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Find => "find",
            Self::FindOne => "findOne",
            Self::Count => "count",
            Self::Distinct => "distinct",
            Self::Aggregate => "aggregate",
            Self::MapReduce => "mapReduce",
            Self::Unsupported(t) => t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Desc }
    }
}

/// Filter operators accepted in `field[op]=value` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
}

impl Operator {
    pub const ALL: [Self; 10] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::Nin,
        Self::Exists,
        Self::Regex,
    ];

    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.token() == token)
    }

    /// Bracket token, e.g. `gte`.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Exists => "exists",
            Self::Regex => "regex",
        }
    }

    /// Filter-document key, e.g. `$gte`.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::Exists => "$exists",
            Self::Regex => "$regex",
        }
    }

    #[must_use]
    pub const fn is_set(self) -> bool {
        matches!(self, Self::In | Self::Nin)
    }
}

/// All conditions on one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clause(BTreeMap<Operator, Bson>);

impl Clause {
    #[must_use]
    pub fn get(&self, op: Operator) -> Option<&Bson> {
        self.0.get(&op)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Operator, &Bson)> {
        self.0.iter().map(|(op, v)| (*op, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value of a clause that is a bare equality.
    #[must_use]
    pub fn equality(&self) -> Option<&Bson> {
        if self.0.len() == 1 { self.0.get(&Operator::Eq) } else { None }
    }

    fn set(&mut self, op: Operator, value: Bson) {
        if op.is_set()
            && let (Some(Bson::Array(prev)), Bson::Array(more)) = (self.0.get_mut(&op), &value)
        {
            prev.extend(more.iter().cloned());
            return;
        }
        self.0.insert(op, value);
    }

    fn to_bson(&self) -> Bson {
        if let Some(v) = self.equality() {
            return v.clone();
        }
        let mut d = Document::new();
        for (op, v) in &self.0 {
            d.insert(op.key(), v.clone());
        }
        Bson::Document(d)
    }
}

/// Filter expression: dotted field path to clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter(BTreeMap<String, Clause>);

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition. Set operators accumulate; others replace an earlier value.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, op: Operator, value: impl Into<Bson>) -> Self {
        self.insert(field.into(), op, value.into());
        self
    }

    pub(crate) fn insert(&mut self, field: String, op: Operator, value: Bson) {
        self.0.entry(field).or_default().set(op, value);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Clause> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Clause)> {
        self.0.iter().map(|(k, c)| (k.as_str(), c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a filter document: `{field: value}` or `{field: {"$op": value}}`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut d = Document::new();
        for (field, clause) in &self.0 {
            d.insert(field.clone(), clause.to_bson());
        }
        d
    }

    /// Encode back into request parameters. Translating the result yields a filter
    /// that is [`semantically_eq`](Self::semantically_eq) to this one.
    ///
    /// Set members are comma-joined with `\` and `,` inside a member escaped by a
    /// backslash.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (field, clause) in &self.0 {
            for (op, value) in clause.iter() {
                let key = match op {
                    Operator::Eq => field.clone(),
                    _ => format!("{field}[{}]", op.token()),
                };
                let text = match value {
                    Bson::Array(items) => items
                        .iter()
                        .map(|i| escape_member(&render_scalar(i)))
                        .collect::<Vec<_>>()
                        .join(","),
                    other => render_scalar(other),
                };
                out.push((key, text));
            }
        }
        out
    }

    /// Field-by-field equality that treats numerically equal values of different
    /// BSON number types as the same.
    #[must_use]
    pub fn semantically_eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|(field, a)| {
                other.0.get(field).is_some_and(|b| {
                    a.len() == b.len()
                        && a.iter().all(|(op, va)| b.get(op).is_some_and(|vb| values_eq(va, vb)))
                })
            })
    }
}

fn escape_member(text: &str) -> String {
    text.replace('\\', "\\\\").replace(',', "\\,")
}

fn render_scalar(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(d) => d.to_string(),
        Bson::DateTime(dt) => chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default(),
        Bson::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn values_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Array(xs), Bson::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_eq(x, y))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Projection list or distinct target, depending on the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fields {
    Select(Vec<String>),
    Distinct(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Explain {
    Flag(bool),
    Verbosity(String),
}

impl Explain {
    /// Whether the storage layer should be asked for a plan at all.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }
}

/// Per-request execution hints. Kept apart from the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecHints {
    pub max_time_ms: Option<u64>,
    pub explain: Option<Explain>,
}

impl ExecHints {
    #[must_use]
    pub fn explain_requested(&self) -> Option<&Explain> {
        self.explain.as_ref().filter(|e| e.is_requested())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapReduceSpec {
    pub map: String,
    pub reduce: String,
    pub scope: Option<serde_json::Map<String, serde_json::Value>>,
    pub finalize: Option<String>,
}

/// Fully typed query built by the translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub mode: QueryMode,
    pub filter: Filter,
    pub fields: Option<Fields>,
    pub sort: Option<Vec<SortSpec>>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub populate: Vec<String>,
    pub flatten: bool,
    pub exec: ExecHints,
    pub map_reduce: Option<MapReduceSpec>,
}

impl QueryDescriptor {
    /// A plain `find` with an empty filter.
    #[must_use]
    pub fn find() -> Self {
        Self::with_mode(QueryMode::Find)
    }

    #[must_use]
    pub fn with_mode(mode: QueryMode) -> Self {
        Self {
            mode,
            filter: Filter::new(),
            fields: None,
            sort: None,
            skip: None,
            limit: None,
            populate: Vec::new(),
            flatten: false,
            exec: ExecHints::default(),
            map_reduce: None,
        }
    }

    /// Projection list, if this is a find-style query with `fields`.
    #[must_use]
    pub fn projection(&self) -> Option<&[String]> {
        match &self.fields {
            Some(Fields::Select(f)) => Some(f),
            _ => None,
        }
    }

    /// Distinct target field.
    #[must_use]
    pub fn distinct_field(&self) -> Option<&str> {
        match &self.fields {
            Some(Fields::Distinct(f)) => Some(f),
            _ => None,
        }
    }
}

/// Shaped result of a dispatched query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Records(Vec<Document>),
    Record(Option<Document>),
    Count { count: u64 },
    Values(Vec<Bson>),
    Documents(Vec<Document>),
    MapReduce(Bson),
    /// Soft-fail result for an unsupported mode: `{}`.
    Empty,
}

impl QueryOutput {
    /// Wire-shaped payload: arrays for lists, `null` for no match, `{count: N}`, `{}`.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Records(docs) | Self::Documents(docs) => {
                Bson::Array(docs.iter().cloned().map(Bson::Document).collect())
            }
            Self::Record(doc) => doc.clone().map_or(Bson::Null, Bson::Document),
            Self::Count { count } => {
                let mut d = Document::new();
                d.insert("count", i64::try_from(*count).unwrap_or(i64::MAX));
                Bson::Document(d)
            }
            Self::Values(vals) => Bson::Array(vals.clone()),
            Self::MapReduce(v) => v.clone(),
            Self::Empty => Bson::Document(Document::new()),
        }
    }

    /// Payload as JSON.
    ///
    /// # Errors
    /// Returns an error if a value has no JSON representation.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.to_bson())
    }
}
