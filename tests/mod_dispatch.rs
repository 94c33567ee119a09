use bson::{Bson, Document, doc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use urlquery::query::{Dispatcher, QueryOutput, QueryParams, translate};
use urlquery::{ExecOptions, MemoryCollection, MemoryLog, QueryError, StorageError};

fn people() -> Arc<MemoryCollection> {
    let col = Arc::new(MemoryCollection::new("people"));
    col.insert_many([
        doc! {"name": "ann", "age": 31, "email": "ann@x.io", "addr": {"city": "oslo", "zip": "0150"}},
        doc! {"name": "bob", "age": 17, "email": "bob@x.io", "addr": {"city": "bergen", "zip": "5003"}},
        doc! {"name": "cid", "age": 45, "email": "ann@x.io", "addr": {"city": "oslo", "zip": "0151"}},
        doc! {"name": "dag", "age": 62, "email": "dag@x.io", "active": false},
    ]);
    col
}

async fn run(col: &Arc<MemoryCollection>, q: &str, opts: ExecOptions) -> Result<QueryOutput, QueryError> {
    let desc = translate(&QueryParams::from_query_string(q))?;
    Dispatcher::silent(Arc::clone(col)).execute(&desc, &opts).await
}

fn names(out: &QueryOutput) -> Vec<String> {
    let QueryOutput::Records(docs) = out else { panic!("expected records, got {out:?}") };
    docs.iter().map(|d| d.get_str("name").unwrap().to_owned()).collect()
}

#[tokio::test]
async fn count_matches_reference_dataset() {
    let col = people();
    for (q, expected) in [
        ("type=count", 4),
        ("type=count&age[gte]=18", 3),
        ("type=count&addr.city=oslo", 2),
        ("type=count&age[gte]=18&age[lte]=50", 2),
        ("type=count&active[exists]=true", 1),
        ("type=count&name[regex]=^[ab]", 2),
    ] {
        let out = run(&col, q, ExecOptions::default()).await.unwrap();
        assert_eq!(out, QueryOutput::Count { count: expected }, "{q}");
        assert_eq!(out.to_bson(), Bson::Document(doc! {"count": expected as i64}));
    }
}

#[tokio::test]
async fn distinct_is_order_independent() {
    let col = people();
    let out = run(&col, "fields=email&type=distinct", ExecOptions::default()).await.unwrap();
    let QueryOutput::Values(vals) = out else { panic!("expected values") };
    let got: HashSet<String> = vals.iter().map(|v| v.as_str().unwrap().to_owned()).collect();
    let want: HashSet<String> =
        ["ann@x.io", "bob@x.io", "dag@x.io"].into_iter().map(str::to_owned).collect();
    assert_eq!(got, want);
    assert_eq!(vals.len(), 3);
}

#[tokio::test]
async fn find_sorts_pages_and_projects() {
    let col = people();
    let out = run(&col, "sort=-age&skip=1&limit=2&fields=name", ExecOptions::lean()).await.unwrap();
    assert_eq!(names(&out), vec!["cid", "ann"]);
    let QueryOutput::Records(docs) = out else { unreachable!() };
    assert!(docs.iter().all(|d| d.contains_key("_id") && !d.contains_key("age")));
}

#[tokio::test]
async fn flatten_leaves_no_nested_documents() {
    let col = Arc::new(MemoryCollection::new("nested"));
    col.insert(doc! {"_id": 1, "a": {"b": 1}});
    let out = run(&col, "flatten=true", ExecOptions::lean()).await.unwrap();
    assert_eq!(out, QueryOutput::Records(vec![doc! {"_id": 1, "a.b": 1}]));
}

#[tokio::test]
async fn find_one_downgrades_to_a_single_record() {
    let col = people();
    let out = run(&col, "type=findOne&sort=age", ExecOptions::lean()).await.unwrap();
    let QueryOutput::Record(Some(doc)) = out else { panic!("expected one record") };
    assert_eq!(doc.get_str("name").unwrap(), "bob");

    let none = run(&col, "type=findOne&name=nobody", ExecOptions::lean()).await.unwrap();
    assert_eq!(none.to_bson(), Bson::Null);
}

#[tokio::test]
async fn lean_and_default_differ_only_by_virtuals() {
    let col = people();
    let full = run(&col, "sort=name", ExecOptions::default()).await.unwrap();
    let lean = run(&col, "sort=name", ExecOptions::lean()).await.unwrap();
    let (QueryOutput::Records(full), QueryOutput::Records(lean)) = (full, lean) else {
        panic!("expected records")
    };
    for (f, l) in full.iter().zip(&lean) {
        let id = match l.get("_id") {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            other => panic!("unexpected id {other:?}"),
        };
        assert_eq!(f.get_str("id").unwrap(), id);
        let mut stripped = f.clone();
        stripped.remove("id");
        assert_eq!(&stripped, l);
    }
}

#[tokio::test]
async fn aggregate_wraps_filter_in_match() {
    let col = people();
    let out = run(&col, "type=aggregate&addr.city=oslo", ExecOptions::default()).await.unwrap();
    let QueryOutput::Documents(docs) = out else { panic!("expected documents") };
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn unsupported_mode_returns_empty_object() {
    let col = people();
    let log = Arc::new(MemoryLog::new());
    let desc = translate(&QueryParams::from_query_string("type=remove&name=ann")).unwrap();
    let out = Dispatcher::new(Arc::clone(&col), log.clone())
        .execute(&desc, &ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(out.to_bson(), Bson::Document(Document::new()));
    assert_eq!(out.to_json().unwrap(), serde_json::json!({}));
    assert_eq!(log.errors().len(), 1);
    assert_eq!(col.len(), 4);
}

#[tokio::test]
async fn map_reduce_error_is_forwarded() {
    let col = people();
    let err = run(&col, "map=m&reduce=r", ExecOptions::default()).await.unwrap_err();
    assert!(matches!(err, QueryError::Storage(StorageError::Unsupported(_))));
}

#[tokio::test]
async fn callback_and_future_payloads_are_identical() {
    let col = people();
    let dispatcher = Dispatcher::silent(Arc::clone(&col));
    for q in ["sort=age", "type=count&age[gt]=20", "fields=email&type=distinct", "type=nope"] {
        let desc = translate(&QueryParams::from_query_string(q)).unwrap();
        let opts = ExecOptions::lean();
        let via_future = dispatcher.execute(&desc, &opts).await.unwrap();
        let mut via_callback = None;
        dispatcher.execute_with(&desc, &opts, |r| via_callback = Some(r)).await;
        let via_callback = via_callback.unwrap().unwrap();
        assert_eq!(via_future, via_callback, "{q}");
        assert_eq!(
            serde_json::to_string(&via_future.to_json().unwrap()).unwrap(),
            serde_json::to_string(&via_callback.to_json().unwrap()).unwrap(),
        );
    }
}

#[tokio::test]
async fn population_expands_references_in_order() {
    let owners = Arc::new(MemoryCollection::new("owners"));
    owners.insert_many([doc! {"_id": "o1", "name": "olga"}, doc! {"_id": "o2", "name": "per"}]);
    let teams = Arc::new(MemoryCollection::new("teams"));
    teams.add_relation("members", owners);
    teams.insert(doc! {"_id": "t1", "members": ["o2", "o1", "ghost"]});

    let out = run(&teams, "populate=members", ExecOptions::lean()).await.unwrap();
    let QueryOutput::Records(docs) = out else { panic!("expected records") };
    let members: Vec<&str> = docs[0]
        .get_array("members")
        .unwrap()
        .iter()
        .map(|m| m.as_document().unwrap().get_str("name").unwrap())
        .collect();
    assert_eq!(members, vec!["per", "olga"]);
}

#[tokio::test]
async fn expired_deadline_surfaces_timeout() {
    let col = people();
    col.add_virtual(
        "slow",
        Arc::new(|_: &Document| {
            std::thread::sleep(Duration::from_millis(5));
            None
        }),
    );
    let err = run(&col, "maxTimeMS=1", ExecOptions::default()).await.unwrap_err();
    assert!(matches!(err, QueryError::Storage(StorageError::Timeout { max_time_ms: 1 })), "{err}");

    let out = run(&col, "sort=name", ExecOptions::default()).await.unwrap();
    assert_eq!(names(&out), vec!["ann", "bob", "cid", "dag"]);
}

#[cfg(feature = "regex")]
#[tokio::test]
async fn invalid_regex_is_an_invalid_filter() {
    let col = people();
    let err = run(&col, "type=count&name[regex]=(", ExecOptions::default()).await.unwrap_err();
    assert!(matches!(err, QueryError::Storage(StorageError::InvalidFilter(_))), "{err}");
}

#[tokio::test]
async fn mixed_projection_is_an_invalid_filter() {
    let col = people();
    let err = run(&col, "fields=name,-age", ExecOptions::lean()).await.unwrap_err();
    assert!(matches!(err, QueryError::Storage(StorageError::InvalidFilter(_))), "{err}");

    let out = run(&col, "fields=name,-_id&sort=name&limit=1", ExecOptions::lean()).await.unwrap();
    assert_eq!(out, QueryOutput::Records(vec![doc! {"name": "ann"}]));
}
