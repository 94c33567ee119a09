#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else { return };
    let bson::Bson::Document(filter) = urlquery::storage::json_to_bson(&value) else { return };
    if let Ok(pred) = urlquery::storage::Predicate::compile(&filter) {
        let sample = bson::doc! {"a": 1, "b": {"c": [1, "x", null]}, "s": "text"};
        let _ = urlquery::storage::eval_predicate(&sample, &pred);
    }
});
