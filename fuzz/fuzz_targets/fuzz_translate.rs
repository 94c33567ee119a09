#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        // Arbitrary query strings must translate or fail cleanly
        let params = urlquery::query::QueryParams::from_query_string(s);
        if let Ok(desc) = urlquery::query::translate(&params) {
            let _ = desc.filter.to_document();
            let _ = desc.filter.to_params();
        }
    }
});
