use bson::{Bson, Document};

/// Flatten a nested document into dotted-path keys.
///
/// Array elements are addressed by index (`tags.0`). Empty sub-documents and
/// empty arrays have no leaves and are kept as values.
#[must_use]
pub fn flatten(doc: &Document) -> Document {
    let mut out = Document::new();
    for (k, v) in doc {
        flatten_into(&mut out, k.clone(), v);
    }
    out
}

fn flatten_into(out: &mut Document, prefix: String, value: &Bson) {
    match value {
        Bson::Document(d) if !d.is_empty() => {
            for (k, v) in d {
                flatten_into(out, format!("{prefix}.{k}"), v);
            }
        }
        Bson::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(out, format!("{prefix}.{i}"), v);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn nested_documents_become_dotted_keys() {
        let d = doc! {"a": {"b": 1, "c": {"d": "x"}}, "e": true};
        assert_eq!(flatten(&d), doc! {"a.b": 1, "a.c.d": "x", "e": true});
    }

    #[test]
    fn arrays_use_indexes() {
        let d = doc! {"tags": ["p", {"q": 2}]};
        assert_eq!(flatten(&d), doc! {"tags.0": "p", "tags.1.q": 2});
    }

    #[test]
    fn empty_containers_are_leaves() {
        let d = doc! {"a": {}, "b": []};
        assert_eq!(flatten(&d), doc! {"a": {}, "b": []});
    }
}
