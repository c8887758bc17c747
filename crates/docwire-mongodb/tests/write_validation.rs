//! Write validation through the selector and the validate-then-encode path

use bson::{doc, Document};
use docwire_mongodb::{
    validate_document, DocwireError, DottedKeyPolicy, FieldNamePolicy, ValidatorSelector,
    WriteKind, WriteRequest,
};
use std::sync::Arc;

fn selector(policy: DottedKeyPolicy) -> ValidatorSelector {
    ValidatorSelector::new(FieldNamePolicy::new(policy))
}

fn rejected_name(err: DocwireError) -> (String, usize) {
    match err {
        DocwireError::InvalidFieldName(e) => (e.name, e.depth),
        other => panic!("expected an invalid field name, got {other}"),
    }
}

#[test]
fn test_kind_table() {
    let selector = selector(DottedKeyPolicy::Reject);
    let update = doc! { "$set": { "name": "x" } };
    let replacement = doc! { "name": "x" };

    let cases: &[(WriteKind, &Document, bool)] = &[
        (WriteKind::Replacement, &update, false),
        (WriteKind::Replacement, &replacement, true),
        (WriteKind::FieldUpdate, &update, true),
        (WriteKind::FieldUpdate, &replacement, false),
        (WriteKind::Unspecified, &update, true),
        (WriteKind::Unspecified, &replacement, true),
    ];

    for (kind, document, accepted) in cases {
        let result = validate_document(selector.select(*kind), document);
        assert_eq!(result.is_ok(), *accepted, "{:?} on {}", kind, document);
    }
}

#[test]
fn test_update_with_dotted_path_under_operator() {
    let selector = selector(DottedKeyPolicy::Reject);
    let request = WriteRequest::update(doc! { "$set": { "a.b": 1 }, "$inc": { "n": 1 } });
    assert!(request.validate(&selector).is_ok());
}

#[test]
fn test_update_mixing_operator_and_plain_key() {
    let selector = selector(DottedKeyPolicy::Reject);
    let request = WriteRequest::update(doc! { "$set": 1, "x": 2 });
    let (name, depth) = rejected_name(request.validate(&selector).unwrap_err());
    assert_eq!(name, "x");
    assert_eq!(depth, 0);
}

#[test]
fn test_replacement_top_level_dotted_key_depends_on_policy() {
    let request = WriteRequest::replacement(doc! { "a.b": 1 });
    assert!(request.validate(&selector(DottedKeyPolicy::Reject)).is_err());
    assert!(request.validate(&selector(DottedKeyPolicy::Allow)).is_ok());

    let negotiated = selector(DottedKeyPolicy::for_wire_version(17));
    assert!(request.validate(&negotiated).is_ok());
}

#[test]
fn test_replacement_rejects_operator_deep_inside_arrays() {
    let selector = selector(DottedKeyPolicy::Allow);
    let request = WriteRequest::replacement(doc! {
        "lines": [ [ { "sku": "a" } ], [ { "$set": { "sku": "b" } } ] ],
    });
    let (name, depth) = rejected_name(request.validate(&selector).unwrap_err());
    assert_eq!(name, "$set");
    assert_eq!(depth, 1);
}

#[test]
fn test_replacement_allows_dbref() {
    let selector = selector(DottedKeyPolicy::Reject);
    let request = WriteRequest::replacement(doc! {
        "owner": { "$ref": "users", "$id": 7, "$db": "auth" },
    });
    assert!(request.validate(&selector).is_ok());
}

#[test]
fn test_encode_never_emits_bytes_for_invalid_document() {
    let selector = selector(DottedKeyPolicy::Reject);

    let bad = WriteRequest::new(WriteKind::Replacement, doc! { "ok": 1, "$unset": { "x": "" } });
    assert!(bad.encode(&selector).is_err());

    let good = WriteRequest::new(WriteKind::FieldUpdate, doc! { "$unset": { "x": "" } });
    let bytes = good.encode(&selector).unwrap();
    assert_eq!(Document::from_reader(bytes.as_slice()).unwrap(), *good.document());
}

#[test]
fn test_selector_shared_across_threads() {
    let selector = Arc::new(selector(DottedKeyPolicy::Reject));
    let handles: Vec<_> = (0..4_i32)
        .map(|i| {
            let selector = Arc::clone(&selector);
            std::thread::spawn(move || {
                let mut fields = Document::new();
                fields.insert(format!("f{}", i), i);
                let update = WriteRequest::update(doc! { "$set": fields.clone() });
                let replacement = WriteRequest::replacement(fields);
                update.validate(&selector).is_ok() && replacement.validate(&selector).is_ok()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
