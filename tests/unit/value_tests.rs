//! Unit tests for `StateValue` literal trees.

use std::collections::BTreeMap;

use campaign_client::models::value::StateValue;
use serde_json::json;

#[test]
fn default_is_empty_dict() {
    assert_eq!(StateValue::default(), StateValue::empty_dict());
    assert!(StateValue::default().is_dict());
}

#[test]
fn converts_from_json_preserving_structure() {
    let value = StateValue::from(json!({"id": 7, "tags": ["a", "b"], "ratio": 0.5, "ok": true}));

    assert_eq!(value.get("id"), Some(&StateValue::Int(7)));
    assert_eq!(value.get("ratio"), Some(&StateValue::Float(0.5)));
    assert_eq!(value.get("ok"), Some(&StateValue::Bool(true)));
    assert_eq!(
        value.get("tags"),
        Some(&StateValue::List(vec!["a".into(), "b".into()]))
    );
}

/// Two equal trees built in different insertion orders serialize identically.
#[test]
fn canonical_json_is_order_independent() {
    let mut first = BTreeMap::new();
    first.insert("b".to_owned(), StateValue::Int(2));
    first.insert("a".to_owned(), StateValue::Int(1));
    let mut second = BTreeMap::new();
    second.insert("a".to_owned(), StateValue::Int(1));
    second.insert("b".to_owned(), StateValue::Int(2));

    let first = StateValue::Dict(first).to_canonical_json().unwrap();
    let second = StateValue::Dict(second).to_canonical_json().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, r#"{"a":1,"b":2}"#);
}

#[test]
fn opaque_value_is_not_literal_and_fails_to_serialize() {
    let mut map = BTreeMap::new();
    map.insert("f".to_owned(), StateValue::Opaque("function".into()));
    let value = StateValue::Dict(map);

    assert!(!value.is_literal());
    let err = value.to_canonical_json().unwrap_err();
    assert!(err.to_string().contains("function"));
}

#[test]
fn non_finite_float_is_not_literal() {
    let value = StateValue::List(vec![StateValue::Float(f64::NAN)]);
    assert!(!value.is_literal());
    assert!(value.to_canonical_json().is_err());
}

#[test]
fn type_name_of_opaque_is_its_kind() {
    assert_eq!(StateValue::Opaque("builtin".into()).type_name(), "builtin");
    assert_eq!(StateValue::List(Vec::new()).type_name(), "list");
}

#[test]
fn as_dict_mut_allows_in_place_mutation() {
    let mut value = StateValue::empty_dict();
    value
        .as_dict_mut()
        .unwrap()
        .insert("seen".into(), StateValue::Int(1));
    assert_eq!(value.get("seen"), Some(&StateValue::Int(1)));
    assert!(StateValue::Int(1).as_dict_mut().is_none());
}
