//! Tests for message types and property encoding.

use super::*;

#[test]
fn test_message_id_rejects_empty() {
    assert!(MessageId::from_str("").is_err());

    let id = MessageId::from_str("1E0578FE110F1B8D68A94B1E6D8B0000").unwrap();
    assert_eq!(id.as_str(), "1E0578FE110F1B8D68A94B1E6D8B0000");
    assert_eq!(id.to_string(), "1E0578FE110F1B8D68A94B1E6D8B0000");
}

#[test]
fn test_timestamp_millis_conversion() {
    let ts = Timestamp::from_millis(1_700_000_000_123).unwrap();
    assert_eq!(ts.as_millis(), 1_700_000_000_123);
    assert_eq!(ts.to_string(), "2023-11-14 22:13:20.123 UTC");
}

#[test]
fn test_publish_request_skips_empty_property_keys() {
    let request = PublishRequest::new("body").with_properties(&[
        Property::new("a", "1"),
        Property::new("", "dropped"),
        Property::new("b", "2"),
    ]);

    assert_eq!(request.properties.len(), 2);
    assert_eq!(request.properties.get("a").map(String::as_str), Some("1"));
    assert_eq!(request.properties.get("b").map(String::as_str), Some("2"));
}

#[test]
fn test_publish_request_empty_tag_means_no_tag() {
    assert_eq!(PublishRequest::new("x").with_tag("").tag, None);
    assert_eq!(
        PublishRequest::new("x").with_tag("orders").tag.as_deref(),
        Some("orders")
    );
}

#[test]
fn test_encode_properties_is_sorted_and_includes_reserved_keys() {
    let request = PublishRequest::new("body")
        .with_properties(&[Property::new("zone", "eu"), Property::new("app", "shop")])
        .with_message_key("order-42")
        .with_start_deliver_time(Timestamp::from_millis(1_700_000_000_000).unwrap());

    assert_eq!(
        encode_properties(&request),
        "KEYS:order-42|__STARTDELIVERTIME:1700000000000|app:shop|zone:eu|"
    );
}

#[test]
fn test_encode_properties_empty() {
    assert_eq!(encode_properties(&PublishRequest::new("body")), "");
}

#[test]
fn test_decode_properties_separates_reserved_keys() {
    let decoded = decode_properties("KEYS:order-42|__STARTDELIVERTIME:1700000000000|app:shop|");

    assert_eq!(decoded.message_key.as_deref(), Some("order-42"));
    assert_eq!(decoded.start_deliver_time, Some(1_700_000_000_000));
    assert_eq!(decoded.user.len(), 1);
    assert_eq!(decoded.user.get("app").map(String::as_str), Some("shop"));
}

#[test]
fn test_decode_properties_ignores_malformed_entries() {
    let decoded = decode_properties("novalue||url:http://host:8080|");

    assert_eq!(decoded.user.len(), 1);
    assert_eq!(
        decoded.user.get("url").map(String::as_str),
        Some("http://host:8080")
    );
}
