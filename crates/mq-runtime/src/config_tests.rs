//! Tests for client configuration.

use super::*;

fn valid_config() -> ClientConfig {
    ClientConfig {
        endpoint: "http://1234.mqrest.cn-hangzhou.aliyuncs.com".to_string(),
        instance_id: Some("MQ_INST_1234_BXyz".to_string()),
        access_key: "LTAI4FakeAccessKey".to_string(),
        secret_key: "FakeSecretKeyValue".to_string(),
        security_token: None,
        request_timeout_seconds: 40,
    }
}

#[test]
fn test_valid_config_passes() {
    assert!(valid_config().validate().is_ok());
}

#[test]
fn test_missing_endpoint_is_reported() {
    let config = ClientConfig {
        endpoint: "  ".to_string(),
        ..valid_config()
    };

    match config.validate() {
        Err(ConfigurationError::Missing { key }) => assert_eq!(key, "endpoint"),
        other => panic!("Expected Missing endpoint, got: {:?}", other),
    }
}

#[test]
fn test_non_http_endpoint_is_rejected() {
    let config = ClientConfig {
        endpoint: "ftp://example.com".to_string(),
        ..valid_config()
    };

    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));

    let config = ClientConfig {
        endpoint: "not a url".to_string(),
        ..valid_config()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));
}

#[test]
fn test_missing_credentials_are_reported() {
    let config = ClientConfig {
        secret_key: String::new(),
        ..valid_config()
    };

    match config.validate() {
        Err(ConfigurationError::Missing { key }) => assert_eq!(key, "secret_key"),
        other => panic!("Expected Missing secret_key, got: {:?}", other),
    }
}

#[test]
fn test_debug_output_redacts_secrets() {
    let config = ClientConfig {
        security_token: Some("sts-token-value".to_string()),
        ..valid_config()
    };

    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("FakeSecretKeyValue"));
    assert!(!rendered.contains("sts-token-value"));
    assert!(!rendered.contains("LTAI4FakeAccessKey"));
    assert!(rendered.contains("LTAI****"));
}

#[test]
fn test_redacted_copy_masks_credentials() {
    let redacted = valid_config().redacted();

    assert_eq!(redacted.access_key, "LTAI****");
    assert_eq!(redacted.secret_key, "Fake****");
    assert_eq!(redacted.endpoint, valid_config().endpoint);
}

#[test]
fn test_deserialize_uses_defaults_for_missing_fields() {
    let config: ClientConfig =
        serde_json::from_str(r#"{"endpoint": "http://localhost:9876"}"#).unwrap();

    assert_eq!(config.endpoint, "http://localhost:9876");
    assert_eq!(config.request_timeout_seconds, 40);
    assert_eq!(config.instance_id, None);
}
