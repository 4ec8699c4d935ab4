//! `QueueConfig` 的序列化契约：字段名采用 snake_case，缺省字段回落到默认值。

use spark_qio::{DEFAULT_LIMIT, DEFAULT_PRINT_CEILING, QueueConfig, QueueMode};

#[test]
fn partial_document_falls_back_to_defaults() {
    let config: QueueConfig =
        serde_json::from_str(r#"{ "limit": 4096, "mode": "message" }"#).expect("解析配置");
    assert_eq!(config.limit, 4096);
    assert_eq!(config.mode, QueueMode::Message);
    assert!(!config.coalesce);
    assert!(!config.noblock);
    assert_eq!(config.print_ceiling, DEFAULT_PRINT_CEILING);
}

#[test]
fn empty_document_is_default_config() {
    let config: QueueConfig = serde_json::from_str("{}").expect("解析配置");
    assert_eq!(config, QueueConfig::default());
    assert_eq!(config.limit, DEFAULT_LIMIT);
}

#[test]
fn serialized_form_uses_snake_case() {
    let config = QueueConfig::new(512)
        .with_coalesce(true)
        .with_kick_always(true);
    let value = serde_json::to_value(&config).expect("序列化配置");
    assert_eq!(value["mode"], "stream");
    assert_eq!(value["kick_always"], true);

    let back: QueueConfig = serde_json::from_value(value).expect("反序列化配置");
    assert_eq!(back, config);
}

#[test]
fn unknown_mode_is_rejected() {
    let err = serde_json::from_str::<QueueConfig>(r#"{ "mode": "datagram" }"#)
        .expect_err("未知模式必须报错");
    assert!(err.to_string().contains("datagram"));
}
