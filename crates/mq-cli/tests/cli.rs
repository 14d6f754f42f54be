//! Tests for the `mq` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn mq() -> Command {
    let mut command = Command::cargo_bin("mq").unwrap();
    command.env_clear();
    command
}

#[test]
fn test_help_lists_commands() {
    mq().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("consume"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_without_endpoint_exits_with_configuration_code() {
    mq().arg("config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("endpoint"));
}

#[test]
fn test_missing_config_file_exits_with_configuration_code() {
    mq().args(["--config", "/definitely/not/here/mq.toml", "config"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_show_masks_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mq.toml");
    std::fs::write(
        &path,
        r#"
[client]
endpoint = "http://1234.mqrest.cn-hangzhou.aliyuncs.com"
access_key = "AccessKeyValue"
secret_key = "SecretKeyValue"
"#,
    )
    .unwrap();

    mq().arg("--config")
        .arg(&path)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1234.mqrest.cn-hangzhou.aliyuncs.com"))
        .stdout(predicate::str::contains("SecretKeyValue").not());
}

#[test]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mq.toml");
    std::fs::write(
        &path,
        r#"
[client]
endpoint = "http://file.example.com"
access_key = "ak"
secret_key = "sk"
"#,
    )
    .unwrap();

    mq().arg("--config")
        .arg(&path)
        .env("MQ_CLIENT__ENDPOINT", "http://env.example.com")
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://env.example.com"));
}

#[test]
fn test_send_without_credentials_exits_with_configuration_code() {
    mq().args(["send", "--topic", "orders", "hello"])
        .assert()
        .code(1);
}
