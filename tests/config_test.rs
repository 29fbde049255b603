//! Tests for configuration and secrets loading from disk.

use std::io::Write;

use huginn::config::{GovernorConfig, Secrets};

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn load_explicit_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "config.toml",
        r#"
            [limits]
            max_requests = 4
            window_ms = 20000

            [contexts.timeline]
            max_requests = 2
        "#,
    );

    let config = GovernorConfig::load(Some(&path)).unwrap();
    assert_eq!(config.limits.max_requests, 4);
    let dispatcher = config.dispatcher_config();
    assert_eq!(
        dispatcher.limits_for("dashboard").effective_min_spacing(),
        std::time::Duration::from_secs(5)
    );
    assert_eq!(dispatcher.limits_for("timeline").max_requests, 2);
}

#[test]
fn malformed_config_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "config.toml", "[limits\nmax_requests = ");
    let err = GovernorConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn load_or_default_requires_explicit_file_to_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    assert!(GovernorConfig::load_or_default(Some(&missing)).is_err());
}

#[cfg(unix)]
#[test]
fn secrets_with_private_permissions_load() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "secrets.toml",
        r#"
            [default]
            api_key = "shared"

            [contexts.insights_anomalies]
            api_key = "anomalies"
        "#,
    );
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

    let secrets = Secrets::load_from_path(&path).unwrap();
    let credentials = secrets.credentials(&[]);
    assert_eq!(
        credentials.resolve("insights_anomalies").unwrap().expose(),
        "anomalies"
    );
    assert_eq!(credentials.resolve("dashboard").unwrap().expose(), "shared");
}

#[cfg(unix)]
#[test]
fn world_readable_secrets_are_rejected() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "secrets.toml", "[default]\napi_key = \"shared\"\n");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

    let err = Secrets::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("insecure permissions"));
}
