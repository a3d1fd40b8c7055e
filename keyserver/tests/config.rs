use std::{fs, time::Duration};

use tempfile::TempDir;

use keyserver::config::KeyServerConfig;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("keyserver.toml");
    fs::write(&path, content).expect("write test file");
    path
}

#[test]
fn missing_path_uses_defaults() {
    let config = KeyServerConfig::load(None).unwrap();

    assert_eq!(config.database.lock_timeout(), Duration::from_secs(5));
    assert_eq!(config.database.pool_size(), 16);
    assert_eq!(config.diagnosis_keys.max_retention_days(), 14);
    assert_eq!(config.keys.encryption_key_validity_days(), 15);
    assert_eq!(config.keys.one_time_code_expiry_minutes(), 1440);
    assert_eq!(config.keys.initial_remaining_keys(), 28);
    assert_eq!(config.maintenance.interval(), Duration::from_secs(3600));
}

#[test]
fn file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[database]
path = "/var/lib/keyserver/keys.db"
lock_timeout = 2

[keys]
one_time_code_expiry_minutes = 60

[maintenance]
interval = 300
"#,
    );

    let config = KeyServerConfig::load(Some(&path)).unwrap();
    assert_eq!(
        config.database.path.as_deref(),
        Some(std::path::Path::new("/var/lib/keyserver/keys.db"))
    );
    assert_eq!(config.database.lock_timeout(), Duration::from_secs(2));
    assert_eq!(config.keys.one_time_code_expiry_minutes(), 60);
    assert_eq!(config.keys.encryption_key_validity_days(), 15);
    assert_eq!(config.maintenance.interval(), Duration::from_secs(300));
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let path = write_config(&dir, "[keys]\nvalidity = 3\n");
    assert!(KeyServerConfig::load(Some(&path)).is_err());

    let path = write_config(&dir, "[network]\n");
    assert!(KeyServerConfig::load(Some(&path)).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(KeyServerConfig::load(Some(&path)).is_err());
}

#[test]
fn example_config_parses_to_defaults() {
    let example = KeyServerConfig::generate_example();
    assert!(example.contains("[database]"));
    assert!(example.contains("#encryption_key_validity_days = 15"));
    assert!(example.contains("#path = \"keyserver.db\""));

    // Every field is commented out.
    let config: KeyServerConfig = toml::from_str(&example).unwrap();
    assert_eq!(config.database.path, None);
    assert_eq!(config.keys.initial_remaining_keys, None);

    // Uncommenting every field reproduces the defaults.
    let uncommented = example
        .lines()
        .map(|line| match line.strip_prefix('#') {
            Some(rest) if rest.contains(" = ") && !rest.starts_with(' ') => rest,
            _ => line,
        })
        .collect::<Vec<_>>()
        .join("\n");
    let config: KeyServerConfig = toml::from_str(&uncommented).unwrap();
    assert_eq!(config.keys.initial_remaining_keys, Some(28));
    assert_eq!(config.database.lock_timeout, Some(5));
    assert_eq!(config.maintenance.interval, Some(3600));
}
