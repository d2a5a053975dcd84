//! Defaults, file and environment precedence for a full configuration.

use camino::Utf8PathBuf;
use chbackup_core::{Config, ConfigError};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
general:
  remote_storage: cos
  backups_to_keep_remote: 7
cos:
  url: https://backups-1250000000.cos.ap-guangzhou.myqcloud.com
  secret_id: AKIDEXAMPLE
  secret_key: secret
  compression_format: lz4
api:
  listen: 0.0.0.0:7171
"#;

fn config_path(dir: &TempDir) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("config.yml")).expect("Invalid UTF-8 path");
    fs::write(&path, CONFIG).unwrap();
    path
}

#[test]
fn test_layers_combine() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::from_file(&config_path(&dir)).unwrap();

    let env: HashMap<&str, &str> = [("COS_TIMEOUT", "30s"), ("BACKUPS_TO_KEEP_REMOTE", "3")].into();
    config
        .apply_overrides_from(|name| env.get(name).map(|v| v.to_string()))
        .unwrap();
    config.validate().unwrap();

    assert_eq!(config.general.backups_to_keep_remote, 3);
    assert_eq!(config.cos.timeout, "30s");
    assert_eq!(config.compression_format(), "lz4");
    assert_eq!(config.archive_extension(), "tar.lz4");
    assert_eq!(config.api.listen, "0.0.0.0:7171");
    assert!(config.api.enable_metrics);
    assert_eq!(config.ftp, Config::default().ftp);
}

#[test]
fn test_invalid_overlay_aborts() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::from_file(&config_path(&dir)).unwrap();

    let err = config
        .apply_overrides_from(|name| (name == "COS_COMPRESSION_LEVEL").then(|| "max".to_string()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "COS_COMPRESSION_LEVEL"));
}
