use std::ffi::OsString;

use rdb_config::{
    discover_config_path, load_for_workspace, with_config_env_lock, ConfigError, DebuggerConfig,
    RDB_CONFIG_ENV_VAR,
};
use tempfile::tempdir;

struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: impl Into<OsString>) -> Self {
        let prev = std::env::var_os(key);
        std::env::set_var(key, value.into());
        Self { key, prev }
    }

    fn unset(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        std::env::remove_var(key);
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

#[test]
fn prefers_rdb_toml_over_dotfile() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(RDB_CONFIG_ENV_VAR);
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".rdb.toml"), "[transport]\nreply_timeout_ms = 1\n")
            .unwrap();
        assert_eq!(
            discover_config_path(dir.path()).unwrap(),
            dir.path().join(".rdb.toml").canonicalize().unwrap()
        );

        std::fs::write(dir.path().join("rdb.toml"), "[transport]\nreply_timeout_ms = 2\n").unwrap();
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(path.unwrap(), dir.path().join("rdb.toml").canonicalize().unwrap());
        assert_eq!(config.transport.reply_timeout_ms, 2);
    });
}

#[test]
fn env_var_overrides_workspace_files() {
    with_config_env_lock(|| {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("rdb.toml"), "").unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        std::fs::write(
            dir.path().join("conf").join("debug.toml"),
            "[metadata]\nclass_dir = \"classes\"\n",
        )
        .unwrap();

        let _env = EnvVarGuard::set(RDB_CONFIG_ENV_VAR, "conf/debug.toml");
        let (config, path) = load_for_workspace(dir.path()).unwrap();

        let conf_dir = dir.path().join("conf").canonicalize().unwrap();
        assert_eq!(path.unwrap(), conf_dir.join("debug.toml"));
        assert_eq!(config.metadata.class_dir, conf_dir.join("classes"));
    });
}

#[test]
fn missing_config_yields_defaults_rooted_at_workspace() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(RDB_CONFIG_ENV_VAR);
        let dir = tempdir().unwrap();

        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.transport, DebuggerConfig::default().transport);
        assert_eq!(config.metadata.class_dir, dir.path().join("target/debug-info"));
    });
}

#[test]
fn invalid_workspace_config_is_rejected() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(RDB_CONFIG_ENV_VAR);
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("rdb.toml"), "[transport]\nconnect_timeout_ms = 0\n")
            .unwrap();

        assert!(matches!(
            load_for_workspace(dir.path()),
            Err(ConfigError::Invalid {
                field: "transport.connect_timeout_ms",
                ..
            })
        ));
    });
}

#[test]
fn unreadable_env_path_is_an_io_error() {
    with_config_env_lock(|| {
        let dir = tempdir().unwrap();
        let _env = EnvVarGuard::set(RDB_CONFIG_ENV_VAR, dir.path().join("absent.toml"));

        assert!(matches!(
            load_for_workspace(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    });
}
