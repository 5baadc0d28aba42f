//! Loading-focused tests for configuration
//!
//! File parsing, path helpers and environment overrides.

#[cfg(test)]
mod loading_tests {
    use serial_test::serial;

    use crate::{
        config::{global_config_path, load_config, load_config_from, load_toml_file, Config, ConfigLayer},
        liveness::LivenessFailurePolicy,
        ErrorKind,
    };

    const ENV_VARS: [&str; 5] = [
        "LOCKPID_BACKOFF_MS",
        "LOCKPID_LOCK_FILE_NAME",
        "LOCKPID_LIVENESS_FAILURE",
        "LOCKPID_WAIT_MS",
        "LOCKPID_STALE_MS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_no_config_files_returns_defaults() {
        clear_env();
        // The crate directory has no .lockpid/config.toml.
        let config = load_config().unwrap();
        assert_eq!(config.backoff_ms, 1000);
        assert_eq!(config.lock_file_name, "lock");
    }

    #[test]
    fn test_global_config_path_names_lockpid() {
        if let Some(path) = global_config_path() {
            assert!(path.ends_with("config.toml"));
            assert!(path.to_string_lossy().contains("lockpid"));
        }
    }

    #[test]
    fn test_full_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "backoff_ms = 200\n\
             lock_file_name = \".owner\"\n\
             liveness_failure = \"assume-dead\"\n\
             wait_ms = 4000\n\
             stale_ms = 1000000\n",
        )
        .unwrap();

        let layer = load_toml_file(&path).unwrap();
        assert_eq!(
            layer,
            ConfigLayer {
                backoff_ms: Some(200),
                lock_file_name: Some(".owner".to_string()),
                liveness_failure: Some(LivenessFailurePolicy::AssumeDead),
                wait_ms: Some(4000),
                stale_ms: Some(1_000_000),
            }
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "wait_ms = 500\n").unwrap();

        let layer = load_toml_file(&path).unwrap();
        assert_eq!(layer.backoff_ms, None);
        let config = Config::default().merge(layer);
        assert_eq!(config.wait_ms, Some(500));
        assert_eq!(config.backoff_ms, 1000);
        assert_eq!(config.liveness_failure, LivenessFailurePolicy::AssumeAlive);
    }

    #[test]
    fn test_project_file_can_reset_global_value_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(&global, "backoff_ms = 250\nliveness_failure = \"assume-dead\"\n").unwrap();
        std::fs::write(&project, "backoff_ms = 1000\nliveness_failure = \"assume-alive\"\n").unwrap();

        let config = Config::default()
            .merge(load_toml_file(&global).unwrap())
            .merge(load_toml_file(&project).unwrap());
        assert_eq!(config.backoff_ms, 1000);
        assert_eq!(config.liveness_failure, LivenessFailurePolicy::AssumeAlive);
    }

    #[test]
    fn test_malformed_toml_returns_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "backoff_ms = \n invalid toml [[[").unwrap();

        let err = load_toml_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_directory_instead_of_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_toml_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("directory"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backoff_ms = 200\nwait_ms = 100\n").unwrap();

        std::env::set_var("LOCKPID_WAIT_MS", "7000");
        std::env::set_var("LOCKPID_LIVENESS_FAILURE", "assume-dead");
        let result = load_config_from(&path);
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.backoff_ms, 200);
        assert_eq!(config.wait_ms, Some(7000));
        assert_eq!(config.liveness_failure, LivenessFailurePolicy::AssumeDead);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_rejected() {
        clear_env();
        std::env::set_var("LOCKPID_BACKOFF_MS", "soon");
        let result = Config::default().apply_env_vars();
        clear_env();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("LOCKPID_BACKOFF_MS"));
    }

    #[test]
    #[serial]
    fn test_env_values_are_validated() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        std::env::set_var("LOCKPID_LOCK_FILE_NAME", "../escape");
        let result = load_config_from(&path);
        clear_env();

        assert!(result.is_err());
    }
}
