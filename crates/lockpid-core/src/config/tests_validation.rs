//! Validation-focused tests for configuration

#[cfg(test)]
mod validation_tests {
    use std::time::Duration;

    use crate::config::Config;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_backoff_is_rejected() {
        let config = Config {
            backoff_ms: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_ms"));
    }

    #[test]
    fn test_lock_file_name_must_be_plain() {
        for bad in ["", "  ", ".", "..", "a/b", "a\\b"] {
            let config = Config {
                lock_file_name: bad.to_string(),
                ..Config::default()
            };
            assert!(config.validate().is_err(), "'{bad}' should be rejected");
        }

        let config = Config {
            lock_file_name: ".lock".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lock_options_from_config() {
        let config = Config {
            wait_ms: Some(2000),
            stale_ms: None,
            ..Config::default()
        };
        let options = config.lock_options();
        assert_eq!(options.wait, Some(Duration::from_millis(2000)));
        assert_eq!(options.stale, None);
        assert_eq!(config.backoff(), Duration::from_millis(1000));
    }
}
