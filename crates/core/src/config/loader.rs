use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
///
/// `SITECRAWL_CRAWLER__BATCH_SIZE=50` overrides `[crawler] batch_size`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SITECRAWL_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[crawler]
tests = ["test_dns", "test_http"]
max_concurrent_tests = 6

[runner]
interpreter = "python3"
program_extension = ".py"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.crawler.tests, vec!["test_dns", "test_http"]);
        assert_eq!(config.crawler.max_concurrent_tests, 6);
        assert_eq!(config.crawler.batch_size, 100);
        assert_eq!(config.runner.interpreter, Some(PathBuf::from("python3")));
        assert_eq!(config.database.path, PathBuf::from("sitecrawl.db"));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.crawler.tests.len(), 4);
        assert_eq!(config.runner.timeout_ms, 120_000);
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[crawler]
batch_size = "lots"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/sitecrawl.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/var/lib/sitecrawl/crawl.db"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/sitecrawl/crawl.db")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "sitecrawl.toml",
                r#"
[crawler]
batch_size = 10
"#,
            )?;
            jail.set_env("SITECRAWL_CRAWLER__BATCH_SIZE", "25");
            jail.set_env("SITECRAWL_RUNNER__TIMEOUT_MS", "5000");

            let config = load_config(Path::new("sitecrawl.toml")).unwrap();
            assert_eq!(config.crawler.batch_size, 25);
            assert_eq!(config.runner.timeout_ms, 5000);
            Ok(())
        });
    }
}
