//! Configuration loading from disk.
//!
//! Raw text is env-templated first, then parsed as TOML. Rule
//! validation and condition compilation happen separately in
//! [`crate::rules::RuleSet::build`].

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DispatcherConfig;
use crate::config::template::{TemplateEngine, TemplateError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to expand config template: {0}")]
    Template(#[from] TemplateError),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load a configuration file, expanding `${env(..)}` placeholders with
/// the standard function table.
pub fn load_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_from_str(&content, &TemplateEngine::with_env_functions())
}

/// Parse configuration text with a caller-supplied template table.
pub fn load_from_str(
    content: &str,
    templates: &TemplateEngine,
) -> Result<DispatcherConfig, ConfigError> {
    let rendered = templates.render(content)?;
    Ok(toml::from_str(&rendered)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_templated_destination() {
        let mut templates = TemplateEngine::new();
        templates.register("must_env", |args: &[String]| {
            assert_eq!(args, ["SLACK_WEBHOOK_URL_FOR_SERVICE1"]);
            Ok("https://hooks.slack.com/services/T0/B0/XXX".to_string())
        });

        let config = load_from_str(
            r#"
            [[rules]]
            name = "service1"
            condition = 'any(payload.attachments.title contains "[service1]")'
            destination = "${must_env(SLACK_WEBHOOK_URL_FOR_SERVICE1)}"
            "#,
            &templates,
        )
        .unwrap();

        assert_eq!(config.rules.len(), 1);
        assert_eq!(
            config.rules[0].destination,
            "https://hooks.slack.com/services/T0/B0/XXX"
        );
    }

    #[test]
    fn test_template_failure_aborts_load() {
        let err = load_from_str(
            r#"
            [[rules]]
            condition = "true"
            destination = "${must_env(DEFINITELY_NOT_SET_ANYWHERE_12345)}"
            "#,
            &TemplateEngine::with_env_functions(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Template(_)));
    }

    #[test]
    fn test_parse_failure() {
        let err = load_from_str("not [ valid ( toml", &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
