//! Rule set construction and validation.
//!
//! # Responsibilities
//! - Turn raw `{name?, condition, destination}` records into compiled rules
//! - Enforce the destination safety checks, in declaration order
//! - Compile every condition before any request is served
//!
//! # Design Decisions
//! - Validation is all-or-nothing: one bad rule rejects the whole set
//! - Destinations must point at the trusted provider host; anything else
//!   could route traffic back into this service and loop forever
//! - Rule order is preserved exactly as declared (first match wins)

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::expr::{CompileError, Engine, Program};
use crate::payload::condition_schema;

/// The only hostname configured and default destinations may use. The
/// service's own inbound path looks identical to a downstream webhook
/// path, so an unrestricted destination could forward to itself.
pub const TRUSTED_WEBHOOK_HOST: &str = "hooks.slack.com";

/// Raw rule record as it appears in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Optional identifier; defaults to `rule-<index>`.
    pub name: String,
    /// Boolean condition source, compiled at load time.
    pub condition: String,
    /// Absolute webhook URL on the trusted provider host.
    pub destination: String,
}

/// A validated rule: compiled condition plus parsed destination.
#[derive(Debug)]
pub struct Rule {
    name: String,
    program: Program,
    destination: Url,
}

impl Rule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }
}

/// Ordered, immutable-after-build rule list. Shared read-only by all
/// request workers.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

/// Configuration-time rule failure. Fatal to startup: the process must
/// not serve with a partially valid rule set.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("condition is required for rule {index}")]
    MissingCondition { index: usize },
    #[error("destination is required for rule {index}")]
    MissingDestination { index: usize },
    #[error("invalid destination url for rule {index}: {source}")]
    InvalidUrl {
        index: usize,
        source: url::ParseError,
    },
    #[error("unsupported destination scheme for rule {index}: {scheme}")]
    UnsupportedScheme { index: usize, scheme: String },
    #[error("untrusted destination host for rule {index}: {host}")]
    UntrustedHost { index: usize, host: String },
    #[error("failed to compile condition for rule {index}: {source}")]
    BadCondition {
        index: usize,
        source: CompileError,
    },
}

impl RuleSet {
    /// Build and validate a rule set from raw configuration records.
    ///
    /// Rules are processed in declaration order; the first failure
    /// aborts the build.
    pub fn build(configs: &[RuleConfig]) -> Result<Self, ValidationError> {
        let engine = Engine::new(condition_schema());
        let mut rules = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let name = if config.name.is_empty() {
                format!("rule-{index}")
            } else {
                config.name.clone()
            };
            if config.condition.is_empty() {
                return Err(ValidationError::MissingCondition { index });
            }
            if config.destination.is_empty() {
                return Err(ValidationError::MissingDestination { index });
            }

            let destination = Url::parse(&config.destination)
                .map_err(|source| ValidationError::InvalidUrl { index, source })?;
            let scheme = destination.scheme();
            if scheme != "http" && scheme != "https" {
                return Err(ValidationError::UnsupportedScheme {
                    index,
                    scheme: scheme.to_string(),
                });
            }
            let host = destination.host_str().unwrap_or_default();
            if host != TRUSTED_WEBHOOK_HOST {
                tracing::warn!(
                    rule_index = index,
                    destination = %config.destination,
                    "destination host must be {}; other hosts can forward traffic \
                     back into this service and create an infinite loop",
                    TRUSTED_WEBHOOK_HOST,
                );
                return Err(ValidationError::UntrustedHost {
                    index,
                    host: host.to_string(),
                });
            }

            let program = engine
                .compile(&config.condition)
                .map_err(|source| ValidationError::BadCondition { index, source })?;

            rules.push(Rule {
                name,
                program,
                destination,
            });
        }

        Ok(Self { rules })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, condition: &str, destination: &str) -> RuleConfig {
        RuleConfig {
            name: name.to_string(),
            condition: condition.to_string(),
            destination: destination.to_string(),
        }
    }

    const DEST_A: &str = "https://hooks.slack.com/services/T00000000/B00000000/AAAA";
    const DEST_B: &str = "https://hooks.slack.com/services/T00000000/B00000000/BBBB";

    #[test]
    fn test_build_preserves_order_and_names() {
        let set = RuleSet::build(&[
            rule("", r#"payload.text contains "[service1]""#, DEST_A),
            rule("second", r#"payload.text contains "[service2]""#, DEST_B),
        ])
        .unwrap();

        assert_eq!(set.len(), 2);
        let names: Vec<&str> = set.iter().map(Rule::name).collect();
        assert_eq!(names, vec!["rule-0", "second"]);
        assert_eq!(set.iter().next().unwrap().destination().as_str(), DEST_A);
    }

    #[test]
    fn test_missing_condition() {
        let err = RuleSet::build(&[rule("r", "", DEST_A)]).unwrap_err();
        assert!(matches!(err, ValidationError::MissingCondition { index: 0 }));
    }

    #[test]
    fn test_missing_destination() {
        let err = RuleSet::build(&[rule("r", "true", "")]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingDestination { index: 0 }
        ));
    }

    #[test]
    fn test_invalid_url() {
        let err = RuleSet::build(&[rule("r", "true", "::not a url::")]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { index: 0, .. }));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err =
            RuleSet::build(&[rule("r", "true", "ftp://hooks.slack.com/services/x")]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnsupportedScheme { index: 0, ref scheme } if scheme == "ftp"
        ));
    }

    #[test]
    fn test_untrusted_host_rejected() {
        let err = RuleSet::build(&[rule(
            "r",
            "true",
            "https://evil.example.com/services/T0/B0/XXX",
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UntrustedHost { index: 0, ref host } if host == "evil.example.com"
        ));
    }

    #[test]
    fn test_untrusted_host_rejected_regardless_of_scheme() {
        let err =
            RuleSet::build(&[rule("r", "true", "http://evil.example.com/hook")]).unwrap_err();
        assert!(matches!(err, ValidationError::UntrustedHost { .. }));
    }

    #[test]
    fn test_bad_condition() {
        let err = RuleSet::build(&[rule("r", "payload.nonexistent == 1", DEST_A)]).unwrap_err();
        assert!(matches!(err, ValidationError::BadCondition { index: 0, .. }));
    }

    #[test]
    fn test_all_or_nothing() {
        // Second rule is broken: the whole set must be rejected.
        let err = RuleSet::build(&[
            rule("ok", "true", DEST_A),
            rule("broken", "%%%", DEST_B),
        ])
        .unwrap_err();
        assert!(matches!(err, ValidationError::BadCondition { index: 1, .. }));
    }

    #[test]
    fn test_empty_set_is_valid() {
        assert!(RuleSet::build(&[]).unwrap().is_empty());
    }
}
