//! Environment templating of the raw configuration text.
//!
//! Placeholders of the form `${func(arg, ...)}` are expanded before the
//! TOML parse. Two functions ship by default:
//! - `${env(NAME, default)}` — the variable's value, or `default` when
//!   unset or empty
//! - `${must_env(NAME)}` — the variable's value; aborts the load when
//!   the variable is unset
//!
//! # Design Decisions
//! - The function table is injected at construction, not registered
//!   globally, so tests can supply their own lookups

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template function: {0}")]
    UnknownFunction(String),
    #[error("unterminated template placeholder: {0}")]
    Unterminated(String),
    #[error("{func}: invalid arguments length expected {expected} got {found}")]
    BadArity {
        func: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("must_env: {0} not set")]
    MissingVariable(String),
}

/// A template function: arguments in, replacement text out.
pub type TemplateFn = Arc<dyn Fn(&[String]) -> Result<String, TemplateError> + Send + Sync>;

/// Expands `${func(args)}` placeholders using an explicit function table.
#[derive(Clone, Default)]
pub struct TemplateEngine {
    funcs: HashMap<String, TemplateFn>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard table: `env` and `must_env`.
    pub fn with_env_functions() -> Self {
        let mut engine = Self::new();
        engine.register("env", |args: &[String]| {
            let [name, default] = args else {
                return Err(TemplateError::BadArity {
                    func: "env",
                    expected: 2,
                    found: args.len(),
                });
            };
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => Ok(value),
                _ => Ok(default.clone()),
            }
        });
        engine.register("must_env", |args: &[String]| {
            let [name] = args else {
                return Err(TemplateError::BadArity {
                    func: "must_env",
                    expected: 1,
                    found: args.len(),
                });
            };
            std::env::var(name).map_err(|_| TemplateError::MissingVariable(name.clone()))
        });
        engine
    }

    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[String]) -> Result<String, TemplateError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(func));
    }

    /// Expand every placeholder in the input. Text outside placeholders
    /// passes through untouched.
    pub fn render(&self, input: &str) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(TemplateError::Unterminated(rest[start..].to_string()));
            };
            output.push_str(&self.expand(&after[..end])?);
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }

    fn expand(&self, call: &str) -> Result<String, TemplateError> {
        let call = call.trim();
        let (name, args) = match call.find('(') {
            Some(open) if call.ends_with(')') => {
                let args: Vec<String> = call[open + 1..call.len() - 1]
                    .split(',')
                    .map(|arg| arg.trim().trim_matches('"').to_string())
                    .filter(|arg| !arg.is_empty())
                    .collect();
                (call[..open].trim(), args)
            }
            _ => (call, Vec::new()),
        };
        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?;
        func(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(value: &'static str) -> impl Fn(&[String]) -> Result<String, TemplateError> {
        move |_args: &[String]| Ok(value.to_string())
    }

    #[test]
    fn test_passthrough_without_placeholders() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_expand_injected_function() {
        let mut engine = TemplateEngine::new();
        engine.register("lookup", fixed("https://hooks.slack.com/services/T0/B0/XXX"));
        assert_eq!(
            engine.render(r#"destination = "${lookup(ignored)}""#).unwrap(),
            r#"destination = "https://hooks.slack.com/services/T0/B0/XXX""#
        );
    }

    #[test]
    fn test_multiple_placeholders() {
        let mut engine = TemplateEngine::new();
        engine.register("a", fixed("1"));
        engine.register("b", fixed("2"));
        assert_eq!(engine.render("${a()} and ${b()}").unwrap(), "1 and 2");
    }

    #[test]
    fn test_unknown_function() {
        let engine = TemplateEngine::new();
        assert!(matches!(
            engine.render("${nope(X)}").unwrap_err(),
            TemplateError::UnknownFunction(name) if name == "nope"
        ));
    }

    #[test]
    fn test_unterminated_placeholder() {
        let engine = TemplateEngine::new();
        assert!(matches!(
            engine.render("${env(X, y").unwrap_err(),
            TemplateError::Unterminated(_)
        ));
    }

    #[test]
    fn test_env_default_used_when_unset() {
        let engine = TemplateEngine::with_env_functions();
        let rendered = engine
            .render("${env(WEBHOOK_DISPATCHER_TEST_UNSET_VAR, fallback)}")
            .unwrap();
        assert_eq!(rendered, "fallback");
    }

    #[test]
    fn test_must_env_missing_aborts() {
        let engine = TemplateEngine::with_env_functions();
        assert!(matches!(
            engine
                .render("${must_env(WEBHOOK_DISPATCHER_TEST_UNSET_VAR)}")
                .unwrap_err(),
            TemplateError::MissingVariable(_)
        ));
    }
}
