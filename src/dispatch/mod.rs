//! Destination selection.
//!
//! # Data Flow
//! ```text
//! PathIds + decoded payload
//!     → EvalContext (variables for the expression engine)
//!     → linear scan over the RuleSet, first `true` wins
//!     → rule destination, or the default synthesized from PathIds
//! ```
//!
//! # Design Decisions
//! - Plain ordered scan with short-circuit return: match order is a
//!   declared invariant, so no indexing by content
//! - A rule whose condition errors is logged at warn and skipped; a
//!   broken rule must never abort dispatch or be promoted to a match
//! - Pure decision function: logging aside, no side effects and no I/O

use std::time::{Duration, Instant};

use url::Url;

use crate::expr::EvalContext;
use crate::payload::ChatMessage;
use crate::rules::{RuleSet, TRUSTED_WEBHOOK_HOST};

/// The three identifiers extracted from the inbound request path.
#[derive(Debug, Clone)]
pub struct PathIds {
    pub team_id: String,
    pub bot_id: String,
    pub token: String,
}

impl PathIds {
    /// Shape checks mirroring the route pattern:
    /// `T[A-Za-z0-9]+ / B[A-Za-z0-9]+ / [A-Za-z0-9]+`.
    pub fn is_valid(&self) -> bool {
        prefixed_alphanumeric(&self.team_id, b'T')
            && prefixed_alphanumeric(&self.bot_id, b'B')
            && !self.token.is_empty()
            && self.token.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

fn prefixed_alphanumeric(s: &str, prefix: u8) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2
        && bytes[0] == prefix
        && bytes[1..].iter().all(|b| b.is_ascii_alphanumeric())
}

/// Outcome of destination selection.
#[derive(Debug)]
pub struct Selection {
    pub destination: Url,
    /// Name of the matched rule, or `None` for the default destination.
    pub matched_rule: Option<String>,
}

/// Assemble the per-request variables visible to rule conditions.
pub fn eval_context(payload: &ChatMessage, ids: &PathIds) -> EvalContext {
    EvalContext::new()
        .with("payload", payload.to_value())
        .with("team_id", ids.team_id.clone().into())
        .with("bot_id", ids.bot_id.clone().into())
        .with("token", ids.token.clone().into())
}

/// The fallback destination: the trusted provider's webhook URL for the
/// same path identifiers. Guarantees every request is forwarded
/// somewhere, even with an empty or all-false rule set.
pub fn default_destination(ids: &PathIds) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "https://{}/services/{}/{}/{}",
        TRUSTED_WEBHOOK_HOST, ids.team_id, ids.bot_id, ids.token
    ))
}

/// Evaluate rules in declared order and return the first match, or the
/// default destination if none fires.
pub fn select_destination(
    rules: &RuleSet,
    ctx: &EvalContext,
    ids: &PathIds,
    eval_budget: Duration,
) -> Result<Selection, url::ParseError> {
    for (index, rule) in rules.iter().enumerate() {
        let deadline = Instant::now() + eval_budget;
        match rule.program().evaluate(ctx, deadline) {
            Ok(true) => {
                tracing::info!(rule_name = rule.name(), "matched rule");
                return Ok(Selection {
                    destination: rule.destination().clone(),
                    matched_rule: Some(rule.name().to_string()),
                });
            }
            Ok(false) => {}
            Err(err) => {
                // Deliberate leniency: a broken rule is a non-match, but
                // must stay loudly visible at the log boundary.
                tracing::warn!(
                    rule_name = rule.name(),
                    rule_index = index,
                    error = %err,
                    "failed to evaluate rule, treating as non-match"
                );
            }
        }
    }

    tracing::info!("no rule matched, using default destination");
    Ok(Selection {
        destination: default_destination(ids)?,
        matched_rule: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleConfig;

    const DEST_A: &str = "https://hooks.slack.com/services/T00000000/B00000000/AAAA";
    const DEST_B: &str = "https://hooks.slack.com/services/T00000000/B00000000/BBBB";

    fn rule(condition: &str, destination: &str) -> RuleConfig {
        RuleConfig {
            name: String::new(),
            condition: condition.to_string(),
            destination: destination.to_string(),
        }
    }

    fn ids() -> PathIds {
        PathIds {
            team_id: "T11111111".to_string(),
            bot_id: "B22222222".to_string(),
            token: "ZZZZZZZZ".to_string(),
        }
    }

    fn ctx_with_title(title: &str) -> EvalContext {
        let payload: ChatMessage = serde_json::from_str(&format!(
            r#"{{"attachments":[{{"title":{}}}]}}"#,
            serde_json::to_string(title).unwrap()
        ))
        .unwrap();
        eval_context(&payload, &ids())
    }

    fn budget() -> Duration {
        Duration::from_millis(100)
    }

    #[test]
    fn test_first_matching_rule_selected() {
        let rules = RuleSet::build(&[
            rule(r#"any(payload.attachments.title contains "[service1]")"#, DEST_A),
            rule(r#"any(payload.attachments.title contains "[service2]")"#, DEST_B),
        ])
        .unwrap();

        let selection = select_destination(
            &rules,
            &ctx_with_title("[service1] outage"),
            &ids(),
            budget(),
        )
        .unwrap();
        assert_eq!(selection.destination.as_str(), DEST_A);
        assert_eq!(selection.matched_rule.as_deref(), Some("rule-0"));
    }

    #[test]
    fn test_declaration_order_wins_when_both_match() {
        // Both conditions hold for this payload; only the first fires.
        let rules = RuleSet::build(&[
            rule(r#"any(payload.attachments.title contains "outage")"#, DEST_A),
            rule(r#"any(payload.attachments.title contains "outage")"#, DEST_B),
        ])
        .unwrap();

        let selection = select_destination(
            &rules,
            &ctx_with_title("[service1] outage"),
            &ids(),
            budget(),
        )
        .unwrap();
        assert_eq!(selection.destination.as_str(), DEST_A);
    }

    #[test]
    fn test_no_match_falls_back_to_default() {
        let rules = RuleSet::build(&[
            rule(r#"any(payload.attachments.title contains "[service1]")"#, DEST_A),
            rule(r#"any(payload.attachments.title contains "[service2]")"#, DEST_B),
        ])
        .unwrap();

        let selection = select_destination(
            &rules,
            &ctx_with_title("[service3] outage"),
            &ids(),
            budget(),
        )
        .unwrap();
        assert_eq!(
            selection.destination.as_str(),
            "https://hooks.slack.com/services/T11111111/B22222222/ZZZZZZZZ"
        );
        assert!(selection.matched_rule.is_none());
    }

    #[test]
    fn test_empty_rule_set_uses_default() {
        let rules = RuleSet::build(&[]).unwrap();
        let selection =
            select_destination(&rules, &ctx_with_title("anything"), &ids(), budget()).unwrap();
        assert!(selection.matched_rule.is_none());
    }

    #[test]
    fn test_erroring_rule_is_skipped_not_matched() {
        // First rule fails at runtime (division by zero); dispatch must
        // continue and let the second rule match.
        let rules = RuleSet::build(&[
            rule("1 / 0 == 1", DEST_A),
            rule(r#"any(payload.attachments.title contains "outage")"#, DEST_B),
        ])
        .unwrap();

        let selection = select_destination(
            &rules,
            &ctx_with_title("[service1] outage"),
            &ids(),
            budget(),
        )
        .unwrap();
        assert_eq!(selection.destination.as_str(), DEST_B);
    }

    #[test]
    fn test_erroring_rule_with_no_other_match_uses_default() {
        let rules = RuleSet::build(&[rule("1 / 0 == 1", DEST_A)]).unwrap();
        let selection =
            select_destination(&rules, &ctx_with_title("anything"), &ids(), budget()).unwrap();
        assert!(selection.matched_rule.is_none());
    }

    #[test]
    fn test_path_id_validation() {
        assert!(ids().is_valid());
        for bad in [
            PathIds {
                team_id: "X123".to_string(),
                ..ids()
            },
            PathIds {
                bot_id: "123".to_string(),
                ..ids()
            },
            PathIds {
                token: "has-dash".to_string(),
                ..ids()
            },
            PathIds {
                token: String::new(),
                ..ids()
            },
        ] {
            assert!(!bad.is_valid(), "{bad:?} should be invalid");
        }
    }
}
