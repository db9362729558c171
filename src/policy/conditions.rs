//! Condition evaluators for policy matching.
//!
//! Conditions are stored on a policy as a string-to-string map and parsed
//! into a closed tagged union at evaluation time. The five recognized kinds:
//!
//! | Key | Value | Fails iff |
//! |-----|-------|-----------|
//! | `time_start` | `HH:MM` | request time-of-day < value |
//! | `time_end` | `HH:MM` | request time-of-day > value |
//! | `ip_whitelist` | comma/string list | request ip not a substring of value |
//! | `environment` | string | request environment != value |
//! | `user_agent_pattern` | regex | request user agent does not match |
//!
//! Conditions are ANDed. Unrecognized keys evaluate to true (forward
//! compatible) and are logged once per key. A malformed value for a
//! recognized key fails the condition: a typo must not grant access.

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// The request attributes a condition can look at.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    /// Evaluation time. Callers substitute wall clock when the request
    /// carried no time.
    pub time: DateTime<Utc>,
    /// Source address of the request.
    pub ip_address: String,
    /// User agent of the caller.
    pub user_agent: String,
    /// Deployment environment label.
    pub environment: String,
}

/// A parsed condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Request time-of-day must be at or after the given clock time.
    TimeStart(NaiveTime),
    /// Request time-of-day must be at or before the given clock time.
    TimeEnd(NaiveTime),
    /// Request ip must appear as a substring of the configured list.
    IpWhitelist(String),
    /// Request environment must equal the configured value.
    Environment(String),
    /// Request user agent must match the configured pattern.
    UserAgentPattern(regex_lite::Regex),
    /// Unrecognized key. Evaluates to true.
    Unknown {
        /// The unrecognized condition key.
        key: String,
    },
    /// Recognized key with an unparsable value. Evaluates to false.
    Malformed {
        /// The condition key.
        key: String,
        /// The value that failed to parse.
        value: String,
    },
}

fn logged_keys() -> &'static Mutex<BTreeSet<String>> {
    static LOGGED: OnceLock<Mutex<BTreeSet<String>>> = OnceLock::new();
    LOGGED.get_or_init(|| Mutex::new(BTreeSet::new()))
}

fn log_once(key: &str, message: &str) {
    let mut seen = logged_keys().lock();
    if seen.insert(key.to_string()) {
        tracing::warn!(
            target: "custody_kernel::conditions",
            condition_key = key,
            "{}",
            message
        );
    }
}

impl Condition {
    /// Parse a condition from its stored key and value.
    pub fn parse(key: &str, value: &str) -> Self {
        match key {
            "time_start" => match NaiveTime::parse_from_str(value, "%H:%M") {
                Ok(t) => Self::TimeStart(t),
                Err(_) => Self::malformed(key, value),
            },
            "time_end" => match NaiveTime::parse_from_str(value, "%H:%M") {
                Ok(t) => Self::TimeEnd(t),
                Err(_) => Self::malformed(key, value),
            },
            "ip_whitelist" => Self::IpWhitelist(value.to_string()),
            "environment" => Self::Environment(value.to_string()),
            "user_agent_pattern" => match regex_lite::Regex::new(value) {
                Ok(re) => Self::UserAgentPattern(re),
                Err(_) => Self::malformed(key, value),
            },
            _ => {
                log_once(key, "unrecognized condition key, treating as satisfied");
                Self::Unknown {
                    key: key.to_string(),
                }
            }
        }
    }

    fn malformed(key: &str, value: &str) -> Self {
        log_once(key, "malformed condition value, treating as failed");
        Self::Malformed {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Evaluate this condition against a request context.
    pub fn evaluate(&self, ctx: &ConditionContext) -> bool {
        match self {
            Self::TimeStart(start) => ctx.time.time() >= *start,
            Self::TimeEnd(end) => ctx.time.time() <= *end,
            Self::IpWhitelist(list) => list.contains(&ctx.ip_address),
            Self::Environment(value) => ctx.environment == *value,
            Self::UserAgentPattern(re) => re.is_match(&ctx.user_agent),
            Self::Unknown { .. } => true,
            Self::Malformed { .. } => false,
        }
    }
}

/// Evaluate a policy's full condition map. Conditions are ANDed; an empty
/// map is trivially satisfied.
pub fn evaluate_all(conditions: &BTreeMap<String, String>, ctx: &ConditionContext) -> bool {
    conditions
        .iter()
        .all(|(key, value)| Condition::parse(key, value).evaluate(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx_at(hour: u32, minute: u32) -> ConditionContext {
        ConditionContext {
            time: Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap(),
            ip_address: "10.0.0.5".to_string(),
            user_agent: "forensic-cli/2.1".to_string(),
            environment: "production".to_string(),
        }
    }

    #[test]
    fn test_time_window() {
        let ctx = ctx_at(10, 30);
        assert!(Condition::parse("time_start", "09:00").evaluate(&ctx));
        assert!(!Condition::parse("time_start", "11:00").evaluate(&ctx));
        assert!(Condition::parse("time_end", "17:00").evaluate(&ctx));
        assert!(!Condition::parse("time_end", "10:00").evaluate(&ctx));
    }

    #[test]
    fn test_ip_whitelist_is_substring_match() {
        let ctx = ctx_at(10, 0);
        assert!(Condition::parse("ip_whitelist", "10.0.0.5,10.0.0.6").evaluate(&ctx));
        assert!(!Condition::parse("ip_whitelist", "192.168.1.1").evaluate(&ctx));
    }

    #[test]
    fn test_environment_equality() {
        let ctx = ctx_at(10, 0);
        assert!(Condition::parse("environment", "production").evaluate(&ctx));
        assert!(!Condition::parse("environment", "staging").evaluate(&ctx));
    }

    #[test]
    fn test_user_agent_pattern() {
        let ctx = ctx_at(10, 0);
        assert!(Condition::parse("user_agent_pattern", "^forensic-cli/").evaluate(&ctx));
        assert!(!Condition::parse("user_agent_pattern", "^browser/").evaluate(&ctx));
    }

    #[test]
    fn test_unknown_key_is_satisfied() {
        let ctx = ctx_at(10, 0);
        assert!(Condition::parse("mfa_required", "true").evaluate(&ctx));
    }

    #[test]
    fn test_malformed_value_fails_closed() {
        let ctx = ctx_at(10, 0);
        assert!(!Condition::parse("time_start", "nine am").evaluate(&ctx));
        assert!(!Condition::parse("user_agent_pattern", "(unclosed").evaluate(&ctx));
    }

    #[test]
    fn test_evaluate_all_is_conjunctive() {
        let ctx = ctx_at(10, 0);
        let mut conditions = BTreeMap::new();
        conditions.insert("environment".to_string(), "production".to_string());
        conditions.insert("time_start".to_string(), "09:00".to_string());
        assert!(evaluate_all(&conditions, &ctx));

        conditions.insert("time_end".to_string(), "09:30".to_string());
        assert!(!evaluate_all(&conditions, &ctx));

        assert!(evaluate_all(&BTreeMap::new(), &ctx));
    }
}
