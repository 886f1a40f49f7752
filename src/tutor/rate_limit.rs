use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use crate::db::learning::{to_iso, LearningRepoError, LearningStore, SharedLearningStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_per_day: i64,
    pub cooldown_seconds: i64,
}

pub const DEFAULT_POLICY: RateLimitPolicy = RateLimitPolicy {
    max_per_day: 50,
    cooldown_seconds: 5,
};

pub fn policy_for(tool_name: &str) -> RateLimitPolicy {
    match tool_name {
        "create_homework_assignment" => RateLimitPolicy {
            max_per_day: 5,
            cooldown_seconds: 30,
        },
        "search_lessons" => RateLimitPolicy {
            max_per_day: 100,
            cooldown_seconds: 2,
        },
        "suggest_learning_path" => RateLimitPolicy {
            max_per_day: 20,
            cooldown_seconds: 10,
        },
        "get_mistake_patterns" => RateLimitPolicy {
            max_per_day: 30,
            cooldown_seconds: 5,
        },
        _ => DEFAULT_POLICY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl RateLimitDecision {
    fn allow(remaining: Option<i64>) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining,
            reset_at: None,
            retry_after_seconds: None,
        }
    }
}

/// Quota and cooldown checks over the tool execution log.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: SharedLearningStore,
}

impl RateLimiter {
    pub fn new(store: SharedLearningStore) -> Self {
        Self { store }
    }

    pub async fn check(&self, student_id: &str, tool_name: &str) -> RateLimitDecision {
        let student = student_id.to_string();
        let tool = tool_name.to_string();
        let result = self
            .store
            .run_blocking(move |store| Ok(check_at(store, &student, &tool, Utc::now())))
            .await;
        result.unwrap_or_else(|error| {
            warn!(student_id, tool = tool_name, %error, "rate limit check failed; allowing call");
            RateLimitDecision::allow(None)
        })
    }
}

/// Any store error allows the call.
pub fn check_at(
    store: &LearningStore,
    student_id: &str,
    tool_name: &str,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    match evaluate(store, student_id, tool_name, now) {
        Ok(decision) => decision,
        Err(error) => {
            warn!(student_id, tool = tool_name, %error, "rate limit query failed; allowing call");
            RateLimitDecision::allow(None)
        }
    }
}

fn evaluate(
    store: &LearningStore,
    student_id: &str,
    tool_name: &str,
    now: DateTime<Utc>,
) -> Result<RateLimitDecision, LearningRepoError> {
    let policy = policy_for(tool_name);
    let day_start = start_of_utc_day(now);
    let used = store.count_successful_tool_calls_since(
        student_id,
        tool_name,
        to_iso(day_start).as_str(),
    )?;
    if used >= policy.max_per_day {
        let reset_at = day_start + Duration::days(1);
        return Ok(RateLimitDecision {
            allowed: false,
            reason: Some(format!(
                "Daily limit of {} calls reached for {tool_name}. Try again after {}.",
                policy.max_per_day,
                to_iso(reset_at)
            )),
            remaining: Some(0),
            reset_at: Some(to_iso(reset_at)),
            retry_after_seconds: Some((reset_at - now).num_seconds().max(1)),
        });
    }

    if let Some(latest) = store.latest_tool_call_at(student_id, tool_name)? {
        let latest = DateTime::parse_from_rfc3339(latest.as_str())
            .map_err(|e| LearningRepoError::Internal(format!("bad log timestamp: {e}")))?
            .with_timezone(&Utc);
        let elapsed = (now - latest).num_seconds();
        if elapsed < policy.cooldown_seconds {
            let wait = (policy.cooldown_seconds - elapsed.max(0)).max(1);
            return Ok(RateLimitDecision {
                allowed: false,
                reason: Some(format!(
                    "Please wait {wait} seconds before using {tool_name} again."
                )),
                remaining: Some(policy.max_per_day - used),
                reset_at: None,
                retry_after_seconds: Some(wait),
            });
        }
    }

    Ok(RateLimitDecision::allow(Some(policy.max_per_day - used - 1)))
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}
