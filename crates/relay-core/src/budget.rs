//! Hop-count and TTL enforcement.
//!
//! Runs per endpoint, immediately before the storage write, so a message
//! whose budget is spent never produces a stored file.

use chrono::{DateTime, Utc};
use relay_types::envelope::Envelope;

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl BudgetDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Check an envelope's budget against delivery to `endpoint_subject` at `now`.
///
/// Rejects when the hop limit is reached, when the TTL has elapsed, or when
/// the endpoint already appears in the envelope's ancestor chain (the message
/// would loop back to an agent that already handled this conversation).
pub fn check(envelope: &Envelope, endpoint_subject: &str, now: DateTime<Utc>) -> BudgetDecision {
    let budget = &envelope.budget;

    if budget.hop_count >= budget.max_hops {
        return BudgetDecision::reject(format!(
            "hop limit reached ({} of {})",
            budget.hop_count, budget.max_hops
        ));
    }

    if now > envelope.expires_at() {
        return BudgetDecision::reject(format!(
            "ttl of {}ms expired at {}",
            budget.ttl_ms,
            envelope.expires_at().to_rfc3339()
        ));
    }

    if budget.ancestor_chain.iter().any(|a| a == endpoint_subject) {
        return BudgetDecision::reject(format!(
            "cycle detected: '{endpoint_subject}' already in ancestor chain"
        ));
    }

    BudgetDecision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_types::envelope::Budget;

    fn envelope(budget: Budget) -> Envelope {
        Envelope::new("relay.agent.b", "relay.agent.a", vec![], budget, None)
    }

    #[test]
    fn fresh_budget_is_allowed() {
        let env = envelope(Budget::default());
        assert!(check(&env, "relay.agent.b", env.created_at).allowed);
    }

    #[test]
    fn hop_limit_reached_is_rejected() {
        let mut budget = Budget::new(3, 60_000);
        budget.hop_count = 3;
        let env = envelope(budget);
        let decision = check(&env, "relay.agent.b", env.created_at);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("hop limit"));
    }

    #[test]
    fn one_hop_below_limit_is_allowed() {
        let mut budget = Budget::new(3, 60_000);
        budget.hop_count = 2;
        let env = envelope(budget);
        assert!(check(&env, "relay.agent.b", env.created_at).allowed);
    }

    #[test]
    fn expired_ttl_is_rejected() {
        let env = envelope(Budget::new(5, 1_000));
        assert!(check(&env, "relay.agent.b", env.created_at + Duration::milliseconds(1_000)).allowed);
        let decision = check(&env, "relay.agent.b", env.created_at + Duration::milliseconds(1_001));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("ttl"));
    }

    #[test]
    fn cycle_through_ancestor_is_rejected() {
        let mut budget = Budget::default();
        budget.ancestor_chain = vec!["relay.agent.b".to_string()];
        let env = envelope(budget);
        let decision = check(&env, "relay.agent.b", env.created_at);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("cycle"));
        assert!(check(&env, "relay.agent.c", env.created_at).allowed);
    }
}
