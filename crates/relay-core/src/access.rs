//! Priority-ordered access rules.
//!
//! `AccessRuleSet` is an immutable, sorted snapshot of rules. Evaluation
//! walks rules from highest priority down; the first rule whose subject
//! pattern matches the subject and whose sender scope matches the sender
//! decides the outcome. With no matching rule the default is allow.

use relay_types::access::{AccessDecision, AccessEffect, AccessRule};

use crate::subject::{self, SubjectError};

/// Anything that can answer "may `sender` publish to `subject`?".
///
/// Implemented by the static `AccessRuleSet` and by the file-backed,
/// hot-reloaded access control in the infrastructure layer.
pub trait AccessPolicy: Send + Sync {
    fn check(&self, subject: &str, sender: &str) -> AccessDecision;
}

/// Immutable rule snapshot, sorted by descending priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRuleSet {
    rules: Vec<AccessRule>,
}

impl AccessRuleSet {
    /// Build a rule set, validating every pattern.
    ///
    /// Rules with equal priority keep their input order.
    pub fn new(mut rules: Vec<AccessRule>) -> Result<Self, SubjectError> {
        for rule in &rules {
            subject::validate_pattern(&rule.subject_pattern)?;
            subject::validate_pattern(&rule.sender_scope)?;
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { rules })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Copy of this set with `rule` added.
    pub fn with_rule(&self, rule: AccessRule) -> Result<Self, SubjectError> {
        let mut rules = self.rules.clone();
        rules.push(rule);
        Self::new(rules)
    }

    /// Copy of this set without rules matching `priority` and `subject_pattern`.
    /// Returns the new set and how many rules were removed.
    pub fn without_rule(&self, priority: i32, subject_pattern: &str) -> (Self, usize) {
        let before = self.rules.len();
        let rules: Vec<AccessRule> = self
            .rules
            .iter()
            .filter(|r| !(r.priority == priority && r.subject_pattern == subject_pattern))
            .cloned()
            .collect();
        let removed = before - rules.len();
        (Self { rules }, removed)
    }

    /// Evaluate the rules for one publish.
    pub fn evaluate(&self, subject: &str, sender: &str) -> AccessDecision {
        let hit = self.rules.iter().find(|rule| {
            subject::matches(&rule.subject_pattern, subject)
                && subject::matches(&rule.sender_scope, sender)
        });

        match hit {
            Some(rule) if rule.effect == AccessEffect::Deny => AccessDecision::deny(format!(
                "denied by rule (priority {}, subject '{}', sender '{}')",
                rule.priority, rule.subject_pattern, rule.sender_scope
            )),
            _ => AccessDecision::allow(),
        }
    }
}

impl AccessPolicy for AccessRuleSet {
    fn check(&self, subject: &str, sender: &str) -> AccessDecision {
        self.evaluate(subject, sender)
    }
}
