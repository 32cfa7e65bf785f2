//! The relay orchestrator.
//!
//! `RelayCore` composes subject matching, access control, the reliability
//! checks, durable mailbox storage, the index, in-process subscriptions,
//! signals, and the dead letter queue into `publish()` / `subscribe()` plus
//! the inbox and inspection operations built on top of them.
//!
//! Publish runs in a fixed order:
//! 1. validate the subject and sender
//! 2. access control on `(subject, sender)`
//! 3. rate limit, once per call (no envelope is built on rejection)
//! 4. build the envelope
//! 5. resolve the fan-out set
//! 6. per endpoint: backpressure, circuit breaker, budget, store, index,
//!    handler dispatch, breaker bookkeeping
//! 7. aggregate into one `PublishResult`
//!
//! Publish calls are serialized so that the rate-limit count and the index
//! inserts that follow it cannot interleave with another sender's. Claim,
//! mark-failed, purge, unregister, and `exclusive` work take the same lock,
//! so a mailbox never changes under a publish that has resolved its fan-out.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use relay_types::config::ReliabilityConfig;
use relay_types::dead_letter::DeadLetterEntry;
use relay_types::endpoint::Endpoint;
use relay_types::envelope::Envelope;
use relay_types::error::RelayError;
use relay_types::message::{IndexMetrics, MessageRecord, MessageStatus};
use relay_types::publish::{PublishOptions, PublishResult, Rejection, RejectionReason};
use relay_types::signal::Signal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::budget;
use crate::reliability::{
    BreakerSnapshot, CircuitBreakerManager, CircuitState, ReliabilitySource, backpressure,
    rate_limit,
};
use crate::repository::{DeadLetterStore, EndpointDirectory, MailboxStore, MessageIndex};
use crate::signal::{SignalEmitter, SignalReceiver};
use crate::subject::{self, SubjectPattern};
use crate::subscription::{self as subscriptions, MessageHandler, SubscriptionHandle, SubscriptionRegistry};

/// Result of one endpoint's delivery attempt within a fan-out.
enum Outcome {
    Delivered,
    Rejected(RejectionReason, Option<String>),
    /// A real attempt failed; goes to the dead letter queue.
    Failed(String),
}

/// The relay orchestrator, generic over its storage adapters.
pub struct RelayCore<S, I, D> {
    store: S,
    index: I,
    dead_letters: D,
    endpoints: Arc<dyn EndpointDirectory>,
    access: Arc<dyn AccessPolicy>,
    config: Arc<dyn ReliabilitySource>,
    breakers: CircuitBreakerManager,
    subscriptions: Arc<SubscriptionRegistry>,
    signals: SignalEmitter,
    write_lock: Mutex<()>,
}

impl<S, I, D> RelayCore<S, I, D>
where
    S: MailboxStore,
    I: MessageIndex,
    D: DeadLetterStore,
{
    pub fn new(
        store: S,
        index: I,
        dead_letters: D,
        endpoints: Arc<dyn EndpointDirectory>,
        access: Arc<dyn AccessPolicy>,
        config: Arc<dyn ReliabilitySource>,
    ) -> Self {
        Self {
            store,
            index,
            dead_letters,
            endpoints,
            access,
            config,
            breakers: CircuitBreakerManager::new(),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            signals: SignalEmitter::default(),
            write_lock: Mutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// Publish `payload` to every endpoint whose pattern matches `subject`.
    ///
    /// Policy rejections are reported in the returned result. Errors are
    /// reserved for malformed input, denied access, and index failures that
    /// prevent the rate-limit check from running.
    pub async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<PublishResult, RelayError> {
        validate_concrete(subject)?;
        validate_concrete(&options.from)?;
        if let Some(reply_to) = &options.reply_to {
            validate_concrete(reply_to)?;
        }

        let access = self.access.check(subject, &options.from);
        if !access.allowed {
            debug!(subject, sender = %options.from, "publish denied by access rules");
            return Err(RelayError::AccessDenied {
                subject: subject.to_string(),
                sender: options.from,
                reason: access.reason.unwrap_or_else(|| "denied".to_string()),
            });
        }

        let _guard = self.write_lock.lock().await;
        let config = self.config.reliability();

        if config.rate_limit.enabled {
            let since = window_start(Utc::now(), config.rate_limit.window_secs);
            let count = self
                .index
                .count_sender_in_window(&options.from, since)
                .await?;
            let decision = rate_limit::check(&options.from, count, &config.rate_limit);
            if !decision.allowed {
                debug!(
                    sender = %options.from,
                    count = decision.current_count,
                    limit = decision.limit,
                    "publish rate limited"
                );
                return Ok(PublishResult::rate_limited(decision.reason));
            }
        }

        let envelope = Envelope::new(
            subject,
            options.from,
            payload,
            options.budget.unwrap_or_default(),
            options.reply_to,
        );
        let targets = self.endpoints.resolve(subject);
        debug!(
            message_id = %envelope.id,
            subject,
            endpoints = targets.len(),
            "publishing"
        );

        let mut result = PublishResult::for_message(envelope.id);
        for endpoint in &targets {
            let outcome = self
                .deliver_to(&envelope, endpoint, &config, &mut result)
                .await;
            self.settle(&envelope, endpoint, &config, outcome, &mut result)
                .await;
        }

        Ok(result)
    }

    /// Run the per-endpoint checks and the storage write.
    async fn deliver_to(
        &self,
        envelope: &Envelope,
        endpoint: &Endpoint,
        config: &ReliabilityConfig,
        result: &mut PublishResult,
    ) -> Outcome {
        let hash = endpoint.hash.as_str();

        if config.backpressure.enabled {
            let size = match self.index.count_new_by_endpoint(hash).await {
                Ok(size) => size,
                Err(e) => return Outcome::Failed(format!("mailbox size query failed: {e}")),
            };
            let decision = backpressure::check(size, &config.backpressure);
            result
                .mailbox_pressure
                .insert(endpoint.hash.clone(), decision.pressure);
            if decision.should_warn(&config.backpressure) {
                self.signals.emit(
                    envelope.from.clone(),
                    Signal::backpressure(
                        endpoint.subject.clone(),
                        decision.pressure,
                        size,
                        config.backpressure.max_mailbox_size,
                    ),
                );
            }
            if !decision.allowed {
                return Outcome::Rejected(RejectionReason::Backpressure, decision.reason);
            }
        }

        let mut probe = false;
        if config.circuit_breaker.enabled {
            let decision = self.breakers.check(hash, &config.circuit_breaker);
            if !decision.allowed {
                return Outcome::Rejected(RejectionReason::CircuitOpen, decision.reason);
            }
            probe = decision.state == CircuitState::HalfOpen;
        }

        let decision = budget::check(envelope, &endpoint.subject, Utc::now());
        if !decision.allowed {
            if probe {
                self.breakers.release_probe(hash);
            }
            return Outcome::Rejected(RejectionReason::BudgetExceeded, decision.reason);
        }

        if let Err(e) = self.store.deliver(hash, envelope).await {
            return Outcome::Failed(format!("storage write failed: {e}"));
        }

        let record = MessageRecord::for_envelope(envelope, hash, MessageStatus::New);
        if let Err(e) = self.index.insert(&record).await {
            // Keep file and row in step: no row, no file.
            if let Err(rm) = self.store.remove(hash, envelope.id).await {
                warn!(endpoint_hash = hash, error = %rm, "failed to remove unindexed message");
            }
            return Outcome::Failed(format!("index insert failed: {e}"));
        }

        self.dispatch(envelope, endpoint).await
    }

    /// Hand a stored message to in-process handlers bound to the endpoint.
    async fn dispatch(&self, envelope: &Envelope, endpoint: &Endpoint) -> Outcome {
        let handlers = self.subscriptions.handlers_for(&endpoint.subject);
        if handlers.is_empty() {
            return Outcome::Delivered;
        }

        let hash = endpoint.hash.as_str();
        let failure = handlers
            .iter()
            .find_map(|handler| subscriptions::invoke(handler.as_ref(), envelope).err());

        let target = match &failure {
            Some(_) => MessageStatus::Failed,
            None => MessageStatus::Cur,
        };
        let moved = self
            .move_message(hash, envelope.id, MessageStatus::New, target)
            .await;

        match (failure, moved) {
            (Some(e), _) => Outcome::Failed(format!("handler failed: {e}")),
            (None, Err(e)) => Outcome::Failed(format!("status update failed: {e}")),
            (None, Ok(())) => Outcome::Delivered,
        }
    }

    /// Fold one endpoint's outcome into the result and the breaker, and
    /// dead-letter real failures.
    async fn settle(
        &self,
        envelope: &Envelope,
        endpoint: &Endpoint,
        config: &ReliabilityConfig,
        outcome: Outcome,
        result: &mut PublishResult,
    ) {
        let hash = endpoint.hash.as_str();
        match outcome {
            Outcome::Delivered => {
                if config.circuit_breaker.enabled {
                    self.breakers.record_success(hash, &config.circuit_breaker);
                }
                result.delivered_to += 1;
                debug!(message_id = %envelope.id, endpoint_hash = hash, "delivered");
            }
            Outcome::Rejected(reason, detail) => {
                debug!(
                    message_id = %envelope.id,
                    endpoint_hash = hash,
                    %reason,
                    "delivery rejected"
                );
                result.rejected.push(Rejection {
                    endpoint_hash: Some(endpoint.hash.clone()),
                    reason,
                    detail,
                });
            }
            Outcome::Failed(reason) => {
                warn!(
                    message_id = %envelope.id,
                    endpoint_hash = hash,
                    %reason,
                    "delivery failed"
                );
                if config.circuit_breaker.enabled {
                    self.breakers.record_failure(hash, &config.circuit_breaker);
                }
                let entry = DeadLetterEntry::new(envelope, hash, reason);
                if let Err(e) = self.dead_letters.record(&entry).await {
                    warn!(endpoint_hash = hash, error = %e, "failed to record dead letter");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions and endpoints
    // -----------------------------------------------------------------------

    /// Bind `handler` to `pattern`, registering the endpoint if needed.
    pub async fn subscribe<H>(&self, pattern: &str, handler: H) -> Result<SubscriptionHandle, RelayError>
    where
        H: MessageHandler + 'static,
    {
        let endpoint = self.register_endpoint(pattern).await?;
        let id = self.subscriptions.subscribe(endpoint.subject.clone(), Arc::new(handler));
        debug!(pattern, subscription_id = id, "subscribed");
        Ok(SubscriptionHandle::new(
            Arc::clone(&self.subscriptions),
            id,
            endpoint.subject,
        ))
    }

    /// Register an endpoint and create its mailbox. Idempotent.
    pub async fn register_endpoint(&self, pattern: &str) -> Result<Endpoint, RelayError> {
        subject::validate_pattern(pattern)
            .map_err(|e| RelayError::InvalidSubject(format!("'{pattern}': {e}")))?;
        let existing = self.endpoints.get(pattern);
        let endpoint = match existing {
            Some(endpoint) => endpoint,
            None => {
                let endpoint = self.endpoints.register(pattern)?;
                info!(subject = pattern, endpoint_hash = %endpoint.hash, "endpoint registered");
                endpoint
            }
        };
        self.store.ensure_mailbox(&endpoint.hash).await?;
        Ok(endpoint)
    }

    /// Remove an endpoint with its index rows, mailbox, handlers, and
    /// breaker state.
    ///
    /// Returns `false` if the endpoint was not registered.
    pub async fn unregister_endpoint(&self, pattern: &str) -> Result<bool, RelayError> {
        let _guard = self.write_lock.lock().await;
        let Some(endpoint) = self.endpoints.unregister(pattern)? else {
            return Ok(false);
        };
        let handlers = self.subscriptions.unsubscribe_pattern(&endpoint.subject);
        let rows = self.index.delete_endpoint(&endpoint.hash).await?;
        self.store.remove_mailbox(&endpoint.hash).await?;
        self.breakers.reset(&endpoint.hash);
        info!(
            subject = pattern,
            endpoint_hash = %endpoint.hash,
            rows,
            handlers,
            "endpoint unregistered"
        );
        Ok(true)
    }

    pub fn list_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.endpoints()
    }

    /// Look up an endpoint by its registered subject.
    pub fn endpoint(&self, pattern: &str) -> Result<Endpoint, RelayError> {
        self.endpoints
            .get(pattern)
            .ok_or_else(|| RelayError::EndpointNotFound(pattern.to_string()))
    }

    /// Look up an endpoint by subject or by hash.
    pub fn find_endpoint(&self, key: &str) -> Result<Endpoint, RelayError> {
        self.endpoints
            .get(key)
            .or_else(|| self.endpoints.by_hash(key))
            .ok_or_else(|| RelayError::EndpointNotFound(key.to_string()))
    }

    // -----------------------------------------------------------------------
    // Inbox
    // -----------------------------------------------------------------------

    /// Index rows for an endpoint, newest first.
    pub async fn read_inbox(
        &self,
        pattern: &str,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        let endpoint = self.endpoint(pattern)?;
        Ok(self
            .index
            .list_by_endpoint(&endpoint.hash, status, limit)
            .await?)
    }

    pub async fn read_message(
        &self,
        endpoint_hash: &str,
        id: Uuid,
    ) -> Result<(Envelope, MessageStatus), RelayError> {
        Ok(self.store.read(endpoint_hash, id).await?)
    }

    /// Consume a message: `new/` -> `cur/`.
    pub async fn claim(&self, endpoint_hash: &str, id: Uuid) -> Result<Envelope, RelayError> {
        let _guard = self.write_lock.lock().await;
        let (envelope, _) = self.store.read(endpoint_hash, id).await?;
        self.move_message(endpoint_hash, id, MessageStatus::New, MessageStatus::Cur)
            .await?;
        debug!(endpoint_hash, message_id = %id, "claimed");
        Ok(envelope)
    }

    /// Move a stored message to `failed/` and dead-letter it.
    pub async fn mark_failed(
        &self,
        endpoint_hash: &str,
        id: Uuid,
        reason: &str,
    ) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().await;
        let (envelope, status) = self.store.read(endpoint_hash, id).await?;
        if status != MessageStatus::Failed {
            self.move_message(endpoint_hash, id, status, MessageStatus::Failed)
                .await?;
        }
        self.dead_letters
            .record(&DeadLetterEntry::new(&envelope, endpoint_hash, reason))
            .await?;
        warn!(endpoint_hash, message_id = %id, reason, "message marked failed");
        Ok(())
    }

    /// Delete a stored message and its index row.
    pub async fn purge(&self, endpoint_hash: &str, id: Uuid) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(endpoint_hash, id).await?;
        self.index.delete(id, endpoint_hash).await?;
        debug!(endpoint_hash, message_id = %id, "purged");
        Ok(())
    }

    /// Run `work` with publish and every other mailbox write held off.
    ///
    /// For maintenance that walks storage and index together, such as a
    /// reconcile pass.
    pub async fn exclusive<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.write_lock.lock().await;
        work.await
    }

    /// Rename in the store, then mirror the status in the index.
    ///
    /// The rename is undone if the index update fails, so the file stays
    /// where its row says it is.
    async fn move_message(
        &self,
        endpoint_hash: &str,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> Result<(), RelayError> {
        self.store.transition(endpoint_hash, id, from, to).await?;
        match self.index.update_status(id, endpoint_hash, to).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(endpoint_hash, message_id = %id, "moved message had no index row");
            }
            Err(e) => {
                if let Err(back) = self.store.transition(endpoint_hash, id, to, from).await {
                    warn!(endpoint_hash, message_id = %id, error = %back, "failed to undo message move");
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Emit an ephemeral signal on `subject`.
    ///
    /// Returns the number of live receivers, including those whose pattern
    /// will filter the signal out.
    pub fn signal(&self, subject: &str, signal: Signal) -> Result<usize, RelayError> {
        validate_concrete(subject)?;
        Ok(self.signals.emit(subject, signal))
    }

    /// Receive signals whose subject matches `pattern`.
    pub fn on_signal(&self, pattern: &str) -> Result<SignalReceiver, RelayError> {
        let pattern = SubjectPattern::parse(pattern)
            .map_err(|e| RelayError::InvalidSubject(format!("'{pattern}': {e}")))?;
        Ok(self.signals.subscribe(pattern))
    }

    // -----------------------------------------------------------------------
    // Dead letters, breakers, metrics
    // -----------------------------------------------------------------------

    pub async fn list_dead_letters(
        &self,
        endpoint_hash: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>, RelayError> {
        Ok(self.dead_letters.list(endpoint_hash, limit).await?)
    }

    pub async fn count_dead_letters(&self) -> Result<u64, RelayError> {
        Ok(self.dead_letters.count().await?)
    }

    pub async fn purge_dead_letters(&self, before: DateTime<Utc>) -> Result<u64, RelayError> {
        let removed = self.dead_letters.purge_before(before).await?;
        info!(removed, "dead letters purged");
        Ok(removed)
    }

    pub fn breaker_snapshot(&self, endpoint_hash: &str) -> BreakerSnapshot {
        self.breakers.snapshot(endpoint_hash)
    }

    pub fn reset_breaker(&self, endpoint_hash: &str) -> bool {
        self.breakers.reset(endpoint_hash)
    }

    pub async fn metrics(&self) -> Result<IndexMetrics, RelayError> {
        Ok(self.index.metrics().await?)
    }

    /// Reliability configuration currently in effect.
    pub fn reliability(&self) -> Arc<ReliabilityConfig> {
        self.config.reliability()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }
}

fn validate_concrete(subject: &str) -> Result<(), RelayError> {
    subject::validate_subject(subject)
        .map_err(|e| RelayError::InvalidSubject(format!("'{subject}': {e}")))
}

/// Start of the trailing rate-limit window ending at `now`.
fn window_start(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(window_secs).unwrap_or(i64::MAX);
    Duration::try_seconds(secs)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessRuleSet;
    use crate::repository::memory::{
        MemoryDeadLetters, MemoryEndpoints, MemoryIndex, MemoryMailbox, test_hash,
    };
    use crate::subscription::HandlerError;
    use relay_types::access::{AccessEffect, AccessRule};
    use relay_types::envelope::Budget;
    use relay_types::signal::SignalType;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex as StdMutex;

    type TestRelay = RelayCore<MemoryMailbox, MemoryIndex, MemoryDeadLetters>;

    const SENDER: &str = "relay.agent.sender";

    fn relay_with(config: ReliabilityConfig, rules: Vec<AccessRule>) -> TestRelay {
        RelayCore::new(
            MemoryMailbox::default(),
            MemoryIndex::default(),
            MemoryDeadLetters::default(),
            Arc::new(MemoryEndpoints::default()),
            Arc::new(AccessRuleSet::new(rules).unwrap()),
            Arc::new(Arc::new(config)),
        )
    }

    fn relay() -> TestRelay {
        relay_with(ReliabilityConfig::default(), vec![])
    }

    fn opts() -> PublishOptions {
        PublishOptions::from_sender(SENDER)
    }

    async fn send(relay: &TestRelay, subject: &str) -> PublishResult {
        relay.publish(subject, b"hello".to_vec(), opts()).await.unwrap()
    }

    #[tokio::test]
    async fn publish_fans_out_to_matching_endpoints() {
        let relay = relay();
        relay.register_endpoint("relay.agent.a").await.unwrap();
        relay.register_endpoint("relay.agent.*").await.unwrap();
        relay.register_endpoint("relay.other").await.unwrap();

        let result = send(&relay, "relay.agent.a").await;

        assert_eq!(result.delivered_to, 2);
        assert!(result.rejected.is_empty());
        assert_eq!(result.mailbox_pressure.len(), 2);
        assert_eq!(relay.store().stored_count(), 2);

        let id = result.message_id.unwrap();
        let rows = relay.index().rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.id == id && r.status == MessageStatus::New));
    }

    #[tokio::test]
    async fn publish_with_no_endpoints_delivers_nowhere() {
        let relay = relay();
        let result = send(&relay, "relay.nobody").await;
        assert!(result.message_id.is_some());
        assert_eq!(result.delivered_to, 0);
        assert!(result.rejected.is_empty());
    }

    #[tokio::test]
    async fn empty_collections_are_omitted_from_the_result() {
        let mut config = ReliabilityConfig::default();
        config.backpressure.enabled = false;
        let relay = relay_with(config, vec![]);
        relay.register_endpoint("relay.agent.a").await.unwrap();

        let json = serde_json::to_value(send(&relay, "relay.agent.a").await).unwrap();
        assert_eq!(json["deliveredTo"], 1);
        assert!(json.get("rejected").is_none());
        assert!(json.get("mailboxPressure").is_none());
    }

    #[tokio::test]
    async fn malformed_subjects_are_rejected() {
        let relay = relay();
        for bad in ["", "relay..a", "relay.*", "relay.>", "has space"] {
            let err = relay.publish(bad, vec![], opts()).await.unwrap_err();
            assert!(matches!(err, RelayError::InvalidSubject(_)), "{bad:?}");
        }
        let err = relay
            .publish("relay.a", vec![], PublishOptions::from_sender("bad..sender"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidSubject(_)));
    }

    #[tokio::test]
    async fn access_denied_stores_nothing() {
        let relay = relay_with(
            ReliabilityConfig::default(),
            vec![AccessRule {
                priority: 10,
                subject_pattern: "relay.admin.>".into(),
                sender_scope: ">".into(),
                effect: AccessEffect::Deny,
            }],
        );
        relay.register_endpoint("relay.admin.reset").await.unwrap();

        let err = relay
            .publish("relay.admin.reset", vec![], opts())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AccessDenied { .. }));
        assert_eq!(relay.store().stored_count(), 0);
    }

    #[tokio::test]
    async fn sixth_publish_in_window_is_rate_limited() {
        let mut config = ReliabilityConfig::default();
        config.rate_limit.max_per_window = 5;
        config.rate_limit.window_secs = 60;
        let relay = relay_with(config, vec![]);
        // Two endpoints per publish; quota is still per call.
        relay.register_endpoint("relay.agent.a").await.unwrap();
        relay.register_endpoint("relay.agent.>").await.unwrap();

        let mut ok = 0;
        let mut limited = 0;
        for _ in 0..6 {
            let result = send(&relay, "relay.agent.a").await;
            if result.has_rejection(RejectionReason::RateLimited) {
                assert!(result.message_id.is_none());
                assert_eq!(result.delivered_to, 0);
                assert!(result.rejected[0].endpoint_hash.is_none());
                limited += 1;
            } else {
                assert_eq!(result.delivered_to, 2);
                ok += 1;
            }
        }
        assert_eq!((ok, limited), (5, 1));
    }

    #[tokio::test]
    async fn rate_limit_is_per_sender() {
        let mut config = ReliabilityConfig::default();
        config.rate_limit.max_per_window = 1;
        let relay = relay_with(config, vec![]);
        relay.register_endpoint("relay.agent.a").await.unwrap();

        assert_eq!(send(&relay, "relay.agent.a").await.delivered_to, 1);
        assert!(send(&relay, "relay.agent.a").await.has_rejection(RejectionReason::RateLimited));

        let other = relay
            .publish("relay.agent.a", vec![], PublishOptions::from_sender("relay.agent.other"))
            .await
            .unwrap();
        assert_eq!(other.delivered_to, 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_three_storage_failures() {
        let mut config = ReliabilityConfig::default();
        config.circuit_breaker.failure_threshold = 3;
        let relay = relay_with(config, vec![]);
        let endpoint = relay.register_endpoint("relay.agent.flaky").await.unwrap();
        relay.store().fail_endpoint(&endpoint.hash);

        for _ in 0..3 {
            let result = send(&relay, "relay.agent.flaky").await;
            assert_eq!(result.delivered_to, 0);
            assert!(result.rejected.is_empty());
        }
        assert_eq!(relay.store().attempts(), 3);
        assert_eq!(relay.count_dead_letters().await.unwrap(), 3);
        assert_eq!(relay.breaker_snapshot(&endpoint.hash).state, CircuitState::Open);

        let fourth = send(&relay, "relay.agent.flaky").await;
        assert!(fourth.has_rejection(RejectionReason::CircuitOpen));
        assert_eq!(relay.store().attempts(), 3, "no storage attempt while open");
        assert_eq!(relay.count_dead_letters().await.unwrap(), 3, "policy rejections are not dead-lettered");
    }

    #[tokio::test]
    async fn one_failing_endpoint_does_not_block_siblings() {
        let relay = relay();
        let bad = relay.register_endpoint("relay.agent.a").await.unwrap();
        let good = relay.register_endpoint("relay.agent.*").await.unwrap();
        relay.store().fail_endpoint(&bad.hash);

        let result = send(&relay, "relay.agent.a").await;
        assert_eq!(result.delivered_to, 1);

        let id = result.message_id.unwrap();
        assert_eq!(relay.store().status_of(&good.hash, id), Some(MessageStatus::New));
        assert_eq!(relay.store().status_of(&bad.hash, id), None);

        let dead = relay.list_dead_letters(Some(&bad.hash), 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("storage write failed"));
    }

    #[tokio::test]
    async fn full_mailbox_is_rejected_and_sender_is_warned() {
        let mut config = ReliabilityConfig::default();
        config.backpressure.max_mailbox_size = 2;
        config.backpressure.pressure_warning_at = 0.5;
        let relay = relay_with(config, vec![]);
        let endpoint = relay.register_endpoint("relay.agent.slow").await.unwrap();
        let mut warnings = relay.on_signal(SENDER).unwrap();

        let first = send(&relay, "relay.agent.slow").await;
        assert_eq!(first.mailbox_pressure.get(&endpoint.hash), Some(&0.0));
        assert!(warnings.try_recv().is_none());

        let second = send(&relay, "relay.agent.slow").await;
        assert_eq!(second.delivered_to, 1);
        assert_eq!(second.mailbox_pressure.get(&endpoint.hash), Some(&0.5));
        let (subject, signal) = warnings.try_recv().unwrap();
        assert_eq!(subject, SENDER);
        assert_eq!(signal.signal_type, SignalType::Backpressure);
        assert_eq!(signal.endpoint_subject, "relay.agent.slow");

        let third = send(&relay, "relay.agent.slow").await;
        assert_eq!(third.delivered_to, 0);
        assert!(third.has_rejection(RejectionReason::Backpressure));
        assert_eq!(third.mailbox_pressure.get(&endpoint.hash), Some(&1.0));
        assert_eq!(relay.count_dead_letters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spent_budget_is_rejected_before_storage() {
        let relay = relay();
        relay.register_endpoint("relay.agent.a").await.unwrap();

        let mut budget = Budget::new(2, 60_000);
        budget.hop_count = 2;
        let result = relay
            .publish("relay.agent.a", vec![], opts().with_budget(budget))
            .await
            .unwrap();

        assert!(result.has_rejection(RejectionReason::BudgetExceeded));
        assert_eq!(relay.store().attempts(), 0);
        assert_eq!(relay.count_dead_letters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn successful_handler_moves_message_to_cur() {
        let relay = relay();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay
            .subscribe("relay.agent.a", move |env: &Envelope| -> Result<(), HandlerError> {
                sink.lock().unwrap().push(env.id);
                Ok(())
            })
            .await
            .unwrap();

        let result = send(&relay, "relay.agent.a").await;
        let id = result.message_id.unwrap();

        assert_eq!(result.delivered_to, 1);
        assert_eq!(seen.lock().unwrap().as_slice(), [id]);
        let hash = test_hash("relay.agent.a");
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::Cur));
        assert_eq!(relay.index().rows()[0].status, MessageStatus::Cur);
    }

    #[tokio::test]
    async fn failing_handler_dead_letters_and_counts_against_breaker() {
        let relay = relay();
        relay
            .subscribe("relay.agent.a", |_: &Envelope| -> Result<(), HandlerError> {
                Err(HandlerError::new("handler exploded"))
            })
            .await
            .unwrap();

        let result = send(&relay, "relay.agent.a").await;
        let id = result.message_id.unwrap();
        let hash = test_hash("relay.agent.a");

        assert_eq!(result.delivered_to, 0);
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::Failed));
        assert_eq!(relay.index().rows()[0].status, MessageStatus::Failed);
        assert_eq!(relay.breaker_snapshot(&hash).consecutive_failures, 1);

        let dead = relay.list_dead_letters(None, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("handler exploded"));
        assert_eq!(dead[0].original_envelope.id, id);
    }

    #[tokio::test]
    async fn unsubscribed_endpoint_keeps_messages_in_new() {
        let relay = relay();
        let handle = relay
            .subscribe("relay.agent.a", |_: &Envelope| -> Result<(), HandlerError> { Ok(()) })
            .await
            .unwrap();
        assert!(handle.unsubscribe());

        let id = send(&relay, "relay.agent.a").await.message_id.unwrap();
        let hash = test_hash("relay.agent.a");
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::New));
    }

    #[tokio::test]
    async fn index_failure_removes_the_stored_file() {
        let relay = relay();
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        relay.index().fail_inserts.store(true, Ordering::SeqCst);

        let result = send(&relay, "relay.agent.a").await;
        assert_eq!(result.delivered_to, 0);
        assert_eq!(relay.store().stored_count(), 0);
        assert_eq!(relay.store().attempts(), 1);
        assert_eq!(relay.breaker_snapshot(&endpoint.hash).consecutive_failures, 1);
        assert_eq!(relay.count_dead_letters().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_and_inbox_listing() {
        let relay = relay();
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        let first = send(&relay, "relay.agent.a").await.message_id.unwrap();
        let second = send(&relay, "relay.agent.a").await.message_id.unwrap();

        let envelope = relay.claim(&endpoint.hash, first).await.unwrap();
        assert_eq!(envelope.payload_str(), Some("hello"));
        assert!(relay.claim(&endpoint.hash, first).await.is_err(), "already claimed");

        let new = relay
            .read_inbox("relay.agent.a", Some(MessageStatus::New), 10)
            .await
            .unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].id, second);

        let all = relay.read_inbox("relay.agent.a", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second, "newest first");

        let (_, status) = relay.read_message(&endpoint.hash, first).await.unwrap();
        assert_eq!(status, MessageStatus::Cur);
    }

    #[tokio::test]
    async fn read_inbox_for_unknown_endpoint_fails() {
        let relay = relay();
        let err = relay.read_inbox("relay.nobody", None, 10).await.unwrap_err();
        assert!(matches!(err, RelayError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn mark_failed_and_purge() {
        let relay = relay();
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        let id = send(&relay, "relay.agent.a").await.message_id.unwrap();

        relay.mark_failed(&endpoint.hash, id, "could not parse").await.unwrap();
        assert_eq!(relay.store().status_of(&endpoint.hash, id), Some(MessageStatus::Failed));
        assert_eq!(relay.metrics().await.unwrap().failed, 1);
        assert_eq!(relay.count_dead_letters().await.unwrap(), 1);

        relay.purge(&endpoint.hash, id).await.unwrap();
        assert_eq!(relay.store().stored_count(), 0);
        assert_eq!(relay.metrics().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_rows_and_mailbox() {
        let relay = relay();
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        send(&relay, "relay.agent.a").await;
        assert!(relay.store().has_mailbox(&endpoint.hash));

        assert!(relay.unregister_endpoint("relay.agent.a").await.unwrap());
        assert!(!relay.store().has_mailbox(&endpoint.hash));
        assert!(relay.index().rows().is_empty());
        assert!(relay.list_endpoints().is_empty());
        assert!(!relay.unregister_endpoint("relay.agent.a").await.unwrap());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let relay = relay();
        let a = relay.register_endpoint("relay.agent.*").await.unwrap();
        let b = relay.register_endpoint("relay.agent.*").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(relay.list_endpoints().len(), 1);
        assert!(relay.register_endpoint("relay..bad").await.is_err());
    }

    #[tokio::test]
    async fn signals_reach_matching_receivers() {
        let relay = relay();
        let mut rx = relay.on_signal("relay.agent.*").unwrap();
        let signal = Signal::new(SignalType::Presence, "relay.agent.a", serde_json::json!({"online": true}));

        assert_eq!(relay.signal("relay.agent.a", signal).unwrap(), 1);
        let (subject, got) = rx.recv().await.unwrap();
        assert_eq!(subject, "relay.agent.a");
        assert_eq!(got.data["online"], true);
        assert!(relay.on_signal("relay.>.x").is_err());
    }

    #[tokio::test]
    async fn disabled_checks_are_skipped() {
        let mut config = ReliabilityConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_per_window = 0;
        config.circuit_breaker.enabled = false;
        config.backpressure.enabled = false;
        let relay = relay_with(config, vec![]);
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        relay.store().fail_endpoint(&endpoint.hash);

        for _ in 0..10 {
            let result = send(&relay, "relay.agent.a").await;
            assert!(result.rejected.is_empty());
            assert!(result.mailbox_pressure.is_empty());
        }
        assert_eq!(relay.store().attempts(), 10);
        assert_eq!(relay.breaker_snapshot(&endpoint.hash).state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn panicking_handler_is_dead_lettered_and_siblings_still_get_the_message() {
        let relay = relay();
        relay
            .subscribe("relay.agent.a", |_: &Envelope| -> Result<(), HandlerError> {
                panic!("boom")
            })
            .await
            .unwrap();
        let sibling = relay.register_endpoint("relay.agent.>").await.unwrap();

        let result = send(&relay, "relay.agent.a").await;
        let id = result.message_id.unwrap();
        let hash = test_hash("relay.agent.a");

        assert_eq!(result.delivered_to, 1);
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::Failed));
        assert_eq!(relay.store().status_of(&sibling.hash, id), Some(MessageStatus::New));
        assert_eq!(relay.breaker_snapshot(&hash).consecutive_failures, 1);

        let dead = relay.list_dead_letters(Some(&hash), 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("handler panicked: boom"));
    }

    #[tokio::test]
    async fn index_update_failure_after_dispatch_undoes_the_move() {
        let relay = relay();
        relay
            .subscribe("relay.agent.a", |_: &Envelope| -> Result<(), HandlerError> { Ok(()) })
            .await
            .unwrap();
        relay.index().fail_updates.store(true, Ordering::SeqCst);

        let result = send(&relay, "relay.agent.a").await;
        let id = result.message_id.unwrap();
        let hash = test_hash("relay.agent.a");

        assert_eq!(result.delivered_to, 0);
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::New));
        assert_eq!(relay.index().rows()[0].status, MessageStatus::New);
        let dead = relay.list_dead_letters(Some(&hash), 10).await.unwrap();
        assert!(dead[0].reason.contains("status update failed"));
    }

    #[tokio::test]
    async fn unregister_waits_for_in_flight_publish() {
        let relay = Arc::new(relay());
        let endpoint = relay.register_endpoint("relay.agent.a").await.unwrap();
        let (entered, release) = relay.index().gate_next_size_query();

        let publisher = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move { send(&relay, "relay.agent.a").await }
        });
        entered.notified().await;

        let remover = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move { relay.unregister_endpoint("relay.agent.a").await.unwrap() }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!remover.is_finished(), "unregister ran during a publish");
        release.notify_one();

        assert_eq!(publisher.await.unwrap().delivered_to, 1);
        assert!(remover.await.unwrap());
        assert!(relay.index().rows().is_empty());
        assert_eq!(relay.store().stored_count(), 0);
        assert!(!relay.store().has_mailbox(&endpoint.hash));
    }

    #[tokio::test]
    async fn exclusive_work_waits_for_in_flight_publish() {
        let relay = Arc::new(relay());
        relay.register_endpoint("relay.agent.a").await.unwrap();
        let (entered, release) = relay.index().gate_next_size_query();

        let publisher = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move { send(&relay, "relay.agent.a").await }
        });
        entered.notified().await;

        let counter = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move { relay.exclusive(async { relay.index().rows().len() }).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!counter.is_finished());
        release.notify_one();

        publisher.await.unwrap();
        assert_eq!(counter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reregistered_endpoint_does_not_revive_old_handlers() {
        let relay = relay();
        let calls = Arc::new(StdMutex::new(0));
        let counter = Arc::clone(&calls);
        relay
            .subscribe("relay.agent.a", move |_: &Envelope| -> Result<(), HandlerError> {
                *counter.lock().unwrap() += 1;
                Ok(())
            })
            .await
            .unwrap();

        assert!(relay.unregister_endpoint("relay.agent.a").await.unwrap());
        assert_eq!(relay.subscriptions().count_for("relay.agent.a"), 0);

        relay.register_endpoint("relay.agent.a").await.unwrap();
        let id = send(&relay, "relay.agent.a").await.message_id.unwrap();

        assert_eq!(*calls.lock().unwrap(), 0);
        let hash = test_hash("relay.agent.a");
        assert_eq!(relay.store().status_of(&hash, id), Some(MessageStatus::New));
    }

    #[test]
    fn window_start_saturates() {
        let now = Utc::now();
        assert_eq!(window_start(now, 60), now - Duration::seconds(60));
        assert_eq!(window_start(now, u64::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
