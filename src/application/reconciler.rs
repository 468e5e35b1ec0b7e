//! Applies verified billing-provider webhooks to the subscription store.

use crate::domain::{
    CheckoutSessionObject, EventParseError, Subscription, SubscriptionObject, WebhookEvent,
    WriteOutcome,
};
use crate::infrastructure::{
    BillingProvider, RepositoryError, SignatureError, StripeError, SubscriptionRepository,
    UserRepository, WebhookVerifier,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use strum::Display;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Reasons a delivery is refused outright. Nothing is processed.
#[derive(Error, Debug)]
pub enum WebhookRejection {
    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),
    #[error("Malformed event envelope: {0}")]
    MalformedEnvelope(serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Billing provider error: {0}")]
    BillingProvider(#[from] StripeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied,
    /// The stored state is more recent than the event.
    Stale,
    Ignored,
    /// Processing failed after verification; logged and acknowledged.
    Failed,
}

pub struct WebhookReconciler<U, S, B>
where
    U: UserRepository,
    S: SubscriptionRepository,
    B: BillingProvider,
{
    verifier: WebhookVerifier,
    user_repo: Arc<U>,
    subscription_repo: Arc<S>,
    provider: Arc<B>,
}

impl<U, S, B> WebhookReconciler<U, S, B>
where
    U: UserRepository,
    S: SubscriptionRepository,
    B: BillingProvider,
{
    pub fn new(
        verifier: WebhookVerifier,
        user_repo: Arc<U>,
        subscription_repo: Arc<S>,
        provider: Arc<B>,
    ) -> Self {
        Self {
            verifier,
            user_repo,
            subscription_repo,
            provider,
        }
    }

    /// Verifies, parses and applies one delivery. Only signature and
    /// envelope failures are returned as errors; everything after that is
    /// logged and reported as an outcome so the provider stops retrying.
    pub async fn receive(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ReconcileOutcome, WebhookRejection> {
        if let Err(e) = self.verifier.verify(payload, signature_header) {
            warn!(error = %e, "Rejected webhook with invalid signature");
            return Err(e.into());
        }

        let event = match WebhookEvent::parse(payload) {
            Ok(event) => event,
            Err(EventParseError::Envelope(e)) => {
                warn!(error = %e, "Rejected webhook with malformed envelope");
                return Err(WebhookRejection::MalformedEnvelope(e));
            }
            Err(e) => {
                error!(error = %e, "Failed to decode webhook event");
                return Ok(ReconcileOutcome::Failed);
            }
        };

        let event_id = event.event_id().to_string();
        match self.process(event).await {
            Ok(outcome) => {
                debug!(event_id = %event_id, outcome = ?outcome, "Webhook processed");
                Ok(outcome)
            }
            Err(e @ ReconcileError::SubscriptionNotFound(_)) => {
                warn!(event_id = %event_id, error = %e, "Webhook references unknown subscription");
                Ok(ReconcileOutcome::Failed)
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Webhook processing failed");
                Ok(ReconcileOutcome::Failed)
            }
        }
    }

    /// Applies an already verified event.
    pub async fn process(&self, event: WebhookEvent) -> Result<ReconcileOutcome, ReconcileError> {
        match event {
            WebhookEvent::CheckoutCompleted {
                event_id,
                created,
                session,
            } => self.on_checkout_completed(&event_id, created, &session).await,
            WebhookEvent::SubscriptionUpdated {
                event_id,
                created,
                subscription,
            } => self.on_subscription_updated(&event_id, created, &subscription).await,
            WebhookEvent::SubscriptionDeleted {
                event_id,
                created,
                subscription,
            } => self.on_subscription_deleted(&event_id, created, &subscription).await,
            WebhookEvent::Ignored {
                event_id,
                event_type,
            } => {
                debug!(event_id = %event_id, event_type = %event_type, "Ignoring webhook event");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn on_checkout_completed(
        &self,
        event_id: &str,
        created: DateTime<Utc>,
        session: &CheckoutSessionObject,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !session.is_subscription() {
            debug!(event_id, session_id = %session.id, "Ignoring non-subscription checkout");
            return Ok(ReconcileOutcome::Ignored);
        }

        let user_id = session.user_id().ok_or_else(|| {
            ReconcileError::UserNotFound(format!("session {} has no user_id metadata", session.id))
        })?;
        let user = self.user_repo.get_by_id(user_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => ReconcileError::UserNotFound(user_id.to_string()),
            other => ReconcileError::Repository(other),
        })?;

        // The session's customer is authoritative over one created in the background.
        if let Some(customer_id) = session.customer.as_deref() {
            if user.customer_id.as_deref() != Some(customer_id) {
                self.user_repo.attach_customer(user.id, customer_id).await?;
                info!(user_id = %user.id, customer_id, "Attached customer from checkout");
            }
        }

        let subscription_id = session.subscription.as_deref().ok_or_else(|| {
            ReconcileError::InvalidPayload(format!("session {} has no subscription", session.id))
        })?;
        let remote = self.provider.retrieve_subscription(subscription_id).await?;
        let state = remote
            .to_state(created)
            .map_err(ReconcileError::InvalidPayload)?;

        let plan_key = session.plan_key().or(state.plan_key).ok_or_else(|| {
            ReconcileError::InvalidPayload(format!(
                "cannot resolve plan for subscription {}",
                subscription_id
            ))
        })?;

        let subscription = Subscription::from_state(user.id, plan_key, &state);
        let outcome = self.subscription_repo.upsert_for_user(&subscription).await?;
        info!(
            event_id,
            user_id = %user.id,
            subscription_id,
            plan = %plan_key,
            status = %state.status,
            outcome = ?outcome,
            "Checkout completed"
        );

        to_outcome(outcome, subscription_id)
    }

    async fn on_subscription_updated(
        &self,
        event_id: &str,
        created: DateTime<Utc>,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let state = subscription
            .to_state(created)
            .map_err(ReconcileError::InvalidPayload)?;
        let outcome = self.subscription_repo.apply_state(&state).await?;
        info!(
            event_id,
            subscription_id = %subscription.id,
            status = %state.status,
            outcome = ?outcome,
            "Subscription updated"
        );

        to_outcome(outcome, &subscription.id)
    }

    async fn on_subscription_deleted(
        &self,
        event_id: &str,
        created: DateTime<Utc>,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let outcome = self
            .subscription_repo
            .mark_canceled(&subscription.id, created)
            .await?;
        info!(
            event_id,
            subscription_id = %subscription.id,
            outcome = ?outcome,
            "Subscription canceled"
        );

        to_outcome(outcome, &subscription.id)
    }
}

fn to_outcome(outcome: WriteOutcome, external_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
    match outcome {
        WriteOutcome::Applied => Ok(ReconcileOutcome::Applied),
        WriteOutcome::Stale => Ok(ReconcileOutcome::Stale),
        WriteOutcome::NotFound => Err(ReconcileError::SubscriptionNotFound(external_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MockBillingProvider, MockSubscriptionRepository, MockUserRepository};
    use serde_json::json;

    const SECRET: &str = "whsec_unit";

    fn reconciler(
        users: MockUserRepository,
        subscriptions: MockSubscriptionRepository,
        provider: MockBillingProvider,
    ) -> WebhookReconciler<MockUserRepository, MockSubscriptionRepository, MockBillingProvider> {
        WebhookReconciler::new(
            WebhookVerifier::new(SECRET.to_string(), 300),
            Arc::new(users),
            Arc::new(subscriptions),
            Arc::new(provider),
        )
    }

    fn signed(payload: &[u8]) -> String {
        WebhookVerifier::new(SECRET.to_string(), 300)
            .header_for(payload, Utc::now().timestamp())
            .unwrap()
    }

    fn deleted_event(subscription_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "created": 1_700_000_500,
            "data": { "object": {
                "id": subscription_id,
                "status": "canceled",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000
            }}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn bad_signature_never_touches_the_store() {
        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions.expect_mark_canceled().never();
        subscriptions.expect_apply_state().never();
        subscriptions.expect_upsert_for_user().never();

        let rec = reconciler(MockUserRepository::new(), subscriptions, MockBillingProvider::new());
        let payload = deleted_event("sub_1");
        let result = rec.receive(&payload, Some("t=1,v1=deadbeef")).await;

        assert!(matches!(result, Err(WebhookRejection::Signature(_))));
    }

    #[tokio::test]
    async fn malformed_envelope_is_rejected() {
        let rec = reconciler(
            MockUserRepository::new(),
            MockSubscriptionRepository::new(),
            MockBillingProvider::new(),
        );
        let payload = b"not json";
        let result = rec.receive(payload, Some(&signed(payload))).await;

        assert!(matches!(result, Err(WebhookRejection::MalformedEnvelope(_))));
    }

    #[tokio::test]
    async fn unknown_subscription_is_acknowledged() {
        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_mark_canceled()
            .returning(|_, _| Ok(WriteOutcome::NotFound));

        let rec = reconciler(MockUserRepository::new(), subscriptions, MockBillingProvider::new());
        let payload = deleted_event("sub_missing");
        let outcome = rec.receive(&payload, Some(&signed(&payload))).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Failed);
    }

    #[tokio::test]
    async fn payment_mode_checkout_is_ignored() {
        let mut users = MockUserRepository::new();
        users.expect_get_by_id().never();

        let rec = reconciler(users, MockSubscriptionRepository::new(), MockBillingProvider::new());
        let payload = serde_json::to_vec(&json!({
            "id": "evt_pay",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cs_1", "mode": "payment" } }
        }))
        .unwrap();
        let outcome = rec.receive(&payload, Some(&signed(&payload))).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }
}
