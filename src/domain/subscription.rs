use super::plan::{Currency, Interval, PlanKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Maps a provider status onto the local set.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" | "unpaid" => SubscriptionStatus::PastDue,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Incomplete,
        }
    }

    pub fn grants_access(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }
}

/// Provider-side state of one subscription, as carried by a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    pub external_id: String,
    /// `None` when the event carries nothing this service can map to a plan.
    pub plan_key: Option<PlanKey>,
    pub status: SubscriptionStatus,
    pub currency: Option<Currency>,
    pub interval: Option<Interval>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Provider `created` timestamp of the event that produced this state.
    pub event_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_key: PlanKey,
    pub status: SubscriptionStatus,
    pub currency: Option<Currency>,
    pub interval: Option<Interval>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub external_id: String,
    pub last_event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a conditional write against the subscription store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored row is more recent; nothing was written.
    Stale,
    NotFound,
}

impl Subscription {
    pub fn from_state(user_id: Uuid, plan_key: PlanKey, state: &SubscriptionState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_key,
            status: state.status,
            currency: state.currency,
            interval: state.interval,
            current_period_start: state.current_period_start,
            current_period_end: state.current_period_end,
            cancel_at_period_end: state.cancel_at_period_end,
            external_id: state.external_id.clone(),
            last_event_at: state.event_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ordering is by period end first, then by event time. Equal keys are
    /// accepted so that replaying an event yields the same row.
    pub fn accepts(&self, period_end: DateTime<Utc>, event_at: DateTime<Utc>) -> bool {
        (period_end, event_at) >= (self.current_period_end, self.last_event_at)
    }

    /// Whether a wholesale replacement by `incoming` should happen.
    pub fn replaceable_by(&self, incoming: &Subscription) -> bool {
        self.external_id != incoming.external_id
            || self.accepts(incoming.current_period_end, incoming.last_event_at)
    }

    /// In-place update from provider state. Callers check [`Self::accepts`] first.
    pub fn apply(&mut self, state: &SubscriptionState) {
        if let Some(plan_key) = state.plan_key {
            self.plan_key = plan_key;
        }
        if state.currency.is_some() {
            self.currency = state.currency;
        }
        if state.interval.is_some() {
            self.interval = state.interval;
        }
        self.status = state.status;
        self.current_period_start = state.current_period_start;
        self.current_period_end = state.current_period_end;
        self.cancel_at_period_end = state.cancel_at_period_end;
        self.last_event_at = state.event_at;
        self.updated_at = Utc::now();
    }

    /// Terminal transition; plan and period are kept for history.
    pub fn cancel(&mut self, event_at: DateTime<Utc>) {
        self.status = SubscriptionStatus::Canceled;
        self.cancel_at_period_end = false;
        self.last_event_at = self.last_event_at.max(event_at);
        self.updated_at = Utc::now();
    }
}

/// What the presentation layer sees for a user.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillingStatus {
    pub plan: PlanKey,
    pub effective_plan: PlanKey,
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl BillingStatus {
    pub fn free() -> Self {
        Self {
            plan: PlanKey::Free,
            effective_plan: PlanKey::Free,
            status: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
        }
    }

    pub fn from_subscription(subscription: Option<&Subscription>) -> Self {
        let Some(sub) = subscription else {
            return Self::free();
        };

        let effective_plan = if sub.status.grants_access() {
            sub.plan_key
        } else {
            PlanKey::Free
        };

        Self {
            plan: sub.plan_key,
            effective_plan,
            status: Some(sub.status),
            current_period_start: Some(sub.current_period_start),
            current_period_end: Some(sub.current_period_end),
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }
}
