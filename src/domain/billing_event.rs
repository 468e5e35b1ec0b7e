//! Provider webhook payloads and the closed set of events this service acts on.

use super::plan::{parse_price_lookup_key, Currency, Interval, PlanKey};
use super::subscription::{SubscriptionState, SubscriptionStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_PLAN_KEY: &str = "plan_key";

#[derive(Error, Debug)]
pub enum EventParseError {
    #[error("Malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("Malformed {event_type} object: {source}")]
    Object {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid event timestamp: {0}")]
    Timestamp(i64),
}

#[derive(Debug, Deserialize)]
pub struct StripeEventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub mode: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn user_id(&self) -> Option<Uuid> {
        self.metadata
            .get(METADATA_USER_ID)
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn plan_key(&self) -> Option<PlanKey> {
        self.metadata
            .get(METADATA_PLAN_KEY)
            .and_then(|v| v.parse().ok())
    }

    pub fn is_subscription(&self) -> bool {
        self.mode.as_deref() == Some("subscription")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SubscriptionItems {
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub price: Option<PriceObject>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PriceObject {
    pub id: String,
    pub lookup_key: Option<String>,
    pub currency: Option<String>,
    pub recurring: Option<RecurringObject>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecurringObject {
    pub interval: String,
}

impl SubscriptionObject {
    fn first_item(&self) -> Option<&SubscriptionItem> {
        self.items.data.first()
    }

    fn first_price(&self) -> Option<&PriceObject> {
        self.first_item().and_then(|item| item.price.as_ref())
    }

    /// Newer API versions move the period onto the subscription item.
    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|i| i.current_period_start))
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|i| i.current_period_end))
    }

    fn lookup(&self) -> Option<(PlanKey, Interval, Currency)> {
        self.first_price()
            .and_then(|p| p.lookup_key.as_deref())
            .and_then(parse_price_lookup_key)
    }

    pub fn plan_key(&self) -> Option<PlanKey> {
        self.metadata
            .get(METADATA_PLAN_KEY)
            .and_then(|v| v.parse().ok())
            .or_else(|| self.lookup().map(|(plan, _, _)| plan))
    }

    pub fn currency(&self) -> Option<Currency> {
        self.first_price()
            .and_then(|p| p.currency.as_deref())
            .and_then(|c| c.parse().ok())
            .or_else(|| self.lookup().map(|(_, _, currency)| currency))
    }

    pub fn interval(&self) -> Option<Interval> {
        self.first_price()
            .and_then(|p| p.recurring.as_ref())
            .and_then(|r| r.interval.parse().ok())
            .or_else(|| self.lookup().map(|(_, interval, _)| interval))
    }

    /// Converts the provider object into local state. Fails only when the
    /// period bounds are absent or out of range.
    pub fn to_state(&self, event_at: DateTime<Utc>) -> Result<SubscriptionState, String> {
        let start = self
            .period_start()
            .ok_or_else(|| format!("subscription {} has no period start", self.id))?;
        let end = self
            .period_end()
            .ok_or_else(|| format!("subscription {} has no period end", self.id))?;

        Ok(SubscriptionState {
            external_id: self.id.clone(),
            plan_key: self.plan_key(),
            status: SubscriptionStatus::from_provider(&self.status),
            currency: self.currency(),
            interval: self.interval(),
            current_period_start: unix_to_datetime(start)
                .ok_or_else(|| format!("invalid period start {}", start))?,
            current_period_end: unix_to_datetime(end)
                .ok_or_else(|| format!("invalid period end {}", end))?,
            cancel_at_period_end: self.cancel_at_period_end,
            event_at,
        })
    }
}

pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    CheckoutCompleted {
        event_id: String,
        created: DateTime<Utc>,
        session: CheckoutSessionObject,
    },
    SubscriptionUpdated {
        event_id: String,
        created: DateTime<Utc>,
        subscription: SubscriptionObject,
    },
    SubscriptionDeleted {
        event_id: String,
        created: DateTime<Utc>,
        subscription: SubscriptionObject,
    },
    Ignored {
        event_id: String,
        event_type: String,
    },
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let envelope: StripeEventEnvelope =
            serde_json::from_slice(payload).map_err(EventParseError::Envelope)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: StripeEventEnvelope) -> Result<Self, EventParseError> {
        let StripeEventEnvelope {
            id: event_id,
            event_type,
            created,
            data,
        } = envelope;

        let known = matches!(
            event_type.as_str(),
            CHECKOUT_SESSION_COMPLETED | SUBSCRIPTION_UPDATED | SUBSCRIPTION_DELETED
        );
        if !known {
            return Ok(WebhookEvent::Ignored {
                event_id,
                event_type,
            });
        }

        let created = unix_to_datetime(created).ok_or(EventParseError::Timestamp(created))?;
        let object_error = |source| EventParseError::Object {
            event_type: event_type.clone(),
            source,
        };

        let event = match event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => WebhookEvent::CheckoutCompleted {
                event_id,
                created,
                session: serde_json::from_value(data.object).map_err(object_error)?,
            },
            SUBSCRIPTION_UPDATED => WebhookEvent::SubscriptionUpdated {
                event_id,
                created,
                subscription: serde_json::from_value(data.object).map_err(object_error)?,
            },
            _ => WebhookEvent::SubscriptionDeleted {
                event_id,
                created,
                subscription: serde_json::from_value(data.object).map_err(object_error)?,
            },
        };

        Ok(event)
    }

    pub fn event_id(&self) -> &str {
        match self {
            WebhookEvent::CheckoutCompleted { event_id, .. }
            | WebhookEvent::SubscriptionUpdated { event_id, .. }
            | WebhookEvent::SubscriptionDeleted { event_id, .. }
            | WebhookEvent::Ignored { event_id, .. } => event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn unknown_types_are_ignored_without_touching_the_object() {
        let event = WebhookEvent::parse(&payload("invoice.paid", json!("not an object"))).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event_id: "evt_1".to_string(),
                event_type: "invoice.paid".to_string()
            }
        );
    }

    #[test]
    fn checkout_session_metadata_is_exposed() {
        let user_id = Uuid::new_v4();
        let event = WebhookEvent::parse(&payload(
            CHECKOUT_SESSION_COMPLETED,
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": user_id.to_string(), "plan_key": "pro" }
            }),
        ))
        .unwrap();

        match event {
            WebhookEvent::CheckoutCompleted { session, .. } => {
                assert_eq!(session.user_id(), Some(user_id));
                assert_eq!(session.plan_key(), Some(PlanKey::Pro));
                assert!(session.is_subscription());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn subscription_period_falls_back_to_first_item() {
        let event = WebhookEvent::parse(&payload(
            SUBSCRIPTION_UPDATED,
            json!({
                "id": "sub_1",
                "status": "unpaid",
                "items": { "data": [{
                    "current_period_start": 100,
                    "current_period_end": 200,
                    "price": {
                        "id": "price_1",
                        "lookup_key": "pro_year_eur",
                        "currency": "eur",
                        "recurring": { "interval": "year" }
                    }
                }]}
            }),
        ))
        .unwrap();

        let WebhookEvent::SubscriptionUpdated { subscription, created, .. } = event else {
            panic!("expected subscription update");
        };
        let state = subscription.to_state(created).unwrap();
        assert_eq!(state.current_period_end, unix_to_datetime(200).unwrap());
        assert_eq!(state.status, SubscriptionStatus::PastDue);
        assert_eq!(state.plan_key, Some(PlanKey::Pro));
        assert_eq!(state.currency, Some(Currency::Eur));
        assert_eq!(state.interval, Some(Interval::Year));
    }

    #[test]
    fn missing_period_is_reported() {
        let subscription = SubscriptionObject {
            id: "sub_1".to_string(),
            customer: None,
            status: "active".to_string(),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            metadata: HashMap::new(),
            items: SubscriptionItems::default(),
        };
        assert!(subscription.to_state(Utc::now()).is_err());
    }

    #[test]
    fn malformed_envelope_and_object_are_distinguished() {
        assert!(matches!(
            WebhookEvent::parse(b"{\"type\":"),
            Err(EventParseError::Envelope(_))
        ));
        assert!(matches!(
            WebhookEvent::parse(&payload(SUBSCRIPTION_DELETED, json!({ "id": 5 }))),
            Err(EventParseError::Object { .. })
        ));
    }
}
