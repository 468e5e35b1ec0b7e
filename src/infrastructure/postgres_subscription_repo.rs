use crate::domain::{
    Currency, Interval, PlanKey, Subscription, SubscriptionState, SubscriptionStatus, WriteOutcome,
};
use crate::infrastructure::{RepositoryError, SubscriptionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, external_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM subscriptions WHERE external_id = $1) AS found")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_key, status, currency, billing_interval, \
     current_period_start, current_period_end, cancel_at_period_end, external_id, \
     last_event_at, created_at, updated_at";

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE external_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn upsert_for_user(
        &self,
        subscription: &Subscription,
    ) -> Result<WriteOutcome, RepositoryError> {
        // The conflict branch only fires when the incoming row is for another
        // provider subscription or is at least as recent as the stored one.
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_key, status, currency, billing_interval,
                current_period_start, current_period_end, cancel_at_period_end,
                external_id, last_event_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO UPDATE
            SET plan_key = EXCLUDED.plan_key,
                status = EXCLUDED.status,
                currency = EXCLUDED.currency,
                billing_interval = EXCLUDED.billing_interval,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                external_id = EXCLUDED.external_id,
                last_event_at = EXCLUDED.last_event_at,
                updated_at = EXCLUDED.updated_at
            WHERE subscriptions.external_id <> EXCLUDED.external_id
               OR (subscriptions.current_period_end, subscriptions.last_event_at)
                  <= (EXCLUDED.current_period_end, EXCLUDED.last_event_at)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.plan_key.to_string())
        .bind(subscription.status.to_string())
        .bind(subscription.currency.map(|c| c.to_string()))
        .bind(subscription.interval.map(|i| i.to_string()))
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(&subscription.external_id)
        .bind(subscription.last_event_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        })
    }

    async fn apply_state(&self, state: &SubscriptionState) -> Result<WriteOutcome, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_key = COALESCE($2, plan_key),
                status = $3,
                currency = COALESCE($4, currency),
                billing_interval = COALESCE($5, billing_interval),
                current_period_start = $6,
                current_period_end = $7,
                cancel_at_period_end = $8,
                last_event_at = $9,
                updated_at = $10
            WHERE external_id = $1
              AND (current_period_end, last_event_at) <= ($7, $9)
            "#,
        )
        .bind(&state.external_id)
        .bind(state.plan_key.map(|k| k.to_string()))
        .bind(state.status.to_string())
        .bind(state.currency.map(|c| c.to_string()))
        .bind(state.interval.map(|i| i.to_string()))
        .bind(state.current_period_start)
        .bind(state.current_period_end)
        .bind(state.cancel_at_period_end)
        .bind(state.event_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(WriteOutcome::Applied);
        }

        if self.exists(&state.external_id).await? {
            Ok(WriteOutcome::Stale)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }

    async fn mark_canceled(
        &self,
        external_id: &str,
        event_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                cancel_at_period_end = FALSE,
                last_event_at = GREATEST(last_event_at, $3),
                updated_at = $4
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .bind(SubscriptionStatus::Canceled.to_string())
        .bind(event_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NotFound
        })
    }
}

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, RepositoryError> {
    T::from_str(value)
        .map_err(|_| RepositoryError::InvalidData(format!("Invalid {}: {}", column, value)))
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, RepositoryError> {
    let plan_key: String = row.try_get("plan_key")?;
    let status: String = row.try_get("status")?;
    let currency: Option<String> = row.try_get("currency")?;
    let interval: Option<String> = row.try_get("billing_interval")?;

    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan_key: parse_column::<PlanKey>("plan_key", &plan_key)?,
        status: parse_column::<SubscriptionStatus>("status", &status)?,
        currency: currency
            .as_deref()
            .map(|c| parse_column::<Currency>("currency", c))
            .transpose()?,
        interval: interval
            .as_deref()
            .map(|i| parse_column::<Interval>("billing_interval", i))
            .transpose()?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        external_id: row.try_get("external_id")?,
        last_event_at: row.try_get("last_event_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
