use crate::domain::{
    Plan, PlanKey, PlanPrice, ProfileUpdate, Subscription, SubscriptionState, User, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User, api_token: &str) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<User, RepositoryError>;
    /// Resolves an active (not disabled) user from a raw API token.
    async fn get_by_api_token(&self, api_token: &str) -> Result<User, RepositoryError>;
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User, RepositoryError>;
    /// Unconditionally points the user at `customer_id`.
    async fn attach_customer(&self, id: Uuid, customer_id: &str) -> Result<(), RepositoryError>;
    /// Sets the customer id only when none is attached yet. Returns whether it was written.
    async fn attach_customer_if_absent(
        &self,
        id: Uuid,
        customer_id: &str,
    ) -> Result<bool, RepositoryError>;
    async fn disable(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Insert or replace the row keyed by `plan.key`.
    async fn upsert(&self, plan: &Plan) -> Result<(), RepositoryError>;
    async fn get(&self, key: PlanKey) -> Result<Option<Plan>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Plan>, RepositoryError>;
}

/// Subscription store. Writes are conditional on recency so that
/// out-of-order webhook deliveries cannot regress a row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>, RepositoryError>;
    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError>;
    /// Wholesale replacement of the user's row. `Stale` when the stored row
    /// belongs to the same provider subscription and is more recent.
    async fn upsert_for_user(
        &self,
        subscription: &Subscription,
    ) -> Result<WriteOutcome, RepositoryError>;
    /// In-place update of the row with `state.external_id`.
    async fn apply_state(&self, state: &SubscriptionState) -> Result<WriteOutcome, RepositoryError>;
    async fn mark_canceled(
        &self,
        external_id: &str,
        event_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, RepositoryError>;
}

pub fn hash_api_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("sha256:{:x}", digest)
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, email, image_url, customer_id, disabled_at, created_at, updated_at";

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn create(&self, user: &User, api_token: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, image_url, customer_id, api_token_hash, disabled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.image_url)
        .bind(&user.customer_id)
        .bind(hash_api_token(api_token))
        .bind(user.disabled_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("User {}", id)),
                _ => RepositoryError::DatabaseError(e),
            })?;

        row_to_user(&row)
    }

    async fn get_by_api_token(&self, api_token: &str) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE api_token_hash = $1 AND disabled_at IS NULL",
            USER_COLUMNS
        ))
        .bind(hash_api_token(api_token))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("User with token".to_string()),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_user(&row)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET email = COALESCE($1, email),
                image_url = COALESCE($2, image_url),
                updated_at = $3
            WHERE id = $4 AND disabled_at IS NULL
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&update.email)
        .bind(&update.image_url)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("User {}", id)))?;

        row_to_user(&row)
    }

    async fn attach_customer(&self, id: Uuid, customer_id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET customer_id = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(customer_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    async fn attach_customer_if_absent(
        &self,
        id: Uuid,
        customer_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET customer_id = $1, updated_at = $2
            WHERE id = $3 AND customer_id IS NULL
            "#,
        )
        .bind(customer_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn disable(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET disabled_at = COALESCE(disabled_at, $1), updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        image_url: row.try_get("image_url")?,
        customer_id: row.try_get("customer_id")?,
        disabled_at: row.try_get("disabled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn upsert(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let prices_json = serde_json::to_value(&plan.prices).map_err(|e| {
            RepositoryError::InvalidData(format!("Failed to serialize plan prices: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO plans (key, name, description, external_product_id, prices, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                external_product_id = EXCLUDED.external_product_id,
                prices = EXCLUDED.prices,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(plan.key.to_string())
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(&plan.external_product_id)
        .bind(prices_json)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: PlanKey) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT key, name, description, external_product_id, prices, updated_at
            FROM plans
            WHERE key = $1
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_plan).transpose()
    }

    async fn list(&self) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT key, name, description, external_product_id, prices, updated_at
            FROM plans
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_plan).collect()
    }
}

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Result<Plan, RepositoryError> {
    let key_str: String = row.try_get("key")?;
    let key = PlanKey::from_str(&key_str)
        .map_err(|_| RepositoryError::InvalidData(format!("Unknown plan key: {}", key_str)))?;

    let prices_json: serde_json::Value = row.try_get("prices")?;
    let prices: Vec<PlanPrice> = serde_json::from_value(prices_json).map_err(|e| {
        RepositoryError::InvalidData(format!("Failed to deserialize plan prices: {}", e))
    })?;

    Ok(Plan {
        key,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        external_product_id: row.try_get("external_product_id")?,
        prices,
        updated_at: row.try_get("updated_at")?,
    })
}
