use crate::application::SeedReport;
use crate::domain::{BillingStatus, Plan, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub(super) struct CreateUserRequest {
    #[validate(email)]
    #[schema(example = "ada@example.com")]
    pub(super) email: String,
    #[validate(url, length(max = 2048))]
    pub(super) image_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct CreateUserResponse {
    pub(super) id: Uuid,
    /// Shown once; only its hash is stored.
    pub(super) api_token: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub(super) struct UpdateProfileRequest {
    #[validate(email)]
    pub(super) email: Option<String>,
    #[validate(url, length(max = 2048))]
    pub(super) image_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct UserResponse {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) image_url: Option<String>,
    pub(super) has_customer: bool,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            image_url: user.image_url,
            has_customer: user.customer_id.is_some(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CheckoutRequest {
    #[schema(example = "pro")]
    pub(super) plan: String,
    #[serde(default = "default_interval")]
    #[schema(example = "month")]
    pub(super) interval: String,
    #[serde(default = "default_currency")]
    #[schema(example = "usd")]
    pub(super) currency: String,
}

fn default_interval() -> String {
    "month".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Serialize, ToSchema)]
pub(super) struct CheckoutResponse {
    pub(super) url: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct BillingStatusResponse {
    #[schema(example = "pro")]
    pub(super) plan: String,
    /// `free` unless the subscription is active, trialing or past due.
    #[schema(example = "pro")]
    pub(super) effective_plan: String,
    pub(super) status: Option<String>,
    pub(super) current_period_start: Option<DateTime<Utc>>,
    pub(super) current_period_end: Option<DateTime<Utc>>,
    pub(super) cancel_at_period_end: bool,
    pub(super) has_customer: bool,
}

impl BillingStatusResponse {
    pub(super) fn new(status: BillingStatus, has_customer: bool) -> Self {
        Self {
            plan: status.plan.to_string(),
            effective_plan: status.effective_plan.to_string(),
            status: status.status.map(|s| s.to_string()),
            current_period_start: status.current_period_start,
            current_period_end: status.current_period_end,
            cancel_at_period_end: status.cancel_at_period_end,
            has_customer,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct PlanPriceResponse {
    pub(super) interval: String,
    pub(super) currency: String,
    /// Minor currency units.
    pub(super) amount: i64,
    pub(super) lookup_key: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct PlanResponse {
    pub(super) key: String,
    pub(super) name: String,
    pub(super) description: String,
    pub(super) prices: Vec<PlanPriceResponse>,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            key: plan.key.to_string(),
            name: plan.name,
            description: plan.description,
            prices: plan
                .prices
                .into_iter()
                .map(|p| PlanPriceResponse {
                    interval: p.interval.to_string(),
                    currency: p.currency.to_string(),
                    amount: p.amount,
                    lookup_key: p.lookup_key,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct SeedReportResponse {
    pub(super) products_created: u32,
    pub(super) products_updated: u32,
    pub(super) prices_created: u32,
    pub(super) prices_replaced: u32,
    pub(super) prices_unchanged: u32,
    pub(super) plans_upserted: u32,
}

impl From<SeedReport> for SeedReportResponse {
    fn from(report: SeedReport) -> Self {
        Self {
            products_created: report.products_created,
            products_updated: report.products_updated,
            prices_created: report.prices_created,
            prices_replaced: report.prices_replaced,
            prices_unchanged: report.prices_unchanged,
            plans_upserted: report.plans_upserted,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct WebhookAckResponse {
    pub(super) received: bool,
    #[schema(example = "applied")]
    pub(super) outcome: String,
}
