use crate::domain::{find_plan_definition, Currency, Interval, PlanKey};
use crate::infrastructure::{
    BillingProvider, CheckoutSessionRequest, PlanRepository, RepositoryError, StripeError,
    UserRepository,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Billing provider error: {0}")]
    BillingProvider(#[from] StripeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct CheckoutService<U, P, B>
where
    U: UserRepository + 'static,
    P: PlanRepository,
    B: BillingProvider + 'static,
{
    user_repo: Arc<U>,
    plan_repo: Arc<P>,
    provider: Arc<B>,
    success_url: String,
    cancel_url: String,
}

impl<U, P, B> CheckoutService<U, P, B>
where
    U: UserRepository + 'static,
    P: PlanRepository,
    B: BillingProvider + 'static,
{
    pub fn new(
        user_repo: Arc<U>,
        plan_repo: Arc<P>,
        provider: Arc<B>,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            user_repo,
            plan_repo,
            provider,
            success_url,
            cancel_url,
        }
    }

    /// Creates a hosted checkout session and returns its redirect URL.
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        plan_key: PlanKey,
        interval: Interval,
        currency: Currency,
    ) -> Result<String, CheckoutError> {
        if plan_key == PlanKey::Free || find_plan_definition(plan_key).is_none() {
            return Err(CheckoutError::InvalidPlan(format!(
                "{} cannot be purchased",
                plan_key
            )));
        }

        let user = self.user_repo.get_by_id(user_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => CheckoutError::UserNotFound(user_id),
            other => CheckoutError::Repository(other),
        })?;
        if user.is_disabled() {
            return Err(CheckoutError::UserNotFound(user_id));
        }

        let plan = self
            .plan_repo
            .get(plan_key)
            .await?
            .ok_or_else(|| CheckoutError::InvalidPlan(format!("{} is not seeded", plan_key)))?;
        let price = plan.price_for(interval, currency).ok_or_else(|| {
            CheckoutError::InvalidPlan(format!(
                "{} has no {} price in {}",
                plan_key, interval, currency
            ))
        })?;

        let request = CheckoutSessionRequest {
            user_id,
            plan_key,
            price_id: price.external_price_id.clone(),
            customer_id: user.customer_id.clone(),
            // Without a customer the provider creates one for the session;
            // the checkout webhook attaches it.
            customer_email: match user.customer_id {
                Some(_) => None,
                None => Some(user.email.clone()),
            },
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        };

        let url = self.provider.create_checkout_session(&request).await?;
        info!(
            user_id = %user_id,
            plan = %plan_key,
            interval = %interval,
            currency = %currency,
            "Checkout session created"
        );

        Ok(url)
    }
}
