use crate::application::{AccountService, CheckoutService, PlanSeeder, WebhookReconciler};
use crate::infrastructure::{
    AppConfig, PostgresPlanRepository, PostgresSubscriptionRepository, PostgresUserRepository,
    StripeClient, WebhookVerifier,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

pub type AccountServiceType =
    AccountService<PostgresUserRepository, PostgresSubscriptionRepository, StripeClient>;

pub type CheckoutServiceType =
    CheckoutService<PostgresUserRepository, PostgresPlanRepository, StripeClient>;

pub type WebhookReconcilerType =
    WebhookReconciler<PostgresUserRepository, PostgresSubscriptionRepository, StripeClient>;

pub type PlanSeederType = PlanSeeder<PostgresPlanRepository, StripeClient>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub plan_repo: Arc<PostgresPlanRepository>,
    pub accounts: Arc<AccountServiceType>,
    pub checkout: Arc<CheckoutServiceType>,
    pub reconciler: Arc<WebhookReconcilerType>,
    pub seeder: Arc<PlanSeederType>,
    /// Empty disables the admin routes.
    pub admin_token: String,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let stripe = Arc::new(
        StripeClient::new(&config.stripe_secret_key, config.stripe_api_base.clone())
            .context("init Stripe client")?,
    );

    let user_repo = Arc::new(PostgresUserRepository::new(pool.clone()));
    let plan_repo = Arc::new(PostgresPlanRepository::new(pool.clone()));
    let subscription_repo = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));

    let accounts = Arc::new(AccountService::new(
        user_repo.clone(),
        subscription_repo.clone(),
        stripe.clone(),
    ));

    let checkout = Arc::new(CheckoutService::new(
        user_repo.clone(),
        plan_repo.clone(),
        stripe.clone(),
        config.checkout_success_url(),
        config.checkout_cancel_url(),
    ));

    let reconciler = Arc::new(WebhookReconciler::new(
        WebhookVerifier::new(
            config.stripe_webhook_secret.clone(),
            config.webhook_tolerance_secs,
        ),
        user_repo,
        subscription_repo,
        stripe.clone(),
    ));

    let seeder = Arc::new(PlanSeeder::new(plan_repo.clone(), stripe));

    Ok(AppState {
        pool,
        plan_repo,
        accounts,
        checkout,
        reconciler,
        seeder,
        admin_token: config.admin_token,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
