//! Plan catalog seeding: mirrors [`PLAN_CATALOG`] into the billing provider
//! and the local `plans` table.
//!
//! Each plan is reconciled in two steps. Remote state is fetched by
//! deterministic keys, then [`plan_actions`] decides what to create, update
//! or keep. Only the second step's output touches the network again, so a
//! rerun after a partial failure picks up where the previous one stopped.

use crate::domain::{
    price_lookup_key, Plan, PlanDefinition, PlanPrice, PriceDefinition, PLAN_CATALOG,
};
use crate::infrastructure::{
    product_id_for, BillingProvider, NewPrice, NewProduct, PlanRepository, RemotePrice,
    RemoteProduct, RepositoryError, StripeError,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Billing provider error: {0}")]
    BillingProvider(#[from] StripeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// What the provider currently holds for one plan, keyed the way seeding looks it up.
#[derive(Debug, Clone, Default)]
pub struct RemotePlanState {
    pub product: Option<RemoteProduct>,
    /// Active prices by lookup key.
    pub prices: HashMap<String, RemotePrice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductAction {
    Create,
    Update,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceAction {
    Create,
    /// The amount changed; a new price takes over the lookup key.
    Replace { previous_price_id: String },
    Keep { price_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceStep {
    pub price: PriceDefinition,
    pub lookup_key: String,
    pub action: PriceAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanActions {
    pub product_id: String,
    pub product: ProductAction,
    pub prices: Vec<PriceStep>,
}

impl PlanActions {
    pub fn is_noop(&self) -> bool {
        self.product == ProductAction::Keep
            && self
                .prices
                .iter()
                .all(|step| matches!(step.action, PriceAction::Keep { .. }))
    }
}

/// Decides how to bring the provider in line with `definition`.
pub fn plan_actions(definition: &PlanDefinition, remote: &RemotePlanState) -> PlanActions {
    let product_id = product_id_for(definition.key);

    let product = match &remote.product {
        None => ProductAction::Create,
        Some(existing)
            if existing.name != definition.name
                || existing.description.as_deref() != Some(definition.description) =>
        {
            ProductAction::Update
        }
        Some(_) => ProductAction::Keep,
    };

    let prices = definition
        .prices
        .iter()
        .map(|price| {
            let lookup_key = price_lookup_key(definition.key, price.interval, price.currency);
            let action = match remote.prices.get(&lookup_key) {
                None => PriceAction::Create,
                Some(existing)
                    if existing.unit_amount != Some(price.amount)
                        || existing.product != product_id =>
                {
                    PriceAction::Replace {
                        previous_price_id: existing.id.clone(),
                    }
                }
                Some(existing) => PriceAction::Keep {
                    price_id: existing.id.clone(),
                },
            };
            PriceStep {
                price: *price,
                lookup_key,
                action,
            }
        })
        .collect();

    PlanActions {
        product_id,
        product,
        prices,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub products_created: u32,
    pub products_updated: u32,
    pub prices_created: u32,
    pub prices_replaced: u32,
    pub prices_unchanged: u32,
    pub plans_upserted: u32,
}

pub struct PlanSeeder<P, B>
where
    P: PlanRepository,
    B: BillingProvider,
{
    plan_repo: Arc<P>,
    provider: Arc<B>,
}

impl<P, B> PlanSeeder<P, B>
where
    P: PlanRepository,
    B: BillingProvider,
{
    pub fn new(plan_repo: Arc<P>, provider: Arc<B>) -> Self {
        Self {
            plan_repo,
            provider,
        }
    }

    pub async fn seed(&self) -> Result<SeedReport, SeedError> {
        let mut report = SeedReport::default();

        for definition in PLAN_CATALOG {
            let remote = self.fetch_remote(definition).await?;
            let actions = plan_actions(definition, &remote);
            let plan = self.execute(definition, actions, &mut report).await?;

            self.plan_repo.upsert(&plan).await?;
            report.plans_upserted += 1;
        }

        info!(
            products_created = report.products_created,
            products_updated = report.products_updated,
            prices_created = report.prices_created,
            prices_replaced = report.prices_replaced,
            prices_unchanged = report.prices_unchanged,
            "Plan catalog seeded"
        );
        Ok(report)
    }

    async fn fetch_remote(&self, definition: &PlanDefinition) -> Result<RemotePlanState, SeedError> {
        let product = self
            .provider
            .find_product(&product_id_for(definition.key))
            .await?;

        let mut prices = HashMap::new();
        for price in definition.prices {
            let lookup_key = price_lookup_key(definition.key, price.interval, price.currency);
            if let Some(existing) = self.provider.find_price(&lookup_key).await? {
                prices.insert(lookup_key, existing);
            }
        }

        Ok(RemotePlanState { product, prices })
    }

    async fn execute(
        &self,
        definition: &PlanDefinition,
        actions: PlanActions,
        report: &mut SeedReport,
    ) -> Result<Plan, SeedError> {
        let product = NewProduct {
            id: actions.product_id.clone(),
            plan_key: definition.key,
            name: definition.name.to_string(),
            description: definition.description.to_string(),
        };

        match actions.product {
            ProductAction::Create => {
                self.provider.create_product(&product).await?;
                report.products_created += 1;
                info!(plan = %definition.key, product_id = %product.id, "Created product");
            }
            ProductAction::Update => {
                self.provider.update_product(&product).await?;
                report.products_updated += 1;
                info!(plan = %definition.key, product_id = %product.id, "Updated product");
            }
            ProductAction::Keep => {}
        }

        let mut prices = Vec::with_capacity(actions.prices.len());
        for step in actions.prices {
            let external_price_id = match &step.action {
                PriceAction::Keep { price_id } => {
                    report.prices_unchanged += 1;
                    price_id.clone()
                }
                PriceAction::Create => {
                    let created = self
                        .provider
                        .create_price(&new_price(definition, &product.id, &step, false))
                        .await?;
                    report.prices_created += 1;
                    info!(lookup_key = %step.lookup_key, price_id = %created.id, "Created price");
                    created.id
                }
                PriceAction::Replace { previous_price_id } => {
                    let created = self
                        .provider
                        .create_price(&new_price(definition, &product.id, &step, true))
                        .await?;
                    report.prices_replaced += 1;
                    info!(
                        lookup_key = %step.lookup_key,
                        previous_price_id = %previous_price_id,
                        price_id = %created.id,
                        "Replaced price"
                    );
                    created.id
                }
            };

            prices.push(PlanPrice {
                interval: step.price.interval,
                currency: step.price.currency,
                amount: step.price.amount,
                external_price_id,
                lookup_key: step.lookup_key,
            });
        }

        Ok(Plan {
            key: definition.key,
            name: definition.name.to_string(),
            description: definition.description.to_string(),
            external_product_id: product.id,
            prices,
            updated_at: Utc::now(),
        })
    }
}

fn new_price(
    definition: &PlanDefinition,
    product_id: &str,
    step: &PriceStep,
    transfer_lookup_key: bool,
) -> NewPrice {
    NewPrice {
        product_id: product_id.to_string(),
        plan_key: definition.key,
        lookup_key: step.lookup_key.clone(),
        interval: step.price.interval,
        currency: step.price.currency,
        unit_amount: step.price.amount,
        transfer_lookup_key,
    }
}
