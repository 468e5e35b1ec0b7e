use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanKey {
    Free,
    Pro,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Currency {
    Usd,
    Eur,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Interval {
    Month,
    Year,
}

/// A statically defined price point. Amounts are in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceDefinition {
    pub interval: Interval,
    pub currency: Currency,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDefinition {
    pub key: PlanKey,
    pub name: &'static str,
    pub description: &'static str,
    pub prices: &'static [PriceDefinition],
}

const fn price(interval: Interval, currency: Currency, amount: i64) -> PriceDefinition {
    PriceDefinition {
        interval,
        currency,
        amount,
    }
}

/// The purchasable tiers. Consumed by seeding and checkout.
pub const PLAN_CATALOG: &[PlanDefinition] = &[
    PlanDefinition {
        key: PlanKey::Free,
        name: "Free",
        description: "Start with the basics, upgrade anytime.",
        prices: &[
            price(Interval::Month, Currency::Usd, 0),
            price(Interval::Month, Currency::Eur, 0),
            price(Interval::Year, Currency::Usd, 0),
            price(Interval::Year, Currency::Eur, 0),
        ],
    },
    PlanDefinition {
        key: PlanKey::Pro,
        name: "Pro",
        description: "Access to all features and unlimited projects.",
        prices: &[
            price(Interval::Month, Currency::Usd, 1990),
            price(Interval::Month, Currency::Eur, 1990),
            price(Interval::Year, Currency::Usd, 19990),
            price(Interval::Year, Currency::Eur, 19990),
        ],
    },
];

pub fn find_plan_definition(key: PlanKey) -> Option<&'static PlanDefinition> {
    PLAN_CATALOG.iter().find(|p| p.key == key)
}

/// Deterministic lookup key used to find provider prices across seeding runs.
pub fn price_lookup_key(plan: PlanKey, interval: Interval, currency: Currency) -> String {
    format!("{}_{}_{}", plan, interval, currency)
}

/// Inverse of [`price_lookup_key`]; returns `None` for keys this service did not mint.
pub fn parse_price_lookup_key(lookup_key: &str) -> Option<(PlanKey, Interval, Currency)> {
    let mut parts = lookup_key.splitn(3, '_');
    let plan = parts.next()?.parse().ok()?;
    let interval = parts.next()?.parse().ok()?;
    let currency = parts.next()?.parse().ok()?;
    Some((plan, interval, currency))
}

/// Local row mirroring a seeded plan and its provider objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub key: PlanKey,
    pub name: String,
    pub description: String,
    pub external_product_id: String,
    pub prices: Vec<PlanPrice>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanPrice {
    pub interval: Interval,
    pub currency: Currency,
    pub amount: i64,
    pub external_price_id: String,
    pub lookup_key: String,
}

impl Plan {
    pub fn price_for(&self, interval: Interval, currency: Currency) -> Option<&PlanPrice> {
        self.prices
            .iter()
            .find(|p| p.interval == interval && p.currency == currency)
    }
}
