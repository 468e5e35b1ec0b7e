use crate::domain::{Currency, Interval, PlanKey, SubscriptionObject, METADATA_PLAN_KEY, METADATA_USER_ID};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StripeError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Stripe API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Rate limited")]
    RateLimited,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for StripeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StripeError::InvalidResponse(err.to_string())
        } else {
            StripeError::RequestFailed(err.to_string())
        }
    }
}

const STRIPE_API_VERSION: &str = "2024-06-20";

#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomer {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub user_id: Uuid,
    pub plan_key: PlanKey,
    pub price_id: String,
    /// Exactly one of `customer_id` / `customer_email` is sent.
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteProduct {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub id: String,
    pub plan_key: PlanKey,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePrice {
    pub id: String,
    pub product: String,
    pub lookup_key: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice {
    pub product_id: String,
    pub plan_key: PlanKey,
    pub lookup_key: String,
    pub interval: Interval,
    pub currency: Currency,
    pub unit_amount: i64,
    /// Moves the lookup key off a previous price with the same key.
    pub transfer_lookup_key: bool,
}

/// Deterministic provider product id for a plan.
pub fn product_id_for(plan_key: PlanKey) -> String {
    format!("plan_{}", plan_key)
}

/// The billing-provider operations this service depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String, StripeError>;
    /// Returns the hosted checkout URL.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<String, StripeError>;
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, StripeError>;
    async fn find_product(&self, product_id: &str) -> Result<Option<RemoteProduct>, StripeError>;
    async fn create_product(&self, product: &NewProduct) -> Result<RemoteProduct, StripeError>;
    async fn update_product(&self, product: &NewProduct) -> Result<RemoteProduct, StripeError>;
    async fn find_price(&self, lookup_key: &str) -> Result<Option<RemotePrice>, StripeError>;
    async fn create_price(&self, price: &NewPrice) -> Result<RemotePrice, StripeError>;
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

pub struct StripeClient {
    client: Client,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, base_url: String) -> Result<Self, StripeError> {
        let mut headers = header::HeaderMap::new();
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", secret_key))
            .map_err(|e| StripeError::InvalidConfig(format!("Invalid secret key format: {}", e)))?;
        headers.insert(header::AUTHORIZATION, auth_value);
        headers.insert(
            "stripe-version",
            header::HeaderValue::from_static(STRIPE_API_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| StripeError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, StripeError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StripeError::RateLimited);
        }

        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = resp.text().await.unwrap_or_default();
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();

        let (error_type, code, message) = match details {
            Some(d) => (d.type_, d.code, d.message),
            None => (None, None, None),
        };

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?error_type,
            stripe_error_code = ?code,
            context,
            "Stripe request failed"
        );

        Err(StripeError::Api {
            status: status.as_u16(),
            code,
            message: message.unwrap_or_else(|| {
                if body.is_empty() {
                    "<empty response body>".to_string()
                } else {
                    body
                }
            }),
        })
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
        context: &str,
    ) -> Result<T, StripeError> {
        let mut request = self.client.post(self.url(path)).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let resp = request.send().await?;
        let resp = Self::ensure_success(resp, context).await?;
        Ok(resp.json().await?)
    }
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String, StripeError> {
        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let form = vec![
            field("email", &customer.email),
            field(&format!("metadata[{}]", METADATA_USER_ID), customer.user_id),
        ];
        let idempotency_key = format!("customer-{}", customer.user_id);
        let resp: CustomerResp = self
            .post_form("customers", &form, Some(&idempotency_key), "create customer")
            .await?;

        debug!(user_id = %customer.user_id, customer_id = %resp.id, "Stripe customer created");
        Ok(resp.id)
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<String, StripeError> {
        #[derive(Deserialize)]
        struct CheckoutResp {
            url: Option<String>,
        }

        let mut form = vec![
            field("mode", "subscription"),
            field("line_items[0][price]", &request.price_id),
            field("line_items[0][quantity]", 1),
            field("success_url", &request.success_url),
            field("cancel_url", &request.cancel_url),
            field("client_reference_id", request.user_id),
        ];

        if let Some(customer) = &request.customer_id {
            form.push(field("customer", customer));
        } else if let Some(email) = &request.customer_email {
            form.push(field("customer_email", email));
        }

        for prefix in ["metadata", "subscription_data[metadata]"] {
            form.push(field(&format!("{}[{}]", prefix, METADATA_USER_ID), request.user_id));
            form.push(field(&format!("{}[{}]", prefix, METADATA_PLAN_KEY), request.plan_key));
        }

        let resp: CheckoutResp = self
            .post_form("checkout/sessions", &form, None, "create checkout session")
            .await?;

        resp.url
            .ok_or_else(|| StripeError::InvalidResponse("Checkout session URL is missing".to_string()))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, StripeError> {
        let resp = self
            .client
            .get(self.url(&format!("subscriptions/{}", subscription_id)))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;
        Ok(resp.json().await?)
    }

    async fn find_product(&self, product_id: &str) -> Result<Option<RemoteProduct>, StripeError> {
        let resp = self
            .client
            .get(self.url(&format!("products/{}", product_id)))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let resp = Self::ensure_success(resp, "retrieve product").await?;
        Ok(Some(resp.json().await?))
    }

    async fn create_product(&self, product: &NewProduct) -> Result<RemoteProduct, StripeError> {
        let form = vec![
            field("id", &product.id),
            field("name", &product.name),
            field("description", &product.description),
            field(&format!("metadata[{}]", METADATA_PLAN_KEY), product.plan_key),
        ];
        let idempotency_key = format!("product-{}", product.id);
        self.post_form("products", &form, Some(&idempotency_key), "create product")
            .await
    }

    async fn update_product(&self, product: &NewProduct) -> Result<RemoteProduct, StripeError> {
        let form = vec![
            field("name", &product.name),
            field("description", &product.description),
        ];
        self.post_form(
            &format!("products/{}", product.id),
            &form,
            None,
            "update product",
        )
        .await
    }

    async fn find_price(&self, lookup_key: &str) -> Result<Option<RemotePrice>, StripeError> {
        let resp = self
            .client
            .get(self.url("prices"))
            .query(&[("lookup_keys[]", lookup_key), ("limit", "1")])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list prices").await?;
        let list: StripeList<RemotePrice> = resp.json().await?;
        Ok(list.data.into_iter().next())
    }

    async fn create_price(&self, price: &NewPrice) -> Result<RemotePrice, StripeError> {
        let mut form = vec![
            field("product", &price.product_id),
            field("currency", price.currency),
            field("unit_amount", price.unit_amount),
            field("recurring[interval]", price.interval),
            field("lookup_key", &price.lookup_key),
            field(&format!("metadata[{}]", METADATA_PLAN_KEY), price.plan_key),
        ];
        if price.transfer_lookup_key {
            form.push(field("transfer_lookup_key", true));
        }

        let idempotency_key = format!("price-{}-{}", price.lookup_key, price.unit_amount);
        self.post_form("prices", &form, Some(&idempotency_key), "create price")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_ids_are_deterministic() {
        assert_eq!(product_id_for(PlanKey::Pro), "plan_pro");
        assert_eq!(product_id_for(PlanKey::Free), "plan_free");
    }

    #[test]
    fn rejects_unprintable_secret_key() {
        let result = StripeClient::new("sk_test\n123", "https://api.stripe.com/v1".to_string());
        assert!(matches!(result, Err(StripeError::InvalidConfig(_))));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = StripeClient::new("sk_test_123", "https://api.stripe.com/v1/".to_string()).unwrap();
        assert_eq!(client.url("prices"), "https://api.stripe.com/v1/prices");
    }
}
