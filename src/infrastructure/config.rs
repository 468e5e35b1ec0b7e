use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub webhook_tolerance_secs: i64,

    /// Transactional email provider key. Required at startup even though
    /// this service only validates it.
    pub email_api_key: String,

    /// Frontend origin used for checkout success/cancel redirects.
    pub site_url: String,
    pub seed_plans_on_startup: bool,
    /// Bearer token for admin routes. Empty disables them.
    pub admin_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("BILLING")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("stripe_api_base", "https://api.stripe.com/v1")?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("site_url", "http://localhost:5173")?
            .set_default("seed_plans_on_startup", true)?
            .set_default("admin_token", "")?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("database_url", &self.database_url),
            ("stripe_secret_key", &self.stripe_secret_key),
            ("stripe_webhook_secret", &self.stripe_webhook_secret),
            ("email_api_key", &self.email_api_key),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{} must be set", name)));
            }
        }

        if self.webhook_tolerance_secs <= 0 {
            return Err(ConfigError::Message(
                "webhook_tolerance_secs must be positive".to_string(),
            ));
        }

        if !self.site_url.starts_with("http://") && !self.site_url.starts_with("https://") {
            return Err(ConfigError::Message(format!(
                "site_url must be an http(s) URL, got {}",
                self.site_url
            )));
        }

        Ok(())
    }

    pub fn checkout_success_url(&self) -> String {
        format!(
            "{}/dashboard/checkout?session_id={{CHECKOUT_SESSION_ID}}",
            self.site_url.trim_end_matches('/')
        )
    }

    pub fn checkout_cancel_url(&self) -> String {
        format!("{}/dashboard/settings/billing", self.site_url.trim_end_matches('/'))
    }
}
