use crate::domain::{BillingStatus, ProfileUpdate, User};
use crate::infrastructure::{
    BillingProvider, NewCustomer, RepositoryError, SubscriptionRepository, UserRepository,
};
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Invalid or revoked API token")]
    Unauthorized,
}

pub struct AccountService<U, S, B>
where
    U: UserRepository + 'static,
    S: SubscriptionRepository,
    B: BillingProvider + 'static,
{
    user_repo: Arc<U>,
    subscription_repo: Arc<S>,
    provider: Arc<B>,
}

impl<U, S, B> AccountService<U, S, B>
where
    U: UserRepository + 'static,
    S: SubscriptionRepository,
    B: BillingProvider + 'static,
{
    pub fn new(user_repo: Arc<U>, subscription_repo: Arc<S>, provider: Arc<B>) -> Self {
        Self {
            user_repo,
            subscription_repo,
            provider,
        }
    }

    /// Creates a user and returns it with its API token. Only the token hash is stored.
    pub async fn create_user(
        &self,
        email: String,
        image_url: Option<String>,
    ) -> Result<(User, String), AccountError> {
        let user = User::new(email, image_url);
        let token = generate_api_token();

        self.user_repo.create(&user, &token).await?;
        info!(user_id = %user.id, "Created user");

        self.spawn_customer_creation(user.id, user.email.clone());

        Ok((user, token))
    }

    pub async fn authenticate(&self, token: &str) -> Result<User, AccountError> {
        self.user_repo
            .get_by_api_token(token)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => AccountError::Unauthorized,
                other => AccountError::Repository(other),
            })
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AccountError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .map_err(|e| not_found_as_user(e, user_id))
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<User, AccountError> {
        let user = self
            .user_repo
            .update_profile(user_id, &update)
            .await
            .map_err(|e| not_found_as_user(e, user_id))?;
        info!(user_id = %user_id, "Updated profile");
        Ok(user)
    }

    pub async fn disable(&self, user_id: Uuid) -> Result<(), AccountError> {
        self.user_repo
            .disable(user_id)
            .await
            .map_err(|e| not_found_as_user(e, user_id))?;
        info!(user_id = %user_id, "Disabled user");
        Ok(())
    }

    /// A user without a subscription row is on the free tier.
    pub async fn billing_status(&self, user_id: Uuid) -> Result<BillingStatus, AccountError> {
        let subscription = self.subscription_repo.get_by_user(user_id).await?;
        Ok(BillingStatus::from_subscription(subscription.as_ref()))
    }
}

impl<U, S, B> AccountService<U, S, B>
where
    U: UserRepository + 'static,
    S: SubscriptionRepository,
    B: BillingProvider + 'static,
{
    /// Creates the provider customer off the request path. The id is attached
    /// only if checkout has not attached one in the meantime.
    fn spawn_customer_creation(&self, user_id: Uuid, email: String) {
        let provider = Arc::clone(&self.provider);
        let user_repo = Arc::clone(&self.user_repo);

        tokio::spawn(async move {
            let customer_id = match provider
                .create_customer(&NewCustomer { user_id, email })
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Background customer creation failed");
                    return;
                }
            };

            match user_repo
                .attach_customer_if_absent(user_id, &customer_id)
                .await
            {
                Ok(true) => info!(user_id = %user_id, customer_id = %customer_id, "Attached customer"),
                Ok(false) => debug!(user_id = %user_id, "User already has a customer id"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to attach customer"),
            }
        });
    }
}

fn not_found_as_user(err: RepositoryError, user_id: Uuid) -> AccountError {
    match err {
        RepositoryError::NotFound(_) => AccountError::UserNotFound(user_id),
        other => AccountError::Repository(other),
    }
}

fn generate_api_token() -> String {
    let mut token = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, token)
}
