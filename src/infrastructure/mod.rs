pub mod config;
pub mod postgres_subscription_repo;
pub mod repository;
pub mod stripe;
pub mod webhook_signature;

pub use config::*;
pub use postgres_subscription_repo::*;
pub use repository::*;
pub use stripe::*;
pub use webhook_signature::*;
