use crate::application::{AccountError, CheckoutError, SeedError, WebhookRejection};
use crate::infrastructure::StripeError;
use axum::http::StatusCode;

pub(super) fn map_account_error(err: &AccountError) -> (StatusCode, serde_json::Value) {
    match err {
        AccountError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Invalid or missing authorization token" }),
        ),
        AccountError::UserNotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": "User not found" }))
        }
        AccountError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Account request failed" }),
        ),
    }
}

pub(super) fn map_checkout_error(err: &CheckoutError) -> (StatusCode, serde_json::Value) {
    match err {
        CheckoutError::InvalidPlan(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        CheckoutError::UserNotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": "User not found" }))
        }
        CheckoutError::BillingProvider(StripeError::RateLimited) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "Rate limited by the billing provider, please retry" }),
        ),
        CheckoutError::BillingProvider(_) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "Billing provider request failed" }),
        ),
        CheckoutError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Failed to create checkout session" }),
        ),
    }
}

pub(super) fn map_seed_error(err: &SeedError) -> (StatusCode, serde_json::Value) {
    match err {
        SeedError::BillingProvider(_) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "Billing provider request failed" }),
        ),
        SeedError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Failed to store plans" }),
        ),
    }
}

pub(super) fn map_webhook_rejection(err: &WebhookRejection) -> (StatusCode, serde_json::Value) {
    match err {
        WebhookRejection::Signature(_) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Invalid webhook signature" }),
        ),
        WebhookRejection::MalformedEnvelope(_) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Malformed webhook payload" }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{RepositoryError, SignatureError};
    use uuid::Uuid;

    #[test]
    fn checkout_errors_map_to_documented_statuses() {
        assert_eq!(
            map_checkout_error(&CheckoutError::InvalidPlan("free".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            map_checkout_error(&CheckoutError::UserNotFound(Uuid::nil())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            map_checkout_error(&CheckoutError::BillingProvider(StripeError::RequestFailed(
                "timeout".into()
            )))
            .0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            map_checkout_error(&CheckoutError::Repository(RepositoryError::InvalidData(
                "x".into()
            )))
            .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn signature_rejection_is_bad_request() {
        let (status, body) = map_webhook_rejection(&WebhookRejection::Signature(SignatureError::Mismatch));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid webhook signature");
    }
}
