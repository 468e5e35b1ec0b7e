use super::http_auth::{extract_bearer_token, is_admin_authorized, signature_header};
use super::http_errors::{
    map_account_error, map_checkout_error, map_seed_error, map_webhook_rejection,
};
use super::http_types::{
    BillingStatusResponse, CheckoutRequest, CheckoutResponse, CreateUserRequest,
    CreateUserResponse, HealthResponse, PlanPriceResponse, PlanResponse, SeedReportResponse,
    UpdateProfileRequest, UserResponse, WebhookAckResponse,
};
use super::state::AppState;
use crate::application::AccountError;
use crate::domain::{Currency, Interval, PlanKey, ProfileUpdate, User};
use crate::infrastructure::{PlanRepository, SIGNATURE_HEADER};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::str::FromStr;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use validator::Validate;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/plans", get(list_plans))
        .route("/users", post(create_user))
        .route("/me", get(get_me).patch(update_me).delete(disable_me))
        .route("/me/subscription", get(get_subscription))
        .route("/checkout", post(create_checkout))
        .route("/stripe/webhook", post(stripe_webhook))
        .route("/admin/plans/seed", post(seed_plans))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        list_plans,
        create_user,
        get_me,
        update_me,
        disable_me,
        get_subscription,
        create_checkout,
        stripe_webhook,
        seed_plans,
    ),
    components(
        schemas(
            HealthResponse,
            CreateUserRequest,
            CreateUserResponse,
            UpdateProfileRequest,
            UserResponse,
            CheckoutRequest,
            CheckoutResponse,
            BillingStatusResponse,
            PlanResponse,
            PlanPriceResponse,
            SeedReportResponse,
            WebhookAckResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Plans", description = "Plan catalog"),
        (name = "Users", description = "User profile endpoints"),
        (name = "Billing", description = "Subscription status and checkout"),
        (name = "Webhooks", description = "Billing provider webhooks"),
        (name = "Admin", description = "Operator endpoints"),
    ),
    info(
        title = "Billing Sync API",
        version = "0.1.0",
        description = "Stripe checkout, webhook reconciliation and plan catalog for SaaS subscriptions",
        license(name = "MIT")
    )
)]
struct ApiDoc;

type ErrorResponse = (StatusCode, Json<Value>);

fn error_response((status, body): (StatusCode, Value)) -> ErrorResponse {
    (status, Json(body))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ErrorResponse> {
    let token = extract_bearer_token(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Missing or invalid authorization token"})),
        )
    })?;

    state.accounts.authenticate(token).await.map_err(|e| {
        if !matches!(e, AccountError::Unauthorized) {
            error!(error = %e, "Failed to authenticate request");
        }
        error_response(map_account_error(&e))
    })
}

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/plans",
    tag = "Plans",
    responses(
        (status = 200, description = "Seeded plans with prices", body = [PlanResponse]),
        (status = 500, description = "Failed to list plans", body = Object)
    )
)]
async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    match state.plan_repo.list().await {
        Ok(plans) => {
            let plans: Vec<PlanResponse> = plans.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(json!(plans)))
        }
        Err(e) => {
            error!(error = %e, "Failed to list plans");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to list plans"})),
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = CreateUserResponse),
        (status = 400, description = "Invalid request", body = Object),
        (status = 500, description = "Failed to create user", body = Object)
    )
)]
async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    if let Err(errors) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid request", "details": errors})),
        );
    }

    match state.accounts.create_user(req.email, req.image_url).await {
        Ok((user, api_token)) => (
            StatusCode::CREATED,
            Json(json!(CreateUserResponse {
                id: user.id,
                api_token,
            })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to create user");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to create user"})),
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/me",
    tag = "Users",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Invalid or missing authorization token", body = Object)
    )
)]
async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    match authenticate(&state, &headers).await {
        Ok(user) => (StatusCode::OK, Json(json!(UserResponse::from(user)))),
        Err(resp) => resp,
    }
}

#[utoipa::path(
    patch,
    path = "/me",
    tag = "Users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 400, description = "Invalid request", body = Object),
        (status = 401, description = "Invalid or missing authorization token", body = Object)
    )
)]
async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfileRequest>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    if let Err(errors) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid request", "details": errors})),
        );
    }

    let update = ProfileUpdate {
        email: req.email,
        image_url: req.image_url,
    };
    match state.accounts.update_profile(user.id, update).await {
        Ok(user) => (StatusCode::OK, Json(json!(UserResponse::from(user)))),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to update profile");
            error_response(map_account_error(&e))
        }
    }
}

#[utoipa::path(
    delete,
    path = "/me",
    tag = "Users",
    responses(
        (status = 200, description = "User disabled", body = Object),
        (status = 401, description = "Invalid or missing authorization token", body = Object)
    )
)]
async fn disable_me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match state.accounts.disable(user.id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "disabled"}))),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to disable user");
            error_response(map_account_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/me/subscription",
    tag = "Billing",
    responses(
        (status = 200, description = "Current billing status", body = BillingStatusResponse),
        (status = 401, description = "Invalid or missing authorization token", body = Object)
    )
)]
async fn get_subscription(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match state.accounts.billing_status(user.id).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!(BillingStatusResponse::new(
                status,
                user.customer_id.is_some()
            ))),
        ),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to load billing status");
            error_response(map_account_error(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/checkout",
    tag = "Billing",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Plan, interval or currency cannot be purchased", body = Object),
        (status = 401, description = "Invalid or missing authorization token", body = Object),
        (status = 502, description = "Billing provider request failed", body = Object)
    )
)]
async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let Ok(plan) = PlanKey::from_str(&req.plan) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid plan", "allowed": ["pro"]})),
        );
    };
    let Ok(interval) = Interval::from_str(&req.interval) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid interval", "allowed": ["month", "year"]})),
        );
    };
    let Ok(currency) = Currency::from_str(&req.currency) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid currency", "allowed": ["usd", "eur"]})),
        );
    };

    match state
        .checkout
        .create_checkout(user.id, plan, interval, currency)
        .await
    {
        Ok(url) => (StatusCode::OK, Json(json!(CheckoutResponse { url }))),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Checkout failed");
            error_response(map_checkout_error(&e))
        }
    }
}

/// Billing provider webhook
///
/// Signature failures and undecodable envelopes are rejected with 400.
/// Everything else is acknowledged with 200, including events that failed
/// to apply, which are logged instead.
#[utoipa::path(
    post,
    path = "/stripe/webhook",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "Webhook signature")),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAckResponse),
        (status = 400, description = "Invalid signature or payload", body = Object)
    )
)]
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = signature_header(&headers, SIGNATURE_HEADER);

    match state.reconciler.receive(&body, signature.as_deref()).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!(WebhookAckResponse {
                received: true,
                outcome: outcome.to_string(),
            })),
        ),
        Err(e) => error_response(map_webhook_rejection(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/admin/plans/seed",
    tag = "Admin",
    responses(
        (status = 200, description = "Catalog seeded", body = SeedReportResponse),
        (status = 401, description = "Admin token missing or invalid", body = Object),
        (status = 502, description = "Billing provider request failed", body = Object)
    )
)]
async fn seed_plans(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !is_admin_authorized(&headers, &state.admin_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Admin token missing or invalid"})),
        );
    }

    match state.seeder.seed().await {
        Ok(report) => {
            info!(plans = report.plans_upserted, "Plan catalog seeded via admin route");
            (StatusCode::OK, Json(json!(SeedReportResponse::from(report))))
        }
        Err(e) => {
            error!(error = %e, "Plan seeding failed");
            error_response(map_seed_error(&e))
        }
    }
}
