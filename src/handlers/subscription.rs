use crate::entities::PlanType;
use crate::error::AppError;
use crate::middlewares::get_auth_context;
use crate::models::VerifyPaymentRequest;
use crate::services::SubscriptionService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

#[utoipa::path(
    get,
    path = "/api/v1/subscription/current",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取当前订阅与权益成功"),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_current_subscription(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };

    match subscription_service.current(ctx.school_id, Utc::now()).await {
        Ok(response) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": response
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/subscription/plans",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取套餐目录成功")
    )
)]
pub async fn get_plans(
    subscription_service: web::Data<SubscriptionService>,
) -> Result<HttpResponse> {
    let plans = subscription_service.plans();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": plans
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan_type: PlanType,
}

#[utoipa::path(
    post,
    path = "/api/v1/subscription/checkout",
    tag = "subscription",
    request_body = CheckoutRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "创建待支付订阅成功"),
        (status = 400, description = "参数错误"),
        (status = 401, description = "未授权")
    )
)]
pub async fn checkout(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
    body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };

    match subscription_service
        .checkout(ctx.school_id, body.into_inner().plan_type, Utc::now())
        .await
    {
        Ok(model) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": crate::models::SubscriptionResponse::from(model)
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/subscription/verify-payment",
    tag = "subscription",
    request_body = VerifyPaymentRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "支付核验并激活订阅成功"),
        (status = 400, description = "参数错误"),
        (status = 401, description = "未授权")
    )
)]
pub async fn verify_payment(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
    body: web::Json<VerifyPaymentRequest>,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };

    match subscription_service
        .verify_payment(ctx.school_id, body.into_inner(), Utc::now())
        .await
    {
        Ok(response) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": response
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/subscription/cancel",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "取消订阅成功"),
        (status = 401, description = "未授权"),
        (status = 404, description = "该学校没有订阅")
    )
)]
pub async fn cancel_subscription(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };

    match subscription_service.cancel(ctx.school_id).await {
        Ok(response) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": response
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn subscription_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscription")
            .route("/current", web::get().to(get_current_subscription))
            .route("/plans", web::get().to(get_plans))
            .route("/checkout", web::post().to(checkout))
            .route("/verify-payment", web::post().to(verify_payment))
            .route("/cancel", web::post().to(cancel_subscription)),
    );
}
