use crate::error::AppError;
use crate::middlewares::{get_auth_context, get_entitlement};
use crate::models::{CreateAnnouncementRequest, Feature};
use crate::services::AnnouncementService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use chrono::Utc;
use serde_json::json;

#[utoipa::path(
    post,
    path = "/api/v1/announcements",
    tag = "announcement",
    request_body = CreateAnnouncementRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "公告创建成功，附投递汇总"),
        (status = 400, description = "参数错误"),
        (status = 401, description = "未授权"),
        (status = 403, description = "套餐未包含群发功能或订阅不可用")
    )
)]
pub async fn create_announcement(
    announcement_service: web::Data<AnnouncementService>,
    req: HttpRequest,
    body: web::Json<CreateAnnouncementRequest>,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };
    let Some(entitlement) = get_entitlement(&req) else {
        return Ok(AppError::AuthError("Missing entitlement context".to_string()).error_response());
    };

    // 功能闸门：群发属于 bulk_sms 功能位
    if let Err(e) = entitlement.require_feature(Feature::BulkSms) {
        return Ok(e.error_response());
    }

    match announcement_service
        .create(ctx.school_id, ctx.user_id, body.into_inner(), Utc::now())
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
    get,
    path = "/api/v1/announcements",
    tag = "announcement",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取公告列表成功"),
        (status = 401, description = "未授权")
    )
)]
pub async fn list_announcements(
    announcement_service: web::Data<AnnouncementService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let Some(ctx) = get_auth_context(&req) else {
        return Ok(AppError::AuthError("Missing auth context".to_string()).error_response());
    };

    match announcement_service.list(ctx.school_id).await {
        Ok(list) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": list
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn announcement_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/announcements")
            .route("", web::post().to(create_announcement))
            .route("", web::get().to(list_announcements)),
    );
}
