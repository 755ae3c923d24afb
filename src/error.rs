use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// 订阅拦截被拒绝的原因码，客户端据此提示不同文案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementReason {
    SubscriptionExpired,
    PaymentPending,
}

impl EntitlementReason {
    pub fn code(&self) -> &'static str {
        match self {
            EntitlementReason::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",
            EntitlementReason::PaymentPending => "PAYMENT_PENDING",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Entitlement error: {0:?}")]
    EntitlementError(EntitlementReason),

    #[error("Feature locked: {required_feature} (current plan: {current_plan})")]
    FeatureError {
        current_plan: String,
        required_feature: String,
    },

    #[error("No academic year configured for school {0}")]
    NoAcademicYear(i64),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code;
        let body = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                status_code = actix_web::http::StatusCode::BAD_REQUEST;
                json!({"code": "VALIDATION_ERROR", "message": msg})
            }
            AppError::AuthError(msg) => {
                log::warn!("Authentication error: {msg}");
                status_code = actix_web::http::StatusCode::UNAUTHORIZED;
                json!({"code": "AUTH_ERROR", "message": msg})
            }
            AppError::NotFound(msg) => {
                status_code = actix_web::http::StatusCode::NOT_FOUND;
                json!({"code": "NOT_FOUND", "message": msg})
            }
            AppError::EntitlementError(reason) => {
                log::warn!("Entitlement rejected: {}", reason.code());
                status_code = actix_web::http::StatusCode::FORBIDDEN;
                let message = match reason {
                    EntitlementReason::SubscriptionExpired => {
                        "School subscription has expired; please renew to continue"
                    }
                    EntitlementReason::PaymentPending => {
                        "Subscription payment is awaiting verification"
                    }
                };
                json!({"code": reason.code(), "message": message})
            }
            AppError::FeatureError {
                current_plan,
                required_feature,
            } => {
                log::warn!("Feature locked: {required_feature} not in plan {current_plan}");
                status_code = actix_web::http::StatusCode::FORBIDDEN;
                json!({
                    "code": "UPGRADE_REQUIRED",
                    "message": "Current plan does not include this feature",
                    "upgrade_required": true,
                    "current_plan": current_plan,
                    "required_feature": required_feature,
                })
            }
            AppError::NoAcademicYear(school_id) => {
                log::warn!("No academic year configured for school {school_id}");
                status_code = actix_web::http::StatusCode::BAD_REQUEST;
                json!({
                    "code": "NO_ACADEMIC_YEAR",
                    "message": "No active academic year configured for this school",
                })
            }
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                status_code = actix_web::http::StatusCode::BAD_GATEWAY;
                json!({"code": "EXTERNAL_API_ERROR", "message": msg})
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                status_code = actix_web::http::StatusCode::INTERNAL_SERVER_ERROR;
                json!({"code": "DATABASE_ERROR", "message": "Database error"})
            }
            _ => {
                log::error!("Internal error: {self}");
                status_code = actix_web::http::StatusCode::INTERNAL_SERVER_ERROR;
                json!({"code": "INTERNAL_ERROR", "message": "Internal server error"})
            }
        };

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": body
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_entitlement_rejection_is_forbidden() {
        let resp =
            AppError::EntitlementError(EntitlementReason::SubscriptionExpired).error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = AppError::EntitlementError(EntitlementReason::PaymentPending).error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_feature_lock_is_forbidden() {
        let resp = AppError::FeatureError {
            current_plan: "basic_monthly".to_string(),
            required_feature: "whatsapp_messaging".to_string(),
        }
        .error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_missing_academic_year_is_bad_request() {
        let resp = AppError::NoAcademicYear(7).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            EntitlementReason::SubscriptionExpired.code(),
            "SUBSCRIPTION_EXPIRED"
        );
        assert_eq!(EntitlementReason::PaymentPending.code(), "PAYMENT_PENDING");
    }
}
