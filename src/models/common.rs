use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 统一错误响应里 error 字段的形状
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}
