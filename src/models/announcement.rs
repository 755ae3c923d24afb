use crate::entities::announcement_entity as ann;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 广播角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AudienceRole {
    Student,
    Teacher,
    Parent,
}

impl std::fmt::Display for AudienceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudienceRole::Student => write!(f, "student"),
            AudienceRole::Teacher => write!(f, "teacher"),
            AudienceRole::Parent => write!(f, "parent"),
        }
    }
}

/// 展开前的逻辑目标：按角色广播或按用户定向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceTarget {
    Role(AudienceRole),
    Users(Vec<i64>),
}

/// 扇出期间临时合成的接收人，从不落库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: AudienceRole,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAnnouncementRequest {
    #[schema(example = "Sports day postponed")]
    pub title: String,
    pub body: String,
    /// 按角色广播（student/teacher/parent）
    pub target_roles: Option<Vec<AudienceRole>>,
    /// 或者定向到指定学生/教师 id
    pub target_users: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnnouncementResponse {
    pub id: i64,
    pub school_id: i64,
    pub title: String,
    pub body: String,
    pub created_by: i64,
    pub target_roles: Vec<AudienceRole>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<ann::Model> for AnnouncementResponse {
    fn from(m: ann::Model) -> Self {
        let target_roles = m
            .target_roles
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        Self {
            id: m.id,
            school_id: m.school_id,
            title: m.title,
            body: m.body,
            created_by: m.created_by,
            target_roles,
            created_at: m.created_at,
        }
    }
}

/// 单次扇出的投递汇总；配额不足不是错误，只体现在这里
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct DeliverySummary {
    pub total_recipients: usize,
    pub sms_eligible: usize,
    pub sms_sent: usize,
    pub email_sent: usize,
    pub sms_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAnnouncementResponse {
    pub announcement: AnnouncementResponse,
    pub delivery: DeliverySummary,
}
