use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "plan_type")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[sea_orm(string_value = "trial")]
    Trial,
    #[sea_orm(string_value = "basic_monthly")]
    BasicMonthly,
    #[sea_orm(string_value = "basic_yearly")]
    BasicYearly,
    #[sea_orm(string_value = "premium_monthly")]
    PremiumMonthly,
    #[sea_orm(string_value = "premium_yearly")]
    PremiumYearly,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Trial => write!(f, "trial"),
            PlanType::BasicMonthly => write!(f, "basic_monthly"),
            PlanType::BasicYearly => write!(f, "basic_yearly"),
            PlanType::PremiumMonthly => write!(f, "premium_monthly"),
            PlanType::PremiumYearly => write!(f, "premium_yearly"),
        }
    }
}

#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "subscription_status")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "grace_period")]
    GracePeriod,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Pending => write!(f, "pending"),
            SubscriptionStatus::GracePeriod => write!(f, "grace_period"),
            SubscriptionStatus::Expired => write!(f, "expired"),
            SubscriptionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub school_id: i64,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub grace_period_ends: Option<DateTime<Utc>>,
    pub duration_days: i32,
    pub sms_monthly_limit: i64,
    pub whatsapp_monthly_limit: i64,
    pub sms_used_this_month: i64,
    pub whatsapp_used_this_month: i64,
    pub last_reset_date: DateTime<Utc>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub test_mode: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
