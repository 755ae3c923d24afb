use crate::entities::subscription_entity as sub;
use crate::entities::{PlanType, SubscriptionStatus};
use crate::error::{AppError, AppResult, EntitlementReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 套餐可解锁的功能模块
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    StudentManagement,
    Attendance,
    FeeManagement,
    Timetable,
    ExamResults,
    BulkSms,
    WhatsappMessaging,
    ReportExports,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Feature::StudentManagement => "student_management",
            Feature::Attendance => "attendance",
            Feature::FeeManagement => "fee_management",
            Feature::Timetable => "timetable",
            Feature::ExamResults => "exam_results",
            Feature::BulkSms => "bulk_sms",
            Feature::WhatsappMessaging => "whatsapp_messaging",
            Feature::ReportExports => "report_exports",
        };
        write!(f, "{s}")
    }
}

/// 通道配额类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Whatsapp,
}

/// 套餐目录条目：时长、价格与配额
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanSpec {
    pub duration_days: i64,
    pub price_cents: i64,
    pub sms_monthly_limit: i64,
    pub whatsapp_monthly_limit: i64,
    pub features: Vec<Feature>,
}

const BASIC_FEATURES: [Feature; 6] = [
    Feature::StudentManagement,
    Feature::Attendance,
    Feature::FeeManagement,
    Feature::Timetable,
    Feature::ExamResults,
    Feature::BulkSms,
];

const PREMIUM_FEATURES: [Feature; 8] = [
    Feature::StudentManagement,
    Feature::Attendance,
    Feature::FeeManagement,
    Feature::Timetable,
    Feature::ExamResults,
    Feature::BulkSms,
    Feature::WhatsappMessaging,
    Feature::ReportExports,
];

pub fn plan_spec(plan: &PlanType) -> PlanSpec {
    match plan {
        // 试用期开放全部功能，但额度很小
        PlanType::Trial => PlanSpec {
            duration_days: 14,
            price_cents: 0,
            sms_monthly_limit: 50,
            whatsapp_monthly_limit: 25,
            features: PREMIUM_FEATURES.to_vec(),
        },
        PlanType::BasicMonthly => PlanSpec {
            duration_days: 30,
            price_cents: 2900, // $29
            sms_monthly_limit: 500,
            whatsapp_monthly_limit: 0,
            features: BASIC_FEATURES.to_vec(),
        },
        PlanType::BasicYearly => PlanSpec {
            duration_days: 365,
            price_cents: 29900, // $299
            sms_monthly_limit: 500,
            whatsapp_monthly_limit: 0,
            features: BASIC_FEATURES.to_vec(),
        },
        PlanType::PremiumMonthly => PlanSpec {
            duration_days: 30,
            price_cents: 7900, // $79
            sms_monthly_limit: 2000,
            whatsapp_monthly_limit: 1000,
            features: PREMIUM_FEATURES.to_vec(),
        },
        PlanType::PremiumYearly => PlanSpec {
            duration_days: 365,
            price_cents: 79900, // $799
            sms_monthly_limit: 2000,
            whatsapp_monthly_limit: 1000,
            features: PREMIUM_FEATURES.to_vec(),
        },
    }
}

pub fn all_plans() -> Vec<PlanType> {
    vec![
        PlanType::Trial,
        PlanType::BasicMonthly,
        PlanType::BasicYearly,
        PlanType::PremiumMonthly,
        PlanType::PremiumYearly,
    ]
}

/// 某学校此刻的有效权益描述；所有中间件与 handler 只消费这一份决策
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Entitlement {
    /// 有效状态：宽限期已过会被归一化为 expired，即便存储字段仍是 grace_period
    pub status: SubscriptionStatus,
    pub plan_type: Option<PlanType>,
    pub features: Vec<Feature>,
    pub sms_remaining: i64,
    pub whatsapp_remaining: i64,
}

impl Entitlement {
    /// 完全没有可用订阅的学校
    pub fn none() -> Self {
        Self {
            status: SubscriptionStatus::Expired,
            plan_type: None,
            features: Vec::new(),
            sms_remaining: 0,
            whatsapp_remaining: 0,
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// 变更类请求的统一准入判定
    pub fn check_mutation(&self) -> Result<(), EntitlementReason> {
        match self.status {
            SubscriptionStatus::Active
            | SubscriptionStatus::Pending
            | SubscriptionStatus::GracePeriod => Ok(()),
            SubscriptionStatus::Expired | SubscriptionStatus::Canceled => {
                Err(EntitlementReason::SubscriptionExpired)
            }
        }
    }

    /// FeatureGate：仅 active / 未过期的 grace_period 可通过
    pub fn require_feature(&self, feature: Feature) -> AppResult<()> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::GracePeriod => {}
            SubscriptionStatus::Pending => {
                // 已付款待核验：提示等待，而不是让用户升级套餐
                return Err(AppError::EntitlementError(EntitlementReason::PaymentPending));
            }
            _ => {
                return Err(AppError::EntitlementError(
                    EntitlementReason::SubscriptionExpired,
                ));
            }
        }
        if self.has_feature(feature) {
            Ok(())
        } else {
            Err(AppError::FeatureError {
                current_plan: self
                    .plan_type
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                required_feature: feature.to_string(),
            })
        }
    }

    pub fn remaining(&self, channel: Channel) -> i64 {
        match channel {
            Channel::Sms => self.sms_remaining,
            Channel::Whatsapp => self.whatsapp_remaining,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: i64,
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
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub final_amount: i64,
    pub test_mode: bool,
}

impl From<sub::Model> for SubscriptionResponse {
    fn from(m: sub::Model) -> Self {
        Self {
            id: m.id,
            plan_type: m.plan_type,
            status: m.status,
            starts_at: m.starts_at,
            expires_at: m.expires_at,
            grace_period_ends: m.grace_period_ends,
            duration_days: m.duration_days,
            sms_monthly_limit: m.sms_monthly_limit,
            whatsapp_monthly_limit: m.whatsapp_monthly_limit,
            sms_used_this_month: m.sms_used_this_month,
            whatsapp_used_this_month: m.whatsapp_used_this_month,
            payment_method: m.payment_method,
            transaction_id: m.transaction_id,
            final_amount: m.final_amount,
            test_mode: m.test_mode,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CurrentSubscriptionResponse {
    pub subscription: Option<SubscriptionResponse>,
    pub entitlement: Entitlement,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlanInfo {
    pub plan_type: PlanType,
    #[serde(flatten)]
    pub spec: PlanSpec,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub plan_type: PlanType,
    /// 支付网关核验通过后的交易号；test_mode 下可省略
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub original_amount: Option<i64>,
    pub discount_amount: Option<i64>,
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub subscription: SubscriptionResponse,
    pub entitlement: Entitlement,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelSubscriptionResponse {
    pub canceled: bool,
    pub status: SubscriptionStatus,
}
