use crate::entities::{PlanType, subscription_entity as sub};
use crate::error::{AppError, AppResult};
use crate::models::{
    CancelSubscriptionResponse, CurrentSubscriptionResponse, PlanInfo, SubscriptionResponse,
    VerifyPaymentRequest, VerifyPaymentResponse, all_plans, plan_spec,
};
use crate::services::EntitlementService;
use crate::store::{NewSubscription, SubscriptionStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// 订阅生命周期：试用开通、下单、付款核验激活、显式取消。
///
/// 付款核验本身发生在外部网关回调；这里只消费已核验的结果，
/// 把 pending 行迁移为带全新有效期的 active 行。
#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    entitlements: EntitlementService,
    trial_days: i64,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        entitlements: EntitlementService,
        trial_days: i64,
    ) -> Self {
        Self {
            subscriptions,
            entitlements,
            trial_days,
        }
    }

    fn new_row(
        &self,
        school_id: i64,
        plan_type: PlanType,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> NewSubscription {
        let spec = plan_spec(&plan_type);
        NewSubscription {
            school_id,
            plan_type,
            starts_at: now,
            expires_at: now + Duration::days(duration_days),
            duration_days: duration_days as i32,
            sms_monthly_limit: spec.sms_monthly_limit,
            whatsapp_monthly_limit: spec.whatsapp_monthly_limit,
            payment_method: None,
            transaction_id: None,
            original_amount: spec.price_cents,
            discount_amount: 0,
            final_amount: spec.price_cents,
            test_mode: false,
        }
    }

    /// 学校注册时的初始订阅：直接 active 的试用行
    pub async fn start_trial(&self, school_id: i64, now: DateTime<Utc>) -> AppResult<sub::Model> {
        let row = self.new_row(school_id, PlanType::Trial, now, self.trial_days);
        let model = self.subscriptions.activate(row).await?;
        log::info!(
            "Trial subscription {} started for school {school_id}",
            model.id
        );
        Ok(model)
    }

    pub async fn current(
        &self,
        school_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<CurrentSubscriptionResponse> {
        let row = self.subscriptions.current_for_school(school_id).await?;
        let row = match row {
            Some(r) => Some(self.entitlements.apply_due_transitions(&r, now).await?),
            None => None,
        };
        let entitlement = self.entitlements.describe(row.as_ref(), now);
        Ok(CurrentSubscriptionResponse {
            subscription: row.map(SubscriptionResponse::from),
            entitlement,
        })
    }

    pub fn plans(&self) -> Vec<PlanInfo> {
        all_plans()
            .into_iter()
            .map(|plan_type| PlanInfo {
                spec: plan_spec(&plan_type),
                plan_type,
            })
            .collect()
    }

    /// 下单：插入待核验行，等待支付网关回调
    pub async fn checkout(
        &self,
        school_id: i64,
        plan_type: PlanType,
        now: DateTime<Utc>,
    ) -> AppResult<sub::Model> {
        if plan_type == PlanType::Trial {
            return Err(AppError::ValidationError(
                "Trial plan cannot be purchased".into(),
            ));
        }
        let spec = plan_spec(&plan_type);
        let row = self.new_row(school_id, plan_type, now, spec.duration_days);
        self.subscriptions.insert_pending(row).await
    }

    /// 付款已由网关核验：以全新有效期激活（pending → active，
    /// 或过期后直接重新激活）
    pub async fn verify_payment(
        &self,
        school_id: i64,
        req: VerifyPaymentRequest,
        now: DateTime<Utc>,
    ) -> AppResult<VerifyPaymentResponse> {
        if req.plan_type == PlanType::Trial {
            return Err(AppError::ValidationError(
                "Trial plan cannot be purchased".into(),
            ));
        }

        let spec = plan_spec(&req.plan_type);
        let original = req.original_amount.unwrap_or(spec.price_cents);
        let discount = req.discount_amount.unwrap_or(0);
        if discount < 0 || discount > original {
            return Err(AppError::ValidationError("Invalid discount amount".into()));
        }

        let transaction_id = match req.transaction_id {
            Some(id) if !id.trim().is_empty() => id,
            // test_mode 下造一个可追溯的假交易号
            _ if req.test_mode => format!("test-{}", Uuid::new_v4()),
            _ => {
                return Err(AppError::ValidationError(
                    "transaction_id is required".into(),
                ));
            }
        };

        let mut row = self.new_row(school_id, req.plan_type, now, spec.duration_days);
        row.payment_method = req.payment_method;
        row.transaction_id = Some(transaction_id);
        row.original_amount = original;
        row.discount_amount = discount;
        row.final_amount = original - discount;
        row.test_mode = req.test_mode;

        let model = self.subscriptions.activate(row).await?;
        log::info!(
            "Subscription {} activated for school {school_id} (plan {})",
            model.id,
            model.plan_type
        );
        let entitlement = self.entitlements.describe(Some(&model), now);
        Ok(VerifyPaymentResponse {
            subscription: SubscriptionResponse::from(model),
            entitlement,
        })
    }

    /// 显式取消，终态
    pub async fn cancel(&self, school_id: i64) -> AppResult<CancelSubscriptionResponse> {
        let latest = self.subscriptions.cancel_current(school_id).await?;
        match latest {
            Some(row) => Ok(CancelSubscriptionResponse {
                canceled: true,
                status: row.status,
            }),
            None => Err(AppError::NotFound(format!(
                "No subscription found for school {school_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SubscriptionStatus;
    use crate::models::Feature;
    use crate::store::MemorySubscriptionStore;

    fn service(store: &MemorySubscriptionStore) -> SubscriptionService {
        let entitlements = EntitlementService::new(Arc::new(store.clone()), 7);
        SubscriptionService::new(Arc::new(store.clone()), entitlements, 14)
    }

    #[tokio::test]
    async fn test_start_trial_is_active_with_all_features() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let now = Utc::now();

        let row = svc.start_trial(1, now).await.unwrap();
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.plan_type, PlanType::Trial);
        assert_eq!(row.expires_at, now + Duration::days(14));

        let current = svc.current(1, now).await.unwrap();
        assert!(current.entitlement.has_feature(Feature::WhatsappMessaging));
        assert_eq!(current.entitlement.sms_remaining, 50);
        assert_eq!(current.entitlement.whatsapp_remaining, 25);
    }

    #[tokio::test]
    async fn test_checkout_rejects_trial_plan() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let err = svc.checkout(1, PlanType::Trial, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_without_touching_active() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let now = Utc::now();

        let active = svc.start_trial(1, now).await.unwrap();
        let pending = svc.checkout(1, PlanType::BasicMonthly, now).await.unwrap();
        assert_eq!(pending.status, SubscriptionStatus::Pending);
        // 试用行还在，current 仍然指向它
        assert_eq!(
            store.get(active.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
        let current = svc.current(1, now).await.unwrap();
        assert_eq!(current.subscription.unwrap().id, active.id);
    }

    #[tokio::test]
    async fn test_verify_payment_supersedes_previous_subscription() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let now = Utc::now();

        let trial = svc.start_trial(1, now).await.unwrap();
        svc.checkout(1, PlanType::PremiumMonthly, now).await.unwrap();

        let resp = svc
            .verify_payment(
                1,
                VerifyPaymentRequest {
                    plan_type: PlanType::PremiumMonthly,
                    transaction_id: Some("txn-123".to_string()),
                    payment_method: Some("upi".to_string()),
                    original_amount: None,
                    discount_amount: None,
                    test_mode: false,
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(resp.subscription.status, SubscriptionStatus::Active);
        assert_eq!(resp.subscription.plan_type, PlanType::PremiumMonthly);
        assert_eq!(resp.subscription.expires_at, now + Duration::days(30));
        assert!(resp.entitlement.has_feature(Feature::ReportExports));
        // 旧的试用行被判过期，任一时刻只有一行 active
        assert_eq!(
            store.get(trial.id).await.unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_verify_payment_requires_transaction_id() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let err = svc
            .verify_payment(
                1,
                VerifyPaymentRequest {
                    plan_type: PlanType::BasicMonthly,
                    transaction_id: None,
                    payment_method: None,
                    original_amount: None,
                    discount_amount: None,
                    test_mode: false,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_verify_payment_test_mode_synthesizes_transaction_id() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let resp = svc
            .verify_payment(
                1,
                VerifyPaymentRequest {
                    plan_type: PlanType::BasicYearly,
                    transaction_id: None,
                    payment_method: None,
                    original_amount: None,
                    discount_amount: None,
                    test_mode: true,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(resp.subscription.test_mode);
        assert!(
            resp.subscription
                .transaction_id
                .unwrap()
                .starts_with("test-")
        );
    }

    #[tokio::test]
    async fn test_verify_payment_rejects_bad_discount() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let err = svc
            .verify_payment(
                1,
                VerifyPaymentRequest {
                    plan_type: PlanType::BasicMonthly,
                    transaction_id: Some("txn".to_string()),
                    payment_method: None,
                    original_amount: Some(1000),
                    discount_amount: Some(2000),
                    test_mode: false,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let now = Utc::now();

        svc.start_trial(1, now).await.unwrap();
        let resp = svc.cancel(1).await.unwrap();
        assert!(resp.canceled);
        assert_eq!(resp.status, SubscriptionStatus::Canceled);

        // 取消后没有可用权益
        let current = svc.current(1, now).await.unwrap();
        assert!(current.entitlement.check_mutation().is_err());
    }

    #[tokio::test]
    async fn test_cancel_without_subscription_is_not_found() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store);
        let err = svc.cancel(99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
