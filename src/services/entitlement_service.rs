use crate::entities::{SubscriptionStatus, subscription_entity as sub};
use crate::error::AppResult;
use crate::models::{Entitlement, plan_spec};
use crate::services::quota_service::month_start;
use crate::store::SubscriptionStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// 权益解析器：订阅行 + 墙钟时间 → 此刻的权威权益。
///
/// 读（describe，纯函数）与写（apply_due_transitions，显式条件更新）
/// 分离：到期判定永远按 now 重新计算，不信任存储里可能陈旧的
/// status 字面量。
#[derive(Clone)]
pub struct EntitlementService {
    subscriptions: Arc<dyn SubscriptionStore>,
    grace_period_days: i64,
}

impl EntitlementService {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, grace_period_days: i64) -> Self {
        Self {
            subscriptions,
            grace_period_days,
        }
    }

    fn grace_window(&self, row: &sub::Model) -> Option<DateTime<Utc>> {
        if self.grace_period_days <= 0 {
            return None;
        }
        Some(
            row.grace_period_ends
                .unwrap_or(row.expires_at + Duration::days(self.grace_period_days)),
        )
    }

    /// 按 now 推导有效状态（纯函数）
    pub fn effective_status(&self, row: &sub::Model, now: DateTime<Utc>) -> SubscriptionStatus {
        match row.status {
            SubscriptionStatus::Active if row.expires_at < now => match self.grace_window(row) {
                Some(ends) if now <= ends => SubscriptionStatus::GracePeriod,
                _ => SubscriptionStatus::Expired,
            },
            SubscriptionStatus::GracePeriod => match row.grace_period_ends {
                Some(ends) if now <= ends => SubscriptionStatus::GracePeriod,
                // 存储字段仍写着 grace_period，但窗口已过：按过期对待
                _ => SubscriptionStatus::Expired,
            },
            ref status => status.clone(),
        }
    }

    /// 由行快照生成权益描述（纯函数，不触库）
    pub fn describe(&self, row: Option<&sub::Model>, now: DateTime<Utc>) -> Entitlement {
        let Some(row) = row else {
            return Entitlement::none();
        };
        let status = self.effective_status(row, now);
        let features = match status {
            SubscriptionStatus::Active | SubscriptionStatus::GracePeriod => {
                plan_spec(&row.plan_type).features
            }
            _ => Vec::new(),
        };
        // 月度重置已由 resolve 落库；这里只按行内计数器计算余量
        let (sms_used, wa_used) = if row.last_reset_date < month_start(now) {
            (0, 0)
        } else {
            (row.sms_used_this_month, row.whatsapp_used_this_month)
        };
        Entitlement {
            status,
            plan_type: Some(row.plan_type.clone()),
            features,
            sms_remaining: (row.sms_monthly_limit - sms_used).max(0),
            whatsapp_remaining: (row.whatsapp_monthly_limit - wa_used).max(0),
        }
    }

    /// 命令侧：把到期的懒迁移与月度重置落库。
    ///
    /// 所有写入都是以先前观察到的状态为条件的更新；任意数量的并发
    /// 调用者重放同一迁移，恰好一个生效，其余是无害的空操作。
    pub async fn apply_due_transitions(
        &self,
        row: &sub::Model,
        now: DateTime<Utc>,
    ) -> AppResult<sub::Model> {
        let mut dirty = false;

        if row.last_reset_date < month_start(now) {
            dirty |= self
                .subscriptions
                .reset_usage_before(row.id, month_start(now), now)
                .await?;
        }

        match row.status {
            SubscriptionStatus::Active if row.expires_at < now => {
                match self.grace_window(row) {
                    Some(ends) if now <= ends => {
                        dirty |= self
                            .subscriptions
                            .transition_status(
                                row.id,
                                SubscriptionStatus::Active,
                                SubscriptionStatus::GracePeriod,
                                Some(ends),
                            )
                            .await?;
                        log::info!(
                            "Subscription {} for school {} entered grace period until {}",
                            row.id,
                            row.school_id,
                            ends
                        );
                    }
                    _ => {
                        dirty |= self
                            .subscriptions
                            .transition_status(
                                row.id,
                                SubscriptionStatus::Active,
                                SubscriptionStatus::Expired,
                                None,
                            )
                            .await?;
                        log::info!(
                            "Subscription {} for school {} expired",
                            row.id,
                            row.school_id
                        );
                    }
                }
            }
            SubscriptionStatus::GracePeriod => {
                let lapsed = match row.grace_period_ends {
                    Some(ends) => now > ends,
                    None => true,
                };
                if lapsed {
                    dirty |= self
                        .subscriptions
                        .transition_status(
                            row.id,
                            SubscriptionStatus::GracePeriod,
                            SubscriptionStatus::Expired,
                            None,
                        )
                        .await?;
                    log::info!(
                        "Subscription {} for school {} grace period lapsed",
                        row.id,
                        row.school_id
                    );
                }
            }
            _ => {}
        }

        if dirty {
            // 条件更新可能输给并发方，但目标值相同；重读拿到收敛后的行
            Ok(self
                .subscriptions
                .current_for_school(row.school_id)
                .await?
                .unwrap_or_else(|| row.clone()))
        } else {
            Ok(row.clone())
        }
    }

    /// 每个请求消费的唯一决策入口
    pub async fn resolve(&self, school_id: i64, now: DateTime<Utc>) -> AppResult<Entitlement> {
        let Some(row) = self.subscriptions.current_for_school(school_id).await? else {
            return Ok(Entitlement::none());
        };
        let row = self.apply_due_transitions(&row, now).await?;
        Ok(self.describe(Some(&row), now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PlanType;
    use crate::models::Feature;
    use crate::store::{MemorySubscriptionStore, NewSubscription};
    use chrono::Duration;

    fn new_sub(school_id: i64, plan: PlanType, starts: DateTime<Utc>, days: i64) -> NewSubscription {
        NewSubscription {
            school_id,
            plan_type: plan,
            starts_at: starts,
            expires_at: starts + Duration::days(days),
            duration_days: days as i32,
            sms_monthly_limit: 500,
            whatsapp_monthly_limit: 0,
            payment_method: None,
            transaction_id: None,
            original_amount: 0,
            discount_amount: 0,
            final_amount: 0,
            test_mode: false,
        }
    }

    fn service(store: &MemorySubscriptionStore, grace_days: i64) -> EntitlementService {
        EntitlementService::new(Arc::new(store.clone()), grace_days)
    }

    #[tokio::test]
    async fn test_active_within_term_keeps_features() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        store
            .seed(
                new_sub(1, PlanType::BasicMonthly, now, 30),
                SubscriptionStatus::Active,
            )
            .await;

        let svc = service(&store, 7);
        let ent = svc.resolve(1, now).await.unwrap();
        assert_eq!(ent.status, SubscriptionStatus::Active);
        assert!(ent.has_feature(Feature::BulkSms));
        assert!(!ent.has_feature(Feature::WhatsappMessaging));
        assert_eq!(ent.sms_remaining, 500);
    }

    #[tokio::test]
    async fn test_expired_active_enters_grace_and_persists() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        let row = store
            .seed(
                new_sub(1, PlanType::BasicMonthly, now - Duration::days(31), 30),
                SubscriptionStatus::Active,
            )
            .await;

        let svc = service(&store, 7);
        let ent = svc.resolve(1, now).await.unwrap();
        assert_eq!(ent.status, SubscriptionStatus::GracePeriod);
        // 宽限期内功能保留
        assert!(ent.has_feature(Feature::BulkSms));

        let stored = store.get(row.id).await.unwrap();
        assert_eq!(stored.status, SubscriptionStatus::GracePeriod);
        assert!(stored.grace_period_ends.is_some());
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        store
            .seed(
                new_sub(1, PlanType::PremiumMonthly, now - Duration::days(31), 30),
                SubscriptionStatus::Active,
            )
            .await;

        let svc = service(&store, 7);
        let first = svc.resolve(1, now).await.unwrap();
        let second = svc.resolve(1, now).await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.features, second.features);
        assert_eq!(first.sms_remaining, second.sms_remaining);
    }

    #[tokio::test]
    async fn test_lapsed_grace_treated_as_expired() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        let row = store
            .seed(
                new_sub(1, PlanType::BasicMonthly, now - Duration::days(60), 30),
                SubscriptionStatus::Active,
            )
            .await;
        // 30 天前到期 + 7 天宽限，早已过窗
        let svc = service(&store, 7);

        // 纯读路径也要归一化，即便还没人写库
        let stale = store.get(row.id).await.unwrap();
        let ent = svc.describe(Some(&stale), now);
        assert_eq!(ent.status, SubscriptionStatus::Expired);
        assert!(ent.features.is_empty());

        let ent = svc.resolve(1, now).await.unwrap();
        assert_eq!(ent.status, SubscriptionStatus::Expired);
        assert_eq!(store.get(row.id).await.unwrap().status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_no_grace_when_window_disabled() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        store
            .seed(
                new_sub(1, PlanType::BasicMonthly, now - Duration::days(31), 30),
                SubscriptionStatus::Active,
            )
            .await;

        let svc = service(&store, 0);
        let ent = svc.resolve(1, now).await.unwrap();
        assert_eq!(ent.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_monthly_counters_reset_on_resolve() {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        // 起点放在两个月前，last_reset_date 一定早于本月月初
        let row = store
            .seed(
                new_sub(1, PlanType::BasicYearly, now - Duration::days(62), 365),
                SubscriptionStatus::Active,
            )
            .await;
        store.reserve_usage(row.id, crate::models::Channel::Sms, 400).await.unwrap();

        let svc = service(&store, 7);
        let ent = svc.resolve(1, now).await.unwrap();
        assert_eq!(ent.sms_remaining, 500);
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 0);
    }

    #[tokio::test]
    async fn test_no_subscription_yields_empty_entitlement() {
        let store = MemorySubscriptionStore::new();
        let svc = service(&store, 7);
        let ent = svc.resolve(42, Utc::now()).await.unwrap();
        assert_eq!(ent.status, SubscriptionStatus::Expired);
        assert!(ent.plan_type.is_none());
        assert!(ent.features.is_empty());
    }
}
