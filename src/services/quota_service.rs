use crate::entities::subscription_entity as sub;
use crate::error::AppResult;
use crate::models::Channel;
use crate::store::SubscriptionStore;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;

/// 当前自然月的起点（UTC）
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .earliest()
        .unwrap_or(now)
}

/// 一次扇出批量预留到的额度凭据
#[derive(Debug)]
pub struct QuotaReservation {
    subscription_id: i64,
    channel: Channel,
    reserved: i64,
}

impl QuotaReservation {
    pub fn reserved(&self) -> i64 {
        self.reserved
    }
}

/// 通道额度账本。
///
/// 契约是 reserve(n) → settle(used)：整批额度一次性原子预留，
/// 发送完成后归还没用掉的部分。绝不做"每条消息读-查-减"——
/// 两个并发扇出各自读到陈旧余量会联手把计数器打穿。
#[derive(Clone)]
pub struct QuotaLedger {
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl QuotaLedger {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self { subscriptions }
    }

    /// 足额才预留；不足时不动计数器返回 None（批次整体降级）。
    /// 预留前先做懒月度重置。
    pub async fn reserve(
        &self,
        row: &sub::Model,
        channel: Channel,
        n: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<QuotaReservation>> {
        if n <= 0 {
            return Ok(Some(QuotaReservation {
                subscription_id: row.id,
                channel,
                reserved: 0,
            }));
        }

        if row.last_reset_date < month_start(now) {
            self.subscriptions
                .reset_usage_before(row.id, month_start(now), now)
                .await?;
        }

        if self.subscriptions.reserve_usage(row.id, channel, n).await? {
            Ok(Some(QuotaReservation {
                subscription_id: row.id,
                channel,
                reserved: n,
            }))
        } else {
            Ok(None)
        }
    }

    /// 批次结束：按实际发出的条数归还剩余预留
    pub async fn settle(&self, reservation: QuotaReservation, used: i64) -> AppResult<()> {
        let unused = (reservation.reserved - used.max(0)).max(0);
        self.subscriptions
            .release_usage(reservation.subscription_id, reservation.channel, unused)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PlanType, SubscriptionStatus};
    use crate::store::{MemorySubscriptionStore, NewSubscription};
    use chrono::Duration;

    async fn seeded(sms_limit: i64, age_days: i64) -> (MemorySubscriptionStore, sub::Model) {
        let store = MemorySubscriptionStore::new();
        let starts = Utc::now() - Duration::days(age_days);
        let row = store
            .seed(
                NewSubscription {
                    school_id: 1,
                    plan_type: PlanType::BasicMonthly,
                    starts_at: starts,
                    expires_at: starts + Duration::days(365),
                    duration_days: 365,
                    sms_monthly_limit: sms_limit,
                    whatsapp_monthly_limit: 0,
                    payment_method: None,
                    transaction_id: None,
                    original_amount: 0,
                    discount_amount: 0,
                    final_amount: 0,
                    test_mode: false,
                },
                SubscriptionStatus::Active,
            )
            .await;
        (store, row)
    }

    #[tokio::test]
    async fn test_reserve_within_limit() {
        let (store, row) = seeded(10, 0).await;
        let ledger = QuotaLedger::new(Arc::new(store.clone()));

        let reservation = ledger
            .reserve(&row, Channel::Sms, 6, Utc::now())
            .await
            .unwrap()
            .expect("should reserve");
        assert_eq!(reservation.reserved(), 6);
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 6);
    }

    #[tokio::test]
    async fn test_insufficient_quota_leaves_counter_untouched() {
        let (store, row) = seeded(5, 0).await;
        let ledger = QuotaLedger::new(Arc::new(store.clone()));

        let reservation = ledger.reserve(&row, Channel::Sms, 6, Utc::now()).await.unwrap();
        assert!(reservation.is_none());
        // 不足时一条也不扣
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 0);
    }

    #[tokio::test]
    async fn test_settle_releases_unsent_portion() {
        let (store, row) = seeded(10, 0).await;
        let ledger = QuotaLedger::new(Arc::new(store.clone()));

        let reservation = ledger
            .reserve(&row, Channel::Sms, 6, Utc::now())
            .await
            .unwrap()
            .unwrap();
        // 6 条里只发出去 4 条
        ledger.settle(reservation, 4).await.unwrap();
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 4);
    }

    #[tokio::test]
    async fn test_reserve_resets_counters_on_month_rollover() {
        let (store, row) = seeded(10, 62).await;
        store.reserve_usage(row.id, Channel::Sms, 9).await.unwrap();
        let ledger = QuotaLedger::new(Arc::new(store.clone()));

        // 上月的 9 条用量在新月不作数
        let reservation = ledger.reserve(&row, Channel::Sms, 6, Utc::now()).await.unwrap();
        assert!(reservation.is_some());
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 6);
    }

    #[tokio::test]
    async fn test_zero_request_is_trivially_reserved() {
        let (store, row) = seeded(0, 0).await;
        let ledger = QuotaLedger::new(Arc::new(store.clone()));
        let reservation = ledger.reserve(&row, Channel::Sms, 0, Utc::now()).await.unwrap();
        assert_eq!(reservation.unwrap().reserved(), 0);
    }

    #[test]
    fn test_month_start_truncates_to_first_day() {
        let now = Utc.with_ymd_and_hms(2026, 8, 28, 15, 30, 0).unwrap();
        assert_eq!(
            month_start(now),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
    }
}
