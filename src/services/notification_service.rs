use crate::entities::subscription_entity as sub;
use crate::error::AppResult;
use crate::external::{MailGateway, SmsGateway};
use crate::models::{Channel, DeliverySummary, Recipient};
use crate::services::QuotaLedger;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 公告扇出：计费短信通道走"全有或全无"的配额闸门，
/// 邮件通道不计费、独立尽力投递。
#[derive(Clone)]
pub struct NotificationFanout {
    quota: QuotaLedger,
    sms: Arc<dyn SmsGateway>,
    mail: Arc<dyn MailGateway>,
}

impl NotificationFanout {
    pub fn new(quota: QuotaLedger, sms: Arc<dyn SmsGateway>, mail: Arc<dyn MailGateway>) -> Self {
        Self { quota, sms, mail }
    }

    /// 公告已先行落库；这里只是 best-effort 副作用，单个接收人的
    /// 通道失败被隔离记录，绝不让整批或公告创建失败。
    pub async fn fan_out(
        &self,
        subscription: Option<&sub::Model>,
        title: &str,
        body: &str,
        recipients: &[Recipient],
        now: DateTime<Utc>,
    ) -> AppResult<DeliverySummary> {
        let mut summary = DeliverySummary {
            total_recipients: recipients.len(),
            ..Default::default()
        };

        let eligible: Vec<&Recipient> = recipients.iter().filter(|r| r.phone.is_some()).collect();
        summary.sms_eligible = eligible.len();

        let sms_text = format!("{title}: {body}");

        match subscription {
            Some(row) if !eligible.is_empty() => {
                match self
                    .quota
                    .reserve(row, Channel::Sms, eligible.len() as i64, now)
                    .await?
                {
                    Some(reservation) => {
                        let mut sent = 0i64;
                        for r in &eligible {
                            let phone = r.phone.as_deref().unwrap_or_default();
                            match self.sms.send_sms(phone, &sms_text).await {
                                Ok(()) => sent += 1,
                                Err(e) => {
                                    log::warn!(
                                        "SMS to recipient {} failed, continuing batch: {e}",
                                        r.id
                                    );
                                }
                            }
                        }
                        summary.sms_sent = sent as usize;
                        // 发送失败的条数归还给账本
                        self.quota.settle(reservation, sent).await?;
                    }
                    None => {
                        // 余量不足：整批跳过短信，一条也不发，降级为邮件
                        log::warn!(
                            "SMS quota exhausted for school {}: need {}, skipping SMS for batch",
                            row.school_id,
                            eligible.len()
                        );
                        summary.sms_skipped = true;
                        summary.skip_reason = Some("quota_exhausted".to_string());
                    }
                }
            }
            Some(_) => {}
            None => {
                if !eligible.is_empty() {
                    summary.sms_skipped = true;
                    summary.skip_reason = Some("no_subscription".to_string());
                }
            }
        }

        // 邮件独立于短信结果，对每个有邮箱的接收人各尝试一次
        for r in recipients {
            let Some(email) = r.email.as_deref() else {
                continue;
            };
            match self.mail.send_email(email, title, body).await {
                Ok(()) => summary.email_sent += 1,
                Err(e) => {
                    log::warn!("Email to recipient {} failed, continuing batch: {e}", r.id);
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PlanType, SubscriptionStatus};
    use crate::error::AppError;
    use crate::models::AudienceRole;
    use crate::store::{MemorySubscriptionStore, NewSubscription};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSms {
        sent: Mutex<Vec<String>>,
        fail_numbers: HashSet<String>,
    }

    #[async_trait]
    impl SmsGateway for FakeSms {
        async fn send_sms(&self, to: &str, _body: &str) -> AppResult<()> {
            if self.fail_numbers.contains(to) {
                return Err(AppError::ExternalApiError("carrier rejected".to_string()));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMail {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailGateway for FakeMail {
        async fn send_email(&self, to: &str, _subject: &str, _body: &str) -> AppResult<()> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    fn recipient(n: usize, phone: bool, email: bool) -> Recipient {
        Recipient {
            id: format!("student-{n}"),
            name: format!("Student {n}"),
            phone: phone.then(|| format!("+9190000000{n:02}")),
            email: email.then(|| format!("s{n}@school.example")),
            role: AudienceRole::Student,
        }
    }

    async fn seeded_store(sms_limit: i64) -> (MemorySubscriptionStore, sub::Model) {
        let store = MemorySubscriptionStore::new();
        let now = Utc::now();
        let row = store
            .seed(
                NewSubscription {
                    school_id: 1,
                    plan_type: PlanType::PremiumMonthly,
                    starts_at: now,
                    expires_at: now + Duration::days(30),
                    duration_days: 30,
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

    fn fanout(
        store: &MemorySubscriptionStore,
        sms: Arc<FakeSms>,
        mail: Arc<FakeMail>,
    ) -> NotificationFanout {
        NotificationFanout::new(QuotaLedger::new(Arc::new(store.clone())), sms, mail)
    }

    #[tokio::test]
    async fn test_full_batch_sent_when_quota_suffices() {
        let (store, row) = seeded_store(10).await;
        let sms = Arc::new(FakeSms::default());
        let mail = Arc::new(FakeMail::default());
        let svc = fanout(&store, sms.clone(), mail.clone());

        let recipients: Vec<_> = (0..6).map(|n| recipient(n, true, true)).collect();
        let summary = svc
            .fan_out(Some(&row), "Hello", "World", &recipients, Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.sms_eligible, 6);
        assert_eq!(summary.sms_sent, 6);
        assert_eq!(summary.email_sent, 6);
        assert!(!summary.sms_skipped);
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 6);
    }

    #[tokio::test]
    async fn test_all_or_nothing_when_quota_short() {
        // 余量 5、需要 6：整批一条都不发
        let (store, row) = seeded_store(5).await;
        let sms = Arc::new(FakeSms::default());
        let mail = Arc::new(FakeMail::default());
        let svc = fanout(&store, sms.clone(), mail.clone());

        let recipients: Vec<_> = (0..6).map(|n| recipient(n, true, true)).collect();
        let summary = svc
            .fan_out(Some(&row), "Hello", "World", &recipients, Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.sms_sent, 0);
        assert!(summary.sms_skipped);
        assert_eq!(summary.skip_reason.as_deref(), Some("quota_exhausted"));
        assert!(sms.sent.lock().unwrap().is_empty());
        // 计数器纹丝不动
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 0);
        // 邮件通道不受影响
        assert_eq!(summary.email_sent, 6);
    }

    #[tokio::test]
    async fn test_per_recipient_failure_is_isolated_and_released() {
        let (store, row) = seeded_store(10).await;
        let mut sms = FakeSms::default();
        sms.fail_numbers.insert("+919000000002".to_string());
        let sms = Arc::new(sms);
        let mail = Arc::new(FakeMail::default());
        let svc = fanout(&store, sms.clone(), mail.clone());

        let recipients: Vec<_> = (0..6).map(|n| recipient(n, true, false)).collect();
        let summary = svc
            .fan_out(Some(&row), "Hello", "World", &recipients, Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.sms_sent, 5);
        // 失败的那条预留被归还
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 5);
    }

    #[tokio::test]
    async fn test_recipients_without_phone_are_not_billed() {
        let (store, row) = seeded_store(10).await;
        let sms = Arc::new(FakeSms::default());
        let mail = Arc::new(FakeMail::default());
        let svc = fanout(&store, sms.clone(), mail.clone());

        let recipients = vec![
            recipient(0, true, false),
            recipient(1, false, true),
            recipient(2, false, false),
        ];
        let summary = svc
            .fan_out(Some(&row), "Hello", "World", &recipients, Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.total_recipients, 3);
        assert_eq!(summary.sms_eligible, 1);
        assert_eq!(summary.sms_sent, 1);
        assert_eq!(summary.email_sent, 1);
        assert_eq!(store.get(row.id).await.unwrap().sms_used_this_month, 1);
    }

    #[tokio::test]
    async fn test_no_subscription_skips_sms_but_emails() {
        let (store, _row) = seeded_store(10).await;
        let sms = Arc::new(FakeSms::default());
        let mail = Arc::new(FakeMail::default());
        let svc = fanout(&store, sms.clone(), mail.clone());

        let recipients: Vec<_> = (0..3).map(|n| recipient(n, true, true)).collect();
        let summary = svc
            .fan_out(None, "Hello", "World", &recipients, Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.sms_sent, 0);
        assert_eq!(summary.skip_reason.as_deref(), Some("no_subscription"));
        assert_eq!(summary.email_sent, 3);
    }
}
