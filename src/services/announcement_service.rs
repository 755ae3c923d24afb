use crate::error::{AppError, AppResult};
use crate::models::{
    AnnouncementResponse, AudienceTarget, CreateAnnouncementRequest, CreateAnnouncementResponse,
    DeliverySummary,
};
use crate::services::{AudienceExpander, NotificationFanout};
use crate::store::{AnnouncementStore, SubscriptionStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 公告：先落库，再展开受众、走配额闸门扇出。
/// 投递只是副作用，部分失败绝不影响公告创建成功。
#[derive(Clone)]
pub struct AnnouncementService {
    announcements: Arc<dyn AnnouncementStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    audience: AudienceExpander,
    fanout: NotificationFanout,
}

impl AnnouncementService {
    pub fn new(
        announcements: Arc<dyn AnnouncementStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        audience: AudienceExpander,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            announcements,
            subscriptions,
            audience,
            fanout,
        }
    }

    pub async fn create(
        &self,
        school_id: i64,
        created_by: i64,
        req: CreateAnnouncementRequest,
        now: DateTime<Utc>,
    ) -> AppResult<CreateAnnouncementResponse> {
        if req.title.trim().is_empty() {
            return Err(AppError::ValidationError("Title is required".into()));
        }
        if req.body.trim().is_empty() {
            return Err(AppError::ValidationError("Body is required".into()));
        }

        let roles = req.target_roles.unwrap_or_default();
        let users = req.target_users.unwrap_or_default();
        if roles.is_empty() && users.is_empty() {
            return Err(AppError::ValidationError(
                "At least one target role or target user is required".into(),
            ));
        }

        let mut targets: Vec<AudienceTarget> =
            roles.iter().copied().map(AudienceTarget::Role).collect();
        if !users.is_empty() {
            targets.push(AudienceTarget::Users(users));
        }

        // 公告先持久化；扇出失败不回滚
        let record = self
            .announcements
            .insert(school_id, &req.title, &req.body, created_by, &roles)
            .await?;

        let delivery = match self.deliver(school_id, &record.title, &record.body, &targets, now)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                // 连展开/预留都失败时公告仍然创建成功，只报告未投递
                log::error!("Announcement {} fan-out failed: {e}", record.id);
                DeliverySummary {
                    sms_skipped: true,
                    skip_reason: Some("fanout_failed".to_string()),
                    ..Default::default()
                }
            }
        };

        log::info!(
            "Announcement {} delivered: {} recipients, {} sms, {} email{}",
            record.id,
            delivery.total_recipients,
            delivery.sms_sent,
            delivery.email_sent,
            if delivery.sms_skipped {
                " (sms skipped)"
            } else {
                ""
            }
        );

        Ok(CreateAnnouncementResponse {
            announcement: AnnouncementResponse::from(record),
            delivery,
        })
    }

    async fn deliver(
        &self,
        school_id: i64,
        title: &str,
        body: &str,
        targets: &[AudienceTarget],
        now: DateTime<Utc>,
    ) -> AppResult<DeliverySummary> {
        let recipients = self.audience.expand(school_id, targets).await?;
        let subscription = self.subscriptions.current_for_school(school_id).await?;
        self.fanout
            .fan_out(subscription.as_ref(), title, body, &recipients, now)
            .await
    }

    pub async fn list(&self, school_id: i64) -> AppResult<Vec<AnnouncementResponse>> {
        let rows = self.announcements.list_for_school(school_id).await?;
        Ok(rows.into_iter().map(AnnouncementResponse::from).collect())
    }
}
