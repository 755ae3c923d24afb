use super::{AnnouncementStore, DirectoryStore, NewSubscription, SubscriptionStore, pick_current};
use crate::entities::{
    SubscriptionStatus, announcement_entity as ann, school_entity as school,
    student_entity as student, subscription_entity as sub, teacher_entity as teacher,
};
use crate::error::AppResult;
use crate::models::{AudienceRole, Channel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

fn usage_columns(channel: Channel) -> (sub::Column, &'static str) {
    match channel {
        Channel::Sms => (sub::Column::SmsUsedThisMonth, "sms"),
        Channel::Whatsapp => (sub::Column::WhatsappUsedThisMonth, "whatsapp"),
    }
}

#[derive(Clone)]
pub struct PgSubscriptionStore {
    conn: DatabaseConnection,
}

impl PgSubscriptionStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn current_for_school(&self, school_id: i64) -> AppResult<Option<sub::Model>> {
        let rows = sub::Entity::find()
            .filter(sub::Column::SchoolId.eq(school_id))
            .order_by_desc(sub::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(pick_current(rows))
    }

    async fn transition_status(
        &self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        grace_period_ends: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let mut update = sub::Entity::update_many()
            .col_expr(sub::Column::Status, Expr::value(to))
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(Utc::now())));
        if let Some(ends) = grace_period_ends {
            update = update.col_expr(sub::Column::GracePeriodEnds, Expr::value(Some(ends)));
        }
        let res = update
            .filter(sub::Column::Id.eq(id))
            .filter(sub::Column::Status.eq(from))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn reset_usage_before(
        &self,
        id: i64,
        month_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let res = sub::Entity::update_many()
            .col_expr(sub::Column::SmsUsedThisMonth, Expr::value(0i64))
            .col_expr(sub::Column::WhatsappUsedThisMonth, Expr::value(0i64))
            .col_expr(sub::Column::LastResetDate, Expr::value(now))
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(sub::Column::Id.eq(id))
            .filter(sub::Column::LastResetDate.lt(month_start))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn reserve_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<bool> {
        let (used_col, prefix) = usage_columns(channel);
        // 足额才累加，单条条件更新，天然对并发扇出安全
        let guard = format!("{prefix}_used_this_month + ? <= {prefix}_monthly_limit");
        let res = sub::Entity::update_many()
            .col_expr(used_col, Expr::col(used_col).add(n))
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(sub::Column::Id.eq(id))
            .filter(Expr::cust_with_values(guard.as_str(), vec![n]))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn release_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<()> {
        if n <= 0 {
            return Ok(());
        }
        let (used_col, prefix) = usage_columns(channel);
        let floor = format!("GREATEST({prefix}_used_this_month - ?, 0)");
        sub::Entity::update_many()
            .col_expr(used_col, Expr::cust_with_values(floor.as_str(), vec![n]))
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(sub::Column::Id.eq(id))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    async fn insert_pending(&self, new: NewSubscription) -> AppResult<sub::Model> {
        let txn = self.conn.begin().await?;
        // 同一学校最多保留一条待核验行
        sub::Entity::update_many()
            .col_expr(
                sub::Column::Status,
                Expr::value(SubscriptionStatus::Canceled),
            )
            .filter(sub::Column::SchoolId.eq(new.school_id))
            .filter(sub::Column::Status.eq(SubscriptionStatus::Pending))
            .exec(&txn)
            .await?;
        let model = new_active_model(new, SubscriptionStatus::Pending)
            .insert(&txn)
            .await?;
        txn.commit().await?;
        Ok(model)
    }

    async fn activate(&self, new: NewSubscription) -> AppResult<sub::Model> {
        let now = Utc::now();
        let txn = self.conn.begin().await?;

        let pending = sub::Entity::find()
            .filter(sub::Column::SchoolId.eq(new.school_id))
            .filter(sub::Column::Status.eq(SubscriptionStatus::Pending))
            .order_by_desc(sub::Column::Id)
            .one(&txn)
            .await?;

        // 旧的生效行过期（不是删除，历史行保留）
        sub::Entity::update_many()
            .col_expr(sub::Column::Status, Expr::value(SubscriptionStatus::Expired))
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(sub::Column::SchoolId.eq(new.school_id))
            .filter(sub::Column::Status.is_in([
                SubscriptionStatus::Active,
                SubscriptionStatus::GracePeriod,
            ]))
            .exec(&txn)
            .await?;

        let model = match pending {
            Some(p) if p.plan_type == new.plan_type => {
                // 匹配的 pending 行原地迁移为 active，换上新的有效期
                let pending_id = p.id;
                let mut am = p.into_active_model();
                am.status = Set(SubscriptionStatus::Active);
                am.starts_at = Set(new.starts_at);
                am.expires_at = Set(new.expires_at);
                am.grace_period_ends = Set(None);
                am.duration_days = Set(new.duration_days);
                am.sms_monthly_limit = Set(new.sms_monthly_limit);
                am.whatsapp_monthly_limit = Set(new.whatsapp_monthly_limit);
                am.sms_used_this_month = Set(0);
                am.whatsapp_used_this_month = Set(0);
                am.last_reset_date = Set(new.starts_at);
                am.payment_method = Set(new.payment_method.clone());
                am.transaction_id = Set(new.transaction_id.clone());
                am.original_amount = Set(new.original_amount);
                am.discount_amount = Set(new.discount_amount);
                am.final_amount = Set(new.final_amount);
                am.test_mode = Set(new.test_mode);
                am.updated_at = Set(Some(now));
                let model = am.update(&txn).await?;
                // 其余残留的 pending 行作废
                sub::Entity::update_many()
                    .col_expr(
                        sub::Column::Status,
                        Expr::value(SubscriptionStatus::Canceled),
                    )
                    .filter(sub::Column::SchoolId.eq(new.school_id))
                    .filter(sub::Column::Status.eq(SubscriptionStatus::Pending))
                    .filter(sub::Column::Id.ne(pending_id))
                    .exec(&txn)
                    .await?;
                model
            }
            _ => {
                sub::Entity::update_many()
                    .col_expr(
                        sub::Column::Status,
                        Expr::value(SubscriptionStatus::Canceled),
                    )
                    .filter(sub::Column::SchoolId.eq(new.school_id))
                    .filter(sub::Column::Status.eq(SubscriptionStatus::Pending))
                    .exec(&txn)
                    .await?;
                new_active_model(new, SubscriptionStatus::Active)
                    .insert(&txn)
                    .await?
            }
        };

        txn.commit().await?;
        Ok(model)
    }

    async fn cancel_current(&self, school_id: i64) -> AppResult<Option<sub::Model>> {
        let txn = self.conn.begin().await?;
        sub::Entity::update_many()
            .col_expr(
                sub::Column::Status,
                Expr::value(SubscriptionStatus::Canceled),
            )
            .col_expr(sub::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(sub::Column::SchoolId.eq(school_id))
            .filter(sub::Column::Status.is_in([
                SubscriptionStatus::Active,
                SubscriptionStatus::GracePeriod,
                SubscriptionStatus::Pending,
            ]))
            .exec(&txn)
            .await?;
        let latest = sub::Entity::find()
            .filter(sub::Column::SchoolId.eq(school_id))
            .order_by_desc(sub::Column::Id)
            .one(&txn)
            .await?;
        txn.commit().await?;
        Ok(latest)
    }
}

fn new_active_model(new: NewSubscription, status: SubscriptionStatus) -> sub::ActiveModel {
    let now = Utc::now();
    sub::ActiveModel {
        school_id: Set(new.school_id),
        plan_type: Set(new.plan_type),
        status: Set(status),
        starts_at: Set(new.starts_at),
        expires_at: Set(new.expires_at),
        grace_period_ends: Set(None),
        duration_days: Set(new.duration_days),
        sms_monthly_limit: Set(new.sms_monthly_limit),
        whatsapp_monthly_limit: Set(new.whatsapp_monthly_limit),
        sms_used_this_month: Set(0),
        whatsapp_used_this_month: Set(0),
        last_reset_date: Set(new.starts_at),
        payment_method: Set(new.payment_method),
        transaction_id: Set(new.transaction_id),
        original_amount: Set(new.original_amount),
        discount_amount: Set(new.discount_amount),
        final_amount: Set(new.final_amount),
        test_mode: Set(new.test_mode),
        created_at: Set(Some(now)),
        updated_at: Set(Some(now)),
        ..Default::default()
    }
}

#[derive(Clone)]
pub struct PgDirectoryStore {
    conn: DatabaseConnection,
}

impl PgDirectoryStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DirectoryStore for PgDirectoryStore {
    async fn school(&self, school_id: i64) -> AppResult<Option<school::Model>> {
        Ok(school::Entity::find_by_id(school_id).one(&self.conn).await?)
    }

    async fn active_students(&self, school_id: i64) -> AppResult<Vec<student::Model>> {
        Ok(student::Entity::find()
            .filter(student::Column::SchoolId.eq(school_id))
            .filter(student::Column::IsActive.eq(true))
            .all(&self.conn)
            .await?)
    }

    async fn active_teachers(&self, school_id: i64) -> AppResult<Vec<teacher::Model>> {
        Ok(teacher::Entity::find()
            .filter(teacher::Column::SchoolId.eq(school_id))
            .filter(teacher::Column::IsActive.eq(true))
            .all(&self.conn)
            .await?)
    }

    async fn students_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<student::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(student::Entity::find()
            .filter(student::Column::SchoolId.eq(school_id))
            .filter(student::Column::Id.is_in(ids.to_vec()))
            .all(&self.conn)
            .await?)
    }

    async fn teachers_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<teacher::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(teacher::Entity::find()
            .filter(teacher::Column::SchoolId.eq(school_id))
            .filter(teacher::Column::Id.is_in(ids.to_vec()))
            .all(&self.conn)
            .await?)
    }
}

#[derive(Clone)]
pub struct PgAnnouncementStore {
    conn: DatabaseConnection,
}

impl PgAnnouncementStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AnnouncementStore for PgAnnouncementStore {
    async fn insert(
        &self,
        school_id: i64,
        title: &str,
        body: &str,
        created_by: i64,
        target_roles: &[AudienceRole],
    ) -> AppResult<ann::Model> {
        let roles = serde_json::to_value(target_roles)?;
        let model = ann::ActiveModel {
            school_id: Set(school_id),
            title: Set(title.to_string()),
            body: Set(body.to_string()),
            created_by: Set(created_by),
            target_roles: Set(Some(roles)),
            created_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(model)
    }

    async fn list_for_school(&self, school_id: i64) -> AppResult<Vec<ann::Model>> {
        Ok(ann::Entity::find()
            .filter(ann::Column::SchoolId.eq(school_id))
            .order_by_desc(ann::Column::Id)
            .all(&self.conn)
            .await?)
    }
}
