//! 内存实现：单元/服务测试用，语义与 Postgres 实现保持一致。
//! 所有操作在同一把锁内完成，与数据库侧的条件更新同样是原子的。

use super::{AnnouncementStore, DirectoryStore, NewSubscription, SubscriptionStore, pick_current};
use crate::entities::{
    SubscriptionStatus, announcement_entity as ann, school_entity as school,
    student_entity as student, subscription_entity as sub, teacher_entity as teacher,
};
use crate::error::AppResult;
use crate::models::{AudienceRole, Channel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct SubscriptionsInner {
    next_id: i64,
    rows: Vec<sub::Model>,
}

#[derive(Clone, Default)]
pub struct MemorySubscriptionStore {
    inner: Arc<Mutex<SubscriptionsInner>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试基建：直接插入一行并返回
    pub async fn seed(&self, new: NewSubscription, status: SubscriptionStatus) -> sub::Model {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let model = materialize(inner.next_id, new, status);
        inner.rows.push(model.clone());
        model
    }

    pub async fn get(&self, id: i64) -> Option<sub::Model> {
        let inner = self.inner.lock().await;
        inner.rows.iter().find(|m| m.id == id).cloned()
    }
}

fn materialize(id: i64, new: NewSubscription, status: SubscriptionStatus) -> sub::Model {
    let now = Utc::now();
    sub::Model {
        id,
        school_id: new.school_id,
        plan_type: new.plan_type,
        status,
        starts_at: new.starts_at,
        expires_at: new.expires_at,
        grace_period_ends: None,
        duration_days: new.duration_days,
        sms_monthly_limit: new.sms_monthly_limit,
        whatsapp_monthly_limit: new.whatsapp_monthly_limit,
        sms_used_this_month: 0,
        whatsapp_used_this_month: 0,
        last_reset_date: new.starts_at,
        payment_method: new.payment_method,
        transaction_id: new.transaction_id,
        original_amount: new.original_amount,
        discount_amount: new.discount_amount,
        final_amount: new.final_amount,
        test_mode: new.test_mode,
        created_at: Some(now),
        updated_at: Some(now),
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn current_for_school(&self, school_id: i64) -> AppResult<Option<sub::Model>> {
        let inner = self.inner.lock().await;
        let rows: Vec<_> = inner
            .rows
            .iter()
            .filter(|m| m.school_id == school_id)
            .cloned()
            .collect();
        Ok(pick_current(rows))
    }

    async fn transition_status(
        &self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        grace_period_ends: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        for m in inner.rows.iter_mut() {
            if m.id == id && m.status == from {
                m.status = to;
                if grace_period_ends.is_some() {
                    m.grace_period_ends = grace_period_ends;
                }
                m.updated_at = Some(Utc::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reset_usage_before(
        &self,
        id: i64,
        month_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        for m in inner.rows.iter_mut() {
            if m.id == id && m.last_reset_date < month_start {
                m.sms_used_this_month = 0;
                m.whatsapp_used_this_month = 0;
                m.last_reset_date = now;
                m.updated_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reserve_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        for m in inner.rows.iter_mut() {
            if m.id == id {
                let (used, limit) = match channel {
                    Channel::Sms => (&mut m.sms_used_this_month, m.sms_monthly_limit),
                    Channel::Whatsapp => {
                        (&mut m.whatsapp_used_this_month, m.whatsapp_monthly_limit)
                    }
                };
                if *used + n <= limit {
                    *used += n;
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        Ok(false)
    }

    async fn release_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<()> {
        if n <= 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for m in inner.rows.iter_mut() {
            if m.id == id {
                let used = match channel {
                    Channel::Sms => &mut m.sms_used_this_month,
                    Channel::Whatsapp => &mut m.whatsapp_used_this_month,
                };
                *used = (*used - n).max(0);
            }
        }
        Ok(())
    }

    async fn insert_pending(&self, new: NewSubscription) -> AppResult<sub::Model> {
        let mut inner = self.inner.lock().await;
        let school_id = new.school_id;
        for m in inner.rows.iter_mut() {
            if m.school_id == school_id && m.status == SubscriptionStatus::Pending {
                m.status = SubscriptionStatus::Canceled;
            }
        }
        inner.next_id += 1;
        let model = materialize(inner.next_id, new, SubscriptionStatus::Pending);
        inner.rows.push(model.clone());
        Ok(model)
    }

    async fn activate(&self, new: NewSubscription) -> AppResult<sub::Model> {
        let mut inner = self.inner.lock().await;
        let school_id = new.school_id;
        let matching_pending = inner
            .rows
            .iter()
            .filter(|m| m.school_id == school_id && m.status == SubscriptionStatus::Pending)
            .max_by_key(|m| m.id)
            .filter(|m| m.plan_type == new.plan_type)
            .map(|m| m.id);

        for m in inner.rows.iter_mut() {
            if m.school_id != school_id {
                continue;
            }
            match m.status {
                SubscriptionStatus::Active | SubscriptionStatus::GracePeriod => {
                    m.status = SubscriptionStatus::Expired;
                }
                SubscriptionStatus::Pending if Some(m.id) != matching_pending => {
                    m.status = SubscriptionStatus::Canceled;
                }
                _ => {}
            }
        }

        if let Some(id) = matching_pending {
            let m = inner
                .rows
                .iter_mut()
                .find(|m| m.id == id)
                .expect("pending row exists");
            m.status = SubscriptionStatus::Active;
            m.starts_at = new.starts_at;
            m.expires_at = new.expires_at;
            m.grace_period_ends = None;
            m.duration_days = new.duration_days;
            m.sms_monthly_limit = new.sms_monthly_limit;
            m.whatsapp_monthly_limit = new.whatsapp_monthly_limit;
            m.sms_used_this_month = 0;
            m.whatsapp_used_this_month = 0;
            m.last_reset_date = new.starts_at;
            m.payment_method = new.payment_method.clone();
            m.transaction_id = new.transaction_id.clone();
            m.original_amount = new.original_amount;
            m.discount_amount = new.discount_amount;
            m.final_amount = new.final_amount;
            m.test_mode = new.test_mode;
            m.updated_at = Some(Utc::now());
            return Ok(m.clone());
        }

        inner.next_id += 1;
        let model = materialize(inner.next_id, new, SubscriptionStatus::Active);
        inner.rows.push(model.clone());
        Ok(model)
    }

    async fn cancel_current(&self, school_id: i64) -> AppResult<Option<sub::Model>> {
        let mut inner = self.inner.lock().await;
        for m in inner.rows.iter_mut() {
            if m.school_id == school_id
                && matches!(
                    m.status,
                    SubscriptionStatus::Active
                        | SubscriptionStatus::GracePeriod
                        | SubscriptionStatus::Pending
                )
            {
                m.status = SubscriptionStatus::Canceled;
                m.updated_at = Some(Utc::now());
            }
        }
        Ok(inner
            .rows
            .iter()
            .filter(|m| m.school_id == school_id)
            .max_by_key(|m| m.id)
            .cloned())
    }
}

#[derive(Default)]
struct DirectoryInner {
    schools: Vec<school::Model>,
    students: Vec<student::Model>,
    teachers: Vec<teacher::Model>,
}

#[derive(Clone, Default)]
pub struct MemoryDirectoryStore {
    inner: Arc<Mutex<DirectoryInner>>,
}

impl MemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_school(&self, model: school::Model) {
        self.inner.lock().await.schools.push(model);
    }

    pub async fn add_student(&self, model: student::Model) {
        self.inner.lock().await.students.push(model);
    }

    pub async fn add_teacher(&self, model: teacher::Model) {
        self.inner.lock().await.teachers.push(model);
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn school(&self, school_id: i64) -> AppResult<Option<school::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner.schools.iter().find(|s| s.id == school_id).cloned())
    }

    async fn active_students(&self, school_id: i64) -> AppResult<Vec<student::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .students
            .iter()
            .filter(|s| s.school_id == school_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn active_teachers(&self, school_id: i64) -> AppResult<Vec<teacher::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .teachers
            .iter()
            .filter(|t| t.school_id == school_id && t.is_active)
            .cloned()
            .collect())
    }

    async fn students_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<student::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .students
            .iter()
            .filter(|s| s.school_id == school_id && ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn teachers_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<teacher::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .teachers
            .iter()
            .filter(|t| t.school_id == school_id && ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct AnnouncementsInner {
    next_id: i64,
    rows: Vec<ann::Model>,
}

#[derive(Clone, Default)]
pub struct MemoryAnnouncementStore {
    inner: Arc<Mutex<AnnouncementsInner>>,
}

impl MemoryAnnouncementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnnouncementStore for MemoryAnnouncementStore {
    async fn insert(
        &self,
        school_id: i64,
        title: &str,
        body: &str,
        created_by: i64,
        target_roles: &[AudienceRole],
    ) -> AppResult<ann::Model> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let model = ann::Model {
            id: inner.next_id,
            school_id,
            title: title.to_string(),
            body: body.to_string(),
            created_by,
            target_roles: Some(serde_json::to_value(target_roles)?),
            created_at: Some(Utc::now()),
        };
        inner.rows.push(model.clone());
        Ok(model)
    }

    async fn list_for_school(&self, school_id: i64) -> AppResult<Vec<ann::Model>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner
            .rows
            .iter()
            .filter(|a| a.school_id == school_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }
}
