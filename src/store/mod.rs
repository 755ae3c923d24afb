pub mod memory;
pub mod postgres;

use crate::entities::{
    PlanType, SubscriptionStatus, announcement_entity as ann, school_entity as school,
    student_entity as student, subscription_entity as sub, teacher_entity as teacher,
};
use crate::error::AppResult;
use crate::models::{AudienceRole, Channel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::{MemoryAnnouncementStore, MemoryDirectoryStore, MemorySubscriptionStore};
pub use postgres::{PgAnnouncementStore, PgDirectoryStore, PgSubscriptionStore};

/// 新订阅行的字段（id / 时间戳由存储层补齐）
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub school_id: i64,
    pub plan_type: PlanType,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub duration_days: i32,
    pub sms_monthly_limit: i64,
    pub whatsapp_monthly_limit: i64,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub test_mode: bool,
}

/// 订阅持久化抽象。
///
/// 所有跨请求的并发控制都收敛到这里的条件更新原语：
/// 状态迁移以"先前观察到的状态"为条件，配额预留是单条
/// "足额才累加"的原子更新，而不是 N 次读-改-写。
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 学校当前权威的订阅行。
    ///
    /// 行从不硬删，一个学校可能积累多行历史；挑选优先级为
    /// active/grace_period > pending > 最新的历史行。
    async fn current_for_school(&self, school_id: i64) -> AppResult<Option<sub::Model>>;

    /// 条件状态迁移：仅当存储中的状态仍为 `from` 时生效。
    /// 返回是否真的写入，并发重放时恰好一个调用者返回 true。
    async fn transition_status(
        &self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        grace_period_ends: Option<DateTime<Utc>>,
    ) -> AppResult<bool>;

    /// 月度懒重置：last_reset_date 早于 `month_start` 时把两个
    /// 用量计数器清零。条件更新，任意多个并发调用者只生效一次。
    async fn reset_usage_before(
        &self,
        id: i64,
        month_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// 足额才预留：`used + n <= limit` 时一次性累加 n 并返回 true，
    /// 否则不动计数器返回 false。
    async fn reserve_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<bool>;

    /// 归还未用完的预留量
    async fn release_usage(&self, id: i64, channel: Channel, n: i64) -> AppResult<()>;

    /// 发起付款：取消该校其他 pending 行后插入一条新 pending 行
    async fn insert_pending(&self, new: NewSubscription) -> AppResult<sub::Model>;

    /// 付款核验通过：让旧的 active/grace 行过期、多余的 pending 行作废，
    /// 以新的有效期激活（匹配的 pending 行原地迁移，否则插入新行）。
    /// 整体在一个事务里，保证任一时刻最多一行 active/grace。
    async fn activate(&self, new: NewSubscription) -> AppResult<sub::Model>;

    /// 显式取消：current 行 → canceled（终态）
    async fn cancel_current(&self, school_id: i64) -> AppResult<Option<sub::Model>>;
}

/// 学校与师生读模型，仅用于学年上下文与受众展开（协作方数据，非本核心所有）
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn school(&self, school_id: i64) -> AppResult<Option<school::Model>>;
    async fn active_students(&self, school_id: i64) -> AppResult<Vec<student::Model>>;
    async fn active_teachers(&self, school_id: i64) -> AppResult<Vec<teacher::Model>>;
    async fn students_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<student::Model>>;
    async fn teachers_by_ids(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<teacher::Model>>;
}

#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    /// 公告先落库，扇出只是后续的 best-effort 副作用
    async fn insert(
        &self,
        school_id: i64,
        title: &str,
        body: &str,
        created_by: i64,
        target_roles: &[AudienceRole],
    ) -> AppResult<ann::Model>;

    async fn list_for_school(&self, school_id: i64) -> AppResult<Vec<ann::Model>>;
}

/// current 行挑选规则，两个实现共用
pub(crate) fn pick_current(mut rows: Vec<sub::Model>) -> Option<sub::Model> {
    // 新行优先
    rows.sort_by(|a, b| b.id.cmp(&a.id));
    if let Some(m) = rows
        .iter()
        .find(|m| {
            matches!(
                m.status,
                SubscriptionStatus::Active | SubscriptionStatus::GracePeriod
            )
        })
        .cloned()
    {
        return Some(m);
    }
    if let Some(m) = rows
        .iter()
        .find(|m| m.status == SubscriptionStatus::Pending)
        .cloned()
    {
        return Some(m);
    }
    rows.into_iter().next()
}
