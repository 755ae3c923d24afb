pub mod announcements;
pub mod schools;
pub mod students;
pub mod subscriptions;
pub mod teachers;

pub use announcements as announcement_entity;
pub use schools as school_entity;
pub use students as student_entity;
pub use subscriptions as subscription_entity;
pub use teachers as teacher_entity;

pub use subscriptions::{PlanType, SubscriptionStatus};
