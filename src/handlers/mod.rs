pub mod announcement;
pub mod subscription;

pub use announcement::announcement_config;
pub use subscription::subscription_config;
