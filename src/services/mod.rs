pub mod announcement_service;
pub mod audience_service;
pub mod entitlement_service;
pub mod notification_service;
pub mod quota_service;
pub mod subscription_service;

pub use announcement_service::*;
pub use audience_service::*;
pub use entitlement_service::*;
pub use notification_service::*;
pub use quota_service::*;
pub use subscription_service::*;
