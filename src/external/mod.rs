pub mod email;
pub mod sms;

pub use email::*;
pub use sms::*;
