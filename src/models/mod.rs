pub mod announcement;
pub mod common;
pub mod subscription;

pub use announcement::*;
pub use common::*;
pub use subscription::*;
