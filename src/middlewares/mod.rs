pub mod auth;
pub mod cors;
pub mod entitlement;

pub use auth::{AuthContext, AuthMiddleware, get_auth_context};
pub use cors::create_cors;
pub use entitlement::{EntitlementGate, get_entitlement};
