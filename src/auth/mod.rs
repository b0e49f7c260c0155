//! Authentication building blocks: passwords, CSRF, attempt counters, remember-me

pub mod attempts;
pub mod csrf;
pub mod middleware;
pub mod password;
pub mod remember;
pub mod validation;

pub use attempts::AttemptTracker;
pub use middleware::{require_auth_middleware, AuthContext};
pub use password::PasswordHasher;
