//! Business logic services layer

pub mod auth_service;
pub mod security_service;

pub use auth_service::AuthService;
pub use security_service::SecurityService;
