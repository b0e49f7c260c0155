//! BOSTARTER 核心服务
//! 会话认证、安全限流与活动日志

pub mod activity;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod session;
pub mod telemetry;
