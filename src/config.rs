//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

/// 持久化后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// 进程内存储，仅用于开发和测试
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 登录失败计数策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedAttemptPolicy {
    /// 记录失败次数，达到上限后锁定
    Enforced,
    /// 不记录失败次数
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 登录尝试计数键的盐值
    pub attempt_salt: Secret<String>,
    /// 密码最小长度
    pub password_min_length: usize,
    /// 密码必须包含大写字母
    pub password_require_uppercase: bool,
    /// 密码必须包含数字
    pub password_require_digit: bool,
    /// 登录失败计数策略
    pub failed_attempt_policy: FailedAttemptPolicy,
    /// 最大登录失败次数
    pub max_login_attempts: u32,
    /// 登录锁定持续时间（秒）
    pub login_lockout_secs: u64,
    /// CSRF 令牌有效期（秒）
    pub csrf_token_ttl_secs: i64,
    /// 是否对变更请求校验 CSRF
    pub csrf_protection: bool,
    /// 是否启用请求限流
    pub rate_limit_enabled: bool,
    /// 全局 API 限流：窗口内最大请求数
    pub api_rate_limit_max: i64,
    /// 全局 API 限流窗口（秒）
    pub api_rate_limit_window_secs: i64,
    /// 登录限流（按 IP，与会话无关）：窗口内最大登录请求数
    pub login_rate_limit_max: i64,
    /// 登录限流窗口（秒）
    pub login_rate_limit_window_secs: i64,
    /// 是否记录安全事件
    pub log_security_events: bool,
    /// IP 封禁持续时间（秒）
    pub block_duration_secs: i64,
    /// 封禁状态缓存时间（秒）
    pub block_cache_ttl_secs: i64,
    /// 安全事件保留天数
    pub event_retention_days: i64,
    /// 是否信任代理转发头
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// 会话 Cookie 名称
    pub cookie_name: String,
    /// 是否设置 Secure 标志
    pub cookie_secure: bool,
    /// 无活动会话生命周期（秒）
    pub lifetime_secs: i64,
    /// 会话 ID 轮换间隔（秒）
    pub regenerate_after_secs: i64,
    /// 记住我令牌有效期（天）
    pub remember_days: i64,
}

/// 活动日志后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityBackend {
    Mongo,
    /// 仅写本地文件
    File,
    /// 丢弃所有条目
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityLogConfig {
    pub backend: ActivityBackend,
    /// 文档存储连接串
    pub mongo_uri: Secret<String>,
    pub mongo_database: String,
    pub connect_timeout_secs: u64,
    pub server_selection_timeout_secs: u64,
    /// 本地回退文件
    pub file_path: String,
    /// 缓冲区达到该大小时触发刷新
    pub batch_size: usize,
    /// 后台定时刷新间隔（秒）
    pub flush_interval_secs: u64,
    /// 存储不可用后重新探测间隔（秒）
    pub retry_after_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub activity_log: ActivityLogConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.url", "postgresql://localhost/bostarter")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("storage.backend", "postgres")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.attempt_salt", "bostarter-change-this-salt")?
            .set_default("security.password_min_length", 6)?
            .set_default("security.password_require_uppercase", false)?
            .set_default("security.password_require_digit", false)?
            .set_default("security.failed_attempt_policy", "enforced")?
            .set_default("security.max_login_attempts", 10)?
            .set_default("security.login_lockout_secs", 900)?
            .set_default("security.csrf_token_ttl_secs", 3600)?
            .set_default("security.csrf_protection", true)?
            .set_default("security.rate_limit_enabled", true)?
            .set_default("security.api_rate_limit_max", 120)?
            .set_default("security.api_rate_limit_window_secs", 60)?
            .set_default("security.login_rate_limit_max", 30)?
            .set_default("security.login_rate_limit_window_secs", 300)?
            .set_default("security.log_security_events", true)?
            .set_default("security.block_duration_secs", 3600)?
            .set_default("security.block_cache_ttl_secs", 300)?
            .set_default("security.event_retention_days", 30)?
            .set_default("security.trust_proxy", true)?
            .set_default("session.cookie_name", "BOSTARTER_SESSID")?
            .set_default("session.cookie_secure", false)?
            .set_default("session.lifetime_secs", 1800)?
            .set_default("session.regenerate_after_secs", 300)?
            .set_default("session.remember_days", 30)?
            .set_default("activity_log.backend", "file")?
            .set_default("activity_log.mongo_uri", "mongodb://localhost:27017")?
            .set_default("activity_log.mongo_database", "bostarter_logs")?
            .set_default("activity_log.connect_timeout_secs", 3)?
            .set_default("activity_log.server_selection_timeout_secs", 2)?
            .set_default("activity_log.file_path", "logs/activity.log")?
            .set_default("activity_log.batch_size", 100)?
            .set_default("activity_log.flush_interval_secs", 10)?
            .set_default("activity_log.retry_after_secs", 60)?;

        // 从环境变量加载配置（前缀为 BOSTARTER_）
        settings = settings.add_source(
            Environment::with_prefix("BOSTARTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message(
                        "Server port should be >= 1024".to_string(),
                    ));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        if self.security.attempt_salt.expose_secret().len() < 16 {
            return Err(ConfigError::Message(
                "attempt_salt must be at least 16 characters long".to_string(),
            ));
        }

        if self.security.password_min_length < 6 || self.security.password_min_length > 128 {
            return Err(ConfigError::Message(
                "password_min_length must be between 6 and 128".to_string(),
            ));
        }

        if self.security.max_login_attempts < 1 || self.security.max_login_attempts > 50 {
            return Err(ConfigError::Message(
                "max_login_attempts must be between 1 and 50".to_string(),
            ));
        }

        if self.security.api_rate_limit_max < 1 || self.security.api_rate_limit_window_secs < 1 {
            return Err(ConfigError::Message(
                "api rate limit max and window must be positive".to_string(),
            ));
        }

        if self.security.login_rate_limit_max < 1 || self.security.login_rate_limit_window_secs < 1
        {
            return Err(ConfigError::Message(
                "login rate limit max and window must be positive".to_string(),
            ));
        }

        if self.session.lifetime_secs < 60 {
            return Err(ConfigError::Message(
                "session.lifetime_secs must be at least 60".to_string(),
            ));
        }

        if self.activity_log.batch_size == 0 {
            return Err(ConfigError::Message(
                "activity_log.batch_size must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "BOSTARTER_SERVER__ADDR",
            "BOSTARTER_LOGGING__LEVEL",
            "BOSTARTER_SECURITY__MAX_LOGIN_ATTEMPTS",
            "BOSTARTER_SECURITY__FAILED_ATTEMPT_POLICY",
            "BOSTARTER_STORAGE__BACKEND",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:3000");
        assert_eq!(config.session.lifetime_secs, 1800);
        assert_eq!(config.session.regenerate_after_secs, 300);
        assert_eq!(config.security.csrf_token_ttl_secs, 3600);
        assert_eq!(config.security.max_login_attempts, 10);
        assert_eq!(config.security.failed_attempt_policy, FailedAttemptPolicy::Enforced);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.activity_log.batch_size, 100);
    }

    #[test]
    #[serial]
    fn test_config_env_override() {
        clear_env();
        std::env::set_var("BOSTARTER_SECURITY__FAILED_ATTEMPT_POLICY", "disabled");
        std::env::set_var("BOSTARTER_STORAGE__BACKEND", "memory");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.security.failed_attempt_policy, FailedAttemptPolicy::Disabled);
        assert_eq!(config.storage.backend, StorageBackend::Memory);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_port() {
        clear_env();
        std::env::set_var("BOSTARTER_SERVER__ADDR", "0.0.0.0:80");

        assert!(AppConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("BOSTARTER_LOGGING__LEVEL", "invalid");

        assert!(AppConfig::from_env().is_err());

        clear_env();
    }
}
