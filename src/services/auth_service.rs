//! 认证服务：登录、注册、登出、会话校验、CSRF 与登录尝试计数
//!
//! 公开方法以 `AuthError` 为边界，基础设施错误在这里记录后折叠为 `AuthError::Internal`。

use crate::{
    activity::{ActivityLogger, LogContext},
    auth::{
        csrf,
        remember::{self, PREFERENCE_COOKIES, REMEMBER_COOKIE},
        validation, AttemptTracker, PasswordHasher,
    },
    clock::Clock,
    config::AppConfig,
    context::RequestContext,
    error::{AppError, AuthError},
    models::{
        auth::{AuthSuccess, LoginRequest, RateLimitStatus, RememberCookie, RememberToken},
        security::SecurityEventType,
        user::{NewUser, RegisterRequest, User, UserRole, UserSnapshot},
    },
    repository::{RememberTokenStore, UserStore},
    services::SecurityService,
    session::random_token,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

/// 内部结果：业务拒绝或基础设施错误
enum Failure {
    Rejected(AuthError),
    Internal(AppError),
}

impl From<AuthError> for Failure {
    fn from(e: AuthError) -> Self {
        Failure::Rejected(e)
    }
}

impl From<AppError> for Failure {
    fn from(e: AppError) -> Self {
        Failure::Internal(e)
    }
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    remember_tokens: Arc<dyn RememberTokenStore>,
    security: Arc<SecurityService>,
    logger: Arc<ActivityLogger>,
    hasher: PasswordHasher,
    attempts: AttemptTracker,
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        remember_tokens: Arc<dyn RememberTokenStore>,
        security: Arc<SecurityService>,
        logger: Arc<ActivityLogger>,
        hasher: PasswordHasher,
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempts: AttemptTracker::new(&config.security),
            users,
            remember_tokens,
            security,
            logger,
            hasher,
            config,
            clock,
        }
    }

    /// 用户登录
    pub async fn login(
        &self,
        ctx: &mut RequestContext,
        req: &LoginRequest,
    ) -> Result<AuthSuccess, AuthError> {
        let errors = validation::validate_login(req);
        if !errors.is_empty() {
            return Err(AuthError::Validation(errors));
        }

        // 按 IP 限流，丢弃会话 Cookie 也无法绕过
        let limit_key = format!("login:{}", ctx.client_ip);
        let allowed = self
            .security
            .check_request_limit(
                ctx,
                &limit_key,
                self.config.security.login_rate_limit_max,
                self.config.security.login_rate_limit_window_secs,
            )
            .await;
        if !allowed {
            return Err(AuthError::RateLimitExceeded);
        }

        let started = std::time::Instant::now();
        let result = self.try_login(ctx, req).await;
        let result = self.settle(ctx, "login", &req.email, result).await;

        self.logger
            .log_performance(
                &LogContext::from(&*ctx),
                "login",
                started.elapsed().as_secs_f64() * 1000.0,
                json!({ "success": result.is_ok() }),
            )
            .await;

        result
    }

    async fn try_login(
        &self,
        ctx: &mut RequestContext,
        req: &LoginRequest,
    ) -> Result<AuthSuccess, Failure> {
        let now = self.clock.now();
        let email = req.email.trim();
        let key = self.attempts.key(email, &ctx.client_ip);

        let status = self.attempts.status(&mut ctx.session, &key, now);
        if let Some(until) = status.lockout_expires_at {
            return Err(AuthError::Blocked {
                retry_after_secs: (until - now).num_seconds().max(1),
            }
            .into());
        }

        let user = self.users.find_by_email(email).await?;
        let verified = match &user {
            Some(user) => self.hasher.verify(&req.password, &user.password_hash)?,
            None => self.hasher.verify_dummy(&req.password)?,
        };

        let user = match user {
            Some(user) if verified => user,
            _ => {
                self.record_failed_attempt(ctx, &key, email, now).await;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let snapshot = self.establish_session(ctx, &user, now).await?;
        self.attempts.reset(&mut ctx.session, &key);

        if req.remember_me {
            self.issue_remember_token(ctx, &user, now).await?;
        }

        self.logger
            .log_user_action(
                &LogContext::from(&*ctx),
                "login",
                json!({ "email": user.email, "remember_me": req.remember_me }),
            )
            .await;

        tracing::info!(user_id = user.id, "User logged in");
        Ok(AuthSuccess::new(snapshot))
    }

    async fn record_failed_attempt(
        &self,
        ctx: &mut RequestContext,
        key: &str,
        email: &str,
        now: DateTime<Utc>,
    ) {
        let status = self.attempts.record_failure(&mut ctx.session, key, now);

        self.security
            .log_security_event(
                ctx,
                SecurityEventType::FailedLogin,
                json!({ "email": email, "attempts": status.attempts }),
                None,
                None,
            )
            .await;

        if status.blocked {
            tracing::warn!(ip = %ctx.client_ip, "Login locked after repeated failures");
            self.security
                .log_security_event(
                    ctx,
                    SecurityEventType::AccountLocked,
                    json!({
                        "email": email,
                        "attempts": status.attempts,
                        "lockout_expires_at": status.lockout_expires_at,
                    }),
                    None,
                    None,
                )
                .await;
        }
    }

    /// 用户注册，成功后直接建立会话
    pub async fn register(
        &self,
        ctx: &mut RequestContext,
        req: &RegisterRequest,
    ) -> Result<AuthSuccess, AuthError> {
        let req = req.normalized();
        let errors = validation::validate_registration(&req, &self.config.security);
        if !errors.is_empty() {
            return Err(AuthError::Validation(errors));
        }

        let result = self.try_register(ctx, &req).await;
        self.settle(ctx, "register", &req.email, result).await
    }

    async fn try_register(
        &self,
        ctx: &mut RequestContext,
        req: &RegisterRequest,
    ) -> Result<AuthSuccess, Failure> {
        let now = self.clock.now();
        let role = req.tipo_utente.unwrap_or(UserRole::Standard);
        let user = self.insert_user(req, role, now).await?;

        let snapshot = self.establish_session(ctx, &user, now).await?;

        self.logger
            .log_user_action(
                &LogContext::from(&*ctx),
                "register",
                json!({ "email": user.email, "nickname": user.nickname, "role": user.tipo_utente }),
            )
            .await;

        tracing::info!(user_id = user.id, "User registered");
        Ok(AuthSuccess::new(snapshot))
    }

    /// 检查重复后写入新用户
    async fn insert_user(
        &self,
        req: &RegisterRequest,
        role: UserRole,
        now: DateTime<Utc>,
    ) -> Result<User, Failure> {
        if self.users.email_exists(&req.email).await? {
            return Err(AuthError::DuplicateEmail.into());
        }
        if self.users.nickname_exists(&req.nickname).await? {
            return Err(AuthError::DuplicateNickname.into());
        }

        let new_user = NewUser {
            email: req.email.clone(),
            nickname: req.nickname.clone(),
            password_hash: self.hasher.hash(&req.password)?,
            nome: req.nome.clone(),
            cognome: req.cognome.clone(),
            anno_nascita: req.anno_nascita,
            luogo_nascita: req.luogo_nascita.clone(),
            tipo_utente: role,
        };

        // 并发注册时由唯一约束兜底
        match self.users.create(&new_user, now).await {
            Ok(user) => Ok(user),
            Err(AppError::Conflict(field)) if field == "nickname" => {
                Err(AuthError::DuplicateNickname.into())
            }
            Err(e) if e.is_unique_violation() => Err(AuthError::DuplicateEmail.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// 创建管理员账户，供 `bostarter create-admin` 使用；不建立会话
    pub async fn create_admin(&self, req: &RegisterRequest) -> Result<UserSnapshot, AuthError> {
        let req = RegisterRequest {
            tipo_utente: None,
            ..req.normalized()
        };
        let errors = validation::validate_registration(&req, &self.config.security);
        if !errors.is_empty() {
            return Err(AuthError::Validation(errors));
        }

        match self
            .insert_user(&req, UserRole::Amministratore, self.clock.now())
            .await
        {
            Ok(user) => {
                tracing::info!(user_id = user.id, "Administrator created");
                Ok(UserSnapshot::from(&user))
            }
            Err(Failure::Rejected(e)) => Err(e),
            Err(Failure::Internal(e)) => {
                tracing::error!(operation = "create_admin", error = %e, "Authentication error");
                Err(AuthError::Internal)
            }
        }
    }

    /// 更换会话 ID 并写入用户快照
    async fn establish_session(
        &self,
        ctx: &mut RequestContext,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<UserSnapshot, AppError> {
        let snapshot = UserSnapshot::from(user);

        ctx.session.regenerate_id();
        let data = ctx.session.data_mut();
        data.user_id = Some(user.id);
        data.login_time = Some(now);
        data.last_activity = Some(now);
        data.last_regeneration = Some(now);
        data.user = Some(snapshot.clone());

        self.users.touch_last_access(user.id, now).await?;

        Ok(snapshot)
    }

    async fn issue_remember_token(
        &self,
        ctx: &mut RequestContext,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let token = random_token(32);
        let expires_at = now + Duration::days(self.config.session.remember_days);

        self.remember_tokens
            .store(&RememberToken {
                user_id: user.id,
                token_hash: remember::hash_token(&token),
                expires_at,
            })
            .await?;

        let value = remember::encode_cookie(&RememberCookie {
            email: user.email.clone(),
            token,
            expiry: expires_at.timestamp(),
        })
        .map_err(|e| AppError::Internal(e.to_string()))?;

        ctx.set_cookie(
            REMEMBER_COOKIE,
            value,
            (expires_at - now).num_seconds(),
            true,
        );

        Ok(())
    }

    /// 内部错误统一记录并转换
    async fn settle<T>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        email: &str,
        result: Result<T, Failure>,
    ) -> Result<T, AuthError> {
        match result {
            Ok(value) => Ok(value),
            Err(Failure::Rejected(e)) => Err(e),
            Err(Failure::Internal(e)) => {
                tracing::error!(operation = %operation, error = %e, "Authentication error");
                self.logger
                    .log_error(
                        &LogContext::from(ctx),
                        &e.to_string(),
                        json!({
                            "operation": operation,
                            "email": email,
                            "file": file!(),
                            "line": line!(),
                        }),
                    )
                    .await;
                Err(AuthError::Internal)
            }
        }
    }

    /// 登出并清除记住我与偏好 Cookie；可重复调用
    pub async fn logout(&self, ctx: &mut RequestContext) {
        let now = self.clock.now();
        let data = ctx.session.data();

        if let Some(user_id) = data.user_id {
            let duration_secs = data
                .login_time
                .map(|t| (now - t).num_seconds())
                .unwrap_or_default();
            self.logger
                .log_user_action(
                    &LogContext::from(&*ctx),
                    "logout",
                    json!({ "session_duration_secs": duration_secs }),
                )
                .await;
            tracing::info!(user_id, duration_secs, "User logged out");
        }

        if let Some(cookie) = ctx.cookie(REMEMBER_COOKIE).and_then(remember::decode_cookie) {
            let hash = remember::hash_token(&cookie.token);
            if let Err(e) = self.remember_tokens.delete_by_hash(&hash).await {
                tracing::error!(error = %e, "Failed to delete remember token");
            }
        }

        ctx.clear_cookie(REMEMBER_COOKIE);
        for name in PREFERENCE_COOKIES {
            ctx.clear_cookie(name);
        }

        ctx.session.destroy();
    }

    /// 会话是否已登录；超时的会话会被登出
    pub async fn is_authenticated(&self, ctx: &mut RequestContext) -> bool {
        let now = self.clock.now();
        let data = ctx.session.data();

        let (Some(_), Some(login_time)) = (data.user_id, data.login_time) else {
            return false;
        };

        let last_activity = data.last_activity.unwrap_or(login_time);
        if now - last_activity > Duration::seconds(self.config.session.lifetime_secs) {
            tracing::info!(user_id = ?data.user_id, "Session expired");
            self.logout(ctx).await;
            return false;
        }

        let regenerate_after = Duration::seconds(self.config.session.regenerate_after_secs);
        let stale = data
            .last_regeneration
            .map_or(true, |at| now - at > regenerate_after);
        if stale {
            ctx.session.regenerate_id();
            ctx.session.data_mut().last_regeneration = Some(now);
        }

        ctx.session.data_mut().last_activity = Some(now);
        true
    }

    /// 会话中的用户快照（不做超时校验）
    pub fn current_user(&self, ctx: &RequestContext) -> Option<UserSnapshot> {
        let data = ctx.session.data();
        data.user_id.and(data.login_time)?;
        data.user.clone()
    }

    /// 用记住我 Cookie 恢复会话
    pub async fn resume_from_remember_token(&self, ctx: &mut RequestContext) -> bool {
        if ctx.session.data().user_id.is_some() {
            return false;
        }
        let Some(raw) = ctx.cookie(REMEMBER_COOKIE).map(str::to_string) else {
            return false;
        };

        match self.try_resume(ctx, &raw).await {
            Ok(true) => true,
            Ok(false) => {
                ctx.clear_cookie(REMEMBER_COOKIE);
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to resume session from remember token");
                false
            }
        }
    }

    async fn try_resume(&self, ctx: &mut RequestContext, raw: &str) -> Result<bool, AppError> {
        let now = self.clock.now();
        let Some(cookie) = remember::decode_cookie(raw) else {
            return Ok(false);
        };
        if cookie.expiry <= now.timestamp() {
            return Ok(false);
        }

        let hash = remember::hash_token(&cookie.token);
        let Some(token) = self.remember_tokens.find_valid(&hash, now).await? else {
            return Ok(false);
        };

        let user = match self.users.find_by_id(token.user_id).await? {
            Some(user) if user.email.eq_ignore_ascii_case(&cookie.email) => user,
            _ => return Ok(false),
        };

        self.establish_session(ctx, &user, now).await?;
        self.logger
            .log_user_action(&LogContext::from(&*ctx), "remember_login", json!({}))
            .await;

        Ok(true)
    }

    pub fn generate_csrf_token(&self, ctx: &mut RequestContext) -> String {
        csrf::issue(
            &mut ctx.session,
            self.clock.now(),
            self.config.security.csrf_token_ttl_secs,
        )
    }

    pub fn verify_csrf_token(&self, ctx: &RequestContext, token: &str) -> bool {
        csrf::verify(
            &ctx.session,
            token,
            self.clock.now(),
            self.config.security.csrf_token_ttl_secs,
        )
    }

    pub fn get_rate_limit_status(
        &self,
        ctx: &mut RequestContext,
        identifier: &str,
    ) -> RateLimitStatus {
        let key = self.attempts.key(identifier, &ctx.client_ip);
        self.attempts.status(&mut ctx.session, &key, self.clock.now())
    }

    pub fn reset_rate_limit(&self, ctx: &mut RequestContext, identifier: &str) {
        let key = self.attempts.key(identifier, &ctx.client_ip);
        self.attempts.reset(&mut ctx.session, &key);
    }
}
