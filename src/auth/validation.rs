//! 登录与注册输入校验

use crate::{
    auth::password::PasswordHasher,
    config::SecurityConfig,
    models::{
        auth::LoginRequest,
        user::{RegisterRequest, UserRole},
    },
};
use once_cell::sync::Lazy;
use regex::Regex;
use validator::{Validate, ValidationErrors};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex")
});

static NICKNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("nickname regex"));

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

/// 返回所有错误消息；为空表示通过
pub fn validate_login(req: &LoginRequest) -> Vec<String> {
    let mut errors = Vec::new();

    if !is_valid_email(&req.email) {
        errors.push("Email non valida".to_string());
    }
    if req.password.is_empty() {
        errors.push("La password è obbligatoria".to_string());
    }

    errors
}

/// 长度等规则作用于去除空白后的值
pub fn validate_registration(req: &RegisterRequest, policy: &SecurityConfig) -> Vec<String> {
    let req = req.normalized();
    let mut errors = match req.validate() {
        Ok(()) => Vec::new(),
        Err(e) => collect_messages(&e),
    };

    // validator 的 email 规则较宽松，统一使用同一规则
    if !is_valid_email(&req.email) && !errors.iter().any(|m| m == "Email non valida") {
        errors.push("Email non valida".to_string());
    }

    if !req.nickname.is_empty() && !NICKNAME_RE.is_match(&req.nickname) {
        errors.push(
            "Il nickname può contenere solo lettere, numeri, punti, trattini e underscore"
                .to_string(),
        );
    }

    // 管理员账户只能通过 `bostarter create-admin` 创建
    if req.tipo_utente == Some(UserRole::Amministratore) {
        errors.push("Tipo utente non valido".to_string());
    }

    errors.extend(PasswordHasher::validate_password_policy(&req.password, policy));
    errors
}

fn collect_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    // 按字段名排序，保证输出稳定
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| {
                err.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Campo non valido: {}", field))
            })
        })
        .collect()
}
