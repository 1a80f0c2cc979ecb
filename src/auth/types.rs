use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// JWT 负载，只在 token 边界使用
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64, // 毫秒
    pub exp: i64, // 毫秒
    pub authorities: Vec<String>,
}

/// 权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Authority {
    #[serde(rename = "user:read")]
    UserRead,
    #[serde(rename = "user:create")]
    UserCreate,
    #[serde(rename = "user:update")]
    UserUpdate,
    #[serde(rename = "user:delete")]
    UserDelete,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::UserRead => "user:read",
            Authority::UserCreate => "user:create",
            Authority::UserUpdate => "user:update",
            Authority::UserDelete => "user:delete",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user:read" => Ok(Authority::UserRead),
            "user:create" => Ok(Authority::UserCreate),
            "user:update" => Ok(Authority::UserUpdate),
            "user:delete" => Ok(Authority::UserDelete),
            _ => Err(AuthError::Malformed),
        }
    }
}

/// 角色，每个角色对应一组有序的权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ROLE_USER")]
    User,
    #[serde(rename = "ROLE_HR")]
    Hr,
    #[serde(rename = "ROLE_MANAGER")]
    Manager,
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
    #[serde(rename = "ROLE_SUPER_ADMIN")]
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "ROLE_USER",
            Role::Hr => "ROLE_HR",
            Role::Manager => "ROLE_MANAGER",
            Role::Admin => "ROLE_ADMIN",
            Role::SuperAdmin => "ROLE_SUPER_ADMIN",
        }
    }

    pub fn authorities(&self) -> Vec<Authority> {
        use Authority::*;
        match self {
            Role::User => vec![UserRead],
            Role::Hr | Role::Manager => vec![UserRead, UserUpdate],
            Role::Admin => vec![UserRead, UserCreate, UserUpdate],
            Role::SuperAdmin => vec![UserRead, UserCreate, UserUpdate, UserDelete],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// 大小写不敏感，和表单里传来的角色名保持兼容
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ROLE_USER" => Ok(Role::User),
            "ROLE_HR" => Ok(Role::Hr),
            "ROLE_MANAGER" => Ok(Role::Manager),
            "ROLE_ADMIN" => Ok(Role::Admin),
            "ROLE_SUPER_ADMIN" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// 签发 token 时使用的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub authorities: Vec<Authority>,
}

impl Principal {
    pub fn new(username: impl Into<String>, authorities: Vec<Authority>) -> Self {
        Self {
            username: username.into(),
            authorities,
        }
    }
}

/// 校验通过后从 token 中恢复的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub authorities: Vec<Authority>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_authority(&self, authority: Authority) -> bool {
        self.authorities.contains(&authority)
    }
}

/// 登录失败计数
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub count: u32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token cannot be decoded")]
    Malformed,

    #[error("token requires a subject and at least one authority")]
    InvalidPrincipal,

    #[error("token cannot be signed: {0}")]
    Signing(String),

    #[error("token signature cannot be verified")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("No user found by username: {0}")]
    UserNotFound(String),

    #[error("Username / Password incorrect. Please try again")]
    BadCredentials,

    #[error("Your account has been locked. Please contact administration")]
    AccountLocked,

    #[error("Your account has been disabled. If this is an error, please contact administration")]
    AccountDisabled,

    #[error("You need to log in to access this page")]
    MissingToken,

    #[error("You do not have enough permission")]
    Forbidden,
}
