use crate::auth::{Authority, Principal, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 持久化的用户
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i64,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub profile_image_url: String,
    pub last_login_date: Option<DateTime<Utc>>,
    pub last_login_date_display: Option<DateTime<Utc>>,
    pub join_date: DateTime<Utc>,
    pub role: Role,
    pub authorities: Vec<Authority>,
    pub active: bool,
    pub locked: bool,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal::new(self.username.clone(), self.authorities.clone())
    }

    pub fn assign_role(&mut self, role: Role) {
        self.role = role;
        self.authorities = role.authorities();
    }
}

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 注册请求
#[derive(Debug, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub username: String,
    #[validate(email)]
    pub email: String,
}

/// 管理员新增或修改用户时提交的字段
#[derive(Debug, Clone, validator::Validate)]
pub struct UserForm {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub not_locked: bool,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据格式错误: {0}")]
    Corrupt(String),
}
