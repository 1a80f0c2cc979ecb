use crate::auth::AuthError;
use crate::user::RepositoryError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use thiserror::Error;

const INTERNAL_SERVER_ERROR_MSG: &str = "An error occurred while processing the request";
const ERROR_PROCESSING_FILE: &str = "Error occurred while processing file";

/// 请求边界上的统一错误
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Username already exists")]
    UsernameExists,

    #[error("Email already exists")]
    EmailExists,

    #[error("No user found for email: {0}")]
    EmailNotFound(String),

    #[error("No user found by username: {0}")]
    UserNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("文件处理失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("密码加密失败: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("后台任务失败: {0}")]
    Background(#[from] tokio::task::JoinError),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .keys()
            .map(|k| k.to_string())
            .collect();
        fields.sort();
        AppError::Validation(format!("Invalid value for: {}", fields.join(", ")))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpErrorBody {
    pub http_status_code: u16,
    pub http_status: String,
    pub reason: String,
    pub message: String,
}

pub fn http_body(status: StatusCode, message: &str) -> HttpErrorBody {
    HttpErrorBody {
        http_status_code: status.as_u16(),
        http_status: status.canonical_reason().unwrap_or("").replace(' ', "_").to_uppercase(),
        reason: status.canonical_reason().unwrap_or("").to_uppercase(),
        message: message.to_uppercase(),
    }
}

impl AppError {
    fn client_message(&self) -> String {
        match self {
            AppError::Repository(_) | AppError::Hashing(_) | AppError::Background(_) => {
                INTERNAL_SERVER_ERROR_MSG.to_string()
            }
            AppError::Io(_) => ERROR_PROCESSING_FILE.to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(auth) => match auth {
                AuthError::BadCredentials
                | AuthError::AccountDisabled
                | AuthError::UserNotFound(_)
                | AuthError::InvalidPrincipal => StatusCode::BAD_REQUEST,
                AuthError::AccountLocked
                | AuthError::Expired
                | AuthError::InvalidSignature
                | AuthError::Malformed => StatusCode::UNAUTHORIZED,
                AuthError::MissingToken | AuthError::Forbidden => StatusCode::FORBIDDEN,
                AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::UsernameExists
            | AppError::EmailExists
            | AppError::EmailNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::FileNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Repository(_)
            | AppError::Io(_)
            | AppError::Hashing(_)
            | AppError::Background(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }
        HttpResponse::build(status).json(http_body(status, &self.client_message()))
    }
}
