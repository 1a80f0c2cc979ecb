use bcrypt::{hash, verify, DEFAULT_COST};
use log::{debug, error, warn};
use rand::distributions::{Alphanumeric, Uniform};
use rand::{thread_rng, Rng};
use tokio::task;

use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self { cost: DEFAULT_COST }
    }

    #[cfg(test)]
    pub fn fast() -> Self {
        Self { cost: 4 }
    }

    pub fn hash(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        debug!("加密密码");
        hash(password.as_bytes(), self.cost).map_err(|e| {
            error!("密码加密失败: {}", e);
            e
        })
    }

    /// 哈希格式损坏也按密码错误处理
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        debug!("验证密码");
        match verify(password, hash) {
            Ok(result) => result,
            Err(e) => {
                warn!("密码验证过程出错: {}", e);
                false
            }
        }
    }
}

impl PasswordHasher {
    /// bcrypt 在阻塞线程池上执行，不占用 actix worker
    pub async fn hash_blocking(&self, password: &str) -> Result<String, AppError> {
        let hasher = *self;
        let password = password.to_string();
        let hashed = task::spawn_blocking(move || hasher.hash(&password)).await??;
        Ok(hashed)
    }

    pub async fn verify_blocking(&self, password: &str, hash: &str) -> bool {
        let hasher = *self;
        let password = password.to_string();
        let hash = hash.to_string();
        match task::spawn_blocking(move || hasher.verify(&password, &hash)).await {
            Ok(result) => result,
            Err(e) => {
                error!("密码验证任务失败: {}", e);
                false
            }
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// 10 位字母数字的随机密码
pub fn generate_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// 10 位数字的用户编号
pub fn generate_user_id() -> String {
    let digits = Uniform::from(0..10u8);
    thread_rng()
        .sample_iter(digits)
        .take(10)
        .map(|d| char::from(b'0' + d))
        .collect()
}
