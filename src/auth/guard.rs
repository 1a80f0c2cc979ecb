use crate::auth::{AttemptTracker, AuthError, PasswordHasher, TokenCodec};
use crate::clock::Clock;
use crate::error::AppError;
use crate::user::{User, UserRepository};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub token: String,
}

/// 登录校验：维护锁定状态并在成功时签发 token
pub struct AccountGuard {
    users: Arc<dyn UserRepository>,
    tracker: Arc<AttemptTracker>,
    codec: Arc<TokenCodec>,
    hasher: Arc<PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl AccountGuard {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tracker: Arc<AttemptTracker>,
        codec: Arc<TokenCodec>,
        hasher: Arc<PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            tracker,
            codec,
            hasher,
            clock,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AppError> {
        debug!("尝试登录用户: {}", username);

        let mut user = match self.users.find_by_username(username).await? {
            Some(user) => user,
            None => {
                warn!("用户 {} 不存在", username);
                return Err(AuthError::UserNotFound(username.to_string()).into());
            }
        };

        let credentials_ok = self.hasher.verify_blocking(password, &user.password).await;
        if !credentials_ok {
            self.tracker.record_failed_attempt(&user.username);
        }

        self.validate_login_attempt(&mut user).await?;

        if user.locked {
            warn!("用户 {} 已被锁定", user.username);
            return Err(AuthError::AccountLocked.into());
        }
        if !user.active {
            warn!("用户 {} 已被禁用", user.username);
            return Err(AuthError::AccountDisabled.into());
        }
        if !credentials_ok {
            warn!("用户 {} 密码错误", user.username);
            return Err(AuthError::BadCredentials.into());
        }

        self.tracker.evict(&user.username);
        user.last_login_date_display = user.last_login_date;
        user.last_login_date = Some(self.clock.now());
        let user = self.users.save(user).await?;

        let token = self.codec.issue(&user.principal())?;
        info!("用户 {} 登录成功", user.username);
        Ok(LoginOutcome { user, token })
    }

    // locked 标记每次登录都按计数器的当前状态重新计算；计数器过期后自动解锁
    async fn validate_login_attempt(&self, user: &mut User) -> Result<(), AppError> {
        let locked = self.tracker.has_exceeded_max_attempts(&user.username);
        if user.locked && !locked {
            self.tracker.evict(&user.username);
        }

        if locked != user.locked {
            if locked {
                warn!(
                    "用户 {} 登录失败次数达到 {} 次，锁定账户",
                    user.username,
                    self.tracker.max_attempts()
                );
            } else {
                info!("用户 {} 的锁定已解除", user.username);
            }
            user.locked = locked;
            *user = self.users.save(user.clone()).await?;
        }
        Ok(())
    }
}
