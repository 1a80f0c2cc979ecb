use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::AttemptRecord;

#[derive(Debug, Clone)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub capacity: usize,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::minutes(15),
            capacity: 100,
        }
    }
}

/// 登录失败计数缓存，条目在最后一次更新 `window` 之后失效
pub struct AttemptTracker {
    attempts: Mutex<HashMap<String, AttemptRecord>>,
    policy: AttemptPolicy,
    clock: Arc<dyn Clock>,
}

impl AttemptTracker {
    pub fn new(policy: AttemptPolicy, clock: Arc<dyn Clock>) -> Self {
        info!(
            "初始化登录尝试记录, 上限 {} 次, 窗口 {} 秒, 容量 {}",
            policy.max_attempts,
            policy.window.num_seconds(),
            policy.capacity
        );
        Self {
            attempts: Mutex::new(HashMap::new()),
            policy,
            clock,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// 记录一次失败，返回累计后的次数
    pub fn record_failed_attempt(&self, username: &str) -> u32 {
        debug!("记录用户 {} 的登录失败", username);
        let now = self.clock.now();
        let mut attempts = self.lock();

        let live = attempts
            .get(username)
            .map_or(false, |record| self.is_live(record, now));
        if !live {
            attempts.remove(username);
            if !self.make_room(&mut attempts, now) {
                warn!("登录尝试记录已满且均处于锁定状态，不记录用户 {}", username);
                return 1;
            }
        }

        let attempt = attempts
            .entry(username.to_string())
            .or_insert(AttemptRecord {
                count: 0,
                last_updated: now,
            });
        attempt.count += 1;
        attempt.last_updated = now;

        warn!(
            "用户 {} 登录失败，当前失败次数: {}",
            username, attempt.count
        );
        attempt.count
    }

    pub fn has_exceeded_max_attempts(&self, username: &str) -> bool {
        let now = self.clock.now();
        let attempts = self.lock();
        attempts
            .get(username)
            .filter(|record| self.is_live(record, now))
            .map_or(false, |record| record.count >= self.policy.max_attempts)
    }

    pub fn evict(&self, username: &str) {
        debug!("重置用户 {} 的登录尝试次数", username);
        if self.lock().remove(username).is_some() {
            info!("用户 {} 的登录尝试次数已重置", username);
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        debug!("清理过期的登录尝试记录");
        let now = self.clock.now();
        let mut attempts = self.lock();
        let before_count = attempts.len();
        attempts.retain(|_, record| self.is_live(record, now));
        let removed = before_count - attempts.len();
        if removed > 0 {
            info!("清理了 {} 条过期的登录尝试记录", removed);
        }
        removed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn is_live(&self, record: &AttemptRecord, now: DateTime<Utc>) -> bool {
        now - record.last_updated < self.policy.window
    }

    // 新增条目前调用：先丢掉过期记录，仍然满了就淘汰最久未更新且未达上限的那条。
    // 已达上限的记录在窗口内不会被挤掉，腾不出位置时返回 false
    fn make_room(&self, attempts: &mut HashMap<String, AttemptRecord>, now: DateTime<Utc>) -> bool {
        if attempts.len() < self.policy.capacity {
            return true;
        }
        attempts.retain(|_, record| self.is_live(record, now));

        while attempts.len() >= self.policy.capacity {
            let oldest = attempts
                .iter()
                .filter(|(_, record)| record.count < self.policy.max_attempts)
                .min_by_key(|(_, record)| record.last_updated)
                .map(|(name, _)| name.clone());
            match oldest {
                Some(name) => {
                    debug!("登录尝试记录已满，淘汰用户 {}", name);
                    attempts.remove(&name);
                }
                None => return false,
            }
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AttemptRecord>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
