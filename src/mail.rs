use async_trait::async_trait;
use log::info;
use std::io;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// 把新生成的密码发给用户
    async fn send_new_password(&self, first_name: &str, password: &str, email: &str)
        -> io::Result<()>;
}

/// 只记录日志的发信实现，不做真实投递
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_new_password(
        &self,
        first_name: &str,
        _password: &str,
        email: &str,
    ) -> io::Result<()> {
        info!("新密码邮件已投递给 {} <{}>", first_name, email);
        Ok(())
    }
}
