use super::image::{ProfileImageStore, TEMP_PROFILE_IMAGE_BASE_URL};
use super::model::{RegisterRequest, User, UserForm};
use super::repository::UserRepository;
use crate::auth::{generate_password, generate_user_id, AttemptTracker, PasswordHasher, Role};
use crate::clock::Clock;
use crate::error::AppError;
use crate::mail::Mailer;
use log::{debug, info, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use validator::Validate;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{3,50}$").expect("username pattern"))
}

pub fn validate_username(username: &str) -> Result<(), AppError> {
    if username_pattern().is_match(username) && username != "." && username != ".." {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid username: {}", username)))
    }
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<PasswordHasher>,
    mailer: Arc<dyn Mailer>,
    images: ProfileImageStore,
    tracker: Arc<AttemptTracker>,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<PasswordHasher>,
        mailer: Arc<dyn Mailer>,
        images: ProfileImageStore,
        tracker: Arc<AttemptTracker>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            hasher,
            mailer,
            images,
            tracker,
            clock,
            base_url: base_url.into(),
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<User, AppError> {
        info!("注册用户: {}", request.username);
        request.validate()?;
        validate_username(&request.username)?;
        self.validate_new_username_and_email(None, &request.username, &request.email)
            .await?;

        let password = generate_password();
        let user = self.new_user(
            request.first_name,
            request.last_name,
            request.username,
            request.email,
            &password,
        )
        .await?;

        let user = self.users.save(user).await?;
        self.mailer
            .send_new_password(&user.first_name, &password, &user.email)
            .await?;
        info!("用户 {} 注册成功", user.username);
        Ok(user)
    }

    pub async fn add_new_user(&self, form: UserForm, image: Option<Vec<u8>>) -> Result<User, AppError> {
        info!("新增用户: {}", form.username);
        form.validate()?;
        validate_username(&form.username)?;
        self.validate_new_username_and_email(None, &form.username, &form.email)
            .await?;

        let password = generate_password();
        let mut user = self.new_user(
            form.first_name,
            form.last_name,
            form.username,
            form.email,
            &password,
        )
        .await?;
        user.assign_role(form.role);
        user.active = form.active;
        user.locked = !form.not_locked;

        let user = self.users.save(user).await?;
        self.mailer
            .send_new_password(&user.first_name, &password, &user.email)
            .await?;
        self.save_profile_image(user, image).await
    }

    pub async fn update_user(
        &self,
        current_username: &str,
        form: UserForm,
        image: Option<Vec<u8>>,
    ) -> Result<User, AppError> {
        info!("更新用户: {}", current_username);
        form.validate()?;
        validate_username(&form.username)?;
        let mut user = self
            .validate_new_username_and_email(Some(current_username), &form.username, &form.email)
            .await?
            .ok_or_else(|| AppError::UserNotFound(current_username.to_string()))?;

        user.first_name = form.first_name;
        user.last_name = form.last_name;
        user.username = form.username;
        user.email = form.email;
        user.active = form.active;
        user.locked = !form.not_locked;
        user.assign_role(form.role);

        if !user.locked {
            // 管理员解锁时一并清掉失败计数，否则下次登录会被重新锁定
            self.tracker.evict(current_username);
            self.tracker.evict(&user.username);
        }

        let user = self.users.save(user).await?;
        self.save_profile_image(user, image).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.users.find_all().await?)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<User, AppError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AppError> {
        let mut user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| {
                warn!("重置密码失败，邮箱不存在: {}", email);
                AppError::EmailNotFound(email.to_string())
            })?;

        let password = generate_password();
        user.password = self.hasher.hash_blocking(&password).await?;
        let user = self.users.save(user).await?;
        self.mailer
            .send_new_password(&user.first_name, &password, &user.email)
            .await?;
        info!("用户 {} 的密码已重置", user.username);
        Ok(())
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), AppError> {
        let user = self.find_user_by_username(username).await?;
        self.images.remove_user(&user.username).await?;
        self.users.delete_by_id(user.id).await?;
        self.tracker.evict(&user.username);
        info!("用户 {} 已删除", user.username);
        Ok(())
    }

    pub async fn update_profile_image(&self, username: &str, image: Vec<u8>) -> Result<User, AppError> {
        let user = self.find_user_by_username(username).await?;
        self.save_profile_image(user, Some(image)).await
    }

    async fn new_user(
        &self,
        first_name: String,
        last_name: String,
        username: String,
        email: String,
        password: &str,
    ) -> Result<User, AppError> {
        let profile_image_url = self.temporary_profile_image_url(&username);
        Ok(User {
            id: 0,
            user_id: generate_user_id(),
            first_name,
            last_name,
            username,
            email,
            password: self.hasher.hash_blocking(password).await?,
            profile_image_url,
            last_login_date: None,
            last_login_date_display: None,
            join_date: self.clock.now(),
            role: Role::User,
            authorities: Role::User.authorities(),
            active: true,
            locked: false,
        })
    }

    async fn save_profile_image(&self, mut user: User, image: Option<Vec<u8>>) -> Result<User, AppError> {
        let Some(bytes) = image else {
            return Ok(user);
        };
        let file_name = self.images.save(&user.username, &bytes).await?;
        user.profile_image_url = self.profile_image_url(&user.username, &file_name);
        debug!("用户 {} 的头像地址: {}", user.username, user.profile_image_url);
        Ok(self.users.save(user).await?)
    }

    fn temporary_profile_image_url(&self, username: &str) -> String {
        format!("{}/user/image/profile/{}", self.base_url, username)
    }

    fn profile_image_url(&self, username: &str, file_name: &str) -> String {
        format!("{}/user/image/{}/{}", self.base_url, username, file_name)
    }

    async fn validate_new_username_and_email(
        &self,
        current_username: Option<&str>,
        new_username: &str,
        new_email: &str,
    ) -> Result<Option<User>, AppError> {
        let by_username = self.users.find_by_username(new_username).await?;
        let by_email = self.users.find_by_email(new_email).await?;

        match current_username {
            Some(current_username) => {
                let current = self
                    .users
                    .find_by_username(current_username)
                    .await?
                    .ok_or_else(|| AppError::UserNotFound(current_username.to_string()))?;
                if by_username.map_or(false, |u| u.id != current.id) {
                    return Err(AppError::UsernameExists);
                }
                if by_email.map_or(false, |u| u.id != current.id) {
                    return Err(AppError::EmailExists);
                }
                Ok(Some(current))
            }
            None => {
                if by_username.is_some() {
                    return Err(AppError::UsernameExists);
                }
                if by_email.is_some() {
                    return Err(AppError::EmailExists);
                }
                Ok(None)
            }
        }
    }
}

pub fn temporary_avatar_source(username: &str) -> String {
    format!("{}{}", TEMP_PROFILE_IMAGE_BASE_URL, username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AttemptPolicy, Authority};
    use crate::clock::ManualClock;
    use crate::mail::MockMailer;
    use crate::user::MemoryUserRepository;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        service: UserService,
        users: Arc<MemoryUserRepository>,
        tracker: Arc<AttemptTracker>,
        root: std::path::PathBuf,
    }

    fn fixture(mailer: MockMailer) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let users = Arc::new(MemoryUserRepository::default());
        let tracker = Arc::new(AttemptTracker::new(AttemptPolicy::default(), clock.clone()));
        let root = std::env::temp_dir().join(format!("user-portal-svc-{}", uuid::Uuid::new_v4()));
        let service = UserService::new(
            users.clone(),
            Arc::new(PasswordHasher::fast()),
            Arc::new(mailer),
            ProfileImageStore::new(&root),
            tracker.clone(),
            clock,
            "http://portal.test",
        );
        Fixture {
            service,
            users,
            tracker,
            root,
        }
    }

    fn quiet_mailer() -> MockMailer {
        let mut mailer = MockMailer::new();
        mailer.expect_send_new_password().returning(|_, _, _| Ok(()));
        mailer
    }

    fn registration(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            username: username.to_string(),
            email: email.to_string(),
        }
    }

    fn form(username: &str, email: &str, role: Role) -> UserForm {
        UserForm {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            username: username.to_string(),
            email: email.to_string(),
            role,
            active: true,
            not_locked: true,
        }
    }

    #[tokio::test]
    async fn register_mails_a_password_that_logs_in() {
        let mut mailer = MockMailer::new();
        let sent = Arc::new(std::sync::Mutex::new(String::new()));
        let captured = sent.clone();
        mailer
            .expect_send_new_password()
            .times(1)
            .returning(move |_, password, _| {
                *captured.lock().unwrap() = password.to_string();
                Ok(())
            });
        let f = fixture(mailer);

        let user = assert_ok!(f.service.register(registration("ada", "ada@example.com")).await);

        assert_eq!(user.role, Role::User);
        assert_eq!(user.authorities, vec![Authority::UserRead]);
        assert_eq!(user.profile_image_url, "http://portal.test/user/image/profile/ada");
        let password = sent.lock().unwrap().clone();
        assert!(PasswordHasher::fast().verify(&password, &f.users.get("ada").unwrap().password));
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_rejected() {
        let f = fixture(quiet_mailer());
        assert_ok!(f.service.register(registration("ada", "ada@example.com")).await);

        let err = assert_err!(f.service.register(registration("ada", "other@example.com")).await);
        assert!(matches!(err, AppError::UsernameExists));

        let err = assert_err!(f.service.register(registration("ada2", "ada@example.com")).await);
        assert!(matches!(err, AppError::EmailExists));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let f = fixture(quiet_mailer());

        let err = assert_err!(f.service.register(registration("ada", "not-an-email")).await);
        assert!(matches!(err, AppError::Validation(_)));

        let err = assert_err!(f.service.register(registration("../etc", "x@example.com")).await);
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_keeps_own_username_but_not_someone_elses() {
        let f = fixture(quiet_mailer());
        assert_ok!(f.service.add_new_user(form("grace", "grace@example.com", Role::User), None).await);
        assert_ok!(f.service.add_new_user(form("alan", "alan@example.com", Role::User), None).await);

        let updated = assert_ok!(
            f.service
                .update_user("grace", form("grace", "grace@example.com", Role::Admin), None)
                .await
        );
        assert_eq!(updated.authorities, Role::Admin.authorities());

        let err = assert_err!(
            f.service
                .update_user("grace", form("alan", "grace@example.com", Role::User), None)
                .await
        );
        assert!(matches!(err, AppError::UsernameExists));

        let err = assert_err!(
            f.service
                .update_user("nobody", form("nobody", "nobody@example.com", Role::User), None)
                .await
        );
        assert!(matches!(err, AppError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn admin_unlock_clears_failed_attempts() {
        let f = fixture(quiet_mailer());
        let mut locked = form("grace", "grace@example.com", Role::User);
        locked.not_locked = false;
        let user = assert_ok!(f.service.add_new_user(locked, None).await);
        assert!(user.locked);
        for _ in 0..5 {
            f.tracker.record_failed_attempt("grace");
        }

        let user = assert_ok!(
            f.service
                .update_user("grace", form("grace", "grace@example.com", Role::User), None)
                .await
        );
        assert!(!user.locked);
        assert!(!f.tracker.has_exceeded_max_attempts("grace"));
    }

    #[tokio::test]
    async fn profile_image_is_stored_and_url_updated() {
        let f = fixture(quiet_mailer());
        assert_ok!(f.service.add_new_user(form("grace", "grace@example.com", Role::User), None).await);

        let user = assert_ok!(f.service.update_profile_image("grace", b"jpeg-bytes".to_vec()).await);
        assert_eq!(
            user.profile_image_url,
            "http://portal.test/user/image/grace/grace.jpg"
        );
        assert!(f.root.join("grace").join("grace.jpg").exists());

        assert_ok!(f.service.delete_user("grace").await);
        assert!(!f.root.join("grace").exists());
        assert!(f.users.get("grace").is_none());

        let _ = std::fs::remove_dir_all(&f.root);
    }

    #[tokio::test]
    async fn reset_password_requires_known_email() {
        let f = fixture(quiet_mailer());
        assert_ok!(f.service.register(registration("ada", "ada@example.com")).await);
        let before = f.users.get("ada").unwrap().password;

        assert_ok!(f.service.reset_password("ada@example.com").await);
        assert_ne!(f.users.get("ada").unwrap().password, before);

        let err = assert_err!(f.service.reset_password("nobody@example.com").await);
        assert!(matches!(err, AppError::EmailNotFound(_)));
    }
}
