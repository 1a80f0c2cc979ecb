use super::model::{RepositoryError, User};
use crate::auth::{Authority, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::PgPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_all(&self) -> Result<Vec<User>, RepositoryError>;

    /// `id == 0` 时插入，否则更新
    async fn save(&self, user: User) -> Result<User, RepositoryError>;

    async fn delete_by_id(&self, id: i64) -> Result<(), RepositoryError>;
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, user_id, first_name, last_name, username, email, password_hash, \
     profile_image_url, last_login_date, last_login_date_display, join_date, role, authorities, \
     is_active, is_locked";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    user_id: String,
    first_name: String,
    last_name: String,
    username: String,
    email: String,
    password_hash: String,
    profile_image_url: String,
    last_login_date: Option<DateTime<Utc>>,
    last_login_date_display: Option<DateTime<Utc>>,
    join_date: DateTime<Utc>,
    role: String,
    authorities: Vec<String>,
    is_active: bool,
    is_locked: bool,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(RepositoryError::Corrupt)?;
        let authorities = row
            .authorities
            .iter()
            .map(|a| a.parse::<Authority>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                RepositoryError::Corrupt(format!("用户 {} 的权限无效", row.username))
            })?;

        Ok(User {
            id: row.id,
            user_id: row.user_id,
            first_name: row.first_name,
            last_name: row.last_name,
            username: row.username,
            email: row.email,
            password: row.password_hash,
            profile_image_url: row.profile_image_url,
            last_login_date: row.last_login_date,
            last_login_date_display: row.last_login_date_display,
            join_date: row.join_date,
            role,
            authorities,
            active: row.is_active,
            locked: row.is_locked,
        })
    }
}

impl PostgresUserRepository {
    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        debug!("按用户名查询用户: {}", username);
        self.fetch_one_by("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        debug!("按邮箱查询用户: {}", email);
        self.fetch_one_by("email", email).await
    }

    async fn find_all(&self) -> Result<Vec<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn save(&self, user: User) -> Result<User, RepositoryError> {
        let authorities: Vec<String> = user
            .authorities
            .iter()
            .map(|a| a.as_str().to_string())
            .collect();

        let sql = if user.id == 0 {
            format!(
                r#"
                INSERT INTO users (user_id, first_name, last_name, username, email, password_hash,
                    profile_image_url, last_login_date, last_login_date_display, join_date, role,
                    authorities, is_active, is_locked)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                RETURNING {}
                "#,
                USER_COLUMNS
            )
        } else {
            format!(
                r#"
                UPDATE users
                SET user_id = $1, first_name = $2, last_name = $3, username = $4, email = $5,
                    password_hash = $6, profile_image_url = $7, last_login_date = $8,
                    last_login_date_display = $9, join_date = $10, role = $11, authorities = $12,
                    is_active = $13, is_locked = $14
                WHERE id = $15
                RETURNING {}
                "#,
                USER_COLUMNS
            )
        };

        let query = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.user_id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password)
            .bind(&user.profile_image_url)
            .bind(user.last_login_date)
            .bind(user.last_login_date_display)
            .bind(user.join_date)
            .bind(user.role.as_str())
            .bind(&authorities)
            .bind(user.active)
            .bind(user.locked);
        let query = if user.id == 0 { query } else { query.bind(user.id) };

        debug!("保存用户: {}", user.username);
        query.fetch_one(&self.pool).await?.try_into()
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryUserRepository;
