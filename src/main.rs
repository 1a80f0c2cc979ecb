mod auth;
mod clock;
mod config;
mod db;
mod error;
mod logger;
mod mail;
mod user;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use auth::{AccountGuard, AttemptPolicy, AttemptTracker, JwtAuthorization, PasswordHasher, TokenCodec};
use clock::{Clock, SystemClock};
use config::AppConfig;
use log::{error, info};
use mail::LogMailer;
use user::{PostgresUserRepository, ProfileImageStore, UserRepository, UserService, JWT_TOKEN_HEADER};

// 应用状态
struct AppState {
    guard: AccountGuard,
    users: UserService,
    images: ProfileImageStore,
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, e);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // 加载 .env
    dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| startup_error("配置错误", e))?;

    // 创建日志目录
    if !config.log_dir.exists() {
        fs::create_dir_all(&config.log_dir)?;
    }

    // 初始化日志系统，文件日志不可用时退回到标准错误输出
    let log_path = config.log_dir.join("app.log");
    if let Err(e) = logger::Logger::init(&log_path, config.log_level) {
        eprintln!("初始化日志系统失败: {}", e);
        env_logger::Builder::new()
            .filter_level(config.log_level)
            .init();
    }

    info!("应用程序启动");

    // 连接数据库
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| startup_error("数据库连接错误", e))?;

    db::initialize_db(pool.clone())
        .await
        .map_err(|e| startup_error("数据库初始化错误", e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = Arc::new(
        TokenCodec::new(&config.jwt_secret, config.jwt_expiration_ms, clock.clone())
            .map_err(|e| startup_error("JWT 配置错误", e))?,
    );
    let tracker = Arc::new(AttemptTracker::new(
        AttemptPolicy {
            max_attempts: config.login_max_attempts,
            window: chrono::Duration::seconds(config.login_attempt_window_secs),
            capacity: config.login_attempt_capacity,
        },
        clock.clone(),
    ));
    let repository: Arc<dyn UserRepository> = Arc::new(PostgresUserRepository::new(pool));
    let hasher = Arc::new(PasswordHasher::new());
    let images = ProfileImageStore::new(config.user_folder.clone());

    let app_state = web::Data::new(AppState {
        guard: AccountGuard::new(
            repository.clone(),
            tracker.clone(),
            codec.clone(),
            hasher.clone(),
            clock.clone(),
        ),
        users: UserService::new(
            repository,
            hasher,
            Arc::new(LogMailer),
            images.clone(),
            tracker.clone(),
            clock,
            config.public_base_url.clone(),
        ),
        images,
    });

    // 定期清理过期的登录尝试记录
    let cleanup_tracker = tracker.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_tracker.cleanup_expired();
        }
    });

    info!("服务器启动在 http://{}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(JwtAuthorization::new(codec.clone()))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .expose_headers(vec![JWT_TOKEN_HEADER])
                    .max_age(3600),
            )
            .configure(user::routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
