use super::image::ProfileImageStore;
use super::model::{LoginRequest, RegisterRequest, UserForm};
use super::service::temporary_avatar_source;
use crate::auth::{AuthError, Authority, Identity, Role};
use crate::error::{http_body, AppError};
use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;

pub const JWT_TOKEN_HEADER: &str = "Jwt-Token";
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const MAX_TEXT_FIELD_BYTES: usize = 1024;
const IMAGE_FIELD: &str = "profileImage";
const TEXT_FIELDS: &[&str] = &[
    "currentUsername",
    "firstName",
    "lastName",
    "username",
    "email",
    "role",
    "isActive",
    "isNotLocked",
];

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/user")
            .route("/login", web::post().to(login))
            .route("/register", web::post().to(register))
            .route("/add", web::post().to(add_new_user))
            .route("/update", web::post().to(update_user))
            .route("/find/{username}", web::get().to(get_user))
            .route("/list", web::get().to(get_all_users))
            .route("/resetPassword/{email}", web::get().to(reset_password))
            .route("/delete/{username}", web::delete().to(delete_user))
            .route("/updateProfileImage", web::post().to(update_profile_image))
            .route("/image/profile/{username}", web::get().to(temp_profile_image))
            .route("/image/{username}/{file_name}", web::get().to(profile_image)),
    );
}

async fn login(
    body: web::Json<LoginRequest>,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let outcome = data.guard.login(&body.username, &body.password).await?;
    Ok(HttpResponse::Ok()
        .insert_header((JWT_TOKEN_HEADER, outcome.token))
        .json(outcome.user))
}

async fn register(
    body: web::Json<RegisterRequest>,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let user = data.users.register(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

async fn add_new_user(
    payload: Multipart,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let mut form = read_multipart(payload).await?;
    let user_form = form.user_form()?;
    let user = data.users.add_new_user(user_form, form.image.take()).await?;
    Ok(HttpResponse::Ok().json(user))
}

async fn update_user(
    payload: Multipart,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let mut form = read_multipart(payload).await?;
    let current_username = form.required("currentUsername")?;
    let user_form = form.user_form()?;
    let user = data
        .users
        .update_user(&current_username, user_form, form.image.take())
        .await?;
    Ok(HttpResponse::Ok().json(user))
}

async fn get_user(
    path: web::Path<String>,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let user = data.users.find_user_by_username(&path).await?;
    Ok(HttpResponse::Ok().json(user))
}

async fn get_all_users(data: web::Data<crate::AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.users.get_users().await?))
}

async fn reset_password(
    path: web::Path<String>,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    data.users.reset_password(&path).await?;
    Ok(HttpResponse::Ok().json(http_body(
        StatusCode::OK,
        &format!("An email with a new password was sent to: {}", path),
    )))
}

async fn delete_user(
    path: web::Path<String>,
    identity: web::ReqData<Identity>,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    if !identity.has_authority(Authority::UserDelete) {
        warn!("用户 {} 没有删除权限", identity.subject);
        return Err(AuthError::Forbidden.into());
    }
    data.users.delete_user(&path).await?;
    Ok(HttpResponse::Ok().json(http_body(
        StatusCode::OK,
        &format!("User deleted successfully: {}", path),
    )))
}

async fn update_profile_image(
    payload: Multipart,
    data: web::Data<crate::AppState>,
) -> Result<HttpResponse, AppError> {
    let mut form = read_multipart(payload).await?;
    let username = form.required("username")?;
    let image = form
        .image
        .take()
        .ok_or_else(|| AppError::Validation("profileImage is required".to_string()))?;
    let user = data.users.update_profile_image(&username, image).await?;
    Ok(HttpResponse::Ok().json(user))
}

async fn profile_image(
    path: web::Path<(String, String)>,
    data: web::Data<crate::AppState>,
) -> Result<NamedFile, AppError> {
    let (username, file_name) = path.into_inner();
    let file = data
        .images
        .path_for(&username, &file_name)
        .ok_or_else(|| AppError::Validation(format!("Invalid file name: {}", file_name)))?;
    debug!("读取头像: {}", file.display());
    NamedFile::open_async(file).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::FileNotFound(file_name),
        _ => AppError::Io(e),
    })
}

async fn temp_profile_image(path: web::Path<String>) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, temporary_avatar_source(&path)))
        .finish()
}

/// multipart 表单：文本字段加可选的头像文件
struct MultipartForm {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

impl MultipartForm {
    fn required(&self, name: &str) -> Result<String, AppError> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Validation(format!("{} is required", name)))
    }

    fn flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn user_form(&self) -> Result<UserForm, AppError> {
        let role = self
            .required("role")?
            .parse::<Role>()
            .map_err(AppError::Validation)?;
        Ok(UserForm {
            first_name: self.required("firstName")?,
            last_name: self.required("lastName")?,
            username: self.required("username")?,
            email: self.required("email")?,
            role,
            active: self.flag("isActive"),
            not_locked: self.flag("isNotLocked"),
        })
    }
}

async fn read_multipart(mut payload: Multipart) -> Result<MultipartForm, AppError> {
    let mut form = MultipartForm {
        fields: HashMap::new(),
        image: None,
    };

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().to_string();
        let limit = if name == IMAGE_FIELD {
            MAX_IMAGE_BYTES
        } else if TEXT_FIELDS.contains(&name.as_str()) {
            MAX_TEXT_FIELD_BYTES
        } else {
            warn!("multipart 表单包含未知字段: {}", name);
            return Err(AppError::Validation(format!("Unexpected field: {}", name)));
        };
        if form.fields.contains_key(&name) || (name == IMAGE_FIELD && form.image.is_some()) {
            return Err(AppError::Validation(format!("Duplicate field: {}", name)));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > limit {
                warn!("上传字段 {} 超过大小限制", name);
                return Err(AppError::Validation(format!("{} is too large", name)));
            }
            bytes.extend_from_slice(&chunk);
        }

        if name == IMAGE_FIELD {
            if !bytes.is_empty() {
                info!("收到头像上传: {} 字节", bytes.len());
                form.image = Some(bytes);
            }
        } else {
            let value = String::from_utf8(bytes)
                .map_err(|_| AppError::Validation(format!("{} is not valid text", name)))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

fn multipart_error(e: actix_multipart::MultipartError) -> AppError {
    warn!("解析 multipart 表单失败: {}", e);
    AppError::Validation("Malformed multipart form".to_string())
}
