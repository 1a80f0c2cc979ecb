mod handlers;
mod image;
mod model;
mod repository;
mod service;

pub use handlers::{routes, JWT_TOKEN_HEADER};
pub use image::ProfileImageStore;
pub use model::{RepositoryError, User};
pub use repository::{PostgresUserRepository, UserRepository};
pub use service::UserService;

#[cfg(test)]
pub use repository::{MemoryUserRepository, MockUserRepository};
