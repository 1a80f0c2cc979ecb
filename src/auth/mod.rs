mod attempts;
mod guard;
mod jwt;
mod middleware;
mod password;
mod types;

pub use attempts::{AttemptPolicy, AttemptTracker};
pub use guard::AccountGuard;
pub use jwt::TokenCodec;
pub use middleware::JwtAuthorization;
pub use password::{generate_password, generate_user_id, PasswordHasher};
pub use types::{AuthError, Authority, Identity, Principal, Role};
