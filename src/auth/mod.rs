//! Authentication Module
//! Mission: Password accounts and stateless bearer tokens

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, authenticate, AuthError, CurrentUser};
pub use password::PasswordHasher;
pub use user_store::{UserLookup, UserStore};
