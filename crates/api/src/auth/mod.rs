//! Authentication: password hashing, JWT issuance, and request guards.

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtManager};
pub use middleware::{client_ip, require_auth, AuthUser};
pub use password::{hash_password, verify_password};
