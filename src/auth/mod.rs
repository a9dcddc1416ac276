/// Authentication: principals, sessions, request signatures and route guards
pub mod middleware;
mod principal;
mod session;
pub mod signature;

pub use middleware::Authenticated;
pub use principal::{Principal, PrincipalId};
pub use session::{Credentials, SessionManager};
