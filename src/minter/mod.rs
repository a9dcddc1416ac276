/// Identifier, token and password-hash minting
///
/// IDs come from atomic counters in the store; tokens carry the identifiers of their
/// principal so ownership can be read off a token without a lookup.
mod ids;
mod password;
mod tokens;

pub use ids::IdMinter;
pub use password::PasswordHasher;
pub use tokens::{
    account_auth_token, application_auth_token, end_user_session_token, operator_session_token,
    parse_end_user_session_token, parse_operator_session_token, random_string,
};
