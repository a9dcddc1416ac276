/// Request signatures
///
/// The signing key is a chain of SHA-256 digests seeded with the principal's secret
/// and the request date, then folded with the session token, route scope, the literal
/// "api" and the request version. Every digest is carried as standard base64 text.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const HEADER_ID: &str = "x-tapglue-id";
pub const HEADER_DATE: &str = "x-tapglue-date";
pub const HEADER_PAYLOAD_HASH: &str = "x-tapglue-payload-hash";
pub const HEADER_SIGNATURE: &str = "x-tapglue-signature";
pub const HEADER_SESSION: &str = "x-tapglue-session";
pub const HEADER_APP_KEY: &str = "x-tapglue-app-key";

/// Base64 SHA-256 of arbitrary bytes
pub fn digest(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(Sha256::digest(data.as_ref()))
}

/// Value of `x-tapglue-id` for an account or an application
pub fn encode_id(account_id: i64, application_id: Option<i64>) -> String {
    match application_id {
        Some(app) => STANDARD.encode(format!("{}:{}", account_id, app)),
        None => STANDARD.encode(account_id.to_string()),
    }
}

/// Decode `x-tapglue-id` into (account, application)
pub fn decode_id(header: &str) -> Option<(i64, Option<i64>)> {
    let raw = String::from_utf8(STANDARD.decode(header).ok()?).ok()?;
    let mut parts = raw.splitn(2, ':');
    let account_id = parts.next()?.parse().ok()?;
    let application_id = match parts.next() {
        Some(app) => Some(app.parse().ok()?),
        None => None,
    };
    Some((account_id, application_id))
}

/// Signed material of one request
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub host: &'a str,
    pub date: &'a str,
    pub payload_hash: &'a str,
    pub id: &'a str,
    pub session: &'a str,
}

impl SignedRequest<'_> {
    fn canonical(&self) -> String {
        format!(
            "{}\n{}\nhost:{}\nx-tapglue-date:{}\nx-tapglue-payload-hash:{}\nx-tapglue-id:{}",
            self.method, self.path, self.host, self.date, self.payload_hash, self.id
        )
    }

    fn signing_key(&self, secret: &str, scope: &str, request_version: &str) -> String {
        let seed = digest(format!("tapglue:{}:{}", secret, self.date));
        [self.session, scope, "api", request_version]
            .iter()
            .fold(seed, |key, part| digest(format!("{}{}", key, part)))
    }

    fn signing_string(&self, scope: &str, request_version: &str) -> String {
        format!(
            "{}\n{}\n{}/{}\n{}",
            request_version,
            self.date,
            scope,
            request_version,
            digest(self.canonical())
        )
    }

    /// Signature the client is expected to send
    pub fn sign(&self, secret: &str, scope: &str, request_version: &str) -> String {
        let key = self.signing_key(secret, scope, request_version);
        digest(format!("{}{}", key, self.signing_string(scope, request_version)))
    }

    /// Constant-time check of a presented signature
    pub fn verify(&self, secret: &str, scope: &str, request_version: &str, presented: &str) -> bool {
        let expected = self.sign(secret, scope, request_version);
        expected.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

/// Constant-time comparison of two secrets
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(body_hash: &'a str, id: &'a str) -> SignedRequest<'a> {
        SignedRequest {
            method: "POST",
            path: "/0.1/account/1/users",
            host: "api.tapglue.com",
            date: "2015-06-01T10:00:00Z",
            payload_hash: body_hash,
            id,
            session: "",
        }
    }

    #[test]
    fn test_id_round_trip() {
        assert_eq!(decode_id(&encode_id(7, None)), Some((7, None)));
        assert_eq!(decode_id(&encode_id(7, Some(9))), Some((7, Some(9))));
        assert_eq!(decode_id("!!"), None);
        assert_eq!(decode_id(&STANDARD.encode("7:x")), None);
    }

    #[test]
    fn test_signature_verifies() {
        let hash = digest("{}");
        let id = encode_id(1, None);
        let req = request(&hash, &id);
        let sig = req.sign("secret", "/account/:account_id/users", "tg_0.1_request");
        assert!(req.verify("secret", "/account/:account_id/users", "tg_0.1_request", &sig));
    }

    #[test]
    fn test_signature_binds_inputs() {
        let hash = digest("{}");
        let id = encode_id(1, None);
        let req = request(&hash, &id);
        let sig = req.sign("secret", "/account/:account_id/users", "tg_0.1_request");

        assert!(!req.verify("other", "/account/:account_id/users", "tg_0.1_request", &sig));
        assert!(!req.verify("secret", "/accounts", "tg_0.1_request", &sig));

        let tampered = SignedRequest {
            session: "abc",
            ..req.clone()
        };
        assert!(!tampered.verify("secret", "/account/:account_id/users", "tg_0.1_request", &sig));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("token", "token"));
        assert!(!secrets_match("token", "tokem"));
        assert!(!secrets_match("token", "token2"));
    }
}
