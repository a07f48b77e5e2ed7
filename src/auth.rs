//! HTTP Basic (RFC 7617) and Digest (RFC 7616, MD5) authentication for the
//! websocket Upgrade handshake.

use md5::{Digest as _, Md5};

/// server-side authentication requirement, carried by [`crate::server::Server`].
#[derive(Debug, Clone)]
pub enum AuthContext {
    None,
    Basic { realm: String },
    Digest { realm: String, nonce: String },
}

impl AuthContext {
    pub fn realm(&self) -> Option<&str> {
        match self {
            AuthContext::None => None,
            AuthContext::Basic { realm } | AuthContext::Digest { realm, .. } => Some(realm),
        }
    }

    /// the `WWW-Authenticate` challenge header value to send on a 401.
    pub fn challenge_header(&self) -> Option<String> {
        match self {
            AuthContext::None => None,
            AuthContext::Basic { realm } => Some(format!("Basic realm=\"{realm}\"")),
            AuthContext::Digest { realm, nonce } => Some(format!(
                "Digest realm=\"{realm}\", nonce=\"{nonce}\", qop=\"auth\", algorithm=MD5"
            )),
        }
    }
}

/// client-supplied credentials, validated against an [`AuthContext`].
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub username: String,
    pub password: String,
}

/// outcome of validating an `Authorization` header against a credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid,
}

impl AuthorizationContext {
    /// check a raw `Authorization` header value against `self`, per the
    /// scheme implied by `ctx`. Returns `Invalid` for a header that does not
    /// parse, not just for wrong credentials.
    pub fn validate(&self, ctx: &AuthContext, method: &str, uri: &str, header: &str) -> ValidationResult {
        match ctx {
            AuthContext::None => ValidationResult::Valid,
            AuthContext::Basic { .. } => self.validate_basic(header),
            AuthContext::Digest { realm, nonce } => self.validate_digest(realm, nonce, method, uri, header),
        }
    }

    fn validate_basic(&self, header: &str) -> ValidationResult {
        let Some(b64) = header.strip_prefix("Basic ") else {
            return ValidationResult::Invalid;
        };
        let Ok(decoded) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64.trim()) else {
            return ValidationResult::Invalid;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return ValidationResult::Invalid;
        };
        match decoded.split_once(':') {
            Some((user, pass)) if user == self.username && pass == self.password => ValidationResult::Valid,
            _ => ValidationResult::Invalid,
        }
    }

    fn validate_digest(&self, realm: &str, nonce: &str, method: &str, uri: &str, header: &str) -> ValidationResult {
        let Some(fields) = header.strip_prefix("Digest ") else {
            return ValidationResult::Invalid;
        };
        let params = parse_digest_params(fields);
        let user_matches = params.get("username").map(|u| u.as_str()) == Some(self.username.as_str());
        let nonce_matches = params.get("nonce").map(|n| n.as_str()) == Some(nonce);
        let realm_matches = params.get("realm").map(|r| r.as_str()) == Some(realm);
        if !(user_matches && nonce_matches && realm_matches) {
            return ValidationResult::Invalid;
        }
        let Some(client_response) = params.get("response") else {
            return ValidationResult::Invalid;
        };
        let default_uri = uri.to_string();
        let digest_uri = params.get("uri").unwrap_or(&default_uri);
        let cnonce = params.get("cnonce").map(String::as_str).unwrap_or("");
        let nc = params.get("nc").map(String::as_str).unwrap_or("");
        let qop = params.get("qop").map(String::as_str);

        let ha1 = md5_hex(format!("{}:{}:{}", self.username, realm, self.password));
        let ha2 = md5_hex(format!("{method}:{digest_uri}"));
        let expected = match qop {
            Some(qop) => md5_hex(format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}")),
            None => md5_hex(format!("{ha1}:{nonce}:{ha2}")),
        };
        if &expected == client_response {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid
        }
    }

    /// build the `Authorization` header value this client should send in
    /// response to `challenge`, e.g. on a retried request after a 401.
    pub fn authorize_header(&self, challenge: &AuthContext, method: &str, uri: &str) -> Option<String> {
        match challenge {
            AuthContext::None => None,
            AuthContext::Basic { .. } => {
                let raw = format!("{}:{}", self.username, self.password);
                let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, raw);
                Some(format!("Basic {encoded}"))
            }
            AuthContext::Digest { realm, nonce } => {
                let ha1 = md5_hex(format!("{}:{}:{}", self.username, realm, self.password));
                let ha2 = md5_hex(format!("{method}:{uri}"));
                let nc = "00000001";
                let cnonce = md5_hex(format!("{nonce}{}", self.username))[..8].to_string();
                let response = md5_hex(format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
                Some(format!(
                    "Digest username=\"{}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
                     qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\", algorithm=MD5",
                    self.username
                ))
            }
        }
    }
}

fn md5_hex(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_ref());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// parse `key="value", key=value` pairs out of a Digest header's field list.
fn parse_digest_params(fields: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for part in fields.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            map.insert(key.trim().to_string(), value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_round_trips() {
        let ctx = AuthContext::Basic { realm: "realm is here".into() };
        let creds = AuthorizationContext { username: "alice".into(), password: "s3cret".into() };
        let header = creds.authorize_header(&ctx, "GET", "/").unwrap();
        assert_eq!(creds.validate(&ctx, "GET", "/", &header), ValidationResult::Valid);
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let ctx = AuthContext::Basic { realm: "realm is here".into() };
        let creds = AuthorizationContext { username: "alice".into(), password: "s3cret".into() };
        let wrong = AuthorizationContext { username: "alice".into(), password: "nope".into() };
        let header = wrong.authorize_header(&ctx, "GET", "/").unwrap();
        assert_eq!(creds.validate(&ctx, "GET", "/", &header), ValidationResult::Invalid);
    }

    #[test]
    fn digest_auth_round_trips_with_qop() {
        let ctx = AuthContext::Digest {
            realm: "realm is here".into(),
            nonce: "abcd1234".into(),
        };
        let creds = AuthorizationContext { username: "bob".into(), password: "hunter2".into() };
        let header = creds.authorize_header(&ctx, "GET", "/ws").unwrap();
        assert_eq!(creds.validate(&ctx, "GET", "/ws", &header), ValidationResult::Valid);
    }

    #[test]
    fn digest_auth_rejects_nonce_mismatch() {
        let ctx = AuthContext::Digest {
            realm: "realm is here".into(),
            nonce: "abcd1234".into(),
        };
        let stale = AuthContext::Digest {
            realm: "realm is here".into(),
            nonce: "stale-nonce".into(),
        };
        let creds = AuthorizationContext { username: "bob".into(), password: "hunter2".into() };
        let header = creds.authorize_header(&stale, "GET", "/ws").unwrap();
        assert_eq!(creds.validate(&ctx, "GET", "/ws", &header), ValidationResult::Invalid);
    }
}
