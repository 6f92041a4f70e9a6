use std::fmt;

use crate::{CoreError, Key, MIN_PASSWORD_LEN, crypto};

/// Network credentials for one session. `key` always equals SHA-256(`password`).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String,
    password: String,
    key: Key,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, CoreError> {
        let ssid = strip_ssid_quotes(ssid);
        if ssid.is_empty() {
            return Err(CoreError::EmptySsid);
        }
        if password.is_empty() {
            return Err(CoreError::EmptyPassword);
        }
        Ok(Self {
            ssid: ssid.to_owned(),
            password: password.to_owned(),
            key: crypto::derive_key(password),
        })
    }

    /// Password-only exchange: the SSID is derived from the key.
    pub fn from_password(password: &str) -> Result<Self, CoreError> {
        if password.is_empty() {
            return Err(CoreError::EmptyPassword);
        }
        let key = crypto::derive_key(password);
        Ok(Self {
            ssid: crypto::ssid_from_key(&key),
            password: password.to_owned(),
            key,
        })
    }

    /// Typed-in credentials. The SSID may be left blank.
    pub fn from_manual(ssid: Option<&str>, password: &str) -> Result<Self, CoreError> {
        let password = password.trim();
        let len = password.chars().count();
        if len < MIN_PASSWORD_LEN {
            return Err(CoreError::PasswordTooShort {
                len,
                min: MIN_PASSWORD_LEN,
            });
        }
        match ssid.map(str::trim).filter(|s| !s.is_empty()) {
            Some(ssid) => Self::new(ssid, password),
            None => Self::from_password(password),
        }
    }

    pub fn generate() -> Self {
        let password = crypto::generate_password();
        let key = crypto::derive_key(&password);
        Self {
            ssid: crypto::ssid_from_key(&key),
            password,
            key,
        }
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn to_payload(&self) -> OobPayload {
        OobPayload::Full {
            ssid: self.ssid.clone(),
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Text carried by a QR code or typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobPayload {
    Full { ssid: String, password: String },
    PasswordOnly(String),
}

impl OobPayload {
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::MalformedPayload("empty payload".to_owned()));
        }
        match text.split_once(';') {
            Some((ssid, password)) => {
                if password.contains(';') {
                    return Err(CoreError::MalformedPayload(
                        "more than two fields".to_owned(),
                    ));
                }
                if ssid.is_empty() || password.is_empty() {
                    return Err(CoreError::MalformedPayload("empty field".to_owned()));
                }
                Ok(OobPayload::Full {
                    ssid: ssid.to_owned(),
                    password: password.to_owned(),
                })
            }
            None => Ok(OobPayload::PasswordOnly(text.to_owned())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            OobPayload::Full { ssid, password } => format!("{ssid};{password}"),
            OobPayload::PasswordOnly(password) => password.clone(),
        }
    }

    pub fn into_credentials(self) -> Result<Credentials, CoreError> {
        match self {
            OobPayload::Full { ssid, password } => Credentials::new(&ssid, &password),
            OobPayload::PasswordOnly(password) => Credentials::from_password(&password),
        }
    }
}

/// Some platforms report the SSID wrapped in double quotes.
pub fn strip_ssid_quotes(ssid: &str) -> &str {
    let trimmed = ssid.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key, ssid_from_key};

    #[test]
    fn key_tracks_password() {
        let creds = Credentials::new("\"DIRECT-ab\"", "hunter22x").unwrap();
        assert_eq!(creds.ssid(), "DIRECT-ab");
        assert_eq!(creds.key(), &derive_key("hunter22x"));
    }

    #[test]
    fn qr_payload_with_both_fields() {
        let payload = OobPayload::parse("AndroidShare_1234;s3cretpw").unwrap();
        let creds = payload.into_credentials().unwrap();
        assert_eq!(creds.ssid(), "AndroidShare_1234");
        assert_eq!(creds.password(), "s3cretpw");
    }

    #[test]
    fn password_only_payload_derives_ssid() {
        let creds = OobPayload::parse("abcdefgh")
            .unwrap()
            .into_credentials()
            .unwrap();
        assert_eq!(creds.ssid(), ssid_from_key(&derive_key("abcdefgh")));
    }

    #[test]
    fn malformed_payloads() {
        assert!(OobPayload::parse("").is_err());
        assert!(OobPayload::parse(";pw").is_err());
        assert!(OobPayload::parse("ssid;").is_err());
        assert!(OobPayload::parse("a;b;c").is_err());
    }

    #[test]
    fn manual_entry_enforces_length() {
        assert_eq!(
            Credentials::from_manual(None, "short"),
            Err(CoreError::PasswordTooShort { len: 5, min: 8 })
        );
        let creds = Credentials::from_manual(Some("  "), "longenough").unwrap();
        assert_eq!(creds.ssid(), ssid_from_key(&derive_key("longenough")));
        let creds = Credentials::from_manual(Some("MyNet"), "longenough").unwrap();
        assert_eq!(creds.ssid(), "MyNet");
    }

    #[test]
    fn payload_encoding_matches_parse() {
        let creds = Credentials::generate();
        let text = creds.to_payload().encode();
        let parsed = OobPayload::parse(&text).unwrap().into_credentials().unwrap();
        assert_eq!(parsed, creds);
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("net", "topsecret").unwrap();
        let shown = format!("{creds:?}");
        assert!(!shown.contains("topsecret"));
        assert!(shown.contains("net"));
    }
}
