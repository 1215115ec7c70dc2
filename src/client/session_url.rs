use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::authority::crypto::SecretString;
use crate::error_handling::types::SyncError;

static SESSION_URL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^(https?://[^/?#]+)/session/([0-9a-fA-F-]{36})/?(?:\?[^#]*)?(?:#(.*))?$")
        .expect("session URL pattern is valid")
});

/// A parsed shareable link: `<base>/session/<id>` with an optional
/// `#host=<credential>` fragment on the host variant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLink {
    pub base_url: String,
    pub session_id: Uuid,
    pub host_credential: Option<SecretString>,
}

pub fn parse_session_url(url: &str) -> Result<SessionLink, SyncError> {
    let invalid = || SyncError::InvalidState(format!("not a session link: {}", url));
    let caps = SESSION_URL.captures(url.trim()).ok_or_else(invalid)?;

    let base_url = caps.get(1).ok_or_else(invalid)?.as_str().to_string();
    let session_id = caps
        .get(2)
        .and_then(|m| Uuid::parse_str(m.as_str()).ok())
        .ok_or_else(invalid)?;
    let host_credential = caps
        .get(3)
        .and_then(|fragment| {
            fragment
                .as_str()
                .split('&')
                .find_map(|pair| pair.strip_prefix("host="))
        })
        .filter(|credential| !credential.is_empty())
        .map(SecretString::from);

    Ok(SessionLink {
        base_url,
        session_id,
        host_credential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "6f1c2a3e-8a55-4f6e-9d0b-2d7f3a9c1e11";

    #[test]
    fn listener_link() {
        let link = parse_session_url(&format!("https://radio.example.com/session/{}", ID)).unwrap();
        assert_eq!(link.base_url, "https://radio.example.com");
        assert_eq!(link.session_id.to_string(), ID);
        assert_eq!(link.host_credential, None);
    }

    #[test]
    fn host_link_carries_credential() {
        let link =
            parse_session_url(&format!("http://127.0.0.1:8080/session/{}#host=abc-_123", ID)).unwrap();
        assert_eq!(link.base_url, "http://127.0.0.1:8080");
        assert_eq!(link.host_credential.unwrap().expose_secret(), "abc-_123");

        let other = parse_session_url(&format!("http://h/session/{}#foo=1&host=xyz", ID)).unwrap();
        assert_eq!(other.host_credential.unwrap().expose_secret(), "xyz");

        let empty = parse_session_url(&format!("http://h/session/{}#host=", ID)).unwrap();
        assert_eq!(empty.host_credential, None);
    }

    #[test]
    fn rejects_other_links() {
        assert!(parse_session_url("http://h/session/not-a-uuid").is_err());
        assert!(parse_session_url(&format!("http://h/sessions/{}", ID)).is_err());
        assert!(parse_session_url(&format!("h/session/{}", ID)).is_err());
    }
}
