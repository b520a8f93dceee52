//! Rate key selection.

/// The identity a counter is tracked against.
///
/// A request is counted either by its API token or by its client IP, never both.
/// A token takes priority whenever one is present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    /// Caller identified by an API token
    Token(String),
    /// Caller identified by client IP address
    Ip(String),
}

impl RateKey {
    /// Select the key for a request from its IP and optional token.
    pub fn select(ip: &str, token: Option<&str>) -> Self {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => RateKey::Token(token.to_string()),
            None => RateKey::Ip(ip.to_string()),
        }
    }

    /// The token or IP this key was selected from.
    pub fn as_str(&self) -> &str {
        match self {
            RateKey::Token(token) => token,
            RateKey::Ip(ip) => ip,
        }
    }

    /// The key the counter store is addressed by.
    ///
    /// Tokens and IPs live in separate namespaces, so a token whose text
    /// happens to be an address never draws on that address's allowance.
    pub fn storage_key(&self) -> String {
        let kind = if self.is_token() { "token" } else { "ip" };
        format!("{}:{}", kind, self.as_str())
    }

    /// Whether this key came from a token.
    pub fn is_token(&self) -> bool {
        matches!(self, RateKey::Token(_))
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateKey::Token(_) => write!(f, "token"),
            RateKey::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}
