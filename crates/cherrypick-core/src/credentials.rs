//! Credentials for authenticated requests.

/// Environment key holding the GitHub user name.
pub const USERNAME_VAR: &str = "GITHUB_USERNAME";
/// Environment key holding the GitHub access token.
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Optional username/token pair passed explicitly to every backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: Option<String>,
    token: Option<String>,
}

impl Credentials {
    /// No credentials; valid for public repositories.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(username: Option<String>, token: Option<String>) -> Self {
        Self {
            username: username.filter(|u| !u.is_empty()),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Build credentials from a key lookup (usually `std::env::var`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(lookup(USERNAME_VAR), lookup(TOKEN_VAR))
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// A token is what actually authenticates a request.
    pub fn is_present(&self) -> bool {
        self.token.is_some()
    }

    /// Attach credentials to an outgoing request.
    ///
    /// Basic auth when a username is known, bearer auth for a bare token.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.token) {
            (Some(user), Some(token)) => request.basic_auth(user, Some(token)),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
