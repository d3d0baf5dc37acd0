use reqwest::Method;

/// Endpoints that issue or rotate tokens. Requests to them never trigger a
/// refresh, which keeps `/refresh` from recursing into itself.
const AUTH_ENDPOINTS: &[&str] = &["/signin", "/signup", "/refresh"];

/// Decides which requests carry (and may refresh) an access token.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    public: Vec<(Option<Method>, String)>,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self::empty()
            .public(Some(Method::GET), "/feeds")
            .public(None, "/health")
            .public(None, "/objects")
            .public(None, "/signout")
    }
}

impl EndpointPolicy {
    /// No public endpoints; only the auth endpoints skip the token.
    pub fn empty() -> Self {
        Self { public: Vec::new() }
    }

    /// Mark `prefix` and everything below it as public, for `method` or for
    /// every method when `None`.
    pub fn public(mut self, method: Option<Method>, prefix: &str) -> Self {
        self.public
            .push((method, prefix.trim_end_matches('/').to_string()));
        self
    }

    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = strip_query(path);
        AUTH_ENDPOINTS.iter().any(|endpoint| path.ends_with(endpoint))
    }

    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        let path = strip_query(path);
        self.public.iter().any(|(m, prefix)| {
            m.as_ref().is_none_or(|m| m == method) && under(path, prefix)
        })
    }

    pub fn requires_auth(&self, method: &Method, path: &str) -> bool {
        !self.is_auth_endpoint(path) && !self.is_public(method, path)
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or_default().trim_end_matches('/')
}

fn under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_endpoints_never_need_a_token() {
        let policy = EndpointPolicy::default();
        for path in ["/signin", "/signup", "/refresh", "/api/v0/users/auth/refresh?x=1"] {
            assert!(policy.is_auth_endpoint(path), "{path}");
            assert!(!policy.requires_auth(&Method::POST, path), "{path}");
        }
    }

    #[test]
    fn public_reads_and_protected_writes() {
        let policy = EndpointPolicy::default();
        assert!(!policy.requires_auth(&Method::GET, "/feeds"));
        assert!(!policy.requires_auth(&Method::GET, "/feeds/abc?x=1"));
        assert!(policy.requires_auth(&Method::POST, "/feeds"));
        assert!(policy.requires_auth(&Method::DELETE, "/feeds/abc"));
        assert!(policy.requires_auth(&Method::GET, "/feedsy"));
        assert!(policy.requires_auth(&Method::GET, "/users/me"));
    }

    #[test]
    fn empty_policy_protects_everything_but_auth() {
        let policy = EndpointPolicy::empty();
        assert!(policy.requires_auth(&Method::GET, "/feeds"));
        assert!(!policy.requires_auth(&Method::POST, "/signin"));
    }
}
