use url::form_urlencoded::byte_serialize;

/// Hook into the host application's routing, used after an unrecoverable
/// auth failure.
pub trait Navigator: Send + Sync {
    /// Path (and query) the user is currently on.
    fn current_path(&self) -> String;
    fn redirect(&self, to: &str);
}

/// For headless use: there is nowhere to send the user.
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_path(&self) -> String {
        "/".to_string()
    }

    fn redirect(&self, _to: &str) {}
}

/// True for the pages where a user signs in, where redirecting to the
/// sign-in page again would loop.
pub fn is_auth_page(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    matches!(path, "/signin" | "/signup")
}

/// `/signin?redirect=<current path>`.
pub fn signin_redirect(current_path: &str) -> String {
    let encoded: String = byte_serialize(current_path.as_bytes()).collect();
    format!("/signin?redirect={}", encoded)
}
