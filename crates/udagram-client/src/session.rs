use parking_lot::RwLock;

/// Tokens held by a signed-in client. Same shape as the `/signin` and
/// `/refresh` responses.
pub type Session = udagram_types::api::TokenPair;

/// Owns the client's session. Written only by sign-in, refresh and sign-out.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Option<Session>;
    fn set(&self, session: Session);
    fn clear(&self);
}

#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn set(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    fn clear(&self) {
        *self.session.write() = None;
    }
}
