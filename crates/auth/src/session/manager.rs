use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use super::escape::{query_escape, query_unescape};
use super::{SessionError, SessionProvider};

/// A session plus the transport-ready form of its id.
#[derive(Debug, Clone)]
pub struct SessionCarrier<S> {
    /// Cookie/header name the id travels under.
    pub name: String,
    /// Escaped id, safe to put on the wire.
    pub id: String,
    pub session: S,
}

/// Allocates and resolves session ids; storage is delegated to the provider.
#[derive(Debug)]
pub struct SessionManager<P> {
    provider: P,
    session_name: String,
    max_life_time: Duration,
}

impl<P: SessionProvider> SessionManager<P> {
    pub fn new(provider: P, session_name: impl Into<String>, max_life_time: Duration) -> Self {
        Self {
            provider,
            session_name: session_name.into(),
            max_life_time,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn max_life_time(&self) -> Duration {
        self.max_life_time
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Start a new session (empty token) or resume the one `token` names.
    ///
    /// Resuming a missing session yields the bare [`SessionError::NotFound`]
    /// so callers can reject the request instead of reporting a fault.
    #[instrument(skip(self, token), fields(session_name = %self.session_name), err)]
    pub async fn session_start(
        &self,
        token: &str,
    ) -> Result<SessionCarrier<P::Session>, SessionError> {
        if token.is_empty() {
            let sid = Self::new_session_id();
            let session = self
                .provider
                .session_init(&sid)
                .await
                .map_err(|e| self.wrap("session_init", &sid, e))?;
            debug!("session created");
            return Ok(SessionCarrier {
                name: self.session_name.clone(),
                id: query_escape(&sid),
                session,
            });
        }

        let sid = query_unescape(token)?;
        let session = match self.provider.session_read(&sid).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => return Err(SessionError::NotFound),
            Err(e) => return Err(self.wrap("session_read", &sid, e)),
        };

        Ok(SessionCarrier {
            name: self.session_name.clone(),
            id: token.to_string(),
            session,
        })
    }

    /// Destroy the session `token` names; an empty token is a no-op.
    #[instrument(skip(self, token), fields(session_name = %self.session_name), err)]
    pub async fn session_destroy(&self, token: &str) -> Result<(), SessionError> {
        if token.is_empty() {
            return Ok(());
        }

        let sid = query_unescape(token)?;
        self.provider
            .session_destroy(&sid)
            .await
            .map_err(|e| self.wrap("session_destroy", &sid, e))
    }

    /// Run one garbage-collection pass on the provider.
    pub async fn gc(&self) {
        self.provider.session_gc(self.max_life_time).await;
    }

    fn wrap(&self, op: &'static str, sid: &str, source: SessionError) -> SessionError {
        SessionError::Provider {
            session_name: self.session_name.clone(),
            op,
            sid: sid.to_string(),
            source: Box::new(source),
        }
    }
}
