//! Active sessions of a running server
//!
//! The pool only enumerates sessions and announces connects and disconnects. Each session
//! owns its own transport; nothing is shared between them.
//!
//! Sessions still negotiating are tracked separately so that `close_all` reaches them too.
//! Once `close_all` has run the pool admits nothing new.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    session::{Session, SessionError},
    transport::Transport,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Connect(Arc<Session>),
    Disconnect(Arc<Session>),
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sessions: RwLock<Vec<Arc<Session>>>,
    negotiating: RwLock<Vec<Arc<Session>>>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: CancellationToken,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                sessions: RwLock::new(Vec::new()),
                negotiating: RwLock::new(Vec::new()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the active sessions in connection order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions().into_iter().find(|session| session.id() == id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connects `session` over `transport`, tracks it, and drops it again once it closes.
    ///
    /// A session closed while negotiating, or after `close_all`, is refused with
    /// `SessionClosed` and never announced.
    pub async fn open(
        &self,
        session: Arc<Session>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), SessionError> {
        // Each list is joined before the shutdown check, so a concurrent close_all either
        // sees the session or is seen here.
        write(&self.inner.negotiating).push(Arc::clone(&session));
        if self.inner.shutdown.is_cancelled() {
            write(&self.inner.negotiating).retain(|candidate| !Arc::ptr_eq(candidate, &session));
            session.close().await;
            return Err(SessionError::SessionClosed);
        }

        let connected = session.connect(transport).await;
        write(&self.inner.negotiating).retain(|candidate| !Arc::ptr_eq(candidate, &session));
        connected?;

        write(&self.inner.sessions).push(Arc::clone(&session));
        if self.inner.shutdown.is_cancelled() || session.is_closed() {
            write(&self.inner.sessions).retain(|candidate| !Arc::ptr_eq(candidate, &session));
            session.close().await;
            debug!(session_id = %session.id(), "session closed during negotiation");
            return Err(SessionError::SessionClosed);
        }
        info!(session_id = %session.id(), active = self.len(), "session joined pool");
        let _ = self.inner.events.send(ServerEvent::Connect(Arc::clone(&session)));

        let pool = self.clone();
        tokio::spawn(async move {
            session.closed().await;
            pool.remove(&session);
        });
        Ok(())
    }

    /// Closes every active and negotiating session and stops admitting new ones.
    pub async fn close_all(&self) {
        self.inner.shutdown.cancel();

        let negotiating = write(&self.inner.negotiating).clone();
        for session in self.sessions().into_iter().chain(negotiating) {
            session.close().await;
        }
    }

    fn remove(&self, session: &Arc<Session>) {
        let removed = {
            let mut sessions = write(&self.inner.sessions);
            let before = sessions.len();
            sessions.retain(|candidate| !Arc::ptr_eq(candidate, session));
            before != sessions.len()
        };

        if !removed {
            warn!(session_id = %session.id(), "closed session was not in the pool");
            return;
        }
        info!(session_id = %session.id(), active = self.len(), "session left pool");
        let _ = self
            .inner
            .events
            .send(ServerEvent::Disconnect(Arc::clone(session)));
    }
}

fn write(list: &RwLock<Vec<Arc<Session>>>) -> RwLockWriteGuard<'_, Vec<Arc<Session>>> {
    list.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
