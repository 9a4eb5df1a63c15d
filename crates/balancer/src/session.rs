//! Session state touched by the health-check engine on redispatch.
//!
//! Only the routing-relevant slice of a session lives here: the chosen
//! server, the stickiness flags, the cookie-derived routing state, and the
//! wakeup handle its owner parks on while queued.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Stickiness flags pinning a session to its chosen server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessFlags {
    /// Routed by an explicit cookie or URI match.
    pub direct: bool,
    /// A server has been chosen for this session.
    pub assigned: bool,
    /// The outbound address is already set.
    pub addr_set: bool,
}

/// Cookie-derived routing state on the session's transaction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CookieFlags {
    /// A server cookie was matched on the request.
    pub matched: bool,
    /// A server cookie is to be inserted on the response.
    pub to_insert: bool,
}

impl CookieFlags {
    pub fn flush(&mut self) {
        *self = CookieFlags::default();
    }
}

/// Routing slice of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionRouting {
    /// Index of the assigned server on the owning backend.
    pub srv: Option<usize>,
    pub flags: SessFlags,
    pub cookie: CookieFlags,
}

/// A session as seen by the queues and the check engine.
pub struct Session {
    /// Whether the owning backend allows redispatching this session when
    /// its server goes down.
    pub redispatch: bool,
    routing: Mutex<SessionRouting>,
    task: Notify,
}

impl Session {
    pub fn new(redispatch: bool) -> Arc<Self> {
        Arc::new(Self {
            redispatch,
            routing: Mutex::new(SessionRouting::default()),
            task: Notify::new(),
        })
    }

    /// Copy of the current routing state.
    pub fn routing(&self) -> SessionRouting {
        *self.routing.lock()
    }

    /// Point the session at server `idx` (UP-edge queue drain).
    pub fn assign_server(&self, idx: usize) {
        self.routing.lock().srv = Some(idx);
    }

    /// Pin the session to server `idx` with full stickiness, as the router
    /// does after a cookie match.
    pub fn set_sticky(&self, idx: usize) {
        let mut routing = self.routing.lock();
        routing.srv = Some(idx);
        routing.flags = SessFlags { direct: true, assigned: true, addr_set: true };
        routing.cookie.matched = true;
    }

    /// Strip all sticky routing so the dispatcher picks a fresh server:
    /// clears the flags, the chosen server, and the cookie state.
    pub fn prepare_redispatch(&self) {
        let mut routing = self.routing.lock();
        routing.flags = SessFlags::default();
        routing.srv = None;
        routing.cookie.flush();
    }

    /// Wake the session's task.
    pub fn wake(&self) {
        self.task.notify_one();
    }

    /// Await the next wakeup. Session owners park here while queued.
    pub async fn woken(&self) {
        self.task.notified().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("redispatch", &self.redispatch)
            .field("routing", &*self.routing.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redispatch_strips_all_stickiness() {
        let sess = Session::new(true);
        sess.set_sticky(3);
        assert_eq!(sess.routing().srv, Some(3));
        assert!(sess.routing().flags.direct);
        assert!(sess.routing().cookie.matched);

        sess.prepare_redispatch();
        let routing = sess.routing();
        assert_eq!(routing.srv, None);
        assert_eq!(routing.flags, SessFlags::default());
        assert_eq!(routing.cookie, CookieFlags::default());
    }

    #[tokio::test]
    async fn wake_releases_a_parked_owner() {
        let sess = Session::new(true);
        let parked = {
            let sess = sess.clone();
            tokio::spawn(async move { sess.woken().await })
        };
        // the notify permit is stored even if the owner has not parked yet
        sess.wake();
        tokio::time::timeout(std::time::Duration::from_secs(1), parked)
            .await
            .expect("session owner was not woken")
            .unwrap();
    }
}
