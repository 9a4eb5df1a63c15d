//! Pending-connection queues.
//!
//! A session waits either on a specific server's queue (it is pinned there)
//! or on the backend-wide queue (any server will do). The check engine
//! drains the backend queue on UP edges and rescues the server queue on
//! DOWN edges; the routing side parks and unparks sessions here.

use crate::backend::BackendState;
use crate::session::Session;
use std::sync::Arc;

/// A session parked in a queue, waiting for a server slot.
#[derive(Debug)]
pub struct PendConn {
    pub sess: Arc<Session>,
    /// Server queue holding this entry, or `None` for the backend queue.
    pub srv: Option<usize>,
}

impl BackendState {
    /// Park a session on server `idx`'s queue.
    pub fn queue_on_server(&mut self, idx: usize, sess: Arc<Session>) -> Arc<PendConn> {
        let pc = Arc::new(PendConn { sess, srv: Some(idx) });
        self.servers[idx].pendconns.push_back(pc.clone());
        pc
    }

    /// Park a session on the backend-wide queue.
    pub fn queue_on_backend(&mut self, sess: Arc<Session>) -> Arc<PendConn> {
        let pc = Arc::new(PendConn { sess, srv: None });
        self.pending.push_back(pc.clone());
        pc
    }

    /// Pop the oldest pending connection waiting for any server.
    pub fn pendconn_from_backend(&mut self) -> Option<Arc<PendConn>> {
        self.pending.pop_front()
    }

    /// Remove a pending connection from whichever queue holds it.
    /// Returns false if it was already gone.
    pub fn pendconn_free(&mut self, pc: &Arc<PendConn>) -> bool {
        let queue = match pc.srv {
            Some(idx) => &mut self.servers[idx].pendconns,
            None => &mut self.pending,
        };
        match queue.iter().position(|other| Arc::ptr_eq(other, pc)) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Depth of the backend-wide queue.
    pub fn nbpend_backend(&self) -> usize {
        self.pending.len()
    }

    /// Total pending connections, server queues included.
    pub fn nbpend_total(&self) -> usize {
        self.pending.len() + self.servers.iter().map(|s| s.nbpend()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    fn backend() -> BackendState {
        BackendState::new(
            "pool",
            vec![
                Server::new("a", "10.0.0.1:80".parse().unwrap()),
                Server::new("b", "10.0.0.2:80".parse().unwrap()),
            ],
        )
    }

    #[test]
    fn backend_queue_pops_in_fifo_order() {
        let mut st = backend();
        let first = st.queue_on_backend(Session::new(true));
        let second = st.queue_on_backend(Session::new(true));

        let popped = st.pendconn_from_backend().unwrap();
        assert!(Arc::ptr_eq(&popped, &first));
        let popped = st.pendconn_from_backend().unwrap();
        assert!(Arc::ptr_eq(&popped, &second));
        assert!(st.pendconn_from_backend().is_none());
    }

    #[test]
    fn free_removes_from_the_right_queue() {
        let mut st = backend();
        let on_server = st.queue_on_server(1, Session::new(true));
        let on_backend = st.queue_on_backend(Session::new(true));
        assert_eq!(st.nbpend_total(), 2);

        assert!(st.pendconn_free(&on_server));
        assert_eq!(st.servers[1].nbpend(), 0);
        assert!(st.pendconn_free(&on_backend));
        assert_eq!(st.nbpend_backend(), 0);

        // double free is a no-op
        assert!(!st.pendconn_free(&on_server));
    }
}
