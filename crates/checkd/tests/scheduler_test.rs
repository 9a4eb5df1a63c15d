//! Integration tests driving real check tasks against local listeners.

use balancer::{Backend, BackendState, Server, Session};
use checkd::metrics::MetricsRegistry;
use checkd::scheduler::spawn_backend_checks;
use dashmap::DashMap;
use healthcheck::liveness::Liveness;
use healthcheck::types::CheckSpec;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// A server with fast check timing for tests: 100ms interval, rise 2, fall 2.
fn quick_server(name: &str, addr: SocketAddrV4) -> Server {
    let mut srv = Server::new(name, addr);
    srv.inter = Duration::from_millis(100);
    srv.rise = 2;
    srv.fall = 2;
    srv
}

async fn local_addr() -> (TcpListener, SocketAddrV4) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        _ => unreachable!(),
    };
    (listener, addr)
}

fn start_checks(backend: &Arc<Backend>, spec: CheckSpec) -> CancellationToken {
    let cancel = CancellationToken::new();
    let tasks = DashMap::new();
    spawn_backend_checks(
        backend,
        &spec,
        &Arc::new(Semaphore::new(16)),
        &Arc::new(MetricsRegistry::new()),
        &cancel,
        &tasks,
    );
    cancel
}

async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn a_dead_server_goes_down_and_redispatchable_sessions_are_rescued() {
    // grab a port with nothing listening on it
    let (listener, addr) = local_addr().await;
    drop(listener);

    let mut state = BackendState::new("pool", vec![quick_server("web1", addr)]);
    state.redispatch = true;
    let backend = Backend::new(state);

    let movable = Session::new(true);
    let pinned = Session::new(false);
    {
        let mut st = backend.state();
        movable.set_sticky(0);
        pinned.set_sticky(0);
        st.queue_on_server(0, movable.clone());
        st.queue_on_server(0, pinned.clone());
    }

    let cancel = start_checks(&backend, CheckSpec::tcp());

    // boot liveness has no cushion, so the first refused probe takes it down
    let went_down = wait_until(Duration::from_secs(3), || !backend.state().servers[0].is_up()).await;
    assert!(went_down, "server never went down");

    {
        let st = backend.state();
        assert_eq!(st.servers[0].down_trans, 1);
        assert_eq!(st.servers[0].health(), 0);
        // only the redispatchable session left the queue
        assert_eq!(st.servers[0].nbpend(), 1);
        assert_eq!(st.srv_act, 0);
        assert!(st.server_map.is_empty());
    }

    assert_eq!(movable.routing().srv, None);
    assert!(!movable.routing().flags.assigned);
    tokio::time::timeout(Duration::from_millis(100), movable.woken())
        .await
        .expect("rescued session was not woken");

    assert_eq!(pinned.routing().srv, Some(0));

    cancel.cancel();
}

#[tokio::test]
async fn a_recovering_server_comes_up_and_drains_the_backend_queue() {
    let (listener, addr) = local_addr().await;
    let accept_loop = tokio::spawn(async move {
        loop {
            if let Ok((conn, _)) = listener.accept().await {
                drop(conn);
            }
        }
    });

    let backend = Backend::new(BackendState::new("pool", vec![quick_server("web1", addr)]));
    let first = Session::new(true);
    let second = Session::new(true);
    {
        let mut st = backend.state();
        st.servers[0].liveness = Liveness::down();
        st.recount_servers();
        st.recalc_server_map();
        assert!(st.server_map.is_empty());
        st.queue_on_backend(first.clone());
        st.queue_on_backend(second.clone());
    }

    let cancel = start_checks(&backend, CheckSpec::tcp());

    let came_up = wait_until(Duration::from_secs(3), || backend.state().servers[0].is_up()).await;
    assert!(came_up, "server never came up");

    {
        let st = backend.state();
        let srv = &st.servers[0];
        // the crossing restored the full cushion
        assert_eq!(srv.health(), srv.rise + srv.fall - 1);
        assert_eq!(st.srv_act, 1);
        assert_eq!(st.server_map, vec![0]);
        // both queued sessions were drained into the fresh server
        assert_eq!(st.nbpend_backend(), 0);
    }
    assert_eq!(first.routing().srv, Some(0));
    assert_eq!(second.routing().srv, Some(0));

    cancel.cancel();
    accept_loop.abort();
}

#[tokio::test]
async fn a_silent_server_times_out_and_goes_down() {
    let (listener, addr) = local_addr().await;
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((conn, _)) = listener.accept().await {
                // accept and never answer
                held.push(conn);
            }
        }
    });

    let backend = Backend::new(BackendState::new("pool", vec![quick_server("web1", addr)]));
    let cancel = start_checks(&backend, CheckSpec::http("/", "HTTP/1.0"));

    let went_down = wait_until(Duration::from_secs(3), || !backend.state().servers[0].is_up()).await;
    assert!(went_down, "server never timed out");
    assert_eq!(backend.state().servers[0].down_trans, 1);

    cancel.cancel();
    hold.abort();
}

#[tokio::test]
async fn a_stopped_backend_is_not_probed() {
    let (listener, addr) = local_addr().await;
    drop(listener);

    let mut state = BackendState::new("pool", vec![quick_server("web1", addr)]);
    state.stopped = true;
    let backend = Backend::new(state);

    let cancel = start_checks(&backend, CheckSpec::tcp());

    // the task keeps ticking but never probes, so the dead address is
    // never noticed
    tokio::time::sleep(Duration::from_millis(600)).await;
    {
        let st = backend.state();
        assert!(st.servers[0].is_up());
        assert_eq!(st.servers[0].down_trans, 0);
        assert_eq!(st.servers[0].failed_checks, 0);
    }

    cancel.cancel();
}

#[tokio::test]
async fn healthy_http_probes_restore_the_full_cushion() {
    let (listener, addr) = local_addr().await;
    let responder = tokio::spawn(async move {
        loop {
            if let Ok((mut conn, _)) = listener.accept().await {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 256];
                let _ = conn.read(&mut buf).await;
                let _ = conn.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await;
            }
        }
    });

    let mut srv = quick_server("web1", addr);
    srv.fall = 3;
    let backend = Backend::new(BackendState::new("pool", vec![srv]));
    let cancel = start_checks(&backend, CheckSpec::http("/", "HTTP/1.0"));

    // healthy probes push the cushion to its clamp
    let settled = wait_until(Duration::from_secs(3), || {
        let st = backend.state();
        st.servers[0].health() == st.servers[0].rise + st.servers[0].fall - 1
    })
    .await;
    assert!(settled, "server never reached full health");
    assert!(backend.state().servers[0].is_up());

    cancel.cancel();
    responder.abort();
}
