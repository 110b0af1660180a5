//! Session-wide local port allocation
//!
//! Ports come from the OS (bind to port 0) and are remembered, so no two
//! allocations in one session ever hand out the same port even after the
//! first user released it. Safe to share between concurrently running tests.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

const MAX_ATTEMPTS: usize = 64;

#[derive(Clone, Default)]
pub struct PortAllocator {
    issued: Arc<Mutex<HashSet<u16>>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never hand out these ports (e.g. the backend's own port)
    pub fn reserve(&self, ports: impl IntoIterator<Item = u16>) {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        issued.extend(ports);
    }

    /// Pick a free local port not issued before in this session.
    ///
    /// Another process may still grab the port between this call and the
    /// caller binding it; callers retry with a fresh allocation when that
    /// happens.
    pub fn allocate(&self) -> HarnessResult<u16> {
        for _ in 0..MAX_ATTEMPTS {
            let port = probe_free_port()?;
            let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
            if issued.insert(port) {
                debug!("🔌 Allocated local port {}", port);
                return Ok(port);
            }
        }
        Err(HarnessError::unavailable(
            "local port",
            format!("no unused port after {MAX_ATTEMPTS} attempts"),
        ))
    }

    pub fn is_issued(&self, port: u16) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}

/// Ask the OS for a currently free loopback port
fn probe_free_port() -> HarnessResult<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    Ok(listener.local_addr()?.port())
}

/// True if something accepts connections on the loopback `port`
pub async fn is_port_bound(port: u16) -> bool {
    tokio::net::TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .await
        .is_ok()
}
