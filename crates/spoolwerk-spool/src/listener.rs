// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network listeners.
//
// The daemon binds each configured `[address]:port` and, for every
// connection accepted, runs the listener program with the socket as its
// standard input, output and error.  The program speaks whatever network
// protocol the port carries; the daemon never reads from the socket.

use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spoolwerk_core::error::{Result, SpoolError};

use crate::supervisor::{ChildExit, ExitOutcome};

/// One item of the listen list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSpec {
    /// `None` binds every address.
    pub host: Option<String>,
    pub port: u16,
}

impl ListenSpec {
    fn bind_target(&self) -> String {
        match &self.host {
            Some(host) if host.contains(':') => format!("[{host}]:{}", self.port),
            Some(host) => format!("{host}:{}", self.port),
            None => format!("0.0.0.0:{}", self.port),
        }
    }
}

impl std::fmt::Display for ListenSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host.as_deref().unwrap_or("*"), self.port)
    }
}

/// Parse a comma separated list of `[address]:port` items.  An empty
/// address or `*` means any address.  More than `max` items is a startup
/// error.
pub fn parse_listen_list(list: &str, max: usize) -> Result<Vec<ListenSpec>> {
    let mut specs = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let bad = |why: &str| SpoolError::Startup(format!("listen item {item:?}: {why}"));
        let (host, port) = match item.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => ("", item),
        };
        let port: u16 = port.parse().map_err(|_| bad("port is not a number"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = match host {
            "" | "*" => None,
            other => Some(other.to_string()),
        };
        if specs.len() == max {
            return Err(SpoolError::TooMany {
                kind: "listeners",
                limit: max,
            });
        }
        specs.push(ListenSpec { host, port });
    }
    Ok(specs)
}

/// Bind every listener.  An address already in use is skipped; any other
/// failure is fatal.
pub async fn bind_listeners(specs: &[ListenSpec]) -> Result<Vec<TcpListener>> {
    let mut bound = Vec::with_capacity(specs.len());
    for spec in specs {
        match TcpListener::bind(spec.bind_target()).await {
            Ok(listener) => {
                info!(listen = %spec, "listening");
                bound.push(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!(listen = %spec, "address in use, listener skipped");
            }
            Err(e) => {
                return Err(SpoolError::Startup(format!("cannot listen on {spec}: {e}")));
            }
        }
    }
    Ok(bound)
}

/// Run `program` on an accepted connection.  The exit is reported on
/// `exits` like any other child's.
pub fn hand_off(
    program: &Path,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    exits: &mpsc::UnboundedSender<ChildExit>,
) -> Result<u32> {
    let spawn_err = |reason: String| SpoolError::Spawn {
        program: program.display().to_string(),
        reason,
    };

    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    let socket = OwnedFd::from(stream);
    let output = socket.try_clone()?;
    let errors = socket.try_clone()?;

    let mut child = tokio::process::Command::new(program)
        .env("REMOTE_ADDR", peer.ip().to_string())
        .stdin(Stdio::from(socket))
        .stdout(Stdio::from(output))
        .stderr(Stdio::from(errors))
        .spawn()
        .map_err(|e| spawn_err(e.to_string()))?;
    let pid = child
        .id()
        .ok_or_else(|| spawn_err("child exited before its pid was read".into()))?;

    let exits = exits.clone();
    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => ExitOutcome::from_status(status),
            Err(e) => {
                warn!(pid, error = %e, "wait for listener child failed");
                ExitOutcome::Code(-1)
            }
        };
        if exits.send(ChildExit { pid, outcome }).is_err() {
            debug!(pid, "listener exit reported after event loop closed");
        }
    });

    debug!(pid, peer = %peer, "connection handed off");
    Ok(pid)
}
