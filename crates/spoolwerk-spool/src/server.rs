// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The daemon event loop.
//
// One task owns the `Spooler` and waits on every source of work at once:
// the command FIFO, the control socket, accepted network connections,
// child exits, the tick timer and the shutdown signal.  Anything that has
// to wait on a peer (reading a control request, accepting on a listener)
// runs in its own task and hands finished work to the loop over a channel,
// so the tables are only ever touched here.

use std::future::Future;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::Duration;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use spoolwerk_core::config::SpoolConfig;
use spoolwerk_core::error::{Result, SpoolError};

use crate::control::{self, CONTROL_BAD_REQUEST, ControlHeader, ControlReply};
use crate::listener;
use crate::lockfile::LockFile;
use crate::spooler::Spooler;
use crate::supervisor::{ChildExit, HelperKind, ProcessLauncher};

/// How long a control client gets to send its request.
const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Permissions of a freshly made command FIFO (before umask).
const FIFO_MODE: u32 = 0o622;

/// A control request waiting for the loop to answer it.
struct ControlCall {
    header: ControlHeader,
    body: Vec<u8>,
    reply: oneshot::Sender<ControlReply>,
}

/// Run the daemon until SIGTERM or SIGINT.
pub async fn run(config: SpoolConfig) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    serve(config, async move {
        tokio::select! {
            _ = terminate.recv() => info!("SIGTERM received"),
            _ = interrupt.recv() => info!("SIGINT received"),
        }
    })
    .await
}

/// Run the daemon until `shutdown` completes.
///
/// Startup order: work directories, lock file, destinations and persisted
/// state, FIFO, control socket, listeners, queue recovery.  On a clean
/// shutdown every destination record is saved, `SHUTDOWN` is logged and the
/// lock file removed.  A fatal error saves what it can and leaves the lock
/// file behind.
#[instrument(skip_all, fields(node = %config.node_name))]
pub async fn serve(config: SpoolConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    config.ensure_directories()?;
    let lock = LockFile::acquire(&config.paths.lock_file)?;
    let paths = config.paths.clone();

    let (launcher, exits) = ProcessLauncher::new();
    let exit_sender = launcher.exit_sender();
    let mut spooler = Spooler::new(config, Box::new(launcher))?;

    let fifo = open_fifo(&paths.fifo)?;
    let control = bind_control(&paths.control_socket)?;
    let specs = listener::parse_listen_list(
        spooler.config().listen.as_deref().unwrap_or(""),
        spooler.config().max_listeners,
    )?;
    let listeners = listener::bind_listeners(&specs).await?;

    let recovered = spooler.recover_queue()?;
    info!(jobs = recovered, printers = spooler.registry().printers.len(), "spooler started");

    let endpoints = Endpoints {
        fifo,
        control,
        listeners,
    };
    match event_loop(&mut spooler, endpoints, exits, exit_sender, shutdown).await {
        Ok(()) => {
            spooler.shutdown();
            if let Err(e) = std::fs::remove_file(&paths.control_socket) {
                debug!(error = %e, "control socket not removed");
            }
            lock.release();
            info!("spooler stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "fatal error, saving state and exiting");
            spooler.persist_all();
            Err(e)
        }
    }
}

struct Endpoints {
    fifo: pipe::Receiver,
    control: UnixListener,
    listeners: Vec<TcpListener>,
}

async fn event_loop(
    spooler: &mut Spooler,
    endpoints: Endpoints,
    mut exits: mpsc::UnboundedReceiver<ChildExit>,
    exit_sender: mpsc::UnboundedSender<ChildExit>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let Endpoints {
        fifo,
        control,
        listeners,
    } = endpoints;
    let mut commands = BufReader::new(fifo);
    let mut pending = Vec::new();

    let (calls_tx, mut calls) = mpsc::channel::<ControlCall>(16);
    let (conns_tx, mut connections) = mpsc::channel::<(TcpStream, SocketAddr)>(16);
    for listener in listeners {
        tokio::spawn(accept_connections(listener, conns_tx.clone()));
    }

    let tick = Duration::from_secs(spooler.config().scheduling.tick_interval.max(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                return Ok(());
            }
            read = commands.read_until(b'\n', &mut pending) => {
                if read? == 0 {
                    return Err(SpoolError::Internal("command FIFO closed".into()));
                }
                let line = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                settle(spooler.handle_fifo_line(&line), "FIFO command")?;
            }
            accepted = control.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(read_control(stream, calls_tx.clone()));
                }
                Err(e) => warn!(error = %e, "control socket accept failed"),
            },
            Some(call) = calls.recv() => {
                let reply = spooler.control_request(&call.header, &call.body);
                if call.reply.send(reply).is_err() {
                    debug!("control client went away before its reply");
                }
            }
            Some((stream, peer)) = connections.recv() => {
                let started = listener::hand_off(
                    &spooler.config().programs.listener,
                    stream,
                    peer,
                    &exit_sender,
                );
                match started {
                    Ok(pid) => spooler.children.add_helper(pid, HelperKind::Listener),
                    Err(e) => warn!(peer = %peer, error = %e, "connection dropped"),
                }
            }
            Some(exit) = exits.recv() => settle(spooler.reap(exit), "child exit")?,
            _ = ticker.tick() => settle(spooler.tick(), "tick")?,
        }
    }
}

/// Log an error the daemon survives; pass a fatal one up.
fn settle(result: Result<()>, source: &str) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(source, error = %e, "request failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

async fn accept_connections(listener: TcpListener, connections: mpsc::Sender<(TcpStream, SocketAddr)>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "network connection accepted");
                if connections.send((stream, peer)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "network accept failed"),
        }
    }
}

/// Read one control request, have the loop answer it and write the reply.
async fn read_control(stream: UnixStream, calls: mpsc::Sender<ControlCall>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let reply = match tokio::time::timeout(CONTROL_READ_TIMEOUT, control::read_request(&mut reader)).await {
        Ok(Ok((header, body))) => {
            let (tx, rx) = oneshot::channel();
            let call = ControlCall {
                header,
                body,
                reply: tx,
            };
            if calls.send(call).await.is_err() {
                return;
            }
            match rx.await {
                Ok(reply) => reply,
                Err(_) => return,
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "bad control request");
            ControlReply::rejected(CONTROL_BAD_REQUEST)
        }
        Err(_) => {
            warn!("control request timed out");
            ControlReply::rejected(CONTROL_BAD_REQUEST)
        }
    };
    if let Err(e) = write.write_all(&reply.render()).await {
        debug!(error = %e, "control reply not delivered");
        return;
    }
    if let Err(e) = write.shutdown().await {
        debug!(error = %e, "control socket shutdown failed");
    }
}

/// Make the command FIFO if needed and open it.  Opening for reading and
/// writing keeps the pipe from reporting end-of-file when clients close.
fn open_fifo(path: &Path) -> Result<pipe::Receiver> {
    let startup = |reason: String| SpoolError::Startup(format!("FIFO {}: {reason}", path.display()));
    let make = || mkfifo(path, Mode::from_bits_truncate(FIFO_MODE)).map_err(|e| startup(e.to_string()));
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => {}
        Ok(_) => {
            warn!(path = %path.display(), "replacing non-FIFO at the FIFO path");
            std::fs::remove_file(path).map_err(|e| startup(e.to_string()))?;
            make()?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => make()?,
        Err(e) => return Err(startup(e.to_string())),
    }
    pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(|e| startup(e.to_string()))
}

/// Bind the control socket, replacing a stale one.
fn bind_control(path: &Path) -> Result<UnixListener> {
    let startup = |reason: String| SpoolError::Startup(format!("control socket {}: {reason}", path.display()));
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(startup(e.to_string())),
        _ => {}
    }
    UnixListener::bind(path).map_err(|e| startup(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::ipp::OP_CUPS_GET_PRINTERS;
    use crate::ipp::tests::build_request;
    use crate::testutil::{config_in, write_printer};

    async fn wait_until(mut ready: impl FnMut() -> bool) {
        for _ in 0..250 {
            if ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    fn change_log(config: &SpoolConfig) -> String {
        std::fs::read_to_string(&config.paths.change_log).unwrap_or_default()
    }

    #[tokio::test]
    async fn serves_fifo_and_control_then_shuts_down() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        write_printer(&config, "laser1", "");
        let probe = config.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let client = async {
            let paths = &probe.paths;
            wait_until(|| paths.control_socket.exists()).await;

            let ipp = build_request(OP_CUPS_GET_PRINTERS, 9, &[]);
            let mut stream = UnixStream::connect(&paths.control_socket).await.expect("connect");
            stream
                .write_all(format!("IPP {} REMOTE_USER=alice\n", ipp.len()).as_bytes())
                .await
                .expect("write header");
            stream.write_all(&ipp).await.expect("write body");
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.expect("read reply");
            assert!(reply.starts_with(b"0 0\n"), "reply {reply:?}");

            write_printer(&probe, "laser2", "");
            let mut fifo = std::fs::OpenOptions::new()
                .write(true)
                .open(&paths.fifo)
                .expect("open FIFO");
            fifo.write_all(b"bogus\nN P laser2\n").expect("write FIFO");
            wait_until(|| change_log(&probe).contains("PRNRELOAD")).await;

            stop_tx.send(()).expect("stop");
        };
        let server = serve(config.clone(), async {
            let _ = stop_rx.await;
        });

        let (served, ()) = tokio::join!(server, client);
        served.expect("clean shutdown");
        assert!(!config.paths.lock_file.exists());
        assert!(!config.paths.control_socket.exists());
        assert!(change_log(&config).contains("SHUTDOWN"));
    }

    #[tokio::test]
    async fn second_daemon_refuses_to_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let _held = LockFile::acquire(&config.paths.lock_file).expect("lock");
        let result = serve(config, async {}).await;
        assert!(matches!(result, Err(SpoolError::AlreadyRunning(_))));
    }

    #[test]
    fn settle_keeps_going_on_client_errors() {
        assert!(settle(Err(SpoolError::MalformedCommand("x".into())), "test").is_ok());
        assert!(settle(Err(SpoolError::Internal("x".into())), "test").is_err());
    }
}
