//! Connection acceptor and the start/stop control surface.

use crate::config::ServerConfig;
use crate::logger::Logger;
use crate::protocol::{reply, timeouts};
use crate::protocol_core::{with_deadline, write_text};
use crate::session;
use crate::state::AppState;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Running server. Dropping it without `stop` also closes the listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    app: Arc<AppState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Names of currently connected clients
    pub fn online(&self) -> Vec<String> {
        self.app.sessions.names()
    }

    pub fn app(&self) -> &Arc<AppState> {
        &self.app
    }

    /// Close the listening socket. Sessions already accepted keep running
    /// until their connection closes.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Validate the config, load persisted state, bind and start accepting.
pub async fn start(config: ServerConfig, logger: Arc<dyn Logger>) -> Result<ServerHandle> {
    let bind = config.bind_addr();
    let app = Arc::new(AppState::open(config, logger)?);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    let local_addr = listener.local_addr()?;
    app.logger.started(local_addr, &app.upload_dir);

    let (tx, rx) = watch::channel(false);
    let limiter = Arc::new(Semaphore::new(app.config.max_sessions));
    let task = tokio::spawn(accept_loop(listener, app.clone(), limiter, rx));
    Ok(ServerHandle {
        local_addr,
        app,
        shutdown: tx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    app: Arc<AppState>,
    limiter: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = shutdown.changed() => break,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                // Transient (e.g. fd exhaustion): keep serving.
                app.logger.error("accepting connection", &e.to_string());
                tokio::time::sleep(Duration::from_millis(timeouts::ACCEPT_BACKOFF_MS)).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let permit = match limiter.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                app.logger.rejected(peer, "session limit reached");
                tokio::spawn(refuse_busy(stream, app.config.io_timeout()));
                continue;
            }
        };
        let app = app.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let (rd, wr) = stream.into_split();
            session::run(app, peer, rd, wr).await;
        });
    }
    drop(listener);
    app.logger.stopped();
}

/// Send the busy reply, then read until the peer hangs up so unread input
/// does not turn our close into a reset that discards the reply.
async fn refuse_busy(mut stream: TcpStream, limit: Option<Duration>) {
    if write_text(&mut stream, reply::BUSY, limit).await.is_err() {
        return;
    }
    let _ = with_deadline(limit, stream.shutdown()).await;
    let mut sink = tokio::io::sink();
    let _ = with_deadline(limit, tokio::io::copy(&mut stream, &mut sink)).await;
}
