//! Per-connection protocol state machine: Handshake -> Active -> Closed.

use crate::error::{SessionError, SessionResult};
use crate::notifications::Notification;
use crate::protocol::{reply, timeouts, Command, CHUNK_SIZE};
use crate::protocol_core::{
    parse_download_request, read_chunk, read_chunk_len, read_line, storage_key, validate_name,
    with_deadline, write_chunk, write_end, write_text,
};
use crate::registry::FileEntry;
use crate::sessions::{peer_writer, PeerWriter};
use crate::state::AppState;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Handshake,
    Active,
    Closed,
}

/// Holds the session's name in the registry; releasing it is the cleanup
/// step every exit path shares.
struct Registration {
    app: Arc<AppState>,
    name: String,
    writer: PeerWriter,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.app.sessions.unregister(&self.name, &self.writer) {
            self.app.logger.disconnected(&self.name);
        }
    }
}

/// Upload being received into a temp file next to its final location.
struct PendingUpload {
    file: tokio::fs::File,
    path: tempfile::TempPath,
}

impl PendingUpload {
    fn create(dir: &Path) -> std::io::Result<Self> {
        let tmp = tempfile::Builder::new().prefix(".upload-").tempfile_in(dir)?;
        let (file, path) = tmp.into_parts();
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
        })
    }

    async fn finish(mut self, target: &Path) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        self.path.persist(target).map_err(|e| e.error)
    }
}

pub struct ClientSession<R> {
    app: Arc<AppState>,
    peer: SocketAddr,
    state: SessionState,
    name: String,
    reader: BufReader<R>,
    writer: PeerWriter,
    io_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

/// Serve one accepted connection until it closes.
pub async fn run<R, W>(app: Arc<AppState>, peer: SocketAddr, reader: R, writer: W)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut session = ClientSession::new(app, peer, reader, peer_writer(writer));
    session.run().await;
}

impl<R> ClientSession<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(app: Arc<AppState>, peer: SocketAddr, reader: R, writer: PeerWriter) -> Self {
        let io_timeout = app.config.io_timeout();
        let idle_timeout = app.config.idle_timeout();
        Self {
            app,
            peer,
            state: SessionState::Handshake,
            name: String::new(),
            reader: BufReader::new(reader),
            writer,
            io_timeout,
            idle_timeout,
        }
    }

    pub async fn run(&mut self) {
        let registration = match self.handshake().await {
            Ok(Some(r)) => r,
            Ok(None) => {
                self.close().await;
                return;
            }
            Err(e) => {
                self.app
                    .logger
                    .error(&format!("during handshake with {}", self.peer), &e.to_string());
                self.close().await;
                return;
            }
        };

        if let Err(e) = self.command_loop().await {
            self.app
                .logger
                .error(&format!("with client '{}'", self.name), &e.to_string());
        }
        self.close().await;
        drop(registration);
    }

    async fn handshake(&mut self) -> SessionResult<Option<Registration>> {
        let requested = match read_line(&mut self.reader, self.io_timeout).await {
            Ok(Some(n)) if n.is_empty() => return Ok(None),
            Ok(Some(n)) => validate_name(&n).map(|_| n),
            Ok(None) => return Ok(None),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => Err(e),
        };

        // Hold our own writer until the welcome is out, so no push can precede it.
        let writer = self.writer.clone();
        let mut w = writer.lock().await;

        let name = match requested {
            Ok(n) => n,
            Err(e) => {
                self.app.logger.rejected(self.peer, &e.to_string());
                write_text(&mut *w, reply::INVALID_NAME, self.io_timeout).await?;
                return Ok(None);
            }
        };
        if !self.app.sessions.try_register(&name, self.writer.clone()) {
            self.app
                .logger
                .rejected(self.peer, &SessionError::Conflict(name).to_string());
            write_text(&mut *w, reply::NAME_IN_USE, self.io_timeout).await?;
            return Ok(None);
        }
        let registration = Registration {
            app: self.app.clone(),
            name: name.clone(),
            writer: self.writer.clone(),
        };
        self.name = name;
        self.app.logger.connected(&self.name, self.peer);
        write_text(&mut *w, reply::WELCOME, self.io_timeout).await?;
        drop(w);

        match self.app.files.ensure_owner(&self.name) {
            Ok(true) => self
                .app
                .logger
                .info(&format!("Created file list for '{}'.", self.name)),
            Ok(false) => {}
            Err(e) => self.app.logger.error(
                &format!("creating file list for '{}'", self.name),
                &format!("{:#}", e),
            ),
        }
        self.state = SessionState::Active;
        Ok(Some(registration))
    }

    async fn command_loop(&mut self) -> SessionResult<()> {
        loop {
            let token = match read_line(&mut self.reader, self.idle_timeout).await {
                Ok(Some(t)) => t,
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {
                    self.reply(reply::UNKNOWN_COMMAND).await?;
                    continue;
                }
            };
            if token.is_empty() {
                continue;
            }
            match Command::parse(&token) {
                Some(Command::Exit) => return Ok(()),
                Some(cmd) => self.dispatch(cmd).await?,
                None => self.reply(reply::UNKNOWN_COMMAND).await?,
            }
        }
    }

    /// Run one sub-protocol. Its failure is reported to the peer; only a
    /// fatal one is passed up to end the session.
    async fn dispatch(&mut self, cmd: Command) -> SessionResult<()> {
        let result = match cmd {
            Command::Upload => self.upload().await,
            Command::List => self.list().await,
            Command::Download => self.download().await,
            Command::Delete => self.delete().await,
            Command::Notifications => self.notifications().await,
            Command::Exit => Ok(()),
        };
        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let (context, generic) = match cmd {
            Command::Upload => ("during file upload", reply::UPLOAD_ERROR),
            Command::Download => ("during file download", reply::DOWNLOAD_ERROR),
            Command::Delete => ("during file deletion", reply::DELETE_ERROR),
            Command::Notifications => ("during notifications handling", reply::NOTIFICATIONS_ERROR),
            Command::List | Command::Exit => ("during file listing", reply::LIST_ERROR),
        };
        let text = match &err {
            SessionError::NotFound(key) => {
                self.app.logger.info(&format!(
                    "File '{}' requested by '{}' not found.",
                    key, self.name
                ));
                reply::NOT_FOUND
            }
            other => {
                self.app
                    .logger
                    .error(&format!("{} by '{}'", context, self.name), &other.to_string());
                generic
            }
        };

        if err.is_fatal() {
            // Best effort, the connection is likely gone.
            let _ = self.reply(text).await;
            return Err(err);
        }
        self.reply(text).await
    }

    async fn reply(&self, text: &str) -> SessionResult<()> {
        let mut w = self.writer.lock().await;
        write_text(&mut *w, text, self.io_timeout).await
    }

    /// Argument line of a command; the peer hanging up here is fatal.
    async fn read_arg(&mut self) -> SessionResult<String> {
        read_line(&mut self.reader, self.io_timeout)
            .await?
            .ok_or_else(|| SessionError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))
    }

    fn stored_path(&self, key: &str) -> PathBuf {
        self.app.upload_dir.join(key)
    }

    async fn upload(&mut self) -> SessionResult<()> {
        // The frames are consumed even when the request is refused, to keep
        // the stream aligned on the next command.
        let requested = match self.read_arg().await {
            Err(e) if e.is_fatal() => return Err(e),
            other => other,
        };
        let mut receiving: SessionResult<PendingUpload> = match &requested {
            Ok(name) => validate_name(name).and_then(|_| {
                PendingUpload::create(&self.app.upload_dir).map_err(SessionError::from)
            }),
            Err(e) => Err(SessionError::protocol(e.to_string())),
        };
        let limit = self.app.config.max_upload_bytes;
        let mut total: u64 = 0;
        loop {
            let len = read_chunk_len(&mut self.reader, self.io_timeout).await?;
            if len == 0 {
                break;
            }
            let chunk = read_chunk(&mut self.reader, len, self.io_timeout).await?;
            total += len as u64;

            let failed = match &mut receiving {
                Ok(_) if limit.map_or(false, |max| total > max) => Some(SessionError::protocol(
                    format!("upload exceeds {} bytes", limit.unwrap_or_default()),
                )),
                Ok(up) => with_deadline(self.io_timeout, up.file.write_all(&chunk))
                    .await
                    .err(),
                Err(_) => None,
            };
            if let Some(e) = failed {
                receiving = Err(e);
            }
        }

        let display_name = requested?;
        let pending = receiving?;
        let key = storage_key(&self.name, &display_name);
        pending.finish(&self.stored_path(&key)).await?;
        if let Err(e) = self.app.files.add(FileEntry::new(&display_name, &self.name)) {
            self.app.logger.error("saving file registry", &format!("{:#}", e));
        }
        self.app.logger.uploaded(&display_name, &self.name, total);
        self.reply(reply::UPLOAD_OK).await
    }

    async fn list(&mut self) -> SessionResult<()> {
        let entries = self.app.files.list();
        if entries.is_empty() {
            self.app
                .logger
                .info("Client requested file list: No files available.");
            return self.reply(reply::LIST_EMPTY).await;
        }
        let mut text = String::new();
        for e in &entries {
            text.push_str(&e.listing_line());
            text.push('\n');
        }
        self.reply(&text).await?;
        self.app
            .logger
            .info(&format!("Sent file list ({} entries) to '{}'.", entries.len(), self.name));
        Ok(())
    }

    async fn download(&mut self) -> SessionResult<()> {
        let request = self.read_arg().await?;
        let (display_name, owner) = parse_download_request(&request)?;
        validate_name(display_name)?;
        validate_name(owner)?;
        let key = storage_key(owner, display_name);
        let path = self.stored_path(&key);

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(key));
            }
            Err(e) => return Err(e.into()),
        };
        if !file.metadata().await?.is_file() {
            return Err(SessionError::NotFound(key));
        }

        self.app
            .logger
            .info(&format!("Sending file '{}' to '{}'...", key, self.name));
        let sent = {
            let mut w = self.writer.lock().await;
            write_text(&mut *w, reply::DOWNLOAD_OK, self.io_timeout).await?;
            stream_file(&mut file, &mut *w, self.io_timeout)
                .await
                .map_err(SessionError::abort_stream)?
        };
        self.app.logger.sent(&key, &self.name, sent);

        let n = Notification::downloaded(owner, display_name, &self.name);
        match self.app.notifications.enqueue(&n) {
            Ok(()) => self.app.logger.notification_stored(owner, &n.text),
            Err(e) => self.app.logger.error(
                &format!("storing notification for '{}'", owner),
                &format!("{:#}", e),
            ),
        }

        // The owner's writer may be busy with a long response of its own;
        // this session goes on with its next command meanwhile.
        let app = self.app.clone();
        let owner = n.owner.clone();
        let message = n.live_message();
        let limit = self
            .io_timeout
            .unwrap_or(Duration::from_secs(timeouts::PUSH_SECS));
        tokio::spawn(async move {
            match app.sessions.push(&owner, &message, limit).await {
                Ok(true) => app.logger.notification_pushed(&owner),
                Ok(false) => {}
                Err(e) => app.logger.error(
                    &format!("sending real-time notification to '{}'", owner),
                    &e.to_string(),
                ),
            }
        });
        Ok(())
    }

    async fn delete(&mut self) -> SessionResult<()> {
        let display_name = self.read_arg().await?;
        validate_name(&display_name)?;
        let key = storage_key(&self.name, &display_name);
        let path = self.stored_path(&key);

        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => {}
            Ok(_) => return Err(SessionError::NotFound(key)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(key));
            }
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(key));
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = self.app.files.remove(&self.name, &display_name) {
            self.app.logger.error("saving file registry", &format!("{:#}", e));
        }
        self.app.logger.deleted(&display_name, &self.name);
        self.reply(reply::DELETE_OK).await
    }

    async fn notifications(&mut self) -> SessionResult<()> {
        let texts = self.app.notifications.drain(&self.name)?;
        if texts.is_empty() {
            self.app
                .logger
                .info(&format!("No notifications for '{}'.", self.name));
            return self.reply(reply::NO_NOTIFICATIONS).await;
        }
        let mut text = texts.join("\n");
        text.push('\n');
        self.reply(&text).await?;
        self.app
            .logger
            .info(&format!("Sent notifications to '{}'.", self.name));
        Ok(())
    }

    /// Shut down the write side; the read side closes when the session drops.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        let mut w = self.writer.lock().await;
        let _ = with_deadline(self.io_timeout, w.shutdown()).await;
    }
}

/// Send `file` as chunk frames followed by the end marker. Returns bytes sent.
async fn stream_file<W>(
    file: &mut tokio::fs::File,
    w: &mut W,
    limit: Option<Duration>,
) -> SessionResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = with_deadline(limit, file.read(&mut buf)).await?;
        if n == 0 {
            break;
        }
        write_chunk(w, &buf[..n], limit).await?;
        total += n as u64;
    }
    write_end(w, limit).await?;
    with_deadline(limit, w.flush()).await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::logger::MemoryLogger;
    use crate::protocol_core::build_chunk_header;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};

    struct Harness {
        _tmp: TempDir,
        app: Arc<AppState>,
        log: Arc<MemoryLogger>,
    }

    fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryLogger::new());
        let app = Arc::new(AppState::open(ServerConfig::new(0, tmp.path()), log.clone()).unwrap());
        Harness { _tmp: tmp, app, log }
    }

    /// Start a session over in-memory pipes; returns the client end.
    fn connect(app: &Arc<AppState>) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        connect_with(app, 256 * 1024)
    }

    fn connect_with(
        app: &Arc<AppState>,
        pipe_size: usize,
    ) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = duplex(pipe_size);
        let (rd, wr) = tokio::io::split(server);
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let task = tokio::spawn(run(app.clone(), peer, rd, wr));
        (client, task)
    }

    async fn expect(client: &mut DuplexStream, text: &str) {
        let mut buf = vec![0u8; text.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&buf), text);
    }

    async fn send_upload(client: &mut DuplexStream, name: &str, chunks: &[&[u8]]) {
        client.write_all(format!("UPLOAD\n{}\n", name).as_bytes()).await.unwrap();
        for c in chunks {
            client.write_all(&build_chunk_header(c.len() as u32)).await.unwrap();
            client.write_all(c).await.unwrap();
        }
        client.write_all(&[0, 0, 0, 0]).await.unwrap();
    }

    /// "OK" plus the chunk stream of a download, reassembled.
    async fn read_download(client: &mut DuplexStream) -> Vec<u8> {
        expect(client, reply::DOWNLOAD_OK).await;
        let mut data = Vec::new();
        loop {
            let mut hdr = [0u8; 4];
            client.read_exact(&mut hdr).await.unwrap();
            let len = u32::from_be_bytes(hdr) as usize;
            if len == 0 {
                return data;
            }
            let mut chunk = vec![0u8; len];
            client.read_exact(&mut chunk).await.unwrap();
            data.extend(chunk);
        }
    }

    async fn wait_for_log(log: &MemoryLogger, needle: &str) {
        for _ in 0..200 {
            if log.contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log never contained {:?}: {:#?}", needle, log.lines());
    }

    async fn read_to_end(client: &mut DuplexStream) -> Vec<u8> {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        rest
    }

    #[tokio::test]
    async fn empty_name_closes_silently() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"   \n").await.unwrap();
        task.await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());
        assert!(h.app.sessions.is_empty());
    }

    #[tokio::test]
    async fn invalid_name_is_refused() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"../root\n").await.unwrap();
        expect(&mut client, reply::INVALID_NAME).await;
        task.await.unwrap();
        assert!(h.app.sessions.is_empty());
    }

    #[tokio::test]
    async fn handshake_then_exit_unregisters() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        assert!(h.app.sessions.is_online("alice"));
        assert_eq!(h.app.files.owner_files("alice"), Some(vec![]));

        client.write_all(b"EXIT\n").await.unwrap();
        task.await.unwrap();
        assert!(!h.app.sessions.is_online("alice"));
        let disconnects = h
            .log
            .lines()
            .iter()
            .filter(|l| l.as_str() == "alice disconnected.")
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn unknown_command_keeps_session() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"alice\nFLY\nLIST\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        expect(&mut client, reply::UNKNOWN_COMMAND).await;
        expect(&mut client, reply::LIST_EMPTY).await;
        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn upload_list_download_delete() {
        let h = harness();
        let (mut client, _task) = connect(&h.app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;

        send_upload(&mut client, "foo.txt", &[b"hello ", b"world"]).await;
        expect(&mut client, reply::UPLOAD_OK).await;
        assert_eq!(
            std::fs::read(h.app.upload_dir.join("alice_foo.txt")).unwrap(),
            b"hello world"
        );

        client.write_all(b"LIST\n").await.unwrap();
        expect(&mut client, "foo.txt (Uploaded by: alice)\n").await;

        client.write_all(b"DOWNLOAD\nfoo.txt,alice\n").await.unwrap();
        expect(&mut client, "OK").await;
        let mut hdr = [0u8; 4];
        client.read_exact(&mut hdr).await.unwrap();
        assert_eq!(u32::from_be_bytes(hdr), 11);
        expect(&mut client, "hello world").await;
        client.read_exact(&mut hdr).await.unwrap();
        assert_eq!(hdr, [0, 0, 0, 0]);
        // alice downloaded her own file while online
        expect(
            &mut client,
            "NOTIFICATION:Your file 'foo.txt' was downloaded by alice.\n",
        )
        .await;

        client.write_all(b"DELETE\nfoo.txt\n").await.unwrap();
        expect(&mut client, reply::DELETE_OK).await;
        assert!(!h.app.upload_dir.join("alice_foo.txt").exists());
        assert!(h.app.files.list().is_empty());

        client.write_all(b"DELETE\nfoo.txt\nDOWNLOAD\nfoo.txt,alice\n").await.unwrap();
        expect(&mut client, reply::NOT_FOUND).await;
        expect(&mut client, reply::NOT_FOUND).await;
    }

    #[tokio::test]
    async fn malformed_download_request_is_generic_error() {
        let h = harness();
        let (mut client, _task) = connect(&h.app);
        client.write_all(b"bob\nDOWNLOAD\nno-comma-here\nLIST\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        expect(&mut client, reply::DOWNLOAD_ERROR).await;
        expect(&mut client, reply::LIST_EMPTY).await;
    }

    #[tokio::test]
    async fn refused_upload_drains_frames_and_leaves_no_file() {
        let h = harness();
        let (mut client, _task) = connect(&h.app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;

        send_upload(&mut client, "../escape", &[b"data"]).await;
        expect(&mut client, reply::UPLOAD_ERROR).await;

        client.write_all(b"LIST\n").await.unwrap();
        expect(&mut client, reply::LIST_EMPTY).await;
        let leftovers: Vec<_> = std::fs::read_dir(&h.app.upload_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != ".fileshare")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn upload_cut_short_leaves_no_partial_file() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;

        client.write_all(b"UPLOAD\nbig.bin\n").await.unwrap();
        client.write_all(&build_chunk_header(100)).await.unwrap();
        client.write_all(&[7u8; 40]).await.unwrap();
        client.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(!h.app.upload_dir.join("alice_big.bin").exists());
        assert!(h.app.files.list().is_empty());
        assert!(h.log.contains("Error during file upload by 'alice'"));
        assert!(!h.app.sessions.is_online("alice"));
    }

    #[tokio::test]
    async fn upload_over_limit_is_refused() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = ServerConfig::new(0, tmp.path());
        cfg.max_upload_bytes = Some(4);
        let app = Arc::new(AppState::open(cfg, Arc::new(MemoryLogger::new())).unwrap());
        let (mut client, _task) = connect(&app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;

        send_upload(&mut client, "a.bin", &[b"abc", b"def"]).await;
        expect(&mut client, reply::UPLOAD_ERROR).await;
        assert!(!app.upload_dir.join("alice_a.bin").exists());

        send_upload(&mut client, "b.bin", &[b"abcd"]).await;
        expect(&mut client, reply::UPLOAD_OK).await;
    }

    #[tokio::test]
    async fn notifications_are_drained_once() {
        let h = harness();
        h.app
            .notifications
            .enqueue(&Notification::downloaded("carol", "x.txt", "dave"))
            .unwrap();
        let (mut client, _task) = connect(&h.app);
        client.write_all(b"carol\nNOTIFICATIONS\nNOTIFICATIONS\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        expect(&mut client, "Your file 'x.txt' was downloaded by dave.\n").await;
        expect(&mut client, reply::NO_NOTIFICATIONS).await;
    }

    #[tokio::test]
    async fn idle_client_times_out() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = ServerConfig::new(0, tmp.path());
        cfg.idle_timeout_secs = 1;
        let app = Arc::new(AppState::open(cfg, Arc::new(MemoryLogger::new())).unwrap());
        let (mut client, task) = connect(&app);
        client.write_all(b"erin\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!app.sessions.is_online("erin"));
    }

    #[tokio::test]
    async fn busy_owner_does_not_stall_downloader() {
        let h = harness();
        let content = vec![7u8; 1024 * 1024];
        std::fs::write(h.app.upload_dir.join("alice_big.bin"), &content).unwrap();

        // alice fetches her own file over a pipe she never drains, so her
        // session sits mid-response holding its writer
        let (mut alice, _alice_task) = connect_with(&h.app, 1024);
        alice.write_all(b"alice\n").await.unwrap();
        expect(&mut alice, reply::WELCOME).await;
        alice.write_all(b"DOWNLOAD\nbig.bin,alice\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (mut bob, _bob_task) = connect(&h.app);
        bob.write_all(b"bob\nDOWNLOAD\nbig.bin,alice\nLIST\n").await.unwrap();
        expect(&mut bob, reply::WELCOME).await;
        assert_eq!(read_download(&mut bob).await, content);
        tokio::time::timeout(Duration::from_secs(2), expect(&mut bob, reply::LIST_EMPTY))
            .await
            .expect("bob waited on alice's connection");
        assert_eq!(
            h.app.notifications.pending("alice"),
            vec!["Your file 'big.bin' was downloaded by bob."]
        );
    }

    #[tokio::test]
    async fn failed_push_is_logged_and_notification_kept() {
        let h = harness();
        std::fs::write(h.app.upload_dir.join("alice_a.txt"), b"abc").unwrap();
        let (dead, far_end) = duplex(64);
        drop(far_end);
        assert!(h.app.sessions.try_register("alice", peer_writer(dead)));

        let (mut bob, _task) = connect(&h.app);
        bob.write_all(b"bob\nDOWNLOAD\na.txt,alice\nLIST\n").await.unwrap();
        expect(&mut bob, reply::WELCOME).await;
        assert_eq!(read_download(&mut bob).await, b"abc");
        expect(&mut bob, reply::LIST_EMPTY).await;

        wait_for_log(&h.log, "Error sending real-time notification to 'alice'").await;
        assert_eq!(
            h.app.notifications.pending("alice"),
            vec!["Your file 'a.txt' was downloaded by bob."]
        );
    }

    #[tokio::test]
    async fn registry_save_failure_still_reports_success() {
        let h = harness();
        // a directory where the catalog document goes makes every save fail
        let state_dir = h.app.config.state_dir();
        std::fs::create_dir(state_dir.join(crate::store::CATALOG_FILE)).unwrap();

        let (mut client, _task) = connect(&h.app);
        client.write_all(b"alice\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;

        send_upload(&mut client, "foo.txt", &[b"data"]).await;
        expect(&mut client, reply::UPLOAD_OK).await;
        assert!(h.log.contains("Error saving file registry"));

        client.write_all(b"LIST\n").await.unwrap();
        expect(&mut client, "foo.txt (Uploaded by: alice)\n").await;

        client.write_all(b"DELETE\nfoo.txt\n").await.unwrap();
        expect(&mut client, reply::DELETE_OK).await;
        assert!(h.app.files.list().is_empty());
        assert!(!h.app.upload_dir.join("alice_foo.txt").exists());
    }

    #[tokio::test]
    async fn undecodable_lines_keep_the_stream_aligned() {
        let h = harness();
        let (mut client, _task) = connect(&h.app);
        client.write_all(b"alice\n\xff\xfe\n").await.unwrap();
        expect(&mut client, reply::WELCOME).await;
        expect(&mut client, reply::UNKNOWN_COMMAND).await;

        client.write_all(b"UPLOAD\nna\xffme.txt\n").await.unwrap();
        client.write_all(&build_chunk_header(4)).await.unwrap();
        client.write_all(b"data").await.unwrap();
        client.write_all(&[0, 0, 0, 0]).await.unwrap();
        expect(&mut client, reply::UPLOAD_ERROR).await;

        client.write_all(b"LIST\n").await.unwrap();
        expect(&mut client, reply::LIST_EMPTY).await;
    }

    #[tokio::test]
    async fn undecodable_handshake_name_is_invalid() {
        let h = harness();
        let (mut client, task) = connect(&h.app);
        client.write_all(b"al\xffice\n").await.unwrap();
        expect(&mut client, reply::INVALID_NAME).await;
        task.await.unwrap();
        assert!(h.app.sessions.is_empty());
    }
}
