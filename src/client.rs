//! Async client for the fileshare protocol.
//!
//! Real-time `NOTIFICATION:` lines may arrive between any two replies; they
//! are set aside and handed out by [`Client::next_notification`].

use crate::error::SessionError;
use crate::protocol::{reply, timeouts, CHUNK_SIZE};
use crate::protocol_core::{read_chunk, read_chunk_len, read_line, with_deadline, write_chunk, write_end, write_text};
use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    live: VecDeque<String>,
    timeout: Option<Duration>,
}

fn is(line: &str, literal: &str) -> bool {
    line == literal.trim_end()
}

impl Client {
    /// Connect and claim `name`. Fails with the server's message when the
    /// name is taken or invalid.
    pub async fn connect(addr: SocketAddr, name: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect {}", addr))?;
        let _ = stream.set_nodelay(true);
        let (rd, wr) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(rd),
            writer: wr,
            live: VecDeque::new(),
            timeout: Some(Duration::from_secs(timeouts::IO_SECS)),
        };
        client.send_line(name).await?;
        let greeting = client
            .read_reply()
            .await
            .context("server closed the connection during handshake")?;
        if !is(&greeting, reply::WELCOME) {
            bail!("{}", greeting);
        }
        Ok(client)
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        write_text(&mut self.writer, &format!("{}\n", line), self.timeout).await?;
        Ok(())
    }

    /// Next reply line, setting aside real-time notifications.
    async fn read_reply(&mut self) -> Result<String> {
        loop {
            let line = match read_line(&mut self.reader, self.timeout).await? {
                Some(l) => l,
                None => bail!("connection closed by server"),
            };
            if let Some(text) = line.strip_prefix(reply::NOTIFICATION_PREFIX) {
                self.live.push_back(text.to_string());
                continue;
            }
            return Ok(line);
        }
    }

    /// First reply line plus every further line that arrives before the
    /// connection goes quiet.
    async fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = vec![self.read_reply().await?];
        let settle = Some(Duration::from_millis(timeouts::REPLY_SETTLE_MS));
        while let Ok(Some(line)) = read_line(&mut self.reader, settle).await {
            match line.strip_prefix(reply::NOTIFICATION_PREFIX) {
                Some(text) => self.live.push_back(text.to_string()),
                None => lines.push(line),
            }
        }
        Ok(lines)
    }

    /// Send an arbitrary command token and return the first reply line.
    pub async fn command(&mut self, token: &str) -> Result<String> {
        self.send_line(token).await?;
        self.read_reply().await
    }

    pub async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.send_line("UPLOAD").await?;
        self.send_line(name).await?;
        for chunk in data.chunks(CHUNK_SIZE) {
            write_chunk(&mut self.writer, chunk, self.timeout).await?;
        }
        write_end(&mut self.writer, self.timeout).await?;
        self.writer.flush().await?;
        let line = self.read_reply().await?;
        if !is(&line, reply::UPLOAD_OK) {
            bail!("{}", line);
        }
        Ok(())
    }

    /// `Ok(None)` when the server has no such file.
    pub async fn download(&mut self, name: &str, owner: &str) -> Result<Option<Vec<u8>>> {
        self.send_line("DOWNLOAD").await?;
        self.send_line(&format!("{},{}", name, owner)).await?;
        loop {
            // "OK" carries no newline; anything else is a full line.
            let mut head = [0u8; 2];
            with_deadline(self.timeout, self.reader.read_exact(&mut head)).await?;
            if &head == reply::DOWNLOAD_OK.as_bytes() {
                break;
            }
            let rest = read_line(&mut self.reader, self.timeout)
                .await?
                .unwrap_or_default();
            let line = format!("{}{}", String::from_utf8_lossy(&head), rest);
            let line = line.trim();
            if let Some(text) = line.strip_prefix(reply::NOTIFICATION_PREFIX) {
                self.live.push_back(text.to_string());
                continue;
            }
            if is(line, reply::NOT_FOUND) {
                return Ok(None);
            }
            bail!("{}", line);
        }

        let mut data = Vec::new();
        loop {
            let len = read_chunk_len(&mut self.reader, self.timeout).await?;
            if len == 0 {
                break;
            }
            data.extend(read_chunk(&mut self.reader, len, self.timeout).await?);
        }
        Ok(Some(data))
    }

    /// Catalog lines `"<name> (Uploaded by: <owner>)"`; empty when there are none.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        self.send_line("LIST").await?;
        let lines = self.read_lines().await?;
        if lines.len() == 1 && is(&lines[0], reply::LIST_EMPTY) {
            return Ok(Vec::new());
        }
        if lines[0].starts_with("ERROR:") {
            bail!("{}", lines[0]);
        }
        Ok(lines)
    }

    /// `Ok(false)` when the server has no such file of ours.
    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        self.send_line("DELETE").await?;
        self.send_line(name).await?;
        let line = self.read_reply().await?;
        if is(&line, reply::DELETE_OK) {
            return Ok(true);
        }
        if is(&line, reply::NOT_FOUND) {
            return Ok(false);
        }
        bail!("{}", line)
    }

    /// Fetch and clear the stored notifications.
    pub async fn notifications(&mut self) -> Result<Vec<String>> {
        self.send_line("NOTIFICATIONS").await?;
        let lines = self.read_lines().await?;
        if lines.len() == 1 && is(&lines[0], reply::NO_NOTIFICATIONS) {
            return Ok(Vec::new());
        }
        if lines[0].starts_with("ERROR:") {
            bail!("{}", lines[0]);
        }
        Ok(lines)
    }

    /// Next real-time notification, waiting up to `wait` for one to arrive.
    pub async fn next_notification(&mut self, wait: Duration) -> Result<Option<String>> {
        if let Some(text) = self.live.pop_front() {
            return Ok(Some(text));
        }
        let line = match read_line(&mut self.reader, Some(wait)).await {
            Ok(Some(l)) => l,
            Ok(None) => bail!("connection closed by server"),
            Err(SessionError::Timeout(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match line.strip_prefix(reply::NOTIFICATION_PREFIX) {
            Some(text) => Ok(Some(text.to_string())),
            None => bail!("unexpected line from server: {}", line),
        }
    }

    pub async fn exit(mut self) -> Result<()> {
        self.send_line("EXIT").await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
