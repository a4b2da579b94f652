//! Minimal inbound SMTP server.
//!
//! Enough of RFC 5321 to accept mail from an MTA or an application:
//! HELO/EHLO, MAIL, RCPT, DATA, RSET, NOOP, VRFY, QUIT. No AUTH, no TLS.
//! Every completed DATA is handed to a [`MailHandler`] before the final
//! reply, so a slow handler slows the client down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::Address;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::SmtpError;

/// Default maximum accepted message size (25 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 25 * 1024 * 1024;

/// RFC 5321 §4.5.3.2.7: server timeout waiting for the next command.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Command lines longer than this are rejected.
const MAX_COMMAND_LINE: usize = 1024;

/// Text lines inside DATA may be long; cap them anyway.
const MAX_DATA_LINE: usize = 64 * 1024;

const MAX_RECIPIENTS: usize = 100;

/// Receives every message the server accepts.
#[async_trait]
pub trait MailHandler: Send + Sync {
    async fn handle(&self, origin: SocketAddr, sender: &str, recipients: &[String], raw: Vec<u8>);
}

/// Per-listener session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hostname announced in the greeting and EHLO reply.
    pub hostname: String,
    pub max_message_size: usize,
}

// ── Listener ────────────────────────────────────────────────────────

pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<SessionConfig>,
}

impl SmtpServer {
    pub async fn bind(listen: &str, config: SessionConfig) -> Result<Self, SmtpError> {
        let listener = TcpListener::bind(listen).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SmtpError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per session.
    pub async fn serve(self, handler: Arc<dyn MailHandler>) -> Result<(), SmtpError> {
        info!(addr = %self.local_addr()?, hostname = %self.config.hostname, "SMTP server listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("SMTP accept failed: {e}");
                    continue;
                }
            };

            debug!(peer = %peer, "SMTP connection accepted");
            let session = Session::new(stream, peer, Arc::clone(&self.config), Arc::clone(&handler));
            tokio::spawn(async move {
                if let Err(e) = session.run().await {
                    error!(peer = %peer, "SMTP session ended with error: {e}");
                }
            });
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Envelope of the transaction in progress.
#[derive(Debug, Default)]
struct Transaction {
    sender: String,
    recipients: Vec<String>,
}

/// One SMTP conversation over any byte stream.
pub struct Session<S> {
    stream: BufReader<S>,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    handler: Arc<dyn MailHandler>,
    helo: Option<String>,
    transaction: Option<Transaction>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: Arc<SessionConfig>,
        handler: Arc<dyn MailHandler>,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            config,
            handler,
            helo: None,
            transaction: None,
        }
    }

    /// Drive the conversation until QUIT, EOF or an idle timeout.
    pub async fn run(mut self) -> Result<(), SmtpError> {
        let greeting = format!("{} ESMTP mail2tg", self.config.hostname);
        self.reply(220, &greeting).await?;

        match self.command_loop().await {
            Err(SmtpError::Timeout(after)) => {
                debug!(peer = %self.peer, "SMTP client idle for {after:?}, closing");
                self.reply(421, "4.4.2 Idle timeout, closing connection").await
            }
            Err(SmtpError::LineTooLong(max)) => {
                self.reply(500, &format!("5.5.2 Line longer than {max} bytes")).await
            }
            other => other,
        }
    }

    async fn command_loop(&mut self) -> Result<(), SmtpError> {
        loop {
            let Some(line) = self.read_line(MAX_COMMAND_LINE).await? else {
                debug!(peer = %self.peer, "SMTP client disconnected");
                return Ok(());
            };
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb, arg.trim()),
                None => (line, ""),
            };

            match verb.to_ascii_uppercase().as_str() {
                "HELO" => self.helo(arg, false).await?,
                "EHLO" => self.helo(arg, true).await?,
                "MAIL" => self.mail(arg).await?,
                "RCPT" => self.rcpt(arg).await?,
                "DATA" => self.data().await?,
                "RSET" => {
                    self.transaction = None;
                    self.reply(250, "2.0.0 OK").await?;
                }
                "NOOP" => self.reply(250, "2.0.0 OK").await?,
                "VRFY" => self.reply(252, "2.5.2 Cannot VRFY user").await?,
                "QUIT" => {
                    self.reply(221, "2.0.0 Bye").await?;
                    return Ok(());
                }
                _ => self.reply(500, "5.5.1 Command not recognized").await?,
            }
        }
    }

    async fn helo(&mut self, arg: &str, extended: bool) -> Result<(), SmtpError> {
        if arg.is_empty() {
            return self.reply(501, "5.5.4 Domain name required").await;
        }
        self.helo = Some(arg.to_string());
        self.transaction = None;

        if extended {
            let lines = [
                self.config.hostname.clone(),
                "8BITMIME".to_string(),
                "PIPELINING".to_string(),
                format!("SIZE {}", self.config.max_message_size),
            ];
            self.reply_multi(250, &lines).await
        } else {
            let hostname = self.config.hostname.clone();
            self.reply(250, &hostname).await
        }
    }

    async fn mail(&mut self, arg: &str) -> Result<(), SmtpError> {
        if self.helo.is_none() {
            return self.reply(503, "5.5.1 Send HELO/EHLO first").await;
        }
        if self.transaction.is_some() {
            return self.reply(503, "5.5.1 Nested MAIL command").await;
        }
        let Some(sender) = strip_prefix_ci(arg, "FROM:").and_then(parse_path) else {
            return self.reply(501, "5.5.4 Syntax: MAIL FROM:<address>").await;
        };
        if !sender.is_empty() && !is_relayable(sender) {
            return self.reply(501, "5.1.7 Bad sender address syntax").await;
        }

        self.transaction = Some(Transaction {
            sender: sender.to_string(),
            recipients: Vec::new(),
        });
        self.reply(250, "2.1.0 OK").await
    }

    async fn rcpt(&mut self, arg: &str) -> Result<(), SmtpError> {
        let Some(count) = self.transaction.as_ref().map(|t| t.recipients.len()) else {
            return self.reply(503, "5.5.1 Need MAIL before RCPT").await;
        };
        let recipient = match strip_prefix_ci(arg, "TO:").and_then(parse_path) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => return self.reply(501, "5.5.4 Syntax: RCPT TO:<address>").await,
        };
        if !is_relayable(&recipient) {
            return self.reply(501, "5.1.3 Bad recipient address syntax").await;
        }
        if count >= MAX_RECIPIENTS {
            return self.reply(452, "4.5.3 Too many recipients").await;
        }

        if let Some(transaction) = self.transaction.as_mut() {
            transaction.recipients.push(recipient);
        }
        self.reply(250, "2.1.5 OK").await
    }

    async fn data(&mut self) -> Result<(), SmtpError> {
        match self.transaction.as_ref().map(|t| t.recipients.is_empty()) {
            None => return self.reply(503, "5.5.1 Need MAIL command").await,
            Some(true) => return self.reply(554, "5.5.1 No valid recipients").await,
            Some(false) => {}
        }
        self.reply(354, "End data with <CR><LF>.<CR><LF>").await?;

        let mut raw = Vec::new();
        let mut oversized = false;
        loop {
            let Some(line) = self.read_line(MAX_DATA_LINE).await? else {
                debug!(peer = %self.peer, "SMTP client disconnected during DATA");
                return Ok(());
            };
            if line == b".\r\n" || line == b".\n" {
                break;
            }
            let line = line.strip_prefix(b".").unwrap_or(&line[..]);
            if raw.len() + line.len() > self.config.max_message_size {
                oversized = true;
            }
            if !oversized {
                raw.extend_from_slice(line);
            }
        }

        let Some(transaction) = self.transaction.take() else {
            return Ok(());
        };
        if oversized {
            warn!(peer = %self.peer, sender = %transaction.sender, "Message exceeds size limit");
            return self
                .reply(552, "5.3.4 Message size exceeds fixed limit")
                .await;
        }

        debug!(peer = %self.peer, bytes = raw.len(), "DATA received");
        self.handler
            .handle(self.peer, &transaction.sender, &transaction.recipients, raw)
            .await;
        self.reply(250, "2.0.0 OK: queued").await
    }

    /// Read one line including its terminator. `None` on EOF.
    async fn read_line(&mut self, limit: usize) -> Result<Option<Vec<u8>>, SmtpError> {
        let mut line = Vec::new();
        let read = tokio::time::timeout(
            IDLE_TIMEOUT,
            (&mut self.stream).take(limit as u64).read_until(b'\n', &mut line),
        )
        .await
        .map_err(|_| SmtpError::Timeout(IDLE_TIMEOUT))??;

        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") && read == limit {
            return Err(SmtpError::LineTooLong(limit));
        }
        Ok(Some(line))
    }

    async fn reply(&mut self, code: u16, text: &str) -> Result<(), SmtpError> {
        let stream = self.stream.get_mut();
        stream.write_all(format!("{code} {text}\r\n").as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn reply_multi(&mut self, code: u16, lines: &[String]) -> Result<(), SmtpError> {
        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
            out.push_str(&format!("{code}{sep}{line}\r\n"));
        }
        let stream = self.stream.get_mut();
        stream.write_all(out.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| s[prefix.len()..].trim_start())
}

/// Only `user@domain` mailboxes are accepted, so that every envelope taken
/// in can be handed to the fallback relay unchanged.
fn is_relayable(address: &str) -> bool {
    address.parse::<Address>().is_ok()
}

/// Extract the address from a reverse- or forward-path, ignoring any
/// ESMTP parameters after it. `<>` yields an empty address.
fn parse_path(s: &str) -> Option<&str> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('<') {
        let end = rest.find('>')?;
        return Some(rest[..end].trim());
    }
    let addr = s.split_whitespace().next()?;
    Some(addr)
}
