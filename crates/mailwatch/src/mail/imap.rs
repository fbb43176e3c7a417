//! IMAP implementation of [`MailClient`].

use std::future::Future;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

use crate::config::AccountConfig;
use crate::secrets::resolve_account_password;

use super::client::{MailClient, SessionOptions};
use super::error::{MailError, Result};
use super::headers::parse_header_block;
use super::message::MessageHeader;
use super::window::{RecentWindow, WindowStep};

/// Messages requested per FETCH round trip.
const FETCH_CHUNK: u32 = 20;

/// Header-only fetch; `BODY.PEEK` leaves the `\Seen` flag untouched.
const HEADER_QUERY: &str = "(UID BODY.PEEK[HEADER])";

type AsyncTcpStream = async_io::Async<TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;
type ImapSession = Session<TlsStream>;

/// Read-only IMAP client over implicit TLS.
///
/// Every call opens its own session with the limits passed to it and logs
/// out afterwards, so one instance can serve all accounts concurrently and
/// always uses the current settings.
#[derive(Debug, Clone, Default)]
pub struct ImapMailClient;

impl ImapMailClient {
    pub fn new() -> Self {
        Self
    }
}

/// One session's worth of work under fixed options.
struct Exchange<'a> {
    options: &'a SessionOptions,
}

impl Exchange<'_> {
    fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Runs one network step under the connection timeout.
    async fn step<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::time::timeout(self.timeout(), fut)
            .await
            .map_err(|_| MailError::Timeout(self.timeout()))
    }

    async fn connect(&self, account: &AccountConfig) -> Result<ImapSession> {
        if !account.tls {
            return Err(MailError::InvalidConfig(
                "TLS is required for secure email connections".to_string(),
            ));
        }
        if account.server.trim().is_empty() || account.user_id.trim().is_empty() {
            return Err(MailError::InvalidConfig(
                "Server and user id must not be empty".to_string(),
            ));
        }

        let password = resolve_account_password(&account.auth)?;

        let server = account.server.trim().to_string();
        info!("Connecting to IMAP server at {}:{}", server, account.port);

        let tcp_stream = self.open_tcp(&server, account.port).await?;

        let tls = TlsConnector::new();
        let tls_stream = self
            .step(tls.connect(&server, tcp_stream))
            .await?
            .map_err(|source| MailError::Tls {
                server: server.clone(),
                source,
            })?;

        let client = async_imap::Client::new(tls_stream);
        let login = self
            .step(client.login(account.user_id.trim(), password.expose_secret()))
            .await?;

        match login {
            Ok(session) => {
                debug!("Authenticated as {}", account.user_id);
                Ok(session)
            }
            Err((e, _client)) => Err(login_error(&account.user_id, e)),
        }
    }

    /// Establishes the TCP connection with std::net and wraps it with async-io.
    async fn open_tcp(&self, server: &str, port: u16) -> Result<AsyncTcpStream> {
        let addr = format!("{}:{}", server, port);
        let timeout = self.timeout();

        let connected = tokio::task::spawn_blocking(move || -> std::io::Result<TcpStream> {
            let mut last_error = None;
            for candidate in addr.to_socket_addrs()? {
                match TcpStream::connect_timeout(&candidate, timeout) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_error = Some(e),
                }
            }
            Err(last_error.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", addr),
                )
            }))
        })
        .await
        .map_err(|e| MailError::Other {
            message: "Connect task failed".to_string(),
            source: Some(Box::new(e)),
        })?;

        let connect_err = |source: std::io::Error| MailError::Connect {
            server: server.to_string(),
            source,
        };

        let std_stream = connected.map_err(connect_err)?;
        std_stream.set_nonblocking(true).map_err(connect_err)?;
        async_io::Async::new(std_stream).map_err(connect_err)
    }

    /// Opens `folder` read-only with EXAMINE. Returns `(exists, uidvalidity)`.
    async fn examine(&self, session: &mut ImapSession, folder: &str) -> Result<(u32, u32)> {
        let mailbox = self
            .step(session.examine(folder))
            .await?
            .map_err(MailError::Protocol)?;

        let uid_validity = mailbox.uid_validity.unwrap_or_else(|| {
            warn!("Server did not provide UIDVALIDITY for '{}'", folder);
            0
        });

        debug!(
            "Folder '{}' opened: {} messages, UIDVALIDITY={}",
            folder, mailbox.exists, uid_validity
        );
        Ok((mailbox.exists, uid_validity))
    }

    /// Fetches the header blocks of one sequence range, newest first.
    async fn fetch_chunk(
        &self,
        session: &mut ImapSession,
        range: &str,
    ) -> Result<Vec<(u32, Option<u32>, Vec<u8>)>> {
        let fetched = self
            .step(async {
                let stream = session.fetch(range, HEADER_QUERY).await?;
                let items: Vec<_> = stream.collect().await;
                Ok::<_, async_imap::error::Error>(items)
            })
            .await?
            .map_err(MailError::Protocol)?;

        let mut chunk = Vec::with_capacity(fetched.len());
        for item in fetched {
            let fetch = item.map_err(MailError::Protocol)?;
            match fetch.header() {
                Some(raw) => chunk.push((fetch.message, fetch.uid, raw.to_vec())),
                None => debug!("Message {} returned no header block", fetch.message),
            }
        }
        chunk.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(chunk)
    }

    async fn collect_recent(
        &self,
        session: &mut ImapSession,
        account: &AccountConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageHeader>> {
        let (exists, uid_validity) = self.examine(session, &account.folder).await?;
        let mut window = RecentWindow::new(&self.options.limits, Utc::now());

        let mut upper = exists;
        while upper > 0 && !window.is_done() {
            if cancel.is_cancelled() {
                return Err(MailError::Cancelled);
            }

            let lower = upper.saturating_sub(FETCH_CHUNK - 1).max(1);
            let chunk = self.fetch_chunk(session, &format!("{}:{}", lower, upper)).await?;

            for (seq, uid, raw) in chunk {
                if cancel.is_cancelled() {
                    return Err(MailError::Cancelled);
                }
                let Some(uid) = uid else {
                    debug!("Message {} has no UID, skipping", seq);
                    continue;
                };
                let id = format!("{}:{}", uid_validity, uid);
                match parse_header_block(&id, &raw) {
                    Some(header) => {
                        if window.offer(header) == WindowStep::Done {
                            break;
                        }
                    }
                    None => debug!("Unparsable header for UID {}, skipping", uid),
                }
            }

            upper = lower - 1;
        }

        Ok(window.into_headers())
    }

    async fn logout(&self, mut session: ImapSession) {
        match self.step(session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("IMAP logout failed: {}", e),
            Err(e) => debug!("IMAP logout: {}", e),
        }
    }
}

#[async_trait]
impl MailClient for ImapMailClient {
    async fn test_connection(
        &self,
        account: &AccountConfig,
        options: &SessionOptions,
    ) -> Result<()> {
        let exchange = Exchange { options };
        let mut session = exchange.connect(account).await?;
        let result = exchange
            .examine(&mut session, &account.folder)
            .await
            .map(|_| ());
        exchange.logout(session).await;
        result
    }

    async fn fetch_recent_headers(
        &self,
        account: &AccountConfig,
        options: &SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageHeader>> {
        let exchange = Exchange { options };
        let mut session = exchange.connect(account).await?;
        let result = exchange.collect_recent(&mut session, account, cancel).await;
        exchange.logout(session).await;

        if let Ok(headers) = &result {
            debug!(
                "Fetched {} recent headers from {}",
                headers.len(),
                account.key()
            );
        }
        result
    }
}

/// `NO`/`BAD` answers to LOGIN mean rejected credentials; anything else is
/// a transport or protocol problem.
fn login_error(user: &str, error: async_imap::error::Error) -> MailError {
    match error {
        async_imap::error::Error::No(reason) | async_imap::error::Error::Bad(reason) => {
            MailError::Authentication {
                user: user.to_string(),
                reason,
            }
        }
        other => MailError::Protocol(other),
    }
}
