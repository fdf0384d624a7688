/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{fmt::Display, str::FromStr, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    email::EmailMessage,
    smtp::message::{IntoMessage, Message},
    Credentials, SmtpClient, SmtpClientBuilder,
};

/// Port used when the server address does not name one.
pub const SMTP_PORT: u16 = 25;
/// Port used for implicit TLS when the server address does not name one.
pub const SUBMISSIONS_PORT: u16 = 465;

/// SMTP server address, written as `host`, `host:port` or `[ipv6]:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub host: String,
    pub port: Option<u16>,
}

/// Transport encryption for the SMTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Security {
    /// Plaintext session; credentials travel unencrypted.
    #[default]
    None,
    /// Upgrade the plaintext session with STARTTLS before authenticating.
    StartTls,
    /// TLS from the first byte.
    ImplicitTls,
}

/// Sends one e-mail per SMTP session.
#[derive(Clone)]
pub struct Mailer {
    server: Server,
    credentials: Option<Credentials>,
    security: Security,
    timeout: Option<Duration>,
    helo_host: Option<String>,
    allow_invalid_certs: bool,
}

impl FromStr for Server {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::Error::InvalidServer(s.to_string());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            match rest {
                "" => (host, None),
                _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match s.split_once(':') {
                // Unbracketed IPv6 literal
                Some((_, rest)) if rest.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => return Err(invalid()),
            },
            None => None,
        };

        Ok(Server {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl Mailer {
    pub fn new(server: Server) -> Self {
        Mailer {
            server,
            credentials: None,
            security: Security::default(),
            timeout: None,
            helo_host: None,
            allow_invalid_certs: false,
        }
    }

    /// Credentials for SMTP AUTH.
    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the timeout applied to the connection and to each command.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the EHLO hostname.
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.helo_host = Some(host.into());
        self
    }

    pub fn allow_invalid_certs(mut self, allow: bool) -> Self {
        self.allow_invalid_certs = allow;
        self
    }

    fn client_builder(&self) -> SmtpClientBuilder {
        let port = self.server.port.unwrap_or(match self.security {
            Security::ImplicitTls => SUBMISSIONS_PORT,
            Security::None | Security::StartTls => SMTP_PORT,
        });
        let mut builder = SmtpClientBuilder::new(self.server.host.as_str(), port);
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(host) = &self.helo_host {
            builder = builder.helo_host(host.as_str());
        }
        if self.allow_invalid_certs {
            builder = builder.allow_invalid_certs();
        }
        builder
    }

    /// Delivers `email` in a single SMTP session: connect, authenticate,
    /// one mail transaction, QUIT. The session is closed on every path.
    pub async fn send(&self, email: &EmailMessage) -> crate::Result<()> {
        // Compose before touching the network
        let message = email.into_message()?;

        if self.security == Security::None && self.credentials.is_some() {
            log::warn!(
                "Sending credentials to {} over an unencrypted connection",
                self.server
            );
        }

        let builder = self.client_builder();
        match self.security {
            Security::None => deliver(builder.connect_plain().await?, message).await,
            Security::StartTls => deliver(builder.connect_starttls().await?, message).await,
            Security::ImplicitTls => deliver(builder.connect_tls().await?, message).await,
        }?;

        log::info!(
            "Sent \"{}\" to {} via {}",
            email.subject(),
            email.to_header(),
            self.server
        );
        Ok(())
    }
}

async fn deliver<T: AsyncRead + AsyncWrite + Unpin>(
    mut client: SmtpClient<T>,
    message: Message<'_>,
) -> crate::Result<()> {
    match client.send(message).await {
        Ok(()) => {
            // The message is queued at this point
            if let Err(err) = client.quit().await {
                log::debug!("QUIT after accepted message failed: {err}");
            }
            Ok(())
        }
        Err(err) => {
            client.close().await;
            Err(err)
        }
    }
}

/// Sends a plain-text e-mail through `server` over a plaintext connection,
/// authenticating with `username` and `password`.
pub async fn send_mail<T, U>(
    server: &str,
    username: &str,
    password: &str,
    send_from: &str,
    send_to: T,
    subject: &str,
    text: &str,
) -> crate::Result<()>
where
    T: IntoIterator<Item = U>,
    U: Into<String>,
{
    let email = EmailMessage::new(send_from, send_to, subject, text)?;
    Mailer::new(server.parse()?)
        .credentials((username, password))
        .send(&email)
        .await
}
