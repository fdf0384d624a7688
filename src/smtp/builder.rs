/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

use crate::{Credentials, SmtpClient, SmtpClientBuilder};

use super::{tls::build_tls_connector, AssertReply};

impl SmtpClientBuilder {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        SmtpClientBuilder {
            addr: if hostname.contains(':') {
                format!("[{}]:{}", hostname, port)
            } else {
                format!("{}:{}", hostname, port)
            },
            timeout: Duration::from_secs(60 * 60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            credentials: None,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the authentication credentials
    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn tcp_connect(&self) -> crate::Result<SmtpClient<TcpStream>> {
        log::debug!("Connecting to {}", self.addr);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map_err(|err| crate::Error::Connect {
                addr: self.addr.clone(),
                err,
            })?;
        Ok(SmtpClient {
            stream,
            timeout: self.timeout,
        })
    }

    /// Reads the greeting and says EHLO.
    async fn greet<T: AsyncRead + AsyncWrite + Unpin>(
        &self,
        client: &mut SmtpClient<T>,
    ) -> crate::Result<EhloResponse<String>> {
        client.read().await?.assert_positive_completion()?;
        client.ehlo(&self.local_host).await
    }

    async fn login<T: AsyncRead + AsyncWrite + Unpin>(
        &self,
        client: &mut SmtpClient<T>,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<()> {
        if let Some(credentials) = &self.credentials {
            client.authenticate(credentials, capabilities).await?;
        }
        Ok(())
    }

    /// Connect over clear text, authenticating when credentials are set.
    pub async fn connect_plain(&self) -> crate::Result<SmtpClient<TcpStream>> {
        let mut client = self.tcp_connect().await?;
        let result = match self.greet(&mut client).await {
            Ok(capabilities) => self.login(&mut client, &capabilities).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => Ok(client),
            Err(err) => {
                client.close().await;
                Err(err)
            }
        }
    }

    /// Connect over clear text and upgrade with STARTTLS before authenticating.
    pub async fn connect_starttls(&self) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        let mut client = self.tcp_connect().await?;
        let result = match self.greet(&mut client).await {
            Ok(capabilities) if capabilities.has_capability(EXT_START_TLS) => {
                client.request_tls().await
            }
            Ok(_) => Err(crate::Error::MissingStartTls),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            client.close().await;
            return Err(err);
        }

        let client = client
            .into_tls(&self.tls_connector, &self.tls_hostname)
            .await?;
        self.secure_login(client).await
    }

    /// Connect over TLS
    pub async fn connect_tls(&self) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        let mut client = self
            .tcp_connect()
            .await?
            .into_tls(&self.tls_connector, &self.tls_hostname)
            .await?;
        if let Err(err) = client.read().await.and_then(|r| r.assert_positive_completion()) {
            client.close().await;
            return Err(err);
        }
        self.secure_login(client).await
    }

    /// EHLO and login over an established TLS session.
    async fn secure_login(
        &self,
        mut client: SmtpClient<TlsStream<TcpStream>>,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        let result = match client.ehlo(&self.local_host).await {
            Ok(capabilities) => self.login(&mut client, &capabilities).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => Ok(client),
            Err(err) => {
                client.close().await;
                Err(err)
            }
        }
    }
}
