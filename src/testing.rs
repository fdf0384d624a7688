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

//! Scripted single-connection SMTP server used by the test suites.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

use crate::{smtp::AssertReply, SmtpClient};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub greeting: String,
    /// Mechanisms listed on the EHLO `AUTH` line, empty to omit it.
    pub auth: String,
    /// Advertise STARTTLS and upgrade the session when asked.
    pub starttls: bool,
    /// Handshake TLS before sending the greeting.
    pub implicit_tls: bool,
    /// Hang up on QUIT without replying.
    pub drop_on_quit: bool,
    pub username: String,
    pub password: String,
    pub reject_mail_from: bool,
    pub reject_rcpt: Vec<String>,
    pub reject_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            greeting: "220 mx.test ESMTP ready".to_string(),
            auth: "PLAIN LOGIN".to_string(),
            starttls: false,
            implicit_tls: false,
            drop_on_quit: false,
            username: "u".to_string(),
            password: "p".to_string(),
            reject_mail_from: false,
            reject_rcpt: Vec::new(),
            reject_data: false,
        }
    }
}

/// What the server observed during the session.
#[derive(Debug, Default)]
pub struct Session {
    /// Command lines, without AUTH continuation lines or message contents.
    pub commands: Vec<String>,
    pub authenticated: bool,
    /// Number of commands received before the session went over TLS.
    pub tls_after: Option<usize>,
    /// Un-dot-stuffed DATA payloads, without the terminating `.` line.
    pub messages: Vec<Vec<u8>>,
}

impl Session {
    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|cmd| {
                cmd.split(|c| c == ' ' || c == ':')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase()
            })
            .collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.verbs().iter().filter(|v| *v == verb).count()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Session>,
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            run(stream, config).await
        });
        TestServer { addr, handle }
    }

    /// Connects a raw client and consumes the greeting.
    pub async fn client(&self) -> SmtpClient<TcpStream> {
        let mut client = SmtpClient {
            stream: TcpStream::connect(self.addr).await.unwrap(),
            timeout: Duration::from_secs(10),
        };
        client
            .read()
            .await
            .unwrap()
            .assert_positive_completion()
            .unwrap();
        client
    }

    /// Waits for the client to hang up and returns the transcript.
    pub async fn finish(self) -> Session {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not finish")
            .unwrap()
    }
}

/// Returns a loopback address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn tls_acceptor() -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(cert.serialize_der().unwrap())],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der())),
        )
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn run(stream: TcpStream, config: ServerConfig) -> Session {
    let mut session = Session::default();

    if config.implicit_tls {
        let Ok(stream) = tls_acceptor().accept(stream).await else {
            return session;
        };
        session.tls_after = Some(0);
        serve(stream, &config, &mut session, false).await;
    } else if let Some(stream) = serve(stream, &config, &mut session, false).await {
        let Ok(stream) = tls_acceptor().accept(stream).await else {
            return session;
        };
        session.tls_after = Some(session.commands.len());
        serve(stream, &config, &mut session, true).await;
    }

    session
}

/// Runs the command loop. Returns the stream when the client asked for
/// STARTTLS and the server agreed.
async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    config: &ServerConfig,
    session: &mut Session,
    upgraded: bool,
) -> Option<S> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    macro_rules! reply {
        ($($arg:tt)*) => {
            if writer
                .write_all(format!("{}\r\n", format_args!($($arg)*)).as_bytes())
                .await
                .is_err()
            {
                return None;
            }
        };
    }

    macro_rules! read_line {
        () => {
            match read_line(&mut reader).await {
                Some(line) => line,
                None => return None,
            }
        };
    }

    if !upgraded {
        reply!("{}", config.greeting);
        if !config.greeting.starts_with('2') {
            return None;
        }
    }

    loop {
        let line = read_line!();
        let line = String::from_utf8_lossy(&line).into_owned();
        session.commands.push(line.clone());
        let upper = line.to_ascii_uppercase();

        if upper.starts_with("EHLO") {
            let mut lines = vec!["mx.test".to_string()];
            if !config.auth.is_empty() {
                lines.push(format!("AUTH {}", config.auth));
            }
            if config.starttls && !upgraded {
                lines.push("STARTTLS".to_string());
            }
            lines.push("8BITMIME".to_string());
            let last = lines.len() - 1;
            let mut response = String::new();
            for (pos, text) in lines.iter().enumerate() {
                response.push_str(&format!(
                    "250{}{}\r\n",
                    if pos == last { ' ' } else { '-' },
                    text
                ));
            }
            if writer.write_all(response.as_bytes()).await.is_err() {
                return None;
            }
        } else if upper.starts_with("AUTH PLAIN") {
            let response = match line.split(' ').nth(2) {
                Some(response) => response.to_string(),
                None => {
                    reply!("334 ");
                    String::from_utf8_lossy(&read_line!()).into_owned()
                }
            };
            let expected = format!("\u{0}{}\u{0}{}", config.username, config.password);
            if STANDARD.decode(response.trim()).ok().as_deref() == Some(expected.as_bytes()) {
                session.authenticated = true;
                reply!("235 2.7.0 Authentication successful");
            } else {
                reply!("535 5.7.8 Authentication credentials invalid");
            }
        } else if upper.starts_with("AUTH LOGIN") {
            reply!("334 {}", STANDARD.encode("Username:"));
            let username = read_line!();
            reply!("334 {}", STANDARD.encode("Password:"));
            let password = read_line!();
            if STANDARD.decode(&username).ok().as_deref() == Some(config.username.as_bytes())
                && STANDARD.decode(&password).ok().as_deref() == Some(config.password.as_bytes())
            {
                session.authenticated = true;
                reply!("235 2.7.0 Authentication successful");
            } else {
                reply!("535 5.7.8 Authentication credentials invalid");
            }
        } else if upper.starts_with("MAIL FROM:") {
            if config.reject_mail_from {
                reply!("553 5.7.1 Sender address rejected");
            } else {
                reply!("250 2.1.0 Ok");
            }
        } else if upper.starts_with("RCPT TO:") {
            let address = line
                .split_once('<')
                .and_then(|(_, rest)| rest.split_once('>'))
                .map(|(address, _)| address)
                .unwrap_or_default();
            if config.reject_rcpt.iter().any(|r| r == address) {
                reply!("550 5.1.1 <{}>: Recipient address rejected", address);
            } else {
                reply!("250 2.1.5 Ok");
            }
        } else if upper == "DATA" {
            reply!("354 End data with <CR><LF>.<CR><LF>");
            let mut message = Vec::new();
            loop {
                let line = read_line!();
                if line == b"." {
                    break;
                }
                let line = line.strip_prefix(b".").unwrap_or(&line);
                message.extend_from_slice(line);
                message.extend_from_slice(b"\r\n");
            }
            session.messages.push(message);
            if config.reject_data {
                reply!("554 5.6.0 Message content rejected");
            } else {
                reply!("250 2.0.0 Ok: queued");
            }
        } else if upper == "RSET" || upper == "NOOP" {
            reply!("250 2.0.0 Ok");
        } else if upper == "STARTTLS" && config.starttls && !upgraded {
            reply!("220 2.0.0 Ready to start TLS");
            return Some(reader.into_inner().unsplit(writer));
        } else if upper == "STARTTLS" {
            reply!("454 4.7.0 TLS not available");
        } else if upper == "QUIT" {
            if !config.drop_on_quit {
                reply!("221 2.0.0 Bye");
            }
            return None;
        } else {
            reply!("502 5.5.2 Command not recognized");
        }
    }
}

/// Reads one CRLF terminated line, returning it without the line ending.
async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            Some(line)
        }
    }
}
