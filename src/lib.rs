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

//! # send-mail
//!
//! _send-mail_ composes a single plain-text e-mail and submits it to an SMTP server:
//!
//! - Builds an Internet Message Format (_RFC 5322_) message with `From`, `To`, `Date` and
//!   `Subject` headers and a **MIME** (_RFC 2045 - 2049_) `multipart/mixed` body holding one
//!   `text/plain` part.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) submission over a plaintext
//!   connection, with opt-in **STARTTLS** (_RFC 3207_) or implicit TLS.
//! - SMTP Service Extension for Authentication (_RFC 4954_) with mechanism negotiation:
//!   - CRAM-MD5 (_RFC 2195_)
//!   - PLAIN
//!   - LOGIN
//! - The SMTP session is always closed, on success and on failure.
//!
//! ## Usage Example
//!
//! ```rust
//!     let email = EmailMessage::new(
//!         "a@example.com",
//!         ["b@example.com"],
//!         "Hi",
//!         "Hello",
//!     )?;
//!
//!     Mailer::new("smtp.example.com".parse()?)
//!         .credentials(("u", "p"))
//!         .security(Security::StartTls)
//!         .send(&email)
//!         .await?;
//! ```
//!
//! The same crate ships the `send-mail` binary:
//!
//! ```bash
//!  $ send-mail <server> <username> <password> <send_from> <send_to> <subject> <text>
//! ```
//!

pub mod email;
pub mod mailer;
pub mod smtp;
#[cfg(test)]
pub(crate) mod testing;

use std::{fmt::Display, time::Duration};

pub use email::{EmailMessage, Recipients};
pub use mail_builder;
pub use mailer::{send_mail, Mailer, Security, Server};
pub use smtp::auth::Credentials;
use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Could not open a connection to the SMTP server
    Connect { addr: String, err: std::io::Error },

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// The server refused the envelope sender.
    SenderRejected(Response<String>),

    /// The server refused one of the envelope recipients.
    RecipientRejected {
        address: String,
        reply: Response<String>,
    },

    /// The server refused the message contents.
    MessageRejected(Response<String>),

    /// Invalid SMTP server address.
    InvalidServer(String),

    /// Header value containing a line break.
    InvalidHeader(&'static str),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// STARTTLS not available
    MissingStartTls,
}

/// Broad classes of failure, in the order they can occur during a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied unusable input; nothing was sent over the network.
    Input,
    /// The SMTP server could not be reached or the session broke down.
    Connectivity,
    /// The server rejected the credentials.
    Authentication,
    /// The server rejected the sender, a recipient or the message.
    Submission,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client.
pub struct SmtpClient<T: AsyncRead + AsyncWrite> {
    pub stream: T,
    pub timeout: Duration,
}

/// Connection parameters used to open an [`SmtpClient`].
#[derive(Clone)]
pub struct SmtpClientBuilder {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: String,
    pub credentials: Option<Credentials>,
    pub addr: String,
    pub local_host: String,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidServer(_) | Error::InvalidHeader(_) | Error::MissingRcptTo => {
                ErrorKind::Input
            }
            Error::Auth(_)
            | Error::Base64(_)
            | Error::AuthenticationFailed(_)
            | Error::UnsupportedAuthMechanism => ErrorKind::Authentication,
            Error::SenderRejected(_)
            | Error::RecipientRejected { .. }
            | Error::MessageRejected(_) => ErrorKind::Submission,
            Error::Io(_)
            | Error::Connect { .. }
            | Error::Tls(_)
            | Error::UnparseableReply
            | Error::UnexpectedReply(_)
            | Error::InvalidTLSName
            | Error::Timeout
            | Error::MissingStartTls => ErrorKind::Connectivity,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::Connect { err, .. } => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            _ => None,
        }
    }
}

fn fmt_reply(f: &mut std::fmt::Formatter<'_>, reply: &Response<String>) -> std::fmt::Result {
    write!(f, "{} {}", reply.code(), reply.message())
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connect { addr, err } => write!(f, "Failed to connect to {addr}: {err}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                f.write_str("Unexpected reply: ")?;
                fmt_reply(f, e)
            }
            Error::AuthenticationFailed(e) => {
                f.write_str("Authentication failed: ")?;
                fmt_reply(f, e)
            }
            Error::SenderRejected(e) => {
                f.write_str("Sender rejected: ")?;
                fmt_reply(f, e)
            }
            Error::RecipientRejected { address, reply } => {
                write!(f, "Recipient <{address}> rejected: ")?;
                fmt_reply(f, reply)
            }
            Error::MessageRejected(e) => {
                f.write_str("Message rejected: ")?;
                fmt_reply(f, e)
            }
            Error::InvalidServer(server) => write!(f, "Invalid SMTP server address {server:?}"),
            Error::InvalidHeader(name) => write!(f, "Line break in {name} header"),
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}
