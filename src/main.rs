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

//! Sends one plain-text e-mail through an SMTP server.

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use send_mail::{EmailMessage, Mailer, Security, Server};

/// Send a plain-text e-mail to a single recipient via SMTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// SMTP server as `host` or `host:port` (default port 25)
    server: Server,

    /// SMTP AUTH user name
    username: String,

    /// SMTP AUTH password
    #[arg(allow_hyphen_values = true)]
    password: String,

    /// Sender address, used for the From header and MAIL FROM
    send_from: String,

    /// Recipient address, used for the To header and RCPT TO
    send_to: String,

    /// Subject header
    #[arg(allow_hyphen_values = true)]
    subject: String,

    /// Plain-text message body
    #[arg(allow_hyphen_values = true)]
    text: String,

    /// Upgrade the connection with STARTTLS before authenticating
    #[arg(long, conflicts_with = "tls")]
    starttls: bool,

    /// Connect using implicit TLS (default port 465)
    #[arg(long)]
    tls: bool,

    /// Connection and command timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Hostname announced in EHLO
    #[arg(long, value_name = "HOST")]
    helo: Option<String>,

    /// Accept any TLS certificate
    #[arg(long)]
    allow_invalid_certs: bool,
}

impl Args {
    fn security(&self) -> Security {
        if self.tls {
            Security::ImplicitTls
        } else if self.starttls {
            Security::StartTls
        } else {
            Security::None
        }
    }

    fn mailer(&self) -> Mailer {
        let mut mailer = Mailer::new(self.server.clone())
            .credentials((self.username.as_str(), self.password.as_str()))
            .security(self.security())
            .allow_invalid_certs(self.allow_invalid_certs);
        if let Some(timeout) = self.timeout {
            mailer = mailer.timeout(Duration::from_secs(timeout));
        }
        if let Some(helo) = &self.helo {
            mailer = mailer.helo_host(helo.as_str());
        }
        mailer
    }
}

async fn run(args: Args) -> send_mail::Result<()> {
    let email = EmailMessage::new(
        args.send_from.as_str(),
        [args.send_to.as_str()],
        args.subject.as_str(),
        args.text.as_str(),
    )?;
    args.mailer().send(&email).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
