/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

use super::{message::IntoMessage, AssertReply};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str) -> crate::Result<()> {
        log::trace!("MAIL FROM:<{addr}>");
        let reply = self.cmd(format!("MAIL FROM:<{}>\r\n", addr).as_bytes()).await?;
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(crate::Error::SenderRejected(reply))
        }
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt_to(&mut self, addr: &str) -> crate::Result<()> {
        log::trace!("RCPT TO:<{addr}>");
        let reply = self.cmd(format!("RCPT TO:<{}>\r\n", addr).as_bytes()).await?;
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(crate::Error::RecipientRejected {
                address: addr.to_string(),
                reply,
            })
        }
    }

    /// Sends a DATA command to the server.
    pub async fn data(&mut self, message: impl AsRef<[u8]>) -> crate::Result<()> {
        let reply = self.cmd(b"DATA\r\n").await?;
        if reply.code() != 354 {
            return Err(crate::Error::MessageRejected(reply));
        }
        let reply = tokio::time::timeout(self.timeout, async {
            // Write message
            self.write_message(message.as_ref()).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??;
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(crate::Error::MessageRejected(reply))
        }
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<()> {
        self.cmd(b"RSET\r\n").await?.assert_positive_completion()
    }

    /// Sends a QUIT command to the server and shuts the connection down.
    pub async fn quit(mut self) -> crate::Result<()> {
        let result = self.cmd(b"QUIT\r\n").await?.assert_positive_completion();
        let _ = self.stream.shutdown().await;
        result
    }

    /// Runs one mail transaction: MAIL FROM, one RCPT TO per recipient and
    /// DATA. A refused recipient aborts the transaction with RSET.
    pub async fn send<'x>(&mut self, message: impl IntoMessage<'x>) -> crate::Result<()> {
        let message = message.into_message()?;
        if message.rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        self.mail_from(&message.mail_from).await?;
        for rcpt in &message.rcpt_to {
            if let Err(err) = self.rcpt_to(rcpt).await {
                if matches!(err, crate::Error::RecipientRejected { .. }) {
                    if let Err(rset_err) = self.rset().await {
                        log::debug!("RSET after refused recipient failed: {rset_err}");
                    }
                }
                return Err(err);
            }
        }
        self.data(message.body.as_ref()).await?;
        log::debug!(
            "Message from <{}> accepted for {} recipient(s)",
            message.mail_from,
            message.rcpt_to.len()
        );
        Ok(())
    }
}
