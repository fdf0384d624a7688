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

use std::ops::Deref;

use chrono::{DateTime, FixedOffset, Local};
use mail_builder::{
    headers::{content_type::ContentType, raw::Raw},
    mime::MimePart,
    MessageBuilder,
};

/// Non-empty, ordered list of recipient addresses. Duplicates are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients(Vec<String>);

impl Recipients {
    pub fn new<T, U>(addresses: T) -> crate::Result<Self>
    where
        T: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let addresses = addresses.into_iter().map(Into::into).collect::<Vec<_>>();
        if addresses.is_empty() {
            Err(crate::Error::MissingRcptTo)
        } else {
            Ok(Recipients(addresses))
        }
    }
}

impl Deref for Recipients {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A plain-text e-mail, composed right before it is sent.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    from: String,
    to: Recipients,
    date: DateTime<FixedOffset>,
    subject: String,
    body: String,
}

impl EmailMessage {
    /// Creates a message dated with the current local time.
    pub fn new<T, U>(
        from: impl Into<String>,
        to: T,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> crate::Result<Self>
    where
        T: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let message = EmailMessage {
            from: from.into(),
            to: Recipients::new(to)?,
            date: Local::now().fixed_offset(),
            subject: subject.into(),
            body: body.into(),
        };

        if has_line_break(&message.from) {
            return Err(crate::Error::InvalidHeader("From"));
        }
        if message.to.iter().any(|rcpt| has_line_break(rcpt)) {
            return Err(crate::Error::InvalidHeader("To"));
        }
        if has_line_break(&message.subject) {
            return Err(crate::Error::InvalidHeader("Subject"));
        }

        Ok(message)
    }

    /// Overrides the `Date` header.
    pub fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = date;
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &Recipients {
        &self.to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Value of the `To` header.
    pub fn to_header(&self) -> String {
        self.to.join(", ")
    }

    /// Serializes the message as a MIME `multipart/mixed` document holding
    /// a single `text/plain` part.
    pub fn compose(&self) -> crate::Result<Vec<u8>> {
        MessageBuilder::new()
            .header("From", Raw::new(self.from.as_str()))
            .header("To", Raw::new(self.to_header()))
            .header("Date", Raw::new(self.date.to_rfc2822()))
            .subject(self.subject.as_str())
            .body(MimePart::new(
                "multipart/mixed",
                vec![MimePart::new(
                    ContentType::new("text/plain").attribute("charset", "utf-8"),
                    self.body.as_str(),
                )],
            ))
            .write_to_vec()
            .map_err(Into::into)
    }
}

/// Bare address of a mailbox, `a@example.com` for `Alice <a@example.com>`.
pub fn addr_spec(mailbox: &str) -> &str {
    let mailbox = mailbox.trim();
    mailbox
        .rfind('<')
        .and_then(|start| {
            let rest = &mailbox[start + 1..];
            rest.find('>').map(|end| rest[..end].trim())
        })
        .unwrap_or(mailbox)
}

fn has_line_break(value: &str) -> bool {
    value.contains(|c| c == '\r' || c == '\n')
}

#[cfg(test)]
mod test {
    use chrono::{FixedOffset, TimeZone};
    use mail_parser::MessageParser;

    use crate::{Error, ErrorKind};

    use super::{addr_spec, EmailMessage, Recipients};

    /// Value of an unfolded header in the top-level header block.
    fn header<'x>(raw: &'x [u8], name: &str) -> Option<&'x str> {
        std::str::from_utf8(raw)
            .unwrap()
            .split("\r\n")
            .take_while(|line| !line.is_empty())
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(": "))
    }

    fn fixed_date() -> chrono::DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 9, 30, 0)
            .unwrap()
    }

    #[test]
    fn compose_headers_and_body() {
        let raw = EmailMessage::new("a@example.com", ["b@example.com"], "Hi", "Hello")
            .unwrap()
            .date(fixed_date())
            .compose()
            .unwrap();
        let text = String::from_utf8(raw.clone()).unwrap();
        assert!(text.contains("MIME-Version: 1.0"), "{text}");
        assert!(text.contains("multipart/mixed"), "{text}");
        assert!(text.contains("text/plain"), "{text}");

        assert_eq!(header(&raw, "From"), Some("a@example.com"));
        assert_eq!(header(&raw, "To"), Some("b@example.com"));
        assert_eq!(
            header(&raw, "Date"),
            Some("Sat, 17 Oct 2026 09:30:00 +0200")
        );

        let message = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(message.subject(), Some("Hi"));
        assert_eq!(message.body_text(0).as_deref(), Some("Hello"));
    }

    #[test]
    fn compose_multiple_recipients() {
        let email = EmailMessage::new(
            "a@example.com",
            vec!["b@example.com".to_string(), "c@example.com".to_string()],
            "Hi",
            "Hello",
        )
        .unwrap();
        assert_eq!(email.to_header(), "b@example.com, c@example.com");

        let raw = email.compose().unwrap();
        assert_eq!(header(&raw, "To"), Some("b@example.com, c@example.com"));
    }

    #[test]
    fn compose_non_ascii() {
        let subject = "Grüße aus Köln";
        let body = "Zürich, Москва, 東京 ¡olé!";
        let raw = EmailMessage::new("a@example.com", ["b@example.com"], subject, body)
            .unwrap()
            .compose()
            .unwrap();

        // Everything on the wire is 7-bit
        assert!(raw.is_ascii());

        let message = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(message.subject(), Some(subject));
        assert_eq!(message.body_text(0).as_deref(), Some(body));
    }

    #[test]
    fn date_defaults_to_now() {
        let before = chrono::Local::now().timestamp();
        let raw = EmailMessage::new("a@example.com", ["b@example.com"], "Hi", "Hello")
            .unwrap()
            .compose()
            .unwrap();
        let date = chrono::DateTime::parse_from_rfc2822(header(&raw, "Date").unwrap()).unwrap();
        assert!((date.timestamp() - before).abs() <= 5);
    }

    #[test]
    fn empty_recipients() {
        let err = Recipients::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::MissingRcptTo));
        assert_eq!(err.kind(), ErrorKind::Input);

        let err = EmailMessage::new("a@example.com", Vec::<&str>::new(), "Hi", "Hello")
            .unwrap_err();
        assert!(matches!(err, Error::MissingRcptTo));
    }

    #[test]
    fn duplicate_recipients_are_kept() {
        let recipients = Recipients::new(["b@example.com", "b@example.com"]).unwrap();
        assert_eq!(recipients.len(), 2);
    }

    #[test]
    fn header_injection() {
        for (from, to, subject, header) in [
            ("a@example.com\r\nBcc: x@y", "b@example.com", "Hi", "From"),
            ("a@example.com", "b@example.com\nBcc: x@y", "Hi", "To"),
            ("a@example.com", "b@example.com", "Hi\r\nBcc: x@y", "Subject"),
        ] {
            let err = EmailMessage::new(from, [to], subject, "Hello").unwrap_err();
            assert!(matches!(err, Error::InvalidHeader(name) if name == header));
            assert_eq!(err.kind(), ErrorKind::Input);
        }
    }

    #[test]
    fn mailbox_addr_spec() {
        for (mailbox, addr) in [
            ("a@example.com", "a@example.com"),
            (" a@example.com ", "a@example.com"),
            ("<a@example.com>", "a@example.com"),
            ("Alice <a@example.com>", "a@example.com"),
            ("\"Doe, <J>\" <j@example.com>", "j@example.com"),
            ("<>", ""),
            ("Alice <a@example.com", "Alice <a@example.com"),
        ] {
            assert_eq!(addr_spec(mailbox), addr, "{mailbox}");
        }
    }
}
