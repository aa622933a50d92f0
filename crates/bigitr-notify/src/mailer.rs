//! Per-repository pending report: attachments accreted across a run, sent
//! as one multipart message only if non-empty (§4.3).

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use crate::error::NotifyError;

#[derive(Debug, Clone)]
struct Attachment {
    filename: String,
    text: String,
}

/// Collapses whitespace runs to `_`, drops anything not alnum/`_`, appends
/// `.txt`.
fn sanitize_filename(desc: &str) -> String {
    let collapsed: String = desc
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    let filtered: String = collapsed
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    format!("{filtered}.txt")
}

/// Inert when `recipients` is empty or `mailfrom` is `None` — every method
/// becomes a no-op, matching the reference implementation's `ifEmail`
/// decorator.
pub struct Mailer {
    repo: String,
    recipients: Vec<String>,
    mailfrom: Option<String>,
    smarthost: String,
    attachments: Vec<Attachment>,
}

impl Mailer {
    pub fn new(repo: impl Into<String>, recipients: Vec<String>, mailfrom: Option<String>, smarthost: impl Into<String>) -> Self {
        Mailer {
            repo: repo.into(),
            recipients,
            mailfrom,
            smarthost: smarthost.into(),
            attachments: Vec::new(),
        }
    }

    fn ignore(&self) -> bool {
        self.recipients.is_empty() || self.mailfrom.is_none()
    }

    pub fn add_attachment(&mut self, text: &str, description: &str) {
        if self.ignore() {
            return;
        }
        self.attachments.push(Attachment {
            filename: sanitize_filename(description),
            text: text.to_string(),
        });
    }

    pub fn add_output(&mut self, command: &str, stdout: &str, stderr: &str) {
        if self.ignore() {
            return;
        }
        self.add_attachment(stderr, &format!("errors from {command}"));
        self.add_attachment(stdout, &format!("output from {command}"));
    }

    /// Sends only if at least one attachment was added, prepending "all
    /// output"/"all errors" first so they read before the per-command
    /// attachments they summarize.
    pub fn send(&mut self, all_out: &str, all_err: &str) -> Result<(), NotifyError> {
        if self.ignore() || self.attachments.is_empty() {
            return Ok(());
        }
        self.add_attachment(all_err, "all errors");
        self.add_attachment(all_out, "all output");
        self.dispatch()
    }

    fn dispatch(&self) -> Result<(), NotifyError> {
        let mailfrom = self.mailfrom.as_deref().expect("checked by ignore()");
        let boundary = "----=_bigitr_report";
        let subject = format!("{}: bigitr error report", self.repo);
        let mut body = String::new();
        body.push_str(&format!("Subject: {subject}\r\n"));
        body.push_str(&format!("From: {mailfrom}\r\n"));
        body.push_str(&format!("To: {}\r\n", self.recipients.join(", ")));
        body.push_str(&format!("Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"));
        body.push_str(&format!("bigitr error report for repository {}\r\n", self.repo));
        for attachment in &self.attachments {
            body.push_str(&format!("--{boundary}\r\n"));
            body.push_str("Content-Type: text/plain; charset=\"us-ascii\"\r\n");
            body.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                attachment.filename
            ));
            body.push_str(&attachment.text);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        send_smtp(&self.smarthost, mailfrom, &self.recipients, &body)
    }
}

fn send_smtp(host: &str, from: &str, recipients: &[String], data: &str) -> Result<(), NotifyError> {
    let addr = if host.contains(':') { host.to_string() } else { format!("{host}:25") };
    let stream = TcpStream::connect(&addr).map_err(|source| NotifyError::Connect { host: host.to_string(), source })?;
    let mut writer = stream.try_clone().map_err(|source| NotifyError::Io { host: host.to_string(), source })?;
    let mut reader = BufReader::new(stream);

    read_reply(&mut reader, host)?;
    command(&mut writer, &mut reader, host, &format!("HELO bigitr\r\n"))?;
    command(&mut writer, &mut reader, host, &format!("MAIL FROM:<{from}>\r\n"))?;
    for recipient in recipients {
        command(&mut writer, &mut reader, host, &format!("RCPT TO:<{recipient}>\r\n"))?;
    }
    command(&mut writer, &mut reader, host, "DATA\r\n")?;

    let mut escaped = String::with_capacity(data.len());
    for line in data.split("\r\n") {
        if line.starts_with('.') {
            escaped.push('.');
        }
        escaped.push_str(line);
        escaped.push_str("\r\n");
    }
    writer
        .write_all(escaped.as_bytes())
        .map_err(|source| NotifyError::Io { host: host.to_string(), source })?;
    command(&mut writer, &mut reader, host, ".\r\n")?;
    let _ = writer.write_all(b"QUIT\r\n");
    Ok(())
}

fn command<W: Write, R: BufRead>(writer: &mut W, reader: &mut R, host: &str, line: &str) -> Result<(), NotifyError> {
    writer
        .write_all(line.as_bytes())
        .map_err(|source| NotifyError::Io { host: host.to_string(), source })?;
    read_reply(reader, host)
}

fn read_reply<R: BufRead>(reader: &mut R, host: &str) -> Result<(), NotifyError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|source| NotifyError::Io { host: host.to_string(), source })?;
    let code: u32 = line
        .get(0..3)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| NotifyError::Rejected { host: host.to_string(), detail: line.clone() })?;
    if code >= 400 {
        return Err(NotifyError::Rejected { host: host.to_string(), detail: line });
    }
    Ok(())
}
