//! Telegram Bot API notification sink.
//!
//! Messages go to `sendMessage` as a form POST; photos go to `sendPhoto` as
//! `multipart/form-data` with the image in the `photo` field. Every request runs on an agent
//! with a fixed timeout. Error messages never include the request URL, which carries the bot
//! token.

use anyhow::{anyhow, Result};

use crate::config::TelegramSettings;
use crate::dispatch::NotificationSink;

pub struct TelegramSink {
    agent: ureq::Agent,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(settings: &TelegramSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self {
            agent,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

impl NotificationSink for TelegramSink {
    fn send_text(&mut self, message: &str) -> Result<()> {
        let result = self
            .agent
            .post(&self.method_url("sendMessage"))
            .send_form(&[("chat_id", self.chat_id.as_str()), ("text", message)]);
        check_response("sendMessage", result)?;
        log::info!("alert message sent to telegram chat {}", self.chat_id);
        Ok(())
    }

    fn send_photo(&mut self, image: &[u8], filename: &str, mime: &str) -> Result<()> {
        let boundary = format!("proximity-guard-{:016x}", rand::random::<u64>());
        let body = multipart_body(
            &boundary,
            &[("chat_id", self.chat_id.as_str())],
            FilePart {
                field: "photo",
                filename,
                mime,
                bytes: image,
            },
        );
        let result = self
            .agent
            .post(&self.method_url("sendPhoto"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);
        check_response("sendPhoto", result)?;
        log::info!("alert photo sent to telegram chat {}", self.chat_id);
        Ok(())
    }
}

fn check_response(method: &str, result: Result<ureq::Response, ureq::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(anyhow!(
                "telegram {} returned {}: {}",
                method,
                code,
                body.trim()
            ))
        }
        Err(ureq::Error::Transport(transport)) => Err(anyhow!(
            "telegram {} request failed: {}",
            method,
            transport.kind()
        )),
    }
}

pub(crate) struct FilePart<'a> {
    pub field: &'a str,
    pub filename: &'a str,
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

pub(crate) fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: FilePart<'_>) -> Vec<u8> {
    let mut body = Vec::with_capacity(file.bytes.len() + 512);
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            boundary, file.field, file.filename, file.mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(file.bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn multipart_body_layout() {
        let body = multipart_body(
            "XYZ",
            &[("chat_id", "42")],
            FilePart {
                field: "photo",
                filename: "image.jpg",
                mime: "image/jpeg",
                bytes: b"\xFF\xD8data\xFF\xD9",
            },
        );
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n42\r\n"));
        assert!(text.contains(
            "name=\"photo\"; filename=\"image.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        ));
        assert!(body.ends_with(b"\xFF\xD9\r\n--XYZ--\r\n"));
    }

    #[test]
    fn method_url_strips_trailing_slash() {
        let sink = TelegramSink::new(&TelegramSettings {
            bot_token: "123:abc".to_string(),
            chat_id: "42".to_string(),
            api_base: "http://127.0.0.1:9/".to_string(),
            timeout: Duration::from_millis(100),
        });
        assert_eq!(
            sink.method_url("sendMessage"),
            "http://127.0.0.1:9/bot123:abc/sendMessage"
        );
    }
}
