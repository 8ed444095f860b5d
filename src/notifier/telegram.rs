use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::NotifierError;
use crate::notifier::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API notifier. Messages are sent as HTML to a single
/// chat.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl Notifier for TelegramNotifier {
    fn send(&self, text: &str) -> BoxFuture<'_, Result<(), Report<NotifierError>>> {
        let text = text.to_owned();
        Box::pin(async move {
            let url = format!("{TELEGRAM_API_BASE}/bot{}/sendMessage", self.bot_token);
            let body = SendMessageRequest {
                chat_id: &self.chat_id,
                text: &text,
                parse_mode: "HTML",
            };

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .change_context(NotifierError::Send)?;

            if !response.status().is_success() {
                return Err(Report::new(NotifierError::Send)
                    .attach(format!("HTTP status: {}", response.status())));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_serializes_expected_fields() {
        let body = SendMessageRequest {
            chat_id: "12345",
            text: "hello",
            parse_mode: "HTML",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "12345");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["parse_mode"], "HTML");
    }
}
