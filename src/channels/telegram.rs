//! Telegram Bot API client: the primary delivery channel.
//!
//! Only the three calls the gateway needs: `getMe` at startup, `sendMessage`
//! for the text body and `sendPhoto` for image attachments.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::DeliveryError;
use crate::pipeline::types::ChatId;

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// The chat-bot operations the delivery renderer depends on.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a text message. `markdown` selects Telegram's legacy Markdown parse mode.
    async fn send_text(&self, chat: ChatId, text: &str, markdown: bool) -> Result<(), DeliveryError>;

    /// Upload a photo from memory.
    async fn send_photo(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
        disable_notification: bool,
    ) -> Result<(), DeliveryError>;
}

/// Envelope every Bot API response is wrapped in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

/// The bot account behind a token, as returned by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub first_name: String,
}

/// Bot API client over reqwest.
pub struct TelegramBot {
    api_url: String,
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(bot_token: SecretString, api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_url,
            self.bot_token.expose_secret()
        )
    }

    /// Verify the token and return the bot's identity.
    pub async fn get_me(&self) -> Result<BotUser, DeliveryError> {
        let resp = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| DeliveryError::Http(redact(e)))?;

        let status = resp.status();
        let body: ApiResponse<BotUser> = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Http(redact(e)))?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(user),
                ..
            } => Ok(user),
            ApiResponse { description, .. } => Err(DeliveryError::SendFailed {
                method: "getMe".into(),
                reason: description.unwrap_or_else(|| format!("HTTP {status}")),
            }),
        }
    }

    /// Turn a non-2xx response into a `SendFailed` with Telegram's description.
    async fn check(method: &str, resp: reqwest::Response) -> Result<(), DeliveryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text)
            .ok()
            .and_then(|r| r.description)
            .unwrap_or_else(|| format!("HTTP {status}: {text}"));

        Err(DeliveryError::SendFailed {
            method: method.into(),
            reason,
        })
    }
}

#[async_trait]
impl ChatClient for TelegramBot {
    async fn send_text(&self, chat: ChatId, text: &str, markdown: bool) -> Result<(), DeliveryError> {
        let mut body = serde_json::json!({
            "chat_id": chat,
            "text": text,
        });
        if markdown {
            body["parse_mode"] = "Markdown".into();
        }

        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(redact(e)))?;

        Self::check("sendMessage", resp).await?;
        tracing::debug!(chat = %chat, "Telegram message sent");
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
        disable_notification: bool,
    ) -> Result<(), DeliveryError> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());

        let form = Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .text("disable_notification", disable_notification.to_string())
            .part("photo", part);

        let resp = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(redact(e)))?;

        Self::check("sendPhoto", resp).await?;
        tracing::debug!(chat = %chat, file_name, "Telegram photo sent");
        Ok(())
    }
}

/// reqwest errors embed the request URL, which contains the bot token.
fn redact(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(url: &str) -> TelegramBot {
        TelegramBot::new(SecretString::from("123:ABC".to_string()), url)
    }

    #[test]
    fn method_url_uses_token() {
        assert_eq!(
            bot(DEFAULT_API_URL).method_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn method_url_trims_trailing_slash() {
        assert_eq!(
            bot("http://localhost:8081/").method_url("getMe"),
            "http://localhost:8081/bot123:ABC/getMe"
        );
    }

    #[test]
    fn api_response_error_description() {
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#,
        )
        .unwrap();
        assert!(!resp.ok);
        assert_eq!(
            resp.description.as_deref(),
            Some("Bad Request: can't parse entities")
        );
    }

    #[test]
    fn get_me_response_parses() {
        let resp: ApiResponse<BotUser> = serde_json::from_str(
            r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Relay","username":"relay_bot"}}"#,
        )
        .unwrap();
        let user = resp.result.unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.username.as_deref(), Some("relay_bot"));
    }

    // ── Network error tests (expected to fail with no server) ───────

    #[tokio::test]
    async fn send_text_unreachable_api_is_error() {
        let result = bot("http://127.0.0.1:9")
            .send_text(ChatId(100), "*Hi*\n\nthere", true)
            .await;
        let err = result.unwrap_err().to_string();
        assert!(!err.contains("123:ABC"), "token leaked into error: {err}");
    }

    #[tokio::test]
    async fn send_photo_unreachable_api_is_error() {
        let result = bot("http://127.0.0.1:9")
            .send_photo(ChatId(100), "a.png", vec![0x89, 0x50], "a.png", true)
            .await;
        assert!(result.is_err());
    }
}
