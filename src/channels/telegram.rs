//! Telegram publisher: posts to a channel through the Bot API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::ChannelPublisher;
use crate::error::PublishError;
use crate::submission::{ChannelRef, Content, MediaKind};

/// Envelope every Bot API method replies with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram channel publisher.
pub struct TelegramPublisher {
    bot_token: SecretString,
    channel_id: i64,
    client: reqwest::Client,
}

impl TelegramPublisher {
    pub fn new(bot_token: SecretString, channel_id: i64) -> Self {
        Self {
            bot_token,
            channel_id,
            client: reqwest::Client::new(),
        }
    }

    pub fn channel_id(&self) -> i64 {
        self.channel_id
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Bot API method and JSON body for one content descriptor.
    fn request_for(&self, content: &Content) -> (&'static str, serde_json::Value) {
        match content {
            Content::Text { text } => (
                "sendMessage",
                serde_json::json!({
                    "chat_id": self.channel_id,
                    "text": text
                }),
            ),
            Content::Media {
                kind,
                file_id,
                caption,
            } => {
                let (method, field) = media_method(*kind);
                let mut body = serde_json::json!({ "chat_id": self.channel_id });
                body[field] = serde_json::Value::String(file_id.clone());
                // Stickers take no caption.
                if let Some(cap) = caption
                    && *kind != MediaKind::Sticker
                {
                    body["caption"] = serde_json::Value::String(cap.clone());
                }
                (method, body)
            }
            Content::Poll {
                question,
                options,
                allows_multiple_answers,
            } => {
                let options: Vec<serde_json::Value> = options
                    .iter()
                    .map(|o| serde_json::json!({ "text": o }))
                    .collect();
                (
                    "sendPoll",
                    serde_json::json!({
                        "chat_id": self.channel_id,
                        "question": question,
                        "options": options,
                        "is_anonymous": true,
                        "allows_multiple_answers": allows_multiple_answers
                    }),
                )
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PublishError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.without_url().to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| PublishError::Transport(e.without_url().to_string()))?;

        interpret_response(status, &text)
    }
}

fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Animation => ("sendAnimation", "animation"),
        MediaKind::Audio => ("sendAudio", "audio"),
        MediaKind::Voice => ("sendVoice", "voice"),
        MediaKind::Sticker => ("sendSticker", "sticker"),
        MediaKind::Document => ("sendDocument", "document"),
    }
}

/// Map an HTTP status and Bot API body to the method result.
fn interpret_response(status: u16, body: &str) -> Result<serde_json::Value, PublishError> {
    let parsed: Result<ApiResponse, _> = serde_json::from_str(body);

    if status == 429 {
        let retry_after = parsed
            .ok()
            .and_then(|r| r.parameters)
            .and_then(|p| p.retry_after)
            .map(std::time::Duration::from_secs);
        return Err(PublishError::RateLimited { retry_after });
    }

    let parsed = parsed.map_err(|e| PublishError::InvalidResponse(format!("bad JSON: {e}")))?;
    if !parsed.ok {
        return Err(PublishError::Rejected {
            status,
            reason: parsed
                .description
                .unwrap_or_else(|| "no description".to_string()),
        });
    }

    parsed
        .result
        .ok_or_else(|| PublishError::InvalidResponse("missing result".into()))
}

fn message_id_from(result: &serde_json::Value) -> Result<i64, PublishError> {
    result
        .get("message_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| PublishError::InvalidResponse("missing message_id".into()))
}

#[async_trait]
impl ChannelPublisher for TelegramPublisher {
    async fn publish(&self, content: &Content) -> Result<ChannelRef, PublishError> {
        let (method, body) = self.request_for(content);
        let result = self.call(method, &body).await?;
        let message_id = message_id_from(&result)?;

        tracing::info!(
            chat_id = self.channel_id,
            message_id,
            method,
            "Telegram channel post sent"
        );
        Ok(ChannelRef {
            chat_id: self.channel_id,
            message_id,
        })
    }

    async fn withdraw(&self, message: &ChannelRef) -> Result<(), PublishError> {
        let body = serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id
        });
        self.call("deleteMessage", &body).await?;

        tracing::info!(
            chat_id = message.chat_id,
            message_id = message.message_id,
            "Telegram channel post deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> TelegramPublisher {
        TelegramPublisher::new(SecretString::from("123:ABC"), -1001234)
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            publisher().api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn telegram_token_not_in_debug() {
        let token = SecretString::from("123:ABC");
        assert!(!format!("{token:?}").contains("123:ABC"));
    }

    #[test]
    fn telegram_text_request() {
        let (method, body) = publisher().request_for(&Content::text("hello"));
        assert_eq!(method, "sendMessage");
        assert_eq!(body["chat_id"], -1001234);
        assert_eq!(body["text"], "hello");
    }

    #[test]
    fn telegram_photo_request_with_caption() {
        let content = Content::Media {
            kind: MediaKind::Photo,
            file_id: "AgAD".into(),
            caption: Some("look".into()),
        };
        let (method, body) = publisher().request_for(&content);
        assert_eq!(method, "sendPhoto");
        assert_eq!(body["photo"], "AgAD");
        assert_eq!(body["caption"], "look");
    }

    #[test]
    fn telegram_sticker_drops_caption() {
        let content = Content::Media {
            kind: MediaKind::Sticker,
            file_id: "CAAD".into(),
            caption: Some("ignored".into()),
        };
        let (method, body) = publisher().request_for(&content);
        assert_eq!(method, "sendSticker");
        assert!(body.get("caption").is_none());
    }

    #[test]
    fn telegram_poll_request() {
        let content = Content::Poll {
            question: "Best lecture hall?".into(),
            options: vec!["A1".into(), "B2".into()],
            allows_multiple_answers: false,
        };
        let (method, body) = publisher().request_for(&content);
        assert_eq!(method, "sendPoll");
        assert_eq!(body["options"][1]["text"], "B2");
        assert_eq!(body["is_anonymous"], true);
    }

    #[test]
    fn telegram_response_ok() {
        let result =
            interpret_response(200, r#"{"ok":true,"result":{"message_id":55}}"#).unwrap();
        assert_eq!(message_id_from(&result).unwrap(), 55);
    }

    #[test]
    fn telegram_response_rate_limited() {
        let err = interpret_response(
            429,
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":7}}"#,
        )
        .unwrap_err();
        match err {
            PublishError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn telegram_response_rejected() {
        let err = interpret_response(
            400,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { status: 400, .. }));
    }

    #[test]
    fn telegram_response_garbage() {
        let err = interpret_response(502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, PublishError::InvalidResponse(_)));
    }

    #[test]
    fn telegram_missing_message_id() {
        let result = interpret_response(200, r#"{"ok":true,"result":true}"#).unwrap();
        assert!(message_id_from(&result).is_err());
    }
}
