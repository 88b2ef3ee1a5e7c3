//! Telegram messaging client
//!
//! Thin wrapper over the Bot API for the three sends the console needs:
//! text, photo and video. Every send reports `{ok, description}` instead of
//! failing, so callers can tally outcomes; only a missing bot or an
//! unparseable recipient id surfaces as [`MessengerError`].
//!
//! Text and captions go out as HTML. When Telegram rejects the markup the
//! send is retried once as plain text.

use async_trait::async_trait;
use serde::Serialize;
use teloxide::{
    prelude::*,
    types::{ChatId, InputFile, ParseMode},
    RequestError,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Messaging errors that prevent a send from being attempted
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid media URL: {0}")]
    InvalidMediaUrl(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Outcome of one send
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SendOutcome {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            description: None,
        }
    }

    pub fn rejected(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            description: Some(description.into()),
        }
    }
}

/// Outbound messaging to bot users
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<SendOutcome, MessengerError>;

    async fn send_photo(
        &self,
        recipient: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError>;

    async fn send_video(
        &self,
        recipient: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError>;
}

/// Whether Telegram refused the message because of its markup
pub fn is_markup_rejection(description: &str) -> bool {
    description.to_lowercase().contains("parse")
}

fn chat_id(recipient: &str) -> Result<ChatId, MessengerError> {
    recipient
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| MessengerError::InvalidRecipient(recipient.to_string()))
}

fn media(url: &str) -> Result<InputFile, MessengerError> {
    reqwest::Url::parse(url.trim())
        .map(InputFile::url)
        .map_err(|e| MessengerError::InvalidMediaUrl(format!("{}: {}", url, e)))
}

fn outcome<T>(result: Result<T, RequestError>) -> Result<SendOutcome, MessengerError> {
    match result {
        Ok(_) => Ok(SendOutcome::delivered()),
        Err(RequestError::Api(api)) => Ok(SendOutcome::rejected(api.to_string())),
        Err(e @ (RequestError::MigrateToChatId(_) | RequestError::RetryAfter(_))) => {
            Ok(SendOutcome::rejected(e.to_string()))
        }
        Err(e) => Err(MessengerError::SendFailed(e.to_string())),
    }
}

/// Run a send with HTML markup, falling back to plain text once
async fn with_markup_fallback<F, Fut>(send: F) -> Result<SendOutcome, MessengerError>
where
    F: Fn(Option<ParseMode>) -> Fut,
    Fut: std::future::Future<Output = Result<SendOutcome, MessengerError>>,
{
    let first = send(Some(ParseMode::Html)).await?;
    match &first.description {
        Some(description) if !first.ok && is_markup_rejection(description) => {
            debug!("HTML rejected ({}), retrying as plain text", description);
            send(None).await
        }
        _ => Ok(first),
    }
}

/// Bot API messenger
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<SendOutcome, MessengerError> {
        let chat = chat_id(recipient)?;
        let result = with_markup_fallback(|mode| async move {
            let request = self.bot.send_message(chat, text);
            match mode {
                Some(mode) => outcome(request.parse_mode(mode).await),
                None => outcome(request.await),
            }
        })
        .await;

        if let Ok(SendOutcome { ok: false, description }) = &result {
            warn!("Telegram text to {} rejected: {:?}", recipient, description);
        }
        result
    }

    async fn send_photo(
        &self,
        recipient: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError> {
        let chat = chat_id(recipient)?;
        let photo = media(url)?;
        with_markup_fallback(|mode| {
            let photo = photo.clone();
            async move {
                let mut request = self.bot.send_photo(chat, photo);
                if let Some(caption) = caption {
                    request = request.caption(caption);
                }
                match mode {
                    Some(mode) => outcome(request.parse_mode(mode).await),
                    None => outcome(request.await),
                }
            }
        })
        .await
    }

    async fn send_video(
        &self,
        recipient: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError> {
        let chat = chat_id(recipient)?;
        let video = media(url)?;
        with_markup_fallback(|mode| {
            let video = video.clone();
            async move {
                let mut request = self.bot.send_video(chat, video);
                if let Some(caption) = caption {
                    request = request.caption(caption);
                }
                match mode {
                    Some(mode) => outcome(request.parse_mode(mode).await),
                    None => outcome(request.await),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_chat_id_parsing() {
        assert_eq!(chat_id("123456").unwrap(), ChatId(123456));
        assert_eq!(chat_id(" -100200 ").unwrap(), ChatId(-100200));
        assert!(matches!(chat_id("@someone"), Err(MessengerError::InvalidRecipient(_))));
    }

    #[test]
    fn test_media_url() {
        assert!(media("https://cdn.example.com/a.png").is_ok());
        assert!(matches!(media("not a url"), Err(MessengerError::InvalidMediaUrl(_))));
    }

    #[test]
    fn test_markup_rejection_detection() {
        assert!(is_markup_rejection("Bad Request: can't parse entities: Unsupported start tag"));
        assert!(!is_markup_rejection("Forbidden: bot was blocked by the user"));
    }

    #[tokio::test]
    async fn test_fallback_retries_once_without_markup() {
        let calls = AtomicUsize::new(0);
        let result = with_markup_fallback(|mode| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(match mode {
                    Some(_) => SendOutcome::rejected("Bad Request: can't parse entities"),
                    None => SendOutcome::delivered(),
                })
            }
        })
        .await
        .unwrap();

        assert!(result.ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_for_other_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_markup_fallback(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(SendOutcome::rejected("Forbidden: bot was blocked by the user")) }
        })
        .await
        .unwrap();

        assert!(!result.ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
