//! Delivery renderer: turns one work item into chat-bot calls.
//!
//! Text is the authoritative payload: if it cannot be posted, the whole
//! message goes to the fallback relay and no images are attempted. Image
//! failures only ever skip that one image.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::channels::relay::Relay;
use crate::channels::telegram::ChatClient;
use crate::pipeline::classify::{classify, image_filename};
use crate::pipeline::types::{ChatId, WorkItem};

/// What happened to a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Text (if any) posted; `images` uploaded, `skipped` dropped.
    Delivered { images: usize, skipped: usize },
    /// Text failed and the fallback relay accepted the message.
    Rerouted,
    /// Text failed and there was no fallback, or the fallback failed too.
    Lost,
}

/// Chat body: bold subject, blank line, text.
pub fn format_body(subject: &str, text: &str) -> String {
    format!("*{subject}*\n\n{text}")
}

/// Delivers work items to the chat bot, falling back to a relay.
#[derive(Clone)]
pub struct Renderer {
    client: Arc<dyn ChatClient>,
    fallback: Option<Arc<dyn Relay>>,
}

impl Renderer {
    pub fn new(client: Arc<dyn ChatClient>, fallback: Option<Arc<dyn Relay>>) -> Self {
        Self { client, fallback }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Deliver one item to `chat`. Never fails; every error is logged here.
    pub async fn deliver(&self, chat: ChatId, item: &WorkItem) -> Outcome {
        let content = classify(&item.message);

        if let Some(text) = content.body_text() {
            let body = format_body(item.subject(), &text);
            if let Err(e) = self.client.send_text(chat, &body, true).await {
                error!(item = %item.id, chat = %chat, "Telegram message send failed: {e}");
                return self.fall_back(item).await;
            }
        }

        let mut images = 0;
        let mut skipped = 0;
        for (index, part) in content.images.iter().enumerate() {
            let file_name = match image_filename(part, index) {
                Ok(name) => name,
                Err(e) => {
                    warn!(item = %item.id, chat = %chat, "Skipping image: {e}");
                    skipped += 1;
                    continue;
                }
            };

            // Attachments of the same mail; only the text should notify.
            match self
                .client
                .send_photo(chat, file_name, part.contents().to_vec(), file_name, true)
                .await
            {
                Ok(()) => images += 1,
                Err(e) => {
                    error!(item = %item.id, chat = %chat, file_name, "Telegram photo send failed: {e}");
                    skipped += 1;
                }
            }
        }

        info!(
            item = %item.id,
            chat = %chat,
            images,
            skipped,
            "Message delivered"
        );
        Outcome::Delivered { images, skipped }
    }

    async fn fall_back(&self, item: &WorkItem) -> Outcome {
        let Some(relay) = &self.fallback else {
            warn!(item = %item.id, sender = %item.sender, "No fallback relay configured; message dropped");
            return Outcome::Lost;
        };

        info!(item = %item.id, "Sending to fallback relay");
        match relay
            .relay(&item.sender, &item.recipients, Arc::clone(&item.raw))
            .await
        {
            Ok(()) => Outcome::Rerouted,
            Err(e) => {
                error!(item = %item.id, "Fallback relay failed: {e}");
                Outcome::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mail_parser::MessageParser;

    use super::*;
    use crate::error::{DeliveryError, RelayError};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text { chat: ChatId, text: String, markdown: bool },
        Photo { chat: ChatId, name: String, caption: String, silent: bool },
    }

    /// Records calls; fails text sends when `fail_text`, photos named in `fail_photos`.
    #[derive(Default)]
    struct StubChat {
        calls: Mutex<Vec<Call>>,
        fail_text: bool,
        fail_photos: Vec<String>,
    }

    #[async_trait]
    impl ChatClient for StubChat {
        async fn send_text(&self, chat: ChatId, text: &str, markdown: bool) -> Result<(), DeliveryError> {
            self.calls.lock().unwrap().push(Call::Text {
                chat,
                text: text.into(),
                markdown,
            });
            if self.fail_text {
                return Err(DeliveryError::Http("connection refused".into()));
            }
            Ok(())
        }

        async fn send_photo(
            &self,
            chat: ChatId,
            file_name: &str,
            _bytes: Vec<u8>,
            caption: &str,
            disable_notification: bool,
        ) -> Result<(), DeliveryError> {
            self.calls.lock().unwrap().push(Call::Photo {
                chat,
                name: file_name.into(),
                caption: caption.into(),
                silent: disable_notification,
            });
            if self.fail_photos.iter().any(|f| f == file_name) {
                return Err(DeliveryError::SendFailed {
                    method: "sendPhoto".into(),
                    reason: "PHOTO_INVALID_DIMENSIONS".into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubRelay {
        calls: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Relay for StubRelay {
        async fn relay(&self, sender: &str, recipients: &[String], raw: Arc<[u8]>) -> Result<(), RelayError> {
            self.calls
                .lock()
                .unwrap()
                .push((sender.into(), recipients.to_vec(), raw.to_vec()));
            if self.fail {
                return Err(RelayError::Transport {
                    host: "relay.example".into(),
                    port: 25,
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    const TEXT_AND_TWO_IMAGES: &str = "From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Trip\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
photos below\r\n\
--XX\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment\r\n\
\r\n\
nofilename\r\n\
--XX\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"two.png\"\r\n\
\r\n\
pngbytes\r\n\
--XX--\r\n";

    fn item(raw: &str) -> WorkItem {
        let message = MessageParser::default()
            .parse(raw.as_bytes())
            .unwrap()
            .into_owned();
        WorkItem::new(
            "alice@example.com".into(),
            vec!["bob@example.com".into(), "carol@example.com".into()],
            message,
            Arc::from(raw.as_bytes()),
        )
    }

    #[test]
    fn body_has_bold_subject_and_blank_line() {
        assert_eq!(format_body("Hi", "there"), "*Hi*\n\nthere");
    }

    #[tokio::test]
    async fn text_only_message_sends_one_markdown_text() {
        let chat = Arc::new(StubChat::default());
        let renderer = Renderer::new(chat.clone(), None);

        let outcome = renderer
            .deliver(ChatId(100), &item("From: x@example.com\r\nSubject: Hi\r\n\r\nthere\r\n"))
            .await;

        assert_eq!(outcome, Outcome::Delivered { images: 0, skipped: 0 });
        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Text { chat, text, markdown } => {
                assert_eq!(*chat, ChatId(100));
                assert!(text.contains("Hi"));
                assert!(text.contains("there"));
                assert!(markdown);
            }
            other => panic!("expected text send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_without_filename_is_skipped_others_delivered() {
        let chat = Arc::new(StubChat::default());
        let renderer = Renderer::new(chat.clone(), None);

        let outcome = renderer.deliver(ChatId(7), &item(TEXT_AND_TWO_IMAGES)).await;

        assert_eq!(outcome, Outcome::Delivered { images: 1, skipped: 1 });
        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::Text { .. }));
        assert_eq!(
            calls[1],
            Call::Photo {
                chat: ChatId(7),
                name: "two.png".into(),
                caption: "two.png".into(),
                silent: true,
            }
        );
    }

    #[tokio::test]
    async fn failed_photo_does_not_stop_the_rest() {
        let raw = TEXT_AND_TWO_IMAGES.replace("Content-Disposition: attachment\r\n", "Content-Disposition: attachment; filename=\"one.png\"\r\n");
        let chat = Arc::new(StubChat {
            fail_photos: vec!["one.png".into()],
            ..Default::default()
        });
        let relay = Arc::new(StubRelay::default());
        let renderer = Renderer::new(chat.clone(), Some(relay.clone()));

        let outcome = renderer.deliver(ChatId(7), &item(&raw)).await;

        assert_eq!(outcome, Outcome::Delivered { images: 1, skipped: 1 });
        assert_eq!(chat.calls.lock().unwrap().len(), 3);
        assert!(relay.calls.lock().unwrap().is_empty(), "image failure must not fall back");
    }

    #[tokio::test]
    async fn text_failure_falls_back_with_original_envelope_and_bytes() {
        let chat = Arc::new(StubChat {
            fail_text: true,
            ..Default::default()
        });
        let relay = Arc::new(StubRelay::default());
        let renderer = Renderer::new(chat.clone(), Some(relay.clone()));
        let work = item(TEXT_AND_TWO_IMAGES);

        let outcome = renderer.deliver(ChatId(7), &work).await;

        assert_eq!(outcome, Outcome::Rerouted);
        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "no photos after a text failure");
        let relayed = relay.calls.lock().unwrap();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].0, "alice@example.com");
        assert_eq!(relayed[0].1, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(relayed[0].2, TEXT_AND_TWO_IMAGES.as_bytes());
    }

    #[tokio::test]
    async fn text_failure_without_fallback_is_lost() {
        let chat = Arc::new(StubChat {
            fail_text: true,
            ..Default::default()
        });
        let renderer = Renderer::new(chat.clone(), None);
        assert!(!renderer.has_fallback());

        let outcome = renderer.deliver(ChatId(7), &item(TEXT_AND_TWO_IMAGES)).await;

        assert_eq!(outcome, Outcome::Lost);
        assert_eq!(chat.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fallback_failure_is_terminal() {
        let chat = Arc::new(StubChat {
            fail_text: true,
            ..Default::default()
        });
        let relay = Arc::new(StubRelay {
            fail: true,
            ..Default::default()
        });
        let renderer = Renderer::new(chat.clone(), Some(relay.clone()));

        let outcome = renderer.deliver(ChatId(7), &item(TEXT_AND_TWO_IMAGES)).await;

        assert_eq!(outcome, Outcome::Lost);
        assert_eq!(relay.calls.lock().unwrap().len(), 1);
        assert_eq!(chat.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn image_only_message_skips_text() {
        let raw = "From: cam@example.com\r\n\
Content-Type: image/jpeg\r\n\
Content-Disposition: attachment; filename=\"snap.jpg\"\r\n\
\r\n\
jpegbytes\r\n";
        let chat = Arc::new(StubChat::default());
        let renderer = Renderer::new(chat.clone(), None);

        let outcome = renderer.deliver(ChatId(1), &item(raw)).await;

        assert_eq!(outcome, Outcome::Delivered { images: 1, skipped: 0 });
        let calls = chat.calls.lock().unwrap();
        assert!(matches!(&calls[0], Call::Photo { name, .. } if name == "snap.jpg"));
    }
}
