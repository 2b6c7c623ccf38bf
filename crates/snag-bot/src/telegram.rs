//! Telegram side of a conversation

use async_trait::async_trait;
use snag_core::{Conversation, MediaItem, MediaKind, SessionKey, SnagError, StatusMessage};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    InputFile, InputMedia, InputMediaDocument, InputMediaPhoto, InputMediaVideo, MessageId,
    ReplyParameters,
};
use teloxide::RequestError;
use tracing::debug;

/// The chat and message a request came from
pub struct TelegramChat {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    user_id: u64,
}

impl TelegramChat {
    pub fn from_message(bot: Bot, msg: &Message) -> Self {
        Self {
            bot,
            chat_id: msg.chat.id,
            message_id: msg.id,
            user_id: msg.from.as_ref().map(|u| u.id.0).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Conversation for TelegramChat {
    fn key(&self) -> SessionKey {
        SessionKey::new(self.chat_id.0, self.user_id)
    }

    async fn reply(&self, text: &str) -> snag_core::Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .reply_parameters(ReplyParameters::new(self.message_id))
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn open_status(&self, text: &str) -> snag_core::Result<Arc<dyn StatusMessage>> {
        let sent = self
            .bot
            .send_message(self.chat_id, text)
            .reply_parameters(ReplyParameters::new(self.message_id))
            .await
            .map_err(request_error)?;

        Ok(Arc::new(TelegramStatus {
            bot: self.bot.clone(),
            chat_id: self.chat_id,
            message_id: sent.id,
        }))
    }

    async fn deliver(&self, items: Vec<MediaItem>) -> snag_core::Result<()> {
        debug!("Sending album of {} to {}", items.len(), self.chat_id);
        let media: Vec<InputMedia> = items.into_iter().map(to_input_media).collect();
        self.bot
            .send_media_group(self.chat_id, media)
            .await
            .map_err(|e| SnagError::DeliveryError(e.to_string()))?;
        Ok(())
    }
}

/// The "Downloading..." message of one batch
pub struct TelegramStatus {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

#[async_trait]
impl StatusMessage for TelegramStatus {
    async fn edit(&self, text: &str) -> snag_core::Result<()> {
        self.bot
            .edit_message_text(self.chat_id, self.message_id, text)
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn remove(&self) -> snag_core::Result<()> {
        self.bot
            .delete_message(self.chat_id, self.message_id)
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

/// Album entry for a downloaded file, uploaded from memory
pub fn to_input_media(item: MediaItem) -> InputMedia {
    let file = InputFile::memory(item.file.content).file_name(item.file.filename);
    match item.kind {
        MediaKind::Photo => InputMedia::Photo(InputMediaPhoto::new(file)),
        MediaKind::Video => InputMedia::Video(InputMediaVideo::new(file)),
        MediaKind::Document => InputMedia::Document(InputMediaDocument::new(file)),
    }
}

fn request_error(e: RequestError) -> SnagError {
    SnagError::Other(format!("Telegram request failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use snag_core::FileInfo;

    fn item(name: &str, mime: &str) -> MediaItem {
        MediaItem::from(FileInfo {
            filename: name.to_string(),
            content: vec![1, 2, 3],
            mime_type: mime.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_media_kind_mapping() {
        assert!(matches!(
            to_input_media(item("a.jpg", "image/jpeg")),
            InputMedia::Photo(_)
        ));
        assert!(matches!(
            to_input_media(item("b.mp4", "video/mp4")),
            InputMedia::Video(_)
        ));
        assert!(matches!(
            to_input_media(item("c.zip", "application/zip")),
            InputMedia::Document(_)
        ));
    }
}
