//! Media classification and album batching

use crate::FileInfo;

/// Telegram refuses albums with more items than this
pub const MAX_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    /// Classify by sniffed MIME type
    pub fn classify(mime_type: &str) -> Self {
        if mime_type.contains("image") {
            MediaKind::Photo
        } else if mime_type.contains("video") {
            MediaKind::Video
        } else {
            MediaKind::Document
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub file: FileInfo,
}

impl From<FileInfo> for MediaItem {
    fn from(file: FileInfo) -> Self {
        Self {
            kind: MediaKind::classify(&file.mime_type),
            file,
        }
    }
}

/// Items waiting to be sent as one album, in completion order
#[derive(Debug, Default)]
pub struct MediaGroup {
    items: Vec<MediaItem>,
}

impl MediaGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. When that fills the group, the full album is
    /// returned and the group starts over empty.
    pub fn push(&mut self, item: MediaItem) -> Option<Vec<MediaItem>> {
        self.items.push(item);
        if self.items.len() >= MAX_GROUP_SIZE {
            Some(self.take())
        } else {
            None
        }
    }

    /// Remove and return whatever has accumulated
    pub fn take(&mut self) -> Vec<MediaItem> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, mime: &str) -> MediaItem {
        MediaItem::from(FileInfo {
            filename: name.to_string(),
            mime_type: mime.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_classify() {
        assert_eq!(MediaKind::classify("image/jpeg"), MediaKind::Photo);
        assert_eq!(MediaKind::classify("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::classify("application/zip"), MediaKind::Document);
        assert_eq!(MediaKind::classify(""), MediaKind::Document);
    }

    #[test]
    fn test_flush_exactly_at_tenth_push() {
        let mut group = MediaGroup::new();
        for i in 0..9 {
            assert!(group.push(item(&format!("{}.jpg", i), "image/jpeg")).is_none());
        }
        assert_eq!(group.len(), 9);

        let album = group.push(item("9.jpg", "image/jpeg")).unwrap();
        assert_eq!(album.len(), MAX_GROUP_SIZE);
        assert_eq!(album[0].file.filename, "0.jpg");
        assert!(group.is_empty());
    }

    #[test]
    fn test_take_leftovers() {
        let mut group = MediaGroup::new();
        group.push(item("a.mp4", "video/mp4"));
        group.push(item("b.pdf", "application/pdf"));

        let rest = group.take();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].kind, MediaKind::Video);
        assert_eq!(rest[1].kind, MediaKind::Document);
        assert!(group.take().is_empty());
    }
}
