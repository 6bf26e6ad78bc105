use chat_protocol::ChatError;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

pub const DEFAULT_FILENAME: &str = "untitled.png";

/// Limits applied to `POST /api/upload`.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl UploadPolicy {
    pub fn new(max_file_size_mb: usize, allowed_types: Vec<String>) -> Self {
        Self {
            max_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
            allowed_types: allowed_types
                .into_iter()
                .map(|content_type| content_type.trim().to_ascii_lowercase())
                .filter(|content_type| !content_type.is_empty())
                .collect(),
        }
    }

    pub fn max_file_size_mb(&self) -> usize {
        self.max_bytes / (1024 * 1024)
    }

    /// Checks run in order: declared type, size, then the payload signature.
    pub fn validate(&self, content_type: &str, data: &[u8]) -> Result<(), ChatError> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if !self.allowed_types.iter().any(|allowed| *allowed == content_type) {
            return Err(ChatError::InvalidUpload(format!(
                "unsupported file type: {content_type}; only images are accepted"
            )));
        }
        if data.len() > self.max_bytes {
            return Err(ChatError::InvalidUpload(format!(
                "file exceeds the {}MB limit",
                self.max_file_size_mb()
            )));
        }
        if image_kind(data).is_none() {
            return Err(ChatError::InvalidUpload("invalid image file".into()));
        }
        Ok(())
    }
}

fn image_kind(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(PNG_SIGNATURE) {
        Some("png")
    } else if data.starts_with(JPEG_SIGNATURE) {
        Some("jpeg")
    } else {
        None
    }
}
