use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

/// Best-effort description of an image file, stored as the item's metadata
/// blob. Every field is optional except the content hash and size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemMetadata {
    pub filename: Option<String>,
    pub size_bytes: u64,
    pub sha256: String,

    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub orientation: Option<u32>,

    /// EXIF DateTimeOriginal as `YYYY-MM-DDTHH:MM:SS` (no zone).
    pub captured_at: Option<String>,
}

impl ItemMetadata {
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Read what we can from already-loaded file bytes. Never fails; missing or
/// malformed EXIF just leaves fields empty.
pub fn extract_metadata(path: &Path, bytes: &[u8]) -> ItemMetadata {
    let mut metadata = ItemMetadata {
        filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        size_bytes: bytes.len() as u64,
        sha256: format!("{:x}", Sha256::digest(bytes)),
        ..Default::default()
    };

    if let Ok(format) = image::guess_format(bytes) {
        metadata.format = Some(format!("{:?}", format));
    }

    if let Ok(reader) = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            metadata.width = Some(width);
            metadata.height = Some(height);
        }
    }

    if let Ok(exif) = exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        let text = |tag| {
            exif.get_field(tag, exif::In::PRIMARY)
                .map(|field| field.display_value().to_string().trim_matches('"').trim().to_string())
                .filter(|s| !s.is_empty())
        };

        metadata.camera_make = text(exif::Tag::Make);
        metadata.camera_model = text(exif::Tag::Model);
        metadata.captured_at = text(exif::Tag::DateTimeOriginal).map(|raw| normalize_capture_time(&raw));
        metadata.orientation = exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0));
    }

    metadata
}

/// EXIF timestamps come as `YYYY:MM:DD HH:MM:SS` (or `YYYY-MM-DD HH:MM:SS`
/// once formatted). Unparseable values are kept verbatim.
fn normalize_capture_time(raw: &str) -> String {
    ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}
