//! Staged image attachments
//!
//! One image may be staged at a time. Files are validated before anything
//! touches the network: format is sniffed from the magic bytes and the size
//! is capped, the same checks the composer applies before upload.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use std::path::{Path, PathBuf};

/// 5 MiB cap on staged images.
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
    /// Local preview, a data URL over the raw bytes.
    pub preview: String,
}

/// Read and validate a file from disk.
pub async fn stage(path: &Path) -> Result<Attachment> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    if meta.len() > MAX_FILE_SIZE {
        bail!("File too large. Maximum size is 5 MiB.");
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    from_bytes(path, bytes)
}

/// Validate already-loaded bytes and build the staged attachment.
pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Attachment> {
    if bytes.len() as u64 > MAX_FILE_SIZE {
        bail!("File too large. Maximum size is 5 MiB.");
    }
    let mime = match image::guess_format(&bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => bail!("Invalid file type. Use a JPEG, PNG, GIF, or WebP image."),
    };
    let preview = format!("data:{};base64,{}", mime, BASE64.encode(&bytes));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Attachment {
        path: path.to_path_buf(),
        file_name,
        mime,
        bytes,
        preview,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[..PNG_MAGIC.len()].copy_from_slice(&PNG_MAGIC);
        bytes
    }

    #[test]
    fn four_megabyte_png_is_accepted_with_preview() {
        let attachment = from_bytes(Path::new("photo.png"), png_bytes(4 * 1024 * 1024)).unwrap();
        assert_eq!(attachment.mime, "image/png");
        assert_eq!(attachment.file_name, "photo.png");
        assert!(attachment.preview.starts_with("data:image/png;base64,"));
        assert!(attachment.preview.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn six_megabyte_file_is_rejected() {
        let err = from_bytes(Path::new("big.png"), png_bytes(6 * 1024 * 1024)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn unsupported_format_is_rejected() {
        // BMP magic sniffs fine but is not an accepted upload type.
        let mut bytes = vec![0u8; 64];
        bytes[0] = b'B';
        bytes[1] = b'M';
        let err = from_bytes(Path::new("image.bmp"), bytes).unwrap_err();
        assert!(err.to_string().contains("Invalid file type"));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = from_bytes(Path::new("notes.txt"), b"just some text".to_vec()).unwrap_err();
        assert!(err.to_string().contains("Invalid file type"));
    }

    #[tokio::test]
    async fn stage_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.gif");
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        tokio::fs::write(&path, &bytes).await.unwrap();

        let attachment = stage(&path).await.unwrap();
        assert_eq!(attachment.mime, "image/gif");
        assert_eq!(attachment.bytes, bytes);
    }

    #[tokio::test]
    async fn stage_missing_file_errors() {
        assert!(stage(Path::new("/no/such/file.png")).await.is_err());
    }
}
