//! `multipart/form-data` bodies for file uploads.

use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;

/// One file part of a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartFile {
    /// File name sent in `Content-Disposition`.
    pub file_name: String,
    /// MIME type of the content.
    pub content_type: String,
    /// File content.
    pub data: Bytes,
}

impl MultipartFile {
    /// A part from in-memory content.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Read a part from disk, guessing its type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(file_name, guess_mime(path), data))
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// A random boundary in UUID form.
pub fn random_boundary() -> String {
    let bits: u128 = rand::random();
    let hex = format!("{bits:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// The `Content-Type` header value for `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// Encode `files` as parts named `file0`, `file1`, ...
pub fn encode(files: &[MultipartFile], boundary: &str) -> Bytes {
    let mut body = BytesMut::new();
    for (index, file) in files.iter().enumerate() {
        body.put_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file{index}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.put_slice(&file.data);
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    body.freeze()
}
