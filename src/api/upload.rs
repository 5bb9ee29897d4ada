//! Multipart form handling. File parts are spooled into temp files that are
//! removed when the [`StagedFile`] drops, whichever way the request ends.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use axum::extract::Multipart;
use mime_guess::MimeGuess;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::media::{MediaKind, UploadedMedia};

#[derive(Debug)]
pub struct StagedFile {
    pub path: TempPath,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: u64,
}

impl StagedFile {
    fn mime_essence(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .filter(|value| *value != "application/octet-stream")
            .map(str::to_string)
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|name| MimeGuess::from_path(name).first())
                    .map(|mime| mime.essence_str().to_string())
            })
    }

    /// Rejects parts whose declared or guessed type contradicts `kind`.
    pub fn ensure_kind(&self, kind: MediaKind, field: &str) -> ApiResult<()> {
        let expected = match kind {
            MediaKind::Video => "video/",
            MediaKind::Image => "image/",
        };
        match self.mime_essence() {
            Some(mime) if !mime.starts_with(expected) => Err(ApiError::bad_request(format!(
                "{field} must be a {} file",
                kind.as_str()
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    texts: HashMap<String, String>,
    files: HashMap<String, StagedFile>,
}

impl MultipartForm {
    /// Drains the body. Parts named in `file_fields` are staged on disk,
    /// everything else is read as text. Empty file parts count as absent.
    pub async fn read(mut multipart: Multipart, file_fields: &[&str]) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(mut field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if !file_fields.contains(&name.as_str()) {
                let value = field.text().await?;
                form.texts.insert(name, value);
                continue;
            }

            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let suffix = file_name
                .as_deref()
                .and_then(|name| Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .filter(|ext| ext.len() <= 8 && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
                .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
                .unwrap_or_default();

            let staged = tempfile::Builder::new()
                .prefix("vidtube-upload-")
                .suffix(&suffix)
                .tempfile()
                .context("creating upload temp file")?;
            let (file, path) = staged.into_parts();
            let mut file = tokio::fs::File::from_std(file);
            let mut size = 0u64;
            while let Some(chunk) = field.chunk().await? {
                size += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .context("writing upload temp file")?;
            }
            file.flush().await.context("flushing upload temp file")?;

            if size > 0 {
                form.files.insert(
                    name,
                    StagedFile {
                        path,
                        file_name,
                        content_type,
                        size,
                    },
                );
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
        self.files.remove(name)
    }
}

/// Hands a staged file to the media host.
pub async fn upload_staged(
    state: &AppState,
    file: &StagedFile,
    kind: MediaKind,
) -> ApiResult<UploadedMedia> {
    let uploaded = state
        .media
        .upload(&file.path, kind)
        .await
        .with_context(|| format!("uploading {} ({} bytes)", kind.as_str(), file.size))?;
    tracing::info!(kind = kind.as_str(), url = %uploaded.url, "media uploaded");
    Ok(uploaded)
}

#[cfg(test)]
pub(crate) mod testing {
    /// Builds a `multipart/form-data` body from text and file parts.
    pub fn multipart_body(
        boundary: &str,
        texts: &[(&str, &str)],
        files: &[(&str, &str, &str, &[u8])],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in texts {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, file_name, content_type, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }
}
