//! File attachments turned into inline message parts.

use std::path::Path;

use base64::Engine;
use futures::future::try_join_all;
use tracing::Instrument;

use crate::error::{AgentError, Result};
use crate::message::ContentPart;

/// How an attachment is embedded in the user turn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Image(&'static str),
    Document(&'static str),
}

impl AttachmentKind {
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Image(mime) | Self::Document(mime) => mime,
        }
    }
}

/// Classify by extension. Unknown extensions are sent as PDF documents.
pub fn classify(path: &Path) -> AttachmentKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => AttachmentKind::Image("image/png"),
        Some("jpg" | "jpeg") => AttachmentKind::Image("image/jpeg"),
        Some("webp") => AttachmentKind::Image("image/webp"),
        Some("pdf") => AttachmentKind::Document("application/pdf"),
        other => {
            tracing::warn!(
                path = %path.display(),
                extension = ?other,
                "Unsupported attachment type, sending it as a PDF document"
            );
            AttachmentKind::Document("application/pdf")
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Read, encode and wrap one attachment
pub async fn process_file(path: &Path) -> Result<ContentPart> {
    let name = file_name(path);
    let span = tracing::info_span!("attachment", file_name = %name);

    async move {
        let bytes = tokio::fs::read(path).await.map_err(|source| AgentError::Attachment {
            path: path.display().to_string(),
            source,
        })?;

        #[allow(clippy::cast_precision_loss)]
        let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
        tracing::info!("Processing attachment of {size_mb:.2} MB");

        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let part = match classify(path) {
            AttachmentKind::Image(mime) => ContentPart::Image {
                mime_type: mime.to_owned(),
                data,
            },
            AttachmentKind::Document(mime) => ContentPart::File {
                filename: name,
                mime_type: mime.to_owned(),
                data,
            },
        };
        Ok(part)
    }
    .instrument(span)
    .await
}

/// Process every attachment concurrently. The first failure aborts the rest.
pub async fn process_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ContentPart>> {
    try_join_all(paths.iter().map(|p| process_file(p.as_ref()))).await
}
