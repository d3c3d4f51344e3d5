//! PDF opener that can also fetch remote documents.

use std::sync::Arc;

use async_trait::async_trait;

use paperdrive_pdf::{LopdfDocument, LopdfOpener, PdfDocument, PdfError, PdfOpener};

use crate::transport::Transport;

/// Source name used for rate limiting PDF downloads.
const PDF_SOURCE: &str = "pdf";

/// Opens `http(s)` URLs by downloading them through a [`Transport`], and
/// everything else as a local file.
pub struct RemotePdfOpener {
    transport: Arc<dyn Transport>,
    local: LopdfOpener,
}

impl RemotePdfOpener {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            local: LopdfOpener,
        }
    }
}

#[async_trait]
impl PdfOpener for RemotePdfOpener {
    async fn open(&self, location: &str) -> Result<Box<dyn PdfDocument>, PdfError> {
        if !(location.starts_with("http://") || location.starts_with("https://")) {
            return self.local.open(location).await;
        }
        let bytes = self
            .transport
            .get_bytes(PDF_SOURCE, location)
            .await
            .map_err(|e| PdfError::OpenError(format!("{location}: {e}")))?;
        log::debug!("downloaded {} bytes from {location}", bytes.len());
        Ok(Box::new(LopdfDocument::from_bytes_async(bytes).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;

    #[tokio::test]
    async fn download_failure_is_an_open_error() {
        let opener = RemotePdfOpener::new(Arc::new(FakeTransport::default()));
        let err = opener.open("https://example.org/missing.pdf").await.err().unwrap();
        assert!(matches!(err, PdfError::OpenError(_)));
    }

    #[tokio::test]
    async fn non_pdf_bytes_are_rejected() {
        let mut transport = FakeTransport::default();
        transport
            .bytes
            .insert("https://example.org/page.pdf".into(), b"<html></html>".to_vec());
        let opener = RemotePdfOpener::new(Arc::new(transport));
        assert!(opener.open("https://example.org/page.pdf").await.is_err());
    }

    #[tokio::test]
    async fn local_paths_go_to_the_file_opener() {
        let transport = Arc::new(FakeTransport::default());
        let opener = RemotePdfOpener::new(transport.clone());
        assert!(opener.open("/definitely/not/here.pdf").await.is_err());
        assert!(transport.requests().is_empty());
    }
}
