use crate::{Cancellation, ContentStore, MetadataQueries, MetadataStore, PartioError, Result, ResultExt};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::Instrument;
use ulid::Ulid;

#[derive(Clone)]
pub struct ReadUploadOperation {
    metadata: MetadataStore,
    content_store: Arc<dyn ContentStore>,
    span: tracing::Span,
}

#[derive(Debug, Clone)]
pub struct ReadUploadOperationRequest {
    pub upload_id: Ulid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadUploadOperationResult {
    pub parts_read: usize,
    pub bytes_written: u64,
}

impl ReadUploadOperation {
    pub fn new(
        metadata: MetadataStore,
        content_store: Arc<dyn ContentStore>,
        span: tracing::Span,
    ) -> Self {
        Self {
            metadata,
            content_store,
            span,
        }
    }

    /// Stream parts 0..N-1 into `sink` in order. Bytes already written
    /// before a failing part stay written.
    pub async fn run<W>(
        &self,
        request: ReadUploadOperationRequest,
        sink: &mut W,
        cancel: &Cancellation,
    ) -> Result<ReadUploadOperationResult>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let ReadUploadOperationRequest { upload_id } = request;
        let span = tracing::info_span!(parent: &self.span, "read_upload", upload_id = %upload_id);

        self.stream_parts(upload_id, sink, cancel)
            .instrument(span)
            .await
    }

    async fn stream_parts<W>(
        &self,
        upload_id: Ulid,
        sink: &mut W,
        cancel: &Cancellation,
    ) -> Result<ReadUploadOperationResult>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        cancel.check()?;
        let parts = self
            .metadata
            .list_parts(upload_id)
            .context("unable to get parts")?;

        if parts.is_empty() {
            return Err(PartioError::NotFound(format!(
                "no parts found for upload {}",
                upload_id
            )));
        }

        let mut result = ReadUploadOperationResult::default();
        for part in &parts {
            tracing::info!(
                "Reading part {}/{} id={} backend={}",
                part.number + 1,
                parts.len(),
                part.id,
                part.backend
            );

            let bytes = cancel
                .guard(self.content_store.get(part.id, &part.backend))
                .await
                .with_context(|| format!("unable to get part {}", part.number))?;

            cancel
                .guard(async { sink.write_all(&bytes).await.map_err(PartioError::from) })
                .await
                .with_context(|| format!("unable to write part {}", part.number))?;

            result.parts_read += 1;
            result.bytes_written += bytes.len() as u64;
        }

        cancel
            .guard(async { sink.flush().await.map_err(PartioError::from) })
            .await?;

        Ok(result)
    }
}
