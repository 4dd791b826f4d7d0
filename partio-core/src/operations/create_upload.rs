use crate::distributor::plan_parts;
use crate::{
    Cancellation, ContentStore, MetadataQueries, MetadataStore, Part, PartioError, Result,
    ResultExt, TransactionRunner, TransferStatus, Upload, UploadConfig,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::Instrument;
use ulid::Ulid;

// Upper bound on the up-front buffer reservation for one part body.
const MAX_PREALLOCATED_PART_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct CreateUploadOperation {
    metadata: MetadataStore,
    transactions: TransactionRunner,
    content_store: Arc<dyn ContentStore>,
    config: UploadConfig,
    span: tracing::Span,
}

#[derive(Debug, Clone)]
pub struct CreateUploadOperationRequest {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct CreateUploadOperationResult {
    pub upload: Upload,
    pub parts: Vec<Part>,
}

impl CreateUploadOperation {
    pub fn new(
        metadata: MetadataStore,
        transactions: TransactionRunner,
        content_store: Arc<dyn ContentStore>,
        config: UploadConfig,
        span: tracing::Span,
    ) -> Self {
        Self {
            metadata,
            transactions,
            content_store,
            config,
            span,
        }
    }

    /// Split `content` into parts, persist the plan, then transfer parts in
    /// order. On failure nothing is rolled back; leftovers stay in progress
    /// until cleanup condemns them.
    pub async fn run<R>(
        &self,
        request: CreateUploadOperationRequest,
        content: &mut R,
        cancel: &Cancellation,
    ) -> Result<CreateUploadOperationResult>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let CreateUploadOperationRequest { name, size } = request;

        if i64::try_from(size).is_err() {
            return Err(PartioError::Validation(format!(
                "upload size {} exceeds the supported maximum",
                size
            )));
        }

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(PartioError::Validation(
                "upload name cannot be empty".to_string(),
            ));
        }

        let upload_id = Ulid::new();
        let span = tracing::info_span!(
            parent: &self.span,
            "create_upload",
            upload_id = %upload_id,
            size
        );

        self.transfer(upload_id, name, size, content, cancel)
            .instrument(span)
            .await
    }

    async fn transfer<R>(
        &self,
        upload_id: Ulid,
        name: String,
        size: u64,
        content: &mut R,
        cancel: &Cancellation,
    ) -> Result<CreateUploadOperationResult>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let (mut upload, mut parts) = self
            .persist_upload(upload_id, name, size, cancel)
            .await
            .context("unable to create upload")?;

        let total = parts.len();
        for part in &mut parts {
            tracing::info!(
                "Uploading part {}/{} id={} backend={} size={}",
                part.number + 1,
                total,
                part.id,
                part.backend,
                part.size
            );

            let body = read_part_body(content, part.size, cancel)
                .await
                .with_context(|| format!("unable to read body of part {}", part.number))?;

            cancel
                .guard(self.content_store.put(part.id, &part.backend, body))
                .await
                .with_context(|| format!("unable to upload part {}", part.number))?;

            cancel.check()?;
            self.metadata
                .mark_part_done(part.id)
                .with_context(|| format!("unable to mark part {} as done", part.number))?;
            part.status = TransferStatus::Done;
        }

        cancel.check()?;
        self.metadata
            .mark_upload_done(upload.id)
            .context("unable to mark upload as done")?;
        upload.status = TransferStatus::Done;

        tracing::info!("Upload {} completed with {} parts", upload.id, total);
        Ok(CreateUploadOperationResult { upload, parts })
    }

    async fn persist_upload(
        &self,
        upload_id: Ulid,
        name: String,
        size: u64,
        cancel: &Cancellation,
    ) -> Result<(Upload, Vec<Part>)> {
        let backends = cancel
            .guard(self.content_store.list_available_backends())
            .await
            .context("unable to get available backends")?;

        let plan = plan_parts(size, self.config.part_count, &backends, &mut rand::thread_rng())?;

        let created_at = Utc::now();
        let upload = Upload {
            id: upload_id,
            name,
            size,
            status: TransferStatus::InProgress,
            created_at,
        };

        let parts: Vec<Part> = plan
            .into_iter()
            .map(|planned| Part {
                id: Ulid::new(),
                upload_id,
                backend: planned.backend,
                number: planned.number,
                size: planned.size,
                status: TransferStatus::InProgress,
                created_at,
            })
            .collect();

        cancel.check()?;
        self.transactions.exec(|tx| {
            let store = self.metadata.with_tx(tx);
            store.insert_upload(&upload)?;
            for part in &parts {
                store.insert_part(part)?;
            }
            Ok(())
        })?;

        Ok((upload, parts))
    }
}

/// Take exactly `size` bytes from the shared stream.
async fn read_part_body<R>(content: &mut R, size: u64, cancel: &Cancellation) -> Result<Bytes>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut buffer = Vec::with_capacity(size.min(MAX_PREALLOCATED_PART_BYTES) as usize);

    let read = cancel
        .guard(async {
            (&mut *content)
                .take(size)
                .read_to_end(&mut buffer)
                .await
                .map_err(PartioError::from)
        })
        .await?;

    if read as u64 != size {
        return Err(PartioError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("content ended after {} of {} bytes", read, size),
        )));
    }

    Ok(Bytes::from(buffer))
}
