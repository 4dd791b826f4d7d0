use crate::operations::{
    CleanDangleUploadsOperation, CleanDangleUploadsOperationRequest,
    CleanDangleUploadsOperationResult, CreateUploadOperation, CreateUploadOperationRequest,
    ReadUploadOperation, ReadUploadOperationRequest, ReadUploadOperationResult,
};
use crate::{
    Cancellation, ContentStore, Database, MetadataStore, Result, TransactionRunner, Upload,
    UploadConfig,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use ulid::Ulid;

/// Entry points used by the transport layer and the cleanup job.
///
/// Each call is a single sequential flow; independent calls may run
/// concurrently against the same orchestrator.
#[derive(Clone)]
pub struct UploadOrchestrator {
    create: CreateUploadOperation,
    read: ReadUploadOperation,
    clean: CleanDangleUploadsOperation,
}

impl UploadOrchestrator {
    pub fn new(
        database: Database,
        content_store: Arc<dyn ContentStore>,
        config: UploadConfig,
        span: tracing::Span,
    ) -> Result<Self> {
        config.validate()?;

        let metadata = MetadataStore::new(database.clone());
        let transactions = TransactionRunner::new(database);

        Ok(Self {
            create: CreateUploadOperation::new(
                metadata.clone(),
                transactions,
                content_store.clone(),
                config.clone(),
                span.clone(),
            ),
            read: ReadUploadOperation::new(metadata.clone(), content_store.clone(), span.clone()),
            clean: CleanDangleUploadsOperation::new(metadata, content_store, config, span),
        })
    }

    pub async fn create_upload<R>(
        &self,
        size: u64,
        name: impl Into<String>,
        content: &mut R,
        cancel: &Cancellation,
    ) -> Result<Upload>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let request = CreateUploadOperationRequest {
            name: name.into(),
            size,
        };
        let result = self.create.run(request, content, cancel).await?;
        Ok(result.upload)
    }

    pub async fn read_upload<W>(
        &self,
        upload_id: Ulid,
        sink: &mut W,
        cancel: &Cancellation,
    ) -> Result<ReadUploadOperationResult>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.read
            .run(ReadUploadOperationRequest { upload_id }, sink, cancel)
            .await
    }

    pub async fn clean_dangle_uploads(
        &self,
        now: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<CleanDangleUploadsOperationResult> {
        self.clean
            .run(CleanDangleUploadsOperationRequest { now }, cancel)
            .await
    }
}
