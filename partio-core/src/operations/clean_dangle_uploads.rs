use crate::{Cancellation, ContentStore, MetadataQueries, MetadataStore, Result, ResultExt, UploadConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::Instrument;
use ulid::Ulid;

#[derive(Clone)]
pub struct CleanDangleUploadsOperation {
    metadata: MetadataStore,
    content_store: Arc<dyn ContentStore>,
    config: UploadConfig,
    span: tracing::Span,
}

#[derive(Debug, Clone)]
pub struct CleanDangleUploadsOperationRequest {
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanDangleUploadsOperationResult {
    pub stale_parts: usize,
    pub uploads_deleted: usize,
    pub blobs_removed: usize,
}

impl CleanDangleUploadsOperation {
    pub fn new(
        metadata: MetadataStore,
        content_store: Arc<dyn ContentStore>,
        config: UploadConfig,
        span: tracing::Span,
    ) -> Self {
        Self {
            metadata,
            content_store,
            config,
            span,
        }
    }

    /// Discard every upload owning a part that is still in progress and older
    /// than the TTL. One stale part condemns the whole upload, including
    /// siblings that already completed.
    pub async fn run(
        &self,
        request: CleanDangleUploadsOperationRequest,
        cancel: &Cancellation,
    ) -> Result<CleanDangleUploadsOperationResult> {
        let cutoff = self.config.dangling_cutoff(request.now)?;
        let span = tracing::info_span!(parent: &self.span, "clean_dangle_uploads", %cutoff);

        self.clean(cutoff, cancel).instrument(span).await
    }

    async fn clean(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<CleanDangleUploadsOperationResult> {
        cancel.check()?;
        let stale = self
            .metadata
            .list_stale_parts(cutoff)
            .context("unable to get old in progress parts")?;

        if stale.is_empty() {
            tracing::debug!("No dangling uploads older than {}", cutoff);
            return Ok(CleanDangleUploadsOperationResult::default());
        }

        let upload_ids: Vec<Ulid> = stale
            .iter()
            .map(|part| part.upload_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        cancel.check()?;
        let condemned = self
            .metadata
            .list_parts_for_uploads(&upload_ids)
            .context("unable to get parts of dangling uploads")?;

        for part in &condemned {
            cancel
                .guard(self.content_store.delete(part.id, &part.backend))
                .await
                .with_context(|| {
                    format!(
                        "unable to clean part {} of upload {} on {}",
                        part.id, part.upload_id, part.backend
                    )
                })?;
        }

        // Parts go with their uploads through the cascade.
        cancel.check()?;
        let uploads_deleted = self
            .metadata
            .delete_uploads(&upload_ids)
            .context("unable to delete uploads")?;

        tracing::info!(
            "Cleaned {} dangling uploads ({} stale parts, {} blobs removed)",
            uploads_deleted,
            stale.len(),
            condemned.len()
        );

        Ok(CleanDangleUploadsOperationResult {
            stale_parts: stale.len(),
            uploads_deleted,
            blobs_removed: condemned.len(),
        })
    }
}
