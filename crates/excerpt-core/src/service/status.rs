//! Status Reporter. Read-only, with no ownership check.

use super::Inner;
use crate::{Error, ExcerptId, Result, StatusReport, store};

pub(super) async fn status(inner: &Inner, id: ExcerptId) -> Result<StatusReport> {
    store::bounded_record(inner.config.storage_timeout, inner.records.find(&id))
        .await?
        .map(|record| record.status_report())
        .ok_or(Error::RequestNotFound { id })
}
