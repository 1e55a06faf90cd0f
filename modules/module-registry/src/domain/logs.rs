use std::sync::Arc;

use tracing::warn;

use crate::domain::error::RegistryError;
use crate::infra::storage::entity::error_logs;
use crate::infra::storage::repo::{ErrorLogFilter, NewErrorLogRow, Repository};

/// Captured-failure log: write path for the boundary middleware, read and
/// CSV-export paths for the admin endpoints.
pub struct ErrorLogService {
    repo: Arc<Repository>,
}

impl ErrorLogService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Persist a captured failure. Never fails the caller; a logging path
    /// that can take a request down is worse than a lost row.
    pub async fn record(&self, row: NewErrorLogRow) {
        if let Err(e) = self.repo.insert_error_log(row).await {
            warn!(error = %e, "failed to persist error log");
        }
    }

    pub async fn query(
        &self,
        filter: &ErrorLogFilter,
    ) -> Result<Vec<error_logs::Model>, RegistryError> {
        Ok(self.repo.query_error_logs(filter).await?)
    }

    /// Render the filtered logs (without paging) as CSV.
    pub async fn export_csv(&self, filter: &ErrorLogFilter) -> Result<String, RegistryError> {
        let unpaged = ErrorLogFilter {
            limit: None,
            offset: None,
            ..filter.clone()
        };
        let rows = self.repo.query_error_logs(&unpaged).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "id",
                "code",
                "message",
                "developer_message",
                "request_path",
                "stack",
                "principal",
                "created_at",
            ])
            .map_err(|e| RegistryError::BadInput(format!("csv export failed: {e}")))?;
        for row in rows {
            writer
                .write_record([
                    row.id.to_string(),
                    row.code,
                    row.message,
                    row.developer_message.unwrap_or_default(),
                    row.request_path.unwrap_or_default(),
                    row.stack.unwrap_or_default(),
                    row.principal.unwrap_or_default(),
                    row.created_at.to_rfc3339(),
                ])
                .map_err(|e| RegistryError::BadInput(format!("csv export failed: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| RegistryError::BadInput(format!("csv export failed: {e}")))?;
        String::from_utf8(bytes).map_err(|e| RegistryError::BadInput(format!("csv export failed: {e}")))
    }
}
