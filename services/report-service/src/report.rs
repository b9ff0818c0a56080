use std::{io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Reads the report file as opaque bytes. Content is never inspected.
pub async fn read_report(path: &Path) -> Result<Vec<u8>, ReportError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ReportError::Read {
            path: path.display().to_string(),
            source,
        })
}
