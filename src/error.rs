use thiserror::Error;

/// Typed failure of a catalog operation
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CatalogError::NotFound(what.into())
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        CatalogError::PermissionDenied(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        CatalogError::Conflict(reason.into())
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        CatalogError::InvalidState(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        CatalogError::Validation(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CatalogError::not_found("service 3").to_string(),
            "service 3 not found"
        );
        let storage: CatalogError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(storage, CatalogError::Storage(_)));
        assert_eq!(storage.to_string(), "storage error: connection reset");
    }
}
