use thiserror::Error;

/// Classified persistence failure.
///
/// Clients return these at the root of an `anyhow::Error`; callers add
/// context freely and branch on [`error_kind`] instead of message text.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Configuration already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict: expected {expected}, but found {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Connection,
    AlreadyExists,
    Generic,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::VersionConflict { .. } => ErrorKind::Conflict,
            StorageError::Connection(_) => ErrorKind::Connection,
            StorageError::Other(_) => ErrorKind::Generic,
        }
    }
}

/// Kind of the first classified error in the chain, `Generic` if none.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    if let Some(storage_err) = err.downcast_ref::<StorageError>() {
        return storage_err.kind();
    }
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
        .map_or(ErrorKind::Generic, StorageError::kind)
}

pub fn is_not_found_error(err: &anyhow::Error) -> bool {
    error_kind(err) == ErrorKind::NotFound
}

pub fn is_conflict_error(err: &anyhow::Error) -> bool {
    error_kind(err) == ErrorKind::Conflict
}

pub fn is_connection_error(err: &anyhow::Error) -> bool {
    error_kind(err) == ErrorKind::Connection
}

pub fn is_already_exists_error(err: &anyhow::Error) -> bool {
    error_kind(err) == ErrorKind::AlreadyExists
}

/// Maps an `object_store` failure on `name` onto the storage taxonomy,
/// keeping the original error as the source.
pub(crate) fn classify_object_store(err: object_store::Error, name: &str) -> anyhow::Error {
    let classified = match &err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(name.to_string()),
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists(name.to_string()),
        object_store::Error::Precondition { .. } | object_store::Error::NotModified { .. } => {
            StorageError::VersionConflict {
                expected: "precondition".to_string(),
                actual: "modified".to_string(),
            }
        }
        object_store::Error::Generic { .. } => StorageError::Connection(name.to_string()),
        _ => StorageError::Other(name.to_string()),
    };
    anyhow::Error::new(err).context(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_survives_context() {
        let err = anyhow::Error::new(StorageError::NotFound("app".to_string()))
            .context("get config app")
            .context("outer");
        assert_eq!(error_kind(&err), ErrorKind::NotFound);
        assert!(is_not_found_error(&err));
        assert!(!is_conflict_error(&err));
    }

    #[test]
    fn test_unclassified_is_generic() {
        let err = anyhow::anyhow!("Some error");
        assert_eq!(error_kind(&err), ErrorKind::Generic);
    }

    #[test]
    fn test_context_on_result() {
        let result: anyhow::Result<()> = Err(StorageError::VersionConflict {
            expected: "v1".to_string(),
            actual: "v2".to_string(),
        }
        .into());
        let err = result.context("update config app").unwrap_err();
        assert!(is_conflict_error(&err));
        assert!(format!("{err:#}").contains("expected v1, but found v2"));
    }

    #[test]
    fn test_classify_object_store_errors() {
        let not_found = object_store::Error::NotFound {
            path: "app/metadata.json".to_string(),
            source: "missing".into(),
        };
        assert!(is_not_found_error(&classify_object_store(not_found, "app")));

        let exists = object_store::Error::AlreadyExists {
            path: "app/metadata.json".to_string(),
            source: "exists".into(),
        };
        assert!(is_already_exists_error(&classify_object_store(exists, "app")));

        let generic = object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        assert!(is_connection_error(&classify_object_store(generic, "app")));

        let unsupported = object_store::Error::NotImplemented;
        assert_eq!(
            error_kind(&classify_object_store(unsupported, "app")),
            ErrorKind::Generic
        );
    }
}
