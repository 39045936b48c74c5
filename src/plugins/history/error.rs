#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    QuotaExceeded { message: String },
    Io { message: String },
    Serialization { message: String },
    Unavailable { message: String },
}

impl StorageError {
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::QuotaExceeded { message }
            | Self::Io { message }
            | Self::Serialization { message }
            | Self::Unavailable { message } => message,
        }
    }
}

fn is_quota_io_error(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::StorageFull {
        return true;
    }
    let lower = err.to_string().to_ascii_lowercase();
    lower.contains("no space left") || lower.contains("disk quota exceeded")
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if is_quota_io_error(&err) {
            return Self::quota_exceeded(err.to_string());
        }
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded { message } => write!(f, "QuotaExceeded: {}", message),
            Self::Io { message } => write!(f, "Io: {}", message),
            Self::Serialization { message } => write!(f, "Serialization: {}", message),
            Self::Unavailable { message } => write!(f, "Unavailable: {}", message),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_full_maps_to_quota() {
        let err = std::io::Error::new(std::io::ErrorKind::StorageFull, "full");
        assert!(StorageError::from(err).is_quota_exceeded());
    }

    #[test]
    fn test_other_io_maps_to_io() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let storage = StorageError::from(err);
        assert!(!storage.is_quota_exceeded());
        assert_eq!(storage.to_string(), "Io: denied");
    }
}
