use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum ShadowVaultError {
    /// Bad credentials, duplicate sign-up, missing session, or a transport
    /// failure while talking to the auth API.
    #[error("{0}")]
    Auth(String),

    /// A required field was empty. Raised before any remote call.
    #[error("{0}")]
    Validation(String),

    /// Listing secrets failed. The held list is left as it was.
    #[error("{0}")]
    Fetch(String),

    /// Creating or deleting a secret failed remotely.
    #[error("{0}")]
    Mutation(String),

    #[error("Another vault operation is still in progress")]
    Busy,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShadowVaultError {
    /// Stable code for programmatic handling on the UI side.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Fetch(_) => "FETCH_ERROR",
            Self::Mutation(_) => "MUTATION_ERROR",
            Self::Busy => "BUSY",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Translate a backend failure raised while listing.
    pub(crate) fn fetch(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(msg) => Self::Auth(msg),
            other => Self::Fetch(other.message()),
        }
    }

    /// Translate a backend failure raised while creating or deleting.
    pub(crate) fn mutation(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(msg) => Self::Auth(msg),
            other => Self::Mutation(other.message()),
        }
    }

    /// Translate a backend failure raised by the auth API.
    pub(crate) fn auth(err: BackendError) -> Self {
        Self::Auth(err.message())
    }
}

impl serde::Serialize for ShadowVaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("ShadowVaultError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, ShadowVaultError>;
