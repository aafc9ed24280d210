use tonic::Status;

/// Error taxonomy shared by the group, fabric, and driver layers.
///
/// Variants map onto the kinds described for the core: admission/CAS
/// failures are `CompareFailed`, peer and license rejections are
/// `PermissionDenied`/`AccessDenied`, and anything from a downstream
/// collaborator is wrapped with `Wrapped` so the inner kind survives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("compare failed: {0}")]
    CompareFailed(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The taxonomy kind is what callers branch on; `Wrapped` delegates to
    /// the error it decorates so context never hides the original kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadParameter(_) => "bad-parameter",
            Error::PermissionDenied(_) => "permission-denied",
            Error::NotFound(_) => "not-found",
            Error::AlreadyExists(_) => "already-exists",
            Error::CompareFailed(_) => "compare-failed",
            Error::LimitExceeded(_) => "limit-exceeded",
            Error::AccessDenied(_) => "access-denied",
            Error::Wrapped { source, .. } => source.kind(),
            Error::Other(_) => "other",
        }
    }

    pub fn is_compare_failed(&self) -> bool {
        self.kind() == "compare-failed"
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Status {
        match err {
            Error::BadParameter(msg) => Status::invalid_argument(msg),
            Error::PermissionDenied(msg) => Status::permission_denied(msg),
            Error::NotFound(msg) => Status::not_found(msg),
            Error::AlreadyExists(msg) => Status::already_exists(msg),
            Error::CompareFailed(msg) => Status::failed_precondition(msg),
            Error::LimitExceeded(msg) => Status::deadline_exceeded(msg),
            Error::AccessDenied(msg) => Status::permission_denied(msg),
            Error::Wrapped { context, source } => {
                let inner: Status = (*source).into();
                Status::new(inner.code(), format!("{context}: {}", inner.message()))
            }
            Error::Other(e) => Status::internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
