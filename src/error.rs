use google_cloud_gax::grpc::{Code, Status};

/// Error returned by every fallible operation of this crate.
///
/// Broker failures keep the underlying gRPC [`Status`] so callers can branch
/// on the status code via [`Error::code`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("subscription {0} does not exist")]
    SubscriptionNotFound(String),

    #[error("subscription {0} already has an active receiver")]
    AlreadyReceiving(String),

    #[error("client has been stopped")]
    Stopped,

    #[error("broker returned an unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Connection(#[from] google_cloud_gax::conn::Error),

    #[error(transparent)]
    Auth(#[from] google_cloud_auth::error::Error),

    #[error("rpc failed: {0}")]
    Rpc(#[from] Status),
}

impl Error {
    /// The gRPC status code of the failed call, when the error came from the
    /// broker.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Rpc(status) => Some(status.code()),
            _ => None,
        }
    }
}
