use pawlink_api::ApiError;

/// Errors from [`HubStore`](crate::HubStore) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("hub {0} is not known to the store")]
    UnknownHub(String),

    #[error("store has been disposed")]
    Disposed,

    #[error("no tokio runtime to run the {0} timer")]
    NoRuntime(&'static str),
}
