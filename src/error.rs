use crate::provider::ProviderError;
use ethers::types::TxHash;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("No signing provider found. Configure a wallet to use this application.")]
    ProviderAbsent,
    #[error("Account access was denied by the signing provider")]
    AuthorizationDenied,
    #[error("Signing provider failed during authorization: {0}")]
    AuthorizationError(String),
    /// The provider no longer holds an unlocked signer for the session account.
    #[error("Signing provider is not authorized for this account")]
    NotAuthorized,
    #[error("Invalid contract address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Invalid contract interface: {0}")]
    InvalidInterface(String),
    #[error("Contract interface has no method '{0}'")]
    UnknownMethod(String),
    #[error("Invalid arguments for '{method}': {reason}")]
    InvalidArguments { method: String, reason: String },
    #[error("Remote call failed: {0}")]
    RemoteCallError(String),
    #[error("Transaction was rejected in the signing provider")]
    UserRejected,
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Contract rejected the transaction: {0}")]
    RemoteExecutionError(String),
    #[error("Transaction {hash:?} reverted")]
    TransactionReverted { hash: TxHash, block: Option<u64> },
    #[error("Transaction {hash:?} was not included after {waited:?}")]
    Timeout { hash: TxHash, waited: Duration },
    #[error("Another transaction is still in flight")]
    ActionInFlight,
}

impl ClientError {
    pub fn from_submission(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected => ClientError::UserRejected,
            ProviderError::Unauthorized => ClientError::NotAuthorized,
            ProviderError::InsufficientFunds(msg) => ClientError::InsufficientFunds(msg),
            ProviderError::Execution(reason) => ClientError::RemoteExecutionError(reason),
            ProviderError::Fault(msg) | ProviderError::Transport(msg) => {
                ClientError::RemoteCallError(msg)
            }
        }
    }

    pub fn from_query(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized => ClientError::NotAuthorized,
            other => ClientError::RemoteCallError(other.to_string()),
        }
    }

    pub fn from_authorization(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected | ProviderError::Unauthorized => {
                ClientError::AuthorizationDenied
            }
            other => ClientError::AuthorizationError(other.to_string()),
        }
    }

    /// Failures the user caused or can fix by retrying the same action.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::AuthorizationDenied
                | ClientError::UserRejected
                | ClientError::InsufficientFunds(_)
                | ClientError::InvalidArguments { .. }
                | ClientError::ActionInFlight
                | ClientError::TransactionReverted { .. }
        )
    }
}
