use ethers::{
    abi::{
        ParamType,
        Token,
        decode,
    },
    types::{
        Address,
        Bytes,
        TransactionReceipt,
        TransactionRequest,
        TxHash,
        U256,
    },
};
use std::future::Future;
use thiserror::Error;

/// `Error(string)` selector used by solidity `require`/`revert` messages.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-1193 "unauthorized".
pub const UNAUTHORIZED_CODE: i64 = 4100;
/// JSON-RPC code geth and anvil use for execution reverts.
pub const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request rejected by the user")]
    Rejected,
    #[error("no unlocked signer for the requested account")]
    Unauthorized,
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("execution reverted: {0}")]
    Execution(String),
    #[error("provider fault: {0}")]
    Fault(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
}

impl CallRequest {
    pub fn to_transaction_request(&self) -> TransactionRequest {
        let mut tx = TransactionRequest::new()
            .from(self.from)
            .to(self.to)
            .data(self.data.clone());
        if let Some(value) = self.value {
            tx = tx.value(value);
        }
        tx
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        let bytes = self.data.as_ref();
        if bytes.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&bytes[..4]);
        Some(selector)
    }
}

/// The user's signing agent together with the chain it is connected to.
pub trait SigningProvider: Send + Sync {
    /// Ask the user to expose their accounts. The first entry is the active one.
    fn request_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<Address>, ProviderError>> + Send;

    fn call(
        &self,
        request: &CallRequest,
    ) -> impl Future<Output = Result<Bytes, ProviderError>> + Send;

    /// Sign and broadcast. Resolves once the chain accepted the transaction.
    fn send_transaction(
        &self,
        request: &CallRequest,
    ) -> impl Future<Output = Result<TxHash, ProviderError>> + Send;

    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>, ProviderError>> + Send;
}

pub fn classify_rpc_failure(
    code: Option<i64>,
    message: &str,
    revert_data: Option<&[u8]>,
) -> ProviderError {
    let lowered = message.to_ascii_lowercase();
    if code == Some(USER_REJECTED_CODE)
        || lowered.contains("user rejected")
        || lowered.contains("user denied")
    {
        return ProviderError::Rejected;
    }
    if code == Some(UNAUTHORIZED_CODE) {
        return ProviderError::Unauthorized;
    }
    if lowered.contains("insufficient funds") {
        return ProviderError::InsufficientFunds(message.to_string());
    }
    if code == Some(EXECUTION_REVERTED_CODE) || lowered.contains("revert") {
        let reason = revert_data
            .and_then(decode_revert_reason)
            .unwrap_or_else(|| message.to_string());
        return ProviderError::Execution(reason);
    }
    match code {
        Some(_) => ProviderError::Fault(message.to_string()),
        None => ProviderError::Transport(message.to_string()),
    }
}

pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    match decode(&[ParamType::String], payload).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

pub fn encode_revert_reason(reason: &str) -> Bytes {
    let mut out = ERROR_STRING_SELECTOR.to_vec();
    out.extend(ethers::abi::encode(&[Token::String(reason.to_string())]));
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn classify_rpc_failure__detects_user_rejection_by_code() {
        let err = classify_rpc_failure(Some(4001), "denied", None);
        assert_eq!(err, ProviderError::Rejected);
    }

    #[test]
    fn classify_rpc_failure__decodes_revert_string() {
        // given
        let data = encode_revert_reason("Insufficient contribution");

        // when
        let err = classify_rpc_failure(Some(3), "execution reverted", Some(&data));

        // then
        assert_eq!(
            err,
            ProviderError::Execution("Insufficient contribution".into())
        );
    }

    #[test]
    fn classify_rpc_failure__insufficient_funds_message() {
        let err = classify_rpc_failure(
            Some(-32000),
            "insufficient funds for gas * price + value",
            None,
        );
        assert!(matches!(err, ProviderError::InsufficientFunds(_)));
    }

    #[test]
    fn classify_rpc_failure__unknown_failures_split_by_code() {
        assert!(matches!(
            classify_rpc_failure(Some(-32603), "internal error", None),
            ProviderError::Fault(_)
        ));
        assert!(matches!(
            classify_rpc_failure(None, "connection refused", None),
            ProviderError::Transport(_)
        ));
    }

    #[test]
    fn decode_revert_reason__ignores_custom_errors() {
        assert_eq!(decode_revert_reason(&[0xde, 0xad, 0xbe, 0xef, 0x00]), None);
    }

    #[test]
    fn call_request__selector_requires_four_bytes() {
        let request = CallRequest {
            from: Address::zero(),
            to: Address::zero(),
            data: Bytes::from(vec![0x12, 0x34]),
            value: None,
        };
        assert_eq!(request.selector(), None);
    }
}
