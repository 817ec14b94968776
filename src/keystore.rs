use crate::{
    provider::{
        CallRequest,
        ProviderError,
        SigningProvider,
        classify_rpc_failure,
    },
    wallets::{
        self,
        PASSWORD_ENV,
        WalletDescriptor,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use eth_keystore::{
    KeystoreError,
    decrypt_key,
};
use ethers::{
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        MiddlewareError,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        Bytes,
        TransactionReceipt,
        TxHash,
        transaction::eip2718::TypedTransaction,
    },
};
use std::sync::OnceLock;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug)]
pub enum PasswordSource {
    Prompt,
    Fixed(String),
}

impl PasswordSource {
    pub fn from_env() -> Self {
        match std::env::var(PASSWORD_ENV) {
            Ok(password) => PasswordSource::Fixed(password),
            Err(_) => PasswordSource::Prompt,
        }
    }
}

/// Encrypted keystore wallet signing for an HTTP JSON-RPC endpoint.
///
/// The keystore stays locked until the user authorizes the session; from then
/// on the decrypted signer is kept for the lifetime of the provider.
pub struct KeystoreProvider {
    rpc: Provider<Http>,
    chain_id: u64,
    wallet: WalletDescriptor,
    password: PasswordSource,
    signer: OnceLock<LocalWallet>,
}

impl KeystoreProvider {
    /// `None` when there is no wallet to sign with or the endpoint does not answer.
    pub async fn detect(
        rpc_url: &str,
        wallet: Option<WalletDescriptor>,
        password: PasswordSource,
    ) -> Result<Option<Self>> {
        let Some(wallet) = wallet else {
            warn!("no keystore wallet configured");
            return Ok(None);
        };
        let rpc = Provider::<Http>::try_from(rpc_url)
            .wrap_err_with(|| format!("Invalid RPC URL {rpc_url}"))?;
        let chain_id = match rpc.get_chainid().await {
            Ok(id) => id.as_u64(),
            Err(e) => {
                warn!(url = rpc_url, error = %e, "RPC endpoint unreachable");
                return Ok(None);
            }
        };
        info!(url = rpc_url, chain_id, wallet = %wallet.name, "keystore provider ready");
        Ok(Some(Self {
            rpc,
            chain_id,
            wallet,
            password,
            signer: OnceLock::new(),
        }))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn wallet(&self) -> &WalletDescriptor {
        &self.wallet
    }

    fn signer_for(&self, from: Address) -> Result<LocalWallet, ProviderError> {
        match self.signer.get() {
            Some(signer) if signer.address() == from => Ok(signer.clone()),
            _ => Err(ProviderError::Unauthorized),
        }
    }
}

fn decrypt(
    descriptor: &WalletDescriptor,
    source: PasswordSource,
) -> Result<Vec<u8>, ProviderError> {
    let password = match source {
        PasswordSource::Fixed(password) => password,
        PasswordSource::Prompt => wallets::read_password(descriptor)
            .map_err(|e| ProviderError::Fault(e.to_string()))?,
    };
    // an empty answer at the prompt declines the request
    if password.is_empty() {
        return Err(ProviderError::Rejected);
    }
    decrypt_key(&descriptor.path, password.as_bytes()).map_err(|e| match e {
        KeystoreError::MacMismatch => ProviderError::Rejected,
        other => ProviderError::Fault(other.to_string()),
    })
}

fn classify_middleware_error<E: MiddlewareError>(err: E) -> ProviderError {
    match err.as_error_response() {
        Some(response) => {
            let revert_data = response.as_revert_data();
            classify_rpc_failure(
                Some(response.code),
                &response.message,
                revert_data.as_deref(),
            )
        }
        None => classify_rpc_failure(None, &err.to_string(), None),
    }
}

impl SigningProvider for KeystoreProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        if let Some(signer) = self.signer.get() {
            return Ok(vec![signer.address()]);
        }
        let descriptor = self.wallet.clone();
        let source = self.password.clone();
        let secret = tokio::task::spawn_blocking(move || decrypt(&descriptor, source))
            .await
            .map_err(|e| ProviderError::Fault(e.to_string()))??;
        let signer = wallets::wallet_from_secret(&secret)
            .map_err(|e| ProviderError::Fault(e.to_string()))?
            .with_chain_id(self.chain_id);
        let address = signer.address();
        let _ = self.signer.set(signer);
        Ok(vec![address])
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ProviderError> {
        let tx: TypedTransaction = request.to_transaction_request().into();
        self.rpc
            .call(&tx, None)
            .await
            .map_err(classify_middleware_error)
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<TxHash, ProviderError> {
        let signer = self.signer_for(request.from)?;
        let client = SignerMiddleware::new(self.rpc.clone(), signer);
        let pending = client
            .send_transaction(request.to_transaction_request(), None)
            .await
            .map_err(classify_middleware_error)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        self.rpc
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_middleware_error)
    }
}
