use crate::{
    error::{
        ClientError,
        Result,
    },
    provider::SigningProvider,
};
use ethers::types::Address;
use std::sync::Arc;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    ProviderDetected,
    Authorized(Address),
}

/// Proof that the session holds an authorized account. Only the session hands these out.
pub struct Authorization<P> {
    provider: Arc<P>,
    account: Address,
}

impl<P> Authorization<P> {
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn account(&self) -> Address {
        self.account
    }
}

impl<P> Clone for Authorization<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            account: self.account,
        }
    }
}

pub struct SessionManager<P> {
    injected: Option<Arc<P>>,
    provider: Option<Arc<P>>,
    state: SessionState,
}

impl<P: SigningProvider> SessionManager<P> {
    pub fn new(injected: Option<P>) -> Self {
        Self {
            injected: injected.map(Arc::new),
            provider: None,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn account(&self) -> Option<Address> {
        match self.state {
            SessionState::Authorized(account) => Some(account),
            _ => None,
        }
    }

    pub fn detect_provider(&mut self) -> Result<Arc<P>> {
        if let Some(provider) = &self.provider {
            return Ok(provider.clone());
        }
        let Some(provider) = self.injected.clone() else {
            warn!("no signing provider available");
            return Err(ClientError::ProviderAbsent);
        };
        info!("signing provider detected");
        self.provider = Some(provider.clone());
        self.state = SessionState::ProviderDetected;
        Ok(provider)
    }

    pub async fn request_authorization(&mut self) -> Result<Address> {
        let provider = match (&self.state, &self.provider) {
            (SessionState::Authorized(account), _) => return Ok(*account),
            (SessionState::ProviderDetected, Some(provider)) => provider.clone(),
            _ => return Err(ClientError::ProviderAbsent),
        };

        let accounts = provider
            .request_accounts()
            .await
            .map_err(ClientError::from_authorization)?;
        let Some(account) = accounts.first().copied() else {
            warn!("signing provider returned no accounts");
            return Err(ClientError::AuthorizationDenied);
        };

        info!(account = ?account, "account authorized");
        self.state = SessionState::Authorized(account);
        Ok(account)
    }

    pub fn authorization(&self) -> Result<Authorization<P>> {
        match (&self.state, &self.provider) {
            (SessionState::Authorized(account), Some(provider)) => Ok(Authorization {
                provider: provider.clone(),
                account: *account,
            }),
            _ => Err(ClientError::NotAuthorized),
        }
    }
}
