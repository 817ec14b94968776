use crate::{
    error::{
        ClientError,
        Result,
    },
    interface::{
        InterfaceDescription,
        is_payable,
        is_read_only,
        parse_address,
    },
    mirror::{
        MirrorField,
        MirrorState,
        plan_for,
    },
    provider::{
        CallRequest,
        SigningProvider,
    },
    session::Authorization,
};
use ethers::{
    abi::Token,
    types::{
        Address,
        Bytes,
        TransactionReceipt,
        TxHash,
        U256,
        U64,
    },
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::time;
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_INCLUSION_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How long and how often to wait for a submitted transaction to land in a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionPolicy {
    pub poll_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for InclusionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_INCLUSION_TIMEOUT),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl InclusionPolicy {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_backoff(
        mut self,
        initial: Duration,
        max: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.max_consecutive_failures = max_consecutive_failures;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ContractBinding {
    address: Address,
    interface: Arc<InterfaceDescription>,
    account: Address,
}

impl ContractBinding {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn interface(&self) -> &InterfaceDescription {
        &self.interface
    }

    pub fn account(&self) -> Address {
        self.account
    }
}

/// Releases the client's single in-flight slot when dropped.
#[derive(Debug)]
struct InFlightSlot(Arc<AtomicBool>);

impl InFlightSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::ActionInFlight)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A transaction the chain accepted but has not yet included.
#[derive(Debug)]
pub struct PendingTransaction {
    hash: TxHash,
    method: String,
    submitted_at: Instant,
    _slot: InFlightSlot,
}

impl PendingTransaction {
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

impl From<&TransactionReceipt> for Receipt {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxProgress {
    Submitted { hash: TxHash },
    Confirmed { hash: TxHash, block: Option<u64> },
    Refreshed(MirrorState),
}

pub struct ContractClient<P> {
    provider: Arc<P>,
    binding: ContractBinding,
    policy: InclusionPolicy,
    mirror_plan: Vec<MirrorField>,
    mirror: Mutex<MirrorState>,
    in_flight: Arc<AtomicBool>,
}

impl<P: SigningProvider> ContractClient<P> {
    pub fn bind(
        address: &str,
        interface: InterfaceDescription,
        authorization: &Authorization<P>,
    ) -> Result<Self> {
        let address = parse_address(address)?;
        let mirror_plan = plan_for(&interface);
        info!(
            contract = ?address,
            account = ?authorization.account(),
            mirror = ?mirror_plan,
            "contract bound"
        );
        Ok(Self {
            provider: authorization.provider().clone(),
            binding: ContractBinding {
                address,
                interface: Arc::new(interface),
                account: authorization.account(),
            },
            policy: InclusionPolicy::default(),
            mirror_plan,
            mirror: Mutex::new(MirrorState::default()),
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_policy(mut self, policy: InclusionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn binding(&self) -> &ContractBinding {
        &self.binding
    }

    pub fn policy(&self) -> &InclusionPolicy {
        &self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn mirror(&self) -> MirrorState {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn query(&self, method: &str, args: &[Token]) -> Result<Vec<Token>> {
        let function = self.binding.interface.function(method, args.len())?;
        if !is_read_only(function) {
            return Err(ClientError::InvalidArguments {
                method: method.to_string(),
                reason: "only view or pure methods can be queried".to_string(),
            });
        }
        let data = function
            .encode_input(args)
            .map_err(|e| invalid_arguments(method, e))?;
        let request = self.request(data, None);
        let output = self
            .provider
            .call(&request)
            .await
            .map_err(ClientError::from_query)?;
        function.decode_output(output.as_ref()).map_err(|e| {
            ClientError::RemoteCallError(format!("cannot decode '{method}' output: {e}"))
        })
    }

    pub async fn query_uint(&self, method: &str, args: &[Token]) -> Result<U256> {
        let tokens = self.query(method, args).await?;
        match tokens.as_slice() {
            [Token::Uint(value), ..] => Ok(*value),
            _ => Err(ClientError::RemoteCallError(format!(
                "'{method}' did not return an unsigned integer"
            ))),
        }
    }

    pub async fn submit(
        &self,
        method: &str,
        args: &[Token],
        value: Option<U256>,
    ) -> Result<PendingTransaction> {
        let slot = InFlightSlot::acquire(&self.in_flight)?;

        let function = self.binding.interface.function(method, args.len())?;
        if is_read_only(function) {
            return Err(ClientError::InvalidArguments {
                method: method.to_string(),
                reason: "view or pure methods cannot be submitted".to_string(),
            });
        }
        if value.is_some_and(|v| !v.is_zero()) && !is_payable(function) {
            return Err(ClientError::InvalidArguments {
                method: method.to_string(),
                reason: "value can only be attached to payable methods".to_string(),
            });
        }
        let data = function
            .encode_input(args)
            .map_err(|e| invalid_arguments(method, e))?;

        let request = self.request(data, value);
        let hash = self
            .provider
            .send_transaction(&request)
            .await
            .map_err(ClientError::from_submission)?;
        info!(method, tx = ?hash, value = ?value, "transaction submitted");
        Ok(PendingTransaction {
            hash,
            method: method.to_string(),
            submitted_at: Instant::now(),
            _slot: slot,
        })
    }

    /// Wait for inclusion and then refresh the mirror. A reverted transaction
    /// leaves the mirror untouched.
    pub async fn await_inclusion(&self, pending: PendingTransaction) -> Result<Receipt> {
        let receipt = self.await_receipt(&pending).await?;
        self.refresh_after_confirmation().await;
        Ok(receipt)
    }

    /// Submit, wait and refresh, reporting each completed phase.
    pub async fn execute(
        &self,
        method: &str,
        args: &[Token],
        value: Option<U256>,
        mut on_progress: impl FnMut(TxProgress),
    ) -> Result<Receipt> {
        let pending = self.submit(method, args, value).await?;
        let hash = pending.hash();
        on_progress(TxProgress::Submitted { hash });
        let receipt = self.await_receipt(&pending).await?;
        on_progress(TxProgress::Confirmed {
            hash,
            block: receipt.block_number,
        });
        if let Some(mirror) = self.refresh_after_confirmation().await {
            on_progress(TxProgress::Refreshed(mirror));
        }
        Ok(receipt)
    }

    /// Query every field the interface provides and overwrite the cache.
    /// Any failed query leaves the cache as it was.
    pub async fn refresh_mirror(&self) -> Result<MirrorState> {
        let mut values = BTreeMap::new();
        for field in &self.mirror_plan {
            let args = if field.takes_account() {
                vec![Token::Address(self.binding.account)]
            } else {
                Vec::new()
            };
            let value = self.query_uint(field.method(), &args).await?;
            values.insert(*field, value);
        }
        let state = MirrorState::from_values(values);
        *self.mirror.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(state)
    }

    async fn refresh_after_confirmation(&self) -> Option<MirrorState> {
        match self.refresh_mirror().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "mirror refresh after confirmation failed");
                self.mirror
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_stale();
                None
            }
        }
    }

    async fn await_receipt(&self, pending: &PendingTransaction) -> Result<Receipt> {
        let hash = pending.hash;
        let receipt = match self.policy.timeout {
            Some(limit) => time::timeout(limit, self.poll_receipt(hash))
                .await
                .map_err(|_| {
                    error!(tx = ?hash, waited = ?limit, "inclusion timed out");
                    ClientError::Timeout {
                        hash,
                        waited: limit,
                    }
                })??,
            None => self.poll_receipt(hash).await?,
        };

        let summary = Receipt::from(&receipt);
        if receipt.status == Some(U64::zero()) {
            error!(
                tx = ?hash,
                method = pending.method,
                block = ?summary.block_number,
                "transaction reverted"
            );
            return Err(ClientError::TransactionReverted {
                hash,
                block: summary.block_number,
            });
        }
        info!(
            tx = ?hash,
            method = pending.method,
            block = ?summary.block_number,
            elapsed = ?pending.submitted_at.elapsed(),
            "transaction included"
        );
        Ok(summary)
    }

    async fn poll_receipt(&self, hash: TxHash) -> Result<TransactionReceipt> {
        let mut failures = 0u32;
        let mut backoff = self.policy.initial_backoff;
        loop {
            let delay = match self.provider.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    failures = 0;
                    backoff = self.policy.initial_backoff;
                    self.policy.poll_interval
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.policy.max_consecutive_failures {
                        error!(tx = ?hash, error = %e, failures, "giving up on receipt polling");
                        return Err(ClientError::RemoteCallError(format!(
                            "receipt polling failed {failures} times in a row: {e}"
                        )));
                    }
                    warn!(tx = ?hash, error = %e, retry_in = ?backoff, "receipt poll failed");
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    delay
                }
            };
            time::sleep(delay).await;
        }
    }

    fn request(&self, data: Vec<u8>, value: Option<U256>) -> CallRequest {
        CallRequest {
            from: self.binding.account,
            to: self.binding.address,
            data: Bytes::from(data),
            value,
        }
    }
}

fn invalid_arguments(method: &str, err: impl std::fmt::Display) -> ClientError {
    ClientError::InvalidArguments {
        method: method.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        DEFAULT_CONTRACT,
        FakeChain,
        account,
        authorize,
        club_interface,
        ether,
        fast_policy,
    };

    #[tokio::test]
    async fn bind__rejects_malformed_address() {
        // given
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;

        // when
        let result = ContractClient::bind("0x1234", club_interface(), &auth);

        // then
        assert!(matches!(result, Err(ClientError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn query__reads_view_method() {
        // given
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth).unwrap();

        // when
        let first = client.query_uint("getBalance", &[]).await.unwrap();
        let second = client.query_uint("getBalance", &[]).await.unwrap();

        // then
        assert_eq!(first, ether("2.0"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn query__refuses_mutating_method() {
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth).unwrap();

        let err = client.query("claimReturns", &[]).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn query__transport_fault_is_remote_call_error_without_retry() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth).unwrap();
        chain.fail_next_calls(1);

        // when
        let err = client.query_uint("getBalance", &[]).await.unwrap_err();

        // then
        assert!(matches!(err, ClientError::RemoteCallError(_)));
        assert_eq!(chain.call_count(), 1);
    }

    #[tokio::test]
    async fn submit__rejects_value_on_non_payable_method() {
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth).unwrap();

        let err = client
            .submit("claimReturns", &[], Some(ether("1.0")))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::InvalidArguments { .. }));
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn submit__second_action_while_pending_is_rejected() {
        // given
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(fast_policy());
        let pending = client
            .submit("deposit", &[], Some(ether("1.0")))
            .await
            .unwrap();

        // when
        let second = client.submit("claimReturns", &[], None).await;

        // then
        assert_eq!(second.err(), Some(ClientError::ActionInFlight));
        client.await_inclusion(pending).await.unwrap();
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn submit__user_rejection_releases_slot() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth).unwrap();
        chain.reject_next_signature();

        // when
        let err = client.submit("claimReturns", &[], None).await.unwrap_err();

        // then
        assert_eq!(err, ClientError::UserRejected);
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn await_inclusion__times_out_when_never_included() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let policy = InclusionPolicy::new(
            Duration::from_millis(5),
            Some(Duration::from_millis(60)),
        );
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(policy);
        chain.stall_inclusion(true);
        let pending = client
            .submit("deposit", &[], Some(ether("1.0")))
            .await
            .unwrap();
        let hash = pending.hash();

        // when
        let err = client.await_inclusion(pending).await.unwrap_err();

        // then
        assert_eq!(
            err,
            ClientError::Timeout {
                hash,
                waited: Duration::from_millis(60)
            }
        );
        assert!(!client.mirror().is_loaded());
    }

    #[tokio::test]
    async fn await_inclusion__retries_transient_receipt_failures() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(fast_policy());
        chain.fail_next_receipt_polls(3);
        let pending = client
            .submit("deposit", &[], Some(ether("1.0")))
            .await
            .unwrap();

        // when
        let receipt = client.await_inclusion(pending).await.unwrap();

        // then
        assert!(receipt.block_number.is_some());
        assert_eq!(client.mirror().get(MirrorField::Balance), Some(ether("3.0")));
    }

    #[tokio::test]
    async fn await_inclusion__gives_up_after_consecutive_failures() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(fast_policy());
        chain.fail_next_receipt_polls(10);
        let pending = client
            .submit("deposit", &[], Some(ether("1.0")))
            .await
            .unwrap();

        // when
        let err = client.await_inclusion(pending).await.unwrap_err();

        // then
        assert!(matches!(err, ClientError::RemoteCallError(_)));
        assert_eq!(chain.receipt_polls(), 5);
    }

    #[tokio::test]
    async fn await_inclusion__marks_mirror_stale_when_refresh_fails() {
        // given
        let (chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(fast_policy());
        client.refresh_mirror().await.unwrap();
        let pending = client
            .submit("deposit", &[], Some(ether("1.0")))
            .await
            .unwrap();
        chain.fail_next_calls(1);

        // when
        let result = client.await_inclusion(pending).await;

        // then
        assert!(result.is_ok());
        let mirror = client.mirror();
        assert!(mirror.is_stale());
        assert_eq!(mirror.get(MirrorField::Balance), Some(ether("2.0")));
    }

    #[tokio::test]
    async fn execute__reports_each_phase() {
        // given
        let (_chain, auth) =
            authorize(FakeChain::savings_club(account(1), ether("2.0"))).await;
        let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
            .unwrap()
            .with_policy(fast_policy());
        let mut phases = Vec::new();

        // when
        client
            .execute("deposit", &[], Some(ether("1.0")), |p| phases.push(p))
            .await
            .unwrap();

        // then
        assert_eq!(phases.len(), 3);
        assert!(matches!(phases[0], TxProgress::Submitted { .. }));
        assert!(matches!(phases[1], TxProgress::Confirmed { .. }));
        assert!(matches!(phases[2], TxProgress::Refreshed(_)));
    }
}
