use crate::{
    contract::InclusionPolicy,
    interface::InterfaceDescription,
    provider::{
        CallRequest,
        ProviderError,
        SigningProvider,
        encode_revert_reason,
    },
    session::{
        Authorization,
        SessionManager,
    },
};
use ethers::{
    abi::{
        Token,
        encode,
    },
    types::{
        Address,
        Bytes,
        H256,
        TransactionReceipt,
        TxHash,
        U64,
        U256,
    },
    utils::parse_ether,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

pub const DEFAULT_CONTRACT: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
pub const TOKENS_PER_WIN: u64 = 10;
const RETURNS_PERCENT: u64 = 5;
const GAS_USED: u64 = 21_000;

pub fn account(n: u64) -> Address {
    Address::from_low_u64_be(0xabc000 + n)
}

pub fn ether(amount: &str) -> U256 {
    parse_ether(amount).unwrap()
}

pub fn club_interface() -> InterfaceDescription {
    InterfaceDescription::from_json(include_str!("../abis/dsic.json")).unwrap()
}

pub fn game_interface() -> InterfaceDescription {
    InterfaceDescription::from_json(include_str!("../abis/guess_game.json")).unwrap()
}

/// Millisecond polling so tests never wait on the production cadence.
pub fn fast_policy() -> InclusionPolicy {
    InclusionPolicy::new(Duration::from_millis(1), Some(Duration::from_secs(5)))
        .with_backoff(Duration::from_millis(1), Duration::from_millis(4), 5)
}

/// Run detection and authorization against `chain`, returning the shared handle.
pub async fn authorize(chain: FakeChain) -> (Arc<FakeChain>, Authorization<FakeChain>) {
    let mut session = SessionManager::new(Some(chain));
    let provider = session.detect_provider().unwrap();
    session.request_authorization().await.unwrap();
    let auth = session.authorization().unwrap();
    (provider, auth)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationBehavior {
    Approve,
    Deny,
    DenyOnce,
    NoAccounts,
    Fault,
}

#[derive(Debug)]
enum ContractState {
    SavingsClub {
        balance: U256,
        contributions: HashMap<Address, U256>,
        returns: HashMap<Address, U256>,
    },
    GuessingGame {
        cost: U256,
        secret: U256,
        pot: U256,
        tokens: HashMap<Address, U256>,
    },
}

#[derive(Debug)]
struct QueuedTx {
    hash: TxHash,
    from: Address,
    method: String,
    args: Vec<Token>,
    value: U256,
    polls_left: u32,
}

#[derive(Debug)]
struct ChainState {
    contract: ContractState,
    funds: HashMap<Address, U256>,
    queued: Vec<QueuedTx>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    block: u64,
    nonce: u64,
    authorization: AuthorizationBehavior,
    revoked: bool,
    reject_next_signature: bool,
    fail_next_receipt_polls: u32,
    fail_next_calls: u32,
    stall_inclusion: bool,
    authorization_requests: usize,
    calls: usize,
    receipt_polls: usize,
    sent: usize,
}

/// In-memory chain with one deployed contract and a user-controlled signer.
///
/// State changes are applied only when a transaction is included, after
/// `confirmation_polls` receipt polls have returned nothing.
#[derive(Debug)]
pub struct FakeChain {
    accounts: Vec<Address>,
    contract_address: Address,
    interface: InterfaceDescription,
    confirmation_polls: u32,
    preflight: bool,
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn savings_club(owner: Address, initial_balance: U256) -> Self {
        Self::new(
            owner,
            club_interface(),
            ContractState::SavingsClub {
                balance: initial_balance,
                contributions: HashMap::new(),
                returns: HashMap::new(),
            },
        )
    }

    pub fn guessing_game(owner: Address, cost: U256) -> Self {
        Self::new(
            owner,
            game_interface(),
            ContractState::GuessingGame {
                cost,
                secret: U256::from(7),
                pot: U256::zero(),
                tokens: HashMap::new(),
            },
        )
    }

    fn new(owner: Address, interface: InterfaceDescription, contract: ContractState) -> Self {
        let mut funds = HashMap::new();
        funds.insert(owner, ether("100"));
        Self {
            accounts: vec![owner],
            contract_address: DEFAULT_CONTRACT.parse().unwrap(),
            interface,
            confirmation_polls: 1,
            preflight: false,
            state: Mutex::new(ChainState {
                contract,
                funds,
                queued: Vec::new(),
                receipts: HashMap::new(),
                block: 1,
                nonce: 0,
                authorization: AuthorizationBehavior::Approve,
                revoked: false,
                reject_next_signature: false,
                fail_next_receipt_polls: 0,
                fail_next_calls: 0,
                stall_inclusion: false,
                authorization_requests: 0,
                calls: 0,
                receipt_polls: 0,
                sent: 0,
            }),
        }
    }

    pub fn with_authorization(self, behavior: AuthorizationBehavior) -> Self {
        self.state.lock().unwrap().authorization = behavior;
        self
    }

    pub fn with_confirmation_polls(mut self, polls: u32) -> Self {
        self.confirmation_polls = polls;
        self
    }

    /// Simulate gas estimation: transactions that would revert fail at submission.
    pub fn with_preflight(mut self) -> Self {
        self.preflight = true;
        self
    }

    pub fn with_funds(self, owner: Address, funds: U256) -> Self {
        self.state.lock().unwrap().funds.insert(owner, funds);
        self
    }

    pub fn with_secret(self, secret: u64) -> Self {
        if let ContractState::GuessingGame { secret: s, .. } =
            &mut self.state.lock().unwrap().contract
        {
            *s = U256::from(secret);
        }
        self
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn reject_next_signature(&self) {
        self.state.lock().unwrap().reject_next_signature = true;
    }

    pub fn fail_next_receipt_polls(&self, count: u32) {
        self.state.lock().unwrap().fail_next_receipt_polls = count;
    }

    pub fn fail_next_calls(&self, count: u32) {
        self.state.lock().unwrap().fail_next_calls = count;
    }

    pub fn stall_inclusion(&self, stall: bool) {
        self.state.lock().unwrap().stall_inclusion = stall;
    }

    /// The signer locks itself; subsequent calls report `Unauthorized`.
    pub fn revoke(&self) {
        self.state.lock().unwrap().revoked = true;
    }

    pub fn authorization_requests(&self) -> usize {
        self.state.lock().unwrap().authorization_requests
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn receipt_polls(&self) -> usize {
        self.state.lock().unwrap().receipt_polls
    }

    pub fn sent_transactions(&self) -> usize {
        self.state.lock().unwrap().sent
    }

    pub fn funds(&self, owner: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .funds
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }

    fn decode(&self, request: &CallRequest) -> Result<(String, Vec<Token>), ProviderError> {
        let selector = request
            .selector()
            .ok_or_else(|| ProviderError::Fault("missing selector".into()))?;
        let function = self
            .interface
            .abi()
            .functions()
            .find(|f| f.short_signature() == selector)
            .ok_or_else(|| ProviderError::Execution("unknown selector".into()))?;
        let args = function
            .decode_input(&request.data.as_ref()[4..])
            .map_err(|e| ProviderError::Fault(e.to_string()))?;
        Ok((function.name.clone(), args))
    }
}

fn uint_arg(args: &[Token], index: usize) -> U256 {
    match args.get(index) {
        Some(Token::Uint(value)) => *value,
        _ => U256::zero(),
    }
}

fn address_arg(args: &[Token], index: usize) -> Address {
    match args.get(index) {
        Some(Token::Address(address)) => *address,
        _ => Address::zero(),
    }
}

impl ContractState {
    fn read(&self, method: &str, args: &[Token]) -> Result<U256, ProviderError> {
        let lookup = |map: &HashMap<Address, U256>| {
            map.get(&address_arg(args, 0)).copied().unwrap_or_default()
        };
        match (self, method) {
            (ContractState::SavingsClub { balance, .. }, "getBalance") => Ok(*balance),
            (ContractState::SavingsClub { contributions, .. }, "getUserContribution") => {
                Ok(lookup(contributions))
            }
            (ContractState::SavingsClub { returns, .. }, "getUserReturns") => {
                Ok(lookup(returns))
            }
            (ContractState::GuessingGame { cost, .. }, "gameCost") => Ok(*cost),
            (ContractState::GuessingGame { tokens, .. }, "tokenBalance") => {
                Ok(lookup(tokens))
            }
            _ => Err(ProviderError::Execution(format!("{method} is not readable"))),
        }
    }

    /// Validate a mutation without applying it. Returns the revert reason.
    fn check(
        &self,
        from: Address,
        method: &str,
        args: &[Token],
        value: U256,
    ) -> Result<(), String> {
        match (self, method) {
            (ContractState::SavingsClub { .. }, "deposit") => {
                if value.is_zero() {
                    return Err("Deposit must be greater than zero".into());
                }
                Ok(())
            }
            (
                ContractState::SavingsClub {
                    contributions,
                    balance,
                    ..
                },
                "withdraw",
            ) => {
                let amount = uint_arg(args, 0);
                let contributed = contributions.get(&from).copied().unwrap_or_default();
                if amount > contributed {
                    return Err("Insufficient contribution".into());
                }
                if amount > *balance {
                    return Err("Insufficient contract balance".into());
                }
                Ok(())
            }
            (ContractState::SavingsClub { returns, balance, .. }, "claimReturns") => {
                let owed = returns.get(&from).copied().unwrap_or_default();
                if owed.is_zero() {
                    return Err("No returns to claim".into());
                }
                if owed > *balance {
                    return Err("Insufficient contract balance".into());
                }
                Ok(())
            }
            (ContractState::GuessingGame { cost, .. }, "playGame") => {
                if value != *cost {
                    return Err("Incorrect game cost".into());
                }
                Ok(())
            }
            (ContractState::GuessingGame { tokens, .. }, "claimTokens") => {
                if tokens.get(&from).copied().unwrap_or_default().is_zero() {
                    return Err("No tokens to claim".into());
                }
                Ok(())
            }
            _ => Err(format!("{method} cannot be called")),
        }
    }

    fn apply(&mut self, from: Address, method: &str, args: &[Token], value: U256) {
        match self {
            ContractState::SavingsClub {
                balance,
                contributions,
                returns,
            } => match method {
                "deposit" => {
                    *balance += value;
                    *contributions.entry(from).or_default() += value;
                    *returns.entry(from).or_default() +=
                        value * U256::from(RETURNS_PERCENT) / U256::from(100);
                }
                "withdraw" => {
                    let amount = uint_arg(args, 0);
                    *balance -= amount;
                    *contributions.entry(from).or_default() -= amount;
                }
                "claimReturns" => {
                    let owed = returns.remove(&from).unwrap_or_default();
                    *balance -= owed;
                }
                _ => {}
            },
            ContractState::GuessingGame {
                secret,
                pot,
                tokens,
                ..
            } => match method {
                "playGame" => {
                    *pot += value;
                    if uint_arg(args, 0) == *secret {
                        *tokens.entry(from).or_default() += U256::from(TOKENS_PER_WIN);
                    }
                }
                "claimTokens" => {
                    tokens.remove(&from);
                }
                _ => {}
            },
        }
    }

    /// Ether paid back to the caller on inclusion.
    fn payout(&self, from: Address, method: &str, args: &[Token]) -> U256 {
        match (self, method) {
            (ContractState::SavingsClub { .. }, "withdraw") => uint_arg(args, 0),
            (ContractState::SavingsClub { returns, .. }, "claimReturns") => {
                returns.get(&from).copied().unwrap_or_default()
            }
            _ => U256::zero(),
        }
    }
}

impl ChainState {
    fn include(&mut self, tx: QueuedTx) -> TransactionReceipt {
        self.block += 1;
        let outcome = self.contract.check(tx.from, &tx.method, &tx.args, tx.value);
        let succeeded = outcome.is_ok();
        if succeeded {
            let payout = self.contract.payout(tx.from, &tx.method, &tx.args);
            self.contract.apply(tx.from, &tx.method, &tx.args, tx.value);
            let funds = self.funds.entry(tx.from).or_default();
            *funds = funds.saturating_sub(tx.value) + payout;
        }
        let receipt = TransactionReceipt {
            transaction_hash: tx.hash,
            block_number: Some(U64::from(self.block)),
            gas_used: Some(U256::from(GAS_USED)),
            status: Some(U64::from(u64::from(succeeded))),
            from: tx.from,
            ..Default::default()
        };
        self.receipts.insert(tx.hash, receipt.clone());
        receipt
    }
}

impl SigningProvider for FakeChain {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.authorization_requests += 1;
        match state.authorization {
            AuthorizationBehavior::Approve => Ok(self.accounts.clone()),
            AuthorizationBehavior::Deny => Err(ProviderError::Rejected),
            AuthorizationBehavior::DenyOnce => {
                state.authorization = AuthorizationBehavior::Approve;
                Err(ProviderError::Rejected)
            }
            AuthorizationBehavior::NoAccounts => Ok(Vec::new()),
            AuthorizationBehavior::Fault => {
                Err(ProviderError::Fault("keystore unavailable".into()))
            }
        }
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ProviderError> {
        let (method, args) = self.decode(request)?;
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_next_calls > 0 {
            state.fail_next_calls -= 1;
            return Err(ProviderError::Transport("connection reset".into()));
        }
        if state.revoked {
            return Err(ProviderError::Unauthorized);
        }
        if request.to != self.contract_address {
            return Ok(Bytes::new());
        }
        let value = state.contract.read(&method, &args)?;
        Ok(Bytes::from(encode(&[Token::Uint(value)])))
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<TxHash, ProviderError> {
        let (method, args) = self.decode(request)?;
        let value = request.value.unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if state.revoked || !self.accounts.contains(&request.from) {
            return Err(ProviderError::Unauthorized);
        }
        if state.reject_next_signature {
            state.reject_next_signature = false;
            return Err(ProviderError::Rejected);
        }
        let available = state.funds.get(&request.from).copied().unwrap_or_default();
        if value > available {
            return Err(ProviderError::InsufficientFunds(format!(
                "insufficient funds for value {value}, have {available}"
            )));
        }
        if self.preflight
            && let Err(reason) = state.contract.check(request.from, &method, &args, value)
        {
            let data = encode_revert_reason(&reason);
            return Err(crate::provider::classify_rpc_failure(
                Some(crate::provider::EXECUTION_REVERTED_CODE),
                "execution reverted",
                Some(data.as_ref()),
            ));
        }

        state.nonce += 1;
        state.sent += 1;
        let hash = H256::from_low_u64_be(state.nonce);
        state.queued.push(QueuedTx {
            hash,
            from: request.from,
            method,
            args,
            value,
            polls_left: self.confirmation_polls,
        });
        Ok(hash)
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.receipt_polls += 1;
        if state.fail_next_receipt_polls > 0 {
            state.fail_next_receipt_polls -= 1;
            return Err(ProviderError::Transport("gateway timeout".into()));
        }
        if let Some(receipt) = state.receipts.get(&hash) {
            return Ok(Some(receipt.clone()));
        }
        if state.stall_inclusion {
            return Ok(None);
        }
        let Some(position) = state.queued.iter().position(|tx| tx.hash == hash) else {
            return Ok(None);
        };
        if state.queued[position].polls_left > 0 {
            state.queued[position].polls_left -= 1;
            return Ok(None);
        }
        let tx = state.queued.remove(position);
        Ok(Some(state.include(tx)))
    }
}
