use crate::{
    contract::{
        ContractClient,
        Receipt,
        TxProgress,
    },
    error::Result,
    mirror::MirrorField,
    provider::SigningProvider,
    units::format_amount,
};
use ethers::{
    abi::Token,
    types::U256,
};
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AppVariant {
    #[default]
    SavingsClub,
    GuessingGame,
}

impl AppVariant {
    pub fn title(self) -> &'static str {
        match self {
            AppVariant::SavingsClub => "Decentralized Savings and Investment Club",
            AppVariant::GuessingGame => "Guessing Game",
        }
    }

    /// `contractName` of the artifact this variant talks to.
    pub fn contract_name(self) -> &'static str {
        match self {
            AppVariant::SavingsClub => "DSIC",
            AppVariant::GuessingGame => "GuessingGame",
        }
    }

    pub fn actions(self) -> &'static [ActionKind] {
        match self {
            AppVariant::SavingsClub => &[
                ActionKind::Deposit,
                ActionKind::Withdraw,
                ActionKind::ClaimReturns,
            ],
            AppVariant::GuessingGame => &[ActionKind::PlayGame, ActionKind::ClaimTokens],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Deposit,
    Withdraw,
    ClaimReturns,
    PlayGame,
    ClaimTokens,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Deposit { amount: U256 },
    Withdraw { amount: U256 },
    ClaimReturns,
    PlayGame { guess: u64 },
    ClaimTokens,
}

/// Fully resolved contract call, ready to submit.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionCall {
    pub method: &'static str,
    pub args: Vec<Token>,
    pub value: Option<U256>,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Deposit { .. } => ActionKind::Deposit,
            Action::Withdraw { .. } => ActionKind::Withdraw,
            Action::ClaimReturns => ActionKind::ClaimReturns,
            Action::PlayGame { .. } => ActionKind::PlayGame,
            Action::ClaimTokens => ActionKind::ClaimTokens,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::Deposit { amount } => format!("Deposit {} ETH", format_amount(*amount)),
            Action::Withdraw { amount } => {
                format!("Withdraw {} ETH", format_amount(*amount))
            }
            Action::ClaimReturns => "Claim returns".to_string(),
            Action::PlayGame { guess } => format!("Play with guess {guess}"),
            Action::ClaimTokens => "Claim tokens".to_string(),
        }
    }

    /// Resolve the call. Playing the game reads the current cost and attaches exactly that.
    pub async fn prepare<P: SigningProvider>(
        &self,
        client: &ContractClient<P>,
    ) -> Result<TransactionCall> {
        let call = match self {
            Action::Deposit { amount } => TransactionCall {
                method: "deposit",
                args: Vec::new(),
                value: Some(*amount),
            },
            Action::Withdraw { amount } => TransactionCall {
                method: "withdraw",
                args: vec![Token::Uint(*amount)],
                value: None,
            },
            Action::ClaimReturns => TransactionCall {
                method: "claimReturns",
                args: Vec::new(),
                value: None,
            },
            Action::PlayGame { guess } => {
                let cost = client
                    .query_uint(MirrorField::GameCost.method(), &[])
                    .await?;
                TransactionCall {
                    method: "playGame",
                    args: vec![Token::Uint(U256::from(*guess))],
                    value: Some(cost),
                }
            }
            Action::ClaimTokens => TransactionCall {
                method: "claimTokens",
                args: Vec::new(),
                value: None,
            },
        };
        Ok(call)
    }

    pub async fn run<P: SigningProvider>(
        &self,
        client: &ContractClient<P>,
        on_progress: impl FnMut(TxProgress),
    ) -> Result<Receipt> {
        let call = self.prepare(client).await?;
        info!(action = %self.describe(), method = call.method, "running action");
        client
            .execute(call.method, &call.args, call.value, on_progress)
            .await
    }
}
