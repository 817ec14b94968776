use crate::interface::InterfaceDescription;
use chrono::{
    DateTime,
    Utc,
};
use ethers::types::U256;
use std::collections::BTreeMap;

/// A remote value cached on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MirrorField {
    Balance,
    Contribution,
    Returns,
    GameCost,
    Tokens,
}

impl MirrorField {
    pub const ALL: [MirrorField; 5] = [
        MirrorField::Balance,
        MirrorField::Contribution,
        MirrorField::Returns,
        MirrorField::GameCost,
        MirrorField::Tokens,
    ];

    pub fn method(self) -> &'static str {
        match self {
            MirrorField::Balance => "getBalance",
            MirrorField::Contribution => "getUserContribution",
            MirrorField::Returns => "getUserReturns",
            MirrorField::GameCost => "gameCost",
            MirrorField::Tokens => "tokenBalance",
        }
    }

    /// Per-account getters take the bound account as their only argument.
    pub fn takes_account(self) -> bool {
        matches!(
            self,
            MirrorField::Contribution | MirrorField::Returns | MirrorField::Tokens
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            MirrorField::Balance => "Total Balance",
            MirrorField::Contribution => "Your Contribution",
            MirrorField::Returns => "Your Returns",
            MirrorField::GameCost => "Game Cost",
            MirrorField::Tokens => "Your Tokens",
        }
    }

    /// Token balances are plain counts, everything else is denominated in wei.
    pub fn is_ether(self) -> bool {
        !matches!(self, MirrorField::Tokens)
    }
}

/// Fields whose getter the interface actually declares, with the expected arity.
pub fn plan_for(interface: &InterfaceDescription) -> Vec<MirrorField> {
    MirrorField::ALL
        .into_iter()
        .filter(|field| {
            let arity = usize::from(field.takes_account());
            interface.function(field.method(), arity).is_ok()
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorState {
    values: BTreeMap<MirrorField, U256>,
    refreshed_at: Option<DateTime<Utc>>,
    stale: bool,
}

impl MirrorState {
    pub fn from_values(values: BTreeMap<MirrorField, U256>) -> Self {
        Self {
            values,
            refreshed_at: Some(Utc::now()),
            stale: false,
        }
    }

    pub fn get(&self, field: MirrorField) -> Option<U256> {
        self.values.get(&field).copied()
    }

    pub fn values(&self) -> impl Iterator<Item = (MirrorField, U256)> + '_ {
        self.values.iter().map(|(field, value)| (*field, *value))
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn is_loaded(&self) -> bool {
        self.refreshed_at.is_some()
    }

    /// Set when a confirmed transaction could not be followed by a refresh.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }
}
