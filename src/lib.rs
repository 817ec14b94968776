pub mod actions;
pub mod config;
pub mod contract;
pub mod error;
pub mod interface;
pub mod keystore;
pub mod mirror;
pub mod provider;
pub mod session;
pub mod units;
pub mod wallets;

pub mod test_helpers;

pub use contract::{
    ContractClient,
    InclusionPolicy,
    PendingTransaction,
    Receipt,
};
pub use error::{
    ClientError,
    Result,
};
pub use interface::InterfaceDescription;
pub use mirror::{
    MirrorField,
    MirrorState,
};
pub use provider::SigningProvider;
pub use session::{
    Authorization,
    SessionManager,
    SessionState,
};
