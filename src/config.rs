use crate::{
    actions::AppVariant,
    contract::InclusionPolicy,
    wallets,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tracing::info;

pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_SEPOLIA_RPC_URL: &str = "https://rpc.sepolia.org";
pub const DEFAULT_FUJI_RPC_URL: &str = "https://api.avax-test.network/ext/bc/C/rpc";
/// Address of the first contract a fresh local node deploys.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
pub const DEFAULT_CLUB_ABI: &str = "abis/dsic.json";
pub const DEFAULT_GAME_ABI: &str = "abis/guess_game.json";

pub const USAGE: &str = "Usage: dsic-client [--local | --sepolia | --fuji] [--rpc-url <url>]\n\
     [--wallet <name>] [--wallet-dir <path>] [--contract <address>] [--abi <path>]\n\
     [--game] [--poll-ms <ms>] [--inclusion-timeout <secs>]\n\
     \n\
     Flags:\n\
       --local                    Connect to a local node (default)\n\
       --sepolia                  Connect to Sepolia\n\
       --fuji                     Connect to Avalanche Fuji C-chain\n\
       --rpc-url <url>            Override the RPC URL for the selected network\n\
       --wallet <name>            Keystore wallet to sign with\n\
       --wallet-dir <path>        Keystore directory (defaults to ~/.dsic/wallets)\n\
       --contract <address>       Contract address (defaults to the latest deployment)\n\
       --abi <path>               Contract ABI or artifact JSON\n\
       --game                     Use the guessing game instead of the savings club\n\
       --poll-ms <ms>             Receipt poll interval\n\
       --inclusion-timeout <secs> Give up waiting for inclusion after this long (0 waits forever)\n\
     \n\
     Set DSIC_WALLET_PASSWORD to unlock the wallet without a prompt.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    Local { url: String },
    Sepolia { url: String },
    Fuji { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Local { url }
            | NetworkTarget::Sepolia { url }
            | NetworkTarget::Fuji { url } => url,
        }
    }

    pub fn env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::Local { .. } => DeploymentEnv::Local,
            NetworkTarget::Sepolia { .. } => DeploymentEnv::Sepolia,
            NetworkTarget::Fuji { .. } => DeploymentEnv::Fuji,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletConfig {
    Keystore { name: Option<String>, dir: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet: WalletConfig,
    pub contract: Option<String>,
    pub abi_path: PathBuf,
    pub variant: AppVariant,
    pub policy: InclusionPolicy,
}

impl AppConfig {
    /// Explicit address, then the latest recorded deployment of this variant's
    /// contract, then the built-in default.
    pub fn resolve_contract_address(&self, store: Option<&DeploymentStore>) -> Result<String> {
        if let Some(address) = &self.contract {
            return Ok(address.clone());
        }
        if let Some(store) = store
            && let Some(record) = store
                .latest_for(self.variant.contract_name())
                .map_err(|e| eyre!(e))
                .wrap_err("Reading deployment records")?
        {
            info!(
                address = %record.contract_address,
                contract = record.contract_name(),
                deployed_at = %record.deployed_at,
                "using latest recorded deployment"
            );
            return Ok(record.contract_address);
        }
        Ok(DEFAULT_CONTRACT_ADDRESS.to_string())
    }
}

fn take_value(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
    slot: &mut Option<String>,
    what: &str,
) -> Result<()> {
    let value = args
        .next()
        .ok_or_else(|| eyre!("{flag} requires {what}"))?;
    if slot.is_some() {
        return Err(eyre!("{flag} may only be specified once"));
    }
    *slot = Some(value);
    Ok(())
}

/// `Ok(None)` means help was requested.
pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<AppConfig>> {
    #[derive(Clone, Copy)]
    enum NetworkFlag {
        Local,
        Sepolia,
        Fuji,
    }

    let mut args = args.into_iter();
    let mut network_flag: Option<NetworkFlag> = None;
    let mut custom_url: Option<String> = None;
    let mut wallet_dir: Option<String> = None;
    let mut wallet_name: Option<String> = None;
    let mut contract: Option<String> = None;
    let mut abi_path: Option<String> = None;
    let mut poll_ms: Option<String> = None;
    let mut inclusion_timeout: Option<String> = None;
    let mut variant = AppVariant::SavingsClub;

    while let Some(arg) = args.next() {
        let flag = match arg.as_str() {
            "--local" => Some(NetworkFlag::Local),
            "--sepolia" => Some(NetworkFlag::Sepolia),
            "--fuji" => Some(NetworkFlag::Fuji),
            _ => None,
        };
        if let Some(flag) = flag {
            if network_flag.is_some() {
                return Err(eyre!(
                    "Multiple network flags provided; choose one of --local/--sepolia/--fuji"
                ));
            }
            network_flag = Some(flag);
            continue;
        }
        match arg.as_str() {
            "--rpc-url" => take_value(&mut args, "--rpc-url", &mut custom_url, "a URL")?,
            "--wallet" => {
                take_value(&mut args, "--wallet", &mut wallet_name, "a wallet name")?
            }
            "--wallet-dir" => {
                take_value(&mut args, "--wallet-dir", &mut wallet_dir, "a path")?
            }
            "--contract" => {
                take_value(&mut args, "--contract", &mut contract, "an address")?
            }
            "--abi" => take_value(&mut args, "--abi", &mut abi_path, "a path")?,
            "--poll-ms" => take_value(&mut args, "--poll-ms", &mut poll_ms, "a number")?,
            "--inclusion-timeout" => take_value(
                &mut args,
                "--inclusion-timeout",
                &mut inclusion_timeout,
                "a number of seconds",
            )?,
            "--game" => variant = AppVariant::GuessingGame,
            "--help" | "-h" => return Ok(None),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let network = match network_flag.unwrap_or(NetworkFlag::Local) {
        NetworkFlag::Local => NetworkTarget::Local {
            url: custom_url.unwrap_or_else(|| DEFAULT_LOCAL_RPC_URL.to_string()),
        },
        NetworkFlag::Sepolia => NetworkTarget::Sepolia {
            url: custom_url.unwrap_or_else(|| DEFAULT_SEPOLIA_RPC_URL.to_string()),
        },
        NetworkFlag::Fuji => NetworkTarget::Fuji {
            url: custom_url.unwrap_or_else(|| DEFAULT_FUJI_RPC_URL.to_string()),
        },
    };

    let mut policy = InclusionPolicy::default();
    if let Some(raw) = poll_ms {
        let ms: u64 = raw
            .parse()
            .wrap_err_with(|| format!("--poll-ms expects milliseconds, got '{raw}'"))?;
        if ms == 0 {
            return Err(eyre!("--poll-ms must be greater than zero"));
        }
        policy.poll_interval = Duration::from_millis(ms);
    }
    if let Some(raw) = inclusion_timeout {
        let secs: u64 = raw
            .parse()
            .wrap_err_with(|| format!("--inclusion-timeout expects seconds, got '{raw}'"))?;
        policy.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let abi_path = abi_path.map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(match variant {
            AppVariant::SavingsClub => DEFAULT_CLUB_ABI,
            AppVariant::GuessingGame => DEFAULT_GAME_ABI,
        })
    });

    let dir = wallets::resolve_wallet_dir(wallet_dir.as_deref())?;

    Ok(Some(AppConfig {
        network,
        wallet: WalletConfig::Keystore {
            name: wallet_name,
            dir,
        },
        contract,
        abi_path,
        variant,
        policy,
    }))
}
