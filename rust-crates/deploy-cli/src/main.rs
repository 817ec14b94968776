use anyhow::{
    Context,
    Result,
    anyhow,
};
use clap::{
    ArgGroup,
    Parser,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
    UNNAMED_CONTRACT,
};
use dsic_client::{
    InterfaceDescription,
    config::{
        DEFAULT_FUJI_RPC_URL,
        DEFAULT_LOCAL_RPC_URL,
        DEFAULT_SEPOLIA_RPC_URL,
    },
    interface::{
        ContractArtifact,
        parse_address,
    },
    units::{
        format_amount,
        parse_amount,
    },
    wallets::{
        find_wallet,
        resolve_wallet_dir,
        unlock_wallet,
    },
};
use ethers::{
    abi::Token,
    contract::{
        Contract,
        ContractFactory,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::U256,
    utils::to_checksum,
};
use std::{
    path::PathBuf,
    sync::Arc,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ARTIFACT: &str = "artifacts/contracts/DSIC.sol/DSIC.json";

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Parser, Debug)]
#[command(
    name = "dsic-deploy",
    about = "Deploy the savings club contract or inspect the latest deployment",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "sepolia", "fuji"])
            .required(true)
    )
)]
struct Args {
    /// Deploy to a local node
    #[arg(long)]
    local: bool,

    /// Deploy to Sepolia
    #[arg(long)]
    sepolia: bool,

    /// Deploy to Avalanche Fuji C-chain
    #[arg(long)]
    fuji: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore wallet name
    #[arg(long)]
    wallet: String,

    /// Override keystore directory (defaults to ~/.dsic/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Which action to perform (defaults to deploy)
    #[arg(short, long, value_enum, default_value = "deploy")]
    action: Action,

    /// Compiled contract artifact with `abi` and `bytecode`
    #[arg(long, default_value = DEFAULT_ARTIFACT)]
    artifact: PathBuf,

    /// Constructor `initBalance`, in ether
    #[arg(long, default_value = "1")]
    init_balance: String,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum Action {
    Deploy,
    Balance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    deployments::ensure_structure().context("initializing deployment directories")?;

    let (env, default_url) = if args.sepolia {
        (DeploymentEnv::Sepolia, DEFAULT_SEPOLIA_RPC_URL)
    } else if args.fuji {
        (DeploymentEnv::Fuji, DEFAULT_FUJI_RPC_URL)
    } else {
        (DeploymentEnv::Local, DEFAULT_LOCAL_RPC_URL)
    };
    let rpc_url = args
        .rpc_url
        .clone()
        .unwrap_or_else(|| default_url.to_string());

    let provider = Provider::<Http>::try_from(rpc_url.as_str())
        .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    let chain_id = provider
        .get_chainid()
        .await
        .context("failed to connect to provider")?
        .as_u64();

    let wallet_dir = resolve_wallet_dir(args.wallet_dir.as_deref())
        .map_err(|e| anyhow!("{e:#}"))
        .context("resolving wallet directory")?;
    let descriptor = find_wallet(&wallet_dir, &args.wallet)
        .map_err(|e| anyhow!("{e:#}"))
        .context("locating requested wallet")?;
    let wallet = unlock_wallet(&descriptor)
        .map_err(|e| anyhow!("{e:#}"))
        .context("unlocking keystore wallet")?
        .with_chain_id(chain_id);
    let client = Arc::new(SignerMiddleware::new(provider, wallet));

    let store = DeploymentStore::new(env).context("opening deployment store")?;

    match args.action {
        Action::Balance => print_balances(&client, &store, &args.wallet).await,
        Action::Deploy => {
            let init_balance = parse_amount(&args.init_balance)
                .map_err(|e| anyhow!("invalid --init-balance '{}': {e}", args.init_balance))?;
            deploy(client, &store, &args.artifact, init_balance, &rpc_url, chain_id).await
        }
    }
}

async fn deploy(
    client: Arc<SignerClient>,
    store: &DeploymentStore,
    artifact_path: &PathBuf,
    init_balance: U256,
    rpc_url: &str,
    chain_id: u64,
) -> Result<()> {
    let artifact = ContractArtifact::load(artifact_path)
        .with_context(|| format!("loading artifact {}", artifact_path.display()))?;
    let bytecode = artifact
        .bytecode
        .filter(|code| !code.is_empty())
        .ok_or_else(|| anyhow!("artifact {} has no bytecode", artifact_path.display()))?;
    let artifact_hash = deployments::compute_artifact_hash(artifact_path)
        .context("hashing contract artifact")?;
    let contract_name = artifact
        .contract_name
        .clone()
        .unwrap_or_else(|| UNNAMED_CONTRACT.to_string());

    info!(
        artifact = %artifact_path.display(),
        contract = %contract_name,
        init_balance = %format_amount(init_balance),
        "deploying contract"
    );
    let factory = ContractFactory::new(artifact.interface.abi().clone(), bytecode, client);
    let (contract, receipt) = factory
        .deploy_tokens(vec![Token::Uint(init_balance)])
        .context("encoding constructor arguments")?
        .send_with_receipt()
        .await
        .context("deploying contract")?;
    let address = to_checksum(&contract.address(), None);

    let mut record = DeploymentRecord::new(address.clone(), artifact_hash, rpc_url);
    record.contract_name = Some(contract_name.clone());
    record.chain_id = Some(chain_id);
    record.initial_balance = Some(init_balance.to_string());
    record.tx_hash = Some(format!("{:?}", receipt.transaction_hash));
    record.block_number = receipt.block_number.map(|n| n.as_u64());
    store.append(record).context("recording deployment")?;

    println!(
        "{contract_name} contract with balance of {} ETH deployed to {address}",
        format_amount(init_balance)
    );
    info!(path = %store.path().display(), "deployment metadata written");
    Ok(())
}

async fn print_balances(
    client: &Arc<SignerClient>,
    store: &DeploymentStore,
    wallet_name: &str,
) -> Result<()> {
    let record = store
        .latest_for(UNNAMED_CONTRACT)
        .context("loading deployment records")?
        .ok_or_else(|| anyhow!("no deployments found for this environment"))?;
    let address = parse_address(&record.contract_address)
        .context("parsing stored contract address")?;

    let wallet_balance = client
        .get_balance(client.address(), None)
        .await
        .context("fetching wallet balance")?;
    let interface = InterfaceDescription::from_json(include_str!("../../../abis/dsic.json"))
        .context("parsing bundled ABI")?;
    let contract = Contract::new(address, interface.abi().clone(), client.clone());
    let pot: U256 = contract
        .method::<_, U256>("getBalance", ())
        .context("encoding getBalance")?
        .call()
        .await
        .context("querying contract balance")?;

    println!("Wallet '{wallet_name}' ({:?})", client.address());
    println!("  Balance: {} ETH", format_amount(wallet_balance));
    println!("Contract {}", record.contract_address);
    println!("  Total balance: {} ETH", format_amount(pot));
    Ok(())
}
