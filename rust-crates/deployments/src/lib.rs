use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";
/// Records written before contract names were stored all describe the savings club.
pub const UNNAMED_CONTRACT: &str = "DSIC";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Local,
    Sepolia,
    Fuji,
}

impl DeploymentEnv {
    pub const ALL: [DeploymentEnv; 3] = [
        DeploymentEnv::Local,
        DeploymentEnv::Sepolia,
        DeploymentEnv::Fuji,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Local => "local",
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Fuji => "fuji",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Local => "Local",
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Fuji => "Avalanche Fuji",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_address: String,
    pub artifact_hash: String,
    pub network_url: String,
    /// `contractName` of the deployed artifact.
    #[serde(default)]
    pub contract_name: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Constructor `initBalance` argument, in wei.
    #[serde(default)]
    pub initial_balance: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl DeploymentRecord {
    pub fn contract_name(&self) -> &str {
        self.contract_name.as_deref().unwrap_or(UNNAMED_CONTRACT)
    }

    pub fn new(
        contract_address: impl Into<String>,
        artifact_hash: impl Into<String>,
        network_url: impl Into<String>,
    ) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            contract_address: contract_address.into(),
            artifact_hash: artifact_hash.into(),
            network_url: network_url.into(),
            contract_name: None,
            chain_id: None,
            initial_balance: None,
            tx_hash: None,
            block_number: None,
        }
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn latest_for(&self, contract_name: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|record| record.contract_name() == contract_name))
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }
}

pub fn compute_artifact_hash(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| {
        format!(
            "Failed to read contract artifact for hashing: {}",
            path.display()
        )
    })?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn ensure_structure() -> Result<()> {
    for env in DeploymentEnv::ALL {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    if !root.exists() {
        fs::create_dir_all(root).with_context(|| {
            format!("Failed to create deployments directory {}", root.display())
        })?;
    }

    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").with_context(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    if let Ok(records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records);
    }
    // older stores held a single object
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(vec![record]);
    }
    Err(anyhow!(
        "Failed to parse deployment records JSON at {}",
        path.as_ref().display()
    ))
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .context("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment records")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn in_root__creates_empty_store_per_env() {
        // given
        let dir = TempDir::new("deployments").unwrap();

        // when
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Fuji).unwrap();

        // then
        assert!(store.path().ends_with("fuji/deployments.json"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.latest().unwrap(), None);
    }

    #[test]
    fn append__latest_returns_most_recent_record() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Local).unwrap();
        let first = DeploymentRecord::new("0x01", "aa", "http://127.0.0.1:8545");
        let mut second = DeploymentRecord::new("0x02", "bb", "http://127.0.0.1:8545");
        second.chain_id = Some(31337);

        // when
        store.append(first.clone()).unwrap();
        store.append(second.clone()).unwrap();

        // then
        assert_eq!(store.load().unwrap(), vec![first, second.clone()]);
        assert_eq!(store.latest().unwrap(), Some(second));
    }

    #[test]
    fn latest_for__skips_records_of_other_contracts() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(dir.path(), DeploymentEnv::Local).unwrap();
        let mut game = DeploymentRecord::new("0x01", "aa", "http://127.0.0.1:8545");
        game.contract_name = Some("GuessingGame".to_string());
        let club = DeploymentRecord::new("0x02", "bb", "http://127.0.0.1:8545");
        store.append(game.clone()).unwrap();
        store.append(club.clone()).unwrap();

        // when
        let latest_game = store.latest_for("GuessingGame").unwrap();
        let latest_club = store.latest_for(UNNAMED_CONTRACT).unwrap();

        // then
        assert_eq!(latest_game, Some(game));
        assert_eq!(latest_club, Some(club));
        assert_eq!(store.latest_for("Other").unwrap(), None);
    }

    #[test]
    fn load__accepts_single_object_store() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store =
            DeploymentStore::in_root(dir.path(), DeploymentEnv::Sepolia).unwrap();
        let record = DeploymentRecord::new("0x03", "cc", "https://rpc.sepolia.org");
        fs::write(store.path(), serde_json::to_vec(&record).unwrap()).unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn compute_artifact_hash__is_stable_for_same_content() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let path = dir.path().join("artifact.json");
        fs::write(&path, b"{\"abi\":[]}").unwrap();

        // when
        let a = compute_artifact_hash(&path).unwrap();
        let b = compute_artifact_hash(&path).unwrap();

        // then
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
