use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    MnemonicBuilder,
    coins_bip39::English,
};
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const PASSWORD_ENV: &str = "DSIC_WALLET_PASSWORD";
const KEYSTORE_EXTENSIONS: [&str; 2] = ["json", "wallet"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".dsic").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read wallet directory")? {
        let entry = entry.wrap_err("Failed to read wallet entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_keystore = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| KEYSTORE_EXTENSIONS.contains(&ext));
        if !is_keystore {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| eyre!("Invalid wallet filename {:?}", path))?
            .to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

/// A named wallet, or the only wallet in the directory when no name is given.
pub fn select_wallet(dir: &Path, name: Option<&str>) -> Result<Option<WalletDescriptor>> {
    if let Some(name) = name {
        return find_wallet(dir, name).map(Some);
    }
    let mut wallets = list_wallets(dir)?;
    match wallets.len() {
        0 => Ok(None),
        1 => Ok(wallets.pop()),
        _ => Err(eyre!(
            "Multiple wallets found in {}; choose one with --wallet ({})",
            dir.to_string_lossy(),
            wallets
                .iter()
                .map(|w| w.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// Password from `DSIC_WALLET_PASSWORD`, otherwise an interactive prompt.
pub fn read_password(descriptor: &WalletDescriptor) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    prompt_password(prompt).wrap_err("Failed to read wallet password")
}

pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<LocalWallet> {
    let password = read_password(descriptor)?;
    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;
    wallet_from_secret(&secret)
        .wrap_err_with(|| format!("Unlocking wallet '{}'", descriptor.name))
}

/// Keystores hold either a raw 32-byte private key or a BIP-39 phrase.
pub fn wallet_from_secret(secret: &[u8]) -> Result<LocalWallet> {
    if secret.len() == 32
        && let Ok(wallet) = LocalWallet::from_bytes(secret)
    {
        return Ok(wallet);
    }

    if let Ok(mnemonic) = std::str::from_utf8(secret) {
        let word_count = mnemonic.split_whitespace().count();
        if word_count >= 12 {
            return MnemonicBuilder::<English>::default()
                .phrase(mnemonic.trim())
                .build()
                .wrap_err("Failed to derive key from mnemonic");
        }
    }

    Err(eyre!("Keystore contained unsupported key material"))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::signers::Signer;
    use tempdir::TempDir;

    #[test]
    fn list_wallets__only_keystore_files_sorted() {
        // given
        let dir = TempDir::new("wallets").unwrap();
        fs::write(dir.path().join("zed.json"), "{}").unwrap();
        fs::write(dir.path().join("alice.wallet"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<_> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "zed"]);
    }

    #[test]
    fn select_wallet__picks_only_wallet_or_requires_name() {
        // given
        let dir = TempDir::new("wallets").unwrap();
        assert_eq!(select_wallet(dir.path(), None).unwrap(), None);
        fs::write(dir.path().join("alice.json"), "{}").unwrap();

        // when
        let only = select_wallet(dir.path(), None).unwrap();

        // then
        assert_eq!(only.map(|w| w.name), Some("alice".to_string()));
        fs::write(dir.path().join("bob.json"), "{}").unwrap();
        assert!(select_wallet(dir.path(), None).is_err());
        assert!(select_wallet(dir.path(), Some("carol")).is_err());
    }

    #[test]
    fn wallet_from_secret__accepts_private_key_bytes() {
        let secret = [7u8; 32];
        let wallet = wallet_from_secret(&secret).unwrap();
        assert_eq!(
            wallet.address(),
            LocalWallet::from_bytes(&secret).unwrap().address()
        );
    }

    #[test]
    fn wallet_from_secret__derives_from_mnemonic() {
        // given
        let phrase = "test test test test test test test test test test test junk";

        // when
        let wallet = wallet_from_secret(phrase.as_bytes()).unwrap();

        // then
        let expected: ethers::types::Address =
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(wallet.address(), expected);
    }

    #[test]
    fn wallet_from_secret__rejects_short_payload() {
        assert!(wallet_from_secret(b"not a key").is_err());
    }
}
