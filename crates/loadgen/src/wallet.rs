//! Wallet generation and the on-disk account cache.

use std::{fs, io, path::Path};

use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading or writing a wallets file.
#[derive(Debug, Error)]
pub enum WalletError {
    /// IO error reading/writing the wallets file.
    #[error("wallets file io error: {0}")]
    Io(#[from] io::Error),
    /// The file is not a valid wallets document.
    #[error("failed to parse wallets file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A stored private key is invalid.
    #[error("invalid private key for wallet {index}: {reason}")]
    InvalidKey {
        /// Position of the wallet in the file.
        index: usize,
        /// Parse failure.
        reason: String,
    },
}

/// One stored wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletData {
    /// Checksummed address.
    pub address: String,
    /// Hex-encoded private key.
    pub private_key: String,
    /// Funding amount the wallet was created with, in wei.
    pub initial_balance: U256,
}

/// Wallets file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletsFile {
    /// Stored wallets.
    pub wallets: Vec<WalletData>,
}

/// Generates `count` signers, reproducibly when `seed` is set.
pub fn generate_signers(count: usize, seed: Option<u64>) -> Vec<PrivateKeySigner> {
    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };

    (0..count).map(|_| PrivateKeySigner::random_with(&mut rng)).collect()
}

/// Writes `signers` to `path` as pretty JSON.
pub fn save_wallets(
    signers: &[PrivateKeySigner],
    initial_balance: U256,
    path: &Path,
) -> Result<(), WalletError> {
    let wallets = signers
        .iter()
        .map(|signer| WalletData {
            address: signer.address().to_checksum(None),
            private_key: format!("0x{}", hex::encode(signer.to_bytes())),
            initial_balance,
        })
        .collect();

    let json = serde_json::to_string_pretty(&WalletsFile { wallets })?;
    fs::write(path, json)?;
    Ok(())
}

/// Reads signers from a wallets file written by [`save_wallets`].
pub fn load_wallets(path: &Path) -> Result<Vec<PrivateKeySigner>, WalletError> {
    let json = fs::read_to_string(path)?;
    let file: WalletsFile = serde_json::from_str(&json)?;

    file.wallets
        .iter()
        .enumerate()
        .map(|(index, wallet)| {
            wallet
                .private_key
                .parse::<PrivateKeySigner>()
                .map_err(|e| WalletError::InvalidKey { index, reason: e.to_string() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = generate_signers(3, Some(7));
        let b = generate_signers(3, Some(7));
        let addresses = |s: &[PrivateKeySigner]| s.iter().map(|s| s.address()).collect::<Vec<_>>();
        assert_eq!(addresses(&a), addresses(&b));
        assert_ne!(a[0].address(), a[1].address());
    }

    #[test]
    fn test_save_and_load_wallets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let signers = generate_signers(2, Some(1));

        save_wallets(&signers, U256::from(10), &path).unwrap();
        let loaded = load_wallets(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].address(), signers[0].address());
        assert_eq!(loaded[1].address(), signers[1].address());
    }

    #[test]
    fn test_load_rejects_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let file = WalletsFile {
            wallets: vec![WalletData {
                address: String::new(),
                private_key: "0xnothex".into(),
                initial_balance: U256::ZERO,
            }],
        };
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(matches!(load_wallets(&path), Err(WalletError::InvalidKey { index: 0, .. })));
    }
}
