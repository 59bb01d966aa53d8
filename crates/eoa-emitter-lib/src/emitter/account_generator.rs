// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result, anyhow};
use ethers::signers::{LocalWallet, MnemonicBuilder, coins_bip39::English};

/// The well known development mnemonic shipped with most local EVM test nodes.
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Produces the signing key for the `index`-th load account. Must be deterministic so a rerun
/// against the same node reuses the same accounts.
pub trait AccountGenerator: Send + Sync {
    fn credential(&self, index: usize) -> Result<LocalWallet>;
}

/// Derives keys along `m/44'/60'/0'/0/{first_index + index}`.
#[derive(Clone)]
pub struct MnemonicAccountGenerator {
    phrase: String,
    first_index: u32,
}

impl MnemonicAccountGenerator {
    pub fn new(phrase: impl Into<String>, first_index: u32) -> Self {
        Self {
            phrase: phrase.into(),
            first_index,
        }
    }

    pub fn derive(&self, derivation_index: u32) -> Result<LocalWallet> {
        MnemonicBuilder::<English>::default()
            .phrase(self.phrase.as_str())
            .index(derivation_index)?
            .build()
            .with_context(|| format!("Failed to derive key at index {}", derivation_index))
    }
}

// Keep the phrase out of logs.
impl std::fmt::Debug for MnemonicAccountGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnemonicAccountGenerator")
            .field("first_index", &self.first_index)
            .finish_non_exhaustive()
    }
}

impl AccountGenerator for MnemonicAccountGenerator {
    fn credential(&self, index: usize) -> Result<LocalWallet> {
        let derivation_index = u32::try_from(index)
            .ok()
            .and_then(|index| index.checked_add(self.first_index))
            .ok_or_else(|| anyhow!("Account index {} is out of derivation range", index))?;
        self.derive(derivation_index)
    }
}

/// Funding source: an explicit hex private key when given, otherwise index 0 of the mnemonic.
pub fn load_funding_credential(
    private_key: Option<&str>,
    generator: &MnemonicAccountGenerator,
) -> Result<LocalWallet> {
    match private_key {
        Some(key) => key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .context("Failed to parse funding private key"),
        None => generator.derive(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::{signers::Signer, types::Address};

    fn address(hex: &str) -> Address {
        hex.parse().unwrap()
    }

    #[test]
    fn test_mnemonic_derivation_is_deterministic() {
        let generator = MnemonicAccountGenerator::new(DEFAULT_MNEMONIC, 1);
        assert_eq!(
            generator.credential(0).unwrap().address(),
            address("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
        assert_eq!(
            generator.credential(0).unwrap().address(),
            generator.credential(0).unwrap().address()
        );
        assert_ne!(
            generator.credential(0).unwrap().address(),
            generator.credential(1).unwrap().address()
        );
    }

    #[test]
    fn test_funding_credential_defaults_to_index_zero() {
        let generator = MnemonicAccountGenerator::new(DEFAULT_MNEMONIC, 1);
        let funder = load_funding_credential(None, &generator).unwrap();
        assert_eq!(
            funder.address(),
            address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_funding_credential_from_private_key() {
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let generator = MnemonicAccountGenerator::new(DEFAULT_MNEMONIC, 1);
        let funder = load_funding_credential(Some(key), &generator).unwrap();
        assert_eq!(
            funder.address(),
            address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert!(load_funding_credential(Some("not a key"), &generator).is_err());
    }

    #[test]
    fn test_derivation_index_overflow() {
        let generator = MnemonicAccountGenerator::new(DEFAULT_MNEMONIC, u32::MAX);
        assert!(generator.credential(1).is_err());
    }
}
