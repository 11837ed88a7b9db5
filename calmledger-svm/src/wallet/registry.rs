use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use solana_transaction::versioned::VersionedTransaction;

use super::{ConnectMode, WalletError, WalletProvider};
use crate::chain::Address;

/// Browser wallets listed with an install link when they are not available.
const KNOWN_WALLETS: &[(&str, &str)] = &[
    ("Phantom", "https://phantom.app/download"),
    ("Solflare", "https://solflare.com/download"),
    ("Backpack", "https://backpack.app/downloads"),
];

/// A well-known wallet that is not installed here.
///
/// Every request fails with [`WalletError::Unavailable`].
#[derive(Debug, Clone)]
pub struct AbsentWallet {
    name: String,
    install_url: String,
}

impl AbsentWallet {
    /// Creates a placeholder for `name`.
    pub fn new(name: impl Into<String>, install_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_url: install_url.into(),
        }
    }
}

#[async_trait]
impl WalletProvider for AbsentWallet {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_installed(&self) -> bool {
        false
    }

    fn install_url(&self) -> Option<&str> {
        Some(&self.install_url)
    }

    async fn connect(&self, _mode: ConnectMode) -> Result<Address, WalletError> {
        Err(WalletError::Unavailable(self.name.clone()))
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        Ok(())
    }

    async fn sign_transaction(
        &self,
        _transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, WalletError> {
        Err(WalletError::Unavailable(self.name.clone()))
    }
}

/// Whether a listed provider can be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ProviderStatus {
    /// Ready to connect.
    Installed,
    /// Known but not available.
    #[serde(rename_all = "camelCase")]
    NotInstalled {
        /// Where to get it.
        install_url: Option<String>,
    },
}

/// One row of the provider list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderListing {
    /// Provider name.
    pub name: String,
    /// Availability.
    #[serde(flatten)]
    pub status: ProviderStatus,
}

/// Wallet providers known to this process, built once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn WalletProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider. A later provider with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, provider: Arc<dyn WalletProvider>) {
        self.providers
            .retain(|p| !p.name().eq_ignore_ascii_case(provider.name()));
        self.providers.push(provider);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_provider(mut self, provider: impl WalletProvider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    /// Lists Phantom, Solflare and Backpack as not installed, unless a
    /// provider with that name is already registered.
    #[must_use]
    pub fn with_known_wallets(mut self) -> Self {
        for (name, url) in KNOWN_WALLETS {
            if self.get(name).is_none() {
                self.providers.push(Arc::new(AbsentWallet::new(*name, *url)));
            }
        }
        self
    }

    /// Looks up a provider by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn WalletProvider>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Installed providers in registration order.
    pub fn installed(&self) -> impl Iterator<Item = &Arc<dyn WalletProvider>> {
        self.providers.iter().filter(|p| p.is_installed())
    }

    /// Installed and known-but-absent providers, installed first.
    #[must_use]
    pub fn list(&self) -> Vec<ProviderListing> {
        let mut listings: Vec<ProviderListing> = self
            .providers
            .iter()
            .map(|p| ProviderListing {
                name: p.name().to_owned(),
                status: if p.is_installed() {
                    ProviderStatus::Installed
                } else {
                    ProviderStatus::NotInstalled {
                        install_url: p.install_url().map(str::to_owned),
                    }
                },
            })
            .collect();
        listings.sort_by_key(|l| l.status != ProviderStatus::Installed);
        listings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeypairWallet;
    use solana_keypair::Keypair;

    #[test]
    fn test_empty_registry_lists_nothing() {
        assert!(ProviderRegistry::new().list().is_empty());
    }

    #[test]
    fn test_known_wallets_listed_after_installed() {
        let registry = ProviderRegistry::new()
            .with_known_wallets()
            .with_provider(KeypairWallet::new("Local", Keypair::new()));
        let list = registry.list();
        assert_eq!(list.len(), 4);
        assert_eq!(list[0].name, "Local");
        assert_eq!(list[0].status, ProviderStatus::Installed);
        assert_eq!(
            list[1].status,
            ProviderStatus::NotInstalled {
                install_url: Some("https://phantom.app/download".to_owned())
            }
        );
    }

    #[test]
    fn test_registered_provider_shadows_known_wallet() {
        let registry = ProviderRegistry::new()
            .with_provider(KeypairWallet::new("phantom", Keypair::new()))
            .with_known_wallets();
        assert_eq!(registry.list().len(), 3);
        assert!(registry.get("Phantom").unwrap().is_installed());
        assert_eq!(registry.installed().count(), 1);
    }
}
