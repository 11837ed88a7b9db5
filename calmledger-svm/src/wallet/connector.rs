use std::sync::Arc;

use calmledger::PaymentError;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{ConnectMode, ProviderListing, ProviderRegistry, WalletProvider};
use crate::chain::Address;

/// The active wallet connection. Lives in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    /// Connected account.
    pub address: Address,
    /// Always `true` for a session handed out by the connector.
    pub connected: bool,
    /// Provider that holds the connection.
    pub provider_name: String,
}

/// Connects wallet providers and owns the single [`WalletSession`].
#[derive(Debug)]
pub struct WalletConnector {
    registry: ProviderRegistry,
    session: RwLock<Option<WalletSession>>,
}

impl WalletConnector {
    /// Creates a connector over `registry` with no session.
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            session: RwLock::new(None),
        }
    }

    /// Installed and known-but-absent providers.
    #[must_use]
    pub fn list_providers(&self) -> Vec<ProviderListing> {
        self.registry.list()
    }

    /// Provider by name.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<dyn WalletProvider>> {
        self.registry.get(name)
    }

    /// Current session, if any.
    pub async fn session(&self) -> Option<WalletSession> {
        self.session.read().await.clone()
    }

    /// Connects to `provider_name`, asking the user if the provider wants to.
    ///
    /// A session with another provider is closed first.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::ProviderNotInstalled`] if the provider is unknown or
    ///   absent; known wallets carry their install link.
    /// - [`PaymentError::UserRejected`] if the user declines.
    pub async fn connect(&self, provider_name: &str) -> Result<WalletSession, PaymentError> {
        let provider = self
            .registry
            .get(provider_name)
            .filter(|p| p.is_installed())
            .ok_or_else(|| PaymentError::ProviderNotInstalled {
                provider: provider_name.to_owned(),
                install_url: self
                    .registry
                    .get(provider_name)
                    .and_then(|p| p.install_url().map(str::to_owned)),
            })?;
        let address = provider.connect(ConnectMode::Prompt).await.map_err(|e| {
            #[cfg(feature = "telemetry")]
            tracing::debug!(provider = provider.name(), error = %e, "wallet connect failed");
            PaymentError::from(e)
        })?;
        Ok(self.open_session(provider.as_ref(), address).await)
    }

    /// Reconnects silently to the first installed provider that already
    /// trusts this app.
    ///
    /// Never prompts and never fails: providers that refuse are skipped and
    /// logged at debug level.
    pub async fn auto_connect(&self) -> Option<WalletSession> {
        for provider in self.registry.installed() {
            match provider.connect(ConnectMode::OnlyIfTrusted).await {
                Ok(address) => return Some(self.open_session(provider.as_ref(), address).await),
                Err(_e) => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(provider = provider.name(), error = %_e, "auto-connect skipped");
                }
            }
        }
        None
    }

    /// Closes the connection and clears the session. Idempotent.
    ///
    /// Provider-side errors are logged, never returned.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };
        if let Some(provider) = self.registry.get(&session.provider_name)
            && let Err(_e) = provider.disconnect().await
        {
            #[cfg(feature = "telemetry")]
            tracing::warn!(provider = %session.provider_name, error = %_e, "wallet disconnect failed");
        }
        #[cfg(feature = "telemetry")]
        tracing::info!(address = %session.address, "wallet disconnected");
    }

    async fn open_session(
        &self,
        provider: &dyn WalletProvider,
        address: Address,
    ) -> WalletSession {
        let session = WalletSession {
            address,
            connected: true,
            provider_name: provider.name().to_owned(),
        };
        let previous = self.session.write().await.replace(session.clone());
        if let Some(previous) = previous
            && !previous.provider_name.eq_ignore_ascii_case(&session.provider_name)
            && let Some(old) = self.registry.get(&previous.provider_name)
            && let Err(_e) = old.disconnect().await
        {
            #[cfg(feature = "telemetry")]
            tracing::warn!(provider = %previous.provider_name, error = %_e, "wallet disconnect failed");
        }
        #[cfg(feature = "telemetry")]
        tracing::info!(provider = %session.provider_name, address = %session.address, "wallet connected");
        session
    }
}
