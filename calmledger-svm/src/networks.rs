//! Well-known Solana networks and their USDC deployments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_pubkey::pubkey;

use crate::chain::Address;

/// Solana clusters the checkout knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolanaNetwork {
    /// Solana mainnet-beta.
    Mainnet,
    /// Solana devnet.
    #[default]
    Devnet,
}

impl SolanaNetwork {
    /// First 32 characters of the genesis hash.
    #[must_use]
    pub const fn reference(self) -> &'static str {
        match self {
            Self::Mainnet => "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
            Self::Devnet => "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        }
    }

    /// Public RPC endpoint used when none is configured.
    #[must_use]
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.mainnet-beta.solana.com",
            Self::Devnet => "https://api.devnet.solana.com",
        }
    }

    /// USDC deployment on this network.
    #[must_use]
    pub fn usdc(self) -> SolanaTokenDeployment {
        match self {
            // native Circle USDC (SPL Token)
            Self::Mainnet => SolanaTokenDeployment::new(
                self,
                pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").into(),
                6,
            ),
            // Circle USDC testnet (SPL Token)
            Self::Devnet => SolanaTokenDeployment::new(
                self,
                pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU").into(),
                6,
            ),
        }
    }

    /// Block explorer link for a transaction signature.
    #[must_use]
    pub fn explorer_tx_url(self, signature: &str) -> String {
        match self {
            Self::Mainnet => format!("https://solscan.io/tx/{signature}"),
            Self::Devnet => format!("https://solscan.io/tx/{signature}?cluster=devnet"),
        }
    }
}

impl fmt::Display for SolanaNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => f.write_str("mainnet"),
            Self::Devnet => f.write_str("devnet"),
        }
    }
}

/// Error returned when a network name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown Solana network {0:?}")]
pub struct UnknownNetwork(pub String);

impl FromStr for SolanaNetwork {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "mainnet-beta" | "solana" => Ok(Self::Mainnet),
            "devnet" | "solana-devnet" => Ok(Self::Devnet),
            _ => Err(UnknownNetwork(s.to_owned())),
        }
    }
}

/// A token mint on a given network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolanaTokenDeployment {
    /// Network the mint lives on.
    pub network: SolanaNetwork,
    /// Mint address.
    pub mint: Address,
    /// Decimal places of the token.
    pub decimals: u8,
}

impl SolanaTokenDeployment {
    /// Creates a deployment record.
    #[must_use]
    pub const fn new(network: SolanaNetwork, mint: Address, decimals: u8) -> Self {
        Self {
            network,
            mint,
            decimals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usdc_deployments() {
        let mainnet = SolanaNetwork::Mainnet.usdc();
        assert_eq!(
            mainnet.mint.to_string(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        );
        assert_eq!(mainnet.decimals, 6);
        assert_eq!(SolanaNetwork::Devnet.usdc().decimals, 6);
    }

    #[test]
    fn test_explorer_url_carries_cluster_on_devnet() {
        assert_eq!(
            SolanaNetwork::Devnet.explorer_tx_url("abc"),
            "https://solscan.io/tx/abc?cluster=devnet"
        );
        assert_eq!(
            SolanaNetwork::Mainnet.explorer_tx_url("abc"),
            "https://solscan.io/tx/abc"
        );
    }

    #[test]
    fn test_parse_network_names() {
        assert_eq!(
            "mainnet-beta".parse::<SolanaNetwork>().unwrap(),
            SolanaNetwork::Mainnet
        );
        assert_eq!(
            "solana-devnet".parse::<SolanaNetwork>().unwrap(),
            SolanaNetwork::Devnet
        );
        assert!("testnet".parse::<SolanaNetwork>().is_err());
    }
}
