//! Checkout configuration.
//!
//! Loaded from a TOML file. String values may reference environment
//! variables as `$VAR` or `${VAR}`; unresolved references are left as-is.
//!
//! # Example Configuration
//!
//! ```toml
//! network = "devnet"
//! recipient = "7gRY3UxGJGVy6jrvqKNLYyYwUkU9ZuBFmXg2Rm5VSrUH"
//! fee_reserve = "0.01"
//! poll_interval_ms = 1000
//! receipt_dir = ".calmledger"
//!
//! [[wallets]]
//! name = "Local"
//! keypair = "$HOME/.config/solana/id.json"
//! trusted = true
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the configuration file (default: `checkout.toml`)
//! - Anything referenced by `$VAR` in the file

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use calmledger::plan::Plan;
use calmledger_svm::chain::Address;
use calmledger_svm::checkout::CheckoutConfig;
use calmledger_svm::engine::EngineConfig;
use calmledger_svm::networks::SolanaNetwork;
use calmledger_svm::wallet::{ApprovalPolicy, KeypairWallet, ProviderRegistry, WalletError};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "checkout.toml";

/// Errors loading or resolving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("could not read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this configuration.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value has the right type but an unusable content.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// A required value is absent.
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    /// A configured wallet could not be loaded.
    #[error("wallet {name}: {source}")]
    Wallet {
        /// Wallet name from the configuration.
        name: String,
        /// Underlying error.
        source: WalletError,
    },
}

/// Top-level checkout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Network to pay on (default: `devnet`).
    #[serde(default)]
    pub network: SolanaNetwork,

    /// RPC endpoint. Defaults to the network's public endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Account receiving payments. Required to pay.
    #[serde(default)]
    pub recipient: Option<String>,

    /// Native balance kept for fees and rent, in SOL (default: `"0.01"`).
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve: String,

    /// Delay between confirmation polls in milliseconds (default: `1000`).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive polling errors before giving up (default: `5`).
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,

    /// Compute unit price in micro-lamports. No priority fee when unset.
    #[serde(default)]
    pub priority_fee_micro_lamports: Option<u64>,

    /// Directory holding the receipt slot (default: `.calmledger`).
    #[serde(default = "default_receipt_dir")]
    pub receipt_dir: PathBuf,

    /// Local keypair wallets.
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,

    /// Pricing table. The built-in catalog is used when empty.
    #[serde(default)]
    pub plans: Vec<Plan>,
}

/// A local keypair wallet.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletConfig {
    /// Provider name shown to the user.
    pub name: String,
    /// Path to a `solana-keygen` JSON keypair file.
    pub keypair: PathBuf,
    /// Whether the wallet reconnects without asking.
    #[serde(default)]
    pub trusted: bool,
}

fn default_fee_reserve() -> String {
    "0.01".to_owned()
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_max_poll_errors() -> u32 {
    5
}

fn default_receipt_dir() -> PathBuf {
    PathBuf::from(".calmledger")
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            network: SolanaNetwork::default(),
            rpc_url: None,
            recipient: None,
            fee_reserve: default_fee_reserve(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_errors: default_max_poll_errors(),
            priority_fee_micro_lamports: None,
            receipt_dir: default_receipt_dir(),
            wallets: Vec::new(),
            plans: Vec::new(),
        }
    }
}

impl FileConfig {
    /// Loads from `path`, or from `CONFIG`, or from [`DEFAULT_CONFIG_PATH`].
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(
            || {
                PathBuf::from(
                    std::env::var("CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned()),
                )
            },
            Path::to_path_buf,
        );
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parses configuration text after expanding environment references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML or unknown keys.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_vars(raw, |name| std::env::var(name).ok()))?)
    }

    /// RPC endpoint in effect.
    #[must_use]
    pub fn rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network.default_rpc_url().to_owned())
    }

    /// Pricing table in effect.
    #[must_use]
    pub fn plans(&self) -> Vec<Plan> {
        if self.plans.is_empty() {
            Plan::catalog()
        } else {
            self.plans.clone()
        }
    }

    /// Engine tuning from the configured values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparsable or negative fee
    /// reserve, or a zero polling budget.
    pub fn engine(&self) -> Result<EngineConfig, ConfigError> {
        let fee_reserve =
            Decimal::from_str(self.fee_reserve.trim()).map_err(|e| ConfigError::InvalidValue {
                field: "fee_reserve",
                reason: e.to_string(),
            })?;
        if fee_reserve.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                field: "fee_reserve",
                reason: "must not be negative".to_owned(),
            });
        }
        if self.max_poll_errors == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_poll_errors",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(EngineConfig {
            fee_reserve,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_errors: self.max_poll_errors,
        })
    }

    /// Everything the checkout needs to pay.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the recipient is missing or invalid, or the
    /// engine values are rejected.
    pub fn checkout(&self) -> Result<CheckoutConfig, ConfigError> {
        let recipient = self
            .recipient
            .as_deref()
            .ok_or(ConfigError::Missing("recipient"))?;
        let recipient = Address::from_str(recipient.trim()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "recipient",
                reason: e.to_string(),
            }
        })?;
        Ok(CheckoutConfig {
            recipient,
            token: self.network.usdc(),
            priority_fee_micro_lamports: self.priority_fee_micro_lamports,
            engine: self.engine()?,
        })
    }

    /// Configured wallets plus the well-known browser wallets, which are
    /// listed as not installed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Wallet`] if a keypair file cannot be loaded.
    pub fn registry(&self, approval: &ApprovalPolicy) -> Result<ProviderRegistry, ConfigError> {
        let mut registry = ProviderRegistry::new().with_known_wallets();
        for wallet in &self.wallets {
            let provider = KeypairWallet::from_file(wallet.name.clone(), &wallet.keypair)
                .map_err(|source| ConfigError::Wallet {
                    name: wallet.name.clone(),
                    source,
                })?
                .trusted(wallet.trusted)
                .with_approval(approval.clone());
            tracing::debug!(wallet = %wallet.name, address = %provider.address(), "loaded wallet");
            registry = registry.with_provider(provider);
        }
        Ok(registry)
    }
}

/// Expands `$VAR` and `${VAR}` using `lookup`.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        match lookup(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
