//! calmledger checkout CLI.
//!
//! # Usage
//!
//! ```bash
//! # List wallets and plans
//! calmledger-checkout wallets
//! calmledger-checkout plans
//!
//! # Pay for the monthly plan from the "Local" wallet
//! calmledger-checkout pay --wallet Local --plan "MONTHLY FEE" --cycle monthly --email me@example.com
//!
//! # Show or clear the stored receipt
//! calmledger-checkout receipt
//! calmledger-checkout clear
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `checkout.toml`)
//! - `CALMLEDGER_RPC_URL` - Override the RPC endpoint
//! - `RUST_LOG` - Log level filter (default: `info`)

#![allow(clippy::print_stdout)]

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use calmledger::PaymentError;
use calmledger::plan::{BillingCycle, CustomerDetails, find_plan};
use calmledger::receipt::{FileReceiptStore, ReceiptRecorder};
use calmledger_checkout::config::FileConfig;
use calmledger_checkout::shutdown::ShutdownSignal;
use calmledger_svm::balance::BalanceOracle;
use calmledger_svm::checkout::Checkout;
use calmledger_svm::confirmation::ConfirmationView;
use calmledger_svm::wallet::{ApprovalPolicy, ApprovalRequest, ProviderStatus, WalletConnector};
use clap::{Args, Parser, Subcommand};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "calmledger-checkout", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// RPC endpoint, overriding the configuration.
    #[arg(long, env = "CALMLEDGER_RPC_URL")]
    rpc_url: Option<String>,

    /// Receipt directory, overriding the configuration.
    #[arg(long)]
    receipt_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List wallet providers and whether they are installed.
    Wallets,
    /// List the plans on offer.
    Plans,
    /// Show the SOL and USDC balances of a wallet.
    Balance(WalletArgs),
    /// Pay for a plan and store the receipt.
    Pay(PayArgs),
    /// Show the stored receipt.
    Receipt,
    /// Remove the stored receipt.
    Clear,
}

#[derive(Args, Debug)]
struct WalletArgs {
    /// Wallet to connect. Without it, a trusted wallet is reconnected silently.
    #[arg(long)]
    wallet: Option<String>,

    /// Approve wallet requests without asking.
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,
}

#[derive(Args, Debug)]
struct PayArgs {
    #[command(flatten)]
    wallet: WalletArgs,

    /// Plan title or 1-based position in the plan list.
    #[arg(long)]
    plan: String,

    /// Billing cycle.
    #[arg(long, default_value = "session")]
    cycle: BillingCycle,

    /// Email the confirmation is sent to.
    #[arg(long, default_value = "")]
    email: String,

    /// Book anonymously.
    #[arg(long, default_value_t = false)]
    anonymous: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("checkout failed: {e}");
        if let Some(payment) = e.downcast_ref::<PaymentError>() {
            println!("{}", payment.user_message());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = FileConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = Some(url);
    }
    if let Some(dir) = cli.receipt_dir {
        config.receipt_dir = dir;
    }
    tracing::debug!(network = %config.network, rpc = %config.rpc_url(), "loaded configuration");

    match cli.cmd {
        Command::Plans => {
            for (i, plan) in config.plans().iter().enumerate() {
                println!("{:>2}. {:<14} ${:<8} {}", i + 1, plan.title, plan.price, plan.description);
            }
            Ok(())
        }
        Command::Wallets => {
            for listing in config.registry(&approval(false))?.list() {
                match listing.status {
                    ProviderStatus::Installed => println!("{:<10} installed", listing.name),
                    ProviderStatus::NotInstalled { install_url } => println!(
                        "{:<10} not installed{}",
                        listing.name,
                        install_url.map(|u| format!(" ({u})")).unwrap_or_default()
                    ),
                }
            }
            Ok(())
        }
        Command::Balance(args) => {
            let connector = WalletConnector::new(config.registry(&approval(args.yes))?);
            let session = match args.wallet.as_deref() {
                Some(name) => connector.connect(name).await?,
                None => connector
                    .auto_connect()
                    .await
                    .ok_or(PaymentError::NotConnected)?,
            };
            let balances = BalanceOracle::new(rpc(&config), config.network.usdc())
                .fetch_balances(&session.address)
                .await?;
            println!(
                "{} on {} ({})",
                session.address,
                config.network,
                config.network.reference()
            );
            println!("  SOL  {}", balances.native_balance);
            match balances.token_balance {
                Some(amount) => println!("  USDC {amount}"),
                None => println!("  USDC no token account"),
            }
            Ok(())
        }
        Command::Pay(args) => pay(&config, args).await,
        Command::Receipt => {
            let view = recorder(&config)
                .read()
                .map(|receipt| ConfirmationView::new(&receipt, config.network));
            match view {
                Some(view) => {
                    println!("Payment confirmed: {} ({})", view.plan_title, view.billing_cycle);
                    println!("  amount       {}", view.amount_line);
                    println!("  transaction  {}", view.short_signature);
                    println!("  explorer     {}", view.explorer_url);
                    println!("  email        {}", view.email);
                    println!("Next steps:");
                    for step in &view.next_steps {
                        println!("  - {step}");
                    }
                }
                None => println!("No payment on record. Pick a plan to get started."),
            }
            Ok(())
        }
        Command::Clear => {
            recorder(&config).clear()?;
            println!("Receipt cleared.");
            Ok(())
        }
    }
}

async fn pay(config: &FileConfig, args: PayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let plans = config.plans();
    let plan = find_plan(&plans, &args.plan)
        .ok_or_else(|| format!("no plan matches {:?}; see `plans`", args.plan))?;
    let checkout = Checkout::new(
        rpc(config),
        config.registry(&approval(args.wallet.yes))?,
        recorder(config),
        config.checkout()?,
    );
    match args.wallet.wallet.as_deref() {
        Some(name) => checkout.connect(name).await?,
        None => checkout
            .auto_connect()
            .await
            .ok_or(PaymentError::NotConnected)?,
    };

    let mut states = checkout.subscribe();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(?state, "payment progress");
        }
    });

    let shutdown = ShutdownSignal::install()?;
    let customer = CustomerDetails {
        email: args.email,
        is_anonymous: args.anonymous,
    };
    let result = checkout
        .pay(plan, args.cycle, &customer, &shutdown.token())
        .await;
    shutdown.finish().await;
    progress.abort();

    let receipt = result?;
    println!(
        "Paid ${} USDC for {} ({}).",
        receipt.plan.price, receipt.plan.title, receipt.plan.billing_cycle
    );
    println!(
        "Transaction: {}",
        config.network.explorer_tx_url(&receipt.transaction_signature)
    );
    Ok(())
}

fn rpc(config: &FileConfig) -> Arc<RpcClient> {
    Arc::new(RpcClient::new_with_commitment(
        config.rpc_url(),
        CommitmentConfig::confirmed(),
    ))
}

fn recorder(config: &FileConfig) -> ReceiptRecorder {
    ReceiptRecorder::new(FileReceiptStore::new(&config.receipt_dir))
}

fn approval(auto_approve: bool) -> ApprovalPolicy {
    if auto_approve {
        ApprovalPolicy::AutoApprove
    } else {
        ApprovalPolicy::prompt(ask)
    }
}

/// Asks on the terminal. Anything but `y` or `yes` declines.
fn ask(request: &ApprovalRequest) -> bool {
    let question = match request {
        ApprovalRequest::Connect { wallet, address } => {
            format!("{wallet}: share address {address} with calmledger?")
        }
        ApprovalRequest::SignTransaction {
            wallet,
            signer,
            instructions,
        } => format!("{wallet}: sign a transaction from {signer} ({instructions} instructions)?"),
    };
    print!("{question} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
