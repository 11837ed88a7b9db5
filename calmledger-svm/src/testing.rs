//! Scripted RPC double and wallet helpers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};

use async_trait::async_trait;
use solana_account::Account;
use solana_keypair::Keypair;
use solana_message::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::Pack;

use crate::chain::{Address, BlockhashContext, RpcClientLike, RpcError, SignatureStatus};
use crate::networks::{SolanaNetwork, SolanaTokenDeployment};
use crate::transfer::associated_token_address;
use crate::wallet::{ApprovalPolicy, ApprovalRequest, KeypairWallet};

pub const CONFIRMED_SLOT: u64 = 42;

pub fn usdc() -> SolanaTokenDeployment {
    SolanaNetwork::Devnet.usdc()
}

pub fn confirmed_ok() -> SignatureStatus {
    SignatureStatus {
        slot: CONFIRMED_SLOT,
        confirmed: true,
        err: None,
    }
}

pub fn processed() -> SignatureStatus {
    SignatureStatus {
        slot: CONFIRMED_SLOT,
        confirmed: false,
        err: None,
    }
}

#[derive(Debug)]
pub struct MockRpc {
    native: Mutex<HashMap<Pubkey, u64>>,
    accounts: Mutex<HashMap<Pubkey, Account>>,
    statuses: Mutex<VecDeque<Result<Option<SignatureStatus>, String>>>,
    sent: Mutex<Vec<VersionedTransaction>>,
    fail_reads: Mutex<bool>,
    fail_account_reads: Mutex<bool>,
    fail_send: Mutex<Option<String>>,
    block_height: AtomicU64,
    blockhash_ttl: AtomicU64,
    pub blockhash_requests: AtomicUsize,
}

impl MockRpc {
    /// A node that knows the devnet USDC mint (6 decimals).
    pub fn new() -> Self {
        let rpc = Self {
            native: Mutex::default(),
            accounts: Mutex::default(),
            statuses: Mutex::default(),
            sent: Mutex::default(),
            fail_reads: Mutex::new(false),
            fail_account_reads: Mutex::new(false),
            fail_send: Mutex::new(None),
            block_height: AtomicU64::new(100),
            blockhash_ttl: AtomicU64::new(150),
            blockhash_requests: AtomicUsize::new(0),
        };
        let mint = spl_token::state::Mint {
            mint_authority: COption::None,
            supply: u64::MAX,
            decimals: usdc().decimals,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut data = vec![0; spl_token::state::Mint::LEN];
        spl_token::state::Mint::pack(mint, &mut data).unwrap();
        rpc.accounts.lock().unwrap().insert(
            *usdc().mint.pubkey(),
            Account {
                lamports: 1_461_600,
                data,
                owner: spl_token::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
        rpc
    }

    /// Creates a fresh owner holding `lamports`.
    pub fn fund_native(&self, lamports: u64) -> Address {
        let owner = Pubkey::new_unique();
        self.native.lock().unwrap().insert(owner, lamports);
        owner.into()
    }

    pub fn set_native(&self, owner: &Address, lamports: u64) {
        self.native.lock().unwrap().insert(*owner.pubkey(), lamports);
    }

    /// Creates (or overwrites) `owner`'s USDC token account.
    pub fn fund_token(&self, owner: &Address, amount: u64) {
        let state = spl_token::state::Account {
            mint: *usdc().mint.pubkey(),
            owner: *owner.pubkey(),
            amount,
            delegate: COption::None,
            state: spl_token::state::AccountState::Initialized,
            is_native: COption::None,
            delegated_amount: 0,
            close_authority: COption::None,
        };
        let mut data = vec![0; spl_token::state::Account::LEN];
        spl_token::state::Account::pack(state, &mut data).unwrap();
        let ata = associated_token_address(owner, &spl_token::id(), &usdc().mint);
        self.accounts.lock().unwrap().insert(
            ata,
            Account {
                lamports: 2_039_280,
                data,
                owner: spl_token::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    /// Fails `get_account` only; lamport reads keep working.
    pub fn fail_account_reads(&self, fail: bool) {
        *self.fail_account_reads.lock().unwrap() = fail;
    }

    pub fn fail_send(&self, reason: &str) {
        *self.fail_send.lock().unwrap() = Some(reason.to_owned());
    }

    /// Queues answers for `get_signature_status`; once drained the node
    /// reports the signature as unseen.
    pub fn push_status(&self, status: Result<Option<SignatureStatus>, &str>) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(status.map_err(str::to_owned));
    }

    /// Blockhashes stay valid for `blocks` further block-height reads.
    pub fn blockhash_ttl(&self, blocks: u64) {
        self.blockhash_ttl.store(blocks, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    fn check_reads(&self) -> Result<(), RpcError> {
        if *self.fail_reads.lock().unwrap() {
            Err(RpcError::Request("connection refused".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RpcClientLike for MockRpc {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        self.check_reads()?;
        Ok(self.native.lock().unwrap().get(pubkey).copied().unwrap_or(0))
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcError> {
        self.check_reads()?;
        if *self.fail_account_reads.lock().unwrap() {
            return Err(RpcError::Request("account read timed out".to_owned()));
        }
        Ok(self.accounts.lock().unwrap().get(pubkey).cloned())
    }

    async fn get_latest_blockhash(&self) -> Result<BlockhashContext, RpcError> {
        self.check_reads()?;
        self.blockhash_requests.fetch_add(1, Ordering::SeqCst);
        Ok(BlockhashContext {
            blockhash: Hash::new_unique(),
            last_valid_block_height: self.block_height.load(Ordering::SeqCst)
                + self.blockhash_ttl.load(Ordering::SeqCst),
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcError> {
        if let Some(reason) = self.fail_send.lock().unwrap().clone() {
            return Err(RpcError::Request(reason));
        }
        self.sent.lock().unwrap().push(transaction.clone());
        Ok(transaction.signatures.first().copied().unwrap_or_default())
    }

    async fn get_signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        match self.statuses.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(reason)) => Err(RpcError::Request(reason)),
            None => Ok(None),
        }
    }

    async fn get_block_height(&self) -> Result<u64, RpcError> {
        Ok(self.block_height.fetch_add(1, Ordering::SeqCst))
    }
}

/// Auto-approving wallet for a fresh keypair.
pub fn wallet(name: &str) -> KeypairWallet {
    KeypairWallet::new(name, Keypair::new())
}

/// Wallet whose signing approval blocks until the test sends a decision.
/// Connection requests are approved without waiting.
pub fn gated_wallet(name: &str) -> (KeypairWallet, mpsc::Sender<bool>) {
    let (tx, rx) = mpsc::channel::<bool>();
    let rx = Mutex::new(rx);
    let wallet = KeypairWallet::new(name, Keypair::new()).with_approval(ApprovalPolicy::prompt(
        move |request| match request {
            ApprovalRequest::Connect { .. } => true,
            ApprovalRequest::SignTransaction { .. } => {
                rx.lock().unwrap().recv().unwrap_or(false)
            }
        },
    ));
    (wallet, tx)
}
