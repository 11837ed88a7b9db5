//! Token transfer intents and the instructions that carry them out.
//!
//! The instruction list for a transfer is decided by [`transfer_instructions`]
//! from three inputs only: the intent, the mint's token program and whether
//! each side already holds an associated token account. [`TransactionBuilder`]
//! gathers those facts from the chain and compiles the message.

use calmledger::PaymentError;
use calmledger::amount::{AmountError, format_minor_units, from_minor_units, to_minor_units};
use rust_decimal::Decimal;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_instruction::{AccountMeta, Instruction};
use solana_pubkey::{Pubkey, pubkey};
use spl_token::solana_program::program_pack::Pack;

use crate::chain::{Address, RpcClientLike};
use crate::networks::SolanaTokenDeployment;

mod builder;

pub use builder::{BuiltTransaction, TransactionBuilder};

/// Associated Token Account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// System program.
pub const SYSTEM_PROGRAM_PUBKEY: Pubkey = pubkey!("11111111111111111111111111111111");

/// A fixed token amount to move from payer to recipient.
///
/// Immutable once built: every field is read through an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferIntent {
    payer: Address,
    recipient: Address,
    token: SolanaTokenDeployment,
    amount_minor_units: u64,
}

impl TransferIntent {
    /// Creates an intent for an amount already in minor units.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidAmount`] if `amount_minor_units` is zero.
    pub fn new(
        payer: Address,
        recipient: Address,
        token: SolanaTokenDeployment,
        amount_minor_units: u64,
    ) -> Result<Self, PaymentError> {
        if amount_minor_units == 0 {
            return Err(AmountError::NotPositive(Decimal::ZERO).into());
        }
        Ok(Self {
            payer,
            recipient,
            token,
            amount_minor_units,
        })
    }

    /// Creates an intent from a plan's decimal price string.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidAmount`] if the price is malformed, not
    /// positive, or more precise than the token allows.
    pub fn for_price(
        payer: Address,
        recipient: Address,
        token: SolanaTokenDeployment,
        price: &str,
    ) -> Result<Self, PaymentError> {
        let amount = to_minor_units(price, token.decimals)?;
        Self::new(payer, recipient, token, amount)
    }

    /// Account paying the transfer and its fees.
    #[must_use]
    pub const fn payer(&self) -> &Address {
        &self.payer
    }

    /// Account receiving the tokens.
    #[must_use]
    pub const fn recipient(&self) -> &Address {
        &self.recipient
    }

    /// Token being moved.
    #[must_use]
    pub const fn token(&self) -> &SolanaTokenDeployment {
        &self.token
    }

    /// Mint of the token being moved.
    #[must_use]
    pub const fn mint(&self) -> &Address {
        &self.token.mint
    }

    /// Decimal places of the token.
    #[must_use]
    pub const fn decimals(&self) -> u8 {
        self.token.decimals
    }

    /// Amount in the token's smallest unit.
    #[must_use]
    pub const fn amount_minor_units(&self) -> u64 {
        self.amount_minor_units
    }

    /// Amount in display units.
    #[must_use]
    pub fn amount(&self) -> Decimal {
        from_minor_units(self.amount_minor_units, self.token.decimals)
    }

    /// Amount in display units as a plain decimal string, e.g. `"350"`.
    #[must_use]
    pub fn display_amount(&self) -> String {
        format_minor_units(self.amount_minor_units, self.token.decimals)
    }
}

/// A token mint, tagged by the program that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mint {
    /// Owned by SPL Token.
    Token {
        /// Decimal places recorded on chain.
        decimals: u8,
    },
    /// Owned by Token-2022.
    Token2022 {
        /// Decimal places recorded on chain.
        decimals: u8,
    },
}

impl Mint {
    /// Reads a mint account owned by `owner`.
    ///
    /// Only the base mint layout is decoded, so Token-2022 extensions after it
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidMint`] if `owner` is not a token program
    /// or `data` does not hold an initialized mint.
    pub fn from_account(address: &Pubkey, owner: &Pubkey, data: &[u8]) -> Result<Self, PaymentError> {
        let invalid = |reason: String| PaymentError::InvalidMint(format!("mint {address}: {reason}"));
        let token_2022 = if *owner == spl_token::ID {
            false
        } else if *owner == spl_token_2022::ID {
            true
        } else {
            return Err(invalid(format!("owned by {owner}, not a token program")));
        };
        let base = data
            .get(..spl_token::state::Mint::LEN)
            .ok_or_else(|| invalid(format!("{} bytes of account data", data.len())))?;
        let decimals = spl_token::state::Mint::unpack(base)
            .map_err(|e| invalid(e.to_string()))?
            .decimals;
        Ok(if token_2022 {
            Self::Token2022 { decimals }
        } else {
            Self::Token { decimals }
        })
    }

    /// Program that owns the mint and its token accounts.
    #[must_use]
    pub const fn token_program(&self) -> Pubkey {
        match self {
            Self::Token { .. } => spl_token::ID,
            Self::Token2022 { .. } => spl_token_2022::ID,
        }
    }

    /// Decimal places recorded on chain.
    #[must_use]
    pub const fn decimals(&self) -> u8 {
        match self {
            Self::Token { decimals } | Self::Token2022 { decimals } => *decimals,
        }
    }
}

/// Reads the mint at `mint_address`.
///
/// # Errors
///
/// Returns [`PaymentError::NetworkError`] if the account cannot be read and
/// [`PaymentError::InvalidMint`] if it is missing or not a token mint.
pub async fn fetch_mint<R: RpcClientLike + ?Sized>(
    mint_address: &Address,
    rpc: &R,
) -> Result<Mint, PaymentError> {
    let address = mint_address.pubkey();
    let account = rpc
        .get_account(address)
        .await
        .map_err(|e| PaymentError::NetworkError(format!("mint {address}: {e}")))?
        .ok_or_else(|| PaymentError::InvalidMint(format!("mint {address} does not exist")))?;
    Mint::from_account(address, &account.owner, &account.data)
}

/// Associated token account of `owner` for `mint` under `token_program`.
#[must_use]
pub fn associated_token_address(owner: &Address, token_program: &Pubkey, mint: &Address) -> Pubkey {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    );
    ata
}

/// Instruction creating `owner`'s associated token account, paid by `funder`.
#[must_use]
pub fn create_associated_token_account(
    funder: &Pubkey,
    owner: &Address,
    mint: &Address,
    token_program: &Pubkey,
) -> Instruction {
    let ata = associated_token_address(owner, token_program, mint);
    Instruction {
        program_id: ATA_PROGRAM_PUBKEY,
        accounts: vec![
            AccountMeta::new(*funder, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner.pubkey(), false),
            AccountMeta::new_readonly(*mint.pubkey(), false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_PUBKEY, false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        // AssociatedTokenAccountInstruction::Create
        data: vec![0],
    }
}

/// Whether each side of a transfer already has its token account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountFacts {
    /// Payer's associated token account exists.
    pub payer_account_exists: bool,
    /// Recipient's associated token account exists.
    pub recipient_account_exists: bool,
}

/// Instructions moving `intent`'s amount, in execution order.
///
/// Missing token accounts are created first (payer's, then recipient's, both
/// funded by the payer), followed by exactly one `TransferChecked`. A compute
/// unit price instruction leads the list when `priority_micro_lamports` is set.
///
/// # Errors
///
/// Returns [`PaymentError::TransactionBuild`] if the token program rejects the
/// transfer parameters.
pub fn transfer_instructions(
    intent: &TransferIntent,
    mint: Mint,
    facts: AccountFacts,
    priority_micro_lamports: Option<u64>,
) -> Result<Vec<Instruction>, PaymentError> {
    let token_program = mint.token_program();
    let payer = intent.payer().pubkey();
    let source_ata = associated_token_address(intent.payer(), &token_program, intent.mint());
    let destination_ata =
        associated_token_address(intent.recipient(), &token_program, intent.mint());

    let mut ixs = Vec::with_capacity(4);
    if let Some(price) = priority_micro_lamports {
        ixs.push(ComputeBudgetInstruction::set_compute_unit_price(price));
    }
    if !facts.payer_account_exists {
        ixs.push(create_associated_token_account(
            payer,
            intent.payer(),
            intent.mint(),
            &token_program,
        ));
    }
    if !facts.recipient_account_exists {
        ixs.push(create_associated_token_account(
            payer,
            intent.recipient(),
            intent.mint(),
            &token_program,
        ));
    }

    let decimals = mint.decimals();
    let transfer = match mint {
        Mint::Token { .. } => spl_token::instruction::transfer_checked(
            &token_program,
            &source_ata,
            intent.mint().pubkey(),
            &destination_ata,
            payer,
            &[],
            intent.amount_minor_units(),
            decimals,
        )
        .map_err(|e| PaymentError::TransactionBuild(format!("{e}")))?,
        Mint::Token2022 { .. } => spl_token_2022::instruction::transfer_checked(
            &token_program,
            &source_ata,
            intent.mint().pubkey(),
            &destination_ata,
            payer,
            &[],
            intent.amount_minor_units(),
            decimals,
        )
        .map_err(|e| PaymentError::TransactionBuild(format!("{e}")))?,
    };
    ixs.push(transfer);
    Ok(ixs)
}
