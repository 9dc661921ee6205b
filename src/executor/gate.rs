//! Gate calldata: minting, burning and yield claims
//!
//! Depositing into a vault through its gate mints equal amounts of NYT and
//! PYT (the PYT side optionally wrapped as xPYT). Burning both sides returns
//! the deposit. Only the deposited token, or xPYT when burning wrapped PYT,
//! is pulled from the caller; a permit for it is bundled through
//! `Gate.multicall`.

use alloy_primitives::{Address, Bytes, U256};
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use tracing::debug;

use super::calls::TxCall;
use crate::amounts;
use crate::contracts::{encode, IGate};
use crate::errors::QuoteError;
use crate::permit::SignedPermit;
use crate::tokens::{Token, TokenRole, Vault, Xpyt};
use crate::trade::math::convert_to_shares;

/// Which side of the vault a gate deposit or withdrawal is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denomination {
    Underlying,
    VaultShares,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    Underlying,
    VaultShares,
    /// Claim and mint fresh PYT/NYT from the yield
    Reinvest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateAction {
    Mint {
        denomination: Denomination,
        /// Receive the PYT side wrapped in this xPYT
        xpyt: Option<Address>,
        /// Deposit, in units of the deposited token
        amount: BigDecimal,
    },
    Burn {
        denomination: Denomination,
        /// Burn this xPYT instead of raw PYT
        xpyt: Option<Address>,
        nyt_amount: BigDecimal,
    },
    Claim(ClaimMode),
}

/// What a mint hands out
#[derive(Debug, Clone, PartialEq)]
pub struct MintPreview {
    pub nyt: BigDecimal,
    /// In xPYT units when wrapped
    pub pyt: BigDecimal,
}

/// What a burn consumes and returns
#[derive(Debug, Clone, PartialEq)]
pub struct BurnPreview {
    pub nyt: BigDecimal,
    /// In xPYT units when wrapped
    pub pyt: BigDecimal,
    /// Underlying or vault shares sent back
    pub received: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub gate: Address,
    pub account: Address,
    pub permit: Option<&'a SignedPermit>,
    pub now: u64,
}

fn slot(vault: &Vault, role: TokenRole) -> Result<&Token, QuoteError> {
    vault.slot(role).ok_or_else(|| QuoteError::MissingSlot { vault: vault.label(), role })
}

fn denominated(vault: &Vault, denomination: Denomination) -> Result<&Token, QuoteError> {
    match denomination {
        Denomination::Underlying => slot(vault, TokenRole::Underlying),
        Denomination::VaultShares => slot(vault, TokenRole::Share),
    }
}

fn wrapped(vault: &Vault, xpyt: Option<Address>) -> Result<Option<&Xpyt>, QuoteError> {
    xpyt.map(|address| vault.xpyt_by_address(address).ok_or_else(|| QuoteError::NoXpyt(vault.label())))
        .transpose()
}

pub fn mint_preview(vault: &Vault, denomination: Denomination, xpyt: Option<&Xpyt>, amount: &BigDecimal) -> MintPreview {
    let minted = match denomination {
        Denomination::Underlying => amount.clone(),
        Denomination::VaultShares => vault.apply_price_per_share(amount),
    };
    let pyt = match xpyt {
        Some(xpyt) => amounts::truncate(&convert_to_shares(xpyt, &minted), xpyt.token.decimals),
        None => minted.clone(),
    };
    MintPreview { nyt: minted, pyt }
}

pub fn burn_preview(
    vault: &Vault,
    denomination: Denomination,
    xpyt: Option<&Xpyt>,
    nyt_amount: &BigDecimal,
) -> Result<BurnPreview> {
    let pyt = match xpyt {
        Some(xpyt) => amounts::truncate(&convert_to_shares(xpyt, nyt_amount), xpyt.token.decimals),
        None => nyt_amount.clone(),
    };
    let received = match denomination {
        Denomination::Underlying => nyt_amount.clone(),
        Denomination::VaultShares => amounts::checked_div(nyt_amount, &vault.price_per_share())
            .ok_or_else(|| eyre!("vault {} has no share price", vault.label()))?,
    };
    let token = denominated(vault, denomination)?;
    Ok(BurnPreview {
        nyt: nyt_amount.clone(),
        pyt,
        received: amounts::truncate(&received, token.decimals),
    })
}

impl GateAction {
    /// Token and amount the gate pulls from the caller, if any
    pub fn spend(&self, vault: &Vault) -> Result<Option<(Token, BigDecimal)>> {
        match self {
            GateAction::Mint { denomination, amount, .. } => {
                Ok(Some((denominated(vault, *denomination)?.clone(), amount.clone())))
            }
            GateAction::Burn { denomination, xpyt, nyt_amount } => match wrapped(vault, *xpyt)? {
                Some(x) => {
                    let preview = burn_preview(vault, *denomination, Some(x), nyt_amount)?;
                    Ok(Some((x.token.clone(), preview.pyt)))
                }
                None => Ok(None),
            },
            GateAction::Claim(_) => Ok(None),
        }
    }

    /// Tokens whose balances change when the action confirms
    pub fn touched(&self, vault: &Vault) -> Vec<Token> {
        let mut tokens: Vec<Token> = vault.tokens().cloned().collect();
        tokens.retain(|t| vault.xpyt_by_address(t.address).is_none());
        if let GateAction::Mint { xpyt: Some(x), .. } | GateAction::Burn { xpyt: Some(x), .. } = self {
            if let Some(x) = vault.xpyt_by_address(*x) {
                tokens.push(x.token.clone());
            }
        }
        tokens
    }
}

/// Build the gate transaction for `action` on `vault`
pub fn build_gate_call(vault: &Vault, action: &GateAction, ctx: &GateContext<'_>) -> Result<TxCall> {
    let share = slot(vault, TokenRole::Share)?.address;
    let account = ctx.account;

    let data = match action {
        GateAction::Mint { denomination, xpyt, amount } => {
            let token = denominated(vault, *denomination)?;
            let xpyt = wrapped(vault, *xpyt)?.map(Xpyt::address).unwrap_or(Address::ZERO);
            let raw = amounts::to_chain_units(amount, token.decimals)?;
            match denomination {
                Denomination::Underlying => encode(&IGate::enterWithUnderlyingCall {
                    nytRecipient: account,
                    pytRecipient: account,
                    vault: share,
                    xPYT: xpyt,
                    underlyingAmount: raw,
                }),
                Denomination::VaultShares => encode(&IGate::enterWithVaultSharesCall {
                    nytRecipient: account,
                    pytRecipient: account,
                    vault: share,
                    xPYT: xpyt,
                    vaultSharesAmount: raw,
                }),
            }
        }
        GateAction::Burn { denomination, xpyt, nyt_amount } => {
            let token = denominated(vault, *denomination)?;
            let wrapper = wrapped(vault, *xpyt)?;
            let preview = burn_preview(vault, *denomination, wrapper, nyt_amount)?;
            let raw = amounts::to_chain_units(&preview.received, token.decimals)?;
            let xpyt = wrapper.map(Xpyt::address).unwrap_or(Address::ZERO);
            match denomination {
                Denomination::Underlying => encode(&IGate::exitToUnderlyingCall {
                    recipient: account,
                    vault: share,
                    xPYT: xpyt,
                    underlyingAmount: raw,
                }),
                Denomination::VaultShares => encode(&IGate::exitToVaultSharesCall {
                    recipient: account,
                    vault: share,
                    xPYT: xpyt,
                    vaultSharesAmount: raw,
                }),
            }
        }
        GateAction::Claim(ClaimMode::Underlying) => {
            encode(&IGate::claimYieldInUnderlyingCall { recipient: account, vault: share })
        }
        GateAction::Claim(ClaimMode::VaultShares) => {
            encode(&IGate::claimYieldInVaultSharesCall { recipient: account, vault: share })
        }
        GateAction::Claim(ClaimMode::Reinvest) => encode(&IGate::claimYieldAndEnterCall {
            nytRecipient: account,
            pytRecipient: account,
            vault: share,
            xPYT: Address::ZERO,
        }),
    };

    let mut calls = Vec::with_capacity(2);
    if let (Some(permit), Some((token, amount))) = (ctx.permit, action.spend(vault)?) {
        if permit.is_valid_for(&token, ctx.gate, &amount, account, ctx.now) {
            calls.push(permit.self_permit_call());
        } else {
            debug!("Ignoring permit that does not cover this gate call");
        }
    }
    calls.push(data);

    let data: Bytes = if calls.len() == 1 {
        calls.remove(0)
    } else {
        encode(&IGate::multicallCall { data: calls })
    };
    Ok(TxCall { to: ctx.gate, data, value: U256::ZERO })
}
