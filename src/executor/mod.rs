//! Transaction submission
//!
//! Signs with a local key, pads the gas estimate, waits for one
//! confirmation and reports every status change on the session stream.
//!
//! ⚠️  This module moves real funds. Never log the signer key.

pub mod calls;
pub mod gate;

pub use calls::{build_call, spender, CallContext, TxCall};
pub use gate::{build_gate_call, ClaimMode, Denomination, GateAction, GateContext};

use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::amounts;
use crate::balances::BalanceBook;
use crate::chains::{self, ChainInfo};
use crate::contracts::{encode, IERC20};
use crate::session::{Session, TxStatus};
use crate::tokens::Token;

/// Wallet error code for a request the user declined
pub const USER_REJECTED: i64 = 4001;

/// Gas estimate padding, percent
const GAS_PADDING_PCT: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { hash: B256, block: Option<u64> },
    /// Mined but reverted
    Failed { hash: B256 },
    /// Declined before anything was broadcast
    Rejected,
}

impl TxOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxOutcome::Confirmed { .. })
    }
}

pub fn padded_gas(estimate: u64) -> u64 {
    estimate + estimate * GAS_PADDING_PCT / 100
}

fn is_user_rejection(err: &TransportError) -> bool {
    err.as_error_resp().is_some_and(|payload| payload.code == USER_REJECTED)
}

pub fn needs_approval(allowance: U256, amount: U256) -> bool {
    allowance < amount
}

pub struct TxSubmitter {
    rpc_url: String,
    chain: &'static ChainInfo,
    signer: PrivateKeySigner,
    session: Arc<Session>,
}

impl TxSubmitter {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>, key: &str, session: Arc<Session>) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
            .map_err(|e| eyre!("Invalid signer key: {}", e))?
            .with_chain_id(Some(chain_id));
        info!("✓ Signer loaded: {:?}", signer.address());

        Ok(Self {
            rpc_url: rpc_url.into(),
            chain: chains::chain(chain_id)?,
            signer,
            session,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn chain(&self) -> &'static ChainInfo {
        self.chain
    }

    /// Estimate, pad, send and wait for one confirmation
    pub async fn submit(&self, call: TxCall) -> Result<TxOutcome> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(self.signer.clone()))
            .connect_http(self.rpc_url.parse()?);

        let tx = TransactionRequest::default()
            .with_from(self.address())
            .with_to(call.to)
            .with_input(call.data)
            .with_value(call.value);

        let estimate = match provider.estimate_gas(tx.clone()).await {
            Ok(gas) => gas,
            Err(e) if is_user_rejection(&e) => return Ok(TxOutcome::Rejected),
            Err(e) => {
                error!("❌ Gas estimation failed: {}", e);
                return Err(eyre!("Gas estimation failed: {}", e));
            }
        };
        let tx = tx.with_gas_limit(padded_gas(estimate));
        debug!("Gas estimate {} padded to {}", estimate, padded_gas(estimate));

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) if is_user_rejection(&e) => {
                info!("🙅 Transaction rejected in wallet");
                return Ok(TxOutcome::Rejected);
            }
            Err(e) => {
                error!("❌ Failed to send transaction: {}", e);
                return Err(eyre!("Failed to send transaction: {}", e));
            }
        };

        let hash = *pending.tx_hash();
        info!("📤 Sent {} ({})", hash, self.chain.tx_url(&hash.to_string()));
        self.session.publish_transaction(hash, TxStatus::Pending);

        let receipt = match pending.with_required_confirmations(1).get_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("❌ Lost track of {}: {}", hash, e);
                self.session.publish_transaction(hash, TxStatus::Failed);
                return Err(eyre!("Failed waiting for {}: {}", hash, e));
            }
        };

        if receipt.status() {
            info!("✅ Confirmed {} in block {:?}", hash, receipt.block_number);
            self.session.publish_transaction(hash, TxStatus::Confirmed);
            Ok(TxOutcome::Confirmed { hash, block: receipt.block_number })
        } else {
            error!("❌ Reverted {}", hash);
            self.session.publish_transaction(hash, TxStatus::Failed);
            Ok(TxOutcome::Failed { hash })
        }
    }

    /// Approve `spender` for the maximum amount unless the current
    /// allowance already covers `amount`
    pub async fn approve_if_needed(
        &self,
        balances: &BalanceBook,
        token: &Token,
        spender: Address,
        amount: &BigDecimal,
    ) -> Result<Option<TxOutcome>> {
        let required = amounts::to_chain_units(amount, token.decimals)?;
        let allowance = balances
            .allowance(self.chain.chain_id, token.address, self.address(), spender)
            .await?;
        if !needs_approval(allowance, required) {
            debug!("Allowance of {} for {} already covers {}", token.symbol, spender, amount);
            return Ok(None);
        }

        info!("🔓 Approving {} for {}", token.symbol, spender);
        let data = encode(&IERC20::approveCall { spender, amount: U256::MAX });
        let outcome = self.submit(TxCall { to: token.address, data, value: U256::ZERO }).await?;
        Ok(Some(outcome))
    }
}
