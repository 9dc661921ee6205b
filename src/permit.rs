//! EIP-712 permits
//!
//! Lets a token approval ride along with the swap itself through
//! `Swapper.selfPermitIfNecessary`, instead of a separate approve
//! transaction. Two message layouts exist in the wild:
//!
//! ```text
//! EIP-2612  Permit(owner, spender, value, nonce, deadline)
//! DAI       Permit(holder, spender, nonce, expiry, allowed)
//! ```
//!
//! The Swapper only speaks the EIP-2612 form, so DAI-style tokens are
//! described but refused at signing time.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_signer::Signer;
use alloy_sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::Result;
use std::borrow::Cow;
use tracing::{debug, info};

use crate::amounts;
use crate::chains::{self, ETHEREUM};
use crate::contracts::{encode, ISwapper};
use crate::errors::PermitError;
use crate::tokens::Token;

mod eip2612 {
    alloy_sol_types::sol! {
        struct Permit {
            address owner;
            address spender;
            uint256 value;
            uint256 nonce;
            uint256 deadline;
        }
    }
}

mod allowed {
    alloy_sol_types::sol! {
        struct Permit {
            address holder;
            address spender;
            uint256 nonce;
            uint256 expiry;
            bool allowed;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitKind {
    /// EIP-2612 value permit
    Amount,
    /// DAI-style boolean permit
    Allowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitStyle {
    pub kind: PermitKind,
    pub version: &'static str,
}

/// Message layout and domain version a token expects
pub fn permit_style(chain_id: u64, token: Address) -> PermitStyle {
    let mainnet = chains::chain(ETHEREUM).ok().filter(|_| chain_id == ETHEREUM);
    match mainnet {
        Some(c) if token == c.contracts.dai => PermitStyle { kind: PermitKind::Allowed, version: "1" },
        Some(c) if token == c.contracts.usdc => PermitStyle { kind: PermitKind::Amount, version: "2" },
        _ => PermitStyle { kind: PermitKind::Amount, version: "1" },
    }
}

pub fn domain(token: &Token, version: &'static str, chain_id: u64) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Owned(token.name.clone())),
        Some(Cow::Borrowed(version)),
        Some(U256::from(chain_id)),
        Some(token.address),
        None,
    )
}

#[async_trait]
pub trait PermitReader: Send + Sync {
    /// Current permit nonce of `owner` on `token`
    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256>;

    /// Whether the token exposes an EIP-712 domain at all
    async fn is_permittable(&self, token: Address) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPermit {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    /// Raw amount; `U256::MAX` for allowed-style permits
    pub value: U256,
    pub nonce: U256,
    pub deadline: u64,
    pub kind: PermitKind,
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl SignedPermit {
    /// Whether this signature still authorizes `owner` spending `amount`
    /// of `token` through `spender` at `now`
    pub fn is_valid_for(&self, token: &Token, spender: Address, amount: &BigDecimal, owner: Address, now: u64) -> bool {
        let matches = self.owner == owner && self.spender == spender && self.token == token.address;
        if !matches || self.deadline < now {
            return false;
        }
        match self.kind {
            PermitKind::Allowed => true,
            PermitKind::Amount => amounts::to_chain_units(amount, token.decimals).is_ok_and(|raw| raw == self.value),
        }
    }

    /// `Swapper.selfPermitIfNecessary(...)` calldata
    pub fn self_permit_call(&self) -> Bytes {
        encode(&ISwapper::selfPermitIfNecessaryCall {
            token: self.token,
            value: self.value,
            deadline: U256::from(self.deadline),
            v: self.v,
            r: self.r,
            s: self.s,
        })
    }
}

/// Sign a permit for `amount` of `token` in favor of `spender`
pub async fn sign_permit<S>(
    signer: &S,
    reader: &dyn PermitReader,
    chain_id: u64,
    token: &Token,
    spender: Address,
    amount: &BigDecimal,
    deadline: u64,
) -> Result<SignedPermit>
where
    S: Signer + Send + Sync,
{
    let style = permit_style(chain_id, token.address);
    if style.kind == PermitKind::Allowed {
        return Err(PermitError::Unsupported(token.symbol.clone()).into());
    }
    if !reader.is_permittable(token.address).await {
        return Err(PermitError::NotPermittable(token.address).into());
    }

    let owner = signer.address();
    let value = amounts::to_chain_units(amount, token.decimals)?;
    let nonce = reader.permit_nonce(token.address, owner).await?;
    let domain = domain(token, style.version, chain_id);

    let message = eip2612::Permit {
        owner,
        spender,
        value,
        nonce,
        deadline: U256::from(deadline),
    };
    let hash = message.eip712_signing_hash(&domain);
    debug!("Permit digest for {}: {}", token.symbol, hash);

    let signature = signer.sign_hash(&hash).await?;
    info!("✍️ Signed permit for {} {} to {}", amount, token.symbol, spender);

    Ok(SignedPermit {
        token: token.address,
        owner,
        spender,
        value,
        nonce,
        deadline,
        kind: style.kind,
        v: 27 + signature.v() as u8,
        r: B256::from(signature.r().to_be_bytes::<32>()),
        s: B256::from(signature.s().to_be_bytes::<32>()),
    })
}

/// Digest a DAI-style token would check
pub fn allowed_digest(domain: &Eip712Domain, holder: Address, spender: Address, nonce: U256, expiry: u64) -> B256 {
    allowed::Permit {
        holder,
        spender,
        nonce,
        expiry: U256::from(expiry),
        allowed: true,
    }
    .eip712_signing_hash(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::ARBITRUM;
    use crate::tokens::fixtures::{addr, dec};
    use alloy_primitives::Signature;
    use alloy_signer_local::PrivateKeySigner;
    use alloy_sol_types::SolCall;
    use std::str::FromStr;

    fn mainnet_dai() -> Address {
        chains::chain(ETHEREUM).unwrap().contracts.dai
    }

    fn mainnet_usdc() -> Address {
        chains::chain(ETHEREUM).unwrap().contracts.usdc
    }

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    struct FixedNonce(u64);

    #[async_trait]
    impl PermitReader for FixedNonce {
        async fn permit_nonce(&self, _token: Address, _owner: Address) -> Result<U256> {
            Ok(U256::from(self.0))
        }

        async fn is_permittable(&self, _token: Address) -> bool {
            true
        }
    }

    fn usdc() -> Token {
        Token::new("USD Coin", "USDC", mainnet_usdc(), 6)
    }

    #[test]
    fn test_permit_table() {
        assert_eq!(permit_style(ETHEREUM, mainnet_dai()).kind, PermitKind::Allowed);
        assert_eq!(permit_style(ETHEREUM, mainnet_usdc()).version, "2");
        assert_eq!(permit_style(ARBITRUM, mainnet_usdc()).version, "1");
        assert_eq!(permit_style(ETHEREUM, addr(0x11)), PermitStyle { kind: PermitKind::Amount, version: "1" });
    }

    #[tokio::test]
    async fn test_signature_recovers_owner() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let token = usdc();
        let permit = sign_permit(&signer, &FixedNonce(3), ETHEREUM, &token, addr(0xaa), &dec("12.5"), 2_000_000_000)
            .await
            .unwrap();

        assert_eq!(permit.value, U256::from(12_500_000u64));
        assert_eq!(permit.nonce, U256::from(3u64));
        assert!(permit.v == 27 || permit.v == 28);

        let hash = eip2612::Permit {
            owner: signer.address(),
            spender: addr(0xaa),
            value: permit.value,
            nonce: permit.nonce,
            deadline: U256::from(2_000_000_000u64),
        }
        .eip712_signing_hash(&domain(&token, "2", ETHEREUM));
        let signature = Signature::new(U256::from_be_bytes(permit.r.0), U256::from_be_bytes(permit.s.0), permit.v == 28);
        assert_eq!(signature.recover_address_from_prehash(&hash).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn test_dai_is_refused() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let dai = Token::new("Dai Stablecoin", "DAI", mainnet_dai(), 18);
        let err = sign_permit(&signer, &FixedNonce(0), ETHEREUM, &dai, addr(0xaa), &dec("1"), 2_000_000_000)
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<PermitError>(), Some(&PermitError::Unsupported("DAI".into())));
    }

    #[tokio::test]
    async fn test_validity() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let token = usdc();
        let owner = signer.address();
        let permit = sign_permit(&signer, &FixedNonce(0), ETHEREUM, &token, addr(0xaa), &dec("5"), 1_000)
            .await
            .unwrap();

        assert!(permit.is_valid_for(&token, addr(0xaa), &dec("5"), owner, 1_000));
        assert!(!permit.is_valid_for(&token, addr(0xaa), &dec("5"), owner, 1_001));
        assert!(!permit.is_valid_for(&token, addr(0xaa), &dec("6"), owner, 500));
        assert!(!permit.is_valid_for(&token, addr(0xbb), &dec("5"), owner, 500));
        assert!(!permit.is_valid_for(&token, addr(0xaa), &dec("5"), addr(0x01), 500));

        let allowed = SignedPermit { kind: PermitKind::Allowed, value: U256::MAX, ..permit.clone() };
        assert!(allowed.is_valid_for(&token, addr(0xaa), &dec("6"), owner, 500));
    }

    #[tokio::test]
    async fn test_self_permit_calldata() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let permit = sign_permit(&signer, &FixedNonce(0), ETHEREUM, &usdc(), addr(0xaa), &dec("1"), 1_000)
            .await
            .unwrap();
        let call = permit.self_permit_call();
        assert_eq!(call[..4], ISwapper::selfPermitIfNecessaryCall::SELECTOR);

        let decoded = ISwapper::selfPermitIfNecessaryCall::abi_decode(&call).unwrap();
        assert_eq!(decoded.token, mainnet_usdc());
        assert_eq!(decoded.value, U256::from(1_000_000u64));
        assert_eq!(decoded.v, permit.v);
    }

    #[test]
    fn test_allowed_digest_depends_on_domain() {
        let dai = Token::new("Dai Stablecoin", "DAI", mainnet_dai(), 18);
        let a = allowed_digest(&domain(&dai, "1", ETHEREUM), addr(1), addr(2), U256::ZERO, 1_000);
        let b = allowed_digest(&domain(&dai, "1", ARBITRUM), addr(1), addr(2), U256::ZERO, 1_000);
        assert_ne!(a, b);
    }
}
