//! Calldata for a composed quote
//!
//! Every plan ends up as one [`TxCall`]. Swapper plans may need several
//! Swapper calls (permit, ETH wrap, aggregator hop, vault swap); those are
//! bundled through `Swapper.multicall` so they settle atomically.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol_data, SolType};
use eyre::{eyre, Result};
use tracing::debug;

use crate::amounts;
use crate::chains::ChainInfo;
use crate::contracts::{encode, u24, ISwapper, IWETH, IXpyt};
use crate::errors::QuoteError;
use crate::permit::SignedPermit;
use crate::tokens::{Token, TokenRole, Vault, Xpyt};
use crate::trade::{Quote, Trade, TradePlan, VaultPath};

type FeeArgs = (sol_data::Uint<24>,);
type FeeAndSwapArgs = (sol_data::Uint<24>, sol_data::Uint<256>);

/// A contract call ready to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Caller-side facts the calldata depends on
#[derive(Debug, Clone)]
pub struct CallContext<'a> {
    /// Sender and recipient of the trade
    pub account: Address,
    /// Gate of the vault being traded into or within
    pub gate: Option<Address>,
    pub permit: Option<&'a SignedPermit>,
    /// Swapper allowance to the 0x exchange proxy for the sold token
    pub proxy_allowance: Option<U256>,
    /// Unix seconds, for permit expiry
    pub now: u64,
}

/// Contract that must be approved to pull the source token, if any
pub fn spender(plan: &TradePlan, from: &Token, chain: &ChainInfo) -> Option<Address> {
    if from.is_eth() {
        return None;
    }
    match plan {
        TradePlan::Wrap | TradePlan::Unwrap => None,
        TradePlan::Vault { path: VaultPath::NytToXpyt { .. } | VaultPath::XpytToNyt { .. }, .. } => {
            Some(chain.contracts.uniswap_v3_router)
        }
        TradePlan::Vault { path: VaultPath::PytToXpyt { xpyt }, .. } => Some(*xpyt),
        TradePlan::Vault { path: VaultPath::XpytToPyt { .. }, .. } => None,
        TradePlan::Vault { .. } | TradePlan::Aggregator | TradePlan::Composite { .. } => {
            Some(chain.contracts.uniswap_v3_swapper)
        }
    }
}

/// `abi.encode(uint24 fee)`
pub fn fee_args(fee: u32) -> Result<Bytes> {
    Ok(FeeArgs::abi_encode_params(&(u24(fee)?,)).into())
}

/// `abi.encode(uint24 fee, uint256 swapAmountIn)`
pub fn fee_and_swap_args(fee: u32, swap_amount_in: U256) -> Result<Bytes> {
    Ok(FeeAndSwapArgs::abi_encode_params(&(u24(fee)?, swap_amount_in)).into())
}

/// Build the transaction for `quote`
pub fn build_call(quote: &Quote, chain: &ChainInfo, ctx: &CallContext<'_>) -> Result<TxCall> {
    let use_ether = quote.from.is_eth();
    let amount_in = amounts::to_chain_units(&quote.amount_in, quote.from.decimals)?;
    let min_out = amounts::to_chain_units(&quote.trade.min_amount_out, quote.to.decimals)?;
    let value = if use_ether { amount_in } else { U256::ZERO };
    let builder = SwapperCalls { quote, chain, ctx, use_ether, amount_in, min_out };

    let swaps = match &quote.plan {
        TradePlan::Wrap => {
            return Ok(TxCall { to: chain.contracts.weth, data: encode(&IWETH::depositCall {}), value });
        }
        TradePlan::Unwrap => {
            let data = encode(&IWETH::withdrawCall { wad: amount_in });
            return Ok(TxCall { to: chain.contracts.weth, data, value: U256::ZERO });
        }
        TradePlan::Vault { path: VaultPath::PytToXpyt { xpyt }, .. } => {
            let data = encode(&IXpyt::depositCall { assets: amount_in, receiver: ctx.account });
            return Ok(TxCall { to: *xpyt, data, value: U256::ZERO });
        }
        TradePlan::Vault { path: VaultPath::XpytToPyt { xpyt }, .. } => {
            let data = encode(&IXpyt::redeemCall { shares: amount_in, receiver: ctx.account, owner: ctx.account });
            return Ok(TxCall { to: *xpyt, data, value: U256::ZERO });
        }
        TradePlan::Vault { path: VaultPath::NytToXpyt { .. } | VaultPath::XpytToNyt { .. }, .. } => {
            let route = quote
                .trade
                .route
                .as_ref()
                .ok_or_else(|| eyre!("AMM quote carries no route"))?;
            return Ok(TxCall { to: chain.contracts.uniswap_v3_router, data: route.calldata.clone(), value: U256::ZERO });
        }
        TradePlan::Vault { vault, path } => vec![builder.vault_swap(vault, *path, amount_in, use_ether, min_out)?],
        TradePlan::Aggregator => vec![builder.zero_ex(&quote.trade, &quote.to, ctx.account, min_out)?],
        TradePlan::Composite { vault, path } => builder.composite(vault, *path)?,
    };

    Ok(builder.bundle(swaps, value))
}

struct SwapperCalls<'a> {
    quote: &'a Quote,
    chain: &'a ChainInfo,
    ctx: &'a CallContext<'a>,
    use_ether: bool,
    amount_in: U256,
    min_out: U256,
}

impl SwapperCalls<'_> {
    fn swapper(&self) -> Address {
        self.chain.contracts.uniswap_v3_swapper
    }

    /// Token the Swapper actually sells; ETH is wrapped first
    fn sold_token(&self) -> Address {
        if self.use_ether {
            self.chain.contracts.weth
        } else {
            self.quote.from.address
        }
    }

    fn do_transfer_in(&self) -> bool {
        self.ctx.proxy_allowance.is_some_and(|allowance| allowance < self.amount_in)
    }

    fn zero_ex(&self, leg: &Trade, buy: &Token, recipient: Address, min_out: U256) -> Result<Bytes> {
        let swap_data = leg
            .swap_data
            .clone()
            .ok_or_else(|| eyre!("aggregator quote carries no swap data"))?;
        Ok(encode(&ISwapper::doZeroExSwapCall {
            tokenIn: self.sold_token(),
            tokenAmountIn: self.amount_in,
            tokenOut: buy.address,
            minAmountOut: min_out,
            recipient,
            useSwapperBalance: self.use_ether,
            doTransferIn: self.do_transfer_in(),
            deadline: U256::from(self.quote.deadline),
            swapData: swap_data,
        }))
    }

    fn composite(&self, vault: &Vault, path: VaultPath) -> Result<Vec<Bytes>> {
        let [hop, ..] = self.quote.legs.as_slice() else {
            return Err(eyre!("composite quote is missing its aggregator leg"));
        };
        let underlying = slot(vault, TokenRole::Underlying)?;
        let hop_min = amounts::to_chain_units(&hop.min_amount_out, underlying.decimals)?;

        let first = self.zero_ex(hop, underlying, self.swapper(), hop_min)?;
        // second leg spends whatever the first left on the Swapper
        let second = self.vault_swap(vault, path, U256::ZERO, true, self.min_out)?;
        Ok(vec![first, second])
    }

    fn vault_swap(
        &self,
        vault: &Vault,
        path: VaultPath,
        token_amount_in: U256,
        use_swapper_balance: bool,
        min_out: U256,
    ) -> Result<Bytes> {
        let trade = &self.quote.trade;
        let xpyt = trade
            .xpyt
            .as_ref()
            .ok_or_else(|| QuoteError::NoXpyt(vault.label()))?;
        let fee = xpyt.uniswap_v3_pool_fee;

        let swap_amount = |decimals: u8| amounts::to_chain_units(&trade.swap_amount_in, decimals);
        let args = |use_pyt: bool, extra_args: Bytes| -> Result<ISwapper::SwapArgs> {
            self.swap_args(vault, xpyt, token_amount_in, min_out, use_swapper_balance, use_pyt, extra_args)
        };

        let data = match path {
            VaultPath::UnderlyingToXpyt { .. } => encode(&ISwapper::swapUnderlyingToXpytCall {
                args: args(false, fee_args(fee)?)?,
            }),
            VaultPath::UnderlyingToPyt => encode(&ISwapper::swapUnderlyingToXpytCall {
                args: args(true, fee_args(fee)?)?,
            }),
            VaultPath::UnderlyingToNyt => encode(&ISwapper::swapUnderlyingToNytCall {
                args: args(false, fee_args(fee)?)?,
            }),
            VaultPath::XpytToUnderlying { .. } => encode(&ISwapper::swapXpytToUnderlyingCall {
                args: args(false, fee_and_swap_args(fee, swap_amount(xpyt.token.decimals)?)?)?,
            }),
            VaultPath::PytToUnderlying => encode(&ISwapper::swapXpytToUnderlyingCall {
                args: args(true, fee_and_swap_args(fee, swap_amount(xpyt.token.decimals)?)?)?,
            }),
            VaultPath::NytToUnderlying => {
                let nyt = slot(vault, TokenRole::Nyt)?;
                encode(&ISwapper::swapNytToUnderlyingCall {
                    args: args(false, fee_and_swap_args(fee, swap_amount(nyt.decimals)?)?)?,
                })
            }
            VaultPath::NytToXpyt { .. } | VaultPath::XpytToNyt { .. } | VaultPath::PytToXpyt { .. } | VaultPath::XpytToPyt { .. } => {
                return Err(eyre!("{:?} does not go through the Swapper", path));
            }
        };
        Ok(data)
    }

    #[allow(clippy::too_many_arguments)]
    fn swap_args(
        &self,
        vault: &Vault,
        xpyt: &Xpyt,
        token_amount_in: U256,
        min_out: U256,
        use_swapper_balance: bool,
        use_pyt: bool,
        extra_args: Bytes,
    ) -> Result<ISwapper::SwapArgs> {
        let gate = self.ctx.gate.ok_or_else(|| eyre!("no gate known for vault {}", vault.label()))?;
        Ok(ISwapper::SwapArgs {
            gate,
            vault: slot(vault, TokenRole::Share)?.address,
            underlying: slot(vault, TokenRole::Underlying)?.address,
            nyt: slot(vault, TokenRole::Nyt)?.address,
            pyt: slot(vault, TokenRole::Pyt)?.address,
            xPYT: xpyt.address(),
            tokenAmountIn: token_amount_in,
            minAmountOut: min_out,
            recipient: self.ctx.account,
            useSwapperBalance: use_swapper_balance,
            usePYT: use_pyt,
            deadline: U256::from(self.quote.deadline),
            extraArgs: extra_args,
        })
    }

    /// Prefix the permit and ETH wrap, then collapse into one call
    fn bundle(&self, swaps: Vec<Bytes>, value: U256) -> TxCall {
        let mut calls = Vec::with_capacity(swaps.len() + 2);

        if let Some(permit) = self.ctx.permit {
            if permit.is_valid_for(&self.quote.from, self.swapper(), &self.quote.amount_in, self.ctx.account, self.ctx.now) {
                calls.push(permit.self_permit_call());
            } else {
                debug!("Ignoring permit that does not cover this trade");
            }
        }
        if self.use_ether && self.quote.to.address != self.chain.contracts.weth {
            calls.push(encode(&ISwapper::wrapEthInputCall {}));
        }
        calls.extend(swaps);

        let data = if calls.len() == 1 {
            calls.remove(0)
        } else {
            debug!("Bundling {} Swapper calls", calls.len());
            encode(&ISwapper::multicallCall { data: calls })
        };
        TxCall { to: self.swapper(), data, value }
    }
}

fn slot(vault: &Vault, role: TokenRole) -> Result<&Token, QuoteError> {
    vault.slot(role).ok_or_else(|| QuoteError::MissingSlot { vault: vault.label(), role })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{self, ETHEREUM};
    use crate::permit::PermitKind;
    use crate::router::SwapRoute;
    use crate::tokens::fixtures::{addr, dec, vault};
    use alloy_primitives::B256;
    use alloy_sol_types::SolCall;

    fn chain() -> &'static ChainInfo {
        chains::chain(ETHEREUM).unwrap()
    }

    fn ctx() -> CallContext<'static> {
        CallContext { account: addr(0xee), gate: Some(addr(0xa0)), permit: None, proxy_allowance: None, now: 1_000 }
    }

    fn quote(plan: TradePlan, from: Token, to: Token, amount: &str) -> Quote {
        let v = vault();
        Quote {
            plan,
            from,
            to,
            amount_in: dec(amount),
            slippage_bps: 50,
            deadline: 2_000,
            fee_bps: 0,
            trade: Trade {
                xpyt: Some(v.xpyt[0].clone()),
                swap_amount_in: dec("0.5"),
                token_amount_out: dec("1"),
                min_amount_out: dec("0.9"),
                swap_data: Some(Bytes::from(vec![0xde, 0xad])),
                ..Default::default()
            },
            legs: Vec::new(),
        }
    }

    fn role_token(v: &Vault, role: TokenRole) -> Token {
        match role {
            TokenRole::Xpyt => v.xpyt[0].token.clone(),
            _ => v.slot(role).cloned().unwrap(),
        }
    }

    fn vault_quote(path: VaultPath, from: TokenRole, to: TokenRole) -> Quote {
        let v = vault();
        let from = role_token(&v, from);
        let to = role_token(&v, to);
        quote(TradePlan::Vault { vault: v, path }, from, to, "2")
    }

    #[test]
    fn test_extra_args_layout() {
        let one = fee_args(3000).unwrap();
        assert_eq!(one.len(), 32);
        assert_eq!(U256::from_be_slice(&one), U256::from(3000u64));

        let two = fee_and_swap_args(500, U256::from(7u64)).unwrap();
        assert_eq!(two.len(), 64);
        assert_eq!(U256::from_be_slice(&two[32..]), U256::from(7u64));
        assert!(fee_args(1 << 24).is_err());
    }

    #[test]
    fn test_spenders() {
        let v = vault();
        let c = chain();
        let pyt = v.pyt.clone().unwrap();
        let plan = |path| TradePlan::Vault { vault: v.clone(), path };

        assert_eq!(spender(&plan(VaultPath::NytToXpyt { xpyt: addr(0x15) }), &pyt, c), Some(c.contracts.uniswap_v3_router));
        assert_eq!(spender(&plan(VaultPath::PytToXpyt { xpyt: addr(0x15) }), &pyt, c), Some(addr(0x15)));
        assert_eq!(spender(&plan(VaultPath::XpytToPyt { xpyt: addr(0x15) }), &pyt, c), None);
        assert_eq!(spender(&plan(VaultPath::PytToUnderlying), &pyt, c), Some(c.contracts.uniswap_v3_swapper));
        assert_eq!(spender(&TradePlan::Aggregator, &Token::ether(), c), None);
    }

    #[test]
    fn test_underlying_to_pyt_uses_xpyt_swap_with_pyt_flag() {
        let q = vault_quote(VaultPath::UnderlyingToPyt, TokenRole::Underlying, TokenRole::Pyt);
        let call = build_call(&q, chain(), &ctx()).unwrap();
        assert_eq!(call.to, chain().contracts.uniswap_v3_swapper);
        assert_eq!(call.value, U256::ZERO);

        let decoded = ISwapper::swapUnderlyingToXpytCall::abi_decode(&call.data).unwrap();
        assert!(decoded.args.usePYT);
        assert!(!decoded.args.useSwapperBalance);
        assert_eq!(decoded.args.gate, addr(0xa0));
        assert_eq!(decoded.args.vault, addr(0x12));
        assert_eq!(decoded.args.xPYT, addr(0x15));
        assert_eq!(decoded.args.tokenAmountIn, U256::from(2_000_000_000_000_000_000u128));
        assert_eq!(decoded.args.minAmountOut, U256::from(900_000_000_000_000_000u128));
        assert_eq!(decoded.args.deadline, U256::from(2_000u64));
        assert_eq!(decoded.args.extraArgs, fee_args(3000).unwrap());
    }

    #[test]
    fn test_nyt_to_underlying_carries_swap_amount() {
        let q = vault_quote(VaultPath::NytToUnderlying, TokenRole::Nyt, TokenRole::Underlying);
        let call = build_call(&q, chain(), &ctx()).unwrap();
        let decoded = ISwapper::swapNytToUnderlyingCall::abi_decode(&call.data).unwrap();
        let expected = fee_and_swap_args(3000, U256::from(500_000_000_000_000_000u128)).unwrap();
        assert_eq!(decoded.args.extraArgs, expected);
    }

    #[test]
    fn test_xpyt_wrapping_goes_to_the_xpyt_contract() {
        let q = vault_quote(VaultPath::PytToXpyt { xpyt: addr(0x15) }, TokenRole::Pyt, TokenRole::Xpyt);
        let call = build_call(&q, chain(), &ctx()).unwrap();
        assert_eq!(call.to, addr(0x15));
        let decoded = IXpyt::depositCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.receiver, addr(0xee));

        let q = vault_quote(VaultPath::XpytToPyt { xpyt: addr(0x15) }, TokenRole::Xpyt, TokenRole::Pyt);
        let call = build_call(&q, chain(), &ctx()).unwrap();
        let decoded = IXpyt::redeemCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.owner, addr(0xee));
    }

    #[test]
    fn test_amm_path_uses_route_calldata() {
        let mut q = vault_quote(VaultPath::NytToXpyt { xpyt: addr(0x15) }, TokenRole::Nyt, TokenRole::Xpyt);
        assert!(build_call(&q, chain(), &ctx()).is_err());

        q.trade.route = Some(SwapRoute {
            pool: addr(0x16),
            fee: 3000,
            token_in: addr(0x14),
            token_out: addr(0x15),
            amount_in: dec("2"),
            amount_out: dec("1"),
            min_amount_out: dec("0.9"),
            price_impact: dec("0.1"),
            calldata: Bytes::from(vec![1, 2, 3]),
        });
        let call = build_call(&q, chain(), &ctx()).unwrap();
        assert_eq!(call.to, chain().contracts.uniswap_v3_router);
        assert_eq!(call.data, Bytes::from(vec![1, 2, 3]));
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let c = chain();
        let q = quote(TradePlan::Wrap, Token::ether(), c.weth_token(), "1.5");
        let call = build_call(&q, c, &ctx()).unwrap();
        assert_eq!(call.to, c.contracts.weth);
        assert_eq!(call.value, U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(call.data[..4], IWETH::depositCall::SELECTOR);

        let q = quote(TradePlan::Unwrap, c.weth_token(), Token::ether(), "1.5");
        let call = build_call(&q, c, &ctx()).unwrap();
        assert_eq!(call.value, U256::ZERO);
        let decoded = IWETH::withdrawCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.wad, U256::from(1_500_000_000_000_000_000u128));
    }

    #[test]
    fn test_eth_into_composite_bundles_wrap_hop_and_swap() {
        let c = chain();
        let v = vault();
        let mut q = quote(
            TradePlan::Composite { vault: v.clone(), path: VaultPath::UnderlyingToNyt },
            Token::ether(),
            v.nyt.clone().unwrap(),
            "1",
        );
        let hop = Trade { swap_data: Some(Bytes::from(vec![0xab])), min_amount_out: dec("1800"), ..Default::default() };
        q.legs = vec![hop.clone(), hop.clone(), hop];

        let ctx = CallContext { proxy_allowance: Some(U256::ZERO), ..ctx() };
        let call = build_call(&q, c, &ctx).unwrap();
        assert_eq!(call.to, c.contracts.uniswap_v3_swapper);
        assert_eq!(call.value, U256::from(1_000_000_000_000_000_000u128));

        let bundle = ISwapper::multicallCall::abi_decode(&call.data).unwrap().data;
        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle[0][..4], ISwapper::wrapEthInputCall::SELECTOR);

        let hop = ISwapper::doZeroExSwapCall::abi_decode(&bundle[1]).unwrap();
        assert_eq!(hop.tokenIn, c.contracts.weth);
        assert_eq!(hop.tokenOut, addr(0x11));
        assert_eq!(hop.recipient, c.contracts.uniswap_v3_swapper);
        assert!(hop.useSwapperBalance);
        assert!(hop.doTransferIn);

        let swap = ISwapper::swapUnderlyingToNytCall::abi_decode(&bundle[2]).unwrap();
        assert_eq!(swap.args.tokenAmountIn, U256::ZERO);
        assert!(swap.args.useSwapperBalance);
        assert_eq!(swap.args.recipient, addr(0xee));
    }

    #[test]
    fn test_valid_permit_is_prepended() {
        let c = chain();
        let v = vault();
        let dai = v.underlying.clone().unwrap();
        let q = quote(TradePlan::Aggregator, dai.clone(), c.weth_token(), "2");
        let permit = SignedPermit {
            token: dai.address,
            owner: addr(0xee),
            spender: c.contracts.uniswap_v3_swapper,
            value: U256::from(2_000_000_000_000_000_000u128),
            nonce: U256::ZERO,
            deadline: 5_000,
            kind: PermitKind::Amount,
            v: 27,
            r: B256::repeat_byte(1),
            s: B256::repeat_byte(2),
        };

        let with_permit = CallContext { permit: Some(&permit), ..ctx() };
        let call = build_call(&q, c, &with_permit).unwrap();
        let bundle = ISwapper::multicallCall::abi_decode(&call.data).unwrap().data;
        assert_eq!(bundle[0][..4], ISwapper::selfPermitIfNecessaryCall::SELECTOR);
        assert_eq!(bundle[1][..4], ISwapper::doZeroExSwapCall::SELECTOR);

        // expired permits are dropped and the lone swap is sent directly
        let late = CallContext { permit: Some(&permit), now: 6_000, ..ctx() };
        let call = build_call(&q, c, &late).unwrap();
        let swap = ISwapper::doZeroExSwapCall::abi_decode(&call.data).unwrap();
        assert!(!swap.doTransferIn);
        assert_eq!(swap.recipient, addr(0xee));
    }
}
