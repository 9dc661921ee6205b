//! Trade composition
//!
//! Quotes a [`TradePlan`] into a [`Quote`]. Vault paths combine the protocol
//! fee, xPYT conversions, juggler reads and one AMM route; aggregator paths
//! wrap a 0x quote; composite paths chain both and take their worst case from
//! the aggregator's guaranteed output.

use bigdecimal::{BigDecimal, Signed};
use chrono::Utc;
use eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::classify::{self, TradePlan, VaultPath};
use super::math::{apply_fee, calculate_slippage, combine_price_impact, convert_to_assets, convert_to_shares};
use super::{execution_price, JuggleInput, JuggleRequest, ProtocolReader, Quote, QuoteRequest, Trade};
use crate::aggregator::QuoteSource;
use crate::amounts;
use crate::chains::ChainInfo;
use crate::errors::QuoteError;
use crate::router::{RouteRequest, SwapRoute, SwapRouter};
use crate::tokens::{Token, TokenRole, Vault, Xpyt};

/// Per-leg parameters shared by every path
#[derive(Debug, Clone, Copy)]
struct LegParams {
    slippage_bps: u32,
    deadline: u64,
    recipient: alloy_primitives::Address,
    fee_bps: u32,
}

pub struct TradeComposer {
    router: Arc<dyn SwapRouter>,
    aggregator: Option<Arc<dyn QuoteSource>>,
    protocol: Arc<dyn ProtocolReader>,
    chain: &'static ChainInfo,
}

impl TradeComposer {
    pub fn new(
        chain: &'static ChainInfo,
        router: Arc<dyn SwapRouter>,
        aggregator: Option<Arc<dyn QuoteSource>>,
        protocol: Arc<dyn ProtocolReader>,
    ) -> Self {
        Self {
            router,
            aggregator,
            protocol,
            chain,
        }
    }

    pub fn chain(&self) -> &'static ChainInfo {
        self.chain
    }

    /// Compose a quote for `request` against the chain's vaults. Any failing
    /// external read aborts the whole quote.
    pub async fn quote(&self, request: &QuoteRequest, vaults: &[Vault]) -> Result<Quote> {
        if !request.amount.is_positive() {
            return Err(QuoteError::NonPositiveAmount.into());
        }

        let to = self.normalize_destination(&request.from, &request.to);
        let plan = classify::plan(&request.from, &to, vaults, self.chain)?;
        let fee_bps = if plan_charges_fee(&plan) {
            self.protocol.protocol_fee_bps().await?
        } else {
            0
        };
        let params = LegParams {
            slippage_bps: request.slippage_bps,
            deadline: Utc::now().timestamp().max(0) as u64 + request.deadline_secs,
            recipient: request.recipient,
            fee_bps,
        };

        debug!("Quoting {} {} -> {} as {}", request.amount, request.from.symbol, to.symbol, plan.label());

        let (trade, legs) = match &plan {
            TradePlan::Wrap | TradePlan::Unwrap => (Trade::exact(&request.amount, None, request.amount.clone()), Vec::new()),
            TradePlan::Aggregator => {
                let trade = self.aggregator_trade(&request.from, &to, &request.amount, params.slippage_bps).await?;
                (trade, Vec::new())
            }
            TradePlan::Vault { vault, path } => (self.vault_trade(vault, *path, &request.amount, params).await?, Vec::new()),
            TradePlan::Composite { vault, path } => self.composite_trade(&request.from, vault, *path, &request.amount, params).await?,
        };

        info!(
            "💱 {} {} -> {} {} (min {}, impact {}%) via {}",
            request.amount,
            request.from.symbol,
            amounts::display_amount(&trade.token_amount_out, 6),
            to.symbol,
            amounts::display_amount(&trade.min_amount_out, 6),
            amounts::round_dp(&trade.price_impact, 4),
            plan.label()
        );

        Ok(Quote {
            plan,
            from: request.from.clone(),
            to,
            amount_in: request.amount.clone(),
            slippage_bps: request.slippage_bps,
            deadline: params.deadline,
            fee_bps,
            trade,
            legs,
        })
    }

    /// ETH is only deliverable when unwrapping WETH; anything else lands as WETH
    pub fn normalize_destination(&self, from: &Token, to: &Token) -> Token {
        if to.is_eth() && from.address != self.chain.contracts.weth {
            self.chain.weth_token()
        } else {
            to.clone()
        }
    }

    // ============================================
    // AGGREGATOR
    // ============================================

    async fn aggregator_trade(&self, sell: &Token, buy: &Token, amount: &BigDecimal, slippage_bps: u32) -> Result<Trade> {
        let source = self
            .aggregator
            .as_ref()
            .ok_or(QuoteError::AggregatorUnavailable(self.chain.chain_id))?;

        // the Swapper wraps ETH before selling
        let sell = if sell.is_eth() { self.chain.weth_token() } else { sell.clone() };
        let quote = source.quote(&sell, buy, amount, slippage_bps).await?;

        Ok(Trade {
            swap_data: Some(quote.swap_data.clone()),
            min_amount_out: quote.min_amount_out(amount, buy),
            token_amount_out: quote.buy_amount,
            execution_price: quote.price,
            price_impact: quote.price_impact,
            ..Default::default()
        })
    }

    async fn composite_trade(
        &self,
        from: &Token,
        vault: &Vault,
        path: VaultPath,
        amount: &BigDecimal,
        params: LegParams,
    ) -> Result<(Trade, Vec<Trade>)> {
        let underlying = slot(vault, TokenRole::Underlying)?;
        let hop = LegParams {
            slippage_bps: calculate_slippage(params.slippage_bps, 2),
            ..params
        };

        let first = self.aggregator_trade(from, underlying, amount, hop.slippage_bps).await?;
        let (expected, worst) = tokio::try_join!(
            self.vault_trade(vault, path, &first.token_amount_out, hop),
            self.vault_trade(vault, path, &first.min_amount_out, hop),
        )?;

        let trade = Trade {
            xpyt: expected.xpyt.clone(),
            route: expected.route.clone(),
            swap_data: first.swap_data.clone(),
            swap_amount_in: expected.swap_amount_in.clone(),
            execution_price: execution_price(&expected.token_amount_out, amount),
            token_amount_out: expected.token_amount_out.clone(),
            slippage_base: expected.slippage_base.clone(),
            min_amount_out: worst.min_amount_out.clone(),
            price_impact: combine_price_impact(&first.price_impact, &expected.price_impact),
        };
        Ok((trade, vec![first, expected, worst]))
    }

    // ============================================
    // VAULT PATHS
    // ============================================

    async fn vault_trade(&self, vault: &Vault, path: VaultPath, amount: &BigDecimal, params: LegParams) -> Result<Trade> {
        let nyt = slot(vault, TokenRole::Nyt)?;

        let trade = match path {
            VaultPath::UnderlyingToNyt => {
                let xpyt = choose_xpyt(vault)?;
                let underlying = slot(vault, TokenRole::Underlying)?;
                let token_amount_in = amounts::truncate(&apply_fee(amount, params.fee_bps), underlying.decimals);

                let swap_amount_in = amounts::truncate(&convert_to_shares(xpyt, &token_amount_in), xpyt.token.decimals);
                let route = self.route(&xpyt.token, nyt, &swap_amount_in, xpyt, params).await?;

                let out = &token_amount_in + &route.amount_out;
                let min = &token_amount_in + &route.min_amount_out;
                routed(amount, xpyt, route, swap_amount_in, out, token_amount_in, min)
            }
            VaultPath::UnderlyingToPyt => {
                let xpyt = choose_xpyt(vault)?;
                let underlying = slot(vault, TokenRole::Underlying)?;
                let token_amount_in = amounts::truncate(&apply_fee(amount, params.fee_bps), underlying.decimals);

                let route = self.route(nyt, &xpyt.token, &token_amount_in, xpyt, params).await?;

                let out = &token_amount_in + convert_to_assets(xpyt, &route.amount_out)?;
                let min = &token_amount_in + convert_to_assets(xpyt, &route.min_amount_out)?;
                routed(amount, xpyt, route, token_amount_in.clone(), out, token_amount_in, min)
            }
            VaultPath::UnderlyingToXpyt { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                let underlying = slot(vault, TokenRole::Underlying)?;
                let token_amount_in = amounts::truncate(&apply_fee(amount, params.fee_bps), underlying.decimals);

                let route = self.route(nyt, &xpyt.token, &token_amount_in, xpyt, params).await?;

                let base = convert_to_shares(xpyt, &token_amount_in);
                let out = &base + &route.amount_out;
                let min = &base + &route.min_amount_out;
                routed(amount, xpyt, route, token_amount_in, out, base, min)
            }
            VaultPath::NytToUnderlying => {
                let xpyt = choose_xpyt(vault)?;
                let token_amount_in = amounts::truncate(&apply_fee(amount, params.fee_bps), nyt.decimals);

                let swap_amount_in = self.juggle(nyt, xpyt, &token_amount_in, JuggleInput::Nyt).await?;
                let route = self.route(nyt, &xpyt.token, &swap_amount_in, xpyt, params).await?;

                let swapped = convert_to_assets(xpyt, &route.amount_out)?;
                let remaining = &token_amount_in - &swap_amount_in;
                let out = remaining.min(swapped);
                let min = convert_to_assets(xpyt, &route.min_amount_out)?;
                routed(amount, xpyt, route, swap_amount_in, out, BigDecimal::default(), min)
            }
            VaultPath::PytToUnderlying => {
                let xpyt = choose_xpyt(vault)?;
                let shares = convert_to_shares(xpyt, amount);
                self.redeem_xpyt(nyt, xpyt, amount, &shares, params).await?
            }
            VaultPath::XpytToUnderlying { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                self.redeem_xpyt(nyt, xpyt, amount, amount, params).await?
            }
            VaultPath::NytToXpyt { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                let route = self.route(nyt, &xpyt.token, amount, xpyt, params).await?;
                let (out, min) = (route.amount_out.clone(), route.min_amount_out.clone());
                routed(amount, xpyt, route, amount.clone(), out, BigDecimal::default(), min)
            }
            VaultPath::XpytToNyt { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                let route = self.route(&xpyt.token, nyt, amount, xpyt, params).await?;
                let (out, min) = (route.amount_out.clone(), route.min_amount_out.clone());
                routed(amount, xpyt, route, amount.clone(), out, BigDecimal::default(), min)
            }
            VaultPath::PytToXpyt { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                Trade::exact(amount, Some(xpyt.clone()), convert_to_shares(xpyt, amount))
            }
            VaultPath::XpytToPyt { xpyt } => {
                let xpyt = xpyt_at(vault, xpyt)?;
                Trade::exact(amount, Some(xpyt.clone()), convert_to_assets(xpyt, amount)?)
            }
        };

        debug!("{:?} {} -> {} (min {})", path, amount, trade.token_amount_out, trade.min_amount_out);
        Ok(trade)
    }

    /// xPYT-denominated input redeemed to underlying: juggle, swap the
    /// surplus side, keep the smaller of the two legs
    async fn redeem_xpyt(
        &self,
        nyt: &Token,
        xpyt: &Xpyt,
        amount: &BigDecimal,
        shares: &BigDecimal,
        params: LegParams,
    ) -> Result<Trade> {
        let token_amount_in = amounts::truncate(&apply_fee(shares, params.fee_bps), xpyt.token.decimals);

        let swap_amount_in = self.juggle(nyt, xpyt, &token_amount_in, JuggleInput::Xpyt).await?;
        let route = self.route(&xpyt.token, nyt, &swap_amount_in, xpyt, params).await?;

        let remaining = convert_to_assets(xpyt, &(&token_amount_in - &swap_amount_in))?;
        let out = remaining.min(route.amount_out.clone());
        let min = route.min_amount_out.clone();
        Ok(routed(amount, xpyt, route, swap_amount_in, out, BigDecimal::default(), min))
    }

    async fn route(&self, token_in: &Token, token_out: &Token, amount_in: &BigDecimal, xpyt: &Xpyt, params: LegParams) -> Result<SwapRoute> {
        self.router
            .route(RouteRequest {
                token_in,
                token_out,
                amount_in,
                pools: &xpyt.pools,
                slippage_bps: params.slippage_bps,
                recipient: params.recipient,
                deadline: params.deadline,
            })
            .await
    }

    async fn juggle(&self, nyt: &Token, xpyt: &Xpyt, amount: &BigDecimal, input: JuggleInput) -> Result<BigDecimal> {
        let decimals = match input {
            JuggleInput::Xpyt => xpyt.token.decimals,
            JuggleInput::Nyt => nyt.decimals,
        };
        let raw = self
            .protocol
            .juggle(JuggleRequest {
                nyt: nyt.address,
                xpyt: xpyt.address(),
                fee: xpyt.uniswap_v3_pool_fee,
                amount_in: amounts::to_chain_units(amount, decimals)?,
                input,
            })
            .await?;
        Ok(amounts::from_chain_units(raw, decimals))
    }
}

// ============================================
// HELPERS
// ============================================

fn plan_charges_fee(plan: &TradePlan) -> bool {
    match plan {
        TradePlan::Vault { path, .. } | TradePlan::Composite { path, .. } => matches!(
            path,
            VaultPath::UnderlyingToNyt
                | VaultPath::UnderlyingToPyt
                | VaultPath::UnderlyingToXpyt { .. }
                | VaultPath::NytToUnderlying
                | VaultPath::PytToUnderlying
                | VaultPath::XpytToUnderlying { .. }
        ),
        TradePlan::Wrap | TradePlan::Unwrap | TradePlan::Aggregator => false,
    }
}

fn slot(vault: &Vault, role: TokenRole) -> Result<&Token, QuoteError> {
    vault.slot(role).ok_or_else(|| QuoteError::MissingSlot {
        vault: vault.label(),
        role,
    })
}

fn choose_xpyt(vault: &Vault) -> Result<&Xpyt, QuoteError> {
    vault.choose_xpyt().ok_or_else(|| QuoteError::NoXpyt(vault.label()))
}

fn xpyt_at(vault: &Vault, address: alloy_primitives::Address) -> Result<&Xpyt, QuoteError> {
    vault.xpyt_by_address(address).ok_or_else(|| QuoteError::NoXpyt(vault.label()))
}

fn routed(
    amount: &BigDecimal,
    xpyt: &Xpyt,
    route: SwapRoute,
    swap_amount_in: BigDecimal,
    token_amount_out: BigDecimal,
    slippage_base: BigDecimal,
    min_amount_out: BigDecimal,
) -> Trade {
    Trade {
        xpyt: Some(xpyt.clone()),
        price_impact: route.price_impact.clone(),
        route: Some(route),
        swap_data: None,
        swap_amount_in,
        execution_price: execution_price(&token_amount_out, amount),
        token_amount_out,
        slippage_base,
        min_amount_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorQuote;
    use crate::chains::{self, ETHEREUM};
    use crate::router::after_slippage;
    use crate::tokens::fixtures::{addr, dec, vault};
    use alloy_primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Every pool pays `rate` output per input with a fixed impact
    struct FixedRateRouter {
        rate: BigDecimal,
        calls: Mutex<Vec<(Address, Address, BigDecimal)>>,
    }

    impl FixedRateRouter {
        fn new(rate: &str) -> Arc<Self> {
            Arc::new(Self { rate: dec(rate), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<(Address, Address, BigDecimal)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SwapRouter for FixedRateRouter {
        async fn route(&self, request: RouteRequest<'_>) -> Result<SwapRoute> {
            self.calls.lock().unwrap().push((
                request.token_in.address,
                request.token_out.address,
                request.amount_in.clone(),
            ));
            let amount_out = amounts::truncate(&(request.amount_in * &self.rate), request.token_out.decimals);
            Ok(SwapRoute {
                pool: request.pools[0].id,
                fee: request.pools[0].fee,
                token_in: request.token_in.address,
                token_out: request.token_out.address,
                amount_in: request.amount_in.clone(),
                min_amount_out: after_slippage(&amount_out, request.slippage_bps, request.token_out.decimals),
                amount_out,
                price_impact: dec("1"),
                calldata: Bytes::new(),
            })
        }
    }

    /// Fee of 30 bps; the juggler always swaps half
    struct HalfJuggler;

    #[async_trait]
    impl ProtocolReader for HalfJuggler {
        async fn protocol_fee_bps(&self) -> Result<u32> {
            Ok(30)
        }

        async fn juggle(&self, request: JuggleRequest) -> Result<U256> {
            Ok(request.amount_in / U256::from(2))
        }
    }

    struct FixedAggregator {
        price: BigDecimal,
        guaranteed: BigDecimal,
        sold: Mutex<Vec<Address>>,
    }

    #[async_trait]
    impl QuoteSource for FixedAggregator {
        async fn quote(&self, sell: &Token, buy: &Token, sell_amount: &BigDecimal, _slippage_bps: u32) -> Result<AggregatorQuote> {
            self.sold.lock().unwrap().push(sell.address);
            Ok(AggregatorQuote {
                buy_amount: amounts::truncate(&(sell_amount * &self.price), buy.decimals),
                price: self.price.clone(),
                guaranteed_price: self.guaranteed.clone(),
                price_impact: dec("0.5"),
                swap_data: Bytes::from(vec![0xab]),
            })
        }
    }

    fn composer(router: Arc<FixedRateRouter>, aggregator: Option<Arc<FixedAggregator>>) -> TradeComposer {
        let chain = chains::chain(ETHEREUM).unwrap();
        TradeComposer::new(
            chain,
            router,
            aggregator.map(|a| a as Arc<dyn QuoteSource>),
            Arc::new(HalfJuggler),
        )
    }

    fn aggregator() -> Arc<FixedAggregator> {
        Arc::new(FixedAggregator { price: dec("1"), guaranteed: dec("0.9"), sold: Mutex::new(Vec::new()) })
    }

    fn token_of(v: &Vault, address: Address) -> Token {
        v.tokens().find(|t| t.address == address).cloned().unwrap()
    }

    fn request(from: Token, to: Token, amount: &str) -> QuoteRequest {
        QuoteRequest {
            from,
            to,
            amount: dec(amount),
            slippage_bps: 100,
            deadline_secs: 1200,
            recipient: addr(0xee),
        }
    }

    #[tokio::test]
    async fn test_underlying_to_xpyt_direct_portion() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x11)), token_of(&v, addr(0x15)), "1000");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 1000 × 0.997 × 0.8
        assert_eq!(quote.trade.slippage_base, dec("797.6"));
        assert_eq!(quote.fee_bps, 30);
        let route = quote.trade.route.clone().unwrap();
        assert_eq!(route.amount_in, dec("997"));
        assert_eq!(quote.trade.token_amount_out, dec("797.6") + &route.amount_out);
        assert_eq!(quote.trade.min_amount_out, dec("797.6") + &route.min_amount_out);
        assert_eq!(router.calls(), vec![(addr(0x14), addr(0x15), dec("997"))]);
    }

    #[tokio::test]
    async fn test_underlying_to_nyt_routes_shares() {
        let router = FixedRateRouter::new("1.25");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x11)), token_of(&v, addr(0x14)), "1000");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 997 underlying -> 797.6 xPYT routed into NYT
        assert_eq!(router.calls(), vec![(addr(0x15), addr(0x14), dec("797.6"))]);
        assert_eq!(quote.trade.token_amount_out, dec("997") + dec("997"));
        assert_eq!(quote.trade.slippage_base, dec("997"));
    }

    #[tokio::test]
    async fn test_underlying_to_pyt_converts_routed_xpyt() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x11)), token_of(&v, addr(0x13)), "1000");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 997 minted as PYT, 997 NYT swapped into xPYT and read back as PYT
        assert_eq!(router.calls(), vec![(addr(0x14), addr(0x15), dec("997"))]);
        assert_eq!(quote.fee_bps, 30);
        assert_eq!(quote.trade.swap_amount_in, dec("997"));
        assert_eq!(quote.trade.slippage_base, dec("997"));
        assert_eq!(quote.trade.token_amount_out, dec("2243.25"));
        // 997 + (997 / 1.01) / 0.8
        assert_eq!(quote.trade.min_amount_out, dec("2230.91089108910891089"));
    }

    #[tokio::test]
    async fn test_xpyt_to_underlying_keeps_smaller_leg() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x15)), token_of(&v, addr(0x11)), "100");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 99.7 xPYT after fee, half swapped into NYT; the rest is worth 62.3125 PYT
        assert_eq!(router.calls(), vec![(addr(0x15), addr(0x14), dec("49.85"))]);
        assert_eq!(quote.fee_bps, 30);
        assert_eq!(quote.trade.swap_amount_in, dec("49.85"));
        assert_eq!(quote.trade.token_amount_out, dec("49.85"));
        assert_eq!(quote.trade.min_amount_out, dec("49.356435643564356435"));
        assert_eq!(quote.trade.slippage_base, BigDecimal::default());
    }

    #[tokio::test]
    async fn test_nyt_xpyt_goes_straight_through_the_pool() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();

        let buy = c.quote(&request(token_of(&v, addr(0x14)), token_of(&v, addr(0x15)), "10"), &[v.clone()]).await.unwrap();
        assert_eq!(buy.plan, TradePlan::Vault { vault: v.clone(), path: VaultPath::NytToXpyt { xpyt: addr(0x15) } });
        assert_eq!(buy.fee_bps, 0);
        assert_eq!(buy.trade.swap_amount_in, dec("10"));
        assert_eq!(buy.trade.token_amount_out, dec("10"));
        assert_eq!(buy.trade.min_amount_out, dec("9.90099009900990099"));
        assert_eq!(buy.trade.slippage_base, BigDecimal::default());
        assert_eq!(buy.trade.price_impact, dec("1"));

        let sell = c.quote(&request(token_of(&v, addr(0x15)), token_of(&v, addr(0x14)), "10"), &[v.clone()]).await.unwrap();
        assert_eq!(sell.plan, TradePlan::Vault { vault: v, path: VaultPath::XpytToNyt { xpyt: addr(0x15) } });
        assert_eq!(sell.fee_bps, 0);
        assert_eq!(sell.trade.token_amount_out, dec("10"));
        assert_eq!(sell.trade.min_amount_out, dec("9.90099009900990099"));

        assert_eq!(
            router.calls(),
            vec![(addr(0x14), addr(0x15), dec("10")), (addr(0x15), addr(0x14), dec("10"))]
        );
    }

    #[tokio::test]
    async fn test_pyt_xpyt_is_exact() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();

        let wrap = c.quote(&request(token_of(&v, addr(0x13)), token_of(&v, addr(0x15)), "10"), &[v.clone()]).await.unwrap();
        assert_eq!(wrap.trade.token_amount_out, dec("8"));
        assert_eq!(wrap.trade.min_amount_out, wrap.trade.token_amount_out);
        assert_eq!(wrap.trade.price_impact, BigDecimal::default());

        let unwrap = c.quote(&request(token_of(&v, addr(0x15)), token_of(&v, addr(0x13)), "8"), &[v]).await.unwrap();
        assert_eq!(unwrap.trade.token_amount_out, dec("10"));
        assert_eq!(unwrap.trade.min_amount_out, unwrap.trade.token_amount_out);
        assert_eq!(unwrap.trade.price_impact, BigDecimal::default());

        assert!(router.calls().is_empty());
        assert_eq!(wrap.fee_bps, 0);
    }

    #[tokio::test]
    async fn test_nyt_to_underlying_takes_smaller_leg() {
        let router = FixedRateRouter::new("0.8");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x14)), token_of(&v, addr(0x11)), "100");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 99.7 after fee, half swapped: 49.85 NYT -> 39.88 xPYT -> 49.85 PYT
        assert_eq!(quote.trade.swap_amount_in, dec("49.85"));
        assert_eq!(quote.trade.token_amount_out, dec("49.85"));
        assert_eq!(quote.trade.slippage_base, BigDecimal::default());
        assert!(quote.trade.min_amount_out < quote.trade.token_amount_out);
    }

    #[tokio::test]
    async fn test_pyt_to_underlying_juggles_xpyt() {
        let router = FixedRateRouter::new("1");
        let c = composer(router.clone(), None);
        let v = vault();
        let req = request(token_of(&v, addr(0x13)), token_of(&v, addr(0x11)), "100");

        let quote = c.quote(&req, &[v]).await.unwrap();

        // 100 PYT -> 80 xPYT -> 79.76 after fee, half swapped into NYT
        let calls = router.calls();
        assert_eq!(calls, vec![(addr(0x15), addr(0x14), dec("39.88"))]);
        // remaining 39.88 xPYT = 49.85 PYT, swap gives 39.88 NYT
        assert_eq!(quote.trade.token_amount_out, dec("39.88"));
    }

    #[tokio::test]
    async fn test_composite_min_comes_from_guaranteed_leg() {
        let router = FixedRateRouter::new("1");
        let agg = aggregator();
        let c = composer(router.clone(), Some(agg.clone()));
        let v = vault();
        let external = Token::new("Tether", "USDT", addr(0x90), 18);
        let req = request(external, token_of(&v, addr(0x14)), "100");

        let quote = c.quote(&req, &[v]).await.unwrap();

        assert!(matches!(quote.plan, TradePlan::Composite { .. }));
        assert_eq!(quote.legs.len(), 3);
        let (first, expected, worst) = (&quote.legs[0], &quote.legs[1], &quote.legs[2]);
        assert_eq!(first.token_amount_out, dec("100"));
        assert_eq!(first.min_amount_out, dec("90"));
        assert_eq!(quote.trade.token_amount_out, expected.token_amount_out);
        assert_eq!(quote.trade.min_amount_out, worst.min_amount_out);
        assert!(quote.trade.min_amount_out < expected.min_amount_out);
        assert_eq!(quote.trade.price_impact, combine_price_impact(&dec("0.5"), &dec("1")));
        assert_eq!(quote.trade.swap_data, Some(Bytes::from(vec![0xab])));
        // both vault legs route the xPYT share of 100 and 90 after fees
        let mut routed: Vec<_> = router.calls().into_iter().map(|(_, _, amount)| amount).collect();
        routed.sort();
        assert_eq!(routed, vec![dec("71.784"), dec("79.76")]);
    }

    #[tokio::test]
    async fn test_aggregator_sells_weth_for_eth() {
        let agg = aggregator();
        let c = composer(FixedRateRouter::new("1"), Some(agg.clone()));
        let usdt = Token::new("Tether", "USDT", addr(0x90), 18);

        let quote = c.quote(&request(Token::ether(), usdt, "2"), &[]).await.unwrap();

        assert_eq!(quote.plan, TradePlan::Aggregator);
        assert_eq!(quote.trade.min_amount_out, dec("1.8"));
        assert_eq!(agg.sold.lock().unwrap().clone(), vec![c.chain().contracts.weth]);
    }

    #[tokio::test]
    async fn test_eth_destination_becomes_weth() {
        let c = composer(FixedRateRouter::new("1"), Some(aggregator()));
        let usdt = Token::new("Tether", "USDT", addr(0x90), 18);

        let quote = c.quote(&request(usdt, Token::ether(), "1"), &[]).await.unwrap();
        assert_eq!(quote.to.address, c.chain().contracts.weth);

        let unwrap = c.quote(&request(c.chain().weth_token(), Token::ether(), "1"), &[]).await.unwrap();
        assert_eq!(unwrap.plan, TradePlan::Unwrap);
        assert_eq!(unwrap.trade.min_amount_out, dec("1"));
    }

    #[tokio::test]
    async fn test_failures_are_typed() {
        let c = composer(FixedRateRouter::new("1"), None);
        let v = vault();

        let err = c.quote(&request(token_of(&v, addr(0x11)), token_of(&v, addr(0x14)), "0"), &[v.clone()]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<QuoteError>(), Some(&QuoteError::NonPositiveAmount));

        let err = c.quote(&request(token_of(&v, addr(0x13)), token_of(&v, addr(0x14)), "1"), &[v.clone()]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<QuoteError>(), Some(QuoteError::UnsupportedPair { .. })));

        let usdt = Token::new("Tether", "USDT", addr(0x90), 18);
        let err = c.quote(&request(usdt, token_of(&v, addr(0x11)), "1"), &[v]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<QuoteError>(), Some(&QuoteError::AggregatorUnavailable(ETHEREUM)));
    }
}
