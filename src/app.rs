//! Service wiring
//!
//! Builds every service for the configured chain and keeps the caches
//! honest: balances are dropped when the account changes and the chain that
//! was left gets its vaults and prices invalidated.

use alloy_primitives::{Address, U256};
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::amounts;
use crate::aggregator::{QuoteSource, ZeroExClient};
use crate::analytics::{Analytics, TvlReport, VaultApy};
use crate::balances::BalanceBook;
use crate::chains::{self, ChainInfo};
use crate::config::Config;
use crate::contracts::ChainClient;
use crate::executor::{self, build_call, build_gate_call, CallContext, GateAction, GateContext, TxOutcome, TxSubmitter};
use crate::indexer::GraphqlClient;
use crate::permit::{self, SignedPermit};
use crate::pricing::PriceBook;
use crate::registry::{GateRegistry, IndexerGateSource};
use crate::router::UniswapRouter;
use crate::session::{Session, SessionEvent};
use crate::time::SubgraphBlocks;
use crate::tokens::{Token, Vault};
use crate::trade::{DeskOutcome, Quote, QuoteDesk, QuoteRequest, TradeComposer, TradePlan};

// ============================================
// CACHE INVALIDATION
// ============================================

/// Reacts to session events by dropping whatever they made stale
#[derive(Clone)]
pub struct CacheInvalidator {
    registry: Arc<GateRegistry>,
    prices: Arc<PriceBook>,
    balances: Arc<BalanceBook>,
}

impl CacheInvalidator {
    pub fn new(registry: Arc<GateRegistry>, prices: Arc<PriceBook>, balances: Arc<BalanceBook>) -> Self {
        Self { registry, prices, balances }
    }

    pub async fn apply(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { .. }
            | SessionEvent::Disconnected { .. }
            | SessionEvent::AccountChanged { .. } => {
                self.balances.clear().await;
            }
            SessionEvent::ChainChanged { from, .. } => {
                self.registry.invalidate(*from).await;
                self.prices.invalidate(*from).await;
            }
            SessionEvent::Transaction { .. } => {}
        }
    }

    /// Follow the session until it is dropped
    pub fn spawn(self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.apply(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        // account events may be among the missed ones
                        warn!("⚠️ Missed {} session event(s), dropping balances", missed);
                        self.balances.clear().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Session closed, invalidator stopped");
        })
    }
}

// ============================================
// TOKEN LOOKUP
// ============================================

/// Find a token by address or (case-insensitive) symbol among ETH, WETH,
/// the chain's default tokens and every vault token
pub fn find_token(query: &str, vaults: &[Vault], chain: &ChainInfo) -> Option<Token> {
    let mut candidates = vec![Token::ether(), chain.weth_token()];
    candidates.extend(chains::default_tokens(chain.chain_id));
    candidates.extend(vaults.iter().flat_map(|v| v.tokens().cloned()));

    match query.parse::<Address>() {
        Ok(address) => candidates.into_iter().find(|t| t.address == address),
        Err(_) => candidates.into_iter().find(|t| t.symbol.eq_ignore_ascii_case(query)),
    }
}

/// Find a vault by its share token's address or (case-insensitive) symbol
pub fn find_vault(query: &str, vaults: &[Vault]) -> Option<Vault> {
    let matches = |v: &&Vault| {
        v.share.as_ref().is_some_and(|share| match query.parse::<Address>() {
            Ok(address) => share.address == address,
            Err(_) => share.symbol.eq_ignore_ascii_case(query),
        })
    };
    vaults.iter().find(matches).cloned()
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================
// APP
// ============================================

pub struct App {
    config: Config,
    chain: &'static ChainInfo,
    client: Arc<ChainClient>,
    registry: Arc<GateRegistry>,
    prices: Arc<PriceBook>,
    balances: Arc<BalanceBook>,
    session: Arc<Session>,
    desk: QuoteDesk,
    analytics: Analytics,
    submitter: Option<TxSubmitter>,
    invalidator: JoinHandle<()>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let chain = config.chain()?;
        let chain_id = chain.chain_id;

        let client = Arc::new(ChainClient::new(chain_id, config.rpc_url.clone())?);
        let indexer = Arc::new(GraphqlClient::new(config.indexer_endpoint()?, config.http_timeout())?);
        let blocks_indexer = Arc::new(GraphqlClient::new(config.blocks_endpoint()?, config.http_timeout())?);

        let gates = Arc::new(IndexerGateSource::new(chain_id, indexer.clone(), client.clone()));
        let registry = Arc::new(GateRegistry::new(config.cache_ttl()).with_source(chain_id, gates));
        let prices = Arc::new(PriceBook::new().with_oracle(chain_id, client.clone()));
        let balances = Arc::new(BalanceBook::new().with_reader(chain_id, client.clone()));
        let session = Arc::new(Session::new(chain_id));

        let aggregator: Option<Arc<dyn QuoteSource>> = if chain.supports_aggregator {
            let zero_ex = ZeroExClient::new(
                config.aggregator_url.clone(),
                config.aggregator_api_key.clone(),
                config.http_timeout(),
            )?;
            Some(Arc::new(zero_ex))
        } else {
            None
        };
        let router = Arc::new(UniswapRouter::new(client.clone()));
        let composer = Arc::new(TradeComposer::new(chain, router, aggregator, client.clone()));
        let desk = QuoteDesk::new(composer, registry.clone(), session.watch(), config.debounce());

        let analytics = Analytics::new(chain, indexer, Arc::new(SubgraphBlocks::new(blocks_indexer)), registry.clone());

        let submitter = match &config.signer_key {
            Some(key) => Some(TxSubmitter::new(chain_id, config.rpc_url.clone(), key, session.clone())?),
            None => None,
        };

        let invalidator = CacheInvalidator::new(registry.clone(), prices.clone(), balances.clone())
            .spawn(session.subscribe());

        if let Some(submitter) = &submitter {
            session.connect(submitter.address());
        }
        info!("🚀 Services ready on {}", chain.display_name);

        Ok(Self {
            config,
            chain,
            client,
            registry,
            prices,
            balances,
            session,
            desk,
            analytics,
            submitter,
            invalidator,
        })
    }

    pub fn chain(&self) -> &'static ChainInfo {
        self.chain
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Connected account, if a signer is loaded
    pub fn account(&self) -> Option<Address> {
        self.session.state().account
    }

    pub async fn vaults(&self, refresh: bool) -> Result<Vec<Vault>> {
        self.registry.vaults(self.chain.chain_id, refresh).await
    }

    pub async fn gate_name(&self, vault: &Vault) -> Result<Option<&'static str>> {
        let gate = self.registry.vault_gate(self.chain.chain_id, vault).await?;
        Ok(gate.and_then(|g| self.registry.gate_name(self.chain.chain_id, g)))
    }

    pub async fn find_token(&self, query: &str) -> Result<Token> {
        let vaults = self.vaults(false).await?;
        find_token(query, &vaults, self.chain).ok_or_else(|| eyre!("Unknown token {}", query))
    }

    /// Quote `amount` of `from` into `to` through the desk
    pub async fn quote(&self, from: Token, to: Token, amount: BigDecimal, slippage_bps: Option<u32>) -> Result<Quote> {
        let request = QuoteRequest {
            from,
            to,
            amount,
            slippage_bps: slippage_bps.unwrap_or(self.config.slippage_bps),
            deadline_secs: self.config.deadline_secs,
            recipient: self.account().unwrap_or(Address::ZERO),
        };
        match self.desk.request(request).await? {
            DeskOutcome::Fresh(quote) => Ok(*quote),
            DeskOutcome::Superseded { sequence } | DeskOutcome::Stale { sequence } => {
                Err(eyre!("Quote #{} was invalidated before it completed", sequence))
            }
        }
    }

    /// USD price of every vault token
    pub async fn prices(&self) -> Result<Vec<(Token, BigDecimal)>> {
        let chain_id = self.chain.chain_id;
        let vaults = self.vaults(false).await?;
        self.prices.load(chain_id, &vaults).await;

        let mut priced = Vec::new();
        for token in vaults.iter().flat_map(|v| v.tokens()) {
            priced.push((token.clone(), self.prices.price(chain_id, token.address).await));
        }
        Ok(priced)
    }

    /// Non-zero balances of `owner` across ETH and every vault token
    pub async fn balances(&self, owner: Address) -> Result<Vec<(Token, BigDecimal)>> {
        let chain_id = self.chain.chain_id;
        let vaults = self.vaults(false).await?;
        self.balances.load(chain_id, owner, &vaults).await?;

        let mut tokens = vec![Token::ether()];
        for token in vaults.iter().flat_map(|v| v.tokens()) {
            if !tokens.iter().any(|t| t.address == token.address) {
                tokens.push(token.clone());
            }
        }

        let mut held = Vec::new();
        for token in tokens {
            let amount = self.balances.amount(chain_id, owner, &token).await;
            if amount > BigDecimal::default() {
                held.push((token, amount));
            }
        }
        Ok(held)
    }

    pub async fn tvl(&self) -> Result<TvlReport> {
        self.analytics.tvl(unix_now()).await
    }

    pub async fn apy(&self) -> Result<Vec<VaultApy>> {
        self.analytics.apy(unix_now()).await
    }

    // ============================================
    // EXECUTION
    // ============================================

    /// Make sure `spender` may pull `amount` of `token`: nothing to do, a
    /// signed permit (when `permit_ok`), or an approval transaction
    async fn authorize(
        &self,
        submitter: &TxSubmitter,
        token: &Token,
        spender: Address,
        amount: &BigDecimal,
        permit_ok: bool,
    ) -> Result<Authorization> {
        let chain_id = self.chain.chain_id;
        let required = amounts::to_chain_units(amount, token.decimals)?;
        let allowance = self.balances.allowance(chain_id, token.address, submitter.address(), spender).await?;
        if !executor::needs_approval(allowance, required) {
            return Ok(Authorization::Ready(None));
        }

        if permit_ok {
            let deadline = unix_now() as u64 + self.config.deadline_secs;
            match permit::sign_permit(submitter.signer(), self.client.as_ref(), chain_id, token, spender, amount, deadline).await {
                Ok(signed) => return Ok(Authorization::Ready(Some(signed))),
                Err(e) => debug!("No permit for {}: {}", token.symbol, e),
            }
        }

        match submitter.approve_if_needed(&self.balances, token, spender, amount).await? {
            Some(outcome) if !outcome.is_confirmed() => Ok(Authorization::Halted(outcome)),
            _ => Ok(Authorization::Ready(None)),
        }
    }

    async fn refresh_balances<'a>(&self, account: Address, tokens: impl IntoIterator<Item = &'a Token>) {
        for token in tokens {
            if let Err(e) = self.balances.refresh(self.chain.chain_id, account, token.address).await {
                warn!("⚠️ Balance refresh for {} failed: {}", token.symbol, e);
            }
        }
    }

    fn submitter(&self) -> Result<&TxSubmitter> {
        self.submitter
            .as_ref()
            .ok_or_else(|| eyre!("No signer configured - set SIGNER_KEY to trade"))
    }

    /// Approve (or permit), build and submit `quote`
    pub async fn execute(&self, quote: &Quote) -> Result<TxOutcome> {
        let submitter = self.submitter()?;
        let chain_id = self.chain.chain_id;
        let account = submitter.address();
        let swapper = self.chain.contracts.uniswap_v3_swapper;

        let vault = match &quote.plan {
            TradePlan::Vault { vault, .. } | TradePlan::Composite { vault, .. } => Some(vault),
            _ => None,
        };
        let gate = match vault {
            Some(vault) => self.registry.vault_gate(chain_id, vault).await?,
            None => None,
        };

        let mut permit = None;
        if let Some(spender) = executor::spender(&quote.plan, &quote.from, self.chain) {
            match self.authorize(submitter, &quote.from, spender, &quote.amount_in, spender == swapper).await? {
                Authorization::Ready(signed) => permit = signed,
                Authorization::Halted(outcome) => return Ok(outcome),
            }
        }

        let proxy_allowance = match (&quote.plan, self.chain.contracts.zero_ex_proxy) {
            (TradePlan::Aggregator | TradePlan::Composite { .. }, Some(proxy)) => {
                let sold = if quote.from.is_eth() { self.chain.contracts.weth } else { quote.from.address };
                Some(self.balances.allowance(chain_id, sold, swapper, proxy).await?)
            }
            _ => None::<U256>,
        };

        let ctx = CallContext {
            account,
            gate,
            permit: permit.as_ref(),
            proxy_allowance,
            now: unix_now() as u64,
        };
        let call = build_call(quote, self.chain, &ctx)?;
        let outcome = submitter.submit(call).await?;

        if outcome.is_confirmed() {
            self.refresh_balances(account, [&quote.from, &quote.to]).await;
        }
        Ok(outcome)
    }

    // ============================================
    // GATE
    // ============================================

    async fn gate_of(&self, vault: &Vault) -> Result<Address> {
        self.registry
            .vault_gate(self.chain.chain_id, vault)
            .await?
            .ok_or_else(|| eyre!("No gate known for vault {}", vault.label()))
    }

    pub async fn find_vault(&self, query: &str) -> Result<Vault> {
        let vaults = self.vaults(false).await?;
        find_vault(query, &vaults).ok_or_else(|| eyre!("Unknown vault {}", query))
    }

    /// Underlying yield the signer can claim from `vault`
    pub async fn claimable_yield(&self, vault: &Vault) -> Result<BigDecimal> {
        let account = self.submitter()?.address();
        let gate = self.gate_of(vault).await?;
        let (share, underlying) = match (&vault.share, &vault.underlying) {
            (Some(share), Some(underlying)) => (share, underlying),
            _ => return Err(eyre!("Vault {} is missing its share or underlying token", vault.label())),
        };
        let raw = self.client.claimable_yield(gate, share.address, account).await?;
        Ok(amounts::from_chain_units(raw, underlying.decimals))
    }

    /// Mint, burn or claim through the vault's gate
    pub async fn gate_execute(&self, vault: &Vault, action: &GateAction) -> Result<TxOutcome> {
        let submitter = self.submitter()?;
        let account = submitter.address();
        let gate = self.gate_of(vault).await?;

        let mut permit = None;
        if let Some((token, amount)) = action.spend(vault)? {
            match self.authorize(submitter, &token, gate, &amount, true).await? {
                Authorization::Ready(signed) => permit = signed,
                Authorization::Halted(outcome) => return Ok(outcome),
            }
        }

        let ctx = GateContext { gate, account, permit: permit.as_ref(), now: unix_now() as u64 };
        let call = build_gate_call(vault, action, &ctx)?;
        info!("🏛️ {:?} on {}", action, vault.label());
        let outcome = submitter.submit(call).await?;

        if outcome.is_confirmed() {
            self.refresh_balances(account, &action.touched(vault)).await;
        }
        Ok(outcome)
    }
}

/// Result of making sure a spender may pull the sold token
enum Authorization {
    /// Allowance is in place, or covered by this permit
    Ready(Option<SignedPermit>),
    /// The approval did not confirm
    Halted(TxOutcome),
}

impl Drop for App {
    fn drop(&mut self) {
        self.invalidator.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balances::BalanceReader;
    use crate::chains::{ARBITRUM, ETHEREUM};
    use crate::pricing::PriceOracle;
    use crate::registry::mock::StaticGates;
    use crate::tokens::fixtures::{addr, dec, vault};
    use crate::tokens::Gate;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_test::assert_ok;

    struct OneEverywhere;

    #[async_trait]
    impl BalanceReader for OneEverywhere {
        async fn balances(&self, _owner: Address, tokens: &[Address]) -> Result<HashMap<Address, U256>> {
            Ok(tokens.iter().map(|t| (*t, U256::from(1u64))).collect())
        }

        async fn balance(&self, _owner: Address, _token: Address) -> Result<U256> {
            Ok(U256::from(1u64))
        }

        async fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }
    }

    struct FlatOracle;

    #[async_trait]
    impl PriceOracle for FlatOracle {
        async fn price_usd(&self, _token: Address) -> Result<Option<BigDecimal>> {
            Ok(Some(dec("2")))
        }
    }

    fn gate() -> Gate {
        Gate { address: addr(0x01), vaults: vec![vault()] }
    }

    #[test]
    fn test_find_token() {
        let chain = chains::chain(ETHEREUM).unwrap();
        let vaults = vec![vault()];

        assert!(find_token("eth", &vaults, chain).unwrap().is_eth());
        assert_eq!(find_token("WETH", &vaults, chain).unwrap().address, chain.contracts.weth);
        assert_eq!(find_token("yvdai", &vaults, chain).unwrap().address, addr(0x12));
        assert_eq!(find_token(&addr(0x15).to_string(), &vaults, chain).unwrap().address, addr(0x15));
        assert!(find_token("NOPE", &vaults, chain).is_none());
    }

    #[test]
    fn test_find_vault_by_share() {
        let vaults = vec![vault()];
        assert_eq!(find_vault("YVDAI", &vaults).unwrap().share.unwrap().address, addr(0x12));
        assert!(find_vault(&addr(0x12).to_string(), &vaults).is_some());
        // underlying symbols do not name a vault
        assert!(find_vault("DAI", &vaults).is_none());
    }

    #[tokio::test]
    async fn test_account_events_clear_balances() {
        let source = StaticGates::new(vec![gate()]);
        let registry = Arc::new(GateRegistry::new(Duration::from_secs(60)).with_source(ETHEREUM, source));
        let prices = Arc::new(PriceBook::new());
        let balances = Arc::new(BalanceBook::new().with_reader(ETHEREUM, Arc::new(OneEverywhere)));
        let invalidator = CacheInvalidator::new(registry, prices, balances.clone());

        assert_ok!(balances.load(ETHEREUM, addr(0xee), &[vault()]).await);
        assert!(balances.get(ETHEREUM, addr(0xee), addr(0x11)).await.is_some());

        invalidator
            .apply(&SessionEvent::AccountChanged { from: addr(0xee), to: addr(0xef) })
            .await;
        assert!(balances.get(ETHEREUM, addr(0xee), addr(0x11)).await.is_none());
    }

    #[tokio::test]
    async fn test_chain_switch_invalidates_the_chain_left() {
        let source = StaticGates::new(vec![gate()]);
        let registry = Arc::new(
            GateRegistry::new(Duration::from_secs(60))
                .with_source(ETHEREUM, source.clone())
                .with_source(ARBITRUM, source.clone()),
        );
        let prices = Arc::new(PriceBook::new().with_oracle(ETHEREUM, Arc::new(FlatOracle)));
        let balances = Arc::new(BalanceBook::new());
        let invalidator = CacheInvalidator::new(registry.clone(), prices.clone(), balances);

        registry.vaults(ETHEREUM, false).await.unwrap();
        registry.vaults(ARBITRUM, false).await.unwrap();
        let version = registry.version(ETHEREUM).await;
        prices.load(ETHEREUM, &[vault()]).await;

        invalidator.apply(&SessionEvent::ChainChanged { from: ETHEREUM, to: ARBITRUM }).await;

        assert_eq!(registry.version(ETHEREUM).await, version + 1);
        registry.vaults(ARBITRUM, false).await.unwrap();
        assert_eq!(source.loads(), 2);
        registry.vaults(ETHEREUM, false).await.unwrap();
        assert_eq!(source.loads(), 3);

        // vault-derived price gone, oracle answers instead
        assert_eq!(prices.price(ETHEREUM, addr(0x13)).await, dec("2"));
    }

    #[tokio::test]
    async fn test_spawned_invalidator_follows_session() {
        let balances = Arc::new(BalanceBook::new().with_reader(ETHEREUM, Arc::new(OneEverywhere)));
        let registry = Arc::new(GateRegistry::new(Duration::from_secs(60)));
        let session = Session::new(ETHEREUM);
        let handle = CacheInvalidator::new(registry, Arc::new(PriceBook::new()), balances.clone())
            .spawn(session.subscribe());

        balances.load(ETHEREUM, addr(0xee), &[vault()]).await.unwrap();
        assert!(session.connect(addr(0xee)));

        for _ in 0..50 {
            if balances.get(ETHEREUM, addr(0xee), addr(0x11)).await.is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(balances.get(ETHEREUM, addr(0xee), addr(0x11)).await.is_none());

        drop(session);
        handle.await.unwrap();
    }
}
