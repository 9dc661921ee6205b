//! PYT Router CLI
//!
//! Run with: cargo run -- quote DAI xPYT-yvDAI 1000
//!
//! Reads configuration from the environment / `.env` unless `--config`
//! points at a TOML file.

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pyt_router::amounts;
use pyt_router::executor::gate::{burn_preview, mint_preview};
use pyt_router::executor::{ClaimMode, Denomination, GateAction, TxOutcome};
use pyt_router::trade::QuoteSummary;
use pyt_router::Vault;
use pyt_router::{App, Config};

#[derive(Parser)]
#[command(name = "pyt-router", version, about = "Quote and trade yield-split vault tokens")]
struct Cli {
    /// TOML configuration file (defaults to environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured chain id
    #[arg(long, global = true)]
    chain: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Quote a trade, optionally executing it
    Quote {
        /// Token to sell (symbol or address)
        from: String,
        /// Token to buy (symbol or address)
        to: String,
        amount: String,
        #[arg(long)]
        slippage_bps: Option<u32>,
        /// Sign and submit the trade
        #[arg(long)]
        execute: bool,
        /// Print the quote as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deposit underlying (or vault shares) through the gate for PYT + NYT
    Mint {
        /// Vault share token (symbol or address)
        vault: String,
        amount: String,
        /// Deposit vault shares instead of underlying
        #[arg(long)]
        shares: bool,
        /// Receive the PYT side wrapped in this xPYT (symbol or address)
        #[arg(long)]
        xpyt: Option<String>,
    },
    /// Burn equal PYT (or xPYT) and NYT back into the deposit
    Burn {
        vault: String,
        /// NYT to burn
        amount: String,
        /// Withdraw vault shares instead of underlying
        #[arg(long)]
        shares: bool,
        /// Burn this xPYT instead of raw PYT
        #[arg(long)]
        xpyt: Option<String>,
    },
    /// Claim accrued yield
    Claim {
        vault: String,
        #[arg(long, conflicts_with = "reinvest")]
        shares: bool,
        /// Mint PYT + NYT from the yield instead of withdrawing it
        #[arg(long)]
        reinvest: bool,
    },
    /// List vaults and their tokens
    Vaults {
        #[arg(long)]
        refresh: bool,
    },
    /// USD prices of every vault token
    Prices,
    /// TVL per vault with day/week/month change
    Analytics,
    /// 14-day APY and xPYT leverage per vault
    Apy,
    /// Token balances of an account (defaults to the signer)
    Balances { account: Option<Address> },
    /// Show the effective configuration
    Config {
        /// Write it to a TOML file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🧮 PYT ROUTER - Yield Token Trade Quoting").cyan().bold()
    );
    println!(
        "{}",
        style("    Underlying | PYT | NYT | xPYT").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn pct(change: &Option<BigDecimal>) -> String {
    match change {
        Some(value) => format!("{}%", amounts::display_amount(value, 2)),
        None => "n/a".to_string(),
    }
}

fn denomination(shares: bool) -> Denomination {
    if shares {
        Denomination::VaultShares
    } else {
        Denomination::Underlying
    }
}

/// Resolve `--xpyt` against the vault's wrappers
fn pick_xpyt(vault: &Vault, query: Option<&str>) -> Result<Option<Address>> {
    let Some(query) = query else {
        return Ok(None);
    };
    let found = match query.parse::<Address>() {
        Ok(address) => vault.xpyt_by_address(address),
        Err(_) => vault.xpyt.iter().find(|x| x.token.symbol.eq_ignore_ascii_case(query)),
    };
    found
        .map(|x| Some(x.address()))
        .ok_or_else(|| eyre!("{} is not an xPYT of {}", query, vault.label()))
}

fn report(outcome: &TxOutcome) {
    info!("Gate outcome: {:?}", outcome);
    println!("{}", style(format!("{:?}", outcome)).green());
}

async fn run(app: &App, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Quote { from, to, amount, slippage_bps, execute, json } => {
            let amount = BigDecimal::from_str(&amount).map_err(|e| eyre!("Invalid amount {}: {}", amount, e))?;
            let bar = spinner("Loading vaults...")?;
            let from = app.find_token(&from).await?;
            let to = app.find_token(&to).await?;
            bar.set_message(format!("Quoting {} {} -> {}...", amount, from.symbol, to.symbol));
            let quote = app.quote(from, to, amount, slippage_bps).await;
            bar.finish_and_clear();
            let quote = quote?;

            let summary = QuoteSummary::from(&quote);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", style(format!("{} -> {} ({})", summary.from, summary.to, summary.plan)).bold());
                println!("  Amount in:        {}", summary.amount_in);
                println!("  Expected out:     {}", summary.amount_out);
                println!("  Minimum out:      {}", summary.min_amount_out);
                println!("  Execution price:  {}", summary.execution_price);
                println!("  Price impact:     {}%", summary.price_impact_pct);
            }

            if execute {
                let outcome = app.execute(&quote).await?;
                info!("Trade outcome: {:?}", outcome);
                println!("{}", style(format!("{:?}", outcome)).green());
            }
        }
        Command::Mint { vault, amount, shares, xpyt } => {
            let amount = amounts::parse_amount(&amount)?;
            let vault = app.find_vault(&vault).await?;
            let xpyt = pick_xpyt(&vault, xpyt.as_deref())?;
            let wrapper = xpyt.and_then(|x| vault.xpyt_by_address(x));
            let preview = mint_preview(&vault, denomination(shares), wrapper, &amount);
            println!("{}", style(format!("Mint into {}", vault.label())).bold());
            println!("  NYT received:     {}", amounts::display_amount(&preview.nyt, 6));
            println!("  {} received: {}", if wrapper.is_some() { "xPYT" } else { "PYT " }, amounts::display_amount(&preview.pyt, 6));

            let action = GateAction::Mint { denomination: denomination(shares), xpyt, amount };
            report(&app.gate_execute(&vault, &action).await?);
        }
        Command::Burn { vault, amount, shares, xpyt } => {
            let nyt_amount = amounts::parse_amount(&amount)?;
            let vault = app.find_vault(&vault).await?;
            let xpyt = pick_xpyt(&vault, xpyt.as_deref())?;
            let wrapper = xpyt.and_then(|x| vault.xpyt_by_address(x));
            let preview = burn_preview(&vault, denomination(shares), wrapper, &nyt_amount)?;
            println!("{}", style(format!("Burn from {}", vault.label())).bold());
            println!("  {} burned:   {}", if wrapper.is_some() { "xPYT" } else { "PYT " }, amounts::display_amount(&preview.pyt, 6));
            println!("  NYT burned:       {}", amounts::display_amount(&preview.nyt, 6));
            println!("  Received:         {}", amounts::display_amount(&preview.received, 6));

            let action = GateAction::Burn { denomination: denomination(shares), xpyt, nyt_amount };
            report(&app.gate_execute(&vault, &action).await?);
        }
        Command::Claim { vault, shares, reinvest } => {
            let vault = app.find_vault(&vault).await?;
            let claimable = app.claimable_yield(&vault).await?;
            println!("  Claimable yield:  {}", amounts::display_amount(&claimable, 6));
            if claimable <= BigDecimal::default() {
                println!("{}", style("Nothing to claim").yellow());
                return Ok(());
            }

            let mode = match (shares, reinvest) {
                (_, true) => ClaimMode::Reinvest,
                (true, false) => ClaimMode::VaultShares,
                (false, false) => ClaimMode::Underlying,
            };
            report(&app.gate_execute(&vault, &GateAction::Claim(mode)).await?);
        }
        Command::Vaults { refresh } => {
            let bar = spinner("Loading vaults...")?;
            let vaults = app.vaults(refresh).await;
            bar.finish_and_clear();
            for vault in vaults? {
                let gate = app.gate_name(&vault).await?.unwrap_or("unknown gate");
                println!("{} {}", style(vault.label()).bold(), style(format!("[{}]", gate)).dim());
                for token in vault.tokens() {
                    println!("  {:<12} {}", token.symbol, token.address);
                }
            }
        }
        Command::Prices => {
            let bar = spinner("Pricing vault tokens...")?;
            let prices = app.prices().await;
            bar.finish_and_clear();
            for (token, price) in prices? {
                println!("  {:<12} ${}", token.symbol, amounts::display_amount(&price, 6));
            }
        }
        Command::Analytics => {
            let bar = spinner("Loading TVL...")?;
            let report = app.tvl().await;
            bar.finish_and_clear();
            let report = report?;
            println!("{:<14} {:>16} {:>10} {:>10} {:>10}", "Vault", "TVL (USD)", "1d", "7d", "30d");
            for vault in &report.vaults {
                println!(
                    "{:<14} {:>16} {:>10} {:>10} {:>10}",
                    vault.symbol,
                    amounts::display_amount(&vault.tvl, 2),
                    pct(&vault.day_change),
                    pct(&vault.week_change),
                    pct(&vault.month_change),
                );
            }
            println!("{}", style(format!("Total: ${}", amounts::display_amount(&report.total, 2))).bold());
        }
        Command::Apy => {
            let bar = spinner("Loading APY...")?;
            let apys = app.apy().await;
            bar.finish_and_clear();
            for vault in apys? {
                let apy = vault
                    .apy
                    .map(|a| format!("{}%", amounts::display_amount(&(a * BigDecimal::from(100)), 2)))
                    .unwrap_or_else(|| "new vault".to_string());
                let leverage = vault
                    .leverage
                    .map(|l| format!("{}x", amounts::display_amount(&l, 2)))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("  {}  APY {:<12} leverage {}", vault.share, apy, leverage);
            }
        }
        Command::Balances { account } => {
            let owner = account
                .or_else(|| app.account())
                .ok_or_else(|| eyre!("No account given and no signer configured"))?;
            let bar = spinner("Reading balances...")?;
            let balances = app.balances(owner).await;
            bar.finish_and_clear();
            for (token, amount) in balances? {
                println!("  {:<12} {}", token.symbol, amounts::display_amount(&amount, 6));
            }
        }
        Command::Config { save } => {
            config.print_summary();
            if let Some(path) = save {
                config.save_to_file(&path)?;
                println!("Saved to {}", path.display());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(chain_id) = cli.chain {
        config.chain_id = chain_id;
    }

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    print_banner();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file");
        return Err(e);
    }

    let app = App::new(config.clone())?;
    run(&app, &config, cli.command).await
}
