//! pairtrader CLI: run the bot, evaluate a single cycle, backtest, manage the ledger.
//!
//! Commands:
//! - `run`: scheduler loop from a TOML config
//! - `once`: one cycle that may trade, then print the report
//! - `decide`: evaluate without submitting or recording anything
//! - `backtest`: replay candle history through the decision rules
//! - `seed`: write the bootstrap anchor trade to an empty ledger
//! - `ledger show` / `ledger summary`: inspect a ledger file

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use pairtrader_core::engine::Action;
use pairtrader_core::ledger::{CsvLedger, TradeLedger};
use pairtrader_core::provider::load_candles;
use pairtrader_runner::{
    build_trader, export_round_trips, init_logging, run_backtest, run_loop, seed_ledger,
    BacktestSettings, BotConfig, CycleMode, CycleReport, ExecutionOutcome, Holding, LedgerSummary,
};

#[derive(Parser)]
#[command(name = "pairtrader", about = "pairtrader: single-pair spot conversion bot")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run decision cycles on a schedule until max_cycles is reached.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run one cycle, executing any resulting order.
    Once {
        #[arg(long)]
        config: PathBuf,

        /// Print the full report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Evaluate one cycle without submitting orders or touching the ledger.
    Decide {
        #[arg(long)]
        config: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Replay candle history through the decision rules on a paper account.
    Backtest {
        #[arg(long)]
        config: PathBuf,

        /// Candle CSV; defaults to exchange.replay_file.
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Asset the simulation starts in.
        #[arg(long, value_enum, default_value = "quote")]
        holding: HoldingArg,

        /// Starting amount, in units of the held asset.
        #[arg(long)]
        amount: f64,

        /// Write favorable round trips to this CSV.
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Record the bootstrap position in an empty ledger.
    Seed {
        /// Ledger CSV file.
        #[arg(long)]
        ledger: PathBuf,

        /// Asset currently held.
        #[arg(long, value_enum)]
        holding: HoldingArg,

        /// Amount held, in units of the held asset.
        #[arg(long)]
        amount: f64,

        /// Reference price (quote per base) the position was acquired at.
        #[arg(long)]
        price: f64,
    },
    /// Ledger inspection commands.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Print every trade.
    Show {
        #[arg(long)]
        ledger: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print counts, time span, and growth between comparable anchors.
    Summary {
        #[arg(long)]
        ledger: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HoldingArg {
    Base,
    Quote,
}

impl From<HoldingArg> for Holding {
    fn from(h: HoldingArg) -> Self {
        match h {
            HoldingArg::Base => Holding::Base,
            HoldingArg::Quote => Holding::Quote,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json).context("failed to initialise logging")?;

    match cli.command {
        Commands::Run { config } => run_scheduler(&config),
        Commands::Once { config, json } => run_once(&config, CycleMode::Execute, json),
        Commands::Decide { config, json } => run_once(&config, CycleMode::DryRun, json),
        Commands::Backtest {
            config,
            candles,
            holding,
            amount,
            out,
            json,
        } => run_backtest_command(
            &config,
            candles.as_deref(),
            BacktestSettings {
                holding: holding.into(),
                amount,
            },
            out.as_deref(),
            json,
        ),
        Commands::Seed {
            ledger,
            holding,
            amount,
            price,
        } => run_seed(&ledger, holding.into(), amount, price),
        Commands::Ledger { action } => match action {
            LedgerAction::Show { ledger, json } => run_ledger_show(&ledger, json),
            LedgerAction::Summary { ledger } => run_ledger_summary(&ledger),
        },
    }
}

fn load_config(path: &Path) -> Result<BotConfig> {
    BotConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn run_scheduler(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let trader = build_trader(&config).context("building trader")?;
    let stop = AtomicBool::new(false);

    let summary = run_loop(&trader, &config.schedule, &stop);
    println!(
        "cycles: {}  fills: {}  unhealthy: {}  failed: {}",
        summary.cycles, summary.fills, summary.unhealthy_cycles, summary.failed_cycles
    );
    if summary.cycles > 0 && summary.failed_cycles == summary.cycles {
        bail!("every cycle failed; check the ledger at {}", config.paths.ledger.display());
    }
    Ok(())
}

fn run_once(config_path: &Path, mode: CycleMode, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let trader = build_trader(&config).context("building trader")?;
    let report = trader.run_cycle(Utc::now(), mode)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("=== Cycle {} ===", report.timestamp.to_rfc3339());
    match &report.snapshot {
        Some(s) => println!(
            "Price:    {:.8}  free {} {:.8}  free {} {:.8}",
            s.last_price,
            s.pair.base(),
            s.free_base,
            s.pair.quote(),
            s.free_quote
        ),
        None => println!("Price:    unavailable"),
    }
    match &report.anchor {
        Some(t) => println!(
            "Anchor:   {} {:.8} @ {:.8} ({})",
            t.side,
            t.base_amount,
            t.average_price,
            t.timestamp.to_rfc3339()
        ),
        None => println!("Anchor:   none (seed the ledger first)"),
    }
    match &report.forecast {
        Some(f) => println!("Forecast: {:.8} .. {:.8}", f.low_pred, f.high_pred),
        None => println!("Forecast: none"),
    }
    match &report.decision {
        Some(d) => {
            let action = match d.action {
                Action::Hold => "HOLD".to_string(),
                Action::Buy { base_amount } => format!("BUY {base_amount:.8}"),
                Action::Sell { base_amount } => format!("SELL {base_amount:.8}"),
            };
            println!("Decision: {action} ({:?})", d.branch);
        }
        None => println!("Decision: HOLD (no snapshot)"),
    }
    match &report.execution {
        ExecutionOutcome::NotAttempted => {}
        ExecutionOutcome::DryRun => println!("Order:    not submitted (dry run)"),
        ExecutionOutcome::Filled { trade } => println!(
            "Order:    filled {} {:.8} @ {:.8}",
            trade.side, trade.base_amount, trade.average_price
        ),
        ExecutionOutcome::Rejected { reason } => println!("Order:    rejected: {reason}"),
        ExecutionOutcome::Failed { reason } => println!("Order:    failed: {reason}"),
    }
    for f in &report.failures {
        println!("Failure:  {:?}: {}", f.collaborator, f.error);
    }
}

fn run_backtest_command(
    config_path: &Path,
    candles: Option<&Path>,
    settings: BacktestSettings,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let candles_path = candles
        .or(config.exchange.replay_file.as_deref())
        .context("no candle file: pass --candles or set exchange.replay_file")?;
    let candles = load_candles(candles_path)
        .with_context(|| format!("loading candles {}", candles_path.display()))?;
    let report = run_backtest(&config, &candles, settings).context("running backtest")?;

    if let Some(out) = out {
        export_round_trips(out, report.favorable())?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let unit = match settings.holding {
        Holding::Quote => config.pair.symbol.quote().to_string(),
        Holding::Base => config.pair.symbol.base().to_string(),
    };
    println!("=== Backtest ===");
    println!("Candles:       {} ({} .. {})", report.candles, report.first.to_rfc3339(), report.last.to_rfc3339());
    println!("Start:         {:.8} {unit}", settings.amount);
    println!("Fills:         {}", report.fills.len());
    println!(
        "Round trips:   {} ({} favorable)",
        report.round_trips.len(),
        report.favorable().count()
    );
    for trip in &report.round_trips {
        println!(
            "  {} -> {}  {:.8} -> {:.8} {unit}  {:+.4}%{}",
            trip.opened.timestamp.to_rfc3339(),
            trip.closed.timestamp.to_rfc3339(),
            trip.amount_in,
            trip.amount_out,
            trip.gain() * 100.0,
            if trip.favorable { "  *" } else { "" }
        );
    }
    println!("Final value:   {:.8} {unit} ({:+.4}%)", report.final_value(), report.growth() * 100.0);
    if let Some(out) = out {
        println!("Favorable trips written to {}", out.display());
    }
    Ok(())
}

fn run_seed(ledger_path: &Path, holding: Holding, amount: f64, price: f64) -> Result<()> {
    let ledger = CsvLedger::new(ledger_path);
    let trade = seed_ledger(&ledger, holding, amount, price, Utc::now())
        .with_context(|| format!("seeding {}", ledger_path.display()))?;
    println!(
        "Seeded {}: {} {:.8} base / {:.8} quote @ {:.8}",
        ledger_path.display(),
        trade.side,
        trade.base_amount,
        trade.quote_amount,
        trade.average_price
    );
    Ok(())
}

fn run_ledger_show(ledger_path: &Path, json: bool) -> Result<()> {
    let ledger = CsvLedger::new(ledger_path);
    let mut any = false;
    for trade in ledger.all()? {
        let trade = trade.with_context(|| format!("reading {}", ledger_path.display()))?;
        any = true;
        if json {
            println!("{}", serde_json::to_string(&trade)?);
        } else {
            println!(
                "{}  {:<4}  base {:>16.8}  quote {:>16.8}  @ {:.8}  {:?}",
                trade.timestamp.to_rfc3339(),
                trade.side,
                trade.base_amount,
                trade.quote_amount,
                trade.average_price,
                trade.status
            );
        }
    }
    if !any && !json {
        println!("Ledger is empty: {}", ledger_path.display());
    }
    Ok(())
}

fn run_ledger_summary(ledger_path: &Path) -> Result<()> {
    let ledger = CsvLedger::new(ledger_path);
    let s = LedgerSummary::from_ledger(&ledger)
        .with_context(|| format!("reading {}", ledger_path.display()))?;

    println!("=== Ledger Summary ===");
    println!("File:          {}", ledger_path.display());
    println!("Trades:        {}", s.trades);
    println!("Buys:          {}", s.buys);
    println!("Sells:         {}", s.sells);
    println!("Rejected:      {}", s.rejected);
    if let (Some(first), Some(last)) = (s.first, s.last) {
        println!("First:         {}", first.to_rfc3339());
        println!("Last:          {}", last.to_rfc3339());
    }
    match s.quote_growth {
        Some(g) => println!("Quote growth:  {:.4}%", g * 100.0),
        None => println!("Quote growth:  n/a"),
    }
    match s.base_growth {
        Some(g) => println!("Base growth:   {:.4}%", g * 100.0),
        None => println!("Base growth:   n/a"),
    }
    Ok(())
}
