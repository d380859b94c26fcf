//! Dispatch a candle table to the enabled backtest engines

use crate::backtest::stats::format_timestamp;
use crate::backtest::{
    Backtest, BacktestNode, BacktestSettings, BarSeries, BarType, Instrument, NodeResult, Stats,
    VenueConfig,
};
use crate::config::Config;
use crate::convert::{to_bars, to_indexed_frame};
use crate::data::CandleTable;
use crate::optimize::{log_best_trials, Direction, SmaSearchSpace, Study};
use crate::storage::table_to_batch;
use crate::strategy::{
    BarStrategy, EmaCross, EmaCrossConfig, SmaCross, SmaCrossNode, SmaCrossNodeConfig,
    SmaCrossParams, Strategy,
};
use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const EQUITY_CSV: &str = "bt-equity.csv";
pub const TRADES_CSV: &str = "bt-trades.csv";

/// Run every engine the switches enable
pub fn run(config: &Config, table: &CandleTable, optimize_trials: usize) -> Result<()> {
    if config.switches.simple_bar_backtest {
        run_bar_backtest(config, table, optimize_trials)?;
    } else {
        info!("Simple bar backtest is disabled in config.");
    }
    if config.switches.simple_node_backtest {
        let result = run_node_backtest(config, table)?;
        print_node_result(&result);
    }
    Ok(())
}

pub fn bar_series(table: &CandleTable) -> Result<BarSeries> {
    let frame = to_indexed_frame(&table_to_batch(table)?)?;
    BarSeries::from_frame(&frame)
}

/// Parameter search when `optimize_trials > 0`, otherwise one run with
/// printed stats and CSV exports
pub fn run_bar_backtest(config: &Config, table: &CandleTable, optimize_trials: usize) -> Result<()> {
    let series = bar_series(table)?;
    let settings = BacktestSettings::from(&config.backtest);

    if optimize_trials > 0 {
        info!("Running SMA cross optimization: {} trials", optimize_trials);
        let study = optimize_sma_cross(config, &series, settings, optimize_trials)?;
        log_best_trials(&study);
        return Ok(());
    }

    info!("Running simple SMA cross backtest with {} candles", series.len());
    let params = SmaCrossParams {
        n_short: config.backtest.n_short,
        n_long: config.backtest.n_long,
    };
    let stats = run_sma_cross(&series, settings, params)?;

    print_header("SMA CROSS BACKTEST");
    println!("{}", stats);
    print_footer();

    let dir = config.root_path.join(&config.results_dir);
    export_equity_csv(&stats, &dir.join(EQUITY_CSV))?;
    export_trades_csv(&stats, &dir.join(TRADES_CSV))?;
    info!("Exported equity curve and trades to {}", dir.display());
    Ok(())
}

pub fn run_sma_cross(series: &BarSeries, settings: BacktestSettings, params: SmaCrossParams) -> Result<Stats> {
    let backtest = Backtest::new(series, settings)?;
    let mut strategy = SmaCross::new(params);
    let label = format!(
        "{}(n_short={},n_long={})",
        strategy.name(),
        params.n_short,
        params.n_long
    );
    Ok(backtest.run(&mut strategy, &label))
}

/// Maximise `(Return [%], Sharpe Ratio)` over the configured window ranges
pub fn optimize_sma_cross(
    config: &Config,
    series: &BarSeries,
    settings: BacktestSettings,
    trials: usize,
) -> Result<Study> {
    let opt = &config.optimize;
    let space = SmaSearchSpace {
        n_short_min: opt.n_short_min,
        n_short_max: opt.n_short_max,
        n_long_max: opt.n_long_max,
    };

    info!("Starting study '{}' with {} trials", opt.study_name, trials);
    let mut study = Study::new(
        &opt.study_name,
        vec![Direction::Maximize, Direction::Maximize],
        opt.seed,
    );
    study.optimize(trials, |ctx| {
        let (n_short, n_long) = space.suggest(ctx)?;
        let stats = run_sma_cross(series, settings, SmaCrossParams { n_short, n_long })?;
        Ok(vec![stats.return_pct, stats.sharpe_ratio])
    });
    info!("Study completed: trials={}", study.trials().len());
    Ok(study)
}

fn node_strategies(config: &Config) -> Result<Vec<Box<dyn BarStrategy>>> {
    let node = &config.node;
    let trade_size = Decimal::try_from(node.trade_size).context("node.trade_size is not a valid decimal")?;

    let mut strategies: Vec<Box<dyn BarStrategy>> = Vec::new();
    if node.include_ema_example {
        strategies.push(Box::new(EmaCross::new(EmaCrossConfig {
            order_id_tag: format!("{:03}", strategies.len()),
            fast_period: node.fast_period,
            slow_period: node.slow_period,
            trade_size,
        })));
    }
    if node.include_local_sma {
        strategies.push(Box::new(SmaCrossNode::new(SmaCrossNodeConfig {
            order_id_tag: format!("{:03}", strategies.len()),
            fast_period: node.fast_period,
            slow_period: node.slow_period,
            trade_size,
        })));
    }
    if strategies.is_empty() {
        return Err(anyhow!("No strategies selected."));
    }
    Ok(strategies)
}

pub fn run_node_backtest(config: &Config, table: &CandleTable) -> Result<NodeResult> {
    let timeframe = config.timeframe()?;
    let instrument = Instrument::btcusdt_binance();
    let bar_type = BarType::last_external(instrument.id.clone(), timeframe);

    let strategies = node_strategies(config)?;
    let bars = to_bars(&table_to_batch(table)?, &instrument, timeframe)?;
    info!("Prepared {} bars for {}", bars.len(), bar_type);

    let venue = VenueConfig {
        starting_base: Decimal::try_from(config.node.starting_base)
            .context("node.starting_base is not a valid decimal")?,
        starting_quote: Decimal::try_from(config.node.starting_quote)
            .context("node.starting_quote is not a valid decimal")?,
        ..VenueConfig::default()
    };

    let mut node = BacktestNode::new(instrument, bar_type, venue);
    for strategy in strategies {
        node.add_strategy(strategy);
    }
    node.run(&bars)
}

fn print_header(title: &str) {
    println!();
    println!("\x1b[1;36m{}\x1b[0m", "═".repeat(56));
    println!("\x1b[1;36m         {}\x1b[0m", title);
    println!("\x1b[1;36m{}\x1b[0m", "═".repeat(56));
}

fn print_footer() {
    println!("\x1b[1;36m{}\x1b[0m", "═".repeat(56));
}

pub fn print_node_result(result: &NodeResult) {
    print_header("NODE BACKTEST RESULTS");
    println!("{}", result);
    print_footer();
}

fn create_csv(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn export_equity_csv(stats: &Stats, path: &Path) -> Result<PathBuf> {
    let mut file = create_csv(path)?;
    writeln!(file, "timestamp,equity,drawdown_pct")?;
    for point in &stats.equity_curve {
        writeln!(
            file,
            "{},{:.2},{:.4}",
            format_timestamp(point.ts),
            point.equity,
            point.drawdown * 100.0
        )?;
    }
    file.flush()?;
    Ok(path.to_path_buf())
}

pub fn export_trades_csv(stats: &Stats, path: &Path) -> Result<PathBuf> {
    let mut file = create_csv(path)?;
    writeln!(
        file,
        "entry_time,exit_time,size,entry_price,exit_price,commission,pnl,return_pct"
    )?;
    for t in &stats.trades {
        writeln!(
            file,
            "{},{},{},{:.2},{:.2},{:.2},{:.2},{:.4}",
            format_timestamp(t.entry_time),
            format_timestamp(t.exit_time),
            t.size,
            t.entry_price,
            t.exit_price,
            t.commission,
            t.pnl,
            t.return_pct * 100.0
        )?;
    }
    file.flush()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Candle, CandleLayout};
    use tempfile::tempdir;

    /// Hourly candles tracing a slow sine wave
    fn wave_table(n: usize) -> CandleTable {
        let rows = (0..n)
            .map(|i| {
                let p = 50_000.0 + 5_000.0 * (i as f64 / 20.0).sin();
                Candle::ohlcv(i as i64 * 3_600_000, p, p + 50.0, p - 50.0, p + 10.0, 12.0)
            })
            .collect();
        CandleTable::from_rows(CandleLayout::Ohlcv, rows).unwrap()
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config {
            root_path: root.to_path_buf(),
            ..Config::default()
        };
        config.backtest.n_short = 5;
        config.backtest.n_long = 20;
        config.node.fast_period = 5;
        config.node.slow_period = 20;
        config
    }

    #[test]
    fn test_bar_backtest_writes_results() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        run_bar_backtest(&config, &wave_table(400), 0).unwrap();

        let equity = fs::read_to_string(dir.path().join("results").join(EQUITY_CSV)).unwrap();
        assert_eq!(equity.lines().count(), 401);
        assert!(equity.starts_with("timestamp,equity,drawdown_pct"));

        let trades = fs::read_to_string(dir.path().join("results").join(TRADES_CSV)).unwrap();
        assert!(trades.lines().count() > 1);
    }

    #[test]
    fn test_sma_cross_trades_on_wave() {
        let series = bar_series(&wave_table(400)).unwrap();
        let stats = run_sma_cross(
            &series,
            BacktestSettings::default(),
            SmaCrossParams { n_short: 5, n_long: 20 },
        )
        .unwrap();

        assert!(stats.trades_count >= 2);
        assert_eq!(stats.strategy, "SmaCross(n_short=5,n_long=20)");
        assert!(stats.trades.iter().all(|t| t.exit_bar >= t.entry_bar));
    }

    #[test]
    fn test_optimization_runs_all_trials() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.optimize.seed = Some(3);
        config.optimize.n_short_max = 10;
        config.optimize.n_long_max = 40;
        let series = bar_series(&wave_table(400)).unwrap();

        let study = optimize_sma_cross(&config, &series, BacktestSettings::default(), 8).unwrap();
        assert_eq!(study.trials().len(), 8);
        assert!(!study.best_trials().is_empty());
    }

    #[test]
    fn test_node_backtest_runs_both_strategies() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let result = run_node_backtest(&config, &wave_table(400)).unwrap();
        assert_eq!(result.strategies.len(), 2);
        assert_eq!(result.strategies[0].strategy_id, "EMACross-000");
        assert_eq!(result.strategies[1].strategy_id, "SmaCross-001");
        assert_eq!(result.iterations, 400);
        assert!(result.total_orders() > 0);
        assert_eq!(result.bar_type, "BTCUSDT.BINANCE-1-HOUR-LAST-EXTERNAL");
    }

    #[test]
    fn test_node_without_strategies_fails() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.node.include_ema_example = false;
        config.node.include_local_sma = false;

        let err = run_node_backtest(&config, &wave_table(50)).unwrap_err();
        assert_eq!(err.to_string(), "No strategies selected.");
    }
}
