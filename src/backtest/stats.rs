//! Performance statistics for the bar-series engine

use super::engine::Trade;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

const DAY_MS: i64 = 86_400_000;
/// Crypto trades every calendar day
const ANNUAL_TRADING_DAYS: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub ts: i64,
    pub equity: f64,
    /// Fraction below the running peak, `0.0..=1.0`
    pub drawdown: f64,
}

/// Summary of one bar-series backtest
#[derive(Debug, Clone)]
pub struct Stats {
    pub start: i64,
    pub end: i64,
    pub duration: Duration,
    pub exposure_time_pct: f64,
    pub equity_final: f64,
    pub equity_peak: f64,
    pub return_pct: f64,
    pub buy_hold_return_pct: f64,
    pub return_ann_pct: f64,
    pub volatility_ann_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Negative percentage, as reported by most bar-replay libraries
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration: Duration,
    pub trades_count: usize,
    pub win_rate_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub avg_trade_pct: f64,
    pub profit_factor: f64,
    pub expectancy_pct: f64,
    pub strategy: String,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
}

/// `exp(mean(ln(1 + r))) - 1`; zero when any period lost everything
pub fn geometric_mean(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    if returns.iter().any(|r| 1.0 + r <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = returns.iter().map(|r| (1.0 + r).ln()).sum();
    (log_sum / returns.len() as f64).exp() - 1.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Last equity of each UTC day, then day-over-day returns
fn daily_returns(index: &[i64], equity: &[f64]) -> Vec<f64> {
    let mut closes: Vec<f64> = Vec::new();
    let mut current_day = None;
    for (ts, eq) in index.iter().zip(equity) {
        let day = ts.div_euclid(DAY_MS);
        if current_day == Some(day) {
            if let Some(last) = closes.last_mut() {
                *last = *eq;
            }
        } else {
            closes.push(*eq);
            current_day = Some(day);
        }
    }
    closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || denominator.is_nan() {
        f64::NAN
    } else {
        numerator / denominator
    }
}

/// Drawdown series plus the longest peak-to-recovery span
fn drawdowns(index: &[i64], equity: &[f64]) -> (Vec<f64>, Duration) {
    let mut dd = Vec::with_capacity(equity.len());
    let mut peak = f64::MIN;
    let mut peak_ts = index.first().copied().unwrap_or(0);
    let mut in_drawdown = false;
    let mut longest = 0i64;

    for (ts, eq) in index.iter().zip(equity) {
        if *eq >= peak {
            if in_drawdown {
                longest = longest.max(ts - peak_ts);
                in_drawdown = false;
            }
            peak = *eq;
            peak_ts = *ts;
            dd.push(0.0);
        } else {
            in_drawdown = true;
            dd.push(1.0 - eq / peak);
        }
    }
    if in_drawdown {
        if let Some(last) = index.last() {
            longest = longest.max(last - peak_ts);
        }
    }
    (dd, Duration::milliseconds(longest))
}

pub fn compute_stats(
    index: &[i64],
    closes: &[f64],
    equity: &[f64],
    trades: Vec<Trade>,
    strategy: String,
) -> Stats {
    let start = index.first().copied().unwrap_or(0);
    let end = index.last().copied().unwrap_or(0);
    let initial = equity.first().copied().unwrap_or(f64::NAN);
    let equity_final = equity.last().copied().unwrap_or(f64::NAN);
    let equity_peak = equity.iter().copied().fold(f64::NAN, f64::max);

    let mut have_position = vec![false; index.len()];
    for t in &trades {
        for slot in have_position.iter_mut().take(t.exit_bar + 1).skip(t.entry_bar) {
            *slot = true;
        }
    }
    let exposure_time_pct = if index.is_empty() {
        f64::NAN
    } else {
        have_position.iter().filter(|h| **h).count() as f64 / index.len() as f64 * 100.0
    };

    let (dd, max_drawdown_duration) = drawdowns(index, equity);
    let max_dd = dd.iter().copied().fold(0.0, f64::max);

    let day_returns = daily_returns(index, equity);
    let gmean_day = geometric_mean(&day_returns);
    let annual_return = (1.0 + gmean_day).powf(ANNUAL_TRADING_DAYS) - 1.0;
    let annual_volatility = ((sample_variance(&day_returns) + (1.0 + gmean_day).powi(2))
        .powf(ANNUAL_TRADING_DAYS)
        - (1.0 + gmean_day).powf(2.0 * ANNUAL_TRADING_DAYS))
    .sqrt();
    let downside = (mean(
        &day_returns
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .collect::<Vec<_>>(),
    ))
    .sqrt()
        * ANNUAL_TRADING_DAYS.sqrt();

    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).sum::<f64>().abs();
    // Undefined without a losing trade
    let profit_factor = ratio(gains, losses);

    let equity_curve = index
        .iter()
        .zip(equity)
        .zip(&dd)
        .map(|((ts, eq), d)| EquityPoint {
            ts: *ts,
            equity: *eq,
            drawdown: *d,
        })
        .collect();

    Stats {
        start,
        end,
        duration: Duration::milliseconds(end - start),
        exposure_time_pct,
        equity_final,
        equity_peak,
        return_pct: (equity_final - initial) / initial * 100.0,
        buy_hold_return_pct: match (closes.first(), closes.last()) {
            (Some(first), Some(last)) => (last - first) / first * 100.0,
            _ => f64::NAN,
        },
        return_ann_pct: annual_return * 100.0,
        volatility_ann_pct: annual_volatility * 100.0,
        sharpe_ratio: ratio(annual_return, annual_volatility),
        sortino_ratio: ratio(annual_return, downside),
        max_drawdown_pct: -max_dd * 100.0,
        max_drawdown_duration,
        trades_count: trades.len(),
        win_rate_pct: if trades.is_empty() {
            f64::NAN
        } else {
            wins as f64 / trades.len() as f64 * 100.0
        },
        best_trade_pct: returns.iter().copied().fold(f64::NAN, f64::max) * 100.0,
        worst_trade_pct: returns.iter().copied().fold(f64::NAN, f64::min) * 100.0,
        avg_trade_pct: geometric_mean(&returns) * 100.0,
        profit_factor,
        expectancy_pct: mean(&returns) * 100.0,
        strategy,
        equity_curve,
        trades,
    }
}

pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.num_seconds();
    format!(
        "{} days {:02}:{:02}:{:02}",
        total_secs / 86_400,
        (total_secs % 86_400) / 3_600,
        (total_secs % 3_600) / 60,
        total_secs % 60
    )
}

fn fmt_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:.6}", value)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: [(&str, String); 22] = [
            ("Start", format_timestamp(self.start)),
            ("End", format_timestamp(self.end)),
            ("Duration", format_duration(self.duration)),
            ("Exposure Time [%]", fmt_float(self.exposure_time_pct)),
            ("Equity Final [$]", fmt_float(self.equity_final)),
            ("Equity Peak [$]", fmt_float(self.equity_peak)),
            ("Return [%]", fmt_float(self.return_pct)),
            ("Buy & Hold Return [%]", fmt_float(self.buy_hold_return_pct)),
            ("Return (Ann.) [%]", fmt_float(self.return_ann_pct)),
            ("Volatility (Ann.) [%]", fmt_float(self.volatility_ann_pct)),
            ("Sharpe Ratio", fmt_float(self.sharpe_ratio)),
            ("Sortino Ratio", fmt_float(self.sortino_ratio)),
            ("Max. Drawdown [%]", fmt_float(self.max_drawdown_pct)),
            ("Max. Drawdown Duration", format_duration(self.max_drawdown_duration)),
            ("# Trades", self.trades_count.to_string()),
            ("Win Rate [%]", fmt_float(self.win_rate_pct)),
            ("Best Trade [%]", fmt_float(self.best_trade_pct)),
            ("Worst Trade [%]", fmt_float(self.worst_trade_pct)),
            ("Avg. Trade [%]", fmt_float(self.avg_trade_pct)),
            ("Profit Factor", fmt_float(self.profit_factor)),
            ("Expectancy [%]", fmt_float(self.expectancy_pct)),
            ("_strategy", self.strategy.clone()),
        ];
        for (i, (label, value)) in rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:<26}{:>30}", label, value)?;
        }
        Ok(())
    }
}
