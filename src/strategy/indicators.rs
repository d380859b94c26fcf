//! Technical indicators for trading strategies
//!
//! Series helpers precompute an indicator over a whole column (bar-series
//! engine); the `Indicator` types are fed one value per bar (event node).

use std::collections::VecDeque;

/// Simple Moving Average over the whole series; `NaN` until `period` values are seen
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let mut sum: f64 = prices[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Index of the first defined value, if any
pub fn first_valid(values: &[f64]) -> Option<usize> {
    values.iter().position(|v| !v.is_nan())
}

/// `a` crossed over `b` on bar `i`: strictly below on the previous bar and
/// strictly above now. Undefined values never cross.
pub fn crossover(a: &[f64], b: &[f64], i: usize) -> bool {
    if i == 0 || i >= a.len() || i >= b.len() {
        return false;
    }
    a[i - 1] < b[i - 1] && a[i] > b[i]
}

/// Check if fast MA crossed above slow MA (golden cross)
pub fn crossed_above(fast_prev: f64, fast_curr: f64, slow_prev: f64, slow_curr: f64) -> bool {
    fast_prev <= slow_prev && fast_curr > slow_curr
}

/// Check if fast MA crossed below slow MA (death cross)
pub fn crossed_below(fast_prev: f64, fast_curr: f64, slow_prev: f64, slow_curr: f64) -> bool {
    fast_prev >= slow_prev && fast_curr < slow_curr
}

/// Indicator updated one bar at a time
pub trait Indicator {
    fn name(&self) -> String;
    fn update(&mut self, value: f64);
    fn value(&self) -> f64;
    fn initialized(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct SimpleMovingAverage {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    value: f64,
}

impl SimpleMovingAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            window: VecDeque::with_capacity(period.max(1)),
            sum: 0.0,
            value: 0.0,
        }
    }
}

impl Indicator for SimpleMovingAverage {
    fn name(&self) -> String {
        format!("SMA({})", self.period)
    }

    fn update(&mut self, value: f64) {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        // Partial mean while warming up
        self.value = self.sum / self.window.len() as f64;
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn initialized(&self) -> bool {
        self.window.len() >= self.period
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    period: usize,
    alpha: f64,
    count: usize,
    value: f64,
}

impl ExponentialMovingAverage {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            count: 0,
            value: 0.0,
        }
    }
}

impl Indicator for ExponentialMovingAverage {
    fn name(&self) -> String {
        format!("EMA({})", self.period)
    }

    fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.value = value;
        } else {
            self.value = self.alpha * value + (1.0 - self.alpha) * self.value;
        }
        self.count += 1;
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn initialized(&self) -> bool {
        self.count >= self.period
    }
}
