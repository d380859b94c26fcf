use crate::data::Timeframe;
use anyhow::{anyhow, Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variables checked for exchange credentials when the config
/// file leaves them unset.
pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub switches: SwitchesConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub backtest: BacktestConfigFile,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub optimize: OptimizeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Which engines the runner dispatches to
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SwitchesConfig {
    pub simple_bar_backtest: bool,
    pub simple_node_backtest: bool,
}

impl Default for SwitchesConfig {
    fn default() -> Self {
        Self {
            simple_bar_backtest: true,
            simple_node_backtest: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    /// Plain REST client against the klines endpoint
    Direct,
    /// Unified exchange API taking market symbols like `BTC/USDT`
    Unified,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataConfig {
    pub lookback_days: u32,
    pub timeframe: String,
    pub unified_symbol: String,
    pub direct_symbol: String,
    pub downloader: DownloaderKind,
    pub page_limit: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            timeframe: "1h".to_string(),
            unified_symbol: "BTC/USDT".to_string(),
            direct_symbol: "BTCUSDT".to_string(),
            downloader: DownloaderKind::Direct,
            page_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com".to_string(),
            api_key: None,
            api_secret: None,
            request_delay_ms: 250,
            timeout_secs: 30,
        }
    }
}

impl ExchangeConfig {
    /// Fill missing credentials from the environment, treating blanks as unset
    fn resolve_credentials(&mut self) {
        self.api_key = non_blank(self.api_key.take()).or_else(|| env_non_blank(API_KEY_ENV));
        self.api_secret =
            non_blank(self.api_secret.take()).or_else(|| env_non_blank(API_SECRET_ENV));
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_non_blank(name: &str) -> Option<String> {
    non_blank(std::env::var(name).ok())
}

/// Parameters for the bar-series engine
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BacktestConfigFile {
    pub cash: f64,
    pub commission: f64,
    pub exclusive_orders: bool,
    pub n_short: usize,
    pub n_long: usize,
}

impl Default for BacktestConfigFile {
    fn default() -> Self {
        Self {
            cash: 1_000_000.0,
            commission: 0.002,
            exclusive_orders: true,
            n_short: 30,
            n_long: 100,
        }
    }
}

/// Parameters for the event-driven node
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NodeConfig {
    pub starting_quote: f64,
    pub starting_base: f64,
    pub trade_size: f64,
    pub include_ema_example: bool,
    pub include_local_sma: bool,
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            starting_quote: 1_000_000.0,
            starting_base: 1.0,
            trade_size: 1.0,
            include_ema_example: true,
            include_local_sma: true,
            fast_period: 30,
            slow_period: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OptimizeConfig {
    pub study_name: String,
    pub n_short_min: usize,
    pub n_short_max: usize,
    pub n_long_max: usize,
    pub seed: Option<u64>,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            study_name: "sma_cross_multiobj".to_string(),
            n_short_min: 5,
            n_short_max: 50,
            n_long_max: 200,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log file next to stderr output; empty disables it
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "bt_compare.log".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            switches: SwitchesConfig::default(),
            data: DataConfig::default(),
            exchange: ExchangeConfig::default(),
            backtest: BacktestConfigFile::default(),
            node: NodeConfig::default(),
            optimize: OptimizeConfig::default(),
            logging: LoggingConfig::default(),
            root_path: default_root_path(),
            results_dir: default_results_dir(),
        }
    }
}

impl Config {
    /// Load from the given file (or `config/default.toml` when present),
    /// then `BT_COMPARE__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path(),
        };

        let settings = ConfigLoader::builder()
            .add_source(File::from(config_path).required(path.is_some()))
            .add_source(
                Environment::with_prefix("BT_COMPARE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        Self::from_loader(settings)
    }

    fn from_loader(settings: ConfigLoader) -> Result<Self> {
        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.exchange.resolve_credentials();
        config.validate()?;
        // Cache file names use the canonical interval string
        config.data.timeframe = config.timeframe()?.as_str().to_string();
        Ok(config)
    }

    fn config_path() -> PathBuf {
        let local_config = PathBuf::from("config/default.toml");
        if local_config.exists() {
            return local_config;
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let exe_config = exe_dir.join("config/default.toml");
                if exe_config.exists() {
                    return exe_config;
                }
            }
        }

        local_config
    }

    pub fn validate(&self) -> Result<()> {
        self.timeframe()?;

        if self.data.lookback_days == 0 {
            return Err(anyhow!("data.lookback_days must be at least 1"));
        }
        if self.data.page_limit == 0 || self.data.page_limit > 1000 {
            return Err(anyhow!(
                "data.page_limit must be within 1..=1000, got {}",
                self.data.page_limit
            ));
        }
        if self.backtest.n_short == 0 || self.backtest.n_short >= self.backtest.n_long {
            return Err(anyhow!(
                "backtest windows must satisfy 0 < n_short < n_long (got {} / {})",
                self.backtest.n_short,
                self.backtest.n_long
            ));
        }
        if self.node.fast_period == 0 || self.node.fast_period >= self.node.slow_period {
            return Err(anyhow!(
                "node periods must satisfy 0 < fast < slow (got {} / {})",
                self.node.fast_period,
                self.node.slow_period
            ));
        }
        let opt = &self.optimize;
        if opt.n_short_min == 0 || opt.n_short_min > opt.n_short_max || opt.n_short_max >= opt.n_long_max {
            return Err(anyhow!(
                "optimize ranges must satisfy 0 < n_short_min <= n_short_max < n_long_max"
            ));
        }
        if !(0.0..1.0).contains(&self.backtest.commission) {
            return Err(anyhow!("backtest.commission must be within [0, 1)"));
        }
        Ok(())
    }

    pub fn timeframe(&self) -> Result<Timeframe> {
        self.data.timeframe.parse()
    }

    /// Cache file name, one per (symbol, timeframe, lookback)
    pub fn tmp_filename(&self) -> String {
        format!(
            "{}_{}_tmp_{}days.parquet",
            self.data.direct_symbol, self.data.timeframe, self.data.lookback_days
        )
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root_path.join("data")
    }

    pub fn data_tmp_path(&self) -> PathBuf {
        self.data_dir().join(self.tmp_filename())
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        let file = self.logging.file.trim();
        (!file.is_empty()).then(|| PathBuf::from(file))
    }
}
