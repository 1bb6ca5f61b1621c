//! Engine configuration: collateral types, per-asset risk parameters and
//! LTV thresholds, loaded from TOML and validated on write.
//!
//! Invalid updates are rejected whole; the runtime registry is never
//! partially applied.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use sentinel_oracle::AssetFeedConfig;

use crate::error::EngineError;

/// Closed set of supported collateral types.
///
/// Each variant carries its canonical decimals; unsupported symbols are
/// rejected at configuration time rather than branched on at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collateral {
    Sui,
    Weth,
    Wbtc,
    Usdc,
}

impl Collateral {
    /// Resolve a configured symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_uppercase().as_str() {
            "SUI" => Some(Self::Sui),
            "WETH" | "ETH" => Some(Self::Weth),
            "WBTC" | "BTC" => Some(Self::Wbtc),
            "USDC" => Some(Self::Usdc),
            _ => None,
        }
    }

    /// Canonical symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Sui => "SUI",
            Self::Weth => "WETH",
            Self::Wbtc => "WBTC",
            Self::Usdc => "USDC",
        }
    }

    /// Token decimals for raw on-ledger amounts.
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Sui => 9,
            Self::Weth => 18,
            Self::Wbtc => 8,
            Self::Usdc => 6,
        }
    }

    /// Conservative default thresholds per collateral type.
    pub fn default_thresholds(&self) -> LtvThresholds {
        match self {
            Self::Sui => LtvThresholds {
                max_ltv_bp: 7000,
                warning_bp: 7500,
                liquidation_bp: 8500,
                bonus_bp: 500,
            },
            Self::Weth => LtvThresholds {
                max_ltv_bp: 7500,
                warning_bp: 8000,
                liquidation_bp: 8500,
                bonus_bp: 500,
            },
            Self::Wbtc => LtvThresholds {
                max_ltv_bp: 7000,
                warning_bp: 7500,
                liquidation_bp: 8000,
                bonus_bp: 750,
            },
            Self::Usdc => LtvThresholds {
                max_ltv_bp: 8500,
                warning_bp: 9000,
                liquidation_bp: 9500,
                bonus_bp: 250,
            },
        }
    }
}

/// Per-asset LTV thresholds, all in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LtvThresholds {
    /// Maximum LTV for new borrows
    pub max_ltv_bp: u64,
    /// LTV at which a vault is flagged
    pub warning_bp: u64,
    /// LTV at/above which a vault is liquidatable
    pub liquidation_bp: u64,
    /// Liquidator bonus
    pub bonus_bp: u64,
}

impl LtvThresholds {
    /// Validate ordering and range invariants.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.liquidation_bp == 0 || self.liquidation_bp > 10_000 {
            return Err(EngineError::InvalidThresholds(format!(
                "liquidation_bp {} outside (0, 10000]",
                self.liquidation_bp
            )));
        }
        if self.warning_bp >= self.liquidation_bp {
            return Err(EngineError::InvalidThresholds(format!(
                "warning_bp {} must be below liquidation_bp {}",
                self.warning_bp, self.liquidation_bp
            )));
        }
        if self.max_ltv_bp > self.liquidation_bp {
            return Err(EngineError::InvalidThresholds(format!(
                "max_ltv_bp {} must not exceed liquidation_bp {}",
                self.max_ltv_bp, self.liquidation_bp
            )));
        }
        if self.bonus_bp > 10_000 {
            return Err(EngineError::InvalidThresholds(format!(
                "bonus_bp {} outside 0-10000",
                self.bonus_bp
            )));
        }
        Ok(())
    }
}

/// One asset entry in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRiskConfig {
    /// Collateral symbol; must resolve to a supported [`Collateral`]
    pub symbol: String,
    /// Minimum valid samples per aggregation
    pub min_sources: usize,
    /// Maximum inter-source spread (percent)
    pub max_deviation_pct: f64,
    /// Price cache freshness window (ms)
    pub update_frequency_ms: u64,
    /// LTV thresholds; collateral defaults apply when omitted
    #[serde(default)]
    pub thresholds: Option<LtvThresholds>,
}

/// Health monitor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorParams {
    /// Sweep interval (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Repeat-alert suppression window (seconds)
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_alert_cooldown_secs() -> u64 {
    300
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
        }
    }
}

/// Liquidation manager parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// Liquidation penalty as a share of collateral value
    #[serde(default = "default_penalty_rate_bp")]
    pub penalty_rate_bp: u64,
    /// Liquidator fee as a share of proceeds
    #[serde(default = "default_fee_rate_bp")]
    pub fee_rate_bp: u64,
    /// Annual penalty-interest rate for overdue loans
    #[serde(default = "default_overdue_apr_bp")]
    pub overdue_apr_bp: u64,
}

fn default_penalty_rate_bp() -> u64 {
    1000
}

fn default_fee_rate_bp() -> u64 {
    500
}

fn default_overdue_apr_bp() -> u64 {
    2000
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            penalty_rate_bp: default_penalty_rate_bp(),
            fee_rate_bp: default_fee_rate_bp(),
            overdue_apr_bp: default_overdue_apr_bp(),
        }
    }
}

/// Top-level engine configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub assets: Vec<AssetRiskConfig>,
    #[serde(default)]
    pub monitor: MonitorParams,
    #[serde(default)]
    pub liquidation: LiquidationParams,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::InvalidThresholds(format!(
                "cannot read config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| EngineError::InvalidThresholds(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every asset entry; any failure rejects the whole config.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.assets.is_empty() {
            return Err(EngineError::InvalidThresholds(
                "config must declare at least one asset".to_string(),
            ));
        }
        for asset in &self.assets {
            let collateral = Collateral::from_symbol(&asset.symbol)
                .ok_or_else(|| EngineError::UnknownAsset(asset.symbol.clone()))?;
            asset
                .thresholds
                .unwrap_or_else(|| collateral.default_thresholds())
                .validate()?;
            if asset.min_sources == 0 {
                return Err(EngineError::InvalidThresholds(format!(
                    "{}: min_sources must be at least 1",
                    asset.symbol
                )));
            }
            if asset.max_deviation_pct <= 0.0 {
                return Err(EngineError::InvalidThresholds(format!(
                    "{}: max_deviation_pct must be positive",
                    asset.symbol
                )));
            }
        }
        Ok(())
    }
}

/// Resolved runtime risk parameters for one collateral type.
#[derive(Debug, Clone)]
pub struct AssetRisk {
    pub collateral: Collateral,
    pub thresholds: LtvThresholds,
    pub feed: AssetFeedConfig,
}

/// Runtime registry of per-asset risk parameters.
///
/// The admin surface: threshold updates are validated on write and applied
/// atomically per asset.
pub struct RiskRegistry {
    assets: DashMap<String, AssetRisk>,
}

impl std::fmt::Debug for RiskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskRegistry")
            .field("asset_count", &self.assets.len())
            .finish()
    }
}

impl Default for RiskRegistry {
    fn default() -> Self {
        Self {
            assets: DashMap::new(),
        }
    }
}

impl RiskRegistry {
    /// Build the registry from a validated configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let registry = Self::default();
        for asset in &config.assets {
            // validate() guarantees the symbol resolves
            let collateral = Collateral::from_symbol(&asset.symbol)
                .ok_or_else(|| EngineError::UnknownAsset(asset.symbol.clone()))?;
            let thresholds = asset
                .thresholds
                .unwrap_or_else(|| collateral.default_thresholds());
            registry.assets.insert(
                collateral.symbol().to_string(),
                AssetRisk {
                    collateral,
                    thresholds,
                    feed: AssetFeedConfig {
                        symbol: collateral.symbol().to_string(),
                        decimals: collateral.decimals(),
                        min_sources: asset.min_sources,
                        max_deviation_pct: asset.max_deviation_pct,
                        update_frequency_ms: asset.update_frequency_ms,
                    },
                },
            );
        }
        Ok(registry)
    }

    /// Risk parameters for a symbol.
    pub fn get(&self, symbol: &str) -> Result<AssetRisk, EngineError> {
        self.assets
            .get(symbol)
            .map(|a| a.clone())
            .ok_or_else(|| EngineError::UnknownAsset(symbol.to_string()))
    }

    /// Replace the thresholds for a symbol.
    ///
    /// Validation happens before any mutation; a rejected update leaves the
    /// previous thresholds untouched.
    pub fn update_thresholds(
        &self,
        symbol: &str,
        thresholds: LtvThresholds,
    ) -> Result<(), EngineError> {
        thresholds.validate()?;
        let mut entry = self
            .assets
            .get_mut(symbol)
            .ok_or_else(|| EngineError::UnknownAsset(symbol.to_string()))?;
        entry.thresholds = thresholds;
        Ok(())
    }

    /// All configured symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.assets.iter().map(|e| e.key().clone()).collect()
    }
}
