use crate::engine::EngineConfig;
use crate::fees::{FeePolicy, DEFAULT_CHARITY_FEE_PERCENT, DEFAULT_MAINTENANCE_FEE_PERCENT};
use crate::payout::DEFAULT_RECOVERY_PERCENT;
use crate::recovery::{RequirementRule, DEFAULT_CHALLENGE_WINDOW_SECS};
use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILE: &str = "sweatmarket.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub db: String,
    pub log_level: String,
    pub test: bool,
    pub admins: Vec<String>,
    pub oracles: Vec<String>,
    pub charity_fee_percent: u8,
    pub maintenance_fee_percent: u8,
    pub recovery_percent: u8,
    pub challenge_window_secs: i64,
    pub requirement: RequirementRule,
    /// Base url of an external fitness verifier. Evidence is trusted as
    /// reported when unset.
    pub verifier_url: Option<String>,
    pub verifier_timeout_secs: u64,
    /// Also drives the retry of payouts custody did not accept.
    pub expiry_interval_secs: u64,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8081,
            db: "sqlite::memory:".to_string(),
            log_level: "debug".to_string(),
            test: false,
            admins: vec![],
            oracles: vec![],
            charity_fee_percent: DEFAULT_CHARITY_FEE_PERCENT,
            maintenance_fee_percent: DEFAULT_MAINTENANCE_FEE_PERCENT,
            recovery_percent: DEFAULT_RECOVERY_PERCENT,
            challenge_window_secs: DEFAULT_CHALLENGE_WINDOW_SECS,
            requirement: RequirementRule::default(),
            verifier_url: None,
            verifier_timeout_secs: 10,
            expiry_interval_secs: 60,
        }
    }
}
impl Settings {
    /// Layers the config file (optional unless named explicitly) and
    /// `SWEATMARKET__*` environment variables over the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SWEATMARKET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admins")
                    .with_list_parse_key("oracles"),
            )
            .build()
            .context("couldn't read configuration")?;
        settings
            .try_deserialize()
            .context("invalid configuration")
    }
    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            fees: FeePolicy::new(self.charity_fee_percent, self.maintenance_fee_percent)?,
            recovery_percent: self.recovery_percent,
            challenge_window_secs: self.challenge_window_secs,
            requirement: self.requirement,
        })
    }
    pub fn log_level(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| anyhow!("unknown log level {}", self.log_level))
    }
}
