//! Engine settings stored in `config.toml`.
//!
//! Values are addressed by section and field, e.g.
//! `gate.unlock_window_minutes` or `acquisition.retry_attempts`. Every write
//! is validated before it reaches disk.

use clap::{Subcommand, ValueEnum};
use wakeproof_core::penalty::PenaltyConfig;
use wakeproof_core::{AcquisitionPolicy, Config, GateConfig, TrackingPolicy};

use super::CliResult;

#[derive(Clone, Copy, ValueEnum)]
pub enum Section {
    /// One-shot position requests
    Acquisition,
    /// Continuous lock-screen tracking
    Tracking,
    /// Unlock rules
    Gate,
    /// Penalty notice delivery
    Penalty,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the settings as TOML, optionally one section only
    Show {
        #[arg(value_enum)]
        section: Option<Section>,
    },
    /// Print one value
    Get {
        /// Dotted key, e.g. "gate.unlock_window_minutes"
        key: String,
    },
    /// Change one value and save
    Set {
        /// Dotted key, e.g. "penalty.webhook_url"
        key: String,
        value: String,
    },
    /// Restore defaults, optionally for one section only
    Reset {
        #[arg(value_enum)]
        section: Option<Section>,
    },
    /// Print where the config file lives
    Path,
}

fn section_toml(config: &Config, section: Section) -> Result<String, toml::ser::Error> {
    match section {
        Section::Acquisition => toml::to_string_pretty(&config.acquisition),
        Section::Tracking => toml::to_string_pretty(&config.tracking),
        Section::Gate => toml::to_string_pretty(&config.gate),
        Section::Penalty => toml::to_string_pretty(&config.penalty),
    }
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Show { section } => {
            let config = Config::load()?;
            let rendered = match section {
                Some(section) => section_toml(&config, section)?,
                None => toml::to_string_pretty(&config)?,
            };
            print!("{rendered}");
        }
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or_else(|| format!("unknown key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            // Echo the stored form, e.g. "150" becomes 150.0 for a distance.
            let stored = config.get(&key).unwrap_or(value);
            println!("{key} = {stored}");
        }
        ConfigAction::Reset { section } => {
            let mut config = match section {
                Some(_) => Config::load_or_default(),
                None => Config::default(),
            };
            match section {
                Some(Section::Acquisition) => config.acquisition = AcquisitionPolicy::default(),
                Some(Section::Tracking) => config.tracking = TrackingPolicy::default(),
                Some(Section::Gate) => config.gate = GateConfig::default(),
                Some(Section::Penalty) => config.penalty = PenaltyConfig::default(),
                None => {}
            }
            config.save()?;
            println!("defaults restored");
        }
        ConfigAction::Path => {
            println!("{}", Config::file_path()?.display());
        }
    }
    Ok(())
}
