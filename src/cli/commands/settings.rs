//! Configuration display.

use std::path::PathBuf;

use crate::config::{self, Config};

/// Show the config file location and effective settings
pub fn cmd_config(config: &Config, path: Option<&PathBuf>, init: bool) -> anyhow::Result<()> {
    let path = path.cloned().or_else(config::config_path);

    match &path {
        Some(p) if p.exists() => println!("Config file: {:?}", p),
        Some(p) if init => {
            config::save_to(&Config::default(), p)?;
            println!("✓ Wrote default config to {:?}", p);
        }
        Some(p) => println!("Config file: {:?} (not created, using defaults)", p),
        None => println!("Config file: unavailable (no config directory)"),
    }
    println!();

    let mut shown = config.clone();
    shown.credentials.finnhub_api_key = config.api_key().map(|key| mask(&key));
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

/// Hide all but the last four characters of a secret.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let visible = chars.len().saturating_sub(4);
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < visible { '*' } else { *c })
        .collect()
}
