//! `tickgate config`: print the effective configuration.

use tickgate_core::TickgateConfig;

/// Print `config` as TOML, or as JSON when `json` is set
pub fn show(config: &TickgateConfig, json: bool) -> anyhow::Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config)?
    } else {
        config.to_toml_string()?
    };
    println!("{}", rendered);
    Ok(())
}
