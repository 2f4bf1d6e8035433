//! `ferrule config` command implementation.

use colored::Colorize;
use ferrule::{Error, ResolverConfig};

use super::Context;
use super::display::display_path;

/// Write the default config.
pub async fn init(context: &Context, force: bool) -> Result<(), Error> {
    let path = &context.config_path;

    if !force && tokio::fs::try_exists(path).await? {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            display_path(path)
        )));
    }

    ResolverConfig::default().save(path).await?;
    println!("Wrote default configuration to {}", display_path(path).cyan());
    Ok(())
}

/// Print the effective, already-validated config.
pub fn check(context: &Context) -> Result<(), Error> {
    if context.json {
        let json = serde_json::to_string_pretty(&context.config).map_err(std::io::Error::from)?;
        println!("{json}");
        return Ok(());
    }

    let origin = if context.config_path.exists() {
        display_path(&context.config_path)
    } else {
        "built-in defaults".to_string()
    };

    println!("{} configuration from {}", "Valid".green().bold(), origin.cyan());
    println!();
    print!("{}", serde_yaml::to_string(&context.config)?);
    Ok(())
}
