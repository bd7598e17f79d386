use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a config file with the default settings
    Init {
        /// Where to write it (defaults to the platform config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let config = config.redacted();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        print_value("data_dir", &config.data_dir, |p| p.display().to_string());
                        print_value("database_path", &config.database_path, |p| {
                            p.display().to_string()
                        });
                        print_value("node_id", &config.node_id, |id| {
                            id.clone().unwrap_or_else(|| "(derived)".to_string())
                        });

                        println!("sync:");
                        print!("{}", indent(&serde_yaml::to_string(&config.sync)?));
                        println!("connectivity:");
                        print!("{}", indent(&serde_yaml::to_string(&config.connectivity)?));
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init { path, force } => {
                let path = path.clone().unwrap_or_else(Config::default_config_path);
                if path.exists() && !force {
                    return Err(format!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    )
                    .into());
                }

                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, Config::template()?)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

fn print_value<T>(name: &str, value: &ConfigValue<T>, render: impl Fn(&T) -> String) {
    println!("{}: {}", name, render(&value.value));
    println!("  source: {}", value.source);
    println!();
}

fn indent(yaml: &str) -> String {
    yaml.lines().map(|line| format!("  {}\n", line)).collect()
}
