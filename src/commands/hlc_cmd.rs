use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde_json::json;

use driftsync_core::hlc::{HlcTimestamp, HybridLogicalClock};

use super::OutputFormat;
use crate::config::Config;
use crate::identity::resolve_node_id;

#[derive(Args)]
pub struct HlcCommand {
    #[command(subcommand)]
    pub command: HlcSubcommand,
}

#[derive(Subcommand)]
pub enum HlcSubcommand {
    /// Print a fresh timestamp for this node
    Now,

    /// Break a timestamp into its parts
    Parse {
        /// Timestamp as "<ms>:<counter>:<node>"
        timestamp: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Order two timestamps
    Compare {
        a: String,
        b: String,
    },
}

impl HlcCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            HlcSubcommand::Now => {
                let clock = HybridLogicalClock::new(resolve_node_id(config)?);
                println!("{}", clock.now());
                Ok(())
            }

            HlcSubcommand::Parse { timestamp, format } => {
                let ts = HlcTimestamp::parse(timestamp)?;
                let wall = wall_time(&ts);

                match format {
                    OutputFormat::Json => {
                        let value = json!({
                            "timestamp": ts,
                            "physical_time": ts.physical_time(),
                            "counter": ts.counter(),
                            "node_id": ts.node_id(),
                            "wall_time": wall.map(|dt| dt.to_rfc3339()),
                        });
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    OutputFormat::Text => {
                        println!("physical_time: {}", ts.physical_time());
                        if let Some(dt) = wall {
                            println!("  wall time:   {}", dt.to_rfc3339());
                        }
                        println!("counter:       {}", ts.counter());
                        println!("node_id:       {}", ts.node_id());
                    }
                }
                Ok(())
            }

            HlcSubcommand::Compare { a, b } => {
                let a = HlcTimestamp::parse(a)?;
                let b = HlcTimestamp::parse(b)?;
                println!("{}", describe_order(&a, &b));
                Ok(())
            }
        }
    }
}

fn wall_time(ts: &HlcTimestamp) -> Option<DateTime<Utc>> {
    i64::try_from(ts.physical_time())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn describe_order(a: &HlcTimestamp, b: &HlcTimestamp) -> String {
    let relation = match a.compare(b) {
        Ordering::Less => "happened before",
        Ordering::Greater => "happened after",
        Ordering::Equal => "is the same event as",
    };
    format!("{} {} {}", a, relation, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_order() {
        let a = HlcTimestamp::parse("1700000000000:00001:abc12345").unwrap();
        let b = HlcTimestamp::parse("1700000000000:00001:abc12346").unwrap();

        assert_eq!(
            describe_order(&a, &b),
            "1700000000000:00001:abc12345 happened before 1700000000000:00001:abc12346"
        );
        assert!(describe_order(&b, &a).contains("happened after"));
        assert!(describe_order(&a, &a).contains("same event"));
    }

    #[test]
    fn test_wall_time() {
        let ts = HlcTimestamp::parse("1700000000000:0:abc12345").unwrap();
        assert_eq!(
            wall_time(&ts).unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }
}
