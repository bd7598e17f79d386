mod config_cmd;
mod context;
mod hlc_cmd;
mod queue_cmd;
mod sync_cmd;

use clap::ValueEnum;

pub use config_cmd::ConfigCommand;
pub use context::SyncContext;
pub use hlc_cmd::HlcCommand;
pub use queue_cmd::QueueCommand;
pub use sync_cmd::SyncCommand;

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
