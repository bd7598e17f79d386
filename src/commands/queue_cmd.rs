use clap::{Args, Subcommand};
use serde_json::Value;

use driftsync_core::queue::{OfflineQueue, OperationStatus, QueuedOperation};

use super::OutputFormat;
use crate::operations::{entity_operation, OperationKind};

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// Record an entity change for the next sync
    Add {
        /// Kind of change
        #[arg(value_enum)]
        kind: OperationKind,

        /// Collection the entity belongs to
        collection: String,

        /// Entity ID (required for update and delete)
        #[arg(long)]
        entity: Option<String>,

        /// Entity version the change was based on
        #[arg(long)]
        version: Option<i64>,

        /// Entity data as JSON
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// List queued operations
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show operations with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a queued operation
    Show {
        /// Operation ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Return a failed or conflicting operation to pending
    Retry {
        /// Operation ID
        id: String,
    },

    /// Drop an operation from the queue
    Remove {
        /// Operation ID
        id: String,
    },

    /// Drop every queued operation
    Clear {
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl QueueCommand {
    pub async fn run(&self, queue: &OfflineQueue) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            QueueSubcommand::Add {
                kind,
                collection,
                entity,
                version,
                data,
            } => {
                let data: Value = serde_json::from_str(data)
                    .map_err(|e| format!("Invalid JSON for --data: {}", e))?;
                let operation =
                    entity_operation(*kind, collection, entity.clone(), *version, data)?;

                let receipt = queue.enqueue(operation).await?;
                println!("Queued {} ({})", receipt.operation.id, receipt.operation.kind);
                println!("  queued_at: {}", receipt.operation.queued_at);
                if !receipt.evicted.is_empty() {
                    println!(
                        "Queue full, dropped {} oldest operation(s): {}",
                        receipt.evicted.len(),
                        receipt.evicted.join(", ")
                    );
                }
                Ok(())
            }

            QueueSubcommand::List { format, status } => {
                let status: Option<OperationStatus> =
                    status.as_deref().map(str::parse).transpose()?;
                let operations: Vec<_> = queue
                    .list_all()
                    .await?
                    .into_iter()
                    .filter(|op| status.is_none_or(|s| op.status == s))
                    .collect();

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&operations)?);
                    }
                    OutputFormat::Text => {
                        if operations.is_empty() {
                            println!("Queue is empty");
                            return Ok(());
                        }
                        println!(
                            "{:<36}  {:<14}  {:<8}  {:>7}  ENTITY",
                            "ID", "TYPE", "STATUS", "RETRIES"
                        );
                        println!("{}", "-".repeat(90));
                        for op in &operations {
                            println!(
                                "{:<36}  {:<14}  {:<8}  {:>7}  {}",
                                op.id,
                                op.kind,
                                op.status,
                                op.retry_count,
                                op.entity_id.as_deref().unwrap_or("-")
                            );
                        }
                        println!("\nTotal: {} operation(s)", operations.len());
                    }
                }
                Ok(())
            }

            QueueSubcommand::Show { id, format } => {
                let operation = queue
                    .get(id)
                    .await?
                    .ok_or_else(|| format!("Operation not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&operation)?);
                    }
                    OutputFormat::Text => print_operation(&operation)?,
                }
                Ok(())
            }

            QueueSubcommand::Retry { id } => {
                let operation = queue.retry(id).await?;
                println!("Operation {} is pending again", operation.id);
                Ok(())
            }

            QueueSubcommand::Remove { id } => {
                if queue.remove(id).await? {
                    println!("Removed operation {}", id);
                    Ok(())
                } else {
                    Err(format!("Operation not found: {}", id).into())
                }
            }

            QueueSubcommand::Clear { force } => {
                let count = queue.stats().await?.total();
                if count == 0 {
                    println!("Queue is empty");
                    return Ok(());
                }
                if !force && !confirm(&format!("Drop {} queued operation(s)?", count))? {
                    println!("Cancelled");
                    return Ok(());
                }
                let removed = queue.clear().await?;
                println!("Removed {} operation(s)", removed);
                Ok(())
            }
        }
    }
}

fn print_operation(op: &QueuedOperation) -> Result<(), serde_json::Error> {
    println!("ID:          {}", op.id);
    println!("Type:        {}", op.kind);
    println!("Status:      {}", op.status);
    println!("Queued at:   {}", op.queued_at);
    println!("Created at:  {}", op.created_at.to_rfc3339());
    println!("Retries:     {}", op.retry_count);
    if let Some(entity_id) = &op.entity_id {
        match op.entity_version {
            Some(version) => println!("Entity:      {} (version {})", entity_id, version),
            None => println!("Entity:      {}", entity_id),
        }
    }
    if let Some(error) = &op.last_error {
        match op.last_error_kind {
            Some(kind) => println!("Last error:  [{}] {}", kind, error),
            None => println!("Last error:  {}", error),
        }
    }
    println!("Payload:\n{}", serde_json::to_string_pretty(&op.payload)?);
    Ok(())
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    use std::io::Write;

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
