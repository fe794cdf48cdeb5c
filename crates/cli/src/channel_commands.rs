//! One-shot channel commands: manual triggers, schema and execution listings.

use {
    anyhow::{Result, anyhow},
    clap::Args,
    marketsync_channels::{CategoryNode, ChannelStore, ExecutionStore, RunRequest},
    marketsync_cron::{SkipReason, TriggerOutcome},
};

use crate::Runtime;

#[derive(Args)]
pub struct TriggerArgs {
    tenant: String,
    /// Channel identifier.
    channel: String,
    /// Run the sync slot instead of a full submission.
    #[arg(long, default_value_t = false, conflicts_with = "clear_cache")]
    sync: bool,
    /// Sync only this item.
    #[arg(long, requires = "sync")]
    item: Option<i64>,
    /// Drop cached categories, attributes and dictionaries.
    #[arg(long, default_value_t = false)]
    clear_cache: bool,
    /// Catalog language (defaults to the channel's `language` setting).
    #[arg(long)]
    language: Option<String>,
}

impl TriggerArgs {
    pub(crate) fn request(&self) -> RunRequest {
        if self.clear_cache {
            RunRequest::ClearCache
        } else if self.sync {
            RunRequest::Sync { item: self.item }
        } else {
            RunRequest::Full
        }
    }
}

pub async fn trigger(runtime: &Runtime, args: TriggerArgs) -> Result<()> {
    let channel = runtime
        .store
        .find_channel(&args.tenant, &args.channel)
        .await?
        .ok_or_else(|| anyhow!("channel {} not found for tenant {}", args.channel, args.tenant))?;
    let language = args
        .language
        .clone()
        .or_else(|| channel.config.language.clone())
        .unwrap_or_default();

    let factory = runtime.factory();
    let manager = factory.channels_manager(&channel.tenant_id);
    match manager
        .trigger_channel(&channel, &language, args.request())
        .await?
    {
        TriggerOutcome::Finished {
            execution_id,
            status,
        } => {
            println!("Execution {execution_id} finished: {status:?}");
            if let Some(execution) = runtime
                .store
                .list_executions(channel.id, 1)
                .await?
                .into_iter()
                .find(|e| e.id == execution_id)
            {
                println!("\n{}", execution.log);
            }
        },
        TriggerOutcome::Skipped(reason) => {
            let why = match reason {
                SkipReason::MissingLanguage => "no language configured, pass --language",
                SkipReason::AlreadyRunning => "channel is already running",
                SkipReason::NothingSubmitted => "no submitted items",
            };
            println!("Skipped: {why}");
        },
    }
    Ok(())
}

pub async fn categories(runtime: &Runtime, tenant: &str, identifier: &str) -> Result<()> {
    let channel = runtime
        .store
        .find_channel(tenant, identifier)
        .await?
        .ok_or_else(|| anyhow!("channel {identifier} not found for tenant {tenant}"))?;
    let handler = runtime.handlers.get(channel.channel_type)?;
    for root in handler.categories(&channel).await? {
        print_tree(&root, 0);
    }
    Ok(())
}

fn print_tree(node: &CategoryNode, depth: usize) {
    if !node.id.is_empty() {
        println!("{}{}  {}", "  ".repeat(depth), node.id, node.name);
    }
    let next = if node.id.is_empty() { depth } else { depth + 1 };
    for child in &node.children {
        print_tree(child, next);
    }
}

pub async fn executions(runtime: &Runtime, channel_id: i64, limit: usize) -> Result<()> {
    let executions = runtime.store.list_executions(channel_id, limit).await?;
    if executions.is_empty() {
        println!("No executions found.");
        return Ok(());
    }
    for e in &executions {
        let finished = e
            .finished_at_ms
            .map_or_else(|| "-".to_string(), |ms| ms.to_string());
        println!(
            "  #{}  {:?}  started {}  finished {}",
            e.id, e.status, e.started_at_ms, finished
        );
    }
    Ok(())
}
