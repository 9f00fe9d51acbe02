//! One-shot completion and inspection queries.

use gantry_core::{CoreConfig, ExecutionChannel, KernelCreate, KernelServices};

/// Which query to send.
#[derive(Debug, Clone, Copy)]
pub enum Query {
    Complete,
    Inspect,
}

/// Start a kernel, send one query, and print the reply as JSON.
///
/// The cursor defaults to the end of `code`.
pub async fn execute(
    query: Query,
    kernel: &str,
    code: &str,
    cursor: Option<usize>,
) -> anyhow::Result<()> {
    let cursor = cursor.unwrap_or(code.chars().count());
    let services = KernelServices::with_process_workers(CoreConfig::from_env()?);

    let outcome: gantry_core::Result<serde_json::Value> = async {
        let created = services.pool.create(KernelCreate::named(kernel)).await?;
        let channel = services.pool.channel(&created.id)?;
        send(&channel, query, code, cursor).await
    }
    .await;

    services.shutdown().await;

    let reply = outcome?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn send(
    channel: &ExecutionChannel,
    query: Query,
    code: &str,
    cursor: usize,
) -> gantry_core::Result<serde_json::Value> {
    match query {
        Query::Complete => channel.complete(code, cursor).await,
        Query::Inspect => channel.inspect(code, cursor).await,
    }
}
