//! Run command implementation for gantry CLI.
//!
//! Executes a script through a kernel, one `# %%` cell at a time.

use std::time::Instant;

use anyhow::Context;
use gantry_core::{
    CoreConfig, ExecuteRequest, ExecutionResult, ExecutionStatus, KernelCreate, KernelId,
    KernelServices, OutputEvent,
};

use crate::cells::split_cells;
use crate::colors;
use crate::output::print_event;

/// Options for `gantry run`.
pub struct RunOptions<'a> {
    pub script: &'a str,
    pub kernel: &'a str,
    pub keep_going: bool,
    pub show_vars: bool,
}

/// Execute a script.
pub async fn execute(options: RunOptions<'_>) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(options.script)
        .with_context(|| format!("Failed to read {}", options.script))?;
    let cells = split_cells(&source);

    if cells.is_empty() {
        println!("{}No code found in {}.{}", colors::YELLOW, options.script, colors::RESET);
        return Ok(());
    }

    let services = KernelServices::with_process_workers(CoreConfig::from_env()?);
    let outcome = run_cells(&services, &options, &cells).await;
    services.shutdown().await;
    outcome
}

async fn run_cells(
    services: &KernelServices,
    options: &RunOptions<'_>,
    cells: &[crate::cells::Cell],
) -> anyhow::Result<()> {
    let start = Instant::now();

    println!(
        "{}Starting{} {} kernel...",
        colors::CYAN,
        colors::RESET,
        options.kernel
    );
    let kernel = services.pool.create(KernelCreate::named(options.kernel)).await?;
    tracing::debug!("Kernel {} started", kernel.id);

    let mut failed = 0;
    for (index, cell) in cells.iter().enumerate() {
        println!(
            "\n{}[{}/{}]{} {}{}{}",
            colors::DIM,
            index + 1,
            cells.len(),
            colors::RESET,
            colors::BOLD,
            cell.title,
            colors::RESET
        );

        let request = ExecuteRequest::new(kernel.id.clone(), cell.source.clone())
            .with_cell(cell.title.clone());
        let result = run_one(services, &kernel.id, request).await;

        if result.status == ExecutionStatus::Error {
            failed += 1;
            if let Some(error) = &result.error
                && !result.outputs.iter().any(OutputEvent::is_error)
            {
                // Infrastructure failures never reached the printer.
                eprintln!("{}{}{}: {}", colors::RED, error.ename, colors::RESET, error.evalue);
            }
            if !options.keep_going {
                break;
            }
        }
    }

    if options.show_vars {
        print_variables(services, &kernel.id).await?;
    }

    println!("\n{}", "─".repeat(50));
    let elapsed = start.elapsed().as_secs_f64();
    if failed == 0 {
        println!(
            "{}Completed{} {} cells in {:.2}s",
            colors::GREEN,
            colors::RESET,
            cells.len(),
            elapsed
        );
        Ok(())
    } else {
        println!("{}Failed{} after {:.2}s", colors::RED, colors::RESET, elapsed);
        anyhow::bail!("{} cell(s) failed", failed)
    }
}

/// Run one cell, interrupting the kernel on Ctrl-C.
async fn run_one(
    services: &KernelServices,
    kernel_id: &KernelId,
    request: ExecuteRequest,
) -> ExecutionResult {
    let printer = |event: &OutputEvent| print_event(event);
    let execution = services.coordinator.execute(request, Some(&printer));
    tokio::pin!(execution);

    tokio::select! {
        result = &mut execution => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}Interrupting kernel...{}", colors::YELLOW, colors::RESET);
            if let Err(e) = services.coordinator.cancel(kernel_id).await {
                tracing::warn!("Interrupt failed: {}", e);
            }
            execution.await
        }
    }
}

async fn print_variables(services: &KernelServices, kernel_id: &KernelId) -> anyhow::Result<()> {
    let vars = services.coordinator.introspect_variables(kernel_id).await?;

    println!("\n{}Variables:{}", colors::BOLD, colors::RESET);
    if vars.is_empty() {
        println!("{}  (none){}", colors::DIM, colors::RESET);
    }
    for var in vars {
        println!(
            "  {:<20} {}{:<15}{} {:<12} {}",
            var.name,
            colors::CYAN,
            var.type_name,
            colors::RESET,
            var.shape,
            var.preview
        );
    }
    Ok(())
}
