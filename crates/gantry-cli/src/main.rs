//! gantry CLI - run code through pooled interpreter kernels.

mod cells;
mod colors;
mod output;
mod preprocess;
mod query;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Run code through pooled interpreter kernels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script cell by cell (cells separated by `# %%`)
    Run {
        /// Path to the script
        script: String,

        /// Kernel spec to start
        #[arg(short, long, default_value = "python3")]
        kernel: String,

        /// Keep running cells after one fails
        #[arg(long)]
        keep_going: bool,

        /// List kernel variables after the run
        #[arg(long)]
        vars: bool,
    },

    /// Show how magic directives in a file are rewritten
    Preprocess {
        /// Path to the file, or `-` for stdin
        #[arg(required_unless_present = "list")]
        input: Option<String>,

        /// List supported directives instead
        #[arg(long)]
        list: bool,
    },

    /// Ask a kernel for completions
    Complete {
        /// Code to complete
        code: String,

        /// Cursor position in characters (default: end of code)
        #[arg(long)]
        cursor: Option<usize>,

        /// Kernel spec to start
        #[arg(short, long, default_value = "python3")]
        kernel: String,
    },

    /// Ask a kernel for documentation of the object at the cursor
    Inspect {
        /// Code containing the object
        code: String,

        /// Cursor position in characters (default: end of code)
        #[arg(long)]
        cursor: Option<usize>,

        /// Kernel spec to start
        #[arg(short, long, default_value = "python3")]
        kernel: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            script,
            kernel,
            keep_going,
            vars,
        } => {
            run::execute(run::RunOptions {
                script: &script,
                kernel: &kernel,
                keep_going,
                show_vars: vars,
            })
            .await?
        }

        Commands::Preprocess { input, list } => match input {
            Some(input) if !list => preprocess::execute(&input)?,
            _ => preprocess::list(),
        },

        Commands::Complete {
            code,
            cursor,
            kernel,
        } => query::execute(query::Query::Complete, &kernel, &code, cursor).await?,

        Commands::Inspect {
            code,
            cursor,
            kernel,
        } => query::execute(query::Query::Inspect, &kernel, &code, cursor).await?,
    }

    Ok(())
}
