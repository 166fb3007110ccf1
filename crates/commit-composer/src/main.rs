//! commit-composer - automatically create commits with AI-generated messages.
//!
//! Main entry point. All escaping failures funnel through one path: log the
//! error, attempt a desktop notification once, exit 1.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use commit_composer::{app, notify, util};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "commit-composer",
    about = "Automatically create commits with AI-generated messages",
    version
)]
struct Cli {
    /// Skip security check (use with caution!)
    #[arg(long)]
    dangerously_skip_security_check: bool,

    /// Show verbose assistant output (JSON event stream)
    #[arg(long, env = "VERBOSE_CLAUDE_OUTPUT")]
    verbose_claude_output: bool,

    /// Show the full prompt sent to the assistant
    #[arg(long)]
    verbose_prompt_output: bool,
}

fn main() {
    let cli = Cli::parse();

    // All diagnostics go to stderr; stdout is reserved for the final
    // informational line.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let exit_code = runtime.block_on(async {
        let dir = match std::env::current_dir() {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("Error: cannot determine working directory: {err}");
                return 1;
            }
        };

        let options = app::Options {
            dangerously_skip_security_check: cli.dangerously_skip_security_check,
            verbose_claude_output: cli.verbose_claude_output,
            verbose_prompt_output: cli.verbose_prompt_output,
        };

        match app::run(&dir, &options).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("Error: {err}");
                let project = util::project_name(&dir);
                notify::send(
                    "❌ Error: Commit Not Created",
                    &format!("Project: {project}\n{err}"),
                )
                .await;
                1
            }
        }
    });

    std::process::exit(exit_code);
}
