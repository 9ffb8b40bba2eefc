use colored::Colorize;
use safe_harbor::core::time;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> anyhow::Result<ExitCode> {
    init_tracing()?;

    match safe_harbor::run() {
        Ok(code) => Ok(code),
        Err(err) => {
            let envelope = time::command_envelope(
                "error",
                "error",
                serde_json::json!({ "code": err.code(), "message": err.to_string() }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            eprintln!("{} {}", "error:".red().bold(), err);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Diagnostics go to stderr so stdout stays a single JSON envelope.
fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}
