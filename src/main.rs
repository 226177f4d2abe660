use anyhow::Context;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing() -> anyhow::Result<()> {
    let filter = match std::env::var("TISSUE_LOG") {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid TISSUE_LOG directives: {}", directives))?,
        Err(_) => EnvFilter::new("tissue=warn"),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("installing tracing subscriber")
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("warning: {:#}", err);
    }
    match tissue::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(code = err.code(), "command failed");
            eprintln!(
                "{}",
                serde_json::json!({ "error": err.to_string(), "code": err.code() })
            );
            ExitCode::FAILURE
        }
    }
}
