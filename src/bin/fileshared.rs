use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use fileshare::cli::DaemonOpts;
use fileshare::logger::{Logger, StderrLogger, TeeLogger, TextLogger};
use fileshare::server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = opts.to_config()?;

    let logger: Arc<dyn Logger> = match &opts.log_file {
        Some(p) => {
            let file = TextLogger::new(p)
                .with_context(|| format!("Failed to open log file: {}", p.display()))?;
            Arc::new(TeeLogger(vec![
                Arc::new(StderrLogger) as Arc<dyn Logger>,
                Arc::new(file),
            ]))
        }
        None => Arc::new(StderrLogger),
    };

    if config.host == "0.0.0.0" {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   The protocol is UNENCRYPTED and UNAUTHENTICATED; use on trusted networks only");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .context("Error setting Ctrl-C handler")?;

        let handle = server::start(config, logger.clone()).await?;
        rx.recv().await;
        logger.info("Interrupted, shutting down...");
        handle.stop().await;
        Ok::<(), anyhow::Error>(())
    })
}
