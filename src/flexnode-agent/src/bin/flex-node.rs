//! flex-node binary. Linux only.

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("flex-node provisions Linux hosts only.");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
fn main() {
    use clap::Parser;
    use flexnode::Config;
    use flexnode_agent::{commands, logging, Cli, Command};
    use tokio::signal::unix::{signal, SignalKind};
    use tokio_util::sync::CancellationToken;

    let cli = Cli::parse();

    if !cli.command.needs_config() {
        println!("{}", commands::version_line());
        return;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(None);
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init(Some(&config.agent.log_level));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result: anyhow::Result<()> = runtime.block_on(async {
        let cancel = CancellationToken::new();

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    signal_cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
                _ = term.recv() => tracing::info!("Received SIGTERM, shutting down"),
            }
            signal_cancel.cancel();
        });

        match cli.command {
            Command::Bootstrap => commands::bootstrap(&config, &cancel).await,
            Command::Agent => commands::agent(&config, &cancel).await,
            Command::Unbootstrap => commands::unbootstrap(&config, &cancel).await,
            Command::Status => commands::status(&config),
            Command::Version => Ok(()),
        }
    });

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
