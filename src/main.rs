use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use zeroloop::config::ServerConfig;
use zeroloop::server::TrainServer;
use zeroloop::LevelFilter;

#[derive(Parser)]
#[clap(author,
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"))]
struct Args {
    #[clap(
        short = 'C',
        long,
        env = "ZEROLOOP_CONFIG",
        help = "Run configuration file (TOML)"
    )]
    config: PathBuf,
    #[clap(short = 'b', long, help = "Override the configured bind address")]
    bind: Option<String>,
    #[clap(short = 'v', long, help = "Verbose logging")]
    verbose: bool,
}

fn main() -> zeroloop::Result<()> {
    let args = Args::parse();
    zeroloop::configure_logger(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let server = Arc::new(TrainServer::new(config)?);
    register_shutdown(server.clone())?;
    server.run()
}

/// SIGINT/SIGTERM tell the fleet to quit before the process exits
fn register_shutdown(server: Arc<TrainServer>) -> zeroloop::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new().name("signals".into()).spawn(move || {
        if signals.forever().next().is_some() {
            server.shutdown();
        }
    })?;
    Ok(())
}
