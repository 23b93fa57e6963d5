use clap::{CommandFactory, Parser};
use portside::{
    cli::{PortsideArgs, PortsideSubcommand},
    config::{LogFormat, Portside},
    proxy::CacheLedger,
    server,
    store::StoreLayout,
    PortsideResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PortsideResult<()> {
    dotenvy::dotenv().ok();

    let args = PortsideArgs::parse();

    if args.version {
        println!("portside {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Portside::load(args.config.as_deref())?;
    init_tracing(&config);

    match args.subcommand {
        Some(PortsideSubcommand::Serve { port }) => {
            let config = match port {
                Some(port) => config.with_port(port),
                None => config,
            };
            server::serve(config).await?;
        }
        Some(PortsideSubcommand::Purge) => {
            let layout = StoreLayout::create(config.get_storage().get_path().clone()).await?;
            let ledger = CacheLedger::new(
                layout,
                *config.get_proxy().get_cache().get_max_size_gb(),
            );
            ledger.purge_all().await?;
            println!("cache purged");
        }
        None => {
            PortsideArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initialises the tracing subscriber from the logging configuration. The
/// `RUST_LOG` environment variable wins when set.
fn init_tracing(config: &Portside) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_logging().get_level()));

    match config.get_logging().get_format() {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
