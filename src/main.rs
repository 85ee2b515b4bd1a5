use std::{error::Error, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use humantime_serde::re::humantime;
use labinstruments::{
    config::{BenchConfig, InstrumentConfig},
    instruments::{Resource, ResourceManager, Session, SystemResourceManager},
    logging,
    mock::MockResourceManager,
    protocols::ResourceAddress,
    utils,
};

#[derive(Parser)]
#[command(name = "labinstruments", version)]
#[command(about = "Talk to SCPI bench instruments", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Target {
    /// Resource string, e.g. TCPIP0::192.168.1.20::5025::SOCKET
    #[arg(long, short, conflicts_with = "config")]
    address: Option<String>,

    /// Bench file with [instruments.<name>] tables
    #[arg(long, short, requires = "instrument")]
    config: Option<PathBuf>,

    /// Entry of the bench file to use
    #[arg(long, short)]
    instrument: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the *IDN? answer
    Identify(Target),
    /// Send a query and print the answer
    Query {
        #[command(flatten)]
        target: Target,
        command: String,
    },
    /// Send a command
    Write {
        #[command(flatten)]
        target: Target,
        command: String,
    },
    /// Ask each resource string for *IDN?
    Scan {
        addresses: Vec<String>,
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
}

impl Target {
    fn resolve(&self) -> labinstruments::Result<InstrumentConfig> {
        match (&self.address, &self.config, &self.instrument) {
            (Some(address), _, _) => Ok(InstrumentConfig::new(address.as_str())),
            (None, Some(path), Some(name)) => BenchConfig::load(path)?.instrument(name),
            _ => Err(labinstruments::Error::Config(
                "give --address, or --config with --instrument".to_string(),
            )),
        }
    }

    /// `MOCK::` addresses get a simulated instrument.
    fn connect(&self) -> labinstruments::Result<Session<Box<dyn Resource + Send>>> {
        let config = self.resolve()?;
        let link: Box<dyn Resource + Send> = match config.address.parse::<ResourceAddress>()? {
            ResourceAddress::Mock(_) => Box::new(
                MockResourceManager::new().open_resource(&config.address, config.timeout)?,
            ),
            _ => SystemResourceManager::new(config.serial)
                .open_resource(&config.address, config.timeout)?,
        };
        Ok(Session::from_resource(link, &config.connect_options()))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    match cli.command {
        Command::Identify(target) => {
            let mut session = target.connect()?;
            match session.identify()? {
                Some(identity) => println!("{}", identity),
                None => println!("{}: no answer", session.address()),
            }
        }
        Command::Query { target, command } => {
            let mut session = target.connect()?;
            println!("{}", session.query(&command)?);
        }
        Command::Write { target, command } => {
            target.connect()?.write(&command)?;
        }
        Command::Scan { addresses, timeout } => {
            let mut manager = SystemResourceManager::default();
            let found = utils::scan_resources(&mut manager, &addresses, timeout);
            for (address, identity) in &found {
                println!("{}\t{}", address, identity);
            }
            println!("{} of {} answered", found.len(), addresses.len());
        }
    }
    Ok(())
}
