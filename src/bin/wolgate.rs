use clap::{ArgAction, Parser};
use log::error;
use std::error::Error;
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process;
use wolgate::config;
use wolgate::daemon;
use wolgate::metrics;
use wolgate::model::{Gateway, GatewayId, Registry, DEFAULT_ADDRESS, DEFAULT_PORT};
use wolgate::resolve::{self, Destination, Overrides};
use wolgate::send::noop::LogOnlyTransmitter;
use wolgate::send::{Sender, Transmit, UdpTransmitter};

/// Send Wake-on-LAN magic packets to hosts and host groups, or relay them
/// between networks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Report each host as it is woken. Repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Debug output. -dd adds packet dumps, -ddd prints the configuration.
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,

    /// Keep going after a host fails and exit successfully anyway.
    #[arg(short, long)]
    ignore_errors: bool,

    /// Do everything except put packets on the wire.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Send to this address instead of the configured gateway.
    #[arg(short, long, conflicts_with = "gateway")]
    address: Option<String>,

    /// Send to this port or service (echo, discard).
    #[arg(short, long, conflicts_with = "gateway")]
    port: Option<String>,

    /// Send through this configured gateway.
    #[arg(short, long)]
    gateway: Option<String>,

    /// Delay between packet copies, e.g. 100ms.
    #[arg(short = 's', long)]
    delay: Option<String>,

    /// Number of copies of each packet.
    #[arg(short, long)]
    copies: Option<String>,

    /// SecureOn secret: a.b.c.d, xx:xx:..., or literal text.
    #[arg(short = 'S', long)]
    secret: Option<String>,

    /// Additional configuration file, read after the default ones.
    #[arg(short = 'F', long = "config")]
    config: Vec<PathBuf>,

    /// Print the configuration before doing anything.
    #[arg(long)]
    dump: bool,

    /// Relay incoming magic packets instead of sending.
    #[arg(
        short = 'D',
        long,
        conflicts_with_all = ["names", "address", "port", "gateway", "delay", "copies", "secret"]
    )]
    daemon: bool,

    /// Address the daemon listens on.
    #[arg(long, default_value = "0.0.0.0")]
    listen: String,

    /// Port or service the daemon listens on.
    #[arg(long, default_value = DEFAULT_PORT)]
    listen_port: String,

    /// Secret incoming packets must carry to be relayed.
    #[arg(long, env = "WOLGATE_LISTEN_SECRET")]
    listen_secret: Option<String>,

    /// Serve metrics at http://<addr>/varz.
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Hosts, groups or MAC addresses to wake. Read from stdin if absent.
    names: Vec<String>,
}

fn log_filter(args: &Args) -> &'static str {
    match (args.debug, args.verbose) {
        (d, _) if d >= 2 => "trace",
        (1, _) => "debug",
        (_, v) if v > 0 => "info",
        _ => "warn",
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&args)))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    match setup(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}

fn setup(args: &Args) -> Result<bool, Box<dyn Error>> {
    let mut registry = Registry::new();
    config::load_defaults(&mut registry)?;
    for path in &args.config {
        config::load_file(&mut registry, path)?;
    }

    let mut overrides = Overrides {
        destination: None,
        copies: args.copies.clone(),
        delay: args.delay.clone(),
        secret: args.secret.clone(),
    };
    if let Some(name) = &args.gateway {
        overrides.destination = Some(Destination::Named(name.clone()));
    } else if args.address.is_some() || args.port.is_some() {
        let gateway = Gateway::anonymous(
            args.address.as_deref().unwrap_or(DEFAULT_ADDRESS),
            args.port.as_deref().unwrap_or(DEFAULT_PORT),
        );
        let id = registry.add_anonymous_gateway(gateway);
        overrides.destination = Some(Destination::Gateway(id));
    }

    let listen = if args.daemon {
        let mut gateway = Gateway::anonymous(&args.listen, &args.listen_port);
        gateway.secret = args
            .listen_secret
            .as_deref()
            .map(resolve::parse_secret)
            .transpose()?;
        Some(registry.add_anonymous_gateway(gateway))
    } else {
        None
    };

    registry.resolve_targets()?;

    if args.dump || args.debug > 2 {
        print!("{}", registry);
    }

    if let Some(addr) = &args.metrics_addr {
        metrics::serve(addr.clone());
    }

    if args.dry_run {
        run(args, Sender::new(registry, LogOnlyTransmitter), &overrides, listen)
    } else {
        run(args, Sender::new(registry, UdpTransmitter::new()), &overrides, listen)
    }
}

fn run<T: Transmit>(
    args: &Args,
    mut sender: Sender<T>,
    overrides: &Overrides,
    listen: Option<GatewayId>,
) -> Result<bool, Box<dyn Error>> {
    if let Some(listen) = listen {
        daemon::run_daemon(sender, listen)?;
        return Ok(true);
    }

    if !args.names.is_empty() {
        return Ok(sender.send_names(&args.names, overrides, args.ignore_errors));
    }

    let stdin = io::stdin();
    if args.verbose > 0 && stdin.is_terminal() {
        eprintln!("Enter hosts or groups, one per line:");
    }
    let names = stdin
        .lock()
        .lines()
        .map_while(|line| line.map_err(|err| error!("stdin: {}", err)).ok())
        .filter_map(|line| {
            let name = line.split('#').next().unwrap_or_default().trim();
            (!name.is_empty()).then(|| name.to_string())
        });
    Ok(sender.send_names(names, overrides, args.ignore_errors))
}
