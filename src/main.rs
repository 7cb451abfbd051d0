use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rustsbc::{
    config::Config,
    media::negotiate::{filter_offer, process_answer, process_offer},
    proxy::call_leg::LegRole,
    version,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "SIP back-to-back user agent signaling core",
    long_about = version::get_version_info()
)]
struct Cli {
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and print the codec groups
    Check,
    /// Run an SDP offer through the inbound pipeline of one leg and the
    /// outbound filter of the other
    Offer {
        #[clap(long, value_enum, default_value = "a")]
        leg: Side,
        /// File holding the offer
        sdp: String,
    },
    /// Build the answer a leg would send for `--offer`
    Answer {
        #[clap(long, value_enum, default_value = "a")]
        leg: Side,
        #[clap(long, help = "File holding the offer that was received")]
        offer: String,
        /// File holding the answer from the other side
        sdp: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Side {
    A,
    B,
}

impl From<Side> for LegRole {
    fn from(side: Side) -> Self {
        match side {
            Side::A => LegRole::A,
            Side::B => LegRole::B,
        }
    }
}

fn read_sdp(path: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
}

fn check(config: &Config) -> Result<()> {
    let groups = config.codec_groups();
    for role in [LegRole::A, LegRole::B] {
        let profile = config.profile.leg(role);
        groups
            .get(profile.codec_group)
            .with_context(|| format!("{:?}-leg profile", role))?;
    }
    let snapshot = groups.snapshot();
    let mut ids: Vec<_> = snapshot.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let group = &snapshot[&id];
        let codecs: Vec<String> = group.codecs.iter().map(|c| c.to_string()).collect();
        println!("codec group {} ({:?}): {}", id, group.mode, codecs.join(", "));
    }
    println!("Configuration is valid.");
    Ok(())
}

fn offer(config: &Config, role: LegRole, path: &str) -> Result<()> {
    let body = read_sdp(path)?;
    let groups = config.codec_groups();

    let inbound = config.profile.leg(role);
    let allow = groups.get(inbound.codec_group)?;
    let mut negotiated = Vec::new();
    let processed = process_offer(&body, &allow, &inbound.media, &mut negotiated, false)?;
    println!("# processed by {:?}-leg", role);
    print!("{}", processed);

    let outbound = config.profile.leg(role.complement());
    let allow = groups.get(outbound.codec_group)?;
    let relayed = filter_offer(&processed, &allow, &outbound.media, &[])?;
    println!("# sent by {:?}-leg", role.complement());
    print!("{}", relayed);
    Ok(())
}

fn answer(config: &Config, role: LegRole, offer_path: &str, answer_path: &str) -> Result<()> {
    let offer = read_sdp(offer_path)?;
    let body = read_sdp(answer_path)?;
    let profile = config.profile.leg(role);
    let allow = config.codec_groups().get(profile.codec_group)?;

    let mut negotiated = Vec::new();
    process_offer(&offer, &allow, &profile.media, &mut negotiated, false)?;
    let answer = process_answer(Some(&body), &mut negotiated, &profile.media, true)?;
    if let Some(answer) = answer {
        println!("# answered by {:?}-leg", role);
        print!("{}", answer);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.conf {
        Config::load(path)?
    } else {
        Config::default()
    };

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }

    let mut guard_holder = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        guard_holder = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }
    let _ = guard_holder; // keep the guard alive

    info!(
        "{} started at {}",
        version::get_short_version(),
        Utc::now()
    );

    let result = match cli.command {
        Commands::Check => check(&config),
        Commands::Offer { leg, sdp } => offer(&config, leg.into(), &sdp),
        Commands::Answer { leg, offer, sdp } => answer(&config, leg.into(), &offer, &sdp),
    };
    if let Err(ref e) = result {
        tracing::error!("{:#}", e);
    }
    result
}
