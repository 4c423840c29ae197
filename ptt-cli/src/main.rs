//! PHY Test Tool
//!
//! Runs a CMD device and a DUT device on a simulated 802.15.4 link. Host
//! commands are read from stdin, one per line, and the CMD device's replies
//! are printed to stdout.

mod console;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ptt_sim::{spawn_pair, AirPair, HostOutput};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings::Settings;

/// 802.15.4 PHY test tool on a simulated CMD/DUT pair.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON settings file with optional `engine` and `link` sections.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the simulated link, overriding the settings file.
    #[arg(long)]
    seed: Option<u64>,

    /// Keep printing replies this long after stdin closes.
    #[arg(long, default_value_t = 1_000)]
    linger_ms: u64,

    /// Print a `> ` marker for every prompt.
    #[arg(long)]
    prompts: bool,

    /// List host commands and exit.
    #[arg(long)]
    list_commands: bool,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    dump_settings: bool,
}

fn print_output(output: HostOutput, prompts: bool) {
    match output {
        HostOutput::Line(line) => println!("{}", line),
        HostOutput::Prompt if prompts => println!(">"),
        HostOutput::Prompt => {}
    }
}

async fn run(pair: &mut AirPair, args: &Args) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let Some(line) = console::normalize_line(&line) else {
                    continue;
                };
                tracing::debug!("host -> {}", line);
                pair.cmd.host_line(line).await?;
            }
            output = pair.host_rx.recv() => {
                let Some(output) = output else {
                    anyhow::bail!("CMD device stopped");
                };
                print_output(output, args.prompts);
            }
        }
    }

    // replies to the last commands may still be on their way
    let linger = Duration::from_millis(args.linger_ms);
    while let Ok(Some(output)) = tokio::time::timeout(linger, pair.host_rx.recv()).await {
        print_output(output, args.prompts);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ptt_cli=info,ptt_engine=info,ptt_protocol=info,ptt_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.list_commands {
        for usage in console::command_list() {
            println!("{}", usage);
        }
        return Ok(());
    }

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        settings.link.seed = seed;
    }
    if args.dump_settings {
        println!("{}", settings.to_json()?);
        return Ok(());
    }

    tracing::info!("Starting PHY test tool");

    let mut pair = spawn_pair(settings.engine, settings.link).context("starting devices")?;
    let result = run(&mut pair, &args).await;
    pair.shutdown().await;
    result
}
