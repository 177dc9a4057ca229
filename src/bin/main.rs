use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use itertools::Itertools;
use std::time::Duration;
use tokio::select;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portfolio_dashboard::client::{
    ChannelHandler, ClientConfig, ConnectionState, ReconnectingClient,
};
use portfolio_dashboard::config::{ServerConfig, DEFAULT_ADDRESS};
use portfolio_dashboard::error::Error;
use portfolio_dashboard::{server, ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    // used when no subcommand is given
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "DASHBOARD_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,
    #[arg(long, env = "DASHBOARD_TICK_MS", default_value = "5000")]
    tick_ms: u64,
    #[arg(long, default_value = "64")]
    send_buffer: usize,
    #[arg(long)]
    rng_seed: Option<u64>,
    #[arg(long)]
    no_seed: bool,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            address: args.address,
            tick_interval: Duration::from_millis(args.tick_ms),
            send_buffer: args.send_buffer,
            rng_seed: args.rng_seed,
            seed_demo_data: !args.no_seed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs the HTTP API, the `/ws` channel and the price simulation.
    Serve(ServeArgs),
    /// Follows a running server and prints prices and portfolio updates.
    Watch {
        #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
        url: String,
        #[arg(long)]
        user_id: Option<u64>,
        #[arg(long)]
        portfolio_id: Option<u64>,
        #[arg(long, default_value = "5")]
        max_reconnect_attempts: u32,
        #[arg(long, default_value = "3000")]
        reconnect_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into()
        }))
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let command = args.command.unwrap_or(Commands::Serve(args.serve));

    let result = match command {
        Commands::Serve(serve) => server::start(serve.into()).await,
        Commands::Watch {
            url,
            user_id,
            portfolio_id,
            max_reconnect_attempts,
            reconnect_delay_ms,
        } => {
            let config = ClientConfig {
                url,
                max_reconnect_attempts,
                reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            };
            let subscription = user_id.zip(portfolio_id);
            run_watch(config, subscription).await
        }
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

struct Printer {
    subscription: Option<(u64, u64)>,
}

impl ChannelHandler for Printer {
    fn on_connect(&mut self) -> Vec<ClientMessage> {
        let mut messages = vec![ClientMessage::SubscribePrices];
        if let Some((user_id, portfolio_id)) = self.subscription {
            messages.push(ClientMessage::SubscribePortfolio {
                user_id,
                portfolio_id,
            });
        }
        messages
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { message } => println!("{}", message.cyan()),
            ServerMessage::Pong => {}
            ServerMessage::PriceUpdate { data } => {
                println!("{}", "--- prices".bold());
                for quote in data.iter().sorted_by(|a, b| a.symbol.cmp(&b.symbol)) {
                    println!("{quote}");
                }
            }
            ServerMessage::PortfolioUpdate { data } => {
                println!("{}", data.portfolio);
                for holding in &data.holdings {
                    println!(
                        "  {:<12} {:>10} {:>8}%",
                        holding.symbol, holding.current_value, holding.allocation
                    );
                }
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        error!("{error}");
    }

    fn on_state(&mut self, state: ConnectionState) {
        info!("Connection {:?}", state);
    }
}

async fn run_watch(config: ClientConfig, subscription: Option<(u64, u64)>) -> Result<()> {
    let mut handle = ReconnectingClient::connect(config, Printer { subscription });

    let failed = select! {
        _ = tokio::signal::ctrl_c() => false,
        _ = handle.wait_for_state(ConnectionState::Failed) => true,
    };
    handle.disconnect().await;

    if failed {
        anyhow::bail!("lost the connection to the server");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_serves_with_env() {
        std::env::set_var("DASHBOARD_TICK_MS", "250");
        let args = Args::try_parse_from(["dashboard", "--rng-seed", "3"]).unwrap();
        std::env::remove_var("DASHBOARD_TICK_MS");

        assert!(args.command.is_none());
        let config: ServerConfig = args.serve.into();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.rng_seed, Some(3));
        assert!(config.seed_demo_data);
    }

    #[test]
    fn test_watch_subcommand() {
        let args =
            Args::try_parse_from(["dashboard", "watch", "--user-id", "1", "--portfolio-id", "2"])
                .unwrap();
        match args.command {
            Some(Commands::Watch {
                user_id,
                portfolio_id,
                max_reconnect_attempts,
                ..
            }) => {
                assert_eq!(user_id.zip(portfolio_id), Some((1, 2)));
                assert_eq!(max_reconnect_attempts, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
