//! Wallet CLI: watch one wallet's balance and USD value through the gateway.

mod display;

use anyhow::{Context, Result};
use clap::Parser;
use common::{ClientFrame, ServerMessage};
use display::WalletView;
use futures::{Sink, SinkExt, StreamExt};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Watch a BTC or ETH wallet's balance and value live.
#[derive(Parser, Debug)]
#[command(name = "wallet-cli")]
#[command(version, about, long_about = None)]
struct Args {
    /// Wallet address (BTC or ETH)
    address: String,

    /// Gateway WebSocket URL
    #[arg(long, env = "WEBSOCKET_URL", default_value = "ws://localhost:3000")]
    url: String,

    /// Seconds between automatic balance refreshes
    #[arg(long, default_value_t = 60)]
    refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (ws_stream, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;
    let (mut write, mut read) = ws_stream.split();

    let mut view = WalletView::new(&args.address);
    print(&view.header());
    send(&mut write, &ClientFrame::setup_wallet(args.address.trim())).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut refresh = interval(Duration::from_secs(args.refresh_secs.max(1)));
    refresh.reset();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => print(&view.apply(msg)),
                            Err(e) => debug!("Ignoring unknown server message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        print("\nConnection closed by server\n");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("connection error"),
                }
            }

            line = stdin.next_line() => {
                match line? {
                    Some(line) if line.trim().eq_ignore_ascii_case("q") => break,
                    Some(_) => send(&mut write, &ClientFrame::read_balance()).await?,
                    None => break,
                }
            }

            _ = refresh.tick() => {
                send(&mut write, &ClientFrame::read_balance()).await?;
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = write.send(Message::Close(None)).await;
    print("\n");
    Ok(())
}

async fn send<S>(write: &mut S, frame: &ClientFrame) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(frame)?;
    write
        .send(Message::Text(json))
        .await
        .context("failed to send to gateway")
}

fn print(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}
