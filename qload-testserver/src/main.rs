use std::net::SocketAddr;

use clap::Parser;
use qload_testserver::{TestServerStats, TestServerUrls, router};
use tokio::net::TcpListener;

/// Mock HTTP endpoints for trying qload plans locally.
///
/// Prints `HTTP_URL=<url>` and one `<ROUTE>_URL=<url>` line per route once ready.
#[derive(Debug, Parser)]
#[command(name = "qload-testserver", version)]
struct Args {
    /// Address to listen on; port 0 picks a free port.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let listener = TcpListener::bind(args.bind).await?;
    let urls = TestServerUrls::new(format!("http://{}", listener.local_addr()?));

    println!("HTTP_URL={}", urls.base_url);
    for (route, url) in [
        ("OK", &urls.ok),
        ("SLOW", &urls.slow),
        ("FLAKY", &urls.flaky),
        ("SESSION", &urls.session),
        ("CHAT", &urls.chat),
        ("CHAT_BUSY", &urls.chat_busy),
    ] {
        println!("{route}_URL={url}");
    }

    axum::serve(listener, router(TestServerStats::default()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
