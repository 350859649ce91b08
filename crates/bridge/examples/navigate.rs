//! Navigation example - open a page, navigate, go back, watch resolutions
//!
//! Needs Chrome with remote debugging:
//! `chrome --headless --remote-debugging-port=9222`, then pass the
//! browser websocket URL from `http://localhost:9222/json/version`.

use bridge::{BrowserSession, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cdp_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());

    let session = BrowserSession::new(SessionConfig {
        cdp_url,
        ..Default::default()
    });
    println!("Session {}", session.config.id);

    let mut resolutions = session.navigation_events();
    tokio::spawn(async move {
        while let Ok(event) = resolutions.recv().await {
            println!("Resolved {}: {:?}", event.handle, event.outcome);
        }
    });

    session.start().await?;
    let target_id = session.open_page().await?;
    println!("Opened page {}", target_id);

    for url in ["https://www.rust-lang.org", "https://crates.io"] {
        match session.navigate(url).await {
            Ok(Some(response)) => println!("{} -> {} {}", url, response.status, response.url),
            Ok(None) => println!("{} -> same document", url),
            Err(e) => println!("{} failed: {}", url, e),
        }
    }

    let back = session.go_back().await?;
    println!("Back at {} ({})", back.url, back.status);

    // Two navigations racing: the first is overridden by the second
    let first = session.navigate("https://example.com");
    let second = session.navigate("https://example.org");
    let (first, second) = tokio::join!(first, second);
    println!("first: {:?}", first.map(|r| r.map(|m| m.url)));
    println!("second: {:?}", second.map(|r| r.map(|m| m.url)));

    session.stop().await?;
    Ok(())
}
