//! Interception example - watch a page's fetch/XHR traffic

use bridge::{BrowserSession, Demand, MessageKind, NetworkMessagePattern, SessionConfig};
use futures_util::StreamExt;

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
    session.start().await?;
    session.open_page().await?;

    // First ten responses, then stop asking
    let mut responses = session.network_messages(
        NetworkMessagePattern::kinds([MessageKind::FetchResponse, MessageKind::XhrResponse]),
        Demand::Max(10),
    );
    let failure = session.next_network_message(NetworkMessagePattern::kinds([
        MessageKind::FetchError,
        MessageKind::XhrError,
    ]));

    session.navigate("https://example.com").await?;

    let page = session.current_page().await.ok_or("no page")?;
    page.evaluate(
        "fetch('/').then(r => r.text()); fetch('https://invalid.invalid/').catch(() => {})",
    )
    .await?;

    let reader = tokio::spawn(async move {
        while let Some(message) = responses.next().await {
            match message {
                Ok(message) => println!(
                    "{} {} -> {:?} ({} bytes)",
                    message.kind,
                    message.url,
                    message.status,
                    message.response_body.as_deref().map_or(0, str::len)
                ),
                Err(e) => println!("subscription ended: {}", e),
            }
        }
    });

    match tokio::time::timeout(std::time::Duration::from_secs(5), failure).await {
        Ok(Ok(message)) => println!("First failure: {} {:?}", message.url, message.error),
        Ok(Err(e)) => println!("Waiter failed: {}", e),
        Err(_) => println!("No failures within 5s"),
    }

    session.stop().await?;
    session.interception().close();
    let _ = reader.await;
    Ok(())
}
