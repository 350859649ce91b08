//! Tail an SSE endpoint and print every event

use sse::{EventSource, EventSourceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/events".to_string());
    println!("Connecting to: {}", url);

    let source = EventSource::new(EventSourceConfig {
        url,
        ..Default::default()
    })?;

    source.on_open(|| println!("Stream open"));
    source.on_message(|event| {
        println!("[message] id={:?} data={:?}", event.id, event.data);
    });
    source.add_event_listener("ping", |event| {
        println!("[ping] {:?}", event.data);
    });

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    source.on_complete(move |completion| {
        println!(
            "Transport finished: status={:?} reconnect={} error={:?}",
            completion.status, completion.should_reconnect, completion.error
        );
        if !completion.should_reconnect {
            let _ = done_tx.send(());
        }
    });

    source.connect();

    tokio::select! {
        _ = done_rx.recv() => {}
        _ = tokio::signal::ctrl_c() => source.disconnect(),
    }

    println!("Last event id: {:?}", source.last_event_id());
    Ok(())
}
