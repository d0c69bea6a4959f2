//! Search demo binary
//!
//! Simulates a user typing into a search box while a counter is tapped and a
//! clock ticks, all against real tokio timers.

use ripple_runtime::metrics::MetricsRecorder;
use ripple_runtime::{LiveScheduler, Store};
use search_demo::{Catalog, SearchAction, SearchEnvironment, SearchReducer, SearchState};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LANGUAGES: [&str; 8] = [
    "Rust", "Ruby", "Python", "Go", "Haskell", "Kotlin", "Scala", "Swift",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_demo=debug,ripple_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    println!("=== Search Demo: Ripple runtime ===\n");

    let env = SearchEnvironment::new(
        Arc::new(Catalog::new(LANGUAGES).with_latency(Duration::from_millis(150))),
        LiveScheduler::current()?.shared(),
    );
    let store = Store::new(SearchState::default(), SearchReducer, env);

    let _results = store.subscribe_scoped(
        |state: &SearchState| (state.searching, state.results.clone(), state.error.clone()),
        |(searching, results, error)| match (searching, error) {
            (true, _) => println!("    searching..."),
            (false, Some(error)) => println!("    error: {error}"),
            (false, None) => println!("    results: {results:?}"),
        },
    );

    store.send(SearchAction::StartClock);

    println!(">>> Typing \"rust\" one key every 100ms");
    for query in ["r", "ru", "rus", "rust"] {
        store.send(SearchAction::TextChanged(query.to_string()));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!(">>> Tapping the counter while the search is debounced");
    for _ in 0..3 {
        store.send(SearchAction::Increment);
    }
    println!("    count: {}", store.state(|s| s.count));

    tokio::time::sleep(Duration::from_millis(800)).await;

    println!(">>> Typing \"s\", then clearing before the debounce elapses");
    store.send(SearchAction::TextChanged("s".to_string()));
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.send(SearchAction::TextChanged(String::new()));
    tokio::time::sleep(Duration::from_millis(800)).await;

    store.send(SearchAction::StopClock);
    if let Some(now) = store.state(|s| s.now) {
        println!("    last clock tick: {now}");
    }

    println!("\n>>> Shutting down ({} effect(s) in flight)", store.in_flight_effects());
    store.shutdown();

    if let Some(rendered) = recorder.render() {
        println!("\n>>> Metrics");
        for line in rendered.lines().filter(|line| !line.starts_with('#') && !line.is_empty()) {
            println!("    {line}");
        }
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
