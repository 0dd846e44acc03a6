use chrono::Duration;
use search_cache::{CacheConfig, CachedSearch, FetchError, FetchRequest};
use serde::Serialize;
use std::time::Duration as StdDuration;

#[derive(Serialize)]
struct SongFilters {
    difficulty: &'static str,
    page: u32,
}

/// Stand-in for a slow song search backend
async fn search_songs(request: FetchRequest) -> Result<Vec<String>, FetchError> {
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    let query = request.search_query();
    Ok((1..=3)
        .map(|n| format!("{} result {} ({})", query, n, request.filters()["difficulty"]))
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let config = CacheConfig::new(Duration::milliseconds(300), 10);
    let mut filters = SongFilters {
        difficulty: "beginner",
        page: 1,
    };
    let search: CachedSearch<Vec<String>> =
        CachedSearch::new(config, &filters, "", search_songs)?;
    let mut state = search.subscribe();

    println!("=== Initial search ===");
    let start = std::time::Instant::now();
    state.wait_for(|s| !s.is_loading()).await?;
    println!("First search took: {:?}", start.elapsed());
    println!("Data: {:?}", search.data());

    println!("\n=== Typing a query ===");
    for query in ["m", "mo", "moz", "mozart"] {
        search.update(&filters, query)?;
        tokio::time::sleep(StdDuration::from_millis(100)).await;
    }
    println!("Debounce pending: {}", search.is_debouncing());
    tokio::time::sleep(StdDuration::from_millis(250)).await;
    state.wait_for(|s| !s.is_loading()).await?;
    println!("Data: {:?}", search.data());

    println!("\n=== Paging back and forth ===");
    filters.page = 2;
    search.update(&filters, "mozart")?;
    state.wait_for(|s| !s.is_loading()).await?;

    filters.page = 1;
    let start = std::time::Instant::now();
    search.update(&filters, "mozart")?;
    println!(
        "Cached page took: {:?} (loading: {})",
        start.elapsed(),
        search.is_loading()
    );

    println!("\n=== Cache management ===");
    println!("Cache stats: {:?}", search.stats());
    search.clear_cache();
    println!("Has cache after clear: {}", search.has_cache());
    search.refetch().await;
    println!("Has cache after refetch: {}", search.has_cache());

    Ok(())
}
