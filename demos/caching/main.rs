use std::time::{Duration, Instant};

use flagvault::{ClientConfig, FallbackBehavior};

pub fn main() {
    env_logger::init();

    let client = ClientConfig::from_env()
        .unwrap()
        .cache_ttl(Duration::from_secs(60))
        .cache_max_size(500)
        .cache_refresh_interval(Duration::from_secs(30))
        .cache_fallback_behavior(FallbackBehavior::Stale)
        .to_client()
        .unwrap();

    // The first call hits the API, the second one is served from the cache.
    for attempt in 1..=2 {
        let start = Instant::now();
        let enabled = client.is_enabled("new-feature", false, None).unwrap_or(false);
        println!("Call {}: {} ({:?})", attempt, enabled, start.elapsed());
    }

    let stats = client.cache_stats();
    println!("Cache stats:");
    println!("  size: {}", stats.size);
    println!("  hit rate: {:.1}%", stats.hit_rate * 100.0);
    println!("  memory usage: {} bytes", stats.memory_usage);

    let debug = client.debug_flag("new-feature");
    println!("Debug info: {:#?}", debug);

    client.clear_cache();
    println!("Cache size after clear: {}", client.cache_stats().size);

    client.shutdown().unwrap();
}
