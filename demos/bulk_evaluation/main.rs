use std::time::Instant;

pub fn main() {
    env_logger::init();

    let client = flagvault::ClientConfig::from_env()
        .and_then(|config| config.to_client())
        .unwrap();

    // Fetch all flags once; afterwards `is_enabled` evaluates them locally.
    client.preload_flags().unwrap();

    let flags = client.get_all_flags().unwrap();
    println!("Fetched {} flags", flags.len());

    let mut keys: Vec<_> = flags.keys().collect();
    keys.sort();
    for key in &keys {
        let flag = &flags[*key];
        println!(
            "- {}: enabled={} rollout={:?}% seed={:?}",
            key, flag.is_enabled, flag.rollout_percentage, flag.rollout_seed
        );
    }

    let Some(rollout_flag) = flags.values().find(|flag| flag.rollout_percentage.is_some()) else {
        println!("No flags with rollout percentage found.");
        return;
    };

    println!("Rollout evaluation for {:?}:", rollout_flag.key);
    for user in ["user-123", "user-456", "user-789", "user-abc", "user-def"] {
        let enabled = client
            .is_enabled(&rollout_flag.key, false, Some(user))
            .unwrap_or(false);
        println!("- {}: {}", user, enabled);
    }

    let start = Instant::now();
    for key in &keys {
        let _ = client.is_enabled(key, false, Some("user-123"));
    }
    println!(
        "Evaluated {} flags in {:?} (cache hit rate {:.0}%)",
        keys.len(),
        start.elapsed(),
        client.cache_stats().hit_rate * 100.0
    );

    client.shutdown().unwrap();
}
