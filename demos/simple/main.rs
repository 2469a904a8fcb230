pub fn main() {
    env_logger::init();

    // Reads FLAGVAULT_API_KEY (and optionally FLAGVAULT_BASE_URL).
    let client = flagvault::ClientConfig::from_env()
        .and_then(|config| config.to_client())
        .unwrap();

    println!("Environment: {}", client.environment());

    let enabled = client
        .is_enabled("new-feature", false, None)
        // invalid arguments
        .unwrap_or(false);
    println!("new-feature: {}", enabled);

    let enabled_for_user = client
        .is_enabled("new-feature", false, Some("user-123"))
        .unwrap_or(false);
    println!("new-feature for user-123: {}", enabled_for_user);
}
