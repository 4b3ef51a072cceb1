use posthog_deferred::{Capture, ClientConfig, Event, FeatureFlag, LocalActions, QueueScheduler};

pub fn main() {
    env_logger::init();

    let api_key = std::env::var("POSTHOG_API_KEY").unwrap();
    let client = ClientConfig::from_api_key(api_key)
        .before_send(|event: Event| Some(event.with_property("source", "simple-demo")))
        .to_client();

    // Events are queued here and sent by a background thread.
    let queue = QueueScheduler::start().unwrap();
    // Flag reads run inline and wait for the backend.
    let actions = LocalActions::new();

    client
        .capture(&queue, Capture::new("test-subject", "demo_started"))
        .unwrap();

    let enabled = client
        .is_feature_enabled(&actions, FeatureFlag::new("a-boolean-flag", "test-subject"))
        .unwrap()
        // default value
        .unwrap_or(false);

    println!("Enabled: {:?}", enabled);

    // Block until queued events are sent.
    queue.shutdown().unwrap();
}
