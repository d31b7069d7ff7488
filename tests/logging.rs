use gatekeeper::infrastructure::mocks::{MockCaptureLayer, MockClock};
use gatekeeper::{BanRule, Gatekeeper, RateRule};
use http::Request;
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

fn request(client: &str) -> Request<()> {
    Request::builder()
        .uri("/login")
        .header("x-client-id", client)
        .body(())
        .unwrap()
}

#[test]
fn test_gate_logs_configuration_and_ban_lifecycle() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let clock = Arc::new(MockClock::new(Instant::now()));

    tracing::subscriber::with_default(subscriber, || {
        let gate = Gatekeeper::builder()
            .with_ban_rule(BanRule::per_secs(2, 10, 30).unwrap())
            .with_rate_rule(RateRule::per_secs(5, 1).unwrap())
            .with_client_header("x-client-id")
            .with_clock(clock.clone())
            .build()
            .unwrap();

        gate.report(&request("eve"), None);
        gate.report(&request("eve"), None);
        assert!(gate.check(None, &request("eve"), None).is_some());

        clock.advance_secs(30);
        assert!(gate.check(None, &request("eve"), None).is_none());
    });

    let events = capture.get_captured();

    let configured: Vec<_> = events
        .iter()
        .filter(|e| e.level == Level::INFO && e.message.contains("gatekeeper configured"))
        .collect();
    assert_eq!(configured.len(), 1);
    assert_eq!(configured[0].field("rate_rules"), Some("1"));
    assert_eq!(configured[0].field("ban"), Some("true"));

    let banned: Vec<_> = events
        .iter()
        .filter(|e| e.level == Level::WARN && e.message.contains("client banned"))
        .collect();
    assert_eq!(banned.len(), 1);
    assert_eq!(banned[0].field("client"), Some("eve"));
    assert_eq!(banned[0].field("retry_after"), Some("30"));

    assert_eq!(capture.count_matching("ban lifted"), 1);
}
