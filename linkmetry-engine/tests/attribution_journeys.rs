//! Integration tests for attribution journeys
//!
//! Records clicks and conversions through the public API and checks the
//! credit each model assigns, the channel roll-up, and persistence across a
//! reopened on-disk database.

use chrono::{DateTime, Duration, Utc};
use linkmetry_engine::attribution::{GoalType, NewConversionGoal};
use linkmetry_engine::{
    AnalyticsConfig, AnalyticsDb, AttributionEngine, AttributionModel, ClickEvent,
    ConversionEvent, LookbackDays, Reporter, SessionId, StorageConfig, StorageEngine,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn click(session: &str, source: &str, medium: &str, at: DateTime<Utc>) -> ClickEvent {
    ClickEvent::from_landing_url(
        SessionId::from(session),
        "summer-sale",
        &format!("https://shop.example/sale?utm_source={source}&utm_medium={medium}&utm_campaign=summer"),
        at,
    )
}

fn conversion(
    id: &str,
    goal_id: uuid::Uuid,
    session: &str,
    value: f64,
    at: DateTime<Utc>,
) -> ConversionEvent {
    ConversionEvent {
        conversion_id: id.into(),
        short_code: "summer-sale".into(),
        goal_id,
        session_id: SessionId::from(session),
        value: Some(value),
        timestamp: at,
        attribution_model: AttributionModel::PositionBased,
    }
}

fn purchase_goal() -> NewConversionGoal {
    NewConversionGoal {
        owner: "shop".into(),
        name: "Purchase".into(),
        goal_type: GoalType::Purchase,
        target: "/order/complete".into(),
        value: 0.0,
        attribution_window_days: Some(30),
    }
}

// =============================================================================
// Journeys
// =============================================================================

#[tokio::test]
async fn test_every_model_distributes_full_value() {
    let engine = AttributionEngine::with_cozo(
        AnalyticsDb::in_memory().unwrap(),
        &AnalyticsConfig::default(),
    );
    let goal = engine.create_goal(purchase_goal()).await.unwrap();
    let start = Utc::now() - Duration::days(20);

    let channels = [
        ("google", "cpc"),
        ("facebook", "social"),
        ("newsletter", "email"),
        ("google", "organic"),
        ("partner", "referral"),
    ];
    for (day, (source, medium)) in channels.iter().enumerate() {
        engine
            .record_touchpoint(&click("buyer", source, medium, start + Duration::days(day as i64 * 3)))
            .await
            .unwrap();
    }
    engine
        .record_conversion(conversion("order-7", goal.id, "buyer", 123.45, start + Duration::days(14)))
        .await
        .unwrap();

    let report = engine.get_attribution_report("order-7").await.unwrap();
    assert_eq!(report.journey.len(), 5);
    for result in &report.models {
        let total = result.total_attributed();
        assert!((total - 123.45).abs() < 1e-6, "{}: {total}", result.model);
        let weights: f64 = result.touchpoints.iter().map(|t| t.weight).sum();
        assert!((weights - 1.0).abs() < 1e-9);
    }

    let last = report.model(AttributionModel::LastTouch).unwrap();
    assert_eq!(last.touchpoints[4].attribution_value, 123.45);
    assert_eq!(last.touchpoints[4].touchpoint.campaign.source.as_deref(), Some("partner"));
}

#[tokio::test]
async fn test_channel_report_through_reporter() {
    let reporter = Reporter::from_db(AnalyticsDb::in_memory().unwrap(), &AnalyticsConfig::default());
    let engine = reporter.attribution();
    let goal = engine.create_goal(purchase_goal()).await.unwrap();
    let now = Utc::now();

    // Two journeys: search then email, and email alone
    engine
        .record_touchpoint(&click("a", "google", "cpc", now - Duration::days(3)))
        .await
        .unwrap();
    engine
        .record_touchpoint(&click("a", "newsletter", "email", now - Duration::days(2)))
        .await
        .unwrap();
    engine
        .record_touchpoint(&click("b", "newsletter", "email", now - Duration::days(1)))
        .await
        .unwrap();
    engine
        .record_conversion(conversion("order-a", goal.id, "a", 60.0, now - Duration::hours(2)))
        .await
        .unwrap();
    engine
        .record_conversion(conversion("order-b", goal.id, "b", 40.0, now - Duration::hours(1)))
        .await
        .unwrap();

    let report = reporter
        .channel_report("summer-sale", LookbackDays::new(7).unwrap(), AttributionModel::FirstTouch)
        .await
        .unwrap();
    assert_eq!(report.conversions_considered, 2);
    let google = report.channels.iter().find(|c| c.source == "google").unwrap();
    let email = report.channels.iter().find(|c| c.source == "newsletter").unwrap();
    assert!((google.attributed_value - 60.0).abs() < 1e-9);
    assert!((email.attributed_value - 40.0).abs() < 1e-9);
    assert_eq!(email.medium, "email");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["model"], "first_touch");
    assert_eq!(json["days"], 7);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_rocksdb_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = AnalyticsConfig {
        storage: StorageConfig {
            engine: StorageEngine::Rocksdb,
            db_path: dir.path().join("analytics"),
        },
        ..Default::default()
    };
    let now = Utc::now();

    {
        let engine = AttributionEngine::with_cozo(AnalyticsDb::open(&config.storage).unwrap(), &config);
        let goal = engine.create_goal(purchase_goal()).await.unwrap();
        engine
            .record_touchpoint(&click("persisted", "bing", "cpc", now - Duration::days(1)))
            .await
            .unwrap();
        engine
            .record_conversion(conversion("order-disk", goal.id, "persisted", 10.0, now))
            .await
            .unwrap();
    }

    let engine = AttributionEngine::with_cozo(AnalyticsDb::open(&config.storage).unwrap(), &config);
    let journey = engine.get_conversion_journey("order-disk").await.unwrap();
    assert_eq!(journey.len(), 1);
    assert_eq!(journey[0].campaign.source.as_deref(), Some("bing"));
    assert_eq!(journey[0].conversion_id.as_deref(), Some("order-disk"));

    let conversion = engine.get_conversion("order-disk").await.unwrap();
    assert_eq!(conversion.attribution_model, AttributionModel::PositionBased);
}
