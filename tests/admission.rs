use quotagate::telemetry::{AdmissionEvent, MemorySink};
use quotagate::{
    BlockState, Clock, Decision, DenyReason, EscalationPolicy, InMemoryQuotaStore, LimiterConfig, ManualClock,
    QuotaEngine, Tier, TierLimits, TierTable,
};
use std::time::Duration;

// 2024-03-10T12:00:00Z
const NOON: u64 = 1_710_072_000_000;
// 2024-03-11T00:00:00Z
const NEXT_MIDNIGHT: u64 = 1_710_115_200_000;

fn engine_with(clock: &ManualClock, limits: TierLimits, escalation: EscalationPolicy) -> QuotaEngine<InMemoryQuotaStore> {
    let config = LimiterConfig::builder()
        .tiers(TierTable::default().with_limits(Tier::Free, limits).unwrap())
        .escalation(escalation)
        .build()
        .unwrap();
    QuotaEngine::new(InMemoryQuotaStore::with_clock(clock.clone()), config)
}

async fn hit(engine: &QuotaEngine<InMemoryQuotaStore>, key: &str) -> Decision {
    let d = engine.evaluate(key, Tier::Free, "/v1/content").await;
    if d.is_allowed() {
        engine.release(key).await.unwrap();
    }
    d
}

#[tokio::test]
async fn window_cap_denies_next_and_resets() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(5, 100, 1_000, 10).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::never());

    for i in 0..5 {
        let d = hit(&e, "k").await;
        assert!(d.is_allowed(), "request {} should pass", i + 1);
        clock.advance(1_000);
    }
    let d = hit(&e, "k").await;
    assert_eq!(d.reason(), Some(DenyReason::WindowLimitExceeded));
    assert_eq!(d.http_status(), 429);

    clock.set(NOON + 60_000);
    assert!(hit(&e, "k").await.is_allowed());
}

#[tokio::test]
async fn window_boundary_is_exact() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(3, 100, 1_000, 10).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::never());

    for _ in 0..3 {
        assert!(hit(&e, "k").await.is_allowed());
    }
    clock.set(NOON + 60_000 - 1);
    assert_eq!(hit(&e, "k").await.reason(), Some(DenyReason::WindowLimitExceeded));

    clock.set(NOON + 60_000);
    assert!(hit(&e, "k").await.is_allowed());
    let record = e.inspect("k").await.unwrap().unwrap();
    assert_eq!(record.window_requests, 1);
    assert_eq!(record.window_start, NOON + 60_000);
}

#[tokio::test]
async fn burst_precedes_window() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(1_000, 10, 100_000, 50).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::default());

    for _ in 0..10 {
        assert!(hit(&e, "k").await.is_allowed());
        clock.advance(180);
    }
    let d = hit(&e, "k").await;
    assert_eq!(d.reason(), Some(DenyReason::BurstLimitExceeded));

    let record = e.inspect("k").await.unwrap().unwrap();
    assert_eq!(record.window_requests, 10);
    assert_eq!(record.daily_requests, 10);
    assert_eq!(record.violations, 1);
}

#[tokio::test]
async fn daily_cap_outlives_window_resets() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(100, 100, 5, 10).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::never());

    for _ in 0..5 {
        assert!(hit(&e, "k").await.is_allowed());
    }
    assert_eq!(hit(&e, "k").await.reason(), Some(DenyReason::DailyLimitExceeded));

    clock.advance(60_000);
    let d = hit(&e, "k").await;
    assert_eq!(d.reason(), Some(DenyReason::DailyLimitExceeded));
    assert_eq!(d.headers().reset_secs, (NEXT_MIDNIGHT - NOON - 60_000) / 1_000);

    clock.set(NEXT_MIDNIGHT - 1);
    assert_eq!(hit(&e, "k").await.reason(), Some(DenyReason::DailyLimitExceeded));
    clock.set(NEXT_MIDNIGHT);
    assert!(hit(&e, "k").await.is_allowed());
    let record = e.inspect("k").await.unwrap().unwrap();
    assert_eq!(record.daily_requests, 1);
    assert_eq!(record.daily_reset_at, NEXT_MIDNIGHT + 86_400_000);
}

/// Drive `key` to its next quota violation, sitting out any block first.
async fn next_violation(e: &QuotaEngine<InMemoryQuotaStore>, clock: &ManualClock, key: &str) -> Decision {
    loop {
        if let BlockState::Blocked { until } = e.block_state(key).await.unwrap() {
            clock.set(until);
        }
        let d = hit(e, key).await;
        match d.reason() {
            None => continue,
            Some(DenyReason::Blocked) => panic!("block should have expired"),
            Some(_) => return d,
        }
    }
}

#[tokio::test]
async fn escalation_thresholds() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(1_000, 1, 100_000, 10).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::default());

    let expected = [
        (1, Duration::from_secs(10)),
        (2, Duration::from_secs(10)),
        (3, Duration::from_secs(5 * 60)),
        (4, Duration::from_secs(5 * 60)),
        (5, Duration::from_secs(15 * 60)),
        (9, Duration::from_secs(15 * 60)),
        (10, Duration::from_secs(60 * 60)),
    ];
    let mut violations = 0;
    for (target, retry) in expected {
        let mut d = next_violation(&e, &clock, "k").await;
        violations += 1;
        while violations < target {
            d = next_violation(&e, &clock, "k").await;
            violations += 1;
        }
        assert_eq!(d.reason(), Some(DenyReason::BurstLimitExceeded));
        assert_eq!(d.retry_after(), Some(retry), "after {} violations", target);
        assert_eq!(e.inspect("k").await.unwrap().unwrap().violations, target);
    }

    let until = match e.block_state("k").await.unwrap() {
        BlockState::Blocked { until } => until,
        BlockState::Active => panic!("expected a block"),
    };
    let now = clock.now_millis();
    assert_eq!(until, now + 60 * 60 * 1_000);

    clock.set(until - 1);
    assert!(e.is_blocked("k").await.unwrap());
    let d = hit(&e, "k").await;
    assert_eq!(d.reason(), Some(DenyReason::Blocked));
    assert_eq!(d.retry_after(), Some(Duration::from_millis(1)));
    // Requests during a block are not violations.
    assert_eq!(e.inspect("k").await.unwrap().unwrap().violations, 10);

    clock.set(until);
    assert!(!e.is_blocked("k").await.unwrap());
    assert!(hit(&e, "k").await.is_allowed());
}

#[tokio::test]
async fn free_tier_wallet_scenario() {
    let clock = ManualClock::new(NOON);
    let sink = MemorySink::new();
    let store = InMemoryQuotaStore::with_clock(clock.clone());
    let e = QuotaEngine::with_telemetry(store, LimiterConfig::default(), sink.clone());

    for i in 0..10 {
        let d = e.evaluate("wallet-A", Tier::Free, "/v1/quote").await;
        assert!(d.is_allowed(), "request {} should pass", i + 1);
        e.release("wallet-A").await.unwrap();
        clock.advance(300);
    }

    let d = e.evaluate("wallet-A", Tier::Free, "/v1/quote").await;
    assert_eq!(d.reason_code(), "BURST_LIMIT_EXCEEDED");
    assert!(!e.is_blocked("wallet-A").await.unwrap());
    let record = e.inspect("wallet-A").await.unwrap().unwrap();
    assert_eq!(record.violations, 1);
    assert_eq!(record.blocked_until, None);

    clock.set(NOON + 10_000);
    match e.evaluate("wallet-A", Tier::Free, "/v1/quote").await {
        Decision::Allowed { limit, remaining, .. } => {
            assert_eq!(limit, 100);
            // 90 left before this one; the denied request consumed nothing.
            assert_eq!(remaining, 89);
        }
        other => panic!("expected allow, got {:?}", other),
    }
    e.release("wallet-A").await.unwrap();

    let events = sink.events();
    let denied: Vec<_> = events.iter().filter(|ev| matches!(ev, AdmissionEvent::Denied { .. })).collect();
    assert_eq!(
        denied,
        vec![&AdmissionEvent::Denied {
            key: "wallet-A".into(),
            reason: DenyReason::BurstLimitExceeded,
            violations: 1,
        }]
    );
    assert!(!events.iter().any(|ev| matches!(ev, AdmissionEvent::BlockStarted { .. })));
}

#[tokio::test]
async fn window_cap_follows_burst_relief() {
    let clock = ManualClock::new(NOON);
    let config = LimiterConfig::builder().burst_window(Duration::from_secs(1)).build().unwrap();
    let e = QuotaEngine::new(InMemoryQuotaStore::with_clock(clock.clone()), config);

    let mut admitted = 0;
    for second in 0..10 {
        clock.set(NOON + second * 1_000);
        for _ in 0..10 {
            assert!(hit(&e, "wallet-A").await.is_allowed());
            admitted += 1;
        }
    }
    assert_eq!(admitted, 100);
    clock.set(NOON + 10_000);
    assert_eq!(hit(&e, "wallet-A").await.reason(), Some(DenyReason::WindowLimitExceeded));
}

#[tokio::test]
async fn unknown_tier_label_gets_free_limits() {
    let clock = ManualClock::new(NOON);
    let e = QuotaEngine::new(InMemoryQuotaStore::with_clock(clock.clone()), LimiterConfig::default());
    let tier = Tier::parse_or_default("platinum");
    assert_eq!(tier, Tier::Free);
    let d = e.evaluate("k", tier, "/a").await;
    assert!(matches!(d, Decision::Allowed { limit: 100, .. }));
}

#[tokio::test]
async fn endpoint_counts_track_admitted_requests_only() {
    let clock = ManualClock::new(NOON);
    let limits = TierLimits::new(100, 2, 1_000, 10).unwrap();
    let e = engine_with(&clock, limits, EscalationPolicy::never());

    hit(&e, "k").await;
    e.evaluate("k", Tier::Free, "/v1/other").await;
    e.release("k").await.unwrap();
    e.evaluate("k", Tier::Free, "/v1/other").await;

    let record = e.inspect("k").await.unwrap().unwrap();
    assert_eq!(record.endpoint_counts.get("/v1/content"), Some(&1));
    assert_eq!(record.endpoint_counts.get("/v1/other"), Some(&1));
}
