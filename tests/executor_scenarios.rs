//! End-to-end executor behavior on a paused clock.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilient_gateway::config::ResilienceConfig;
use resilient_gateway::resilience::fallback::roles;
use resilient_gateway::resilience::{
    CallGate, CircuitState, ExecuteOptions, FailureKind, OutcomeKind, ProviderDescriptor, RawFailure,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::executor_with;

fn trip(executor: &resilient_gateway::ResilientExecutor, provider_id: &str) {
    for _ in 0..executor.config().failure_threshold {
        executor.registry().record_outcome(provider_id, false);
    }
    assert_eq!(executor.circuit_state(provider_id), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_recovers_after_server_faults() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("github", 0)];
    let calls = AtomicU32::new(0);

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 2 {
                    Err(RawFailure::http(500))
                } else {
                    Ok("issue #12")
                }
            }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.value(), Some(&"issue #12"));
    assert_eq!(outcome.attempts_made, 3);
    assert_eq!(outcome.provider_id.as_deref(), Some("github"));
    assert_eq!(outcome.attempts.len(), 2);
    assert!(outcome.attempts.iter().all(|a| a.kind == FailureKind::ServerFault));
    assert_eq!(executor.circuit_state("github"), CircuitState::Closed);
    assert_eq!(executor.registry().snapshot_of("github").unwrap().consecutive_failures, 0);
    assert!(!outcome.circuit_tripped);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_retry_after_overrides_backoff() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("claude-main", 0)];
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err(RawFailure::http(429).with_header("retry-after", "2"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].kind, FailureKind::RateLimited);
    assert_eq!(outcome.attempts[0].delay_before_next, Duration::from_secs(2));
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_open_circuit_skipped_without_sleep() {
    let executor = executor_with(ResilienceConfig::default());
    trip(&executor, "p1");

    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];
    let called = Mutex::new(Vec::new());
    let start = Instant::now();

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |p| {
            called.lock().unwrap().push(p.id.clone());
            async move { Ok(p.id) }
        })
        .await;

    assert_eq!(outcome.value().map(String::as_str), Some("p2"));
    assert_eq!(outcome.attempts_made, 1);
    assert!(outcome.circuit_tripped);
    assert_eq!(*called.lock().unwrap(), vec!["p2".to_string()]);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_invalid_request_is_terminal() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];
    let calls = AtomicU32::new(0);

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RawFailure::http(400)) }
        })
        .await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, OutcomeKind::Failure(FailureKind::InvalidRequest));
    assert_eq!(failure.provider_id.as_deref(), Some("p1"));
    assert!(failure.is_terminal());
    assert_eq!(outcome.attempts_made, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausts_every_provider() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new(), |_| async {
            Err(RawFailure::http(503))
        })
        .await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, OutcomeKind::Failure(FailureKind::ServerFault));
    assert!(failure.is_exhausted());
    assert!(failure.message.starts_with("all providers exhausted"));
    assert_eq!(outcome.attempts_made, 6);
    assert_eq!(outcome.attempts.iter().filter(|a| a.provider_id == "p2").count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_threshold_opens_circuit_mid_call() {
    let config = ResilienceConfig {
        failure_threshold: 2,
        ..ResilienceConfig::default()
    };
    let executor = executor_with(config);
    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |p| async move {
            if p.id == "p1" {
                Err(RawFailure::http(502))
            } else {
                Ok(p.id)
            }
        })
        .await;

    assert_eq!(outcome.value().map(String::as_str), Some("p2"));
    assert_eq!(outcome.attempts_made, 3);
    assert!(outcome.circuit_tripped);
    assert_eq!(executor.circuit_state("p1"), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("p1", 0)];
    let token = CancellationToken::new();
    token.cancel();

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new().with_cancel(token), |_| async { Ok(()) })
        .await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, OutcomeKind::Cancelled);
    assert!(failure.is_interrupted());
    assert_eq!(outcome.attempts_made, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_during_backoff() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("p1", 0)];
    let token = CancellationToken::new();
    let canceller = token.clone();

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new().with_cancel(token), |_| {
            let canceller = canceller.clone();
            async move {
                let trigger = canceller.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    trigger.cancel();
                });
                Err(RawFailure::http(429).with_header("retry-after", "5"))
            }
        })
        .await;

    assert_eq!(outcome.failure().unwrap().kind, OutcomeKind::Cancelled);
    assert_eq!(outcome.attempts_made, 1);
    assert!(outcome.total_elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_before_long_sleep() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("p1", 0)];
    let start = Instant::now();

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(
            &providers,
            ExecuteOptions::new().with_timeout(Duration::from_millis(100)),
            |_| async { Err(RawFailure::http(429).with_header("retry-after", "1")) },
        )
        .await;

    assert_eq!(outcome.failure().unwrap().kind, OutcomeKind::DeadlineExceeded);
    assert_eq!(outcome.attempts_made, 1);
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_retry_after_falls_back() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![
        ProviderDescriptor::for_role("claude-sonnet", roles::MAIN),
        ProviderDescriptor::for_role("gpt-4o", roles::FALLBACK),
    ];
    let start = Instant::now();

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |p| async move {
            if p.id == "claude-sonnet" {
                Err(RawFailure::http(429).with_header("retry-after", "60"))
            } else {
                Ok(p.id)
            }
        })
        .await;

    assert_eq!(outcome.value().map(String::as_str), Some("gpt-4o"));
    assert_eq!(outcome.attempts_made, 2);
    assert_eq!(outcome.attempts[0].delay_before_next, Duration::from_secs(60));
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_all_circuits_open_fails_fast() {
    let executor = executor_with(ResilienceConfig::default());
    trip(&executor, "p1");
    trip(&executor, "p2");
    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];
    let calls = AtomicU32::new(0);

    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert_eq!(outcome.failure().unwrap().kind, OutcomeKind::CircuitOpen);
    assert_eq!(outcome.attempts_made, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(outcome.circuit_tripped);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_admits_single_probe() {
    let config = ResilienceConfig {
        cooldown_ms: 1_000,
        ..ResilienceConfig::default()
    };
    let executor = executor_with(config);
    trip(&executor, "p1");
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let providers = vec![ProviderDescriptor::new("p1", 0)];
    let release = Arc::new(Notify::new());
    let waiter = release.clone();

    let probe = executor.execute(&providers, ExecuteOptions::new(), move |_| {
        let waiter = waiter.clone();
        async move {
            waiter.notified().await;
            Ok("probe")
        }
    });
    let blocked = executor.execute(&providers, ExecuteOptions::new(), |_| async { Ok("second") });
    let releaser = async {
        release.notify_one();
    };

    let (probe, blocked, _) = tokio::join!(probe, blocked, releaser);

    assert_eq!(probe.value(), Some(&"probe"));
    assert_eq!(blocked.failure().unwrap().kind, OutcomeKind::CircuitProbing);
    assert_eq!(blocked.attempts_made, 0);
    assert!(!blocked.circuit_tripped);
    assert_eq!(executor.circuit_state("p1"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens() {
    let config = ResilienceConfig {
        cooldown_ms: 1_000,
        ..ResilienceConfig::default()
    };
    let executor = executor_with(config);
    trip(&executor, "p1");
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let providers = vec![ProviderDescriptor::new("p1", 0)];
    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new(), |_| async { Err(RawFailure::http(500)) })
        .await;

    assert_eq!(outcome.attempts_made, 1);
    assert!(outcome.circuit_tripped);
    assert_eq!(executor.circuit_state("p1"), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_probing_outranks_open_when_nothing_ran() {
    let config = ResilienceConfig {
        cooldown_ms: 1_000,
        ..ResilienceConfig::default()
    };
    let executor = executor_with(config);
    trip(&executor, "p1");
    tokio::time::advance(Duration::from_millis(1_001)).await;
    assert_eq!(executor.registry().before_call("p1"), CallGate::Probe);
    trip(&executor, "p2");

    let providers = vec![ProviderDescriptor::new("p1", 0), ProviderDescriptor::new("p2", 1)];
    let outcome: resilient_gateway::ExecutionOutcome<()> = executor
        .execute(&providers, ExecuteOptions::new(), |_| async { Ok(()) })
        .await;

    assert_eq!(outcome.failure().unwrap().kind, OutcomeKind::CircuitProbing);
    assert_eq!(outcome.attempts_made, 0);
    assert!(outcome.circuit_tripped);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_reset_header_still_falls_back() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![ProviderDescriptor::new("github", 0), ProviderDescriptor::new("mirror", 1)];

    let outcome = executor
        .execute(&providers, ExecuteOptions::new(), |p| async move {
            if p.id == "github" {
                Err(RawFailure::http(403)
                    .with_header("x-ratelimit-remaining", "0")
                    .with_header("x-ratelimit-reset", "18446744073709551615"))
            } else {
                Ok(p.id)
            }
        })
        .await;

    assert_eq!(outcome.value().map(String::as_str), Some("mirror"));
    assert_eq!(outcome.attempts.len(), 3);
    assert!(outcome.attempts.iter().all(|a| a.kind == FailureKind::RateLimited));
}

#[tokio::test(start_paused = true)]
async fn test_capability_filter() {
    let executor = executor_with(ResilienceConfig::default());
    let providers = vec![
        ProviderDescriptor::for_role("claude-sonnet", roles::MAIN),
        ProviderDescriptor::for_role("perplexity-sonar", roles::RESEARCH),
    ];

    let outcome = executor
        .execute(
            &providers,
            ExecuteOptions::new().with_capability(roles::RESEARCH),
            |p| async move { Ok(p.id) },
        )
        .await;
    assert_eq!(outcome.value().map(String::as_str), Some("perplexity-sonar"));

    let outcome: resilient_gateway::ExecutionOutcome<String> = executor
        .execute(&providers, ExecuteOptions::new().with_capability("vision"), |p| async move { Ok(p.id) })
        .await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, OutcomeKind::Failure(FailureKind::Unknown));
    assert_eq!(failure.message, "no providers with capability 'vision'");
}

#[tokio::test(start_paused = true)]
async fn test_state_reads_are_pure() {
    let executor = executor_with(ResilienceConfig::default());
    for _ in 0..10 {
        assert_eq!(executor.circuit_state("never-called"), CircuitState::Closed);
    }
    assert!(executor.registry().is_empty());

    trip(&executor, "p1");
    for _ in 0..10 {
        assert_eq!(executor.circuit_state("p1"), CircuitState::Open);
    }
}
