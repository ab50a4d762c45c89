//! Basic retry and circuit breaker usage example
//!
//! Run with `RUST_LOG=debug` to see the breaker's own logging.

use resilience_machines::{
    AttemptContext, CallOptions, FailureKind, Resilience, ResilienceError, StaticConfig,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[defaults.breaker]
failure_rate_threshold = 50.0
window_size = 10
minimum_number_of_calls = 4
wait_duration_in_open_state_ms = 500
permitted_calls_in_half_open_state = 2

[defaults.retry]
max_attempts = 3
backoff = { kind = "exponential", base_delay_ms = 20, multiplier = 2.0, max_delay_ms = 100 }

[resources.employees.breaker]
slow_call_duration_threshold_ms = 200
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Retry + Circuit Breaker Example ===\n");

    let resilience = Resilience::builder()
        .config_source(StaticConfig::from_toml_str(CONFIG)?)
        .log_events()
        .build();

    // A flaky call that recovers on its third attempt
    println!("--- Flaky call ---");
    let mut attempts = AttemptContext::new();
    let mut calls = 0;
    let result = resilience.execute_in("employees", &mut attempts, || {
        calls += 1;
        if calls < 3 {
            Err(format!("timeout #{calls}"))
        } else {
            Ok("employee list".to_string())
        }
    });
    println!("result: {result:?} after {} invocations\n", attempts.invocations());

    // A dead dependency: retries exhaust, the retry fallback answers
    println!("--- Dead dependency ---");
    for i in 1..=3 {
        let result = resilience.execute("employees", (
            || Err::<String, _>("connection refused".to_string()),
            CallOptions::new()
                .with_breaker_fallback(|ctx, _failure| {
                    Ok(format!("breaker fallback ({} is {})", ctx.circuit_name, ctx.state))
                })
                .with_retry_fallback(|ctx, failure| {
                    Ok(format!(
                        "retry fallback after {} attempts: {:?}",
                        ctx.attempts,
                        failure.error()
                    ))
                }),
        ));
        println!("call {i}: {result:?}");
    }
    println!("\n{}\n", resilience.status("employees")?);

    // Without fallbacks the rejection reaches the caller
    println!("--- Call while open ---");
    match resilience.execute("employees", || Ok::<_, String>("should be rejected")) {
        Err(ResilienceError::Rejected(rejected)) => println!("rejected: {rejected}"),
        other => println!("unexpected: {other:?}"),
    }

    // Wait for half-open and let the probes close the circuit
    println!("\n--- Recovery ---");
    std::thread::sleep(Duration::from_millis(600));
    for _ in 0..2 {
        let result = resilience.execute("employees", (
            || Ok::<_, String>("employee list".to_string()),
            CallOptions::new().with_retry_fallback_for(&[FailureKind::Permanent], |_ctx, _failure| {
                Ok("unused".to_string())
            }),
        ));
        println!("probe: {result:?}");
    }
    println!("\n{}", resilience.status("employees")?);

    Ok(())
}
