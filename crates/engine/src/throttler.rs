//! Per-provider token-bucket rate limiting and circuit-breaker state.
//!
//! Grounded in `examples/original_source/src/smith/core/throttling.py`'s
//! `TokenBucket`/`CircuitBreaker`/`GlobalThrottler`, restructured as an
//! explicit process-scoped value (per §9's guidance against ambient
//! globals) rather than a module-level singleton.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
}

struct Bucket {
    tokens_rpm: f64,
    tokens_tpm: f64,
    capacity_rpm: f64,
    capacity_tpm: f64,
    rate_rpm: f64, // tokens/sec
    rate_tpm: f64, // tokens/sec
    last_update: Instant,
}

impl Bucket {
    fn new(rpm: u32, tpm: u32) -> Self {
        let capacity_rpm = rpm as f64;
        let capacity_tpm = tpm as f64;
        Self {
            tokens_rpm: capacity_rpm,
            tokens_tpm: capacity_tpm,
            capacity_rpm,
            capacity_tpm,
            rate_rpm: capacity_rpm / 60.0,
            rate_tpm: capacity_tpm / 60.0,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens_rpm = (self.tokens_rpm + elapsed * self.rate_rpm).min(self.capacity_rpm);
        self.tokens_tpm = (self.tokens_tpm + elapsed * self.rate_tpm).min(self.capacity_tpm);
        self.last_update = now;
    }

    /// Returns `Some(deficit_seconds)` to wait if there isn't enough
    /// headroom yet; `None` and debits both buckets if there is.
    fn try_acquire(&mut self, estimated_tokens: f64) -> Option<f64> {
        let now = Instant::now();
        self.refill(now);

        if self.tokens_rpm >= 1.0 && self.tokens_tpm >= estimated_tokens {
            self.tokens_rpm -= 1.0;
            self.tokens_tpm -= estimated_tokens;
            return None;
        }

        let rpm_deficit = if self.tokens_rpm < 1.0 {
            (1.0 - self.tokens_rpm) / self.rate_rpm
        } else {
            0.0
        };
        let tpm_deficit = if self.tokens_tpm < estimated_tokens {
            (estimated_tokens - self.tokens_tpm) / self.rate_tpm
        } else {
            0.0
        };
        Some(rpm_deficit.max(tpm_deficit).max(0.0))
    }

    fn penalize(&mut self, seconds: f64) {
        self.tokens_rpm -= seconds * self.rate_rpm;
    }
}

struct Circuit {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Circuit {
    fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_time: None,
            failure_threshold,
            recovery_timeout,
        }
    }

    fn report_success(&mut self) {
        self.failures = 0;
        self.state = CircuitState::Closed;
        self.last_failure_time = None;
    }

    fn report_failure(&mut self) {
        self.failures += 1;
        self.last_failure_time = Some(Instant::now());
        if self.failures >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    fn is_open(&mut self) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        match self.last_failure_time {
            Some(t) if t.elapsed() >= self.recovery_timeout => {
                // Half-open probe: let the next caller through without
                // declaring closed yet; only an explicit report_success does.
                false
            }
            _ => true,
        }
    }
}

struct Provider {
    bucket: Bucket,
    circuit: Circuit,
}

/// Process-wide rate limiter + circuit breaker, keyed by provider name.
pub struct Throttler {
    providers: Mutex<HashMap<String, Provider>>,
    last_reasoning_call: Mutex<Option<Instant>>,
    min_call_spacing: Duration,
    backoff_max: Duration,
    rate_limited_penalty: f64,
    default_rpm: u32,
    default_tpm: u32,
    default_failure_threshold: u32,
    default_recovery_timeout: Duration,
}

impl Throttler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            last_reasoning_call: Mutex::new(None),
            min_call_spacing: Duration::from_secs_f64(config.min_call_spacing_seconds),
            backoff_max: Duration::from_secs_f64(config.backoff_max_seconds),
            rate_limited_penalty: config.rate_limited_penalty_seconds,
            default_rpm: config.groq_rpm,
            default_tpm: config.groq_tpm,
            default_failure_threshold: config.circuit_failure_threshold,
            default_recovery_timeout: Duration::from_secs_f64(config.circuit_recovery_seconds),
        }
    }

    fn ensure_provider<'a>(
        &self,
        providers: &'a mut HashMap<String, Provider>,
        provider: &str,
    ) -> &'a mut Provider {
        providers.entry(provider.to_string()).or_insert_with(|| Provider {
            bucket: Bucket::new(self.default_rpm, self.default_tpm),
            circuit: Circuit::new(self.default_failure_threshold, self.default_recovery_timeout),
        })
    }

    /// Block until the provider's buckets have headroom, then debit them.
    pub async fn acquire(&self, provider: &str, estimated_tokens: f64) {
        loop {
            let deficit = {
                let mut providers = self.providers.lock();
                let p = self.ensure_provider(&mut providers, provider);
                p.bucket.try_acquire(estimated_tokens)
            };
            match deficit {
                None => return,
                Some(secs) => {
                    let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.5);
                    let wait = Duration::from_secs_f64((secs + jitter).max(0.0))
                        .min(self.backoff_max);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Enforce the global minimum spacing between reasoning-LLM calls,
    /// independent of and in addition to the per-provider token bucket.
    pub async fn enforce_global_spacing(&self) {
        loop {
            let wait = {
                let mut last = self.last_reasoning_call.lock();
                let now = Instant::now();
                match *last {
                    Some(prev) if now.saturating_duration_since(prev) < self.min_call_spacing => {
                        Some(self.min_call_spacing - now.saturating_duration_since(prev))
                    }
                    _ => {
                        *last = Some(now);
                        None
                    }
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    pub fn report(&self, provider: &str, outcome: Outcome) {
        let mut providers = self.providers.lock();
        let p = self.ensure_provider(&mut providers, provider);
        match outcome {
            Outcome::Success => p.circuit.report_success(),
            Outcome::Failure => p.circuit.report_failure(),
            Outcome::RateLimited => {
                p.circuit.report_failure();
                p.bucket.penalize(self.rate_limited_penalty);
            }
        }
    }

    pub fn is_open(&self, provider: &str) -> bool {
        let mut providers = self.providers.lock();
        let p = self.ensure_provider(&mut providers, provider);
        p.circuit.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            groq_rpm: 60,
            groq_tpm: 6000,
            circuit_failure_threshold: 3,
            circuit_recovery_seconds: 0.05,
            min_call_spacing_seconds: 0.02,
            backoff_max_seconds: 1.0,
            rate_limited_penalty_seconds: 1.0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn acquire_succeeds_immediately_with_capacity() {
        let t = Throttler::new(&config());
        t.acquire("groq", 10.0).await;
    }

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let t = Throttler::new(&config());
        assert!(!t.is_open("groq"));
        t.report("groq", Outcome::Failure);
        t.report("groq", Outcome::Failure);
        assert!(!t.is_open("groq"));
        t.report("groq", Outcome::Failure);
        assert!(t.is_open("groq"));
    }

    #[test]
    fn circuit_closes_on_success() {
        let t = Throttler::new(&config());
        t.report("groq", Outcome::Failure);
        t.report("groq", Outcome::Failure);
        t.report("groq", Outcome::Failure);
        assert!(t.is_open("groq"));
        t.report("groq", Outcome::Success);
        assert!(!t.is_open("groq"));
    }

    #[tokio::test]
    async fn circuit_half_opens_after_recovery_timeout() {
        let t = Throttler::new(&config());
        for _ in 0..3 {
            t.report("groq", Outcome::Failure);
        }
        assert!(t.is_open("groq"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!t.is_open("groq"));
    }

    #[tokio::test]
    async fn global_spacing_enforces_minimum_interval() {
        let t = Throttler::new(&config());
        let start = Instant::now();
        t.enforce_global_spacing().await;
        t.enforce_global_spacing().await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn rate_limited_report_opens_circuit_on_threshold() {
        let t = Throttler::new(&config());
        t.report("groq", Outcome::RateLimited);
        t.report("groq", Outcome::RateLimited);
        t.report("groq", Outcome::RateLimited);
        assert!(t.is_open("groq"));
    }
}
