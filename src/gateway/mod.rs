//! AI invocation gateway.
//!
//! One call to [`Gateway::invoke`] walks a fixed pipeline:
//!
//! 1. validate the request and check the shared secret
//! 2. consume one unit of the caller's daily quota
//! 3. derive the cache key and return a same-day hit if there is one
//! 4. render the prompt and call the model
//! 5. strictly parse the reply; on failure send one correction call
//! 6. repeat 4–5 until the call budget is spent, then give up
//! 7. cache the first valid payload and return it
//!
//! Nothing is cached unless it parsed. Errors raised before step 4 happen
//! before any model call.

pub mod schema;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::cache::{derive_key, CacheKey, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StockdeskError};
use crate::normalize::normalize;
use crate::prompts::{merge_vars, PromptLibrary};
use crate::providers::{GenerateOptions, ModelProvider, DEFAULT_MAX_TOKENS, MAX_TOKENS_CEILING};
use crate::ratelimit::RateLimiter;

pub use schema::{parse_strict, ParseFailure, ResponseSchema};

/// Default cap on model calls per invocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default lifetime of a cached payload (24h).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;

/// Token budget of a correction call.
const CORRECTION_MAX_TOKENS: u32 = 256;

const CORRECTION_INSTRUCTION: &str =
    "Output only valid JSON matching the previous schema. Do not add any other text.";

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Shared secret expected in `x-family-code`. `None` disables the check.
    /// `STOCKDESK_FAMILY_CODE` overrides it.
    pub family_code: Option<String>,
    /// Total model calls allowed per invocation.
    pub max_attempts: u32,
    pub cache_ttl_secs: u64,
    /// Serialize concurrent misses on the same key.
    pub single_flight: bool,
    /// Directory of `<request_type>.txt` prompt templates.
    pub prompts_dir: PathBuf,
    /// Optional response schema per request type.
    pub schemas: HashMap<String, ResponseSchema>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            family_code: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            single_flight: false,
            prompts_dir: PathBuf::from("prompts"),
            schemas: HashMap::new(),
        }
    }
}

/// One invocation request.
///
/// Deserializes from the HTTP body; `identity` and `secret` come from the
/// connection and headers and are filled in by the API layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default, alias = "stockId")]
    pub subject_id: String,
    #[serde(default, alias = "type")]
    pub request_type: String,
    #[serde(default)]
    pub params: Value,
    /// Subject attributes used to fill the template.
    #[serde(default, alias = "stock")]
    pub context: Value,
    #[serde(skip)]
    pub identity: Option<String>,
    #[serde(skip)]
    pub secret: Option<String>,
}

impl InvocationRequest {
    pub fn new(subject_id: &str, request_type: &str, params: Value) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            request_type: request_type.to_string(),
            params,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Successful result of [`Gateway::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub payload: Map<String, Value>,
    pub cached: bool,
    /// Model calls made; zero for a cache hit.
    pub attempts: u32,
}

impl InvocationOutcome {
    /// Payload object annotated with `cached`.
    pub fn into_body(self) -> Value {
        let mut body = self.payload;
        body.insert("cached".to_string(), Value::Bool(self.cached));
        Value::Object(body)
    }
}

/// Per-invocation counters for the outcome log line.
#[derive(Debug, Default)]
struct Trace {
    attempts: u32,
    prompt_len: usize,
    response_len: usize,
}

type InflightRegistry = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One caller's claim on a single-flight key.
///
/// Dropping the slot releases the claim, including when the invocation future
/// is cancelled mid-flight. The registry entry goes away with the last claim.
struct InflightSlot<'a> {
    registry: &'a InflightRegistry,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn acquire(registry: &'a InflightRegistry, key: String) -> Self {
        let lock = registry
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Self {
            registry,
            key,
            lock,
        }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // Registry's own handle plus ours.
        self.registry.remove_if(&self.key, |_, l| {
            Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) <= 2
        });
    }
}

/// The invocation orchestrator.
pub struct Gateway {
    config: GatewayConfig,
    provider: Arc<dyn ModelProvider>,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<RateLimiter>,
    prompts: Arc<PromptLibrary>,
    clock: Arc<dyn Clock>,
    inflight: InflightRegistry,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        provider: Arc<dyn ModelProvider>,
        cache: Arc<dyn CacheStore>,
        limiter: Arc<RateLimiter>,
        prompts: Arc<PromptLibrary>,
    ) -> Self {
        Self {
            config,
            provider,
            cache,
            limiter,
            prompts,
            clock: Arc::new(SystemClock),
            inflight: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one invocation end to end. Every outcome is logged.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome> {
        let started = Instant::now();
        let mut trace = Trace::default();
        let result = self.run(&request, &mut trace).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let identity = request.identity.as_deref().unwrap_or("-");

        match &result {
            Ok(outcome) => info!(
                identity = %identity,
                subject = %request.subject_id,
                request_type = %request.request_type,
                cached = outcome.cached,
                attempts = trace.attempts,
                prompt_len = trace.prompt_len,
                response_len = trace.response_len,
                elapsed_ms,
                "ai.invoke"
            ),
            Err(e) => warn!(
                identity = %identity,
                subject = %request.subject_id,
                request_type = %request.request_type,
                error = e.kind(),
                attempts = trace.attempts,
                prompt_len = trace.prompt_len,
                response_len = trace.response_len,
                elapsed_ms,
                "ai.invoke failed: {}",
                e
            ),
        }
        result
    }

    async fn run(&self, request: &InvocationRequest, trace: &mut Trace) -> Result<InvocationOutcome> {
        let subject_id = request.subject_id.trim();
        let request_type = request.request_type.trim();
        if subject_id.is_empty() || request_type.is_empty() {
            return Err(StockdeskError::InvalidRequest(
                "subjectId and requestType are required".to_string(),
            ));
        }

        self.check_secret(request.secret.as_deref())?;

        let decision = self.limiter.check_and_consume(request.identity.as_deref());
        if !decision.allowed {
            return Err(StockdeskError::RateLimited(format!(
                "daily limit of {} invocations reached",
                self.limiter.limit()
            )));
        }

        let version = resolve_version(&request.params, self.clock.year());
        let key = derive_key(
            subject_id,
            request_type,
            version,
            &request.params,
            self.clock.today(),
        );

        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }

        if !self.config.single_flight {
            return self.generate(request_type, request, &key, trace).await;
        }

        let slot = InflightSlot::acquire(&self.inflight, key.storage_key());
        let _guard = slot.lock.lock().await;
        match self.lookup(&key).await {
            Some(hit) => Ok(hit),
            None => self.generate(request_type, request, &key, trace).await,
        }
    }

    fn check_secret(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = self.config.family_code.as_deref().filter(|c| !c.is_empty()) else {
            return Ok(());
        };
        let matches: bool = provided
            .map(|p| p.as_bytes().ct_eq(expected.as_bytes()).into())
            .unwrap_or(false);
        if matches {
            Ok(())
        } else {
            Err(StockdeskError::Unauthorized(
                "missing or invalid family code".to_string(),
            ))
        }
    }

    /// Cache read. A failing cache is treated as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<InvocationOutcome> {
        match self.cache.get(key).await {
            Ok(Some(Value::Object(payload))) => {
                debug!(key = %key.short(), "Cache hit");
                Some(InvocationOutcome {
                    payload,
                    cached: true,
                    attempts: 0,
                })
            }
            Ok(Some(_)) => {
                warn!(key = %key.short(), "Ignoring non-object cache entry");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn generate(
        &self,
        request_type: &str,
        request: &InvocationRequest,
        key: &CacheKey,
        trace: &mut Trace,
    ) -> Result<InvocationOutcome> {
        let vars = merge_vars(&request.context, &request.params);
        let prompt = self.prompts.render(request_type, &vars)?;
        trace.prompt_len = prompt.len();

        let options = initial_options(&request.params);
        let schema = self.config.schemas.get(request_type);
        let budget = self.config.max_attempts.max(1);

        while trace.attempts < budget {
            trace.attempts += 1;
            let raw = self.provider.generate(&prompt, options.clone()).await?;
            trace.response_len = raw.len();
            let failure = match parse_strict(&raw, schema) {
                Ok(payload) => return self.accept(key, payload, trace.attempts).await,
                Err(failure) => failure,
            };
            debug!(attempt = trace.attempts, reason = %failure, "Model reply rejected");

            if trace.attempts >= budget {
                break;
            }
            trace.attempts += 1;
            let correction = correction_prompt(&raw, schema);
            let raw = self
                .provider
                .generate(
                    &correction,
                    GenerateOptions::new(CORRECTION_MAX_TOKENS, 0.0),
                )
                .await?;
            trace.response_len = raw.len();
            match parse_strict(&raw, schema) {
                Ok(payload) => return self.accept(key, payload, trace.attempts).await,
                Err(failure) => {
                    debug!(attempt = trace.attempts, reason = %failure, "Corrected reply rejected")
                }
            }
        }

        Err(StockdeskError::AiResponseInvalid {
            attempts: trace.attempts,
        })
    }

    /// Cache a validated payload. A failing cache write does not fail the call.
    async fn accept(
        &self,
        key: &CacheKey,
        payload: Map<String, Value>,
        attempts: u32,
    ) -> Result<InvocationOutcome> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Err(e) = self
            .cache
            .put(key, Value::Object(payload.clone()), ttl)
            .await
        {
            warn!(key = %key.short(), error = %e, "Cache write failed");
        }
        Ok(InvocationOutcome {
            payload,
            cached: false,
            attempts,
        })
    }
}

/// Version tag for the key: `params.version`, else legacy `params.year`,
/// else the current year.
fn resolve_version(params: &Value, current_year: i32) -> i32 {
    ["version", "year"]
        .iter()
        .filter_map(|name| params.get(*name))
        .map(normalize)
        .find(|v| *v > 0.0 && *v <= i32::MAX as f64)
        .map(|v| v as i32)
        .unwrap_or(current_year)
}

/// Options for the initial call, clamped from caller params.
fn initial_options(params: &Value) -> GenerateOptions {
    let requested = params.get("max_tokens").map(normalize).unwrap_or(0.0);
    let max_tokens = if requested >= 1.0 {
        (requested as u32).min(MAX_TOKENS_CEILING)
    } else {
        DEFAULT_MAX_TOKENS
    };
    let temperature = params
        .get("temperature")
        .map(normalize)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    GenerateOptions::new(max_tokens, temperature)
}

fn correction_prompt(raw: &str, schema: Option<&ResponseSchema>) -> String {
    let mut prompt = CORRECTION_INSTRUCTION.to_string();
    if let Some(hint) = schema.and_then(ResponseSchema::describe) {
        prompt.push(' ');
        prompt.push_str(&hint);
    }
    prompt.push_str("\nOriginal reply:\n");
    prompt.push_str(raw);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::clock::ManualClock;
    use crate::ratelimit::RateLimitConfig;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider that replays scripted replies and records every call.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<String>>,
        fallback: String,
        calls: Mutex<Vec<(String, GenerateOptions)>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str], fallback: &str) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                fallback: fallback.to_string(),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn always(reply: &str) -> Self {
            Self::new(&[], reply)
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls(&self) -> Vec<(String, GenerateOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct DownProvider;

    #[async_trait]
    impl ModelProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        fn default_model(&self) -> &str {
            "none"
        }

        async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<String> {
            Err(StockdeskError::ModelUnavailable("connection refused".into()))
        }
    }

    struct Harness {
        gateway: Gateway,
        provider: Arc<ScriptedProvider>,
        cache: Arc<ResponseCache>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(config: GatewayConfig, provider: ScriptedProvider) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        ));
        let provider = Arc::new(provider);
        let cache = Arc::new(ResponseCache::with_clock(None, 100, clock.clone()));
        let limiter = Arc::new(RateLimiter::with_clock(
            RateLimitConfig::default(),
            clock.clone(),
        ));
        let prompts = Arc::new(PromptLibrary::from_templates([(
            "analysis",
            "Analyse ${name} (${code}) for ${year}.",
        )]));
        let gateway = Gateway::new(
            config,
            provider.clone(),
            cache.clone(),
            limiter,
            prompts,
        )
        .with_clock(clock.clone());
        Harness {
            gateway,
            provider,
            cache,
            clock,
        }
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(GatewayConfig::default(), provider)
    }

    fn request() -> InvocationRequest {
        InvocationRequest::new("000001", "analysis", json!({"year": 2026}))
            .with_context(json!({"name": "Ping An Bank", "code": "000001"}))
            .with_identity("203.0.113.7")
    }

    #[tokio::test]
    async fn test_valid_first_reply_is_cached() {
        let h = harness(ScriptedProvider::always(r#"{"summary":"ok"}"#));
        let first = h.gateway.invoke(request()).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.attempts, 1);
        assert_eq!(first.payload["summary"], "ok");
        assert_eq!(h.cache.len(), 1);

        let (prompt, opts) = &h.provider.calls()[0];
        assert_eq!(prompt, "Analyse Ping An Bank (000001) for 2026.");
        assert_eq!(opts.max_tokens, 1200);
        assert_eq!(opts.temperature, 0.0);

        let second = h.gateway.invoke(request()).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(second.payload, first.payload);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_then_valid_uses_correction() {
        let h = harness(ScriptedProvider::new(
            &["Here you go: {\"summary\": 1}", r#"{"summary":"fixed"}"#],
            "unused",
        ));
        let outcome = h.gateway.invoke(request()).await.unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.payload["summary"], "fixed");
        assert_eq!(h.cache.len(), 1);

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 2);
        let (correction, opts) = &calls[1];
        assert!(correction.starts_with(CORRECTION_INSTRUCTION));
        assert!(correction.ends_with("Here you go: {\"summary\": 1}"));
        assert_eq!(opts.max_tokens, 256);
        assert_eq!(opts.temperature, 0.0);

        let again = h.gateway.invoke(request()).await.unwrap();
        assert!(again.cached);
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_always_invalid_exhausts_budget() {
        let h = harness(ScriptedProvider::always("I cannot produce JSON today."));
        let err = h.gateway.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StockdeskError::AiResponseInvalid { attempts: 3 }));
        assert_eq!(h.provider.call_count(), 3);
        assert!(h.cache.is_empty());

        // Calls alternate initial, correction, initial.
        let calls = h.provider.calls();
        assert!(calls[0].0.starts_with("Analyse"));
        assert!(calls[1].0.starts_with(CORRECTION_INSTRUCTION));
        assert!(calls[2].0.starts_with("Analyse"));
    }

    #[tokio::test]
    async fn test_custom_budget() {
        let config = GatewayConfig {
            max_attempts: 5,
            ..Default::default()
        };
        let h = harness_with(config, ScriptedProvider::always("nope"));
        let err = h.gateway.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StockdeskError::AiResponseInvalid { attempts: 5 }));
        assert_eq!(h.provider.call_count(), 5);
    }

    #[tokio::test]
    async fn test_schema_missing_field_triggers_correction() {
        let mut schemas = HashMap::new();
        schemas.insert("analysis".to_string(), ResponseSchema::new(["summary", "risks"]));
        let config = GatewayConfig {
            schemas,
            ..Default::default()
        };
        let h = harness_with(
            config,
            ScriptedProvider::new(
                &[r#"{"summary":"x"}"#, r#"{"summary":"x","risks":[]}"#],
                "unused",
            ),
        );
        let outcome = h.gateway.invoke(request()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        let correction = &h.provider.calls()[1].0;
        assert!(correction.contains("Required fields: summary, risks."));
    }

    #[tokio::test]
    async fn test_params_clamp_generation_options() {
        let h = harness(ScriptedProvider::always("{}"));
        let req = InvocationRequest::new(
            "000001",
            "analysis",
            json!({"max_tokens": 9000, "temperature": 3.5}),
        );
        h.gateway.invoke(req).await.unwrap();
        let (_, opts) = &h.provider.calls()[0];
        assert_eq!(opts.max_tokens, 2000);
        assert_eq!(opts.temperature, 1.0);
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_before_model() {
        let h = harness(ScriptedProvider::always("{}"));
        let err = h
            .gateway
            .invoke(InvocationRequest::new("", "analysis", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, StockdeskError::InvalidRequest(_)));
        let err = h
            .gateway
            .invoke(InvocationRequest::new("000001", "  ", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, StockdeskError::InvalidRequest(_)));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_template_is_invalid_request() {
        let h = harness(ScriptedProvider::always("{}"));
        let err = h
            .gateway
            .invoke(InvocationRequest::new("000001", "horoscope", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StockdeskError::InvalidRequest(_)));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_family_code_enforced() {
        let config = GatewayConfig {
            family_code: Some("s3cret".into()),
            ..Default::default()
        };
        let h = harness_with(config, ScriptedProvider::always("{}"));

        let err = h.gateway.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StockdeskError::Unauthorized(_)));
        let err = h
            .gateway
            .invoke(request().with_secret("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, StockdeskError::Unauthorized(_)));
        assert_eq!(h.provider.call_count(), 0);

        assert!(h.gateway.invoke(request().with_secret("s3cret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_before_model() {
        let h = harness(ScriptedProvider::always("{}"));
        for _ in 0..30 {
            h.gateway.invoke(request()).await.unwrap();
        }
        let err = h.gateway.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StockdeskError::RateLimited(_)));
        // Only the first call missed the cache.
        assert_eq!(h.provider.call_count(), 1);

        // A different caller is unaffected.
        assert!(h
            .gateway
            .invoke(request().with_identity("198.51.100.2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_new_day_is_a_cache_miss() {
        let h = harness(ScriptedProvider::always(r#"{"summary":"ok"}"#));
        h.gateway.invoke(request()).await.unwrap();
        h.clock.advance(chrono::Duration::days(1));
        let next_day = h.gateway.invoke(request()).await.unwrap();
        assert!(!next_day.cached);
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_model_unavailable_is_not_retried() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(ResponseCache::with_clock(None, 10, clock.clone()));
        let gateway = Gateway::new(
            GatewayConfig::default(),
            Arc::new(DownProvider),
            cache.clone(),
            Arc::new(RateLimiter::with_clock(RateLimitConfig::default(), clock.clone())),
            Arc::new(PromptLibrary::from_templates([("analysis", "x")])),
        )
        .with_clock(clock);
        let err = gateway.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StockdeskError::ModelUnavailable(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_collapses_concurrent_misses() {
        let config = GatewayConfig {
            single_flight: true,
            ..Default::default()
        };
        let h = harness_with(
            config,
            ScriptedProvider::always(r#"{"summary":"ok"}"#).slow(Duration::from_millis(50)),
        );
        let (a, b) = tokio::join!(h.gateway.invoke(request()), h.gateway.invoke(request()));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(h.provider.call_count(), 1);
        assert!(a.cached != b.cached);
        assert!(h.gateway.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_releases_key_when_cancelled() {
        let config = GatewayConfig {
            single_flight: true,
            ..Default::default()
        };
        let h = harness_with(
            config,
            ScriptedProvider::always(r#"{"summary":"ok"}"#).slow(Duration::from_secs(5)),
        );
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), h.gateway.invoke(request())).await;
        assert!(cancelled.is_err());
        assert!(h.gateway.inflight.is_empty());
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_key_survives_while_follower_waits() {
        let config = GatewayConfig {
            single_flight: true,
            ..Default::default()
        };
        let h = harness_with(
            config,
            ScriptedProvider::always(r#"{"summary":"ok"}"#).slow(Duration::from_millis(200)),
        );
        let leader = tokio::time::timeout(Duration::from_millis(50), h.gateway.invoke(request()));
        let follower = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.gateway.invoke(request()).await
        };
        let (leader, follower) = tokio::join!(leader, follower);
        assert!(leader.is_err());
        assert!(!follower.unwrap().cached);
        assert!(h.gateway.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_without_single_flight_both_misses_call_model() {
        let h = harness(
            ScriptedProvider::always(r#"{"summary":"ok"}"#).slow(Duration::from_millis(50)),
        );
        let (a, b) = tokio::join!(h.gateway.invoke(request()), h.gateway.invoke(request()));
        assert!(!a.unwrap().cached);
        assert!(!b.unwrap().cached);
        assert_eq!(h.provider.call_count(), 2);
    }

    #[test]
    fn test_resolve_version() {
        assert_eq!(resolve_version(&json!({"version": 2024}), 2026), 2024);
        assert_eq!(resolve_version(&json!({"year": "2023"}), 2026), 2023);
        assert_eq!(resolve_version(&json!({"version": 2022, "year": 2021}), 2026), 2022);
        assert_eq!(resolve_version(&json!({}), 2026), 2026);
        assert_eq!(resolve_version(&Value::Null, 2026), 2026);
    }

    #[test]
    fn test_outcome_body_has_cached_flag() {
        let outcome = InvocationOutcome {
            payload: json!({"summary": "ok"}).as_object().cloned().unwrap(),
            cached: true,
            attempts: 0,
        };
        assert_eq!(outcome.into_body(), json!({"summary": "ok", "cached": true}));
    }

    #[test]
    fn test_request_accepts_client_aliases() {
        let req: InvocationRequest = serde_json::from_str(
            r#"{"stockId":"000001","type":"analysis","params":{"year":2026},"stock":{"name":"x"}}"#,
        )
        .unwrap();
        assert_eq!(req.subject_id, "000001");
        assert_eq!(req.request_type, "analysis");
        assert_eq!(req.context["name"], "x");
        assert!(req.identity.is_none());
    }
}
