//! §4.3: model-to-agent selection, breaker-gated execution, and the
//! single-retry fallback policy for both the whole-response and streaming
//! paths. Grounded on `providers/router.rs`'s driver-selection/fallback
//! shape, generalized from an HTTP-API router into one that executes
//! through the named breakers of [`crate::circuit_breaker`] and forwards
//! streaming output through a bounded channel (§5).

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::driver::{AgentDriver, DriverError};
use chatgate_core::{
    AgentRequest, ChatRequest, ChatResponse, ErrorCode, GatewayError, Identity, ModelInfo,
    StreamChunk, Usage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type GwResult<T> = Result<T, GatewayError>;

const STREAM_CHANNEL_CAPACITY: usize = 10;

/// §8 S2/S3: callers (the metrics-emitting handler) need to know whether a
/// response came off the primary or the fallback driver without parsing
/// the wire-shaped [`ChatResponse`] for it.
pub struct CompletionOutcome {
    pub response: ChatResponse,
    pub fallback_used: bool,
}

const AGENT_A: &str = "agent-a";
const AGENT_B: &str = "agent-b";

pub struct Orchestrator {
    drivers: HashMap<&'static str, Arc<dyn AgentDriver>>,
    primary: &'static str,
    secondary: &'static str,
    fallback_enabled: bool,
    max_tokens_cap: u32,
    breaker_primary: Arc<CircuitBreaker>,
    breaker_fallback: Arc<CircuitBreaker>,
}

impl Orchestrator {
    pub fn new(
        agent_a: Option<Arc<dyn AgentDriver>>,
        agent_b: Option<Arc<dyn AgentDriver>>,
        primary_is_a: bool,
        fallback_enabled: bool,
        max_tokens_cap: u32,
    ) -> Self {
        let mut drivers: HashMap<&'static str, Arc<dyn AgentDriver>> = HashMap::new();
        if let Some(driver) = agent_a {
            drivers.insert(AGENT_A, driver);
        }
        if let Some(driver) = agent_b {
            drivers.insert(AGENT_B, driver);
        }
        let (primary, secondary) = if primary_is_a {
            (AGENT_A, AGENT_B)
        } else {
            (AGENT_B, AGENT_A)
        };

        Self {
            drivers,
            primary,
            secondary,
            fallback_enabled,
            max_tokens_cap,
            breaker_primary: Arc::new(CircuitBreaker::new(
                "chat_orchestration",
                CircuitBreakerConfig::default(),
            )),
            breaker_fallback: Arc::new(CircuitBreaker::new(
                "chat_orchestration_fallback",
                CircuitBreakerConfig::default(),
            )),
        }
    }

    pub fn has_any_driver(&self) -> bool {
        !self.drivers.is_empty()
    }

    /// SPEC_FULL §13 `/ready`: at least one configured driver must report
    /// healthy, not merely be registered.
    pub async fn any_driver_healthy(&self) -> bool {
        for driver in self.drivers.values() {
            if driver.is_healthy().await {
                return true;
            }
        }
        false
    }

    /// §4.3 selection policy: provider-affinity match, else primary, else
    /// secondary, else `no_agent_available`.
    async fn select(&self, model: &str) -> GwResult<(&'static str, Arc<dyn AgentDriver>)> {
        if let Some(name) = affinity(model) {
            if let Some(driver) = self.drivers.get(name) {
                if driver.is_healthy().await {
                    return Ok((name, driver.clone()));
                }
            }
        }
        if let Some(driver) = self.drivers.get(self.primary) {
            return Ok((self.primary, driver.clone()));
        }
        if let Some(driver) = self.drivers.get(self.secondary) {
            return Ok((self.secondary, driver.clone()));
        }
        Err(GatewayError::NoAgentAvailable(model.to_string()))
    }

    /// §4.2/§4.3 union of models reported by every healthy driver, sorted by
    /// (provider, id) so repeated calls are byte-identical (§8 property 4).
    pub async fn available_models(&self) -> Vec<ModelInfo> {
        let mut models = Vec::new();
        for driver in self.drivers.values() {
            if driver.is_healthy().await {
                models.extend(driver.available_models());
            }
        }
        models.sort_by(|a, b| (&a.provider, &a.id).cmp(&(&b.provider, &b.id)));
        models
    }

    pub async fn complete(
        &self,
        identity: &Identity,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> GwResult<CompletionOutcome> {
        let (driver_name, driver) = self.select(&request.model).await?;
        let is_primary = driver_name == self.primary;
        let agent_request = to_agent_request(request, identity, self.max_tokens_cap, false);

        let primary_outcome = {
            let driver = driver.clone();
            let req = agent_request.clone();
            let cancel = cancel.clone();
            self.breaker_primary
                .call(move || async move {
                    driver.execute(&req, cancel).await.map_err(driver_error_to_gateway)
                })
                .await
        };

        let (completion, fallback_used) = match primary_outcome {
            Ok(completion) => (completion, false),
            Err(e) if self.fallback_enabled && is_primary && is_fallback_eligible(&e) => {
                match self.drivers.get(self.secondary) {
                    Some(fallback_driver) => {
                        let fallback_driver = fallback_driver.clone();
                        let req = agent_request.clone();
                        let cancel = cancel.clone();
                        let completion = self
                            .breaker_fallback
                            .call(move || async move {
                                fallback_driver
                                    .execute(&req, cancel)
                                    .await
                                    .map_err(driver_error_to_gateway)
                            })
                            .await?;
                        (completion, true)
                    }
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        let usage = Usage::new(completion.input_tokens, completion.output_tokens);
        let response = ChatResponse::new(
            chat_completion_id(),
            chrono::Utc::now().timestamp(),
            request.model.clone(),
            completion.content,
            usage,
        );
        Ok(CompletionOutcome { response, fallback_used })
    }

    /// §4.3 streaming plumbing: returns the consumer end of a bounded
    /// channel (capacity 10); a detached producer task forwards driver
    /// chunks, applying the fallback-before-first-chunk policy.
    pub async fn stream(
        &self,
        identity: &Identity,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> GwResult<mpsc::Receiver<StreamChunk>> {
        let (driver_name, driver) = self.select(&request.model).await?;
        let is_primary = driver_name == self.primary;
        let agent_request = to_agent_request(request, identity, self.max_tokens_cap, true);

        let fallback = if self.fallback_enabled && is_primary {
            self.drivers
                .get(self.secondary)
                .cloned()
                .map(|d| (d, self.breaker_fallback.clone()))
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(run_stream_producer(
            driver,
            self.breaker_primary.clone(),
            fallback,
            agent_request,
            cancel,
            tx,
        ));

        Ok(rx)
    }
}

fn affinity(model: &str) -> Option<&'static str> {
    let lower = model.to_ascii_lowercase();
    if lower.contains("gemini") {
        Some(AGENT_A)
    } else if lower.starts_with("gpt-4") {
        Some(AGENT_B)
    } else {
        None
    }
}

fn is_fallback_eligible(e: &GatewayError) -> bool {
    !matches!(e.code(), ErrorCode::Cancelled | ErrorCode::BadRequest)
}

fn driver_error_to_gateway(e: DriverError) -> GatewayError {
    match e {
        DriverError::AgentFailure(msg) => GatewayError::AgentFailure(msg),
        DriverError::Timeout(d) => GatewayError::Timeout(format!("{d:?}")),
        DriverError::Cancelled => GatewayError::Cancelled,
    }
}

fn to_agent_request(
    request: &ChatRequest,
    identity: &Identity,
    max_tokens_cap: u32,
    stream: bool,
) -> AgentRequest {
    AgentRequest {
        model: request.model.clone(),
        messages: request.messages.clone(),
        temperature: request.resolved_temperature(),
        max_tokens: request.resolved_max_tokens(max_tokens_cap),
        top_p: request.resolved_top_p(),
        system_prompt: request.system_prompt.clone(),
        stream,
        metadata: request.metadata.clone(),
        user_id: identity.user_id.clone(),
        org_id: identity.org_id.clone(),
    }
}

static PROCESS_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `"chatcmpl-" + monotonic_nanos` (§4.2); a sequence number is appended to
/// guarantee uniqueness on platforms with coarse monotonic-clock resolution.
fn chat_completion_id() -> String {
    let start = PROCESS_START.get_or_init(Instant::now);
    let nanos = start.elapsed().as_nanos();
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("chatcmpl-{nanos}-{seq}")
}

/// Runs one attempt of driver.stream through its breaker, relaying chunks
/// in order to `tx`. On a pre-first-chunk failure with a fallback
/// available, loops once onto the fallback driver; "never fallback from
/// the fallback" is enforced by `fallback` being consumed on first use.
async fn run_stream_producer(
    mut driver: Arc<dyn AgentDriver>,
    mut breaker: Arc<CircuitBreaker>,
    mut fallback: Option<(Arc<dyn AgentDriver>, Arc<CircuitBreaker>)>,
    agent_request: AgentRequest,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamChunk>,
) {
    let mut first_chunk_sent = false;

    loop {
        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamChunk>(STREAM_CHANNEL_CAPACITY);

        let handle = {
            let driver = driver.clone();
            let breaker = breaker.clone();
            let req = agent_request.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                breaker
                    .call(move || async move {
                        driver
                            .stream(&req, cancel, inner_tx)
                            .await
                            .map_err(driver_error_to_gateway)
                    })
                    .await
            })
        };

        let mut fallback_needed = false;
        let mut consumer_gone = false;

        while let Some(chunk) = inner_rx.recv().await {
            if !chunk.content.is_empty() {
                first_chunk_sent = true;
                if tx.send(chunk).await.is_err() {
                    consumer_gone = true;
                    break;
                }
                continue;
            }
            if chunk.error.is_some() {
                if !first_chunk_sent && fallback.is_some() {
                    fallback_needed = true;
                } else {
                    let _ = tx.send(chunk).await;
                }
                break;
            }
            if chunk.finish_reason.is_some() {
                let _ = tx.send(chunk).await;
                break;
            }
        }

        if consumer_gone {
            cancel.cancel();
            handle.abort();
            return;
        }

        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.code() == ErrorCode::Cancelled => return,
            Ok(Err(e)) => {
                if !first_chunk_sent && fallback.is_some() {
                    fallback_needed = true;
                } else if !first_chunk_sent {
                    let _ = tx.send(StreamChunk::error(e.public_detail())).await;
                    return;
                } else {
                    return;
                }
            }
            Err(_join_panic) => {
                if !first_chunk_sent {
                    let _ = tx.send(StreamChunk::error("internal error")).await;
                }
                return;
            }
        }

        if fallback_needed {
            match fallback.take() {
                Some((fallback_driver, fallback_breaker)) => {
                    driver = fallback_driver;
                    breaker = fallback_breaker;
                    continue;
                }
                None => {
                    let _ = tx
                        .send(StreamChunk::error("no fallback agent available"))
                        .await;
                    return;
                }
            }
        }

        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatgate_core::{CompletionResult, FinishReason, Message, Role, Tier};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc::Sender;

    struct StubDriver {
        name: &'static str,
        fail_times: AtomicU32,
        content: String,
    }

    impl StubDriver {
        fn ok(name: &'static str, content: &str) -> Self {
            Self {
                name,
                fail_times: AtomicU32::new(0),
                content: content.to_string(),
            }
        }

        fn failing(name: &'static str, times: u32) -> Self {
            Self {
                name,
                fail_times: AtomicU32::new(times),
                content: String::new(),
            }
        }
    }

    #[async_trait]
    impl AgentDriver for StubDriver {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            _request: &AgentRequest,
            _cancel: CancellationToken,
        ) -> crate::driver::DriverResult<CompletionResult> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(DriverError::AgentFailure("stub failure".to_string()));
            }
            Ok(CompletionResult {
                content: self.content.clone(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn stream(
            &self,
            _request: &AgentRequest,
            _cancel: CancellationToken,
            sink: Sender<StreamChunk>,
        ) -> crate::driver::DriverResult<()> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                let _ = sink.send(StreamChunk::error("stub stream failure")).await;
                return Ok(());
            }
            for part in self.content.split_whitespace() {
                sink.send(StreamChunk::content(format!("{part} "))).await.ok();
            }
            sink.send(StreamChunk::stop()).await.ok();
            Ok(())
        }

        async fn is_healthy(&self) -> bool {
            true
        }

        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    /// Sends one chunk, then blocks until `cancel` fires and reports
    /// `Cancelled` — models a driver whose subprocess is still running
    /// when the caller disconnects (§5, §8 property 6).
    struct CancellingDriver;

    #[async_trait]
    impl AgentDriver for CancellingDriver {
        fn name(&self) -> &'static str {
            "agent-a"
        }

        async fn execute(
            &self,
            _request: &AgentRequest,
            _cancel: CancellationToken,
        ) -> crate::driver::DriverResult<CompletionResult> {
            unimplemented!("not exercised by this test")
        }

        async fn stream(
            &self,
            _request: &AgentRequest,
            cancel: CancellationToken,
            sink: Sender<StreamChunk>,
        ) -> crate::driver::DriverResult<()> {
            sink.send(StreamChunk::content("first ")).await.ok();
            cancel.cancelled().await;
            Err(DriverError::Cancelled)
        }

        async fn is_healthy(&self) -> bool {
            true
        }

        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: "u1".to_string(),
            org_id: "o1".to_string(),
            email: None,
            tier: Tier::Authenticated,
        }
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "ping".to_string(),
            }],
            temperature: None,
            max_tokens: None,
            top_p: None,
            system_prompt: None,
            stream: false,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn happy_path_uses_primary() {
        let a: Arc<dyn AgentDriver> = Arc::new(StubDriver::ok("agent-a", "pong"));
        let orch = Orchestrator::new(Some(a), None, true, true, 4096);
        let outcome = orch
            .complete(&identity(), &request("m1"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response.choices[0].message.content, "pong");
        assert_eq!(outcome.response.usage.total_tokens, 2);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_on_primary_failure() {
        let a: Arc<dyn AgentDriver> = Arc::new(StubDriver::failing("agent-a", 1));
        let b: Arc<dyn AgentDriver> = Arc::new(StubDriver::ok("agent-b", "pong-b"));
        let orch = Orchestrator::new(Some(a), Some(b), true, true, 4096);
        let outcome = orch
            .complete(&identity(), &request("m1"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response.choices[0].message.content, "pong-b");
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_routes_to_secondary() {
        let a: Arc<dyn AgentDriver> = Arc::new(StubDriver::failing("agent-a", 100));
        let b: Arc<dyn AgentDriver> = Arc::new(StubDriver::ok("agent-b", "pong-b"));
        let orch = Orchestrator::new(Some(a), Some(b), true, true, 4096);
        for _ in 0..5 {
            let _ = orch
                .complete(&identity(), &request("m1"), CancellationToken::new())
                .await;
        }
        assert_eq!(orch.breaker_primary.state(), crate::circuit_breaker::CircuitState::Open);
        let outcome = orch
            .complete(&identity(), &request("m1"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response.choices[0].message.content, "pong-b");
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn streaming_causal_order_matches_non_streaming() {
        let a: Arc<dyn AgentDriver> = Arc::new(StubDriver::ok("agent-a", "he llo"));
        let orch = Orchestrator::new(Some(a), None, true, true, 4096);
        let mut rx = orch
            .stream(&identity(), &request("m1"), CancellationToken::new())
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(chunk) = rx.recv().await {
            if chunk.is_terminal() {
                break;
            }
            collected.push_str(&chunk.content);
        }
        assert_eq!(collected, "he llo ");
    }

    /// §5/§8 property 6: a cancelled request closes the chunk channel
    /// without emitting a spurious error chunk, after whatever content
    /// already reached the caller.
    #[tokio::test]
    async fn cancellation_closes_stream_without_error_chunk() {
        let a: Arc<dyn AgentDriver> = Arc::new(CancellingDriver);
        let orch = Orchestrator::new(Some(a), None, true, true, 4096);
        let cancel = CancellationToken::new();
        let mut rx = orch
            .stream(&identity(), &request("m1"), cancel.clone())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "first ");

        cancel.cancel();
        assert!(rx.recv().await.is_none(), "channel must close with no terminal error chunk");
    }

    #[tokio::test]
    async fn no_driver_registered_fails_with_no_agent_available() {
        let orch = Orchestrator::new(None, None, true, true, 4096);
        let err = orch
            .complete(&identity(), &request("m1"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoAgentAvailable);
    }

    #[tokio::test]
    async fn any_driver_healthy_reflects_registration() {
        let empty = Orchestrator::new(None, None, true, true, 4096);
        assert!(!empty.any_driver_healthy().await);

        let a: Arc<dyn AgentDriver> = Arc::new(StubDriver::ok("agent-a", "pong"));
        let with_driver = Orchestrator::new(Some(a), None, true, true, 4096);
        assert!(with_driver.any_driver_healthy().await);
    }
}
