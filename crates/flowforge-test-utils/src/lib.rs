//! Testing utilities for the Flowforge workspace
//!
//! Shared stubs for every external collaborator, an in-memory fix
//! repository with real occurrence/confidence semantics, and graph
//! fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use flowforge_graph::ValidationError;
use flowforge_learn::{
    ErrorPattern, ErrorSignature, FixAttempt, FixOutcome, FixRepository, NewPattern,
    RepositoryError,
};
use flowforge_pipeline::{
    BrandAssetLookup, DeployCredentials, FlowDeployer, FlowGenerator, GeneratedFlow,
    GenerationRequest, MessageAuthor, MessageSnapshot, ProgressSink, ProgressUpdate, RemoteError,
    ScriptStore, SessionMessage, SessionRuntime, SheetExporter, ValidationOutcome,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

// ---------------------------------------------------------------- fixtures

/// Credentials that pass preflight validation.
pub fn test_credentials() -> DeployCredentials {
    DeployCredentials::new("tok_0123456789abcdef", "acct_test")
}

/// A minimal three-node flow.
pub fn small_graph_text() -> String {
    "num,type,name,message,command,routing\n\
     1,Action,bootstrap,,session_bootstrap,\n\
     10,Decision,welcome,Hi! How can I help?,,done->9001\n\
     9001,Decision,farewell,Thanks for visiting!,,\n"
        .to_string()
}

/// A flow with `extra` feature nodes on top of the three fixture nodes.
pub fn graph_text_with_nodes(total: usize) -> String {
    assert!(total >= 3, "fixture needs at least the three base nodes");
    let mut text = small_graph_text();
    for i in 0..total - 3 {
        let num = 11 + i;
        text.push_str(&format!(
            "{num},Decision,step_{num},Step {num} message,,next->{}\n",
            num + 1
        ));
    }
    text
}

/// A validation error shaped like the deployer's over-length rejection.
pub fn over_length_error(node: i32) -> ValidationError {
    ValidationError::new("message exceeds 80 characters")
        .with_node(node)
        .with_field("message")
}

// ------------------------------------------------------------- repository

/// In-memory fix repository with real occurrence and confidence semantics.
#[derive(Debug, Default)]
pub struct MemoryFixRepository {
    patterns: DashMap<ErrorSignature, ErrorPattern>,
    fixes: DashMap<ErrorSignature, FixAttempt>,
}

impl MemoryFixRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn occurrences_of(&self, signature: &ErrorSignature) -> u32 {
        self.patterns.get(signature).map_or(0, |p| p.occurrences)
    }

    pub fn fix_for(&self, signature: &ErrorSignature) -> Option<FixAttempt> {
        self.fixes.get(signature).map(|f| f.clone())
    }

    /// Seed a fix record directly, for proven-fix scenarios.
    pub fn seed_fix(&self, fix: FixAttempt) {
        self.fixes.insert(fix.signature.clone(), fix);
    }
}

#[async_trait]
impl FixRepository for MemoryFixRepository {
    async fn log_pattern(&self, pattern: NewPattern) -> Result<(), RepositoryError> {
        self.patterns
            .entry(pattern.signature.clone())
            .and_modify(|existing| {
                existing.occurrences += 1;
                existing.last_seen = Utc::now();
            })
            .or_insert_with(|| ErrorPattern {
                signature: pattern.signature,
                category: pattern.category,
                description: pattern.description,
                occurrences: 1,
                known_fix: None,
                last_seen: Utc::now(),
            });
        Ok(())
    }

    async fn log_fix(&self, outcome: FixOutcome) -> Result<(), RepositoryError> {
        let mut fix = self
            .fixes
            .entry(outcome.signature.clone())
            .or_insert_with(|| {
                let mut attempt = FixAttempt::new(
                    outcome.signature.clone(),
                    outcome.description.clone(),
                    outcome.category.clone(),
                );
                if let Some(diff) = &outcome.diff_summary {
                    attempt = attempt.with_diff(diff.clone());
                }
                attempt
            });
        fix.record_outcome(outcome.succeeded);
        Ok(())
    }

    async fn errors_to_avoid(&self, limit: usize) -> Result<Vec<ErrorPattern>, RepositoryError> {
        let mut patterns: Vec<ErrorPattern> = self
            .patterns
            .iter()
            .map(|entry| {
                let mut pattern = entry.value().clone();
                pattern.known_fix = self
                    .fixes
                    .get(entry.key())
                    .filter(|fix| fix.success > 0)
                    .map(|fix| fix.description.clone());
                pattern
            })
            .collect();
        patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        patterns.truncate(limit);
        Ok(patterns)
    }

    async fn known_fixes(
        &self,
        signatures: &[ErrorSignature],
    ) -> Result<Vec<FixAttempt>, RepositoryError> {
        Ok(signatures
            .iter()
            .filter_map(|signature| self.fixes.get(signature).map(|f| f.clone()))
            .collect())
    }

    async fn proven_fixes(
        &self,
        min_confidence: f64,
        min_applied: u32,
        limit: usize,
    ) -> Result<Vec<FixAttempt>, RepositoryError> {
        let mut fixes: Vec<FixAttempt> = self
            .fixes
            .iter()
            .filter(|entry| entry.value().is_proven(min_confidence, min_applied))
            .map(|entry| entry.value().clone())
            .collect();
        fixes.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fixes.truncate(limit);
        Ok(fixes)
    }
}

/// Repository whose transport is permanently down.
#[derive(Debug, Default)]
pub struct FailingRepository;

#[async_trait]
impl FixRepository for FailingRepository {
    async fn log_pattern(&self, _pattern: NewPattern) -> Result<(), RepositoryError> {
        Err(RepositoryError::Transport("unreachable".to_string()))
    }

    async fn log_fix(&self, _outcome: FixOutcome) -> Result<(), RepositoryError> {
        Err(RepositoryError::Transport("unreachable".to_string()))
    }

    async fn errors_to_avoid(&self, _limit: usize) -> Result<Vec<ErrorPattern>, RepositoryError> {
        Err(RepositoryError::Transport("unreachable".to_string()))
    }

    async fn known_fixes(
        &self,
        _signatures: &[ErrorSignature],
    ) -> Result<Vec<FixAttempt>, RepositoryError> {
        Err(RepositoryError::Transport("unreachable".to_string()))
    }

    async fn proven_fixes(
        &self,
        _min_confidence: f64,
        _min_applied: u32,
        _limit: usize,
    ) -> Result<Vec<FixAttempt>, RepositoryError> {
        Err(RepositoryError::Transport("unreachable".to_string()))
    }
}

// -------------------------------------------------------------- generator

/// Scripted generator: responses are served in order; the last one repeats
/// once the queue drains.
pub struct StubGenerator {
    responses: Mutex<VecDeque<GeneratedFlow>>,
    last: Mutex<Option<GeneratedFlow>>,
    generate_calls: AtomicUsize,
    revise_calls: AtomicUsize,
    fail: bool,
}

impl StubGenerator {
    pub fn new(first: GeneratedFlow) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([first])),
            last: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
            revise_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Generator whose transport always fails.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
            revise_calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn push_response(&self, flow: GeneratedFlow) {
        self.responses.lock().push_back(flow);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::Relaxed)
    }

    pub fn revise_calls(&self) -> usize {
        self.revise_calls.load(Ordering::Relaxed)
    }

    fn next_response(&self) -> Result<GeneratedFlow, RemoteError> {
        if self.fail {
            return Err(RemoteError::Transport("generator offline".to_string()));
        }
        let mut responses = self.responses.lock();
        let mut last = self.last.lock();
        if let Some(flow) = responses.pop_front() {
            *last = Some(flow.clone());
            Ok(flow)
        } else {
            last.clone()
                .ok_or_else(|| RemoteError::Protocol("stub generator has no responses".to_string()))
        }
    }
}

#[async_trait]
impl FlowGenerator for StubGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedFlow, RemoteError> {
        self.generate_calls.fetch_add(1, Ordering::Relaxed);
        self.next_response()
    }

    async fn revise(
        &self,
        _request: &GenerationRequest,
        _prior_graph: &str,
        _instruction: &str,
    ) -> Result<GeneratedFlow, RemoteError> {
        self.revise_calls.fetch_add(1, Ordering::Relaxed);
        self.next_response()
    }
}

/// Wrap graph text as a generator response.
pub fn generated(graph_text: impl Into<String>) -> GeneratedFlow {
    let graph_text = graph_text.into();
    let node_count = graph_text.lines().count().saturating_sub(1);
    GeneratedFlow {
        graph_text,
        node_count,
        custom_scripts: HashMap::new(),
    }
}

// --------------------------------------------------------------- deployer

/// Scripted deployer: validation verdicts are served in order (accepting
/// once the queue drains); deploy verdicts likewise.
pub struct StubDeployer {
    validate_outcomes: Mutex<VecDeque<ValidationOutcome>>,
    deploy_outcomes: Mutex<VecDeque<ValidationOutcome>>,
    validate_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
    widget_calls: AtomicUsize,
    fail_widget: bool,
}

impl StubDeployer {
    pub fn accepting() -> Self {
        Self {
            validate_outcomes: Mutex::new(VecDeque::new()),
            deploy_outcomes: Mutex::new(VecDeque::new()),
            validate_calls: AtomicUsize::new(0),
            deploy_calls: AtomicUsize::new(0),
            widget_calls: AtomicUsize::new(0),
            fail_widget: false,
        }
    }

    pub fn with_validate_outcomes(outcomes: Vec<ValidationOutcome>) -> Self {
        let deployer = Self::accepting();
        *deployer.validate_outcomes.lock() = outcomes.into();
        deployer
    }

    pub fn push_deploy_outcome(&self, outcome: ValidationOutcome) {
        self.deploy_outcomes.lock().push_back(outcome);
    }

    pub fn without_widget(mut self) -> Self {
        self.fail_widget = true;
        self
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::Relaxed)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::Relaxed)
    }

    pub fn widget_calls(&self) -> usize {
        self.widget_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FlowDeployer for StubDeployer {
    async fn validate(
        &self,
        _graph_text: &str,
        _target: &flowforge_pipeline::DeployTarget,
    ) -> Result<ValidationOutcome, RemoteError> {
        self.validate_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.validate_outcomes.lock().pop_front().unwrap_or(
            ValidationOutcome::Accepted {
                deployment_id: "dep-validate".to_string(),
            },
        ))
    }

    async fn deploy(
        &self,
        _graph_text: &str,
        _scripts: &HashMap<String, String>,
        _target: &flowforge_pipeline::DeployTarget,
    ) -> Result<ValidationOutcome, RemoteError> {
        self.deploy_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.deploy_outcomes.lock().pop_front().unwrap_or(
            ValidationOutcome::Accepted {
                deployment_id: "dep-1".to_string(),
            },
        ))
    }

    async fn provision_widget(
        &self,
        deployment_id: &str,
        _target: &flowforge_pipeline::DeployTarget,
    ) -> Result<String, RemoteError> {
        self.widget_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_widget {
            Err(RemoteError::Transport("widget service down".to_string()))
        } else {
            Ok(format!("widget-{deployment_id}"))
        }
    }
}

// ----------------------------------------------------- remaining services

/// Remote script store backed by a map.
#[derive(Debug, Default)]
pub struct StubScriptStore {
    scripts: HashMap<String, String>,
}

impl StubScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.scripts.insert(name.into(), source.into());
        self
    }
}

#[async_trait]
impl ScriptStore for StubScriptStore {
    async fn fetch(&self, name: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.scripts.get(name).cloned())
    }
}

/// Session runtime serving one canned snapshot.
pub struct StubSessionRuntime {
    snapshot: MessageSnapshot,
}

impl StubSessionRuntime {
    /// Runtime whose bot answers with a clean greeting.
    pub fn healthy() -> Self {
        Self {
            snapshot: MessageSnapshot {
                messages: vec![SessionMessage {
                    author: MessageAuthor::Bot,
                    text: "Welcome! How can I help you today?".to_string(),
                }],
            },
        }
    }

    pub fn saying(text: impl Into<String>) -> Self {
        Self {
            snapshot: MessageSnapshot {
                messages: vec![SessionMessage {
                    author: MessageAuthor::Bot,
                    text: text.into(),
                }],
            },
        }
    }
}

#[async_trait]
impl SessionRuntime for StubSessionRuntime {
    async fn create_session(&self, _widget_id: &str) -> Result<String, RemoteError> {
        Ok("session-1".to_string())
    }

    async fn start_conversation(&self, _session_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn snapshot(&self, _session_id: &str) -> Result<MessageSnapshot, RemoteError> {
        Ok(self.snapshot.clone())
    }

    async fn end_conversation(&self, _session_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Exporter returning a fixed link.
#[derive(Debug, Default)]
pub struct StubExporter {
    export_calls: AtomicUsize,
}

impl StubExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SheetExporter for StubExporter {
    async fn export(&self, _graph_text: &str, title: &str) -> Result<String, RemoteError> {
        self.export_calls.fetch_add(1, Ordering::Relaxed);
        Ok(format!("https://sheets.example/{title}"))
    }
}

/// Brand lookup returning a fixed logo.
#[derive(Debug, Default)]
pub struct StubBrandAssets;

#[async_trait]
impl BrandAssetLookup for StubBrandAssets {
    async fn logo_url(&self, product_name: &str) -> Result<Option<String>, RemoteError> {
        Ok(Some(format!("https://assets.example/{product_name}/logo.png")))
    }
}

/// Progress sink recording every update it receives.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().push(update);
    }
}
