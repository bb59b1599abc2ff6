//! End-to-end pipeline runs against scripted collaborators.

use flowforge_graph::{FlowGraph, ValidationError, fields};
use flowforge_learn::ErrorSignature;
use flowforge_pipeline::{
    CachedGeneration, CancelToken, DeployCredentials, GenerationRequest, HealthStatus, Phase,
    Pipeline, PipelineConfig, PipelineError, PipelineRequest, ScriptResolver, ValidationOutcome,
};
use flowforge_test_utils::{
    MemoryFixRepository, RecordingProgressSink, StubBrandAssets, StubDeployer, StubExporter,
    StubGenerator, StubScriptStore, StubSessionRuntime, generated, graph_text_with_nodes,
    over_length_error, small_graph_text, test_credentials,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    generator: Arc<StubGenerator>,
    deployer: Arc<StubDeployer>,
    repository: Arc<MemoryFixRepository>,
    exporter: Arc<StubExporter>,
    pipeline: Pipeline,
}

fn fast_config() -> PipelineConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    PipelineConfig::new()
        .with_call_timeout(Duration::from_secs(2))
        .with_settle_interval(Duration::from_millis(1))
}

fn harness(generator: StubGenerator, deployer: StubDeployer) -> Harness {
    harness_with(generator, deployer, ScriptResolver::new(), StubScriptStore::new())
}

fn harness_with(
    generator: StubGenerator,
    deployer: StubDeployer,
    resolver: ScriptResolver,
    store: StubScriptStore,
) -> Harness {
    let generator = Arc::new(generator);
    let deployer = Arc::new(deployer);
    let repository = Arc::new(MemoryFixRepository::new());
    let exporter = Arc::new(StubExporter::new());

    let pipeline = Pipeline::builder()
        .generator(generator.clone())
        .deployer(deployer.clone())
        .script_store(Arc::new(store))
        .session_runtime(Arc::new(StubSessionRuntime::healthy()))
        .exporter(exporter.clone())
        .brand_assets(Arc::new(StubBrandAssets))
        .repository(repository.clone())
        .resolver(resolver)
        .config(fast_config())
        .build()
        .unwrap();

    Harness {
        generator,
        deployer,
        repository,
        exporter,
        pipeline,
    }
}

fn request() -> PipelineRequest {
    PipelineRequest::new("a retail support assistant", "Acme", "bot-1")
        .with_credentials(test_credentials())
}

/// 40 nodes, with node 12's message pushed past the length limit.
fn forty_node_graph_with_long_message() -> String {
    let mut graph = FlowGraph::parse(&graph_text_with_nodes(40)).unwrap();
    graph
        .get_mut(12)
        .unwrap()
        .set_field(fields::MESSAGE, "o".repeat(120));
    graph.serialize()
}

fn forty_node_graph_fixed() -> String {
    let mut graph = FlowGraph::parse(&forty_node_graph_with_long_message()).unwrap();
    graph
        .get_mut(12)
        .unwrap()
        .set_field(fields::MESSAGE, "Here is your order status.");
    graph.serialize()
}

#[tokio::test]
async fn end_to_end_success_with_one_refinement() {
    let generator = StubGenerator::new(generated(forty_node_graph_with_long_message()));
    generator.push_response(generated(forty_node_graph_fixed()));

    let deployer = StubDeployer::with_validate_outcomes(vec![ValidationOutcome::Rejected(vec![
        over_length_error(12),
    ])]);
    let h = harness(generator, deployer);

    let success = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(success.node_count, 40);
    assert_eq!(success.deployment_id, "dep-1");
    assert_eq!(success.widget_id.as_deref(), Some("widget-dep-1"));
    assert!(success.health.status.is_healthy());
    assert_eq!(success.export_link.as_deref(), Some("https://sheets.example/Acme"));
    assert!(success.logo_url.is_some());
    assert!(success.residual_errors.is_empty());
    assert!(!success.needs_human_review);

    // Generation ran once, revision once, and the fix was settled as success.
    assert_eq!(h.generator.generate_calls(), 1);
    assert_eq!(h.generator.revise_calls(), 1);
    let fix = h
        .repository
        .fix_for(&ErrorSignature::of(&over_length_error(12)))
        .expect("fix attempt recorded");
    assert_eq!(fix.success, 1);

    // The timing table covers every executed phase.
    for phase in [
        Phase::Preflight,
        Phase::Generate,
        Phase::ValidateRefine,
        Phase::ResolveScripts,
        Phase::Deploy,
        Phase::ProvisionWidget,
        Phase::HealthProbe,
        Phase::Export,
    ] {
        assert!(success.timings.duration_of(phase).is_some(), "missing timing for {phase}");
    }
}

#[tokio::test]
async fn missing_critical_script_aborts_before_deploy() {
    let mut resolver = ScriptResolver::new();
    resolver.add_critical("payments_guard");

    let h = harness_with(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting(),
        resolver,
        StubScriptStore::new(),
    );

    let failure = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::CriticalScriptsMissing { ref missing } if missing == &vec!["payments_guard".to_string()]
    ));
    // Aborted strictly before any deploy call.
    assert_eq!(h.deployer.deploy_calls(), 0);
    // A retry can still skip regeneration.
    assert!(failure.cached_generation.is_some());
    assert!(failure.residual_graph.is_some());
}

#[tokio::test]
async fn malformed_credential_fails_before_generation() {
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting(),
    );

    let bad_request = PipelineRequest::new("desc", "Acme", "bot-1")
        .with_credentials(DeployCredentials::new("has whitespace", "acct"));
    let failure = h
        .pipeline
        .run(bad_request, &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PipelineError::CredentialMalformed(_)));
    assert_eq!(h.generator.generate_calls(), 0);
    assert_eq!(h.exporter.export_calls(), 0);
}

#[tokio::test]
async fn resume_reuses_cached_generation() {
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting(),
    );

    let cached = CachedGeneration {
        request: GenerationRequest::new("a retail support assistant", "Acme"),
        graph_text: small_graph_text(),
        node_count: 3,
    };
    let success = h
        .pipeline
        .run(
            request().with_cached(cached),
            &RecordingProgressSink::new(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    // Generation cost is never re-paid on resume.
    assert_eq!(h.generator.generate_calls(), 0);
    assert_eq!(success.node_count, 3);
}

#[tokio::test]
async fn cancellation_stops_at_the_next_phase_boundary() {
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting(),
    );

    let cancel = CancelToken::new();
    cancel.cancel();
    let failure = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::Cancelled { phase: Phase::Preflight }
    ));
    assert_eq!(h.generator.generate_calls(), 0);
    assert_eq!(h.deployer.deploy_calls(), 0);
}

#[tokio::test]
async fn progress_is_monotonic_across_a_successful_run() {
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting(),
    );
    let sink = RecordingProgressSink::new();

    h.pipeline
        .run(request(), &sink, &CancelToken::new())
        .await
        .unwrap();

    let updates = sink.updates();
    assert!(!updates.is_empty());
    let mut last = 0u8;
    for update in &updates {
        assert!(
            update.percent >= last,
            "progress went backwards: {} after {last}",
            update.percent
        );
        last = update.percent;
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn deploy_rejection_returns_structured_diagnostics() {
    let deployer = StubDeployer::accepting();
    deployer.push_deploy_outcome(ValidationOutcome::Rejected(vec![
        ValidationError::new("routing targets node 99 which does not exist")
            .with_node(10)
            .with_row(3)
            .with_field("routing"),
    ]));
    let h = harness(StubGenerator::new(generated(small_graph_text())), deployer);

    let failure = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PipelineError::DeploymentRejected { .. }));
    assert_eq!(failure.failed_rows.len(), 1);
    assert_eq!(failure.failed_rows[0].node_num, Some(10));
    assert_eq!(failure.failed_rows[0].field_errors[0].0, "routing");
    assert!(failure.residual_graph.is_some());
    assert!(failure.cached_generation.is_some());
}

#[tokio::test]
async fn expired_credentials_at_deploy_are_surfaced_distinctly() {
    let deployer = StubDeployer::accepting();
    deployer.push_deploy_outcome(ValidationOutcome::AuthenticationFailed);
    let h = harness(StubGenerator::new(generated(small_graph_text())), deployer);

    let failure = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PipelineError::AuthenticationExpired));
    assert!(failure.cached_generation.is_some());
}

#[tokio::test]
async fn widget_failure_is_best_effort() {
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::accepting().without_widget(),
    );

    let success = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap();

    assert!(success.widget_id.is_none());
    // Without a widget the probe cannot run; health is unknown, not an error.
    assert!(matches!(success.health.status, HealthStatus::Unknown { .. }));
    assert_eq!(success.deployment_id, "dep-1");
}

#[tokio::test]
async fn exhausted_refinement_still_deploys_flagged_for_review() {
    let outcomes: Vec<ValidationOutcome> = (0..5)
        .map(|i| {
            ValidationOutcome::Rejected(vec![
                ValidationError::new("value rejected").with_field(format!("field_{i}")),
            ])
        })
        .collect();
    let h = harness(
        StubGenerator::new(generated(small_graph_text())),
        StubDeployer::with_validate_outcomes(outcomes),
    );

    let success = h
        .pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap();

    assert!(success.needs_human_review);
    assert!(!success.residual_errors.is_empty());
    assert_eq!(h.deployer.deploy_calls(), 1);
}

#[tokio::test]
async fn unhealthy_deployment_is_reported_but_not_fatal() {
    let generator = Arc::new(StubGenerator::new(generated(small_graph_text())));
    let deployer = Arc::new(StubDeployer::accepting());
    let pipeline = Pipeline::builder()
        .generator(generator.clone())
        .deployer(deployer.clone())
        .script_store(Arc::new(StubScriptStore::new()))
        .session_runtime(Arc::new(StubSessionRuntime::saying(
            "We are experiencing technical difficulties.",
        )))
        .repository(Arc::new(MemoryFixRepository::new()))
        .config(fast_config())
        .build()
        .unwrap();

    let success = pipeline
        .run(request(), &RecordingProgressSink::new(), &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(
        success.health.status,
        HealthStatus::Unhealthy { ref reason, .. } if reason == "technical_difficulty"
    ));
}
