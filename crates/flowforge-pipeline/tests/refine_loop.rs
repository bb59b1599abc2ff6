//! Validate-and-refine loop behavior against scripted collaborators.

use flowforge_graph::{FlowGraph, ValidationError, fields};
use flowforge_learn::{ErrorSignature, FixAttempt, LearningClient};
use flowforge_pipeline::{
    DeployTarget, Environment, PipelineConfig, PipelineError, RefineLoop, RefinePhase,
    ValidationOutcome,
};
use flowforge_test_utils::{
    MemoryFixRepository, StubDeployer, StubGenerator, generated, over_length_error,
    small_graph_text, test_credentials,
};
use std::sync::Arc;

fn target() -> DeployTarget {
    DeployTarget {
        target_id: "bot-1".to_string(),
        environment: Environment::Development,
        credentials: test_credentials(),
    }
}

fn request() -> flowforge_pipeline::GenerationRequest {
    flowforge_pipeline::GenerationRequest::new("a support bot", "Acme")
}

fn config() -> PipelineConfig {
    PipelineConfig::new().with_call_timeout(std::time::Duration::from_secs(2))
}

/// Graph whose node 12 carries an over-length message.
fn long_message_graph() -> String {
    let mut graph = FlowGraph::parse(&small_graph_text()).unwrap();
    let mut node = graph.get(10).unwrap().clone();
    node.num = 12;
    node.set_field(fields::MESSAGE, "w".repeat(120));
    graph.insert(node);
    graph.serialize()
}

/// The same graph with the message shortened.
fn short_message_graph() -> String {
    let mut graph = FlowGraph::parse(&long_message_graph()).unwrap();
    graph
        .get_mut(12)
        .unwrap()
        .set_field(fields::MESSAGE, "Welcome!");
    graph.serialize()
}

#[tokio::test]
async fn zero_errors_on_first_pass_stops_after_one_iteration() {
    let generator = StubGenerator::new(generated(small_graph_text()));
    let deployer = StubDeployer::with_validate_outcomes(vec![ValidationOutcome::Accepted {
        deployment_id: "dep-7".to_string(),
    }]);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(repo);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &small_graph_text(), &target())
        .await
        .unwrap();

    assert!(outcome.accepted);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.deployment_id.as_deref(), Some("dep-7"));
    assert_eq!(outcome.final_phase, RefinePhase::Valid);
    assert_eq!(deployer.validate_calls(), 1);
    assert_eq!(generator.revise_calls(), 0);
}

#[tokio::test]
async fn always_failing_validator_stops_at_exactly_the_cap() {
    // A fresh error shape each pass so the no-progress guard never trips.
    let outcomes: Vec<ValidationOutcome> = (0..6)
        .map(|i| {
            ValidationOutcome::Rejected(vec![
                ValidationError::new("value rejected").with_field(format!("field_{i}")),
            ])
        })
        .collect();
    let generator = StubGenerator::new(generated(small_graph_text()));
    let deployer = StubDeployer::with_validate_outcomes(outcomes);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(repo);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &small_graph_text(), &target())
        .await
        .unwrap();

    assert!(!outcome.accepted);
    assert_eq!(outcome.attempts, 5);
    assert!(!outcome.residual_errors.is_empty());
    assert!(outcome.needs_human_review);
    assert_eq!(outcome.final_phase, RefinePhase::MaxAttemptsReached);
    assert_eq!(deployer.validate_calls(), 5);
    // The final pass only observes; no revision is requested for it.
    assert_eq!(generator.revise_calls(), 4);
}

#[tokio::test]
async fn identical_error_set_twice_stops_early() {
    let error = || vec![over_length_error(12)];
    let generator = StubGenerator::new(generated(long_message_graph()));
    let deployer = StubDeployer::with_validate_outcomes(vec![
        ValidationOutcome::Rejected(error()),
        // Same signature again, despite a different node number.
        ValidationOutcome::Rejected(vec![over_length_error(31)]),
        ValidationOutcome::Rejected(error()),
    ]);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(repo);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &long_message_graph(), &target())
        .await
        .unwrap();

    assert!(!outcome.accepted);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(deployer.validate_calls(), 2);
}

#[tokio::test]
async fn successful_revision_logs_a_proven_outcome() {
    let generator = StubGenerator::new(generated(short_message_graph()));
    let deployer = StubDeployer::with_validate_outcomes(vec![
        ValidationOutcome::Rejected(vec![over_length_error(12)]),
        ValidationOutcome::Accepted {
            deployment_id: "dep-2".to_string(),
        },
    ]);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(Arc::clone(&repo) as Arc<dyn flowforge_learn::FixRepository>);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &long_message_graph(), &target())
        .await
        .unwrap();

    assert!(outcome.accepted);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(generator.revise_calls(), 1);

    // The pattern was recorded and the attributed change settled as success.
    let signature = ErrorSignature::of(&over_length_error(12));
    assert_eq!(repo.occurrences_of(&signature), 1);
    let fix = repo.fix_for(&signature).expect("fix attempt recorded");
    assert_eq!(fix.applied, 1);
    assert_eq!(fix.success, 1);
    assert!((fix.confidence() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn persisting_error_logs_a_failed_outcome() {
    // Revision changes the node but the validator keeps rejecting with the
    // same shape, then the no-progress guard ends the loop.
    let generator = StubGenerator::new(generated(short_message_graph()));
    let deployer = StubDeployer::with_validate_outcomes(vec![
        ValidationOutcome::Rejected(vec![over_length_error(12)]),
        ValidationOutcome::Rejected(vec![over_length_error(12)]),
    ]);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(Arc::clone(&repo) as Arc<dyn flowforge_learn::FixRepository>);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &long_message_graph(), &target())
        .await
        .unwrap();

    assert!(!outcome.accepted);
    let signature = ErrorSignature::of(&over_length_error(12));
    let fix = repo.fix_for(&signature).expect("fix attempt recorded");
    assert_eq!(fix.applied, 1);
    assert_eq!(fix.failure, 1);
    assert_eq!(fix.success, 0);
}

#[tokio::test]
async fn authentication_failure_is_fatal() {
    let generator = StubGenerator::new(generated(small_graph_text()));
    let deployer =
        StubDeployer::with_validate_outcomes(vec![ValidationOutcome::AuthenticationFailed]);
    let repo = Arc::new(MemoryFixRepository::new());
    let learning = LearningClient::new(repo);
    let cfg = config();

    let result = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &small_graph_text(), &target())
        .await;

    assert!(matches!(result, Err(PipelineError::AuthenticationExpired)));
}

#[tokio::test]
async fn proven_fix_is_applied_without_the_generator() {
    let error = over_length_error(12);
    let signature = ErrorSignature::of(&error);

    let repo = Arc::new(MemoryFixRepository::new());
    let mut seeded = FixAttempt::new(
        signature.clone(),
        "truncate the message below the limit",
        "LENGTH_CONSTRAINT",
    );
    for _ in 0..4 {
        seeded.record_outcome(true);
    }
    repo.seed_fix(seeded);

    let generator = StubGenerator::new(generated(small_graph_text()));
    let deployer = StubDeployer::with_validate_outcomes(vec![
        ValidationOutcome::Rejected(vec![error.clone()]),
        ValidationOutcome::Accepted {
            deployment_id: "dep-3".to_string(),
        },
    ]);
    let learning = LearningClient::new(Arc::clone(&repo) as Arc<dyn flowforge_learn::FixRepository>);
    let cfg = config();

    let outcome = RefineLoop::new(&generator, &deployer, &learning, &cfg)
        .run(&request(), &long_message_graph(), &target())
        .await
        .unwrap();

    assert!(outcome.accepted);
    // The proven fix repaired the node in-process; the generator was idle.
    assert_eq!(generator.revise_calls(), 0);
    assert!(
        outcome
            .graph
            .get(12)
            .unwrap()
            .field(fields::MESSAGE)
            .unwrap()
            .chars()
            .count()
            <= 80
    );

    // And the mechanical application itself was settled as a success.
    let fix = repo.fix_for(&signature).unwrap();
    assert_eq!(fix.applied, 5);
    assert_eq!(fix.success, 5);
}
