//! Pipeline orchestrator
//!
//! Sequences every phase end to end: Preflight -> Generate ->
//! Validate/Refine -> Script Resolution -> Deploy -> Widget Provisioning ->
//! Health Probe -> Export -> Done. Preflight fails before any generation
//! cost is spent; generation is skipped entirely when a cached artifact from
//! a prior failed run is supplied; widget provisioning, the health probe,
//! and export are best-effort; and every terminating failure still returns
//! the best available graph, the timing trace, and the cached generation so
//! a retry never regenerates.

use crate::cancel::CancelToken;
use crate::config::{DeployCredentials, PipelineConfig};
use crate::error::PipelineError;
use crate::health::{HealthProbe, HealthReport};
use crate::progress::{Phase, PhaseTimings, ProgressSink, ProgressUpdate};
use crate::refine::RefineLoop;
use crate::remote::{
    BrandAssetLookup, DeployTarget, Environment, FlowDeployer, FlowGenerator, GeneratedFlow,
    GenerationRequest, ScriptStore, SessionRuntime, SheetExporter, ValidationOutcome, bounded,
};
use crate::result::{CachedGeneration, FailedRow, PipelineFailure, PipelineSuccess, RunId};
use crate::scripts::ScriptResolver;
use flowforge_graph::FlowGraph;
use flowforge_learn::{FixRepository, LearningClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One pipeline run's input
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Natural-language product description
    pub description: String,
    /// Product name
    pub product_name: String,
    /// Target bot/product identifier
    pub target_id: String,
    /// Deployment environment
    pub environment: Environment,
    /// Cached generation from a prior failed run, for resume
    pub cached: Option<CachedGeneration>,
    /// Explicit credentials; read from the environment when absent
    pub credentials: Option<DeployCredentials>,
}

impl PipelineRequest {
    /// Create a request
    #[inline]
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        product_name: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            product_name: product_name.into(),
            target_id: target_id.into(),
            environment: Environment::Development,
            cached: None,
            credentials: None,
        }
    }

    /// With deployment environment
    #[inline]
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Resume from a cached generation artifact
    #[inline]
    #[must_use]
    pub fn with_cached(mut self, cached: CachedGeneration) -> Self {
        self.cached = Some(cached);
        self
    }

    /// With explicit credentials
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: DeployCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// The end-to-end pipeline
pub struct Pipeline {
    generator: Arc<dyn FlowGenerator>,
    deployer: Arc<dyn FlowDeployer>,
    script_store: Arc<dyn ScriptStore>,
    session_runtime: Arc<dyn SessionRuntime>,
    exporter: Option<Arc<dyn SheetExporter>>,
    brand_assets: Option<Arc<dyn BrandAssetLookup>>,
    learning: LearningClient,
    resolver: ScriptResolver,
    config: PipelineConfig,
}

impl Pipeline {
    /// Start building a pipeline
    #[inline]
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run.
    ///
    /// # Errors
    /// Returns a [`PipelineFailure`] carrying the best available graph, the
    /// timing trace, and the cached generation artifact for resume.
    pub async fn run(
        &self,
        request: PipelineRequest,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<PipelineSuccess, Box<PipelineFailure>> {
        let run_id = RunId::new();
        let mut timings = PhaseTimings::new();
        let mut cached = request.cached.clone();
        tracing::info!(%run_id, target = %request.target_id, "pipeline run starting");

        // ------------------------------------------------------------- Preflight
        let started = Instant::now();
        report(progress, Phase::Preflight, false, "checking script registry and credentials");
        let preflight = self
            .resolver
            .verify_registry()
            .and_then(|()| match request.credentials.clone() {
                Some(credentials) => Ok(credentials),
                None => DeployCredentials::from_env(),
            })
            .and_then(|credentials| credentials.validate().map(|()| credentials));
        let credentials = match preflight {
            Ok(credentials) => credentials,
            Err(error) => {
                timings.record(Phase::Preflight, started.elapsed());
                return Err(failure(run_id, error, None, cached, timings));
            }
        };
        timings.record(Phase::Preflight, started.elapsed());
        report(progress, Phase::Preflight, true, "preflight complete");
        self.check_cancel(cancel, Phase::Preflight, run_id, None, &cached, &timings)?;

        let target = DeployTarget {
            target_id: request.target_id.clone(),
            environment: request.environment,
            credentials,
        };
        let generation_request =
            GenerationRequest::new(request.description.clone(), request.product_name.clone());

        // -------------------------------------------------------------- Generate
        let started = Instant::now();
        let generated = match &cached {
            Some(prior) => {
                tracing::info!(%run_id, "reusing cached generation, skipping generator");
                report(progress, Phase::Generate, false, "reusing cached graph from prior run");
                GeneratedFlow {
                    graph_text: prior.graph_text.clone(),
                    node_count: prior.node_count,
                    custom_scripts: HashMap::new(),
                }
            }
            None => {
                report(progress, Phase::Generate, false, "generating candidate flow");
                // Steer generation away from the patterns the validator
                // rejects most often.
                let avoid = self.learning.errors_to_avoid(5).await;
                let mut seeded_request = generation_request.clone();
                if !avoid.is_empty() {
                    let lines: Vec<String> = avoid
                        .iter()
                        .map(|pattern| match &pattern.known_fix {
                            Some(fix) => format!(
                                "- {} (seen {} times; known fix: {fix})",
                                pattern.description, pattern.occurrences
                            ),
                            None => format!(
                                "- {} (seen {} times)",
                                pattern.description, pattern.occurrences
                            ),
                        })
                        .collect();
                    seeded_request = seeded_request.with_context(format!(
                        "Avoid these recurring validation mistakes:\n{}",
                        lines.join("\n")
                    ));
                }
                match bounded(
                    self.config.call_timeout,
                    self.generator.generate(&seeded_request),
                )
                .await
                {
                    Ok(flow) => flow,
                    Err(err) => {
                        timings.record(Phase::Generate, started.elapsed());
                        return Err(failure(
                            run_id,
                            PipelineError::GenerationFailed(err.to_string()),
                            None,
                            None,
                            timings,
                        ));
                    }
                }
            }
        };

        let graph = match FlowGraph::parse(&generated.graph_text) {
            Ok(graph) if !graph.is_empty() => graph,
            Ok(_) => {
                timings.record(Phase::Generate, started.elapsed());
                return Err(failure(
                    run_id,
                    PipelineError::GenerationFailed("generator returned no nodes".to_string()),
                    Some(generated.graph_text),
                    None,
                    timings,
                ));
            }
            Err(err) => {
                timings.record(Phase::Generate, started.elapsed());
                return Err(failure(
                    run_id,
                    PipelineError::GenerationFailed(format!("unparseable graph: {err}")),
                    Some(generated.graph_text),
                    None,
                    timings,
                ));
            }
        };
        let node_count = graph.len();
        cached = Some(CachedGeneration {
            request: generation_request.clone(),
            graph_text: generated.graph_text.clone(),
            node_count,
        });
        timings.record(Phase::Generate, started.elapsed());
        report(progress, Phase::Generate, true, &format!("graph ready with {node_count} nodes"));
        self.check_cancel(
            cancel,
            Phase::Generate,
            run_id,
            Some(&generated.graph_text),
            &cached,
            &timings,
        )?;

        // -------------------------------------------------------- Validate/Refine
        let started = Instant::now();
        report(progress, Phase::ValidateRefine, false, "validating against the deployer");
        let refine = RefineLoop::new(
            &*self.generator,
            &*self.deployer,
            &self.learning,
            &self.config,
        );
        let refined = match refine
            .run(&generation_request, &generated.graph_text, &target)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                timings.record(Phase::ValidateRefine, started.elapsed());
                return Err(failure(
                    run_id,
                    error,
                    Some(generated.graph_text),
                    cached,
                    timings,
                ));
            }
        };
        timings.record(Phase::ValidateRefine, started.elapsed());
        report(
            progress,
            Phase::ValidateRefine,
            true,
            &format!(
                "validation finished after {} attempt(s), {} residual error(s)",
                refined.attempts,
                refined.residual_errors.len()
            ),
        );
        self.check_cancel(
            cancel,
            Phase::ValidateRefine,
            run_id,
            Some(&refined.graph_text),
            &cached,
            &timings,
        )?;

        // -------------------------------------------------------- Script resolution
        let started = Instant::now();
        report(progress, Phase::ResolveScripts, false, "resolving referenced scripts");
        let resolved = match self
            .resolver
            .resolve(
                &refined.graph,
                &generated.custom_scripts,
                &*self.script_store,
                self.config.call_timeout,
            )
            .await
        {
            Ok(resolved) => resolved,
            Err(error) => {
                timings.record(Phase::ResolveScripts, started.elapsed());
                return Err(failure(
                    run_id,
                    error,
                    Some(refined.graph_text),
                    cached,
                    timings,
                ));
            }
        };
        timings.record(Phase::ResolveScripts, started.elapsed());
        report(
            progress,
            Phase::ResolveScripts,
            true,
            &format!("{} script(s) resolved", resolved.scripts.len()),
        );
        self.check_cancel(
            cancel,
            Phase::ResolveScripts,
            run_id,
            Some(&refined.graph_text),
            &cached,
            &timings,
        )?;

        // ---------------------------------------------------------------- Deploy
        let started = Instant::now();
        report(progress, Phase::Deploy, false, "deploying graph and script bundle");
        let deployment_id = match bounded(
            self.config.call_timeout,
            self.deployer
                .deploy(&refined.graph_text, &resolved.scripts, &target),
        )
        .await
        {
            Ok(ValidationOutcome::Accepted { deployment_id }) => deployment_id,
            Ok(ValidationOutcome::AuthenticationFailed) => {
                timings.record(Phase::Deploy, started.elapsed());
                return Err(failure(
                    run_id,
                    PipelineError::AuthenticationExpired,
                    Some(refined.graph_text),
                    cached,
                    timings,
                ));
            }
            Ok(ValidationOutcome::Rejected(errors)) => {
                timings.record(Phase::Deploy, started.elapsed());
                let failed_rows = FailedRow::group(&errors);
                return Err(failure(
                    run_id,
                    PipelineError::DeploymentRejected {
                        message: format!("{} row(s) rejected at deploy", failed_rows.len()),
                        failed_rows,
                    },
                    Some(refined.graph_text),
                    cached,
                    timings,
                ));
            }
            Err(err) => {
                timings.record(Phase::Deploy, started.elapsed());
                return Err(failure(
                    run_id,
                    err.into(),
                    Some(refined.graph_text),
                    cached,
                    timings,
                ));
            }
        };
        timings.record(Phase::Deploy, started.elapsed());
        report(progress, Phase::Deploy, true, &format!("deployed as {deployment_id}"));
        self.check_cancel(
            cancel,
            Phase::Deploy,
            run_id,
            Some(&refined.graph_text),
            &cached,
            &timings,
        )?;

        // ------------------------------------------------- Widget provisioning
        let started = Instant::now();
        report(progress, Phase::ProvisionWidget, false, "provisioning chat widget");
        let logo_url = match &self.brand_assets {
            Some(brand) => bounded(
                self.config.call_timeout,
                brand.logo_url(&request.product_name),
            )
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "brand-asset lookup failed");
                None
            }),
            None => None,
        };
        let widget_id = match bounded(
            self.config.call_timeout,
            self.deployer.provision_widget(&deployment_id, &target),
        )
        .await
        {
            Ok(widget_id) => Some(widget_id),
            Err(err) => {
                tracing::warn!(error = %err, "widget provisioning failed, continuing without widget");
                None
            }
        };
        timings.record(Phase::ProvisionWidget, started.elapsed());
        report(progress, Phase::ProvisionWidget, true, "widget step finished");
        self.check_cancel(
            cancel,
            Phase::ProvisionWidget,
            run_id,
            Some(&refined.graph_text),
            &cached,
            &timings,
        )?;

        // ------------------------------------------------------------ Health probe
        let started = Instant::now();
        report(progress, Phase::HealthProbe, false, "probing deployed flow");
        let health = match &widget_id {
            Some(widget_id) => {
                let probe =
                    HealthProbe::new(self.config.settle_interval, self.config.call_timeout);
                probe.probe(&*self.session_runtime, widget_id).await
            }
            None => HealthReport::unknown("no widget to probe"),
        };
        if !health.status.is_healthy() {
            tracing::warn!(status = ?health.status, "health probe did not come back healthy");
        }
        timings.record(Phase::HealthProbe, started.elapsed());
        report(progress, Phase::HealthProbe, true, "health probe finished");

        // ---------------------------------------------------------------- Export
        let started = Instant::now();
        report(progress, Phase::Export, false, "exporting to spreadsheet");
        let export_link = match &self.exporter {
            Some(exporter) => match bounded(
                self.config.call_timeout,
                exporter.export(&refined.graph_text, &request.product_name),
            )
            .await
            {
                Ok(link) => Some(link),
                Err(err) => {
                    tracing::warn!(error = %err, "export failed, continuing without it");
                    None
                }
            },
            None => None,
        };
        timings.record(Phase::Export, started.elapsed());
        report(progress, Phase::Export, true, "export step finished");

        report(progress, Phase::Done, true, "pipeline complete");
        tracing::info!(%run_id, %deployment_id, "pipeline run succeeded\n{timings}");

        Ok(PipelineSuccess {
            run_id,
            graph_text: refined.graph_text,
            node_count,
            deployment_id,
            widget_id,
            health,
            export_link,
            logo_url,
            residual_errors: refined.residual_errors,
            needs_human_review: refined.needs_human_review,
            timings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn check_cancel(
        &self,
        cancel: &CancelToken,
        phase: Phase,
        run_id: RunId,
        residual_graph: Option<&str>,
        cached: &Option<CachedGeneration>,
        timings: &PhaseTimings,
    ) -> Result<(), Box<PipelineFailure>> {
        if cancel.is_cancelled() {
            tracing::info!(%run_id, %phase, "cancellation observed at phase boundary");
            return Err(failure(
                run_id,
                PipelineError::Cancelled { phase },
                residual_graph.map(str::to_string),
                cached.clone(),
                timings.clone(),
            ));
        }
        Ok(())
    }
}

fn failure(
    run_id: RunId,
    error: PipelineError,
    residual_graph: Option<String>,
    cached: Option<CachedGeneration>,
    timings: PhaseTimings,
) -> Box<PipelineFailure> {
    let failed_rows = match &error {
        PipelineError::DeploymentRejected { failed_rows, .. } => failed_rows.clone(),
        _ => Vec::new(),
    };
    tracing::error!(%run_id, error = %error, "pipeline run failed\n{timings}");
    Box::new(PipelineFailure {
        run_id,
        message: error.to_string(),
        error,
        residual_graph,
        failed_rows,
        cached_generation: cached,
        timings,
    })
}

fn report(progress: &dyn ProgressSink, phase: Phase, at_end: bool, message: &str) {
    let (start, end) = phase.span();
    progress.report(ProgressUpdate {
        phase,
        percent: if at_end { end } else { start },
        message: message.to_string(),
        detail: None,
    });
}

/// Builder collecting the pipeline's collaborators
#[derive(Default)]
pub struct PipelineBuilder {
    generator: Option<Arc<dyn FlowGenerator>>,
    deployer: Option<Arc<dyn FlowDeployer>>,
    script_store: Option<Arc<dyn ScriptStore>>,
    session_runtime: Option<Arc<dyn SessionRuntime>>,
    exporter: Option<Arc<dyn SheetExporter>>,
    brand_assets: Option<Arc<dyn BrandAssetLookup>>,
    repository: Option<Arc<dyn FixRepository>>,
    resolver: Option<ScriptResolver>,
    config: Option<PipelineConfig>,
}

impl PipelineBuilder {
    /// Set the flow generator
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn FlowGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the validator/deployer
    #[must_use]
    pub fn deployer(mut self, deployer: Arc<dyn FlowDeployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Set the remote script store
    #[must_use]
    pub fn script_store(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.script_store = Some(store);
        self
    }

    /// Set the session runtime used by the health probe
    #[must_use]
    pub fn session_runtime(mut self, runtime: Arc<dyn SessionRuntime>) -> Self {
        self.session_runtime = Some(runtime);
        self
    }

    /// Set the best-effort spreadsheet exporter
    #[must_use]
    pub fn exporter(mut self, exporter: Arc<dyn SheetExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Set the best-effort brand-asset lookup
    #[must_use]
    pub fn brand_assets(mut self, brand: Arc<dyn BrandAssetLookup>) -> Self {
        self.brand_assets = Some(brand);
        self
    }

    /// Set the pattern/fix repository
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn FixRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Replace the default script resolver
    #[must_use]
    pub fn resolver(mut self, resolver: ScriptResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    /// Returns a preflight error when a required collaborator is missing.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config.unwrap_or_default();
        let repository = self
            .repository
            .ok_or_else(|| PipelineError::Preflight("missing fix repository".to_string()))?;
        Ok(Pipeline {
            generator: self
                .generator
                .ok_or_else(|| PipelineError::Preflight("missing generator".to_string()))?,
            deployer: self
                .deployer
                .ok_or_else(|| PipelineError::Preflight("missing deployer".to_string()))?,
            script_store: self
                .script_store
                .ok_or_else(|| PipelineError::Preflight("missing script store".to_string()))?,
            session_runtime: self
                .session_runtime
                .ok_or_else(|| PipelineError::Preflight("missing session runtime".to_string()))?,
            exporter: self.exporter,
            brand_assets: self.brand_assets,
            learning: LearningClient::with_policy(repository, config.backoff),
            resolver: self.resolver.unwrap_or_default(),
            config,
        })
    }
}
