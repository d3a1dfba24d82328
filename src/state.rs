//! Application state: the course scheduler and everything it was built from.
//!
//! This module owns:
//!   - the pipeline config (from TOML or defaults)
//!   - the oracle selection (OpenAI when configured, offline otherwise)
//!   - the semantic sink
//!
//! Without an API key every stage runs on fallback content, so the service is
//! still usable end to end.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::load_pipeline_config_from_env;
use crate::context::PipelineContext;
use crate::openai::OpenAI;
use crate::oracle::{ModelSet, OfflineOracle};
use crate::scheduler::Scheduler;
use crate::sink::TracingSink;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

impl AppState {
    /// Build state from env: load config, pick the oracle, wire the sink.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_pipeline_config_from_env().unwrap_or_default();
        let limits = &config.limits;
        info!(
            target: "coursegen",
            unit_batch_size = limits.unit_batch_size,
            image_batch_size = limits.image_batch_size,
            min_unit_words = limits.min_unit_words,
            oracle_timeout_secs = limits.oracle_timeout_secs,
            categories = config.categories.len(),
            "Pipeline configured"
        );

        let ctx = match OpenAI::from_env(limits.oracle_timeout()) {
            Some(oa) => {
                info!(target: "coursegen", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, image_model = %oa.image_model, "OpenAI enabled.");
                let models = oa.models();
                let oa = Arc::new(oa);
                PipelineContext::new(oa.clone(), oa, Arc::new(TracingSink), config, models)
            }
            None => {
                warn!(target: "coursegen", "OpenAI disabled (no OPENAI_API_KEY). Courses will use fallback content.");
                PipelineContext::new(
                    Arc::new(OfflineOracle),
                    Arc::new(OfflineOracle),
                    Arc::new(TracingSink),
                    config,
                    ModelSet::default(),
                )
            }
        };

        Self::with_context(ctx)
    }

    pub fn with_context(ctx: PipelineContext) -> Self {
        Self { scheduler: Scheduler::new(ctx) }
    }
}
