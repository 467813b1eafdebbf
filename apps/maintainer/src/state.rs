use std::sync::Arc;

use crate::config::Config;
use crate::progress::ProgressFeed;
use crate::scheduler::pipeline::PagePipeline;
use crate::scheduler::Scheduler;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub config: Config,
}

impl AppState {
    pub fn pipeline(&self) -> &Arc<PagePipeline> {
        self.scheduler.pipeline()
    }

    pub fn progress(&self) -> &Arc<ProgressFeed> {
        self.pipeline().progress()
    }
}
