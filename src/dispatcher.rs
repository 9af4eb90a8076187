//! Routing from claimed jobs to the processors that run them.

use crate::job::Job;
use crate::processor::{JobProcessor, JobReport, ProcessorContext, ProcessorError};
use crate::processors::{
    DedupCheckProcessor, EmbedProcessor, EnrichProcessor, FreshnessProcessor, ReEmbedProcessor,
    ScrapeProcessor,
};
use crate::types::JobKind;

/// One instance of each processor, routed by exhaustive match on
/// [`JobKind`]. Adding a kind without wiring its processor here is a compile
/// error, which is the point of keeping the kind set closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dispatcher {
    embed: EmbedProcessor,
    enrich: EnrichProcessor,
    dedup: DedupCheckProcessor,
    re_embed: ReEmbedProcessor,
    freshness: FreshnessProcessor,
    scrape: ScrapeProcessor,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` on the processor for its kind and returns that
    /// processor's report unchanged.
    pub async fn dispatch(
        &self,
        job: &Job,
        ctx: &ProcessorContext,
    ) -> Result<JobReport, ProcessorError> {
        match job.kind {
            JobKind::Embed => self.embed.process(job, ctx).await,
            JobKind::Enrich => self.enrich.process(job, ctx).await,
            JobKind::DedupCheck => self.dedup.process(job, ctx).await,
            JobKind::ReEmbed => self.re_embed.process(job, ctx).await,
            JobKind::Freshness => self.freshness.process(job, ctx).await,
            JobKind::Scrape => self.scrape.process(job, ctx).await,
        }
    }
}
