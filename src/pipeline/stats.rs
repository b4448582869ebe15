//! Pipeline statistics
//!
//! Counters from every stage, gathered into one snapshot for tests and for
//! the CLI's verbose report.

use crate::cache::CacheStats;
use crate::fetch::FetchStats;
use crate::pool::PoolMetrics;

/// Pipeline statistics snapshot
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// `summarize` calls received
    pub requests: u64,

    /// Calls that ran fetch, extract and summarize instead of hitting the cache
    pub generations: u64,

    /// Documents passed through the extractor
    pub extractions: u64,

    /// Extractions that needed the naive tag-strip fallback
    pub degraded_extractions: u64,

    /// Batches that reached the map phase
    pub summarization_batches: u64,

    pub fetch: FetchStats,

    pub cache: CacheStats,

    pub connection_pool: PoolMetrics,

    /// Absent when the browser fallback is disabled
    pub browser_pool: Option<PoolMetrics>,

    pub tokenizer: String,

    /// Token counts are estimates rather than the provider's tokenizer
    pub tokenizer_degraded: bool,
}

impl PipelineStats {
    /// Share of lookups served from the cache, in percent
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache.hits + self.cache.misses;
        if lookups > 0 {
            (self.cache.hits as f64 / lookups as f64) * 100.0
        } else {
            0.0
        }
    }
}

fn print_pool(metrics: &PoolMetrics) {
    println!(
        "  {}: {} active, {} idle (max {}), {} created, {} evicted",
        metrics.pool, metrics.active, metrics.idle, metrics.max_size, metrics.created, metrics.evictions
    );
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &PipelineStats) {
    println!("=== Pipeline Statistics ===\n");

    println!("Overview:");
    println!("  Requests: {}", stats.requests);
    println!("  Generations: {}", stats.generations);
    println!("  Summarization batches: {}", stats.summarization_batches);
    println!(
        "  Extractions: {} ({} degraded)",
        stats.extractions, stats.degraded_extractions
    );
    println!(
        "  Tokenizer: {}{}",
        stats.tokenizer,
        if stats.tokenizer_degraded { " (estimated)" } else { "" }
    );
    println!();

    println!("Fetches:");
    println!("  Lightweight: {}", stats.fetch.lightweight);
    println!("  Heavyweight: {}", stats.fetch.heavyweight);
    println!("  Local: {}", stats.fetch.local);
    println!("  Escalations: {}", stats.fetch.escalations);
    println!("  Coalesced: {}", stats.fetch.coalesced);
    println!();

    println!("Pools:");
    print_pool(&stats.connection_pool);
    if let Some(browser) = &stats.browser_pool {
        print_pool(browser);
    }
    println!();

    println!("Cache:");
    println!(
        "  Hits: {}  Misses: {}  Commits: {}  Joined: {}",
        stats.cache.hits, stats.cache.misses, stats.cache.commits, stats.cache.joined
    );
    if stats.cache.inconsistencies > 0 {
        println!("  Discarded incomplete entries: {}", stats.cache.inconsistencies);
    }
    println!("  Hit rate: {:.1}%", stats.cache_hit_rate());
}
