//! The standard serplens market-intelligence pipeline graph.
//!
//! Keyword metrics feed SERP collection; SERP results fan out to company
//! enrichment, YouTube enrichment, and content scraping; those converge on
//! content analysis, which feeds DSI calculation and its downstream
//! snapshot/landscape phases.

use crate::error::CoreError;
use crate::registry::PhaseRegistry;

pub const KEYWORD_METRICS: &str = "keyword_metrics";
pub const SERP_COLLECTION: &str = "serp_collection";
pub const COMPANY_ENRICHMENT_SERP: &str = "company_enrichment_serp";
pub const YOUTUBE_ENRICHMENT: &str = "youtube_enrichment";
pub const CONTENT_SCRAPING: &str = "content_scraping";
pub const CONTENT_ANALYSIS: &str = "content_analysis";
pub const DSI_CALCULATION: &str = "dsi_calculation";
pub const HISTORICAL_SNAPSHOT: &str = "historical_snapshot";
pub const LANDSCAPE_DSI_CALCULATION: &str = "landscape_dsi_calculation";

/// All phases of the standard pipeline in execution order.
pub const ALL_PHASES: [&str; 9] = [
    KEYWORD_METRICS,
    SERP_COLLECTION,
    COMPANY_ENRICHMENT_SERP,
    YOUTUBE_ENRICHMENT,
    CONTENT_SCRAPING,
    CONTENT_ANALYSIS,
    DSI_CALCULATION,
    HISTORICAL_SNAPSHOT,
    LANDSCAPE_DSI_CALCULATION,
];

/// Build the canonical phase graph.
pub fn standard_registry() -> Result<PhaseRegistry, CoreError> {
    let mut registry = PhaseRegistry::new();
    registry.register(KEYWORD_METRICS, &[])?;
    registry.register(SERP_COLLECTION, &[KEYWORD_METRICS])?;
    registry.register(COMPANY_ENRICHMENT_SERP, &[SERP_COLLECTION])?;
    registry.register(YOUTUBE_ENRICHMENT, &[SERP_COLLECTION])?;
    registry.register(CONTENT_SCRAPING, &[SERP_COLLECTION])?;
    registry.register(
        CONTENT_ANALYSIS,
        &[CONTENT_SCRAPING, COMPANY_ENRICHMENT_SERP, YOUTUBE_ENRICHMENT],
    )?;
    registry.register(DSI_CALCULATION, &[CONTENT_ANALYSIS])?;
    registry.register(HISTORICAL_SNAPSHOT, &[DSI_CALCULATION])?;
    registry.register(LANDSCAPE_DSI_CALCULATION, &[DSI_CALCULATION])?;
    Ok(registry)
}
