pub mod cache;
pub mod ingest;
pub mod metrics;
pub mod pipeline;

pub use cache::StreamingQuoteCache;
pub use ingest::QuoteIngestionTask;
pub use metrics::{QuoteMetrics, QuoteMetricsSnapshot};
pub use pipeline::{QuotePipeline, QuotePipelineConfig};
