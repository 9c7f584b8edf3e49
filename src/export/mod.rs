//! Corpus assembly and Parquet export.

pub mod dataset;
pub mod parquet_writer;

pub use dataset::{
    create_example, load_tickers, sample_start_date, DatasetAssembler, Example, FeedStats,
    FeedSummary,
};
pub use parquet_writer::{corpus_schema, read_parquet, write_parquet};
