//! Parquet writer for the training corpus.
//!
//! One row per example: `ticker`, `date`, `label`, then one nullable Float64
//! column per metric name, in sorted order.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::dataset::Example;

/// Fixed columns preceding the metric columns.
pub const BASE_COLUMNS: [&str; 3] = ["ticker", "date", "label"];

/// Schema for a corpus with the given metric columns.
pub fn corpus_schema(metric_names: &BTreeSet<String>) -> Schema {
    let mut fields = vec![
        Field::new("ticker", DataType::Utf8, false),
        Field::new("date", DataType::Utf8, false),
        Field::new("label", DataType::Int64, false),
    ];
    fields.extend(
        metric_names
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Float64, true)),
    );
    Schema::new(fields)
}

/// Convert examples into an Arrow RecordBatch.
pub fn examples_to_record_batch(
    examples: &[Example],
    metric_names: &BTreeSet<String>,
) -> anyhow::Result<RecordBatch> {
    let schema = Arc::new(corpus_schema(metric_names));

    let mut ticker = StringBuilder::new();
    let mut date = StringBuilder::new();
    let mut label = Int64Builder::new();
    let mut metric_columns: Vec<Float64Builder> =
        metric_names.iter().map(|_| Float64Builder::new()).collect();

    for example in examples {
        ticker.append_value(&example.ticker);
        date.append_value(example.date.format(crate::scheduler::DATE_FORMAT).to_string());
        label.append_value(example.label);

        for (name, column) in metric_names.iter().zip(metric_columns.iter_mut()) {
            match example.features.get(name) {
                Some(value) => column.append_value(*value),
                None => column.append_null(),
            }
        }
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(ticker.finish()),
        Arc::new(date.finish()),
        Arc::new(label.finish()),
    ];
    columns.extend(
        metric_columns
            .iter_mut()
            .map(|column| Arc::new(column.finish()) as ArrayRef),
    );

    RecordBatch::try_new(schema, columns)
        .map_err(|e| anyhow::anyhow!("Failed to create RecordBatch: {}", e))
}

/// Write examples to a Parquet file on disk.
pub fn write_parquet(
    examples: &[Example],
    metric_names: &BTreeSet<String>,
    output_path: &Path,
) -> anyhow::Result<()> {
    if examples.is_empty() {
        anyhow::bail!("No examples to write");
    }

    let batch = examples_to_record_batch(examples, metric_names)?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(output_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!(
        path = %output_path.display(),
        rows = examples.len(),
        metrics = metric_names.len(),
        "Parquet file written"
    );

    Ok(())
}

/// Read a corpus back from Parquet.
pub fn read_parquet(input_path: &Path) -> anyhow::Result<Vec<Example>> {
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = std::fs::File::open(input_path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut examples = Vec::new();

    for batch_result in reader {
        let batch = batch_result?;
        let schema = batch.schema();

        let strings = |name: &str| -> anyhow::Result<StringArray> {
            batch
                .column_by_name(name)
                .and_then(|col| col.as_any().downcast_ref::<StringArray>())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Missing or mistyped column '{}'", name))
        };
        let tickers = strings("ticker")?;
        let dates = strings("date")?;
        let labels = batch
            .column_by_name("label")
            .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing or mistyped column 'label'"))?;

        let metric_columns: Vec<(String, Float64Array)> = schema
            .fields()
            .iter()
            .filter(|field| !BASE_COLUMNS.contains(&field.name().as_str()))
            .filter_map(|field| {
                batch
                    .column_by_name(field.name())
                    .and_then(|col| col.as_any().downcast_ref::<Float64Array>())
                    .map(|arr| (field.name().clone(), arr.clone()))
            })
            .collect();

        for i in 0..batch.num_rows() {
            let date = chrono::NaiveDate::parse_from_str(dates.value(i), crate::scheduler::DATE_FORMAT)?;
            let features = metric_columns
                .iter()
                .filter(|(_, arr)| !arr.is_null(i))
                .map(|(name, arr)| (name.clone(), arr.value(i)))
                .collect();

            examples.push(Example {
                ticker: tickers.value(i).to_string(),
                date,
                label: labels.value(i),
                features,
            });
        }
    }

    tracing::info!(
        path = %input_path.display(),
        rows = examples.len(),
        "Parquet file loaded"
    );

    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn example(ticker: &str, label: i64, features: &[(&str, f64)]) -> Example {
        Example {
            ticker: ticker.to_string(),
            date: NaiveDate::from_ymd_opt(2021, 3, 15).expect("valid date"),
            label,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_schema_fields() {
        let schema = corpus_schema(&names(&["PE_RATIO", "EPS"]));
        assert_eq!(schema.fields().len(), 5);
        assert_eq!(schema.field(3).name(), "EPS");
        assert_eq!(schema.field(4).name(), "PE_RATIO");
        assert!(schema.field(4).is_nullable());
        assert!(!schema.field(0).is_nullable());
    }

    #[test]
    fn test_record_batch_fills_missing_metrics_with_null() {
        use arrow::array::Array;

        let examples = vec![
            example("AAPL", 1, &[("EPS", 4.1), ("PE_RATIO", 30.0)]),
            example("MSFT", 0, &[("EPS", 9.0)]),
        ];
        let batch = examples_to_record_batch(&examples, &names(&["EPS", "PE_RATIO"]))
            .expect("batch");

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 5);
        let pe = batch.column_by_name("PE_RATIO").expect("column");
        assert!(!pe.is_null(0));
        assert!(pe.is_null(1));
    }

    #[test]
    fn test_write_and_read_parquet() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("corpus").join("analysis_data_test.parquet");
        let examples = vec![
            example("AAPL", 1, &[("EPS", 4.1), ("NEWS_SENTIMENT", 0.6)]),
            example("MSFT", 0, &[("EPS", 9.0)]),
        ];

        write_parquet(&examples, &names(&["EPS", "NEWS_SENTIMENT"]), &path).expect("write");
        assert!(path.exists());

        let loaded = read_parquet(&path).expect("read");
        assert_eq!(loaded, examples);
    }

    #[test]
    fn test_empty_examples_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("empty.parquet");
        assert!(write_parquet(&[], &BTreeSet::new(), &path).is_err());
    }
}
