use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use super::model::{ObjectId, SkyCoord, Target, TargetSet, ValueKind};
use super::store::{AggregationStore, ExportRow};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a previously exported store.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – columnar file with the export row schema (recommended)
/// * `.json`    – `[{ "object_id": 0, "label": "...", "band": "...", ... }, ...]`
/// * `.csv`     – header row with the export column names
pub fn load_file(path: &Path) -> Result<AggregationStore> {
    let rows = match extension(path).as_str() {
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    Ok(AggregationStore::from_rows(rows))
}

/// Persist the store in the format implied by the extension.
pub fn save_file(store: &AggregationStore, path: &Path) -> Result<()> {
    let rows = store.export();
    match extension(path).as_str() {
        "parquet" | "pq" => save_parquet(&rows, path),
        "json" => save_json(&rows, path),
        "csv" => save_csv(&rows, path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Load the Target Set: `ra`, `dec`, `label` and an optional `object_id`.
///
/// Either every row carries an `object_id` or none does; in the latter case
/// ids are generated in file order.
pub fn load_targets(path: &Path) -> Result<TargetSet> {
    let records: Vec<TargetRecord> = match extension(path).as_str() {
        "csv" => {
            let mut reader = csv::Reader::from_path(path).context("opening target CSV")?;
            reader
                .deserialize()
                .enumerate()
                .map(|(i, r)| r.with_context(|| format!("target CSV row {i}")))
                .collect::<Result<_>>()?
        }
        "json" => {
            let text = std::fs::read_to_string(path).context("reading target JSON")?;
            serde_json::from_str(&text).context("parsing target JSON")?
        }
        other => bail!("Unsupported target file extension: .{other}"),
    };

    let with_ids = records.iter().filter(|r| r.object_id.is_some()).count();
    if with_ids == 0 {
        return Ok(TargetSet::from_coordinates(
            records
                .into_iter()
                .map(|r| (SkyCoord::new(r.ra, r.dec), r.label)),
        ));
    }
    if with_ids != records.len() {
        bail!(
            "{} of {} targets have an object_id; give all or none",
            with_ids,
            records.len()
        );
    }

    let targets = records
        .into_iter()
        .map(|r| Target {
            object_id: ObjectId(r.object_id.unwrap_or_default()),
            coord: SkyCoord::new(r.ra, r.dec),
            label: r.label,
        })
        .collect();
    Ok(TargetSet::new(targets)?)
}

#[derive(Debug, Deserialize)]
struct TargetRecord {
    ra: f64,
    dec: f64,
    #[serde(default)]
    label: String,
    #[serde(default)]
    object_id: Option<u64>,
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<Vec<ExportRow>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    serde_json::from_str(&text).context("parsing JSON rows")
}

/// JSON has no encoding for NaN or infinity, so such rows are refused
/// rather than written as `null`.
fn save_json(rows: &[ExportRow], path: &Path) -> Result<()> {
    if let Some(row) = rows
        .iter()
        .find(|r| !(r.time.is_finite() && r.value.is_finite() && r.value_error.is_finite()))
    {
        bail!(
            "object {} band {} has a non-finite time, value or error; \
             save as .parquet or .csv instead",
            row.object_id,
            row.band
        );
    }
    let file = std::fs::File::create(path).context("creating JSON file")?;
    serde_json::to_writer(std::io::BufWriter::new(file), rows).context("writing JSON rows")
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<Vec<ExportRow>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, r)| r.with_context(|| format!("CSV row {i}")))
        .collect()
}

fn save_csv(rows: &[ExportRow], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    for row in rows {
        writer.serialize(row).context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn export_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("object_id", DataType::UInt64, false),
        Field::new("label", DataType::Utf8, false),
        Field::new("band", DataType::Utf8, false),
        Field::new("time", DataType::Float64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("value_error", DataType::Float64, false),
        Field::new("value_kind", DataType::Utf8, false),
    ]))
}

fn save_parquet(rows: &[ExportRow], path: &Path) -> Result<()> {
    let schema = export_schema();

    let ids = UInt64Array::from(rows.iter().map(|r| r.object_id.0).collect::<Vec<_>>());
    let labels = StringArray::from(rows.iter().map(|r| r.label.as_str()).collect::<Vec<_>>());
    let bands = StringArray::from(rows.iter().map(|r| r.band.as_str()).collect::<Vec<_>>());
    let times = Float64Array::from(rows.iter().map(|r| r.time).collect::<Vec<_>>());
    let values = Float64Array::from(rows.iter().map(|r| r.value).collect::<Vec<_>>());
    let errors = Float64Array::from(rows.iter().map(|r| r.value_error).collect::<Vec<_>>());
    let kinds = StringArray::from(
        rows.iter()
            .map(|r| r.value_kind.as_str())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(ids),
            Arc::new(labels),
            Arc::new(bands),
            Arc::new(times),
            Arc::new(values),
            Arc::new(errors),
            Arc::new(kinds),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Read an exported store.  Object ids may be stored signed or unsigned
/// (pandas writes `int64`), floats as `float64` or `float32`.
fn load_parquet(path: &Path) -> Result<Vec<ExportRow>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let ids = column(&batch, "object_id")?;
        let labels = column(&batch, "label")?;
        let bands = column(&batch, "band")?;
        let times = column(&batch, "time")?;
        let values = column(&batch, "value")?;
        let errors = column(&batch, "value_error")?;
        let kinds = column(&batch, "value_kind")?;

        for row in 0..batch.num_rows() {
            let kind = extract_string(kinds, row)?;
            rows.push(ExportRow {
                object_id: ObjectId(extract_id(ids, row)?),
                label: extract_string(labels, row)?,
                band: extract_string(bands, row)?,
                time: extract_f64(times, row)?,
                value: extract_f64(values, row)?,
                value_error: extract_f64(errors, row)?,
                value_kind: kind
                    .parse::<ValueKind>()
                    .map_err(|e| anyhow::anyhow!("Row {row}: {e}"))?,
            });
        }
    }

    Ok(rows)
}

// -- Parquet / Arrow helpers --

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Parquet file missing '{name}' column"))
}

fn extract_id(col: &ArrayRef, row: usize) -> Result<u64> {
    if col.is_null(row) {
        bail!("Row {row}: null object_id");
    }
    match col.data_type() {
        DataType::UInt64 => {
            let arr = col
                .as_any()
                .downcast_ref::<UInt64Array>()
                .context("expected UInt64Array")?;
            Ok(arr.value(row))
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            u64::try_from(arr.value(row)).with_context(|| format!("Row {row}: negative object_id"))
        }
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            u64::try_from(arr.value(row)).with_context(|| format!("Row {row}: negative object_id"))
        }
        other => bail!("object_id column has type {other:?}, expected an integer"),
    }
}

fn extract_f64(col: &ArrayRef, row: usize) -> Result<f64> {
    if col.is_null(row) {
        return Ok(f64::NAN);
    }
    if let Some(arr) = col.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.value(row))
    } else if let Some(arr) = col.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.value(row) as f64)
    } else {
        bail!("column has type {:?}, expected Float64 or Float32", col.data_type())
    }
}

fn extract_string(col: &ArrayRef, row: usize) -> Result<String> {
    if col.is_null(row) {
        return Ok(String::new());
    }
    match col.data_type() {
        DataType::Utf8 => Ok(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        other => bail!("column has type {other:?}, expected a string"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = load_file(Path::new("store.fits")).unwrap_err();
        assert!(err.to_string().contains(".fits"));
    }

    #[test]
    fn targets_without_ids_get_generated_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(&path, "ra,dec,label\n10.5,-2.0,TDE 2018\n150.1,2.2,Yang 18\n").unwrap();

        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        let second = targets.get(ObjectId(1)).unwrap();
        assert_eq!(second.label, "Yang 18");
        assert_eq!(second.coord, SkyCoord::new(150.1, 2.2));
    }

    #[test]
    fn targets_with_partial_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(
            &path,
            r#"[{"ra": 1.0, "dec": 2.0, "label": "a", "object_id": 4},
                {"ra": 3.0, "dec": 4.0, "label": "b"}]"#,
        )
        .unwrap();

        assert!(load_targets(&path).is_err());
    }

    #[test]
    fn duplicate_target_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(&path, "object_id,ra,dec,label\n3,1.0,2.0,a\n3,5.0,6.0,b\n").unwrap();

        assert!(load_targets(&path).is_err());
    }

    #[test]
    fn json_refuses_non_finite_values() {
        let row = ExportRow {
            object_id: ObjectId(7),
            label: "tde".into(),
            band: "wise_w1".into(),
            time: 59000.0,
            value: f64::NAN,
            value_error: 0.1,
            value_kind: ValueKind::Flux,
        };
        let store = AggregationStore::from_rows(vec![row.clone()]);
        let dir = tempfile::tempdir().unwrap();

        let json = dir.path().join("store.json");
        let err = save_file(&store, &json).unwrap_err();
        assert!(err.to_string().contains("non-finite"));

        let csv = dir.path().join("store.csv");
        save_file(&store, &csv).unwrap();
        let reloaded = load_file(&csv).unwrap().export();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded[0].value.is_nan());
        assert_eq!(reloaded[0].band, row.band);
    }
}
