use std::io::Write;

use rusty_lightcurves::data::loader::{load_file, load_targets, save_file};
use rusty_lightcurves::data::model::{Fragment, ObjectId, SkyCoord, TargetSet, ValueKind};
use rusty_lightcurves::data::store::AggregationStore;

fn sample_store() -> AggregationStore {
    let targets = TargetSet::from_coordinates([
        (SkyCoord::new(150.1, 2.2), "agn"),
        (SkyCoord::new(10.5, -40.0), ""),
    ]);
    let mut store = AggregationStore::new();
    store.register_targets(&targets);

    let [a, b] = [&targets.as_slice()[0], &targets.as_slice()[1]];
    let mut gaia = Fragment::new();
    gaia.record(a, "gaia_g", 57_289.819_831_805_6, 0.123_456_789, 0.001, ValueKind::Flux);
    gaia.record(b, "gaia_bp", 57_300.25, 1.5e-3, 2.0e-5, ValueKind::Flux);
    let mut ztf = Fragment::new();
    ztf.record(a, "ztf_g", 58_500.1, 18.25, 0.05, ValueKind::Magnitude);
    ztf.record(a, "ztf_g", 58_400.9, 18.75, 0.06, ValueKind::Magnitude);

    store.merge(ztf);
    store.merge(gaia);
    store
}

fn round_trip(extension: &str) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("store.{extension}"));
    let store = sample_store();

    save_file(&store, &path).unwrap();
    let loaded = load_file(&path).unwrap();

    assert_eq!(loaded.export(), store.export(), "{extension} round trip");
    assert_eq!(loaded.label_for(ObjectId(0)), Some("agn"));
    assert_eq!(loaded.curve(ObjectId(0), "ztf_g").map(<[_]>::len), Some(2));
}

#[test]
fn parquet_round_trip_preserves_rows() {
    round_trip("parquet");
}

#[test]
fn csv_round_trip_preserves_rows() {
    round_trip("csv");
}

#[test]
fn json_round_trip_preserves_rows() {
    round_trip("json");
}

#[test]
fn empty_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.parquet");
    save_file(&AggregationStore::new(), &path).unwrap();
    assert!(load_file(&path).unwrap().is_empty());
}

#[test]
fn export_is_sorted_by_object_band_time() {
    let rows = sample_store().export();
    let keys: Vec<(u64, &str, f64)> = rows
        .iter()
        .map(|r| (r.object_id.0, r.band.as_str(), r.time))
        .collect();
    assert_eq!(
        keys,
        vec![
            (0, "gaia_g", 57_289.819_831_805_6),
            (0, "ztf_g", 58_400.9),
            (0, "ztf_g", 58_500.1),
            (1, "gaia_bp", 57_300.25),
        ]
    );
}

#[test]
fn targets_load_from_csv_with_ids() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "object_id,ra,dec,label").unwrap();
    writeln!(file, "17,150.1,2.2,agn").unwrap();
    writeln!(file, "4,10.5,-40.0,").unwrap();
    file.flush().unwrap();

    let targets = load_targets(file.path()).unwrap();
    assert_eq!(targets.len(), 2);
    let first = targets.get(ObjectId(17)).unwrap();
    assert_eq!(first.label, "agn");
    assert_eq!(first.coord.dec_deg, 2.2);
    assert_eq!(targets.get(ObjectId(4)).unwrap().label, "");
}
