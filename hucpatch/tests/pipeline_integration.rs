//! Integration tests for full extraction runs.
//!
//! Each test lays out synthetic GeoTIFFs and boundaries on disk and drives
//! the public API the way the CLI does.

use std::fs;
use std::path::Path;

use filetime::FileTime;
use tempfile::TempDir;

use hucpatch::config::RunConfig;
use hucpatch::coord::Crs;
use hucpatch::pipeline::{CancellationFlag, PipelineRunner, WatershedStatus};
use hucpatch::raster::{
    read_header, read_pixels, write_geotiff, GeoTiffImage, GeoTransform, PixelData, RasterKind,
};
use hucpatch::reconcile::ReconcileStatus;
use hucpatch::watershed::WatershedId;
use hucpatch::writer::{read_manifest, SourceStatus};

fn boundary_json(id: &str, size: f64) -> String {
    format!(
        r#"{{"type":"Feature",
            "crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::5070"}}}},
            "properties":{{"huc8":"{id}","name":"Synthetic","states":["NC","TN"]}},
            "geometry":{{"type":"Polygon","coordinates":[[[0,0],[{s},0],[{s},{s}],[0,{s}],[0,0]]]}}}}"#,
        id = id,
        s = size
    )
}

/// Write a constant-valued Albers raster with its top-left corner at
/// `(origin_x, origin_y)`.
fn write_raster(
    path: &Path,
    origin: (f64, f64),
    res: f64,
    size: (usize, usize),
    bands: usize,
    value: f32,
) {
    let (width, height) = size;
    let pixels = PixelData::F32(vec![value; width * height * bands]);
    write_geotiff(
        path,
        &GeoTiffImage {
            width,
            height,
            bands,
            transform: GeoTransform::new(origin.0, origin.1, res, -res),
            crs: Crs::CONUS_ALBERS,
            nodata: -9999.0,
            pixels: &pixels,
        },
    )
    .unwrap();
}

fn id(s: &str) -> WatershedId {
    WatershedId::parse(s).unwrap()
}

fn config(temp: &TempDir) -> RunConfig {
    let mut config = RunConfig::default();
    config.paths.canonical_root = temp.path().join("canonical");
    config.paths.output_root = temp.path().join("patches");
    config.run.workers = 2;
    config
}

/// A 5000 m square with a 10 m DEM, full-coverage optical, thermal and flow
/// direction, and SAR covering only [1000, 4000] on both axes.
#[test]
fn test_square_watershed_with_partial_sar() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.patch.size_px = 256;
    config.patch.stride_m = 2560.0;
    config.patch.min_overlap = 0.36;

    let dir = config.paths.canonical_root.join("06010105");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("boundary.geojson"), boundary_json("06010105", 5000.0)).unwrap();
    write_raster(&dir.join("dem.tif"), (0.0, 5000.0), 10.0, (500, 500), 1, 300.0);
    write_raster(&dir.join("sar_vv.tif"), (1000.0, 4000.0), 10.0, (300, 300), 1, -12.0);
    write_raster(&dir.join("optical.tif"), (0.0, 5010.0), 30.0, (168, 168), 3, 0.1);
    write_raster(&dir.join("thermal.tif"), (0.0, 5010.0), 30.0, (168, 168), 1, 290.0);
    write_raster(&dir.join("flow_direction.tif"), (0.0, 5000.0), 100.0, (50, 50), 1, 64.0);

    let summary = PipelineRunner::new(config.clone()).run(&CancellationFlag::new());
    let ws = summary.get(&id("06010105")).unwrap();
    assert_eq!(ws.status, WatershedStatus::Succeeded, "{}", summary.to_text());
    assert_eq!(ws.centers_generated, 4);
    assert_eq!(ws.stacks_written, 4);
    assert_eq!(ws.sources[&RasterKind::SarVv].valid, 1);
    assert_eq!(ws.sources[&RasterKind::SarVv].dropped, 3);

    let records = read_manifest(ws.manifest.as_ref().unwrap()).unwrap();
    let centers: Vec<(f64, f64)> = records.iter().map(|r| (r.center_x, r.center_y)).collect();
    for expected in [(1280.0, 1280.0), (3840.0, 1280.0), (1280.0, 3840.0), (3840.0, 3840.0)] {
        assert!(centers.contains(&expected), "{:?} not in {:?}", expected, centers);
    }

    let valid_sar: Vec<_> = records
        .iter()
        .filter(|r| r.is_valid(RasterKind::SarVv))
        .collect();
    assert_eq!(valid_sar.len(), 1);
    assert_eq!((valid_sar[0].center_x, valid_sar[0].center_y), (1280.0, 1280.0));

    for record in &records {
        // Every patch covers the same 2560 m footprint.
        assert_eq!(record.footprint.width(), 2560.0);
        assert_eq!(record.footprint.height(), 2560.0);
        let sar = &record.sources[&RasterKind::SarVv];
        let coverage = sar.coverage.unwrap();
        if sar.valid {
            assert!((coverage - 0.372).abs() < 0.001);
        } else {
            assert_eq!(sar.status, SourceStatus::Dropped);
            assert!(coverage < 0.36);
        }
    }
}

/// Boone exported twice; the newer DEM must win and feed the patches.
#[test]
fn test_boone_duplicates_reconciled_before_extraction() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    let exports = temp.path().join("exports");
    config.paths.export_root = Some(exports.clone());
    config.patch.size_px = 64;
    config.patch.stride_m = 1280.0;

    let base = "HUC8_07080101_Boone";
    let staging = temp.path().join("staging");
    fs::create_dir_all(&staging).unwrap();
    write_raster(&staging.join("old.tif"), (0.0, 2560.0), 20.0, (128, 128), 1, 1.0);
    write_raster(&staging.join("new.tif"), (0.0, 2560.0), 20.0, (128, 128), 1, 2.0);

    for (folder, source, mtime) in [
        (base.to_string(), "new.tif", 2_000_000),
        (format!("{} (1)", base), "old.tif", 1_000_000),
    ] {
        let dir = exports.join(&folder);
        fs::create_dir_all(&dir).unwrap();
        let dem = dir.join(format!("{}_DEM_10m.tif", base));
        fs::copy(staging.join(source), &dem).unwrap();
        filetime::set_file_mtime(&dem, FileTime::from_unix_time(mtime, 0)).unwrap();
        let boundary = dir.join(format!("{}_Buffered_Boundary.geojson", base));
        fs::write(&boundary, boundary_json("07080101", 2560.0)).unwrap();
        filetime::set_file_mtime(&boundary, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    let summary = PipelineRunner::new(config.clone()).run(&CancellationFlag::new());
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);

    let report = summary.reconcile.as_ref().unwrap();
    let boone = report.get(&id("07080101")).unwrap();
    assert_eq!(boone.folders.len(), 2);
    // Optical, thermal, SAR and flow direction were never exported.
    assert_eq!(boone.status(), ReconcileStatus::Warnings);

    let canonical = config.paths.canonical_root.join("07080101");
    assert_eq!(
        fs::read(canonical.join("dem.tif")).unwrap(),
        fs::read(staging.join("new.tif")).unwrap()
    );

    let ws = summary.get(&id("07080101")).unwrap();
    assert_eq!(ws.status, WatershedStatus::Partial);
    assert_eq!(ws.centers_generated, 4);
    assert_eq!(ws.stacks_written, 4);
    assert_eq!(ws.sources[&RasterKind::Optical].dropped, 4);

    let patch = config
        .paths
        .output_root
        .join("07080101/patch_000000/dem.tif");
    let header = read_header(&patch).unwrap();
    match read_pixels(&patch, &header).unwrap() {
        PixelData::F32(values) => assert!(values.iter().all(|v| *v == 2.0)),
        other => panic!("unexpected sample type {}", other.sample_type()),
    }

    // A second run changes nothing in the canonical directory.
    let again = PipelineRunner::new(config).run(&CancellationFlag::new());
    let boone = again.reconcile.as_ref().unwrap().get(&id("07080101")).unwrap();
    assert_eq!(boone.count("installed"), 0);
}

/// Manifest entries describe the files actually on disk.
#[test]
fn test_manifest_matches_written_files() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.patch.size_px = 50;
    config.patch.stride_m = 1000.0;

    let dir = config.paths.canonical_root.join("03020201");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("boundary.geojson"), boundary_json("03020201", 3000.0)).unwrap();
    write_raster(&dir.join("dem.tif"), (0.0, 3000.0), 20.0, (150, 150), 1, 10.0);
    write_raster(&dir.join("optical.tif"), (0.0, 3000.0), 30.0, (100, 100), 3, 0.2);

    let summary = PipelineRunner::new(config.clone()).run(&CancellationFlag::new());
    let ws = summary.get(&id("03020201")).unwrap();
    assert_eq!(ws.stacks_written, 9);

    let watershed_dir = config.paths.output_root.join("03020201");
    let records = read_manifest(ws.manifest.as_ref().unwrap()).unwrap();
    assert_eq!(records.len(), 9);
    for record in &records {
        assert_eq!(record.watershed_id, id("03020201"));
        assert_eq!(record.patch_id, format!("03020201_{:06}", record.sequence_index));
        for (kind, entry) in &record.sources {
            match entry.status {
                SourceStatus::Written => {
                    let path = watershed_dir.join(entry.file.as_ref().unwrap());
                    let header = read_header(&path).unwrap();
                    assert_eq!(Some(header.width), entry.width, "{}", kind);
                    assert_eq!(Some(header.bands), entry.bands, "{}", kind);
                    assert_eq!(Some(header.crs), entry.crs);
                    // Top-left corner snapped within one source pixel.
                    let (res, _) = header.transform.resolution();
                    assert!((header.transform.origin_x - record.footprint.min_x).abs() <= res);
                    assert!((header.transform.origin_y - record.footprint.max_y).abs() <= res);
                }
                SourceStatus::Dropped => {
                    assert!(entry.file.is_none());
                    assert!(entry.reason.is_some());
                }
                SourceStatus::WriteFailed => panic!("unexpected write failure for {}", kind),
            }
        }
    }
}
