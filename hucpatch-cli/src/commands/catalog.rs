//! Catalog command - show the rasters of a canonical directory.

use std::path::Path;

use hucpatch::raster::RasterCatalog;
use serde_json::json;

use crate::error::CliError;

/// Run the catalog command.
pub fn run(dir: &Path, json: bool) -> Result<(), CliError> {
    let catalog = RasterCatalog::open(dir)?;

    if json {
        let sources: Vec<_> = catalog
            .sources()
            .map(|s| {
                let (res_x, res_y) = s.resolution();
                json!({
                    "kind": s.kind(),
                    "path": s.path().display().to_string(),
                    "width": s.width(),
                    "height": s.height(),
                    "bands": s.bands(),
                    "sample_type": s.sample_type().as_str(),
                    "crs": s.crs(),
                    "resolution": [res_x, res_y],
                    "bounds": s.bounds(),
                    "nodata": s.nodata(),
                })
            })
            .collect();
        let unreadable: Vec<_> = catalog
            .unreadable()
            .iter()
            .map(|(kind, e)| json!({ "kind": kind, "reason": e.to_string() }))
            .collect();
        let doc = json!({
            "dir": dir.display().to_string(),
            "sources": sources,
            "unreadable": unreadable,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string())
        );
        return Ok(());
    }

    println!("Raster Catalog: {}", dir.display());
    println!("===============");
    println!();
    for source in catalog.sources() {
        let (res_x, res_y) = source.resolution();
        let bounds = source.bounds();
        println!("{}", source.kind());
        println!("  Path:       {}", source.path().display());
        println!(
            "  Size:       {} x {} x {} ({})",
            source.width(),
            source.height(),
            source.bands(),
            source.sample_type()
        );
        println!("  CRS:        {}", source.crs());
        println!("  Resolution: {} x {}", res_x, res_y);
        println!(
            "  Bounds:     ({}, {}) - ({}, {})",
            bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
        );
        println!("  Nodata:     {}", source.nodata());
    }
    if !catalog.unreadable().is_empty() {
        println!();
        println!("Unavailable:");
        for (kind, e) in catalog.unreadable() {
            println!("  {}: {}", kind, e);
        }
    }
    Ok(())
}
