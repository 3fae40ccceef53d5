//! Grid command - print the patch centers of one watershed.

use std::path::Path;

use hucpatch::align::{AlignSpec, MultiSourceAligner};
use hucpatch::config::RunConfig;
use hucpatch::grid::{GridSpec, PatchGridGenerator};
use hucpatch::pipeline::load_watershed;
use hucpatch::raster::RasterCatalog;

use crate::error::CliError;

/// Run the grid command.
///
/// Centers come from the same boundary, CRS and footprint the `run`
/// command would use for `dir`.
pub fn run(dir: &Path, limit: Option<usize>, config: &RunConfig) -> Result<(), CliError> {
    let patch = &config.patch;
    let catalog = RasterCatalog::open(dir)?;
    let watershed =
        load_watershed(dir, &catalog, patch.buffer_m).map_err(CliError::Boundary)?;

    let align_spec = AlignSpec::new(patch.size_px, patch.min_overlap)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let footprint = MultiSourceAligner::new(&catalog, align_spec).footprint_size();
    let grid_spec = GridSpec::new(footprint, patch.stride_m, patch.coverage)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let generator = PatchGridGenerator::new(&watershed, grid_spec);

    println!("# {} {} ({})", watershed.id(), watershed.name(), watershed.crs());
    println!(
        "# footprint {} m, stride {} m, coverage {}",
        footprint, patch.stride_m, patch.coverage
    );
    println!("patch_id,x,y");

    let mut count = 0;
    for center in generator.centers().take(limit.unwrap_or(usize::MAX)) {
        println!("{},{:.3},{:.3}", center.patch_id(), center.x, center.y);
        count += 1;
    }
    eprintln!("{} centers", count);
    Ok(())
}
