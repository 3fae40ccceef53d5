use std::fmt;

use serde::{Deserialize, Serialize};

/// The raster layers exported per watershed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RasterKind {
    /// 3DEP elevation; the spatial reference for every patch.
    Dem,
    /// Landsat surface reflectance composite.
    Optical,
    /// Landsat surface temperature.
    Thermal,
    /// Sentinel-1 VV backscatter.
    SarVv,
    /// MERIT Hydro D8 flow direction codes.
    FlowDirection,
}

impl RasterKind {
    /// Every kind, reference first.
    pub const ALL: [RasterKind; 5] = [
        RasterKind::Dem,
        RasterKind::Optical,
        RasterKind::Thermal,
        RasterKind::SarVv,
        RasterKind::FlowDirection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RasterKind::Dem => "dem",
            RasterKind::Optical => "optical",
            RasterKind::Thermal => "thermal",
            RasterKind::SarVv => "sar_vv",
            RasterKind::FlowDirection => "flow_direction",
        }
    }

    /// File name inside a canonical watershed directory.
    pub fn canonical_filename(&self) -> &'static str {
        match self {
            RasterKind::Dem => "dem.tif",
            RasterKind::Optical => "optical.tif",
            RasterKind::Thermal => "thermal.tif",
            RasterKind::SarVv => "sar_vv.tif",
            RasterKind::FlowDirection => "flow_direction.tif",
        }
    }

    /// Substring identifying this layer in an export file name.
    pub fn export_marker(&self) -> &'static str {
        match self {
            RasterKind::Dem => "_DEM_",
            RasterKind::Optical => "_Landsat_Optical_",
            RasterKind::Thermal => "_Landsat_Thermal_",
            RasterKind::SarVv => "_SAR_VV_",
            RasterKind::FlowDirection => "_FlowDir_",
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, RasterKind::Dem)
    }

    /// Categorical layers hold class codes, not measurements.
    pub fn is_categorical(&self) -> bool {
        matches!(self, RasterKind::FlowDirection)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        RasterKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for RasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
