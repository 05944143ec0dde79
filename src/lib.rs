//! Stokes extraction, noise estimation and video rendering for solar radio images.

use std::path::Path;

use log::debug;
use ndarray::Array2;

mod errors;
pub mod axes;
pub mod capabilities;
pub mod colormap;
pub mod disk;
pub mod geodesy;
pub mod geom;
pub mod io;
pub mod render;
pub mod rms;
pub mod stokes;
pub mod stretch;
pub mod timestamps;
pub mod video;
#[cfg(feature = "python")]
mod python;

pub use crate::axes::{resolve_frequency, AxisMap, AxisRole, Frequency};
pub use crate::capabilities::Capabilities;
pub use crate::colormap::Colormap;
pub use crate::disk::{remove_pixels_away_from_sun, DISK_RADIUS_ARCMIN, HPC_DISK_RADIUS_ARCMIN};
pub use crate::errors::{Result, SolarViewerError};
pub use crate::geom::{PixelBox, Region, DEFAULT_RMS_BOX};
pub use crate::io::{AxisConvention, AxisWcs, Beam, CoordinateSystem, Header, ImageCube, Keyword};
pub use crate::render::{ensure_even_dimensions, render_frame, FrameInfo, FrameOptions, Overlays, RangeMode};
pub use crate::rms::{estimate_rms, plane_rms};
pub use crate::stokes::{derive, derive_all, DerivationConfig, DerivedPlane, StokesParam, StokesRequest};
pub use crate::stretch::{Normalizer, Stretch};
pub use crate::timestamps::{extract_datetime, format_timestamp, sort_files, SortOrder};
pub use crate::video::{compute_global_range, create_video, VideoOptions, VideoSummary};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// open an image file, FITS only unless the capabilities say otherwise
pub fn load_image<P: AsRef<Path>>(path: P, capabilities: &Capabilities) -> Result<ImageCube> {
    let path = path.as_ref();
    if path.is_dir() {
        // CASA images are directories
        capabilities.require_casa()?;
        return Err(SolarViewerError::MissingDependency(format!(
            "no CASA image reader for {}",
            path.display()
        )));
    }
    ImageCube::from_fits(path)
}

pub fn load_images(pattern: &str) -> Result<Vec<ImageCube>> {
    glob::glob(pattern)?
        .map(|path| ImageCube::from_fits(path?))
        .collect::<Result<Vec<ImageCube>>>()
}

/// the requested quantity of an image file, rows along latitude
pub fn get_pixel_values<P: AsRef<Path>>(
    path: P,
    request: &StokesRequest,
    config: &DerivationConfig,
    capabilities: &Capabilities,
) -> Result<Array2<f64>> {
    let cube = load_image(path, capabilities)?;
    debug!("{}", cube.summary());
    Ok(derive(&cube, request, config)?.into_sky())
}
