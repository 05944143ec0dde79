//! Noise estimation from an off-source box of a Stokes plane.

use log::debug;
use ndarray::{s, ArrayView2};

use crate::axes::AxisMap;
use crate::geom::PixelBox;
use crate::io::ImageCube;
use crate::stokes::{stokes_plane, StokesParam};
use crate::{Result, SolarViewerError};

/// root-mean-square of `plane` (rows along latitude) inside `rms_box`
///
/// The box is clamped to the plane. An empty selection gives 0.
pub fn plane_rms(plane: &ArrayView2<f64>, rms_box: &PixelBox) -> f64 {
    let (rows, cols) = plane.dim();
    let (xs, ys) = rms_box.clamped(cols, rows);
    if xs.is_empty() || ys.is_empty() {
        return 0.0;
    }
    let region = plane.slice(s![ys, xs]);
    let n = region.len() as f64;
    (region.iter().map(|v| v * v).sum::<f64>() / n).sqrt()
}

/// rms of one basic Stokes plane of `cube` inside `rms_box`
pub fn estimate_rms(cube: &ImageCube, stokes: StokesParam, rms_box: &PixelBox) -> Result<f64> {
    if stokes.plane_index().is_none() {
        return Err(SolarViewerError::InvalidRequest(format!(
            "rms can only be estimated for I, Q, U or V, not {}",
            stokes
        )));
    }
    let map = AxisMap::resolve(cube)?;
    if !map.has_stokes_axis && stokes != StokesParam::I {
        return Err(SolarViewerError::SingleStokes(format!(
            "{} has no Stokes axis, cannot estimate the rms of {}",
            cube.name(),
            stokes
        )));
    }
    let plane = stokes_plane(cube, &map, stokes)?;
    let rms = plane_rms(&plane.sky_view(), rms_box);
    debug!("rms of {} in {} over {}: {}", stokes, cube.name(), rms_box, rms);
    Ok(rms)
}
