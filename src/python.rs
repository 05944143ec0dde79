use log::error;
use pyo3::prelude::*;

use crate::{
    video, Capabilities, DerivationConfig, PixelBox, Result, StokesParam, StokesRequest, VideoOptions,
};

/// A Python module implemented in Rust.
#[pymodule]
fn solarviewer(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", crate::VERSION)?;
    m.add_function(wrap_pyfunction!(get_pixel_values, m)?)?;
    m.add_function(wrap_pyfunction!(estimate_rms, m)?)?;
    m.add_function(wrap_pyfunction!(image_summary, m)?)?;
    m.add_function(wrap_pyfunction!(create_video, m)?)?;
    Ok(())
}

fn to_pixel_box(bounds: Option<(usize, usize, usize, usize)>) -> Option<PixelBox> {
    bounds.map(|(x1, x2, y1, y2)| PixelBox::new(x1, x2, y1, y2))
}

/// derived pixel values as rows of latitude
#[pyfunction]
#[pyo3(signature = (imagename, stokes="I", thres=10.0, rms_box=None, disk_radius=None))]
fn get_pixel_values(
    imagename: &str,
    stokes: &str,
    thres: f64,
    rms_box: Option<(usize, usize, usize, usize)>,
    disk_radius: Option<f64>,
) -> Result<Vec<Vec<f64>>> {
    let request = StokesRequest {
        param: stokes.parse::<StokesParam>()?,
        threshold: thres,
        rms_box: to_pixel_box(rms_box),
    };
    let mut config = DerivationConfig::default();
    if let Some(radius) = disk_radius {
        config.disk_radius_arcmin = radius;
    }
    let data = crate::get_pixel_values(imagename, &request, &config, &Capabilities::none())?;
    Ok(data.outer_iter().map(|row| row.to_vec()).collect())
}

#[pyfunction]
#[pyo3(signature = (imagename, stokes="I", rms_box=None))]
fn estimate_rms(imagename: &str, stokes: &str, rms_box: Option<(usize, usize, usize, usize)>) -> Result<f64> {
    let cube = crate::load_image(imagename, &Capabilities::none())?;
    let rms_box = to_pixel_box(rms_box).unwrap_or_default();
    crate::estimate_rms(&cube, stokes.parse()?, &rms_box)
}

#[pyfunction]
fn image_summary(imagename: &str) -> Result<String> {
    Ok(crate::load_image(imagename, &Capabilities::none())?.summary())
}

/// Render the files matching `pattern` into a video.
///
/// `progress(done, total)` may return `False` to stop early.
/// Returns `(output, frames_written, failed, cancelled)`.
#[pyfunction]
#[pyo3(signature = (pattern, output, config=None, progress=None))]
fn create_video(
    pattern: &str,
    output: &str,
    config: Option<&str>,
    progress: Option<Bound<'_, PyAny>>,
) -> Result<(String, usize, usize, bool)> {
    let options = match config {
        Some(filename) => VideoOptions::from_yaml(filename)?,
        None => VideoOptions::default(),
    };
    let files = video::input_files(pattern, options.sort)?;
    let capabilities = Capabilities::detect();
    let summary = video::create_video(&files, output, &options, &capabilities, |done, total| {
        let Some(callback) = &progress else {
            return true;
        };
        match callback.call1((done, total)) {
            Ok(ret) if ret.is_none() => true,
            Ok(ret) => ret.is_truthy().unwrap_or(true),
            Err(e) => {
                error!("progress callback failed: {}", e);
                false
            }
        }
    })?;
    Ok((
        summary.output.display().to_string(),
        summary.frames_written,
        summary.failed,
        summary.cancelled,
    ))
}
