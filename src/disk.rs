//! Masking of pixels outside the solar disk in ratio and fraction maps.

use ndarray::Array2;

/// Solar-disk radius (arcmin) used by the image viewer for ratio and fraction maps.
pub const DISK_RADIUS_ARCMIN: f64 = 55.0;
/// Solar-disk radius (arcmin) used when preparing helioprojective maps.
pub const HPC_DISK_RADIUS_ARCMIN: f64 = 60.0;

/// Zero every pixel further than `radius_arcmin` from the centre of the plane.
///
/// The centre is the geometric centre `(rows / 2, cols / 2)` of the array, not the
/// true solar disk centre. `increment_deg` is the angular pixel size; its sign is
/// ignored. Pixels exactly on the radius are kept.
pub fn remove_pixels_away_from_sun(plane: &mut Array2<f64>, increment_deg: f64, radius_arcmin: f64) -> &mut Array2<f64> {
    let radius_pix = (radius_arcmin / 60.0) / increment_deg.abs();
    let (rows, cols) = plane.dim();
    let (cy, cx) = ((rows / 2) as f64, (cols / 2) as f64);
    let limit = radius_pix * radius_pix;
    plane.indexed_iter_mut().for_each(|((y, x), value)| {
        let dy = y as f64 - cy;
        let dx = x as f64 - cx;
        if dx * dx + dy * dy > limit {
            *value = 0.0;
        }
    });
    plane
}
