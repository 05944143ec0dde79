use std::path::Path;

use ndarray::{Array, IxDyn};
use solarviewer::{AxisWcs, CoordinateSystem, Header, ImageCube, Keyword};

/// one arcmin pixels, so the default disk mask keeps every pixel of a small image
pub const PIXEL_DEG: f64 = 1.0 / 60.0;

/// write a (RA, DEC, STOKES, FREQ) cube with `nx` x `ny` pixels, 4 Stokes planes
/// and `nfreq` channels; `value(stokes, freq, y, x)` gives the pixels
pub fn write_cube<P, F>(path: P, nx: usize, ny: usize, nfreq: usize, date_obs: Option<&str>, value: F) -> ImageCube
where
    P: AsRef<Path>,
    F: Fn(usize, usize, usize, usize) -> f64,
{
    // memory order is the reverse of the file order
    let data = Array::from_shape_fn(IxDyn(&[nfreq, 4, ny, nx]), |ix| value(ix[1], ix[0], ix[2], ix[3]));
    let coords = CoordinateSystem::new(vec![
        AxisWcs::new("RA---SIN", 200.0, (nx / 2) as f64, -PIXEL_DEG, "deg"),
        AxisWcs::new("DEC--SIN", -10.0, (ny / 2) as f64, PIXEL_DEG, "deg"),
        AxisWcs::new("STOKES", 1.0, 1.0, 1.0, ""),
        AxisWcs::new("FREQ", 1.5e8, 1.0, 2.0e6, "Hz"),
    ]);
    let ctypes = coords.axes.iter().map(|a| a.ctype.clone()).collect();
    let mut header = Header::new();
    header.insert("TELESCOP", Keyword::Str("SYNTH".to_string()));
    if let Some(date) = date_obs {
        header.insert("DATE-OBS", Keyword::Str(date.to_string()));
    }
    let cube = ImageCube::from_fits_axes(data, ctypes, header, coords).unwrap();
    cube.to_fits(path.as_ref()).unwrap();
    cube
}

/// constant Stokes planes I, Q, U, V
pub fn write_constant_cube<P: AsRef<Path>>(path: P, stokes: [f64; 4]) -> ImageCube {
    write_cube(path, 8, 6, 1, None, |s, _, _, _| stokes[s])
}
