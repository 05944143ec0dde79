//! Observatory position handling: ITRF (earth-centred, earth-fixed) coordinates
//! and WGS84 geodetic latitude/longitude/height.

use std::fmt::Display;

use crate::io::Header;
use crate::{Result, SolarViewerError};

/// WGS84 semi-major axis in metres
const WGS84_A: f64 = 6378137.0;
/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257223563;
/// OBSGEO components below this magnitude (metres) are treated as unset
const MIN_VALID_ITRF: f64 = 1e6;

/// Geodetic position on the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    /// latitude, degrees
    pub lat: f64,
    /// longitude, degrees
    pub lon: f64,
    /// height above the ellipsoid, metres
    pub height: f64,
}

impl Display for Geodetic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lat {} lon {} height {:.2} m",
            decimal_to_dms(self.lat),
            decimal_to_dms(self.lon),
            self.height
        )
    }
}

pub fn itrf_to_geodetic(x: f64, y: f64, z: f64) -> Geodetic {
    let b = WGS84_A * (1.0 - WGS84_F);
    let e_sq = 1.0 - (b / WGS84_A).powi(2);

    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p * (1.0 - e_sq));
    let mut height = 0.0;
    for _ in 0..5 {
        let n = WGS84_A / (1.0 - e_sq * lat.sin().powi(2)).sqrt();
        height = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - e_sq * n / (n + height)));
    }
    Geodetic {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
        height,
    }
}

pub fn geodetic_to_itrf(position: &Geodetic) -> (f64, f64, f64) {
    let lat = position.lat.to_radians();
    let lon = position.lon.to_radians();
    let e_sq = 2.0 * WGS84_F - WGS84_F * WGS84_F;
    let n = WGS84_A / (1.0 - e_sq * lat.sin().powi(2)).sqrt();
    (
        (n + position.height) * lat.cos() * lon.cos(),
        (n + position.height) * lat.cos() * lon.sin(),
        (n * (1.0 - e_sq) + position.height) * lat.sin(),
    )
}

/// parse `[-]DD:MM:SS.SS` into decimal degrees
pub fn dms_to_decimal(dms: &str) -> Result<f64> {
    let dms = dms.trim();
    let (negative, body) = match dms.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, dms),
    };
    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() != 3 {
        return Err(SolarViewerError::InvalidRequest(format!(
            "invalid DMS format: {}, expected DD:MM:SS.SS",
            dms
        )));
    }
    let mut values = [0.0; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part.parse::<f64>().map_err(|_| {
            SolarViewerError::InvalidRequest(format!("invalid DMS component {:?} in {}", part, dms))
        })?;
    }
    let decimal = values[0] + values[1] / 60.0 + values[2] / 3600.0;
    Ok(if negative { -decimal } else { decimal })
}

/// format decimal degrees (or hours) as `[-]DD:MM:SS.SS`
pub fn decimal_to_dms(decimal: f64) -> String {
    let negative = decimal < 0.0;
    let decimal = decimal.abs();
    // round at the last printed digit first so 59.999 s never shows as 60.00
    let total_centi = (decimal * 360000.0).round() as u64;
    let degrees = total_centi / 360000;
    let minutes = (total_centi % 360000) / 6000;
    let seconds = (total_centi % 6000) as f64 / 100.0;
    let dms = format!("{:02}:{:02}:{:05.2}", degrees, minutes, seconds);
    if negative {
        format!("-{}", dms)
    } else {
        dms
    }
}

/// observer position from the OBSGEO-X/Y/Z header keywords
pub fn observer_position(header: &Header) -> Result<Geodetic> {
    let component = |key: &str| {
        header.real(key).ok_or(SolarViewerError::InvalidFITS(format!(
            "missing {} in header",
            key
        )))
    };
    let (x, y, z) = (component("OBSGEO-X")?, component("OBSGEO-Y")?, component("OBSGEO-Z")?);
    if x.abs() > MIN_VALID_ITRF && y.abs() > MIN_VALID_ITRF && z.abs() > MIN_VALID_ITRF {
        Ok(itrf_to_geodetic(x, y, z))
    } else {
        Err(SolarViewerError::InvalidFITS(format!(
            "invalid telescope position in header: ({}, {}, {})",
            x, y, z
        )))
    }
}
