//! Locating the Stokes, frequency and spatial axes of an image cube.

use crate::io::{AxisConvention, ImageCube};
use crate::{Result, SolarViewerError};

/// Semantic role of an image axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    Stokes,
    Frequency,
    /// right ascension, helioprojective or galactic longitude
    Longitude,
    /// declination, helioprojective or galactic latitude
    Latitude,
}

impl AxisRole {
    /// role of a CASA axis name, matched exactly
    pub fn from_casa_name(name: &str) -> Option<AxisRole> {
        match name {
            "Stokes" => Some(AxisRole::Stokes),
            "Frequency" => Some(AxisRole::Frequency),
            "Right Ascension" => Some(AxisRole::Longitude),
            "Declination" => Some(AxisRole::Latitude),
            _ => None,
        }
    }

    /// role of a FITS CTYPE value, matched by prefix
    pub fn from_ctype(ctype: &str) -> Option<AxisRole> {
        let ctype = ctype.trim();
        if ctype.starts_with("STOKES") {
            Some(AxisRole::Stokes)
        } else if ctype.starts_with("FREQ") {
            Some(AxisRole::Frequency)
        } else if ["RA--", "HPLN", "GLON"].iter().any(|p| ctype.starts_with(p)) || ctype == "RA" {
            Some(AxisRole::Longitude)
        } else if ["DEC-", "HPLT", "GLAT"].iter().any(|p| ctype.starts_with(p)) || ctype == "DEC" {
            Some(AxisRole::Latitude)
        } else {
            None
        }
    }
}

/// Position of each semantic axis within the in-memory array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisMap {
    pub ndim: usize,
    pub stokes: Option<usize>,
    pub frequency: Option<usize>,
    pub longitude: Option<usize>,
    pub latitude: Option<usize>,
    /// number of Stokes planes, 1 when there is no Stokes axis
    pub stokes_len: usize,
    pub has_stokes_axis: bool,
    pub is_single_stokes: bool,
}

impl AxisMap {
    pub fn resolve(cube: &ImageCube) -> Result<AxisMap> {
        match cube.convention {
            AxisConvention::Casa => AxisMap::from_casa_names(&cube.axis_names, cube.shape()),
            AxisConvention::Fits => AxisMap::from_fits_ctypes(&cube.fits_ctypes(), &cube.fits_shape()),
        }
    }

    /// CASA axis names and lengths are in array order already
    pub fn from_casa_names<S: AsRef<str>>(names: &[S], lengths: &[usize]) -> Result<AxisMap> {
        let roles: Vec<Option<AxisRole>> = names
            .iter()
            .map(|name| AxisRole::from_casa_name(name.as_ref()))
            .collect();
        AxisMap::from_roles(&roles, lengths)
    }

    /// CTYPE values and NAXISn lengths are in file order, reversed into array order here
    pub fn from_fits_ctypes<S: AsRef<str>>(ctypes: &[S], lengths: &[usize]) -> Result<AxisMap> {
        let roles: Vec<Option<AxisRole>> = ctypes
            .iter()
            .rev()
            .map(|ctype| AxisRole::from_ctype(ctype.as_ref()))
            .collect();
        let lengths: Vec<usize> = lengths.iter().rev().copied().collect();
        AxisMap::from_roles(&roles, &lengths)
    }

    fn from_roles(roles: &[Option<AxisRole>], lengths: &[usize]) -> Result<AxisMap> {
        if roles.len() != lengths.len() {
            return Err(SolarViewerError::InvalidRequest(format!(
                "{} axis labels for {} axis lengths",
                roles.len(),
                lengths.len()
            )));
        }
        let mut map = AxisMap {
            ndim: roles.len(),
            stokes: None,
            frequency: None,
            longitude: None,
            latitude: None,
            stokes_len: 1,
            has_stokes_axis: false,
            is_single_stokes: true,
        };
        for (index, role) in roles.iter().enumerate() {
            let slot = match role {
                Some(AxisRole::Stokes) => &mut map.stokes,
                Some(AxisRole::Frequency) => &mut map.frequency,
                Some(AxisRole::Longitude) => &mut map.longitude,
                Some(AxisRole::Latitude) => &mut map.latitude,
                None => continue,
            };
            if slot.is_some() {
                return Err(SolarViewerError::InvalidRequest(format!(
                    "more than one {:?} axis",
                    role
                )));
            }
            *slot = Some(index);
        }
        if let Some(stokes) = map.stokes {
            map.has_stokes_axis = true;
            map.stokes_len = lengths[stokes];
            map.is_single_stokes = map.stokes_len == 1;
        }
        Ok(map)
    }

    /// index of the role in file order (0 based), if present
    pub fn fits_index(&self, role: AxisRole) -> Option<usize> {
        self.index(role).map(|i| self.ndim - i - 1)
    }

    pub fn index(&self, role: AxisRole) -> Option<usize> {
        match role {
            AxisRole::Stokes => self.stokes,
            AxisRole::Frequency => self.frequency,
            AxisRole::Longitude => self.longitude,
            AxisRole::Latitude => self.latitude,
        }
    }
}

/// Observing frequency of an image and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frequency {
    /// reference value of the frequency axis, Hz
    Axis(f64),
    /// FREQ header keyword, Hz
    Keyword(f64),
    Unknown,
}

impl Frequency {
    pub fn hz(&self) -> Option<f64> {
        match self {
            Frequency::Axis(hz) | Frequency::Keyword(hz) => Some(*hz),
            Frequency::Unknown => None,
        }
    }
}

pub fn resolve_frequency(cube: &ImageCube, map: &AxisMap) -> Frequency {
    let from_axis = cube
        .axis_wcs(map, AxisRole::Frequency)
        .map(|axis| axis.reference_value);
    match (from_axis, cube.header.real("FREQ")) {
        (Some(hz), _) => Frequency::Axis(hz),
        (None, Some(hz)) => Frequency::Keyword(hz),
        (None, None) => Frequency::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_axes_are_reversed() {
        let ctypes = ["RA---SIN", "DEC--SIN", "STOKES", "FREQ"];
        let map = AxisMap::from_fits_ctypes(&ctypes, &[64, 32, 4, 2]).unwrap();
        assert_eq!(map.frequency, Some(0));
        assert_eq!(map.stokes, Some(1));
        assert_eq!(map.latitude, Some(2));
        assert_eq!(map.longitude, Some(3));
        assert_eq!(map.stokes_len, 4);
        assert!(map.has_stokes_axis);
        assert!(!map.is_single_stokes);
        assert_eq!(map.fits_index(AxisRole::Stokes), Some(2));
    }

    #[test]
    fn helioprojective_ctypes() {
        let map = AxisMap::from_fits_ctypes(&["HPLN-TAN", "HPLT-TAN"], &[10, 10]).unwrap();
        assert_eq!(map.longitude, Some(1));
        assert_eq!(map.latitude, Some(0));
        assert!(!map.has_stokes_axis);
        assert!(map.is_single_stokes);
    }

    #[test]
    fn casa_names_are_case_sensitive() {
        let names = ["Right Ascension", "Declination", "stokes", "Frequency"];
        let map = AxisMap::from_casa_names(&names, &[8, 8, 4, 1]).unwrap();
        assert_eq!(map.longitude, Some(0));
        assert_eq!(map.stokes, None);
        assert!(map.is_single_stokes);
        assert_eq!(map.frequency, Some(3));
    }

    #[test]
    fn length_one_stokes_axis_is_single_stokes() {
        let names = ["Right Ascension", "Declination", "Stokes", "Frequency"];
        let map = AxisMap::from_casa_names(&names, &[8, 8, 1, 1]).unwrap();
        assert!(map.has_stokes_axis);
        assert!(map.is_single_stokes);
    }

    #[test]
    fn duplicate_roles_are_rejected() {
        let err = AxisMap::from_fits_ctypes(&["RA---SIN", "RA---TAN"], &[4, 4]);
        assert!(matches!(err, Err(SolarViewerError::InvalidRequest(_))));
    }
}
