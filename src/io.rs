use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use fitrs::{Fits, FitsData, Hdu, HeaderValue};
use log::debug;
use ndarray::{ArrayD, IxDyn};

use crate::axes::{AxisMap, AxisRole};
use crate::geodesy::decimal_to_dms;
use crate::{Result, SolarViewerError};

/// header keywords carried along with every cube, besides the per-axis WCS ones
const CARRIED_KEYWORDS: [&str; 17] = [
    "DATE-OBS", "DATE_OBS", "DATE", "TIMESYS", "TELESCOP", "INSTRUME", "OBJECT",
    "BUNIT", "FREQ", "BMAJ", "BMIN", "BPA", "OBSGEO-X", "OBSGEO-Y", "OBSGEO-Z",
    "BSCALE", "BZERO",
];

/// A single header value, detached from the FITS library representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyword {
    Str(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Keyword::Str(s) => write!(f, "{}", s),
            Keyword::Int(i) => write!(f, "{}", i),
            Keyword::Real(x) => write!(f, "{}", x),
            Keyword::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

impl From<&HeaderValue> for Keyword {
    fn from(value: &HeaderValue) -> Self {
        match value {
            HeaderValue::CharacterString(s) => Keyword::Str(s.trim().to_string()),
            HeaderValue::Logical(b) => Keyword::Bool(*b),
            HeaderValue::IntegerNumber(i) => Keyword::Int(*i as i64),
            HeaderValue::RealFloatingNumber(x) => Keyword::Real(*x),
            other => Keyword::Str(format!("{:?}", other)),
        }
    }
}

/// Header keywords of an image, looked up by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    keywords: BTreeMap<String, Keyword>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Keyword) {
        self.keywords.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Keyword> {
        self.keywords.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keywords.contains_key(key)
    }

    /// numeric value of a keyword, integers are widened
    pub fn real(&self, key: &str) -> Option<f64> {
        match self.keywords.get(key)? {
            Keyword::Real(x) => Some(*x),
            Keyword::Int(i) => Some(*i as f64),
            Keyword::Str(s) => s.trim().parse::<f64>().ok(),
            Keyword::Bool(_) => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.keywords.get(key)? {
            Keyword::Int(i) => Some(*i),
            Keyword::Real(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.keywords.get(key)? {
            Keyword::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// observation date, trying the keyword spellings seen in the wild
    pub fn date_obs(&self) -> Option<&str> {
        ["DATE-OBS", "DATE_OBS", "DATE"]
            .iter()
            .find_map(|key| self.string(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Keyword)> {
        self.keywords.iter()
    }
}

/// World coordinate description of a single axis, in on-disk (FITS) order.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisWcs {
    pub ctype: String,
    pub reference_value: f64,
    pub reference_pixel: f64,
    pub increment: f64,
    pub unit: String,
}

impl AxisWcs {
    pub fn new(ctype: &str, reference_value: f64, reference_pixel: f64, increment: f64, unit: &str) -> Self {
        Self {
            ctype: ctype.to_string(),
            reference_value,
            reference_pixel,
            increment,
            unit: unit.to_string(),
        }
    }

    fn is_spatial(&self) -> bool {
        ["RA--", "DEC-", "HPLN", "HPLT", "GLON", "GLAT", "Right Ascension", "Declination"]
            .iter()
            .any(|prefix| self.ctype.starts_with(prefix))
    }

    /// factor converting this axis' unit into degrees, `None` for non-angular axes
    fn degrees_per_unit(&self) -> Option<f64> {
        match self.unit.trim().to_lowercase().as_str() {
            "" | "deg" | "degree" | "degrees" => Some(1.0),
            "rad" | "radian" | "radians" => Some(180.0 / std::f64::consts::PI),
            "arcmin" => Some(1.0 / 60.0),
            "arcsec" => Some(1.0 / 3600.0),
            _ => None,
        }
    }

    pub fn increment_deg(&self) -> Option<f64> {
        self.degrees_per_unit().map(|k| self.increment * k)
    }

    pub fn reference_value_deg(&self) -> Option<f64> {
        self.degrees_per_unit().map(|k| self.reference_value * k)
    }
}

/// Coordinate system of an image: one `AxisWcs` per axis, NAXIS1 first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateSystem {
    pub axes: Vec<AxisWcs>,
}

impl CoordinateSystem {
    pub fn new(axes: Vec<AxisWcs>) -> Self {
        Self { axes }
    }

    /// spatial axes in on-disk order
    pub fn spatial_axes(&self) -> Vec<&AxisWcs> {
        self.axes.iter().filter(|axis| axis.is_spatial()).collect()
    }

    /// angular size of a pixel along the first spatial axis, in degrees
    pub fn pixel_increment_deg(&self) -> Result<f64> {
        self.spatial_axes()
            .first()
            .and_then(|axis| axis.increment_deg())
            .ok_or(SolarViewerError::MissingAxis(
                "coordinate system has no angular spatial axis".to_string(),
            ))
    }
}

/// Restoring beam, major/minor axes in arcsec and position angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    pub major: f64,
    pub minor: f64,
    pub position_angle: f64,
}

impl Beam {
    fn from_header(header: &Header) -> Option<Beam> {
        let major = header.real("BMAJ")?;
        let minor = header.real("BMIN")?;
        let position_angle = header.real("BPA").unwrap_or(0.0);
        Some(Beam {
            major: major * 3600.0,
            minor: minor * 3600.0,
            position_angle,
        })
    }
}

/// How axis labels of a cube are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisConvention {
    /// labels are CTYPE strings, array axes are reversed with respect to the file
    Fits,
    /// labels are CASA axis names, array axes are in file order
    Casa,
}

/// N-dimensional image read once from disk, with its metadata.
#[derive(Debug, Clone)]
pub struct ImageCube {
    pub data: ArrayD<f64>,
    /// axis labels in array order
    pub axis_names: Vec<String>,
    pub convention: AxisConvention,
    pub header: Header,
    pub coords: CoordinateSystem,
    pub beam: Option<Beam>,
    pub path: Option<PathBuf>,
}

impl Display for ImageCube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

fn required_naxis(hdu: &Hdu, key: &str) -> Result<usize> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(x)) if *x > 0 => Ok(*x as usize),
        _ => Err(SolarViewerError::InvalidFITS(format!("invalid {}", key))),
    }
}

impl ImageCube {
    /// build a cube from an array whose axes follow the CASA naming convention,
    /// e.g. `["Right Ascension", "Declination", "Stokes", "Frequency"]`
    pub fn from_casa_axes(data: ArrayD<f64>, axis_names: Vec<String>, coords: CoordinateSystem) -> Result<ImageCube> {
        if axis_names.len() != data.ndim() {
            return Err(SolarViewerError::InvalidRequest(format!(
                "{} axis names given for a {}-dimensional image",
                axis_names.len(),
                data.ndim()
            )));
        }
        Ok(ImageCube {
            data,
            axis_names,
            convention: AxisConvention::Casa,
            header: Header::new(),
            coords,
            beam: None,
            path: None,
        })
    }

    /// build a cube from an array in memory order and CTYPE strings in file order
    pub fn from_fits_axes(data: ArrayD<f64>, ctypes: Vec<String>, header: Header, coords: CoordinateSystem) -> Result<ImageCube> {
        if ctypes.len() != data.ndim() {
            return Err(SolarViewerError::InvalidFITS(format!(
                "{} CTYPE values for a {}-dimensional image",
                ctypes.len(),
                data.ndim()
            )));
        }
        let beam = Beam::from_header(&header);
        Ok(ImageCube {
            data,
            axis_names: ctypes.into_iter().rev().collect(),
            convention: AxisConvention::Fits,
            header,
            coords,
            beam,
            path: None,
        })
    }

    /// load image from the primary hdu of a fits file
    pub fn from_fits<P: AsRef<Path>>(filename: P) -> Result<ImageCube> {
        let filename = filename.as_ref();
        let fits = Fits::open(filename)
            .map_err(|e| SolarViewerError::io_context(filename.display(), e))?;
        let hdu = fits.get(0).ok_or(SolarViewerError::InvalidFITS(format!(
            "no primary hdu in {}",
            filename.display()
        )))?;

        let naxis = match hdu.value("NAXIS") {
            Some(HeaderValue::IntegerNumber(n)) if *n >= 2 => *n as usize,
            _ => {
                return Err(SolarViewerError::InvalidFITS(format!(
                    "expected NAXIS>=2 in {}",
                    filename.display()
                )))
            }
        };

        let mut header = Header::new();
        for key in CARRIED_KEYWORDS {
            if let Some(value) = hdu.value(key) {
                header.insert(key, Keyword::from(value));
            }
        }

        let mut fits_shape: Vec<usize> = Vec::with_capacity(naxis);
        let mut ctypes: Vec<String> = Vec::with_capacity(naxis);
        let mut axes: Vec<AxisWcs> = Vec::with_capacity(naxis);
        for i in 1..=naxis {
            fits_shape.push(required_naxis(&hdu, &format!("NAXIS{}", i))?);
            for prefix in ["CTYPE", "CRVAL", "CDELT", "CRPIX", "CUNIT"] {
                let key = format!("{}{}", prefix, i);
                if let Some(value) = hdu.value(&key) {
                    header.insert(key, Keyword::from(value));
                }
            }
            let ctype = header
                .string(&format!("CTYPE{}", i))
                .unwrap_or_default()
                .to_string();
            axes.push(AxisWcs {
                ctype: ctype.clone(),
                reference_value: header.real(&format!("CRVAL{}", i)).unwrap_or(0.0),
                reference_pixel: header.real(&format!("CRPIX{}", i)).unwrap_or(1.0),
                increment: header.real(&format!("CDELT{}", i)).unwrap_or(1.0),
                unit: header
                    .string(&format!("CUNIT{}", i))
                    .unwrap_or_default()
                    .to_string(),
            });
            ctypes.push(ctype);
        }

        let bscale = header.real("BSCALE").unwrap_or(1.0);
        let bzero = header.real("BZERO").unwrap_or(0.0);
        let scale = |v: f64| v * bscale + bzero;
        let data: Vec<f64> = match hdu.read_data() {
            FitsData::IntegersI32(array) => array
                .data
                .iter()
                .map(|x| match x {
                    Some(v) => scale(*v as f64),
                    None => f64::NAN,
                })
                .collect(),
            FitsData::IntegersU32(array) => array
                .data
                .iter()
                .map(|x| match x {
                    Some(v) => *v as f64,
                    None => f64::NAN,
                })
                .collect(),
            FitsData::FloatingPoint32(array) => array.data.iter().map(|x| *x as f64).collect(),
            FitsData::FloatingPoint64(array) => array.data.iter().copied().collect(),
            FitsData::Characters(array) => array
                .data
                .iter()
                .map(|x| scale(*x as u8 as f64))
                .collect(),
        };

        // fits stores NAXIS1 fastest, which is the last axis in memory order
        let shape: Vec<usize> = fits_shape.iter().rev().copied().collect();
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(SolarViewerError::InvalidFITS(format!(
                "{} holds {} pixels, header declares {}",
                filename.display(),
                data.len(),
                expected
            )));
        }
        let data = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| SolarViewerError::InvalidFITS(e.to_string()))?;
        debug!("loaded {} with shape {:?}", filename.display(), shape);

        let mut cube = ImageCube::from_fits_axes(data, ctypes, header, CoordinateSystem::new(axes))?;
        cube.path = Some(filename.to_path_buf());
        Ok(cube)
    }

    /// save cube to fits file
    pub fn to_fits<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let filename = filename.as_ref();
        let (fits_shape, data): (Vec<usize>, Vec<f64>) = match self.convention {
            AxisConvention::Fits => (
                self.data.shape().iter().rev().copied().collect(),
                self.data.iter().copied().collect(),
            ),
            AxisConvention::Casa => (
                self.data.shape().to_vec(),
                self.data.view().reversed_axes().iter().copied().collect(),
            ),
        };
        let mut hdu = Hdu::new(&fits_shape, data);
        for (i, ctype) in self.fits_ctypes().iter().enumerate() {
            hdu.insert(format!("CTYPE{}", i + 1), ctype.as_str());
            if let Some(axis) = self.coords.axes.get(i) {
                insert_real(&mut hdu, format!("CRVAL{}", i + 1), axis.reference_value);
                insert_real(&mut hdu, format!("CDELT{}", i + 1), axis.increment);
                insert_real(&mut hdu, format!("CRPIX{}", i + 1), axis.reference_pixel);
                if !axis.unit.is_empty() {
                    hdu.insert(format!("CUNIT{}", i + 1), axis.unit.as_str());
                }
            }
        }
        write_carried_keywords(&mut hdu, &self.header);
        Fits::create(filename, hdu).map_err(|e| SolarViewerError::io_context(filename.display(), e))?;
        Ok(())
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// CTYPE-style labels in file order (NAXIS1 first)
    pub fn fits_ctypes(&self) -> Vec<String> {
        match self.convention {
            AxisConvention::Fits => self.axis_names.iter().rev().cloned().collect(),
            AxisConvention::Casa => self.axis_names.iter().map(|name| casa_to_ctype(name)).collect(),
        }
    }

    /// axis lengths in file order (NAXIS1 first)
    pub fn fits_shape(&self) -> Vec<usize> {
        match self.convention {
            AxisConvention::Fits => self.shape().iter().rev().copied().collect(),
            AxisConvention::Casa => self.shape().to_vec(),
        }
    }

    /// world coordinates of the axis playing `role`
    pub fn axis_wcs(&self, map: &AxisMap, role: AxisRole) -> Option<&AxisWcs> {
        let index = match self.convention {
            AxisConvention::Fits => map.fits_index(role)?,
            AxisConvention::Casa => map.index(role)?,
        };
        self.coords.axes.get(index)
    }

    pub fn name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    /// human readable summary of the image metadata
    pub fn summary(&self) -> String {
        let beam_info = match &self.beam {
            Some(beam) => format!(
                "Beam: {:.2} × {:.2} arcsec @ {:.1}°",
                beam.major, beam.minor, beam.position_angle
            ),
            None => "No beam information".to_string(),
        };
        let spatial = self.coords.spatial_axes();
        let coord_info = match (spatial.first(), spatial.get(1)) {
            (Some(lon), Some(lat)) => match (lon.reference_value_deg(), lat.reference_value_deg()) {
                (Some(x), Some(y)) if lon.ctype.starts_with("RA") || lon.ctype.starts_with("Right") => {
                    format!(
                        "Reference: RA={}, Dec={}",
                        decimal_to_dms(x.rem_euclid(360.0) / 15.0),
                        decimal_to_dms(y)
                    )
                }
                (Some(x), Some(y)) => format!(
                    "Reference: {}={:.2}\", {}={:.2}\"",
                    lon.ctype.split('-').next().unwrap_or("X"),
                    x * 3600.0,
                    lat.ctype.split('-').next().unwrap_or("Y"),
                    y * 3600.0
                ),
                _ => "No coordinate reference information".to_string(),
            },
            _ => "No coordinate reference information".to_string(),
        };
        let pixel_scale = match (
            spatial.first().and_then(|a| a.increment_deg()),
            spatial.get(1).and_then(|a| a.increment_deg()),
        ) {
            (Some(dx), Some(dy)) => format!(
                "Pixel scale: {:.3} × {:.3} arcsec",
                (dx * 3600.0).abs(),
                (dy * 3600.0).abs()
            ),
            _ => "No pixel scale information".to_string(),
        };
        format!(
            "Image: {}\nShape: {:?}\n{}\n{}\n{}\n",
            self.name(),
            self.shape(),
            beam_info,
            coord_info,
            pixel_scale
        )
    }
}

pub(crate) fn write_carried_keywords(hdu: &mut Hdu, header: &Header) {
    for key in CARRIED_KEYWORDS {
        if key == "BSCALE" || key == "BZERO" {
            // pixels are written already scaled
            continue;
        }
        match header.get(key) {
            Some(Keyword::Str(s)) => hdu.insert(key, s.as_str()),
            Some(Keyword::Real(x)) => insert_real(hdu, key, *x),
            Some(Keyword::Int(i)) => match i32::try_from(*i) {
                Ok(n) => hdu.insert(key, HeaderValue::IntegerNumber(n)),
                Err(_) => insert_real(hdu, key, *i as f64),
            },
            Some(Keyword::Bool(_)) | None => (),
        }
    }
}

/// columns a fixed-format numeric value occupies in a header card
const FITS_VALUE_WIDTH: usize = 20;

/// the text fitrs writes for a real keyword, mantissa scaled into [1, 10)
fn fits_real_text(x: f64) -> String {
    let mut exp = 0;
    let mut f = x;
    if f.abs() >= 10.0 {
        while f.abs() >= 10.0 {
            f /= 10.0;
            exp += 1;
        }
    } else {
        while f.abs() < 1.0 {
            f *= 10.0;
            exp -= 1;
        }
    }
    if exp >= 0 {
        format!("{}E+{:02}", f, exp)
    } else {
        format!("{}E-{:02}", f, -exp)
    }
}

/// A header value fitrs can write without overflowing its card.
///
/// Whole numbers become integers, which also covers zero. Other values are
/// rounded to the most significant digits that still fit the value field.
/// Non-finite values have no FITS representation and give `None`.
pub(crate) fn header_value(x: f64) -> Option<HeaderValue> {
    if !x.is_finite() {
        return None;
    }
    if x.fract() == 0.0 && x.abs() <= i32::MAX as f64 {
        return Some(HeaderValue::IntegerNumber(x as i32));
    }
    (1..=17usize)
        .rev()
        .filter_map(|digits| format!("{:.*e}", digits - 1, x).parse::<f64>().ok())
        .find(|r| *r != 0.0 && r.is_finite() && fits_real_text(*r).len() <= FITS_VALUE_WIDTH)
        .map(HeaderValue::RealFloatingNumber)
}

pub(crate) fn insert_real(hdu: &mut Hdu, key: impl Into<String>, x: f64) {
    let key = key.into();
    match header_value(x) {
        Some(value) => hdu.insert(key, value),
        None => debug!("{} = {} has no FITS form, not written", key, x),
    }
}

/// FITS axis type for a CASA axis name
fn casa_to_ctype(name: &str) -> String {
    match name {
        "Right Ascension" => "RA---SIN",
        "Declination" => "DEC--SIN",
        "Stokes" => "STOKES",
        "Frequency" => "FREQ",
        other => other,
    }
    .to_string()
}
