//! Extraction of Stokes planes and derived polarization quantities from an image cube.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use fitrs::{Fits, Hdu};
use log::debug;
use ndarray::{Array2, ArrayView2, Axis, Ix2, Zip};
use serde::{Deserialize, Serialize};

use crate::axes::{AxisMap, AxisRole};
use crate::disk::{remove_pixels_away_from_sun, DISK_RADIUS_ARCMIN, HPC_DISK_RADIUS_ARCMIN};
use crate::geom::PixelBox;
use crate::io::{insert_real, write_carried_keywords, ImageCube};
use crate::rms::{estimate_rms, plane_rms};
use crate::{Result, SolarViewerError};

/// significance threshold, in units of the local rms, when none is given
pub const DEFAULT_THRESHOLD: f64 = 10.0;

/// Quantity that can be extracted from a polarimetric cube.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum StokesParam {
    I,
    Q,
    U,
    V,
    /// linearly polarized intensity, sqrt(Q² + U²)
    L,
    /// thresholded L / I
    Lfrac,
    /// thresholded V / I
    Vfrac,
    #[serde(rename = "Q/I")]
    QOverI,
    #[serde(rename = "U/I")]
    UOverI,
    #[serde(rename = "U/V")]
    UOverV,
    /// polarization angle in degrees
    #[serde(rename = "PANG")]
    Pang,
}

impl StokesParam {
    pub const ALL: [StokesParam; 11] = [
        StokesParam::I,
        StokesParam::Q,
        StokesParam::U,
        StokesParam::V,
        StokesParam::L,
        StokesParam::Lfrac,
        StokesParam::Vfrac,
        StokesParam::QOverI,
        StokesParam::UOverI,
        StokesParam::UOverV,
        StokesParam::Pang,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StokesParam::I => "I",
            StokesParam::Q => "Q",
            StokesParam::U => "U",
            StokesParam::V => "V",
            StokesParam::L => "L",
            StokesParam::Lfrac => "Lfrac",
            StokesParam::Vfrac => "Vfrac",
            StokesParam::QOverI => "Q/I",
            StokesParam::UOverI => "U/I",
            StokesParam::UOverV => "U/V",
            StokesParam::Pang => "PANG",
        }
    }

    /// index along the Stokes axis for the four basic parameters
    pub fn plane_index(&self) -> Option<usize> {
        match self {
            StokesParam::I => Some(0),
            StokesParam::Q => Some(1),
            StokesParam::U => Some(2),
            StokesParam::V => Some(3),
            _ => None,
        }
    }
}

impl Display for StokesParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StokesParam {
    type Err = SolarViewerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StokesParam::ALL
            .iter()
            .find(|param| param.as_str() == s)
            .copied()
            .ok_or(SolarViewerError::InvalidRequest(format!(
                "Unknown Stokes parameter: {}",
                s
            )))
    }
}

/// A Stokes quantity to derive, with its significance threshold and rms box.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct StokesRequest {
    pub param: StokesParam,
    pub threshold: f64,
    pub rms_box: Option<PixelBox>,
}

impl StokesRequest {
    pub fn new(param: StokesParam) -> Self {
        Self {
            param,
            threshold: DEFAULT_THRESHOLD,
            rms_box: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_rms_box(mut self, rms_box: PixelBox) -> Self {
        self.rms_box = Some(rms_box);
        self
    }

    pub fn rms_box(&self) -> PixelBox {
        self.rms_box.unwrap_or_default()
    }
}

/// Settings shared by every derivation.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct DerivationConfig {
    /// radius of the solar-disk mask applied to fraction and ratio maps
    pub disk_radius_arcmin: f64,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            disk_radius_arcmin: DISK_RADIUS_ARCMIN,
        }
    }
}

impl DerivationConfig {
    /// the wider disk used when maps are prepared for helioprojective reprojection
    pub fn helioprojective() -> Self {
        Self {
            disk_radius_arcmin: HPC_DISK_RADIUS_ARCMIN,
        }
    }
}

/// 2-D result of a derivation, axes kept in the cube's array order.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedPlane {
    pub param: StokesParam,
    pub data: Array2<f64>,
    /// which of the two array axes is the longitude (x) axis, if known
    pub longitude_axis: Option<usize>,
    pub latitude_axis: Option<usize>,
}

impl DerivedPlane {
    /// `true` when rows run along latitude and columns along longitude
    fn is_sky_ordered(&self) -> bool {
        !matches!(
            (self.latitude_axis, self.longitude_axis),
            (Some(1), _) | (_, Some(0))
        )
    }

    /// view with rows along latitude (y) and columns along longitude (x)
    pub fn sky_view(&self) -> ArrayView2<'_, f64> {
        if self.is_sky_ordered() {
            self.data.view()
        } else {
            self.data.t()
        }
    }

    pub fn into_sky(self) -> Array2<f64> {
        if self.is_sky_ordered() {
            self.data
        } else {
            self.data.reversed_axes()
        }
    }

    /// a plane with the same axis layout holding other values
    fn with_data(&self, param: StokesParam, data: Array2<f64>) -> DerivedPlane {
        DerivedPlane {
            param,
            data,
            longitude_axis: self.longitude_axis,
            latitude_axis: self.latitude_axis,
        }
    }

    /// rms of the plane inside `rms_box`
    pub fn rms(&self, rms_box: &PixelBox) -> f64 {
        plane_rms(&self.sky_view(), rms_box)
    }

    /// write the plane as a 2-D fits image carrying the spatial coordinates of `cube`
    pub fn to_fits<P: AsRef<Path>>(&self, filename: P, cube: &ImageCube) -> Result<()> {
        let filename = filename.as_ref();
        let sky = self.sky_view();
        let (rows, cols) = sky.dim();
        let mut hdu = Hdu::new(&[cols, rows], sky.iter().copied().collect::<Vec<f64>>());
        let map = AxisMap::resolve(cube)?;
        for (n, role) in [(1, AxisRole::Longitude), (2, AxisRole::Latitude)] {
            if let Some(axis) = cube.axis_wcs(&map, role) {
                hdu.insert(format!("CTYPE{}", n), axis.ctype.as_str());
                insert_real(&mut hdu, format!("CRVAL{}", n), axis.reference_value);
                insert_real(&mut hdu, format!("CDELT{}", n), axis.increment);
                insert_real(&mut hdu, format!("CRPIX{}", n), axis.reference_pixel);
                if !axis.unit.is_empty() {
                    hdu.insert(format!("CUNIT{}", n), axis.unit.as_str());
                }
            }
        }
        hdu.insert("BTYPE", self.param.as_str());
        write_carried_keywords(&mut hdu, &cube.header);
        Fits::create(filename, hdu).map_err(|e| SolarViewerError::io_context(filename.display(), e))?;
        Ok(())
    }
}

fn single_stokes_error() -> SolarViewerError {
    SolarViewerError::SingleStokes(
        "The image is single stokes, but the Stokes parameter is not 'I'.".to_string(),
    )
}

/// plane `index` of the Stokes axis at the first frequency channel
pub fn stokes_plane(cube: &ImageCube, map: &AxisMap, param: StokesParam) -> Result<DerivedPlane> {
    let index = param.plane_index().ok_or(SolarViewerError::InvalidRequest(format!(
        "{} is not a plain Stokes parameter",
        param
    )))?;
    if map.ndim != cube.ndim() {
        return Err(SolarViewerError::InvalidRequest(format!(
            "axis map is for {} dimensions, image has {}",
            map.ndim,
            cube.ndim()
        )));
    }

    let mut removals: Vec<(usize, usize)> = vec![];
    match map.stokes {
        Some(axis) => {
            if index >= map.stokes_len {
                return Err(if map.is_single_stokes {
                    single_stokes_error()
                } else {
                    SolarViewerError::InvalidRequest(format!(
                        "Stokes {} requested but the image has only {} Stokes planes",
                        param, map.stokes_len
                    ))
                });
            }
            removals.push((axis, index));
        }
        None if index != 0 => return Err(single_stokes_error()),
        None => (),
    }
    // later channels are ignored, not averaged
    if let Some(axis) = map.frequency {
        removals.push((axis, 0));
    }
    removals.sort_by(|a, b| b.0.cmp(&a.0));

    let mut view = cube.data.view();
    let mut kept: Vec<usize> = (0..map.ndim).collect();
    for (axis, i) in removals {
        view = view.index_axis_move(Axis(axis), i);
        kept.remove(axis);
    }
    // drop any remaining degenerate axes that are not spatial
    while view.ndim() > 2 {
        let spatial = [map.longitude, map.latitude];
        let degenerate = (0..view.ndim())
            .find(|&p| view.len_of(Axis(p)) == 1 && !spatial.contains(&Some(kept[p])));
        match degenerate {
            Some(p) => {
                view = view.index_axis_move(Axis(p), 0);
                kept.remove(p);
            }
            None => {
                return Err(SolarViewerError::MissingAxis(format!(
                    "cannot reduce image of shape {:?} to a 2-D plane",
                    cube.shape()
                )))
            }
        }
    }
    let data = view
        .into_dimensionality::<Ix2>()
        .map_err(|_| {
            SolarViewerError::MissingAxis(format!(
                "image of shape {:?} has fewer than two spatial axes",
                cube.shape()
            ))
        })?
        .to_owned();

    Ok(DerivedPlane {
        param,
        data,
        longitude_axis: kept.iter().position(|&a| Some(a) == map.longitude),
        latitude_axis: kept.iter().position(|&a| Some(a) == map.latitude),
    })
}

fn require_polarization(map: &AxisMap) -> Result<()> {
    if !map.has_stokes_axis {
        Err(SolarViewerError::MissingAxis(
            "The image does not have a Stokes axis.".to_string(),
        ))
    } else if map.is_single_stokes {
        Err(single_stokes_error())
    } else {
        Ok(())
    }
}

/// zero pixels whose magnitude is below `limit`
fn apply_threshold(plane: &mut Array2<f64>, limit: f64) {
    plane.mapv_inplace(|v| if v.abs() < limit { 0.0 } else { v });
}

fn linear_polarization(q: &Array2<f64>, u: &Array2<f64>) -> Array2<f64> {
    Zip::from(q).and(u).map_collect(|q, u| (q * q + u * u).sqrt())
}

/// thresholded `numerator / denominator`, masked to the solar disk
fn ratio(
    cube: &ImageCube,
    mut numerator: DerivedPlane,
    denominator: &DerivedPlane,
    limit: f64,
    config: &DerivationConfig,
    param: StokesParam,
) -> Result<DerivedPlane> {
    apply_threshold(&mut numerator.data, limit);
    // zero denominators are left to produce inf/nan
    let mut data = &numerator.data / &denominator.data;
    remove_pixels_away_from_sun(
        &mut data,
        cube.coords.pixel_increment_deg()?,
        config.disk_radius_arcmin,
    );
    Ok(numerator.with_data(param, data))
}

/// derive the requested quantity from `cube`
pub fn derive(cube: &ImageCube, request: &StokesRequest, config: &DerivationConfig) -> Result<DerivedPlane> {
    let map = AxisMap::resolve(cube)?;
    let rms_box = request.rms_box();
    let thres = request.threshold;
    debug!("deriving {} from {} ({:?})", request.param, cube.name(), map);

    match request.param {
        StokesParam::I => stokes_plane(cube, &map, StokesParam::I),
        param @ (StokesParam::Q | StokesParam::U | StokesParam::V) => {
            if map.is_single_stokes {
                return Err(single_stokes_error());
            }
            stokes_plane(cube, &map, param)
        }
        StokesParam::L => {
            require_polarization(&map)?;
            let q = stokes_plane(cube, &map, StokesParam::Q)?;
            let u = stokes_plane(cube, &map, StokesParam::U)?;
            Ok(q.with_data(StokesParam::L, linear_polarization(&q.data, &u.data)))
        }
        StokesParam::Lfrac => {
            require_polarization(&map)?;
            let q = stokes_plane(cube, &map, StokesParam::Q)?;
            let u = stokes_plane(cube, &map, StokesParam::U)?;
            let i = stokes_plane(cube, &map, StokesParam::I)?;
            let l = q.with_data(StokesParam::L, linear_polarization(&q.data, &u.data));
            let p_rms = l.rms(&rms_box);
            debug!("polarized intensity rms {}", p_rms);
            ratio(cube, l, &i, thres * p_rms, config, StokesParam::Lfrac)
        }
        StokesParam::Vfrac => {
            require_polarization(&map)?;
            let v = stokes_plane(cube, &map, StokesParam::V)?;
            let i = stokes_plane(cube, &map, StokesParam::I)?;
            let v_rms = estimate_rms(cube, StokesParam::V, &rms_box)?;
            ratio(cube, v, &i, thres * v_rms, config, StokesParam::Vfrac)
        }
        StokesParam::QOverI => {
            require_polarization(&map)?;
            let q = stokes_plane(cube, &map, StokesParam::Q)?;
            let i = stokes_plane(cube, &map, StokesParam::I)?;
            let q_rms = estimate_rms(cube, StokesParam::Q, &rms_box)?;
            ratio(cube, q, &i, thres * q_rms, config, StokesParam::QOverI)
        }
        StokesParam::UOverI => {
            require_polarization(&map)?;
            let u = stokes_plane(cube, &map, StokesParam::U)?;
            let i = stokes_plane(cube, &map, StokesParam::I)?;
            let u_rms = estimate_rms(cube, StokesParam::U, &rms_box)?;
            ratio(cube, u, &i, thres * u_rms, config, StokesParam::UOverI)
        }
        StokesParam::UOverV => {
            require_polarization(&map)?;
            let u = stokes_plane(cube, &map, StokesParam::U)?;
            let v = stokes_plane(cube, &map, StokesParam::V)?;
            let u_rms = estimate_rms(cube, StokesParam::U, &rms_box)?;
            ratio(cube, u, &v, thres * u_rms, config, StokesParam::UOverV)
        }
        StokesParam::Pang => {
            require_polarization(&map)?;
            let q = stokes_plane(cube, &map, StokesParam::Q)?;
            let u = stokes_plane(cube, &map, StokesParam::U)?;
            let data = Zip::from(&u.data)
                .and(&q.data)
                .map_collect(|u, q| 0.5 * u.atan2(*q).to_degrees());
            Ok(q.with_data(StokesParam::Pang, data))
        }
    }
}

/// every quantity the cube supports: only I for single-Stokes images
pub fn derive_all(cube: &ImageCube, threshold: f64, rms_box: Option<PixelBox>, config: &DerivationConfig) -> Result<Vec<DerivedPlane>> {
    let map = AxisMap::resolve(cube)?;
    let params: Vec<StokesParam> = if map.is_single_stokes {
        vec![StokesParam::I]
    } else {
        StokesParam::ALL
            .iter()
            .copied()
            .filter(|p| match p {
                StokesParam::I => true,
                StokesParam::Q => map.stokes_len >= 2,
                StokesParam::U | StokesParam::L | StokesParam::Lfrac | StokesParam::QOverI
                | StokesParam::UOverI | StokesParam::Pang => map.stokes_len >= 3,
                StokesParam::V | StokesParam::Vfrac | StokesParam::UOverV => map.stokes_len >= 4,
            })
            .collect()
    };
    params
        .into_iter()
        .map(|param| {
            let request = StokesRequest {
                param,
                threshold,
                rms_box,
            };
            derive(cube, &request, config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AxisWcs, CoordinateSystem, Header};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, ArrayD, IxDyn};

    /// FITS-convention cube with memory shape (2 freq, 4 stokes, ny, nx)
    fn polarized_cube(ny: usize, nx: usize, f: impl Fn(usize, usize, usize, usize) -> f64) -> ImageCube {
        // memory order is the reverse of the FITS axes: (freq, stokes, dec, ra)
        let data = Array::from_shape_fn(IxDyn(&[2, 4, ny, nx]), |ix| f(ix[1], ix[0], ix[2], ix[3]));
        let coords = CoordinateSystem::new(vec![
            AxisWcs::new("RA---SIN", 0.0, 1.0, -1.0 / 60.0, "deg"),
            AxisWcs::new("DEC--SIN", 0.0, 1.0, 1.0 / 60.0, "deg"),
            AxisWcs::new("STOKES", 1.0, 1.0, 1.0, ""),
            AxisWcs::new("FREQ", 1.0e8, 1.0, 1.0e6, "Hz"),
        ]);
        let ctypes = coords.axes.iter().map(|a| a.ctype.clone()).collect();
        ImageCube::from_fits_axes(data, ctypes, Header::new(), coords).unwrap()
    }

    fn two_by_two(q: [[f64; 2]; 2], u: [[f64; 2]; 2]) -> ImageCube {
        polarized_cube(2, 2, move |s, _, y, x| match s {
            0 => 1.0,
            1 => q[y][x],
            2 => u[y][x],
            _ => 0.0,
        })
    }

    #[test]
    fn parse_all_names() {
        for param in StokesParam::ALL {
            assert_eq!(param.as_str().parse::<StokesParam>().unwrap(), param);
        }
        assert!("q".parse::<StokesParam>().is_err());
        assert!("P".parse::<StokesParam>().is_err());
    }

    #[test]
    fn basic_planes_take_first_channel() {
        let cube = polarized_cube(3, 5, |s, f, y, x| (1000 * s + 100 * f + 10 * y + x) as f64);
        for param in [StokesParam::I, StokesParam::Q, StokesParam::U, StokesParam::V] {
            let plane = derive(&cube, &StokesRequest::new(param), &DerivationConfig::default()).unwrap();
            let s = param.plane_index().unwrap();
            assert_eq!(plane.data.dim(), (3, 5));
            let expected = cube
                .data
                .index_axis(Axis(0), 0)
                .index_axis(Axis(0), s)
                .into_dimensionality::<Ix2>()
                .unwrap()
                .to_owned();
            assert_eq!(plane.data, expected);
            assert_eq!(plane.data[[2, 4]], (1000 * s + 24) as f64);
            assert_eq!(plane.latitude_axis, Some(0));
            assert_eq!(plane.longitude_axis, Some(1));
        }
    }

    #[test]
    fn linear_polarization_magnitude() {
        let cube = two_by_two([[3.0, 0.0], [0.0, 0.0]], [[4.0, 0.0], [0.0, 0.0]]);
        let plane = derive(&cube, &StokesRequest::new(StokesParam::L), &DerivationConfig::default()).unwrap();
        assert_eq!(plane.data, array![[5.0, 0.0], [0.0, 0.0]]);
    }

    #[test]
    fn polarization_angle() {
        let cube = two_by_two([[1.0, 0.0], [-1.0, 1.0]], [[0.0, 1.0], [0.0, 1.0]]);
        let plane = derive(&cube, &StokesRequest::new(StokesParam::Pang), &DerivationConfig::default()).unwrap();
        assert_abs_diff_eq!(plane.data[[0, 0]], 0.0);
        assert_abs_diff_eq!(plane.data[[0, 1]], 45.0, epsilon = 1e-12);
        assert_abs_diff_eq!(plane.data[[1, 0]], 90.0, epsilon = 1e-12);
        assert_abs_diff_eq!(plane.data[[1, 1]], 22.5, epsilon = 1e-12);
    }

    fn single_stokes_cube(with_axis: bool) -> ImageCube {
        let (data, names): (ArrayD<f64>, Vec<&str>) = if with_axis {
            (
                Array::from_elem(IxDyn(&[4, 4, 1, 1]), 2.0),
                vec!["Right Ascension", "Declination", "Stokes", "Frequency"],
            )
        } else {
            (
                Array::from_elem(IxDyn(&[4, 4]), 2.0),
                vec!["Right Ascension", "Declination"],
            )
        };
        let coords = CoordinateSystem::new(vec![
            AxisWcs::new("RA---SIN", 0.0, 1.0, -1.0 / 60.0, "deg"),
            AxisWcs::new("DEC--SIN", 0.0, 1.0, 1.0 / 60.0, "deg"),
        ]);
        ImageCube::from_casa_axes(data, names.into_iter().map(String::from).collect(), coords).unwrap()
    }

    #[test]
    fn single_stokes_only_allows_i() {
        let config = DerivationConfig::default();
        for with_axis in [true, false] {
            let cube = single_stokes_cube(with_axis);
            let plane = derive(&cube, &StokesRequest::new(StokesParam::I), &config).unwrap();
            assert_eq!(plane.data, Array2::from_elem((4, 4), 2.0));
            for param in [StokesParam::Q, StokesParam::U, StokesParam::V] {
                let err = derive(&cube, &StokesRequest::new(param), &config).unwrap_err();
                assert!(matches!(err, SolarViewerError::SingleStokes(_)), "{}", param);
            }
        }
        let err = derive(&single_stokes_cube(false), &StokesRequest::new(StokesParam::L), &config).unwrap_err();
        assert!(matches!(err, SolarViewerError::MissingAxis(_)));
        let err = derive(&single_stokes_cube(true), &StokesRequest::new(StokesParam::Pang), &config).unwrap_err();
        assert!(matches!(err, SolarViewerError::SingleStokes(_)));
    }

    #[test]
    fn casa_planes_keep_ra_first() {
        let data = Array::from_shape_fn(IxDyn(&[3, 2, 4, 1]), |ix| (10 * ix[0] + ix[1] + 100 * ix[2]) as f64);
        let names = ["Right Ascension", "Declination", "Stokes", "Frequency"];
        let cube = ImageCube::from_casa_axes(
            data,
            names.iter().map(|s| s.to_string()).collect(),
            CoordinateSystem::default(),
        )
        .unwrap();
        let plane = derive(&cube, &StokesRequest::new(StokesParam::V), &DerivationConfig::default()).unwrap();
        assert_eq!(plane.data.dim(), (3, 2));
        assert_eq!(plane.longitude_axis, Some(0));
        assert_eq!(plane.sky_view().dim(), (2, 3));
        assert_eq!(plane.sky_view()[[1, 2]], 321.0);
        assert_eq!(plane.into_sky()[[1, 2]], 321.0);
    }

    #[test]
    fn fraction_maps_threshold_and_mask() {
        // V is 2 everywhere except a bright pixel; rms over the whole 8x8 box
        let cube = polarized_cube(8, 8, |s, _, y, x| match (s, y, x) {
            (0, _, _) => 4.0,
            (3, 4, 4) => 40.0,
            (3, _, _) => 2.0,
            _ => 0.0,
        });
        let request = StokesRequest::new(StokesParam::Vfrac)
            .with_threshold(1.5)
            .with_rms_box(PixelBox::new(0, 8, 0, 8));
        let config = DerivationConfig { disk_radius_arcmin: 2.0 };
        let plane = derive(&cube, &request, &config).unwrap();
        // rms = sqrt((63*4 + 1600)/64) ~ 5.38, limit ~ 8.07: only the bright pixel survives
        assert_eq!(plane.data[[4, 4]], 10.0);
        assert_eq!(plane.data.sum(), 10.0);
    }

    #[test]
    fn ratio_division_by_zero_is_not_guarded() {
        let cube = polarized_cube(2, 2, |s, _, _, _| match s {
            1 => 5.0,
            _ => 0.0,
        });
        let request = StokesRequest::new(StokesParam::QOverI).with_threshold(0.0);
        let config = DerivationConfig { disk_radius_arcmin: 600.0 };
        let plane = derive(&cube, &request, &config).unwrap();
        assert!(plane.data.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn lfrac_uses_polarized_intensity_rms() {
        let cube = polarized_cube(4, 4, |s, _, y, x| match (s, y, x) {
            (0, _, _) => 10.0,
            (1, 2, 2) => 6.0,
            (2, 2, 2) => 8.0,
            _ => 0.0,
        });
        let request = StokesRequest::new(StokesParam::Lfrac)
            .with_threshold(1.0)
            .with_rms_box(PixelBox::new(0, 4, 0, 4));
        let plane = derive(&cube, &request, &DerivationConfig::default()).unwrap();
        assert_abs_diff_eq!(plane.data[[2, 2]], 1.0);
        assert_eq!(plane.data.sum(), 1.0);
    }

    #[test]
    fn derive_all_respects_stokes_count() {
        let cube = polarized_cube(2, 2, |s, _, _, _| 1.0 + s as f64);
        let planes = derive_all(&cube, 0.0, None, &DerivationConfig { disk_radius_arcmin: 600.0 }).unwrap();
        assert_eq!(planes.len(), 11);
        let planes = derive_all(&single_stokes_cube(true), 5.0, None, &DerivationConfig::default()).unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].param, StokesParam::I);
    }
}
