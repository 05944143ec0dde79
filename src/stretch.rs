//! Intensity stretches mapping data values into `[0, 1]` before colour mapping.

use std::fmt::Display;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::SolarViewerError;

/// scale of the logarithmic stretch, `log10(a x + 1) / log10(a + 1)`
const LOG_A: f64 = 1000.0;
/// linear width of the arcsinh stretch
const ASINH_WIDTH: f64 = 1e-3;
/// smallest lower limit allowed for the logarithmic stretch
const LOG_VMIN: f64 = 1e-10;

const ZSCALE_CONTRAST: f64 = 0.25;
const ZSCALE_SAMPLES: usize = 600;
const ZSCALE_ITERATIONS: usize = 5;
const ZSCALE_KREJ: f64 = 2.5;
const ZSCALE_MIN_NPIXELS: usize = 5;

const HISTEQ_BINS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stretch {
    Linear,
    Log,
    Sqrt,
    Power { gamma: f64 },
    Arcsinh,
    ZScale,
    #[serde(rename = "histeq")]
    HistogramEqualization,
}

impl Default for Stretch {
    fn default() -> Self {
        Stretch::Linear
    }
}

impl Display for Stretch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stretch::Linear => write!(f, "linear"),
            Stretch::Log => write!(f, "log"),
            Stretch::Sqrt => write!(f, "sqrt"),
            Stretch::Power { gamma } => write!(f, "power:{}", gamma),
            Stretch::Arcsinh => write!(f, "arcsinh"),
            Stretch::ZScale => write!(f, "zscale"),
            Stretch::HistogramEqualization => write!(f, "histeq"),
        }
    }
}

impl FromStr for Stretch {
    type Err = SolarViewerError;

    /// parse a stretch name, `power` takes an optional `:gamma` suffix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (name, arg) = match lower.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lower.as_str(), None),
        };
        match (name, arg) {
            ("linear", None) => Ok(Stretch::Linear),
            ("log", None) => Ok(Stretch::Log),
            ("sqrt", None) => Ok(Stretch::Sqrt),
            ("power", None) => Ok(Stretch::Power { gamma: 1.0 }),
            ("power", Some(gamma)) => gamma
                .parse::<f64>()
                .map(|gamma| Stretch::Power { gamma })
                .map_err(|_| SolarViewerError::InvalidRequest(format!("invalid gamma: {}", gamma))),
            ("arcsinh" | "asinh", None) => Ok(Stretch::Arcsinh),
            ("zscale", None) => Ok(Stretch::ZScale),
            ("histeq" | "histogram equalization" | "histogram-equalization", None) => {
                Ok(Stretch::HistogramEqualization)
            }
            _ => Err(SolarViewerError::InvalidRequest(format!(
                "Unknown stretch type: {}",
                s
            ))),
        }
    }
}

/// `p`-th percentile (0-100) of the finite values, linearly interpolated
pub fn percentile<'a, I: IntoIterator<Item = &'a f64>>(data: I, p: f64) -> Option<f64> {
    let mut values: Vec<f64> = data.into_iter().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(values[lo] + (values[hi] - values[lo]) * (rank - lo as f64))
}

/// least squares line through `(i, y[i])`, returns the slope
fn fit_slope(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    if y.len() < 2 {
        return (0.0, y.first().copied().unwrap_or(0.0));
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = y.iter().sum::<f64>() / n;
    let (sxy, sxx) = y.iter().enumerate().fold((0.0, 0.0), |(sxy, sxx), (i, v)| {
        let dx = i as f64 - mean_x;
        (sxy + dx * (v - mean_y), sxx + dx * dx)
    });
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

/// IRAF-style zscale limits with iterative sigma clipping of a sorted sample
pub fn zscale(data: &ArrayView2<f64>) -> (f64, f64) {
    let flat: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if flat.is_empty() {
        return (0.0, 1.0);
    }
    let mut samples: Vec<f64> = if flat.len() > ZSCALE_SAMPLES {
        let step = (flat.len() - 1) as f64 / (ZSCALE_SAMPLES - 1) as f64;
        (0..ZSCALE_SAMPLES).map(|i| flat[(i as f64 * step) as usize]).collect()
    } else {
        flat
    };
    samples.sort_by(|a, b| a.total_cmp(b));

    let mut slope = 0.0;
    for _ in 0..ZSCALE_ITERATIONS {
        let (m, c) = fit_slope(&samples);
        slope = m;
        let residuals: Vec<f64> = samples
            .iter()
            .enumerate()
            .map(|(i, v)| v - (m * i as f64 + c))
            .collect();
        let n = residuals.len() as f64;
        let mean = residuals.iter().sum::<f64>() / n;
        let sigma = (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        let kept: Vec<f64> = samples
            .iter()
            .zip(&residuals)
            .filter(|(_, r)| r.abs() < ZSCALE_KREJ * sigma)
            .map(|(v, _)| *v)
            .collect();
        if kept.len() < ZSCALE_MIN_NPIXELS || kept.len() == samples.len() {
            break;
        }
        samples = kept;
    }
    if slope != 0.0 {
        slope /= ZSCALE_CONTRAST;
    }

    let mid = samples.len() / 2;
    let median = samples[mid];
    let zmin = (median - slope * mid as f64).max(samples[0]);
    let zmax = (median + slope * (samples.len() - mid) as f64).min(samples[samples.len() - 1]);
    (zmin, zmax)
}

/// cumulative histogram of linearly normalised values, sampled at bin centres
#[derive(Clone, Debug, PartialEq)]
struct Equalization {
    centres: Vec<f64>,
    cdf: Vec<f64>,
}

impl Equalization {
    fn new<'a, I: IntoIterator<Item = &'a f64>>(normed: I) -> Option<Equalization> {
        let values: Vec<f64> = normed.into_iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / HISTEQ_BINS as f64;
        let mut counts = vec![0usize; HISTEQ_BINS];
        for v in &values {
            let bin = (((v - lo) / width) as usize).min(HISTEQ_BINS - 1);
            counts[bin] += 1;
        }
        let total = values.len() as f64;
        let mut running = 0;
        let cdf = counts
            .iter()
            .map(|c| {
                running += c;
                running as f64 / total
            })
            .collect();
        let centres = (0..HISTEQ_BINS).map(|i| lo + (i as f64 + 0.5) * width).collect();
        Some(Equalization { centres, cdf })
    }

    /// piecewise linear lookup, saturating at both ends
    fn lookup(&self, x: f64) -> f64 {
        let last = self.centres.len() - 1;
        if x <= self.centres[0] {
            return self.cdf[0];
        }
        if x >= self.centres[last] {
            return self.cdf[last];
        }
        let i = self.centres.partition_point(|c| *c <= x);
        let (x0, x1) = (self.centres[i - 1], self.centres[i]);
        let (y0, y1) = (self.cdf[i - 1], self.cdf[i]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

/// A stretch bound to an intensity range and, where needed, to the data it displays.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalizer {
    pub stretch: Stretch,
    pub vmin: f64,
    pub vmax: f64,
    equalization: Option<Equalization>,
}

impl Normalizer {
    /// `data` is used by the zscale stretch, which picks its own limits, and by
    /// histogram equalisation
    pub fn new(stretch: Stretch, vmin: f64, vmax: f64, data: &ArrayView2<f64>) -> Normalizer {
        let (vmin, vmax) = match stretch {
            Stretch::ZScale => zscale(data),
            Stretch::Log if vmin <= 0.0 => (LOG_VMIN, vmax),
            _ => (vmin, vmax),
        };
        let mut normalizer = Normalizer {
            stretch,
            vmin,
            vmax,
            equalization: None,
        };
        if stretch == Stretch::HistogramEqualization {
            let normed: Vec<f64> = data.iter().map(|v| normalizer.linear(*v)).collect();
            normalizer.equalization = Equalization::new(&normed);
        }
        normalizer
    }

    fn linear(&self, v: f64) -> f64 {
        let span = self.vmax - self.vmin;
        if span <= 0.0 {
            0.0
        } else {
            (v - self.vmin) / span
        }
    }

    /// stretched value in `[0, 1]`, NaN stays NaN
    pub fn normalize(&self, v: f64) -> f64 {
        if v.is_nan() {
            return f64::NAN;
        }
        let x = self.linear(v);
        let y = match self.stretch {
            Stretch::Linear | Stretch::ZScale => x,
            Stretch::Log => (LOG_A * x.max(0.0) + 1.0).log10() / (LOG_A + 1.0).log10(),
            Stretch::Sqrt => x.max(0.0).sqrt(),
            Stretch::Power { gamma } => x.clamp(0.0, 1.0).powf(gamma),
            Stretch::Arcsinh => (x / ASINH_WIDTH).asinh() / (1.0 / ASINH_WIDTH).asinh(),
            Stretch::HistogramEqualization => match &self.equalization {
                Some(eq) => eq.lookup(x),
                None => x,
            },
        };
        y.clamp(0.0, 1.0)
    }

    pub fn normalize_plane(&self, data: &ArrayView2<f64>) -> Array2<f64> {
        data.mapv(|v| self.normalize(v))
    }
}
