use std::fmt::Display;
use std::str::FromStr;

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::SolarViewerError;

/// colour given to NaN pixels
pub const BAD_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);

type Stop = (f64, [u8; 3]);

const GRAY: &[Stop] = &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])];

const VIRIDIS: &[Stop] = &[
    (0.0, [0x44, 0x01, 0x54]),
    (0.125, [0x47, 0x2d, 0x7b]),
    (0.25, [0x3b, 0x52, 0x8b]),
    (0.375, [0x2c, 0x72, 0x8e]),
    (0.5, [0x21, 0x91, 0x8c]),
    (0.625, [0x28, 0xae, 0x80]),
    (0.75, [0x5e, 0xc9, 0x62]),
    (0.875, [0xad, 0xdc, 0x30]),
    (1.0, [0xfd, 0xe7, 0x25]),
];

const PLASMA: &[Stop] = &[
    (0.0, [0x0d, 0x08, 0x87]),
    (0.125, [0x4c, 0x02, 0xa1]),
    (0.25, [0x7e, 0x03, 0xa8]),
    (0.375, [0xa9, 0x23, 0x95]),
    (0.5, [0xcc, 0x47, 0x78]),
    (0.625, [0xe5, 0x6b, 0x5d]),
    (0.75, [0xf8, 0x95, 0x40]),
    (0.875, [0xfd, 0xc3, 0x28]),
    (1.0, [0xf0, 0xf9, 0x21]),
];

const INFERNO: &[Stop] = &[
    (0.0, [0x00, 0x00, 0x04]),
    (0.125, [0x1f, 0x0c, 0x48]),
    (0.25, [0x55, 0x0f, 0x6d]),
    (0.375, [0x88, 0x22, 0x6a]),
    (0.5, [0xba, 0x36, 0x55]),
    (0.625, [0xe3, 0x59, 0x33]),
    (0.75, [0xf9, 0x8e, 0x09]),
    (0.875, [0xf9, 0xcb, 0x35]),
    (1.0, [0xfc, 0xff, 0xa4]),
];

const MAGMA: &[Stop] = &[
    (0.0, [0x00, 0x00, 0x04]),
    (0.125, [0x1c, 0x10, 0x44]),
    (0.25, [0x4f, 0x12, 0x7b]),
    (0.375, [0x81, 0x25, 0x81]),
    (0.5, [0xb5, 0x36, 0x7a]),
    (0.625, [0xe5, 0x59, 0x64]),
    (0.75, [0xfb, 0x87, 0x61]),
    (0.875, [0xfe, 0xc2, 0x87]),
    (1.0, [0xfc, 0xfd, 0xbf]),
];

const HOT: &[Stop] = &[
    (0.0, [10, 0, 0]),
    (0.365079, [255, 0, 0]),
    (0.746032, [255, 255, 0]),
    (1.0, [255, 255, 255]),
];

const COOLWARM: &[Stop] = &[
    (0.0, [59, 76, 192]),
    (0.25, [124, 159, 249]),
    (0.5, [221, 221, 221]),
    (0.75, [244, 154, 123]),
    (1.0, [180, 4, 38]),
];

const RDBU_R: &[Stop] = &[
    (0.0, [0x05, 0x30, 0x61]),
    (0.1, [0x21, 0x66, 0xac]),
    (0.2, [0x43, 0x93, 0xc3]),
    (0.3, [0x92, 0xc5, 0xde]),
    (0.4, [0xd1, 0xe5, 0xf0]),
    (0.5, [0xf7, 0xf7, 0xf7]),
    (0.6, [0xfd, 0xdb, 0xc7]),
    (0.7, [0xf4, 0xa5, 0x82]),
    (0.8, [0xd6, 0x60, 0x4d]),
    (0.9, [0xb2, 0x18, 0x2b]),
    (1.0, [0x67, 0x00, 0x1f]),
];

/// Colour lookup tables available for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Colormap {
    Gray,
    Viridis,
    Plasma,
    Inferno,
    Magma,
    Hot,
    Coolwarm,
    RdBuR,
}

impl Default for Colormap {
    fn default() -> Self {
        Colormap::Viridis
    }
}

impl Colormap {
    pub const ALL: [Colormap; 8] = [
        Colormap::Gray,
        Colormap::Viridis,
        Colormap::Plasma,
        Colormap::Inferno,
        Colormap::Magma,
        Colormap::Hot,
        Colormap::Coolwarm,
        Colormap::RdBuR,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Gray => "gray",
            Colormap::Viridis => "viridis",
            Colormap::Plasma => "plasma",
            Colormap::Inferno => "inferno",
            Colormap::Magma => "magma",
            Colormap::Hot => "hot",
            Colormap::Coolwarm => "coolwarm",
            Colormap::RdBuR => "RdBu_r",
        }
    }

    fn stops(&self) -> &'static [Stop] {
        match self {
            Colormap::Gray => GRAY,
            Colormap::Viridis => VIRIDIS,
            Colormap::Plasma => PLASMA,
            Colormap::Inferno => INFERNO,
            Colormap::Magma => MAGMA,
            Colormap::Hot => HOT,
            Colormap::Coolwarm => COOLWARM,
            Colormap::RdBuR => RDBU_R,
        }
    }

    /// colour of a normalised value, clamped to `[0, 1]`
    pub fn rgb(&self, t: f64) -> Rgb<u8> {
        if t.is_nan() {
            return BAD_COLOUR;
        }
        let t = t.clamp(0.0, 1.0);
        let stops = self.stops();
        let upper = stops
            .iter()
            .position(|(at, _)| *at >= t)
            .unwrap_or(stops.len() - 1)
            .max(1);
        let (t0, c0) = stops[upper - 1];
        let (t1, c1) = stops[upper];
        let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
        Rgb([mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2])])
    }
}

impl Display for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Colormap {
    type Err = SolarViewerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Colormap::ALL
            .iter()
            .find(|cmap| cmap.name().to_lowercase() == wanted)
            .copied()
            .ok_or(SolarViewerError::InvalidRequest(format!("Unknown colormap: {}", s)))
    }
}

impl TryFrom<String> for Colormap {
    type Error = SolarViewerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Colormap> for String {
    fn from(value: Colormap) -> Self {
        value.name().to_string()
    }
}
