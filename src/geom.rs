use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SolarViewerError;

/// Rectangular pixel region `(x1, x2, y1, y2)`: x runs along the longitude axis,
/// y along the latitude axis, upper bounds exclusive.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub x1: usize,
    pub x2: usize,
    pub y1: usize,
    pub y2: usize,
}

/// RMS box used when the caller gives none
pub const DEFAULT_RMS_BOX: PixelBox = PixelBox {
    x1: 0,
    x2: 200,
    y1: 0,
    y2: 130,
};

impl Default for PixelBox {
    fn default() -> Self {
        DEFAULT_RMS_BOX
    }
}

impl PixelBox {
    pub fn new(x1: usize, x2: usize, y1: usize, y2: usize) -> Self {
        Self { x1, x2, y1, y2 }
    }

    /// ranges clamped to an image of `width` x `height`, possibly empty
    pub fn clamped(&self, width: usize, height: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        (x1..self.x2.clamp(x1, width), y1..self.y2.clamp(y1, height))
    }

    /// CASA region file (crtf) text for this box
    pub fn to_crtf(&self) -> String {
        format!(
            "#CRTFv0 CASA Region Text Format version 0\nbox [[{}pix, {}pix], [{}pix, {}pix]]\n",
            self.x1, self.y1, self.x2, self.y2
        )
    }
}

impl Display for PixelBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.x2, self.y1, self.y2)
    }
}

impl FromStr for PixelBox {
    type Err = SolarViewerError;

    /// parse `x1,x2,y1,y2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| {
                v.trim().parse::<usize>().map_err(|_| {
                    SolarViewerError::InvalidRequest(format!("failed to parse box bound: {}", v))
                })
            })
            .collect::<Result<Vec<usize>, SolarViewerError>>()?;
        match values[..] {
            [x1, x2, y1, y2] => Ok(PixelBox { x1, x2, y1, y2 }),
            _ => Err(SolarViewerError::InvalidRequest(format!(
                "expected x1,x2,y1,y2, got {}",
                s
            ))),
        }
    }
}

/// Inclusive crop rectangle used when rendering frames.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl Region {
    /// swap reversed corners so that `min <= max` on both axes
    pub fn ordered(&self) -> Region {
        Region {
            x_min: self.x_min.min(self.x_max),
            x_max: self.x_min.max(self.x_max),
            y_min: self.y_min.min(self.y_max),
            y_max: self.y_min.max(self.y_max),
        }
    }

    /// order the corners and clamp them into a `width` x `height` image
    pub fn normalized(&self, width: usize, height: usize) -> Region {
        let clamp_x = |v: usize| v.min(width.saturating_sub(1));
        let clamp_y = |v: usize| v.min(height.saturating_sub(1));
        let r = self.ordered();
        Region {
            x_min: clamp_x(r.x_min),
            x_max: clamp_x(r.x_max),
            y_min: clamp_y(r.y_min),
            y_max: clamp_y(r.y_max),
        }
    }

    /// pixel columns covered, in either corner order
    pub fn width(&self) -> usize {
        self.x_max.abs_diff(self.x_min) + 1
    }

    pub fn height(&self) -> usize {
        self.y_max.abs_diff(self.y_min) + 1
    }

    /// grow an odd-sized side by one pixel, forwards if there is room, else backwards
    pub fn with_even_size(&self, width: usize, height: usize) -> Region {
        let mut region = self.normalized(width, height);
        if region.width() % 2 != 0 {
            if region.x_max + 1 < width {
                region.x_max += 1;
            } else if region.x_min > 0 {
                region.x_min -= 1;
            }
        }
        if region.height() % 2 != 0 {
            if region.y_max + 1 < height {
                region.y_max += 1;
            } else if region.y_min > 0 {
                region.y_min -= 1;
            }
        }
        region
    }

    /// the crop applied to a later frame: same origin and size as this region
    /// where possible, falling back to the image origin if the region lies outside
    pub fn fit_to(&self, width: usize, height: usize) -> Region {
        let r = self.ordered();
        let (w, h) = (r.width(), r.height());
        let (x_min, y_min) = if r.x_min >= width || r.y_min >= height {
            (0, 0)
        } else {
            (r.x_min, r.y_min)
        };
        Region {
            x_min,
            x_max: x_min + w - 1,
            y_min,
            y_max: y_min + h - 1,
        }
        .normalized(width, height)
    }
}
