//! Rendering of a single image file into an RGB video frame.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use log::{debug, warn};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tiny_skia::{Pixmap, Transform};
use usvg::{fontdb, Options, Tree};

use crate::colormap::Colormap;
use crate::geom::{PixelBox, Region};
use crate::io::ImageCube;
use crate::stokes::{derive, DerivationConfig, StokesParam, StokesRequest, DEFAULT_THRESHOLD};
use crate::stretch::{percentile, Normalizer, Stretch};
use crate::timestamps::{modified_time, parse_header_datetime};
use crate::{Result, SolarViewerError};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT: &str = "black";
const FONT_FAMILY: &str = "DejaVu Sans";
const FONT_SIZE: u32 = 12;
const LINE_HEIGHT: u32 = FONT_SIZE + 4;

/// How the displayed intensity range of each frame is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RangeMode {
    Fixed { vmin: f64, vmax: f64 },
    /// percentiles of every frame on its own
    #[default]
    AutoPerFrame,
    /// percentiles pooled over a sample of all frames
    GlobalAuto,
}

/// Caption lines drawn above each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Overlays {
    pub timestamp: bool,
    pub frame_number: bool,
    pub filename: bool,
}

impl Overlays {
    pub fn any(&self) -> bool {
        self.timestamp || self.frame_number || self.filename
    }
}

/// Everything needed to turn one image file into one frame.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FrameOptions {
    pub stokes: StokesParam,
    pub threshold: f64,
    pub rms_box: Option<PixelBox>,
    pub disk_radius_arcmin: f64,
    pub colormap: Colormap,
    pub stretch: Stretch,
    pub range: RangeMode,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    /// crop applied before display, inclusive pixel bounds
    pub region: Option<Region>,
    pub overlays: Overlays,
    pub colorbar: bool,
    /// output size in pixels, 0 keeps the rendered size
    pub width: u32,
    pub height: u32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            stokes: StokesParam::I,
            threshold: DEFAULT_THRESHOLD,
            rms_box: None,
            disk_radius_arcmin: DerivationConfig::default().disk_radius_arcmin,
            colormap: Colormap::default(),
            stretch: Stretch::default(),
            range: RangeMode::default(),
            lower_percentile: 0.0,
            upper_percentile: 100.0,
            region: None,
            overlays: Overlays::default(),
            colorbar: false,
            width: 0,
            height: 0,
        }
    }
}

impl FrameOptions {
    pub fn request(&self) -> StokesRequest {
        StokesRequest {
            param: self.stokes,
            threshold: self.threshold,
            rms_box: self.rms_box,
        }
    }

    pub fn derivation(&self) -> DerivationConfig {
        DerivationConfig {
            disk_radius_arcmin: self.disk_radius_arcmin,
        }
    }
}

/// Position of a frame within its video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub index: usize,
    pub total: usize,
}

/// Display plane of one file: rows along latitude, cropped to the region.
pub struct FrameData {
    pub data: Array2<f64>,
    pub cube: ImageCube,
}

/// read `path`, derive the requested quantity and apply the crop region
pub fn load_frame_data<P: AsRef<Path>>(path: P, options: &FrameOptions) -> Result<FrameData> {
    let cube = ImageCube::from_fits(path)?;
    let plane = derive(&cube, &options.request(), &options.derivation())?.into_sky();
    let data = match options.region {
        Some(region) => {
            let (rows, cols) = plane.dim();
            let r = region.fit_to(cols, rows);
            plane
                .slice(s![r.y_min..=r.y_max, r.x_min..=r.x_max])
                .to_owned()
        }
        None => plane,
    };
    Ok(FrameData { data, cube })
}

/// lower and upper percentile of the finite pixels
pub fn percentile_range(data: &ArrayView2<f64>, lower: f64, upper: f64) -> Option<(f64, f64)> {
    Some((percentile(data.iter(), lower)?, percentile(data.iter(), upper)?))
}

/// display range of a frame; an empty range is widened to `vmin + 1`
pub fn frame_range(data: &ArrayView2<f64>, options: &FrameOptions, global_range: Option<(f64, f64)>) -> (f64, f64) {
    let auto = || percentile_range(data, options.lower_percentile, options.upper_percentile);
    let (vmin, vmax) = match options.range {
        RangeMode::Fixed { vmin, vmax } => (vmin, vmax),
        RangeMode::AutoPerFrame => auto().unwrap_or((0.0, 1.0)),
        RangeMode::GlobalAuto => global_range.or_else(auto).unwrap_or((0.0, 1.0)),
    };
    if vmin >= vmax {
        (vmin, vmin + 1.0)
    } else {
        (vmin, vmax)
    }
}

/// colour a plane, row 0 drawn at the bottom
pub fn render_plane(data: &ArrayView2<f64>, options: &FrameOptions, range: (f64, f64)) -> RgbImage {
    let (rows, cols) = data.dim();
    let normalizer = Normalizer::new(options.stretch, range.0, range.1, data);
    debug!("normalising with {} over [{}, {}]", options.stretch, normalizer.vmin, normalizer.vmax);
    let mut img = RgbImage::new(cols as u32, rows as u32);
    for ((row, col), value) in data.indexed_iter() {
        let colour = options.colormap.rgb(normalizer.normalize(*value));
        img.put_pixel(col as u32, (rows - 1 - row) as u32, colour);
    }
    img
}

/// append a vertical colour bar to the right of `img`
pub fn add_colorbar(img: &RgbImage, colormap: Colormap) -> RgbImage {
    let (width, height) = img.dimensions();
    let gap = (width / 100).max(2);
    let bar = (width / 20).max(4);
    let mut out = RgbImage::from_pixel(width + gap + bar, height, BACKGROUND);
    imageops::replace(&mut out, img, 0, 0);
    for y in 0..height {
        let t = if height > 1 {
            1.0 - y as f64 / (height - 1) as f64
        } else {
            1.0
        };
        let colour = colormap.rgb(t);
        for x in width + gap..width + gap + bar {
            out.put_pixel(x, y, colour);
        }
    }
    out
}

/// system fonts, loaded on first use and shared by every frame
fn font_database() -> Arc<fontdb::Database> {
    static FONTS: OnceLock<Arc<fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut fontdb = fontdb::Database::new();
            fontdb.load_system_fonts();
            if fontdb.faces().next().is_none() {
                warn!("no system fonts found, captions will be blank");
            }
            Arc::new(fontdb)
        })
        .clone()
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// svg of a `width` x `height` band with one centred text element per line
fn caption_svg(lines: &[String], width: u32, height: u32) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}">"#,
        width, height
    );
    for (n, line) in lines.iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="{}, sans-serif" font-size="{}" text-anchor="middle" fill="{}">{}</text>"#,
            width as f32 / 2.0,
            (n as u32 + 1) * LINE_HEIGHT,
            FONT_FAMILY,
            FONT_SIZE,
            TEXT,
            escape_xml(line)
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn blend_channel(base: u8, overlay: u8, alpha: u8) -> u8 {
    let alpha = alpha as f32 / 255.0;
    (base as f32 * (1.0 - alpha) + overlay as f32 * alpha).round() as u8
}

/// put `lines` in a white band above `img`, each line centred
pub fn add_caption(img: &RgbImage, lines: &[String]) -> Result<RgbImage> {
    if lines.is_empty() {
        return Ok(img.clone());
    }
    let (width, height) = img.dimensions();
    let band = lines.len() as u32 * LINE_HEIGHT + 4;
    let mut out = RgbImage::from_pixel(width, height + band, BACKGROUND);
    imageops::replace(&mut out, img, 0, band as i64);

    let options = Options {
        fontdb: font_database(),
        font_family: FONT_FAMILY.to_string(),
        ..Default::default()
    };
    let tree = Tree::from_str(&caption_svg(lines, width, band), &options)
        .map_err(|e| SolarViewerError::Encoding(format!("cannot lay out caption: {}", e)))?;
    let mut pixmap = Pixmap::new(width, band)
        .ok_or_else(|| SolarViewerError::Encoding(format!("cannot allocate a {}x{} caption", width, band)))?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());

    for y in 0..band {
        for x in 0..width {
            let Some(overlay) = pixmap.pixel(x, y) else {
                continue;
            };
            if overlay.alpha() == 0 {
                continue;
            }
            let overlay = overlay.demultiply();
            let base = *out.get_pixel(x, y);
            out.put_pixel(
                x,
                y,
                Rgb([
                    blend_channel(base[0], overlay.red(), overlay.alpha()),
                    blend_channel(base[1], overlay.green(), overlay.alpha()),
                    blend_channel(base[2], overlay.blue(), overlay.alpha()),
                ]),
            );
        }
    }
    Ok(out)
}

/// caption lines requested by `overlays` for a frame
pub fn caption_lines(path: &Path, cube: &ImageCube, overlays: &Overlays, frame: FrameInfo) -> Vec<String> {
    let mut lines = vec![];
    if overlays.timestamp {
        let time = cube
            .header
            .date_obs()
            .and_then(parse_header_datetime)
            .or_else(|| modified_time(path));
        match time {
            Some(t) => lines.push(format!("Time: {}", t.format("%Y-%m-%d %H:%M:%S"))),
            None => warn!("no timestamp for {}", path.display()),
        }
    }
    if overlays.frame_number {
        lines.push(format!("Frame: {}/{}", frame.index + 1, frame.total));
    }
    if overlays.filename {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        lines.push(format!("File: {}", name));
    }
    lines
}

/// pad to even width and height by repeating the last column and row
pub fn ensure_even_dimensions(img: RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    if width % 2 == 0 && height % 2 == 0 {
        return img;
    }
    let (new_width, new_height) = (width + width % 2, height + height % 2);
    RgbImage::from_fn(new_width, new_height, |x, y| {
        *img.get_pixel(x.min(width - 1), y.min(height - 1))
    })
}

/// render one file into a frame
pub fn render_frame<P: AsRef<Path>>(
    path: P,
    options: &FrameOptions,
    frame: FrameInfo,
    global_range: Option<(f64, f64)>,
) -> Result<RgbImage> {
    let path = path.as_ref();
    let FrameData { data, cube } = load_frame_data(path, options)?;
    if data.is_empty() {
        return Err(SolarViewerError::InvalidRequest(format!(
            "nothing to render in {}",
            path.display()
        )));
    }
    let view = data.view();
    let range = frame_range(&view, options, global_range);
    let mut img = render_plane(&view, options, range);
    if options.colorbar {
        img = add_colorbar(&img, options.colormap);
    }
    if options.overlays.any() {
        img = add_caption(&img, &caption_lines(path, &cube, &options.overlays, frame))?;
    }
    if options.width > 0 && options.height > 0 {
        img = imageops::resize(&img, options.width, options.height, FilterType::Triangle);
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn even_padding_repeats_edges() {
        let img = RgbImage::from_fn(3, 1, |x, _| Rgb([x as u8, 0, 0]));
        let even = ensure_even_dimensions(img);
        assert_eq!(even.dimensions(), (4, 2));
        assert_eq!(even.get_pixel(3, 0), &Rgb([2, 0, 0]));
        assert_eq!(even.get_pixel(3, 1), &Rgb([2, 0, 0]));
        assert_eq!(even.get_pixel(0, 1), &Rgb([0, 0, 0]));

        let already = RgbImage::new(2, 4);
        assert_eq!(ensure_even_dimensions(already).dimensions(), (2, 4));
    }

    #[test]
    fn origin_is_lower_left() {
        let data = array![[0.0, 0.0], [1.0, 1.0]];
        let options = FrameOptions {
            colormap: Colormap::Gray,
            ..Default::default()
        };
        let img = render_plane(&data.view(), &options, (0.0, 1.0));
        // data row 1 is the top row of the picture
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn range_modes() {
        let data = array![[0.0, 1.0], [2.0, f64::NAN]];
        let view = data.view();
        let mut options = FrameOptions::default();
        assert_eq!(frame_range(&view, &options, None), (0.0, 2.0));

        options.lower_percentile = 50.0;
        assert_eq!(frame_range(&view, &options, None), (1.0, 2.0));

        options.range = RangeMode::Fixed { vmin: 5.0, vmax: 5.0 };
        assert_eq!(frame_range(&view, &options, None), (5.0, 6.0));

        options.range = RangeMode::GlobalAuto;
        assert_eq!(frame_range(&view, &options, Some((-1.0, 10.0))), (-1.0, 10.0));
        assert_eq!(frame_range(&view, &options, None), (1.0, 2.0));
    }

    #[test]
    fn colorbar_and_caption_grow_the_frame() {
        let img = RgbImage::from_pixel(100, 40, Rgb([1, 2, 3]));
        let with_bar = add_colorbar(&img, Colormap::Gray);
        assert_eq!(with_bar.dimensions(), (100 + 2 + 5, 40));
        assert_eq!(with_bar.get_pixel(103, 0), &Rgb([255, 255, 255]));
        assert_eq!(with_bar.get_pixel(103, 39), &Rgb([0, 0, 0]));

        let lines = vec!["Frame: 1/2".to_string(), "File: a.fits".to_string()];
        let captioned = add_caption(&img, &lines).unwrap();
        let band = 2 * LINE_HEIGHT + 4;
        assert_eq!(captioned.dimensions(), (100, 40 + band));
        assert_eq!(captioned.get_pixel(0, captioned.height() - 1), &Rgb([1, 2, 3]));
        assert_eq!(captioned.get_pixel(99, band), &Rgb([1, 2, 3]));
        // text is centred, the band corners stay white
        assert_eq!(captioned.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(captioned.get_pixel(99, 0), &BACKGROUND);

        assert_eq!(add_caption(&img, &[]).unwrap(), img);
    }

    #[test]
    fn caption_text_is_escaped() {
        let lines = vec!["File: <a&b>.fits".to_string()];
        let svg = caption_svg(&lines, 80, LINE_HEIGHT + 4);
        assert!(svg.contains(">File: &lt;a&amp;b&gt;.fits</text>"));
        assert!(svg.contains(r#"x="40" y="16""#));
        // the escaped document must still parse
        let img = RgbImage::from_pixel(80, 10, Rgb([0, 0, 0]));
        assert_eq!(add_caption(&img, &lines).unwrap().height(), 10 + LINE_HEIGHT + 4);
    }

    #[test]
    fn overlay_blending() {
        assert_eq!(blend_channel(200, 0, 255), 0);
        assert_eq!(blend_channel(200, 0, 0), 200);
        assert_eq!(blend_channel(200, 100, 128), 150);
    }

    #[test]
    fn frame_number_caption() {
        let cube = ImageCube::from_casa_axes(
            ndarray::ArrayD::zeros(ndarray::IxDyn(&[2, 2])),
            vec!["Right Ascension".into(), "Declination".into()],
            Default::default(),
        )
        .unwrap();
        let overlays = Overlays {
            frame_number: true,
            filename: true,
            ..Default::default()
        };
        let lines = caption_lines(Path::new("/data/sun.fits"), &cube, &overlays, FrameInfo { index: 2, total: 9 });
        assert_eq!(lines, vec!["Frame: 3/9".to_string(), "File: sun.fits".to_string()]);
    }
}
