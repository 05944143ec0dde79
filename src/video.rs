//! Batch rendering of image files into MP4, AVI or GIF video.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, DynamicImage, Frame, RgbImage};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::render::{
    ensure_even_dimensions, load_frame_data, percentile_range, render_frame, FrameInfo, FrameOptions, RangeMode,
};
use crate::timestamps::{sort_files, SortOrder};
use crate::{Result, SolarViewerError};

pub const DEFAULT_FPS: u32 = 15;
pub const DEFAULT_QUALITY: u32 = 8;
/// largest number of frames handed to one worker per batch
const MAX_CHUNK: usize = 50;

/// Settings of a video, stored as YAML presets.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoOptions {
    pub frame: FrameOptions,
    pub fps: u32,
    /// 0-10, scales the encoder bitrate
    pub quality: u32,
    pub use_multiprocessing: bool,
    /// worker count, defaults to one less than the number of cores
    pub cpu_count: Option<usize>,
    pub sort: SortOrder,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            frame: FrameOptions::default(),
            fps: DEFAULT_FPS,
            quality: DEFAULT_QUALITY,
            use_multiprocessing: true,
            cpu_count: None,
            sort: SortOrder::default(),
        }
    }
}

impl VideoOptions {
    pub fn from_yaml<P: AsRef<Path>>(filename: P) -> Result<VideoOptions> {
        let filename = filename.as_ref();
        let contents = std::fs::read_to_string(filename)
            .map_err(|e| SolarViewerError::io_context(filename.display(), e))?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let filename = filename.as_ref();
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(filename, contents).map_err(|e| SolarViewerError::io_context(filename.display(), e))?;
        Ok(())
    }

    /// read a preset, writing the defaults to `filename` if it does not exist yet
    pub fn from_yaml_or_create<P: AsRef<Path>>(filename: P) -> Result<VideoOptions> {
        let filename = filename.as_ref();
        match VideoOptions::from_yaml(filename) {
            Ok(options) => Ok(options),
            Err(SolarViewerError::IOError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found, writing defaults", filename.display());
                let options = VideoOptions::default();
                options.to_yaml(filename)?;
                Ok(options)
            }
            Err(e) => Err(e),
        }
    }

    pub fn workers(&self) -> usize {
        self.cpu_count.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            cores.saturating_sub(1).max(1)
        })
    }

    fn bitrate(&self) -> u32 {
        self.quality * 100_000
    }
}

/// Container chosen from the output file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoFormat {
    Mp4,
    Avi,
    Gif,
}

/// output path with an extension, and the container it implies
pub fn resolve_output<P: AsRef<Path>>(output: P) -> Result<(PathBuf, VideoFormat)> {
    let output = output.as_ref();
    if output.as_os_str().is_empty() {
        return Err(SolarViewerError::InvalidRequest("No output file specified".to_string()));
    }
    let output = match output.extension() {
        Some(_) => output.to_path_buf(),
        None => {
            let mut with_ext = output.as_os_str().to_owned();
            with_ext.push(".mp4");
            PathBuf::from(with_ext)
        }
    };
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let format = match ext.as_str() {
        "mp4" => VideoFormat::Mp4,
        "avi" => VideoFormat::Avi,
        "gif" => VideoFormat::Gif,
        other => {
            warn!("Unrecognized extension .{}, using MP4 settings", other);
            VideoFormat::Mp4
        }
    };
    Ok((output, format))
}

/// ffmpeg process fed with raw rgb24 frames on its stdin.
///
/// Dropped without `wait`, the process is killed and reaped.
struct FfmpegPipe {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegPipe {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(SolarViewerError::Encoding("ffmpeg stdin already closed".to_string()))?;
        stdin
            .write_all(frame)
            .map_err(|e| SolarViewerError::Encoding(format!("ffmpeg stopped accepting frames: {}", e)))
    }

    /// close stdin and wait for ffmpeg to finish the file
    fn wait(mut self) -> Result<()> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SolarViewerError::Encoding(format!(
                "ffmpeg failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    #[cfg(test)]
    fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Drop for FfmpegPipe {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill() {
            debug!("ffmpeg already gone: {}", e);
        }
        match child.wait() {
            Ok(status) => warn!("ffmpeg stopped before the video was finished ({})", status),
            Err(e) => error!("could not reap ffmpeg: {}", e),
        }
    }
}

fn spawn_ffmpeg(program: &Path, output: &Path, fps: u32, bitrate: u32, width: u32, height: u32) -> Result<FfmpegPipe> {
    let mut command = Command::new(program);
    command
        .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
        .arg("-s")
        .arg(format!("{}x{}", width, height))
        .arg("-r")
        .arg(fps.to_string())
        .args(["-i", "-", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
        .arg("-b:v")
        .arg(bitrate.to_string())
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    debug!("Command: {:?}", command);
    let mut child = command
        .spawn()
        .map_err(|e| SolarViewerError::io_context(program.display(), e))?;
    let stdin = child
        .stdin
        .take()
        .ok_or(SolarViewerError::Encoding("ffmpeg stdin unavailable".to_string()))?;
    Ok(FfmpegPipe {
        child: Some(child),
        stdin: Some(stdin),
    })
}

enum Sink {
    Gif(GifEncoder<BufWriter<File>>),
    /// ffmpeg is started once the first frame fixes the size
    Ffmpeg {
        program: PathBuf,
        pipe: Option<FfmpegPipe>,
    },
}

/// Streaming writer; every frame is scaled to the size of the first one.
pub struct VideoWriter {
    output: PathBuf,
    fps: u32,
    bitrate: u32,
    size: Option<(u32, u32)>,
    sink: Sink,
}

impl VideoWriter {
    pub fn create(output: &Path, format: VideoFormat, options: &VideoOptions, capabilities: &Capabilities) -> Result<VideoWriter> {
        let fps = options.fps.max(1);
        let sink = match format {
            VideoFormat::Gif => {
                let file = File::create(output).map_err(|e| SolarViewerError::io_context(output.display(), e))?;
                let mut encoder = GifEncoder::new(BufWriter::new(file));
                encoder.set_repeat(Repeat::Infinite)?;
                Sink::Gif(encoder)
            }
            VideoFormat::Mp4 | VideoFormat::Avi => Sink::Ffmpeg {
                program: capabilities.require_ffmpeg()?.to_path_buf(),
                pipe: None,
            },
        };
        Ok(VideoWriter {
            output: output.to_path_buf(),
            fps,
            bitrate: options.bitrate(),
            size: None,
            sink,
        })
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let (width, height) = *self.size.get_or_insert(frame.dimensions());
        let resized;
        let frame = if frame.dimensions() != (width, height) {
            debug!("scaling {:?} frame to {}x{}", frame.dimensions(), width, height);
            resized = imageops::resize(frame, width, height, FilterType::Triangle);
            &resized
        } else {
            frame
        };

        match &mut self.sink {
            Sink::Gif(encoder) => {
                let delay = Delay::from_numer_denom_ms(1000, self.fps);
                let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
                encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
            }
            Sink::Ffmpeg { program, pipe } => {
                if pipe.is_none() {
                    *pipe = Some(spawn_ffmpeg(program, &self.output, self.fps, self.bitrate, width, height)?);
                }
                if let Some(pipe) = pipe.as_mut() {
                    pipe.write(frame.as_raw())?;
                }
            }
        }
        Ok(())
    }

    /// flush the encoder and wait for ffmpeg to exit
    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::Gif(encoder) => {
                drop(encoder);
                Ok(())
            }
            Sink::Ffmpeg { pipe: None, .. } => Ok(()),
            Sink::Ffmpeg { pipe: Some(pipe), .. } => pipe.wait(),
        }
    }
}

/// Outcome of a video run.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoSummary {
    pub output: PathBuf,
    pub frames_written: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// intensity range pooled over every `max(1, n / 10)`-th file, `None` if none could be read
pub fn compute_global_range(files: &[PathBuf], options: &FrameOptions) -> Option<(f64, f64)> {
    info!("Calculating global statistics...");
    let step = (files.len() / 10).max(1);
    let sample: Vec<&PathBuf> = files.iter().step_by(step).collect();
    let ranges: Vec<(f64, f64)> = sample
        .par_iter()
        .filter_map(|path| match load_frame_data(path, options) {
            Ok(frame) => percentile_range(&frame.data.view(), options.lower_percentile, options.upper_percentile),
            Err(e) => {
                error!("Error calculating stats for {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    if ranges.is_empty() {
        return None;
    }
    let vmin = ranges.iter().map(|r| r.0).fold(f64::INFINITY, f64::min);
    let vmax = ranges.iter().map(|r| r.1).fold(f64::NEG_INFINITY, f64::max);
    debug!("global range [{}, {}] from {} files", vmin, vmax, ranges.len());
    Some((vmin, vmax))
}

/// crop region fixed from the first file, grown to even size
fn fix_region(first: &Path, options: &mut FrameOptions) {
    let Some(region) = options.region else {
        return;
    };
    info!("Determining region dimensions...");
    let uncropped = FrameOptions {
        region: None,
        ..options.clone()
    };
    match load_frame_data(first, &uncropped) {
        Ok(frame) => {
            let (rows, cols) = frame.data.dim();
            let even = region.with_even_size(cols, rows);
            info!(
                "Region dimensions: {}x{} (adjusted to ensure even dimensions)",
                even.width(),
                even.height()
            );
            options.region = Some(even);
        }
        Err(e) => {
            warn!("Could not determine region dimensions from first file: {}", e);
            options.region = Some(region.ordered());
        }
    }
}

fn render_one(path: &Path, options: &FrameOptions, frame: FrameInfo, global_range: Option<(f64, f64)>) -> Option<RgbImage> {
    match render_frame(path, options, frame, global_range) {
        Ok(img) => Some(ensure_even_dimensions(img)),
        Err(e) => {
            error!("Error processing frame {} ({}): {}", frame.index, path.display(), e);
            None
        }
    }
}

/// Render `files`, in the given order, into the video `output`.
///
/// `progress(done, total)` is called as each frame is written; returning `false` stops the run.
/// In parallel mode frames already being rendered finish but are not written.
pub fn create_video<P, F>(
    files: &[PathBuf],
    output: P,
    options: &VideoOptions,
    capabilities: &Capabilities,
    mut progress: F,
) -> Result<VideoSummary>
where
    P: AsRef<Path>,
    F: FnMut(usize, usize) -> bool,
{
    let start = Instant::now();
    if files.is_empty() {
        return Err(SolarViewerError::InvalidRequest("No input files provided".to_string()));
    }
    let (output, format) = resolve_output(output)?;
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty() && !d.exists()) {
        std::fs::create_dir_all(dir).map_err(|e| SolarViewerError::io_context(dir.display(), e))?;
    }
    let mut writer = VideoWriter::create(&output, format, options, capabilities)?;

    let total = files.len();
    info!("Creating video from {} files...", total);
    let mut frame_options = options.frame.clone();
    fix_region(&files[0], &mut frame_options);
    let global_range = match frame_options.range {
        RangeMode::GlobalAuto => compute_global_range(files, &frame_options),
        _ => None,
    };

    let workers = options.workers();
    let parallel = options.use_multiprocessing && workers > 1 && total > workers;
    let batch = if parallel {
        workers * (total / (workers * 2)).clamp(1, MAX_CHUNK)
    } else {
        1
    };
    if parallel {
        info!("Using {} workers, {} frames per batch", workers, batch);
    } else if options.use_multiprocessing {
        info!("Using sequential processing: {} workers for {} files", workers, total);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(if parallel { workers } else { 1 })
        .build()
        .map_err(|e| SolarViewerError::InvalidRequest(format!("cannot start worker pool: {}", e)))?;

    let (mut written, mut failed, mut cancelled) = (0, 0, false);
    for (b, paths) in files.chunks(batch).enumerate() {
        let first = b * batch;
        let (tx, rx) = mpsc::channel::<(usize, Option<RgbImage>)>();
        let stopped = pool.in_place_scope(|scope| -> Result<bool> {
            for (i, path) in paths.iter().enumerate() {
                let tx = tx.clone();
                let frame_options = &frame_options;
                scope.spawn(move |_| {
                    let frame = FrameInfo {
                        index: first + i,
                        total,
                    };
                    // unread once the run is cancelled
                    let _ = tx.send((i, render_one(path, frame_options, frame, global_range)));
                });
            }
            drop(tx);

            // frames finish in any order but are written in input order
            let mut pending: BTreeMap<usize, Option<RgbImage>> = BTreeMap::new();
            let mut next = 0;
            for (i, frame) in rx.iter() {
                pending.insert(i, frame);
                while let Some(frame) = pending.remove(&next) {
                    match frame {
                        Some(img) => {
                            writer.write_frame(&img)?;
                            written += 1;
                        }
                        None => {
                            warn!("Could not process frame {} ({})", first + next, paths[next].display());
                            failed += 1;
                        }
                    }
                    next += 1;
                    if !progress(first + next, total) {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        })?;
        if stopped {
            info!("Video creation cancelled by user");
            cancelled = true;
            break;
        }
    }
    writer.finish()?;

    if written == 0 && !cancelled {
        return Err(SolarViewerError::Encoding(format!(
            "none of the {} frames could be rendered",
            total
        )));
    }
    let elapsed = start.elapsed();
    info!(
        "Video created: {} ({} frames, {} failed) in {:.2}s",
        output.display(),
        written,
        failed,
        elapsed.as_secs_f64()
    );
    Ok(VideoSummary {
        output,
        frames_written: written,
        failed,
        cancelled,
        elapsed,
    })
}

/// files matching a glob pattern, ordered for a video
pub fn input_files(pattern: &str, order: SortOrder) -> Result<Vec<PathBuf>> {
    let mut files = glob::glob(pattern)?.collect::<std::result::Result<Vec<PathBuf>, glob::GlobError>>()?;
    if files.is_empty() {
        return Err(SolarViewerError::InvalidRequest(format!(
            "No files match the pattern: {}",
            pattern
        )));
    }
    sort_files(&mut files, order);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::Colormap;
    use crate::stretch::Stretch;

    #[test]
    fn output_extensions() {
        assert_eq!(resolve_output("movie").unwrap(), (PathBuf::from("movie.mp4"), VideoFormat::Mp4));
        assert_eq!(resolve_output("a/b.GIF").unwrap().1, VideoFormat::Gif);
        assert_eq!(resolve_output("b.avi").unwrap().1, VideoFormat::Avi);
        assert_eq!(resolve_output("b.webm").unwrap(), (PathBuf::from("b.webm"), VideoFormat::Mp4));
        assert!(resolve_output("").is_err());
    }

    #[test]
    fn worker_count() {
        let mut options = VideoOptions::default();
        assert!(options.workers() >= 1);
        options.cpu_count = Some(3);
        assert_eq!(options.workers(), 3);
        assert_eq!(options.bitrate(), 800_000);
    }

    #[test]
    fn yaml_presets_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.yaml");
        let created = VideoOptions::from_yaml_or_create(&path).unwrap();
        assert_eq!(created, VideoOptions::default());
        assert!(path.exists());

        let mut custom = VideoOptions::default();
        custom.fps = 24;
        custom.frame.colormap = Colormap::Hot;
        custom.frame.stretch = Stretch::Power { gamma: 0.5 };
        custom.frame.range = RangeMode::Fixed { vmin: 0.0, vmax: 3.0 };
        custom.to_yaml(&path).unwrap();
        assert_eq!(VideoOptions::from_yaml_or_create(&path).unwrap(), custom);

        std::fs::write(&path, "fps: [1, 2").unwrap();
        assert!(matches!(VideoOptions::from_yaml(&path), Err(SolarViewerError::YAMLError(_))));
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let options: VideoOptions = serde_yaml::from_str("fps: 30\nframe:\n  colormap: gray\n").unwrap();
        assert_eq!(options.fps, 30);
        assert_eq!(options.quality, DEFAULT_QUALITY);
        assert_eq!(options.frame.colormap, Colormap::Gray);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let caps = Capabilities::none();
        let err = create_video(&[], "out.gif", &VideoOptions::default(), &caps, |_, _| true).unwrap_err();
        assert!(matches!(err, SolarViewerError::InvalidRequest(_)));
        let files = vec![PathBuf::from("a.fits")];
        let err = create_video(&files, "", &VideoOptions::default(), &caps, |_, _| true).unwrap_err();
        assert!(matches!(err, SolarViewerError::InvalidRequest(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_ffmpeg_write_reaps_the_process() {
        let dir = tempfile::tempdir().unwrap();
        // `true` exits without reading, so a frame larger than the pipe buffer cannot be written
        let caps = Capabilities::none().with_ffmpeg("true");
        let output = dir.path().join("out.mp4");
        let mut writer = VideoWriter::create(&output, VideoFormat::Mp4, &VideoOptions::default(), &caps).unwrap();
        let err = writer.write_frame(&RgbImage::new(256, 256)).unwrap_err();
        assert!(matches!(err, SolarViewerError::Encoding(_)));
        let pid = match &writer.sink {
            Sink::Ffmpeg { pipe: Some(pipe), .. } => pipe.id().unwrap(),
            _ => panic!("ffmpeg was not started"),
        };
        drop(writer);
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[test]
    fn mp4_without_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![dir.path().join("a.fits")];
        let err = create_video(&files, dir.path().join("out"), &VideoOptions::default(), &Capabilities::none(), |_, _| true)
            .unwrap_err();
        assert!(matches!(err, SolarViewerError::MissingDependency(_)));
    }
}
