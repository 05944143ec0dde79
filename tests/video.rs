mod common;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use solarviewer::render::{render_frame, FrameInfo, FrameOptions};
use solarviewer::video::{compute_global_range, create_video, input_files, VideoOptions};
use solarviewer::{Capabilities, Colormap, RangeMode, Region, SolarViewerError, SortOrder, Stretch};

use common::{write_constant_cube, write_cube};

/// `n` files named `sun_<n>.fits` whose I plane holds `n + 1`
fn write_series(dir: &std::path::Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|k| {
            let path = dir.join(format!("sun_{}.fits", k));
            write_constant_cube(&path, [k as f64 + 1.0, 0.0, 0.0, 0.0]);
            path
        })
        .collect()
}

fn gif_frames(path: &std::path::Path) -> Vec<image::Frame> {
    let decoder = GifDecoder::new(BufReader::new(File::open(path).unwrap())).unwrap();
    decoder.into_frames().collect_frames().unwrap()
}

fn sequential() -> VideoOptions {
    VideoOptions {
        use_multiprocessing: false,
        ..Default::default()
    }
}

#[test]
fn gif_from_a_series() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 4);
    let output = dir.path().join("movies").join("sun.gif");

    let mut calls = vec![];
    let summary = create_video(&files, &output, &sequential(), &Capabilities::none(), |done, total| {
        calls.push((done, total));
        true
    })
    .unwrap();

    assert_eq!(summary.output, output);
    assert_eq!(summary.frames_written, 4);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);
    assert_eq!(calls, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    let frames = gif_frames(&output);
    assert_eq!(frames.len(), 4);
    // 8x6 image, already even
    assert_eq!(frames[0].buffer().dimensions(), (8, 6));
}

#[test]
fn unreadable_frames_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = write_series(dir.path(), 2);
    files.insert(1, dir.path().join("missing.fits"));

    let output = dir.path().join("sun.gif");
    let summary = create_video(&files, &output, &sequential(), &Capabilities::none(), |_, _| true).unwrap();
    assert_eq!(summary.frames_written, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(gif_frames(&output).len(), 2);
}

#[test]
fn nothing_rendered_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.fits");
    let err = create_video(&[missing], dir.path().join("sun.gif"), &sequential(), &Capabilities::none(), |_, _| true)
        .unwrap_err();
    assert!(matches!(err, SolarViewerError::Encoding(_)));
}

#[test]
fn progress_can_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 5);
    let output = dir.path().join("sun.gif");
    let summary = create_video(&files, &output, &sequential(), &Capabilities::none(), |done, _| done < 2).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.frames_written, 2);
    assert_eq!(gif_frames(&output).len(), 2);
}

#[test]
fn parallel_batches_keep_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 7);
    let output = dir.path().join("sun.gif");
    let options = VideoOptions {
        cpu_count: Some(2),
        ..Default::default()
    };
    let mut last = 0;
    let summary = create_video(&files, &output, &options, &Capabilities::none(), |done, _| {
        assert_eq!(done, last + 1);
        last = done;
        true
    })
    .unwrap();
    assert_eq!(summary.frames_written, 7);
    assert_eq!(gif_frames(&output).len(), 7);
}

#[test]
fn parallel_frames_are_written_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 7);
    let output = dir.path().join("sun.gif");
    let options = VideoOptions {
        cpu_count: Some(3),
        frame: FrameOptions {
            colormap: Colormap::Gray,
            range: RangeMode::Fixed { vmin: 0.0, vmax: 8.0 },
            ..Default::default()
        },
        ..Default::default()
    };
    create_video(&files, &output, &options, &Capabilities::none(), |_, _| true).unwrap();
    // file k is a flat image of k + 1, so brightness rises frame by frame
    let levels: Vec<u8> = gif_frames(&output)
        .iter()
        .map(|frame| frame.buffer().get_pixel(4, 3)[0])
        .collect();
    assert_eq!(levels.len(), 7);
    assert!(levels.windows(2).all(|w| w[0] < w[1]), "frames out of order: {:?}", levels);
}

#[test]
fn parallel_cancel_stops_at_the_reported_frame() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 7);
    let output = dir.path().join("sun.gif");
    let options = VideoOptions {
        cpu_count: Some(3),
        ..Default::default()
    };
    let mut calls = vec![];
    let summary = create_video(&files, &output, &options, &Capabilities::none(), |done, total| {
        calls.push((done, total));
        done < 2
    })
    .unwrap();
    assert!(summary.cancelled);
    assert_eq!(calls, vec![(1, 7), (2, 7)]);
    assert_eq!(summary.frames_written, 2);
    assert_eq!(gif_frames(&output).len(), 2);
}

#[cfg(target_os = "linux")]
#[test]
fn encoder_that_exits_early_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sun.fits");
    // a 200x160 frame does not fit in a pipe buffer
    write_cube(&path, 200, 160, 1, None, |_, _, y, x| (x + y) as f64);
    let caps = Capabilities::none().with_ffmpeg("true");
    let err = create_video(&[path], dir.path().join("sun.mp4"), &sequential(), &caps, |_, _| true).unwrap_err();
    assert!(matches!(err, SolarViewerError::Encoding(_)));
}

#[test]
fn global_range_spans_sampled_files() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 5);
    let options = FrameOptions::default();
    assert_eq!(compute_global_range(&files, &options), Some((1.0, 5.0)));
    let missing = vec![dir.path().join("nope.fits")];
    assert_eq!(compute_global_range(&missing, &options), None);
}

#[test]
fn regions_are_cropped_to_even_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sun.fits");
    write_cube(&path, 20, 16, 1, None, |_, _, y, x| (x + y) as f64);
    let output = dir.path().join("crop.gif");
    let mut options = sequential();
    options.frame.region = Some(Region {
        x_min: 2,
        x_max: 6,
        y_min: 3,
        y_max: 7,
    });
    create_video(&[path.clone()], &output, &options, &Capabilities::none(), |_, _| true).unwrap();
    // 5x5 inclusive region grows to 6x6
    assert_eq!(gif_frames(&output)[0].buffer().dimensions(), (6, 6));

    options.frame.region = Some(Region {
        x_min: 6,
        x_max: 2,
        y_min: 7,
        y_max: 3,
    });
    create_video(&[path], &output, &options, &Capabilities::none(), |_, _| true).unwrap();
    assert_eq!(gif_frames(&output)[0].buffer().dimensions(), (6, 6));
}

#[test]
fn reversed_region_renders_like_the_ordered_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sun.fits");
    write_cube(&path, 20, 16, 1, None, |_, _, y, x| (x * 3 + y) as f64);
    let frame = FrameInfo { index: 0, total: 1 };
    let mut options = FrameOptions {
        region: Some(Region {
            x_min: 3,
            x_max: 12,
            y_min: 2,
            y_max: 9,
        }),
        ..Default::default()
    };
    let ordered = render_frame(&path, &options, frame, None).unwrap();
    assert_eq!(ordered.dimensions(), (10, 8));

    options.region = Some(Region {
        x_min: 12,
        x_max: 3,
        y_min: 9,
        y_max: 2,
    });
    assert_eq!(render_frame(&path, &options, frame, None).unwrap(), ordered);
}

#[test]
fn frames_with_captions_and_colorbar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sun.fits");
    write_cube(&path, 40, 30, 1, Some("2024-04-08T18:20:00"), |_, _, y, x| (x * y) as f64);
    let mut options = FrameOptions {
        colormap: Colormap::Inferno,
        stretch: Stretch::Sqrt,
        range: RangeMode::Fixed { vmin: 0.0, vmax: 100.0 },
        ..Default::default()
    };
    let plain = render_frame(&path, &options, FrameInfo { index: 0, total: 1 }, None).unwrap();
    assert_eq!(plain.dimensions(), (40, 30));

    options.overlays.timestamp = true;
    options.overlays.frame_number = true;
    options.colorbar = true;
    let decorated = render_frame(&path, &options, FrameInfo { index: 2, total: 9 }, None).unwrap();
    assert!(decorated.width() > 40);
    assert!(decorated.height() > 30);

    options.width = 64;
    options.height = 48;
    let resized = render_frame(&path, &options, FrameInfo { index: 0, total: 1 }, None).unwrap();
    assert_eq!(resized.dimensions(), (64, 48));
}

#[test]
fn inputs_are_sorted_naturally() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_series(dir.path(), 12);
    let pattern = format!("{}/sun_*.fits", dir.path().display());
    let found = input_files(&pattern, SortOrder::Natural).unwrap();
    assert_eq!(found, files);
    let err = input_files(&format!("{}/*.none", dir.path().display()), SortOrder::Name).unwrap_err();
    assert!(matches!(err, SolarViewerError::InvalidRequest(_)));
}
