use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};

use solarviewer::{
    axes::{resolve_frequency, AxisMap, Frequency},
    derive, derive_all, estimate_rms, geodesy::observer_position, load_image, render_frame,
    video::{create_video, input_files},
    Capabilities, Colormap, DerivationConfig, FrameInfo, FrameOptions, PixelBox, RangeMode, Region, Result,
    SortOrder, StokesParam, StokesRequest, Stretch, VideoOptions, DEFAULT_RMS_BOX,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None, disable_version_flag = true, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Use the lightweight viewer
    #[arg(short, long, global = true)]
    fast: bool,

    /// Image to open when no command is given
    imagename: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print image metadata
    Info { image: PathBuf },
    /// Derive a Stokes quantity and write it as FITS
    Extract {
        image: PathBuf,
        #[arg(short, long, default_value = "I")]
        stokes: StokesParam,
        /// Significance threshold in units of the rms
        #[arg(short = 't', long = "thres", default_value_t = solarviewer::stokes::DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Noise box x1,x2,y1,y2 in pixels
        #[arg(long)]
        rms_box: Option<PixelBox>,
        /// Solar disk radius for the mask, arcmin
        #[arg(long)]
        disk_radius: Option<f64>,
        /// Derive every quantity the image supports
        #[arg(long, conflicts_with = "output")]
        all: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Estimate the noise of a Stokes plane inside a box
    Rms {
        image: PathBuf,
        #[arg(short, long, default_value = "I")]
        stokes: StokesParam,
        #[arg(long = "box", default_value_t = DEFAULT_RMS_BOX)]
        rms_box: PixelBox,
        /// Print the box as a CASA region instead
        #[arg(long)]
        crtf: bool,
    },
    /// Render one image to a PNG
    Render {
        image: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// Render the images matching a pattern into a video
    Video {
        /// Glob pattern of the input files
        pattern: String,
        #[arg(short, long)]
        output: PathBuf,
        /// YAML preset, created with the defaults if missing
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        fps: Option<u32>,
        /// 0-10
        #[arg(long)]
        quality: Option<u32>,
        #[arg(long)]
        sort: Option<SortOrderArg>,
        /// Worker count, defaults to one less than the number of cores
        #[arg(long)]
        cpu_count: Option<usize>,
        #[arg(long)]
        sequential: bool,
        /// Use one intensity range for every frame
        #[arg(long)]
        global_range: bool,
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// Print the observer position from OBSGEO-X/Y/Z
    Position { image: PathBuf },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SortOrderArg {
    Name,
    Natural,
    Datetime,
}

impl From<SortOrderArg> for SortOrder {
    fn from(value: SortOrderArg) -> Self {
        match value {
            SortOrderArg::Name => SortOrder::Name,
            SortOrderArg::Natural => SortOrder::Natural,
            SortOrderArg::Datetime => SortOrder::Datetime,
        }
    }
}

/// Display settings shared by `render` and `video`, unset ones keep the preset.
#[derive(Args)]
struct FrameArgs {
    #[arg(short, long)]
    stokes: Option<StokesParam>,
    #[arg(short = 't', long = "thres")]
    threshold: Option<f64>,
    #[arg(long)]
    rms_box: Option<PixelBox>,
    #[arg(long)]
    disk_radius: Option<f64>,
    #[arg(long)]
    colormap: Option<Colormap>,
    /// linear, log, sqrt, power:<gamma>, arcsinh, zscale or histeq
    #[arg(long)]
    stretch: Option<Stretch>,
    #[arg(long)]
    vmin: Option<f64>,
    #[arg(long)]
    vmax: Option<f64>,
    #[arg(long)]
    lower_percentile: Option<f64>,
    #[arg(long)]
    upper_percentile: Option<f64>,
    /// Crop x_min,x_max,y_min,y_max in pixels
    #[arg(long)]
    region: Option<PixelBox>,
    #[arg(long)]
    timestamp: bool,
    #[arg(long)]
    frame_number: bool,
    #[arg(long)]
    filename: bool,
    #[arg(long)]
    colorbar: bool,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
}

impl FrameArgs {
    fn apply(&self, options: &mut FrameOptions) {
        if let Some(stokes) = self.stokes {
            options.stokes = stokes;
        }
        if let Some(threshold) = self.threshold {
            options.threshold = threshold;
        }
        if self.rms_box.is_some() {
            options.rms_box = self.rms_box;
        }
        if let Some(radius) = self.disk_radius {
            options.disk_radius_arcmin = radius;
        }
        if let Some(colormap) = self.colormap {
            options.colormap = colormap;
        }
        if let Some(stretch) = self.stretch {
            options.stretch = stretch;
        }
        if let (Some(vmin), Some(vmax)) = (self.vmin, self.vmax) {
            options.range = RangeMode::Fixed { vmin, vmax };
        } else if self.vmin.is_some() || self.vmax.is_some() {
            warn!("--vmin and --vmax must be given together, ignoring");
        }
        if let Some(p) = self.lower_percentile {
            options.lower_percentile = p;
        }
        if let Some(p) = self.upper_percentile {
            options.upper_percentile = p;
        }
        if let Some(b) = self.region {
            options.region = Some(Region {
                x_min: b.x1,
                x_max: b.x2,
                y_min: b.y1,
                y_max: b.y2,
            });
        }
        options.overlays.timestamp |= self.timestamp;
        options.overlays.frame_number |= self.frame_number;
        options.overlays.filename |= self.filename;
        options.colorbar |= self.colorbar;
        if let Some(width) = self.width {
            options.width = width;
        }
        if let Some(height) = self.height {
            options.height = height;
        }
    }
}

fn derivation_config(disk_radius: Option<f64>) -> DerivationConfig {
    let mut config = DerivationConfig::default();
    if let Some(radius) = disk_radius {
        config.disk_radius_arcmin = radius;
    }
    config
}

fn info(image: &Path, capabilities: &Capabilities) -> Result<()> {
    let cube = load_image(image, capabilities)?;
    println!("{}", cube.summary());
    let map = AxisMap::resolve(&cube)?;
    match resolve_frequency(&cube, &map) {
        Frequency::Axis(hz) => println!("Frequency: {:.4} MHz", hz / 1e6),
        Frequency::Keyword(hz) => println!("Frequency: {:.4} MHz (FREQ keyword)", hz / 1e6),
        Frequency::Unknown => println!("Frequency: unknown"),
    }
    if map.is_single_stokes {
        println!("Stokes: I only");
    } else {
        println!("Stokes planes: {}", map.stokes_len);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let capabilities = Capabilities::detect();
    let command = match cli.command {
        Some(command) => command,
        None => {
            if cli.fast {
                info!("lightweight viewer requested");
            }
            return match cli.imagename {
                Some(image) => info(&image, &capabilities),
                None => {
                    eprintln!("no image given, see --help");
                    Ok(())
                }
            };
        }
    };

    match command {
        Commands::Info { image } => info(&image, &capabilities)?,
        Commands::Extract {
            image,
            stokes,
            threshold,
            rms_box,
            disk_radius,
            all,
            output,
        } => {
            let cube = load_image(&image, &capabilities)?;
            let config = derivation_config(disk_radius);
            let noise_box = rms_box.unwrap_or_default();
            if all {
                for plane in derive_all(&cube, threshold, rms_box, &config)? {
                    println!("{:6} rms {:13.6e}", plane.param.as_str(), plane.rms(&noise_box));
                }
                return Ok(());
            }
            let request = StokesRequest {
                param: stokes,
                threshold,
                rms_box,
            };
            let plane = derive(&cube, &request, &config)?;
            let (rows, cols) = plane.sky_view().dim();
            println!("{} {}x{} rms {:.6e}", plane.param, cols, rows, plane.rms(&noise_box));
            if let Some(output) = output {
                plane.to_fits(&output, &cube)?;
                info!("wrote {}", output.display());
            }
        }
        Commands::Rms {
            image,
            stokes,
            rms_box,
            crtf,
        } => {
            if crtf {
                print!("{}", rms_box.to_crtf());
                return Ok(());
            }
            let cube = load_image(&image, &capabilities)?;
            println!("{:.6e}", estimate_rms(&cube, stokes, &rms_box)?);
        }
        Commands::Render { image, output, frame } => {
            let mut options = FrameOptions::default();
            frame.apply(&mut options);
            let img = render_frame(&image, &options, FrameInfo { index: 0, total: 1 }, None)?;
            img.save(&output)?;
            info!("wrote {}", output.display());
        }
        Commands::Video {
            pattern,
            output,
            config,
            fps,
            quality,
            sort,
            cpu_count,
            sequential,
            global_range,
            frame,
        } => {
            let mut options = match config {
                Some(filename) => VideoOptions::from_yaml_or_create(filename)?,
                None => VideoOptions::default(),
            };
            frame.apply(&mut options.frame);
            if let Some(fps) = fps {
                options.fps = fps;
            }
            if let Some(quality) = quality {
                options.quality = quality.min(10);
            }
            if let Some(sort) = sort {
                options.sort = sort.into();
            }
            if cpu_count.is_some() {
                options.cpu_count = cpu_count;
            }
            if sequential {
                options.use_multiprocessing = false;
            }
            if global_range {
                options.frame.range = RangeMode::GlobalAuto;
            }
            let files = input_files(&pattern, options.sort)?;
            let mut last_percent = 0;
            let summary = create_video(&files, &output, &options, &capabilities, |done, total| {
                let percent = done * 100 / total;
                if percent >= last_percent + 10 || done == total {
                    info!("{}/{} frames ({}%)", done, total, percent);
                    last_percent = percent;
                }
                true
            })?;
            println!(
                "{}: {} frames, {} failed, {:.1}s",
                summary.output.display(),
                summary.frames_written,
                summary.failed,
                summary.elapsed.as_secs_f64()
            );
        }
        Commands::Position { image } => {
            let cube = load_image(&image, &capabilities)?;
            println!("{}", observer_position(&cube.header)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
