use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pillars_3d::output::{KittiLayout, KittiSplit, WriteResult};
use pillars_3d::pipeline::{
    ErrorKind, Pipeline, PipelineConfig, PipelineObserver, RunSummary, DEFAULT_POINTS_PER_SCENE,
};

/// Convert a PLY scan into KITTI point cloud binaries for PointPillars.
///
/// The scan is split into scenes of at most `--points_per_scene` points, each written to
/// `<output>/<stem>_<index>.bin`. Existing artifacts are kept unless `--force` is given.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input PLY file
    input: PathBuf,

    /// Overwrite artifacts that already exist
    #[arg(short, long)]
    force: bool,

    /// Maximum number of points per scene
    #[arg(long = "points_per_scene", default_value_t = DEFAULT_POINTS_PER_SCENE)]
    points_per_scene: usize,

    /// Root of the KITTI dataset tree
    #[arg(long = "data_root", default_value = "data")]
    data_root: PathBuf,

    /// Split receiving the scenes
    #[arg(long, value_enum, default_value_t = Split::Val)]
    split: Split,

    /// Write artifacts to this directory instead of `<data_root>/<split>/lidar`
    #[arg(short, long = "output_dir")]
    output_dir: Option<PathBuf>,

    /// Reject scans whose intensity leaves [0, 1]
    #[arg(long = "verify_intensity")]
    verify_intensity: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Split {
    Train,
    Val,
}

impl From<Split> for KittiSplit {
    fn from(split: Split) -> Self {
        match split {
            Split::Train => KittiSplit::Train,
            Split::Val => KittiSplit::Val,
        }
    }
}

/// Process exit code of a failure class.
fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidArgument => 2,
        ErrorKind::Format => 3,
        ErrorKind::Schema => 4,
        ErrorKind::TruncatedFile => 5,
        ErrorKind::IoWrite => 6,
    }
}

fn output_root(args: &Args) -> PathBuf {
    match &args.output_dir {
        Some(dir) => dir.clone(),
        None => KittiLayout::new(&args.data_root).lidar_dir(args.split.into()),
    }
}

/// Per-scene progress bar on stderr.
struct SceneProgress {
    bar: ProgressBar,
}

impl SceneProgress {
    fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} scenes ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("▉▊▋▌▍▎▏ "));
        }
        Self { bar }
    }
}

impl PipelineObserver for SceneProgress {
    fn on_start(&mut self, total_scenes: usize) {
        self.bar.set_length(total_scenes as u64);
        self.bar.set_message("Converting to KITTI");
    }

    fn on_scene(&mut self, index: usize, result: &WriteResult) {
        if !result.is_written() {
            self.bar.set_message(format!("scene {index} exists, skipped"));
        }
        self.bar.inc(1);
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        self.bar.finish_with_message(format!(
            "{} written, {} skipped",
            summary.scenes_written, summary.scenes_skipped
        ));
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!("{args:?}");

    ExitCode::from(run(&args))
}

/// Run the conversion and report it, returning the process exit code.
fn run(args: &Args) -> u8 {
    let config = PipelineConfig::new(output_root(args))
        .with_points_per_scene(args.points_per_scene)
        .with_force(args.force)
        .with_verify_intensity(args.verify_intensity);

    let mut progress = SceneProgress::new(!args.json && std::io::stderr().is_terminal());
    let result = Pipeline::new(config).run_with_observer(&args.input, &mut progress);
    if !progress.bar.is_finished() {
        progress.bar.abandon();
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            let kind = err.kind();
            match err.scene() {
                Some(scene) => eprintln!("{kind} (scene {scene}): {err}"),
                None => eprintln!("{kind}: {err}"),
            }
            return exit_code(kind);
        }
    };

    // the rest of the tree only once the scan has been converted
    if args.output_dir.is_none() {
        if let Err(err) = KittiLayout::new(&args.data_root).create() {
            eprintln!("{}: {err}", ErrorKind::IoWrite);
            return exit_code(ErrorKind::IoWrite);
        }
    }

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => log::error!("Failed to serialize the run summary: {err}"),
        }
    } else {
        println!(
            "{}: {} points, {} scenes written, {} skipped",
            summary.input.display(),
            summary.total_points,
            summary.scenes_written,
            summary.scenes_skipped
        );
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["pillars-prep", "scan.ply"]).unwrap();
        assert_eq!(args.input, PathBuf::from("scan.ply"));
        assert_eq!(args.points_per_scene, 100_000);
        assert!(!args.force);
        assert!(!args.json);
        assert_eq!(args.split, Split::Val);
        assert_eq!(output_root(&args), PathBuf::from("data/val/lidar"));
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "pillars-prep",
            "-f",
            "--points_per_scene",
            "5000",
            "--data_root",
            "/tmp/kitti",
            "--split",
            "train",
            "scan.ply",
        ])
        .unwrap();
        assert!(args.force);
        assert_eq!(args.points_per_scene, 5000);
        assert_eq!(output_root(&args), PathBuf::from("/tmp/kitti/train/lidar"));

        let args =
            Args::try_parse_from(["pillars-prep", "scan.ply", "--output_dir", "out"]).unwrap();
        assert_eq!(output_root(&args), PathBuf::from("out"));
    }

    #[test]
    fn test_usage_errors() {
        assert!(Args::try_parse_from(["pillars-prep"]).is_err());
        assert!(Args::try_parse_from(["pillars-prep", "a.ply", "--points_per_scene", "-3"]).is_err());
        assert!(Args::try_parse_from(["pillars-prep", "a.ply", "--split", "test"]).is_err());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::Format,
            ErrorKind::Schema,
            ErrorKind::TruncatedFile,
            ErrorKind::IoWrite,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| exit_code(*k)).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_run_creates_kitti_tree() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.ply");
        std::fs::write(
            &input,
            "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nproperty float intensity\nend_header\n0 0 0 0.1\n1 1 1 0.2\n2 2 2 0.3\n",
        )
        .unwrap();
        let data_root = dir.path().join("data");

        let args = Args::try_parse_from([
            "pillars-prep",
            input.to_str().unwrap(),
            "--data_root",
            data_root.to_str().unwrap(),
            "--points_per_scene",
            "2",
        ])
        .unwrap();
        assert_eq!(run(&args), 0);

        let lidar = data_root.join("val").join("lidar");
        assert!(lidar.join("scan_0.bin").is_file());
        assert!(lidar.join("scan_1.bin").is_file());
        assert!(data_root.join("train").join("label").is_dir());
    }

    #[test]
    fn test_run_reports_failure_class() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.ply");
        std::fs::write(&input, "not a ply file\n").unwrap();
        let out = dir.path().join("out");

        let out = out.to_str().unwrap();
        let args =
            Args::try_parse_from(["pillars-prep", input.to_str().unwrap(), "--output_dir", out])
                .unwrap();
        assert_eq!(run(&args), exit_code(ErrorKind::Format));
        assert!(!dir.path().join("data").exists());

        let missing = dir.path().join("missing.ply");
        let args =
            Args::try_parse_from(["pillars-prep", missing.to_str().unwrap(), "--output_dir", out])
                .unwrap();
        assert_eq!(run(&args), exit_code(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_rejected_scan_leaves_no_tree() {
        let dir = tempfile::tempdir().unwrap();
        let data_root = dir.path().join("data");
        let data_root = data_root.to_str().unwrap();

        let missing = dir.path().join("missing.ply");
        let args =
            Args::try_parse_from(["pillars-prep", missing.to_str().unwrap(), "--data_root", data_root])
                .unwrap();
        assert_eq!(run(&args), exit_code(ErrorKind::InvalidArgument));

        let input = dir.path().join("flat.ply");
        std::fs::write(
            &input,
            "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n1 2\n",
        )
        .unwrap();
        let args =
            Args::try_parse_from(["pillars-prep", input.to_str().unwrap(), "--data_root", data_root])
                .unwrap();
        assert_eq!(run(&args), exit_code(ErrorKind::Schema));
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_progress_counts_every_scene() {
        let mut progress = SceneProgress::new(false);
        progress.on_start(3);
        progress.on_scene(0, &WriteResult::Written(PathBuf::from("scan_0.bin")));
        progress.on_scene(1, &WriteResult::Skipped(PathBuf::from("scan_1.bin")));
        progress.on_scene(2, &WriteResult::Written(PathBuf::from("scan_2.bin")));
        assert_eq!(progress.bar.length(), Some(3));
        assert_eq!(progress.bar.position(), 3);

        progress.on_finish(&RunSummary::default());
        assert!(progress.bar.is_finished());
    }
}
