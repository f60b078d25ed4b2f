use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::io::kitti::{KittiEncoder, KittiError, SceneEncoder};
use crate::io::ply::{read_ply, PlyError};
use crate::output::{OutputManager, WriteError, WriteResult};
use crate::pointcloud::PointCloud;
use crate::scene::{SceneError, ScenePartitioner};

/// Default maximum number of points per scene.
pub const DEFAULT_POINTS_PER_SCENE: usize = 100_000;

/// Default output root, the validation lidar directory of the KITTI tree.
pub const DEFAULT_OUTPUT_ROOT: &str = "data/val/lidar";

/// Failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input could not be parsed.
    Format,
    /// Required per-point attributes are missing or inconsistent.
    Schema,
    /// The declared and actual record counts differ.
    TruncatedFile,
    /// A caller-supplied argument is unusable.
    InvalidArgument,
    /// An artifact could not be committed.
    IoWrite,
}

impl ErrorKind {
    /// Name of the failure class.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Format => "FormatError",
            ErrorKind::Schema => "SchemaError",
            ErrorKind::TruncatedFile => "TruncatedFileError",
            ErrorKind::InvalidArgument => "InvalidArgumentError",
            ErrorKind::IoWrite => "IOWriteError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the pipeline module.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A caller-supplied argument is unusable.
    #[error("{0}")]
    InvalidArgument(String),

    /// The scene budget was rejected.
    #[error(transparent)]
    Partition(#[from] SceneError),

    /// The input could not be read.
    #[error("{}: {source}", path.display())]
    Read {
        /// The input file.
        path: PathBuf,
        /// The reader error.
        source: PlyError,
    },

    /// The input schema lacks a feature the encoder requires.
    #[error("{}: {source}", path.display())]
    Schema {
        /// The input file.
        path: PathBuf,
        /// The encoder error.
        source: KittiError,
    },

    /// An intensity value lies outside `[0, 1]`.
    #[error("{}: intensity {value} of point {index} is outside [0, 1]", path.display())]
    IntensityOutOfRange {
        /// The input file.
        path: PathBuf,
        /// Index of the offending point.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// The output root could not be created.
    #[error(transparent)]
    OutputRoot(WriteError),

    /// A scene could not be encoded or committed.
    #[error("scene {scene}: {source}")]
    Write {
        /// Index of the failed scene.
        scene: usize,
        /// The write error.
        source: WriteError<KittiError>,
    },
}

impl PipelineError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidArgument(_) | PipelineError::Partition(_) => {
                ErrorKind::InvalidArgument
            }
            PipelineError::Read { source, .. } => match source {
                PlyError::Io(_)
                | PlyError::MalformedHeader { .. }
                | PlyError::MissingVertexElement
                | PlyError::InvalidValue { .. } => ErrorKind::Format,
                PlyError::MissingCoordinate(_) | PlyError::InconsistentSchema(_) => {
                    ErrorKind::Schema
                }
                PlyError::Truncated { .. } | PlyError::TrailingData { .. } => {
                    ErrorKind::TruncatedFile
                }
            },
            PipelineError::Schema { .. } | PipelineError::IntensityOutOfRange { .. } => {
                ErrorKind::Schema
            }
            PipelineError::Write {
                source:
                    WriteError::Produce {
                        source: KittiError::MissingFeature(_),
                        ..
                    },
                ..
            } => ErrorKind::Schema,
            PipelineError::Write { .. } | PipelineError::OutputRoot(_) => ErrorKind::IoWrite,
        }
    }

    /// The scene being processed when the error occurred, if any.
    pub fn scene(&self) -> Option<usize> {
        match self {
            PipelineError::Write { scene, .. } => Some(*scene),
            _ => None,
        }
    }
}

/// Steps of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Nothing started.
    Idle,
    /// Parsing the input.
    Reading,
    /// Splitting into scenes.
    Partitioning,
    /// Encoding and committing a scene.
    Encoding {
        /// The scene index.
        scene: usize,
    },
    /// Every scene handled.
    Done,
    /// Aborted on an error.
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Idle => f.write_str("idle"),
            PipelineStage::Reading => f.write_str("reading"),
            PipelineStage::Partitioning => f.write_str("partitioning"),
            PipelineStage::Encoding { scene } => write!(f, "encoding scene {scene}"),
            PipelineStage::Done => f.write_str("done"),
            PipelineStage::Failed => f.write_str("failed"),
        }
    }
}

/// Settings of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory receiving the scene artifacts.
    pub output_root: PathBuf,
    /// Maximum number of points per scene.
    pub points_per_scene: usize,
    /// Replace artifacts that already exist.
    pub force: bool,
    /// Reject clouds whose `intensity` leaves `[0, 1]`.
    pub verify_intensity: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            points_per_scene: DEFAULT_POINTS_PER_SCENE,
            force: false,
            verify_intensity: false,
        }
    }
}

impl PipelineConfig {
    /// Default settings writing under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Default::default()
        }
    }

    /// Set the scene budget.
    pub fn with_points_per_scene(mut self, points_per_scene: usize) -> Self {
        self.points_per_scene = points_per_scene;
        self
    }

    /// Set the overwrite policy.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enable or disable the intensity range check.
    pub fn with_verify_intensity(mut self, verify_intensity: bool) -> Self {
        self.verify_intensity = verify_intensity;
        self
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The input file.
    pub input: PathBuf,
    /// Points read from the input.
    pub total_points: usize,
    /// Scenes committed in this run.
    pub scenes_written: usize,
    /// Scenes left untouched because their artifact existed.
    pub scenes_skipped: usize,
    /// Destination of every scene, in scene order.
    pub artifacts: Vec<PathBuf>,
}

/// Receives progress events from a pipeline run.
///
/// Every method defaults to doing nothing; `()` is the silent observer.
pub trait PipelineObserver {
    /// Called once the scan is validated and split, before the first scene is written.
    fn on_start(&mut self, _total_scenes: usize) {}

    /// Called after each scene is committed or skipped, in scene order.
    fn on_scene(&mut self, _index: usize, _result: &WriteResult) {}

    /// Called when every scene has been handled.
    fn on_finish(&mut self, _summary: &RunSummary) {}
}

impl PipelineObserver for () {}

/// Reads a point cloud, splits it into scenes and commits one artifact per scene.
///
/// A run holds no state beyond its own call; the first failure aborts it. Artifacts
/// committed before the failure stay on disk.
#[derive(Debug, Clone)]
pub struct Pipeline<E = KittiEncoder> {
    config: PipelineConfig,
    encoder: E,
    output: OutputManager,
}

impl Pipeline<KittiEncoder> {
    /// Create a pipeline encoding PointPillars KITTI binaries.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_encoder(config, KittiEncoder::default())
    }
}

impl<E: SceneEncoder> Pipeline<E> {
    /// Create a pipeline with a custom scene encoder.
    pub fn with_encoder(config: PipelineConfig, encoder: E) -> Self {
        let output = OutputManager::new(config.output_root.clone());
        Self {
            config,
            encoder,
            output,
        }
    }

    /// The run settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert `input` into scene artifacts under the output root.
    pub fn run(&self, input: impl AsRef<Path>) -> Result<RunSummary, PipelineError> {
        self.run_with_observer(input, &mut ())
    }

    /// Like [`Pipeline::run`], reporting progress to `observer`.
    pub fn run_with_observer<O>(
        &self,
        input: impl AsRef<Path>,
        observer: &mut O,
    ) -> Result<RunSummary, PipelineError>
    where
        O: PipelineObserver + ?Sized,
    {
        let mut stage = PipelineStage::Idle;
        let result = self.run_stages(input.as_ref(), &mut stage, observer);
        if result.is_err() {
            log::debug!("pipeline stage: {stage} -> {}", PipelineStage::Failed);
        }
        result
    }

    fn run_stages<O>(
        &self,
        input: &Path,
        stage: &mut PipelineStage,
        observer: &mut O,
    ) -> Result<RunSummary, PipelineError>
    where
        O: PipelineObserver + ?Sized,
    {
        let partitioner = ScenePartitioner::new(self.config.points_per_scene)?;
        let stem = input_stem(input)?;

        enter(stage, PipelineStage::Reading);
        let cloud = read_ply(input).map_err(|source| PipelineError::Read {
            path: input.to_path_buf(),
            source,
        })?;
        log::info!("Read {} points from {}", cloud.len(), input.display());
        log::debug!(
            "Bounds min {:?} max {:?}",
            cloud.get_min_bound(),
            cloud.get_max_bound()
        );

        self.encoder
            .validate(cloud.schema())
            .map_err(|source| PipelineError::Schema {
                path: input.to_path_buf(),
                source,
            })?;
        if self.config.verify_intensity {
            if let Some((index, value)) = find_intensity_out_of_range(&cloud) {
                return Err(PipelineError::IntensityOutOfRange {
                    path: input.to_path_buf(),
                    index,
                    value,
                });
            }
        }

        enter(stage, PipelineStage::Partitioning);
        let scenes = partitioner.partition(&cloud);
        log::info!(
            "Split into {} scenes of at most {} points",
            scenes.len(),
            partitioner.points_per_scene()
        );

        self.output.ensure_root().map_err(PipelineError::OutputRoot)?;

        let mut summary = RunSummary {
            input: input.to_path_buf(),
            total_points: cloud.len(),
            ..Default::default()
        };

        observer.on_start(scenes.len());
        for scene in &scenes {
            enter(stage, PipelineStage::Encoding { scene: scene.index() });
            let dest = self.output.artifact_path(&stem, scene.index());
            let result = self
                .output
                .write_with(&dest, self.config.force, |writer| {
                    self.encoder.encode_into(scene, writer)
                })
                .map_err(|source| PipelineError::Write {
                    scene: scene.index(),
                    source,
                })?;

            observer.on_scene(scene.index(), &result);

            match result {
                WriteResult::Written(path) => {
                    log::debug!(
                        "Wrote scene {} ({} points) to {}",
                        scene.index(),
                        scene.len(),
                        path.display()
                    );
                    summary.scenes_written += 1;
                    summary.artifacts.push(path);
                }
                WriteResult::Skipped(path) => {
                    log::warn!(
                        "{} already exists, use --force to overwrite",
                        path.display()
                    );
                    summary.scenes_skipped += 1;
                    summary.artifacts.push(path);
                }
            }
        }

        enter(stage, PipelineStage::Done);
        observer.on_finish(&summary);
        log::info!(
            "{} scenes written, {} skipped in {}",
            summary.scenes_written,
            summary.scenes_skipped,
            self.output.root().display()
        );

        Ok(summary)
    }
}

fn enter(stage: &mut PipelineStage, next: PipelineStage) {
    log::debug!("pipeline stage: {stage} -> {next}");
    *stage = next;
}

/// Check the input is an existing file and return the stem naming its artifacts.
fn input_stem(input: &Path) -> Result<String, PipelineError> {
    if !input.exists() {
        return Err(PipelineError::InvalidArgument(format!(
            "{} does not exist",
            input.display()
        )));
    }
    if !input.is_file() {
        return Err(PipelineError::InvalidArgument(format!(
            "{} is not a file",
            input.display()
        )));
    }
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            PipelineError::InvalidArgument(format!(
                "{} has no UTF-8 file name",
                input.display()
            ))
        })
}

/// First point whose `intensity` is outside `[0, 1]`, with its value.
fn find_intensity_out_of_range(cloud: &PointCloud) -> Option<(usize, f64)> {
    let field = cloud.schema().field_index("intensity")?;
    cloud
        .points()
        .map(|point| point.values()[field])
        .enumerate()
        .find(|(_, value)| !(0.0..=1.0).contains(value))
}

/// Convert `input` with the default output root and encoder.
///
/// See [`Pipeline::run`].
pub fn run(
    input: impl AsRef<Path>,
    force: bool,
    points_per_scene: usize,
) -> Result<RunSummary, PipelineError> {
    let config = PipelineConfig::default()
        .with_force(force)
        .with_points_per_scene(points_per_scene);
    Pipeline::new(config).run(input)
}
