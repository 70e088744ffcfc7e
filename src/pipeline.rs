use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

use crate::errors::{GeometryError, VolumeError};
use crate::load::load_volume;
use crate::registration::{
    parent_dir, CostFunction, DegreesOfFreedom, RegistrationError, RegistrationRequest,
    RegistrationTool,
};
use crate::save::save_volume;
use crate::transform::{
    axis_codes, canonicalize, parse_transform, AffineTransform, AxisConvention, Interpolation,
    ResampleError, Resampler, TransformError, TransformSpace, DEFAULT_FILL_VALUE,
};
use crate::volume::Volume;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("could not create output directory {}", path.display()))]
    OutputDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{}", source))]
    Registration {
        #[snafu(source(from(RegistrationError, Box::new)))]
        source: Box<RegistrationError>,
    },

    #[snafu(display("{}", source))]
    Transform {
        #[snafu(source(from(TransformError, Box::new)))]
        source: Box<TransformError>,
    },

    #[snafu(display("{}", source))]
    Volume {
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("{} has {}", path.display(), source))]
    Geometry { path: PathBuf, source: GeometryError },

    #[snafu(display("could not resample {}: {}", path.display(), source))]
    Resample {
        path: PathBuf,
        #[snafu(source(from(ResampleError, Box::new)))]
        source: Box<ResampleError>,
    },
}

/// Options for a registration run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub dof: DegreesOfFreedom,
    pub cost: CostFunction,
    /// Reorient the written volumes to this convention
    pub reorient: Option<AxisConvention>,
    /// Resample the moving volume through the produced transform
    pub reslice: Option<Interpolation>,
    /// Interpretation of the transform matrix file
    pub transform_space: TransformSpace,
    pub fill_value: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            dof: DegreesOfFreedom::default(),
            cost: CostFunction::default(),
            reorient: None,
            reslice: None,
            transform_space: TransformSpace::default(),
            fill_value: DEFAULT_FILL_VALUE,
        }
    }
}

/// Files read and written by a registration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub registered: PathBuf,
    pub transform: PathBuf,
    pub resliced: PathBuf,
}

/// What a completed run produced
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// The matrix as written by the registration tool
    pub transform: AffineTransform,
    pub registered: PathBuf,
    pub resliced: Option<PathBuf>,
}

/// Registers a moving volume onto a fixed one with an external tool, then
/// optionally reslices and reorients the results
#[derive(Debug, Clone)]
pub struct RegistrationPipeline<T: RegistrationTool> {
    pub tool: T,
    pub config: PipelineConfig,
}

impl<T: RegistrationTool> RegistrationPipeline<T> {
    pub fn new(tool: T, config: PipelineConfig) -> Self {
        RegistrationPipeline { tool, config }
    }

    pub fn request(&self, paths: &PipelinePaths) -> RegistrationRequest {
        RegistrationRequest {
            fixed: paths.fixed.clone(),
            moving: paths.moving.clone(),
            registered: paths.registered.clone(),
            transform: paths.transform.clone(),
            dof: self.config.dof,
            cost: self.config.cost,
        }
    }

    /// Register, verify the tool's outputs, then run the optional stages.
    ///
    /// Nothing after registration runs when the tool fails.
    pub fn run(&self, paths: &PipelinePaths) -> Result<PipelineOutput, PipelineError> {
        for path in [&paths.registered, &paths.transform] {
            let dir = parent_dir(path);
            std::fs::create_dir_all(dir).context(OutputDirSnafu { path: dir })?;
        }

        let request = self.request(paths);
        self.tool.register(&request).context(RegistrationSnafu)?;
        request
            .check_outputs(self.tool.name())
            .context(RegistrationSnafu)?;
        let transform = parse_transform(&paths.transform).context(TransformSnafu)?;
        tracing::info!("Registration complete, transform:\n{}", transform);

        let resliced = match self.config.reslice {
            Some(interpolation) => Some(self.reslice(paths, interpolation)?),
            None => None,
        };
        if let Some(target) = self.config.reorient {
            self.reorient_file(&paths.registered, target)?;
        }

        Ok(PipelineOutput {
            transform,
            registered: paths.registered.clone(),
            resliced,
        })
    }

    /// Resample the moving volume onto the fixed grid through the transform
    /// file already on disk, without re-running registration.
    pub fn reslice(
        &self,
        paths: &PipelinePaths,
        interpolation: Interpolation,
    ) -> Result<PathBuf, PipelineError> {
        reslice(
            &paths.moving,
            &paths.fixed,
            &paths.transform,
            &paths.resliced,
            interpolation,
            &self.config,
        )?;
        Ok(paths.resliced.clone())
    }

    fn reorient_file(&self, path: &Path, target: AxisConvention) -> Result<(), PipelineError> {
        let volume = load_volume(path).context(VolumeSnafu)?;
        let volume = reorient(&volume, target, path)?;
        save_volume(&volume, path).context(VolumeSnafu)
    }
}

/// Resample `moving` onto `fixed`'s grid through a transform matrix file and
/// write the result to `output`.
///
/// The matrix is interpreted according to `config.transform_space`, and the
/// result is reoriented when `config.reorient` is set.
pub fn reslice<P: AsRef<Path>>(
    moving: P,
    fixed: P,
    transform: P,
    output: P,
    interpolation: Interpolation,
    config: &PipelineConfig,
) -> Result<Volume, PipelineError> {
    let (moving_path, fixed_path) = (moving.as_ref(), fixed.as_ref());
    let (transform_path, output) = (transform.as_ref(), output.as_ref());
    let matrix = parse_transform(transform_path).context(TransformSnafu)?;
    let moving = load_volume(moving_path).context(VolumeSnafu)?;
    let fixed = load_volume(fixed_path).context(VolumeSnafu)?;

    let transform = config
        .transform_space
        .to_world(&matrix, &moving, &fixed)
        .context(GeometrySnafu {
            path: transform_path,
        })?;
    tracing::info!(
        "Reslicing {} onto {} ({} interpolation, {} transform)",
        moving_path.display(),
        fixed_path.display(),
        interpolation,
        config.transform_space
    );
    let resliced = Resampler::new(interpolation, config.fill_value)
        .resample(&moving, &fixed, &transform)
        .context(ResampleSnafu { path: moving_path })?;

    let resliced = match config.reorient {
        Some(target) => reorient(&resliced, target, output)?,
        None => resliced,
    };
    save_volume(&resliced, output).context(VolumeSnafu)?;
    Ok(resliced)
}

fn reorient(volume: &Volume, target: AxisConvention, path: &Path) -> Result<Volume, PipelineError> {
    let before = axis_codes(volume.affine()).context(GeometrySnafu { path })?;
    let volume = canonicalize(volume, target).context(GeometrySnafu { path })?;
    tracing::info!("Reoriented {} from {} to {}", path.display(), before, target);
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::MissingOutputSnafu;
    use crate::transform::transform_to_text;
    use ndarray::Array3;
    use std::cell::Cell;
    use tempfile::{tempdir, TempDir};

    /// Stands in for an external tool: copies the moving volume and writes a fixed matrix
    struct FakeTool {
        matrix: Option<String>,
        calls: Cell<usize>,
    }

    impl FakeTool {
        fn new(matrix: Option<&str>) -> Self {
            FakeTool {
                matrix: matrix.map(str::to_string),
                calls: Cell::new(0),
            }
        }
    }

    impl RegistrationTool for FakeTool {
        fn name(&self) -> &str {
            "fake"
        }

        fn register(&self, request: &RegistrationRequest) -> Result<(), RegistrationError> {
            self.calls.set(self.calls.get() + 1);
            std::fs::copy(&request.moving, &request.registered).unwrap();
            if let Some(matrix) = &self.matrix {
                std::fs::write(&request.transform, matrix).unwrap();
            }
            Ok(())
        }
    }

    /// Fails without writing anything
    struct FailingTool;

    impl RegistrationTool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn register(&self, request: &RegistrationRequest) -> Result<(), RegistrationError> {
            MissingOutputSnafu {
                tool: self.name(),
                path: &request.transform,
            }
            .fail()
        }
    }

    fn ras_affine() -> AffineTransform {
        AffineTransform::from_rows([
            [1.0, 0.0, 0.0, -3.0],
            [0.0, 1.0, 0.0, -3.0],
            [0.0, 0.0, 1.0, -3.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap()
    }

    fn setup() -> (TempDir, PipelinePaths, Volume) {
        let dir = tempdir().unwrap();
        let paths = PipelinePaths {
            fixed: dir.path().join("input/fixed.nii.gz"),
            moving: dir.path().join("input/moving.nii.gz"),
            registered: dir.path().join("output/registered.nii.gz"),
            transform: dir.path().join("output/transform.mat"),
            resliced: dir.path().join("output/resliced.nii.gz"),
        };
        let data = Array3::from_shape_fn((6, 6, 6), |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        let volume = Volume::new(data.into_dyn(), ras_affine()).unwrap();
        save_volume(&volume, &paths.fixed).unwrap();
        save_volume(&volume, &paths.moving).unwrap();
        (dir, paths, volume)
    }

    #[test]
    fn test_run() {
        let (_dir, paths, _) = setup();
        let matrix = AffineTransform::translation(1.0, 0.0, 0.0);
        let tool = FakeTool::new(Some(&transform_to_text(&matrix)));
        let pipeline = RegistrationPipeline::new(&tool, PipelineConfig::default());

        let output = pipeline.run(&paths).unwrap();
        assert_eq!(output.transform, matrix);
        assert_eq!(output.resliced, None);
        assert!(paths.registered.is_file());
        assert!(!paths.resliced.exists());
        assert_eq!(tool.calls.get(), 1);
    }

    #[test]
    fn test_missing_transform() {
        let (_dir, paths, _) = setup();
        let pipeline = RegistrationPipeline::new(FakeTool::new(None), PipelineConfig::default());
        let error = pipeline.run(&paths).unwrap_err();
        match error {
            PipelineError::Registration { source } => {
                assert!(matches!(*source, RegistrationError::MissingOutput { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_transform() {
        let (_dir, paths, _) = setup();
        let tool = FakeTool::new(Some("1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 0.9\n"));
        let error = RegistrationPipeline::new(tool, PipelineConfig::default())
            .run(&paths)
            .unwrap_err();
        match error {
            PipelineError::Transform { source } => {
                assert!(source.is_malformed());
                assert_eq!(source.path(), paths.transform.as_path());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failure_skips_resampling() {
        let (_dir, paths, _) = setup();
        let config = PipelineConfig {
            reslice: Some(Interpolation::Nearest),
            reorient: Some(AxisConvention::LAS),
            ..Default::default()
        };
        let error = RegistrationPipeline::new(FailingTool, config)
            .run(&paths)
            .unwrap_err();
        assert!(matches!(error, PipelineError::Registration { .. }));
        assert!(!paths.resliced.exists());
    }

    #[test]
    fn test_reslice_world_transform() {
        let (_dir, paths, volume) = setup();
        let matrix = AffineTransform::translation(2.0, 0.0, 0.0);
        let config = PipelineConfig {
            reslice: Some(Interpolation::Nearest),
            transform_space: TransformSpace::World,
            fill_value: -1.0,
            ..Default::default()
        };
        let pipeline = RegistrationPipeline::new(
            FakeTool::new(Some(&transform_to_text(&matrix))),
            config,
        );

        let output = pipeline.run(&paths).unwrap();
        assert_eq!(output.resliced.as_ref(), Some(&paths.resliced));
        let resliced = load_volume(&paths.resliced).unwrap();
        assert_eq!(resliced.affine(), volume.affine());
        assert_eq!(resliced.data()[[3, 1, 2]], volume.data()[[1, 1, 2]]);
        assert_eq!(resliced.data()[[1, 1, 2]], -1.0);
    }

    #[test]
    fn test_reslice_cached_transform() {
        let (_dir, paths, volume) = setup();
        std::fs::create_dir_all(paths.transform.parent().unwrap()).unwrap();
        std::fs::write(&paths.transform, transform_to_text(&AffineTransform::identity())).unwrap();
        let tool = FakeTool::new(None);
        let pipeline = RegistrationPipeline::new(&tool, PipelineConfig::default());

        let path = pipeline.reslice(&paths, Interpolation::Trilinear).unwrap();
        let resliced = load_volume(path).unwrap();
        for (actual, expected) in resliced.data().iter().zip(volume.data().iter()) {
            assert!((actual - expected).abs() < 1e-3);
        }
        assert_eq!(tool.calls.get(), 0);
    }

    #[test]
    fn test_reorient_outputs() {
        let (_dir, paths, _) = setup();
        let config = PipelineConfig {
            reorient: Some(AxisConvention::LAS),
            reslice: Some(Interpolation::Nearest),
            ..Default::default()
        };
        let tool = FakeTool::new(Some(&transform_to_text(&AffineTransform::identity())));
        RegistrationPipeline::new(tool, config).run(&paths).unwrap();

        for path in [&paths.registered, &paths.resliced] {
            let volume = load_volume(path).unwrap();
            assert_eq!(axis_codes(volume.affine()).unwrap(), "LAS");
        }
    }
}
