//! Plain-text 4x4 transform matrices, as written by FLIRT's `-omat`.
//!
//! The layout is four lines of four whitespace-separated floats, row-major.
//! Values may use fixed or scientific notation.
use snafu::{ensure, ResultExt, Snafu};
use std::path::{Path, PathBuf};

use crate::transform::affine::{is_homogeneous_row, AffineTransform};

const MATRIX_SIZE: usize = 4;
const COLUMN_SEPARATOR: &str = "  ";
const INLINE_SOURCE: &str = "<inline>";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    #[snafu(display(
        "malformed transform {}: expected {} rows, found {}",
        path.display(),
        MATRIX_SIZE,
        rows
    ))]
    RowCount { path: PathBuf, rows: usize },

    #[snafu(display(
        "malformed transform {}: row {} has {} values, expected {}",
        path.display(),
        row,
        columns,
        MATRIX_SIZE
    ))]
    ColumnCount {
        path: PathBuf,
        row: usize,
        columns: usize,
    },

    #[snafu(display("malformed transform {}: cannot parse '{}' in row {}", path.display(), token, row))]
    ParseValue {
        path: PathBuf,
        row: usize,
        token: String,
        #[snafu(source(from(std::num::ParseFloatError, Box::new)))]
        source: Box<std::num::ParseFloatError>,
    },

    #[snafu(display("malformed transform {}: non-finite value in row {}", path.display(), row))]
    NonFiniteValue { path: PathBuf, row: usize },

    #[snafu(display(
        "malformed transform {}: bottom row {:?} is not [0, 0, 0, 1]",
        path.display(),
        bottom_row
    ))]
    BottomRow { path: PathBuf, bottom_row: [f64; 4] },

    #[snafu(display("could not read transform {}", path.display()))]
    ReadTransform {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("could not write transform {}", path.display()))]
    WriteTransform {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

impl TransformError {
    /// Whether the file was readable but its content is not a valid transform
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            TransformError::ReadTransform { .. } | TransformError::WriteTransform { .. }
        )
    }

    /// The transform file the error refers to
    pub fn path(&self) -> &Path {
        match self {
            TransformError::RowCount { path, .. }
            | TransformError::ColumnCount { path, .. }
            | TransformError::ParseValue { path, .. }
            | TransformError::NonFiniteValue { path, .. }
            | TransformError::BottomRow { path, .. }
            | TransformError::ReadTransform { path, .. }
            | TransformError::WriteTransform { path, .. } => path,
        }
    }
}

/// Read a transform matrix file
pub fn parse_transform<P: AsRef<Path>>(path: P) -> Result<AffineTransform, TransformError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).context(ReadTransformSnafu { path })?;
    parse_lines(&text, path)
}

/// Parse transform matrix text held in memory
pub fn parse_transform_str(text: &str) -> Result<AffineTransform, TransformError> {
    parse_lines(text, Path::new(INLINE_SOURCE))
}

fn parse_lines(text: &str, path: &Path) -> Result<AffineTransform, TransformError> {
    // Blank lines only occur as leading/trailing padding in FLIRT output
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    ensure!(
        lines.len() == MATRIX_SIZE,
        RowCountSnafu {
            path,
            rows: lines.len()
        }
    );

    let mut rows = [[0.0; MATRIX_SIZE]; MATRIX_SIZE];
    for (row, (line, values)) in lines.iter().zip(rows.iter_mut()).enumerate() {
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        ensure!(
            tokens.len() == MATRIX_SIZE,
            ColumnCountSnafu {
                path,
                row,
                columns: tokens.len()
            }
        );
        for (token, value) in tokens.iter().zip(values.iter_mut()) {
            *value = token.parse::<f64>().context(ParseValueSnafu {
                path,
                row,
                token: *token,
            })?;
            ensure!(value.is_finite(), NonFiniteValueSnafu { path, row });
        }
    }

    let bottom_row = rows[MATRIX_SIZE - 1];
    ensure!(
        is_homogeneous_row(&bottom_row),
        BottomRowSnafu { path, bottom_row }
    );
    // Finite values and a homogeneous bottom row are all the affine checks
    AffineTransform::from_rows(rows).map_err(|_| TransformError::BottomRow {
        path: path.to_path_buf(),
        bottom_row,
    })
}

/// Render a transform in the FLIRT text layout, one row per line.
///
/// Values use the shortest representation that parses back to the same `f64`.
pub fn transform_to_text(transform: &AffineTransform) -> String {
    transform
        .rows()
        .iter()
        .map(|row| {
            let mut line = row
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(COLUMN_SEPARATOR);
            line.push('\n');
            line
        })
        .collect()
}

/// Write a transform matrix file
pub fn serialize_transform<P: AsRef<Path>>(
    transform: &AffineTransform,
    path: P,
) -> Result<(), TransformError> {
    let path = path.as_ref();
    std::fs::write(path, transform_to_text(transform)).context(WriteTransformSnafu { path })?;
    tracing::debug!("Wrote transform to {}", path.display());
    Ok(())
}
