use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

const SPINNER_TICK: Duration = Duration::from_millis(100);
const NIFTI_EXTENSIONS: [&str; 2] = [".nii", ".nii.gz"];

/// Spinner shown while an external tool runs
pub fn default_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.blue} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.enable_steady_tick(SPINNER_TICK);
    spinner
}

/// Whether a path names a NIfTI-1 file (`.nii` or `.nii.gz`, any case)
pub fn is_nifti_path(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .is_some_and(|name| NIFTI_EXTENSIONS.iter().any(|ext| name.ends_with(ext)))
}
