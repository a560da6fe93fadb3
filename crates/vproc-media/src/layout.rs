//! Owner/project-scoped artifact store layout.
//!
//! Inputs live under `{root}/{owner_id}/uploaded_videos/{project}` and the
//! pipeline writes produced scene/segment files to the sibling
//! `{root}/{owner_id}/processed_videos/{project}` directory.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

const INPUT_SUBDIR: &str = "uploaded_videos";
const OUTPUT_SUBDIR: &str = "processed_videos";

/// Artifact store layout rooted at the owners directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root of the artifact store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Input directory for an owner's project.
    pub fn input_dir(&self, owner_id: u64, project_name: &str) -> PathBuf {
        self.root
            .join(owner_id.to_string())
            .join(INPUT_SUBDIR)
            .join(project_name)
    }

    /// Output directory the pipeline writes artifacts into.
    pub fn output_dir(&self, owner_id: u64, project_name: &str) -> PathBuf {
        self.root
            .join(owner_id.to_string())
            .join(OUTPUT_SUBDIR)
            .join(project_name)
    }

    /// Validate that the input directory exists and holds at least one file.
    pub fn validate_input(&self, owner_id: u64, project_name: &str) -> PipelineResult<PathBuf> {
        let dir = self.input_dir(owner_id, project_name);
        if count_files(&dir)? == 0 {
            return Err(PipelineError::InputMissing(dir));
        }
        Ok(dir)
    }

    /// Count artifact files the pipeline produced for an owner's project.
    ///
    /// A missing output directory counts as zero artifacts, not an error.
    pub fn count_artifacts(&self, owner_id: u64, project_name: &str) -> PipelineResult<usize> {
        count_files(&self.output_dir(owner_id, project_name))
    }
}

fn count_files(dir: &Path) -> PipelineResult<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_shape() {
        let layout = ArtifactLayout::new("/data/uploads");
        assert_eq!(
            layout.input_dir(5, "trip"),
            PathBuf::from("/data/uploads/5/uploaded_videos/trip")
        );
        assert_eq!(
            layout.output_dir(5, "trip"),
            PathBuf::from("/data/uploads/5/processed_videos/trip")
        );
    }

    #[test]
    fn test_validate_input_requires_files() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(tmp.path());

        // Missing directory.
        assert!(matches!(
            layout.validate_input(5, "trip"),
            Err(PipelineError::InputMissing(_))
        ));

        // Empty directory.
        std::fs::create_dir_all(layout.input_dir(5, "trip")).unwrap();
        assert!(matches!(
            layout.validate_input(5, "trip"),
            Err(PipelineError::InputMissing(_))
        ));

        // One input file.
        std::fs::write(layout.input_dir(5, "trip").join("source.mp4"), b"x").unwrap();
        let dir = layout.validate_input(5, "trip").unwrap();
        assert_eq!(dir, layout.input_dir(5, "trip"));
    }

    #[test]
    fn test_count_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(tmp.path());

        assert_eq!(layout.count_artifacts(5, "trip").unwrap(), 0);

        let out = layout.output_dir(5, "trip");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("scene_001.mp4"), b"x").unwrap();
        std::fs::write(out.join("scene_002.mp4"), b"x").unwrap();
        assert_eq!(layout.count_artifacts(5, "trip").unwrap(), 2);
    }
}
