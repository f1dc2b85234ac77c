pub mod check;
pub mod info;
pub mod init;
pub mod render;
pub mod validate;

use std::path::{Path, PathBuf};

use cutline_project_model::LoadedProject;

/// File name looked up when a command is given a directory.
pub const PROJECT_FILE: &str = "cutline.json";

/// Accept either a project file or a directory holding one.
pub fn project_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(PROJECT_FILE)
    } else {
        path.to_path_buf()
    }
}

pub fn load_project(path: &Path) -> anyhow::Result<LoadedProject> {
    let file = project_file(path);
    LoadedProject::load(&file).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(project_file(dir.path()), dir.path().join(PROJECT_FILE));

        let file = dir.path().join("talk.json");
        assert_eq!(project_file(&file), file);
    }
}
