use std::path::{Path, PathBuf};

use dataroom::{RetrievalMode, Settings};

/// Settings backed by the hashed generators so tests never load a model.
#[allow(dead_code)]
pub fn hashed_settings(root: &Path, mode: RetrievalMode) -> Settings {
    let mut settings = Settings::default();
    settings.index_path = root.join("index");
    settings.embedding.model = "hashed".to_string();
    settings.embedding.image_model = "hashed".to_string();
    settings.embedding.hashed_dimension = 64;
    settings.retrieval.mode = mode;
    settings
}

#[allow(dead_code)]
pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
