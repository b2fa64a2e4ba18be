//! Filesystem-backed model registry.
//!
//! Scans the ComfyUI model directory layout (`checkpoints/`, `loras/`,
//! `vae/`) for recognized model files. This is the one place disk I/O
//! happens on the command path; a missing directory degrades to an
//! empty list with a logged warning.

use std::path::Path;

use spriteforge_protocol::{ModelInfo, ModelKind};
use tracing::warn;

/// Recognized model file extensions, lower-cased.
const MODEL_EXTENSIONS: [&str; 4] = ["safetensors", "ckpt", "pt", "pth"];

/// Scan the three category subdirectories under `model_dir`, returning
/// all recognized models sorted case-insensitively by name.
pub fn scan_models(model_dir: &Path) -> Vec<ModelInfo> {
    let mut models = Vec::new();
    for (subdir, kind) in [
        ("checkpoints", ModelKind::Checkpoint),
        ("loras", ModelKind::Lora),
        ("vae", ModelKind::Vae),
    ] {
        models.extend(scan_directory(&model_dir.join(subdir), kind));
    }
    models.sort_by_key(|m| m.name.to_lowercase());
    models
}

fn scan_directory(dir: &Path, kind: ModelKind) -> Vec<ModelInfo> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "model directory not readable");
            return Vec::new();
        }
    };

    let mut models = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let recognized = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| MODEL_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if !recognized {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let size_mb = entry.metadata().map(|m| m.len() / (1024 * 1024)).unwrap_or(0);

        models.push(ModelInfo {
            name: name.to_string(),
            path: path.display().to_string(),
            model_type: kind,
            size_mb,
        });
    }
    models
}
