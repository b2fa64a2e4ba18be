//! Workflow templates and per-job parameter injection.
//!
//! A workflow is a ComfyUI JSON graph: a map of node id to
//! `{class_type, inputs, _meta}`. Templates live as `.json` files in a
//! configurable directory; per-job parameters are injected by
//! `class_type` so the same template serves every job.

use std::path::{Path, PathBuf};

use spriteforge_core::Job;

/// Template used when a job does not name one.
pub const DEFAULT_TEMPLATE: &str = "sprite_optimized";

/// Errors loading or parsing workflow templates.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to read workflow template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("workflow template {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Loader for the workflow template directory.
pub struct WorkflowTemplates {
    dir: PathBuf,
}

impl WorkflowTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load a template by name (without the `.json` extension).
    pub fn load(&self, name: &str) -> Result<serde_json::Value, WorkflowError> {
        let path = self.dir.join(format!("{name}.json"));
        let raw = std::fs::read_to_string(&path).map_err(|source| WorkflowError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| WorkflowError::Parse { path, source })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Inject a job's parameters into a workflow template.
///
/// Matching is by `class_type`:
/// - `CLIPTextEncode` titled "Positive Prompt" (or untitled) gets the
///   prompt text;
/// - `KSampler` gets steps, cfg, and the seed;
/// - `EmptyLatentImage` gets the resolution;
/// - `CheckpointLoaderSimple` gets the model name;
/// - `LoraLoader` gets the LoRA name, when the job carries one.
///
/// The template is left untouched; a modified copy is returned.
pub fn inject_parameters(template: &serde_json::Value, job: &Job, seed: u64) -> serde_json::Value {
    let mut workflow = template.clone();
    let Some(nodes) = workflow.as_object_mut() else {
        return workflow;
    };

    for node in nodes.values_mut() {
        let Some(class_type) = node.get("class_type").and_then(|c| c.as_str()) else {
            continue;
        };
        let class_type = class_type.to_string();
        let title = node
            .get("_meta")
            .and_then(|m| m.get("title"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let Some(inputs) = node.get_mut("inputs").and_then(|i| i.as_object_mut()) else {
            continue;
        };

        match class_type.as_str() {
            "CLIPTextEncode" => {
                // Negative prompts keep their template text.
                let is_positive = match title.as_deref() {
                    Some(t) => t == "Positive Prompt",
                    None => true,
                };
                if is_positive {
                    inputs.insert("text".into(), job.prompt.clone().into());
                }
            }
            "KSampler" => {
                inputs.insert("steps".into(), job.steps.into());
                inputs.insert("cfg".into(), job.cfg_scale.into());
                inputs.insert("seed".into(), seed.into());
            }
            "EmptyLatentImage" => {
                let (width, height) = job.size;
                inputs.insert("width".into(), width.into());
                inputs.insert("height".into(), height.into());
            }
            "CheckpointLoaderSimple" => {
                inputs.insert("ckpt_name".into(), job.model.clone().into());
            }
            "LoraLoader" => {
                if let Some(lora) = &job.lora {
                    inputs.insert("lora_name".into(), lora.clone().into());
                }
            }
            _ => {}
        }
    }

    workflow
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spriteforge_core::JobSpec;

    fn job(lora: Option<&str>) -> Job {
        Job::from_spec(JobSpec {
            id: Some("j1".into()),
            prompt: "pixel art wizard".into(),
            model: "sdxl.safetensors".into(),
            size: (768, 512),
            steps: 24,
            cfg_scale: 6.5,
            lora: lora.map(Into::into),
        })
    }

    fn template() -> serde_json::Value {
        json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "placeholder"}},
            "2": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "Positive Prompt"},
                "inputs": {"text": "placeholder"},
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "Negative Prompt"},
                "inputs": {"text": "blurry, low quality"},
            },
            "4": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512}},
            "5": {"class_type": "KSampler", "inputs": {"steps": 20, "cfg": 8.0, "seed": 0}},
            "6": {"class_type": "LoraLoader", "inputs": {"lora_name": "placeholder"}},
            "7": {"class_type": "SaveImage", "inputs": {"filename_prefix": "out"}},
        })
    }

    #[test]
    fn injects_prompt_sampler_and_resolution() {
        let injected = inject_parameters(&template(), &job(None), 42);

        assert_eq!(injected["2"]["inputs"]["text"], "pixel art wizard");
        assert_eq!(injected["5"]["inputs"]["steps"], 24);
        assert_eq!(injected["5"]["inputs"]["cfg"], 6.5);
        assert_eq!(injected["5"]["inputs"]["seed"], 42);
        assert_eq!(injected["4"]["inputs"]["width"], 768);
        assert_eq!(injected["4"]["inputs"]["height"], 512);
        assert_eq!(injected["1"]["inputs"]["ckpt_name"], "sdxl.safetensors");
    }

    #[test]
    fn negative_prompt_is_left_alone() {
        let injected = inject_parameters(&template(), &job(None), 0);
        assert_eq!(injected["3"]["inputs"]["text"], "blurry, low quality");
    }

    #[test]
    fn lora_is_injected_only_when_present() {
        let without = inject_parameters(&template(), &job(None), 0);
        assert_eq!(without["6"]["inputs"]["lora_name"], "placeholder");

        let with = inject_parameters(&template(), &job(Some("pixel_style.safetensors")), 0);
        assert_eq!(with["6"]["inputs"]["lora_name"], "pixel_style.safetensors");
    }

    #[test]
    fn template_itself_is_not_mutated() {
        let template = template();
        let _ = inject_parameters(&template, &job(None), 7);
        assert_eq!(template["2"]["inputs"]["text"], "placeholder");
    }

    #[test]
    fn load_reads_template_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sprite_optimized.json"),
            serde_json::to_string(&template()).unwrap(),
        )
        .unwrap();

        let templates = WorkflowTemplates::new(dir.path());
        let loaded = templates.load(DEFAULT_TEMPLATE).unwrap();
        assert_eq!(loaded["5"]["class_type"], "KSampler");
    }

    #[test]
    fn missing_template_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let templates = WorkflowTemplates::new(dir.path());
        assert!(matches!(
            templates.load("ghost"),
            Err(WorkflowError::Read { .. })
        ));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let templates = WorkflowTemplates::new(dir.path());
        assert!(matches!(
            templates.load("bad"),
            Err(WorkflowError::Parse { .. })
        ));
    }
}
