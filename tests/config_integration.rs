//! Configuration files driving real pipelines

mod common;

use common::wait_until;
use framepipe::config::{ExecutionMode, PipelineConfig};
use framepipe::{Pipeline, PipelineError, SourceRegistry, TransformRegistry};
use std::io::Write;
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
[acquisition]
capacity = 4
drop_count = 2

[acquisition.source]
kind = "synthetic"
params = { rows = 6, cols = 6, pattern = "constant", value = 3.0 }

[processing]
batch_size = 2

[processing.transform]
kind = "scale"
params = { gain = 2.0, offset = -1.0 }
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_sample_config_runs() {
    let file = write_config(SAMPLE);
    let config = PipelineConfig::load(file.path()).unwrap();
    assert_eq!(config.acquisition.capacity, 4);
    assert_eq!(config.processing.mode, ExecutionMode::InThread);

    let mut pipeline = Pipeline::from_config(
        &config,
        &SourceRegistry::with_builtins(),
        &TransformRegistry::with_builtins(),
    )
    .unwrap();
    pipeline.start().unwrap();
    assert!(wait_until(|| pipeline.latest_output().is_some()));
    pipeline.stop();

    let output = pipeline.latest_output().unwrap();
    assert_eq!(output.planes(), 2);
    assert!(output.data().iter().all(|&v| v == 5.0));
}

#[test]
fn test_invalid_file_is_rejected_by_load() {
    let file = write_config("[acquisition]\ncapacity = 0\n");
    assert!(matches!(PipelineConfig::load(file.path()), Err(PipelineError::Config(_))));
    assert_eq!(PipelineConfig::load_or_default(file.path()), PipelineConfig::default());
}

#[test]
fn test_saved_config_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("pipeline.toml");
    let config = PipelineConfig::load(write_config(SAMPLE).path()).unwrap();
    config.save(&path).unwrap();
    assert_eq!(PipelineConfig::load(&path).unwrap(), config);
}
