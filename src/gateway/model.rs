use std::path::Path;

use anyhow::{Result, bail};
use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;
use ort::value::DynValue;
use tracing::{debug, warn};

use crate::error::SmileError;

pub fn init_runtime() {
    let res = ort::init()
        .with_name("smilecam")
        .with_execution_providers([execution_providers::XNNPACKExecutionProvider::default().build()])
        .commit();

    if let Err(e) = res {
        warn!("Falling back to default ONNX runtime environment: {e}");
    }
}

pub fn initialize_model(path: &Path, threads: usize) -> Result<Session> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }

    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(path)?;

    debug!(
        "Loaded {}: inputs {:?}, outputs {:?}",
        path.display(),
        model.inputs.iter().map(|i| &i.name).collect::<Vec<_>>(),
        model.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );

    Ok(model)
}

/// Names of the first input and first output, for single-tensor models.
pub fn io_names(model: &Session) -> Result<(String, String)> {
    let Some(input) = model.inputs.first() else {
        bail!("model has no inputs");
    };
    let Some(output) = model.outputs.first() else {
        bail!("model has no outputs");
    };

    Ok((input.name.clone(), output.name.clone()))
}

/// Flattened f32 contents of an output looked up by `name`.
pub fn output_values(output: Option<&DynValue>, name: &str) -> Result<Vec<f32>> {
    let Some(output) = output else {
        bail!(SmileError::Detection(format!("model has no output named {name:?}")));
    };

    Ok(output.try_extract_tensor::<f32>()?.iter().copied().collect())
}
