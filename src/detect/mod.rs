//! Detector adapter: the contract between the pipeline and an object-detection model.

mod backend;
pub mod backends;
pub mod nms;
mod result;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::{DetectParams, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoxXyxy, BoxXywhn, RawDetection};

/// Build the configured backend and run its warm-up hook.
pub fn load_backend(settings: &DetectorSettings) -> Result<Arc<dyn DetectorBackend>> {
    let backend: Arc<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => {
            log::warn!("stub detector configured; every image will report zero regions");
            Arc::new(StubBackend::new())
        }
        "tract" => load_tract(settings)?,
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings) -> Result<Arc<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires a model_path"))?;
    Ok(Arc::new(TractBackend::new(model_path, settings.input_size)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &DetectorSettings) -> Result<Arc<dyn DetectorBackend>> {
    Err(anyhow!(
        "tract backend requested but this build lacks the `backend-tract` feature"
    ))
}
