use std::sync::Arc;

use isoport_backend_ort::OrtBackend;
use isoport_backend_spleeter::SpleeterBackend;
use isoport_core::BackendSet;

use crate::config::BackendSettings;

/// Every backend this daemon knows, routed by job kind.
pub fn build_backends(settings: &BackendSettings) -> BackendSet {
    BackendSet::new()
        .with(Arc::new(SpleeterBackend::new(settings.spleeter.clone())))
        .with(Arc::new(OrtBackend::new(settings.detector.clone())))
}
