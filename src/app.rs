// src/app.rs

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::scanner::{NetworkProbe, Probe};
use crate::core::service::ScanService;

/// Shared state handed to every request handler. Everything in it is read-only after startup.
pub struct AppState<P: Probe = NetworkProbe> {
    pub service: Arc<ScanService<P>>,
    pub config: Arc<AppConfig>,
}

impl<P: Probe> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: Probe + 'static> AppState<P> {
    pub fn new(service: ScanService<P>, config: AppConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}
