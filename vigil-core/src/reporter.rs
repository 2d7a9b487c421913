//! Contract surface for the external configuration oracle.

use std::sync::Arc;
use vigil_model::ObserversConfiguration;

/// Publishes the observer roster. The publishing side (an external
/// chain-backed oracle) is out of scope; only this contract matters here.
pub trait Reporter: Send + Sync {
    /// The roster currently in force.
    fn current_configuration(&self) -> Arc<ObserversConfiguration>;
}

/// A fixed roster, for tests and static deployments.
#[derive(Debug, Clone)]
pub struct StaticReporter {
    configuration: Arc<ObserversConfiguration>,
}

impl StaticReporter {
    pub fn new(configuration: Arc<ObserversConfiguration>) -> Self {
        Self { configuration }
    }
}

impl Reporter for StaticReporter {
    fn current_configuration(&self) -> Arc<ObserversConfiguration> {
        self.configuration.clone()
    }
}
