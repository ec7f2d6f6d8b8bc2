use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jobwatch_core::JobKind;
use jobwatch_logging::watch_info;

use crate::backend::{HttpBackend, JobBackend};
use crate::channel::ChannelManager;
use crate::controller::JobController;
use crate::settings::ClientSettings;
use crate::types::{CancelError, JobParams, LaunchError, TransportError};

/// At most one live controller per job kind.
///
/// Every mutation goes through `launch`, `cancel` or `dispose`; a new launch
/// always disposes the previous controller of the same kind first.
pub struct JobRegistry {
    backend: Arc<dyn JobBackend>,
    channels: ChannelManager,
    heartbeat_interval: Duration,
    controllers: Mutex<HashMap<JobKind, Arc<JobController>>>,
}

impl JobRegistry {
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        let backend = Arc::new(HttpBackend::new(settings)?);
        Ok(Self::with_backend(backend, settings))
    }

    pub fn with_backend(backend: Arc<dyn JobBackend>, settings: &ClientSettings) -> Self {
        Self {
            channels: ChannelManager::new(backend.clone(), settings.poll_interval),
            backend,
            heartbeat_interval: settings.heartbeat_interval,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Replaces any controller for `kind` with a freshly started one.
    ///
    /// On error no controller for `kind` is left registered.
    pub async fn launch(
        &self,
        kind: JobKind,
        params: JobParams,
    ) -> Result<Arc<JobController>, LaunchError> {
        let previous = self.lock().remove(&kind);
        if let Some(previous) = previous {
            watch_info!("replacing running {} controller", kind);
            previous.dispose();
        }

        let controller = JobController::new(
            kind,
            self.backend.clone(),
            self.channels.clone(),
            self.heartbeat_interval,
        );
        let raced = self.lock().insert(kind, controller.clone());
        if let Some(raced) = raced {
            raced.dispose();
        }

        match controller.start(params).await {
            Ok(_) => Ok(controller),
            Err(err) => {
                self.forget(kind, &controller);
                Err(err)
            }
        }
    }

    /// The controller for `kind`, unless its job has ended or it has been
    /// disposed.
    pub fn live(&self, kind: JobKind) -> Option<Arc<JobController>> {
        let mut controllers = self.lock();
        if controllers.get(&kind).is_some_and(|c| c.is_finished()) {
            controllers.remove(&kind);
        }
        controllers.get(&kind).cloned()
    }

    /// Cancels the controller for `kind`. Returns whether there was one.
    pub async fn cancel(&self, kind: JobKind) -> Result<bool, CancelError> {
        let controller = self.lock().remove(&kind);
        match controller {
            Some(controller) => controller.cancel().await.map(|()| true),
            None => Ok(false),
        }
    }

    pub fn dispose(&self, kind: JobKind) {
        let controller = self.lock().remove(&kind);
        if let Some(controller) = controller {
            controller.dispose();
        }
    }

    pub fn dispose_all(&self) {
        let controllers: Vec<_> = self.lock().drain().map(|(_, c)| c).collect();
        for controller in controllers {
            controller.dispose();
        }
    }

    fn forget(&self, kind: JobKind, controller: &Arc<JobController>) {
        let mut controllers = self.lock();
        if controllers
            .get(&kind)
            .is_some_and(|current| Arc::ptr_eq(current, controller))
        {
            controllers.remove(&kind);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobKind, Arc<JobController>>> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
