use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use tracing::info;

/// Builds a model for a size name such as `base`.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + 'static;

    fn load(&self, size: &str) -> Result<Self::Model>;
}

struct Resident<M> {
    size: String,
    model: Arc<Mutex<M>>,
}

/// Holds at most one loaded model for the whole process.
///
/// Asking for another size replaces the resident model. Requests that already hold the
/// previous model keep their `Arc` until they are done with it, so a swap never pulls a
/// model out from under a running inference.
pub struct ModelCache<L: ModelLoader> {
    loader: L,
    resident: Mutex<Option<Resident<L::Model>>>,
}

impl<L: ModelLoader> ModelCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            resident: Mutex::new(None),
        }
    }

    /// Blocks while another caller is loading. A failed load keeps the previous model.
    pub fn get_or_load(&self, size: &str) -> Result<Arc<Mutex<L::Model>>> {
        let mut resident = self.lock()?;
        if let Some(current) = resident.as_ref().filter(|current| current.size == size) {
            return Ok(current.model.clone());
        }

        let previous = resident.as_ref().map(|current| current.size.clone());
        info!(size, ?previous, "Loading model into cache");
        let model = Arc::new(Mutex::new(self.loader.load(size)?));
        *resident = Some(Resident {
            size: size.to_string(),
            model: model.clone(),
        });
        Ok(model)
    }

    /// Size of the resident model. Never waits, so it reports `None` while a load holds the lock.
    pub fn resident_size(&self) -> Option<String> {
        let resident = self.resident.try_lock().ok()?;
        resident.as_ref().map(|current| current.size.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Resident<L::Model>>>> {
        self.resident
            .lock()
            .map_err(|_| anyhow!("Model cache lock poisoned"))
    }
}
