// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Container registry
//!
//! The registry is the lifecycle root: it owns the containers of an application and starts
//! or stops all of them at once. Propagation is fail-fast; when a container fails to start or
//! stop, the containers after it are left untouched and the error is returned.
//!

use crate::{Error, container::MessageListenerContainer};

use tracing::{debug, error};

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct RegistryState {
    running: bool,
    containers: Vec<Arc<dyn MessageListenerContainer>>,
}

/// Ordered set of containers started and stopped together.
#[derive(Default)]
pub struct MessageListenerContainerRegistry {
    state: Mutex<RegistryState>,
}

impl MessageListenerContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, Error> {
        self.state
            .lock()
            .map_err(|e| Error::Lock(format!("container registry: {}", e)))
    }

    /// Registers a container.
    ///
    /// # Errors
    ///
    /// Returns `Error::Exists` if a container with the same id is registered, and
    /// `Error::Functional` if the registry is already running.
    ///
    pub fn register<C>(&self, container: C) -> Result<(), Error>
    where
        C: MessageListenerContainer,
    {
        let mut state = self.lock()?;
        if state.running {
            return Err(Error::Functional(format!(
                "Can not register container {} in a running registry",
                container.id()
            )));
        }
        if state.containers.iter().any(|c| c.id() == container.id()) {
            error!("Container '{}' already exists!", container.id());
            return Err(Error::Exists(container.id().to_owned()));
        }
        debug!("Registering container {}", container.id());
        state.containers.push(Arc::new(container));
        Ok(())
    }

    /// Looks a container up by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn MessageListenerContainer>> {
        self.lock()
            .ok()?
            .containers
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Ids of the registered containers, in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.lock()
            .map(|state| state.containers.iter().map(|c| c.id().to_owned()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.containers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts every container flagged for auto startup.
    pub fn start(&self) -> Result<(), Error> {
        debug!("Starting container registry");
        let mut state = self.lock()?;
        state.running = true;
        for container in state.containers.iter() {
            if container.auto_startup() {
                container.start()?;
            } else {
                debug!("Skipping container {}, auto startup disabled", container.id());
            }
        }
        Ok(())
    }

    /// Stops every container.
    pub fn stop(&self) -> Result<(), Error> {
        debug!("Stopping container registry");
        let mut state = self.lock()?;
        state.running = false;
        for container in state.containers.iter() {
            container.stop()?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().map(|state| state.running).unwrap_or(false)
    }
}
