// Process-wide controller registry
//
// The global registry is created on first use and lives until process exit.
// Only add/get are exposed so a name can never be bound to a second controller.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::controller::{Controller, PollPeriods};
use super::error::{Result, XdError};
use super::protocol::Transport;

static REGISTRY: Lazy<ControllerRegistry> = Lazy::new(ControllerRegistry::new);

/// The process-wide registry
pub fn registry() -> &'static ControllerRegistry {
    &REGISTRY
}

#[derive(Default)]
pub struct ControllerRegistry {
    controllers: Mutex<HashMap<String, Arc<Controller>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Controller>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.controllers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create and register a controller on a serial port
    ///
    /// A second call with an existing name is a no-op that returns the
    /// registered instance.
    pub fn add_controller(
        &self,
        name: &str,
        port_name: &str,
        baudrate: u32,
        axis_count: usize,
        periods: PollPeriods,
    ) -> Result<Arc<Controller>> {
        self.add_with(name, || {
            Controller::open(name, port_name, baudrate, axis_count, periods)
        })
    }

    /// Create and register a controller on a transport built by `connect`
    ///
    /// `connect` only runs when the name is not yet registered.
    pub fn add_controller_with_transport(
        &self,
        name: &str,
        axis_count: usize,
        periods: PollPeriods,
        connect: impl FnOnce() -> Result<Box<dyn Transport>>,
    ) -> Result<Arc<Controller>> {
        self.add_with(name, || {
            Controller::with_transport(name, connect()?, axis_count, periods)
        })
    }

    // The map stays locked during construction so concurrent adds of one name
    // open the device only once. A failed construction registers nothing.
    fn add_with(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<Controller>,
    ) -> Result<Arc<Controller>> {
        let mut controllers = self.lock();
        if let Some(existing) = controllers.get(name) {
            warn!("Controller '{}' already exists, ignoring", name);
            return Ok(Arc::clone(existing));
        }
        let controller = Arc::new(create()?);
        controllers.insert(name.to_string(), Arc::clone(&controller));
        info!("Registered controller '{}'", name);
        Ok(controller)
    }

    pub fn get_controller(&self, name: &str) -> Result<Arc<Controller>> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| XdError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xd::error::ErrorKind;
    use crate::xd::mock_serial::MockSerial;
    use crate::xd::protocol::LineTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock_transport() -> Result<Box<dyn Transport>> {
        Ok(Box::new(LineTransport::new(MockSerial::new())))
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let registry = ControllerRegistry::new();
        let err = registry.get_controller("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_second_add_is_noop() {
        let registry = ControllerRegistry::new();
        let first = registry
            .add_controller_with_transport("XD1", 1, PollPeriods::default(), mock_transport)
            .unwrap();
        let second = registry
            .add_controller_with_transport("XD1", 3, PollPeriods::default(), || {
                panic!("must not reconnect an existing controller")
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.axis_count(), 1);
        assert_eq!(registry.names(), vec!["XD1"]);
    }

    #[test]
    fn test_failed_creation_registers_nothing() {
        let registry = ControllerRegistry::new();
        let err = registry
            .add_controller_with_transport("XD1", 1, PollPeriods::default(), || {
                Err(XdError::InvalidAxisCount { count: 0, max: 12 })
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(registry.get_controller("XD1").is_err());

        // bad axis count also leaves the name free
        assert!(
            registry
                .add_controller_with_transport("XD1", 13, PollPeriods::default(), mock_transport)
                .is_err()
        );
        assert!(registry.names().is_empty());

        registry
            .add_controller_with_transport("XD1", 2, PollPeriods::default(), mock_transport)
            .unwrap();
        assert_eq!(registry.get_controller("XD1").unwrap().axis_count(), 2);
    }

    #[test]
    fn test_concurrent_adds_create_one_instance() {
        let registry = Arc::new(ControllerRegistry::new());
        let connects = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let connects = Arc::clone(&connects);
                std::thread::spawn(move || {
                    registry
                        .add_controller_with_transport("XD1", 1, PollPeriods::default(), || {
                            connects.fetch_add(1, Ordering::SeqCst);
                            mock_transport()
                        })
                        .unwrap()
                })
            })
            .collect();

        let controllers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(controllers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_bad_port_leaves_registry_clean() {
        let registry = ControllerRegistry::new();
        let result = registry.add_controller(
            "XD-missing",
            "/dev/does-not-exist-xd",
            115_200,
            1,
            PollPeriods::default(),
        );
        assert!(result.is_err());
        assert!(registry.get_controller("XD-missing").is_err());
    }

    #[test]
    fn test_global_registry_is_shared() {
        registry()
            .add_controller_with_transport("global-test", 1, PollPeriods::default(), mock_transport)
            .unwrap();
        assert!(registry().get_controller("global-test").is_ok());
    }
}
