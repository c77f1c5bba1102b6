//! The statically maintained handler list.
//!
//! Adding a handler means adding its factory here; the registry and the
//! worker's task-name lookup are both built from this list.

use std::collections::BTreeMap;
use std::sync::Arc;

use dispatch::{HandlerFactory, HandlerRegistry, TaskName};

use crate::allowlist::Allowlist;
use crate::backend::Backend;
use crate::bodhi::BodhiUpdateFactory;
use crate::copr::{CoprBuildEndFactory, CoprBuildFactory};
use crate::distgit::{ProposeDownstreamFactory, SyncFromDownstreamFactory};
use crate::koji::{KojiBuildFactory, KojiTaskReportFactory, UpstreamKojiBuildFactory};
use crate::testing_farm::{TestingFarmFactory, TestingFarmResultsFactory};

/// Every built-in handler factory, in a fixed order.
pub fn default_factories(
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
) -> Vec<Arc<dyn HandlerFactory>> {
    vec![
        // Builds; prerequisite of tests
        Arc::new(CoprBuildFactory::new(backend.clone(), allowlist.clone())),
        Arc::new(CoprBuildEndFactory::new(backend.clone())),
        // Tests
        Arc::new(TestingFarmFactory::new(backend.clone(), allowlist.clone())),
        Arc::new(TestingFarmResultsFactory::new(backend.clone())),
        // Upstream Koji
        Arc::new(UpstreamKojiBuildFactory::new(backend.clone(), allowlist.clone())),
        Arc::new(KojiTaskReportFactory::new(backend.clone())),
        // Downstream
        Arc::new(ProposeDownstreamFactory::new(backend.clone(), allowlist)),
        Arc::new(SyncFromDownstreamFactory::new(backend.clone())),
        Arc::new(KojiBuildFactory::new(backend.clone())),
        Arc::new(BodhiUpdateFactory::new(backend)),
    ]
}

/// Assembles the registry from the factories' descriptors.
pub fn default_registry(factories: &[Arc<dyn HandlerFactory>]) -> HandlerRegistry {
    factories
        .iter()
        .fold(HandlerRegistry::builder(), |builder, factory| {
            builder.register(factory.descriptor())
        })
        .build()
}

/// Indexes the factories by the task name they are delivered under.
pub fn factories_by_task_name(
    factories: &[Arc<dyn HandlerFactory>],
) -> BTreeMap<TaskName, Arc<dyn HandlerFactory>> {
    factories
        .iter()
        .map(|factory| (factory.task_name(), factory.clone()))
        .collect()
}
