//! Factory and live-instance registries.
//!
//! The global factory table is written once at first use (the built-in
//! collectors register during initialisation) and read-many afterwards. Each
//! Manager additionally owns a live registry of instantiated collectors,
//! indexed separately for the point and continuous variants.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{ContinuousCollector, MetricKind, PointCollector};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};

/// Builds a fresh continuous collector instance for one metric kind. Point
/// collectors are promoted through the adapters before registration.
pub type CollectorFactory = fn(&CollectionConfig) -> Result<Box<dyn ContinuousCollector>>;

static FACTORIES: Lazy<RwLock<HashMap<MetricKind, CollectorFactory>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    crate::collectors::register_builtins(&mut map);
    RwLock::new(map)
});

/// Insert a factory, panicking on a duplicate kind. Exposed for the built-in
/// registration path and for out-of-tree collectors registered at init.
pub fn register_into(
    map: &mut HashMap<MetricKind, CollectorFactory>,
    kind: MetricKind,
    factory: CollectorFactory,
) {
    if map.insert(kind, factory).is_some() {
        panic!("collector factory for kind {kind} registered twice");
    }
}

/// Register an additional factory into the global table. Panics on duplicate.
pub fn register(kind: MetricKind, factory: CollectorFactory) {
    let mut map = FACTORIES.write().unwrap();
    register_into(&mut map, kind, factory);
}

pub fn lookup(kind: MetricKind) -> Option<CollectorFactory> {
    FACTORIES.read().unwrap().get(&kind).copied()
}

pub fn registered_kinds() -> Vec<MetricKind> {
    let mut kinds: Vec<MetricKind> = FACTORIES.read().unwrap().keys().copied().collect();
    kinds.sort();
    kinds
}

/// Resolve a factory and build an instance.
pub fn build(kind: MetricKind, config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    let factory =
        lookup(kind).ok_or_else(|| AgentError::not_found(format!("collector factory {kind}")))?;
    factory(config)
}

/// Instantiated collectors owned by one Manager. A kind may live in the
/// point table or the continuous table, never both.
#[derive(Default)]
pub struct LiveRegistry {
    point: HashMap<MetricKind, Arc<dyn PointCollector>>,
    continuous: HashMap<MetricKind, Box<dyn ContinuousCollector>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, collector: Arc<dyn PointCollector>) -> Result<()> {
        let kind = collector.kind();
        self.check_vacant(kind)?;
        self.point.insert(kind, collector);
        Ok(())
    }

    pub fn add_continuous(&mut self, collector: Box<dyn ContinuousCollector>) -> Result<()> {
        let kind = collector.kind();
        self.check_vacant(kind)?;
        self.continuous.insert(kind, collector);
        Ok(())
    }

    fn check_vacant(&self, kind: MetricKind) -> Result<()> {
        if self.point.contains_key(&kind) || self.continuous.contains_key(&kind) {
            return Err(AgentError::config(format!(
                "collector kind {kind} is already registered"
            )));
        }
        Ok(())
    }

    pub fn point(&self, kind: MetricKind) -> Option<&Arc<dyn PointCollector>> {
        self.point.get(&kind)
    }

    pub fn continuous_mut(&mut self, kind: MetricKind) -> Option<&mut Box<dyn ContinuousCollector>> {
        self.continuous.get_mut(&kind)
    }

    pub fn continuous_iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&MetricKind, &mut Box<dyn ContinuousCollector>)> {
        self.continuous.iter_mut()
    }

    pub fn continuous_iter(
        &self,
    ) -> impl Iterator<Item = (&MetricKind, &Box<dyn ContinuousCollector>)> {
        self.continuous.iter()
    }

    pub fn kinds(&self) -> Vec<MetricKind> {
        let mut kinds: Vec<MetricKind> = self
            .point
            .keys()
            .chain(self.continuous.keys())
            .copied()
            .collect();
        kinds.sort();
        kinds
    }
}
