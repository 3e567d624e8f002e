//! Backend registry for lookup by platform name.

use crate::backend::{Backend, DynBackend};
use crate::python::PythonBackend;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: Vec<DynBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register(PythonBackend::new());
        registry
    }

    pub fn register<B>(&mut self, backend: B)
    where
        B: Backend + 'static,
    {
        self.backends.push(Arc::new(backend));
    }

    pub fn backends(&self) -> &[DynBackend] {
        &self.backends
    }

    pub fn find(&self, name: &str) -> Option<DynBackend> {
        self.backends
            .iter()
            .find(|backend| backend.name() == name)
            .map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }
}
