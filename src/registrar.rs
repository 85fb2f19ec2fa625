// src/registrar.rs

//! RPC registrar collaborator.
//!
//! A service that declares an address is registered once it reaches
//! `Running` so the proxy layer can route requests to it, and deregistered
//! during its teardown.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, service: &str, address: &str) -> anyhow::Result<()>;
    async fn deregister(&self, service: &str) -> anyhow::Result<()>;
}

/// In-memory id → address map.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<BTreeMap<String, String>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address_of(&self, service: &str) -> Option<String> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.get(service).cloned()
    }

    pub fn routes(&self) -> BTreeMap<String, String> {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Registrar for RouteTable {
    async fn register(&self, service: &str, address: &str) -> anyhow::Result<()> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(service.to_string(), address.to_string());
        debug!(service, address, "route registered");
        Ok(())
    }

    async fn deregister(&self, service: &str) -> anyhow::Result<()> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes.remove(service).is_some() {
            debug!(service, "route removed");
        }
        Ok(())
    }
}
