use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::ConflictMode;

/// Database used when a connection names none.
pub const DEFAULT_TENANT: &str = "collaboration";

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    mode: ConflictMode,
    default_tenant: String,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, mode: ConflictMode) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            mode,
            default_tenant: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn with_default_tenant(mut self, name: impl Into<String>) -> Self {
        self.default_tenant = name.into();
        self
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let stem = wal_file_stem(tenant);
        if stem.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if stem.len() > MAX_TENANT_FILE_STEM_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Two connections may race to open the same tenant; the entry API
        // makes the second one reuse the first engine.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let engine = Arc::new(Engine::new(&wal_path, self.mode)?);
                info!("opened tenant {tenant:?} at {}", wal_path.display());
                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// File stem for a tenant's WAL. Bytes outside `[a-z0-9_-]` become `%XX`
/// (upper-case hex), so distinct names never share a file, even on
/// case-insensitive filesystems, and no name can leave the data directory.
fn wal_file_stem(tenant: &str) -> String {
    let mut stem = String::with_capacity(tenant.len());
    for b in tenant.bytes() {
        match b {
            b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => stem.push(b as char),
            _ => stem.push_str(&format!("%{b:02X}")),
        }
    }
    stem
}
