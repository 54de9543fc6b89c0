use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::registry::{Package, Registry};
use tracing::{error, info};

/// Enable or disable one package and persist the change. The whole kind is
/// rescanned first so the operation sees current on-disk state.
pub fn change_enable<P: Package>(config: &Config, id: &str, enabled: bool) -> Result<()> {
    let mut registry = scanned_registry::<P>(config)?;
    if !registry.contains(id) {
        return Err(MirrorError::PackageNotFound(id.to_string()));
    }
    registry.change_enable(id, enabled);
    info!(
        "{} {} {}",
        P::KIND,
        id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Print every record of one kind: sequence, name, id, state, and each
/// recorded error in order.
pub fn list<P: Package>(config: &Config) -> Result<()> {
    let registry = scanned_registry::<P>(config)?;
    info!("Listing all {}s...", P::KIND);

    let mut records: Vec<_> = registry.records().collect();
    records.sort_by_key(|(_, record)| record.sequence);

    for (id, record) in records {
        let name = &record.metadata.meta().name;
        if record.errors.is_empty() {
            if record.enabled {
                info!("{}. {}({}): Enabled", record.sequence, name, id);
            } else {
                info!("-. {}({}): Disabled", name, id);
            }
        } else {
            error!("-. {}({}): Error-Disabled", name, id);
            for (index, issue) in record.errors.iter().enumerate() {
                error!("   ({}): {}", index + 1, issue);
            }
        }
    }
    Ok(())
}

/// Disable a package, delete its folder from disk and persist.
pub fn remove<P: Package>(config: &Config, id: &str) -> Result<()> {
    let mut registry = scanned_registry::<P>(config)?;
    if !registry.contains(id) {
        return Err(MirrorError::PackageNotFound(id.to_string()));
    }
    registry.remove(id)?;
    info!("{} {} removed", P::KIND, id);
    Ok(())
}

fn scanned_registry<P: Package>(config: &Config) -> Result<Registry<P>> {
    let mut registry = Registry::new(&config.data_dir, config.alternate_prefixes());
    registry.scan()?;
    Ok(registry)
}
