use super::is_port_available;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Finds free TCP ports for PHP servers.
///
/// The OS is the source of truth for whether a port is in use; the allocator
/// only remembers which site is about to bind (or has bound) which port, so
/// two sites starting at the same time cannot both pick the same candidate.
/// Nothing is persisted: after a restart every port is re-verified.
pub struct PortAllocator {
    range_start: u16,
    scan_window: u16,
    /// port -> site id
    reserved: Mutex<HashMap<u16, String>>,
}

impl PortAllocator {
    pub fn new(range_start: u16, scan_window: u16) -> Self {
        Self {
            range_start,
            scan_window: scan_window.max(1),
            reserved: Mutex::new(HashMap::new()),
        }
    }

    fn candidates(&self) -> impl Iterator<Item = u16> {
        let end = self.range_start.saturating_add(self.scan_window - 1);
        self.range_start..=end
    }

    /// First free port in the scan window that is not in `excluded` and not
    /// reserved. Nothing is reserved by this call.
    pub fn allocate(&self, excluded: &HashSet<u16>) -> Result<u16> {
        let reserved = self.reserved.lock();
        self.scan(excluded, &reserved)
    }

    fn scan(&self, excluded: &HashSet<u16>, reserved: &HashMap<u16, String>) -> Result<u16> {
        self.candidates()
            .find(|port| {
                !excluded.contains(port) && !reserved.contains_key(port) && is_port_available(*port)
            })
            .ok_or_else(|| {
                Error::PortAllocation(format!(
                    "no free port in {}..={}",
                    self.range_start,
                    self.range_start.saturating_add(self.scan_window - 1)
                ))
            })
    }

    /// Reserve a port for `site_id`, keeping `preferred` when it is still usable.
    ///
    /// `preferred` is kept if this site already holds it, or if no other site
    /// holds it and it binds at the OS level. Otherwise the next free port in
    /// the window is reserved instead.
    pub fn reserve(&self, site_id: &str, preferred: u16, excluded: &HashSet<u16>) -> Result<u16> {
        let mut reserved = self.reserved.lock();
        match reserved.get(&preferred) {
            Some(owner) if owner == site_id => return Ok(preferred),
            Some(_) => {}
            None => {
                if !excluded.contains(&preferred) && is_port_available(preferred) {
                    reserved.insert(preferred, site_id.to_string());
                    return Ok(preferred);
                }
            }
        }

        let port = self.scan(excluded, &reserved)?;
        debug!(
            "Port {} unavailable for {}, reassigned to {}",
            preferred, site_id, port
        );
        reserved.insert(port, site_id.to_string());
        Ok(port)
    }

    pub fn release_site(&self, site_id: &str) {
        self.reserved.lock().retain(|_, owner| owner != site_id);
    }
}
