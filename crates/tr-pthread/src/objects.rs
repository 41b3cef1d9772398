//! Semaphore handle table
//!
//! Handles are plain ids. Ids start at 1 and are never reused, so a handle
//! that was destroyed can't reach a newer semaphore.

use crate::park::ParkingLot;
use crate::sync::semaphore::Semaphore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tr_core::config::SyncConfig;
use tr_core::{DiagnosticSink, SemError, StderrSink};

/// Handle type
pub type ObjectId = u32;

/// The null handle
pub const NULL_ID: ObjectId = 0;

/// Registry of live semaphores, plus the primitives they share
pub struct ObjectTable {
    next_id: AtomicU32,
    objects: RwLock<HashMap<ObjectId, Arc<Semaphore>>>,
    parking: Arc<ParkingLot>,
    diagnostics: RwLock<Arc<dyn DiagnosticSink>>,
    report_busy_destroy: bool,
}

impl ObjectTable {
    /// Create a table reporting diagnostics to stderr
    pub fn new() -> Self {
        Self::with_config(&SyncConfig::default(), Arc::new(StderrSink))
    }

    pub fn with_config(config: &SyncConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            next_id: AtomicU32::new(1), // 0 is the null handle
            objects: RwLock::new(HashMap::new()),
            parking: Arc::new(ParkingLot::new()),
            diagnostics: RwLock::new(diagnostics),
            report_busy_destroy: config.report_busy_destroy,
        }
    }

    /// Generate a new unique object ID
    ///
    /// Fails with `NoSpace` once the id space is used up; ids never wrap
    /// back to the null handle.
    pub fn next_id(&self) -> Result<ObjectId, SemError> {
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map_err(|_| SemError::NoSpace)
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, id: ObjectId) {
        self.next_id.store(id, Ordering::Relaxed);
    }

    /// Park/wake primitive shared by the table's semaphores
    pub fn parking(&self) -> &Arc<ParkingLot> {
        &self.parking
    }

    pub fn diagnostics(&self) -> Arc<dyn DiagnosticSink> {
        self.diagnostics.read().clone()
    }

    /// Redirect diagnostic text, e.g. once stdio has been set up
    pub fn set_diagnostics(&self, sink: Arc<dyn DiagnosticSink>) {
        *self.diagnostics.write() = sink;
    }

    pub fn report_busy_destroy(&self) -> bool {
        self.report_busy_destroy
    }

    /// Register a semaphore under its id
    pub fn register(&self, semaphore: Arc<Semaphore>) -> ObjectId {
        let id = semaphore.id();
        self.objects.write().insert(id, semaphore);
        id
    }

    /// Unregister a semaphore
    pub fn unregister(&self, id: ObjectId) -> Result<Arc<Semaphore>, SemError> {
        self.objects
            .write()
            .remove(&id)
            .ok_or(SemError::InvalidArgument)
    }

    /// Look up a semaphore; the null handle and unknown ids are invalid
    pub fn get(&self, id: ObjectId) -> Result<Arc<Semaphore>, SemError> {
        if id == NULL_ID {
            return Err(SemError::InvalidArgument);
        }
        self.objects
            .read()
            .get(&id)
            .cloned()
            .ok_or(SemError::InvalidArgument)
    }

    /// Check if an object exists
    pub fn exists(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Get count of objects
    pub fn count(&self) -> usize {
        self.objects.read().len()
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::semaphore::SemKind;

    fn make(table: &ObjectTable, value: u32) -> Arc<Semaphore> {
        let id = table.next_id().unwrap();
        Arc::new(Semaphore::new(id, SemKind::Private, value, Arc::clone(table.parking())).unwrap())
    }

    #[test]
    fn test_object_table() {
        let table = ObjectTable::new();

        let sem = make(&table, 1);
        let id = table.register(Arc::clone(&sem));

        assert!(table.exists(id));
        assert_eq!(table.count(), 1);

        let retrieved = table.get(id).unwrap();
        assert_eq!(retrieved.id(), id);

        table.unregister(id).unwrap();
        assert!(!table.exists(id));
        assert_eq!(table.count(), 0);
        assert_eq!(table.get(id).err(), Some(SemError::InvalidArgument));
    }

    #[test]
    fn test_null_and_unknown_ids() {
        let table = ObjectTable::new();
        assert_eq!(table.get(NULL_ID).err(), Some(SemError::InvalidArgument));
        assert_eq!(table.get(42).err(), Some(SemError::InvalidArgument));
        assert_eq!(table.unregister(42).err(), Some(SemError::InvalidArgument));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let table = ObjectTable::new();
        let first = table.register(make(&table, 0));
        table.unregister(first).unwrap();
        let second = table.register(make(&table, 0));
        assert_ne!(first, second);
        assert_ne!(first, NULL_ID);
    }

    #[test]
    fn test_id_space_exhaustion() {
        let table = ObjectTable::new();
        table.set_next_id(ObjectId::MAX - 1);

        assert_eq!(table.next_id(), Ok(ObjectId::MAX - 1));
        assert_eq!(table.next_id(), Err(SemError::NoSpace));
        assert_eq!(table.next_id(), Err(SemError::NoSpace));
    }
}
