//! Resource lock table
//!
//! Each resource is either free or exclusively owned by one transaction.
//! Locks are granted all-or-nothing for the resources a transaction names.

use std::collections::HashMap;

/// Outcome of trying to lock a set of resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// Every resource is now owned by the transaction
    Granted,
    /// Nothing was locked; `resource` is held by `holder`
    Conflict { resource: String, holder: String },
}

/// Mapping from resource name to owning transaction
#[derive(Debug, Default)]
pub struct LockTable {
    owners: HashMap<String, String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every resource for `txn`, or none of them
    ///
    /// Resources already owned by `txn` itself do not conflict.
    pub fn try_lock_all(&mut self, txn: &str, resources: &[String]) -> LockAttempt {
        for resource in resources {
            if let Some(holder) = self.owners.get(resource)
                && holder != txn
            {
                return LockAttempt::Conflict {
                    resource: resource.clone(),
                    holder: holder.clone(),
                };
            }
        }

        for resource in resources {
            self.owners.insert(resource.clone(), txn.to_string());
        }
        LockAttempt::Granted
    }

    /// Release the resources held by `txn`
    ///
    /// Resources owned by other transactions are left alone.
    pub fn release(&mut self, txn: &str, resources: &[String]) {
        for resource in resources {
            if self.owners.get(resource).is_some_and(|holder| holder == txn) {
                self.owners.remove(resource);
            }
        }
    }

    pub fn owner(&self, resource: &str) -> Option<&str> {
        self.owners.get(resource).map(String::as_str)
    }

    /// Locked resources with their owners, sorted by resource
    pub fn locked(&self) -> Vec<(String, String)> {
        let mut locked: Vec<_> = self
            .owners
            .iter()
            .map(|(resource, txn)| (resource.clone(), txn.clone()))
            .collect();
        locked.sort();
        locked
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
