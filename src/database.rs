//! Abstract bucketed key/value storage interface
//!
//! The protocol core owns no database lifetime.  The host opens a
//! transaction, hands it in through these traits, and commits or aborts it
//! together with the rest of the block application.  An in-memory
//! implementation backs the test suites.

use crate::error::StoreError;
use std::collections::BTreeMap;

/// A named namespace of key/value pairs inside a transaction.
pub trait KvBucket {
    /// Returns the value stored under the key, if any.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Stores a value under the key, replacing any existing value.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes the key.  Removing an absent key is a no-op.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Invokes the closure for every key/value pair in byte-wise key
    /// order.  The first error aborts the iteration and is returned.
    fn for_each(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

/// A database transaction exposing the metadata bucket namespace.
///
/// All writes performed through one transaction must be committed or
/// aborted atomically by the host.
pub trait KvTx {
    /// Returns the named bucket for reading, or `None` when it does not
    /// exist.
    fn bucket(&self, name: &[u8]) -> Option<&dyn KvBucket>;

    /// Returns the named bucket for writing, or `None` when it does not
    /// exist.
    fn bucket_mut(&mut self, name: &[u8]) -> Option<&mut dyn KvBucket>;

    /// Creates the named bucket.  Fails if it already exists.
    fn create_bucket(&mut self, name: &[u8]) -> Result<&mut dyn KvBucket, StoreError>;

    /// Deletes the named bucket and everything in it.  Fails if it does
    /// not exist.
    fn delete_bucket(&mut self, name: &[u8]) -> Result<(), StoreError>;
}

/// An in-memory transaction backed by ordered maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryTx {
    buckets: BTreeMap<Vec<u8>, MemoryBucket>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryBucket {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryTx {
    pub fn new() -> MemoryTx {
        MemoryTx::default()
    }

    /// Returns a snapshot of a bucket's contents for comparisons in tests.
    pub fn bucket_snapshot(&self, name: &[u8]) -> Option<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.buckets.get(name).map(|b| b.entries.clone())
    }
}

impl KvBucket for MemoryBucket {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn for_each(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        for (key, value) in &self.entries {
            f(key, value)?;
        }
        Ok(())
    }
}

impl KvTx for MemoryTx {
    fn bucket(&self, name: &[u8]) -> Option<&dyn KvBucket> {
        self.buckets.get(name).map(|b| b as &dyn KvBucket)
    }

    fn bucket_mut(&mut self, name: &[u8]) -> Option<&mut dyn KvBucket> {
        self.buckets.get_mut(name).map(|b| b as &mut dyn KvBucket)
    }

    fn create_bucket(&mut self, name: &[u8]) -> Result<&mut dyn KvBucket, StoreError> {
        if self.buckets.contains_key(name) {
            return Err(StoreError::BucketExists(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let bucket = self.buckets.entry(name.to_vec()).or_default();
        Ok(bucket as &mut dyn KvBucket)
    }

    fn delete_bucket(&mut self, name: &[u8]) -> Result<(), StoreError> {
        if self.buckets.remove(name).is_none() {
            return Err(StoreError::BucketNotFound(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        Ok(())
    }
}
