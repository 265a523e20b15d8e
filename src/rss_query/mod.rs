// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Access to the RSS state a driver exposes for a network interface
//!
//! The prediction core only needs four reads: the hash key, the size of the
//! indirection table, the number of Rx queues and a single indirection
//! table entry. [`EthtoolQuery`] provides them through the `ethtool`
//! command line tool; [`DummyRssQuery`] serves them from memory.

use crate::error::Error;
use anyhow::anyhow;
use async_trait::async_trait;
use futures::lock::Mutex;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

mod ethtool;
pub use ethtool::EthtoolQuery;

/// Defines how to read the RSS state of a network interface
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RssQuery {
    /// Read the RSS hash key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the driver does not expose a hash
    /// key and [`Error::QueryFailed`] if reading it failed.
    async fn hash_key(&self, interface: &str) -> Result<Vec<u8>, Error>;

    /// Number of entries in the RSS indirection table
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] or [`Error::QueryFailed`] like
    /// [`RssQuery::hash_key`].
    async fn indir_table_size(&self, interface: &str) -> Result<u32, Error>;

    /// Number of Rx queues packets can be distributed over
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] or [`Error::QueryFailed`] like
    /// [`RssQuery::hash_key`].
    async fn queue_count(&self, interface: &str) -> Result<u32, Error>;

    /// Read the indirection table entry at `index`
    ///
    /// The entry is read freshly from the driver on every call so a
    /// reconfiguration between calls is reflected immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryFailed`] if the entry could not be read or
    /// `index` is outside the table.
    async fn indir_entry(&self, interface: &str, index: u32) -> Result<u32, Error>;
}

/// An RSS query serving configured values from memory, but still providing
/// the [`RssQuery`] trait
///
/// Useful for testing purposes or demos without an RSS-capable NIC. The
/// indirection table is shared between clones, so it can be reconfigured
/// while a prediction context holds the query.
#[derive(Clone)]
pub struct DummyRssQuery {
    key: Vec<u8>,
    indir: Arc<Mutex<Vec<u32>>>,
    queues: u32,
}

impl DummyRssQuery {
    /// Create a new `DummyRssQuery`
    ///
    /// An empty `key` makes [`RssQuery::hash_key`] report
    /// [`Error::Unsupported`], like a driver without an exposed key.
    #[must_use]
    pub fn new(key: Vec<u8>, indir: Vec<u32>, queues: u32) -> Self {
        Self {
            key,
            indir: Arc::new(Mutex::new(indir)),
            queues,
        }
    }

    /// Reconfigure the indirection table entry at `index`
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryFailed`] if `index` is outside the table.
    pub async fn set_indir_entry(&self, index: u32, queue: u32) -> Result<(), Error> {
        let mut indir = self.indir.lock().await;
        let slot = to_index(index)
            .ok()
            .and_then(|i| indir.get_mut(i))
            .ok_or_else(|| {
                Error::QueryFailed(anyhow!("indirection table has no entry {index}"))
            })?;
        *slot = queue;
        Ok(())
    }
}

#[async_trait]
impl RssQuery for DummyRssQuery {
    async fn hash_key(&self, _interface: &str) -> Result<Vec<u8>, Error> {
        if self.key.is_empty() {
            return Err(Error::Unsupported(String::from("RSS hash key")));
        }
        Ok(self.key.clone())
    }

    async fn indir_table_size(&self, _interface: &str) -> Result<u32, Error> {
        u32::try_from(self.indir.lock().await.len())
            .map_err(|source| Error::QueryFailed(source.into()))
    }

    async fn queue_count(&self, _interface: &str) -> Result<u32, Error> {
        Ok(self.queues)
    }

    async fn indir_entry(&self, interface: &str, index: u32) -> Result<u32, Error> {
        self.indir
            .lock()
            .await
            .get(to_index(index).map_err(Error::QueryFailed)?)
            .copied()
            .ok_or_else(|| {
                Error::QueryFailed(anyhow!(
                    "indirection table of {interface} has no entry {index}"
                ))
            })
    }
}

fn to_index(index: u32) -> Result<usize, anyhow::Error> {
    usize::try_from(index).map_err(Into::into)
}
