// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Predict the Rx queue an interface selects for a flow
//!
//! An [`RssContext`] is prepared once per interface under test: it reads
//! the hash key, the indirection table size and the Rx queue count and
//! expands the key into a [`ToeplitzCache`](crate::toeplitz::ToeplitzCache).
//! Each [`RssContext::predict`] then hashes a flow, derives the indirection
//! table index and re-reads the table entry at that index from the driver,
//! so predictions always reflect the latest table configuration.
//!
//! ```
//! use rsspredict::predictor::RssContext;
//! use rsspredict::rss_query::DummyRssQuery;
//! use rsspredict::toeplitz::HashVariant;
//!
//! use futures::lock::Mutex;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let query = DummyRssQuery::new(vec![0x6d; 40], vec![0, 1, 0, 1], 2);
//! let ctx = RssContext::prepare(Arc::new(Mutex::new(query)), "eth0", HashVariant::Toeplitz)
//!     .await?;
//! let prediction = ctx
//!     .predict("192.0.2.1:1234".parse()?, "198.51.100.2:80".parse()?)
//!     .await?;
//! assert_eq!(prediction.index, prediction.hash % 4);
//! # Ok::<(), anyhow::Error>(())
//! # });
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::Error;
use crate::rss_query::RssQuery;
use crate::toeplitz::{HashVariant, ToeplitzCache};
use anyhow::anyhow;
use futures::lock::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Predicted RSS processing of one flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Prediction {
    /// Toeplitz hash of the flow
    pub hash: u32,

    /// Indirection table index, always `hash % indir_table_size`
    pub index: u32,

    /// Rx queue configured at that table entry when the prediction was made
    pub queue: u32,
}

/// Per-interface state needed to predict Rx queues
///
/// Prepared once, then used for any number of sequential predictions and
/// finally released (explicitly via [`RssContext::release`] or implicitly
/// by dropping it).
pub struct RssContext {
    query: Arc<Mutex<dyn RssQuery + Send>>,
    interface: String,
    variant: HashVariant,
    key: Vec<u8>,
    indir_size: u32,
    queue_count: u32,
    cache: Option<ToeplitzCache>,
}

impl RssContext {
    /// Prepare a context for `interface`
    ///
    /// Reads hash key, indirection table size and Rx queue count once and
    /// expands the key into the hash cache. `variant` selects the hash
    /// input layout; it is passed explicitly and can be taken from
    /// [`EthtoolQuery::hash_variant`](crate::rss_query::EthtoolQuery::hash_variant).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] or [`Error::QueryFailed`] from the
    /// driver reads, [`Error::QueryFailed`] for an empty indirection table
    /// and [`Error::OutOfMemory`] if the hash cache cannot be allocated.
    pub async fn prepare(
        query: Arc<Mutex<dyn RssQuery + Send>>,
        interface: &str,
        variant: HashVariant,
    ) -> Result<Self, Error> {
        let (key, indir_size, queue_count) = {
            let locked_query = query.lock().await;
            let key = locked_query.hash_key(interface).await?;
            let indir_size = locked_query.indir_table_size(interface).await?;
            let queue_count = locked_query.queue_count(interface).await?;
            (key, indir_size, queue_count)
        };

        if indir_size == 0 {
            return Err(Error::QueryFailed(anyhow!(
                "indirection table of {interface} is empty"
            )));
        }

        let cache = ToeplitzCache::new(&key)?;

        Ok(Self {
            query,
            interface: String::from(interface),
            variant,
            key,
            indir_size,
            queue_count,
            cache: Some(cache),
        })
    }

    /// Predict hash, indirection table index and Rx queue for a flow from
    /// `src` to `dst`
    ///
    /// The indirection table entry is re-read from the driver on every
    /// call; a concurrent reconfiguration may race with the read, the
    /// caller gets whichever entry the driver reported. A queue id beyond
    /// the reported queue count is returned as-is, with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] after [`RssContext::release`],
    /// hash errors from
    /// [`ToeplitzCache::hash_flow`](crate::toeplitz::ToeplitzCache::hash_flow)
    /// and [`Error::QueryFailed`] from the table read.
    pub async fn predict(&self, src: SocketAddr, dst: SocketAddr) -> Result<Prediction, Error> {
        let cache = self.cache.as_ref().ok_or(Error::InvalidState)?;

        let hash = cache.hash_flow(&src, &dst, self.variant)?;

        let index = hash.checked_rem(self.indir_size).ok_or_else(|| {
            Error::QueryFailed(anyhow!("indirection table of {} is empty", self.interface))
        })?;

        let queue = self
            .query
            .lock()
            .await
            .indir_entry(&self.interface, index)
            .await?;

        if queue >= self.queue_count {
            log::warn!(
                "Indirection table entry {index} of {} references queue {queue}, but only {} Rx queues are reported",
                self.interface,
                self.queue_count
            );
        }

        Ok(Prediction { hash, index, queue })
    }

    /// Replace the hash key used for predictions
    ///
    /// Only the context is updated; pushing the key to the driver is a
    /// separate step owned by the caller. The new cache is built before the
    /// old one is dropped, so the context stays usable if this fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] after [`RssContext::release`] and
    /// [`Error::OutOfMemory`] if the new cache cannot be allocated.
    pub fn change_key(&mut self, new_key: &[u8]) -> Result<(), Error> {
        if self.cache.is_none() {
            return Err(Error::InvalidState);
        }

        let cache = ToeplitzCache::new(new_key)?;
        self.key = new_key.to_vec();
        self.cache = Some(cache);
        Ok(())
    }

    /// Release hash key and cache
    ///
    /// Any later [`RssContext::predict`] or [`RssContext::change_key`]
    /// fails with [`Error::InvalidState`]. Dropping the context releases
    /// the same resources implicitly.
    pub fn release(&mut self) {
        self.cache = None;
        self.key.clear();
    }

    /// Interface this context was prepared for
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Hash input layout variant used for predictions
    #[must_use]
    pub const fn variant(&self) -> HashVariant {
        self.variant
    }

    /// Hash key currently used for predictions (empty after release)
    #[must_use]
    pub fn hash_key(&self) -> &[u8] {
        &self.key
    }

    /// Size of the indirection table read at preparation time
    #[must_use]
    pub const fn indir_table_size(&self) -> u32 {
        self.indir_size
    }

    /// Number of Rx queues read at preparation time
    #[must_use]
    pub const fn queue_count(&self) -> u32 {
        self.queue_count
    }
}
