//! The publish/subscribe bus: exact-channel and pattern-channel
//! subscription registries and message broadcast.
//!
//! Both registries live behind a single mutex, so every mutation and every
//! publish iteration is serialized. Deliveries go through each subscriber's
//! outbox channel; a send to a closed outbox means the connection is gone
//! and the message is dropped silently.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::pattern::Pattern;
use crate::resp::RespValue;

/// Encoded frames travel to a connection through its outbox.
pub type Outbox = mpsc::UnboundedSender<Vec<u8>>;

struct PatternSubscribers {
    pattern: Pattern,
    subscribers: HashMap<u64, Outbox>,
}

#[derive(Default)]
struct BusInner {
    channels: HashMap<Vec<u8>, HashMap<u64, Outbox>>,
    patterns: HashMap<Vec<u8>, PatternSubscribers>,
}

#[derive(Default)]
pub struct PubSubBus {
    inner: parking_lot::Mutex<BusInner>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &[u8], client: u64, outbox: Outbox) {
        let mut inner = self.inner.lock();
        inner
            .channels
            .entry(channel.to_vec())
            .or_default()
            .insert(client, outbox);
    }

    pub fn unsubscribe(&self, channel: &[u8], client: u64) {
        let mut inner = self.inner.lock();

        let now_empty = match inner.channels.get_mut(channel) {
            Some(subscribers) => {
                subscribers.remove(&client);
                subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            inner.channels.remove(channel);
        }
    }

    /// Registers a pattern subscription keyed by the pattern's source bytes.
    pub fn psubscribe(&self, source: &[u8], pattern: Pattern, client: u64, outbox: Outbox) {
        let mut inner = self.inner.lock();
        inner
            .patterns
            .entry(source.to_vec())
            .or_insert_with(|| PatternSubscribers {
                pattern,
                subscribers: HashMap::new(),
            })
            .subscribers
            .insert(client, outbox);
    }

    pub fn punsubscribe(&self, source: &[u8], client: u64) {
        let mut inner = self.inner.lock();

        let now_empty = match inner.patterns.get_mut(source) {
            Some(entry) => {
                entry.subscribers.remove(&client);
                entry.subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            inner.patterns.remove(source);
        }
    }

    /// Drops every subscription a disconnected client still holds.
    pub fn remove_client(&self, client: u64) {
        let mut inner = self.inner.lock();

        inner.channels.retain(|_, subscribers| {
            subscribers.remove(&client);
            !subscribers.is_empty()
        });
        inner.patterns.retain(|_, entry| {
            entry.subscribers.remove(&client);
            !entry.subscribers.is_empty()
        });
    }

    /// Delivers `message` to every exact subscriber of `channel` and every
    /// subscriber of a matching pattern. Returns the number of deliveries;
    /// a client subscribed through several routes is counted once per
    /// matching subscription.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let inner = self.inner.lock();
        let mut delivered = 0;

        if let Some(subscribers) = inner.channels.get(channel) {
            let payload = RespValue::Array(vec![
                RespValue::bulk(&b"message"[..]),
                RespValue::bulk(channel.to_vec()),
                RespValue::bulk(message.to_vec()),
            ])
            .encode();

            for outbox in subscribers.values() {
                let _ = outbox.send(payload.clone());
                delivered += 1;
            }
        }

        for (source, entry) in &inner.patterns {
            if !entry.pattern.matches(channel) {
                continue;
            }

            let payload = RespValue::Array(vec![
                RespValue::bulk(&b"pmessage"[..]),
                RespValue::bulk(source.clone()),
                RespValue::bulk(channel.to_vec()),
                RespValue::bulk(message.to_vec()),
            ])
            .encode();

            for outbox in entry.subscribers.values() {
                let _ = outbox.send(payload.clone());
                delivered += 1;
            }
        }

        delivered
    }

    /// Channels with at least one exact subscriber, optionally filtered.
    pub fn active_channels(&self, filter: Option<&Pattern>) -> Vec<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .channels
            .keys()
            .filter(|channel| filter.is_none_or(|pattern| pattern.matches(channel)))
            .cloned()
            .collect()
    }

    /// Exact-subscriber count of one channel.
    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        let inner = self.inner.lock();
        inner
            .channels
            .get(channel)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Number of distinct patterns with at least one subscriber.
    pub fn pattern_count(&self) -> usize {
        self.inner.lock().patterns.len()
    }
}
