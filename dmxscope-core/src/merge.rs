//! sACN multi-source arbitration.
//!
//! sACN permits several independent senders to target the same universe at
//! once. Without arbitration, downstream consumers would see channel data
//! flicker between unrelated transmitters. [`SourceRegistry`] implements
//! classic highest-priority-wins merging: it tracks every transmitter seen
//! on one universe stream and lets exactly one of them (the active source)
//! through. This is deliberately simpler than E1.31's per-channel HTP merge;
//! sources are switched wholesale.
//!
//! The registry is pure state: the caller injects the clock (`now_ms`) and
//! drives the periodic cleanup sweep, so the whole policy is testable
//! without timers.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::SocketAddrV4;

use crate::dmx::SacnSourceInfo;
use crate::protocol::sacn::percent_to_dmx;

/// How often the owner should call [`SourceRegistry::sweep`]
pub const SWEEP_PERIOD_MS: u64 = 1000;

/// A source unseen for longer than this is dropped by the sweep
pub const SOURCE_TIMEOUT_MS: u64 = 5000;

/// One decoded sACN payload as delivered by a packet decoder.
///
/// Levels are percentages (0.0 to 100.0) per channel; the registry converts
/// the active source's levels back to DMX values on emission.
#[derive(Clone, Debug)]
pub struct SourceFrame<'a> {
    /// 1-indexed sACN universe the payload addressed
    pub universe: u16,
    pub levels: &'a [f32],
    pub name: &'a str,
    pub cid: Option<&'a [u8; 16]>,
    pub address: Option<SocketAddrV4>,
    /// 0-200, higher wins
    pub priority: u8,
    pub sequence: Option<u8>,
}

/// Outcome of feeding one payload through the registry
#[derive(Clone, Debug, PartialEq)]
pub struct Ingest {
    /// Converted channel data to forward downstream; `None` when the packet
    /// came from a non-active source and was suppressed
    pub emit: Option<Vec<u8>>,
    /// A source was added or the active source flipped; observers should be
    /// sent a fresh table snapshot
    pub sources_changed: bool,
}

#[derive(Clone, Debug)]
struct SourceRecord {
    name: String,
    priority: u8,
    last_seen: u64,
    /// When this source most recently reached its current priority; used to
    /// break exact priority ties in favor of the latest arrival
    priority_since: u64,
}

/// Tracks every transmitter on one universe stream and arbitrates which one
/// is authoritative.
#[derive(Debug)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceRecord>,
    active: Option<String>,
    timeout_ms: u64,
    suppressed: u64,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::with_timeout(SOURCE_TIMEOUT_MS)
    }

    /// Registry with a non-default stale-source window, for tests
    pub fn with_timeout(timeout_ms: u64) -> Self {
        SourceRegistry {
            sources: BTreeMap::new(),
            active: None,
            timeout_ms,
            suppressed: 0,
        }
    }

    /// Composite identity for a transmitter.
    ///
    /// CID is preferred because it is the only globally unique sender
    /// identity sACN guarantees; the name/address fallbacks cover decoders
    /// that do not surface one.
    pub fn source_key(name: &str, cid: Option<&[u8; 16]>, address: Option<SocketAddrV4>) -> String {
        if let Some(cid) = cid {
            cid.iter().map(|b| format!("{:02x}", b)).collect()
        } else if let Some(addr) = address {
            format!("{}@{}", name, addr)
        } else {
            name.to_string()
        }
    }

    /// Feed one decoded payload through the arbitration policy.
    ///
    /// Upserts the sender's record, recomputes the active source and decides
    /// whether this payload may pass downstream.
    pub fn ingest(&mut self, frame: &SourceFrame, now_ms: u64) -> Ingest {
        let key = Self::source_key(frame.name, frame.cid, frame.address);

        let mut table_changed = false;
        match self.sources.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(SourceRecord {
                    name: frame.name.to_string(),
                    priority: frame.priority,
                    last_seen: now_ms,
                    priority_since: now_ms,
                });
                table_changed = true;
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                record.last_seen = now_ms;
                if record.priority != frame.priority {
                    record.priority = frame.priority;
                    record.priority_since = now_ms;
                }
                if record.name != frame.name {
                    record.name = frame.name.to_string();
                }
            }
        }

        let active_changed = self.recompute_active();

        let emit = if self.active.as_deref() == Some(key.as_str()) {
            Some(frame.levels.iter().map(|&p| percent_to_dmx(p)).collect())
        } else {
            self.suppressed += 1;
            None
        };

        Ingest {
            emit,
            sources_changed: table_changed || active_changed,
        }
    }

    /// Drop sources unseen for longer than the timeout window and reselect
    /// the active source from the remainder. Returns true when the table or
    /// the active source changed.
    pub fn sweep(&mut self, now_ms: u64) -> bool {
        let before = self.sources.len();
        let timeout = self.timeout_ms;
        self.sources
            .retain(|_, record| now_ms.saturating_sub(record.last_seen) <= timeout);
        let removed = self.sources.len() != before;
        let active_changed = self.recompute_active();
        removed || active_changed
    }

    /// Remove one source immediately (stream-terminated option). Returns
    /// true when the source existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let existed = self.sources.remove(key).is_some();
        if existed {
            self.recompute_active();
        }
        existed
    }

    /// Key of the currently authoritative source, if any
    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Packets dropped because their sender was not the active source
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Snapshot of the source table, highest priority first
    pub fn sources(&self) -> Vec<SacnSourceInfo> {
        let mut table: Vec<SacnSourceInfo> = self
            .sources
            .iter()
            .map(|(key, record)| SacnSourceInfo {
                key: key.clone(),
                name: record.name.clone(),
                priority: record.priority,
                last_seen: record.last_seen,
                is_active: self.active.as_deref() == Some(key.as_str()),
            })
            .collect();
        table.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.key.cmp(&b.key)));
        table
    }

    /// Reselect the active source.
    ///
    /// The incumbent keeps its status while it is still tracked and no other
    /// source holds a strictly higher priority. When a new choice is needed,
    /// exact ties go to the source that most recently reached the winning
    /// priority, so equal-priority senders do not steal the slot from each
    /// other packet by packet.
    fn recompute_active(&mut self) -> bool {
        let Some(best) = self.sources.values().map(|r| r.priority).max() else {
            return self.active.take().is_some();
        };

        if let Some(active) = &self.active {
            if let Some(record) = self.sources.get(active) {
                if record.priority >= best {
                    return false;
                }
            }
        }

        let winner = self
            .sources
            .iter()
            .filter(|(_, record)| record.priority == best)
            .max_by_key(|(_, record)| record.priority_since)
            .map(|(key, _)| key.clone());
        let changed = winner != self.active;
        self.active = winner;
        changed
    }
}
