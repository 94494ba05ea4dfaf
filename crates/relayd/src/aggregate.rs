//! The in-memory aggregation table: one slot per metric name seen within
//! the current flush window.
use crate::constants::{MAX_COUNTER_LENGTH, MAX_LINE_LENGTH, MIN_LINE_LENGTH, MTU, NUM_OF_SLOTS};
use crate::egress::EgressRing;
use statsd::{Line, MetricKind, ValueGroup, format_counter, split_lines};
use tracing::error;

/// Accumulator for one metric name. The buffer holds the name (terminating
/// `:` included) followed by the serialized payload; its last byte is the
/// separator position the packer rewrites to `\n`.
pub struct Slot {
    buf: Vec<u8>,
    name_len: usize,
    kind: Option<MetricKind>,
    counter: f64,
}

impl Slot {
    fn reset(&mut self, name: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(name);
        self.name_len = name.len();
        self.kind = None;
        self.counter = 0.0;
    }

    /// A slot that never accepted a sample carries only its name and is
    /// omitted from the egress datagram.
    pub fn has_samples(&self) -> bool {
        self.buf.len() > self.name_len
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Ordered slot sequence plus the active-length accounting that gates
/// premature flushes. Slot storage is an arena reused every flush window.
pub struct SlotTable {
    slots: Vec<Slot>,
    used: usize,
    active_len: usize,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            used: 0,
            active_len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Sum of every used slot's serialized length, names included. Always
    /// at most [`MTU`].
    pub fn active_len(&self) -> usize {
        self.active_len
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots[..self.used].iter()
    }

    pub fn clear(&mut self) {
        self.used = 0;
        self.active_len = 0;
    }

    /// Folds every line of an ingress datagram into the table, packing the
    /// current window into `ring` whenever the next sample would not fit.
    pub fn ingest_datagram(&mut self, datagram: &[u8], ring: &mut EgressRing) {
        for line in split_lines(datagram) {
            self.ingest_line(line, ring);
        }
    }

    fn ingest_line(&mut self, raw: &[u8], ring: &mut EgressRing) {
        // The terminating newline counts toward the line length even when
        // the datagram omitted it.
        let framed_len = raw.len() + 1;
        if !(MIN_LINE_LENGTH..=MAX_LINE_LENGTH).contains(&framed_len) {
            error!(
                "dropping line of {} bytes, accepted range is {}..={}: \"{}\"",
                framed_len,
                MIN_LINE_LENGTH,
                MAX_LINE_LENGTH,
                String::from_utf8_lossy(raw)
            );
            return;
        }

        let line = match Line::parse(raw) {
            Ok(line) => line,
            Err(err) => {
                error!("dropping line \"{}\": {}", String::from_utf8_lossy(raw), err);
                return;
            }
        };

        for group in line.groups() {
            match group {
                Ok(group) => self.fold(line.name(), group, ring),
                Err(err) => error!(
                    "skipping group in line \"{}\": {}",
                    String::from_utf8_lossy(raw),
                    err
                ),
            }
        }
    }

    /// Folds one value group into the slot for `name`, allocating the slot
    /// on first sight.
    fn fold(&mut self, name: &[u8], group: ValueGroup<'_>, ring: &mut EgressRing) {
        let idx = match self.position(name) {
            Some(idx) => idx,
            None => {
                if self.used == NUM_OF_SLOTS || self.active_len + name.len() > MTU {
                    ring.pack_from(self);
                }
                self.alloc(name)
            }
        };

        let slot = &self.slots[idx];
        if let Some(kind) = slot.kind
            && kind != group.kind
        {
            error!(
                "dropping {:?} sample for \"{}\", slot already holds {:?}",
                group.kind,
                String::from_utf8_lossy(name),
                kind
            );
            return;
        }

        match group.kind {
            MetricKind::Counter => {
                let increment = match group.counter_increment() {
                    Ok(increment) => increment,
                    Err(err) => {
                        error!(
                            "skipping counter sample for \"{}\": {}",
                            String::from_utf8_lossy(name),
                            err
                        );
                        return;
                    }
                };
                // Worst-case re-serialization must fit before the rewrite.
                let idx = if self.counter_would_overflow(idx) {
                    self.flush_and_realloc(name, ring)
                } else {
                    idx
                };
                self.apply_counter(idx, increment);
            }
            MetricKind::Other => {
                let added = group.bytes().len() + 1;
                let idx = if self.active_len + added > MTU {
                    self.flush_and_realloc(name, ring)
                } else {
                    idx
                };
                self.apply_other(idx, group.bytes());
            }
        }
    }

    fn position(&self, name: &[u8]) -> Option<usize> {
        self.slots[..self.used]
            .iter()
            .position(|slot| slot.name_len == name.len() && &slot.buf[..slot.name_len] == name)
    }

    fn alloc(&mut self, name: &[u8]) -> usize {
        let idx = self.used;
        match self.slots.get_mut(idx) {
            Some(slot) => slot.reset(name),
            None => self.slots.push(Slot {
                buf: {
                    let mut buf = Vec::with_capacity(MTU);
                    buf.extend_from_slice(name);
                    buf
                },
                name_len: name.len(),
                kind: None,
                counter: 0.0,
            }),
        }
        self.used += 1;
        self.active_len += name.len();
        idx
    }

    /// Mid-sample overflow: pack the window out and retry the sample in a
    /// fresh slot with the same name.
    fn flush_and_realloc(&mut self, name: &[u8], ring: &mut EgressRing) -> usize {
        ring.pack_from(self);
        self.alloc(name)
    }

    fn counter_would_overflow(&self, idx: usize) -> bool {
        let slot = &self.slots[idx];
        let payload_len = slot.buf.len() - slot.name_len;
        self.active_len - payload_len + MAX_COUNTER_LENGTH > MTU
    }

    fn apply_counter(&mut self, idx: usize, increment: f64) {
        let slot = &mut self.slots[idx];
        let old_len = slot.buf.len();
        slot.kind = Some(MetricKind::Counter);
        slot.counter += increment;
        slot.buf.truncate(slot.name_len);
        slot.buf.extend_from_slice(format_counter(slot.counter).as_bytes());
        slot.buf.extend_from_slice(b"|c\n");
        self.active_len = self.active_len - old_len + slot.buf.len();
    }

    fn apply_other(&mut self, idx: usize, group: &[u8]) {
        let slot = &mut self.slots[idx];
        slot.kind = Some(MetricKind::Other);
        slot.buf.extend_from_slice(group);
        slot.buf.push(b':');
        self.active_len += group.len() + 1;
    }
}
