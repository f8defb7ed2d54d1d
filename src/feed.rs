//! The typed data-feed packet envelope and transform chain (spec §4.I).

use std::time::SystemTime;

use crate::config::{ConfigKey, MeasuredQuantity, QuantityFlags, Variant};
use crate::error::Result;
use crate::rational::AnalogEncoding;

/// `HEADER` payload: feed version plus the wall-clock acquisition start.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Data-feed format version.
    pub feed_version: u32,
    /// When acquisition started.
    pub start_time: SystemTime,
}

/// `META` payload: a batch of `(key, value)` pairs, e.g. samplerate
/// confirmed after a driver rounded a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    /// The config entries carried by this packet.
    pub config: Vec<(ConfigKey, Variant)>,
}

/// `LOGIC` payload: one bit per enabled logic channel, packed MSB-to-LSB
/// across channel indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Logic {
    /// Total payload length in bytes.
    pub length: u64,
    /// Bytes per sample (covers every packed channel).
    pub unit_size: u32,
    /// Packed sample data, owned by this packet.
    pub data: Vec<u8>,
}

/// What an `ANALOG` packet's samples mean: quantity, unit flags, and the
/// channels they were measured on.
#[derive(Debug, Clone, PartialEq)]
pub struct Meaning {
    /// The physical quantity.
    pub quantity: MeasuredQuantity,
    /// Qualifying flag bits.
    pub flags: QuantityFlags,
    /// Device channel indices these samples belong to.
    pub channels: Vec<usize>,
}

/// `ANALOG` payload: raw sample buffer, its encoding, its meaning, and the
/// vendor/display-sourced `spec` companion to `encoding`.
#[derive(Debug, Clone, PartialEq)]
pub struct Analog {
    /// Raw sample bytes, owned by this packet.
    pub data: Vec<u8>,
    /// Number of samples in `data`.
    pub num_samples: u64,
    /// Wire encoding of each sample.
    pub encoding: AnalogEncoding,
    /// What the samples represent.
    pub meaning: Meaning,
    /// Vendor/display-resolution companion encoding (shares `encoding`'s
    /// scale/offset but carries its own `spec_digits`-equivalent).
    pub spec: AnalogEncoding,
}

/// The data-feed packet tagged union (spec §3, "Data-feed packet").
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Exactly one per device stream, first.
    Header(Header),
    /// Zero or more, any time.
    Meta(Meta),
    /// Marks the trigger point within a frame.
    Trigger,
    /// Opens a frame.
    FrameBegin,
    /// Closes a frame.
    FrameEnd,
    /// Exactly one per device stream, last.
    End,
    /// Digital samples.
    Logic(Logic),
    /// Analog samples.
    Analog(Analog),
}

/// Deep-copy a packet. Since every payload type here already owns its
/// buffers via `Vec`/`String` and derives `Clone`, this is exactly
/// `Clone::clone` -- provided as a named function to mirror the explicit
/// copy/free pair the rest of the runtime exposes.
pub fn packet_copy(packet: &Packet) -> Packet {
    packet.clone()
}

/// Release a packet's owned payload. Rust's ownership model means this is
/// simply drop; provided so callers that received a packet from
/// [`packet_copy`] have an explicit, symmetric way to release it.
pub fn packet_free(packet: Packet) {
    drop(packet)
}

/// A pluggable packet filter sitting between a driver and the registered
/// datafeed callbacks. Returning `Ok(None)` suppresses the packet: no
/// further transform or callback sees it.
pub trait Transform: Send {
    /// Identifier used in diagnostics.
    fn id(&self) -> &str;

    /// Process one packet, optionally producing a replacement.
    fn receive(&mut self, packet: Packet) -> Result<Option<Packet>>;
}

/// A registered datafeed consumer: invoked in registration order,
/// synchronously, on the session's execution thread.
pub type DatafeedCallback = Box<dyn FnMut(usize, &Packet) + Send>;

/// The ordered transform chain plus callback fan-out a session owns.
#[derive(Default)]
pub struct Bus {
    transforms: Vec<Box<dyn Transform>>,
    callbacks: Vec<DatafeedCallback>,
}

impl Bus {
    /// An empty bus: no transforms, no callbacks.
    pub fn new() -> Self {
        Bus {
            transforms: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Append a transform to the end of the chain.
    pub fn add_transform(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Register a datafeed callback, appended to the end of the fan-out
    /// list.
    pub fn add_callback(&mut self, callback: DatafeedCallback) {
        self.callbacks.push(callback);
    }

    /// Drop every registered callback (spec §4.H session teardown).
    pub fn remove_all_callbacks(&mut self) {
        self.callbacks.clear();
    }

    /// Route `packet` through the transform chain in order, then fan it out
    /// to every callback if a transform did not suppress it.
    ///
    /// `device_index` identifies the originating device to callbacks; the
    /// bus does not interpret it.
    pub fn send(&mut self, device_index: usize, packet: Packet) -> Result<()> {
        let mut current = packet;
        for transform in self.transforms.iter_mut() {
            match transform.receive(current)? {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        for callback in self.callbacks.iter_mut() {
            callback(device_index, &current);
        }
        Ok(())
    }

    /// Build and send a `META` packet carrying a single `(key, value)` pair
    /// (`send_meta` in the original session API).
    pub fn send_meta(&mut self, device_index: usize, key: ConfigKey, value: Variant) -> Result<()> {
        self.send(device_index, Packet::Meta(Meta { config: vec![(key, value)] }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Uppercase;
    impl Transform for Uppercase {
        fn id(&self) -> &str {
            "uppercase"
        }
        fn receive(&mut self, packet: Packet) -> Result<Option<Packet>> {
            Ok(Some(packet))
        }
    }

    struct Suppress;
    impl Transform for Suppress {
        fn id(&self) -> &str {
            "suppress"
        }
        fn receive(&mut self, _packet: Packet) -> Result<Option<Packet>> {
            Ok(None)
        }
    }

    #[test]
    fn transform_chain_short_circuits_on_suppression() {
        let mut bus = Bus::new();
        bus.add_transform(Box::new(Uppercase));
        bus.add_transform(Box::new(Suppress));
        let delivered = std::sync::Arc::new(std::sync::Mutex::new(0));
        let delivered_clone = delivered.clone();
        bus.add_callback(Box::new(move |_dev, _packet| {
            *delivered_clone.lock().unwrap() += 1;
        }));
        bus.send(0, Packet::Trigger).unwrap();
        assert_eq!(*delivered.lock().unwrap(), 0);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let mut bus = Bus::new();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.add_callback(Box::new(move |_dev, _packet| order.lock().unwrap().push(i)));
        }
        bus.send(0, Packet::Trigger).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn packet_copy_round_trips_structurally() {
        let original = Packet::Logic(Logic {
            length: 4,
            unit_size: 1,
            data: vec![1, 2, 3, 4],
        });
        let copy = packet_copy(&original);
        assert_eq!(copy, original);
        packet_free(copy);
    }
}
