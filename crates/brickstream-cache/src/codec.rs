//! 64-bit node descriptor encoding.
//!
//! Layout, most significant bit first:
//!
//! | bits    | field                                   |
//! |---------|-----------------------------------------|
//! | 63      | homogeneous                             |
//! | 62      | in pool (payload tag)                   |
//! | 61      | reserved                                |
//! | 40..=60 | child pointer (0 = no children)         |
//! | 0..=39  | payload: brick slot or channel averages |
//!
//! A resident payload keeps the slot index in bits 16..=39. A non-resident
//! payload splits the 40 bits evenly across the channels (at most 16 bits
//! each), channel 0 in the most significant position; leftover bits stay zero.
//!
//! Callers work with [`NodeDescriptor`] and [`NodePayload`]; bit packing never
//! leaves this module.

use std::fmt;

use brickstream_core::constants::{MAX_CHANNELS, SAMPLE_BITS};
use brickstream_core::{Error, Result, SlotIndex};
use bytemuck::{Pod, Zeroable};

const HOMOGENEOUS_BIT: u64 = 1 << 63;
const IN_POOL_BIT: u64 = 1 << 62;

const CHILD_SHIFT: u32 = 40;
const CHILD_BITS: u32 = 21;
const CHILD_MASK: u64 = ((1 << CHILD_BITS) - 1) << CHILD_SHIFT;

const SLOT_SHIFT: u32 = 16;
const SLOT_BITS: u32 = 24;
const SLOT_MASK: u64 = ((1 << SLOT_BITS) - 1) << SLOT_SHIFT;

const PAYLOAD_BITS: u32 = 40;
const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;

/// Largest representable child pointer.
pub const MAX_CHILD_POINTER: u32 = (1 << CHILD_BITS) - 1;
/// Number of addressable brick slots.
pub const MAX_SLOTS: usize = 1 << SLOT_BITS;

/// Packed descriptor as stored in the node buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct PackedNode(pub u64);

impl PackedNode {
    #[inline]
    pub const fn is_homogeneous(self) -> bool {
        self.0 & HOMOGENEOUS_BIT != 0
    }

    #[inline]
    pub const fn in_pool(self) -> bool {
        self.0 & IN_POOL_BIT != 0
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn child_pointer(self) -> u32 {
        ((self.0 & CHILD_MASK) >> CHILD_SHIFT) as u32
    }

    /// Slot index if the payload is tagged as resident.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn slot(self) -> Option<SlotIndex> {
        if self.in_pool() {
            Some(SlotIndex(((self.0 & SLOT_MASK) >> SLOT_SHIFT) as u32))
        } else {
            None
        }
    }
}

/// Tagged descriptor payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodePayload {
    /// Brick is resident in this pool slot.
    Brick(SlotIndex),
    /// Brick is absent; consumers fall back to the per-channel averages.
    ///
    /// Values are full 16-bit samples. Decoding yields them truncated to the
    /// codec's channel width.
    Average([u16; MAX_CHANNELS]),
}

/// Decoded node descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub homogeneous: bool,
    pub child_pointer: u32,
    pub payload: NodePayload,
}

impl NodeDescriptor {
    #[inline]
    pub const fn in_pool(&self) -> bool {
        matches!(self.payload, NodePayload::Brick(_))
    }
}

/// Encoder/decoder for one channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeCodec {
    channels: u8,
    width: u32,
}

impl NodeCodec {
    pub fn new(channels: u8) -> Result<Self> {
        if channels == 0 || usize::from(channels) > MAX_CHANNELS {
            return Err(Error::InvalidChannelCount(channels));
        }
        let width = (PAYLOAD_BITS / u32::from(channels)).min(SAMPLE_BITS);
        Ok(Self { channels, width })
    }

    #[inline]
    pub const fn channels(&self) -> u8 {
        self.channels
    }

    /// Bits stored per channel average.
    #[inline]
    pub const fn bits_per_channel(&self) -> u32 {
        self.width
    }

    /// Distance between two representable averages, in sample units.
    #[inline]
    pub const fn quantization_step(&self) -> u32 {
        1 << (SAMPLE_BITS - self.width)
    }

    #[inline]
    const fn shift(&self, channel: usize) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let from_low = (self.channels as u32) - 1 - channel as u32;
        from_low * self.width
    }

    fn pack_averages(&self, averages: &[u16; MAX_CHANNELS]) -> u64 {
        let drop = SAMPLE_BITS - self.width;
        (0..usize::from(self.channels)).fold(0, |bits, c| {
            bits | (u64::from(averages[c] >> drop) << self.shift(c))
        })
    }

    fn unpack_averages(&self, bits: u64) -> [u16; MAX_CHANNELS] {
        let drop = SAMPLE_BITS - self.width;
        let mask = (1u64 << self.width) - 1;
        let mut averages = [0; MAX_CHANNELS];
        for (c, avg) in averages.iter_mut().enumerate().take(usize::from(self.channels)) {
            #[allow(clippy::cast_possible_truncation)]
            let quantized = ((bits >> self.shift(c)) & mask) as u16;
            *avg = quantized << drop;
        }
        averages
    }

    fn pack_payload(&self, payload: &NodePayload) -> u64 {
        match payload {
            NodePayload::Brick(slot) => IN_POOL_BIT | ((u64::from(slot.0) << SLOT_SHIFT) & SLOT_MASK),
            NodePayload::Average(averages) => self.pack_averages(averages) & PAYLOAD_MASK,
        }
    }

    /// Pack a descriptor.
    pub fn encode(&self, descriptor: &NodeDescriptor) -> PackedNode {
        debug_assert!(descriptor.child_pointer <= MAX_CHILD_POINTER);
        let mut bits = (u64::from(descriptor.child_pointer) << CHILD_SHIFT) & CHILD_MASK;
        if descriptor.homogeneous {
            bits |= HOMOGENEOUS_BIT;
        }
        PackedNode(bits | self.pack_payload(&descriptor.payload))
    }

    /// Unpack a descriptor.
    pub fn decode(&self, packed: PackedNode) -> NodeDescriptor {
        let payload = match packed.slot() {
            Some(slot) => NodePayload::Brick(slot),
            None => NodePayload::Average(self.unpack_averages(packed.0 & PAYLOAD_MASK)),
        };
        NodeDescriptor {
            homogeneous: packed.is_homogeneous(),
            child_pointer: packed.child_pointer(),
            payload,
        }
    }

    /// Rewrite only the child pointer bits.
    #[must_use]
    pub fn update_child_pointer(&self, packed: PackedNode, child_pointer: u32) -> PackedNode {
        debug_assert!(child_pointer <= MAX_CHILD_POINTER);
        let bits = (packed.0 & !CHILD_MASK) | ((u64::from(child_pointer) << CHILD_SHIFT) & CHILD_MASK);
        PackedNode(bits)
    }

    /// Set the payload tag and overwrite the whole payload range.
    ///
    /// Nothing of the previous payload survives, whichever tag it had.
    #[must_use]
    pub fn update_brick_binding(&self, packed: PackedNode, payload: &NodePayload) -> PackedNode {
        let kept = packed.0 & !(IN_POOL_BIT | PAYLOAD_MASK);
        PackedNode(kept | self.pack_payload(payload))
    }
}

impl fmt::Display for NodeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} channel(s) x {} bit averages, {} bit child pointer, {} bit slot",
            self.channels, self.width, CHILD_BITS, SLOT_BITS
        )
    }
}
