//! Per-node flag bytes written by the traversal stage.

use bitflags::bitflags;
use brickstream_core::NodeId;

bitflags! {
    /// Flags the traversal stage sets on each node it visits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// The node's resident brick contributed to the image.
        const USED      = 0b0000_0001;
        /// The node's brick was needed but not resident.
        const REQUESTED = 0b0000_0010;
        /// The node was reached by at least one ray.
        const TRAVERSED = 0b0000_0100;
    }
}

/// Trust state of the flag contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagState {
    /// Cleared and not yet handed to a dispatch.
    #[default]
    Cleared,
    /// A dispatch is writing the flags.
    InFlight,
    /// Written by a dispatch that signaled completion; not read yet.
    Completed,
    /// Read back by an update; nothing new to act on.
    Consumed,
    /// Left behind by a dispatch that never completed.
    Abandoned,
}

/// Counts of set flags, as gathered by [`FlagBuffer::analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagStats {
    pub traversed: usize,
    pub used: usize,
    pub requested: usize,
}

/// One flag byte per node id.
#[derive(Debug, Clone)]
pub struct FlagBuffer {
    bytes: Vec<u8>,
    state: FlagState,
}

impl FlagBuffer {
    pub fn new(node_count: usize) -> Self {
        Self {
            bytes: vec![0; node_count],
            state: FlagState::Cleared,
        }
    }

    #[inline]
    pub const fn state(&self) -> FlagState {
        self.state
    }

    /// Flags are only acted on when a dispatch completed and they were not read yet.
    #[inline]
    pub fn is_trusted(&self) -> bool {
        self.state == FlagState::Completed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn get(&self, node: NodeId) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.bytes[node.index()])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub(crate) fn set_state(&mut self, state: FlagState) {
        self.state = state;
    }

    /// Reset flags for the next pass.
    ///
    /// With `keep_traversed` the traversal bits survive, so an iterative
    /// refinement pass knows which nodes earlier passes already reached.
    pub fn clear(&mut self, keep_traversed: bool) {
        if keep_traversed {
            let keep = NodeFlags::TRAVERSED.bits();
            for byte in &mut self.bytes {
                *byte &= keep;
            }
        } else {
            self.bytes.fill(0);
        }
        self.state = FlagState::Cleared;
    }

    /// Count set flags.
    pub fn analyze(&self) -> FlagStats {
        self.bytes.iter().fold(FlagStats::default(), |mut stats, &byte| {
            let flags = NodeFlags::from_bits_truncate(byte);
            stats.traversed += usize::from(flags.contains(NodeFlags::TRAVERSED));
            stats.used += usize::from(flags.contains(NodeFlags::USED));
            stats.requested += usize::from(flags.contains(NodeFlags::REQUESTED));
            stats
        })
    }

    /// Iterate over node ids with their flags.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeFlags)> + '_ {
        self.bytes.iter().enumerate().map(|(i, &byte)| {
            #[allow(clippy::cast_possible_truncation)]
            let node = NodeId(i as u32);
            (node, NodeFlags::from_bits_truncate(byte))
        })
    }
}
