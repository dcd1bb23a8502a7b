//! Node addressing and its persisted backing store.
//!
//! The wire format encodes role in the high byte of a 16-bit address
//! (`0xFF__` for an anchor, `0x00__` for a tag); [`NodeId`] exposes that as
//! a sum type instead of a bare integer so callers can't construct an
//! address with a meaningless role byte.

pub const NVM_KEY_GROUP_ID: &str = "uwb_gid";
pub const NVM_KEY_NODE_ID: &str = "uwb_nid";

pub const DEFAULT_GROUP_ID: u16 = 0x1234;
pub const DEFAULT_NODE_ID: u16 = 0x0000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeId {
    Anchor(u8),
    Tag(u8),
}

impl NodeId {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Anchor(idx) => 0xFF00 | idx as u16,
            Self::Tag(idx) => idx as u16,
        }
    }

    pub fn from_u16(raw: u16) -> Self {
        let (hi, lo) = crate::shared::split_addr(raw);
        if hi == 0xFF {
            Self::Anchor(lo)
        } else {
            Self::Tag(lo)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Identity {
    pub group_id: u16,
    pub node_id: NodeId,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_GROUP_ID,
            node_id: NodeId::from_u16(DEFAULT_NODE_ID),
        }
    }
}

/// Non-volatile key/value persistence for node identity. Implemented by the
/// board integration against whatever storage it has (flash, EEPROM, ...);
/// this crate only depends on the two named values round-tripping.
pub trait NvmStore {
    fn load_u16(&mut self, key: &str) -> Option<u16>;
    fn store_u16(&mut self, key: &str, value: u16);
}

impl Identity {
    /// Load identity from NVM, falling back to the documented defaults for
    /// any value that isn't present.
    pub fn load(store: &mut impl NvmStore) -> Self {
        let group_id = store.load_u16(NVM_KEY_GROUP_ID).unwrap_or(DEFAULT_GROUP_ID);
        let node_id = store.load_u16(NVM_KEY_NODE_ID).unwrap_or(DEFAULT_NODE_ID);
        Self {
            group_id,
            node_id: NodeId::from_u16(node_id),
        }
    }

    /// Persist `self` to NVM, skipping a write whose value already matches
    /// what's stored.
    pub fn store(&self, store: &mut impl NvmStore) {
        if store.load_u16(NVM_KEY_GROUP_ID) != Some(self.group_id) {
            store.store_u16(NVM_KEY_GROUP_ID, self.group_id);
        }
        let node_raw = self.node_id.to_u16();
        if store.load_u16(NVM_KEY_NODE_ID) != Some(node_raw) {
            store.store_u16(NVM_KEY_NODE_ID, node_raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockNvm {
        group_id: Option<u16>,
        node_id: Option<u16>,
        writes: u32,
    }

    impl NvmStore for MockNvm {
        fn load_u16(&mut self, key: &str) -> Option<u16> {
            match key {
                NVM_KEY_GROUP_ID => self.group_id,
                NVM_KEY_NODE_ID => self.node_id,
                _ => None,
            }
        }
        fn store_u16(&mut self, key: &str, value: u16) {
            self.writes += 1;
            match key {
                NVM_KEY_GROUP_ID => self.group_id = Some(value),
                NVM_KEY_NODE_ID => self.node_id = Some(value),
                _ => {}
            }
        }
    }

    #[test]
    fn anchor_tag_round_trip_through_u16() {
        assert_eq!(NodeId::from_u16(NodeId::Anchor(3).to_u16()), NodeId::Anchor(3));
        assert_eq!(NodeId::from_u16(NodeId::Tag(3).to_u16()), NodeId::Tag(3));
        assert_eq!(NodeId::Anchor(3).to_u16(), 0xFF03);
        assert_eq!(NodeId::Tag(3).to_u16(), 0x0003);
    }

    #[test]
    fn defaults_apply_when_nvm_empty() {
        let mut nvm = MockNvm::default();
        let id = Identity::load(&mut nvm);
        assert_eq!(id.group_id, DEFAULT_GROUP_ID);
        assert_eq!(id.node_id, NodeId::from_u16(DEFAULT_NODE_ID));
    }

    #[test]
    fn store_is_idempotent() {
        let mut nvm = MockNvm::default();
        let id = Identity {
            group_id: 0x1234,
            node_id: NodeId::Anchor(3),
        };
        id.store(&mut nvm);
        assert_eq!(nvm.writes, 2);
        id.store(&mut nvm);
        assert_eq!(nvm.writes, 2, "unchanged values must not trigger another write");
    }
}
