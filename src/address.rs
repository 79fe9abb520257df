//! RF endpoint addressing.

/// A tagged destination for an RF-directed request.
///
/// `GroupList` carries 1-8 group indices. A first byte of zero means "all
/// groups"; otherwise the list is terminated by a zero byte unless it fills
/// all eight slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    None,
    DeviceId(u16),
    GroupList([u8; 8]),
    UniqueId(u64),
}

impl Address {
    /// Build a `GroupList` address from up to 8 group indices.
    ///
    /// An empty slice encodes "all groups" (first byte zero).
    pub fn group_list(groups: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        if groups.is_empty() {
            return Address::GroupList(bytes);
        }
        let n = groups.len().min(8);
        bytes[..n].copy_from_slice(&groups[..n]);
        Address::GroupList(bytes)
    }

    /// Group indices carried by a `GroupList`, stopping at the first zero
    /// unless all eight slots are populated. Returns `None` for "all groups".
    pub fn groups(&self) -> Option<Vec<u8>> {
        match self {
            Address::GroupList(bytes) => {
                if bytes[0] == 0 {
                    return None;
                }
                let mut out = Vec::with_capacity(8);
                for &b in bytes {
                    if b == 0 {
                        break;
                    }
                    out.push(b);
                }
                Some(out)
            }
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Address::None)
    }

    /// Wire encoding used in every outbound shade/group/beacon record
    /// body: a one-byte tag followed by a tag-dependent number of bytes.
    pub fn to_wire(self) -> Vec<u8> {
        match self {
            Address::None => vec![0],
            Address::DeviceId(id) => {
                let mut out = vec![1];
                out.extend_from_slice(&id.to_le_bytes());
                out
            }
            Address::GroupList(groups) => {
                let mut out = vec![2];
                out.extend_from_slice(&groups);
                out
            }
            Address::UniqueId(id) => {
                let mut out = vec![3];
                out.extend_from_slice(&id.to_le_bytes());
                out
            }
        }
    }

    /// Parse a wire-encoded address from the front of `bytes`, returning
    /// the address and the number of bytes consumed.
    pub fn from_wire(bytes: &[u8]) -> Option<(Address, usize)> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            0 => Some((Address::None, 1)),
            1 => {
                let id = u16::from_le_bytes(rest.get(0..2)?.try_into().ok()?);
                Some((Address::DeviceId(id), 3))
            }
            2 => {
                let groups: [u8; 8] = rest.get(0..8)?.try_into().ok()?;
                Some((Address::GroupList(groups), 9))
            }
            3 => {
                let id = u64::from_le_bytes(rest.get(0..8)?.try_into().ok()?);
                Some((Address::UniqueId(id), 9))
            }
            _ => None,
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_list_all_groups_is_zero_first_byte() {
        let addr = Address::group_list(&[]);
        assert_eq!(addr, Address::GroupList([0; 8]));
        assert_eq!(addr.groups(), None);
    }

    #[test]
    fn group_list_round_trips_partial_list() {
        let addr = Address::group_list(&[3, 7, 1]);
        assert_eq!(addr.groups(), Some(vec![3, 7, 1]));
    }

    #[test]
    fn group_list_full_eight_has_no_terminator() {
        let groups = [1, 2, 3, 4, 5, 6, 7, 8];
        let addr = Address::group_list(&groups);
        assert_eq!(addr.groups(), Some(groups.to_vec()));
    }
}
