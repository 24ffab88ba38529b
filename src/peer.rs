use std::fmt::{Debug, Display, Formatter};

/// Opaque identity of a peer, as assigned by the overlay. The protocol never
///  looks inside - it only compares, hashes and echoes it back to the overlay.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> PeerId {
        PeerId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // the full key is long and low-entropy at the tail - a short prefix
        //  is enough to tell peers apart in a log line
        for byte in self.0.iter().take(4) {
            write!(f, "{:02x}", byte)?;
        }
        if self.0.len() > 4 {
            write!(f, "..")?;
        }
        Ok(())
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self)
    }
}
