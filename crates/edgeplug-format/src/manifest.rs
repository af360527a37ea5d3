//! The in-flight update manifest (§6): a 144-byte little-endian record
//! carrying the version, sizes, and the cryptographic commitments that bind
//! an image to its provisioning-authority signature.

/// Wire length of an encoded [`Manifest`], in bytes.
pub const MANIFEST_LEN: usize = 144;

/// Errors returned when decoding a manifest from bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ManifestError {
    /// The input was not exactly [`MANIFEST_LEN`] bytes.
    WrongLength,
}

impl core::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ManifestError::WrongLength => write!(f, "manifest must be exactly {} bytes", MANIFEST_LEN),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ManifestError {}

/// An update manifest: `{version, agent_id, flash_size, sram_size, signature, hash}`,
/// all little-endian, 144 bytes total.
///
/// `hash` is `SHA-512(payload)`; `signature` is the provisioning authority's
/// Ed25519 signature over `hash`. Verifying both is [`edgeplug-lifecycle`]'s
/// `stage` operation, not this crate's — this type only knows its own layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manifest {
    pub version: u32,
    pub agent_id: u32,
    pub flash_size: u32,
    pub sram_size: u32,
    pub signature: [u8; 64],
    pub hash: [u8; 64],
}

impl Manifest {
    /// Encodes this manifest to its 144-byte little-endian wire form.
    pub fn encode(&self) -> [u8; MANIFEST_LEN] {
        let mut out = [0u8; MANIFEST_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.agent_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.flash_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.sram_size.to_le_bytes());
        out[16..80].copy_from_slice(&self.signature);
        out[80..144].copy_from_slice(&self.hash);
        out
    }

    /// Decodes a manifest from its 144-byte little-endian wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() != MANIFEST_LEN {
            return Err(ManifestError::WrongLength);
        }
        let mut signature = [0u8; 64];
        let mut hash = [0u8; 64];
        signature.copy_from_slice(&bytes[16..80]);
        hash.copy_from_slice(&bytes[80..144]);
        Ok(Manifest {
            version: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            agent_id: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            flash_size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            sram_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            signature,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_byte_for_byte() {
        let manifest = Manifest {
            version: 7,
            agent_id: 0x1234_5678,
            flash_size: 512,
            sram_size: 256,
            signature: [0xAB; 64],
            hash: [0xCD; 64],
        };
        let encoded = manifest.encode();
        assert_eq!(encoded.len(), MANIFEST_LEN);
        let decoded = Manifest::decode(&encoded).unwrap();
        assert_eq!(manifest, decoded);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(Manifest::decode(&[0u8; 10]), Err(ManifestError::WrongLength));
    }

    #[test]
    fn fields_are_little_endian() {
        let manifest = Manifest { version: 0x0102_0304, agent_id: 0, flash_size: 0, sram_size: 0, signature: [0; 64], hash: [0; 64] };
        let encoded = manifest.encode();
        assert_eq!(&encoded[0..4], &[0x04, 0x03, 0x02, 0x01]);
    }
}
