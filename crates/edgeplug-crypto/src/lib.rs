//! Cryptographic primitives used by the rest of the EdgePlug runtime.
//!
//! Every function here is total except [`verify_ed25519`], which returns `false`
//! rather than panicking or erroring on malformed input (RFC 8032 §5.1.7 treats
//! a bad signature as a rejection, not a fault). The implementations themselves
//! are not hand-rolled: SHA-512, HMAC, and Ed25519 are delegated to audited
//! RustCrypto/dalek crates, per the "no inline, incomplete crypto" design note.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

use crc::{Crc, CRC_32_ISO_HDLC};
use ed25519_dalek::{Signature, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

/// Errors raised by the primitives in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CryptoError {
    /// The platform has no entropy source configured, or the source reported
    /// a failure. Per contract this must never silently fall back to a
    /// predictable value.
    NoEntropySource,
    /// An HMAC or AES key was the wrong length for the algorithm.
    InvalidKeyLength,
    /// An AES-CBC ciphertext was not a multiple of the block size, or was too
    /// short to contain its own padding.
    InvalidCiphertextLength,
}

impl core::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CryptoError::NoEntropySource => write!(f, "no entropy source available"),
            CryptoError::InvalidKeyLength => write!(f, "invalid key length"),
            CryptoError::InvalidCiphertextLength => write!(f, "invalid ciphertext length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}

/// A source of cryptographically secure random bytes, injected by the host.
///
/// Keeps the core free of platform-specific code: a caller on real hardware
/// wires this to a TRNG peripheral or a CSPRNG seeded from one; a host-side
/// test wires it to the OS entropy pool.
pub trait EntropySource {
    /// Fills `out` with random bytes. Must fail rather than return
    /// low-entropy or predictable data if the source is unavailable.
    fn fill(&mut self, out: &mut [u8]) -> Result<(), CryptoError>;
}

/// Computes the SHA-512 digest of `data`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes HMAC-SHA512 of `data` under `key`.
pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    // HMAC accepts keys of any length (RFC 2104 step 0 pads/hashes them), so
    // this never fails.
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verifies an HMAC-SHA512 tag in constant time.
pub fn verify_hmac_sha512(key: &[u8], data: &[u8], mac: &[u8; 64]) -> bool {
    let Ok(mut m) = Hmac::<Sha512>::new_from_slice(key) else { return false };
    m.update(data);
    m.verify_slice(mac).is_ok()
}

/// Verifies an Ed25519 signature over `msg` under `pubkey`, per RFC 8032.
///
/// Returns `false` (never panics or errors) for a malformed public key,
/// malformed signature, non-canonical `s`, or a genuine verification failure.
/// Uses strict verification: small-order components and non-canonical point
/// encodings are rejected rather than accepted under cofactored semantics.
pub fn verify_ed25519(msg: &[u8], sig: &[u8; 64], pubkey: &[u8; 32]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pubkey) else { return false };
    let signature = Signature::from_bytes(sig);
    verifying_key.verify_strict(msg, &signature).is_ok()
}

/// Computes the CRC-32 of `data` using the zlib-compatible parameterization:
/// polynomial `0x04C11DB7`, init `0xFFFFFFFF`, final XOR `0xFFFFFFFF`,
/// reflected input and output. The CRC of an empty payload is `0x00000000`.
pub fn crc32(data: &[u8]) -> u32 {
    const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    CRC32.checksum(data)
}

/// Draws `out.len()` random bytes from `entropy`.
///
/// Fails with [`CryptoError::NoEntropySource`] (propagated from the source)
/// rather than returning predictable output when no source is configured.
pub fn random_bytes<E: EntropySource>(entropy: &mut E, out: &mut [u8]) -> Result<(), CryptoError> {
    entropy.fill(out)
}

/// Draws a fresh 16-byte initialization vector for [`aes256_cbc_encrypt`]
/// from `entropy`. Fails with [`CryptoError::NoEntropySource`] rather than
/// returning a predictable IV when no source is configured.
pub fn generate_iv<E: EntropySource>(entropy: &mut E, out: &mut [u8; 16]) -> Result<(), CryptoError> {
    entropy.fill(out)
}

/// Derives a key of `out.len()` bytes from `password` and `salt` using
/// PBKDF2-HMAC-SHA512, the key-derivation primitive the C reference exposed
/// for wrapping device-unique secrets at rest.
pub fn pbkdf2_hmac_sha512(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, out);
}

/// Encrypts `plaintext` in place under AES-256-CBC with PKCS#7 padding.
///
/// `buf` must be `plaintext.len()` rounded up to the next 16-byte boundary,
/// with the plaintext already copied into its first `plaintext_len` bytes;
/// returns the ciphertext length (always a multiple of 16).
pub fn aes256_cbc_encrypt(
    key: &[u8; 32],
    iv: &[u8; 16],
    buf: &mut [u8],
    plaintext_len: usize,
) -> Result<usize, CryptoError> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::BlockEncryptMut;
    use aes::cipher::KeyIvInit;
    type Enc = cbc::Encryptor<aes::Aes256>;

    if plaintext_len > buf.len() {
        return Err(CryptoError::InvalidCiphertextLength);
    }
    let encryptor = Enc::new(key.into(), iv.into());
    encryptor
        .encrypt_padded_mut::<Pkcs7>(buf, plaintext_len)
        .map(|out| out.len())
        .map_err(|_| CryptoError::InvalidCiphertextLength)
}

/// Decrypts an AES-256-CBC/PKCS#7 ciphertext in place, returning the
/// recovered plaintext length.
pub fn aes256_cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]) -> Result<usize, CryptoError> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::BlockDecryptMut;
    use aes::cipher::KeyIvInit;
    type Dec = cbc::Decryptor<aes::Aes256>;

    let decryptor = Dec::new(key.into(), iv.into());
    decryptor
        .decrypt_padded_mut::<Pkcs7>(buf)
        .map(|out| out.len())
        .map_err(|_| CryptoError::InvalidCiphertextLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_empty_matches_fips_test_vector() {
        let digest = sha512(b"");
        assert_eq!(
            hex::encode(digest),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3"
        );
    }

    #[test]
    fn crc32_of_empty_payload_is_zero() {
        assert_eq!(crc32(&[]), 0x0000_0000);
    }

    #[test]
    fn crc32_of_check_string_matches_known_value() {
        // Standard CRC-32/ISO-HDLC check value for the ASCII string "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn hmac_roundtrip_verifies() {
        let key = b"test-key";
        let data = b"some telemetry payload";
        let mac = hmac_sha512(key, data);
        assert!(verify_hmac_sha512(key, data, &mac));
        assert!(!verify_hmac_sha512(key, b"tampered payload", &mac));
    }

    #[test]
    fn ed25519_rejects_malformed_pubkey() {
        let msg = b"hello";
        let sig = [0u8; 64];
        let bad_pubkey = [0u8; 32];
        assert!(!verify_ed25519(msg, &sig, &bad_pubkey));
    }

    #[test]
    fn ed25519_accepts_genuine_signature() {
        use ed25519_dalek::{Signer, SigningKey};
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let msg = b"agent image hash";
        let sig = signing_key.sign(msg);
        assert!(verify_ed25519(msg, &sig.to_bytes(), &verifying_key.to_bytes()));
    }

    #[test]
    fn ed25519_rejects_tampered_message() {
        use ed25519_dalek::{Signer, SigningKey};
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let sig = signing_key.sign(b"original");
        assert!(!verify_ed25519(b"tampered", &sig.to_bytes(), &verifying_key.to_bytes()));
    }

    struct FixedEntropy(u8);
    impl EntropySource for FixedEntropy {
        fn fill(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
            out.fill(self.0);
            Ok(())
        }
    }

    struct NoEntropy;
    impl EntropySource for NoEntropy {
        fn fill(&mut self, _out: &mut [u8]) -> Result<(), CryptoError> {
            Err(CryptoError::NoEntropySource)
        }
    }

    #[test]
    fn random_bytes_propagates_source_failure() {
        let mut out = [0u8; 16];
        assert_eq!(random_bytes(&mut NoEntropy, &mut out), Err(CryptoError::NoEntropySource));
    }

    #[test]
    fn random_bytes_fills_from_source() {
        let mut out = [0u8; 8];
        random_bytes(&mut FixedEntropy(0x42), &mut out).unwrap();
        assert_eq!(out, [0x42; 8]);
    }

    #[test]
    fn generate_iv_propagates_source_failure() {
        let mut iv = [0u8; 16];
        assert_eq!(generate_iv(&mut NoEntropy, &mut iv), Err(CryptoError::NoEntropySource));
    }

    #[test]
    fn generate_iv_fills_from_source() {
        let mut iv = [0u8; 16];
        generate_iv(&mut FixedEntropy(0x5A), &mut iv).unwrap();
        assert_eq!(iv, [0x5A; 16]);
    }

    #[test]
    fn aes256_cbc_roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let mut buf = [0u8; 32];
        buf[..11].copy_from_slice(b"hello world");
        let ct_len = aes256_cbc_encrypt(&key, &iv, &mut buf, 11).unwrap();
        let pt_len = aes256_cbc_decrypt(&key, &iv, &mut buf[..ct_len]).unwrap();
        assert_eq!(&buf[..pt_len], b"hello world");
    }

    #[test]
    fn pbkdf2_is_deterministic() {
        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        pbkdf2_hmac_sha512(b"password", b"salt", 1000, &mut out_a);
        pbkdf2_hmac_sha512(b"password", b"salt", 1000, &mut out_b);
        assert_eq!(out_a, out_b);
    }
}

#[cfg(test)]
mod hex {
    pub fn encode(bytes: [u8; 64]) -> std::string::String {
        use std::fmt::Write;
        let mut s = std::string::String::with_capacity(128);
        for b in bytes {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}
