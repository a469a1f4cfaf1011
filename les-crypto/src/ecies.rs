// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! ECIES as used by the RLPx handshake: secp256k1 ECDH, NIST SP 800-56
//! concatenation KDF over SHA-256, AES-128-CTR and HMAC-SHA256.
//!
//! Ciphertext layout is `0x04 || R(64) || iv(16) || c || tag(32)` where `R` is
//! a fresh ephemeral public key and `tag = HMAC(sha256(k_m), iv || c)`.

use hmac::Mac;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::aes::{aes128_ctr_apply, AES128_KEY_SIZE, AES_BLOCK_SIZE};
use crate::key::{PrivateKey, PublicKey, NODE_ID_SIZE};
use crate::mac::{hmac_sha256, HmacSha256};

const PUBLIC_SIZE: usize = NODE_ID_SIZE + 1;
const TAG_SIZE: usize = 32;

/// Bytes ECIES adds to a plaintext.
pub const ECIES_OVERHEAD: usize = PUBLIC_SIZE + AES_BLOCK_SIZE + TAG_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EciesError {
    #[error("ecies: ciphertext too short ({0} bytes)")]
    TooShort(usize),

    #[error("ecies: invalid ephemeral public key")]
    InvalidEphemeralKey,

    #[error("ecies: message authentication failed")]
    MacMismatch,
}

struct Keys {
    encryption: Zeroizing<[u8; AES128_KEY_SIZE]>,
    mac: Zeroizing<[u8; 32]>,
}

fn derive_keys(shared: &[u8]) -> Keys {
    // one KDF round (counter = 1) yields the 32 bytes needed
    let mut h = Sha256::new();
    h.update(1u32.to_be_bytes());
    h.update(shared);
    let material: Zeroizing<[u8; 32]> = Zeroizing::new(h.finalize().into());

    let mut encryption = Zeroizing::new([0u8; AES128_KEY_SIZE]);
    encryption.copy_from_slice(&material[..AES128_KEY_SIZE]);
    let mac = Zeroizing::new(Sha256::digest(&material[AES128_KEY_SIZE..]).into());
    Keys { encryption, mac }
}

fn tag(mac_key: &[u8; 32], iv: &[u8], cipher: &[u8]) -> HmacSha256 {
    let mut mac = hmac_sha256(mac_key);
    mac.update(iv);
    mac.update(cipher);
    mac
}

pub fn encrypt<R: RngCore + CryptoRng>(rng: &mut R, recipient: &PublicKey, plaintext: &[u8]) -> Vec<u8> {
    let ephemeral = PrivateKey::generate(rng);
    let keys = derive_keys(ephemeral.ecdh(recipient).as_slice());

    let mut iv = [0u8; AES_BLOCK_SIZE];
    rng.fill_bytes(&mut iv);

    let mut out = Vec::with_capacity(plaintext.len() + ECIES_OVERHEAD);
    out.extend_from_slice(&ephemeral.public_key().to_uncompressed());
    out.extend_from_slice(&iv);

    let start = out.len();
    out.extend_from_slice(plaintext);
    aes128_ctr_apply(&keys.encryption, &iv, &mut out[start..]);

    let tag = tag(&keys.mac, &iv, &out[start..]).finalize().into_bytes();
    out.extend_from_slice(&tag);
    out
}

pub fn decrypt(private: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, EciesError> {
    if ciphertext.len() < ECIES_OVERHEAD {
        return Err(EciesError::TooShort(ciphertext.len()));
    }

    let (ephemeral, rest) = ciphertext.split_at(PUBLIC_SIZE);
    let (iv, rest) = rest.split_at(AES_BLOCK_SIZE);
    let (cipher, expected) = rest.split_at(rest.len() - TAG_SIZE);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral)
        .map_err(|_| EciesError::InvalidEphemeralKey)?;
    let keys = derive_keys(private.ecdh(&ephemeral).as_slice());

    tag(&keys.mac, iv, cipher)
        .verify_slice(expected)
        .map_err(|_| EciesError::MacMismatch)?;

    let mut counter = [0u8; AES_BLOCK_SIZE];
    counter.copy_from_slice(iv);
    let mut plain = cipher.to_vec();
    aes128_ctr_apply(&keys.encryption, &counter, &mut plain);
    Ok(plain)
}

#[cfg(test)]
mod test {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::rand::Random;

    const RECEIVER: [u8; 32] = hex!("c45f950382d542169ea207959ee0220ec1491755abe405cd7498d6b16adb6df8");

    // auth message from the RLPx handshake test vectors
    const AUTH_CIPHERTEXT: [u8; 307] = hex!(
        "04a0274c5951e32132e7f088c9bdfdc76c9d91f0dc6078e848f8e3361193dbdc43b94351ea3d89e4ff33ddcefbc80070"
        "498824857f499656c4f79bbd97b6c51a514251d69fd1785ef8764bd1d262a883f780964cce6a14ff206daf1206aa073a"
        "2d35ce2697ebf3514225bef186631b2fd2316a4b7bcdefec8d75a1025ba2c5404a34e7795e1dd4bc01c6113ece07b0df"
        "13b69d3ba654a36e35e69ff9d482d88d2f0228e7d96fe11dccbb465a1831c7d4ad3a026924b182fc2bdfe016a6944312"
        "021da5cc459713b13b86a686cf34d6fe6615020e4acf26bf0d5b7579ba813e7723eb95b3cef9942f01a58bd61baee7c9"
        "bdd438956b426a4ffe238e61746a8c93d5e10680617c82e48d706ac4953f5e1c4c4f7d013c87d34a06626f498f34576d"
        "c017fdd3d581e83cfd26cf125b6d2bda1f1d56"
    );

    #[test]
    fn test_decrypt_known_auth() {
        let receiver = PrivateKey::new(RECEIVER).expect("valid key");
        let plain = decrypt(&receiver, &AUTH_CIPHERTEXT).expect("decrypt should be ok");
        assert_eq!(plain.len(), 194);
        // nonce and version trail the payload
        assert_eq!(
            &plain[161..],
            &hex!("cd26fecb93657d1cd9e9eaf4f8be720b56dd1d39f190c4e1c6b7ec66f077bb1100")
        );
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let mut random = Random::with_nonce(b"ecies", b"test");
        let recipient = random.gen_keypair();

        let sealed = encrypt(&mut random, &recipient.public_key, b"hello peer");
        assert_eq!(sealed.len(), 10 + ECIES_OVERHEAD);
        assert_eq!(sealed[0], 0x04);

        let opened = decrypt(&recipient.private_key, &sealed).expect("decrypt should be ok");
        assert_eq!(opened, b"hello peer");

        let stranger = random.gen_keypair();
        assert_eq!(decrypt(&stranger.private_key, &sealed), Err(EciesError::MacMismatch));
    }

    #[test]
    fn test_decrypt_rejects_tampering() {
        let receiver = PrivateKey::new(RECEIVER).expect("valid key");

        let mut tampered = AUTH_CIPHERTEXT;
        tampered[100] ^= 0x01;
        assert_eq!(decrypt(&receiver, &tampered), Err(EciesError::MacMismatch));

        let mut bad_point = AUTH_CIPHERTEXT;
        bad_point[0] = 0x05;
        assert_eq!(decrypt(&receiver, &bad_point), Err(EciesError::InvalidEphemeralKey));

        assert_eq!(decrypt(&receiver, &AUTH_CIPHERTEXT[..100]), Err(EciesError::TooShort(100)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sealed_opens_once(
            plain in proptest::collection::vec(any::<u8>(), 0..1024),
            index in any::<prop::sample::Index>(),
        ) {
            let mut random = Random::with_nonce(b"ecies", b"prop");
            let recipient = random.gen_keypair();

            let sealed = encrypt(&mut random, &recipient.public_key, &plain);
            prop_assert_eq!(sealed.len(), plain.len() + ECIES_OVERHEAD);
            prop_assert_eq!(decrypt(&recipient.private_key, &sealed).unwrap(), plain);

            // any byte after the ephemeral key prefix is covered by the tag
            let mut tampered = sealed.clone();
            let at = PUBLIC_SIZE + index.index(sealed.len() - PUBLIC_SIZE);
            tampered[at] ^= 0x80;
            prop_assert_eq!(decrypt(&recipient.private_key, &tampered), Err(EciesError::MacMismatch));
        }
    }
}
