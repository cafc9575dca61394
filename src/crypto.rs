// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Cryptographic primitives used by inbound verification, outbound signing
//! and event id generation.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Crypto capability injected into the verifier, notifier and dispatcher.
pub trait Crypto: Send + Sync {
    /// Lowercase hex HMAC-SHA256 of `message` keyed with `key`.
    fn hmac_sha256_hex(&self, key: &[u8], message: &[u8]) -> String;

    /// Constant-time equality. Inputs of different length compare unequal
    /// without inspecting their contents.
    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool;

    /// `len` bytes from a cryptographically secure generator.
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

/// Default implementation on top of `hmac`, `sha2`, `subtle` and `rand`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacCrypto;

impl HmacCrypto {
    pub fn new() -> Self {
        Self
    }
}

impl Crypto for HmacCrypto {
    fn hmac_sha256_hex(&self, key: &[u8], message: &[u8]) -> String {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = match HmacSha256::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any size"),
        };
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }
}
