// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The signed message codec. Every message exchanged between mesh peers
//! is wrapped in an [`Envelope`] carrying a timestamp and an HMAC-SHA256
//! tag over `(secret, timestamp, sender pubkey, canonical payload)`.
//! Canonicalization is delegated to `serde_json`'s default `BTreeMap`-
//! backed object representation, which sorts keys deterministically
//! without opting into the `preserve_order` feature - this is what makes
//! `canonical()` reproducible across independent encodings of the same
//! logical payload, so two implementations signing the same message agree
//! on its byte form.

use bitcoin_hashes::hmac::{Hmac, HmacEngine};
use bitcoin_hashes::{sha256, Hash, HashEngine};
use secp256k1::PublicKey;
use serde::Serialize;

use crate::error::ProtocolError;

/// Freshness window: a received message's timestamp may differ from the
/// local clock by at most this many milliseconds in either direction.
pub const FRESHNESS_WINDOW_MS: i64 = 5_000;

/// Serializes `message` into its canonical byte form: a JSON value whose
/// objects are built from `serde_json`'s default `BTreeMap`, so field order
/// is always the sorted key order regardless of struct declaration order.
pub fn canonical<T: Serialize>(message: &T) -> Vec<u8> {
    let value = serde_json::to_value(message)
        .expect("message types are always representable as JSON");
    serde_json::to_vec(&value).expect("serde_json::Value always serializes")
}

/// Computes the HMAC-SHA256 signature tag for a message, keyed by the
/// cluster secret, over `timestamp || sender_pubkey || canonical(message)`.
pub fn sign<T: Serialize>(
    secret: &[u8],
    timestamp: u64,
    sender: &PublicKey,
    message: &T,
) -> String {
    let mut engine = HmacEngine::<sha256::Hash>::new(secret);
    engine.input(&timestamp.to_be_bytes());
    engine.input(&sender.serialize());
    engine.input(&canonical(message));
    let tag = Hmac::<sha256::Hash>::from_engine(engine);
    hex_encode(&tag.into_inner())
}

/// Verifies a received envelope's signature and freshness. `now_ms` is
/// injected so tests can control the clock deterministically.
pub fn verify<T: Serialize>(
    secret: &[u8],
    timestamp: u64,
    sender: &PublicKey,
    message: &T,
    signature: &str,
    now_ms: u64,
) -> Result<(), ProtocolError> {
    let expected = sign(secret, timestamp, sender, message);
    if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        return Err(ProtocolError::BadSignature);
    }
    let drift = now_ms as i64 - timestamp as i64;
    if drift.abs() > FRESHNESS_WINDOW_MS {
        return Err(ProtocolError::Stale(drift));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).expect("writing to String never fails");
    }
    s
}

/// Derives the rendezvous topic for the mesh transport: `SHA-256(secret)`.
pub fn rendezvous_topic(secret: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(secret).into_inner()
}
