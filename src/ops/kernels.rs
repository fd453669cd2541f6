//! Computational kernels shared by both variants.
//!
//! Keeping the arithmetic here is what makes the two variants produce identical
//! results: the cooperative variant calls the same functions on sub-ranges.

use std::collections::BTreeMap;
use std::ops::Range;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::{HarnessError, Result};

/// Size of the scratch payload read by read-repeat (1 MiB of `x`).
pub const SCRATCH_SIZE: usize = 1024 * 1024;

/// Derived key length in bytes.
pub const KEY_LENGTH: usize = 64;

/// Fibonacci depth used by the monopolizing compute workload.
pub const FIB_DEPTH: u32 = 30;

const PASSWORD: &[u8] = b"user-password";
const SALT_LENGTH: usize = 16;
const ENTRY_DATA_LENGTH: usize = 100;
const STREAM_LINE_PADDING: usize = 1_000;

pub(crate) fn scratch_payload() -> Vec<u8> {
    vec![b'x'; SCRATCH_SIZE]
}

/// Add `sqrt(i) * sin(i)` for every `i` in `range` to `sum`, in order.
///
/// Folding consecutive ranges through this function gives the exact same
/// `f64` as a single call over their union.
#[inline]
pub(crate) fn accumulate_terms(sum: f64, range: Range<u64>) -> f64 {
    range.fold(sum, |acc, i| {
        let x = i as f64;
        acc + x.sqrt() * x.sin()
    })
}

/// Naive exponential recursion. Deliberately expensive.
pub(crate) fn fib_recursive(n: u32) -> u64 {
    if n <= 1 {
        return u64::from(n);
    }
    fib_recursive(n - 1) + fib_recursive(n - 2)
}

pub(crate) fn random_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// PBKDF2-HMAC-SHA512 over the fixed demo password.
pub(crate) fn derive_key(salt: &[u8], iterations: u32) -> Result<[u8; KEY_LENGTH]> {
    if iterations == 0 {
        return Err(HarnessError::Derivation(
            "iteration count must be positive".to_string(),
        ));
    }
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha512>(PASSWORD, salt, iterations, &mut key);
    Ok(key)
}

/// One entry of the bulk-serialize object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GraphEntry {
    id: u64,
    data: String,
    nested: Nested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Nested {
    value: f64,
}

pub(crate) type Graph = BTreeMap<String, GraphEntry>;

/// Insert entries `range` into `graph`.
///
/// `nested.value` is a deterministic function of the id so both variants
/// serialize to the same text.
pub(crate) fn extend_graph(graph: &mut Graph, range: Range<u64>) {
    for id in range {
        graph.insert(
            format!("key_{id}"),
            GraphEntry {
                id,
                data: "x".repeat(ENTRY_DATA_LENGTH),
                nested: Nested {
                    value: (id as f64 * 0.618_033_988_749_895).fract(),
                },
            },
        );
    }
}

/// Serialize the graph to JSON and parse it back. Returns (text length, parsed keys).
pub(crate) fn round_trip(graph: &Graph) -> Result<(usize, usize)> {
    let text = serde_json::to_string(graph)?;
    let parsed: Graph = serde_json::from_str(&text)?;
    Ok((text.len(), parsed.len()))
}

pub(crate) fn stream_line(index: u64) -> String {
    format!("Line {index}: {}\n", "x".repeat(STREAM_LINE_PADDING))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_accumulation_is_bitwise_identical() {
        let single = accumulate_terms(0.0, 0..100_003);

        let mut chunked = 0.0;
        let mut lo = 0;
        while lo < 100_003 {
            let hi = (lo + 10_000).min(100_003);
            chunked = accumulate_terms(chunked, lo..hi);
            lo = hi;
        }

        assert_eq!(single.to_bits(), chunked.to_bits());
    }

    #[test]
    fn test_fib_recursive() {
        assert_eq!(fib_recursive(0), 0);
        assert_eq!(fib_recursive(1), 1);
        assert_eq!(fib_recursive(10), 55);
        assert_eq!(fib_recursive(FIB_DEPTH), 832_040);
    }

    #[test]
    fn test_derive_key_length_and_determinism() {
        let salt = [7u8; SALT_LENGTH];
        let a = derive_key(&salt, 10).unwrap();
        let b = derive_key(&salt, 10).unwrap();
        assert_eq!(a.len(), KEY_LENGTH);
        assert_eq!(a, b);

        let c = derive_key(&salt, 11).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_derive_key_rejects_zero_iterations() {
        let err = derive_key(&random_salt(), 0).unwrap_err();
        assert!(matches!(err, HarnessError::Derivation(_)));
    }

    #[test]
    fn test_graph_round_trip() {
        let mut whole = Graph::new();
        extend_graph(&mut whole, 0..250);

        let mut pieces = Graph::new();
        extend_graph(&mut pieces, 0..100);
        extend_graph(&mut pieces, 100..250);

        assert_eq!(whole, pieces);
        let (len, keys) = round_trip(&whole).unwrap();
        assert_eq!(keys, 250);
        assert_eq!(len, serde_json::to_string(&pieces).unwrap().len());
    }

    #[test]
    fn test_stream_line_shape() {
        let line = stream_line(7);
        assert!(line.starts_with("Line 7: x"));
        assert!(line.ends_with('\n'));
        assert_eq!(line.len(), "Line 7: ".len() + STREAM_LINE_PADDING + 1);
    }
}
