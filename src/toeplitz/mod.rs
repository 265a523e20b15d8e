// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Toeplitz hashing over flow endpoints
//!
//! RSS-capable NICs compute a Toeplitz hash over the source/destination
//! addresses and ports of a flow, keyed by a secret hash key. This module
//! computes the same hash in software. The key is expanded once into a
//! per-byte lookup cache, so hashing a flow is a handful of table lookups.
//!
//! ```
//! use rsspredict::toeplitz::{HashVariant, ToeplitzCache};
//! use std::net::SocketAddr;
//!
//! let cache = ToeplitzCache::new(&[0x6d; 40])?;
//! let src: SocketAddr = "192.0.2.1:1234".parse()?;
//! let dst: SocketAddr = "198.51.100.2:80".parse()?;
//! let hash = cache.hash_flow(&src, &dst, HashVariant::Toeplitz)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::Error;
use clap::ValueEnum;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Number of key bytes the hash window extends beyond the input length
const WINDOW_BYTES: usize = 4;

/// Variant of the RSS hash input layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HashVariant {
    /// Plain Toeplitz over src address, dst address, src port, dst port
    Toeplitz,

    /// Toeplitz over OR/XOR-folded fields (`src|dst`, `src^dst` for both
    /// addresses and ports), symmetric in source and destination
    SymmetricOrXor,
}

impl fmt::Display for HashVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Toeplitz => write!(f, "toeplitz"),
            Self::SymmetricOrXor => write!(f, "symmetric-or-xor"),
        }
    }
}

/// Precomputed hash contributions for one hash key
///
/// For every input byte position and byte value the cache holds the XOR of
/// the 32-bit key windows selected by the set bits of that value. A hash is
/// then the XOR of one cache entry per input byte.
#[derive(Debug)]
pub struct ToeplitzCache {
    key_len: usize,
    table: Vec<[u32; 256]>,
}

impl ToeplitzCache {
    /// Expand `key` into a lookup cache
    ///
    /// A key of `n` bytes can hash inputs of up to `n - 4` bytes; the usual
    /// 40-byte RSS key covers the 36-byte IPv6 4-tuple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the cache allocation fails.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        let max_input = key.len().saturating_sub(WINDOW_BYTES);

        let mut table = Vec::new();
        table.try_reserve_exact(max_input)?;

        for pos in 0..max_input {
            let mut row = [0_u32; 256];
            for (value, slot) in row.iter_mut().enumerate() {
                let mut contribution = 0_u32;
                for bit in 0..8_usize {
                    if value & (0x80_usize >> bit) != 0 {
                        contribution ^= key_window(key, pos, bit);
                    }
                }
                *slot = contribution;
            }
            table.push(row);
        }

        Ok(Self {
            key_len: key.len(),
            table,
        })
    }

    /// Hash raw input bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyTooShort`] if `data` is longer than the key
    /// allows.
    pub fn hash(&self, data: &[u8]) -> Result<u32, Error> {
        if data.len() > self.table.len() {
            return Err(Error::KeyTooShort {
                key_len: self.key_len,
                input_len: data.len(),
            });
        }

        Ok(data
            .iter()
            .zip(&self.table)
            .fold(0, |hash, (byte, row)| hash ^ row[usize::from(*byte)]))
    }

    /// Hash the 4-tuple of a flow
    ///
    /// # Errors
    ///
    /// Returns [`Error::FamilyMismatch`] if `src` and `dst` are not of the
    /// same address family and [`Error::KeyTooShort`] if the key cannot
    /// cover the tuple (for IPv6 the key must be at least 40 bytes).
    pub fn hash_flow(
        &self,
        src: &SocketAddr,
        dst: &SocketAddr,
        variant: HashVariant,
    ) -> Result<u32, Error> {
        self.hash(&flow_input(src, dst, variant)?)
    }
}

/// 32-bit window of `key` starting at bit `pos * 8 + bit`
fn key_window(key: &[u8], pos: usize, bit: usize) -> u32 {
    let window = (u32::from(key[pos]) << 24)
        | (u32::from(key[pos + 1]) << 16)
        | (u32::from(key[pos + 2]) << 8)
        | u32::from(key[pos + 3]);

    if bit == 0 {
        window
    } else {
        (window << bit) | (u32::from(key[pos + WINDOW_BYTES]) >> (8 - bit))
    }
}

fn flow_input(src: &SocketAddr, dst: &SocketAddr, variant: HashVariant) -> Result<Vec<u8>, Error> {
    match (src.ip(), dst.ip()) {
        (IpAddr::V4(src_ip), IpAddr::V4(dst_ip)) => Ok(tuple_input(
            &src_ip.octets(),
            &dst_ip.octets(),
            src.port(),
            dst.port(),
            variant,
        )),
        (IpAddr::V6(src_ip), IpAddr::V6(dst_ip)) => Ok(tuple_input(
            &src_ip.octets(),
            &dst_ip.octets(),
            src.port(),
            dst.port(),
            variant,
        )),
        _ => Err(Error::FamilyMismatch),
    }
}

fn tuple_input(
    src_ip: &[u8],
    dst_ip: &[u8],
    src_port: u16,
    dst_port: u16,
    variant: HashVariant,
) -> Vec<u8> {
    let mut input = Vec::with_capacity(src_ip.len() * 2 + 4);

    match variant {
        HashVariant::Toeplitz => {
            input.extend_from_slice(src_ip);
            input.extend_from_slice(dst_ip);
            input.extend_from_slice(&src_port.to_be_bytes());
            input.extend_from_slice(&dst_port.to_be_bytes());
        }
        HashVariant::SymmetricOrXor => {
            input.extend(src_ip.iter().zip(dst_ip).map(|(s, d)| s | d));
            input.extend(src_ip.iter().zip(dst_ip).map(|(s, d)| s ^ d));
            input.extend_from_slice(&(src_port | dst_port).to_be_bytes());
            input.extend_from_slice(&(src_port ^ dst_port).to_be_bytes());
        }
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    /// Reference key of the RSS verification suite
    const VERIFICATION_KEY: [u8; 40] = [
        0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f,
        0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
        0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
    ];

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_ipv4_verification_vectors() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let vectors = [
            ("66.9.149.187:2794", "161.142.100.80:1766", 0x51cc_c178_u32),
            ("199.92.111.2:14230", "65.69.140.83:4739", 0xc626_b0ea),
            ("24.19.198.95:12898", "12.22.207.184:38024", 0x5c2b_394a),
            ("38.27.205.30:48228", "209.142.163.6:2217", 0xafc7_327f),
            ("153.39.163.191:44251", "202.188.127.2:1303", 0x10e8_28a2),
        ];

        for (src, dst, expected) in vectors {
            let hash = cache
                .hash_flow(&addr(src), &addr(dst), HashVariant::Toeplitz)
                .unwrap();
            assert_eq!(hash, expected, "{src} -> {dst}");
        }
    }

    #[test]
    fn test_ipv4_address_only_vectors() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let vectors = [
            ([66, 9, 149, 187], [161, 142, 100, 80], 0x323e_8fc2_u32),
            ([199, 92, 111, 2], [65, 69, 140, 83], 0xd718_262a),
            ([24, 19, 198, 95], [12, 22, 207, 184], 0xd2d0_a5de),
            ([38, 27, 205, 30], [209, 142, 163, 6], 0x8298_9176),
            ([153, 39, 163, 191], [202, 188, 127, 2], 0x5d18_09c5),
        ];

        for (src, dst, expected) in vectors {
            let mut input = Vec::new();
            input.extend_from_slice(&src);
            input.extend_from_slice(&dst);
            assert_eq!(cache.hash(&input).unwrap(), expected, "{src:?} -> {dst:?}");
        }
    }

    #[test]
    fn test_ipv6_verification_vectors() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let vectors = [
            (
                "[3ffe:2501:200:1fff::7]:2794",
                "[3ffe:2501:200:3::1]:1766",
                0x4020_7d3d_u32,
            ),
            (
                "[3ffe:501:8::260:97ff:fe40:efab]:14230",
                "[ff02::1]:4739",
                0xdde5_1bbf,
            ),
        ];

        for (src, dst, expected) in vectors {
            let hash = cache
                .hash_flow(&addr(src), &addr(dst), HashVariant::Toeplitz)
                .unwrap();
            assert_eq!(hash, expected, "{src} -> {dst}");
        }
    }

    #[test]
    fn test_ipv6_address_only_vectors() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let vectors = [
            ("3ffe:2501:200:1fff::7", "3ffe:2501:200:3::1", 0x2cc1_8cd5_u32),
            ("3ffe:501:8::260:97ff:fe40:efab", "ff02::1", 0x0f0c_461c),
        ];

        for (src, dst, expected) in vectors {
            let src_ip: Ipv6Addr = src.parse().unwrap();
            let dst_ip: Ipv6Addr = dst.parse().unwrap();
            let mut input = Vec::new();
            input.extend_from_slice(&src_ip.octets());
            input.extend_from_slice(&dst_ip.octets());
            assert_eq!(cache.hash(&input).unwrap(), expected, "{src} -> {dst}");
        }
    }

    #[test]
    fn test_zero_key_hashes_to_zero() {
        // every key window is zero, so no input bit can contribute
        let cache = ToeplitzCache::new(&[0; 40]).unwrap();

        let hash = cache
            .hash_flow(
                &addr("66.9.149.187:2794"),
                &addr("161.142.100.80:1766"),
                HashVariant::Toeplitz,
            )
            .unwrap();
        assert_eq!(hash, 0);

        assert_eq!(cache.hash(&[0xff; 36]).unwrap(), 0);
    }

    #[test]
    fn test_symmetric_or_xor_is_symmetric() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let pairs = [
            ("66.9.149.187:2794", "161.142.100.80:1766"),
            ("[3ffe:2501:200:1fff::7]:2794", "[3ffe:2501:200:3::1]:1766"),
        ];

        for (first, second) in pairs {
            let forward = cache
                .hash_flow(&addr(first), &addr(second), HashVariant::SymmetricOrXor)
                .unwrap();
            let reverse = cache
                .hash_flow(&addr(second), &addr(first), HashVariant::SymmetricOrXor)
                .unwrap();
            assert_eq!(forward, reverse, "{first} <-> {second}");
        }
    }

    #[test]
    fn test_symmetric_or_xor_input_layout() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        let src = addr("66.9.149.187:2794");
        let dst = addr("161.142.100.80:1766");

        let mut input: Vec<u8> = Vec::new();
        input.extend([66_u8 | 161, 9 | 142, 149 | 100, 187 | 80]);
        input.extend([66_u8 ^ 161, 9 ^ 142, 149 ^ 100, 187 ^ 80]);
        input.extend_from_slice(&(2794 | 1766_u16).to_be_bytes());
        input.extend_from_slice(&(2794 ^ 1766_u16).to_be_bytes());

        assert_eq!(
            cache
                .hash_flow(&src, &dst, HashVariant::SymmetricOrXor)
                .unwrap(),
            cache.hash(&input).unwrap()
        );
    }

    #[test]
    fn test_input_exceeding_key_rejected() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        assert_eq!(cache.hash(&[0; 36]).unwrap(), 0);

        assert!(matches!(
            cache.hash(&[0; 37]),
            Err(Error::KeyTooShort {
                key_len: 40,
                input_len: 37
            })
        ));
    }

    #[test]
    fn test_ipv6_flow_needs_long_key() {
        // 20-byte key covers the IPv4 tuple but not the IPv6 tuple
        let cache = ToeplitzCache::new(&[0x6d; 20]).unwrap();

        assert!(cache
            .hash_flow(
                &addr("192.0.2.1:80"),
                &addr("198.51.100.2:80"),
                HashVariant::Toeplitz
            )
            .is_ok());

        assert!(matches!(
            cache.hash_flow(
                &addr("[2001:db8::1]:80"),
                &addr("[2001:db8::2]:80"),
                HashVariant::Toeplitz
            ),
            Err(Error::KeyTooShort { .. })
        ));
    }

    #[test]
    fn test_family_mismatch() {
        let cache = ToeplitzCache::new(&VERIFICATION_KEY).unwrap();

        assert!(matches!(
            cache.hash_flow(
                &addr("192.0.2.1:80"),
                &addr("[2001:db8::1]:80"),
                HashVariant::Toeplitz
            ),
            Err(Error::FamilyMismatch)
        ));
    }
}
