// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::Error;
use crate::rss_query::RssQuery;
use crate::toeplitz::HashVariant;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::process::Command;

/// Read RSS state via the `ethtool` command line tool
///
/// Every query runs `ethtool -x <interface>` and parses its output, so
/// each call observes the current driver state.
pub struct EthtoolQuery;

/// Parsed output of `ethtool -x`
#[derive(Debug)]
struct RxFlowHash {
    ring_count: u32,
    indir: Vec<u32>,
    key: Option<Vec<u8>>,
    hash_function: Option<String>,
    input_transformation: Option<String>,
}

/// Section of `ethtool -x` output currently being parsed
#[derive(Clone, Copy)]
enum Section {
    None,
    Indir,
    Key,
    Functions,
    Transformations,
}

impl EthtoolQuery {
    /// Create a new ethtool query
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Determine the hash algorithm variant configured on the driver
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] if the driver does not report a
    /// hash function and [`Error::Unsupported`] if it reports one the
    /// prediction cannot model (e.g. `xor` or `crc32`).
    pub async fn hash_variant(&self, interface: &str) -> Result<HashVariant, Error> {
        let rxfh = Self::show_rxfh(interface).await?;

        let function = rxfh.hash_function.ok_or_else(|| {
            Error::ConfigMissing(format!("RSS hash function report for {interface}"))
        })?;

        if function != "toeplitz" {
            return Err(Error::Unsupported(format!("RSS hash function {function}")));
        }

        match rxfh.input_transformation.as_deref() {
            None => Ok(HashVariant::Toeplitz),
            Some("symmetric-or-xor") => Ok(HashVariant::SymmetricOrXor),
            Some(other) => Err(Error::Unsupported(format!(
                "RSS input transformation {other}"
            ))),
        }
    }

    async fn show_rxfh(interface: &str) -> Result<RxFlowHash, Error> {
        let mut cmd = Command::new("ethtool");
        cmd.arg("-x").arg(interface);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute command {:?}", cmd.as_std()))
            .map_err(Error::QueryFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8(output.stderr)
                .with_context(|| {
                    format!(
                        "Invalid UTF-8 sequence returned when executing\n{:?}",
                        cmd.as_std()
                    )
                })
                .map_err(Error::QueryFailed)?;

            if stderr.contains("Operation not supported") {
                return Err(Error::Unsupported(format!(
                    "RX flow hash indirection on {interface}"
                )));
            }

            return Err(Error::QueryFailed(anyhow!(
                "Command\n{:?}\nfailed with status: {}, {}",
                cmd.as_std(),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| {
                format!(
                    "Invalid UTF-8 sequence returned when executing\n{:?}",
                    cmd.as_std()
                )
            })
            .map_err(Error::QueryFailed)?;

        parse_rx_flow_hash(&stdout)
    }
}

impl Default for EthtoolQuery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RssQuery for EthtoolQuery {
    async fn hash_key(&self, interface: &str) -> Result<Vec<u8>, Error> {
        Self::show_rxfh(interface)
            .await?
            .key
            .ok_or_else(|| Error::Unsupported(format!("RSS hash key on {interface}")))
    }

    async fn indir_table_size(&self, interface: &str) -> Result<u32, Error> {
        let rxfh = Self::show_rxfh(interface).await?;
        u32::try_from(rxfh.indir.len()).map_err(|source| Error::QueryFailed(source.into()))
    }

    async fn queue_count(&self, interface: &str) -> Result<u32, Error> {
        Ok(Self::show_rxfh(interface).await?.ring_count)
    }

    async fn indir_entry(&self, interface: &str, index: u32) -> Result<u32, Error> {
        let rxfh = Self::show_rxfh(interface).await?;

        usize::try_from(index)
            .ok()
            .and_then(|i| rxfh.indir.get(i))
            .copied()
            .ok_or_else(|| {
                Error::QueryFailed(anyhow!(
                    "indirection table of {interface} has no entry {index}"
                ))
            })
    }
}

fn parse_rx_flow_hash(text: &str) -> Result<RxFlowHash, Error> {
    let mut ring_count = None;
    let mut indir = Vec::new();
    let mut key = None;
    let mut hash_function = None;
    let mut input_transformation = None;
    let mut section = Section::None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("RX flow hash indirection table") {
            ring_count = Some(parse_ring_count(trimmed)?);
            section = Section::Indir;
        } else if trimmed == "RSS hash key:" {
            section = Section::Key;
        } else if trimmed == "RSS hash function:" {
            section = Section::Functions;
        } else if trimmed == "RSS input transformation:" {
            section = Section::Transformations;
        } else {
            match section {
                Section::Indir => parse_indir_row(trimmed, &mut indir)?,
                Section::Key => {
                    // drivers without a key report "Operation not supported" here
                    if let Ok(parsed) = parse_key(trimmed) {
                        key = Some(parsed);
                    }
                    section = Section::None;
                }
                Section::Functions => {
                    if let Some(name) = parse_enabled(trimmed) {
                        hash_function = Some(name);
                    }
                }
                Section::Transformations => {
                    if let Some(name) = parse_enabled(trimmed) {
                        input_transformation = Some(name);
                    }
                }
                Section::None => {}
            }
        }
    }

    let ring_count = ring_count.ok_or_else(|| {
        Error::QueryFailed(anyhow!("No RX flow hash indirection table in ethtool output"))
    })?;

    Ok(RxFlowHash {
        ring_count,
        indir,
        key,
        hash_function,
        input_transformation,
    })
}

/// Extract N from "RX flow hash indirection table for IF with N RX ring(s):"
fn parse_ring_count(line: &str) -> Result<u32, Error> {
    let mut tokens = line.split_whitespace();

    if tokens.find(|token| *token == "with").is_none() {
        return Err(Error::QueryFailed(anyhow!(
            "Malformed indirection table header: {line}"
        )));
    }

    tokens
        .next()
        .and_then(|count| count.parse().ok())
        .ok_or_else(|| {
            Error::QueryFailed(anyhow!("Malformed indirection table header: {line}"))
        })
}

/// Parse one "index:   q q q q q q q q" indirection table row
fn parse_indir_row(line: &str, indir: &mut Vec<u32>) -> Result<(), Error> {
    let (label, values) = line
        .split_once(':')
        .ok_or_else(|| Error::QueryFailed(anyhow!("Malformed indirection table row: {line}")))?;

    label
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::QueryFailed(anyhow!("Malformed indirection table row: {line}")))?;

    for value in values.split_whitespace() {
        let queue = value
            .parse()
            .map_err(|_| Error::QueryFailed(anyhow!("Malformed indirection table row: {line}")))?;
        indir.push(queue);
    }

    Ok(())
}

/// Parse a "aa:bb:cc:..." hash key line
fn parse_key(line: &str) -> Result<Vec<u8>, Error> {
    line.split(':')
        .map(|byte| u8::from_str_radix(byte, 16))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Error::QueryFailed(anyhow!("Malformed hash key line: {line}")))
}

/// Return the name from a "name: on" line, None for "name: off"
fn parse_enabled(line: &str) -> Option<String> {
    let (name, state) = line.split_once(':')?;
    (state.trim() == "on").then(|| name.trim().to_owned())
}
