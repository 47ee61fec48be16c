//! Socket-pair echo round trip.

use std::thread;

use bufhandle_core::{LogEmitter, Registry, Shutdown, api};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::copy::hex_lower;
use crate::{HarnessError, Result, log_report};

const LOCAL: i32 = 1;
const STREAM: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EchoReport {
    pub bytes: u64,
    pub sha256: String,
    /// `recv` calls the echoing peer needed.
    pub peer_receives: u64,
}

/// Send `payload` through one end of a socket pair and read back what a
/// peer thread echoes from the other end.
pub fn echo_roundtrip(reg: &Registry, payload: &[u8], log: &mut LogEmitter) -> Result<EchoReport> {
    let (near, far) = api::socketpair(reg, LOCAL, STREAM, 0)?;

    let peer = thread::spawn(move || -> Result<u64> {
        let mut receives = 0;
        loop {
            let chunk = api::recv(&far, None)?;
            receives += 1;
            if chunk.is_empty() {
                break;
            }
            api::write(&far, &chunk)?;
        }
        api::shutdown(&far, Shutdown::Write)?;
        Ok(receives)
    });

    // Echoed bytes are drained between sends so neither side's socket
    // buffer fills up.
    let mut echoed = Vec::with_capacity(payload.len());
    let mut chunk = vec![0u8; reg.config().recv_chunk_size];
    for piece in payload.chunks(reg.config().recv_chunk_size) {
        api::write(&near, piece)?;
        loop {
            let n = api::read(&near, &mut chunk)?;
            echoed.extend_from_slice(&chunk[..n]);
            if n == 0 || api::poll(&near, 1, 0, 0)? == 0 {
                break;
            }
        }
    }
    api::shutdown(&near, Shutdown::Write)?;
    loop {
        let n = api::read(&near, &mut chunk)?;
        if n == 0 {
            break;
        }
        echoed.extend_from_slice(&chunk[..n]);
    }

    let peer_receives = peer.join().map_err(|_| HarnessError::EchoPeer)??;
    if echoed != payload {
        return Err(HarnessError::EchoMismatch {
            sent: payload.len(),
            received: echoed.len(),
        });
    }

    let report = EchoReport {
        bytes: payload.len() as u64,
        sha256: hex_lower(&Sha256::digest(payload)),
        peer_receives,
    };
    log_report(log, "echo", report.bytes, &report)?;
    Ok(report)
}
