// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed frame codec (spec component B): an 8-byte little-endian
//! size `N`, then exactly `N` bytes of payload. No padding, no checksum —
//! the underlying stream is assumed reliable.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::FrameError;

pub const HEADER_LEN: usize = 8;

pub(crate) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow!("{label} timeout")),
        },
    }
}

/// Writes one frame: size prefix then payload. The two writes are issued
/// back to back from a single call so the prefix is never interleaved with
/// another frame's bytes on the same socket.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    payload: &[u8],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let len = payload.len() as i64;
    io_with_timeout(
        "write frame size",
        w.write_all(&len.to_le_bytes()),
        timeout,
        cancel,
    )
    .await?;
    if !payload.is_empty() {
        io_with_timeout("write frame body", w.write_all(payload), timeout, cancel).await?;
    }
    Ok(())
}

/// Reads the 8-byte size prefix. Returns `Ok(None)` on a clean EOF before any
/// bytes of the prefix arrived (peer closed the connection).
pub async fn read_frame_header<R: AsyncRead + Unpin>(
    r: &mut R,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<i64>> {
    let mut buf = [0u8; HEADER_LEN];
    let mut read_total = 0usize;
    loop {
        let n = io_with_timeout("read frame size", r.read(&mut buf[read_total..]), timeout, cancel)
            .await?;
        if n == 0 {
            if read_total == 0 {
                return Ok(None);
            }
            return Err(anyhow!("connection closed mid-header"));
        }
        read_total += n;
        if read_total == HEADER_LEN {
            return Ok(Some(i64::from_le_bytes(buf)));
        }
    }
}

pub fn validate_frame_size(size: i64, max_frame_bytes: u64) -> Result<usize> {
    if size <= 0 {
        return Err(FrameError::NonPositiveSize(size).into());
    }
    if size as u64 > max_frame_bytes {
        return Err(FrameError::TooLarge {
            size,
            max: max_frame_bytes,
        }
        .into());
    }
    Ok(size as usize)
}

/// Reads exactly `len` bytes of frame body, timing each read individually.
pub async fn read_frame_body<R: AsyncRead + Unpin>(
    r: &mut R,
    len: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut read_total = 0usize;
    while read_total < len {
        let n = io_with_timeout(
            "read frame body",
            r.read(&mut buf[read_total..]),
            timeout,
            cancel,
        )
        .await?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        read_total += n;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn writes_then_reads_a_frame() {
        let (mut a, mut b) = duplex(4096);
        let cancel = CancellationToken::new();
        write_frame(&mut a, b"hello world", Duration::from_secs(1), &cancel)
            .await
            .expect("write");

        let size = read_frame_header(&mut b, Duration::from_secs(1), &cancel)
            .await
            .expect("read header")
            .expect("not eof");
        let len = validate_frame_size(size, 1024).expect("valid size");
        let body = read_frame_body(&mut b, len, Duration::from_secs(1), &cancel)
            .await
            .expect("read body");
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let err = validate_frame_size(5 * 1024 * 1024, 1024).expect_err("oversized");
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn rejects_non_positive_size() {
        let err = validate_frame_size(0, 1024).expect_err("non-positive");
        assert!(err.to_string().contains("not positive"));
    }

    #[tokio::test]
    async fn large_frame_round_trips() {
        let (mut a, mut b) = duplex(8 * 1024 * 1024);
        let cancel = CancellationToken::new();
        let payload = vec![0x42u8; 5 * 1024 * 1024];
        let writer = {
            let payload = payload.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                write_frame(&mut a, &payload, Duration::from_secs(5), &cancel)
                    .await
                    .expect("write");
            })
        };
        let size = read_frame_header(&mut b, Duration::from_secs(5), &cancel)
            .await
            .expect("read header")
            .expect("not eof");
        let len = validate_frame_size(size, 64 * 1024 * 1024).expect("valid size");
        let body = read_frame_body(&mut b, len, Duration::from_secs(5), &cancel)
            .await
            .expect("read body");
        writer.await.expect("writer task");
        assert_eq!(body.len(), payload.len());
        assert_eq!(body, payload);
    }
}
