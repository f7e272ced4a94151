//! Data phase
//!
//! The sending side streams `Data` packets from the job's rank, then sends
//! `EndTransfer(Ask)` with the file size and digest when the partner takes
//! them. The receiving side writes blocks into a work file, checks ranks and
//! digests, and answers `EndTransfer` once the file is in place. The job's
//! rank is advanced and stored after every block.

use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};

use r66_common::digest::hash_file;
use r66_common::packet::{DataPacket, EndTransferPacket, Packet, Way};
use r66_common::ErrorCode;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::constants::*;
use crate::context::ServerContext;
use crate::db::rules::RuleRecord;
use crate::error::{R66Error, Result};
use crate::jobs::Job;
use crate::session::{Session, unexpected};
use crate::shaper::Flow;

// ========================================================================
// File locations
// ========================================================================

/// Reject names that could leave the transfer directories
///
/// # Errors
///
/// Returns a `FileNotAllowed` transfer error for empty or absolute names and
/// names with parent components.
pub fn check_filename(name: &str) -> Result<()> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if name.trim().is_empty() || escapes {
        return Err(R66Error::transfer(
            ErrorCode::FileNotAllowed,
            format!("{ERR_FILE_NOT_ALLOWED}{name}"),
        ));
    }
    Ok(())
}

/// File read when this host sends
pub fn source_file(config: &ServerConfig, rule: Option<&RuleRecord>, job: &Job) -> PathBuf {
    let dir = rule.map_or_else(
        || config.out_path(),
        |r| config.rule_dir(&r.send_path, config.out_path()),
    );
    dir.join(&job.filename)
}

/// Partial file written while this host receives
pub fn work_file(config: &ServerConfig, rule: Option<&RuleRecord>, job: &Job) -> PathBuf {
    let dir = rule.map_or_else(
        || config.work_path(),
        |r| config.rule_dir(&r.work_path, config.work_path()),
    );
    dir.join(format!(
        "{}_{}_{}.part",
        job.key.requester, job.key.requested, job.key.special_id
    ))
}

/// Where a received file lands once complete
pub fn final_file(config: &ServerConfig, rule: Option<&RuleRecord>, job: &Job) -> PathBuf {
    let dir = rule.map_or_else(
        || config.in_path(),
        |r| config.rule_dir(&r.recv_path, config.in_path()),
    );
    let name = Path::new(&job.filename)
        .file_name()
        .map_or_else(|| job.filename.clone().into(), PathBuf::from);
    dir.join(name)
}

/// Size of a file to send
///
/// # Errors
///
/// Returns a `FileNotFound` transfer error when it is missing.
pub async fn source_size(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(R66Error::transfer(
            ErrorCode::FileNotFound,
            format!("{ERR_FILE_NOT_FOUND}{}", path.display()),
        )),
    }
}

/// Highest rank a receiver can resume at, given what its work file holds
pub async fn resumable_rank(work: &Path, block_size: u32, rank: u32) -> u32 {
    match fs::metadata(work).await {
        Ok(meta) if block_size > 0 => {
            let held = meta.len() / u64::from(block_size);
            rank.min(u32::try_from(held).unwrap_or(u32::MAX))
        }
        _ => 0,
    }
}

// ========================================================================
// Sending
// ========================================================================

/// Stream the file from the job's rank and close the data phase
///
/// # Errors
///
/// Returns I/O errors, the partner's error, or a protocol error if the
/// partner does not acknowledge the end of transfer.
pub async fn send_blocks<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    source: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    session.begin_data_phase();
    let result = stream_file(session, ctx, source).await;
    session.end_data_phase();
    result
}

async fn stream_file<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    source: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let capability = session.capability()?.clone();
    let (mode, block_size, start) = {
        let job = session.job()?;
        (job.mode, job.block_size, job.rank)
    };
    let shaper = ctx.shaper.session();

    let mut file = File::open(source).await?;
    let size = file.metadata().await?.len();
    file.seek(SeekFrom::Start(u64::from(start) * u64::from(block_size)))
        .await?;

    let mut buf = vec![0u8; block_size as usize];
    let mut rank = start;
    loop {
        let read = read_block(&mut file, &mut buf).await?;
        if read == 0 {
            break;
        }
        let data = buf[..read].to_vec();
        let digest = mode
            .has_block_digest()
            .then(|| capability.digest.digest_hex(&data));
        shaper.acquire(Flow::Write, read as u64).await;
        session
            .send(&Packet::Data(DataPacket { rank, data, digest }))
            .await?;
        trace!(rank, bytes = read, "block sent");

        rank += 1;
        let job = session.job_mut()?;
        job.advance(rank);
        ctx.jobs.update(job).await?;
        if read < buf.len() {
            break;
        }
    }

    let digest = if capability.supports_final_hash {
        Some(hash_file(source, capability.digest).await?)
    } else {
        None
    };
    session
        .send(&Packet::EndTransfer(EndTransferPacket {
            way: Way::Ask,
            digest,
            size: capability.supports_file_size.then_some(size),
        }))
        .await?;

    match session.recv().await? {
        Packet::EndTransfer(end) if end.way == Way::Answer => {
            debug!(rank, bytes = shaper.bytes_written(), "data phase complete");
            Ok(())
        }
        other => Err(unexpected(&session.state, &other)),
    }
}

/// Fill `buf` unless the file ends first; returns the bytes read
async fn read_block(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ========================================================================
// Receiving
// ========================================================================

/// Receive blocks into `work`, verify, move to `target` and acknowledge
///
/// # Errors
///
/// Returns a transfer error on a rank gap (`TransferError`), a block or
/// final digest mismatch (`Md5Error`) or a size mismatch
/// (`SizeNotAllowed`); I/O and protocol errors otherwise.
pub async fn receive_blocks<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    work: &Path,
    target: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    session.begin_data_phase();
    let result = collect_file(session, ctx, work, target).await;
    session.end_data_phase();
    result
}

async fn collect_file<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    work: &Path,
    target: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let capability = session.capability()?.clone();
    let (mode, block_size, start) = {
        let job = session.job()?;
        (job.mode, job.block_size, job.rank)
    };
    let shaper = ctx.shaper.session();

    if let Some(dir) = work.parent() {
        fs::create_dir_all(dir).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(work)
        .await?;
    // drop anything past the resume point
    file.set_len(u64::from(start) * u64::from(block_size)).await?;
    file.seek(SeekFrom::End(0)).await?;

    let mut expected = start;
    let end = loop {
        match session.recv().await? {
            Packet::Data(block) => {
                if block.rank != expected {
                    return Err(R66Error::transfer(
                        ErrorCode::TransferError,
                        format!("{ERR_BAD_RANK}{} (expected {expected})", block.rank),
                    ));
                }
                if mode.has_block_digest() {
                    let computed = capability.digest.digest_hex(&block.data);
                    let matches = block
                        .digest
                        .as_deref()
                        .is_some_and(|d| d.eq_ignore_ascii_case(&computed));
                    if !matches {
                        return Err(R66Error::transfer(
                            ErrorCode::Md5Error,
                            format!("{ERR_BLOCK_DIGEST}{expected}"),
                        ));
                    }
                }
                shaper.acquire(Flow::Read, block.data.len() as u64).await;
                file.write_all(&block.data).await?;
                trace!(rank = expected, bytes = block.data.len(), "block received");

                expected += 1;
                let job = session.job_mut()?;
                job.advance(expected);
                ctx.jobs.update(job).await?;
            }
            Packet::EndTransfer(end) if end.way == Way::Ask => break end,
            other => return Err(unexpected(&session.state, &other)),
        }
    };
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if capability.supports_file_size
        && let Some(announced) = end.size
    {
        let written = fs::metadata(work).await?.len();
        if written != announced {
            return Err(R66Error::transfer(
                ErrorCode::SizeNotAllowed,
                format!("{ERR_SIZE_MISMATCH} ({written} != {announced})"),
            ));
        }
    }
    if capability.supports_final_hash
        && let Some(announced) = end.digest.as_deref()
    {
        let computed = hash_file(work, capability.digest).await?;
        if !announced.eq_ignore_ascii_case(&computed) {
            return Err(R66Error::transfer(ErrorCode::Md5Error, ERR_FINAL_DIGEST));
        }
    }

    move_into_place(work, target).await?;
    session
        .send(&Packet::EndTransfer(EndTransferPacket {
            way: Way::Answer,
            digest: None,
            size: None,
        }))
        .await?;
    debug!(
        rank = expected,
        bytes = shaper.bytes_read(),
        target = %target.display(),
        "file received"
    );
    Ok(())
}

/// Rename, falling back to copy across filesystems
async fn move_into_place(work: &Path, target: &Path) -> io::Result<()> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir).await?;
    }
    if fs::rename(work, target).await.is_err() {
        fs::copy(work, target).await?;
        fs::remove_file(work).await?;
    }
    Ok(())
}
