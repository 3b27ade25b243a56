//! Server, client and observer sides of the handshake.
//!
//! Token accounting on semaphore 0:
//!
//! 1. the publishing client writes its segments at offset 0 and adds 1;
//! 2. the server waits for 1, writes the summaries right after the segments,
//!    then adds [`RESULT_TOKENS`] for the publisher and for every observer;
//! 3. each reader waits for [`RESULT_TOKENS`] before touching the summaries.
//!
//! Waiting for more than was posted keeps the publisher from consuming its
//! own token. The owning participant waits for the count to drain back to
//! zero before removing anything, so no reader sees `EIDRM`.
//!
//! Nothing here times out: a client whose server died before signaling stays
//! blocked.

use nix::errno::Errno;

use crate::codec::{read_vector, skip_vector, write_vector};
use crate::config::{Config, Owner};
use crate::error::{Error, ErrorKind, Result};
use crate::key::derive_key;
use crate::lister::SegmentSource;
use crate::record::{to_owner_summary, OwnerAccessSummary, SegmentRecord};
use crate::region::SharedRegion;
use crate::sem::SemaphoreSet;

const SEM_INDEX: u16 = 0;
const PUBLISH_TOKENS: i16 = 1;
pub const RESULT_TOKENS: i16 = 2;

/// The region and semaphore set as seen by one participant.
///
/// When `owned`, both were created exclusively by this participant and are
/// removed by [`release`](Resources::release), or on drop if the run failed
/// part way.
#[derive(Debug)]
pub struct Resources {
    region: SharedRegion,
    sem: SemaphoreSet,
    owned: bool,
}

impl Resources {
    pub fn create(cfg: &Config) -> Result<Self> {
        let region = SharedRegion::create(derive_key(&cfg.mem_path)?, cfg.region_size)?;
        let sem = derive_key(&cfg.sem_path)
            .and_then(|key| SemaphoreSet::create(key, cfg.semaphores))
            .inspect_err(|_| {
                if let Err(err) = region.remove() {
                    tracing::warn!(%err, "failed to remove shared memory segment");
                }
            })?;
        Ok(Resources {
            region,
            sem,
            owned: true,
        })
    }

    pub fn open(cfg: &Config) -> Result<Self> {
        let region = SharedRegion::open(derive_key(&cfg.mem_path)?, cfg.region_size)?;
        let sem = SemaphoreSet::open(derive_key(&cfg.sem_path)?, cfg.semaphores)?;
        Ok(Resources {
            region,
            sem,
            owned: false,
        })
    }

    fn acquire(cfg: &Config, owns: bool) -> Result<Self> {
        let res = if owns {
            Self::create(cfg)?
        } else {
            Self::open(cfg)?
        };
        tracing::info!(
            shm_id = res.region.id(),
            size = res.region.size(),
            sem_id = res.sem.id(),
            owned = res.owned,
            "resources ready"
        );
        Ok(res)
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn sem(&self) -> &SemaphoreSet {
        &self.sem
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Removes both objects if this participant owns them; otherwise a no-op.
    pub fn release(mut self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;
        let region = self.region.remove();
        let sem = self.sem.remove();
        region.and(sem)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(err) = self.region.remove() {
            tracing::warn!(%err, "failed to remove shared memory segment");
        }
        if let Err(err) = self.sem.remove() {
            tracing::warn!(%err, "failed to remove semaphore set");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    CreatingResources,
    WaitingForClient,
    Processing,
    SignalingDone,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Joining,
    Publishing,
    WaitingForResult,
    Done,
}

fn release_tokens(observers: u16) -> Result<i16> {
    i16::try_from((u32::from(observers) + 1) * RESULT_TOKENS as u32)
        .map_err(|_| Error::new(ErrorKind::SemaphoreOpFailed(Errno::ERANGE)))
}

/// Serves one batch: derives an [`OwnerAccessSummary`] for every published
/// segment and hands the batch back. Returns the summaries it wrote.
pub fn run_server(cfg: &Config) -> Result<Vec<OwnerAccessSummary>> {
    let mut state = ServerState::CreatingResources;
    tracing::debug!(?state, "state changed");
    let release = release_tokens(cfg.observers)?;
    let res = Resources::acquire(cfg, cfg.owner == Owner::Server)?;
    let mut mem = res.region().attach()?;

    state = ServerState::WaitingForClient;
    tracing::debug!(?state, "state changed");
    tracing::info!(sem_id = res.sem().id(), "waiting for shared memory segments");
    res.sem().adjust(SEM_INDEX, -PUBLISH_TOKENS)?;

    state = ServerState::Processing;
    tracing::debug!(?state, "state changed");
    let (segs, offset) = read_vector::<SegmentRecord>(&mem, 0)?;
    tracing::info!(count = segs.len(), "received shared memory segments");
    let summaries: Vec<OwnerAccessSummary> = segs.iter().map(to_owner_summary).collect();
    write_vector(&mut mem, offset, &summaries)?;

    state = ServerState::SignalingDone;
    tracing::debug!(?state, tokens = release, "state changed");
    res.sem().adjust(SEM_INDEX, release)?;

    drop(mem);
    if res.is_owned() {
        res.sem().wait_zero(SEM_INDEX)?;
        res.release()?;
    }
    state = ServerState::Done;
    tracing::debug!(?state, "state changed");
    Ok(summaries)
}

/// What a publishing client sent and what it got back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub segments: Vec<SegmentRecord>,
    pub summaries: Vec<OwnerAccessSummary>,
}

/// Publishes the segments from `source`, then waits for the server's summaries.
pub fn run_client(cfg: &Config, source: &dyn SegmentSource) -> Result<ClientReport> {
    let mut state = ClientState::Joining;
    tracing::debug!(?state, "state changed");
    let res = Resources::acquire(cfg, cfg.owner == Owner::Client)?;
    let mut mem = res.region().attach()?;

    state = ClientState::Publishing;
    tracing::debug!(?state, "state changed");
    let segments = source.list_segments()?;
    let offset = write_vector(&mut mem, 0, &segments)?;
    tracing::info!(count = segments.len(), "published shared memory segments");
    res.sem().adjust(SEM_INDEX, PUBLISH_TOKENS)?;

    state = ClientState::WaitingForResult;
    tracing::debug!(?state, "state changed");
    res.sem().adjust(SEM_INDEX, -RESULT_TOKENS)?;
    let (summaries, _) = read_vector::<OwnerAccessSummary>(&mem, offset)?;
    tracing::info!(count = summaries.len(), "received owner access modes");

    drop(mem);
    if res.is_owned() {
        res.sem().wait_zero(SEM_INDEX)?;
        res.release()?;
    }
    state = ClientState::Done;
    tracing::debug!(?state, "state changed");
    Ok(ClientReport {
        segments,
        summaries,
    })
}

/// Waits for a batch published by someone else and returns its summaries.
///
/// Observers never write to the region and never own resources; the server
/// must be told how many to expect.
pub fn run_observer(cfg: &Config) -> Result<Vec<OwnerAccessSummary>> {
    let mut state = ClientState::Joining;
    tracing::debug!(?state, "state changed");
    let res = Resources::acquire(cfg, false)?;
    let mem = res.region().attach()?;

    state = ClientState::WaitingForResult;
    tracing::debug!(?state, "state changed");
    res.sem().adjust(SEM_INDEX, -RESULT_TOKENS)?;
    let offset = skip_vector::<SegmentRecord>(&mem, 0)?;
    let (summaries, _) = read_vector::<OwnerAccessSummary>(&mem, offset)?;
    tracing::info!(count = summaries.len(), "observed owner access modes");

    state = ClientState::Done;
    tracing::debug!(?state, "state changed");
    Ok(summaries)
}
