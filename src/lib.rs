extern crate self as shmseg;

pub mod codec;
pub mod config;
pub mod error;
mod key;
pub mod lister;
pub mod record;
mod region;
pub mod role;
mod sem;

pub use codec::{read_vector, skip_vector, vector_len, write_vector, Record};
pub use config::{Config, ListerConfig, Owner};
pub use error::{Error, ErrorKind, Result};
pub use key::{derive_key, ResourceKey};
pub use lister::{CommandLister, SegmentSource};
pub use record::{
    to_owner_summary, AccessMode, AccessTriplet, OwnerAccessSummary, SegmentRecord, TimeOfDay,
};
pub use region::{Attachment, SharedRegion};
pub use role::{run_client, run_observer, run_server, ClientReport, Resources};
pub use sem::SemaphoreSet;
pub use shm_derive::Record;

/// Installs the stderr `tracing` subscriber used by the binaries.
///
/// Honors `RUST_LOG`; defaults to `info`.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
