use std::process::{Command, Stdio};

use crate::config::ListerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::record::SegmentRecord;

/// Something that can enumerate the live shared memory segments on the host.
pub trait SegmentSource {
    fn list_segments(&self) -> Result<Vec<SegmentRecord>>;
}

/// Runs the configured host command (`ipcs -mpt` by default) and parses its table.
#[derive(Debug, Clone)]
pub struct CommandLister {
    config: ListerConfig,
}

impl CommandLister {
    pub fn new(config: ListerConfig) -> Self {
        CommandLister { config }
    }

    /// Runs the command and returns stdout followed by stderr.
    fn capture(&self) -> Result<String> {
        let cmd = self.config.command_line();
        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| Error::new(ErrorKind::CommandUnavailable(cmd.clone(), err)))?;
        if !output.status.success() {
            tracing::warn!(command = %cmd, status = %output.status, "lister exited unsuccessfully");
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl SegmentSource for CommandLister {
    fn list_segments(&self) -> Result<Vec<SegmentRecord>> {
        let text = self.capture()?;
        let segs = parse_listing(&text, self.config.skip_lines)?;
        tracing::info!(count = segs.len(), "listed shared memory segments");
        Ok(segs)
    }
}

/// A fixed batch of segments, handy when the host lister is not wanted.
impl SegmentSource for Vec<SegmentRecord> {
    fn list_segments(&self) -> Result<Vec<SegmentRecord>> {
        Ok(self.clone())
    }
}

/// Skips `skip` header lines and parses one record per remaining non-empty line.
pub fn parse_listing(text: &str, skip: usize) -> Result<Vec<SegmentRecord>> {
    text.lines()
        .skip(skip)
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            line.parse().map_err(|err: Error| {
                if let ErrorKind::MalformedRecord(msg) = err.kind() {
                    return Error::malformed(format!("line {}: {}", skip + i + 1, msg));
                }
                err
            })
        })
        .collect()
}
