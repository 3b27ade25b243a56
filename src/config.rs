use std::path::PathBuf;

pub const MEM_PATH: &str = "/tmp/os_lab_shmem_m";
pub const SEM_PATH: &str = "/tmp/os_lab_shmem_s";
pub const REGION_SIZE: usize = 1 << 16;

/// Which role creates the kernel objects exclusively and removes them at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone)]
pub struct ListerConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Leading lines of output before the first data row.
    pub skip_lines: usize,
}

impl ListerConfig {
    /// Splits a shell-like command line on whitespace. No quoting is supported.
    pub fn from_command_line(cmd: &str, skip_lines: usize) -> Option<Self> {
        let mut words = cmd.split_whitespace().map(String::from);
        let program = words.next()?;
        Some(ListerConfig {
            program,
            args: words.collect(),
            skip_lines,
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for ListerConfig {
    fn default() -> Self {
        ListerConfig {
            program: String::from("ipcs"),
            args: vec![String::from("-mpt")],
            skip_lines: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mem_path: PathBuf,
    pub sem_path: PathBuf,
    pub region_size: usize,
    pub semaphores: u16,
    pub owner: Owner,
    /// Read-only clients the server releases in addition to the publisher.
    pub observers: u16,
    pub lister: ListerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mem_path: PathBuf::from(MEM_PATH),
            sem_path: PathBuf::from(SEM_PATH),
            region_size: REGION_SIZE,
            semaphores: 1,
            owner: Owner::default(),
            observers: 0,
            lister: ListerConfig::default(),
        }
    }
}
