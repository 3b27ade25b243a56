use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use shmseg::{run_server, Config, Owner};

/// Waits for one batch of shared memory segments and answers with the owner
/// access mode of each.
#[derive(Debug, Parser)]
#[command(name = "shmseg-server", version)]
struct Args {
    /// The client creates and removes the IPC objects instead of the server.
    #[arg(long)]
    client_owns: bool,

    /// Read-only clients to release in addition to the publisher.
    #[arg(long, default_value_t = 0)]
    observers: u16,

    #[arg(long, default_value = shmseg::config::MEM_PATH)]
    mem_path: PathBuf,

    #[arg(long, default_value = shmseg::config::SEM_PATH)]
    sem_path: PathBuf,
}

fn main() -> ExitCode {
    shmseg::init_logging();
    let args = Args::parse();

    let cfg = Config {
        mem_path: args.mem_path,
        sem_path: args.sem_path,
        owner: if args.client_owns {
            Owner::Client
        } else {
            Owner::Server
        },
        observers: args.observers,
        ..Config::default()
    };

    match run_server(&cfg) {
        Ok(summaries) => {
            println!("got {} shared memory segments:", summaries.len());
            for am in &summaries {
                println!("\t{}", am);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
