use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use shmseg::{
    run_client, run_observer, ClientReport, CommandLister, Config, Error, ErrorKind, ListerConfig,
    Owner,
};

/// Publishes the host's shared memory segments to the server and prints the
/// owner access modes it computes.
#[derive(Debug, Parser)]
#[command(name = "shmseg-client", version)]
struct Args {
    /// Create and remove the IPC objects; the server must be run with `--client-owns`.
    #[arg(long, conflicts_with = "observe")]
    owner: bool,

    /// Only wait for and print another client's results.
    #[arg(long)]
    observe: bool,

    #[arg(long, default_value = shmseg::config::MEM_PATH)]
    mem_path: PathBuf,

    #[arg(long, default_value = shmseg::config::SEM_PATH)]
    sem_path: PathBuf,

    /// Command listing live segments, split on whitespace.
    #[arg(long, default_value = "ipcs -mpt")]
    lister: String,

    /// Header lines to skip in the lister output.
    #[arg(long, default_value_t = 3)]
    skip_lines: usize,
}

fn print_report(report: &ClientReport) {
    println!("got {} access modes:", report.summaries.len());
    for am in &report.summaries {
        println!("\t{}", am);
    }
    println!("Last attached processes:");
    for seg in &report.segments {
        let atime = seg
            .last_attach_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| String::from("no-entry"));
        println!(
            "\tID: {}, LPID: {}, ATIME: {}",
            seg.id, seg.last_attach_pid, atime
        );
    }
}

fn run(args: Args) -> shmseg::Result<()> {
    let lister =
        ListerConfig::from_command_line(&args.lister, args.skip_lines).ok_or_else(|| {
            Error::new(ErrorKind::CommandUnavailable(
                args.lister.clone(),
                io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            ))
        })?;
    let cfg = Config {
        mem_path: args.mem_path,
        sem_path: args.sem_path,
        owner: if args.owner {
            Owner::Client
        } else {
            Owner::Server
        },
        lister,
        ..Config::default()
    };

    if args.observe {
        let summaries = run_observer(&cfg)?;
        println!("got {} access modes:", summaries.len());
        for am in &summaries {
            println!("\t{}", am);
        }
        return Ok(());
    }

    let source = CommandLister::new(cfg.lister.clone());
    let report = run_client(&cfg, &source)?;
    print_report(&report);
    Ok(())
}

fn main() -> ExitCode {
    shmseg::init_logging();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
