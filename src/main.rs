use anyhow::{bail, Context, Result};
use clap::Parser;
use core::time::Duration;
use std::io::{self, Write};
use vmos::config::{self, KernelConfig};
use vmos::shell::{Command, Shell};
use vmos::{logging, System};

/// Paged virtual memory and process scheduling on a simulated machine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Physical memory size in words
    #[arg(long, default_value_t = config::MEMORY_WORDS)]
    mem: usize,

    /// Page and frame size in words
    #[arg(long, default_value_t = config::PAGE_SIZE)]
    page: usize,

    /// Instructions per time slice
    #[arg(long, default_value_t = config::TIME_SLICE)]
    delta: usize,

    /// Number of swap slots on the disk
    #[arg(long, default_value_t = config::SWAP_SLOTS)]
    swap_slots: usize,

    #[arg(long, default_value_t = config::DISK_LATENCY_MS)]
    disk_latency_ms: u64,

    #[arg(long, default_value_t = config::IO_LATENCY_MS)]
    io_latency_ms: u64,

    /// Dispatch ready processes right away instead of waiting for `execall`
    #[arg(long)]
    auto: bool,

    /// Log level (error, warn, info, debug, trace); falls back to `LOG`
    #[arg(long)]
    log: Option<String>,

    /// Seconds `exec` and `execall` wait before giving the prompt back
    #[arg(long, default_value_t = 30)]
    settle_secs: u64,

    /// Run these programs to completion and exit instead of reading commands
    #[arg(long, num_args = 1..)]
    run: Vec<String>,
}

impl Args {
    fn kernel_config(&self) -> KernelConfig {
        KernelConfig {
            memory_words: self.mem,
            page_size: self.page,
            time_slice: self.delta,
            swap_slots: self.swap_slots,
            disk_latency: Duration::from_millis(self.disk_latency_ms),
            io_latency: Duration::from_millis(self.io_latency_ms),
            auto_schedule: self.auto,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match &args.log {
        Some(level) => logging::init_with(logging::parse_level(level)),
        None => logging::init(),
    }

    let system = System::boot(args.kernel_config()).context("failed to boot")?;
    let settle = Duration::from_secs(args.settle_secs);
    let mut shell = Shell::new(&system, settle);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.run.is_empty() {
        writeln!(out, "vmos shell, `help` lists the commands")?;
        shell.run(io::stdin().lock(), &mut out)?;
    } else {
        for program in &args.run {
            shell.execute(Command::New(program.clone()), &mut out)?;
        }
        shell.execute(Command::ExecAll, &mut out)?;
        for output in system.console().output() {
            writeln!(out, "process {} wrote {}", output.pid, output.value)?;
        }
        let left = system.kernel().live_processes();
        if left > 0 {
            bail!("{} process(es) did not finish", left);
        }
    }
    system.shutdown();
    Ok(())
}
