//! Line oriented command interpreter over a booted [`System`].

use crate::error::{AuditError, KernelError};
use crate::loader;
use crate::system::{Settled, System};
use crate::task::Pid;
use core::str::FromStr;
use core::time::Duration;
use log::LevelFilter;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(String),
    Rm(Pid),
    Ps,
    Dump(Pid),
    DumpMemory { start: usize, end: usize },
    Frames,
    Disk,
    Exec(Pid),
    ExecAll,
    In { pid: Pid, value: i32 },
    TraceOn,
    TraceOff,
    Audit,
    Help,
    Exit,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("unknown command `{0}`, try `help`")]
    UnknownCommand(String),

    #[error("`{command}` needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("`{0}` is not a number")]
    InvalidNumber(String),

    #[error("process {0} is not waiting for input")]
    NotWaiting(Pid),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("audit failed: {0}")]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn number<T: FromStr>(arg: &str) -> Result<T, ShellError> {
    arg.parse()
        .map_err(|_| ShellError::InvalidNumber(arg.to_string()))
}

fn arg<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    what: &'static str,
) -> Result<&'a str, ShellError> {
    args.next()
        .ok_or(ShellError::MissingArgument { command, what })
}

impl FromStr for Command {
    type Err = ShellError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = match words.next() {
            Some(name) => name,
            None => return Err(ShellError::UnknownCommand(String::new())),
        };
        let command = match name {
            "new" => Command::New(arg(&mut words, "new", "a program name")?.to_string()),
            "rm" => Command::Rm(number(arg(&mut words, "rm", "a pid")?)?),
            "ps" => Command::Ps,
            "dump" => Command::Dump(number(arg(&mut words, "dump", "a pid")?)?),
            "dumpm" => {
                let start = number(arg(&mut words, "dumpm", "a start address")?)?;
                let end = number(arg(&mut words, "dumpm", "an end address")?)?;
                Command::DumpMemory { start, end }
            }
            "frames" => Command::Frames,
            "disk" => Command::Disk,
            "exec" => Command::Exec(number(arg(&mut words, "exec", "a pid")?)?),
            "execall" => Command::ExecAll,
            "in" => {
                let pid = number(arg(&mut words, "in", "a pid")?)?;
                let value = number(arg(&mut words, "in", "a value")?)?;
                Command::In { pid, value }
            }
            "traceon" => Command::TraceOn,
            "traceoff" => Command::TraceOff,
            "audit" => Command::Audit,
            "help" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(ShellError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

const HELP: &str = "\
new <program>        create a process
rm <pid>             remove a process
ps                   list processes
dump <pid>           show a process and its page table
dumpm <start> <end>  dump physical memory
frames               show frame occupancy
disk                 show swap disk statistics
exec <pid>           run one process while the others wait
execall              run every process until none is left
in <pid> <value>     answer a pending console read
traceon / traceoff   log every transition / back to the old level
audit                check frames, page tables and queues
exit                 quit";

/// `traceon` shows at least the transition log, it never hides anything
fn trace_level(current: LevelFilter) -> LevelFilter {
    current.max(LevelFilter::Info)
}

pub struct Shell<'a> {
    system: &'a System,
    /// how long `exec` and `execall` wait before giving the prompt back
    settle_timeout: Duration,
    saved_level: Option<LevelFilter>,
}

impl<'a> Shell<'a> {
    pub fn new(system: &'a System, settle_timeout: Duration) -> Self {
        Self {
            system,
            settle_timeout,
            saved_level: None,
        }
    }

    /// Read commands from `input` until `exit` or end of input. Command
    /// errors are printed and the loop goes on.
    pub fn run(&mut self, input: impl BufRead, out: &mut impl Write) -> io::Result<()> {
        write!(out, "> ")?;
        out.flush()?;
        for line in input.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                match line.parse::<Command>() {
                    Ok(Command::Exit) => break,
                    Ok(command) => {
                        if let Err(e) = self.execute(command, out) {
                            writeln!(out, "error: {}", e)?;
                        }
                    }
                    Err(e) => writeln!(out, "error: {}", e)?,
                }
            }
            write!(out, "> ")?;
            out.flush()?;
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> Result<(), ShellError> {
        let kernel = self.system.kernel();
        match command {
            Command::New(name) => {
                let pid = kernel.create_process(&name)?;
                writeln!(out, "created process {}", pid)?;
            }
            Command::Rm(pid) => {
                self.system.remove_process(pid)?;
                writeln!(out, "removed process {}", pid)?;
            }
            Command::Ps => {
                let processes = kernel.processes();
                if processes.is_empty() {
                    writeln!(out, "no processes")?;
                }
                for process in processes {
                    writeln!(out, "{}", process)?;
                }
            }
            Command::Dump(pid) => write!(out, "{}", kernel.snapshot(pid)?)?,
            Command::DumpMemory { start, end } => {
                write!(out, "{}", kernel.dump_memory(start, end))?
            }
            Command::Frames => {
                for frame in kernel.frames() {
                    writeln!(out, "{}", frame)?;
                }
                writeln!(out, "{} free", kernel.free_frames())?;
            }
            Command::Disk => writeln!(out, "{}", kernel.disk_stats())?,
            Command::Exec(pid) => {
                kernel.exec_process(pid)?;
                match self.system.wait_for_process(pid, self.settle_timeout) {
                    Settled::Finished => writeln!(out, "process {} finished", pid)?,
                    Settled::AwaitingInput(_) => {
                        writeln!(out, "process {} is waiting for input", pid)?
                    }
                    Settled::Halted(e) => return Err(e.into()),
                    Settled::TimedOut => {
                        writeln!(out, "process {} still running, back to the prompt", pid)?
                    }
                }
            }
            Command::ExecAll => {
                kernel.set_auto_schedule(true);
                match self.system.wait_until_settled(self.settle_timeout) {
                    Settled::Finished => writeln!(out, "all processes finished")?,
                    Settled::AwaitingInput(pids) => {
                        writeln!(out, "waiting for input from {:?}", pids)?
                    }
                    Settled::Halted(e) => return Err(e.into()),
                    Settled::TimedOut => writeln!(out, "still running, back to the prompt")?,
                }
            }
            Command::In { pid, value } => {
                if !self.system.console().provide_input(pid, value) {
                    return Err(ShellError::NotWaiting(pid));
                }
            }
            Command::TraceOn => {
                let current = log::max_level();
                self.saved_level.get_or_insert(current);
                log::set_max_level(trace_level(current));
            }
            Command::TraceOff => {
                if let Some(level) = self.saved_level.take() {
                    log::set_max_level(level);
                }
            }
            Command::Audit => {
                kernel.audit()?;
                writeln!(out, "ok")?;
            }
            Command::Help => {
                writeln!(out, "{}", HELP)?;
                writeln!(out, "programs: {}", loader::program_names().join(", "))?;
            }
            Command::Exit => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(
            "new factorial".parse::<Command>().unwrap(),
            Command::New("factorial".into())
        );
        assert_eq!("rm 3".parse::<Command>().unwrap(), Command::Rm(3));
        assert_eq!(
            "dumpm 0  16".parse::<Command>().unwrap(),
            Command::DumpMemory { start: 0, end: 16 }
        );
        assert_eq!(
            "in 2 -7".parse::<Command>().unwrap(),
            Command::In { pid: 2, value: -7 }
        );
        assert_eq!("exec 4".parse::<Command>().unwrap(), Command::Exec(4));
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Exit);
    }

    #[test]
    fn traceon_never_lowers_the_level() {
        assert_eq!(trace_level(LevelFilter::Off), LevelFilter::Info);
        assert_eq!(trace_level(LevelFilter::Warn), LevelFilter::Info);
        assert_eq!(trace_level(LevelFilter::Debug), LevelFilter::Debug);
        assert_eq!(trace_level(LevelFilter::Trace), LevelFilter::Trace);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            "rm".parse::<Command>(),
            Err(ShellError::MissingArgument { command: "rm", .. })
        ));
        assert!(matches!(
            "dump x".parse::<Command>(),
            Err(ShellError::InvalidNumber(s)) if s == "x"
        ));
        assert!(matches!(
            "fly".parse::<Command>(),
            Err(ShellError::UnknownCommand(s)) if s == "fly"
        ));
    }
}
