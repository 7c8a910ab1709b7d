mod common;

use common::config;
use core::time::Duration;
use vmos::drivers::ConsoleOutput;
use vmos::shell::{Command, Shell};
use vmos::{KernelConfig, Settled, System};

const SETTLE: Duration = Duration::from_secs(20);

fn boot(config: KernelConfig) -> System {
    System::boot(KernelConfig {
        auto_schedule: false,
        ..config
    })
    .unwrap()
}

#[test]
fn programs_run_to_completion() {
    let system = boot(config(1024, 8));
    let kernel = system.kernel();
    for program in ["factorial", "fibonacci10", "bubble_sort", "minimal"] {
        kernel.create_process(program).unwrap();
    }
    // nothing runs before scheduling is switched on
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(kernel.running(), None);
    assert_eq!(kernel.ready_queue().len(), 4);

    kernel.set_auto_schedule(true);
    assert_eq!(system.wait_until_settled(SETTLE), Settled::Finished);
    kernel.audit().unwrap();
    assert_eq!(kernel.free_frames(), 128);
    assert!(!kernel.transitions().is_empty());
    system.shutdown();
}

#[test]
fn echo_waits_for_input() {
    let system = boot(config(1024, 8));
    let pid = system.kernel().create_process("echo").unwrap();
    system.kernel().set_auto_schedule(true);

    assert_eq!(
        system.wait_until_settled(SETTLE),
        Settled::AwaitingInput(vec![pid])
    );
    assert!(system.console().provide_input(pid, 7));
    assert!(!system.console().provide_input(pid, 8));
    assert_eq!(system.wait_until_settled(SETTLE), Settled::Finished);
    assert_eq!(system.console().output(), vec![ConsoleOutput { pid, value: 7 }]);
}

#[test]
fn paging_under_pressure() {
    let system = boot(config(64, 8));
    let pids: Vec<_> = (0..2)
        .map(|_| system.kernel().create_process("sort_and_print").unwrap())
        .collect();
    system.kernel().set_auto_schedule(true);
    assert_eq!(system.wait_until_settled(SETTLE), Settled::Finished);

    let output = system.console().output();
    for pid in pids {
        let printed: Vec<i32> = output
            .iter()
            .filter(|o| o.pid == pid)
            .map(|o| o.value)
            .collect();
        assert_eq!(printed, vec![1, 2, 3, 5, 8, 9]);
    }
    assert!(system.kernel().disk_stats().pages_saved > 0);
    system.kernel().audit().unwrap();
}

#[test]
fn removing_a_reader_cancels_its_read() {
    let system = boot(config(1024, 8));
    let pid = system.kernel().create_process("echo").unwrap();
    system.kernel().set_auto_schedule(true);
    assert_eq!(
        system.wait_until_settled(SETTLE),
        Settled::AwaitingInput(vec![pid])
    );
    system.remove_process(pid).unwrap();
    assert!(system.console().waiting().is_empty());
    assert_eq!(system.wait_until_settled(SETTLE), Settled::Finished);
}

#[test]
fn shell_session() {
    let system = boot(config(1024, 8));
    let mut shell = Shell::new(&system, SETTLE);
    let script = "new factorial\nnew nope\nps\nexecall\nfly\naudit\nexit\nps\n";
    let mut out = Vec::new();
    shell.run(script.as_bytes(), &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("created process 1"));
    assert!(out.contains("error: no program named \"nope\""));
    assert!(out.contains("factorial"));
    assert!(out.contains("all processes finished"));
    assert!(out.contains("unknown command `fly`"));
    assert!(out.contains("ok"));
    // nothing after `exit` runs
    assert!(!out.contains("no processes"));

    let mut out = Vec::new();
    shell.execute(Command::Ps, &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "no processes\n");
}

#[test]
fn exec_from_the_shell() {
    let system = boot(config(1024, 8));
    let mut shell = Shell::new(&system, SETTLE);
    let script = "new factorial\nnew minimal\nexec 2\nexec 2\nps\n";
    let mut out = Vec::new();
    shell.run(script.as_bytes(), &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("process 2 finished"));
    assert!(out.contains("error: process with pid: 2 not found"));
    assert!(out.contains("READY"));
    assert_eq!(system.kernel().ready_queue(), vec![1]);
    system.shutdown();
}
