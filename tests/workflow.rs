mod common;

use std::{cell::Cell, fs, path::PathBuf, rc::Rc, time::Duration};

use common::{fast_settings, SimConsole};
use ldata_unlock::{
    BackupSnapshot, Connector, LogReporter, Operator, Outcome, Settings, Stage, UnlockError,
    UnlockWorkflow, BACKUP_FILE_NAME,
};

fn connect_to(console: &SimConsole) -> Connector {
    let console = console.clone();
    Box::new(move |_: &Settings| Ok(console.boxed()))
}

fn workflow(console: &SimConsole, settings: Settings, operator: Box<dyn Operator>) -> UnlockWorkflow {
    UnlockWorkflow::with_connector(settings, connect_to(console), Box::new(LogReporter), operator)
}

/// Operator answering `answer` and counting the questions.
fn counting_operator(answer: bool) -> (Box<dyn Operator>, Rc<Cell<usize>>) {
    let asked = Rc::new(Cell::new(0));
    let counter = asked.clone();
    let operator: Box<dyn Operator> = Box::new(move |_: &str| {
        counter.set(counter.get() + 1);
        answer
    });
    (operator, asked)
}

fn scratch_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("ldata-unlock-it-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&root);
    root
}

#[test]
fn unlocks_a_cooperative_board() {
    let console = SimConsole::new();
    let (operator, asked) = counting_operator(true);
    let mut wf = workflow(&console, fast_settings().finalize(), operator);

    let outcome = wf.run();
    assert!(outcome.is_unlocked(), "{:?}", outcome);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(asked.get(), 1);

    let device = wf.device();
    assert_eq!(device.data_partition, Some(2));
    assert!(device.api_enabled);
    assert_eq!(device.mac_addresses["eth1addr"], "00:11:22:33:44:56");

    let board = console.board.borrow();
    assert_eq!(board.file(2, "HTTP_API_ALWAYS_ON").unwrap(), &b"true\n".to_vec());
    let first_words: Vec<&str> = board
        .commands
        .iter()
        .map(|c| c.split_whitespace().next().unwrap_or(""))
        .collect();
    assert_eq!(
        first_words,
        vec![
            "printenv", "mmc", "mmc", "mw.b", "mw.b", "mw.b", "mw.b", "mw.b", "mw.b", "md.b",
            "ext4write", "ext4ls", "reset"
        ]
    );
}

#[test]
fn declining_the_write_leaves_the_board_untouched() {
    let console = SimConsole::new();
    let (operator, asked) = counting_operator(false);
    let mut wf = workflow(&console, fast_settings().finalize(), operator);

    let outcome = wf.run();
    assert!(matches!(outcome, Outcome::Aborted(Stage::Enabling)), "{:?}", outcome);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(asked.get(), 1);

    let board = console.board.borrow();
    assert_eq!(board.count("mw.b"), 0);
    assert_eq!(board.count("ext4write"), 0);
    assert_eq!(board.count("reset"), 0);
}

#[test]
fn prompt_timeout_fails_after_one_manual_retry() {
    let console = SimConsole::new();
    console.board.borrow_mut().prompt_on_nudge = None;
    let (operator, asked) = counting_operator(true);
    let mut wf = workflow(&console, fast_settings().finalize(), operator);

    match wf.run() {
        Outcome::Failed {
            stage: Stage::BootloaderWait,
            error: UnlockError::Timeout { elapsed, .. },
        } => assert!(elapsed >= Duration::from_millis(300)),
        other => panic!("unexpected {:?}", other),
    }
    // Only the retry question, the write question is never reached.
    assert_eq!(asked.get(), 1);
    assert_eq!(console.board.borrow().count("mw.b"), 0);
}

#[test]
fn manual_power_cycle_recovers_the_prompt() {
    let console = SimConsole::new();
    console.board.borrow_mut().prompt_on_nudge = None;
    let board = console.board.clone();
    let questions = Rc::new(Cell::new(0));
    let asked = questions.clone();
    let operator = move |prompt: &str| {
        asked.set(asked.get() + 1);
        if prompt.contains("Power cycle") {
            board.borrow_mut().prompt_on_nudge = Some(0);
        }
        true
    };
    let mut wf = workflow(&console, fast_settings().finalize(), Box::new(operator));

    let outcome = wf.run();
    assert!(outcome.is_unlocked(), "{:?}", outcome);
    assert_eq!(questions.get(), 2);
}

#[test]
fn declining_the_retry_aborts() {
    let console = SimConsole::new();
    console.board.borrow_mut().prompt_on_nudge = None;
    let (operator, _) = counting_operator(false);
    let mut wf = workflow(&console, fast_settings().finalize(), operator);

    let outcome = wf.run();
    assert!(matches!(outcome, Outcome::Aborted(Stage::BootloaderWait)), "{:?}", outcome);
}

#[test]
fn corrupt_memory_stops_before_the_filesystem() {
    let console = SimConsole::new();
    console.board.borrow_mut().corrupt_dump = true;
    let (operator, _) = counting_operator(true);
    let mut wf = workflow(&console, fast_settings().finalize(), operator);

    match wf.run() {
        Outcome::Failed {
            stage: Stage::Enabling,
            error: UnlockError::Verification(_),
        } => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(console.board.borrow().count("ext4write"), 0);
    assert!(!wf.device().api_enabled);
}

#[test]
fn silent_firmware_fails_verification() {
    let console = SimConsole::new();
    console.board.borrow_mut().api_on_reset = false;
    let (operator, _) = counting_operator(true);
    let settings = fast_settings()
        .api_timeout(Duration::from_millis(100))
        .finalize();
    let mut wf = workflow(&console, settings, operator);

    let outcome = wf.run();
    assert!(
        matches!(
            outcome,
            Outcome::Failed {
                stage: Stage::Verifying,
                error: UnlockError::Timeout { .. }
            }
        ),
        "{:?}",
        outcome
    );
    assert_eq!(outcome.exit_code(), 1);
    // The flag is on the partition anyway.
    assert!(wf.device().api_enabled);
}

#[test]
fn unreachable_port_fails_while_connecting() {
    let connector: Connector = Box::new(|_: &Settings| {
        Err(UnlockError::Connection("No such file or directory".into()))
    });
    let (operator, asked) = counting_operator(true);
    let mut wf = UnlockWorkflow::with_connector(
        fast_settings().finalize(),
        connector,
        Box::new(LogReporter),
        operator,
    );

    match wf.run() {
        Outcome::Failed {
            stage: Stage::Connecting,
            error: UnlockError::Connection(_),
        } => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(asked.get(), 0);
}

#[test]
fn backup_is_written_before_the_board_is_touched() {
    let root = scratch_root("backup");
    let console = SimConsole::new();
    let (operator, _) = counting_operator(false);
    let settings = fast_settings()
        .backup_dir(root.clone())
        .device_id("LDATA-0042")
        .finalize();
    let mut wf = workflow(&console, settings, operator);

    wf.run();
    let dir = wf.backup_path().unwrap().to_path_buf();
    assert!(dir.starts_with(&root));
    assert!(dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("backup_"));

    let json = fs::read_to_string(dir.join(BACKUP_FILE_NAME)).unwrap();
    let snapshot: BackupSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.device_id, "LDATA-0042");
    // Taken before discovery, so nothing learned from the console yet.
    assert_eq!(snapshot.data_partition, None);
    assert!(snapshot.mac_addresses.is_empty());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn no_backup_without_a_device_id() {
    let root = scratch_root("no-id");
    let console = SimConsole::new();
    let (operator, _) = counting_operator(true);
    let settings = fast_settings().backup_dir(root.clone()).finalize();
    let mut wf = workflow(&console, settings, operator);

    assert!(wf.run().is_unlocked());
    assert!(wf.backup_path().is_none());
    assert!(!root.exists());
}
