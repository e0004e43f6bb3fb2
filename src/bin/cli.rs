//! ldata-unlock command line interface.

use std::{
    fs::File,
    process,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use log::{debug, trace, warn, LevelFilter};
use simplelog::*;

use ldata_unlock::{self as lu, ConsoleReporter, Outcome, PortWait, TermOperator};

static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

fn main() {
    println!("[LD] ldata-unlock v{}", crate_version!());

    // The console steps cannot be interrupted half way without leaving the
    // board in an unknown state. The first Ctrl+C only warns.
    ctrlc::set_handler(move || {
        if INTERRUPTS.fetch_add(1, Ordering::SeqCst) == 0 {
            println!(
                "🛑 received Ctrl+C! A console step may be running and stopping now can \
                 leave the panel half modified. Press Ctrl+C again to force quit."
            );
        } else {
            println!("🛑 forced quit");
            process::exit(130);
        }
    })
    .unwrap_or_else(|err| {
        eprintln!("Failed to install the Ctrl-C handler: {}", err);
        process::exit(1);
    });

    let default_baud = lu::DEFAULT_BAUD_RATE.to_string();
    let default_prompt_timeout = lu::DEFAULT_PROMPT_TIMEOUT.as_secs().to_string();
    let default_api_timeout = lu::DEFAULT_API_TIMEOUT.as_secs().to_string();

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            ldata-unlock talks to the U-Boot console of a Leviton LDATA panel \
            over its debug UART and creates the file that makes the firmware \
            start its local HTTP API:\n\
               \t* finds the data partition from the bootloader environment \n\
               \t* writes the flag content to RAM one byte at a time \n\
               \t* checks the RAM copy, then writes it to the partition \n\
               \t* reboots and waits for the API to announce itself \n\
            \n\
            You need physical access to the panel: it may have to be power \
            cycled by hand so the bootloader can be caught before it boots \
            the firmware. Nothing is written before you confirm.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; when not set, the list of \
                     available serial ports is presented for selection.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value(&default_baud)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DEVICE_ID")
                .help("identity of the panel, enables the backup")
                .long_help(
                    "identity of the panel (e.g. its serial number); the \
                     backup of the device information is only written when \
                     it is known.",
                )
                .long("--device-id")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BACKUP_DIR")
                .help("directory under which backups are created")
                .long("--backup-dir")
                .takes_value(true)
                .default_value(lu::DEFAULT_BACKUP_DIR)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PROMPT_TIMEOUT")
                .help("seconds to wait for the bootloader prompt")
                .long("--prompt-timeout")
                .takes_value(true)
                .default_value(&default_prompt_timeout)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("API_TIMEOUT")
                .help("seconds to wait for the API after the reboot")
                .long("--api-timeout")
                .takes_value(true)
                .default_value(&default_api_timeout)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("LOG_FILE")
                .help("file receiving a copy of the log")
                .long("--log-file")
                .takes_value(true)
                .default_value("ldata_unlock.log")
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'ldata-unlock -v -v -v' or 'ldata-unlock -vvv' vs 'ldata-unlock -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(log_level, matches.value_of("LOG_FILE"));

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    let baud_rate = numeric_arg(&matches, "BAUD_RATE", "baud-rate");
    let prompt_timeout = numeric_arg(&matches, "PROMPT_TIMEOUT", "prompt-timeout");
    let api_timeout = numeric_arg(&matches, "API_TIMEOUT", "api-timeout");

    let mut builder = lu::SettingsBuilder::new()
        .baud_rate(baud_rate)
        .prompt_timeout(Duration::from_secs(prompt_timeout.into()))
        .api_timeout(Duration::from_secs(api_timeout.into()));
    if let Some(dir) = matches.value_of("BACKUP_DIR") {
        builder = builder.backup_dir(dir);
    }

    // Arguments with NO default values ========================================

    if let Some(id) = matches.value_of("DEVICE_ID") {
        builder = builder.device_id(id);
    }

    let path = match matches.value_of("DEVICE_TTY") {
        Some(path) => match lu::wait_for_port(path) {
            PortWait::Ready => path.to_string(),
            PortWait::Cancelled => process::exit(2),
            PortWait::Interrupted => process::exit(130),
        },
        None => loop {
            if let Some(path) = lu::select_port() {
                break path;
            }
        },
    };
    let settings = builder.path(path).finalize();
    debug!("{:#?}", settings);

    // Run the state machine ===================================================

    let mut workflow = lu::factory(
        settings,
        Box::new(ConsoleReporter::new()),
        Box::new(TermOperator),
    );
    let outcome = workflow.run();
    print_summary(&outcome, workflow.device(), workflow.backup_path());

    let exit_code = outcome.exit_code();
    debug!("exit code: {}", exit_code);
    process::exit(exit_code.into());
}

fn init_logging(level: LevelFilter, log_file: Option<&str>) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![];
    loggers.push(TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));
    let mut file_error = None;
    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(
                level.max(LevelFilter::Info),
                Config::default(),
                file,
            )),
            Err(err) => file_error = Some((path, err)),
        }
    }
    if CombinedLogger::init(loggers).is_err() {
        eprintln!("logger already initialized");
    }
    if let Some((path, err)) = file_error {
        warn!("Not logging to {}: {}", path, err);
    }
}

fn numeric_arg(matches: &clap::ArgMatches, name: &str, flag: &str) -> u32 {
    value_t!(matches.value_of(name), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(flag).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap_or_default()).on_red()
        );
        process::exit(-1);
    })
}

fn print_summary(outcome: &Outcome, device: &lu::Device, backup: Option<&std::path::Path>) {
    println!();
    println!("[LD] {}", style("Summary").bold());
    println!("     port           : {}", device.serial_port);
    println!(
        "     device id      : {}",
        device.device_id.as_deref().unwrap_or("unknown")
    );
    for (name, mac) in &device.mac_addresses {
        println!("     {:<15}: {}", name, mac);
    }
    println!(
        "     data partition : {}",
        device
            .data_partition
            .map_or_else(|| "unknown".to_string(), |p| p.to_string())
    );
    println!("     API enabled    : {}", device.api_enabled);
    if let Some(dir) = backup {
        println!("     backup         : {}", dir.display());
    }

    match outcome {
        Outcome::Unlocked => println!(
            "[LD] 👍 {}",
            style("The local API is enabled and running").green()
        ),
        Outcome::Aborted(stage) => println!(
            "[LD] ✋ {} during {}, nothing was written",
            style("Stopped").yellow(),
            stage
        ),
        Outcome::Failed { stage, error } => println!(
            "[LD] ❌ {} during {}: {}",
            style("Failed").red(),
            stage,
            error
        ),
    }
}
