// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    ios_sign_atom::{
        atom::{
            DATA_DIR_ENV, DEFAULT_INPUT_FILE, DEFAULT_OUTPUT_FILE, INPUT_FILE_ENV,
            OUTPUT_FILE_ENV,
        },
        default_client, AtomEnvironment, AtomResult, IosSignError, IosSignTask, PollSettings,
        SignAtomParam, SignService, SignServiceClient, SignTaskPoller,
    },
    log::LevelFilter,
    std::{str::FromStr, time::Duration},
};

const RUN_ABOUT: &str = "\
Sign the .ipa described by the atom input.

Parameters are read from the input file in the host data directory. The API
gateway and agent identity are read from the .sdk.json file in the same
directory. The result of the invocation is written to the output file.

This is what runs when no subcommand is given.
";

fn atom_environment(args: &ArgMatches) -> AtomEnvironment {
    AtomEnvironment::new(
        args.value_of_os("data_dir")
            .expect("argument should have default value"),
        args.value_of("input")
            .expect("argument should have default value"),
        args.value_of("output")
            .expect("argument should have default value"),
    )
}

fn parse_u64(args: &ArgMatches, name: &str) -> Result<u64, IosSignError> {
    let value = args
        .value_of(name)
        .expect("argument should have default value");

    u64::from_str(value).map_err(|_| IosSignError::CliBadArgument(format!("{}: {}", name, value)))
}

fn poll_settings(args: &ArgMatches) -> Result<PollSettings, IosSignError> {
    let timeout_minutes = parse_u64(args, "timeout_minutes")?;
    let interval = parse_u64(args, "poll_interval_seconds")?;

    PollSettings::new(timeout_minutes, Duration::from_secs(interval))
}

fn service_client(env: &AtomEnvironment) -> Result<SignServiceClient, IosSignError> {
    let sdk = env.read_sdk_env()?;

    SignServiceClient::from_sdk_env(default_client()?, &sdk)
}

fn run_atom(env: &AtomEnvironment, settings: PollSettings) -> Result<AtomResult, IosSignError> {
    let param = env.read_param::<SignAtomParam>()?;
    let client = service_client(env)?;

    let task = IosSignTask::new(&client, SignTaskPoller::new(settings));

    task.execute(param)
}

fn command_run(args: &ArgMatches) -> Result<(), IosSignError> {
    let env = atom_environment(args);

    env.finish(poll_settings(args).and_then(|settings| run_atom(&env, settings)))
}

fn command_status(args: &ArgMatches) -> Result<(), IosSignError> {
    let resign_id = args
        .value_of("resign_id")
        .expect("clap should have validated arguments");

    let client = service_client(&atom_environment(args))?;

    if client.sign_status(resign_id)? {
        println!("{}: finished", resign_id);
    } else {
        println!("{}: running", resign_id);
    }

    Ok(())
}

fn main_impl() -> Result<(), IosSignError> {
    let app = Command::new("iOS application signing atom")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sign iOS applications with the remote signing service from a pipeline")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("data_dir")
                .long("data-dir")
                .global(true)
                .takes_value(true)
                .allow_invalid_utf8(true)
                .env(DATA_DIR_ENV)
                .default_value(".")
                .help("Directory holding the files exchanged with the pipeline host"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .global(true)
                .takes_value(true)
                .env(INPUT_FILE_ENV)
                .default_value(DEFAULT_INPUT_FILE)
                .help("Name of the parameter file in the data directory"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .global(true)
                .takes_value(true)
                .env(OUTPUT_FILE_ENV)
                .default_value(DEFAULT_OUTPUT_FILE)
                .help("Name of the result file in the data directory"),
        )
        .arg(
            Arg::new("timeout_minutes")
                .long("timeout-minutes")
                .global(true)
                .takes_value(true)
                .default_value("10")
                .help("How long to wait for the signing job to finish"),
        )
        .arg(
            Arg::new("poll_interval_seconds")
                .long("poll-interval-seconds")
                .global(true)
                .takes_value(true)
                .default_value("5")
                .help("Delay before each status check of the signing job"),
        );

    let app = app.subcommand(
        Command::new("run")
            .about("Sign the .ipa described by the atom input")
            .long_about(RUN_ABOUT),
    );

    let app = app.subcommand(
        Command::new("status")
            .about("Print the status of a signing job")
            .arg(
                Arg::new("resign_id")
                    .required(true)
                    .help("Job identifier returned when the .ipa was submitted"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Plain messages unless debugging.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // rustls is chatty at info.
    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();

    match matches.subcommand() {
        Some(("run", args)) => command_run(args),
        Some(("status", args)) => command_status(args),
        None => command_run(&matches),
        _ => Err(IosSignError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
