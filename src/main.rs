// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use clap::{Arg, ArgMatches, Command};
use log::{warn, LevelFilter};
use machosign::allocator;
use machosign::reader;
use machosign::{AdhocSignError, Result, SigningSettings};
use std::path::{Path, PathBuf};

fn settings_from_args(args: &ArgMatches) -> Result<SigningSettings> {
    let identifier = args.value_of("identifier").map(str::to_string);

    let entitlements_xml = match args.value_of("entitlements") {
        Some(path) => Some(std::fs::read(path)?),
        None => None,
    };

    Ok(SigningSettings {
        identifier,
        entitlements_xml,
        force: args.is_present("force"),
        allocator_path: None,
    })
}

fn resolve_identifier(settings: &mut SigningSettings, input_path: &Path) {
    if settings.identifier.is_none() {
        let identifier = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        if let Some(identifier) = identifier {
            warn!("no identifier given; using file name {}", identifier);
            settings.identifier = Some(identifier);
        }
    }
}

fn command_check_requires_signature(args: &ArgMatches) -> Result<bool> {
    let path = PathBuf::from(args.value_of("file").expect("required by clap"));
    reader::requires_signature(&path)
}

fn command_show_arch(args: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(args.value_of("file").expect("required by clap"));

    for arch in reader::show_arch(&path)? {
        println!("{}", arch);
    }

    Ok(())
}

fn command_size(args: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(args.value_of("file").expect("required by clap"));
    let mut settings = settings_from_args(args)?;
    resolve_identifier(&mut settings, &path);

    for size in reader::show_size(&path, &settings)? {
        println!("{}", size);
    }

    Ok(())
}

fn command_generate(args: &ArgMatches) -> Result<()> {
    use std::io::Write;

    let path = PathBuf::from(args.value_of("file").expect("required by clap"));
    let mut settings = settings_from_args(args)?;
    resolve_identifier(&mut settings, &path);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    for blob in reader::generate(&path, &settings)? {
        handle.write_all(&blob)?;
    }

    Ok(())
}

fn command_inject(args: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(args.value_of("file").expect("required by clap"));
    let mut settings = settings_from_args(args)?;
    resolve_identifier(&mut settings, &path);

    allocator::inject(&path, &settings)
}

fn command_sign(args: &ArgMatches) -> Result<()> {
    let identity = args.value_of("identity").unwrap_or("-");
    if identity != "-" {
        return Err(AdhocSignError::UnsupportedIdentity);
    }

    if args.is_present("remove_signature") {
        let path = PathBuf::from(args.value_of("path").expect("required by clap"));
        let settings = SigningSettings::default();
        return allocator::remove_signature(&path, &path, &settings);
    }

    if args.is_present("verify") {
        let path = PathBuf::from(args.value_of("path").expect("required by clap"));
        return if reader::verify_signature(&path)? {
            Ok(())
        } else {
            Err(AdhocSignError::MissingCodeSignatureCommand)
        };
    }

    let path = PathBuf::from(args.value_of("path").expect("required by clap"));
    let mut settings = settings_from_args(args)?;
    resolve_identifier(&mut settings, &path);

    warn!("signing {} in place", path.display());
    allocator::codesign(&path, &path, &settings)
}

fn sigtool_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("file")
            .short('f')
            .long("file")
            .takes_value(true)
            .required(true)
            .help("Path to the Mach-O binary"),
    )
    .arg(
        Arg::new("identifier")
            .short('i')
            .long("identifier")
            .takes_value(true)
            .help("Identifier string to embed in the CodeDirectory"),
    )
    .arg(
        Arg::new("entitlements")
            .short('e')
            .long("entitlements")
            .takes_value(true)
            .help("Path to an entitlements plist to embed verbatim"),
    )
    .arg(
        Arg::new("force")
            .short('F')
            .long("force")
            .help("Re-sign even if a signature is already present"),
    )
}

fn main_impl() -> Result<()> {
    let app = Command::new("machosign")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Generates and embeds ad-hoc Mach-O code signatures")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(sigtool_args(
        Command::new("check-requires-signature")
            .about("Exits 0 if the file requires a signature, 1 otherwise"),
    ));

    let app = app.subcommand(sigtool_args(
        Command::new("show-arch").about("Prints the architecture name of each slice"),
    ));

    let app = app.subcommand(sigtool_args(
        Command::new("size").about("Prints the serialized signature length of each slice"),
    ));

    let app = app.subcommand(sigtool_args(
        Command::new("generate").about("Writes the raw serialized SuperBlob bytes to stdout"),
    ));

    let app = app.subcommand(sigtool_args(
        Command::new("inject")
            .about("Signs the binary in place, requiring an existing LC_CODE_SIGNATURE"),
    ));

    let app = app.subcommand(
        Command::new("codesign")
            .about("codesign(1)-compatible signing entry point")
            .arg(
                Arg::new("identity")
                    .short('s')
                    .takes_value(true)
                    .required(true)
                    .help("Signing identity; only \"-\" (ad-hoc) is supported"),
            )
            .arg(
                Arg::new("identifier")
                    .short('i')
                    .takes_value(true)
                    .help("Identifier string to embed in the CodeDirectory"),
            )
            .arg(
                Arg::new("force")
                    .short('f')
                    .help("Re-sign even if a signature is already present"),
            )
            .arg(
                Arg::new("entitlements")
                    .long("entitlements")
                    .takes_value(true)
                    .help("Path to an entitlements plist to embed verbatim"),
            )
            .arg(
                Arg::new("verify")
                    .short('v')
                    .help("Verify instead of sign"),
            )
            .arg(
                Arg::new("remove_signature")
                    .long("remove-signature")
                    .help("Remove the embedded signature instead of adding one"),
            )
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to the Mach-O binary"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()))
        .format_timestamp(None)
        .init();

    match matches.subcommand() {
        Some(("check-requires-signature", args)) => {
            if command_check_requires_signature(args)? {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Some(("show-arch", args)) => command_show_arch(args),
        Some(("size", args)) => command_size(args),
        Some(("generate", args)) => command_generate(args),
        Some(("inject", args)) => command_inject(args),
        Some(("codesign", args)) => command_sign(args),
        _ => Err(AdhocSignError::CliUnknownCommand),
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

    std::process::exit(exit_code);
}
