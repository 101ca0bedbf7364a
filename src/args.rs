use clap::{Arg, ArgAction, Command};

pub struct Args {
    pub input: String,
    pub output: String,
    pub transformer: String,
    pub verbose: bool,
}

pub fn get_args() -> Args {
    let matches = Command::new("hprof-redact")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stream and redact HPROF heap dumps")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .required(true)
                .help("Input HPROF path, possibly gzip-compressed (stdin is not supported, two passes are required)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .required(true)
                .help("Output HPROF path or '-' for stdout; a '.gz' suffix enables gzip compression"),
        )
        .arg(
            Arg::new("transformer")
                .short('t')
                .long("transformer")
                .default_value("zero")
                .help(
                    "Transformer to apply: zero (zero primitives + string contents), \
                     zero-strings (zero string contents only), drop-strings (empty string contents)",
                ),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log every change to stderr and print a summary"),
        )
        .get_matches();

    Args {
        input: matches
            .get_one::<String>("input")
            .expect("input is required")
            .clone(),
        output: matches
            .get_one::<String>("output")
            .expect("output is required")
            .clone(),
        transformer: matches
            .get_one::<String>("transformer")
            .expect("transformer has a default")
            .clone(),
        verbose: matches.get_flag("verbose"),
    }
}
