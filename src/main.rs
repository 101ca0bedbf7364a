use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use indoc::formatdoc;

use hprof_redact::args::{get_args, Args};
use hprof_redact::errors::HprofRedactError;
use hprof_redact::filter::{FilterStats, HprofFilter};
use hprof_redact::io::open_output;
use hprof_redact::transformer::{self, HprofTransformer};
use hprof_redact::utils::pretty_bytes_size;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hprof-redact: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), HprofRedactError> {
    let args = get_args();
    let transformer = transformer::from_name(&args.transformer)?;

    if args.input == "-" {
        return Err(HprofRedactError::InvalidHprofFile {
            message: "stdin is not supported, the input must be a re-openable file path"
                .to_string(),
        });
    }
    let input_path = Path::new(&args.input);
    let started = Instant::now();

    let stats = if args.output == "-" {
        let stdout = io::stdout();
        run_filter(&args, &*transformer, input_path, stdout.lock())?
    } else {
        let mut sink = open_output(Path::new(&args.output))?;
        let stats = run_filter(&args, &*transformer, input_path, &mut sink)?;
        sink.finish()?;
        stats
    };

    if args.verbose {
        print_summary(input_path, &stats, started);
    }
    Ok(())
}

fn run_filter(
    args: &Args,
    transformer: &dyn HprofTransformer,
    input_path: &Path,
    output: impl Write,
) -> Result<FilterStats, HprofRedactError> {
    if args.verbose {
        let mut stderr = io::stderr().lock();
        HprofFilter::with_verbose_sink(transformer, &mut stderr).filter(input_path, output)
    } else {
        HprofFilter::new(transformer).filter(input_path, output)
    }
}

fn print_summary(input_path: &Path, stats: &FilterStats, started: Instant) {
    let input_size = std::fs::metadata(input_path).map(|m| m.len()).unwrap_or(0);
    let summary = formatdoc!(
        "Processed {size} of HPROF input in {elapsed:.2?}
         records: {records} (UTF-8: {utf8}, rewritten: {rewritten})
         heap dump segments: {segments} with {subs} sub-records
         class dumps: {classes}, instance dumps: {instances} ({opaque} copied opaque)
         object arrays: {object_arrays}, primitive arrays: {primitive_arrays}",
        size = pretty_bytes_size(input_size),
        elapsed = started.elapsed(),
        records = stats.records,
        utf8 = stats.utf8_records,
        rewritten = stats.utf8_rewritten,
        segments = stats.heap_dump_segments,
        subs = stats.gc_sub_records,
        classes = stats.class_dumps,
        instances = stats.instance_dumps,
        opaque = stats.opaque_instance_dumps,
        object_arrays = stats.object_array_dumps,
        primitive_arrays = stats.primitive_array_dumps,
    );
    eprintln!("{summary}");
}
