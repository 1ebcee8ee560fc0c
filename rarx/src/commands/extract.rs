use std::io::IsTerminal;

use rarx_format::{EntryOutcome, ExtractOptions, ExtractReport, OverwritePolicy, SkipReason};

use crate::cli::ExtractArgs;
use crate::error::{Error, Result};
use crate::util::{create_progress_bar, open_archive, PromptHandler};

pub fn run(args: ExtractArgs) -> Result<()> {
    let mut reader = open_archive(&args.open)?;

    let output_path = match args.output.clone() {
        Some(path) => path,
        None => std::env::current_dir().map_err(|source| Error::CurrentDir { source })?,
    };
    std::fs::create_dir_all(&output_path).map_err(|source| Error::CreateDirectory {
        path: output_path.clone(),
        source,
    })?;

    let show_progress = !args.quiet && std::io::stderr().is_terminal();
    let progress = show_progress.then(|| create_progress_bar("Extracting"));

    let overwrite = args.overwrite();
    if matches!(overwrite, OverwritePolicy::Default | OverwritePolicy::ForceAsk) {
        match PromptHandler::new(progress.clone()) {
            Some(handler) => reader.set_decision_handler(Box::new(handler)),
            None => tracing::debug!("no terminal; existing files are reported, not replaced"),
        }
    }

    let options = ExtractOptions {
        overwrite,
        verify: !args.no_checksum,
        keep_broken: args.keep_broken,
        ..ExtractOptions::default()
    };
    let matcher = args.select.matcher();

    let report = reader.extract_all_with_progress(&output_path, &matcher, &options, |entry, result| {
        if let Some(pb) = &progress {
            pb.inc(1);
            pb.set_message(entry.name.clone());
        }
        let line = match result {
            Ok(EntryOutcome::Skipped(SkipReason::Exists)) => format!("Skipped {} (exists)", entry.name),
            Ok(EntryOutcome::Skipped(SkipReason::Link)) => format!("Skipped {} (link)", entry.name),
            Err(e) => format!("FAILED {}: {}", entry.name, e),
            Ok(_) => return,
        };
        match &progress {
            Some(pb) => pb.suspend(|| eprintln!("{}", line)),
            None if !args.quiet || result.is_err() => eprintln!("{}", line),
            None => {}
        }
    });

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    reader.close();

    if !args.quiet {
        println!(
            "Extracted {} files and {} directories to {}",
            report.stats.files,
            report.stats.dirs_created,
            output_path.display()
        );
    }
    finish(report)
}

/// Report what went wrong and exit with status 1 if anything did.
pub(crate) fn finish(report: ExtractReport) -> Result<()> {
    if report.stats.checksum_failures > 0 {
        eprintln!(
            "WARNING: {} files failed checksum verification",
            report.stats.checksum_failures
        );
    }
    let failed = !report.is_success();
    if let Some(source) = report.scan_error {
        eprintln!("{:?}", miette::Report::new(Error::ReadHeaders { source }));
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
