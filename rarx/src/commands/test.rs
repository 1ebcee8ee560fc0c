use std::io::IsTerminal;

use rarx_format::ExtractReport;

use crate::cli::TestArgs;
use crate::commands::extract::finish;
use crate::error::Result;
use crate::util::{create_progress_bar, create_spinner, open_archive};

pub fn run(args: TestArgs) -> Result<()> {
    let mut reader = open_archive(&args.open)?;
    let matcher = args.select.matcher();
    let show_progress = !args.quiet && std::io::stderr().is_terminal();

    let report: ExtractReport = if args.serial {
        let progress = show_progress.then(|| create_progress_bar("Testing"));
        let report = reader.test_all_with_progress(&matcher, |entry, result| {
            if let Some(pb) = &progress {
                pb.inc(1);
                pb.set_message(entry.name.clone());
            }
            if let Err(e) = result {
                match &progress {
                    Some(pb) => pb.suspend(|| eprintln!("FAILED {}: {}", entry.name, e)),
                    None => eprintln!("FAILED {}: {}", entry.name, e),
                }
            }
        });
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        report
    } else {
        let jobs = args.jobs.unwrap_or_else(num_cpus::get);
        let spinner = show_progress.then(|| create_spinner("Testing", &args.open.archive));
        let report = reader.test_parallel(&matcher, jobs);
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        for (name, e) in report.failures() {
            eprintln!("FAILED {}: {}", name, e);
        }
        report
    };
    reader.close();

    if !args.quiet {
        println!(
            "Tested {} files ({} skipped, {} failures)",
            report.stats.files, report.stats.skipped, report.stats.failures
        );
        if report.is_success() {
            println!("All OK");
        }
    }
    finish(report)
}
