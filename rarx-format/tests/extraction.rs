//! Extracting entries to disk: paths, metadata, overwrite decisions, damaged
//! data and parallel testing.

#[path = "../src/testutil.rs"]
mod testutil;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use rarx_format::{
    ArchiveReader, Conflict, ConflictKind, Decision, DecisionHandler, EntryOutcome, ExtractError,
    ExtractOptions, MatchMode, NumberingScheme, OpenOptions, OverwritePolicy, PathMatcher,
    SkipReason,
};
use testutil::{open_memory, rar5, Entry, Options, MTIME};

fn sample() -> Vec<Entry> {
    vec![
        Entry::dir("docs"),
        Entry::file("docs/readme.txt", b"read me first"),
        Entry::file("docs/notes.txt", b"some notes").blake2(),
        Entry::file("src/a.c", b"int main() { return 0; }").chain(),
        Entry::file("src/b.c", b"int other() { return 1; }").solid(),
        Entry::file("src/c.c", b"int third() { return 2; }").solid(),
        Entry::file("run.sh", b"#!/bin/sh\necho hi\n").mode(0o755),
        Entry::symlink("latest", "src/a.c"),
        Entry::file("empty", b""),
    ]
}

fn open(entries: &[Entry]) -> ArchiveReader {
    open_memory(
        "x.rar",
        rar5(entries, &Options::default()),
        NumberingScheme::New,
        OpenOptions::new(),
    )
}

fn all() -> PathMatcher {
    PathMatcher::default()
}

fn extract_into(entries: &[Entry], dest: &Path, options: &ExtractOptions) -> rarx_format::ExtractReport {
    open(entries).extract_all(dest, &all(), options)
}

fn outcome<'a>(report: &'a rarx_format::ExtractReport, name: &str) -> &'a Result<EntryOutcome, ExtractError> {
    report
        .results
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, r)| r)
        .unwrap()
}

/// Answers every question the same way and counts how often it was asked.
struct Always {
    answer: Decision,
    asked: Arc<AtomicUsize>,
}

impl DecisionHandler for Always {
    fn decide(&mut self, conflict: &Conflict) -> Decision {
        assert_eq!(conflict.kind, ConflictKind::Exists);
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

/// Every kind of entry lands where expected with its content and metadata
#[test]
fn test_extract_all() {
    let dir = tempfile::tempdir().unwrap();
    let report = extract_into(&sample(), dir.path(), &ExtractOptions::default());
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.stats.files, 7);
    assert_eq!(report.stats.dirs_created, 1);
    assert_eq!(report.stats.skipped, 1);

    let root = dir.path();
    assert_eq!(fs::read(root.join("docs/readme.txt")).unwrap(), b"read me first");
    assert_eq!(fs::read(root.join("docs/notes.txt")).unwrap(), b"some notes");
    assert_eq!(fs::read(root.join("src/b.c")).unwrap(), b"int other() { return 1; }");
    assert_eq!(fs::read(root.join("src/c.c")).unwrap(), b"int third() { return 2; }");
    assert_eq!(fs::read(root.join("empty")).unwrap(), b"");
    assert!(!root.join("latest").exists());

    assert!(matches!(
        outcome(&report, "docs"),
        Ok(EntryOutcome::DirectoryCreated(path)) if path == &root.join("docs")
    ));
    assert!(matches!(
        outcome(&report, "latest"),
        Ok(EntryOutcome::Skipped(SkipReason::Link))
    ));

    let modified = fs::metadata(root.join("docs/readme.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(u64::from(MTIME)));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = |p: &str| fs::metadata(root.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("run.sh"), 0o755);
        assert_eq!(mode("docs/readme.txt"), 0o644);
    }
}

/// Names that climb out of the destination are kept inside it
#[test]
fn test_extract_stays_in_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out");
    let entries = [
        Entry::file("../evil.txt", b"nope"),
        Entry::file("a/../../../deep.txt", b"nope either"),
    ];
    let report = extract_into(&entries, &dest, &ExtractOptions::default());
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(fs::read(dest.join("evil.txt")).unwrap(), b"nope");
    assert_eq!(fs::read(dest.join("deep.txt")).unwrap(), b"nope either");
    assert!(!dir.path().join("evil.txt").exists());
}

/// Only entries selected by the matcher are written
#[test]
fn test_extract_matching() {
    let dir = tempfile::tempdir().unwrap();
    let matcher = PathMatcher::new(MatchMode::SubPath).include("docs");
    let report = open(&sample()).extract_all(dir.path(), &matcher, &ExtractOptions::default());
    assert!(report.is_success());
    assert_eq!(report.stats.files, 2);
    assert!(dir.path().join("docs/notes.txt").exists());
    assert!(!dir.path().join("src").exists());
    assert!(matches!(
        outcome(&report, "src/a.c"),
        Ok(EntryOutcome::Skipped(SkipReason::NotMatched))
    ));
    assert_eq!(report.results.len(), sample().len());
}

/// A file in the middle of a solid run extracts on its own
#[test]
fn test_extract_single_solid_entry() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = open(&sample());
    let entries: Vec<_> = reader.entries().collect::<Result<_, _>>().unwrap();
    let c = entries.iter().find(|e| e.name == "src/c.c").unwrap();
    let outcome = reader.extract(c, dir.path(), &ExtractOptions::default()).unwrap();
    assert_eq!(
        outcome,
        EntryOutcome::Extracted {
            path: dir.path().join("src/c.c"),
            bytes: 25
        }
    );
    assert_eq!(fs::read(dir.path().join("src/c.c")).unwrap(), b"int third() { return 2; }");
}

/// Existing files without a decision handler stop that entry only
#[test]
fn test_overwrite_needs_a_decision() {
    let dir = tempfile::tempdir().unwrap();
    let entries = [Entry::file("a.txt", b"new"), Entry::file("b.txt", b"fresh")];
    fs::write(dir.path().join("a.txt"), b"old").unwrap();

    let report = extract_into(&entries, dir.path(), &ExtractOptions::default());
    assert!(matches!(
        outcome(&report, "a.txt"),
        Err(ExtractError::DecisionRequired(_))
    ));
    assert!(outcome(&report, "b.txt").is_ok());
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"old");
}

/// The replace, skip and rename policies
#[test]
fn test_overwrite_policies() {
    let entries = [Entry::file("a.txt", b"new")];
    let run = |policy| {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let options = ExtractOptions {
            overwrite: policy,
            ..ExtractOptions::default()
        };
        let report = extract_into(&entries, dir.path(), &options);
        (dir, report)
    };

    let (dir, report) = run(OverwritePolicy::ReplaceAll);
    assert!(report.is_success());
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"new");

    let (dir, report) = run(OverwritePolicy::SkipAll);
    assert!(matches!(
        outcome(&report, "a.txt"),
        Ok(EntryOutcome::Skipped(SkipReason::Exists))
    ));
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"old");

    let (dir, report) = run(OverwritePolicy::AutoRename);
    let renamed = dir.path().join("a(1).txt");
    assert!(matches!(
        outcome(&report, "a.txt"),
        Ok(EntryOutcome::Extracted { path, .. }) if path == &renamed
    ));
    assert_eq!(fs::read(&renamed).unwrap(), b"new");
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"old");
}

/// Replacing an existing link writes a new file instead of following the link
#[cfg(unix)]
#[test]
fn test_replace_does_not_follow_links() {
    let outside = tempfile::tempdir().unwrap();
    let target = outside.path().join("victim.txt");
    fs::write(&target, b"keep").unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(&target, dir.path().join("a.txt")).unwrap();
    let options = ExtractOptions {
        overwrite: OverwritePolicy::ReplaceAll,
        ..ExtractOptions::default()
    };
    let report = extract_into(&[Entry::file("a.txt", b"new")], dir.path(), &options);

    assert!(report.is_success());
    assert_eq!(fs::read(&target).unwrap(), b"keep");
    let meta = fs::symlink_metadata(dir.path().join("a.txt")).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"new");
}

/// An "all" answer holds for the session unless every conflict must be asked
#[test]
fn test_decision_handler_answers() {
    let entries = [
        Entry::file("a.txt", b"1"),
        Entry::file("b.txt", b"2"),
        Entry::file("c.txt", b"3"),
    ];
    for (policy, expected) in [(OverwritePolicy::Default, 1), (OverwritePolicy::ForceAsk, 3)] {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(dir.path().join(name), b"old").unwrap();
        }
        let asked = Arc::new(AtomicUsize::new(0));
        let mut reader = open(&entries);
        reader.set_decision_handler(Box::new(Always {
            answer: Decision::ReplaceAll,
            asked: asked.clone(),
        }));
        let options = ExtractOptions {
            overwrite: policy,
            ..ExtractOptions::default()
        };
        let report = reader.extract_all(dir.path(), &all(), &options);
        assert!(report.is_success());
        assert_eq!(asked.load(Ordering::SeqCst), expected, "{:?}", policy);
        assert_eq!(fs::read(dir.path().join("c.txt")).unwrap(), b"3");
    }
}

/// Cancelling from the handler ends the whole session
#[test]
fn test_decision_handler_cancel() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"old").unwrap();
    let mut reader = open(&[Entry::file("a.txt", b"1"), Entry::file("b.txt", b"2")]);
    reader.set_decision_handler(Box::new(Always {
        answer: Decision::Cancel,
        asked: Arc::new(AtomicUsize::new(0)),
    }));
    let report = reader.extract_all(dir.path(), &all(), &ExtractOptions::default());
    assert_eq!(report.results.len(), 1);
    assert!(matches!(report.results[0].1, Err(ExtractError::Cancelled)));
    assert!(!dir.path().join("b.txt").exists());
}

/// Damaged data fails verification; the output is removed unless kept
#[test]
fn test_damaged_data() {
    let entries = [Entry::file("hello.txt", b"hello world"), Entry::file("ok.txt", b"fine")];
    let mut data = rar5(&entries, &Options::default());
    let pos = data[0].windows(11).position(|w| w == b"hello world").unwrap();
    data[0][pos] = b'j';

    for keep_broken in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = open_memory("x.rar", data.clone(), NumberingScheme::New, OpenOptions::new());
        let options = ExtractOptions {
            keep_broken,
            ..ExtractOptions::default()
        };
        let report = reader.extract_all(dir.path(), &all(), &options);
        assert!(!report.is_success());
        assert_eq!(report.stats.checksum_failures, 1);
        assert_eq!(report.stats.files, 1);
        assert!(matches!(
            outcome(&report, "hello.txt"),
            Err(ExtractError::EntryCrcMismatch { .. })
        ));

        let broken = dir.path().join("hello.txt");
        if keep_broken {
            assert_eq!(fs::read(&broken).unwrap(), b"jello world");
        } else {
            assert!(!broken.exists());
        }
    }
}

/// Testing on a thread pool gives the same report as testing in order
#[test]
fn test_parallel_matches_serial() {
    let mut entries = sample();
    entries.push(Entry::file("more/x.c", b"another stream").chain());
    entries.push(Entry::file("more/y.c", b"continued").solid());
    let summary = |report: &rarx_format::ExtractReport| {
        report
            .results
            .iter()
            .map(|(name, r)| (name.clone(), r.as_ref().ok().cloned()))
            .collect::<Vec<_>>()
    };

    let serial = open(&entries).test_all(&all());
    let parallel = open(&entries).test_parallel(&all(), 4);
    assert!(serial.is_success());
    assert_eq!(serial.stats, parallel.stats);
    assert_eq!(summary(&serial), summary(&parallel));

    let matcher = PathMatcher::new(MatchMode::Names).include("*.c");
    let serial = open(&entries).test_all(&matcher);
    let parallel = open(&entries).test_parallel(&matcher, 2);
    assert_eq!(serial.stats.files, 5);
    assert_eq!(summary(&serial), summary(&parallel));
}

/// Setting the cancel flag stops before the next entry
#[test]
fn test_cancel_flag() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = open(&sample());
    reader.cancel_flag().store(true, Ordering::Relaxed);
    let report = reader.extract_all(dir.path(), &all(), &ExtractOptions::default());
    assert_eq!(report.results.len(), 1);
    assert!(matches!(report.results[0].1, Err(ExtractError::Cancelled)));
}
