use chrono::NaiveDateTime;
use dialoguer::console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use rarx_format::{
    ArchiveReader, Conflict, ConflictKind, Decision, DecisionHandler, DecodeError, FileEntry,
    OpenError, OpenOptions,
};

use crate::cli::OpenArgs;
use crate::error::{Error, Result};

const PASSWORD_ENV: &str = "RARX_PASSWORD";
const PASSWORD_ATTEMPTS: usize = 3;

/// Open the archive named on the command line.
///
/// When the headers turn out to be encrypted and no password or a wrong one
/// was given, the password is asked for on the terminal and the archive
/// opened again, a few times at most.
pub fn open_archive(args: &OpenArgs) -> Result<ArchiveReader> {
    let password = match args.password.as_deref() {
        Some("") => Some(prompt_password()?),
        Some(password) => Some(password.to_string()),
        None => std::env::var(PASSWORD_ENV).ok(),
    };

    let open = |password: Option<&str>| {
        let options = OpenOptions::new().quick_open(!args.no_quick_open);
        let options = match password {
            Some(password) => options.password(password),
            None => options,
        };
        ArchiveReader::open_with(&args.archive, options)
    };

    let mut result = open(password.as_deref());
    let mut attempts = 0;
    while let Err(e) = &result {
        if !needs_password(e) || attempts == PASSWORD_ATTEMPTS || !Term::stderr().is_term() {
            break;
        }
        if attempts > 0 || password.is_some() {
            eprintln!("Wrong password, try again");
        }
        attempts += 1;
        let password = prompt_password()?;
        result = open(Some(&password));
    }

    result.map_err(|source| match source {
        OpenError::Decode(DecodeError::MissingPassword) => Error::PasswordRequired {
            path: args.archive.clone(),
        },
        OpenError::Decode(DecodeError::BadPassword | DecodeError::FailedDecryption { .. }) => {
            Error::WrongPassword {
                path: args.archive.clone(),
            }
        }
        source => Error::OpenArchive {
            path: args.archive.clone(),
            source,
        },
    })
}

/// Whether opening failed for want of the right password.
fn needs_password(error: &OpenError) -> bool {
    matches!(
        error,
        OpenError::Decode(
            DecodeError::MissingPassword
                | DecodeError::BadPassword
                | DecodeError::FailedDecryption { .. }
        )
    )
}

/// Ask for the archive password on the terminal.
///
/// This code makes blocking syscalls.
pub fn prompt_password() -> Result<String> {
    let term = Term::stderr();

    // `dialoguer::Password` does not fail when the terminal is not a tty.
    if !term.is_term() {
        let source = std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "cannot read password from non-terminal",
        );
        return Err(Error::ReadPassword {
            source: source.into(),
        });
    }

    dialoguer::Password::new()
        .with_prompt("Enter the archive password")
        .allow_empty_password(false)
        .interact_on(&term)
        .map_err(|source| Error::ReadPassword { source })
}

/// Asks on the terminal what to do about existing files and write errors.
pub struct PromptHandler {
    progress: Option<ProgressBar>,
}

impl PromptHandler {
    /// `None` when there is no terminal to ask on.
    pub fn new(progress: Option<ProgressBar>) -> Option<PromptHandler> {
        Term::stderr().is_term().then_some(PromptHandler { progress })
    }

    fn ask(conflict: &Conflict) -> Decision {
        let (prompt, choices): (String, &[(&str, Decision)]) = match conflict.kind {
            ConflictKind::Exists => (
                format!(
                    "`{}` exists (archived: {}, {})",
                    conflict.path.display(),
                    format_size(conflict.size),
                    format_time(conflict.modified)
                ),
                &[
                    ("Replace", Decision::Replace),
                    ("Replace all", Decision::ReplaceAll),
                    ("Skip", Decision::Skip),
                    ("Skip all", Decision::SkipAll),
                    ("Rename", Decision::Rename),
                    ("Cancel", Decision::Cancel),
                ],
            ),
            ConflictKind::WriteFailed | ConflictKind::DiskFull => (
                format!(
                    "Writing `{}` failed{}",
                    conflict.path.display(),
                    if conflict.kind == ConflictKind::DiskFull {
                        ": the disk is full"
                    } else {
                        ""
                    }
                ),
                &[
                    ("Retry", Decision::Replace),
                    ("Write under another name", Decision::Rename),
                    ("Skip", Decision::Skip),
                    ("Cancel", Decision::Cancel),
                ],
            ),
        };
        let labels: Vec<&str> = choices.iter().map(|(label, _)| *label).collect();
        let picked = dialoguer::Select::new()
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_on_opt(&Term::stderr());
        match picked {
            Ok(Some(i)) => choices[i].1,
            Ok(None) => Decision::Cancel,
            Err(e) => {
                tracing::warn!(error = %e, "prompt failed");
                Decision::Cancel
            }
        }
    }
}

impl DecisionHandler for PromptHandler {
    fn decide(&mut self, conflict: &Conflict) -> Decision {
        match &self.progress {
            Some(pb) => pb.suspend(|| PromptHandler::ask(conflict)),
            None => PromptHandler::ask(conflict),
        }
    }
}

/// Create a progress bar for file operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix} {pos:>7} files  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// A spinner for a parallel run, whose entries finish out of order.
pub fn create_spinner(action: &str, archive: &std::path::Path) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {prefix} {wide_msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(action.to_string());
    pb.set_message(archive.display().to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

/// Entry times are stored without a zone and shown as they are.
pub fn format_time(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}

/// Unix permissions as `rwxr-xr-x`, DOS attributes as `RHSDA` letters.
pub fn format_attributes(entry: &FileEntry) -> String {
    if let Some(mode) = entry.unix_mode() {
        let mut s = String::with_capacity(10);
        s.push(if entry.is_directory() { 'd' } else { '-' });
        for shift in [6, 3, 0] {
            let bits = (mode >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        return s;
    }
    if entry.host_os.is_dos_like() {
        let attr = entry.attributes;
        return [(0x01, 'R'), (0x02, 'H'), (0x04, 'S'), (0x10, 'D'), (0x20, 'A')]
            .iter()
            .map(|&(bit, c)| if attr & bit != 0 { c } else { '.' })
            .collect();
    }
    "-".into()
}

/// Format file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    use humansize::{FormatSize, BINARY};
    bytes.format_size(BINARY)
}

/// Compressed size as a share of the original.
pub fn ratio(packed: u64, unpacked: u64) -> f64 {
    if unpacked == 0 {
        0.0
    } else {
        packed as f64 / unpacked as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_password_asks_again() {
        assert!(needs_password(&OpenError::Decode(DecodeError::MissingPassword)));
        assert!(needs_password(&OpenError::Decode(DecodeError::BadPassword)));
        assert!(needs_password(&OpenError::Decode(DecodeError::FailedDecryption {
            position: 8
        })));
        assert!(!needs_password(&OpenError::Decode(DecodeError::UnrecognizedFormat)));
    }

    #[test]
    fn ratio_of_empty_is_zero() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(50, 100), 50.0);
    }

    #[test]
    fn times_without_value() {
        assert_eq!(format_time(None), "-");
        let t = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 6));
        assert_eq!(format_time(t), "2020-01-02 03:04:06");
    }
}
