use rarx_format::{ArchiveReader, FileEntry};
use serde::Serialize;

use crate::cli::ListArgs;
use crate::error::{Error, Result};
use crate::util::{format_attributes, format_size, format_time, open_archive, ratio};

#[derive(Serialize)]
struct JsonEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    packed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    solid: bool,
    volumes: usize,
}

impl From<&FileEntry> for JsonEntry {
    fn from(entry: &FileEntry) -> Self {
        let is_file = !entry.is_directory() && entry.redirection.is_none();
        JsonEntry {
            path: entry.name.clone(),
            entry_type: if entry.is_directory() {
                "directory"
            } else if entry.redirection.is_some() {
                "link"
            } else {
                "file"
            },
            size: is_file.then_some(entry.unpacked_size),
            packed_size: is_file.then_some(entry.packed_size),
            method: is_file.then(|| entry.compression.method_name()),
            modified: entry.times.modified.map(|t| format_time(Some(t))),
            checksum: Some(entry.checksum.to_string()).filter(|s| s != "-"),
            encryption: entry.encryption.as_ref().map(|e| e.to_string()),
            target: entry.redirection.as_ref().map(|r| r.target.clone()),
            solid: entry.is_solid(),
            volumes: entry.segments.len(),
        }
    }
}

pub fn run(args: ListArgs) -> Result<()> {
    let mut reader = open_archive(&args.open)?;
    let entries: Vec<FileEntry> = reader
        .entries()
        .collect::<std::result::Result<_, _>>()
        .map_err(|source| Error::ReadHeaders { source })?;

    if args.json {
        list_json(&entries)
    } else if args.long {
        list_long(&reader, &entries)
    } else {
        list_compact(&entries)
    }
}

fn display_name(entry: &FileEntry) -> String {
    let mut name = entry.name.clone();
    if entry.is_directory() {
        name.push('/');
    }
    if entry.is_encrypted() {
        name.insert(0, '*');
    }
    if let Some(redirection) = &entry.redirection {
        name.push_str(" -> ");
        name.push_str(&redirection.target);
    }
    name
}

fn list_compact(entries: &[FileEntry]) -> Result<()> {
    println!("{:>12}  {:>12}  {:>6}  Path", "Packed", "Size", "Ratio");
    println!("{}", "-".repeat(60));

    let mut total_packed = 0u64;
    let mut total_size = 0u64;

    for entry in entries {
        if entry.is_directory() || entry.redirection.is_some() {
            println!("{:>12}  {:>12}  {:>6}  {}", "-", "-", "-", display_name(entry));
            continue;
        }
        println!(
            "{:>12}  {:>12}  {:>5.1}%  {}",
            format_size(entry.packed_size),
            format_size(entry.unpacked_size),
            ratio(entry.packed_size, entry.unpacked_size),
            display_name(entry)
        );
        total_packed += entry.packed_size;
        total_size += entry.unpacked_size;
    }

    println!("{}", "-".repeat(60));
    println!(
        "{:>12}  {:>12}  {:>5.1}%  Total ({} entries)",
        format_size(total_packed),
        format_size(total_size),
        ratio(total_packed, total_size),
        entries.len()
    );

    Ok(())
}

fn list_long(reader: &ArchiveReader, entries: &[FileEntry]) -> Result<()> {
    let archive = reader.archive();
    println!("Archive: {} ({})", reader.volumes().first_path().display(), archive.format);
    if let Some(comment) = reader.comment() {
        println!("Comment: {}", comment.trim_end());
    }

    println!();
    println!(
        "{:8}  {:>12}  {:>12}  {:19}  {:10}  {:>16}  Path",
        "Method", "Packed", "Size", "Modified", "Attributes", "Checksum"
    );
    println!("{}", "-".repeat(100));

    for entry in entries {
        let checksum: String = entry.checksum.to_string().chars().take(16).collect();
        let (method, packed, size) = if entry.is_directory() {
            ("<dir>".to_string(), "-".to_string(), "-".to_string())
        } else if entry.redirection.is_some() {
            ("<link>".to_string(), "-".to_string(), "-".to_string())
        } else {
            (
                entry.compression.method_name().to_string(),
                format_size(entry.packed_size),
                format_size(entry.unpacked_size),
            )
        };
        println!(
            "{:8}  {:>12}  {:>12}  {:19}  {:10}  {:>16}  {}",
            method,
            packed,
            size,
            format_time(entry.times.modified),
            format_attributes(entry),
            checksum,
            display_name(entry)
        );
    }

    Ok(())
}

fn list_json(entries: &[FileEntry]) -> Result<()> {
    let entries: Vec<JsonEntry> = entries.iter().map(JsonEntry::from).collect();
    match serde_json::to_string_pretty(&entries) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "cannot serialize listing"),
    }
    Ok(())
}
