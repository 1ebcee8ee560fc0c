use rarx_format::{ArchiveReader, FileEntry, Format};

use crate::cli::InfoArgs;
use crate::error::{Error, Result};
use crate::util::{format_size, open_archive, ratio};

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

pub fn run(args: InfoArgs) -> Result<()> {
    let mut reader = open_archive(&args.open)?;
    let entries: Vec<FileEntry> = reader
        .entries()
        .collect::<std::result::Result<_, _>>()
        .map_err(|source| Error::ReadHeaders { source })?;

    show_archive_info(&reader, &entries);
    Ok(())
}

fn show_archive_info(reader: &ArchiveReader, entries: &[FileEntry]) {
    let archive = reader.archive();

    println!("Archive:     {}", reader.volumes().first_path().display());
    println!("Format:      {}", archive.format);
    if archive.sfx_offset > 0 {
        println!("SFX module:  {}", format_size(archive.sfx_offset));
    }
    println!("Solid:       {}", yes_no(archive.is_solid));
    println!("Locked:      {}", yes_no(archive.is_locked));
    println!("Recovery:    {}", yes_no(archive.has_recovery_record));
    println!("Encrypted headers: {}", yes_no(archive.is_encrypted_headers));
    if archive.is_volume {
        let numbering = match archive.numbering {
            rarx_format::NumberingScheme::New => "name.partN.rar",
            rarx_format::NumberingScheme::Old => "name.rar, name.r00, ...",
        };
        println!(
            "Volumes:     {} ({}, first volume: {})",
            reader.volumes().len(),
            numbering,
            yes_no(archive.is_first_volume)
        );
    }
    if archive.format == Format::Modern50 {
        println!("Quick open:  {}", yes_no(reader.used_quick_open()));
    }

    let files = entries
        .iter()
        .filter(|e| !e.is_directory() && e.redirection.is_none());
    let (count, packed, unpacked) = files.fold((0u64, 0u64, 0u64), |(n, p, u), e| {
        (n + 1, p + e.packed_size, u + e.unpacked_size)
    });
    let dirs = entries.iter().filter(|e| e.is_directory()).count();
    let links = entries.iter().filter(|e| e.redirection.is_some()).count();
    let encrypted = entries.iter().filter(|e| e.is_encrypted()).count();

    println!();
    println!("Entries:     {} files, {} directories, {} links", count, dirs, links);
    if encrypted > 0 {
        println!("Encrypted:   {} entries", encrypted);
    }
    println!(
        "Size:        {} (packed: {}, {:.1}%)",
        format_size(unpacked),
        format_size(packed),
        ratio(packed, unpacked)
    );

    if let Some(comment) = reader.comment() {
        println!();
        println!("Comment:");
        for line in comment.lines() {
            println!("  {}", line);
        }
    }
}
