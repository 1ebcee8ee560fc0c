//! Builders for small archives, shared by the unit and integration tests.
//!
//! Only stored data and a toy "chain" method are produced. The chain method
//! XORs every byte with the previous plain byte and keeps that byte across
//! the entries of a solid run, so decoding an entry without its
//! predecessors gives different bytes.

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use aes::{Aes128, Aes256};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use rarx_format::{
    next_volume_name, ArchiveReader, Checksum, CompressionInfo, Decompressor, DecompressorFactory,
    Kdf, KeyCache, KeyMaterial, MemoryVolumes, NumberingScheme, OpenOptions, Password, Stored,
};

pub const CHAIN_METHOD: u8 = 3;
/// Small enough to keep key derivation quick in tests.
pub const TEST_LG2_COUNT: u8 = 6;
/// Modification time written into every entry, in Unix seconds.
pub const MTIME: u32 = 1_600_000_000;
/// 2020-01-02 03:04:06 in DOS format.
pub const DOS_TIME: u32 = (40 << 25) | (1 << 21) | (2 << 16) | (3 << 11) | (4 << 5) | 3;

const SALT16: [u8; 16] = *b"0123456789abcdef";
const HEADER_SALT16: [u8; 16] = *b"headersaltheader";
const IV16: [u8; 16] = *b"fedcba9876543210";
const SALT8: [u8; 8] = *b"saltsalt";
const HEADER_SALT8: [u8; 8] = *b"hdrsalt!";

const MAGIC_14: &[u8] = b"RE~^";
const MAGIC_15: &[u8] = b"Rar!\x1a\x07\x00";
const MAGIC_50: &[u8] = b"Rar!\x1a\x07\x01\x00";

#[derive(Debug, Default)]
pub struct ChainDecoder {
    prev: u8,
}

impl Decompressor for ChainDecoder {
    fn feed(&mut self, input: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
        for &b in input {
            let plain = b ^ self.prev;
            output.push(plain);
            self.prev = plain;
        }
        Ok(())
    }
}

/// Store plus the chain method.
#[derive(Debug, Default)]
pub struct ChainCodecs;

impl DecompressorFactory for ChainCodecs {
    fn create(&self, info: &CompressionInfo) -> Option<Box<dyn Decompressor>> {
        match info.method {
            0 => Some(Box::new(Stored)),
            CHAIN_METHOD => Some(Box::<ChainDecoder>::default()),
            _ => None,
        }
    }
}

pub fn chain_encode(data: &[u8], prev: &mut u8) -> Vec<u8> {
    data.iter()
        .map(|&plain| {
            let b = plain ^ *prev;
            *prev = plain;
            b
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub name: String,
    pub content: Vec<u8>,
    pub directory: bool,
    pub method: u8,
    pub solid: bool,
    pub blake2: bool,
    pub password: Option<String>,
    pub mac: bool,
    pub symlink: Option<String>,
    pub mode: Option<u32>,
}

impl Entry {
    pub fn file(name: &str, content: &[u8]) -> Entry {
        Entry {
            name: name.to_string(),
            content: content.to_vec(),
            ..Entry::default()
        }
    }

    pub fn dir(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            directory: true,
            ..Entry::default()
        }
    }

    pub fn symlink(name: &str, target: &str) -> Entry {
        Entry {
            name: name.to_string(),
            symlink: Some(target.to_string()),
            ..Entry::default()
        }
    }

    pub fn chain(mut self) -> Entry {
        self.method = CHAIN_METHOD;
        self
    }

    /// Continue the compression stream of the previous chain entry.
    pub fn solid(mut self) -> Entry {
        self.method = CHAIN_METHOD;
        self.solid = true;
        self
    }

    pub fn blake2(mut self) -> Entry {
        self.blake2 = true;
        self
    }

    pub fn encrypted(mut self, password: &str) -> Entry {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_mac(mut self) -> Entry {
        self.mac = true;
        self
    }

    pub fn mode(mut self, mode: u32) -> Entry {
        self.mode = Some(mode);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Set the solid flag of the main header.
    pub solid: bool,
    /// Packed bytes per volume; `None` writes a single volume.
    pub volume_size: Option<usize>,
    /// Write a quick open record into every RAR 5.0 volume.
    pub quick_open: bool,
    /// Entries whose headers the quick open record leaves out.
    pub quick_open_omits: Vec<String>,
    pub header_password: Option<String>,
    pub comment: Option<String>,
    /// RAR 1.5 volumes named `.rar`, `.r00`, ... instead of `.partN.rar`.
    pub old_numbering: bool,
    pub lg2_count: u8,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            solid: false,
            volume_size: None,
            quick_open: false,
            quick_open_omits: Vec::new(),
            header_password: None,
            comment: None,
            old_numbering: false,
            lg2_count: TEST_LG2_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    Rar15,
    Rar50,
}

/// An entry's packed data and the checksum its last header stores.
struct Packed {
    data: Vec<u8>,
    checksum: Checksum,
    material: Option<KeyMaterial>,
}

/// A run of one entry's packed data within one volume.
#[derive(Debug, Clone, Copy)]
struct Part {
    entry: usize,
    start: usize,
    end: usize,
    first: bool,
    last: bool,
}

fn pack(entries: &[Entry], generation: Generation, lg2_count: u8) -> Vec<Packed> {
    let keys = KeyCache::new();
    let mut prev = 0u8;
    entries
        .iter()
        .map(|e| {
            if e.directory || e.symlink.is_some() {
                return Packed {
                    data: Vec::new(),
                    checksum: Checksum::None,
                    material: None,
                };
            }
            let encoded = if e.method == CHAIN_METHOD {
                if !e.solid {
                    prev = 0;
                }
                chain_encode(&e.content, &mut prev)
            } else {
                e.content.clone()
            };
            let mut checksum = if e.blake2 && generation == Generation::Rar50 {
                Checksum::Blake2sp([0; 32]).compute(&e.content)
            } else {
                Checksum::Crc32(0).compute(&e.content)
            };

            let material = e.password.as_ref().map(|password| {
                let password = Password::from(password.as_str());
                match generation {
                    Generation::Rar50 => {
                        keys.derive_key(&password, Some(&SALT16), Kdf::Rar50 { lg2_count })
                    }
                    Generation::Rar15 => keys.derive_key(&password, Some(&SALT8), Kdf::Rar30),
                }
            });
            let data = match &material {
                Some(m) => match generation {
                    Generation::Rar50 => encrypt256(&encoded, m.key(), &IV16),
                    Generation::Rar15 => encrypt128(&encoded, m.key(), m.iv()),
                },
                None => encoded,
            };
            if let (Some(m), true) = (&material, e.mac) {
                checksum = mac_checksum(m.hash_key(), checksum);
            }
            Packed {
                data,
                checksum,
                material,
            }
        })
        .collect()
}

fn distribute(packed: &[Packed], volume_size: Option<usize>) -> Vec<Vec<Part>> {
    let capacity = volume_size.unwrap_or(usize::MAX);
    let mut volumes = vec![Vec::new()];
    let mut room = capacity;
    for (entry, p) in packed.iter().enumerate() {
        let len = p.data.len();
        if len == 0 {
            volumes.last_mut().unwrap().push(Part {
                entry,
                start: 0,
                end: 0,
                first: true,
                last: true,
            });
            continue;
        }
        let mut start = 0;
        while start < len {
            if room == 0 {
                volumes.push(Vec::new());
                room = capacity;
            }
            let end = start + room.min(len - start);
            volumes.last_mut().unwrap().push(Part {
                entry,
                start,
                end,
                first: start == 0,
                last: end == len,
            });
            room -= end - start;
            start = end;
        }
    }
    volumes
}

/// The checksum a part's header stores: the content checksum on the last
/// part, a checksum of the part's packed bytes before it.
fn part_checksum(entry: &Entry, p: &Packed, part: &Part) -> Checksum {
    if part.last {
        return p.checksum;
    }
    let checksum = p.checksum.compute(&p.data[part.start..part.end]);
    match (&p.material, entry.mac) {
        (Some(m), true) => mac_checksum(m.hash_key(), checksum),
        _ => checksum,
    }
}

pub fn mac_checksum(key: &[u8; 32], checksum: Checksum) -> Checksum {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).unwrap();
    match checksum {
        Checksum::Crc32(crc) => {
            Mac::update(&mut mac, &crc.to_le_bytes());
            let digest = mac.finalize().into_bytes();
            let folded = digest
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc ^ (u32::from(*b) << ((i & 3) * 8)));
            Checksum::Crc32(folded)
        }
        Checksum::Blake2sp(digest) => {
            Mac::update(&mut mac, &digest);
            let mut out = [0u8; 32];
            out.copy_from_slice(&mac.finalize().into_bytes());
            Checksum::Blake2sp(out)
        }
        other => other,
    }
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    buf.resize((data.len() + 15) / 16 * 16, 0);
    buf
}

pub fn encrypt256(data: &[u8], key: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = padded(data);
    let mut enc = cbc::Encryptor::<Aes256>::new(
        GenericArray::from_slice(&key[..32]),
        GenericArray::from_slice(iv),
    );
    for block in buf.chunks_exact_mut(16) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    buf
}

pub fn encrypt128(data: &[u8], key: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = padded(data);
    let mut enc = cbc::Encryptor::<Aes128>::new(
        GenericArray::from_slice(&key[..16]),
        GenericArray::from_slice(iv),
    );
    for block in buf.chunks_exact_mut(16) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    buf
}

/// The 12 byte RAR 5.0 password check record for `material`.
pub fn check_record(material: &KeyMaterial) -> [u8; 12] {
    let check = material.password_check();
    let digest = Sha256::digest(check);
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(check);
    out[8..].copy_from_slice(&digest[..4]);
    out
}

// RAR 5.0

const HFL_EXTRA: u64 = 0x01;
const HFL_DATA: u64 = 0x02;
const HFL_SPLIT_BEFORE: u64 = 0x08;
const HFL_SPLIT_AFTER: u64 = 0x10;

pub fn vint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(b);
            return;
        }
        out.push(b | 0x80);
    }
}

/// A variable length integer padded to four bytes, so that patching the
/// value later keeps the header size.
fn vint4(out: &mut Vec<u8>, v: u64) {
    out.push((v & 0x7f) as u8 | 0x80);
    out.push(((v >> 7) & 0x7f) as u8 | 0x80);
    out.push(((v >> 14) & 0x7f) as u8 | 0x80);
    out.push(((v >> 21) & 0x7f) as u8);
}

/// CRC32, size and body.
pub fn block50(body: &[u8]) -> Vec<u8> {
    let mut sized = Vec::new();
    vint(&mut sized, body.len() as u64);
    sized.extend_from_slice(body);
    let mut out = crc32fast::hash(&sized).to_le_bytes().to_vec();
    out.extend_from_slice(&sized);
    out
}

fn header50(tag: u64, flags: u64, fields: &[u8], extra: &[u8], data_size: Option<u64>) -> Vec<u8> {
    let mut header_flags = flags;
    if !extra.is_empty() {
        header_flags |= HFL_EXTRA;
    }
    if data_size.is_some() {
        header_flags |= HFL_DATA;
    }
    let mut body = Vec::new();
    vint(&mut body, tag);
    vint(&mut body, header_flags);
    if !extra.is_empty() {
        vint(&mut body, extra.len() as u64);
    }
    if let Some(size) = data_size {
        vint(&mut body, size);
    }
    body.extend_from_slice(fields);
    body.extend_from_slice(extra);
    block50(&body)
}

fn extra_record(kind: u64, data: &[u8]) -> Vec<u8> {
    let mut inner = Vec::new();
    vint(&mut inner, kind);
    inner.extend_from_slice(data);
    let mut out = Vec::new();
    vint(&mut out, inner.len() as u64);
    out.extend_from_slice(&inner);
    out
}

fn file_header50(tag: u64, entry: &Entry, p: &Packed, part: &Part, lg2_count: u8) -> Vec<u8> {
    let checksum = part_checksum(entry, p, part);
    let mut file_flags = 0x02;
    if entry.directory {
        file_flags |= 0x01;
    }
    if let Checksum::Crc32(_) = checksum {
        file_flags |= 0x04;
    }

    let mut fields = Vec::new();
    vint(&mut fields, file_flags);
    vint(&mut fields, entry.content.len() as u64);
    let mode = entry
        .mode
        .unwrap_or(if entry.directory { 0o755 } else { 0o644 });
    vint(&mut fields, u64::from(mode));
    fields.extend_from_slice(&MTIME.to_le_bytes());
    if let Checksum::Crc32(crc) = checksum {
        fields.extend_from_slice(&crc.to_le_bytes());
    }
    let mut compression = u64::from(entry.method) << 7;
    if entry.solid {
        compression |= 0x40;
    }
    vint(&mut fields, compression);
    vint(&mut fields, 1);
    vint(&mut fields, entry.name.len() as u64);
    fields.extend_from_slice(entry.name.as_bytes());

    let mut extra = Vec::new();
    if let Some(material) = &p.material {
        let mut record = Vec::new();
        vint(&mut record, 0);
        vint(&mut record, if entry.mac { 0x03 } else { 0x01 });
        record.push(lg2_count);
        record.extend_from_slice(&SALT16);
        record.extend_from_slice(&IV16);
        record.extend_from_slice(&check_record(material));
        extra.extend(extra_record(1, &record));
    }
    if let Checksum::Blake2sp(digest) = checksum {
        let mut record = vec![0];
        record.extend_from_slice(&digest);
        extra.extend(extra_record(2, &record));
    }
    if let Some(target) = &entry.symlink {
        let mut record = Vec::new();
        vint(&mut record, 1);
        vint(&mut record, 0);
        vint(&mut record, target.len() as u64);
        record.extend_from_slice(target.as_bytes());
        extra.extend(extra_record(5, &record));
    }

    let mut flags = 0;
    if !part.first {
        flags |= HFL_SPLIT_BEFORE;
    }
    if !part.last {
        flags |= HFL_SPLIT_AFTER;
    }
    let data_size = if entry.directory {
        None
    } else {
        Some((part.end - part.start) as u64)
    };
    header50(tag, flags, &fields, &extra, data_size)
}

fn service_header50(name: &str, data: &[u8]) -> Vec<u8> {
    let mut fields = Vec::new();
    vint(&mut fields, 0x04);
    vint(&mut fields, data.len() as u64);
    vint(&mut fields, 0);
    fields.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    vint(&mut fields, 0);
    vint(&mut fields, 1);
    vint(&mut fields, name.len() as u64);
    fields.extend_from_slice(name.as_bytes());
    header50(3, 0, &fields, &[], Some(data.len() as u64))
}

fn main_header50(volume: usize, volumes: usize, opts: &Options, quick_open: Option<u64>) -> Vec<u8> {
    let mut arc_flags = 0;
    if volumes > 1 {
        arc_flags |= 0x01;
    }
    if volume > 0 {
        arc_flags |= 0x02;
    }
    if opts.solid {
        arc_flags |= 0x04;
    }
    let mut fields = Vec::new();
    vint(&mut fields, arc_flags);
    if volume > 0 {
        vint(&mut fields, volume as u64);
    }
    let mut extra = Vec::new();
    if let Some(offset) = quick_open {
        let mut record = Vec::new();
        vint(&mut record, 0x01);
        vint4(&mut record, offset);
        extra = extra_record(1, &record);
    }
    header50(1, 0, &fields, &extra, None)
}

fn quick_open_data(cached: &[(u64, Vec<u8>)], qo_position: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for (position, raw) in cached {
        let mut body = Vec::new();
        vint(&mut body, 0);
        vint(&mut body, qo_position - position);
        vint(&mut body, raw.len() as u64);
        body.extend_from_slice(raw);
        let mut sized = Vec::new();
        vint(&mut sized, body.len() as u64);
        sized.extend_from_slice(&body);
        out.extend_from_slice(&crc32fast::hash(&sized).to_le_bytes());
        out.extend_from_slice(&sized);
    }
    out
}

/// Build a RAR 5.0 archive, one buffer per volume.
pub fn rar5(entries: &[Entry], opts: &Options) -> Vec<Vec<u8>> {
    let packed = pack(entries, Generation::Rar50, opts.lg2_count);
    let layout = distribute(&packed, opts.volume_size);
    let header_key = opts.header_password.as_ref().map(|password| {
        KeyCache::new().derive_key(
            &Password::from(password.as_str()),
            Some(&HEADER_SALT16),
            Kdf::Rar50 {
                lg2_count: opts.lg2_count,
            },
        )
    });
    let quick_open = opts.quick_open && header_key.is_none();

    let mut out = Vec::new();
    for (index, parts) in layout.iter().enumerate() {
        // Headers after the main header, each with the data that follows it
        // and whether the quick open record copies it.
        let mut blocks: Vec<(Vec<u8>, Vec<u8>, bool)> = Vec::new();
        if index == 0 {
            if let Some(comment) = &opts.comment {
                blocks.push((service_header50("CMT", comment.as_bytes()), comment.as_bytes().to_vec(), true));
            }
        }
        for part in parts {
            let entry = &entries[part.entry];
            let p = &packed[part.entry];
            blocks.push((
                file_header50(2, entry, p, part, opts.lg2_count),
                p.data[part.start..part.end].to_vec(),
                !opts.quick_open_omits.contains(&entry.name),
            ));
        }

        let mut volume = MAGIC_50.to_vec();
        if let Some(material) = &header_key {
            let mut fields = Vec::new();
            vint(&mut fields, 0);
            vint(&mut fields, 0x01);
            fields.push(opts.lg2_count);
            fields.extend_from_slice(&HEADER_SALT16);
            fields.extend_from_slice(&check_record(material));
            volume.extend(header50(4, 0, &fields, &[], None));
        }
        let main_position = volume.len() as u64;
        let placeholder = main_header50(index, layout.len(), opts, quick_open.then_some(0));

        let tail = if quick_open {
            let mut position = main_position + placeholder.len() as u64;
            let mut cached = Vec::new();
            for (header, data, copied) in &blocks {
                if *copied {
                    cached.push((position, header.clone()));
                }
                position += (header.len() + data.len()) as u64;
            }
            let records = quick_open_data(&cached, position);
            let main = main_header50(index, layout.len(), opts, Some(position - main_position));
            assert_eq!(main.len(), placeholder.len());
            blocks.push((service_header50("QO", &records), records, false));
            main
        } else {
            placeholder
        };

        let mut end_fields = Vec::new();
        vint(&mut end_fields, u64::from(index + 1 < layout.len()));
        let end = header50(5, 0, &end_fields, &[], None);

        let mut headers = vec![(tail, Vec::new())];
        headers.extend(blocks.into_iter().map(|(header, data, _)| (header, data)));
        headers.push((end, Vec::new()));
        for (i, (header, data)) in headers.into_iter().enumerate() {
            match &header_key {
                Some(material) => {
                    let iv = [i as u8 ^ 0x5a; 16];
                    volume.extend_from_slice(&iv);
                    volume.extend(encrypt256(&header, material.key(), &iv));
                }
                None => volume.extend(header),
            }
            volume.extend(data);
        }
        out.push(volume);
    }
    out
}

// RAR 1.5

const LONG_BLOCK: u16 = 0x8000;

fn block15(tag: u8, flags: u16, fields: &[u8]) -> Vec<u8> {
    let size = 7 + fields.len();
    let mut out = vec![0, 0, tag];
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&(size as u16).to_le_bytes());
    out.extend_from_slice(fields);
    let crc = crc32fast::hash(&out[2..]) as u16;
    out[..2].copy_from_slice(&crc.to_le_bytes());
    out
}

fn main_header15(volume: usize, volumes: usize, opts: &Options) -> Vec<u8> {
    let mut flags = 0u16;
    if volumes > 1 {
        flags |= 0x0001;
        if !opts.old_numbering {
            flags |= 0x0010;
        }
        if volume == 0 {
            flags |= 0x0100;
        }
    }
    if opts.solid {
        flags |= 0x0008;
    }
    if opts.header_password.is_some() {
        flags |= 0x0080;
    }
    let comment = opts.comment.as_ref().filter(|_| volume == 0);
    let mut out = vec![0, 0, 0x73];
    if comment.is_some() {
        flags |= 0x0002;
    }
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&13u16.to_le_bytes());
    out.extend_from_slice(&[0; 6]);
    if let Some(text) = comment {
        let mut fields = Vec::new();
        fields.extend_from_slice(&(text.len() as u16).to_le_bytes());
        fields.push(15);
        fields.push(0x30);
        fields.extend_from_slice(&(crc32fast::hash(text.as_bytes()) as u16).to_le_bytes());
        fields.extend_from_slice(text.as_bytes());
        let block = block15(0x75, 0, &fields);
        let size = (13 + block.len()) as u16;
        out[5..7].copy_from_slice(&size.to_le_bytes());
        out.extend(block);
    }
    // Only the main header fields are covered when a comment is embedded.
    let crc = crc32fast::hash(&out[2..13]) as u16;
    out[..2].copy_from_slice(&crc.to_le_bytes());
    out
}

fn file_header15(entry: &Entry, p: &Packed, part: &Part) -> Vec<u8> {
    let mut flags = LONG_BLOCK;
    if !part.first {
        flags |= 0x0001;
    }
    if !part.last {
        flags |= 0x0002;
    }
    if p.material.is_some() {
        flags |= 0x0004 | 0x0400;
    }
    if entry.solid {
        flags |= 0x0010;
    }
    if entry.directory {
        flags |= 0x00e0;
    }
    let crc = match part_checksum(entry, p, part) {
        Checksum::Crc32(crc) => crc,
        _ => 0,
    };

    let mut fields = Vec::new();
    fields.extend_from_slice(&((part.end - part.start) as u32).to_le_bytes());
    fields.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
    fields.push(2);
    fields.extend_from_slice(&crc.to_le_bytes());
    fields.extend_from_slice(&DOS_TIME.to_le_bytes());
    fields.push(29);
    fields.push(0x30 + entry.method);
    fields.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
    let attributes: u32 = if entry.directory { 0x10 } else { 0x20 };
    fields.extend_from_slice(&attributes.to_le_bytes());
    fields.extend_from_slice(entry.name.as_bytes());
    if p.material.is_some() {
        fields.extend_from_slice(&SALT8);
    }
    block15(0x74, flags, &fields)
}

/// Build a RAR 1.5 (2.9 style) archive, one buffer per volume.
pub fn rar15(entries: &[Entry], opts: &Options) -> Vec<Vec<u8>> {
    let packed = pack(entries, Generation::Rar15, opts.lg2_count);
    let layout = distribute(&packed, opts.volume_size);
    let header_key = opts.header_password.as_ref().map(|password| {
        KeyCache::new().derive_key(
            &Password::from(password.as_str()),
            Some(&HEADER_SALT8),
            Kdf::Rar30,
        )
    });

    let mut out = Vec::new();
    for (index, parts) in layout.iter().enumerate() {
        let mut volume = MAGIC_15.to_vec();
        volume.extend(main_header15(index, layout.len(), opts));

        let mut blocks: Vec<(Vec<u8>, &[u8])> = Vec::new();
        for part in parts {
            let p = &packed[part.entry];
            blocks.push((
                file_header15(&entries[part.entry], p, part),
                &p.data[part.start..part.end],
            ));
        }
        let end_flags = u16::from(index + 1 < layout.len());
        blocks.push((block15(0x7b, end_flags, &[]), &[]));

        for (header, data) in blocks {
            match &header_key {
                Some(material) => {
                    volume.extend_from_slice(&HEADER_SALT8);
                    volume.extend(encrypt128(&header, material.key(), material.iv()));
                }
                None => volume.extend(header),
            }
            volume.extend_from_slice(data);
        }
        out.push(volume);
    }
    out
}

// RAR 1.4

/// Build a single volume RAR 1.4 archive of stored entries.
pub fn rar14(entries: &[Entry], solid: bool) -> Vec<u8> {
    let mut out = MAGIC_14.to_vec();
    out.extend_from_slice(&7u16.to_le_bytes());
    out.push(if solid { 0x08 } else { 0 });
    for entry in entries {
        let sum = match Checksum::Sum16(0).compute(&entry.content) {
            Checksum::Sum16(sum) => sum,
            _ => 0,
        };
        let head_size = 21 + entry.name.len();
        out.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        out.extend_from_slice(&sum.to_le_bytes());
        out.extend_from_slice(&(head_size as u16).to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.push(if entry.directory { 0x10 } else { 0x20 });
        out.push(0);
        out.push(2);
        out.push(entry.name.len() as u8);
        out.push(0);
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&entry.content);
    }
    out
}

// Volume sets

/// Names of `count` volumes starting at `first`.
pub fn volume_names(first: &str, count: usize, scheme: NumberingScheme) -> Vec<PathBuf> {
    let mut names = vec![PathBuf::from(first)];
    while names.len() < count {
        let next = next_volume_name(&names[names.len() - 1], scheme);
        names.push(next);
    }
    names
}

pub fn memory_volumes(first: &str, volumes: Vec<Vec<u8>>, scheme: NumberingScheme) -> MemoryVolumes {
    let mut source = MemoryVolumes::new();
    for (name, data) in volume_names(first, volumes.len(), scheme).into_iter().zip(volumes) {
        source.insert(name, data);
    }
    source
}

/// Open in-memory volumes named from `first` with the chain codecs installed.
pub fn open_memory(
    first: &str,
    volumes: Vec<Vec<u8>>,
    scheme: NumberingScheme,
    options: OpenOptions,
) -> ArchiveReader {
    options
        .source(Arc::new(memory_volumes(first, volumes, scheme)))
        .decoders(Arc::new(ChainCodecs))
        .open(first)
        .unwrap()
}
