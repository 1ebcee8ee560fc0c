//! Entry names as stored in archives, and the output paths they map to.

use std::fmt;
use std::path::{Path, PathBuf};

mod error;
mod matcher;

pub use self::error::EntryPathError;
pub use self::matcher::{matches, matches_with, MatchMode, PathMatcher};

/// The separator used in entry names once decoded.
pub const ENTRY_SEP: &str = "/";

/// A sanitized entry name: normalized components that stay below whatever
/// directory the entry is extracted into.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntryPath(Vec<String>);

/// Split an entry name into safe components.
///
/// Both `/` and `\` separate components. Empty, `.` and drive components are
/// dropped, and `..` removes the component before it, so the result can never
/// climb out of the extraction root. Control and separator characters are
/// rejected.
pub fn sanitize(name: &str) -> Result<Vec<String>, EntryPathError> {
    use unic_normal::StrNormalForm;
    use unic_ucd::GeneralCategory;

    let mut out: Vec<String> = vec![];

    for (i, component) in name.split(['/', '\\']).enumerate() {
        let component = component.trim();
        match component {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            drive if i == 0 && is_drive(drive) => {}
            normal => {
                let bad = normal.chars().find(|&c| {
                    let cat = GeneralCategory::of(c);
                    cat == GeneralCategory::Control || (cat.is_separator() && c != ' ')
                });
                if let Some(character) = bad {
                    return Err(EntryPathError::ForbiddenCharacter {
                        component: normal.escape_debug().to_string(),
                        character,
                    });
                }
                out.push(normal.nfc().collect::<String>());
            }
        }
    }

    Ok(out)
}

fn is_drive(component: &str) -> bool {
    let bytes = component.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl EntryPath {
    pub fn new(name: &str) -> std::result::Result<EntryPath, EntryPathError> {
        let out = sanitize(name)?;

        if out.is_empty() {
            return Err(EntryPathError::NothingLeft);
        }

        Ok(EntryPath(out))
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.0.iter().collect()
    }

    /// Where the entry lands when extracted into `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.to_path_buf())
    }

    pub fn parent(&self) -> Option<EntryPath> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(EntryPath(self.0[..n - 1].to_vec())),
        }
    }

    pub fn filename(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.0.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(ENTRY_SEP))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitisation() {
        let path = EntryPath::new("docs/./readme.txt").unwrap();
        assert_eq!(path.to_string(), "docs/readme.txt");
        assert_eq!(path.filename(), "readme.txt");
        assert_eq!(path.depth(), 1);
        assert_eq!(path.parent().unwrap().to_string(), "docs");
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(matches!(
            EntryPath::new("a/b\0c"),
            Err(EntryPathError::ForbiddenCharacter { character: '\0', .. })
        ));
        assert!(matches!(
            EntryPath::new("a\u{1b}[31m"),
            Err(EntryPathError::ForbiddenCharacter { character: '\u{1b}', .. })
        ));
    }

    #[test]
    fn nothing_left_is_an_error() {
        assert_eq!(EntryPath::new(""), Err(EntryPathError::NothingLeft));
        assert_eq!(EntryPath::new("/"), Err(EntryPathError::NothingLeft));
        assert_eq!(EntryPath::new("../.."), Err(EntryPathError::NothingLeft));
    }

    #[test]
    fn names_cannot_escape_the_root() {
        let root = Path::new("/tmp/out");
        for name in ["../../etc/passwd", "/etc/passwd", "C:\\etc\\passwd", "a/../../etc/passwd"] {
            let path = EntryPath::new(name).unwrap().under(root);
            assert!(path.starts_with(root), "{} -> {}", name, path.display());
            assert!(path.ends_with("etc/passwd"));
        }
    }

    #[test]
    fn backslashes_separate_components() {
        let path = EntryPath::new("dir\\sub\\file.txt").unwrap();
        assert_eq!(path.iter().collect::<Vec<_>>(), vec!["dir", "sub", "file.txt"]);
    }

    #[test]
    fn sanitisation_bidi() {
        let path = EntryPath::new("this is now العَرَبِيَّة.txt").unwrap();
        assert_eq!(path.to_string(), "this is now العَرَبِيَّة.txt");
    }

    #[test]
    fn names_are_nfc_normalized() {
        let path = EntryPath::new("cafe\u{301}").unwrap();
        assert_eq!(path.to_string(), "caf\u{e9}");
    }
}
