//! Wildcard masks for selecting entries, with the matching rules of the
//! classic RAR command line.

/// How much of a candidate path a mask is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    /// The whole path must equal the mask, wildcards only in the name part.
    Exact,
    /// Only the name parts are compared; directories are ignored.
    Names,
    /// The mask matches the path itself or anything below it.
    #[default]
    SubPath,
    /// The mask must be a directory prefix of the path.
    SubPathOnly,
    /// The mask is matched against the whole path, `*` crossing separators.
    AllWild,
}

/// Match `candidate` against `pattern`, ignoring case.
pub fn matches(pattern: &str, candidate: &str, mode: MatchMode) -> bool {
    matches_with(pattern, candidate, mode, false)
}

pub fn matches_with(pattern: &str, candidate: &str, mode: MatchMode, case_sensitive: bool) -> bool {
    let wild: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = candidate.chars().collect();
    let cs = case_sensitive;

    if mode != MatchMode::Names {
        if !matches!(mode, MatchMode::Exact | MatchMode::AllWild) && prefix_eq(&wild, &name, wild.len(), cs) {
            // "dir" matches "dir" and everything under it.
            if matches!(name.get(wild.len()), None | Some('/') | Some('\\')) {
                return true;
            }
        }
        if mode == MatchMode::SubPathOnly {
            return false;
        }

        let (wild_dir, name_dir) = (dir_part(&wild), dir_part(&name));
        if mode == MatchMode::Exact && !eq_chars(wild_dir, name_dir, cs) {
            return false;
        }
        if mode == MatchMode::AllWild {
            return wild_match(&wild, &name, cs);
        }
        if mode == MatchMode::SubPath {
            if has_wildcards(wild_dir) {
                return wild_match(&wild, &name, cs);
            }
            if !wild_dir.is_empty() && !prefix_eq(wild_dir, name_dir, wild_dir.len(), cs) {
                return false;
            }
        }
    }

    let (wild_name, name_name) = (name_part(&wild), name_part(&name));
    if mode == MatchMode::Exact {
        return eq_chars(wild_name, name_name, cs);
    }
    wild_match(wild_name, name_name, cs)
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

fn dir_part(path: &[char]) -> &[char] {
    match path.iter().rposition(|c| is_separator(*c)) {
        Some(sep) => &path[..sep],
        None => &[],
    }
}

fn name_part(path: &[char]) -> &[char] {
    match path.iter().rposition(|c| is_separator(*c)) {
        Some(sep) => &path[sep + 1..],
        None => path,
    }
}

fn has_wildcards(path: &[char]) -> bool {
    path.iter().any(|c| *c == '*' || *c == '?')
}

fn fold(c: char, case_sensitive: bool) -> char {
    if case_sensitive {
        c
    } else {
        c.to_uppercase().next().unwrap_or(c)
    }
}

fn eq_chars(a: &[char], b: &[char], cs: bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| fold(*x, cs) == fold(*y, cs))
}

fn prefix_eq(a: &[char], b: &[char], n: usize, cs: bool) -> bool {
    a.len() >= n && b.len() >= n && eq_chars(&a[..n], &b[..n], cs)
}

/// `?` matches one character, `*` any run of characters, shortest first.
///
/// A `.` in the mask that finds the end of the name, a separator or another
/// dot is skipped, so `name.` also matches `name`; likewise a name that only
/// has a trailing dot left matches the end of the mask.
fn wild_match(pattern: &[char], string: &[char], cs: bool) -> bool {
    let mut p = 0;
    let mut s = 0;
    loop {
        let sc = string.get(s).map(|c| fold(*c, cs));
        let pc = pattern.get(p).map(|c| fold(*c, cs));
        p += 1;
        match pc {
            None => return sc.is_none() || (sc == Some('.') && s + 1 == string.len()),
            Some('?') => {
                if sc.is_none() {
                    return false;
                }
            }
            Some('*') => {
                let rest = &pattern[p..];
                if rest.is_empty() {
                    return true;
                }
                let mut from = s;
                if rest[0] == '.' {
                    if rest.len() == 2 && rest[1] == '*' {
                        return true;
                    }
                    let dot = string[s..].iter().position(|c| *c == '.').map(|i| s + i);
                    if rest.len() == 1 {
                        return dot.map_or(true, |d| d + 1 == string.len());
                    }
                    if let Some(dot) = dot {
                        from = dot;
                        if !has_wildcards(rest) && !string[dot + 1..].contains(&'.') {
                            return eq_chars(&rest[1..], &string[dot + 1..], cs);
                        }
                    }
                }
                return (from..string.len()).any(|i| wild_match(rest, &string[i..], cs));
            }
            Some(pc) => {
                if Some(pc) != sc {
                    if pc == '.' && matches!(sc, None | Some('.') | Some('/') | Some('\\')) {
                        return wild_match(&pattern[p..], &string[s..], cs);
                    }
                    return false;
                }
            }
        }
        s += 1;
    }
}

/// Include and exclude masks applied to entry names.
///
/// With no include masks every name is included.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    includes: Vec<String>,
    excludes: Vec<String>,
    mode: MatchMode,
    case_sensitive: bool,
}

impl PathMatcher {
    pub fn new(mode: MatchMode) -> PathMatcher {
        PathMatcher {
            mode,
            ..PathMatcher::default()
        }
    }

    pub fn include(mut self, mask: impl Into<String>) -> PathMatcher {
        self.includes.push(mask.into());
        self
    }

    pub fn exclude(mut self, mask: impl Into<String>) -> PathMatcher {
        self.excludes.push(mask.into());
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> PathMatcher {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        let hit = |mask: &String| matches_with(mask, candidate, self.mode, self.case_sensitive);
        (self.includes.is_empty() || self.includes.iter().any(hit)) && !self.excludes.iter().any(hit)
    }
}
