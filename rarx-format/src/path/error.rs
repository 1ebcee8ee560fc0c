use thiserror::Error;

/// Why an entry name cannot become an output path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryPathError {
    #[error("component '{component}' contains the character {character:?}")]
    ForbiddenCharacter { component: String, character: char },

    #[error("no component is left once '.', '..' and drive letters are dropped")]
    NothingLeft,
}
