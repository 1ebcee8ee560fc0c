use std::path::PathBuf;

use miette::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("Cannot open archive `{}`", .path.display())]
    #[diagnostic(help("Is this a RAR archive, or the first volume of a set?"))]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: rarx_format::OpenError,
    },

    #[error("Archive `{}` is encrypted", .path.display())]
    #[diagnostic(help("Pass -p to be asked for the password, or set RARX_PASSWORD"))]
    PasswordRequired { path: PathBuf },

    #[error("Wrong password for `{}`", .path.display())]
    #[diagnostic(help("Passwords are case sensitive"))]
    WrongPassword { path: PathBuf },

    #[error("Cannot read password")]
    ReadPassword {
        #[source]
        source: dialoguer::Error,
    },

    #[error("Cannot read archive headers")]
    #[diagnostic(help("The archive may be damaged or a volume may be missing"))]
    ReadHeaders {
        #[source]
        source: rarx_format::DecodeError,
    },

    #[error("Cannot create output directory `{}`", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot determine the current directory")]
    CurrentDir {
        #[source]
        source: std::io::Error,
    },
}
