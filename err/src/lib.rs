//! Error kinds of the SWORD file-system engine.
//!
//! Every failure a caller can observe maps onto one of the numeric
//! error codes the S-OS monitor defines; [`Error::code`] projects the
//! byte that is reported at the emulator boundary. `Busy` is the one
//! administrative exception: mount-table collisions have no monitor
//! equivalent and project to the `RESERVED` byte.

/// S-OS error code bytes as reported to the monitor.
pub const SOS_ERROR_SUCCESS: u8 = 0x0;
pub const SOS_ERROR_IO: u8 = 0x1;
pub const SOS_ERROR_OFFLINE: u8 = 0x2;
pub const SOS_ERROR_BADF: u8 = 0x3;
pub const SOS_ERROR_RDONLY: u8 = 0x4;
pub const SOS_ERROR_BADR: u8 = 0x5;
pub const SOS_ERROR_FMODE: u8 = 0x6;
pub const SOS_ERROR_BADFAT: u8 = 0x7;
pub const SOS_ERROR_NOENT: u8 = 0x8;
pub const SOS_ERROR_NOSPC: u8 = 0x9;
pub const SOS_ERROR_EXIST: u8 = 0xa;
pub const SOS_ERROR_RESERVED: u8 = 0xb;
pub const SOS_ERROR_NOTOPEN: u8 = 0xc;
pub const SOS_ERROR_SYNTAX: u8 = 0xd;
pub const SOS_ERROR_INVAL: u8 = 0xe;

#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Device I/O error")]
    Io,
    #[error("Device offline")]
    Offline,
    #[error("Bad file descriptor")]
    BadFile,
    #[error("Write protected")]
    ReadOnly,
    #[error("Bad record")]
    BadRecord,
    #[error("Bad file mode")]
    FileMode,
    #[error("Bad allocation table")]
    BadFat,
    #[error("File not found")]
    NotFound,
    #[error("Device full")]
    DeviceFull,
    #[error("File already exists")]
    Exist,
    #[error("Reserved feature")]
    Reserved,
    #[error("File not open")]
    NotOpen,
    #[error("Syntax error")]
    Syntax,
    #[error("Bad data")]
    Invalid,
    #[error("Device busy")]
    Busy,
}

impl Error {
    /// The error code byte reported at the S-OS boundary.
    pub fn code(self) -> u8 {
        match self {
            Error::Io => SOS_ERROR_IO,
            Error::Offline => SOS_ERROR_OFFLINE,
            Error::BadFile => SOS_ERROR_BADF,
            Error::ReadOnly => SOS_ERROR_RDONLY,
            Error::BadRecord => SOS_ERROR_BADR,
            Error::FileMode => SOS_ERROR_FMODE,
            Error::BadFat => SOS_ERROR_BADFAT,
            Error::NotFound => SOS_ERROR_NOENT,
            Error::DeviceFull => SOS_ERROR_NOSPC,
            Error::Exist => SOS_ERROR_EXIST,
            Error::Reserved => SOS_ERROR_RESERVED,
            Error::NotOpen => SOS_ERROR_NOTOPEN,
            Error::Syntax => SOS_ERROR_SYNTAX,
            Error::Invalid => SOS_ERROR_INVAL,
            // The monitor has no mount table; a busy device surfaces
            // as a reserved feature.
            Error::Busy => SOS_ERROR_RESERVED,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Projects a result onto the byte code the trap layer hands back to
/// the Z80 side: `0` on success, the error code otherwise.
pub fn code_of<T>(result: &Result<T>) -> u8 {
    match result {
        Ok(_) => SOS_ERROR_SUCCESS,
        Err(error) => error.code(),
    }
}
