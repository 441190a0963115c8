//! # `a2img` main library
//!
//! This library reads, writes, and creates Apple II-era disk images.  It is
//! concerned with everything *below* the file system: container wrappers,
//! sector ordering, and raw nibble tracks.  File system interpretation is
//! left to a client layer, which plugs in through the tester and formatter
//! hooks in `fsprobe`.
//!
//! ## Architecture
//!
//! A disk image is presented as a stack of up to three layers:
//! * an optional outermost compression wrapper (gzip or zip), see `outer`
//! * a file wrapper that knows the container format (2MG, DiskCopy 4.2,
//!   ShrinkIt, DDD, TrackStar, FDI, Sim //e HDV, or nothing at all), see `wrap`
//! * the raw disk bytes, either decoded sectors or nibble tracks
//!
//! Each layer is addressed through a `gfd::GenericFd` byte stream.  The
//! `image::DiskImg` facade assembles the stack, runs format detection, and
//! exposes block, track/sector, and nibble I/O with sector-order translation
//! from `skew`.  Writes mark the image dirty and are pushed back down the
//! stack (including recompression) when the image is flushed or closed.
//!
//! ## Sector Orders
//!
//! The same 16 sectors can be laid out in a file in DOS, ProDOS, CP/M, or
//! physical order.  The image order and the file system order are tracked
//! separately; every sector access is translated through the permutation
//! tables in `skew`.  Getting this wrong scrambles data silently, which is
//! why the probe machinery goes to some trouble to pin the order down.

pub mod gfd;
pub mod skew;
pub mod nibble;
pub mod outer;
pub mod wrap;
pub mod fsprobe;
pub mod image;

use log::warn;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// 256-byte sector, the DOS/Pascal addressing unit
pub const SECTOR_SIZE: usize = 256;
/// 512-byte block, the ProDOS/HFS addressing unit
pub const BLOCK_SIZE: usize = 512;
/// tracks on a standard 5.25 inch disk
pub const TRACK_COUNT_525: usize = 35;

const KNOWN_FILE_EXTENSIONS: &str = "2mg,2img,shk,sdk,bxy,hdv,dsk,dc,dc6,ddd,app,fdi,img,nib,raw,do,po,d13,gz,zip";

/// Enumerates everything that can go wrong below the file system.
/// The `Display` trait yields the short user-facing message.
#[derive(thiserror::Error,Debug,PartialEq,Eq,Clone,Copy)]
pub enum Error {
    #[error("an image is already open")]
    AlreadyOpen,
    #[error("access denied")]
    AccessDenied,
    #[error("write protected")]
    WriteProtected,
    #[error("file not found")]
    FileNotFound,
    #[error("file already exists")]
    FileExists,
    #[error("end of file reached")]
    Eof,
    #[error("tried to read past end of file")]
    DataUnderrun,
    #[error("tried to write past end of file")]
    DataOverrun,
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
    #[error("image size is wrong")]
    OddLength,
    #[error("not a recognized disk image format")]
    UnrecognizedFileFmt,
    #[error("image file contents aren't in expected format")]
    BadFileFormat,
    #[error("file format not supported")]
    UnsupportedFileFmt,
    #[error("physical format not supported")]
    UnsupportedPhysicalFmt,
    #[error("filesystem type not supported")]
    UnsupportedFSFmt,
    #[error("bad sector ordering")]
    BadOrdering,
    #[error("specified filesystem not found")]
    FilesystemNotFound,
    #[error("the method of access used isn't supported for this image")]
    UnsupportedAccess,
    #[error("invalid track number")]
    InvalidTrack,
    #[error("invalid sector number")]
    InvalidSector,
    #[error("invalid block number")]
    InvalidBlock,
    #[error("invalid index number")]
    InvalidIndex,
    #[error("the filesystem on this image appears damaged")]
    BadDiskImage,
    #[error("bad partition")]
    BadPartition,
    #[error("this looks like a file archive, not a disk archive")]
    FileArchive,
    #[error("compression method not supported")]
    UnsupportedCompression,
    #[error("checksum doesn't match, data may be corrupted")]
    BadChecksum,
    #[error("the compressed data is corrupted")]
    BadCompressedData,
    #[error("archive may be damaged")]
    BadArchiveStruct,
    #[error("couldn't read sectors from this image")]
    BadNibbleSectors,
    #[error("sector not readable")]
    SectorUnreadable,
    #[error("found invalid nibble image disk byte")]
    InvalidDiskByte,
    #[error("couldn't convert raw data to nibble data")]
    BadRawData,
    #[error("invalid disk image create request")]
    InvalidCreateReq,
    #[error("size is larger than we can handle")]
    TooBig,
    #[error("cancelled by user")]
    Cancelled,
    #[error("memory allocation failure")]
    Malloc,
    #[error("invalid argument")]
    InvalidArg,
    #[error("internal error")]
    Internal
}

/// Look at a `DYNERR` and pull out the library error kind, if that is
/// what it holds.  Host I/O errors and such return `None`.
pub fn error_kind(err: &DYNERR) -> Option<Error> {
    err.downcast_ref::<Error>().copied()
}

/// Open a disk image file, probing the outer wrapper, file format, physical
/// format, and file system.  The filename extension is used as a detection
/// hint but the contents always have the final word.
pub fn open_image_from_file(img_path: &str,read_only: bool) -> Result<image::DiskImg,DYNERR> {
    let mut img = image::DiskImg::new();
    img.open_file(img_path,read_only)?;
    Ok(img)
}

/// Same as `open_image_from_file`, but the image is already in memory.
/// There is no filename, so detection runs on content alone.
pub fn open_image_from_buffer(buf: Vec<u8>,read_only: bool) -> Result<image::DiskImg,DYNERR> {
    let mut img = image::DiskImg::new();
    img.open_buffer(buf,read_only)?;
    Ok(img)
}

/// Extract the lowercased extension used for format hints.
/// Unknown extensions are treated the same as no extension.
pub(crate) fn extension_hint(path: &str) -> String {
    let ext = match path.rsplit_once('.') {
        Some((_stem,ext)) if !ext.contains('/') => ext.to_lowercase(),
        _ => String::new()
    };
    if !ext.is_empty() && !KNOWN_FILE_EXTENSIONS.split(',').any(|e| e==ext) && ext!="cp-win-vol" {
        warn!("extension '{}' is not known, probing all formats",ext);
        return String::new();
    }
    ext
}

#[test]
fn test_extension_hint() {
    assert_eq!(extension_hint("disks/games.dsk"),"dsk");
    assert_eq!(extension_hint("DISK.PO"),"po");
    assert_eq!(extension_hint("archive.shk"),"shk");
    assert_eq!(extension_hint("noext"),"");
    assert_eq!(extension_hint("weird.xyz"),"");
    assert_eq!(extension_hint("dotted.name.2mg"),"2mg");
}
