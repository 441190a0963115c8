//! ## Image wrapper module
//!
//! This is a container for the per-format wrapper adapters.  A wrapper
//! recognizes its container from a header sniff, exposes the embedded raw
//! disk bytes as a child descriptor, and rebuilds the container when the
//! image is flushed.
//!
//! Every format module exports `test(gfd, len) -> Verdict`.  The verdict
//! distinguishes "not mine" (the probe cascade moves on) from positive
//! identification with bad contents (the cascade stops so a damaged image
//! is never misfiled as some other format).

pub mod unadorned;
pub mod dot2mg;
pub mod dc42;
pub mod nufx;
pub mod ddd;
pub mod trackstar;
pub mod fdi;
pub mod sim2e;

use bit_vec::BitVec;
use crate::gfd::FdRef;
use crate::skew::SectorOrder;
use crate::image::PhysicalFormat;
use crate::DYNERR;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum FileFormat {
    Unadorned,
    Dot2mg,
    DiskCopy42,
    NuFx,
    Ddd,
    TrackStar,
    Fdi,
    Sim2eHdv
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unadorned => write!(f,"Unadorned raw data"),
            Self::Dot2mg => write!(f,"2MG"),
            Self::DiskCopy42 => write!(f,"DiskCopy 4.2"),
            Self::NuFx => write!(f,"NuFX (ShrinkIt)"),
            Self::Ddd => write!(f,"DDD"),
            Self::TrackStar => write!(f,"TrackStar image"),
            Self::Fdi => write!(f,"FDI image"),
            Self::Sim2eHdv => write!(f,"Sim //e HDV")
        }
    }
}

/// Outcome of a header sniff.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum Verdict {
    Mine,
    NotMine,
    /// positively identified, but the contents fail an integrity check;
    /// the probe cascade must stop here
    BadChecksum,
    /// it is a NuFX archive, but of files rather than a disk image
    FileArchive
}

/// What a wrapper learned while materializing the raw disk bytes.
pub struct PrepResult {
    pub data_len: u64,
    pub physical: PhysicalFormat,
    /// set when the container records the ordering; otherwise the fs probe
    /// has to work it out
    pub order: Option<SectorOrder>,
    pub dos_volume: Option<u8>,
    /// nibble formats with a track structure report their track count;
    /// sector formats leave this to geometry analysis
    pub num_tracks: Option<usize>,
    pub bad_blocks: Option<BitVec>,
    pub data_fd: FdRef
}

pub trait ImageWrapper {
    fn file_format(&self) -> FileFormat;
    /// After a successful `test`, expose the raw disk bytes.
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR>;
    /// Write a header stub around blank media and yield the descriptor the
    /// caller will format into.  Returns (wrapped length, data fd).
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR>;
    /// Push data changes back into the container, rewriting checksums and
    /// lengths.  Returns the new wrapped length.
    fn flush(&mut self,wrapper: &FdRef,data: &FdRef,data_len: u64) -> Result<u64,DYNERR>;
    /// False when flushing means recompression; the fast-flush path skips
    /// such wrappers.
    fn has_fast_flush(&self) -> bool;
    /// Non-fatal damage discovered during prep; the image goes read-only.
    fn is_damaged(&self) -> bool {
        false
    }
    /// Writing through this wrapper is not implemented.
    fn forces_read_only(&self) -> bool {
        false
    }
    /// Nibble length of the given track; only nibble-capable wrappers
    /// carry an answer.
    fn nibble_track_len(&self,_track: usize) -> usize {
        debug_assert!(false,"nibble geometry requested from sector wrapper");
        0
    }
    /// Offset of the given track's nibbles within the data stream.
    fn nibble_track_offset(&self,_track: usize) -> u64 {
        debug_assert!(false,"nibble geometry requested from sector wrapper");
        0
    }
    /// Name stored inside containers that carry one (DC42, NuFX).
    fn set_storage_name(&mut self,_name: &str) {}
}
