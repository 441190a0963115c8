//! ## Outermost compression wrappers
//!
//! Web archives tend to gzip or zip anything in sight, so a disk image
//! often arrives with one more layer around the real container.  These
//! wrappers strip that layer on open and rebuild it on flush.  Loading
//! always decompresses the whole stream into a memory buffer; neither
//! format can be patched in place, which is why both report a slow flush.

pub mod gzip;
pub mod zip;

use crate::gfd::FdRef;
use crate::{DYNERR,STDRESULT};

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum OuterFormat {
    None,
    Gzip,
    Zip
}

impl std::fmt::Display for OuterFormat {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f,"(none)"),
            Self::Gzip => write!(f,"gzip"),
            Self::Zip => write!(f,"Zip archive")
        }
    }
}

pub trait OuterWrapper {
    fn kind(&self) -> OuterFormat;
    /// Decompress the whole stream into a new memory descriptor.
    /// A checksum failure does not fail the load; it sets the damaged flag
    /// and the enclosing image decides what to do about it.
    fn load(&mut self,src: &FdRef,outer_len: u64,read_only: bool) -> Result<(FdRef,u64),DYNERR>;
    /// Recompress `inner` over the top of `dst`.
    fn save(&mut self,dst: &FdRef,inner: &FdRef,inner_len: u64) -> STDRESULT;
    /// Set during `load` when the compressed stream was readable but
    /// failed its integrity check.
    fn is_damaged(&self) -> bool;
    /// Extension hint for the inner format probe, when the wrapper stores
    /// an inner filename (zip does, gzip usually does not).
    fn get_extension(&self) -> Option<String>;
    /// The stem of the outer filename, used to name the inner entry when
    /// the wrapper did not record one.
    fn set_outer_name(&mut self,stem: &str);
    fn has_fast_flush(&self) -> bool {
        false
    }
}
