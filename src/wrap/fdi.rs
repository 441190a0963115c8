//! ## Support for FDI (Formatted Disk Image) files
//!
//! FDI is a general floppy capture format with a text signature and a
//! table of per-track descriptors; Apple 5.25 inch captures appear as GCR
//! tracks of varying length.  Reading is supported; writing FDI is not,
//! so the image is forced read-only during prep.

use log::{debug,info,error};
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

pub const SIGNATURE: &[u8;27] = b"Formatted Disk Image file\r\n";
const HEADER_LEN: usize = 512;
/// descriptor table begins after signature, creator, comment, and the
/// fixed geometry fields
const DESCR_OFF: usize = 152;
const MAX_TRACKS: usize = 180;

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    if len < HEADER_LEN as u64 {
        return Verdict::NotMine;
    }
    let mut sig: [u8;27] = [0;27];
    if gfd::read_at(gfd,0,&mut sig).is_err() {
        return Verdict::NotMine;
    }
    match sig==*SIGNATURE {
        true => Verdict::Mine,
        false => {
            debug!("no FDI signature (leading bytes {})",hex::encode(&sig[0..8]));
            Verdict::NotMine
        }
    }
}

pub struct WrapperFdi {
    /// (offset,length) per track, resolved from the descriptor table
    tracks: Vec<(u64,usize)>
}

impl WrapperFdi {
    pub fn new() -> Self {
        Self { tracks: Vec::new() }
    }
}

impl ImageWrapper for WrapperFdi {
    fn file_format(&self) -> FileFormat {
        FileFormat::Fdi
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,_read_only: bool) -> Result<PrepResult,DYNERR> {
        let mut header = [0u8;HEADER_LEN];
        gfd::read_at(wrapper,0,&mut header)?;
        if header[0..27] != *SIGNATURE {
            return Err(Box::new(Error::BadFileFormat));
        }
        // geometry fields are big endian
        let version = u16::from_be_bytes([header[140],header[141]]);
        let last_track = u16::from_be_bytes([header[142],header[143]]) as usize;
        let last_head = header[144];
        debug!("FDI version {:04x}, last track {}, last head {}",version,last_track,last_head);
        if last_head != 0 {
            info!("two-sided FDI, only head 0 is mapped");
        }
        let num_tracks = last_track + 1;
        if num_tracks > MAX_TRACKS {
            return Err(Box::new(Error::BadFileFormat));
        }
        if DESCR_OFF + 2*num_tracks > HEADER_LEN {
            return Err(Box::new(Error::BadFileFormat));
        }
        self.tracks = Vec::new();
        let mut offset = HEADER_LEN as u64;
        for track in 0..num_tracks {
            let descr_type = header[DESCR_OFF + 2*track];
            let pages = header[DESCR_OFF + 2*track + 1] as usize;
            let nib_len = match descr_type {
                0 => 0,
                _ => pages*256
            };
            if offset + nib_len as u64 > wrapped_len {
                error!("FDI track {} runs past EOF",track);
                return Err(Box::new(Error::BadFileFormat));
            }
            self.tracks.push((offset,nib_len));
            offset += nib_len as u64;
        }
        Ok(PrepResult {
            data_len: wrapped_len,
            physical: PhysicalFormat::NibVar,
            order: Some(SectorOrder::Physical),
            dos_volume: None,
            num_tracks: Some(num_tracks),
            bad_blocks: None,
            // window the whole file; track offsets already include the header
            data_fd: gfd::new_ref(SubFd::new(wrapper,0,wrapped_len,true))
        })
    }
    fn create(&mut self,_data_len: u64,_physical: PhysicalFormat,_order: SectorOrder,_dos_volume: u8,_wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        error!("creating FDI images is not supported");
        Err(Box::new(Error::UnsupportedFileFmt))
    }
    fn flush(&mut self,_wrapper: &FdRef,_data: &FdRef,_data_len: u64) -> Result<u64,DYNERR> {
        // never reached; prep forces the image read-only
        Err(Box::new(Error::UnsupportedFileFmt))
    }
    fn has_fast_flush(&self) -> bool {
        false
    }
    fn forces_read_only(&self) -> bool {
        true
    }
    fn nibble_track_len(&self,track: usize) -> usize {
        match self.tracks.get(track) {
            Some((_o,l)) => *l,
            None => 0
        }
    }
    fn nibble_track_offset(&self,track: usize) -> u64 {
        match self.tracks.get(track) {
            Some((o,_l)) => *o,
            None => 0
        }
    }
}
