//! ## Unadorned images
//!
//! Sector dumps (DO, PO, D13, HDV, IMG) and raw nibble dumps (NIB) with no
//! header at all.  The only signal is the file length, so these are tried
//! last in the probe cascade, and the sector order has to come from the
//! filename extension or the file system probe.

use log::{debug,info};
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,SECTOR_SIZE,BLOCK_SIZE};
use crate::nibble::{TRACK_LEN_6656,TRACK_LEN_6384};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

/// 35 tracks of 13 sectors
pub const D13_LEN: u64 = 116480;
/// largest unadorned image we accept (8 GB)
const MAX_LEN: u64 = 0x2_0000_0000;
const MIN_LEN: u64 = 4096;

pub fn test_sector(_gfd: &FdRef,len: u64) -> Verdict {
    if len < MIN_LEN || len > MAX_LEN {
        return Verdict::NotMine;
    }
    if len==D13_LEN {
        return Verdict::Mine;
    }
    if len % (16*SECTOR_SIZE as u64)==0 || len % BLOCK_SIZE as u64==0 {
        return Verdict::Mine;
    }
    debug!("length {} fits no sector geometry",len);
    Verdict::NotMine
}

pub fn test_nibble(_gfd: &FdRef,len: u64) -> Verdict {
    if len==35*TRACK_LEN_6656 as u64 || len==35*TRACK_LEN_6384 as u64 {
        return Verdict::Mine;
    }
    Verdict::NotMine
}

/// Raw sector data; the wrapper is a pass-through window.
pub struct UnadornedSector {}

impl UnadornedSector {
    pub fn new() -> Self {
        Self {}
    }
}

impl ImageWrapper for UnadornedSector {
    fn file_format(&self) -> FileFormat {
        FileFormat::Unadorned
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        if test_sector(wrapper,wrapped_len)!=Verdict::Mine {
            return Err(Box::new(Error::OddLength));
        }
        Ok(PrepResult {
            data_len: wrapped_len,
            physical: PhysicalFormat::Sectors,
            order: None,
            dos_volume: None,
            num_tracks: None,
            bad_blocks: None,
            data_fd: gfd::new_ref(SubFd::new(wrapper,0,wrapped_len,read_only))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,_order: SectorOrder,_dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::Sectors {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        Ok((data_len,gfd::new_ref(SubFd::new(wrapper,0,data_len,false))))
    }
    fn flush(&mut self,_wrapper: &FdRef,_data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        // data already lives in the wrapper stream
        Ok(data_len)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
}

/// Raw nibble tracks at a fixed length per track.
pub struct UnadornedNibble {
    trk_len: usize
}

impl UnadornedNibble {
    pub fn new(physical: PhysicalFormat) -> Self {
        let trk_len = match physical {
            PhysicalFormat::Nib6384 => TRACK_LEN_6384,
            _ => TRACK_LEN_6656
        };
        Self { trk_len }
    }
}

impl ImageWrapper for UnadornedNibble {
    fn file_format(&self) -> FileFormat {
        FileFormat::Unadorned
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        let physical = match wrapped_len as usize {
            l if l==35*TRACK_LEN_6656 => PhysicalFormat::Nib6656,
            l if l==35*TRACK_LEN_6384 => PhysicalFormat::Nib6384,
            l => {
                info!("length {} fits no nibble geometry",l);
                return Err(Box::new(Error::OddLength));
            }
        };
        self.trk_len = match physical {
            PhysicalFormat::Nib6384 => TRACK_LEN_6384,
            _ => TRACK_LEN_6656
        };
        Ok(PrepResult {
            data_len: wrapped_len,
            physical,
            order: Some(SectorOrder::Physical),
            dos_volume: None,
            num_tracks: Some(crate::TRACK_COUNT_525),
            bad_blocks: None,
            data_fd: gfd::new_ref(SubFd::new(wrapper,0,wrapped_len,read_only))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,_dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical==PhysicalFormat::Sectors || physical==PhysicalFormat::NibVar || order != SectorOrder::Physical {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        self.trk_len = match physical {
            PhysicalFormat::Nib6384 => TRACK_LEN_6384,
            _ => TRACK_LEN_6656
        };
        Ok((data_len,gfd::new_ref(SubFd::new(wrapper,0,data_len,false))))
    }
    fn flush(&mut self,_wrapper: &FdRef,_data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        Ok(data_len)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
    fn nibble_track_len(&self,_track: usize) -> usize {
        self.trk_len
    }
    fn nibble_track_offset(&self,track: usize) -> u64 {
        (track * self.trk_len) as u64
    }
}
