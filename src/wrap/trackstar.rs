//! ## Support for TrackStar images
//!
//! The TrackStar Plus card captured 40 tracks of raw nibbles.  Each track
//! gets a fixed 6384-byte region in the file; the first two bytes of a
//! region give the number of nibbles actually captured, which varies from
//! track to track.  Unused high tracks have a zero length.

use log::{debug,error};
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,TRACK_COUNT_525};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

pub const NUM_TRACKS: usize = 40;
/// reserved bytes per track, header included
pub const TRACK_ALLOC: usize = 6384;
const HEADER_LEN: usize = 2;
/// largest nibble count a region can carry
pub const MAX_NIBBLES: usize = TRACK_ALLOC - HEADER_LEN;
const FILE_LEN: u64 = (NUM_TRACKS*TRACK_ALLOC) as u64;
/// captured length written for freshly formatted tracks
const FORMAT_NIBBLES: usize = 6250;

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    if len != FILE_LEN {
        return Verdict::NotMine;
    }
    // sanity-check the stored lengths
    for track in [0usize,1,NUM_TRACKS-1] {
        let mut hdr: [u8;2] = [0;2];
        if gfd::read_at(gfd,(track*TRACK_ALLOC) as u64,&mut hdr).is_err() {
            return Verdict::NotMine;
        }
        if u16::from_le_bytes(hdr) as usize > MAX_NIBBLES {
            debug!("track {} length field out of range",track);
            return Verdict::NotMine;
        }
    }
    Verdict::Mine
}

pub struct WrapperTrackStar {
    track_lens: Vec<usize>
}

impl WrapperTrackStar {
    pub fn new() -> Self {
        Self { track_lens: Vec::new() }
    }
}

impl ImageWrapper for WrapperTrackStar {
    fn file_format(&self) -> FileFormat {
        FileFormat::TrackStar
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        if wrapped_len != FILE_LEN {
            return Err(Box::new(Error::OddLength));
        }
        self.track_lens = Vec::new();
        for track in 0..NUM_TRACKS {
            let mut hdr: [u8;2] = [0;2];
            gfd::read_at(wrapper,(track*TRACK_ALLOC) as u64,&mut hdr)?;
            let nibs = u16::from_le_bytes(hdr) as usize;
            if nibs > MAX_NIBBLES {
                error!("track {} claims {} nibbles",track,nibs);
                return Err(Box::new(Error::BadFileFormat));
            }
            self.track_lens.push(nibs);
        }
        Ok(PrepResult {
            data_len: wrapped_len,
            physical: PhysicalFormat::NibVar,
            order: Some(SectorOrder::Physical),
            dos_volume: None,
            num_tracks: Some(NUM_TRACKS),
            bad_blocks: None,
            data_fd: gfd::new_ref(SubFd::new(wrapper,0,wrapped_len,read_only))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,_dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::NibVar || order != SectorOrder::Physical || data_len != FILE_LEN {
            error!("TrackStar holds 40 variable nibble tracks");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        // first 35 regions get a standard capture length, the rest are blank
        self.track_lens = Vec::new();
        for track in 0..NUM_TRACKS {
            let nibs = match track < TRACK_COUNT_525 {
                true => FORMAT_NIBBLES,
                false => 0
            };
            let mut region = vec![0xff;TRACK_ALLOC];
            region[0..2].copy_from_slice(&(nibs as u16).to_le_bytes());
            gfd::write_at(wrapper,(track*TRACK_ALLOC) as u64,&region)?;
            self.track_lens.push(nibs);
        }
        Ok((data_len,gfd::new_ref(SubFd::new(wrapper,0,data_len,false))))
    }
    fn flush(&mut self,_wrapper: &FdRef,_data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        // nibble data already lives in the wrapper stream
        Ok(data_len)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
    fn nibble_track_len(&self,track: usize) -> usize {
        match self.track_lens.get(track) {
            Some(n) => *n,
            None => 0
        }
    }
    fn nibble_track_offset(&self,track: usize) -> u64 {
        (track*TRACK_ALLOC + HEADER_LEN) as u64
    }
}
