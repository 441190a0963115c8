//! ## Support for Sim //e HDV images
//!
//! A 16-byte signature in front of raw ProDOS-ordered blocks; otherwise
//! this behaves like an unadorned image.

use log::error;
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,BLOCK_SIZE};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

pub const SIGNATURE: &[u8;13] = b"SIMSYSTEM HDV";
const HEADER_LEN: u64 = 16;

fn header() -> [u8;16] {
    let mut h: [u8;16] = [0;16];
    h[0..13].copy_from_slice(SIGNATURE);
    h[13] = 0x01;
    h
}

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    if len <= HEADER_LEN || (len - HEADER_LEN) % BLOCK_SIZE as u64 != 0 {
        return Verdict::NotMine;
    }
    let mut sig: [u8;13] = [0;13];
    if gfd::read_at(gfd,0,&mut sig).is_err() {
        return Verdict::NotMine;
    }
    match sig==*SIGNATURE {
        true => Verdict::Mine,
        false => Verdict::NotMine
    }
}

pub struct WrapperSim2e {}

impl WrapperSim2e {
    pub fn new() -> Self {
        Self {}
    }
}

impl ImageWrapper for WrapperSim2e {
    fn file_format(&self) -> FileFormat {
        FileFormat::Sim2eHdv
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        if test(wrapper,wrapped_len) != Verdict::Mine {
            return Err(Box::new(Error::BadFileFormat));
        }
        let data_len = wrapped_len - HEADER_LEN;
        Ok(PrepResult {
            data_len,
            physical: PhysicalFormat::Sectors,
            order: Some(SectorOrder::ProDOS),
            dos_volume: None,
            num_tracks: None,
            bad_blocks: None,
            data_fd: gfd::new_ref(SubFd::new(wrapper,HEADER_LEN,data_len,read_only))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,_dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::Sectors || order != SectorOrder::ProDOS || data_len % BLOCK_SIZE as u64 != 0 {
            error!("Sim //e HDV is ProDOS blocks only");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        gfd::write_at(wrapper,0,&header())?;
        Ok((HEADER_LEN + data_len,gfd::new_ref(SubFd::new(wrapper,HEADER_LEN,data_len,false))))
    }
    fn flush(&mut self,_wrapper: &FdRef,_data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        // data already lives in the wrapper stream
        Ok(HEADER_LEN + data_len)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
}
