//! ## Support for 2MG disk images
//!
//! A 64-byte header in front of DOS-ordered sectors, ProDOS-ordered
//! blocks, or raw nibbles, with optional comment and creator chunks after
//! the data.  The header records the sector order, which makes this one of
//! the friendlier containers to probe.

use std::io::Cursor;
use binrw::{BinRead,BinWrite};
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{debug,info,warn,error};
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::nibble::TRACK_LEN_6656;
use crate::{DYNERR,Error,BLOCK_SIZE,TRACK_COUNT_525};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

const CREATOR_ID: [u8;4] = *b"A2IM";
const FLAG_VOLUME_VALID: u32 = 0x0100;
const FLAG_LOCKED: u32 = 0x8000_0000;

#[derive(FromPrimitive,PartialEq,Clone,Copy)]
pub enum ContentFormat {
    Dos = 0,
    ProDos = 1,
    Nibble = 2
}

// all header numbers are little endian
#[derive(BinRead,BinWrite,Clone)]
#[brw(little,magic = b"2IMG")]
struct Header {
    creator_id: [u8;4],
    header_len: u16,
    version: u16,
    img_fmt: u32,
    flags: u32,
    blocks: u32,
    data_offset: u32,
    data_len: u32,
    comment_offset: u32,
    comment_len: u32,
    creator_offset: u32,
    creator_len: u32,
    pad: [u8;16]
}

fn read_header(gfd: &FdRef,len: u64) -> Option<Header> {
    if len < 64 {
        return None;
    }
    let mut buf: [u8;64] = [0;64];
    if gfd::read_at(gfd,0,&mut buf).is_err() {
        return None;
    }
    match Header::read(&mut Cursor::new(&buf)) {
        Ok(h) => Some(h),
        Err(_) => None
    }
}

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    let header = match read_header(gfd,len) {
        Some(h) => h,
        None => return Verdict::NotMine
    };
    if ContentFormat::from_u32(header.img_fmt).is_none() {
        info!("2MG magic found but format {} is illegal",header.img_fmt);
        return Verdict::NotMine;
    }
    if header.data_offset as u64 + header.data_len as u64 > len {
        info!("2MG data chunk runs past EOF");
        return Verdict::NotMine;
    }
    Verdict::Mine
}

pub struct Wrapper2mg {
    header: Option<Header>,
    comment: Vec<u8>,
    creator_info: Vec<u8>,
    locked: bool
}

impl Wrapper2mg {
    pub fn new() -> Self {
        Self { header: None, comment: Vec::new(), creator_info: Vec::new(), locked: false }
    }
    fn track_alloc(&self) -> usize {
        TRACK_LEN_6656
    }
}

impl ImageWrapper for Wrapper2mg {
    fn file_format(&self) -> FileFormat {
        FileFormat::Dot2mg
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        let header = match read_header(wrapper,wrapped_len) {
            Some(h) => h,
            None => return Err(Box::new(Error::BadFileFormat))
        };
        if header.header_len != 64 {
            warn!("unexpected 2MG header length {}",header.header_len);
        }
        if header.version != 1 {
            warn!("unexpected 2MG version {}",header.version);
        }
        let fmt = match ContentFormat::from_u32(header.img_fmt) {
            Some(f) => f,
            None => return Err(Box::new(Error::BadFileFormat))
        };
        let (physical,order) = match fmt {
            ContentFormat::Dos => (PhysicalFormat::Sectors,SectorOrder::DOS),
            ContentFormat::ProDos => (PhysicalFormat::Sectors,SectorOrder::ProDOS),
            ContentFormat::Nibble => (PhysicalFormat::Nib6656,SectorOrder::Physical)
        };
        let offset = header.data_offset as u64;
        let data_len = header.data_len as u64;
        if offset + data_len > wrapped_len {
            error!("2MG data chunk runs past EOF");
            return Err(Box::new(Error::BadFileFormat));
        }
        if fmt==ContentFormat::ProDos && header.blocks as u64 * BLOCK_SIZE as u64 != data_len {
            error!("2MG block count {} does not match data length {}",header.blocks,data_len);
            return Err(Box::new(Error::BadFileFormat));
        }
        // comment and creator chunks ride along; bad bounds are tolerated
        self.comment = read_chunk(wrapper,wrapped_len,header.comment_offset,header.comment_len,"comment");
        self.creator_info = read_chunk(wrapper,wrapped_len,header.creator_offset,header.creator_len,"creator info");
        let dos_volume = match header.flags & FLAG_VOLUME_VALID {
            0 => None,
            _ => Some((header.flags & 0xff) as u8)
        };
        self.locked = header.flags & FLAG_LOCKED != 0;
        if self.locked {
            info!("2MG is flagged locked");
        }
        let data_fd = gfd::new_ref(SubFd::new(wrapper,offset,data_len,read_only || self.locked));
        self.header = Some(header);
        Ok(PrepResult {
            data_len,
            physical,
            order: Some(order),
            dos_volume,
            num_tracks: match physical {
                PhysicalFormat::Sectors => None,
                _ => Some(TRACK_COUNT_525)
            },
            bad_blocks: None,
            data_fd
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        let fmt = match (physical,order) {
            (PhysicalFormat::Sectors,SectorOrder::DOS) => ContentFormat::Dos,
            (PhysicalFormat::Sectors,SectorOrder::ProDOS) => ContentFormat::ProDos,
            (PhysicalFormat::Nib6656,SectorOrder::Physical) => ContentFormat::Nibble,
            _ => {
                error!("2MG cannot wrap {} in {}",order,physical);
                return Err(Box::new(Error::InvalidCreateReq));
            }
        };
        if fmt==ContentFormat::Nibble && data_len != (TRACK_COUNT_525*self.track_alloc()) as u64 {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        let now = chrono::Local::now().format("%d-%b-%y %H:%M");
        self.creator_info = format!("a2img v{} {}",env!("CARGO_PKG_VERSION"),now).into_bytes();
        let flags = match (fmt,dos_volume) {
            (ContentFormat::Dos,vol) => FLAG_VOLUME_VALID | vol as u32,
            _ => 0
        };
        let header = Header {
            creator_id: CREATOR_ID,
            header_len: 64,
            version: 1,
            img_fmt: fmt as u32,
            flags,
            blocks: (data_len / BLOCK_SIZE as u64) as u32,
            data_offset: 64,
            data_len: data_len as u32,
            comment_offset: 0,
            comment_len: 0,
            creator_offset: 64 + data_len as u32,
            creator_len: self.creator_info.len() as u32,
            pad: [0;16]
        };
        write_header_and_chunks(wrapper,&header,&self.comment,&self.creator_info)?;
        self.header = Some(header);
        let wrapped_len = 64 + data_len + self.creator_info.len() as u64;
        Ok((wrapped_len,gfd::new_ref(SubFd::new(wrapper,64,data_len,false))))
    }
    fn flush(&mut self,wrapper: &FdRef,_data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        // sector data already lives in the wrapper stream; refresh the
        // header and re-seat the trailing chunks
        let mut header = match &self.header {
            Some(h) => h.clone(),
            None => return Err(Box::new(Error::Internal))
        };
        let chunk_base = header.data_offset + data_len as u32;
        header.data_len = data_len as u32;
        header.comment_offset = match self.comment.len() { 0 => 0, _ => chunk_base };
        header.comment_len = self.comment.len() as u32;
        header.creator_offset = match self.creator_info.len() { 0 => 0, _ => chunk_base + self.comment.len() as u32 };
        header.creator_len = self.creator_info.len() as u32;
        write_header_and_chunks(wrapper,&header,&self.comment,&self.creator_info)?;
        let wrapped = header.data_offset as u64 + data_len + self.comment.len() as u64 + self.creator_info.len() as u64;
        self.header = Some(header);
        Ok(wrapped)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
    fn forces_read_only(&self) -> bool {
        self.locked
    }
    fn nibble_track_len(&self,_track: usize) -> usize {
        self.track_alloc()
    }
    fn nibble_track_offset(&self,track: usize) -> u64 {
        (track * self.track_alloc()) as u64
    }
}

fn read_chunk(gfd: &FdRef,len: u64,offset: u32,chunk_len: u32,what: &str) -> Vec<u8> {
    if chunk_len==0 {
        return Vec::new();
    }
    if offset as u64 + chunk_len as u64 > len {
        warn!("2MG {} chunk runs past EOF, ignoring",what);
        return Vec::new();
    }
    let mut buf = vec![0;chunk_len as usize];
    match gfd::read_at(gfd,offset as u64,&mut buf) {
        Ok(()) => {
            debug!("2MG {}: {}",what,String::from_utf8_lossy(&buf));
            buf
        },
        Err(_) => Vec::new()
    }
}

fn write_header_and_chunks(wrapper: &FdRef,header: &Header,comment: &[u8],creator: &[u8]) -> crate::STDRESULT {
    let mut cur = Cursor::new(Vec::new());
    header.write(&mut cur)?;
    let buf = cur.into_inner();
    debug_assert!(buf.len()==64);
    gfd::write_at(wrapper,0,&buf)?;
    if comment.len() > 0 {
        gfd::write_at(wrapper,header.comment_offset as u64,comment)?;
    }
    if creator.len() > 0 {
        gfd::write_at(wrapper,header.creator_offset as u64,creator)?;
    }
    Ok(())
}
