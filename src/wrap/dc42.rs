//! ## Support for DiskCopy 4.2 images
//!
//! The Macintosh interchange format, also used for 800K ProDOS disks.
//! An 84-byte big-endian header carries a Pascal-string disk name and a
//! rolling checksum over the full data fork, so corruption is detectable
//! but the whole image must be summed to notice it.  A mismatch does not
//! prevent opening; the image is marked damaged and goes read-only.

use std::io::Cursor;
use binrw::{BinRead,BinWrite};
use log::{debug,info,warn,error};
use crate::gfd::{self,FdRef,SubFd};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,BLOCK_SIZE};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

const HEADER_LEN: u64 = 84;
const SIZE_800K: u32 = 819200;
const DEFAULT_NAME: &str = "-not a Macintosh disk-";
const FORMAT_800K: u8 = 1;
const FORMAT_BYTE_PRODOS_800K: u8 = 0x24;

// big endian throughout
#[derive(BinRead,BinWrite,Clone)]
#[brw(big)]
struct Header {
    name: [u8;64],
    data_size: u32,
    tag_size: u32,
    data_checksum: u32,
    tag_checksum: u32,
    disk_format: u8,
    format_byte: u8,
    magic: u16
}

const MAGIC: u16 = 0x0100;

/// The DiskCopy rolling checksum: add each big-endian word, then rotate
/// the running sum right one bit.
pub fn checksum(buf: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i+1 < buf.len() {
        let word = u16::from_be_bytes([buf[i],buf[i+1]]) as u32;
        sum = sum.wrapping_add(word).rotate_right(1);
        i += 2;
    }
    sum
}

fn read_header(gfd: &FdRef,len: u64) -> Option<Header> {
    if len < HEADER_LEN {
        return None;
    }
    let mut buf: [u8;84] = [0;84];
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
    if header.name[0] > 63 || header.magic != MAGIC {
        return Verdict::NotMine;
    }
    if HEADER_LEN + header.data_size as u64 + header.tag_size as u64 > len {
        debug!("DC42 sizes run past EOF");
        return Verdict::NotMine;
    }
    if header.data_size==0 || header.data_size % BLOCK_SIZE as u32 != 0 {
        info!("DC42 magic looks right but data size {} is odd",header.data_size);
        return Verdict::NotMine;
    }
    Verdict::Mine
}

pub struct WrapperDc42 {
    header: Option<Header>,
    storage_name: String,
    damaged: bool
}

impl WrapperDc42 {
    pub fn new() -> Self {
        Self { header: None, storage_name: DEFAULT_NAME.to_string(), damaged: false }
    }
}

impl ImageWrapper for WrapperDc42 {
    fn file_format(&self) -> FileFormat {
        FileFormat::DiskCopy42
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,read_only: bool) -> Result<PrepResult,DYNERR> {
        let header = match read_header(wrapper,wrapped_len) {
            Some(h) if h.name[0] <= 63 && h.magic==MAGIC => h,
            _ => return Err(Box::new(Error::BadFileFormat))
        };
        let data_len = header.data_size as u64;
        if HEADER_LEN + data_len > wrapped_len {
            return Err(Box::new(Error::BadFileFormat));
        }
        let name_len = header.name[0] as usize;
        self.storage_name = String::from_utf8_lossy(&header.name[1..1+name_len]).to_string();
        debug!("DC42 disk name '{}'",self.storage_name);
        // the stored checksum covers the whole data fork, recompute it now
        let mut data = vec![0;data_len as usize];
        gfd::read_at(wrapper,HEADER_LEN,&mut data)?;
        let sum = checksum(&data);
        if sum != header.data_checksum {
            warn!("DC42 checksum stored {:08x} computed {:08x}",header.data_checksum,sum);
            self.damaged = true;
        }
        let data_fd = gfd::new_ref(SubFd::new(wrapper,HEADER_LEN,data_len,read_only));
        self.header = Some(header);
        Ok(PrepResult {
            data_len,
            physical: PhysicalFormat::Sectors,
            order: Some(SectorOrder::ProDOS),
            dos_volume: None,
            num_tracks: None,
            bad_blocks: None,
            data_fd
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,_dos_volume: u8,wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::Sectors || data_len != SIZE_800K as u64 {
            error!("DC42 create is limited to 800K sector images");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        if order != SectorOrder::ProDOS && order != SectorOrder::DOS {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        let mut name: [u8;64] = [0;64];
        let stem = self.storage_name.as_bytes();
        let n = std::cmp::min(stem.len(),63);
        name[0] = n as u8;
        name[1..1+n].copy_from_slice(&stem[0..n]);
        let header = Header {
            name,
            data_size: SIZE_800K,
            tag_size: 0,
            data_checksum: 0, // checksum of zeroed media
            tag_checksum: 0,
            disk_format: FORMAT_800K,
            format_byte: FORMAT_BYTE_PRODOS_800K,
            magic: MAGIC
        };
        write_header(wrapper,&header)?;
        self.header = Some(header);
        Ok((HEADER_LEN + data_len,gfd::new_ref(SubFd::new(wrapper,HEADER_LEN,data_len,false))))
    }
    fn flush(&mut self,wrapper: &FdRef,data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        let mut header = match &self.header {
            Some(h) => h.clone(),
            None => return Err(Box::new(Error::Internal))
        };
        let mut buf = vec![0;data_len as usize];
        gfd::read_at(data,0,&mut buf)?;
        header.data_size = data_len as u32;
        header.data_checksum = checksum(&buf);
        header.tag_checksum = 0;
        write_header(wrapper,&header)?;
        let tag_len = header.tag_size as u64;
        self.header = Some(header);
        Ok(HEADER_LEN + data_len + tag_len)
    }
    fn has_fast_flush(&self) -> bool {
        true
    }
    fn is_damaged(&self) -> bool {
        self.damaged
    }
    fn set_storage_name(&mut self,name: &str) {
        self.storage_name = name.to_string();
    }
}

fn write_header(wrapper: &FdRef,header: &Header) -> crate::STDRESULT {
    let mut cur = Cursor::new(Vec::new());
    header.write(&mut cur)?;
    let buf = cur.into_inner();
    debug_assert!(buf.len()==84);
    gfd::write_at(wrapper,0,&buf)
}
