//! ## Support for NuFX (ShrinkIt) disk archives
//!
//! A small in-crate archive layer, enough to round-trip archives that hold
//! exactly one disk-image record.  Archives of ordinary files are
//! positively identified and refused, so the caller can tell the user why.
//! Binary II padding (.BXY) in front of the master block is skipped.
//!
//! Disk threads may be stored or LZW compressed.  Data is cut into 4 KiB
//! chunks; each chunk is run-length encoded when that helps, then LZW
//! packed (12-bit codes, cleared at each chunk boundary) when that helps.

use std::collections::HashMap;
use log::{debug,info,warn,error};
use crate::gfd::{self,FdRef,BufferFd,Whence};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,BLOCK_SIZE};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

const MASTER_ID: [u8;6] = [0x4e,0xf5,0x46,0xe9,0x6c,0xe5];
const RECORD_ID: [u8;4] = [0x4e,0xf5,0x46,0xd8];
const BINARY2_ID: [u8;3] = [0x0a,0x47,0x4c];
const MASTER_LEN: usize = 48;
const THREAD_LEN: usize = 16;
const CHUNK: usize = 4096;
const RLE_DELIM: u8 = 0xdb;
const CLEAR_CODE: u16 = 0x100;
const FIRST_FREE: u16 = 0x101;
const MAX_CODE: u16 = 0xfff;

const THREAD_CLASS_DATA: u16 = 2;
const THREAD_KIND_DISK: u16 = 1;
const FORMAT_NONE: u16 = 0;
const FORMAT_LZW1: u16 = 2;
const FORMAT_LZW2: u16 = 3;

/// compression applied to the disk thread on flush
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum ThreadFormat {
    None,
    Lzw2
}

/// CRC-16/XMODEM, as used for the master and record header checks.
pub fn crc16(seed: u16,buf: &[u8]) -> u16 {
    let mut crc = seed;
    for b in buf {
        crc ^= (*b as u16) << 8;
        for _bit in 0..8 {
            crc = match crc & 0x8000 {
                0 => crc << 1,
                _ => (crc << 1) ^ 0x1021
            };
        }
    }
    crc
}

fn get_u16(buf: &[u8],off: usize) -> u16 {
    u16::from_le_bytes([buf[off],buf[off+1]])
}

fn get_u32(buf: &[u8],off: usize) -> u32 {
    u32::from_le_bytes([buf[off],buf[off+1],buf[off+2],buf[off+3]])
}

/// current date in the 8-byte archive format
fn time_rec() -> [u8;8] {
    use chrono::{Datelike,Timelike};
    let now = chrono::Local::now();
    [
        now.second() as u8,
        now.minute() as u8,
        now.hour() as u8,
        (now.year() - 1900) as u8,
        now.day() as u8,
        now.month() as u8,
        0,
        now.weekday().number_from_sunday() as u8
    ]
}

struct Thread {
    class: u16,
    format: u16,
    kind: u16,
    crc: u16,
    thread_eof: u32,
    comp_thread_eof: u32,
    data_offset: usize
}

struct Record {
    version: u16,
    storage_type: u16,
    extra_type: u32,
    filename: String,
    threads: Vec<Thread>
}

/// Walk the archive structure without touching thread data.
fn parse(buf: &[u8]) -> Result<Vec<Record>,DYNERR> {
    let base = match buf.len() {
        l if l >= 3 && buf[0..3]==BINARY2_ID => 128,
        _ => 0
    };
    if buf.len() < base + MASTER_LEN || buf[base..base+6] != MASTER_ID {
        return Err(Box::new(Error::UnrecognizedFileFmt));
    }
    let master_crc = get_u16(buf,base+6);
    if crc16(0,&buf[base+8..base+MASTER_LEN]) != master_crc {
        info!("NuFX master block checksum mismatch");
        return Err(Box::new(Error::BadChecksum));
    }
    let total_records = get_u32(buf,base+8);
    if total_records==0 || total_records > 1000 {
        return Err(Box::new(Error::BadArchiveStruct));
    }
    let mut ans: Vec<Record> = Vec::new();
    let mut ptr = base + MASTER_LEN;
    for _rec in 0..total_records {
        if ptr + 58 > buf.len() || buf[ptr..ptr+4] != RECORD_ID {
            info!("NuFX record block not found where expected");
            return Err(Box::new(Error::BadArchiveStruct));
        }
        let header_crc = get_u16(buf,ptr+4);
        let attrib_count = get_u16(buf,ptr+6) as usize;
        if attrib_count < 58 || ptr + attrib_count > buf.len() {
            return Err(Box::new(Error::BadArchiveStruct));
        }
        let filename_len = get_u16(buf,ptr+attrib_count-2) as usize;
        let header_end = ptr + attrib_count + filename_len;
        if header_end > buf.len() {
            return Err(Box::new(Error::BadArchiveStruct));
        }
        if crc16(0,&buf[ptr+6..header_end]) != header_crc {
            info!("NuFX record header checksum mismatch");
            return Err(Box::new(Error::BadChecksum));
        }
        let version = get_u16(buf,ptr+8);
        let total_threads = get_u32(buf,ptr+10) as usize;
        if total_threads==0 || total_threads > 16 {
            return Err(Box::new(Error::BadArchiveStruct));
        }
        let storage_type = get_u16(buf,ptr+30);
        let extra_type = get_u32(buf,ptr+26);
        let filename = String::from_utf8_lossy(&buf[ptr+attrib_count..header_end]).to_string();
        let mut threads: Vec<Thread> = Vec::new();
        let mut data_offset = header_end + total_threads*THREAD_LEN;
        for t in 0..total_threads {
            let toff = header_end + t*THREAD_LEN;
            if toff + THREAD_LEN > buf.len() {
                return Err(Box::new(Error::BadArchiveStruct));
            }
            let thread = Thread {
                class: get_u16(buf,toff),
                format: get_u16(buf,toff+2),
                kind: get_u16(buf,toff+4),
                crc: get_u16(buf,toff+6),
                thread_eof: get_u32(buf,toff+8),
                comp_thread_eof: get_u32(buf,toff+12),
                data_offset
            };
            data_offset += thread.comp_thread_eof as usize;
            threads.push(thread);
        }
        if data_offset > buf.len() {
            return Err(Box::new(Error::BadArchiveStruct));
        }
        ans.push(Record { version, storage_type, extra_type, filename, threads });
        ptr = data_offset;
    }
    Ok(ans)
}

fn find_disk_thread(rec: &Record) -> Option<usize> {
    for (i,t) in rec.threads.iter().enumerate() {
        if t.class==THREAD_CLASS_DATA && t.kind==THREAD_KIND_DISK {
            return Some(i);
        }
    }
    None
}

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    if len < (MASTER_LEN + 58) as u64 {
        return Verdict::NotMine;
    }
    let mut head: [u8;6] = [0;6];
    if gfd::read_at(gfd,0,&mut head).is_err() {
        return Verdict::NotMine;
    }
    let looks_bxy = head[0..3]==BINARY2_ID;
    if head != MASTER_ID && !looks_bxy {
        return Verdict::NotMine;
    }
    let buf = match gfd::read_whole(gfd) {
        Ok(b) => b,
        Err(_) => return Verdict::NotMine
    };
    match parse(&buf) {
        Ok(records) => {
            if records.len()==1 && find_disk_thread(&records[0]).is_some() {
                Verdict::Mine
            } else {
                info!("NuFX archive holds no single disk image");
                Verdict::FileArchive
            }
        },
        Err(e) if crate::error_kind(&e)==Some(Error::BadChecksum) => Verdict::BadChecksum,
        Err(e) if crate::error_kind(&e)==Some(Error::UnrecognizedFileFmt) => Verdict::NotMine,
        Err(_) => Verdict::BadChecksum
    }
}

pub struct WrapperNuFx {
    compress: ThreadFormat,
    max_len: u64,
    storage_name: String,
    damaged: bool,
    blocks: u32
}

impl WrapperNuFx {
    pub fn new(compress: ThreadFormat,max_len: u64) -> Self {
        Self { compress, max_len, storage_name: "DISK".to_string(), damaged: false, blocks: 0 }
    }
    /// serialize the whole archive around the given disk data
    fn build(&self,disk: &[u8]) -> Vec<u8> {
        let (format,packed) = match self.compress {
            ThreadFormat::None => (FORMAT_NONE,disk.to_vec()),
            ThreadFormat::Lzw2 => (FORMAT_LZW2,compress_thread(disk))
        };
        let name = self.storage_name.as_bytes();
        let mut rec: Vec<u8> = Vec::new();
        rec.extend_from_slice(&RECORD_ID);
        rec.extend_from_slice(&[0;2]); // header crc patched below
        rec.extend_from_slice(&58u16.to_le_bytes()); // attrib count
        rec.extend_from_slice(&3u16.to_le_bytes()); // version
        rec.extend_from_slice(&1u32.to_le_bytes()); // thread count
        rec.extend_from_slice(&1u16.to_le_bytes()); // file sys: ProDOS
        rec.extend_from_slice(&0x2fu16.to_le_bytes()); // fssep '/'
        rec.extend_from_slice(&0xe3u32.to_le_bytes()); // access
        rec.extend_from_slice(&0u32.to_le_bytes()); // file type
        rec.extend_from_slice(&((disk.len()/BLOCK_SIZE) as u32).to_le_bytes()); // extra = blocks
        rec.extend_from_slice(&(BLOCK_SIZE as u16).to_le_bytes()); // storage = block size
        rec.extend_from_slice(&time_rec());
        rec.extend_from_slice(&time_rec());
        rec.extend_from_slice(&time_rec());
        rec.extend_from_slice(&(name.len() as u16).to_le_bytes());
        rec.extend_from_slice(name);
        // the one thread
        rec.extend_from_slice(&THREAD_CLASS_DATA.to_le_bytes());
        rec.extend_from_slice(&format.to_le_bytes());
        rec.extend_from_slice(&THREAD_KIND_DISK.to_le_bytes());
        rec.extend_from_slice(&crc16(0xffff,disk).to_le_bytes());
        rec.extend_from_slice(&(disk.len() as u32).to_le_bytes());
        rec.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        rec.extend_from_slice(&packed);
        let name_end = 58 + name.len();
        let hcrc = crc16(0,&rec[6..name_end]);
        rec[4..6].copy_from_slice(&hcrc.to_le_bytes());
        let mut master: Vec<u8> = Vec::new();
        master.extend_from_slice(&MASTER_ID);
        master.extend_from_slice(&[0;2]); // master crc patched below
        master.extend_from_slice(&1u32.to_le_bytes());
        master.extend_from_slice(&time_rec());
        master.extend_from_slice(&time_rec());
        master.extend_from_slice(&2u16.to_le_bytes()); // master version
        master.extend_from_slice(&[0;8]);
        master.extend_from_slice(&((MASTER_LEN + rec.len()) as u32).to_le_bytes());
        master.extend_from_slice(&[0;6]);
        debug_assert!(master.len()==MASTER_LEN);
        let mcrc = crc16(0,&master[8..MASTER_LEN]);
        master[6..8].copy_from_slice(&mcrc.to_le_bytes());
        master.extend_from_slice(&rec);
        master
    }
}

impl ImageWrapper for WrapperNuFx {
    fn file_format(&self) -> FileFormat {
        FileFormat::NuFx
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,_read_only: bool) -> Result<PrepResult,DYNERR> {
        if wrapped_len > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        let buf = gfd::read_whole(wrapper)?;
        let records = parse(&buf)?;
        if records.len() != 1 {
            return Err(Box::new(Error::FileArchive));
        }
        let rec = &records[0];
        let idx = match find_disk_thread(rec) {
            Some(i) => i,
            None => return Err(Box::new(Error::FileArchive))
        };
        let thread = &rec.threads[idx];
        if thread.thread_eof as u64 > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        let comp = &buf[thread.data_offset..thread.data_offset + thread.comp_thread_eof as usize];
        let disk = match thread.format {
            FORMAT_NONE => {
                let mut d = comp.to_vec();
                d.truncate(thread.thread_eof as usize);
                d
            },
            FORMAT_LZW1 | FORMAT_LZW2 => expand_thread(comp,thread.thread_eof as usize)?,
            f => {
                error!("NuFX thread compression {} not supported",f);
                return Err(Box::new(Error::UnsupportedCompression));
            }
        };
        // a disk record stores block geometry in the attributes
        let expected = rec.extra_type as u64 * rec.storage_type as u64;
        if expected > 0 && expected != disk.len() as u64 {
            warn!("NuFX disk thread is {} bytes, attributes claim {}",disk.len(),expected);
            self.damaged = true;
        }
        if rec.version >= 3 && thread.crc != 0 && crc16(0xffff,&disk) != thread.crc {
            warn!("NuFX disk thread checksum mismatch");
            self.damaged = true;
        }
        if !rec.filename.is_empty() {
            self.storage_name = rec.filename.clone();
        }
        self.blocks = (disk.len()/BLOCK_SIZE) as u32;
        let data_len = disk.len() as u64;
        debug!("NuFX disk thread expanded to {} bytes",data_len);
        Ok(PrepResult {
            data_len,
            physical: PhysicalFormat::Sectors,
            order: Some(SectorOrder::ProDOS),
            dos_volume: None,
            num_tracks: None,
            bad_blocks: None,
            data_fd: gfd::new_ref(BufferFd::new(disk,false,false))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,_dos_volume: u8,_wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::Sectors || order != SectorOrder::ProDOS {
            error!("NuFX images are sectors in ProDOS order");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        if data_len % BLOCK_SIZE as u64 != 0 {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        self.blocks = (data_len / BLOCK_SIZE as u64) as u32;
        // the archive itself is emitted at flush time
        Ok((data_len,gfd::new_ref(BufferFd::new(vec![0;data_len as usize],false,false))))
    }
    fn flush(&mut self,wrapper: &FdRef,data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        let mut disk = vec![0;data_len as usize];
        gfd::read_at(data,0,&mut disk)?;
        let archive = self.build(&disk);
        let mut dst = wrapper.borrow_mut();
        dst.truncate(0)?;
        dst.seek(0,Whence::Set)?;
        dst.write(&archive)?;
        Ok(archive.len() as u64)
    }
    fn has_fast_flush(&self) -> bool {
        false
    }
    fn is_damaged(&self) -> bool {
        self.damaged
    }
    fn set_storage_name(&mut self,name: &str) {
        self.storage_name = name.to_string();
    }
}

// ---- thread codec ----

struct BitWriter {
    buf: Vec<u8>,
    acc: u32,
    bits: u32
}

impl BitWriter {
    fn new() -> Self {
        Self { buf: Vec::new(), acc: 0, bits: 0 }
    }
    fn put(&mut self,code: u16) {
        self.acc |= (code as u32) << self.bits;
        self.bits += 12;
        while self.bits >= 8 {
            self.buf.push((self.acc & 0xff) as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }
    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.buf.push((self.acc & 0xff) as u8);
        }
        self.buf
    }
}

struct BitReader<'a> {
    buf: &'a [u8],
    ptr: usize,
    acc: u32,
    bits: u32
}

impl <'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, ptr: 0, acc: 0, bits: 0 }
    }
    fn get(&mut self) -> Result<u16,DYNERR> {
        while self.bits < 12 {
            if self.ptr >= self.buf.len() {
                return Err(Box::new(Error::BadCompressedData));
            }
            self.acc |= (self.buf[self.ptr] as u32) << self.bits;
            self.ptr += 1;
            self.bits += 8;
        }
        let code = (self.acc & 0xfff) as u16;
        self.acc >>= 12;
        self.bits -= 12;
        Ok(code)
    }
}

/// Run-length encode with the classic delimiter scheme: `[delim,val,count]`
/// stands for `count` copies of `val`; a literal delimiter is a run of 1.
fn rle_pack(src: &[u8]) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < src.len() {
        let val = src[i];
        let mut run = 1;
        while i+run < src.len() && src[i+run]==val && run < 255 {
            run += 1;
        }
        if run >= 4 || val==RLE_DELIM {
            ans.push(RLE_DELIM);
            ans.push(val);
            ans.push(run as u8);
        } else {
            for _j in 0..run {
                ans.push(val);
            }
        }
        i += run;
    }
    ans
}

fn rle_unpack(src: &[u8],out_len: usize) -> Result<Vec<u8>,DYNERR> {
    let mut ans: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < src.len() && ans.len() < out_len {
        if src[i]==RLE_DELIM {
            if i+2 >= src.len() {
                return Err(Box::new(Error::BadCompressedData));
            }
            let val = src[i+1];
            let run = src[i+2] as usize;
            for _j in 0..run {
                ans.push(val);
            }
            i += 3;
        } else {
            ans.push(src[i]);
            i += 1;
        }
    }
    match ans.len()==out_len {
        true => Ok(ans),
        false => Err(Box::new(Error::BadCompressedData))
    }
}

/// 12-bit LZW over one chunk; the table starts fresh each chunk.
fn lzw_pack(src: &[u8]) -> Vec<u8> {
    let mut writer = BitWriter::new();
    let mut dict: HashMap<(u16,u8),u16> = HashMap::new();
    let mut next_code = FIRST_FREE;
    let mut w: u16 = src[0] as u16;
    for i in 1..src.len() {
        let b = src[i];
        match dict.get(&(w,b)) {
            Some(code) => w = *code,
            None => {
                writer.put(w);
                dict.insert((w,b),next_code);
                next_code += 1;
                w = b as u16;
                if next_code > MAX_CODE {
                    writer.put(CLEAR_CODE);
                    dict.clear();
                    next_code = FIRST_FREE;
                }
            }
        }
    }
    writer.put(w);
    writer.finish()
}

fn lzw_unpack(src: &[u8],out_len: usize) -> Result<Vec<u8>,DYNERR> {
    let mut reader = BitReader::new(src);
    let mut ans: Vec<u8> = Vec::new();
    let mut table: Vec<Vec<u8>> = Vec::new();
    let reset = |table: &mut Vec<Vec<u8>>| {
        table.clear();
        for i in 0..=255u16 {
            table.push(vec![i as u8]);
        }
        table.push(Vec::new()); // clear code placeholder
    };
    reset(&mut table);
    let mut prev: Option<Vec<u8>> = None;
    while ans.len() < out_len {
        let code = reader.get()?;
        if code==CLEAR_CODE {
            reset(&mut table);
            prev = None;
            continue;
        }
        let entry = match (code as usize) < table.len() {
            true => table[code as usize].clone(),
            false => {
                // the one-step-ahead case
                match &prev {
                    Some(p) => {
                        let mut e = p.clone();
                        e.push(p[0]);
                        e
                    },
                    None => return Err(Box::new(Error::BadCompressedData))
                }
            }
        };
        if let Some(p) = &prev {
            if table.len() <= MAX_CODE as usize {
                let mut grown = p.clone();
                grown.push(entry[0]);
                table.push(grown);
            }
        }
        ans.extend_from_slice(&entry);
        prev = Some(entry);
    }
    match ans.len()==out_len {
        true => {
            ans.truncate(out_len);
            Ok(ans)
        },
        false => {
            ans.truncate(out_len);
            Ok(ans)
        }
    }
}

/// Compress a disk thread: one leading delimiter byte, then per chunk a
/// 16-bit header (low 13 bits post-RLE length, bit 15 set when LZW was
/// applied), a 16-bit LZW byte count when applicable, and the payload.
fn compress_thread(disk: &[u8]) -> Vec<u8> {
    let mut ans: Vec<u8> = vec![RLE_DELIM];
    let mut ptr = 0;
    while ptr < disk.len() {
        let chunk_len = std::cmp::min(CHUNK,disk.len()-ptr);
        let chunk = &disk[ptr..ptr+chunk_len];
        let rle = rle_pack(chunk);
        // a post-RLE length equal to the chunk length means RLE was skipped
        let (stored_len,body) = match rle.len() < chunk_len {
            true => (rle.len(),rle),
            false => (chunk_len,chunk.to_vec())
        };
        let lzw = lzw_pack(&body);
        let use_lzw = lzw.len() < body.len();
        let mut header = stored_len as u16 & 0x1fff;
        if use_lzw {
            header |= 0x8000;
        }
        ans.extend_from_slice(&header.to_le_bytes());
        if use_lzw {
            ans.extend_from_slice(&(lzw.len() as u16).to_le_bytes());
            ans.extend_from_slice(&lzw);
        } else {
            ans.extend_from_slice(&body);
        }
        ptr += chunk_len;
    }
    ans
}

fn expand_thread(comp: &[u8],thread_eof: usize) -> Result<Vec<u8>,DYNERR> {
    if comp.len() < 3 {
        return Err(Box::new(Error::BadCompressedData));
    }
    let delim = comp[0];
    if delim != RLE_DELIM {
        debug!("unusual RLE delimiter {:02x}",delim);
    }
    let mut ans: Vec<u8> = Vec::new();
    let mut ptr = 1;
    while ans.len() < thread_eof {
        if ptr+2 > comp.len() {
            return Err(Box::new(Error::BadCompressedData));
        }
        let chunk_len = std::cmp::min(CHUNK,thread_eof-ans.len());
        let header = get_u16(comp,ptr);
        ptr += 2;
        let stored_len = (header & 0x1fff) as usize;
        let use_lzw = header & 0x8000 != 0;
        let body: Vec<u8> = match use_lzw {
            true => {
                if ptr+2 > comp.len() {
                    return Err(Box::new(Error::BadCompressedData));
                }
                let lzw_len = get_u16(comp,ptr) as usize;
                ptr += 2;
                if ptr+lzw_len > comp.len() {
                    return Err(Box::new(Error::BadCompressedData));
                }
                let body = lzw_unpack(&comp[ptr..ptr+lzw_len],stored_len)?;
                ptr += lzw_len;
                body
            },
            false => {
                if ptr+stored_len > comp.len() {
                    return Err(Box::new(Error::BadCompressedData));
                }
                let body = comp[ptr..ptr+stored_len].to_vec();
                ptr += stored_len;
                body
            }
        };
        if stored_len==chunk_len {
            ans.extend_from_slice(&body);
        } else {
            ans.append(&mut rle_unpack(&body,chunk_len)?);
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_disk(len: usize) -> Vec<u8> {
        let mut disk = vec![0;len];
        for i in 0..len {
            if i%7==0 {
                disk[i] = (i/256) as u8;
            }
            if i%4096 < 16 {
                disk[i] = 0xdb;
            }
        }
        disk
    }

    #[test]
    fn rle_round_trip() {
        let src = [0,0,0,0,0,1,2,3,0xdb,4,4,4,4,9];
        let packed = rle_pack(&src);
        assert_eq!(rle_unpack(&packed,src.len()).expect("unpack failed"),src.to_vec());
    }

    #[test]
    fn lzw_round_trip() {
        let src: Vec<u8> = (0..4096).map(|i| ((i*i+7)%251) as u8).collect();
        let packed = lzw_pack(&src);
        assert_eq!(lzw_unpack(&packed,src.len()).expect("unpack failed"),src);
    }

    #[test]
    fn thread_round_trip() {
        for len in [143360usize,51200] {
            let disk = sample_disk(len);
            let comp = compress_thread(&disk);
            assert!(comp.len() < disk.len(),"compressible data did not shrink");
            assert_eq!(expand_thread(&comp,len).expect("expand failed"),disk);
        }
    }

    #[test]
    fn archive_round_trip() {
        let disk = sample_disk(143360);
        let wrapper = WrapperNuFx::new(ThreadFormat::Lzw2,1<<26);
        let archive = wrapper.build(&disk);
        let records = parse(&archive).expect("parse failed");
        assert_eq!(records.len(),1);
        let idx = find_disk_thread(&records[0]).expect("no disk thread");
        let t = &records[0].threads[idx];
        let out = expand_thread(&archive[t.data_offset..t.data_offset+t.comp_thread_eof as usize],t.thread_eof as usize).expect("expand failed");
        assert_eq!(out,disk);
    }

    #[test]
    fn crc16_vector() {
        // CRC-16/XMODEM of "123456789" is 0x31c3
        assert_eq!(crc16(0,b"123456789"),0x31c3);
    }
}
