//! ## Support for DDD (Dalton's Disk Disintegrator) images
//!
//! A compressed dump of a 16-sector 35-track disk in DOS order.  There is
//! no magic number; the stream opens with the DOS volume number and then
//! packs each 4096-byte track as a bit stream: a table of the track's 20
//! most frequent bytes, then tokens selecting a favorite, spelling a
//! literal, or repeating a run.  Identification means probe-expanding the
//! first track and seeing whether the stream holds together.

use log::{debug,info,warn,error};
use crate::gfd::{self,FdRef,BufferFd,Whence};
use crate::image::PhysicalFormat;
use crate::skew::SectorOrder;
use crate::{DYNERR,Error,TRACK_COUNT_525};
use super::{FileFormat,ImageWrapper,PrepResult,Verdict};

const TRACK_LEN: usize = 4096;
const DISK_LEN: usize = TRACK_COUNT_525*TRACK_LEN; // 143360
const NUM_FAVORITES: usize = 20;
const MIN_RUN: usize = 4;
const MAX_RUN: usize = 4095;
/// smallest conceivable file: volume byte plus a favorites table and a
/// few run tokens per track (a blank disk packs to about 26 bytes/track)
const MIN_LEN: u64 = (1 + TRACK_COUNT_525*(NUM_FAVORITES+4)) as u64;

struct BitWriter {
    buf: Vec<u8>,
    acc: u32,
    bits: u32
}

impl BitWriter {
    fn new() -> Self {
        Self { buf: Vec::new(), acc: 0, bits: 0 }
    }
    /// append `count` bits of `val`, MSB first
    fn put(&mut self,val: u32,count: u32) {
        for i in (0..count).rev() {
            self.acc = (self.acc << 1) | ((val >> i) & 1);
            self.bits += 1;
            if self.bits==8 {
                self.buf.push(self.acc as u8);
                self.acc = 0;
                self.bits = 0;
            }
        }
    }
    fn align(&mut self) {
        while self.bits != 0 {
            self.put(0,1);
        }
    }
}

struct BitReader<'a> {
    buf: &'a [u8],
    ptr: usize,
    bit: u32
}

impl <'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, ptr: 0, bit: 0 }
    }
    fn get(&mut self,count: u32) -> Result<u32,DYNERR> {
        let mut ans: u32 = 0;
        for _i in 0..count {
            if self.ptr >= self.buf.len() {
                return Err(Box::new(Error::BadCompressedData));
            }
            ans = (ans << 1) | ((self.buf[self.ptr] >> (7-self.bit)) & 1) as u32;
            self.bit += 1;
            if self.bit==8 {
                self.bit = 0;
                self.ptr += 1;
            }
        }
        Ok(ans)
    }
    fn align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.ptr += 1;
        }
    }
    fn consumed(&self) -> usize {
        self.ptr
    }
}

/// the 20 most frequent bytes on the track, most frequent first
fn pick_favorites(trk: &[u8]) -> [u8;NUM_FAVORITES] {
    let mut counts: [usize;256] = [0;256];
    for b in trk {
        counts[*b as usize] += 1;
    }
    let mut order: Vec<usize> = (0..256).collect();
    order.sort_by(|a,b| counts[*b].cmp(&counts[*a]));
    let mut ans: [u8;NUM_FAVORITES] = [0;NUM_FAVORITES];
    for i in 0..NUM_FAVORITES {
        ans[i] = order[i] as u8;
    }
    ans
}

fn pack_track(writer: &mut BitWriter,trk: &[u8]) {
    let favorites = pick_favorites(trk);
    for f in favorites {
        writer.put(f as u32,8);
    }
    let mut i = 0;
    while i < trk.len() {
        let val = trk[i];
        let mut run = 1;
        while i+run < trk.len() && trk[i+run]==val && run < MAX_RUN {
            run += 1;
        }
        if run >= MIN_RUN {
            writer.put(1,2); // 01
            writer.put(val as u32,8);
            writer.put(run as u32,12);
            i += run;
            continue;
        }
        match favorites.iter().position(|f| *f==val) {
            Some(idx) => {
                writer.put(1,1);
                writer.put(idx as u32,5);
            },
            None => {
                writer.put(0,2); // 00
                writer.put(val as u32,8);
            }
        }
        i += 1;
    }
    writer.align();
}

fn unpack_track(reader: &mut BitReader) -> Result<Vec<u8>,DYNERR> {
    let mut favorites: [u8;NUM_FAVORITES] = [0;NUM_FAVORITES];
    for i in 0..NUM_FAVORITES {
        favorites[i] = reader.get(8)? as u8;
    }
    let mut ans: Vec<u8> = Vec::new();
    while ans.len() < TRACK_LEN {
        if reader.get(1)?==1 {
            let idx = reader.get(5)? as usize;
            if idx >= NUM_FAVORITES {
                return Err(Box::new(Error::BadCompressedData));
            }
            ans.push(favorites[idx]);
        } else if reader.get(1)?==0 {
            ans.push(reader.get(8)? as u8);
        } else {
            let val = reader.get(8)? as u8;
            let run = reader.get(12)? as usize;
            if run==0 || ans.len()+run > TRACK_LEN {
                return Err(Box::new(Error::BadCompressedData));
            }
            for _j in 0..run {
                ans.push(val);
            }
        }
    }
    reader.align();
    Ok(ans)
}

pub fn test(gfd: &FdRef,len: u64) -> Verdict {
    if len < MIN_LEN || len >= DISK_LEN as u64 {
        return Verdict::NotMine;
    }
    let buf = match gfd::read_whole(gfd) {
        Ok(b) => b,
        Err(_) => return Verdict::NotMine
    };
    // no magic to check; the only safe identification is to expand every
    // track and see whether the stream holds together
    let mut reader = BitReader::new(&buf[1..]);
    for track in 0..TRACK_COUNT_525 {
        if unpack_track(&mut reader).is_err() {
            debug!("track {} did not expand, not DDD",track);
            return Verdict::NotMine;
        }
    }
    Verdict::Mine
}

pub struct WrapperDdd {
    max_len: u64,
    volume: u8,
    damaged: bool
}

impl WrapperDdd {
    pub fn new(max_len: u64) -> Self {
        Self { max_len, volume: 254, damaged: false }
    }
}

impl ImageWrapper for WrapperDdd {
    fn file_format(&self) -> FileFormat {
        FileFormat::Ddd
    }
    fn prep(&mut self,wrapper: &FdRef,wrapped_len: u64,_read_only: bool) -> Result<PrepResult,DYNERR> {
        if wrapped_len > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        let buf = gfd::read_whole(wrapper)?;
        if buf.len() < MIN_LEN as usize {
            return Err(Box::new(Error::BadFileFormat));
        }
        self.volume = buf[0];
        debug!("DDD volume number {}",self.volume);
        let mut disk: Vec<u8> = Vec::new();
        let mut reader = BitReader::new(&buf[1..]);
        for track in 0..TRACK_COUNT_525 {
            match unpack_track(&mut reader) {
                Ok(mut trk) => disk.append(&mut trk),
                Err(e) => {
                    error!("DDD expansion died on track {}",track);
                    return Err(e);
                }
            }
        }
        if buf.len() - 1 - reader.consumed() > 8 {
            warn!("{} stray bytes after last DDD track",buf.len()-1-reader.consumed());
            self.damaged = true;
        }
        debug_assert!(disk.len()==DISK_LEN);
        Ok(PrepResult {
            data_len: DISK_LEN as u64,
            physical: PhysicalFormat::Sectors,
            order: Some(SectorOrder::DOS),
            dos_volume: Some(self.volume),
            num_tracks: None,
            bad_blocks: None,
            data_fd: gfd::new_ref(BufferFd::new(disk,false,false))
        })
    }
    fn create(&mut self,data_len: u64,physical: PhysicalFormat,order: SectorOrder,dos_volume: u8,_wrapper: &FdRef) -> Result<(u64,FdRef),DYNERR> {
        if physical != PhysicalFormat::Sectors || order != SectorOrder::DOS || data_len != DISK_LEN as u64 {
            error!("DDD holds exactly one 16-sector 35-track disk in DOS order");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        self.volume = dos_volume;
        Ok((data_len,gfd::new_ref(BufferFd::new(vec![0;DISK_LEN],false,false))))
    }
    fn flush(&mut self,wrapper: &FdRef,data: &FdRef,data_len: u64) -> Result<u64,DYNERR> {
        if data_len != DISK_LEN as u64 {
            return Err(Box::new(Error::Internal));
        }
        let mut disk = vec![0;DISK_LEN];
        gfd::read_at(data,0,&mut disk)?;
        let mut writer = BitWriter::new();
        writer.put(self.volume as u32,8);
        for track in 0..TRACK_COUNT_525 {
            pack_track(&mut writer,&disk[track*TRACK_LEN..(track+1)*TRACK_LEN]);
        }
        writer.align();
        let packed = writer.buf;
        info!("DDD packed {} -> {}",DISK_LEN,packed.len());
        let mut dst = wrapper.borrow_mut();
        dst.truncate(0)?;
        dst.seek(0,Whence::Set)?;
        dst.write(&packed)?;
        Ok(packed.len() as u64)
    }
    fn has_fast_flush(&self) -> bool {
        false
    }
    fn is_damaged(&self) -> bool {
        self.damaged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track(seed: u8) -> Vec<u8> {
        let mut trk = vec![0;TRACK_LEN];
        for i in 0..TRACK_LEN {
            trk[i] = match i%97 {
                0..=60 => 0,
                61..=80 => seed,
                _ => (i%251) as u8
            };
        }
        trk
    }

    #[test]
    fn track_round_trip() {
        let trk = sample_track(0xa5);
        let mut writer = BitWriter::new();
        pack_track(&mut writer,&trk);
        let packed = writer.buf;
        assert!(packed.len() < TRACK_LEN);
        let mut reader = BitReader::new(&packed);
        assert_eq!(unpack_track(&mut reader).expect("unpack failed"),trk);
    }

    #[test]
    fn bits_round_trip() {
        let mut writer = BitWriter::new();
        writer.put(0b101,3);
        writer.put(0xbeef,16);
        writer.put(1,1);
        writer.align();
        let mut reader = BitReader::new(&writer.buf);
        assert_eq!(reader.get(3).unwrap(),0b101);
        assert_eq!(reader.get(16).unwrap(),0xbeef);
        assert_eq!(reader.get(1).unwrap(),1);
    }
}
