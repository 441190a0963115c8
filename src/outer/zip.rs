//! ## zip outer wrapper
//!
//! A zip archive holding exactly one entry: the disk image.  The entry
//! name rides along on rewrite, and its extension feeds the inner format
//! probe.

use std::io::{Cursor,Read,Write};
use log::{debug,info,warn};
use zip::write::FileOptions;
use crate::gfd::{self,FdRef,BufferFd,Whence};
use crate::{DYNERR,STDRESULT,Error};
use super::{OuterFormat,OuterWrapper};

const ZIP_MAGIC: [u8;4] = [0x50,0x4b,0x03,0x04];

/// Header-only check; no decompression happens here.
pub fn test(gfd: &FdRef,len: u64) -> bool {
    if len < 22 {
        return false;
    }
    let mut header: [u8;4] = [0;4];
    if gfd::read_at(gfd,0,&mut header).is_err() {
        return false;
    }
    header==ZIP_MAGIC
}

pub struct OuterZip {
    max_len: u64,
    entry_name: Option<String>,
    outer_stem: Option<String>,
    damaged: bool
}

impl OuterZip {
    pub fn new(max_len: u64) -> Self {
        Self { max_len, entry_name: None, outer_stem: None, damaged: false }
    }
}

impl OuterWrapper for OuterZip {
    fn kind(&self) -> OuterFormat {
        OuterFormat::Zip
    }
    fn load(&mut self,src: &FdRef,outer_len: u64,_read_only: bool) -> Result<(FdRef,u64),DYNERR> {
        if outer_len > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        let compressed = gfd::read_whole(src)?;
        let mut archive = match zip::ZipArchive::new(Cursor::new(compressed)) {
            Ok(a) => a,
            Err(e) => {
                debug!("zip open failed: {}",e);
                return Err(Box::new(Error::BadArchiveStruct));
            }
        };
        if archive.len() != 1 {
            info!("zip archive has {} entries, need exactly 1",archive.len());
            return Err(Box::new(Error::BadArchiveStruct));
        }
        let mut entry = archive.by_index(0)?;
        if entry.size() > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        self.entry_name = Some(entry.name().to_string());
        info!("zip entry '{}'",entry.name());
        let mut unpacked: Vec<u8> = Vec::new();
        match entry.read_to_end(&mut unpacked) {
            Ok(_n) => {},
            Err(e) => {
                warn!("zip expansion failed ({}), keeping {} bytes",e,unpacked.len());
                self.damaged = true;
            }
        }
        if unpacked.len()==0 {
            return Err(Box::new(Error::BadCompressedData));
        }
        let inner_len = unpacked.len() as u64;
        debug!("zip expanded {} -> {}",outer_len,inner_len);
        Ok((gfd::new_ref(BufferFd::new(unpacked,true,false)),inner_len))
    }
    fn save(&mut self,dst: &FdRef,inner: &FdRef,inner_len: u64) -> STDRESULT {
        let mut unpacked = vec![0;inner_len as usize];
        gfd::read_at(inner,0,&mut unpacked)?;
        let name = match (&self.entry_name,&self.outer_stem) {
            (Some(n),_) => n.clone(),
            (None,Some(s)) => s.clone(),
            _ => "disk".to_string()
        };
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(name,FileOptions::default())?;
        writer.write_all(&unpacked)?;
        let packed = writer.finish()?.into_inner();
        let mut dst = dst.borrow_mut();
        dst.truncate(0)?;
        dst.seek(0,Whence::Set)?;
        dst.write(&packed)?;
        Ok(())
    }
    fn is_damaged(&self) -> bool {
        self.damaged
    }
    fn get_extension(&self) -> Option<String> {
        match &self.entry_name {
            Some(name) => name.rsplit_once('.').map(|(_s,e)| e.to_lowercase()),
            None => None
        }
    }
    fn set_outer_name(&mut self,stem: &str) {
        self.outer_stem = Some(stem.to_string());
    }
}
