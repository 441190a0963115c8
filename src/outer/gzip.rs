//! ## gzip outer wrapper
//!
//! A single-member gzip stream.  The stored original name, if present, is
//! preserved across a rewrite; the mtime field is refreshed on save.

use std::io::{Read,Write};
use flate2::read::GzDecoder;
use flate2::{GzBuilder,Compression};
use log::{debug,info,warn};
use crate::gfd::{self,FdRef,BufferFd,Whence};
use crate::{DYNERR,STDRESULT,Error};
use super::{OuterFormat,OuterWrapper};

const GZIP_MAGIC: [u8;2] = [0x1f,0x8b];
const METHOD_DEFLATE: u8 = 8;

/// Header-only check; no decompression happens here.
pub fn test(gfd: &FdRef,len: u64) -> bool {
    if len < 18 {
        return false;
    }
    let mut header: [u8;3] = [0;3];
    if gfd::read_at(gfd,0,&mut header).is_err() {
        return false;
    }
    header[0..2]==GZIP_MAGIC && header[2]==METHOD_DEFLATE
}

pub struct OuterGzip {
    max_len: u64,
    stored_name: Option<String>,
    outer_stem: Option<String>,
    damaged: bool
}

impl OuterGzip {
    pub fn new(max_len: u64) -> Self {
        Self { max_len, stored_name: None, outer_stem: None, damaged: false }
    }
}

impl OuterWrapper for OuterGzip {
    fn kind(&self) -> OuterFormat {
        OuterFormat::Gzip
    }
    fn load(&mut self,src: &FdRef,outer_len: u64,_read_only: bool) -> Result<(FdRef,u64),DYNERR> {
        if outer_len > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        let compressed = gfd::read_whole(src)?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        if let Some(header) = decoder.header() {
            if let Some(name) = header.filename() {
                let name = String::from_utf8_lossy(name).to_string();
                info!("gzip member name '{}'",name);
                self.stored_name = Some(name);
            }
        }
        let mut unpacked: Vec<u8> = Vec::new();
        match decoder.take(self.max_len + 1).read_to_end(&mut unpacked) {
            Ok(_n) => {},
            Err(e) => {
                // keep whatever came out; the image layer will go read-only
                warn!("gzip expansion failed ({}), keeping {} bytes",e,unpacked.len());
                self.damaged = true;
            }
        }
        if unpacked.len() as u64 > self.max_len {
            return Err(Box::new(Error::TooBig));
        }
        if unpacked.len()==0 {
            return Err(Box::new(Error::BadCompressedData));
        }
        let inner_len = unpacked.len() as u64;
        debug!("gzip expanded {} -> {}",outer_len,inner_len);
        Ok((gfd::new_ref(BufferFd::new(unpacked,true,false)),inner_len))
    }
    fn save(&mut self,dst: &FdRef,inner: &FdRef,inner_len: u64) -> STDRESULT {
        let mut unpacked = vec![0;inner_len as usize];
        gfd::read_at(inner,0,&mut unpacked)?;
        let mut builder = GzBuilder::new()
            .mtime(chrono::Utc::now().timestamp() as u32);
        let name = match (&self.stored_name,&self.outer_stem) {
            (Some(n),_) => Some(n.clone()),
            (None,Some(s)) => Some(s.clone()),
            _ => None
        };
        if let Some(n) = name {
            builder = builder.filename(n.as_bytes());
        }
        let mut encoder = builder.write(Vec::new(),Compression::default());
        encoder.write_all(&unpacked)?;
        let packed = encoder.finish()?;
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
        // the inner hint comes from stripping ".gz" off the outer name,
        // which the caller handles; a stored member name is rare enough
        // that we only use it when present
        match &self.stored_name {
            Some(name) => name.rsplit_once('.').map(|(_s,e)| e.to_lowercase()),
            None => None
        }
    }
    fn set_outer_name(&mut self,stem: &str) {
        self.outer_stem = Some(stem.to_string());
    }
}
