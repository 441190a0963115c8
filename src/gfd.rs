//! ## Generic file descriptors
//!
//! Every layer of a disk image stack is addressed through the `GenericFd`
//! trait: a seekable byte stream that can be a host file, a memory buffer,
//! a window into another stream, or a raw host volume.  Reads have exact
//! semantics; a request that cannot be filled completely fails with
//! `DataUnderrun` and the stream position is unspecified afterwards.
//!
//! Streams are shared between layers with `FdRef` (`Rc<RefCell<..>>`).
//! A `SubFd` window holds a clone of its parent's handle, so the parent
//! stream cannot be dropped while any window onto it is alive.

use std::cell::RefCell;
use std::io::{Read,Write,Seek,SeekFrom};
use std::rc::Rc;
use log::{debug,error};
use crate::{DYNERR,STDRESULT,Error};

/// origin for `GenericFd::seek`
#[derive(PartialEq,Eq,Clone,Copy)]
pub enum Whence {
    Set,
    Cur,
    End
}

pub type FdRef = Rc<RefCell<dyn GenericFd>>;

pub trait GenericFd {
    /// Move the stream position, returning the new absolute position.
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR>;
    /// Current absolute position.
    fn tell(&self) -> u64;
    /// Fill `buf` exactly; a short read fails with `DataUnderrun`.
    fn read(&mut self,buf: &mut [u8]) -> STDRESULT;
    /// Write all of `buf` at the current position.  Whether the stream can
    /// grow depends on the implementation.
    fn write(&mut self,buf: &[u8]) -> STDRESULT;
    /// Cut the stream down to `len` bytes.  Not every stream supports this.
    fn truncate(&mut self,len: u64) -> STDRESULT;
    fn flush(&mut self) -> STDRESULT;
    fn close(&mut self) -> STDRESULT;
    fn len(&self) -> Result<u64,DYNERR>;
    fn is_read_only(&self) -> bool;
}

/// Wrap a concrete descriptor in the shared handle type.
pub fn new_ref<T: GenericFd + 'static>(fd: T) -> FdRef {
    Rc::new(RefCell::new(fd))
}

/// seek + read in one call
pub fn read_at(fd: &FdRef,offset: u64,buf: &mut [u8]) -> STDRESULT {
    let mut fd = fd.borrow_mut();
    fd.seek(offset as i64,Whence::Set)?;
    fd.read(buf)
}

/// seek + write in one call
pub fn write_at(fd: &FdRef,offset: u64,buf: &[u8]) -> STDRESULT {
    let mut fd = fd.borrow_mut();
    fd.seek(offset as i64,Whence::Set)?;
    fd.write(buf)
}

/// Read the entire stream into a vector, from the beginning.
pub fn read_whole(fd: &FdRef) -> Result<Vec<u8>,DYNERR> {
    let len = fd.borrow().len()?;
    let mut buf = vec![0;len as usize];
    read_at(fd,0,&mut buf)?;
    Ok(buf)
}

fn resolve_seek(pos: u64,end: u64,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => pos as i64,
        Whence::End => end as i64
    };
    match base.checked_add(offset) {
        Some(p) if p >= 0 => Ok(p as u64),
        _ => Err(Box::new(Error::InvalidArg))
    }
}

/// Host file stream.  Grows implicitly when written past the end.
pub struct FileFd {
    file: std::fs::File,
    read_only: bool,
    pos: u64
}

impl FileFd {
    pub fn open(path: &str,read_only: bool) -> Result<Self,DYNERR> {
        let file = match std::fs::OpenOptions::new().read(true).write(!read_only).open(path) {
            Ok(f) => f,
            Err(e) if e.kind()==std::io::ErrorKind::NotFound => {
                debug!("could not open {}",path);
                return Err(Box::new(Error::FileNotFound));
            },
            Err(e) if e.kind()==std::io::ErrorKind::PermissionDenied => return Err(Box::new(Error::AccessDenied)),
            Err(e) => return Err(Box::new(e))
        };
        Ok(Self { file, read_only, pos: 0 })
    }
    /// Create the file; it must not already exist.
    pub fn create(path: &str) -> Result<Self,DYNERR> {
        let file = match std::fs::OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind()==std::io::ErrorKind::AlreadyExists => return Err(Box::new(Error::FileExists)),
            Err(e) => return Err(Box::new(e))
        };
        Ok(Self { file, read_only: false, pos: 0 })
    }
}

impl GenericFd for FileFd {
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        let end = self.len()?;
        let new_pos = resolve_seek(self.pos,end,offset,whence)?;
        self.file.seek(SeekFrom::Start(new_pos))?;
        self.pos = new_pos;
        Ok(new_pos)
    }
    fn tell(&self) -> u64 {
        self.pos
    }
    fn read(&mut self,buf: &mut [u8]) -> STDRESULT {
        self.file.seek(SeekFrom::Start(self.pos))?;
        match self.file.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            },
            Err(e) if e.kind()==std::io::ErrorKind::UnexpectedEof => Err(Box::new(Error::DataUnderrun)),
            Err(e) => {
                error!("host read failed: {}",e);
                Err(Box::new(Error::ReadFailed))
            }
        }
    }
    fn write(&mut self,buf: &[u8]) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        self.file.seek(SeekFrom::Start(self.pos))?;
        match self.file.write_all(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            },
            Err(e) => {
                error!("host write failed: {}",e);
                Err(Box::new(Error::WriteFailed))
            }
        }
    }
    fn truncate(&mut self,len: u64) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        self.file.set_len(len)?;
        if self.pos > len {
            self.pos = len;
        }
        Ok(())
    }
    fn flush(&mut self) -> STDRESULT {
        self.file.flush()?;
        Ok(())
    }
    fn close(&mut self) -> STDRESULT {
        self.flush()
    }
    fn len(&self) -> Result<u64,DYNERR> {
        Ok(self.file.metadata()?.len())
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Memory-backed stream.  With `growable` set, writes past the end extend
/// the buffer; otherwise they fail with `DataOverrun`.
pub struct BufferFd {
    buf: Vec<u8>,
    pos: u64,
    growable: bool,
    read_only: bool
}

impl BufferFd {
    pub fn new(buf: Vec<u8>,growable: bool,read_only: bool) -> Self {
        Self { buf, pos: 0, growable, read_only }
    }
    /// growable scratch buffer with a size hint
    pub fn growable(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity), pos: 0, growable: true, read_only: false }
    }
    /// Give up the underlying storage; the descriptor is spent afterwards.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl GenericFd for BufferFd {
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        self.pos = resolve_seek(self.pos,self.buf.len() as u64,offset,whence)?;
        Ok(self.pos)
    }
    fn tell(&self) -> u64 {
        self.pos
    }
    fn read(&mut self,buf: &mut [u8]) -> STDRESULT {
        let start = self.pos as usize;
        if start + buf.len() > self.buf.len() {
            debug!("buffer read {}+{} exceeds {}",start,buf.len(),self.buf.len());
            return Err(Box::new(Error::DataUnderrun));
        }
        buf.copy_from_slice(&self.buf[start..start+buf.len()]);
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn write(&mut self,buf: &[u8]) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        let start = self.pos as usize;
        if start + buf.len() > self.buf.len() {
            if !self.growable {
                debug!("buffer write {}+{} exceeds {}",start,buf.len(),self.buf.len());
                return Err(Box::new(Error::DataOverrun));
            }
            self.buf.resize(start + buf.len(),0);
        }
        self.buf[start..start+buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn truncate(&mut self,len: u64) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        self.buf.truncate(len as usize);
        if self.pos > len {
            self.pos = len;
        }
        Ok(())
    }
    fn flush(&mut self) -> STDRESULT {
        Ok(())
    }
    fn close(&mut self) -> STDRESULT {
        Ok(())
    }
    fn len(&self) -> Result<u64,DYNERR> {
        Ok(self.buf.len() as u64)
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// A fixed window into another stream.  The window never grows; writes that
/// would run past it fail with `DataOverrun`.  Holding the parent by `FdRef`
/// keeps the parent stream alive for the life of the window.
pub struct SubFd {
    parent: FdRef,
    start: u64,
    length: u64,
    pos: u64,
    read_only: bool
}

impl SubFd {
    pub fn new(parent: &FdRef,start: u64,length: u64,read_only: bool) -> Self {
        Self { parent: Rc::clone(parent), start, length, pos: 0, read_only }
    }
}

impl GenericFd for SubFd {
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        self.pos = resolve_seek(self.pos,self.length,offset,whence)?;
        Ok(self.pos)
    }
    fn tell(&self) -> u64 {
        self.pos
    }
    fn read(&mut self,buf: &mut [u8]) -> STDRESULT {
        if self.pos + buf.len() as u64 > self.length {
            return Err(Box::new(Error::DataUnderrun));
        }
        let mut parent = self.parent.borrow_mut();
        parent.seek((self.start + self.pos) as i64,Whence::Set)?;
        parent.read(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn write(&mut self,buf: &[u8]) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        if self.pos + buf.len() as u64 > self.length {
            debug!("write would extend past sub-window ({}+{} > {})",self.pos,buf.len(),self.length);
            return Err(Box::new(Error::DataOverrun));
        }
        let mut parent = self.parent.borrow_mut();
        parent.seek((self.start + self.pos) as i64,Whence::Set)?;
        parent.write(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn truncate(&mut self,_len: u64) -> STDRESULT {
        Err(Box::new(Error::UnsupportedAccess))
    }
    fn flush(&mut self) -> STDRESULT {
        self.parent.borrow_mut().flush()
    }
    fn close(&mut self) -> STDRESULT {
        // the parent remains open; it is closed by its own layer
        Ok(())
    }
    fn len(&self) -> Result<u64,DYNERR> {
        Ok(self.length)
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Raw host volume access.  All device I/O happens in aligned 512-byte
/// sectors; a one-sector cache services unaligned callers.  Opening device
/// 0 for writing requires the explicit opt-in in `ImgConfig`.
pub struct VolumeFd {
    file: std::fs::File,
    read_only: bool,
    pos: u64,
    total_len: u64,
    cache: [u8;512],
    cached_sector: Option<u64>,
    cache_dirty: bool
}

impl VolumeFd {
    pub fn open(device_path: &str,read_only: bool,allow_write_phys0: bool) -> Result<Self,DYNERR> {
        if !read_only && !allow_write_phys0 && device_path.ends_with('0') {
            error!("write access to physical drive 0 is forbidden");
            return Err(Box::new(Error::WriteProtected));
        }
        let file = std::fs::OpenOptions::new().read(true).write(!read_only).open(device_path)?;
        let total_len = file.metadata()?.len();
        Ok(Self { file, read_only, pos: 0, total_len, cache: [0;512], cached_sector: None, cache_dirty: false })
    }
    fn load_sector(&mut self,sector: u64) -> STDRESULT {
        if self.cached_sector==Some(sector) {
            return Ok(());
        }
        self.push_cache()?;
        self.file.seek(SeekFrom::Start(sector*512))?;
        self.file.read_exact(&mut self.cache)?;
        self.cached_sector = Some(sector);
        Ok(())
    }
    fn push_cache(&mut self) -> STDRESULT {
        if self.cache_dirty {
            let sector = match self.cached_sector {
                Some(s) => s,
                None => return Err(Box::new(Error::Internal))
            };
            self.file.seek(SeekFrom::Start(sector*512))?;
            self.file.write_all(&self.cache)?;
            self.cache_dirty = false;
        }
        Ok(())
    }
}

impl GenericFd for VolumeFd {
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        self.pos = resolve_seek(self.pos,self.total_len,offset,whence)?;
        Ok(self.pos)
    }
    fn tell(&self) -> u64 {
        self.pos
    }
    fn read(&mut self,buf: &mut [u8]) -> STDRESULT {
        if self.pos + buf.len() as u64 > self.total_len {
            return Err(Box::new(Error::DataUnderrun));
        }
        let mut done = 0;
        while done < buf.len() {
            let sector = (self.pos + done as u64) / 512;
            let in_sec = ((self.pos + done as u64) % 512) as usize;
            let n = std::cmp::min(512 - in_sec,buf.len() - done);
            self.load_sector(sector)?;
            buf[done..done+n].copy_from_slice(&self.cache[in_sec..in_sec+n]);
            done += n;
        }
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn write(&mut self,buf: &[u8]) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        if self.pos + buf.len() as u64 > self.total_len {
            return Err(Box::new(Error::DataOverrun));
        }
        let mut done = 0;
        while done < buf.len() {
            let sector = (self.pos + done as u64) / 512;
            let in_sec = ((self.pos + done as u64) % 512) as usize;
            let n = std::cmp::min(512 - in_sec,buf.len() - done);
            self.load_sector(sector)?;
            self.cache[in_sec..in_sec+n].copy_from_slice(&buf[done..done+n]);
            self.cache_dirty = true;
            done += n;
        }
        self.pos += buf.len() as u64;
        Ok(())
    }
    fn truncate(&mut self,_len: u64) -> STDRESULT {
        Err(Box::new(Error::UnsupportedAccess))
    }
    fn flush(&mut self) -> STDRESULT {
        self.push_cache()?;
        self.file.flush()?;
        Ok(())
    }
    fn close(&mut self) -> STDRESULT {
        self.flush()
    }
    fn len(&self) -> Result<u64,DYNERR> {
        Ok(self.total_len)
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind;

    #[test]
    fn buffer_grow_and_fixed() {
        let mut growable = BufferFd::growable(16);
        growable.write(&[1,2,3,4]).expect("write failed");
        assert_eq!(growable.len().unwrap(),4);
        let mut fixed = BufferFd::new(vec![0;4],false,false);
        fixed.seek(2,Whence::Set).unwrap();
        let err = fixed.write(&[9,9,9]).unwrap_err();
        assert_eq!(error_kind(&err),Some(Error::DataOverrun));
    }

    #[test]
    fn short_read_is_underrun() {
        let mut fd = BufferFd::new(vec![0;10],false,false);
        fd.seek(8,Whence::Set).unwrap();
        let mut buf = [0;4];
        let err = fd.read(&mut buf).unwrap_err();
        assert_eq!(error_kind(&err),Some(Error::DataUnderrun));
    }

    #[test]
    fn sub_window_bounds() {
        let parent = new_ref(BufferFd::new(vec![0xaa;100],false,false));
        let mut sub = SubFd::new(&parent,10,20,false);
        let mut buf = [0;20];
        sub.read(&mut buf).expect("read failed");
        assert_eq!(buf,[0xaa;20]);
        sub.seek(0,Whence::Set).unwrap();
        sub.write(&[0x55;20]).expect("write failed");
        // window never extends
        let err = sub.write(&[0]).unwrap_err();
        assert_eq!(error_kind(&err),Some(Error::DataOverrun));
        // parent sees the window contents at the right spot
        let mut check = [0;1];
        read_at(&parent,9,&mut check).unwrap();
        assert_eq!(check[0],0xaa);
        read_at(&parent,10,&mut check).unwrap();
        assert_eq!(check[0],0x55);
        read_at(&parent,30,&mut check).unwrap();
        assert_eq!(check[0],0xaa);
    }

    #[test]
    fn seek_whence() {
        let mut fd = BufferFd::new(vec![0;100],false,false);
        assert_eq!(fd.seek(10,Whence::Set).unwrap(),10);
        assert_eq!(fd.seek(5,Whence::Cur).unwrap(),15);
        assert_eq!(fd.seek(-10,Whence::End).unwrap(),90);
        assert!(fd.seek(-200,Whence::Cur).is_err());
    }
}
