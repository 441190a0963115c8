//! ## The disk image facade
//!
//! `DiskImg` assembles the layer stack (outer compression, file wrapper,
//! raw data), runs format detection, and exposes the block, track/sector,
//! and nibble I/O everything else consumes.  One instance handles one
//! image; open exactly once, close when done.  Sub-volume instances window
//! a parent's data and push their dirty state back up the chain.
//!
//! Nothing here is thread-safe; an image and its sub-volumes belong to a
//! single thread.

use std::cell::RefCell;
use std::rc::{Rc,Weak};
use bit_vec::BitVec;
use log::{debug,info,warn,error};
use crate::gfd::{self,FdRef,FileFd,BufferFd,SubFd};
use crate::skew::{self,SectorOrder};
use crate::nibble::{self,NibbleDescr};
use crate::outer::{OuterFormat,OuterWrapper};
use crate::outer::gzip as ogzip;
use crate::outer::zip as ozip;
use crate::wrap::{self,FileFormat,ImageWrapper,Verdict};
use crate::fsprobe::{self,FsFormat,FsTester,FsFormatter,Leniency};
use crate::{DYNERR,STDRESULT,Error,SECTOR_SIZE,BLOCK_SIZE,TRACK_COUNT_525};

/// How the raw bytes under the wrapper are encoded.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum PhysicalFormat {
    Unknown,
    Sectors,
    /// 35 nibble tracks of 6656 bytes
    Nib6656,
    /// 35 nibble tracks of 6384 bytes
    Nib6384,
    /// variable-length nibble tracks (TrackStar, FDI)
    NibVar
}

impl PhysicalFormat {
    pub fn is_sectors(&self) -> bool {
        *self==Self::Sectors
    }
    pub fn is_nibbles(&self) -> bool {
        matches!(self,Self::Nib6656 | Self::Nib6384 | Self::NibVar)
    }
}

impl std::fmt::Display for PhysicalFormat {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f,"Unknown format"),
            Self::Sectors => write!(f,"Sectors"),
            Self::Nib6656 => write!(f,"Raw nibbles (6656-byte)"),
            Self::Nib6384 => write!(f,"Raw nibbles (6384-byte)"),
            Self::NibVar => write!(f,"Raw nibbles (variable len)")
        }
    }
}

#[derive(PartialEq,Eq,Clone,Copy)]
pub enum FlushMode {
    All,
    /// only flush when every layer can do it cheaply; used to keep files
    /// in a sane state without paying for recompression on every save
    FastOnly
}

#[derive(PartialEq,Eq,Clone,Copy)]
pub enum NoteSeverity {
    Info,
    Warning
}

/// Per-image policy that replaces the original library's process globals.
#[derive(Clone,Copy)]
pub struct ImgConfig {
    /// allow opening host physical drive 0 for writing
    pub allow_write_phys_drive0: bool,
    /// ceiling for in-memory expansion of compressed layers
    pub max_unwrapped_len: u64,
    /// compression applied to NuFX disk threads on flush
    pub nufx_compression: wrap::nufx::ThreadFormat
}

impl Default for ImgConfig {
    fn default() -> Self {
        Self {
            allow_write_phys_drive0: false,
            max_unwrapped_len: 64*1024*1024,
            nufx_compression: wrap::nufx::ThreadFormat::Lzw2
        }
    }
}

#[derive(Clone)]
pub enum CreateGeometry {
    Blocks(u64),
    TrackSectors(usize,usize)
}

/// Everything `create_file` needs to know.
#[derive(Clone)]
pub struct CreateParams {
    pub outer: OuterFormat,
    pub file_format: FileFormat,
    pub physical: PhysicalFormat,
    pub order: SectorOrder,
    /// must be one of the generic orderings; run a real formatter after
    pub fs_format: FsFormat,
    pub geometry: CreateGeometry,
    pub dos_volume: Option<u8>,
    pub nibble_descr: Option<NibbleDescr>,
    pub storage_name: Option<String>,
    /// write only the final sector, leaving the rest sparse
    pub skip_format: bool
}

impl CreateParams {
    /// plain unadorned sector image, the most common case
    pub fn unadorned(order: SectorOrder,geometry: CreateGeometry) -> Self {
        Self {
            outer: OuterFormat::None,
            file_format: FileFormat::Unadorned,
            physical: PhysicalFormat::Sectors,
            order,
            fs_format: match order {
                SectorOrder::DOS => FsFormat::GenericDosOrd,
                SectorOrder::CPM => FsFormat::GenericCpmOrd,
                SectorOrder::Physical => FsFormat::GenericPhysicalOrd,
                _ => FsFormat::GenericProDosOrd
            },
            geometry,
            dos_volume: None,
            nibble_descr: None,
            storage_name: None,
            skip_format: false
        }
    }
}

pub type ScanProgressCallback = Rc<dyn Fn(&str,usize) -> bool>;

const DEFAULT_NIBBLE_VOLUME: u8 = 254;

impl std::fmt::Debug for DiskImg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImg").finish()
    }
}

pub struct DiskImg {
    cfg: ImgConfig,
    // the layer stack
    outer_fd: Option<FdRef>,
    wrapper_fd: Option<FdRef>,
    data_fd: Option<FdRef>,
    outer_wrapper: Option<Box<dyn OuterWrapper>>,
    image_wrapper: Option<Box<dyn ImageWrapper>>,
    // classification
    outer_format: OuterFormat,
    file_format: Option<FileFormat>,
    physical: PhysicalFormat,
    order: SectorOrder,
    fs_format: FsFormat,
    file_sys_order: SectorOrder,
    // geometry
    num_tracks: usize,
    num_sect_per_track: usize,
    num_blocks: u64,
    has_sectors: bool,
    has_blocks: bool,
    has_nibbles: bool,
    // lengths at each layer
    outer_length: u64,
    wrapped_length: u64,
    length: u64,
    // policy
    read_only: bool,
    dirty: bool,
    expandable: bool,
    dos_volume_num: Option<u8>,
    pair_offset: Option<usize>,
    // nibble state
    nibble_descr_table: Vec<NibbleDescr>,
    nibble_descr: Option<usize>,
    nibble_track_buf: Vec<u8>,
    nibble_track_loaded: Option<usize>,
    nibble_track_dirty: bool,
    // hierarchy
    parent: Option<Weak<RefCell<DiskImg>>>,
    diskfs_ref_cnt: u32,
    // diagnostics
    notes: String,
    bad_block_map: Option<BitVec>,
    // hooks
    testers: Vec<Box<dyn FsTester>>,
    formatter: Option<Rc<dyn FsFormatter>>,
    scan_progress: Option<ScanProgressCallback>,
    scan_count: usize
}

impl DiskImg {
    pub fn new() -> Self {
        Self::with_config(ImgConfig::default())
    }
    pub fn with_config(cfg: ImgConfig) -> Self {
        Self {
            cfg,
            outer_fd: None,
            wrapper_fd: None,
            data_fd: None,
            outer_wrapper: None,
            image_wrapper: None,
            outer_format: OuterFormat::None,
            file_format: None,
            physical: PhysicalFormat::Unknown,
            order: SectorOrder::Unknown,
            fs_format: FsFormat::Unknown,
            file_sys_order: SectorOrder::Unknown,
            num_tracks: 0,
            num_sect_per_track: 0,
            num_blocks: 0,
            has_sectors: false,
            has_blocks: false,
            has_nibbles: false,
            outer_length: 0,
            wrapped_length: 0,
            length: 0,
            read_only: true,
            dirty: false,
            expandable: false,
            dos_volume_num: None,
            pair_offset: None,
            nibble_descr_table: nibble::std_nibble_descrs(),
            nibble_descr: None,
            nibble_track_buf: Vec::new(),
            nibble_track_loaded: None,
            nibble_track_dirty: false,
            parent: None,
            diskfs_ref_cnt: 0,
            notes: String::new(),
            bad_block_map: None,
            testers: fsprobe::standard_testers(),
            formatter: None,
            scan_progress: None,
            scan_count: 0
        }
    }

    // ---- getters ----

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }
    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }
    pub fn num_sect_per_track(&self) -> usize {
        self.num_sect_per_track
    }
    pub fn has_sectors(&self) -> bool {
        self.has_sectors
    }
    pub fn has_blocks(&self) -> bool {
        self.has_blocks
    }
    pub fn has_nibbles(&self) -> bool {
        self.has_nibbles
    }
    pub fn length(&self) -> u64 {
        self.length
    }
    pub fn outer_format(&self) -> OuterFormat {
        self.outer_format
    }
    pub fn file_format(&self) -> Option<FileFormat> {
        self.file_format
    }
    pub fn physical(&self) -> PhysicalFormat {
        self.physical
    }
    pub fn order(&self) -> SectorOrder {
        self.order
    }
    pub fn file_sys_order(&self) -> SectorOrder {
        self.file_sys_order
    }
    pub fn fs_format(&self) -> FsFormat {
        self.fs_format
    }
    pub fn read_only(&self) -> bool {
        self.read_only
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn is_expandable(&self) -> bool {
        self.expandable
    }
    pub fn dos_volume_num(&self) -> Option<u8> {
        self.dos_volume_num
    }
    /// will clients usually want block addressing here?
    pub fn shows_as_blocks(&self) -> bool {
        self.has_blocks && fsprobe::shows_as_blocks(self.fs_format,self.order)
    }
    pub fn is_open(&self) -> bool {
        self.data_fd.is_some()
    }

    // ---- hooks and bookkeeping ----

    /// Register a tester ahead of the built-in chain; the file system
    /// layer uses this for the partition formats it owns.
    pub fn add_fs_tester(&mut self,tester: Box<dyn FsTester>) {
        self.testers.insert(0,tester);
    }
    pub fn set_fs_formatter(&mut self,formatter: Rc<dyn FsFormatter>) {
        self.formatter = Some(formatter);
    }
    /// A filesystem client announces itself; close refuses to proceed
    /// while any remain.
    pub fn diskfs_add_ref(&mut self) {
        self.diskfs_ref_cnt += 1;
    }
    pub fn diskfs_release(&mut self) {
        debug_assert!(self.diskfs_ref_cnt > 0);
        if self.diskfs_ref_cnt > 0 {
            self.diskfs_ref_cnt -= 1;
        }
    }
    pub fn add_note(&mut self,severity: NoteSeverity,text: &str) {
        let prefix = match severity {
            NoteSeverity::Warning => "- WARNING: ",
            _ => "- "
        };
        self.notes += prefix;
        self.notes += text;
        if !text.ends_with('\n') {
            self.notes += "\n";
        }
        debug!("note added: {}",text);
    }
    pub fn get_notes(&self) -> &str {
        &self.notes
    }
    pub fn set_bad_block(&mut self,block: u64) {
        if self.bad_block_map.is_none() {
            self.bad_block_map = Some(BitVec::from_elem(self.num_blocks as usize,false));
        }
        if let Some(map) = &mut self.bad_block_map {
            if (block as usize) < map.len() {
                map.set(block as usize,true);
            }
        }
    }
    fn check_for_bad_blocks(&self,start: u64,count: u64) -> bool {
        match &self.bad_block_map {
            Some(map) => (start..start+count).any(|b| map.get(b as usize)==Some(true)),
            None => false
        }
    }
    pub fn set_scan_progress_callback(&mut self,cb: Option<ScanProgressCallback>) {
        self.scan_progress = cb;
        self.scan_count = 0;
    }
    /// Report progress, searching up the parent chain for a callback.
    /// Returns false when the user asked to cancel.
    pub fn update_scan_progress(&mut self,msg: Option<&str>) -> bool {
        match msg {
            Some(_) => self.scan_count = 0,
            None => self.scan_count += 1
        }
        let count = self.scan_count;
        if let Some(cb) = &self.scan_progress {
            return cb(msg.unwrap_or(""),count);
        }
        let mut p = self.parent.clone();
        while let Some(weak) = p {
            match weak.upgrade() {
                Some(rc) => {
                    let img = rc.borrow();
                    if let Some(cb) = &img.scan_progress {
                        return cb(msg.unwrap_or(""),count);
                    }
                    p = img.parent.clone();
                },
                None => break
            }
        }
        true
    }

    /// Replace the custom slot of this image's descriptor table and make
    /// it the active profile.
    pub fn set_custom_nibble_descr(&mut self,descr: Option<NibbleDescr>) {
        match descr {
            Some(d) => {
                self.nibble_descr_table[nibble::DESCR_CUSTOM] = d;
                self.nibble_descr = Some(nibble::DESCR_CUSTOM);
            },
            None => self.nibble_descr = None
        }
    }
    /// Select one of the table's profiles by index.
    pub fn set_nibble_descr(&mut self,idx: usize) -> STDRESULT {
        if idx >= self.nibble_descr_table.len() {
            return Err(Box::new(Error::InvalidIndex));
        }
        self.nibble_descr = Some(idx);
        Ok(())
    }
    pub fn nibble_descr_name(&self) -> Option<String> {
        self.nibble_descr.map(|i| self.nibble_descr_table[i].name.clone())
    }

    /// Enable or disable sector pairing (the OzDOS layout).  Pairing sees
    /// the image as half as many tracks, each shared by two volumes.
    pub fn set_sector_pairing(&mut self,offset: Option<usize>) -> STDRESULT {
        match offset {
            Some(i) if i > 1 => Err(Box::new(Error::InvalidArg)),
            Some(i) => {
                if !self.has_sectors || self.num_sect_per_track % 16 != 0 {
                    return Err(Box::new(Error::UnsupportedAccess));
                }
                if self.num_tracks % 2 != 0 || self.num_blocks % 2 != 0 {
                    info!("sector pairing needs even geometry");
                    return Err(Box::new(Error::OddLength));
                }
                if self.pair_offset.is_none() {
                    self.num_tracks /= 2;
                    self.num_blocks /= 2;
                }
                self.pair_offset = Some(i);
                Ok(())
            },
            None => {
                if self.pair_offset.is_some() {
                    self.num_tracks *= 2;
                    self.num_blocks *= 2;
                    self.pair_offset = None;
                }
                Ok(())
            }
        }
    }

    // ---- opening ----

    pub fn open_file(&mut self,path: &str,read_only: bool) -> STDRESULT {
        if self.data_fd.is_some() {
            info!("image is already open");
            return Err(Box::new(Error::AlreadyOpen));
        }
        debug!("open '{}' ro={}",path,read_only);
        self.read_only = read_only;
        let file = FileFd::open(path,read_only)?;
        self.wrapper_fd = Some(gfd::new_ref(file));
        match self.analyze_image_file(path) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    pub fn open_buffer(&mut self,buf: Vec<u8>,read_only: bool) -> STDRESULT {
        if self.data_fd.is_some() {
            info!("image is already open");
            return Err(Box::new(Error::AlreadyOpen));
        }
        debug!("open buffer of {} bytes ro={}",buf.len(),read_only);
        self.read_only = read_only;
        self.wrapper_fd = Some(gfd::new_ref(BufferFd::new(buf,false,read_only)));
        match self.analyze_image_file("") {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Open a host block device (a mounted card reader, say).  Device I/O
    /// is aligned 512-byte sectors under the hood; writing to drive 0
    /// requires the explicit opt-in in `ImgConfig`.
    pub fn open_host_volume(&mut self,device_path: &str,read_only: bool) -> STDRESULT {
        if self.data_fd.is_some() {
            return Err(Box::new(Error::AlreadyOpen));
        }
        debug!("open host volume '{}' ro={}",device_path,read_only);
        self.read_only = read_only;
        let vol = gfd::VolumeFd::open(device_path,read_only,self.cfg.allow_write_phys_drive0)?;
        self.wrapper_fd = Some(gfd::new_ref(vol));
        // the synthetic extension routes detection straight to raw ProDOS
        match self.analyze_image_file("host.cp-win-vol") {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Open a block range of an already-open image as its own disk.  The
    /// child inherits read-only, physical format, and ordering, and keeps
    /// a back-reference for dirty propagation; the parent must outlive it.
    pub fn open_sub_block_range(parent: &Rc<RefCell<DiskImg>>,first_block: u64,num_blocks: u64) -> Result<DiskImg,DYNERR> {
        let p = parent.borrow();
        if !p.is_open() || num_blocks==0 || first_block + num_blocks > p.num_blocks {
            return Err(Box::new(Error::InvalidArg));
        }
        if !p.physical.is_sectors() {
            info!("sub-volumes of nibble images are not supported");
            return Err(Box::new(Error::UnsupportedAccess));
        }
        let parent_data = match &p.data_fd {
            Some(fd) => Rc::clone(fd),
            None => return Err(Box::new(Error::Internal))
        };
        let mut child = Self::with_config(p.cfg);
        child.read_only = p.read_only;
        child.physical = p.physical;
        child.order = p.order;
        child.file_format = Some(FileFormat::Unadorned);
        child.length = num_blocks * BLOCK_SIZE as u64;
        child.wrapped_length = child.length;
        child.outer_length = child.length;
        child.data_fd = Some(gfd::new_ref(SubFd::new(&parent_data,first_block * BLOCK_SIZE as u64,num_blocks * BLOCK_SIZE as u64,p.read_only)));
        child.has_blocks = true;
        child.num_blocks = num_blocks;
        if num_blocks % 8==0 {
            child.has_sectors = true;
            child.num_sect_per_track = 16;
            child.num_tracks = (num_blocks/8) as usize;
        }
        drop(p);
        child.parent = Some(Rc::downgrade(parent));
        child.analyze_image_fs();
        Ok(child)
    }

    /// Sector-granularity variant; only whole leading tracks can be
    /// windowed, so `first_sector` must be zero.
    pub fn open_sub_sector_range(parent: &Rc<RefCell<DiskImg>>,first_track: usize,first_sector: usize,num_sectors: usize) -> Result<DiskImg,DYNERR> {
        if first_sector != 0 {
            info!("sub-range must start on a track boundary");
            return Err(Box::new(Error::InvalidArg));
        }
        let p = parent.borrow();
        if !p.is_open() || !p.has_sectors || num_sectors==0 {
            return Err(Box::new(Error::InvalidArg));
        }
        let nspt = p.num_sect_per_track;
        if num_sectors % nspt != 0 || first_track + num_sectors/nspt > p.num_tracks {
            return Err(Box::new(Error::InvalidArg));
        }
        if !p.physical.is_sectors() {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        let parent_data = match &p.data_fd {
            Some(fd) => Rc::clone(fd),
            None => return Err(Box::new(Error::Internal))
        };
        let mut child = Self::with_config(p.cfg);
        child.read_only = p.read_only;
        child.physical = p.physical;
        child.order = p.order;
        child.file_format = Some(FileFormat::Unadorned);
        child.length = (num_sectors * SECTOR_SIZE) as u64;
        child.wrapped_length = child.length;
        child.outer_length = child.length;
        child.data_fd = Some(gfd::new_ref(SubFd::new(&parent_data,(first_track * nspt * SECTOR_SIZE) as u64,child.length,p.read_only)));
        child.has_sectors = true;
        child.num_sect_per_track = nspt;
        child.num_tracks = num_sectors/nspt;
        if nspt % 2==0 {
            child.has_blocks = true;
            child.num_blocks = (num_sectors/2) as u64;
        }
        drop(p);
        child.parent = Some(Rc::downgrade(parent));
        child.analyze_image_fs();
        Ok(child)
    }

    // ---- creation ----

    pub fn create_file(&mut self,path: &str,params: &CreateParams) -> STDRESULT {
        if self.data_fd.is_some() {
            return Err(Box::new(Error::AlreadyOpen));
        }
        self.read_only = false;
        self.outer_format = params.outer;
        self.file_format = Some(params.file_format);
        self.physical = params.physical;
        self.order = params.order;
        self.fs_format = params.fs_format;
        self.dos_volume_num = params.dos_volume;
        if let Some(descr) = &params.nibble_descr {
            self.set_custom_nibble_descr(Some(descr.clone()));
        }
        match params.geometry {
            CreateGeometry::Blocks(n) => {
                if n==0 {
                    return Err(Box::new(Error::InvalidCreateReq));
                }
                self.num_blocks = n;
                self.has_blocks = true;
                if n % 8==0 {
                    self.has_sectors = true;
                    self.num_sect_per_track = 16;
                    self.num_tracks = (n/8) as usize;
                } else {
                    info!("sector access to new image will not be possible");
                }
            },
            CreateGeometry::TrackSectors(tracks,sectors) => {
                if tracks==0 || sectors==0 {
                    return Err(Box::new(Error::InvalidCreateReq));
                }
                self.num_tracks = tracks;
                self.num_sect_per_track = sectors;
                self.has_sectors = true;
                if sectors % 2==0 {
                    self.has_blocks = true;
                    self.num_blocks = (tracks*sectors/2) as u64;
                } else {
                    info!("block access to new image will not be possible");
                }
            }
        }
        if self.has_sectors && !self.physical.is_sectors() {
            self.has_nibbles = true;
        }
        self.file_sys_order = fsprobe::fs_sector_order(self.fs_format,self.order);
        self.dirty = true;
        match self.create_common(path,params) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    fn create_common(&mut self,path: &str,params: &CreateParams) -> STDRESULT {
        self.validate_create_format(params)?;
        // compute the data layer length up front
        self.length = match self.physical {
            PhysicalFormat::Sectors => match self.has_blocks {
                true => self.num_blocks * BLOCK_SIZE as u64,
                false => (self.num_tracks * self.num_sect_per_track * SECTOR_SIZE) as u64
            },
            PhysicalFormat::Nib6656 => (self.num_tracks * nibble::TRACK_LEN_6656) as u64,
            PhysicalFormat::Nib6384 => (self.num_tracks * nibble::TRACK_LEN_6384) as u64,
            PhysicalFormat::NibVar => match params.file_format {
                FileFormat::TrackStar => (wrap::trackstar::NUM_TRACKS * wrap::trackstar::TRACK_ALLOC) as u64,
                _ => return Err(Box::new(Error::InvalidCreateReq))
            },
            PhysicalFormat::Unknown => return Err(Box::new(Error::InvalidCreateReq))
        };
        let file = gfd::new_ref(FileFd::create(path)?);
        if self.outer_format==OuterFormat::None {
            self.wrapper_fd = Some(file);
        } else {
            self.outer_fd = Some(file);
            self.wrapper_fd = Some(gfd::new_ref(BufferFd::growable(self.length as usize)));
            let stem = outer_stem(path);
            let mut ow: Box<dyn OuterWrapper> = match self.outer_format {
                OuterFormat::Gzip => Box::new(ogzip::OuterGzip::new(self.cfg.max_unwrapped_len)),
                OuterFormat::Zip => Box::new(ozip::OuterZip::new(self.cfg.max_unwrapped_len)),
                OuterFormat::None => return Err(Box::new(Error::Internal))
            };
            ow.set_outer_name(&stem);
            self.outer_wrapper = Some(ow);
        }
        let mut wrapper_obj = self.make_wrapper(params.file_format)?;
        if let Some(name) = &params.storage_name {
            wrapper_obj.set_storage_name(name);
        }
        let wrapper_fd = Rc::clone(self.wrapper_fd.as_ref().unwrap());
        let volume = self.dos_volume_num.unwrap_or(DEFAULT_NIBBLE_VOLUME);
        let (wrapped_len,data_fd) = wrapper_obj.create(self.length,self.physical,self.order,volume,&wrapper_fd)?;
        self.wrapped_length = wrapped_len;
        self.data_fd = Some(data_fd);
        self.image_wrapper = Some(wrapper_obj);
        if self.physical.is_sectors() {
            self.format_sectors(params.skip_format)?;
        } else {
            debug_assert!(!params.skip_format);
            if self.dos_volume_num.is_none() {
                debug!("using default nibble volume number");
                self.dos_volume_num = Some(DEFAULT_NIBBLE_VOLUME);
            }
            self.format_nibbles()?;
        }
        Ok(())
    }

    fn validate_create_format(&self,params: &CreateParams) -> STDRESULT {
        if self.has_blocks && self.num_blocks >= 4194304 && params.file_format != FileFormat::Unadorned {
            info!("images of 2GB or more must be unadorned");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        if self.physical==PhysicalFormat::Unknown || self.order==SectorOrder::Unknown {
            return Err(Box::new(Error::InvalidCreateReq));
        }
        match params.fs_format {
            FsFormat::GenericDosOrd | FsFormat::GenericProDosOrd |
            FsFormat::GenericPhysicalOrd | FsFormat::GenericCpmOrd => {},
            _ => {
                info!("create takes only the generic orderings; format the disk afterwards");
                return Err(Box::new(Error::InvalidCreateReq));
            }
        }
        if !self.physical.is_sectors() {
            if self.order != SectorOrder::Physical {
                info!("nibble images are always physical order");
                return Err(Box::new(Error::InvalidCreateReq));
            }
            if let Some(descr) = &params.nibble_descr {
                if descr.num_sectors != self.num_sect_per_track {
                    return Err(Box::new(Error::InvalidCreateReq));
                }
                let enc_ok = match descr.num_sectors {
                    13 => descr.encoding==nibble::Encoding::N53,
                    16 => descr.encoding==nibble::Encoding::N62,
                    _ => false
                };
                if !enc_ok {
                    info!("sector count and nibble encoding do not agree");
                    return Err(Box::new(Error::InvalidCreateReq));
                }
            }
            let track_ok = self.num_tracks==TRACK_COUNT_525 ||
                (self.num_tracks==wrap::trackstar::NUM_TRACKS && params.file_format==FileFormat::TrackStar);
            if !track_ok {
                info!("unexpected track count {}",self.num_tracks);
                return Err(Box::new(Error::InvalidCreateReq));
            }
        }
        if params.file_format==FileFormat::NuFx && self.outer_format != OuterFormat::None {
            info!("NuFX cannot take an outer wrapper");
            return Err(Box::new(Error::InvalidCreateReq));
        }
        if params.file_format==FileFormat::Fdi {
            return Err(Box::new(Error::UnsupportedFileFmt));
        }
        Ok(())
    }

    /// Zero the data layer, or with `quick` set just touch the final
    /// sector so the file gets its full extent.
    fn format_sectors(&mut self,quick: bool) -> STDRESULT {
        debug_assert!(self.length > 0 && self.length % SECTOR_SIZE as u64==0);
        let data_fd = Rc::clone(self.data_fd.as_ref().unwrap());
        let zeros = [0u8;SECTOR_SIZE];
        if quick {
            gfd::write_at(&data_fd,self.length - SECTOR_SIZE as u64,&zeros)?;
            return Ok(());
        }
        let mut offset: u64 = 0;
        while offset < self.length {
            gfd::write_at(&data_fd,offset,&zeros)?;
            offset += SECTOR_SIZE as u64;
            if !self.update_scan_progress(None) {
                return Err(Box::new(Error::Cancelled));
            }
        }
        Ok(())
    }

    /// Lay down formatted nibble tracks: address fields, empty data
    /// fields, sync gaps.
    fn format_nibbles(&mut self) -> STDRESULT {
        let descr = match self.active_descr_for_create() {
            Some(d) => d,
            None => return Err(Box::new(Error::InvalidCreateReq))
        };
        let volume = self.dos_volume_num.unwrap_or(DEFAULT_NIBBLE_VOLUME);
        let data_fd = Rc::clone(self.data_fd.as_ref().unwrap());
        for track in 0..self.num_tracks {
            let (trk_len,offset) = {
                let w = self.image_wrapper.as_ref().unwrap();
                (w.nibble_track_len(track),w.nibble_track_offset(track))
            };
            if trk_len==0 {
                continue;
            }
            let trk = nibble::format_track(&descr,volume,track,trk_len)?;
            gfd::write_at(&data_fd,offset,&trk)?;
        }
        // remember which profile formatted the disk
        for (idx,d) in self.nibble_descr_table.iter().enumerate() {
            if d.name==descr.name {
                self.nibble_descr = Some(idx);
                break;
            }
        }
        Ok(())
    }

    fn active_descr_for_create(&self) -> Option<NibbleDescr> {
        if let Some(idx) = self.nibble_descr {
            return Some(self.nibble_descr_table[idx].clone());
        }
        match self.num_sect_per_track {
            16 => Some(self.nibble_descr_table[0].clone()),
            13 => Some(self.nibble_descr_table[3].clone()),
            _ => None
        }
    }

    // ---- detection ----

    /// Work out what we were handed: outer wrapper, file wrapper, raw
    /// format, geometry, file system.  The extension steers the first
    /// guesses; content always decides.
    fn analyze_image_file(&mut self,path: &str) -> STDRESULT {
        let wrapper_fd = Rc::clone(self.wrapper_fd.as_ref().unwrap());
        self.outer_length = wrapper_fd.borrow().len()?;
        self.wrapped_length = self.outer_length;
        if self.outer_length==0 {
            return Err(Box::new(Error::UnrecognizedFileFmt));
        }
        let mut ext = crate::extension_hint(path);

        // pass 1: strip a gzip/zip layer
        if ext=="gz" && ogzip::test(&wrapper_fd,self.outer_length) {
            info!("found gzip outer wrapper");
            let mut ow = ogzip::OuterGzip::new(self.cfg.max_unwrapped_len);
            ow.set_outer_name(&outer_stem(path));
            let (inner,inner_len) = ow.load(&wrapper_fd,self.outer_length,self.read_only)?;
            if ow.is_damaged() {
                self.add_note(NoteSeverity::Warning,"The zip/gzip wrapper appears to be damaged.");
                self.read_only = true;
            }
            self.outer_fd = Some(Rc::clone(&wrapper_fd));
            self.wrapper_fd = Some(inner);
            self.wrapped_length = inner_len;
            self.outer_format = OuterFormat::Gzip;
            // drop the .gz and take the next extension down
            ext = crate::extension_hint(path.trim_end_matches(".gz").trim_end_matches(".GZ"));
            self.outer_wrapper = Some(Box::new(ow));
        } else if ext=="zip" {
            if !ozip::test(&wrapper_fd,self.outer_length) {
                return Err(Box::new(Error::UnrecognizedFileFmt));
            }
            info!("found zip outer wrapper");
            let mut ow = ozip::OuterZip::new(self.cfg.max_unwrapped_len);
            ow.set_outer_name(&outer_stem(path));
            let (inner,inner_len) = ow.load(&wrapper_fd,self.outer_length,self.read_only)?;
            if ow.is_damaged() {
                self.add_note(NoteSeverity::Warning,"The zip/gzip wrapper appears to be damaged.");
                self.read_only = true;
            }
            self.outer_fd = Some(Rc::clone(&wrapper_fd));
            self.wrapper_fd = Some(inner);
            self.wrapped_length = inner_len;
            self.outer_format = OuterFormat::Zip;
            ext = ow.get_extension().unwrap_or(String::new());
            self.outer_wrapper = Some(Box::new(ow));
        }
        let wrapper_fd = Rc::clone(self.wrapper_fd.as_ref().unwrap());
        let len = self.wrapped_length;

        // pass 2: what the filename claims, then the content cascade
        let mut reliable = false;
        let mut probable: Option<FileFormat> = None;
        match ext.as_str() {
            "2mg" | "2img" => {
                reliable = true;
                if wrap::dot2mg::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Dot2mg);
                }
            },
            "shk" | "sdk" | "bxy" => {
                reliable = true;
                match wrap::nufx::test(&wrapper_fd,len) {
                    Verdict::Mine => probable = Some(FileFormat::NuFx),
                    Verdict::FileArchive => return Err(Box::new(Error::FileArchive)),
                    Verdict::BadChecksum => return Err(Box::new(Error::BadChecksum)),
                    Verdict::NotMine => {}
                }
            },
            "hdv" => {
                if wrap::sim2e::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Sim2eHdv);
                }
                // ProDOS virtual drives are allowed to grow
                self.expandable = true;
            },
            "dsk" | "dc" => {
                if wrap::dc42::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::DiskCopy42);
                }
            },
            "ddd" => {
                reliable = true;
                if wrap::ddd::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Ddd);
                }
            },
            "app" => {
                reliable = true;
                if wrap::trackstar::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::TrackStar);
                }
            },
            "fdi" => {
                reliable = true;
                if wrap::fdi::test(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Fdi);
                }
            },
            "img" => {
                if wrap::unadorned::test_sector(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Unadorned);
                    self.physical = PhysicalFormat::Sectors;
                    self.order = SectorOrder::Physical;
                }
            },
            "nib" | "raw" => {
                if wrap::unadorned::test_nibble(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Unadorned);
                    self.physical = PhysicalFormat::Nib6656;
                }
            },
            "do" | "po" | "d13" | "dc6" => {
                if wrap::unadorned::test_sector(&wrapper_fd,len)==Verdict::Mine {
                    probable = Some(FileFormat::Unadorned);
                    self.physical = PhysicalFormat::Sectors;
                    self.order = match ext.as_str() {
                        "do" | "d13" => SectorOrder::DOS,
                        _ => SectorOrder::ProDOS
                    };
                    debug!("guessing {} by extension",self.order);
                }
            },
            "cp-win-vol" => {
                reliable = true;
                probable = Some(FileFormat::Unadorned);
                self.physical = PhysicalFormat::Sectors;
                self.order = SectorOrder::ProDOS;
            },
            _ => {}
        }
        if let Some(hit) = probable {
            debug!("scored a hit on extension '{}': {}",ext,hit);
        } else {
            if reliable {
                info!("extension '{}' did not match contents",ext);
                return Err(Box::new(Error::BadFileFormat));
            }
            probable = Some(self.probe_cascade(&wrapper_fd,len)?);
        }
        let file_format = probable.unwrap();
        let mut wrapper_obj = self.make_wrapper(file_format)?;
        let prep = wrapper_obj.prep(&wrapper_fd,len,self.read_only)?;
        self.length = prep.data_len;
        self.physical = prep.physical;
        if let Some(order) = prep.order {
            self.order = order;
        }
        if let Some(vol) = prep.dos_volume {
            self.dos_volume_num = Some(vol);
        }
        self.bad_block_map = prep.bad_blocks;
        self.data_fd = Some(prep.data_fd);
        if wrapper_obj.is_damaged() {
            self.add_note(NoteSeverity::Warning,"File checksum didn't match.");
            self.read_only = true;
        }
        if wrapper_obj.forces_read_only() && !self.read_only {
            self.add_note(NoteSeverity::Info,"This format cannot be written; opening read-only.");
            self.read_only = true;
        }
        self.file_format = Some(file_format);
        let wrapper_tracks = prep.num_tracks;
        self.image_wrapper = Some(wrapper_obj);
        self.analyze_image(wrapper_tracks)
    }

    /// The extension was useless; walk the content probes in an order
    /// that puts the distinctive headers first.  A positive ID with bad
    /// contents stops the walk cold.
    fn probe_cascade(&mut self,fd: &FdRef,len: u64) -> Result<FileFormat,DYNERR> {
        debug!("extension not useful, probing contents");
        match wrap::nufx::test(fd,len) {
            Verdict::Mine => return Ok(FileFormat::NuFx),
            Verdict::FileArchive => return Err(Box::new(Error::FileArchive)),
            Verdict::BadChecksum => return Err(Box::new(Error::BadChecksum)),
            Verdict::NotMine => {}
        }
        match wrap::dc42::test(fd,len) {
            Verdict::Mine => return Ok(FileFormat::DiskCopy42),
            Verdict::BadChecksum => return Err(Box::new(Error::BadChecksum)),
            _ => {}
        }
        if wrap::dot2mg::test(fd,len)==Verdict::Mine {
            return Ok(FileFormat::Dot2mg);
        }
        if wrap::ddd::test(fd,len)==Verdict::Mine {
            return Ok(FileFormat::Ddd);
        }
        if wrap::sim2e::test(fd,len)==Verdict::Mine {
            return Ok(FileFormat::Sim2eHdv);
        }
        if wrap::trackstar::test(fd,len)==Verdict::Mine {
            return Ok(FileFormat::TrackStar);
        }
        if wrap::fdi::test(fd,len)==Verdict::Mine {
            return Ok(FileFormat::Fdi);
        }
        if wrap::unadorned::test_nibble(fd,len)==Verdict::Mine {
            self.physical = PhysicalFormat::Nib6656; // placeholder, prep refines
            return Ok(FileFormat::Unadorned);
        }
        if wrap::unadorned::test_sector(fd,len)==Verdict::Mine {
            self.physical = PhysicalFormat::Sectors;
            return Ok(FileFormat::Unadorned);
        }
        info!("could not figure out the file format");
        Err(Box::new(Error::UnrecognizedFileFmt))
    }

    fn make_wrapper(&self,file_format: FileFormat) -> Result<Box<dyn ImageWrapper>,DYNERR> {
        Ok(match file_format {
            FileFormat::Unadorned => match self.physical.is_nibbles() {
                true => Box::new(wrap::unadorned::UnadornedNibble::new(self.physical)),
                false => Box::new(wrap::unadorned::UnadornedSector::new())
            },
            FileFormat::Dot2mg => Box::new(wrap::dot2mg::Wrapper2mg::new()),
            FileFormat::DiskCopy42 => Box::new(wrap::dc42::WrapperDc42::new()),
            FileFormat::NuFx => Box::new(wrap::nufx::WrapperNuFx::new(self.cfg.nufx_compression,self.cfg.max_unwrapped_len)),
            FileFormat::Ddd => Box::new(wrap::ddd::WrapperDdd::new(self.cfg.max_unwrapped_len)),
            FileFormat::TrackStar => Box::new(wrap::trackstar::WrapperTrackStar::new()),
            FileFormat::Fdi => Box::new(wrap::fdi::WrapperFdi::new()),
            FileFormat::Sim2eHdv => Box::new(wrap::sim2e::WrapperSim2e::new())
        })
    }

    /// Figure out tracks/sectors/blocks from the raw format and length,
    /// then go looking for a file system.
    fn analyze_image(&mut self,wrapper_tracks: Option<usize>) -> STDRESULT {
        if self.physical.is_sectors() {
            if self.length==0 {
                info!("zero-length disk images are not allowed");
                return Err(Box::new(Error::OddLength));
            }
            if self.length==wrap::unadorned::D13_LEN {
                self.has_sectors = true;
                self.num_sect_per_track = 13;
                self.num_tracks = TRACK_COUNT_525;
            } else if self.length % (16*SECTOR_SIZE as u64)==0 {
                self.has_sectors = true;
                self.num_sect_per_track = 16;
                self.num_tracks = (self.length / (16*SECTOR_SIZE as u64)) as usize;
                if self.pair_offset.is_some() {
                    if self.num_tracks % 2 != 0 {
                        info!("sector pairing with odd track count");
                        return Err(Box::new(Error::OddLength));
                    }
                    self.num_tracks /= 2;
                }
            } else if self.length % BLOCK_SIZE as u64==0 {
                if self.pair_offset.is_some() {
                    return Err(Box::new(Error::OddLength));
                }
                self.has_blocks = true;
                self.num_blocks = self.length / BLOCK_SIZE as u64;
            } else {
                return Err(Box::new(Error::OddLength));
            }
        } else {
            self.has_nibbles = true;
            self.has_sectors = true;
            self.num_tracks = wrapper_tracks.unwrap_or(TRACK_COUNT_525);
            match self.analyze_nibble_data() {
                Ok(()) => {
                    let descr = &self.nibble_descr_table[self.nibble_descr.unwrap()];
                    self.num_sect_per_track = descr.num_sectors;
                    self.order = SectorOrder::Physical;
                    if !self.read_only && descr.dat.chk_policy==nibble::ChecksumPolicy::Ignore {
                        info!("active profile ignores data checksums, disabling writes");
                        self.add_note(NoteSeverity::Info,"Sectors use non-standard data checksums; writing disabled.");
                        self.read_only = true;
                    }
                },
                Err(_) => {
                    // still usable for raw track access
                    info!("no nibble profile fits; sector access disabled");
                    self.num_sect_per_track = 0;
                    self.order = SectorOrder::Physical;
                    self.has_sectors = false;
                }
            }
        }
        if self.has_sectors {
            if self.num_sect_per_track % 2==0 {
                self.has_blocks = true;
                self.num_blocks = (self.num_tracks * self.num_sect_per_track / 2) as u64;
            }
        }
        self.analyze_image_fs();
        debug!("analysis: tracks={} sectors={} blocks={} order={} fs={}",
            self.num_tracks,self.num_sect_per_track,self.num_blocks,self.order,self.fs_format);
        Ok(())
    }

    /// Audition each standard nibble profile until one reads every sector
    /// of every track.  Also recovers the DOS volume number.
    fn analyze_nibble_data(&mut self) -> STDRESULT {
        for idx in 0..self.nibble_descr_table.len() {
            let descr = self.nibble_descr_table[idx].clone();
            if descr.num_sectors==0 {
                continue; // empty custom slot
            }
            if self.descr_reads_whole_disk(&descr)? {
                info!("nibble profile '{}' fits",descr.name);
                self.nibble_descr = Some(idx);
                // volume number from the first readable address field
                if let Ok(trk) = self.load_raw_track(0) {
                    let fields = nibble::scan_address_fields(&trk,&descr,0);
                    if let Some(f) = fields.first() {
                        self.dos_volume_num = Some(f.vol);
                    }
                }
                return Ok(());
            }
        }
        Err(Box::new(Error::BadNibbleSectors))
    }

    fn descr_reads_whole_disk(&mut self,descr: &NibbleDescr) -> Result<bool,DYNERR> {
        for track in 0..self.num_tracks {
            let trk_len = self.image_wrapper.as_ref().unwrap().nibble_track_len(track);
            if trk_len==0 {
                continue; // unused capture slot
            }
            let trk = self.load_raw_track(track)?;
            for sector in 0..descr.num_sectors {
                if nibble::read_sector(&trk,descr,track,sector).is_err() {
                    debug!("profile '{}' fails at t={} s={}",descr.name,track,sector);
                    return Ok(false);
                }
            }
            if !self.update_scan_progress(None) {
                return Err(Box::new(Error::Cancelled));
            }
        }
        Ok(true)
    }

    /// Run the tester chain and adopt the first hit.
    fn analyze_image_fs(&mut self) {
        let testers = std::mem::take(&mut self.testers);
        let hint = self.order;
        let mut found: Option<fsprobe::ProbeHit> = None;
        for tester in &testers {
            if let Some(hit) = tester.test(self,hint,Leniency::Not) {
                found = Some(hit);
                break;
            }
        }
        self.testers = testers;
        match found {
            Some(hit) => {
                self.fs_format = hit.format;
                self.order = hit.order;
                if hit.wide_sectors {
                    // UNIDOS-family: same bytes, twice the sectors per track
                    self.num_sect_per_track = 32;
                    self.num_tracks /= 2;
                }
            },
            None => {
                self.fs_format = FsFormat::Unknown;
                debug!("no recognizable file system (order={})",self.order);
            }
        }
        self.file_sys_order = fsprobe::fs_sector_order(self.fs_format,self.order);
    }

    /// Re-run a single file system test leniently and adopt the result.
    /// The physical format can never be overridden.
    pub fn override_format(&mut self,physical: PhysicalFormat,fs_format: FsFormat,order: SectorOrder) -> STDRESULT {
        debug!("override: physical={} format={} order={}",physical,fs_format,order);
        if !physical.is_sectors() && !physical.is_nibbles() {
            return Err(Box::new(Error::UnsupportedPhysicalFmt));
        }
        if physical != self.physical {
            return Err(Box::new(Error::InvalidArg));
        }
        if fs_format==self.fs_format && order==self.order {
            debug!("override matches existing, ignoring");
            return Ok(());
        }
        match fs_format {
            FsFormat::GenericDosOrd | FsFormat::GenericProDosOrd |
            FsFormat::GenericPhysicalOrd | FsFormat::GenericCpmOrd | FsFormat::Unknown => {
                self.fs_format = fs_format;
                self.order = order;
                self.file_sys_order = fsprobe::fs_sector_order(self.fs_format,self.order);
                return Ok(());
            },
            _ => {}
        }
        let testers = std::mem::take(&mut self.testers);
        let mut result: Option<Result<fsprobe::ProbeHit,Error>> = None;
        for tester in &testers {
            if !tester.claims(fs_format) {
                continue;
            }
            result = match tester.test(self,order,Leniency::Very) {
                Some(hit) => Some(Ok(hit)),
                None => Some(Err(Error::FilesystemNotFound))
            };
            break;
        }
        self.testers = testers;
        match result {
            Some(Ok(hit)) => {
                if hit.order != order {
                    info!("override failed, lenient test settled on {}",hit.order);
                    return Err(Box::new(Error::BadOrdering));
                }
                match fs_format {
                    FsFormat::Rdos33 | FsFormat::Rdos32 | FsFormat::Rdos3 if hit.format != fs_format => {
                        return Err(Box::new(Error::FilesystemNotFound));
                    },
                    _ => {}
                }
                self.fs_format = fs_format;
                self.order = order;
                self.file_sys_order = fsprobe::fs_sector_order(self.fs_format,self.order);
                debug!("override accepted");
                Ok(())
            },
            Some(Err(e)) => Err(Box::new(e)),
            None => Err(Box::new(Error::UnsupportedFSFmt))
        }
    }

    /// Format with a real file system via the registered hook.
    pub fn format_image(&mut self,fs_format: FsFormat,vol_name: &str) -> STDRESULT {
        let formatter = match &self.formatter {
            Some(f) => Rc::clone(f),
            None => return Err(Box::new(Error::UnsupportedFSFmt))
        };
        if !formatter.supports(fs_format) {
            return Err(Box::new(Error::UnsupportedFSFmt));
        }
        formatter.format(self,fs_format,vol_name)?;
        debug!("format successful");
        self.fs_format = fs_format;
        Ok(())
    }

    /// Clear every block to zeros, usually before a high-level format.
    pub fn zero_image(&mut self) -> STDRESULT {
        debug!("zeroing image ({} blocks)",self.num_blocks);
        let zeros = [0u8;BLOCK_SIZE];
        for block in 0..self.num_blocks {
            self.write_block(block,&zeros)?;
            if !self.update_scan_progress(None) {
                return Err(Box::new(Error::Cancelled));
            }
        }
        Ok(())
    }

    // ---- block and sector I/O ----

    fn is_linear_blocks(&self,image_order: SectorOrder,fs_order: SectorOrder) -> bool {
        self.physical.is_sectors() && self.has_blocks && image_order==fs_order
    }

    pub(crate) fn copy_bytes_out_vec(&mut self,offset: u64,len: usize) -> Result<Vec<u8>,DYNERR> {
        let mut buf = vec![0;len];
        self.copy_bytes_out(offset,&mut buf)?;
        Ok(buf)
    }

    /// lowest level read
    fn copy_bytes_out(&mut self,offset: u64,buf: &mut [u8]) -> STDRESULT {
        let fd = match &self.data_fd {
            Some(fd) => Rc::clone(fd),
            None => return Err(Box::new(Error::Internal))
        };
        gfd::read_at(&fd,offset,buf)
    }

    /// lowest level write; raises the dirty flag here and up the chain
    fn copy_bytes_in(&mut self,offset: u64,buf: &[u8]) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        let fd = match &self.data_fd {
            Some(fd) => Rc::clone(fd),
            None => return Err(Box::new(Error::Internal))
        };
        gfd::write_at(&fd,offset,buf)?;
        self.mark_dirty();
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        let mut p = self.parent.clone();
        while let Some(weak) = p {
            match weak.upgrade() {
                Some(rc) => {
                    let mut img = rc.borrow_mut();
                    img.dirty = true;
                    p = img.parent.clone();
                },
                None => break
            }
        }
    }

    pub fn read_track_sector(&mut self,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        self.read_track_sector_swapped(track,sector,self.order,self.file_sys_order)
    }

    /// Read a 256-byte sector with explicit orderings; the file system
    /// probes use this to try orders on for size.
    pub fn read_track_sector_swapped(&mut self,track: usize,sector: usize,image_order: SectorOrder,fs_order: SectorOrder) -> Result<Vec<u8>,DYNERR> {
        if !self.has_sectors {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        let (offset,new_sector) = skew::sector_and_offset(track,sector,self.num_tracks,self.num_sect_per_track,image_order,fs_order,self.pair_offset)?;
        if self.physical.is_sectors() {
            debug_assert!(offset + SECTOR_SIZE as u64 <= self.length);
            self.copy_bytes_out_vec(offset,SECTOR_SIZE)
        } else {
            if image_order != SectorOrder::Physical {
                debug!("nibble image order is {}, expected physical",image_order);
            }
            self.read_nibble_sector(track,new_sector)
        }
    }

    pub fn write_track_sector(&mut self,track: usize,sector: usize,buf: &[u8]) -> STDRESULT {
        if buf.len() != SECTOR_SIZE {
            return Err(Box::new(Error::InvalidArg));
        }
        if !self.has_sectors {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        let (offset,new_sector) = skew::sector_and_offset(track,sector,self.num_tracks,self.num_sect_per_track,self.order,self.file_sys_order,self.pair_offset)?;
        if self.physical.is_sectors() {
            debug_assert!(offset + SECTOR_SIZE as u64 <= self.length);
            self.copy_bytes_in(offset,buf)
        } else {
            self.write_nibble_sector(track,new_sector,buf)
        }
    }

    pub fn read_block(&mut self,block: u64) -> Result<Vec<u8>,DYNERR> {
        self.read_block_swapped(block,self.order,self.file_sys_order)
    }

    pub fn read_block_swapped(&mut self,block: u64,image_order: SectorOrder,fs_order: SectorOrder) -> Result<Vec<u8>,DYNERR> {
        if !self.has_blocks {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if block >= self.num_blocks {
            return Err(Box::new(Error::InvalidBlock));
        }
        if self.check_for_bad_blocks(block,1) {
            return Err(Box::new(Error::ReadFailed));
        }
        if self.has_sectors && !self.is_linear_blocks(image_order,fs_order) {
            let spb = (self.num_sect_per_track/2) as u64;
            let track = (block / spb) as usize;
            let blk_in_trk = (block - track as u64 * spb) as usize;
            let mut ans = self.read_track_sector_swapped(track,blk_in_trk*2,image_order,fs_order)?;
            ans.append(&mut self.read_track_sector_swapped(track,blk_in_trk*2+1,image_order,fs_order)?);
            Ok(ans)
        } else if self.has_blocks {
            if image_order != fs_order {
                debug!("swapped block read on non-sector image ({}/{})",image_order,fs_order);
            }
            self.copy_bytes_out_vec(block * BLOCK_SIZE as u64,BLOCK_SIZE)
        } else {
            Err(Box::new(Error::Internal))
        }
    }

    /// Read a run of blocks.  Fails wholesale if any block in the range is
    /// in the bad block map; the caller can retry block by block.
    pub fn read_blocks(&mut self,start: u64,count: u64) -> Result<Vec<u8>,DYNERR> {
        if !self.has_blocks {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if count==0 || start + count > self.num_blocks {
            return Err(Box::new(Error::InvalidArg));
        }
        if self.check_for_bad_blocks(start,count) {
            return Err(Box::new(Error::ReadFailed));
        }
        if !self.is_linear_blocks(self.order,self.file_sys_order) {
            let mut ans: Vec<u8> = Vec::new();
            for block in start..start+count {
                ans.append(&mut self.read_block(block)?);
            }
            Ok(ans)
        } else {
            self.copy_bytes_out_vec(start * BLOCK_SIZE as u64,(count as usize)*BLOCK_SIZE)
        }
    }

    pub fn write_block(&mut self,block: u64,buf: &[u8]) -> STDRESULT {
        if buf.len() != BLOCK_SIZE {
            return Err(Box::new(Error::InvalidArg));
        }
        if !self.has_blocks {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if block >= self.num_blocks {
            return Err(Box::new(Error::InvalidBlock));
        }
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        if self.has_sectors && !self.is_linear_blocks(self.order,self.file_sys_order) {
            let spb = (self.num_sect_per_track/2) as u64;
            let track = (block / spb) as usize;
            let blk_in_trk = (block - track as u64 * spb) as usize;
            self.write_track_sector(track,blk_in_trk*2,&buf[0..SECTOR_SIZE])?;
            self.write_track_sector(track,blk_in_trk*2+1,&buf[SECTOR_SIZE..])
        } else if self.has_blocks {
            self.copy_bytes_in(block * BLOCK_SIZE as u64,buf)
        } else {
            Err(Box::new(Error::Internal))
        }
    }

    pub fn write_blocks(&mut self,start: u64,buf: &[u8]) -> STDRESULT {
        if buf.len()==0 || buf.len() % BLOCK_SIZE != 0 {
            return Err(Box::new(Error::InvalidArg));
        }
        let count = (buf.len()/BLOCK_SIZE) as u64;
        if !self.has_blocks {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if start + count > self.num_blocks {
            return Err(Box::new(Error::InvalidArg));
        }
        if self.read_only {
            return Err(Box::new(Error::AccessDenied));
        }
        if !self.is_linear_blocks(self.order,self.file_sys_order) {
            for i in 0..count as usize {
                self.write_block(start + i as u64,&buf[i*BLOCK_SIZE..(i+1)*BLOCK_SIZE])?;
            }
            Ok(())
        } else {
            self.copy_bytes_in(start * BLOCK_SIZE as u64,buf)
        }
    }

    // ---- nibble I/O ----

    pub fn nibble_track_length(&self,track: usize) -> Result<usize,DYNERR> {
        match &self.image_wrapper {
            Some(w) if self.physical.is_nibbles() => Ok(w.nibble_track_len(track)),
            _ => Err(Box::new(Error::UnsupportedAccess))
        }
    }

    pub fn nibble_track_offset(&self,track: usize) -> Result<u64,DYNERR> {
        match &self.image_wrapper {
            Some(w) if self.physical.is_nibbles() => Ok(w.nibble_track_offset(track)),
            _ => Err(Box::new(Error::UnsupportedAccess))
        }
    }

    /// Raw nibbles of one track, exactly as stored.
    pub fn read_nibble_track(&mut self,track: usize) -> Result<Vec<u8>,DYNERR> {
        if !self.physical.is_nibbles() {
            return Err(Box::new(Error::UnsupportedAccess));
        }
        if track >= self.num_tracks {
            return Err(Box::new(Error::InvalidTrack));
        }
        self.cache_track(track)?;
        Ok(self.nibble_track_buf.clone())
    }

    fn load_raw_track(&mut self,track: usize) -> Result<Vec<u8>,DYNERR> {
        let (trk_len,offset) = {
            let w = match &self.image_wrapper {
                Some(w) => w,
                None => return Err(Box::new(Error::Internal))
            };
            (w.nibble_track_len(track),w.nibble_track_offset(track))
        };
        if trk_len==0 {
            return Err(Box::new(Error::BadNibbleSectors));
        }
        self.copy_bytes_out_vec(offset,trk_len)
    }

    /// Bring the requested track into the cache, writing back whatever
    /// was there first.
    fn cache_track(&mut self,track: usize) -> STDRESULT {
        if self.nibble_track_loaded==Some(track) {
            return Ok(());
        }
        self.push_track_cache()?;
        self.nibble_track_buf = self.load_raw_track(track)?;
        self.nibble_track_loaded = Some(track);
        Ok(())
    }

    fn push_track_cache(&mut self) -> STDRESULT {
        if self.nibble_track_dirty {
            let track = match self.nibble_track_loaded {
                Some(t) => t,
                None => return Err(Box::new(Error::Internal))
            };
            let offset = self.image_wrapper.as_ref().unwrap().nibble_track_offset(track);
            let buf = std::mem::take(&mut self.nibble_track_buf);
            let result = self.copy_bytes_in(offset,&buf);
            self.nibble_track_buf = buf;
            result?;
            self.nibble_track_dirty = false;
        }
        Ok(())
    }

    fn active_descr(&self) -> Result<NibbleDescr,DYNERR> {
        match self.nibble_descr {
            Some(idx) => Ok(self.nibble_descr_table[idx].clone()),
            None => Err(Box::new(Error::BadNibbleSectors))
        }
    }

    fn read_nibble_sector(&mut self,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        let descr = self.active_descr()?;
        self.cache_track(track)?;
        nibble::read_sector(&self.nibble_track_buf,&descr,track,sector)
    }

    fn write_nibble_sector(&mut self,track: usize,sector: usize,buf: &[u8]) -> STDRESULT {
        let descr = self.active_descr()?;
        self.cache_track(track)?;
        nibble::write_sector(&mut self.nibble_track_buf,&descr,track,sector,buf)?;
        self.nibble_track_dirty = true;
        self.mark_dirty();
        Ok(())
    }

    // ---- flush and close ----

    pub fn flush(&mut self,mode: FlushMode) -> STDRESULT {
        debug!("flush (dirty={})",self.dirty);
        if !self.dirty {
            return Ok(());
        }
        if self.data_fd.is_none() {
            // creation must have failed before the stack came up
            self.dirty = false;
            return Ok(());
        }
        if mode==FlushMode::FastOnly {
            let slow_wrapper = match &self.image_wrapper {
                Some(w) => !w.has_fast_flush(),
                None => false
            };
            let slow_outer = match &self.outer_wrapper {
                Some(w) => !w.has_fast_flush(),
                None => false
            };
            if slow_wrapper || slow_outer {
                debug!("fast flush requested but a layer is slow, skipping");
                return Ok(());
            }
        }
        // step 1: local caches
        self.push_track_cache()?;
        // step 2: push data into the wrapper layer
        if let Some(wrapper_fd) = &self.wrapper_fd {
            let wrapper_fd = Rc::clone(wrapper_fd);
            let data_fd = Rc::clone(self.data_fd.as_ref().unwrap());
            let w = match &mut self.image_wrapper {
                Some(w) => w,
                None => return Err(Box::new(Error::Internal))
            };
            self.wrapped_length = w.flush(&wrapper_fd,&data_fd,self.length)?;
            wrapper_fd.borrow_mut().flush()?;
        } else {
            debug_assert!(self.parent.is_some());
        }
        // step 3: rebuild the outer layer around the wrapper
        if let Some(ow) = &mut self.outer_wrapper {
            let outer_fd = match &self.outer_fd {
                Some(fd) => Rc::clone(fd),
                None => return Err(Box::new(Error::Internal))
            };
            let wrapper_fd = Rc::clone(self.wrapper_fd.as_ref().unwrap());
            debug!("saving wrapper to outer, wrapped length {}",self.wrapped_length);
            ow.save(&outer_fd,&wrapper_fd,self.wrapped_length)?;
            self.outer_length = outer_fd.borrow().len()?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Flush and take the stack down in reverse order.  Filesystem
    /// clients must have released their references first.
    pub fn close(&mut self) -> STDRESULT {
        if self.diskfs_ref_cnt != 0 {
            error!("closing image with {} live filesystem refs",self.diskfs_ref_cnt);
            debug_assert!(false,"diskfs refs outstanding at close");
        }
        self.flush(FlushMode::All)?;
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(fd) = &self.data_fd {
            let _ = fd.borrow_mut().close();
        }
        if let Some(fd) = &self.wrapper_fd {
            let _ = fd.borrow_mut().close();
        }
        if let Some(fd) = &self.outer_fd {
            let _ = fd.borrow_mut().close();
        }
        self.data_fd = None;
        self.wrapper_fd = None;
        self.outer_fd = None;
        self.image_wrapper = None;
        self.outer_wrapper = None;
        self.nibble_track_loaded = None;
        self.nibble_track_dirty = false;
    }
}

impl Drop for DiskImg {
    fn drop(&mut self) {
        if self.data_fd.is_some() {
            debug!("image dropped while open, closing");
            if let Err(e) = self.close() {
                warn!("close during drop failed: {}",e);
            }
        }
    }
}

/// filename stem with directories and the last extension removed
fn outer_stem(path: &str) -> String {
    let base = match path.rsplit_once('/') {
        Some((_dir,base)) => base,
        None => path
    };
    match base.rsplit_once('.') {
        Some((stem,_ext)) => stem.to_string(),
        None => base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems() {
        assert_eq!(outer_stem("dir/sub/disk.2mg.gz"),"disk.2mg");
        assert_eq!(outer_stem("disk.zip"),"disk");
        assert_eq!(outer_stem("plain"),"plain");
    }

    #[test]
    fn unopened_image_rejects_io() {
        let mut img = DiskImg::new();
        assert!(img.read_block(0).is_err());
        assert!(img.write_block(0,&[0;BLOCK_SIZE]).is_err());
        assert!(!img.is_open());
    }
}
