//! ## File system probes
//!
//! The image layer does not interpret file systems, but it has to know
//! which one is present to pin down the sector order and to answer
//! clients who ask.  This module defines the tester hook a file system
//! layer plugs into, plus built-in detectors for the common cases.  The
//! detectors only sniff characteristic structures; everything deeper
//! belongs to the client layer.
//!
//! Testers run in a fixed order chosen to resolve ambiguities (a FAT
//! volume on a re-used CFFA card must be caught before the stale ProDOS
//! header is, DOS before ProDOS because they can coexist, and so on).
//! Each tester tries the plausible image orders, starting from the hint,
//! and reports the order under which its file system made sense.

use log::{debug,info};
use crate::image::DiskImg;
use crate::skew::SectorOrder;

/// File system (or partition scheme) found on an image.  The generic
/// entries stand for "no file system, but the ordering is known," which
/// is what freshly created images use.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum FsFormat {
    Unknown,
    ProDos,
    Dos33,
    Dos32,
    Pascal,
    MacHfs,
    Cpm,
    MsDos,
    Rdos33,
    Rdos32,
    Rdos3,
    GenericDosOrd,
    GenericProDosOrd,
    GenericPhysicalOrd,
    GenericCpmOrd,
    UniDos,
    OzDos,
    Cffa4,
    Cffa8,
    MacPart,
    MicroDrive,
    FocusDrive
}

impl std::fmt::Display for FsFormat {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f,"Unknown"),
            Self::ProDos => write!(f,"ProDOS"),
            Self::Dos33 => write!(f,"DOS 3.3"),
            Self::Dos32 => write!(f,"DOS 3.2"),
            Self::Pascal => write!(f,"Pascal"),
            Self::MacHfs => write!(f,"HFS"),
            Self::Cpm => write!(f,"CP/M"),
            Self::MsDos => write!(f,"MS-DOS FAT"),
            Self::Rdos33 => write!(f,"RDOS 3.3 (16-sector)"),
            Self::Rdos32 => write!(f,"RDOS 3.2 (13-sector)"),
            Self::Rdos3 => write!(f,"RDOS 3 (cracked 13-sector)"),
            Self::GenericDosOrd => write!(f,"Generic DOS sectors"),
            Self::GenericProDosOrd => write!(f,"Generic ProDOS blocks"),
            Self::GenericPhysicalOrd => write!(f,"Generic raw sectors"),
            Self::GenericCpmOrd => write!(f,"Generic CP/M blocks"),
            Self::UniDos => write!(f,"UNIDOS (400K DOS x2)"),
            Self::OzDos => write!(f,"OzDOS (400K DOS x2)"),
            Self::Cffa4 => write!(f,"CFFA (4 or 6 partitions)"),
            Self::Cffa8 => write!(f,"CFFA (8 partitions)"),
            Self::MacPart => write!(f,"Macintosh partitioned disk"),
            Self::MicroDrive => write!(f,"MicroDrive partitioned disk"),
            Self::FocusDrive => write!(f,"FocusDrive partitioned disk")
        }
    }
}

/// How hard a tester should squint.  Lenient testing is used by the
/// format override path, where the user has already said what they want.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum Leniency {
    Not,
    Very
}

/// A successful identification.
#[derive(Clone,Copy)]
pub struct ProbeHit {
    pub order: SectorOrder,
    pub format: FsFormat,
    /// the image turned out to be 32-sector "wide" tracks (UNIDOS family)
    pub wide_sectors: bool
}

impl ProbeHit {
    fn plain(order: SectorOrder,format: FsFormat) -> Self {
        Self { order, format, wide_sectors: false }
    }
}

/// The hook a file system layer implements.  Built-in testers cover the
/// common formats; a client layer can register testers for the exotic
/// ones (CFFA, MicroDrive, FocusDrive) with `DiskImg::add_fs_tester`.
pub trait FsTester {
    /// does this tester speak for the given format family?
    fn claims(&self,format: FsFormat) -> bool;
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit>;
}

/// The hook `DiskImg::format_image` delegates to.
pub trait FsFormatter {
    fn supports(&self,format: FsFormat) -> bool;
    fn format(&self,img: &mut DiskImg,format: FsFormat,vol_name: &str) -> crate::STDRESULT;
}

/// The standard tester chain, in probe order.
pub fn standard_testers() -> Vec<Box<dyn FsTester>> {
    vec![
        Box::new(MacPartTester {}),
        Box::new(FatTester {}),
        Box::new(Dos3xTester {}),
        Box::new(WideDosTester {}),
        Box::new(UniDosTester {}),
        Box::new(OzDosTester {}),
        Box::new(ProDosTester {}),
        Box::new(PascalTester {}),
        Box::new(CpmTester {}),
        Box::new(RdosTester {}),
        Box::new(HfsTester {})
    ]
}

/// Candidate image orders to try, best guess first.  CP/M ordered images
/// are not worth probing for; real ones are vanishingly rare.
pub fn order_candidates(first: SectorOrder) -> Vec<SectorOrder> {
    let mut ans: Vec<SectorOrder> = Vec::new();
    if first != SectorOrder::Unknown && first != SectorOrder::CPM {
        ans.push(first);
    }
    for order in [SectorOrder::ProDOS,SectorOrder::DOS,SectorOrder::Physical] {
        if order != first {
            ans.push(order);
        }
    }
    ans
}

/// The sector order a file system expects to address the disk in.
/// When this matches the image order no swapping happens at all.
pub fn fs_sector_order(format: FsFormat,image_order: SectorOrder) -> SectorOrder {
    match format {
        FsFormat::Unknown => image_order,
        FsFormat::GenericPhysicalOrd | FsFormat::Rdos32 | FsFormat::Rdos3 => SectorOrder::Physical,
        FsFormat::GenericDosOrd | FsFormat::Dos33 | FsFormat::Dos32 |
        FsFormat::UniDos | FsFormat::OzDos => SectorOrder::DOS,
        FsFormat::GenericCpmOrd | FsFormat::Cpm => SectorOrder::CPM,
        _ => SectorOrder::ProDOS
    }
}

/// Whether a client will usually want to address this as blocks.
pub fn shows_as_blocks(format: FsFormat,image_order: SectorOrder) -> bool {
    match format {
        FsFormat::Unknown => image_order==SectorOrder::ProDOS,
        FsFormat::GenericPhysicalOrd | FsFormat::GenericDosOrd |
        FsFormat::Dos33 | FsFormat::Dos32 | FsFormat::Rdos3 | FsFormat::Rdos33 | FsFormat::Rdos32 |
        FsFormat::UniDos | FsFormat::OzDos => false,
        _ => true
    }
}

// ---- built-in testers ----

const VTOC_TS_PAIRS: u8 = 122;

/// DOS 3.x VTOC sanity.  `buf` is the would-be VTOC sector.
fn vtoc_plausible(buf: &[u8],want_tracks: Option<u8>,want_sectors: &[u8],leniency: Leniency) -> bool {
    let cat_track = buf[0x01];
    let cat_sector = buf[0x02];
    let tracks = buf[0x34];
    let sectors = buf[0x35];
    if !want_sectors.contains(&sectors) {
        return false;
    }
    if cat_track==0 || cat_track >= tracks || cat_sector as usize > sectors as usize {
        return false;
    }
    if leniency==Leniency::Very {
        return true;
    }
    if buf[0x27] != VTOC_TS_PAIRS {
        return false;
    }
    if u16::from_le_bytes([buf[0x36],buf[0x37]]) != 256 {
        return false;
    }
    match want_tracks {
        Some(t) => tracks==t,
        None => [35,40,50].contains(&tracks)
    }
}

fn catalog_chains(img: &mut DiskImg,vtoc: &[u8],cand: SectorOrder) -> bool {
    let cat_track = vtoc[1] as usize;
    let mut sector = vtoc[2] as usize;
    for _hop in 0..vtoc[0x35] {
        if sector==0 {
            return false;
        }
        let cat = match img.read_track_sector_swapped(cat_track,sector,cand,SectorOrder::DOS) {
            Ok(buf) => buf,
            Err(_) => return false
        };
        if cat[1]==0 && cat[2]==0 {
            // the chain may only run out at the bottom
            return sector==1;
        }
        if cat[1] as usize != cat_track || cat[2] as usize != sector-1 {
            return false;
        }
        sector -= 1;
    }
    true
}

struct Dos3xTester {}

impl FsTester for Dos3xTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::Dos33 || format==FsFormat::Dos32
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_sectors() || img.num_tracks() < 18 {
            return None;
        }
        let nspt = img.num_sect_per_track();
        if nspt != 13 && nspt != 16 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let vtoc = match img.read_track_sector_swapped(17,0,cand,SectorOrder::DOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if !vtoc_plausible(&vtoc,None,&[13,16],leniency) {
                continue;
            }
            // the VTOC is order-blind (sector 0 maps to 0 in every order),
            // so walk the catalog chain; a standard catalog descends one
            // sector at a time and only ends at sector 1, which a wrong
            // order candidate cannot counterfeit
            if leniency==Leniency::Not && !catalog_chains(img,&vtoc,cand) {
                continue;
            }
            let format = match nspt {
                13 => FsFormat::Dos32,
                _ => FsFormat::Dos33
            };
            info!("found DOS 3.x, image order {}",cand);
            return Some(ProbeHit::plain(cand,format));
        }
        None
    }
}

/// A single 400K "wide" DOS volume: 50 tracks of 32 sectors.  Shows up
/// when probing the halves of UNIDOS disks.
struct WideDosTester {}

impl FsTester for WideDosTester {
    fn claims(&self,_format: FsFormat) -> bool {
        false
    }
    fn test(&self,img: &mut DiskImg,_order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if img.num_blocks() != 800 {
            return None;
        }
        let vtoc = match img.copy_bytes_out_vec(17*32*256,256) {
            Ok(buf) => buf,
            Err(_) => return None
        };
        if vtoc_plausible(&vtoc,Some(50),&[32],leniency) {
            info!("found wide DOS 3.3 (32-sector tracks)");
            return Some(ProbeHit { order: SectorOrder::DOS, format: FsFormat::Dos33, wide_sectors: true });
        }
        None
    }
}

/// Two 400K DOS volumes back to back on an 800K disk.
struct UniDosTester {}

impl FsTester for UniDosTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::UniDos
    }
    fn test(&self,img: &mut DiskImg,_order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if img.num_blocks() != 1600 {
            return None;
        }
        for half in [0u64,409600] {
            let vtoc = match img.copy_bytes_out_vec(half + 17*32*256,256) {
                Ok(buf) => buf,
                Err(_) => return None
            };
            if !vtoc_plausible(&vtoc,Some(50),&[32],leniency) {
                return None;
            }
        }
        info!("found UNIDOS pair");
        Some(ProbeHit { order: SectorOrder::DOS, format: FsFormat::UniDos, wide_sectors: true })
    }
}

/// Two 400K DOS volumes sharing an 800K disk by splitting each 512-byte
/// block into half-sectors (the sector pairing layout).
struct OzDosTester {}

impl FsTester for OzDosTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::OzDos
    }
    fn test(&self,img: &mut DiskImg,_order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if img.num_blocks() != 1600 {
            return None;
        }
        for pair in [0u64,256] {
            let vtoc = match img.copy_bytes_out_vec(2*17*32*256 + pair,256) {
                Ok(buf) => buf,
                Err(_) => return None
            };
            if !vtoc_plausible(&vtoc,Some(50),&[32],leniency) {
                return None;
            }
        }
        info!("found OzDOS pair");
        Some(ProbeHit { order: SectorOrder::DOS, format: FsFormat::OzDos, wide_sectors: true })
    }
}

struct ProDosTester {}

impl FsTester for ProDosTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::ProDos
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_blocks() || img.num_blocks() < 6 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let key = match img.read_block_swapped(2,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if u16::from_le_bytes([key[0],key[1]]) != 0 {
                continue;
            }
            if key[4] & 0xf0 != 0xf0 {
                continue;
            }
            let name_len = (key[4] & 0x0f) as usize;
            if name_len==0 {
                continue;
            }
            if !key[5..5+name_len].iter().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c==b'.') {
                continue;
            }
            // entry length 0x27, entries per block 0x0d
            if key[0x23] != 0x27 || key[0x24] != 0x0d {
                continue;
            }
            let total = u16::from_le_bytes([key[0x2a],key[0x2b]]) as u64;
            if leniency==Leniency::Not && total > img.num_blocks() {
                debug!("ProDOS total blocks {} exceeds image {}",total,img.num_blocks());
                continue;
            }
            info!("found ProDOS, image order {}",cand);
            return Some(ProbeHit::plain(cand,FsFormat::ProDos));
        }
        None
    }
}

struct PascalTester {}

impl FsTester for PascalTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::Pascal
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_blocks() || img.num_blocks() < 6 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let dir = match img.read_block_swapped(2,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if u16::from_le_bytes([dir[0],dir[1]]) != 0 {
                continue;
            }
            let last_dir_block = u16::from_le_bytes([dir[2],dir[3]]);
            if last_dir_block < 3 || last_dir_block as u64 > img.num_blocks() {
                continue;
            }
            if u16::from_le_bytes([dir[4],dir[5]]) != 0 {
                continue;
            }
            let name_len = dir[6] as usize;
            if name_len==0 || name_len > 7 {
                continue;
            }
            if !dir[7..7+name_len].iter().all(|c| c.is_ascii_graphic()) {
                continue;
            }
            let total = u16::from_le_bytes([dir[14],dir[15]]) as u64;
            if leniency==Leniency::Not && total != img.num_blocks() {
                continue;
            }
            info!("found Pascal, image order {}",cand);
            return Some(ProbeHit::plain(cand,FsFormat::Pascal));
        }
        None
    }
}

struct HfsTester {}

impl FsTester for HfsTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::MacHfs
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,_leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_blocks() || img.num_blocks() < 1600 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let mdb = match img.read_block_swapped(2,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if mdb[0] != 0x42 || mdb[1] != 0x44 {
                continue;
            }
            let al_blk_siz = u32::from_be_bytes([mdb[20],mdb[21],mdb[22],mdb[23]]);
            if al_blk_siz==0 || al_blk_siz % 512 != 0 {
                continue;
            }
            info!("found HFS, image order {}",cand);
            return Some(ProbeHit::plain(cand,FsFormat::MacHfs));
        }
        None
    }
}

/// Catches CFFA cards that were reformatted for MS-DOS; must run before
/// the ProDOS test.  Only plausible on larger volumes.
struct FatTester {}

impl FsTester for FatTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::MsDos
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,_leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_blocks() || img.num_blocks() < 5760 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let boot = match img.read_block_swapped(0,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if boot[510] != 0x55 || boot[511] != 0xaa {
                continue;
            }
            if boot[0] != 0xeb && boot[0] != 0xe9 {
                continue;
            }
            let bytes_per_sector = u16::from_le_bytes([boot[11],boot[12]]);
            if bytes_per_sector != 512 {
                continue;
            }
            info!("found FAT boot sector, image order {}",cand);
            return Some(ProbeHit::plain(cand,FsFormat::MsDos));
        }
        None
    }
}

struct MacPartTester {}

impl FsTester for MacPartTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::MacPart
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,_leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_blocks() || img.num_blocks() < 1600 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let ddr = match img.read_block_swapped(0,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            // driver descriptor 'ER', then a partition map entry 'PM'
            if ddr[0] != 0x45 || ddr[1] != 0x52 {
                continue;
            }
            let map = match img.read_block_swapped(1,cand,SectorOrder::ProDOS) {
                Ok(buf) => buf,
                Err(_) => continue
            };
            if map[0] != 0x50 || map[1] != 0x4d {
                continue;
            }
            info!("found Macintosh partition map, image order {}",cand);
            return Some(ProbeHit::plain(cand,FsFormat::MacPart));
        }
        None
    }
}

struct CpmTester {}

impl FsTester for CpmTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::Cpm
    }
    fn test(&self,img: &mut DiskImg,order_hint: SectorOrder,leniency: Leniency) -> Option<ProbeHit> {
        // only the 5.25 inch layout: directory on track 3
        if !img.has_sectors() || img.num_sect_per_track() != 16 || img.num_tracks() < 4 {
            return None;
        }
        for cand in order_candidates(order_hint) {
            let mut entries_ok = 0;
            let mut live = 0;
            let mut bad = false;
            for sector in 0..4 {
                let buf = match img.read_track_sector_swapped(3,sector,cand,SectorOrder::CPM) {
                    Ok(b) => b,
                    Err(_) => {
                        bad = true;
                        break;
                    }
                };
                for entry in buf.chunks(32) {
                    let status = entry[0];
                    if status==0xe5 {
                        entries_ok += 1;
                        continue;
                    }
                    if status > 0x1f {
                        bad = true;
                        break;
                    }
                    if !entry[1..12].iter().all(|c| {
                        let ch = c & 0x7f;
                        ch >= 0x20 && ch < 0x7f
                    }) {
                        bad = true;
                        break;
                    }
                    if entry[12] > 0x1f || entry[15] > 0x80 {
                        bad = true;
                        break;
                    }
                    entries_ok += 1;
                    live += 1;
                }
                if bad {
                    break;
                }
            }
            let needed = match leniency {
                Leniency::Not => 1,
                Leniency::Very => 0
            };
            if !bad && entries_ok==32 && live >= needed {
                info!("found CP/M directory, image order {}",cand);
                return Some(ProbeHit::plain(cand,FsFormat::Cpm));
            }
        }
        None
    }
}

struct RdosTester {}

impl FsTester for RdosTester {
    fn claims(&self,format: FsFormat) -> bool {
        format==FsFormat::Rdos33 || format==FsFormat::Rdos32 || format==FsFormat::Rdos3
    }
    fn test(&self,img: &mut DiskImg,_order_hint: SectorOrder,_leniency: Leniency) -> Option<ProbeHit> {
        if !img.has_sectors() || img.num_tracks() < 2 {
            return None;
        }
        let nspt = img.num_sect_per_track();
        if nspt != 13 && nspt != 16 {
            return None;
        }
        // catalog lives on track 1; the first entry names the system in
        // high ASCII, e.g. "RDOS 3.3"
        let cat = match img.read_track_sector_swapped(1,0,SectorOrder::Physical,SectorOrder::Physical) {
            Ok(buf) => buf,
            Err(_) => return None
        };
        let marker: [u8;4] = [0xd2,0xc4,0xcf,0xd3]; // "RDOS"
        let found = cat[0..28].windows(4).any(|w| w==marker);
        if !found {
            return None;
        }
        let format = match nspt {
            16 => FsFormat::Rdos33,
            _ => FsFormat::Rdos32
        };
        info!("found {}",format);
        Some(ProbeHit::plain(SectorOrder::Physical,format))
    }
}
