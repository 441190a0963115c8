//! ## Sector order maps
//!
//! The 16 sectors of a 5.25 inch track can appear in a file in several
//! orders.  This module holds the permutation tables and the arithmetic
//! that turns a (track, sector, image order, fs order) request into a byte
//! offset.  No table exists for 13-sector tracks; those map identity.
//!
//! The tables are kept separate from the image facade because the wrappers
//! and the file system probes both need them.

use log::{info,warn};
use crate::{DYNERR,Error,SECTOR_SIZE};

/// How the sectors of a track are arranged in the image file, or how a
/// file system expects to address them.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum SectorOrder {
    Unknown,
    ProDOS,
    DOS,
    CPM,
    Physical
}

impl std::fmt::Display for SectorOrder {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f,"Unknown ordering"),
            Self::ProDOS => write!(f,"ProDOS block ordering"),
            Self::DOS => write!(f,"DOS sector ordering"),
            Self::CPM => write!(f,"CP/M block ordering"),
            Self::Physical => write!(f,"Physical sector ordering")
        }
    }
}

pub const RAW_TO_DOS: [usize;16] = [0,7,14,6,13,5,12,4,11,3,10,2,9,1,8,15];
pub const DOS_TO_RAW: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];
pub const RAW_TO_PRODOS: [usize;16] = [0,8,1,9,2,10,3,11,4,12,5,13,6,14,7,15];
pub const PRODOS_TO_RAW: [usize;16] = [0,2,4,6,8,10,12,14,1,3,5,7,9,11,13,15];
pub const RAW_TO_CPM: [usize;16] = [0,11,6,1,12,7,2,13,8,3,14,9,4,15,10,5];
pub const CPM_TO_RAW: [usize;16] = [0,3,6,9,12,15,2,5,8,11,14,1,4,7,10,13];

/// Take a sector number in the given order to the raw (physical) position.
pub fn to_raw(sector: usize,order: SectorOrder) -> usize {
    match order {
        SectorOrder::ProDOS => PRODOS_TO_RAW[sector],
        SectorOrder::DOS => DOS_TO_RAW[sector],
        SectorOrder::CPM => CPM_TO_RAW[sector],
        SectorOrder::Physical => sector,
        SectorOrder::Unknown => {
            debug_assert!(false,"sector conversion with unknown order");
            sector
        }
    }
}

/// Take a raw (physical) sector position to its position in the given order.
pub fn from_raw(raw: usize,order: SectorOrder) -> usize {
    match order {
        SectorOrder::ProDOS => RAW_TO_PRODOS[raw],
        SectorOrder::DOS => RAW_TO_DOS[raw],
        SectorOrder::CPM => RAW_TO_CPM[raw],
        SectorOrder::Physical => raw,
        SectorOrder::Unknown => {
            debug_assert!(false,"sector conversion with unknown order");
            raw
        }
    }
}

/// Resolve a track/sector request to a byte offset into the sector data,
/// and the sector number as stored.  32-sector tracks are treated as two
/// stacked 16-sector sub-tracks.  With pairing enabled (`pair_offset` 0
/// or 1) the track index doubles and the sector splits into an index pair,
/// which is how two 400K DOS volumes share an 800K ProDOS image.
pub fn sector_and_offset(track: usize,sector: usize,num_tracks: usize,num_sect_per_track: usize,
    image_order: SectorOrder,fs_order: SectorOrder,pair_offset: Option<usize>) -> Result<(u64,usize),DYNERR> {
    if track >= num_tracks {
        info!("invalid track {}",track);
        return Err(Box::new(Error::InvalidTrack));
    }
    if sector >= num_sect_per_track {
        info!("invalid sector {}",sector);
        return Err(Box::new(Error::InvalidSector));
    }
    if num_sect_per_track==16 || num_sect_per_track==32 {
        let mut track = track;
        let mut sector = sector;
        let mut offset: u64;
        if let Some(pair) = pair_offset {
            debug_assert!(pair==0 || pair==1);
            // this pushes the track index beyond the logical track count
            track *= 2;
            if sector >= 16 {
                track += 1;
                sector -= 16;
            }
            offset = (track * num_sect_per_track * SECTOR_SIZE) as u64;
            sector = sector*2 + pair;
            if sector >= 16 {
                offset += (16*SECTOR_SIZE) as u64;
                sector -= 16;
            }
        } else {
            offset = (track * num_sect_per_track * SECTOR_SIZE) as u64;
            if sector >= 16 {
                offset += (16*SECTOR_SIZE) as u64;
                sector -= 16;
            }
        }
        let new_sector = from_raw(to_raw(sector,fs_order),image_order);
        if image_order==fs_order {
            debug_assert!(sector==new_sector);
        }
        offset += (new_sector * SECTOR_SIZE) as u64;
        Ok((offset,new_sector))
    } else if num_sect_per_track==13 {
        // skew is undefined for 13-sector disks, map identity
        if image_order != fs_order {
            warn!("13-sector request with img={} fs={}, using identity",image_order,fs_order);
        }
        let offset = ((track*13 + sector) * SECTOR_SIZE) as u64;
        Ok((offset,sector))
    } else {
        debug_assert!(false,"unexpected sectors per track {}",num_sect_per_track);
        let offset = ((track*num_sect_per_track + sector) * SECTOR_SIZE) as u64;
        Ok((offset,sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE: [SectorOrder;4] = [SectorOrder::ProDOS,SectorOrder::DOS,SectorOrder::CPM,SectorOrder::Physical];

    #[test]
    fn tables_are_inverse_pairs() {
        for s in 0..16 {
            assert_eq!(DOS_TO_RAW[RAW_TO_DOS[s]],s);
            assert_eq!(PRODOS_TO_RAW[RAW_TO_PRODOS[s]],s);
            assert_eq!(CPM_TO_RAW[RAW_TO_CPM[s]],s);
        }
    }

    #[test]
    fn order_composition_closure() {
        for a in LIVE {
            for b in LIVE {
                for s in 0..16 {
                    let there = from_raw(to_raw(s,a),b);
                    let back = from_raw(to_raw(there,b),a);
                    assert_eq!(back,s,"{} -> {} not invertible at {}",a,b,s);
                }
            }
        }
    }

    #[test]
    fn dos_sector_zero_is_physical_zero() {
        let (offset,new_sector) = sector_and_offset(0,0,35,16,SectorOrder::DOS,SectorOrder::DOS,None).expect("mapping failed");
        assert_eq!(offset,0);
        assert_eq!(new_sector,0);
    }

    #[test]
    fn swapped_offsets() {
        // DOS logical sector 1 on a ProDOS-ordered image sits at raw 13 -> prodos 14
        let (offset,new_sector) = sector_and_offset(0,1,35,16,SectorOrder::ProDOS,SectorOrder::DOS,None).expect("mapping failed");
        assert_eq!(new_sector,14);
        assert_eq!(offset,(14*SECTOR_SIZE) as u64);
    }

    #[test]
    fn wide_track_offsets() {
        // sector 20 of a 32-sector track lands in the upper sub-track
        let (offset,new_sector) = sector_and_offset(1,20,50,32,SectorOrder::DOS,SectorOrder::DOS,None).expect("mapping failed");
        assert_eq!(new_sector,4);
        assert_eq!(offset,(32*SECTOR_SIZE + 16*SECTOR_SIZE + 4*SECTOR_SIZE) as u64);
    }

    #[test]
    fn pairing_doubles_track() {
        let (plain,_) = sector_and_offset(3,0,35,16,SectorOrder::DOS,SectorOrder::DOS,None).unwrap();
        let (paired,_) = sector_and_offset(3,0,35,16,SectorOrder::DOS,SectorOrder::DOS,Some(0)).unwrap();
        assert_eq!(paired,plain*2);
        // offset 1 selects the odd member of the index pair
        let (paired0,s0) = sector_and_offset(0,1,35,16,SectorOrder::Physical,SectorOrder::Physical,Some(0)).unwrap();
        let (paired1,s1) = sector_and_offset(0,1,35,16,SectorOrder::Physical,SectorOrder::Physical,Some(1)).unwrap();
        assert_eq!((paired0,s0),((2*SECTOR_SIZE) as u64,2));
        assert_eq!((paired1,s1),((3*SECTOR_SIZE) as u64,3));
    }

    #[test]
    fn bounds() {
        assert!(sector_and_offset(35,0,35,16,SectorOrder::DOS,SectorOrder::DOS,None).is_err());
        assert!(sector_and_offset(0,16,35,16,SectorOrder::DOS,SectorOrder::DOS,None).is_err());
    }
}
