// tests of unadorned sector images: create, reopen, ordering, policy
use a2img::image::{DiskImg,CreateParams,CreateGeometry,FlushMode};
use a2img::skew::{self,SectorOrder};
use a2img::{Error,error_kind};

fn tmp(name: &str) -> (tempfile::TempDir,String) {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join(name).to_str().unwrap().to_string();
    (dir,path)
}

#[test]
fn create_and_reopen_do() {
    let (_dir,path) = tmp("fresh.do");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::DOS,CreateGeometry::TrackSectors(35,16));
    img.create_file(&path,&params).expect("create failed");
    assert_eq!(img.num_tracks(),35);
    assert_eq!(img.num_sect_per_track(),16);
    assert_eq!(img.num_blocks(),280);
    // the classic boot sector bytes land at file offset zero in DOS order
    let mut sec = vec![0;256];
    sec[0] = 0xd5;
    sec[1] = 0xaa;
    sec[2] = 0x96;
    img.write_track_sector(0,0,&sec).expect("write failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(raw.len(),143360);
    assert_eq!(&raw[0..4],&[0xd5,0xaa,0x96,0x00]);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.order(),SectorOrder::DOS);
    let back = img.read_track_sector(0,0).expect("read failed");
    assert_eq!(&back[0..3],&[0xd5,0xaa,0x96]);
    img.close().expect("close failed");
}

#[test]
fn round_trip_every_block() {
    let (_dir,path) = tmp("volume.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    for block in 0..280u64 {
        let buf = vec![(block % 251) as u8;512];
        img.write_block(block,&buf).expect("write failed");
    }
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    for block in 0..280u64 {
        assert_eq!(img.read_block(block).expect("read failed"),vec![(block % 251) as u8;512]);
    }
    // bulk read equals per-block reads
    let all = img.read_blocks(0,280).expect("bulk read failed");
    for block in 0..280usize {
        assert_eq!(&all[block*512..(block+1)*512],&img.read_block(block as u64).unwrap()[..]);
    }
    img.close().expect("close failed");
}

#[test]
fn order_swapping_is_consistent() {
    let (_dir,path) = tmp("skewed.do");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::DOS,CreateGeometry::TrackSectors(35,16));
    img.create_file(&path,&params).expect("create failed");
    // tag every sector with its DOS-order address
    for track in 0..35 {
        for sector in 0..16 {
            let buf = vec![(track*16+sector) as u8;256];
            img.write_track_sector(track,sector,&buf).expect("write failed");
        }
    }
    // a block under ProDOS addressing is two specific DOS sectors
    for block in [0u64,7,100,279] {
        let track = (block/8) as usize;
        let blk_in_trk = (block%8) as usize;
        let buf = img.read_block_swapped(block,SectorOrder::DOS,SectorOrder::ProDOS).expect("swapped read failed");
        for half in 0..2 {
            let prodos_sector = blk_in_trk*2 + half;
            let raw = skew::to_raw(prodos_sector,SectorOrder::ProDOS);
            let dos_logical = skew::from_raw(raw,SectorOrder::DOS);
            // the sector payload carries the DOS logical address we wrote
            // into the same physical slot
            let expect = (track*16 + dos_logical) as u8;
            assert_eq!(buf[half*256],expect,"block {} half {}",block,half);
        }
    }
    img.close().expect("close failed");
}

#[test]
fn thirteen_sector_images() {
    let (_dir,path) = tmp("old.d13");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::DOS,CreateGeometry::TrackSectors(35,13));
    img.create_file(&path,&params).expect("create failed");
    assert!(!img.has_blocks());
    assert_eq!(img.num_sect_per_track(),13);
    let buf = vec![0x5a;256];
    img.write_track_sector(3,12,&buf).expect("write failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(raw.len(),116480);
    // 13-sector mapping is identity
    assert_eq!(raw[(3*13+12)*256],0x5a);

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    assert_eq!(img.num_sect_per_track(),13);
    assert_eq!(img.read_track_sector(3,12).expect("read failed"),buf);
    img.close().expect("close failed");
}

#[test]
fn read_only_is_honored() {
    let (_dir,path) = tmp("locked.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    let err = img.write_block(0,&[0xff;512]).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::AccessDenied));
    assert!(!img.is_dirty());
    let err = img.write_track_sector(0,0,&[0xff;256]).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::AccessDenied));
    img.close().expect("close failed");
}

#[test]
fn bad_blocks_fail_reads() {
    let (_dir,path) = tmp("scarred.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    img.set_bad_block(100);
    let err = img.read_block(100).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::ReadFailed));
    // a spanning bulk read fails wholesale
    let err = img.read_blocks(90,20).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::ReadFailed));
    // untouched blocks still read
    img.read_block(99).expect("good block failed");
    img.close().expect("close failed");
}

#[test]
fn skip_format_sets_eof_only() {
    let (_dir,path) = tmp("sparse.hdv");
    let mut img = DiskImg::new();
    let mut params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(1600));
    params.skip_format = true;
    img.create_file(&path,&params).expect("create failed");
    img.close().expect("close failed");
    let meta = std::fs::metadata(&path).expect("stat failed");
    assert_eq!(meta.len(),819200);
    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert!(img.is_expandable());
    assert_eq!(img.read_block(1599).expect("read failed"),vec![0;512]);
    img.close().expect("close failed");
}

#[test]
fn sector_pairing_splits_tracks() {
    let (_dir,path) = tmp("oz.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(1600));
    img.create_file(&path,&params).expect("create failed");
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.num_tracks(),200);
    img.set_sector_pairing(Some(0)).expect("pairing failed");
    assert_eq!(img.num_tracks(),100);
    assert_eq!(img.num_blocks(),800);
    // paired sector 1 with offsets 0 and 1 land in adjacent half-sectors
    img.write_track_sector(0,1,&[0xe0;256]).expect("write failed");
    img.set_sector_pairing(Some(1)).expect("pairing failed");
    img.write_track_sector(0,1,&[0xe1;256]).expect("write failed");
    img.set_sector_pairing(None).expect("unpairing failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(raw[2*256],0xe0);
    assert_eq!(raw[3*256],0xe1);
}

#[test]
fn sector_pairing_rejects_odd_geometry() {
    let (_dir,path) = tmp("odd.do");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::DOS,CreateGeometry::TrackSectors(35,16));
    img.create_file(&path,&params).expect("create failed");
    let err = img.set_sector_pairing(Some(0)).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::OddLength));
    img.close().expect("close failed");
}

#[test]
fn fast_flush_applies_immediately() {
    let (_dir,path) = tmp("direct.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    img.write_block(5,&[0x77;512]).expect("write failed");
    img.flush(FlushMode::FastOnly).expect("flush failed");
    assert!(!img.is_dirty());
    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(raw[5*512],0x77);
    img.close().expect("close failed");
}
