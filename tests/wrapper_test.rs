// tests of the container wrappers: create, flush, reopen, damage handling
use a2img::image::{DiskImg,CreateParams,CreateGeometry,FlushMode,PhysicalFormat};
use a2img::outer::OuterFormat;
use a2img::wrap::FileFormat;
use a2img::skew::SectorOrder;
use a2img::fsprobe::FsFormat;

fn tmp(name: &str) -> (tempfile::TempDir,String) {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join(name).to_str().unwrap().to_string();
    (dir,path)
}

fn prodos_2mg(blocks: u64) -> CreateParams {
    CreateParams {
        outer: OuterFormat::None,
        file_format: FileFormat::Dot2mg,
        physical: PhysicalFormat::Sectors,
        order: SectorOrder::ProDOS,
        fs_format: FsFormat::GenericProDosOrd,
        geometry: CreateGeometry::Blocks(blocks),
        dos_volume: None,
        nibble_descr: None,
        storage_name: None,
        skip_format: false
    }
}

#[test]
fn dot2mg_800k() {
    let (_dir,path) = tmp("new.2mg");
    let mut img = DiskImg::new();
    img.create_file(&path,&prodos_2mg(1600)).expect("create failed");
    assert_eq!(img.read_block(0).expect("read failed"),vec![0;512]);
    img.write_block(1599,&[0xff;512]).expect("write failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(&raw[0..4],b"2IMG");
    assert_eq!(u32::from_le_bytes([raw[20],raw[21],raw[22],raw[23]]),1600); // blocks
    assert_eq!(u32::from_le_bytes([raw[24],raw[25],raw[26],raw[27]]),64); // data offset
    assert_eq!(u32::from_le_bytes([raw[28],raw[29],raw[30],raw[31]]),819200); // data length

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::Dot2mg));
    assert_eq!(img.order(),SectorOrder::ProDOS);
    assert_eq!(img.num_blocks(),1600);
    assert_eq!(img.read_block(1599).expect("read failed"),vec![0xff;512]);
    img.close().expect("close failed");
}

#[test]
fn dot2mg_header_stable_without_changes() {
    let (_dir,path) = tmp("stable.2mg");
    let mut img = DiskImg::new();
    img.create_file(&path,&prodos_2mg(280)).expect("create failed");
    img.close().expect("close failed");
    let before = std::fs::read(&path).expect("image file missing");
    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    img.close().expect("close failed");
    let after = std::fs::read(&path).expect("image file missing");
    assert_eq!(before,after);
}

#[test]
fn dot2mg_locked_flag() {
    let (_dir,path) = tmp("locked.2mg");
    let mut img = DiskImg::new();
    img.create_file(&path,&prodos_2mg(280)).expect("create failed");
    img.close().expect("close failed");
    // raise the locked bit by hand
    let mut raw = std::fs::read(&path).expect("image file missing");
    raw[19] |= 0x80;
    std::fs::write(&path,&raw).expect("rewrite failed");
    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert!(img.read_only());
    img.close().expect("close failed");
}

#[test]
fn dc42_800k_and_checksum_damage() {
    let (_dir,path) = tmp("mac.dsk");
    let mut img = DiskImg::new();
    let mut params = prodos_2mg(1600);
    params.file_format = FileFormat::DiskCopy42;
    params.storage_name = Some("TESTDISK".to_string());
    img.create_file(&path,&params).expect("create failed");
    img.write_block(123,&[0x42;512]).expect("write failed");
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::DiskCopy42));
    assert!(!img.read_only());
    assert_eq!(img.read_block(123).expect("read failed"),vec![0x42;512]);
    img.close().expect("close failed");

    // flip one bit of the stored data checksum
    let mut raw = std::fs::read(&path).expect("image file missing");
    raw[72] ^= 0x01;
    std::fs::write(&path,&raw).expect("rewrite failed");
    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert!(img.read_only());
    assert!(img.get_notes().contains("checksum"));
    // still readable
    assert_eq!(img.read_block(123).expect("read failed"),vec![0x42;512]);
    img.close().expect("close failed");
}

#[test]
fn sim2e_hdv_round_trip() {
    let (_dir,path) = tmp("card.hdv");
    let mut img = DiskImg::new();
    let mut params = prodos_2mg(280);
    params.file_format = FileFormat::Sim2eHdv;
    img.create_file(&path,&params).expect("create failed");
    img.write_block(42,&[0xa5;512]).expect("write failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(&raw[0..13],b"SIMSYSTEM HDV");
    assert_eq!(raw.len(),16 + 280*512);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::Sim2eHdv));
    assert_eq!(img.read_block(42).expect("read failed"),vec![0xa5;512]);
    img.close().expect("close failed");
}

#[test]
fn gzip_outer_wrapper() {
    let (_dir,path) = tmp("packed.2mg.gz");
    let mut img = DiskImg::new();
    let mut params = prodos_2mg(280);
    params.outer = OuterFormat::Gzip;
    img.create_file(&path,&params).expect("create failed");
    img.write_block(7,&[0x11;512]).expect("write failed");
    img.close().expect("close failed");

    let raw = std::fs::read(&path).expect("image file missing");
    assert_eq!(&raw[0..2],&[0x1f,0x8b]);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.outer_format(),OuterFormat::Gzip);
    assert_eq!(img.file_format(),Some(FileFormat::Dot2mg));
    assert_eq!(img.read_block(7).expect("read failed"),vec![0x11;512]);

    // fast-only flush must not touch the slow gzip layer
    let before = std::fs::read(&path).expect("image file missing");
    img.write_block(8,&[0x22;512]).expect("write failed");
    img.flush(FlushMode::FastOnly).expect("flush failed");
    assert!(img.is_dirty());
    assert_eq!(std::fs::read(&path).expect("image file missing"),before);
    // a full flush rewrites both layers
    img.flush(FlushMode::All).expect("flush failed");
    assert!(!img.is_dirty());
    assert_ne!(std::fs::read(&path).expect("image file missing"),before);
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    assert_eq!(img.read_block(8).expect("read failed"),vec![0x22;512]);
    img.close().expect("close failed");
}

#[test]
fn zip_outer_wrapper() {
    let (_dir,path) = tmp("packed.zip");
    // build the zip by hand around a finished image
    let (_dir2,inner_path) = tmp("inner.2mg");
    let mut img = DiskImg::new();
    img.create_file(&inner_path,&prodos_2mg(280)).expect("create failed");
    img.write_block(3,&[0x33;512]).expect("write failed");
    img.close().expect("close failed");
    let inner = std::fs::read(&inner_path).expect("inner file missing");
    {
        use std::io::Write;
        let file = std::fs::File::create(&path).expect("create zip failed");
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("inner.2mg",zip::write::FileOptions::default()).expect("entry failed");
        zip.write_all(&inner).expect("write failed");
        zip.finish().expect("finish failed");
    }
    let mut img = a2img::open_image_from_file(&path,false).expect("open failed");
    assert_eq!(img.outer_format(),OuterFormat::Zip);
    assert_eq!(img.file_format(),Some(FileFormat::Dot2mg));
    assert_eq!(img.read_block(3).expect("read failed"),vec![0x33;512]);
    img.write_block(4,&[0x44;512]).expect("write failed");
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    assert_eq!(img.read_block(4).expect("read failed"),vec![0x44;512]);
    img.close().expect("close failed");
}

#[test]
fn nufx_round_trip() {
    let (_dir,path) = tmp("shrunk.shk");
    let mut img = DiskImg::new();
    let mut params = prodos_2mg(280);
    params.file_format = FileFormat::NuFx;
    params.storage_name = Some("HARDPRESSED".to_string());
    img.create_file(&path,&params).expect("create failed");
    for block in 0..280u64 {
        img.write_block(block,&vec![(block % 17) as u8;512]).expect("write failed");
    }
    img.close().expect("close failed");

    // compressible content should actually compress
    let packed_len = std::fs::metadata(&path).expect("stat failed").len();
    assert!(packed_len < 143360,"archive is {} bytes",packed_len);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::NuFx));
    assert_eq!(img.order(),SectorOrder::ProDOS);
    for block in [0u64,13,200,279] {
        assert_eq!(img.read_block(block).expect("read failed"),vec![(block % 17) as u8;512]);
    }
    img.close().expect("close failed");
}

#[test]
fn ddd_round_trip() {
    let (_dir,path) = tmp("squeezed.ddd");
    let mut img = DiskImg::new();
    let params = CreateParams {
        outer: OuterFormat::None,
        file_format: FileFormat::Ddd,
        physical: PhysicalFormat::Sectors,
        order: SectorOrder::DOS,
        fs_format: FsFormat::GenericDosOrd,
        geometry: CreateGeometry::TrackSectors(35,16),
        dos_volume: Some(254),
        nibble_descr: None,
        storage_name: None,
        skip_format: false
    };
    img.create_file(&path,&params).expect("create failed");
    for track in 0..35 {
        let buf = vec![track as u8;256];
        img.write_track_sector(track,(track % 16) as usize,&buf).expect("write failed");
    }
    img.close().expect("close failed");

    let packed_len = std::fs::metadata(&path).expect("stat failed").len();
    assert!(packed_len < 143360,"DDD file is {} bytes",packed_len);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::Ddd));
    assert_eq!(img.order(),SectorOrder::DOS);
    assert_eq!(img.dos_volume_num(),Some(254));
    for track in 0..35 {
        let buf = img.read_track_sector(track,(track % 16) as usize).expect("read failed");
        assert_eq!(buf,vec![track as u8;256]);
    }
    img.close().expect("close failed");
}

#[test]
fn fdi_reads_but_never_writes() {
    use a2img::nibble;
    use a2img::{Error,error_kind};
    // build a small FDI by hand: 512-byte header, then 35 GCR tracks
    let mut raw = vec![0u8;512];
    raw[0..27].copy_from_slice(b"Formatted Disk Image file\r\n");
    raw[27..37].copy_from_slice(b"a2img test");
    raw[57] = 0x0d;
    raw[58] = 0x0a;
    raw[139] = 0x1a;
    raw[140..142].copy_from_slice(&[0x02,0x00]); // version
    raw[142..144].copy_from_slice(&[0x00,34]); // last track
    raw[144] = 0; // last head
    raw[145] = 1; // 5.25 inch
    for track in 0..35 {
        raw[152 + 2*track] = 0x80; // GCR
        raw[152 + 2*track + 1] = 26; // 26 pages = 6656 bytes
    }
    let descr = &nibble::std_nibble_descrs()[0];
    for track in 0..35 {
        let trk = nibble::format_track(descr,254,track,6656).expect("format failed");
        raw.extend_from_slice(&trk);
    }
    let mut img = a2img::open_image_from_buffer(raw,false).expect("open failed");
    assert_eq!(img.file_format(),Some(FileFormat::Fdi));
    assert_eq!(img.physical(),PhysicalFormat::NibVar);
    assert!(img.read_only());
    assert_eq!(img.num_tracks(),35);
    assert_eq!(img.nibble_track_length(3).expect("length failed"),6656);
    assert_eq!(img.read_track_sector(3,9).expect("read failed"),vec![0;256]);
    let err = img.write_track_sector(3,9,&[0;256]).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::AccessDenied));
    img.close().expect("close failed");
}

#[test]
fn trackstar_round_trip() {
    let (_dir,path) = tmp("capture.app");
    let mut img = DiskImg::new();
    let params = CreateParams {
        outer: OuterFormat::None,
        file_format: FileFormat::TrackStar,
        physical: PhysicalFormat::NibVar,
        order: SectorOrder::Physical,
        fs_format: FsFormat::GenericPhysicalOrd,
        geometry: CreateGeometry::TrackSectors(40,16),
        dos_volume: Some(254),
        nibble_descr: None,
        storage_name: None,
        skip_format: false
    };
    img.create_file(&path,&params).expect("create failed");
    img.close().expect("close failed");
    assert_eq!(std::fs::metadata(&path).expect("stat failed").len(),40*6384);

    let mut img = a2img::open_image_from_file(&path,false).expect("reopen failed");
    assert_eq!(img.file_format(),Some(FileFormat::TrackStar));
    assert_eq!(img.physical(),PhysicalFormat::NibVar);
    assert_eq!(img.num_tracks(),40);
    assert_eq!(img.nibble_track_length(0).expect("length failed"),6250);
    assert_eq!(img.nibble_track_length(39).expect("length failed"),0);
    // the formatted tracks carry readable empty sectors
    let buf = img.read_track_sector(11,5).expect("read failed");
    assert_eq!(buf,vec![0;256]);
    img.write_track_sector(11,5,&[0x5a;256]).expect("write failed");
    img.close().expect("close failed");

    let mut img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    assert_eq!(img.read_track_sector(11,5).expect("read failed"),vec![0x5a;256]);
    img.close().expect("close failed");
}
