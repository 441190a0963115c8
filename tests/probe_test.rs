// tests of format detection: every wrapper identified by content alone,
// random streams rejected, file systems and orders pinned down
use a2img::image::{DiskImg,CreateParams,CreateGeometry,PhysicalFormat};
use a2img::outer::OuterFormat;
use a2img::wrap::FileFormat;
use a2img::skew::{self,SectorOrder};
use a2img::fsprobe::FsFormat;
use a2img::{Error,error_kind};

fn tmp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("no temp dir")
}

fn path_in(dir: &tempfile::TempDir,name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

/// build an image of the given wrapper format and hand back its bytes
fn build(dir: &tempfile::TempDir,name: &str,file_format: FileFormat,physical: PhysicalFormat,order: SectorOrder,geometry: CreateGeometry) -> Vec<u8> {
    let path = path_in(dir,name);
    let mut img = DiskImg::new();
    let params = CreateParams {
        outer: OuterFormat::None,
        file_format,
        physical,
        order,
        fs_format: match order {
            SectorOrder::DOS => FsFormat::GenericDosOrd,
            SectorOrder::Physical => FsFormat::GenericPhysicalOrd,
            _ => FsFormat::GenericProDosOrd
        },
        geometry,
        dos_volume: None,
        nibble_descr: None,
        storage_name: None,
        skip_format: false
    };
    img.create_file(&path,&params).expect("create failed");
    img.write_block(0,&[0x5a;512]).ok(); // some content, where possible
    img.close().expect("close failed");
    std::fs::read(&path).expect("image file missing")
}

#[test]
fn corpus_is_identified_without_extensions() {
    let dir = tmp_dir();
    let cases: Vec<(&str,FileFormat,PhysicalFormat,SectorOrder,CreateGeometry)> = vec![
        ("a.2mg",FileFormat::Dot2mg,PhysicalFormat::Sectors,SectorOrder::ProDOS,CreateGeometry::Blocks(280)),
        ("b.dsk",FileFormat::DiskCopy42,PhysicalFormat::Sectors,SectorOrder::ProDOS,CreateGeometry::Blocks(1600)),
        ("c.shk",FileFormat::NuFx,PhysicalFormat::Sectors,SectorOrder::ProDOS,CreateGeometry::Blocks(280)),
        ("d.ddd",FileFormat::Ddd,PhysicalFormat::Sectors,SectorOrder::DOS,CreateGeometry::TrackSectors(35,16)),
        ("e.hdv",FileFormat::Sim2eHdv,PhysicalFormat::Sectors,SectorOrder::ProDOS,CreateGeometry::Blocks(280)),
        ("f.app",FileFormat::TrackStar,PhysicalFormat::NibVar,SectorOrder::Physical,CreateGeometry::TrackSectors(40,16)),
        ("g.nib",FileFormat::Unadorned,PhysicalFormat::Nib6656,SectorOrder::Physical,CreateGeometry::TrackSectors(35,16)),
    ];
    for (name,file_format,physical,order,geometry) in cases {
        let raw = build(&dir,name,file_format,physical,order,geometry);
        // feed the bytes back with no filename at all
        let mut img = a2img::open_image_from_buffer(raw,true)
            .unwrap_or_else(|e| panic!("could not identify {}: {}",name,e));
        assert_eq!(img.file_format(),Some(file_format),"misidentified {}",name);
        img.close().expect("close failed");
    }
}

#[test]
fn random_streams_are_rejected_not_misfiled() {
    // deliberately odd lengths so the unadorned size gates cannot match
    let mut seed: u32 = 0x1234_5678;
    for len in [1001usize,33333,100001,232961] {
        let mut buf = vec![0;len];
        for i in 0..len {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            buf[i] = (seed >> 24) as u8;
        }
        let err = a2img::open_image_from_buffer(buf,true).unwrap_err();
        assert_eq!(error_kind(&err),Some(Error::UnrecognizedFileFmt),"length {}",len);
    }
}

#[test]
fn empty_stream_is_rejected() {
    let err = a2img::open_image_from_buffer(Vec::new(),true).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::UnrecognizedFileFmt));
}

#[test]
fn reliable_extension_with_wrong_contents_fails() {
    let dir = tmp_dir();
    let path = path_in(&dir,"fake.2mg");
    std::fs::write(&path,vec![0u8;143360]).expect("write failed");
    let err = a2img::open_image_from_file(&path,true).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::BadFileFormat));
}

/// a minimal DOS 3.3 disk: VTOC plus a standard descending catalog
fn dos33_disk() -> Vec<u8> {
    let mut disk = vec![0u8;143360];
    let vtoc = 17*4096;
    disk[vtoc+0x01] = 17; // catalog track
    disk[vtoc+0x02] = 15; // catalog sector
    disk[vtoc+0x03] = 3;  // DOS release
    disk[vtoc+0x27] = 122;
    disk[vtoc+0x34] = 35;
    disk[vtoc+0x35] = 16;
    disk[vtoc+0x36] = 0;
    disk[vtoc+0x37] = 1;
    for s in (2..=15usize).rev() {
        let off = vtoc + s*256;
        disk[off+1] = 17;
        disk[off+2] = (s-1) as u8;
    }
    disk
}

#[test]
fn dos_filesystem_and_order_are_detected() {
    let mut img = a2img::open_image_from_buffer(dos33_disk(),true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::Dos33);
    assert_eq!(img.order(),SectorOrder::DOS);
    assert_eq!(img.file_sys_order(),SectorOrder::DOS);
    img.close().expect("close failed");
}

#[test]
fn dos_disk_in_prodos_order_is_untangled() {
    // shuffle the DOS disk into ProDOS sector order, as a ".po" of a DOS
    // volume would be
    let dos = dos33_disk();
    let mut shuffled = vec![0u8;143360];
    for track in 0..35 {
        for s in 0..16 {
            let slot = skew::from_raw(skew::to_raw(s,SectorOrder::DOS),SectorOrder::ProDOS);
            let src = track*4096 + s*256;
            let dst = track*4096 + slot*256;
            shuffled[dst..dst+256].copy_from_slice(&dos[src..src+256]);
        }
    }
    let mut img = a2img::open_image_from_buffer(shuffled,true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::Dos33);
    assert_eq!(img.order(),SectorOrder::ProDOS);
    assert_eq!(img.file_sys_order(),SectorOrder::DOS);
    // logical reads come out the same either way
    let vtoc = img.read_track_sector(17,0).expect("read failed");
    assert_eq!(vtoc[0x01],17);
    assert_eq!(vtoc[0x27],122);
    img.close().expect("close failed");
}

#[test]
fn override_rejects_disagreeing_order() {
    let mut img = a2img::open_image_from_buffer(dos33_disk(),false).expect("open failed");
    assert_eq!(img.order(),SectorOrder::DOS);
    // generic overrides are always accepted
    img.override_format(PhysicalFormat::Sectors,FsFormat::GenericProDosOrd,SectorOrder::ProDOS).expect("generic override failed");
    assert_eq!(img.order(),SectorOrder::ProDOS);
    // physical format can never be overridden
    let err = img.override_format(PhysicalFormat::Nib6656,FsFormat::GenericDosOrd,SectorOrder::DOS).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::InvalidArg));
    // putting it back through the lenient DOS test works
    img.override_format(PhysicalFormat::Sectors,FsFormat::Dos33,SectorOrder::DOS).expect("DOS override failed");
    assert_eq!(img.fs_format(),FsFormat::Dos33);
    img.close().expect("close failed");
}

#[test]
fn prodos_volume_is_detected() {
    let mut disk = vec![0u8;819200];
    // volume directory key block at block 2
    let key = 2*512;
    disk[key+4] = 0xf6; // storage type F, name length 6
    disk[key+5..key+11].copy_from_slice(b"MYDISK");
    disk[key+0x23] = 0x27;
    disk[key+0x24] = 0x0d;
    disk[key+0x2a] = (1600u16 & 0xff) as u8;
    disk[key+0x2b] = (1600u16 >> 8) as u8;
    let mut img = a2img::open_image_from_buffer(disk,true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::ProDos);
    assert_eq!(img.order(),SectorOrder::ProDOS);
    img.close().expect("close failed");
}

/// a VTOC for the 50-track 32-sector "wide" DOS volumes
fn wide_vtoc(buf: &mut [u8],offset: usize) {
    buf[offset+0x01] = 17;
    buf[offset+0x02] = 31;
    buf[offset+0x27] = 122;
    buf[offset+0x34] = 50;
    buf[offset+0x35] = 32;
    buf[offset+0x36] = 0;
    buf[offset+0x37] = 1;
}

#[test]
fn unidos_pair_is_detected() {
    let mut disk = vec![0u8;819200];
    wide_vtoc(&mut disk,17*32*256);
    wide_vtoc(&mut disk,409600 + 17*32*256);
    let mut img = a2img::open_image_from_buffer(disk,true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::UniDos);
    assert_eq!(img.num_sect_per_track(),32);
    assert_eq!(img.num_tracks(),100);
    assert_eq!(img.num_blocks(),1600);
    assert_eq!(img.file_sys_order(),SectorOrder::DOS);
    img.close().expect("close failed");
}

#[test]
fn ozdos_pair_is_detected() {
    let mut disk = vec![0u8;819200];
    wide_vtoc(&mut disk,2*17*32*256);
    wide_vtoc(&mut disk,2*17*32*256 + 256);
    let mut img = a2img::open_image_from_buffer(disk,true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::OzDos);
    assert_eq!(img.num_sect_per_track(),32);
    img.close().expect("close failed");
}

#[test]
fn wide_dos_half_is_detected() {
    let mut disk = vec![0u8;409600];
    wide_vtoc(&mut disk,17*32*256);
    let mut img = a2img::open_image_from_buffer(disk,true).expect("open failed");
    assert_eq!(img.fs_format(),FsFormat::Dos33);
    assert_eq!(img.num_sect_per_track(),32);
    assert_eq!(img.num_tracks(),50);
    img.close().expect("close failed");
}

#[test]
fn zero_image_clears_blocks() {
    let dir = tmp_dir();
    let path = path_in(&dir,"wipe.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    img.write_block(10,&[0xff;512]).expect("write failed");
    img.zero_image().expect("zero failed");
    assert_eq!(img.read_block(10).expect("read failed"),vec![0;512]);
    img.close().expect("close failed");
}

#[test]
fn scan_progress_can_cancel() {
    use std::rc::Rc;
    let dir = tmp_dir();
    let path = path_in(&dir,"cancel.po");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(280));
    img.create_file(&path,&params).expect("create failed");
    img.set_scan_progress_callback(Some(Rc::new(|_msg: &str,count: usize| count < 50)));
    let err = img.zero_image().unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::Cancelled));
    img.set_scan_progress_callback(None);
    img.zero_image().expect("zero failed");
    img.close().expect("close failed");
}
