// tests of sub-volume images: windows, dirty propagation, independence
use std::cell::RefCell;
use std::rc::Rc;
use a2img::image::{DiskImg,CreateParams,CreateGeometry};
use a2img::skew::SectorOrder;
use a2img::{Error,error_kind};

fn tmp(name: &str) -> (tempfile::TempDir,String) {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join(name).to_str().unwrap().to_string();
    (dir,path)
}

fn make_parent(path: &str,blocks: u64) -> Rc<RefCell<DiskImg>> {
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::ProDOS,CreateGeometry::Blocks(blocks));
    img.create_file(path,&params).expect("create failed");
    Rc::new(RefCell::new(img))
}

#[test]
fn adjacent_halves() {
    let (_dir,path) = tmp("double.po");
    let parent = make_parent(&path,1600);
    let mut first = DiskImg::open_sub_block_range(&parent,0,800).expect("first half failed");
    let mut second = DiskImg::open_sub_block_range(&parent,800,800).expect("second half failed");
    assert_eq!(first.num_blocks(),800);
    assert_eq!(second.num_blocks(),800);
    first.write_block(0,&[0xaa;512]).expect("write failed");
    second.write_block(0,&[0xbb;512]).expect("write failed");
    first.close().expect("close failed");
    second.close().expect("close failed");
    assert_eq!(parent.borrow_mut().read_block(0).expect("read failed"),vec![0xaa;512]);
    assert_eq!(parent.borrow_mut().read_block(800).expect("read failed"),vec![0xbb;512]);
    parent.borrow_mut().close().expect("close failed");
}

#[test]
fn child_writes_stay_inside_window() {
    let (_dir,path) = tmp("fenced.po");
    let parent = make_parent(&path,1600);
    {
        let mut p = parent.borrow_mut();
        for block in [99u64,200,1599] {
            p.write_block(block,&[0x77;512]).expect("seed write failed");
        }
    }
    let mut child = DiskImg::open_sub_block_range(&parent,100,100).expect("sub-range failed");
    for block in 0..100u64 {
        child.write_block(block,&[0xcc;512]).expect("write failed");
    }
    // out-of-range child access is refused
    let err = child.read_block(100).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::InvalidBlock));
    child.close().expect("close failed");
    let mut p = parent.borrow_mut();
    // neighbors untouched, window fully painted
    assert_eq!(p.read_block(99).expect("read failed"),vec![0x77;512]);
    assert_eq!(p.read_block(100).expect("read failed"),vec![0xcc;512]);
    assert_eq!(p.read_block(199).expect("read failed"),vec![0xcc;512]);
    assert_eq!(p.read_block(200).expect("read failed"),vec![0x77;512]);
    assert_eq!(p.read_block(1599).expect("read failed"),vec![0x77;512]);
    p.close().expect("close failed");
}

#[test]
fn dirty_propagates_to_ancestors() {
    let (_dir,path) = tmp("chain.po");
    let parent = make_parent(&path,1600);
    parent.borrow_mut().flush(a2img::image::FlushMode::All).expect("flush failed");
    assert!(!parent.borrow().is_dirty());
    let child = DiskImg::open_sub_block_range(&parent,0,800).expect("sub-range failed");
    let child = Rc::new(RefCell::new(child));
    let mut grandchild = DiskImg::open_sub_block_range(&child,10,10).expect("nested failed");
    assert!(!child.borrow().is_dirty());
    grandchild.write_block(0,&[0x01;512]).expect("write failed");
    assert!(grandchild.is_dirty());
    assert!(child.borrow().is_dirty());
    assert!(parent.borrow().is_dirty());
    grandchild.close().expect("close failed");
    child.borrow_mut().close().expect("close failed");
    // the nested write landed at parent block 10
    assert_eq!(parent.borrow_mut().read_block(10).expect("read failed"),vec![0x01;512]);
    parent.borrow_mut().close().expect("close failed");
}

#[test]
fn child_inherits_read_only() {
    let (_dir,path) = tmp("ro.po");
    {
        let parent = make_parent(&path,1600);
        parent.borrow_mut().close().expect("close failed");
    }
    let img = a2img::open_image_from_file(&path,true).expect("reopen failed");
    let parent = Rc::new(RefCell::new(img));
    let mut child = DiskImg::open_sub_block_range(&parent,0,800).expect("sub-range failed");
    assert!(child.read_only());
    let err = child.write_block(0,&[0;512]).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::AccessDenied));
    child.close().expect("close failed");
    parent.borrow_mut().close().expect("close failed");
}

#[test]
fn sector_ranges_start_on_track_boundaries() {
    let (_dir,path) = tmp("tracks.do");
    let mut img = DiskImg::new();
    let params = CreateParams::unadorned(SectorOrder::DOS,CreateGeometry::TrackSectors(35,16));
    img.create_file(&path,&params).expect("create failed");
    let parent = Rc::new(RefCell::new(img));
    // off-boundary request is refused outright
    let err = DiskImg::open_sub_sector_range(&parent,1,4,32).unwrap_err();
    assert_eq!(error_kind(&err),Some(Error::InvalidArg));
    let mut child = DiskImg::open_sub_sector_range(&parent,1,0,32).expect("sector range failed");
    assert_eq!(child.num_tracks(),2);
    assert_eq!(child.num_sect_per_track(),16);
    child.write_track_sector(0,0,&[0xdd;256]).expect("write failed");
    child.close().expect("close failed");
    // child track 0 is parent track 1
    assert_eq!(parent.borrow_mut().read_track_sector(1,0).expect("read failed"),vec![0xdd;256]);
    parent.borrow_mut().close().expect("close failed");
}

#[test]
fn sub_range_bounds_are_checked() {
    let (_dir,path) = tmp("bounds.po");
    let parent = make_parent(&path,800);
    assert!(DiskImg::open_sub_block_range(&parent,700,200).is_err());
    assert!(DiskImg::open_sub_block_range(&parent,0,0).is_err());
    parent.borrow_mut().close().expect("close failed");
}
