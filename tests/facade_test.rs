// test of format identification and the top level helpers
use std::str::FromStr;
use sectorkit::img::{DiskImage,DiskImageType,Error,Geometry,Image,MediaType};
use sectorkit::img::hdcopy;

type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn hdcopy_image() -> Vec<u8> {
    let mut ans = vec![39,9];
    let mut map = vec![0;hdcopy::TRACK_MAP_LEN];
    map[0] = 1;
    map[1] = 1;
    ans.append(&mut map);
    for track in 0..2 {
        let block = hdcopy::compress(&vec![track as u8 + 0x10;9*512]);
        ans.extend_from_slice(&u16::to_le_bytes(block.len() as u16));
        ans.extend_from_slice(&block);
    }
    ans
}

#[test]
fn identify_each_format() -> STDRESULT {
    init_logger();
    let hdc = hdcopy_image();
    assert_eq!(Image::identify_type(&hdc,None),Some(DiskImageType::HDCOPY));
    let wcd = sectorkit::create_img(DiskImageType::WCDISK,Geometry::chs(40,2,9,512),None)?.to_bytes()?;
    assert_eq!(Image::identify_type(&wcd,None),Some(DiskImageType::WCDISK));
    let raw = vec![0;368640];
    assert_eq!(Image::identify_type(&raw,None),Some(DiskImageType::RAW));
    assert_eq!(Image::identify_type(&[0;1000],None),None);
    Ok(())
}

#[test]
fn open_dispatches() -> STDRESULT {
    init_logger();
    let mut img = sectorkit::create_img_from_bytestream(&hdcopy_image(),None)?;
    assert_eq!(img.what_am_i(),DiskImageType::HDCOPY);
    assert_eq!(img.sectors(),720);
    assert_eq!(img.read_sector(9)?,vec![0x11;512]);
    assert_eq!(img.read_sector(18)?,vec![0;512]);
    assert_eq!(img.read_sector_chs(0,1,0)?,vec![0x11;512]);
    assert!(matches!(img.read_sector_chs(0,2,0),Err(Error::OutOfRange { .. })));
    assert!(matches!(img,Image::HdCopy(_)));
    Ok(())
}

#[test]
fn extension_hint() -> STDRESULT {
    init_logger();
    // an HD-Copy image cannot be opened as raw
    assert!(sectorkit::create_img_from_bytestream(&hdcopy_image(),Some("img")).is_err());
    let img = sectorkit::create_img_from_bytestream(&hdcopy_image(),Some("HDC"))?;
    assert_eq!(img.what_am_i(),DiskImageType::HDCOPY);
    // unknown extension tries everything
    let img = sectorkit::create_img_from_bytestream(&hdcopy_image(),Some("xyz"))?;
    assert_eq!(img.what_am_i(),DiskImageType::HDCOPY);
    Ok(())
}

#[test]
fn image_type_names() {
    for typ in DiskImageType::ALL {
        assert_eq!(DiskImageType::from_str(&typ.to_string()),Ok(typ));
    }
    assert!(DiskImageType::from_str("woz").is_err());
}

#[test]
fn raw_read_write() -> STDRESULT {
    init_logger();
    let mut img = sectorkit::create_img(DiskImageType::RAW,Geometry::chs(80,2,18,512),None)?;
    assert_eq!(img.geometry().media_type,MediaType::Dos35Hd);
    img.write_sectors(2,&vec![0x77;1000])?;
    img.write_sector(0,&[1;512])?;
    let mut expected = vec![0x77;1000];
    expected.resize(1024,0);
    assert_eq!(img.read_sectors(2,2)?,expected);
    assert_eq!(img.read_sector(0)?,vec![1;512]);
    assert!(matches!(img.write_sector(2880,&[0;512]),Err(Error::OutOfRange { addr: 2880, max: 2879 })));
    Ok(())
}

#[test]
fn raw_needs_standard_medium() -> STDRESULT {
    init_logger();
    for geometry in [Geometry::chs(41,2,9,512),Geometry::chs(80,2,10,512),Geometry::chs(40,2,9,256)] {
        assert!(sectorkit::create_img(DiskImageType::RAW,geometry,None).is_err());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ssdd.img");
    let path_str = path.to_str().expect("bad path");
    let mut img = sectorkit::create_img(DiskImageType::RAW,Geometry::chs(40,1,9,512),None)?;
    img.write_sector(359,&[0x99;512])?;
    sectorkit::save_img(&mut img,path_str)?;
    let mut img = sectorkit::create_img_from_file(path_str)?;
    assert_eq!(img.what_am_i(),DiskImageType::RAW);
    assert_eq!(img.geometry().media_type,MediaType::Dos525SsDd9);
    assert_eq!(img.sectors(),360);
    assert_eq!(img.read_sector(359)?,vec![0x99;512]);
    Ok(())
}

#[test]
fn save_and_reopen() -> STDRESULT {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blank.hdc");
    let path_str = path.to_str().expect("bad path");
    let mut img = sectorkit::create_img(DiskImageType::HDCOPY,Geometry::chs(80,2,15,512),None)?;
    img.write_sector(2399,&[0x5a;512])?;
    sectorkit::save_img(&mut img,path_str)?;
    let mut img = sectorkit::create_img_from_file(path_str)?;
    assert_eq!(img.what_am_i(),DiskImageType::HDCOPY);
    assert_eq!(img.geometry().media_type,MediaType::Dos525Hd);
    assert_eq!(img.read_sector(2399)?,vec![0x5a;512]);
    assert!(sectorkit::create_img_from_file(dir.path().join("missing.hdc").to_str().expect("bad path")).is_err());
    Ok(())
}

#[test]
fn wcdisk_through_facade() -> STDRESULT {
    init_logger();
    let mut img = sectorkit::create_img(DiskImageType::WCDISK,Geometry::chs(40,1,8,512),Some("label"))?;
    assert_eq!(img.geometry().media_type,MediaType::Dos525SsDd8);
    img.write_sector(0,&[0xf6;512])?;
    let buf = img.close()?;
    let img = sectorkit::create_img_from_bytestream(&buf,Some("dsk"))?;
    assert_eq!(img.what_am_i(),DiskImageType::WCDISK);
    assert_eq!(img.comments(),Some("label".to_string()));
    assert_eq!(img.bad_sectors().len(),319);
    let meta = json::parse(&img.get_metadata(Some(2)))?;
    assert_eq!(meta["wcdisk"]["comments"],"label");
    assert_eq!(meta["wcdisk"]["bad_sectors"],"1-319");
    assert_eq!(meta["wcdisk"]["media_type"],"5.25 inch 160K");
    Ok(())
}
