// test of HD-Copy disk image module
use proptest::prelude::*;
use sectorkit::img::{DiskImage,DiskImageType,Error,Geometry};
use sectorkit::img::hdcopy::{self,HdCopy};

type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const SPT: usize = 9;
const TRACK_SIZE: usize = SPT*512;

/// track whose sectors are filled with a pattern that depends on the track
fn pattern_track(track: usize) -> Vec<u8> {
    let mut ans = Vec::new();
    for sec in 0..SPT {
        for i in 0..512 {
            // leave some runs for the compressor
            ans.push(match i < 100 { true => 0xe5, false => (track*31 + sec*7 + i) as u8 });
        }
    }
    ans
}

/// build an HD-Copy file by hand, with the given tracks present
fn build_image(last_cyl: u8,present: &[(usize,Vec<u8>)]) -> Vec<u8> {
    let mut ans = vec![last_cyl,SPT as u8];
    let mut map = vec![0;hdcopy::TRACK_MAP_LEN];
    for (track,_) in present {
        map[*track] = 1;
    }
    ans.append(&mut map);
    for (_,dat) in present {
        let block = hdcopy::compress(dat);
        ans.extend_from_slice(&u16::to_le_bytes(block.len() as u16));
        ans.extend_from_slice(&block);
    }
    ans
}

#[test]
fn forty_track_image_with_absent_tracks() -> STDRESULT {
    let buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    assert!(HdCopy::identify(&buf));
    let mut img = HdCopy::from_bytes(&buf)?;
    assert_eq!(img.what_am_i(),DiskImageType::HDCOPY);
    assert_eq!(img.sectors(),720);
    assert_eq!(img.geometry(),Geometry::chs(40,2,9,512));
    assert_eq!(img.cached_tracks(),0);
    // absent tracks read as zeros and are not expanded
    assert_eq!(img.read_sector(20)?,vec![0;512]);
    assert_eq!(img.read_sector(719)?,vec![0;512]);
    assert_eq!(img.cached_tracks(),0);
    // present tracks are expanded on first touch
    assert_eq!(img.read_sector(10)?,pattern_track(1)[512..1024].to_vec());
    assert_eq!(img.read_sector(0)?,pattern_track(0)[0..512].to_vec());
    assert_eq!(img.read_sector(3)?,pattern_track(0)[3*512..4*512].to_vec());
    assert_eq!(img.cached_tracks(),2);
    assert_eq!(img.present_tracks().to_string(),"0-1");
    assert_eq!(img.read_sector(720),Err(Error::OutOfRange { addr: 720, max: 719 }));
    Ok(())
}

#[test]
fn read_several_sectors() -> STDRESULT {
    let buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let mut img = HdCopy::from_bytes(&buf)?;
    let dat = img.read_sectors(8,3)?;
    assert_eq!(dat.len(),3*512);
    assert_eq!(dat[0..512].to_vec(),pattern_track(0)[8*512..9*512].to_vec());
    assert_eq!(dat[512..1024].to_vec(),pattern_track(1)[0..512].to_vec());
    assert_eq!(dat[1024..1536].to_vec(),pattern_track(1)[512..1024].to_vec());
    assert!(img.read_sectors(719,2).is_err());
    Ok(())
}

#[test]
fn wrong_expanded_size_is_corrupt() -> STDRESULT {
    let mut short = pattern_track(1);
    short.truncate(TRACK_SIZE - 1);
    let buf = build_image(39,&[(0,pattern_track(0)),(1,short)]);
    let mut img = HdCopy::from_bytes(&buf)?;
    // the damage is confined to track 1
    assert!(img.read_sector(0).is_ok());
    match img.read_sector(9) {
        Err(Error::CorruptData { track, reason: _ }) => assert_eq!(track,1),
        other => panic!("expected corrupt data, got {:?}",other.map(|v| v.len()))
    }
    Ok(())
}

#[test]
fn truncated_file_fails_on_touch() -> STDRESULT {
    let mut buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let len = buf.len();
    buf.truncate(len - 10);
    let mut img = HdCopy::from_bytes(&buf)?;
    assert!(img.read_sector(0).is_ok());
    assert!(matches!(img.read_sector(9),Err(Error::CorruptData { track: 1, .. })));
    Ok(())
}

#[test]
fn save_with_truncated_track() -> STDRESULT {
    let mut buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let len = buf.len();
    buf.truncate(len - 10);
    let mut img = HdCopy::from_bytes(&buf)?;
    img.write_sector(200,&[0x3c;512])?;
    let out = img.to_bytes()?;
    let mut img = HdCopy::from_bytes(&out)?;
    assert_eq!(img.read_sector(0)?,pattern_track(0)[0..512].to_vec());
    assert_eq!(img.read_sector(9)?,vec![0;512]);
    assert_eq!(img.read_sector(200)?,vec![0x3c;512]);
    assert_eq!(img.present_tracks().to_string(),"0-1,22");
    Ok(())
}

#[test]
fn identify_rejects() {
    let good = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let mut bad = good.clone();
    bad[1] = 7;
    assert!(!HdCopy::identify(&bad));
    let mut bad = good.clone();
    bad[0] = 36;
    assert!(!HdCopy::identify(&bad));
    let mut bad = good.clone();
    bad[3] = 0;
    assert!(!HdCopy::identify(&bad));
    let mut bad = good.clone();
    bad[50] = 2;
    assert!(!HdCopy::identify(&bad));
    assert!(!HdCopy::identify(&good[0..100]));
    assert!(HdCopy::from_bytes(&bad).is_err());
}

#[test]
fn write_and_flatten() -> STDRESULT {
    let buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let mut img = HdCopy::from_bytes(&buf)?;
    // untouched image flattens to the same bytes
    assert_eq!(img.to_bytes()?,buf);
    img.write_sector(1,&[0xaa;512])?;
    img.write_sector(100,&[1,2,3])?;
    img.write_sector(1,&[0x55;512])?;
    let out = img.close()?;
    let mut img = HdCopy::from_bytes(&out)?;
    assert_eq!(img.read_sector(1)?,vec![0x55;512]);
    let mut expected = vec![1,2,3];
    expected.resize(512,0);
    assert_eq!(img.read_sector(100)?,expected);
    assert_eq!(img.read_sector(0)?,pattern_track(0)[0..512].to_vec());
    assert_eq!(img.read_sector(101)?,vec![0;512]);
    assert_eq!(img.present_tracks().to_string(),"0-1,11");
    Ok(())
}

#[test]
fn create_blank() -> STDRESULT {
    let mut img = HdCopy::create(Geometry::chs(80,2,18,512))?;
    assert_eq!(img.sectors(),2880);
    img.write_sector(2879,&[0xff;512])?;
    let out = img.to_bytes()?;
    assert!(HdCopy::identify(&out));
    let mut img = HdCopy::from_bytes(&out)?;
    assert_eq!(img.read_sector(2879)?,vec![0xff;512]);
    assert_eq!(img.read_sector(0)?,vec![0;512]);
    assert!(HdCopy::create(Geometry::chs(80,1,18,512)).is_err());
    assert!(HdCopy::create(Geometry::chs(80,2,41,512)).is_err());
    Ok(())
}

#[test]
fn metadata() -> STDRESULT {
    let buf = build_image(39,&[(0,pattern_track(0)),(1,pattern_track(1))]);
    let img = HdCopy::from_bytes(&buf)?;
    let meta = json::parse(&img.get_metadata(None))?;
    assert_eq!(meta["hdcopy"]["geometry"]["sectors"],720);
    assert_eq!(meta["hdcopy"]["header"]["last_cylinder"],"27");
    assert_eq!(meta["hdcopy"]["present_tracks"],"0-1");
    Ok(())
}

proptest! {
    #[test]
    fn compress_round_trip(track in prop::collection::vec(prop_oneof![Just(0u8),Just(0xf6u8),any::<u8>()],TRACK_SIZE)) {
        let block = hdcopy::compress(&track);
        prop_assert_eq!(hdcopy::expand(&block,TRACK_SIZE),Ok(track));
    }
}
