// test of WC DiskImage module
use sectorkit::img::{DiskImage,DiskImageType,Error,Geometry};
use sectorkit::img::wcdisk::{self,WcDisk,SectorFlag};

type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn file_header(cyl: u8,spt: u8,heads: u8,extra_tracks: [u8;4],extra_flags: u8) -> Vec<u8> {
    let mut ans = wcdisk::SIGNATURE.to_vec();
    ans.extend_from_slice(&u16::to_le_bytes(wcdisk::VERSION));
    ans.extend_from_slice(&[cyl,spt,heads]);
    ans.extend_from_slice(&extra_tracks);
    ans.push(extra_flags);
    ans.extend_from_slice(&[0;4]);
    let crc = wcdisk::crc16(&ans);
    ans.extend_from_slice(&u16::to_le_bytes(crc));
    ans
}

fn record(flag: SectorFlag,cyl: usize,head: usize,sec: usize,crc: u16,dat: &[u8]) -> Vec<u8> {
    let mut ans = vec![flag as u8,head as u8,sec as u8,cyl as u8];
    ans.extend_from_slice(&u16::to_le_bytes(crc));
    ans.extend_from_slice(dat);
    ans
}

fn sector_data(cyl: usize,head: usize,sec: usize) -> Vec<u8> {
    (0..512).map(|i| (i + cyl*3 + head*5 + sec*7) as u8).collect()
}

/// 2 cylinders, 2 heads, 4 sectors, with damage planted at known places
fn damaged_image() -> Vec<u8> {
    let mut ans = file_header(2,4,2,[0;4],0);
    for cyl in 0..2 {
        for head in 0..2 {
            for sec in 1..=4 {
                let dat = sector_data(cyl,head,sec);
                let rec = match (cyl,head,sec) {
                    // stored CRC is wrong
                    (0,0,2) => record(SectorFlag::Normal,cyl,head,sec,wcdisk::crc16(&dat) ^ 0x1234,&dat),
                    (0,1,3) => record(SectorFlag::BadSector,cyl,head,sec,0,&[]),
                    (1,0,1) => record(SectorFlag::RepeatByte,cyl,head,sec,0x00e6,&[]),
                    _ => record(SectorFlag::Normal,cyl,head,sec,wcdisk::crc16(&dat),&dat)
                };
                ans.append(&mut rec.clone());
            }
        }
    }
    ans
}

#[test]
fn bad_sector_synthesis() -> STDRESULT {
    let buf = damaged_image();
    assert!(WcDisk::identify(&buf));
    let mut img = WcDisk::from_bytes(&buf)?;
    assert_eq!(img.what_am_i(),DiskImageType::WCDISK);
    assert_eq!(img.sectors(),16);
    // CRC mismatch: correct size, no error, stored bytes kept
    assert_eq!(img.read_sector(1)?,sector_data(0,0,2));
    // bad sector record: zeros
    assert_eq!(img.read_sector(6)?,vec![0;512]);
    // repeat byte
    assert_eq!(img.read_sector(8)?,vec![0xe6;512]);
    assert_eq!(img.read_sector(15)?,sector_data(1,1,4));
    assert_eq!(img.bad_sectors().to_string(),"1,6");
    assert!(!img.writable());
    Ok(())
}

#[test]
fn address_mismatch_is_fatal() {
    let mut buf = file_header(1,2,1,[0;4],0);
    buf.append(&mut record(SectorFlag::Normal,0,0,2,wcdisk::crc16(&[0;512]),&[0;512]));
    buf.append(&mut record(SectorFlag::Normal,0,0,1,wcdisk::crc16(&[0;512]),&[0;512]));
    assert!(matches!(WcDisk::from_bytes(&buf),Err(Error::CorruptData { track: 0, .. })));
}

#[test]
fn truncated_image_is_fatal() {
    let mut buf = damaged_image();
    buf.truncate(buf.len() - 100);
    assert!(matches!(WcDisk::from_bytes(&buf),Err(Error::CorruptData { .. })));
}

#[test]
fn extra_tracks_and_trailers() -> STDRESULT {
    let mut buf = file_header(1,2,2,[0,1,0,0],0x03);
    for head in 0..2 {
        for sec in 1..=2 {
            let dat = sector_data(0,head,sec);
            buf.append(&mut record(SectorFlag::Normal,0,head,sec,wcdisk::crc16(&dat),&dat));
        }
    }
    // extra track on head 1 only
    for sec in 1..=2 {
        let dat = sector_data(1,1,sec);
        buf.append(&mut record(SectorFlag::Normal,1,1,sec,wcdisk::crc16(&dat),&dat));
    }
    let comment = "copied 1991";
    buf.append(&mut record(SectorFlag::Comment,0,0,0,comment.len() as u16,comment.as_bytes()));
    let dir = "COMMAND.COM";
    buf.append(&mut record(SectorFlag::Directory,0,0,0,dir.len() as u16,dir.as_bytes()));
    let mut img = WcDisk::from_bytes(&buf)?;
    assert_eq!(img.geometry().cylinders,2);
    assert_eq!(img.sectors(),8);
    assert_eq!(img.read_sector(6)?,sector_data(1,1,1));
    assert_eq!(img.read_sector(7)?,sector_data(1,1,2));
    // head 0 has no extra track
    assert_eq!(img.read_sector(4),Err(Error::SectorNotFound(4)));
    assert_eq!(img.comments(),Some(comment.to_string()));
    assert_eq!(img.directory(),Some(dir.to_string()));
    Ok(())
}

#[test]
fn sequential_writer() -> STDRESULT {
    let geo = Geometry::chs(2,2,4,512);
    let mut img = WcDisk::create(geo,Some("test disk"))?;
    assert!(img.writable());
    img.write_sector(0,&sector_data(0,0,1))?;
    img.write_sector(1,&[0x41;512])?;
    // skip 2 and 3
    img.write_sector(4,&sector_data(0,1,1))?;
    assert_eq!(img.written_sectors().to_string(),"0-1,4");
    assert_eq!(img.bad_sectors().to_string(),"2-3");
    assert_eq!(img.record_position(0),Some(0));
    assert_eq!(img.record_position(1),Some(6+512));
    assert_eq!(img.record_position(2),Some(6+512+6));
    // rewriting behind the cursor is refused
    assert!(matches!(img.write_sector(1,&[0;512]),Err(Error::UnsupportedOperation(_))));
    assert!(matches!(img.write_sector(4,&[0;512]),Err(Error::UnsupportedOperation(_))));
    // written sectors can be read back before closing
    assert_eq!(img.read_sector(1)?,vec![0x41;512]);
    assert_eq!(img.read_sector(2)?,vec![0;512]);
    assert_eq!(img.read_sector(5),Err(Error::SectorNotFound(5)));
    let buf = img.close()?;

    let mut img = WcDisk::from_bytes(&buf)?;
    assert_eq!(img.read_sector(0)?,sector_data(0,0,1));
    assert_eq!(img.read_sector(1)?,vec![0x41;512]);
    assert_eq!(img.read_sector(4)?,sector_data(0,1,1));
    assert_eq!(img.read_sector(15)?,vec![0;512]);
    assert_eq!(img.bad_sectors().to_string(),"2-3,5-15");
    assert_eq!(img.comments(),Some("test disk".to_string()));
    // the uniform sector was stored as a repeat byte record
    let rec = 32 + 6 + 512;
    assert_eq!(buf[rec],SectorFlag::RepeatByte as u8);
    assert_eq!(buf[rec+4],0x41);
    Ok(())
}

#[test]
fn opened_image_is_read_only() -> STDRESULT {
    let buf = damaged_image();
    let mut img = WcDisk::from_bytes(&buf)?;
    assert!(matches!(img.write_sector(0,&[0;512]),Err(Error::UnsupportedOperation(_))));
    assert_eq!(img.to_bytes()?,buf);
    Ok(())
}

#[test]
fn header_is_checked() {
    let mut buf = damaged_image();
    buf[0] = b'X';
    assert!(!WcDisk::identify(&buf));
    let mut buf = damaged_image();
    buf[20] = 0;
    assert!(matches!(WcDisk::from_bytes(&buf),Err(Error::MalformedHeader(_))));
}

#[test]
fn comment_length_limit() -> STDRESULT {
    let geometry = Geometry::chs(40,1,8,512);
    let long = "x".repeat(u16::MAX as usize + 1);
    assert!(matches!(WcDisk::create(geometry,Some(&long)),Err(Error::UnsupportedOperation(_))));
    let longest = "x".repeat(u16::MAX as usize);
    let mut img = WcDisk::create(geometry,Some(&longest))?;
    let img = WcDisk::from_bytes(&img.to_bytes()?)?;
    assert_eq!(img.comments(),Some(longest));
    Ok(())
}
