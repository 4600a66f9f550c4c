//! ## Support for WC DiskImage files
//!
//! This format stores every sector of the disk in order, each preceded by a 6 byte
//! header giving its address, a flag, and a checksum.  The image is scanned once when it
//! is opened, and the sector addresses must come in exactly the expected order.
//!
//! Damage is expected.  A sector whose CRC does not match is still kept, but is marked bad.
//! A `BadSector` record has no payload and reads back as zeros.  A `RepeatByte` record
//! has no payload either, the sector is filled with the low byte of the checksum field.
//!
//! Trailing optional parts:
//! * extra tracks, one cylinder past the nominal count, for each head flagged in the header
//! * a comment and a directory listing, each as a header whose checksum field is the text length
//!
//! New images are written sequentially, see `WcDisk::create`.

use std::collections::HashMap;
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{debug,error,info,trace,warn};
use a2kit_macro::{DiskStruct,DiskStructError};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::{DiskImage,DiskImageType,Error,Geometry,SectorKey};
use crate::img::cache::TrackCache;
use crate::extents::Extents64;

pub const SIGNATURE: [u8;16] = *b"WC DISK IMAGE\x1a\x1a\0";
pub const VERSION: u16 = 0x0100;
pub const SECTOR_SIZE: usize = 512;
pub const FILE_HEADER_LEN: usize = 32;
pub const SECTOR_HEADER_LEN: usize = 6;
pub const MAX_HEADS: usize = 4;
const COMMENT_FLAG: u8 = 0x01;
const DIRECTORY_FLAG: u8 = 0x02;

pub fn file_extensions() -> Vec<String> {
    vec!["dsk".to_string(),"wcd".to_string()]
}

macro_rules! verified_get_slice {
    ($buf:ident,$ptr:ident,$len:expr,$track:expr) => {
        match $ptr + $len <= $buf.len() {
            true => {
                $ptr += $len;
                &$buf[$ptr-$len..$ptr]
            },
            false => {
                error!("out of data in track {}",$track);
                return Err(Error::CorruptData { track: $track, reason: "image ends too soon".to_string() });
            }
        }
    };
}

#[derive(FromPrimitive,PartialEq,Clone,Copy,Debug)]
pub enum SectorFlag {
    Normal = 0,
    BadSector = 1,
    Comment = 2,
    Directory = 3,
    RepeatByte = 4
}

#[derive(DiskStruct)]
pub struct FileHeader {
    signature: [u8;16],
    version: [u8;2],
    cylinders: u8,
    sectors: u8,
    heads: u8,
    extra_tracks: [u8;4],
    extra_flags: u8,
    reserved: [u8;4],
    crc: [u8;2]
}

#[derive(DiskStruct)]
pub struct SectorHeader {
    flag: u8,
    head: u8,
    sector: u8,
    cylinder: u8,
    crc: [u8;2]
}

/// CRC-16/ARC (reflected polynomial 0xA001, initial value 0)
pub fn crc16(buf: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for b in buf {
        crc ^= *b as u16;
        for _bit in 0..8 {
            if crc & 1 > 0 {
                crc = (crc >> 1) ^ 0xa001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

impl SectorHeader {
    fn create(flag: SectorFlag,key: &SectorKey,crc: u16) -> Self {
        let mut ans = Self::new();
        ans.flag = flag as u8;
        ans.head = key.head as u8;
        ans.sector = key.sec as u8;
        ans.cylinder = key.cyl as u8;
        ans.crc = u16::to_le_bytes(crc);
        ans
    }
    fn checksum(&self) -> u16 {
        u16::from_le_bytes(self.crc)
    }
}

/// State of an image that is being written
struct Writer {
    /// sector records emitted so far
    out: Vec<u8>,
    /// next linear address that may be written
    cursor: u64,
    /// position map, linear address to offset of its record in `out`
    positions: HashMap<u64,usize>,
    written: Extents64
}

/// Wrapper for WC DiskImage files
pub struct WcDisk {
    header: FileHeader,
    geometry: Geometry,
    nominal_cylinders: usize,
    /// sector payloads, keyed by on-disk address, sectors count from 1
    cache: TrackCache<SectorKey>,
    bad: Extents64,
    comment: Option<String>,
    directory: Option<String>,
    data: Vec<u8>,
    writer: Option<Writer>
}

impl WcDisk {
    /// Start a new image to be written sequentially.  The comment, if any, becomes the trailer.
    pub fn create(geometry: Geometry,comment: Option<&str>) -> Result<Self,Error> {
        if geometry.sector_size != SECTOR_SIZE {
            return Err(Error::UnsupportedOperation(format!("WC DiskImage sectors are {} bytes",SECTOR_SIZE)));
        }
        if geometry.heads < 1 || geometry.heads > MAX_HEADS || geometry.cylinders < 1 || geometry.cylinders > 255
            || geometry.sectors_per_track < 1 || geometry.sectors_per_track > 255 {
            return Err(Error::UnsupportedOperation(format!("geometry {} is not possible in WC DiskImage",geometry)));
        }
        if let Some(text) = comment {
            if text.len() > u16::MAX as usize {
                return Err(Error::UnsupportedOperation(format!("comment is {} bytes, limit is {}",text.len(),u16::MAX)));
            }
        }
        let mut header = FileHeader::new();
        header.signature = SIGNATURE;
        header.version = u16::to_le_bytes(VERSION);
        header.cylinders = geometry.cylinders as u8;
        header.sectors = geometry.sectors_per_track as u8;
        header.heads = geometry.heads as u8;
        if comment.is_some() {
            header.extra_flags |= COMMENT_FLAG;
        }
        let crc = crc16(&header.to_bytes()[0..FILE_HEADER_LEN-2]);
        header.crc = u16::to_le_bytes(crc);
        Ok(Self {
            header,
            geometry: Geometry::chs(geometry.cylinders,geometry.heads,geometry.sectors_per_track,SECTOR_SIZE),
            nominal_cylinders: geometry.cylinders,
            cache: TrackCache::new(),
            bad: Extents64::new(),
            comment: comment.map(|s| s.to_string()),
            directory: None,
            data: Vec::new(),
            writer: Some(Writer {
                out: Vec::new(),
                cursor: 0,
                positions: HashMap::new(),
                written: Extents64::new()
            })
        })
    }
    /// Linear addresses written since creation
    pub fn written_sectors(&self) -> Extents64 {
        match &self.writer {
            Some(w) => w.written.clone(),
            None => Extents64::new()
        }
    }
    /// Offset of a written sector's record within the sector area, if it has been written
    pub fn record_position(&self,addr: u64) -> Option<usize> {
        self.writer.as_ref().and_then(|w| w.positions.get(&addr).copied())
    }
    pub fn directory(&self) -> Option<String> {
        self.directory.clone()
    }
    fn key(&self,addr: u64) -> SectorKey {
        let [cyl,head,sec] = self.geometry.chs_from_lba(addr);
        SectorKey { cyl, head, sec: sec+1 }
    }
    /// Read one sector record, checking it has the address we expect
    fn scan_sector(&mut self,buf: &[u8],ptr: &mut usize,key: SectorKey) -> Result<(),Error> {
        let track = key.cyl * self.geometry.heads + key.head;
        let mut p = *ptr;
        let shdr = SectorHeader::from_bytes(verified_get_slice!(buf,p,SECTOR_HEADER_LEN,track))?;
        if shdr.cylinder as usize!=key.cyl || shdr.head as usize!=key.head || shdr.sector as usize!=key.sec {
            error!("expected sector {:?}, found {}/{}/{}",key,shdr.cylinder,shdr.head,shdr.sector);
            return Err(Error::CorruptData { track, reason: format!("sector {} out of order",key.sec) });
        }
        let addr = self.geometry.lba_from_chs(key.cyl,key.head,key.sec-1);
        match SectorFlag::from_u8(shdr.flag) {
            Some(SectorFlag::Normal) => {
                let dat = verified_get_slice!(buf,p,SECTOR_SIZE,track);
                let crc = crc16(dat);
                if crc != shdr.checksum() {
                    warn!("CRC mismatch in sector {:?}, expected {:04X} got {:04X}",key,shdr.checksum(),crc);
                    self.bad.add(addr);
                }
                self.cache.insert(key,dat.to_vec());
            },
            Some(SectorFlag::BadSector) => {
                debug!("bad sector record at {:?}",key);
                self.bad.add(addr);
            },
            Some(SectorFlag::RepeatByte) => {
                trace!("repeat byte {:02X} at {:?}",shdr.crc[0],key);
                self.cache.insert(key,vec![shdr.crc[0];SECTOR_SIZE]);
            },
            _ => {
                error!("unexpected flag {} at {:?}",shdr.flag,key);
                return Err(Error::CorruptData { track, reason: format!("unexpected sector flag {}",shdr.flag) });
            }
        }
        *ptr = p;
        Ok(())
    }
    /// Read a comment or directory trailer, None if the record is not there
    fn scan_trailer(buf: &[u8],ptr: &mut usize,flag: SectorFlag) -> Option<String> {
        let p = *ptr;
        if p + SECTOR_HEADER_LEN > buf.len() {
            warn!("{:?} trailer is missing",flag);
            return None;
        }
        let shdr = SectorHeader::from_bytes(&buf[p..p+SECTOR_HEADER_LEN]).ok()?;
        if SectorFlag::from_u8(shdr.flag) != Some(flag) {
            warn!("expected {:?} trailer, found flag {}",flag,shdr.flag);
            return None;
        }
        let len = shdr.checksum() as usize;
        let start = p + SECTOR_HEADER_LEN;
        if start + len > buf.len() {
            warn!("{:?} trailer is cut off",flag);
            return None;
        }
        *ptr = start + len;
        Some(String::from_utf8_lossy(&buf[start..start+len]).to_string())
    }
    /// Emit a sector record into the writer
    fn emit(writer: &mut Writer,flag: SectorFlag,key: &SectorKey,crc: u16,dat: Option<&[u8]>) {
        writer.out.append(&mut SectorHeader::create(flag,key,crc).to_bytes());
        if let Some(buf) = dat {
            writer.out.extend_from_slice(buf);
        }
    }
    fn trailer(flag: SectorFlag,text: &str) -> Vec<u8> {
        let key = SectorKey { cyl: 0, head: 0, sec: 0 };
        let mut ans = SectorHeader::create(flag,&key,text.len() as u16).to_bytes();
        ans.extend_from_slice(text.as_bytes());
        ans
    }
}

impl DiskImage for WcDisk {
    fn identify(buf: &[u8]) -> bool {
        buf.len() >= FILE_HEADER_LEN && buf[0..16]==SIGNATURE
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        if !Self::identify(buf) {
            return Err(Error::MalformedHeader("WC DiskImage signature not found".to_string()));
        }
        let header = FileHeader::from_bytes(&buf[0..FILE_HEADER_LEN])?;
        let crc = crc16(&buf[0..FILE_HEADER_LEN-2]);
        if crc != u16::from_le_bytes(header.crc) {
            warn!("header CRC mismatch, expected {:04X} got {:04X}",u16::from_le_bytes(header.crc),crc);
        }
        if u16::from_le_bytes(header.version) != VERSION {
            debug!("unexpected version {:04X}",u16::from_le_bytes(header.version));
        }
        let (nominal,spt,heads) = (header.cylinders as usize,header.sectors as usize,header.heads as usize);
        if nominal==0 || spt==0 || heads==0 || heads > MAX_HEADS {
            error!("geometry {}/{}/{} is not possible",nominal,heads,spt);
            return Err(Error::MalformedHeader(format!("bad geometry {}/{}/{}",nominal,heads,spt)));
        }
        let extra_heads: Vec<usize> = (0..heads).filter(|h| header.extra_tracks[*h]==1).collect();
        let geometry = Geometry::chs(nominal + extra_heads.len(),heads,spt,SECTOR_SIZE);
        info!("WC DiskImage geometry {}, {} extra tracks",geometry,extra_heads.len());
        let mut ans = Self {
            header,
            geometry,
            nominal_cylinders: nominal,
            cache: TrackCache::new(),
            bad: Extents64::new(),
            comment: None,
            directory: None,
            data: buf.to_vec(),
            writer: None
        };
        let mut ptr = FILE_HEADER_LEN;
        for cyl in 0..nominal {
            for head in 0..heads {
                for sec in 1..=spt {
                    ans.scan_sector(buf,&mut ptr,SectorKey { cyl, head, sec })?;
                }
            }
        }
        for head in extra_heads {
            for sec in 1..=spt {
                ans.scan_sector(buf,&mut ptr,SectorKey { cyl: nominal, head, sec })?;
            }
        }
        if ans.header.extra_flags & COMMENT_FLAG > 0 {
            ans.comment = Self::scan_trailer(buf,&mut ptr,SectorFlag::Comment);
        }
        if ans.header.extra_flags & DIRECTORY_FLAG > 0 {
            ans.directory = Self::scan_trailer(buf,&mut ptr,SectorFlag::Directory);
        }
        if !ans.bad.is_empty() {
            warn!("bad sectors: {}",ans.bad);
        }
        Ok(ans)
    }
    fn what_am_i(&self) -> DiskImageType {
        DiskImageType::WCDISK
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn writable(&self) -> bool {
        self.writer.is_some()
    }
    fn comments(&self) -> Option<String> {
        self.comment.clone()
    }
    fn bad_sectors(&self) -> Extents64 {
        self.bad.clone()
    }
    fn read_sector(&mut self,addr: u64) -> Result<Vec<u8>,Error> {
        self.geometry.check_addr(addr)?;
        let key = self.key(addr);
        if let Some(buf) = self.cache.get(key) {
            return Ok(buf.to_vec());
        }
        if self.bad.contains(addr) {
            return Ok(vec![0;SECTOR_SIZE]);
        }
        debug!("no record for sector {:?}",key);
        Err(Error::SectorNotFound(addr))
    }
    fn write_sector(&mut self,addr: u64,dat: &[u8]) -> Result<(),Error> {
        self.geometry.check_addr(addr)?;
        let key = self.key(addr);
        let geometry = self.geometry;
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Err(Error::UnsupportedOperation("WC DiskImage was opened read only".to_string()))
        };
        if addr < writer.cursor {
            error!("sector {} is behind the write cursor {}",addr,writer.cursor);
            return Err(Error::UnsupportedOperation(format!("cannot rewrite sector {}, WC DiskImage is written sequentially",addr)));
        }
        for skipped in writer.cursor..addr {
            let [cyl,head,sec] = geometry.chs_from_lba(skipped);
            trace!("filling sector {} with a bad sector record",skipped);
            writer.positions.insert(skipped,writer.out.len());
            Self::emit(writer,SectorFlag::BadSector,&SectorKey { cyl, head, sec: sec+1 },0,None);
            self.bad.add(skipped);
        }
        let buf = img::quantize_block(dat,SECTOR_SIZE);
        writer.positions.insert(addr,writer.out.len());
        if img::is_slice_uniform(&buf) {
            Self::emit(writer,SectorFlag::RepeatByte,&key,buf[0] as u16,None);
        } else {
            Self::emit(writer,SectorFlag::Normal,&key,crc16(&buf),Some(&buf));
        }
        writer.written.add(addr);
        writer.cursor = addr + 1;
        self.cache.insert(key,buf);
        Ok(())
    }
    /// For a new image, this is the finished file: unwritten sectors become bad sector
    /// records and the comment trailer goes at the end.  The writer is left as it was.
    fn to_bytes(&mut self) -> Result<Vec<u8>,Error> {
        let writer = match &self.writer {
            Some(w) => w,
            None => return Ok(self.data.clone())
        };
        let mut ans = self.header.to_bytes();
        ans.extend_from_slice(&writer.out);
        for addr in writer.cursor..self.geometry.sectors {
            let [cyl,head,sec] = self.geometry.chs_from_lba(addr);
            ans.append(&mut SectorHeader::create(SectorFlag::BadSector,&SectorKey { cyl, head, sec: sec+1 },0).to_bytes());
        }
        if let Some(text) = &self.comment {
            ans.append(&mut Self::trailer(SectorFlag::Comment,text));
        }
        Ok(ans)
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = img::base_metadata(self);
        let typ = self.what_am_i().to_string();
        root[&typ]["header"] = json::JsonValue::new_object();
        root[&typ]["header"]["version"] = hex::encode_upper(self.header.version).into();
        root[&typ]["header"]["extra_tracks"] = hex::encode_upper(self.header.extra_tracks).into();
        root[&typ]["header"]["extra_flags"] = hex::encode_upper(vec![self.header.extra_flags]).into();
        root[&typ]["header"]["crc"] = hex::encode_upper(self.header.crc).into();
        root[&typ]["nominal_cylinders"] = self.nominal_cylinders.into();
        root[&typ]["directory"] = match &self.directory {
            Some(s) => s.clone().into(),
            None => json::JsonValue::Null
        };
        img::stringify(root,indent)
    }
}

#[test]
fn test_crc16_arc() {
    assert_eq!(crc16(b"123456789"),0xbb3d);
    assert_eq!(crc16(&[]),0);
}
