//! # Disk Image Module
//!
//! Disk images are represented by objects implementing the `DiskImage` trait.
//! The object type is named for the container format it handles, e.g., `HdCopy`.
//! Every container is reduced to the same contract: a linear array of fixed-size
//! sectors that can be read (and, for some formats, written) by address.
//!
//! ## Sector Addresses
//!
//! A linear sector address is derived from (cylinder, head, sector) as
//! `(cyl*heads + head)*sectors_per_track + sec`, with `sec` counted from 0.
//! Formats that number their sectors from 1 on disk convert at their own boundary.
//! The `Geometry` struct does the arithmetic.
//!
//! ## Format Registry
//!
//! The set of formats is closed.  `DiskImageType` names each format, and the `Image`
//! enumeration wraps one open image of any format.  Identification tries each format's
//! header test in registry order.  A failed header test is a normal outcome, it just
//! means the next format should be tried.
//!
//! ## Damage
//!
//! Preservation comes first.  A sector whose integrity check fails is recorded in the
//! image's bad-sector set and reads back as data (its stored bytes, or zeros if none
//! exist), never as an error.  Structural corruption, such as a track that expands to
//! the wrong size, is an error for that track only.
//!
//! ## Threading
//!
//! Image objects do no locking.  Reading takes `&mut self` because it can populate the
//! track cache, so the borrow checker already serializes access; callers sharing an image
//! between threads must wrap it in their own lock.  There is no cancellation, and every
//! operation blocks until done.

pub mod cache;
pub mod names;
pub mod disk35;
pub mod hdcopy;
pub mod wcdisk;
pub mod raw;

use std::fmt;
use std::str::FromStr;
use log::{debug,info,trace};
use crate::extents::Extents64;

/// Enumerates disk image errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug,PartialEq,Eq,Clone)]
pub enum Error {
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("sector {addr} out of range (max {max})")]
    OutOfRange {
        addr: u64,
        max: u64
    },
    #[error("sector {0} is not present in this image")]
    SectorNotFound(u64),
    #[error("integrity check failed at sector {0}")]
    IntegrityMismatch(u64),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("corrupt data in track {track}: {reason}")]
    CorruptData {
        track: usize,
        reason: String
    }
}

impl From<a2kit_macro::DiskStructError> for Error {
    fn from(e: a2kit_macro::DiskStructError) -> Self {
        Error::MalformedHeader(format!("{:?}",e))
    }
}

/// Errors pertaining to nibble encoding
#[derive(thiserror::Error,Debug,PartialEq,Eq,Clone,Copy)]
pub enum NibbleError {
    #[error("could not interpret track data")]
    BadTrack,
    #[error("invalid byte while decoding")]
    InvalidByte,
    #[error("bad checksum found in a sector")]
    BadChecksum,
    #[error("could not find bit pattern")]
    BitPatternNotFound,
    #[error("sector not found")]
    SectorNotFound
}

/// Whether the medium is addressed by blocks or streamed like a tape
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum MediaKind {
    Block,
    Tape
}

/// Tag naming the physical medium an image came from
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum MediaType {
    Unknown,
    /// 5.25 inch 160K
    Dos525SsDd8,
    /// 5.25 inch 180K
    Dos525SsDd9,
    /// 5.25 inch 320K
    Dos525DsDd8,
    /// 5.25 inch 360K
    Dos525DsDd9,
    /// 5.25 inch 1.2M
    Dos525Hd,
    /// 3.5 inch 720K
    Dos35DsDd9,
    /// 3.5 inch 1.44M
    Dos35Hd,
    /// 3.5 inch 2.88M
    Dos35Ed,
    /// Apple 3.5 inch 400K
    AppleSonySs,
    /// Apple 3.5 inch 800K
    AppleSonyDs
}

impl MediaType {
    /// Match a geometry against the table of known media.  Cylinder counts that are
    /// a little over nominal (extra tracks) still match.
    pub fn from_geometry(cylinders: usize,heads: usize,sectors_per_track: usize,sector_size: usize) -> Self {
        for (typ,cyl,hd,spt,size) in names::STD_MEDIA {
            if heads==hd && sectors_per_track==spt && sector_size==size && cylinders>=cyl && cylinders<=cyl+names::MAX_EXTRA_CYLINDERS {
                return typ;
            }
        }
        MediaType::Unknown
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f,"unknown"),
            Self::Dos525SsDd8 => write!(f,"5.25 inch 160K"),
            Self::Dos525SsDd9 => write!(f,"5.25 inch 180K"),
            Self::Dos525DsDd8 => write!(f,"5.25 inch 320K"),
            Self::Dos525DsDd9 => write!(f,"5.25 inch 360K"),
            Self::Dos525Hd => write!(f,"5.25 inch 1.2M"),
            Self::Dos35DsDd9 => write!(f,"3.5 inch 720K"),
            Self::Dos35Hd => write!(f,"3.5 inch 1.44M"),
            Self::Dos35Ed => write!(f,"3.5 inch 2.88M"),
            Self::AppleSonySs => write!(f,"Apple 3.5 inch 400K"),
            Self::AppleSonyDs => write!(f,"Apple 3.5 inch 800K")
        }
    }
}

/// Plain data describing how the sectors of an image are arranged.
/// This is fixed once an image is open; only `create` functions take one as input.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Geometry {
    pub cylinders: usize,
    pub heads: usize,
    pub sectors_per_track: usize,
    pub sector_size: usize,
    /// total count of addressable sectors
    pub sectors: u64,
    pub media_type: MediaType,
    pub media_kind: MediaKind,
    pub has_partitions: bool
}

/// Address of a physical sector, `sec` is as numbered on the disk
#[derive(PartialEq,Eq,Hash,Clone,Copy,Debug,PartialOrd,Ord)]
pub struct SectorKey {
    pub cyl: usize,
    pub head: usize,
    pub sec: usize
}

impl Geometry {
    /// Geometry of a block medium, sector count and media type are derived
    pub fn chs(cylinders: usize,heads: usize,sectors_per_track: usize,sector_size: usize) -> Self {
        Self {
            cylinders,
            heads,
            sectors_per_track,
            sector_size,
            sectors: (cylinders * heads * sectors_per_track) as u64,
            media_type: MediaType::from_geometry(cylinders,heads,sectors_per_track,sector_size),
            media_kind: MediaKind::Block,
            has_partitions: false
        }
    }
    pub fn track_count(&self) -> usize {
        self.cylinders * self.heads
    }
    /// bytes in one track
    pub fn track_size(&self) -> usize {
        self.sectors_per_track * self.sector_size
    }
    pub fn byte_capacity(&self) -> u64 {
        self.sectors * self.sector_size as u64
    }
    /// Fail unless `addr` is a valid linear address
    pub fn check_addr(&self,addr: u64) -> Result<(),Error> {
        if addr >= self.sectors {
            debug!("sector {} is beyond the end of the image",addr);
            return Err(Error::OutOfRange { addr, max: self.sectors.saturating_sub(1) });
        }
        Ok(())
    }
    /// Linear track index and sector offset within the track
    pub fn track_and_offset(&self,addr: u64) -> (usize,usize) {
        let spt = self.sectors_per_track as u64;
        ((addr / spt) as usize, (addr % spt) as usize)
    }
    /// Convert linear address to [cylinder,head,sector], sector counted from 0
    pub fn chs_from_lba(&self,addr: u64) -> [usize;3] {
        let (track,sec) = self.track_and_offset(addr);
        [track / self.heads, track % self.heads, sec]
    }
    /// Convert [cylinder,head,sector], sector counted from 0, to linear address
    pub fn lba_from_chs(&self,cyl: usize,head: usize,sec: usize) -> u64 {
        ((cyl * self.heads + head) * self.sectors_per_track + sec) as u64
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{}/{}/{}/{}",self.cylinders,self.heads,self.sectors_per_track,self.sector_size)
    }
}

/// Names the container formats in the registry
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DiskImageType {
    HDCOPY,
    WCDISK,
    RAW
}

impl DiskImageType {
    /// Registry order, formats with a signature come before formats identified by size
    pub const ALL: [DiskImageType;3] = [Self::WCDISK,Self::HDCOPY,Self::RAW];
    pub fn file_extensions(&self) -> Vec<String> {
        match self {
            Self::HDCOPY => hdcopy::file_extensions(),
            Self::WCDISK => wcdisk::file_extensions(),
            Self::RAW => raw::file_extensions()
        }
    }
    /// Non-destructive header test for this format
    pub fn identify(&self,buf: &[u8]) -> bool {
        match self {
            Self::HDCOPY => hdcopy::HdCopy::identify(buf),
            Self::WCDISK => wcdisk::WcDisk::identify(buf),
            Self::RAW => raw::Raw::identify(buf)
        }
    }
    pub fn open(&self,buf: &[u8]) -> Result<Image,Error> {
        match self {
            Self::HDCOPY => Ok(Image::HdCopy(hdcopy::HdCopy::from_bytes(buf)?)),
            Self::WCDISK => Ok(Image::WcDisk(wcdisk::WcDisk::from_bytes(buf)?)),
            Self::RAW => Ok(Image::Raw(raw::Raw::from_bytes(buf)?))
        }
    }
}

impl FromStr for DiskImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "hdcopy" => Ok(Self::HDCOPY),
            "wcdisk" => Ok(Self::WCDISK),
            "raw" => Ok(Self::RAW),
            _ => Err(Error::UnsupportedOperation(format!("unknown image type {}",s)))
        }
    }
}

impl fmt::Display for DiskImageType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HDCOPY => write!(f,"hdcopy"),
            Self::WCDISK => write!(f,"wcdisk"),
            Self::RAW => write!(f,"raw")
        }
    }
}

/// The main trait for working with any kind of disk image.
/// Reading can mutate the object because decoded tracks are cached on first touch.
pub trait DiskImage {
    /// Non-destructive test of whether `buf` starts like this format
    fn identify(buf: &[u8]) -> bool where Self: Sized;
    /// Parse the header and track table; track payloads may be left for later
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> where Self: Sized;
    fn what_am_i(&self) -> DiskImageType;
    fn file_extensions(&self) -> Vec<String> {
        self.what_am_i().file_extensions()
    }
    fn geometry(&self) -> Geometry;
    /// Total count of addressable sectors
    fn sectors(&self) -> u64 {
        self.geometry().sectors
    }
    /// Whether `write_sector` is supported
    fn writable(&self) -> bool {
        false
    }
    fn comments(&self) -> Option<String> {
        None
    }
    /// Linear addresses of sectors known to be damaged.
    /// For lazily decoded formats this only covers tracks touched so far.
    fn bad_sectors(&self) -> Extents64 {
        Extents64::new()
    }
    /// Read one sector by linear address
    fn read_sector(&mut self,addr: u64) -> Result<Vec<u8>,Error>;
    /// Read `count` consecutive sectors starting at `addr`
    fn read_sectors(&mut self,addr: u64,count: u64) -> Result<Vec<u8>,Error> {
        let mut ans: Vec<u8> = Vec::new();
        if count > 0 {
            self.geometry().check_addr(addr.saturating_add(count-1))?;
        }
        for i in 0..count {
            ans.append(&mut self.read_sector(addr+i)?);
        }
        Ok(ans)
    }
    /// Read one sector by physical address, sector counted from 0
    fn read_sector_chs(&mut self,cyl: usize,head: usize,sec: usize) -> Result<Vec<u8>,Error> {
        let geo = self.geometry();
        if head >= geo.heads || sec >= geo.sectors_per_track {
            return Err(Error::OutOfRange { addr: geo.lba_from_chs(cyl,head,sec), max: geo.sectors.saturating_sub(1) });
        }
        self.read_sector(geo.lba_from_chs(cyl,head,sec))
    }
    /// Write one sector by linear address, data is padded or truncated to the sector size
    fn write_sector(&mut self,_addr: u64,_dat: &[u8]) -> Result<(),Error> {
        Err(Error::UnsupportedOperation(format!("{} images are read only",self.what_am_i())))
    }
    /// Write consecutive sectors, `dat` is split into sector sized pieces
    fn write_sectors(&mut self,addr: u64,dat: &[u8]) -> Result<(),Error> {
        let sec_size = self.geometry().sector_size;
        let count = (dat.len() + sec_size - 1) / sec_size;
        if count > 0 {
            self.geometry().check_addr(addr.saturating_add(count as u64 - 1))?;
        }
        let padded = quantize_block(dat,count*sec_size);
        for i in 0..count {
            self.write_sector(addr + i as u64,&padded[i*sec_size..(i+1)*sec_size])?;
        }
        Ok(())
    }
    /// Flatten the image into the bytes of its container format
    fn to_bytes(&mut self) -> Result<Vec<u8>,Error>;
    /// Flush pending writes, append any trailer, and give back the container bytes.
    /// The image is consumed.
    fn close(mut self) -> Result<Vec<u8>,Error> where Self: Sized {
        self.to_bytes()
    }
    /// Get image metadata into JSON string.
    /// Default contains the image type, geometry, comments, and bad sectors.
    fn get_metadata(&self,indent: Option<u16>) -> String {
        stringify(base_metadata(self),indent)
    }
}

/// Metadata common to all images, formats add their own keys under the type key
pub fn base_metadata<T: DiskImage + ?Sized>(img: &T) -> json::JsonValue {
    let typ = img.what_am_i().to_string();
    let geo = img.geometry();
    let mut root = json::JsonValue::new_object();
    root[&typ] = json::JsonValue::new_object();
    root[&typ]["geometry"] = json::JsonValue::new_object();
    root[&typ]["geometry"]["cylinders"] = geo.cylinders.into();
    root[&typ]["geometry"]["heads"] = geo.heads.into();
    root[&typ]["geometry"]["sectors_per_track"] = geo.sectors_per_track.into();
    root[&typ]["geometry"]["sector_size"] = geo.sector_size.into();
    root[&typ]["geometry"]["sectors"] = geo.sectors.into();
    root[&typ]["media_type"] = geo.media_type.to_string().into();
    root[&typ]["media_kind"] = match geo.media_kind {
        MediaKind::Block => "block".into(),
        MediaKind::Tape => "tape".into()
    };
    root[&typ]["comments"] = match img.comments() {
        Some(s) => s.into(),
        None => json::JsonValue::Null
    };
    root[&typ]["bad_sectors"] = img.bad_sectors().to_string().into();
    root
}

pub fn stringify(root: json::JsonValue,indent: Option<u16>) -> String {
    if let Some(spaces) = indent {
        json::stringify_pretty(root,spaces)
    } else {
        json::stringify(root)
    }
}

/// One open image of any registered format
pub enum Image {
    HdCopy(hdcopy::HdCopy),
    WcDisk(wcdisk::WcDisk),
    Raw(raw::Raw)
}

macro_rules! dispatch {
    ($slf:ident,$img:ident => $action:expr) => {
        match $slf {
            Image::HdCopy($img) => $action,
            Image::WcDisk($img) => $action,
            Image::Raw($img) => $action
        }
    };
}

impl Image {
    /// Find the first format whose header test accepts `buf`.
    /// Optional `maybe_ext` restricts the formats that are tried.
    pub fn identify_type(buf: &[u8],maybe_ext: Option<&str>) -> Option<DiskImageType> {
        for typ in candidates(maybe_ext) {
            if typ.identify(buf) {
                info!("identified {} image",typ);
                return Some(typ);
            }
        }
        None
    }
    /// Open `buf` with the first format that both identifies and parses it
    pub fn open(buf: &[u8],maybe_ext: Option<&str>) -> Result<Self,Error> {
        for typ in candidates(maybe_ext) {
            if !typ.identify(buf) {
                trace!("not a {} image",typ);
                continue;
            }
            match typ.open(buf) {
                Ok(img) => {
                    info!("opened {} image",typ);
                    return Ok(img);
                },
                Err(e) => debug!("{} header accepted but open failed: {}",typ,e)
            }
        }
        Err(Error::MalformedHeader("no registered format accepts this image".to_string()))
    }
}

/// Formats to try in registry order, an unknown extension means all of them
fn candidates(maybe_ext: Option<&str>) -> Vec<DiskImageType> {
    let ext = match maybe_ext {
        Some(x) => x.to_lowercase(),
        None => return DiskImageType::ALL.to_vec()
    };
    let ans: Vec<DiskImageType> = DiskImageType::ALL.iter().filter(|t| t.file_extensions().contains(&ext)).copied().collect();
    match ans.len() {
        0 => DiskImageType::ALL.to_vec(),
        _ => ans
    }
}

impl DiskImage for Image {
    fn identify(buf: &[u8]) -> bool {
        Self::identify_type(buf,None).is_some()
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        Self::open(buf,None)
    }
    fn what_am_i(&self) -> DiskImageType {
        dispatch!(self,img => img.what_am_i())
    }
    fn geometry(&self) -> Geometry {
        dispatch!(self,img => img.geometry())
    }
    fn writable(&self) -> bool {
        dispatch!(self,img => img.writable())
    }
    fn comments(&self) -> Option<String> {
        dispatch!(self,img => img.comments())
    }
    fn bad_sectors(&self) -> Extents64 {
        dispatch!(self,img => img.bad_sectors())
    }
    fn read_sector(&mut self,addr: u64) -> Result<Vec<u8>,Error> {
        dispatch!(self,img => img.read_sector(addr))
    }
    fn write_sector(&mut self,addr: u64,dat: &[u8]) -> Result<(),Error> {
        dispatch!(self,img => img.write_sector(addr,dat))
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,Error> {
        dispatch!(self,img => img.to_bytes())
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        dispatch!(self,img => img.get_metadata(indent))
    }
}

/// If a data source is smaller than `quantum` bytes, pad it with zeros.
/// If it is larger, do not include the extra bytes.
pub fn quantize_block(src: &[u8],quantum: usize) -> Vec<u8> {
    let mut padded = src[0..usize::min(src.len(),quantum)].to_vec();
    padded.resize(quantum,0);
    padded
}

/// True if every byte of the slice is the same, empty slices count as uniform
pub fn is_slice_uniform(slice: &[u8]) -> bool {
    match slice.first() {
        Some(test) => slice.iter().all(|x| x==test),
        None => true
    }
}

#[test]
fn test_chs_round_trip() {
    let geo = Geometry::chs(40,2,9,512);
    assert_eq!(geo.sectors,720);
    assert_eq!(geo.media_type,MediaType::Dos525DsDd9);
    assert_eq!(geo.chs_from_lba(0),[0,0,0]);
    assert_eq!(geo.chs_from_lba(9),[0,1,0]);
    assert_eq!(geo.chs_from_lba(719),[39,1,8]);
    assert_eq!(geo.lba_from_chs(39,1,8),719);
    assert_eq!(geo.check_addr(720),Err(Error::OutOfRange { addr: 720, max: 719 }));
}

#[test]
fn test_quantize() {
    assert_eq!(quantize_block(&[1,2,3],5),vec![1,2,3,0,0]);
    assert_eq!(quantize_block(&[1,2,3],2),vec![1,2]);
}
