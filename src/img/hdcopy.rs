//! ## Support for HD-Copy disk images
//!
//! HD-Copy stores a double sided floppy one track at a time, each track compressed
//! with a simple run-length scheme.  The file starts with the last cylinder number,
//! the sectors per track, and a map with one byte per track (`cyl*2 + head`) that
//! is 1 if the track is stored.  Stored tracks follow in map order, each one a block:
//!
//! * `u16` little endian length of what follows
//! * escape byte
//! * payload, where the escape byte introduces a `(fill,count)` pair and any other byte is literal
//!
//! Tracks are expanded the first time a sector in them is touched.  Tracks that are not
//! stored read back as zeros.  Writing is supported: modified tracks are compressed again
//! when the image is flattened, untouched tracks are copied through as they were.

use bit_vec::BitVec;
use log::{debug,error,info,trace,warn};
use a2kit_macro::{DiskStruct,DiskStructError};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::{DiskImage,DiskImageType,Error,Geometry};
use crate::img::cache::TrackCache;
use crate::extents::Extents32;

pub const SECTOR_SIZE: usize = 512;
pub const HEADS: usize = 2;
pub const TRACK_MAP_LEN: usize = 164;
pub const HEADER_LEN: usize = 166;
pub const MIN_SECTORS: u8 = 8;
pub const MAX_SECTORS: u8 = 40;
pub const MIN_LAST_CYL: u8 = 37;
pub const MAX_LAST_CYL: u8 = 83;
/// shortest run the encoder will replace with a triplet
const MIN_RUN: usize = 3;
const MAX_RUN: usize = 255;

pub fn file_extensions() -> Vec<String> {
    vec!["hdcopy".to_string(),"hdc".to_string()]
}

#[derive(DiskStruct)]
pub struct Header {
    last_cyl: u8,
    sectors: u8,
    track_map: [u8;164]
}

/// Where the compressed block of a track lives in the source buffer
#[derive(Clone,Copy,Debug,PartialEq)]
enum TrackLoc {
    Absent,
    /// offset and length of escape byte plus payload
    Stored(usize,usize),
    /// map says present, but the file ended first
    Truncated
}

/// Expand one track.  `block` starts with the escape byte.
/// The result must be exactly `track_size` bytes or the track is corrupt.
pub fn expand(block: &[u8],track_size: usize) -> Result<Vec<u8>,String> {
    let esc = match block.first() {
        Some(b) => *b,
        None => return Err("empty block".to_string())
    };
    let mut ans: Vec<u8> = Vec::with_capacity(track_size);
    let mut ptr = 1;
    while ptr < block.len() {
        if block[ptr] != esc {
            ans.push(block[ptr]);
            ptr += 1;
            continue;
        }
        if ptr + 2 >= block.len() {
            return Err(format!("escape at offset {} is cut off",ptr));
        }
        let fill = block[ptr+1];
        let count = block[ptr+2] as usize;
        ans.resize(ans.len() + count,fill);
        ptr += 3;
        if ans.len() > track_size {
            return Err(format!("expanded past {} bytes",track_size));
        }
    }
    if ans.len() != track_size {
        return Err(format!("expanded to {} bytes, expected {}",ans.len(),track_size));
    }
    Ok(ans)
}

/// Compress one track, the result starts with the escape byte.
/// The escape is the least frequent byte in the track, runs of 3 or more become triplets,
/// and a literal escape byte becomes a triplet with count 1.
pub fn compress(track: &[u8]) -> Vec<u8> {
    let mut freq = [0usize;256];
    for b in track {
        freq[*b as usize] += 1;
    }
    let mut esc: u8 = 0;
    for i in 0..256 {
        if freq[i] < freq[esc as usize] {
            esc = i as u8;
        }
    }
    let mut ans: Vec<u8> = vec![esc];
    let mut ptr = 0;
    while ptr < track.len() {
        let val = track[ptr];
        let mut run = 1;
        while ptr + run < track.len() && track[ptr+run]==val && run < MAX_RUN {
            run += 1;
        }
        if run >= MIN_RUN || val==esc {
            ans.append(&mut vec![esc,val,run as u8]);
        } else {
            for _i in 0..run {
                ans.push(val);
            }
        }
        ptr += run;
    }
    ans
}

/// Wrapper for HD-Copy images
pub struct HdCopy {
    header: Header,
    geometry: Geometry,
    present: BitVec,
    /// tracks that were written since the image was opened or created
    dirty: BitVec,
    locs: Vec<TrackLoc>,
    data: Vec<u8>,
    cache: TrackCache<usize>
}

impl HdCopy {
    /// Create an empty image, tracks 0 and 1 are present and zeroed, the rest are absent.
    pub fn create(geometry: Geometry) -> Result<Self,Error> {
        if geometry.heads!=HEADS || geometry.sector_size!=SECTOR_SIZE {
            error!("HD-Copy requires {} heads of {} byte sectors",HEADS,SECTOR_SIZE);
            return Err(Error::UnsupportedOperation(format!("geometry {} is not possible in HD-Copy",geometry)));
        }
        if geometry.sectors_per_track < MIN_SECTORS as usize || geometry.sectors_per_track > MAX_SECTORS as usize {
            return Err(Error::UnsupportedOperation(format!("{} sectors per track is not possible in HD-Copy",geometry.sectors_per_track)));
        }
        if geometry.cylinders < MIN_LAST_CYL as usize + 1 || geometry.cylinders > MAX_LAST_CYL as usize + 1 {
            return Err(Error::UnsupportedOperation(format!("{} cylinders is not possible in HD-Copy",geometry.cylinders)));
        }
        let mut header = Header::new();
        header.last_cyl = (geometry.cylinders - 1) as u8;
        header.sectors = geometry.sectors_per_track as u8;
        header.track_map[0] = 1;
        header.track_map[1] = 1;
        let tracks = geometry.track_count();
        let mut ans = Self {
            header,
            geometry: Geometry::chs(geometry.cylinders,HEADS,geometry.sectors_per_track,SECTOR_SIZE),
            present: BitVec::from_elem(tracks,false),
            dirty: BitVec::from_elem(tracks,false),
            locs: vec![TrackLoc::Absent;tracks],
            data: Vec::new(),
            cache: TrackCache::new()
        };
        for track in 0..2 {
            ans.present.set(track,true);
            ans.dirty.set(track,true);
            ans.cache.insert(track,vec![0;ans.geometry.track_size()]);
        }
        Ok(ans)
    }
    /// Linear indices of the tracks that are stored
    pub fn present_tracks(&self) -> Extents32 {
        let mut ans = Extents32::new();
        for (i,p) in self.present.iter().enumerate() {
            if p {
                ans.add(i as u32);
            }
        }
        ans
    }
    /// Count of tracks that have been expanded so far
    pub fn cached_tracks(&self) -> usize {
        self.cache.len()
    }
    fn decode_track(data: &[u8],loc: TrackLoc,track: usize,track_size: usize) -> Result<Vec<u8>,Error> {
        match loc {
            TrackLoc::Stored(offset,len) => {
                trace!("expand track {}",track);
                expand(&data[offset..offset+len],track_size).map_err(|reason| {
                    error!("track {}: {}",track,reason);
                    Error::CorruptData { track, reason }
                })
            },
            TrackLoc::Truncated => {
                error!("track {} is missing from the file",track);
                Err(Error::CorruptData { track, reason: "file ends before track".to_string() })
            },
            TrackLoc::Absent => Ok(vec![0;track_size])
        }
    }
    /// Copy of the expanded track, absent tracks are not cached
    fn get_track(&mut self,track: usize) -> Result<Vec<u8>,Error> {
        let track_size = self.geometry.track_size();
        if !self.present.get(track).unwrap_or(false) && !self.cache.contains(track) {
            return Ok(vec![0;track_size]);
        }
        let data = &self.data;
        let loc = self.locs[track];
        let buf = self.cache.get_or_decode(track,|t| Self::decode_track(data,loc,t,track_size))?;
        Ok(buf.to_vec())
    }
}

impl DiskImage for HdCopy {
    fn identify(buf: &[u8]) -> bool {
        if buf.len() < HEADER_LEN {
            return false;
        }
        let (last_cyl,sectors) = (buf[0],buf[1]);
        if sectors < MIN_SECTORS || sectors > MAX_SECTORS {
            return false;
        }
        if last_cyl < MIN_LAST_CYL || last_cyl > MAX_LAST_CYL {
            return false;
        }
        if buf[2]!=1 || buf[3]!=1 {
            return false;
        }
        buf[2..HEADER_LEN].iter().all(|x| *x<=1)
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        if !Self::identify(buf) {
            return Err(Error::MalformedHeader("not an HD-Copy image".to_string()));
        }
        let header = Header::from_bytes(&buf[0..HEADER_LEN])?;
        let geometry = Geometry::chs(header.last_cyl as usize + 1,HEADS,header.sectors as usize,SECTOR_SIZE);
        let tracks = geometry.track_count();
        let mut present = BitVec::from_elem(tracks,false);
        let mut locs = vec![TrackLoc::Absent;tracks];
        let mut ptr = HEADER_LEN;
        for track in 0..usize::min(tracks,TRACK_MAP_LEN) {
            if header.track_map[track]==0 {
                continue;
            }
            present.set(track,true);
            if ptr + 2 > buf.len() {
                locs[track] = TrackLoc::Truncated;
                continue;
            }
            let len = u16::from_le_bytes([buf[ptr],buf[ptr+1]]) as usize;
            if len==0 || ptr + 2 + len > buf.len() {
                debug!("track {} block runs past end of file",track);
                locs[track] = TrackLoc::Truncated;
                ptr = buf.len();
                continue;
            }
            locs[track] = TrackLoc::Stored(ptr+2,len);
            ptr += 2 + len;
        }
        if ptr < buf.len() {
            debug!("{} bytes follow the last track",buf.len()-ptr);
        }
        info!("HD-Copy geometry {}",geometry);
        Ok(Self {
            header,
            geometry,
            dirty: BitVec::from_elem(tracks,false),
            present,
            locs,
            data: buf.to_vec(),
            cache: TrackCache::new()
        })
    }
    fn what_am_i(&self) -> DiskImageType {
        DiskImageType::HDCOPY
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn writable(&self) -> bool {
        true
    }
    fn read_sector(&mut self,addr: u64) -> Result<Vec<u8>,Error> {
        self.geometry.check_addr(addr)?;
        let (track,sec) = self.geometry.track_and_offset(addr);
        let buf = self.get_track(track)?;
        Ok(buf[sec*SECTOR_SIZE..(sec+1)*SECTOR_SIZE].to_vec())
    }
    fn write_sector(&mut self,addr: u64,dat: &[u8]) -> Result<(),Error> {
        self.geometry.check_addr(addr)?;
        let (track,sec) = self.geometry.track_and_offset(addr);
        if track >= TRACK_MAP_LEN {
            debug!("track {} has no entry in the track map",track);
            return Err(Error::SectorNotFound(addr));
        }
        let mut buf = self.get_track(track)?;
        buf[sec*SECTOR_SIZE..(sec+1)*SECTOR_SIZE].copy_from_slice(&img::quantize_block(dat,SECTOR_SIZE));
        self.cache.insert(track,buf);
        self.present.set(track,true);
        self.dirty.set(track,true);
        Ok(())
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,Error> {
        for track in 0..usize::min(self.present.len(),TRACK_MAP_LEN) {
            self.header.track_map[track] = self.present.get(track).unwrap_or(false) as u8;
        }
        let mut ans = self.header.to_bytes();
        for track in 0..usize::min(self.present.len(),TRACK_MAP_LEN) {
            if !self.present.get(track).unwrap_or(false) {
                continue;
            }
            let block = match (self.dirty.get(track).unwrap_or(false),self.locs[track]) {
                (false,TrackLoc::Stored(offset,len)) => self.data[offset..offset+len].to_vec(),
                (false,TrackLoc::Truncated) => {
                    // map entries for tracks 0 and 1 must stay set, so keep the track as zeros
                    warn!("track {} was cut off in the source, saving it as zeros",track);
                    compress(&vec![0;self.geometry.track_size()])
                },
                _ => compress(&self.get_track(track)?)
            };
            trace!("track {} block is {} bytes",track,block.len());
            ans.extend_from_slice(&u16::to_le_bytes(block.len() as u16));
            ans.extend_from_slice(&block);
        }
        Ok(ans)
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = img::base_metadata(self);
        let typ = self.what_am_i().to_string();
        root[&typ]["header"] = json::JsonValue::new_object();
        root[&typ]["header"]["last_cylinder"] = hex::encode_upper(vec![self.header.last_cyl]).into();
        root[&typ]["header"]["sectors"] = hex::encode_upper(vec![self.header.sectors]).into();
        root[&typ]["present_tracks"] = self.present_tracks().to_string().into();
        img::stringify(root,indent)
    }
}

#[test]
fn test_expand_triplets() {
    let block = [0xe5,1,2,0xe5,0,5,0xe5,0xe5,1,3];
    assert_eq!(expand(&block,9),Ok(vec![1,2,0,0,0,0,0,0xe5,3]));
    assert!(expand(&block,10).is_err());
    assert!(expand(&[0xe5,1,0xe5,0],9).is_err());
}

#[test]
fn test_compress_escape() {
    let track = [7,7,7,7,1,2,2,0];
    let block = compress(&track);
    // 3 is the first value that does not appear
    assert_eq!(block,vec![3,3,7,4,1,2,2,0]);
    assert_eq!(expand(&block,8),Ok(track.to_vec()));
}
