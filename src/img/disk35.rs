//! ## Apple 3.5 inch GCR module
//!
//! This handles 6&2 group coded recording of 3.5 inch (AppleSony) sectors.
//! Tracks are handled at the level of disk bytes ("nibbles"), i.e., the stream that
//! comes out of the read latch, with sync bytes appearing as plain `0xff`.
//!
//! Sectors are always 524 bytes, consisting of 12 tag bytes followed by 512 data bytes.
//! On the disk these become 699 data nibbles and 4 checksum nibbles.  Every 3 bytes are
//! turned into 4 nibbles, one of which gathers the high bits of the other three.
//! Three running checksums are kept while encoding.  Each byte is XOR'd with one of them,
//! and each checksum carries into the next one in the order 0 -> 2 -> 1 -> 0.
//!
//! Layout of a sector on the track:
//! * address field: prolog `D5 AA 96`, cylinder (mod 64), sector, side, format, checksum, epilog `DE AA`
//! * at least 5 sync bytes
//! * data field: prolog `D5 AA AD`, sector, 703 nibbles, epilog `DE AA`
//!
//! Locating a sector is a search that fails quietly: if any boundary is wrong the result
//! is `None`, meaning "not a sector here", so that callers can keep scanning.

use super::NibbleError;
use log::{debug,trace,warn};

const INVALID_NIB_BYTE: u8 = 0xff;
const CHUNK62: usize = 175;
/// There are 5 zones on the disk.  Zones are characterized by number of sectors per track.
/// The number of cylinders per zone is fixed at 16.
pub const ZONED_SECS_PER_TRACK: [usize;5] = [12,11,10,9,8];
pub const CYLINDERS: usize = 80;
pub const SECTOR_SIZE: usize = 524; // 12 tag byte header + 512 data bytes
pub const TAG_SIZE: usize = 12;
pub const DATA_NIBS: usize = 699; // nibbles of data, checksum follows
pub const CHK_NIBS: usize = 4; // how many checksum nibbles after data
pub const SYNC_BYTE: u8 = 0xff;
/// shortest run of sync bytes accepted between address and data fields
pub const MIN_SYNC: usize = 5;
pub const ADDRESS_PROLOG: [u8;3] = [0xd5,0xaa,0x96];
pub const DATA_PROLOG: [u8;3] = [0xd5,0xaa,0xad];
pub const EPILOG: [u8;2] = [0xde,0xaa];
const INTERLEAVE: u8 = 2;

// Following constants give the layout of the nibbles on a track
const SYNC_TRACK_HEADER: usize = 36;
const SYNC_GAP: usize = 6;
const SYNC_CLOSE: usize = 36;

pub const DISK_BYTES_62: [u8;64] = [
    0x96, 0x97, 0x9a, 0x9b, 0x9d, 0x9e, 0x9f, 0xa6,
    0xa7, 0xab, 0xac, 0xad, 0xae, 0xaf, 0xb2, 0xb3,
    0xb4, 0xb5, 0xb6, 0xb7, 0xb9, 0xba, 0xbb, 0xbc,
    0xbd, 0xbe, 0xbf, 0xcb, 0xcd, 0xce, 0xcf, 0xd3,
    0xd6, 0xd7, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde,
    0xdf, 0xe5, 0xe6, 0xe7, 0xe9, 0xea, 0xeb, 0xec,
    0xed, 0xee, 0xef, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6,
    0xf7, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0xff
];

/// Address field nibbles as found on the track, still encoded
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct RawAddressField {
    pub cyl: u8,
    pub sector: u8,
    pub side: u8,
    pub format: u8,
    pub checksum: u8
}

/// Data field nibbles as found on the track, still encoded
#[derive(Clone,Debug,PartialEq)]
pub struct RawDataField {
    pub sector: u8,
    /// 699 data nibbles followed by 4 checksum nibbles
    pub nibbles: Vec<u8>
}

#[derive(Clone,Debug,PartialEq)]
pub struct RawSector {
    pub address: RawAddressField,
    pub data: RawDataField
}

/// Decoded address field
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct SectorAddress {
    pub cyl: usize,
    pub head: usize,
    pub sector: u8,
    pub format: u8
}

/// Decoded sector data.  A checksum mismatch is reported here rather than as an error,
/// so the caller can decide whether to keep the bytes.
#[derive(Clone,Debug,PartialEq)]
pub struct SectorPayload {
    /// 12 tag bytes followed by 512 data bytes
    pub bytes: Vec<u8>,
    pub checksum_ok: bool
}

impl SectorPayload {
    pub fn tags(&self) -> &[u8] {
        &self.bytes[0..TAG_SIZE]
    }
    pub fn data(&self) -> &[u8] {
        &self.bytes[TAG_SIZE..]
    }
}

/// One sector found while walking a track
#[derive(Clone,Debug,PartialEq)]
pub struct TrackSector {
    pub address: SectorAddress,
    pub payload: Result<SectorPayload,NibbleError>
}

/// create the inverse to the encoding table
pub fn invert_62() -> [u8;256] {
    let mut ans: [u8;256] = [INVALID_NIB_BYTE;256];
    for i in 0..64 {
        ans[DISK_BYTES_62[i] as usize] = i as u8;
    }
    return ans;
}

/// encode a 6-bit nibble as a disk-friendly u8
pub fn encode_62(nib6: u8) -> u8 {
    return DISK_BYTES_62[(nib6 & 0x3f) as usize];
}

/// decode a byte, returning a 6-bit nibble in a u8
pub fn decode_62(byte: u8,inv: &[u8;256]) -> Result<u8,NibbleError> {
    match inv[byte as usize] {
        INVALID_NIB_BYTE => Err(NibbleError::InvalidByte),
        x => Ok(x)
    }
}

/// Sectors per track for the zone holding this cylinder
pub fn sectors_per_track(cyl: usize) -> usize {
    ZONED_SECS_PER_TRACK[usize::min(cyl/16,4)]
}

/// Physical order of logical sectors around the track, 2:1 interleave
pub fn physical_order(sectors: usize) -> Vec<u8> {
    let mut ans: Vec<Option<u8>> = vec![None;sectors];
    let mut pos = 0;
    for sec in 0..sectors {
        while ans[pos].is_some() {
            pos = (pos + 1) % sectors;
        }
        ans[pos] = Some(sec as u8);
        pos = (pos + INTERLEAVE as usize) % sectors;
    }
    ans.iter().map(|x| x.unwrap_or(0)).collect()
}

/// Value of the side byte, bit 5 is the head, bit 0 is set beyond cylinder 63
fn side_byte(cyl: usize,head: usize) -> u8 {
    (0x20 * head as u8) | (cyl >= 64) as u8
}

/// Value of the format byte, bit 5 is set for double sided disks, low nibble is the interleave
fn format_byte(sides: usize) -> u8 {
    match sides {
        2 => 0x20 + INTERLEAVE,
        _ => INTERLEAVE
    }
}

/// Find `patt` at or after `offset`, return the index where it starts
pub fn find_pattern(buf: &[u8],patt: &[u8],offset: usize) -> Option<usize> {
    if patt.len()==0 || offset + patt.len() > buf.len() {
        return None;
    }
    (offset..=buf.len()-patt.len()).find(|i| &buf[*i..*i+patt.len()]==patt)
}

/// Scan from `offset` for the next address prolog, and try to pick out the sector there.
/// Returns the raw fields and the index just past the data epilog.
/// Any violation of the expected layout gives `None`.
pub fn marshal_sector(buf: &[u8],offset: usize) -> Option<(RawSector,usize)> {
    let mut ptr = find_pattern(buf,&ADDRESS_PROLOG,offset)? + ADDRESS_PROLOG.len();
    if ptr + 7 > buf.len() {
        trace!("address field runs off the track");
        return None;
    }
    let address = RawAddressField {
        cyl: buf[ptr],
        sector: buf[ptr+1],
        side: buf[ptr+2],
        format: buf[ptr+3],
        checksum: buf[ptr+4]
    };
    ptr += 5;
    if buf[ptr..ptr+2] != EPILOG {
        trace!("address epilog not found at {}",ptr);
        return None;
    }
    ptr += 2;
    let mut sync = 0;
    while ptr < buf.len() && buf[ptr]==SYNC_BYTE {
        sync += 1;
        ptr += 1;
    }
    if sync < MIN_SYNC {
        trace!("only {} sync bytes before data field",sync);
        return None;
    }
    if ptr + DATA_PROLOG.len() + 1 + DATA_NIBS + CHK_NIBS + EPILOG.len() > buf.len() {
        trace!("data field runs off the track");
        return None;
    }
    if buf[ptr..ptr+3] != DATA_PROLOG {
        trace!("data prolog not found at {}",ptr);
        return None;
    }
    ptr += 3;
    let sector = buf[ptr];
    ptr += 1;
    let nibbles = buf[ptr..ptr+DATA_NIBS+CHK_NIBS].to_vec();
    ptr += DATA_NIBS + CHK_NIBS;
    if buf[ptr..ptr+2] != EPILOG {
        trace!("data epilog not found at {}",ptr);
        return None;
    }
    ptr += 2;
    Some((RawSector { address, data: RawDataField { sector, nibbles } },ptr))
}

/// Decode an address field and verify its checksum
pub fn decode_address(raw: &RawAddressField) -> Result<SectorAddress,NibbleError> {
    let inv = invert_62();
    let cyl = decode_62(raw.cyl,&inv)?;
    let sector = decode_62(raw.sector,&inv)?;
    let side = decode_62(raw.side,&inv)?;
    let format = decode_62(raw.format,&inv)?;
    let chksum = decode_62(raw.checksum,&inv)?;
    let chk = cyl ^ sector ^ side ^ format;
    if chk != chksum {
        debug!("address checksum mismatch ({},{})",chk,chksum);
        return Err(NibbleError::BadChecksum);
    }
    Ok(SectorAddress {
        cyl: cyl as usize + 64 * (side & 0x01) as usize,
        head: ((side >> 5) & 0x01) as usize,
        sector,
        format
    })
}

/// Encode an address field, prolog and epilog included
pub fn encode_address(cyl: usize,head: usize,sector: u8,sides: usize) -> Vec<u8> {
    let cyl6 = (cyl % 64) as u8;
    let side = side_byte(cyl,head);
    let format = format_byte(sides);
    let chk = cyl6 ^ sector ^ side ^ format;
    let mut ans = ADDRESS_PROLOG.to_vec();
    for val in [cyl6,sector,side,format,chk] {
        ans.push(encode_62(val));
    }
    ans.extend_from_slice(&EPILOG);
    ans
}

/// Encode 524 bytes (tags and data) as 703 nibbles, the data is padded or truncated as needed
pub fn encode_sector(dat: &[u8]) -> Vec<u8> {
    let dat = super::quantize_block(dat,SECTOR_SIZE);
    // first work with bytes, same arithmetic as CiderPress `EncodeNibbleSector35`
    let mut ans: Vec<u8> = vec![0;DATA_NIBS+CHK_NIBS];
    let mut part0: [u8;CHUNK62] = [0;CHUNK62];
    let mut part1: [u8;CHUNK62] = [0;CHUNK62];
    let mut part2: [u8;CHUNK62] = [0;CHUNK62];
    let [mut chk0,mut chk1,mut chk2]: [usize;3] = [0;3];
    let [mut val,mut twos]: [u8;2];

    let mut i: usize = 0;
    let mut s: usize = 0;
    loop {
        chk0 = (chk0 & 0xff) << 1;
        if chk0 & 0x100 > 0 {
            chk0 += 1;
        }
        val = dat[s];
        chk2 += val as usize;
        if chk0 & 0x100 > 0 {
            chk2 += 1;
            chk0 &= 0xff;
        }
        part0[i] = ((val as usize ^ chk0) & 0xff) as u8;

        val = dat[s+1];
        chk1 += val as usize;
        if chk2 > 0xff {
            chk1 += 1;
            chk2 &= 0xff;
        }
        part1[i] = ((val as usize ^ chk2) & 0xff) as u8;

        if s + 2 >= SECTOR_SIZE {
            break;
        }

        val = dat[s+2];
        chk0 += val as usize;
        if chk1 > 0xff {
            chk0 += 1;
            chk1 &= 0xff;
        }
        part2[i] = ((val as usize ^ chk1) & 0xff) as u8;
        i += 1;
        s += 3;
    }

    // the last group has no third byte, so it is only 3 nibbles
    for i in 0..CHUNK62 {
        twos = ((part0[i] & 0xc0) >> 2) | ((part1[i] & 0xc0) >> 4) | ((part2[i] & 0xc0) >> 6);
        ans[i*4+0] = encode_62(twos);
        ans[i*4+1] = encode_62(part0[i] & 0x3f);
        ans[i*4+2] = encode_62(part1[i] & 0x3f);
        if i*4 + 3 < DATA_NIBS {
            ans[i*4+3] = encode_62(part2[i] & 0x3f);
        }
    }

    // checksum
    twos = (((chk0 & 0xc0) >> 6) | ((chk1 & 0xc0) >> 4) | ((chk2 & 0xc0) >> 2)) as u8;
    ans[DATA_NIBS+0] = encode_62(twos);
    ans[DATA_NIBS+1] = encode_62(chk2 as u8 & 0x3f);
    ans[DATA_NIBS+2] = encode_62(chk1 as u8 & 0x3f);
    ans[DATA_NIBS+3] = encode_62(chk0 as u8 & 0x3f);
    ans
}

/// Decode 703 nibbles into 524 bytes (tags and data).
/// Invalid nibbles are an error, a checksum mismatch is flagged in the payload.
pub fn decode_sector(nibs: &[u8]) -> Result<SectorPayload,NibbleError> {
    if nibs.len() != DATA_NIBS + CHK_NIBS {
        debug!("sector has {} nibbles, expected {}",nibs.len(),DATA_NIBS+CHK_NIBS);
        return Err(NibbleError::BadTrack);
    }
    let mut ans: Vec<u8> = Vec::with_capacity(SECTOR_SIZE);
    // same arithmetic as CiderPress `DecodeNibbleSector35`
    let [mut val,mut nib0,mut nib1,mut nib2,mut twos]: [u8;5];
    let mut part0: [u8;CHUNK62] = [0;CHUNK62];
    let mut part1: [u8;CHUNK62] = [0;CHUNK62];
    let mut part2: [u8;CHUNK62] = [0;CHUNK62];
    let mut idx = 0;
    let inv = invert_62();
    for i in 0..CHUNK62 {
        twos = decode_62(nibs[idx+0],&inv)?;
        nib0 = decode_62(nibs[idx+1],&inv)?;
        nib1 = decode_62(nibs[idx+2],&inv)?;
        idx += 3;
        if i != CHUNK62-1 {
            nib2 = decode_62(nibs[idx],&inv)?;
            idx += 1;
        } else {
            nib2 = 0;
        }
        part0[i] = nib0 | ((twos << 2) & 0xc0);
        part1[i] = nib1 | ((twos << 4) & 0xc0);
        part2[i] = nib2 | ((twos << 6) & 0xc0);
    }

    let [mut chk0,mut chk1,mut chk2]: [usize;3] = [0;3];
    let mut i = 0;
    loop {
        chk0 = (chk0 & 0xff) << 1;
        if chk0 & 0x100 > 0 {
            chk0 += 1;
        }
        val = (part0[i] as usize ^ chk0) as u8;
        chk2 += val as usize;
        if chk0 & 0x100 > 0 {
            chk2 += 1;
            chk0 &= 0xff;
        }
        ans.push(val);

        val = (part1[i] as usize ^ chk2) as u8;
        chk1 += val as usize;
        if chk2 > 0xff {
            chk1 += 1;
            chk2 &= 0xff;
        }
        ans.push(val);

        if ans.len()>=SECTOR_SIZE {
            break;
        }

        val = (part2[i] as usize ^ chk1) as u8;
        chk0 += val as usize;
        if chk1 > 0xff {
            chk0 += 1;
            chk1 &= 0xff;
        }
        ans.push(val);

        i += 1;
    }
    // we have the sector, now verify checksum
    twos = decode_62(nibs[idx+0],&inv)?;
    nib2 = decode_62(nibs[idx+1],&inv)?;
    nib1 = decode_62(nibs[idx+2],&inv)?;
    nib0 = decode_62(nibs[idx+3],&inv)?;
    let rdchk0 = (nib0 | ((twos << 6) & 0xc0)) as usize;
    let rdchk1 = (nib1 | ((twos << 4) & 0xc0)) as usize;
    let rdchk2 = (nib2 | ((twos << 2) & 0xc0)) as usize;
    // the last group can leave a carry in chk1, only the low byte is recorded
    let [chk0,chk1,chk2] = [chk0 & 0xff,chk1 & 0xff,chk2 & 0xff];
    let checksum_ok = chk0 == rdchk0 && chk1 == rdchk1 && chk2 == rdchk2;
    if !checksum_ok {
        debug!("expect checksum {},{},{} got {},{},{}",chk0,chk1,chk2,rdchk0,rdchk1,rdchk2);
    }
    Ok(SectorPayload { bytes: ans, checksum_ok })
}

/// This creates a track including sync bytes, address fields, nibbles, checksums, etc..
/// `dat` holds the 524 byte sectors in logical order, missing sectors are written as zeros.
/// Sectors are laid out with 2:1 interleave.
pub fn create_track(cyl: usize,head: usize,sides: usize,dat: &[Vec<u8>]) -> Vec<u8> {
    let sectors = sectors_per_track(cyl);
    trace!("create cyl {}, head {}, {} sectors",cyl,head,sectors);
    let mut ans: Vec<u8> = vec![SYNC_BYTE;SYNC_TRACK_HEADER];
    for sector in physical_order(sectors) {
        ans.append(&mut encode_address(cyl,head,sector,sides));
        ans.append(&mut vec![SYNC_BYTE;SYNC_GAP]);
        ans.extend_from_slice(&DATA_PROLOG);
        // sector number is written here as well as in address fields
        ans.push(encode_62(sector));
        let empty: Vec<u8> = Vec::new();
        ans.append(&mut encode_sector(dat.get(sector as usize).unwrap_or(&empty)));
        ans.extend_from_slice(&EPILOG);
        ans.append(&mut vec![SYNC_BYTE;SYNC_CLOSE]);
    }
    ans
}

/// Walk a nibble track and decode every sector that can be found, in track order.
/// Sectors whose address field fails its checksum are skipped.
pub fn decode_track(buf: &[u8]) -> Vec<TrackSector> {
    let mut ans: Vec<TrackSector> = Vec::new();
    let mut offset = 0;
    while let Some(pos) = find_pattern(buf,&ADDRESS_PROLOG,offset) {
        let (raw,next) = match marshal_sector(buf,pos) {
            Some(x) => x,
            None => {
                debug!("unusable sector at nibble {}",pos);
                offset = pos + ADDRESS_PROLOG.len();
                continue;
            }
        };
        offset = next;
        let address = match decode_address(&raw.address) {
            Ok(a) => a,
            Err(e) => {
                warn!("skipping address field at nibble {}: {}",pos,e);
                continue;
            }
        };
        if encode_62(address.sector) != raw.data.sector {
            warn!("data field sector does not match address field sector {}",address.sector);
        }
        trace!("found cyl {}, head {}, sec {}",address.cyl,address.head,address.sector);
        ans.push(TrackSector { address, payload: decode_sector(&raw.data.nibbles) });
    }
    ans
}

/// Find and decode one sector on a nibble track
pub fn read_track_sector(buf: &[u8],cyl: usize,head: usize,sector: u8) -> Result<SectorPayload,NibbleError> {
    if find_pattern(buf,&ADDRESS_PROLOG,0).is_none() {
        debug!("no address prolog found on track");
        return Err(NibbleError::BitPatternNotFound);
    }
    for found in decode_track(buf) {
        if found.address.cyl==cyl && found.address.head==head && found.address.sector==sector {
            return found.payload;
        }
    }
    debug!("the sector address was never matched");
    Err(NibbleError::SectorNotFound)
}

#[test]
fn test_inverse_table() {
    let inv = invert_62();
    for i in 0..64 {
        assert_eq!(decode_62(encode_62(i),&inv),Ok(i));
    }
    assert_eq!(decode_62(0xd5,&inv),Err(NibbleError::InvalidByte));
    assert_eq!(decode_62(0xaa,&inv),Err(NibbleError::InvalidByte));
}

#[test]
fn test_interleave() {
    assert_eq!(physical_order(12),vec![0,6,1,7,2,8,3,9,4,10,5,11]);
    assert_eq!(physical_order(8),vec![0,4,1,5,2,6,3,7]);
}
