//! # `sectorkit` main library
//!
//! This library gives sector-level access to images of legacy removable media.
//! Whatever the container format, an open image is reduced to a linear array of
//! fixed-size sectors that can be read, and for some formats written, by address.
//!
//! ## Architecture
//!
//! * `img::DiskImage` is the contract every container format implements
//! * `img::Image` wraps one open image of any registered format, and is what the facade returns
//! * `img::cache::TrackCache` holds decoded tracks for the lifetime of an open image
//! * `extents::Extents` tracks sets of addresses, such as bad sectors
//!
//! Each format decides for itself how much work to do at open time.  Track-compressed formats
//! only read their track table, and expand a track the first time a sector in it is touched.
//! Sector-record formats scan the whole image once, since the records have to be walked in order.
//!
//! ## Disk Images
//!
//! As of this writing `sectorkit` supports
//! * HD-Copy (run-length compressed tracks)
//! * WC DiskImage (per-sector CRC, bad sector records)
//! * raw sector dumps of standard floppies
//!
//! The `img::disk35` module handles the 6&2 GCR encoding of Apple 3.5 inch tracks, for use
//! by anything that produces or consumes nibble streams.
//!
//! ## Damaged Media
//!
//! A sector that fails its integrity check is recorded as bad and reads back as data
//! (its stored bytes, or zeros), so that one damaged sector never blocks recovery of the rest.

pub mod img;
pub mod extents;

use img::{DiskImage,DiskImageType,Geometry};
use log::{info,warn};

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// Save the image file (make changes permanent)
pub fn save_img(img: &mut img::Image,img_path: &str) -> STDRESULT {
    std::fs::write(img_path,img.to_bytes()?)?;
    Ok(())
}

/// Given a bytestream return a disk image, or Err if the bytestream cannot be interpreted.
/// Optional `maybe_ext` restricts the image types that will be tried based on file extension,
/// an unknown extension means all types are tried.
pub fn create_img_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>) -> Result<img::Image,DYNERR> {
    match img::Image::open(disk_img_data,maybe_ext) {
        Ok(img) => Ok(img),
        Err(e) => {
            warn!("cannot match any image format");
            Err(Box::new(e))
        }
    }
}

/// Calls `create_img_from_bytestream` getting the bytes from a file.
/// The file extension is used as a hint.
pub fn create_img_from_file(img_path: &str) -> Result<img::Image,DYNERR> {
    let disk_img_data = std::fs::read(img_path)?;
    let maybe_ext = std::path::Path::new(img_path).extension().and_then(|x| x.to_str());
    create_img_from_bytestream(&disk_img_data,maybe_ext)
}

/// Create a new blank image of the given type.
/// The comment is kept by formats that can store one, and ignored otherwise.
pub fn create_img(typ: DiskImageType,geometry: Geometry,comment: Option<&str>) -> Result<img::Image,DYNERR> {
    info!("creating {} image with geometry {}",typ,geometry);
    let ans = match typ {
        DiskImageType::HDCOPY => img::Image::HdCopy(img::hdcopy::HdCopy::create(geometry)?),
        DiskImageType::WCDISK => img::Image::WcDisk(img::wcdisk::WcDisk::create(geometry,comment)?),
        DiskImageType::RAW => img::Image::Raw(img::raw::Raw::create(geometry)?)
    };
    Ok(ans)
}
