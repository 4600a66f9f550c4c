//! ## Support for raw sector images
//!
//! A raw image is a flat dump of 512 byte sectors in linear order, with no header.
//! The geometry is inferred from the file length against the table of standard media.
//! Sectors live at fixed offsets, so reads and writes can happen in any order.

use log::{debug,info};
use crate::img;
use crate::img::{DiskImage,DiskImageType,Error,Geometry,MediaType};
use crate::img::names;

pub const SECTOR_SIZE: usize = 512;

pub fn file_extensions() -> Vec<String> {
    vec!["img".to_string(),"ima".to_string(),"dsk".to_string()]
}

/// Geometries of the standard media a raw image can hold, zoned media excluded
fn standard_geometries() -> impl Iterator<Item = Geometry> {
    names::STD_MEDIA.into_iter()
        .filter(|(typ,..)| *typ!=MediaType::AppleSonySs && *typ!=MediaType::AppleSonyDs)
        .map(|(_,cyl,heads,spt,size)| Geometry::chs(cyl,heads,spt,size))
}

/// Find the standard medium with exactly this many bytes
fn geometry_from_len(len: usize) -> Option<Geometry> {
    standard_geometries().find(|g| g.byte_capacity() as usize == len)
}

/// Wrapper for raw sector images
pub struct Raw {
    geometry: Geometry,
    data: Vec<u8>
}

impl Raw {
    /// Create a zeroed image, only standard media can be created since nothing else
    /// would be recognized when the image is opened again
    pub fn create(geometry: Geometry) -> Result<Self,Error> {
        if geometry.sector_size != SECTOR_SIZE {
            return Err(Error::UnsupportedOperation(format!("raw images use {} byte sectors",SECTOR_SIZE)));
        }
        let chs = (geometry.cylinders,geometry.heads,geometry.sectors_per_track);
        match standard_geometries().find(|g| (g.cylinders,g.heads,g.sectors_per_track)==chs) {
            Some(geometry) => Ok(Self {
                geometry,
                data: vec![0;geometry.byte_capacity() as usize]
            }),
            None => Err(Error::UnsupportedOperation(format!("{} is not a standard medium",geometry)))
        }
    }
}

impl DiskImage for Raw {
    fn identify(buf: &[u8]) -> bool {
        geometry_from_len(buf.len()).is_some()
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        match geometry_from_len(buf.len()) {
            Some(geometry) => {
                info!("raw image matches {}",geometry.media_type);
                Ok(Self {
                    geometry,
                    data: buf.to_vec()
                })
            },
            None => {
                debug!("{} bytes does not match a standard medium",buf.len());
                Err(Error::MalformedHeader(format!("no standard medium has {} bytes",buf.len())))
            }
        }
    }
    fn what_am_i(&self) -> DiskImageType {
        DiskImageType::RAW
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn writable(&self) -> bool {
        true
    }
    fn read_sector(&mut self,addr: u64) -> Result<Vec<u8>,Error> {
        self.geometry.check_addr(addr)?;
        let offset = addr as usize * SECTOR_SIZE;
        Ok(self.data[offset..offset+SECTOR_SIZE].to_vec())
    }
    fn write_sector(&mut self,addr: u64,dat: &[u8]) -> Result<(),Error> {
        self.geometry.check_addr(addr)?;
        let offset = addr as usize * SECTOR_SIZE;
        self.data[offset..offset+SECTOR_SIZE].copy_from_slice(&img::quantize_block(dat,SECTOR_SIZE));
        Ok(())
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,Error> {
        Ok(self.data.clone())
    }
}

#[test]
fn test_sizes() {
    assert_eq!(geometry_from_len(368640).map(|g| g.media_type),Some(MediaType::Dos525DsDd9));
    assert_eq!(geometry_from_len(1474560).map(|g| g.media_type),Some(MediaType::Dos35Hd));
    assert_eq!(geometry_from_len(1000),None);
}
