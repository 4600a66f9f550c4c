//! ## Media Names
//!
//! Table of the standard media a sector image is likely to hold.
//! This is mainly for pattern matching, e.g., guessing the medium from a geometry,
//! or guessing the geometry of a headerless image from its length.
//!
//! Apple 3.5 inch disks are zoned (12 down to 8 sectors per track), so they are
//! listed here with the flattened geometry that gives the right block count.

use super::MediaType;

/// Cylinders a copier may add beyond the nominal count and still have the media recognized
pub const MAX_EXTRA_CYLINDERS: usize = 4;

/// (media type, cylinders, heads, sectors per track, sector size)
pub const STD_MEDIA: [(MediaType,usize,usize,usize,usize);10] = [
    (MediaType::Dos525SsDd8,40,1,8,512),
    (MediaType::Dos525SsDd9,40,1,9,512),
    (MediaType::Dos525DsDd8,40,2,8,512),
    (MediaType::Dos525DsDd9,40,2,9,512),
    (MediaType::Dos35DsDd9,80,2,9,512),
    (MediaType::Dos525Hd,80,2,15,512),
    (MediaType::Dos35Hd,80,2,18,512),
    (MediaType::Dos35Ed,80,2,36,512),
    (MediaType::AppleSonySs,80,1,10,512),
    (MediaType::AppleSonyDs,80,2,10,512)
];
