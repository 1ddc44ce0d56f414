//! The executable object format consumed by the loader.
//!
//! A flat binary with a fixed 40-byte little-endian header: a magic word
//! followed by three segment descriptors (code, initialized data,
//! uninitialized data). Uninitialized data occupies no file bytes; its
//! descriptor only records how much zero-filled space the process needs.

use crate::error::LoadError;

pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// Header size in bytes: magic word plus three segment descriptors.
pub const HEADER_SIZE: usize = 4 + 3 * 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    /// Location of the segment in the virtual address space.
    pub virtual_addr: u32,
    /// Location of the segment in the image file (zero for uninit data).
    pub in_file_addr: u32,
    pub size: u32,
}

impl Segment {
    fn parse(bytes: &[u8]) -> Segment {
        let word = |i: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_le_bytes(buf)
        };
        Segment {
            virtual_addr: word(0),
            in_file_addr: word(1),
            size: word(2),
        }
    }

    fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.virtual_addr.to_le_bytes());
        out.extend_from_slice(&self.in_file_addr.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoffHeader {
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    pub fn parse(image: &[u8]) -> Result<NoffHeader, LoadError> {
        if image.len() < HEADER_SIZE {
            return Err(LoadError::Truncated {
                expected: HEADER_SIZE,
                actual: image.len(),
            });
        }

        let mut magic_buf = [0u8; 4];
        magic_buf.copy_from_slice(&image[0..4]);
        let magic = u32::from_le_bytes(magic_buf);
        if magic != NOFF_MAGIC {
            return Err(LoadError::BadMagic(magic));
        }

        let header = NoffHeader {
            code: Segment::parse(&image[4..16]),
            init_data: Segment::parse(&image[16..28]),
            uninit_data: Segment::parse(&image[28..40]),
        };

        for seg in [&header.code, &header.init_data] {
            let end = seg.in_file_addr as usize + seg.size as usize;
            if end > image.len() {
                return Err(LoadError::Truncated {
                    expected: end,
                    actual: image.len(),
                });
            }
        }

        Ok(header)
    }
}

/// A parsed executable image held in memory.
///
/// The machine simulator hands the kernel the whole image; only the header
/// interpretation and page-granularity reads live here.
#[derive(Debug)]
pub struct Executable {
    header: NoffHeader,
    image: Vec<u8>,
}

impl Executable {
    pub fn parse(image: Vec<u8>) -> Result<Executable, LoadError> {
        let header = NoffHeader::parse(&image)?;
        Ok(Executable { header, image })
    }

    pub fn header(&self) -> &NoffHeader {
        &self.header
    }

    /// Copies up to `buf.len()` bytes starting at `offset` into `buf`,
    /// zero-filling past the end of the image. Reads beyond the last
    /// segment's tail happen when a segment does not end on a page
    /// boundary, so short reads are not an error here.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let available = self.image.len().saturating_sub(offset);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.image[offset..offset + n]);
        buf[n..].fill(0);
        n
    }
}

/// Assembles a well-formed image from raw segment contents. Used by the
/// demo driver and the tests; a real toolchain would produce this layout.
pub fn build_image(code: &[u8], init_data: &[u8], uninit_size: u32) -> Vec<u8> {
    let header = NoffHeader {
        code: Segment {
            virtual_addr: 0,
            in_file_addr: HEADER_SIZE as u32,
            size: code.len() as u32,
        },
        init_data: Segment {
            virtual_addr: code.len() as u32,
            in_file_addr: (HEADER_SIZE + code.len()) as u32,
            size: init_data.len() as u32,
        },
        uninit_data: Segment {
            virtual_addr: (code.len() + init_data.len()) as u32,
            in_file_addr: 0,
            size: uninit_size,
        },
    };

    let mut image = Vec::with_capacity(HEADER_SIZE + code.len() + init_data.len());
    image.extend_from_slice(&NOFF_MAGIC.to_le_bytes());
    header.code.emit(&mut image);
    header.init_data.emit(&mut image);
    header.uninit_data.emit(&mut image);
    image.extend_from_slice(code);
    image.extend_from_slice(init_data);
    image
}
