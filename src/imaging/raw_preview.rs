//! Embedded-preview extraction for camera RAW containers.
//!
//! Most RAW files carry one or more camera-rendered JPEGs: a tiny EXIF
//! thumbnail and a larger review image. Decoding one of those is two orders
//! of magnitude faster than demosaicing the sensor data, so thumbnail
//! generation always tries them first.
//!
//! Candidates are gathered from three places, most reliable first:
//! - TIFF IFDs (IFD chain plus SubIFDs): `JPEGInterchangeFormat` (0x0201/0x0202),
//!   single-strip JPEG-compressed images (0x0103 = 6/7, 0x0111/0x0117) and the
//!   Panasonic `JpgFromRaw` tag (0x002E).
//! - The Fuji RAF header (JPEG offset/length at bytes 84/88, big-endian).
//! - A SOI/EOI marker scan over the whole file.
//!
//! The caller decodes candidates largest first and keeps the first that works.

use super::format::RawFamily;
use std::ops::Range;

const TAG_COMPRESSION: u16 = 0x0103;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
const TAG_PANASONIC_JPG_FROM_RAW: u16 = 0x002E;

/// IFDs deeper than this are ignored; real files nest two levels at most.
const MAX_IFD_DEPTH: usize = 4;
/// Guard against offset loops in malformed files.
const MAX_IFDS: usize = 64;
/// Marker-scan candidates smaller than this are EXIF thumbnails or noise.
const MIN_SCAN_JPEG: usize = 2 * 1024;

/// A byte range in the file that should hold a complete JPEG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCandidate {
    pub range: Range<usize>,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    IfdJpeg,
    IfdStrip,
    PanasonicJpgFromRaw,
    RafHeader,
    MarkerScan,
}

impl PreviewCandidate {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// All plausible embedded JPEGs, largest first, deduplicated by range.
pub fn find_previews(data: &[u8], family: RawFamily) -> Vec<PreviewCandidate> {
    let mut candidates = Vec::new();

    if family == RawFamily::FujiRaf {
        candidates.extend(raf_preview(data));
    }
    if family.is_tiff_structured() {
        candidates.extend(tiff_previews(data, 0));
    }
    if candidates.is_empty() {
        candidates.extend(scan_jpeg_markers(data));
    }

    candidates.retain(|c| starts_with_soi(data, &c.range));
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));
    candidates.dedup_by(|a, b| a.range == b.range);
    candidates
}

fn starts_with_soi(data: &[u8], range: &Range<usize>) -> bool {
    range.len() >= 4 && range.end <= data.len() && data[range.start..].starts_with(&[0xFF, 0xD8])
}

// ---------------------------------------------------------------------------
// TIFF IFD walk
// ---------------------------------------------------------------------------

/// Byte-order-aware reader over a TIFF-structured buffer.
///
/// `base` is the file offset of the TIFF header; all IFD offsets are relative
/// to it (non-zero for TIFF structures embedded in other containers).
#[derive(Clone, Copy)]
pub(crate) struct TiffReader<'a> {
    data: &'a [u8],
    base: usize,
    big_endian: bool,
}

/// One 12-byte IFD entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IfdEntry {
    pub tag: u16,
    pub typ: u16,
    pub count: u32,
    /// Raw value/offset field (position of the 4 value bytes in the file).
    pub value_pos: usize,
}

impl<'a> TiffReader<'a> {
    /// Accepts the classic `II*\0`/`MM\0*` header plus the Olympus (`IIRO`,
    /// `IIRS`, `MMOR`) and Panasonic (`IIU\0`) variants.
    pub fn new(data: &'a [u8], base: usize) -> Option<Self> {
        let header = data.get(base..base + 8)?;
        let big_endian = match &header[0..2] {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        Some(Self {
            data,
            base,
            big_endian,
        })
    }

    pub fn read_u16(&self, pos: usize) -> Option<u16> {
        let b = self.data.get(pos..pos + 2)?;
        Some(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    pub fn read_u32(&self, pos: usize) -> Option<u32> {
        let b = self.data.get(pos..pos + 4)?;
        Some(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    pub fn first_ifd(&self) -> Option<usize> {
        self.read_u32(self.base + 4).map(|o| self.base + o as usize)
    }

    /// Entries of the IFD at absolute offset `pos`, plus the next-IFD offset.
    pub fn entries(&self, pos: usize) -> Option<(Vec<IfdEntry>, Option<usize>)> {
        let count = self.read_u16(pos)? as usize;
        let start = pos + 2;
        if start + count * 12 > self.data.len() {
            return None;
        }
        let entries = (0..count)
            .filter_map(|i| {
                let at = start + i * 12;
                Some(IfdEntry {
                    tag: self.read_u16(at)?,
                    typ: self.read_u16(at + 2)?,
                    count: self.read_u32(at + 4)?,
                    value_pos: at + 8,
                })
            })
            .collect();
        let next = self
            .read_u32(start + count * 12)
            .filter(|&o| o != 0)
            .map(|o| self.base + o as usize);
        Some((entries, next))
    }

    fn type_size(typ: u16) -> usize {
        match typ {
            1 | 2 | 6 | 7 => 1, // BYTE, ASCII, SBYTE, UNDEFINED
            3 | 8 => 2,         // SHORT, SSHORT
            4 | 9 | 11 | 13 => 4, // LONG, SLONG, FLOAT, IFD
            5 | 10 | 12 => 8,   // RATIONAL, SRATIONAL, DOUBLE
            _ => 1,
        }
    }

    /// First value of an integer entry (SHORT or LONG).
    pub fn scalar(&self, entry: &IfdEntry) -> Option<u32> {
        match entry.typ {
            3 | 8 => self.read_u16(entry.value_pos).map(u32::from),
            _ => self.read_u32(entry.value_pos),
        }
    }

    /// All values of a LONG/SHORT/IFD array entry.
    pub fn scalars(&self, entry: &IfdEntry) -> Vec<u32> {
        let size = Self::type_size(entry.typ);
        let total = entry.count as usize * size;
        let base = if total <= 4 {
            entry.value_pos
        } else {
            match self.read_u32(entry.value_pos) {
                Some(o) => self.base + o as usize,
                None => return Vec::new(),
            }
        };
        (0..entry.count as usize)
            .map_while(|i| match size {
                2 => self.read_u16(base + i * 2).map(u32::from),
                _ => self.read_u32(base + i * 4),
            })
            .collect()
    }

    /// Byte range of an UNDEFINED/BYTE blob entry.
    pub fn blob(&self, entry: &IfdEntry) -> Option<Range<usize>> {
        let len = entry.count as usize * Self::type_size(entry.typ);
        let start = if len <= 4 {
            entry.value_pos
        } else {
            self.base + self.read_u32(entry.value_pos)? as usize
        };
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

fn clamp_range(data: &[u8], base: usize, offset: u32, length: u32) -> Option<Range<usize>> {
    let start = base.checked_add(offset as usize)?;
    let end = start.checked_add(length as usize)?;
    (length > 0 && end <= data.len()).then_some(start..end)
}

/// Walk the IFD chain and SubIFDs collecting JPEG ranges.
pub(crate) fn tiff_previews(data: &[u8], base: usize) -> Vec<PreviewCandidate> {
    let Some(reader) = TiffReader::new(data, base) else {
        return Vec::new();
    };
    let Some(first) = reader.first_ifd() else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut visited = Vec::new();
    let mut pending = vec![(first, 0usize)];

    while let Some((ifd, depth)) = pending.pop() {
        if depth > MAX_IFD_DEPTH || visited.len() >= MAX_IFDS || visited.contains(&ifd) {
            continue;
        }
        visited.push(ifd);
        let Some((entries, next)) = reader.entries(ifd) else {
            continue;
        };
        if let Some(next) = next {
            pending.push((next, depth));
        }

        let find = |tag: u16| entries.iter().find(|e| e.tag == tag);

        if let (Some(off), Some(len)) = (find(TAG_JPEG_OFFSET), find(TAG_JPEG_LENGTH))
            && let (Some(off), Some(len)) = (reader.scalar(off), reader.scalar(len))
            && let Some(range) = clamp_range(data, base, off, len)
        {
            found.push(PreviewCandidate {
                range,
                source: CandidateSource::IfdJpeg,
            });
        }

        let compression = find(TAG_COMPRESSION).and_then(|e| reader.scalar(e));
        if matches!(compression, Some(6) | Some(7))
            && let (Some(offs), Some(lens)) =
                (find(TAG_STRIP_OFFSETS), find(TAG_STRIP_BYTE_COUNTS))
        {
            let offs = reader.scalars(offs);
            let lens = reader.scalars(lens);
            if offs.len() == 1
                && lens.len() == 1
                && let Some(range) = clamp_range(data, base, offs[0], lens[0])
            {
                found.push(PreviewCandidate {
                    range,
                    source: CandidateSource::IfdStrip,
                });
            }
        }

        if let Some(entry) = find(TAG_PANASONIC_JPG_FROM_RAW)
            && let Some(range) = reader.blob(entry)
        {
            found.push(PreviewCandidate {
                range,
                source: CandidateSource::PanasonicJpgFromRaw,
            });
        }

        if let Some(entry) = find(TAG_SUB_IFDS) {
            for off in reader.scalars(entry) {
                pending.push((base + off as usize, depth + 1));
            }
        }
    }

    found
}

// ---------------------------------------------------------------------------
// Fuji RAF
// ---------------------------------------------------------------------------

/// RAF stores the preview JPEG offset and length big-endian at bytes 84/88.
fn raf_preview(data: &[u8]) -> Option<PreviewCandidate> {
    let field = |pos: usize| -> Option<u32> {
        let b = data.get(pos..pos + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };
    let range = clamp_range(data, 0, field(84)?, field(88)?)?;
    Some(PreviewCandidate {
        range,
        source: CandidateSource::RafHeader,
    })
}

// ---------------------------------------------------------------------------
// Marker scan
// ---------------------------------------------------------------------------

/// Pair each `FF D8 FF` start marker with the next `FF D9` end marker.
///
/// Naive (embedded EXIF thumbnails end the outer scan early), so it only runs
/// when no structured candidate exists.
pub fn scan_jpeg_markers(data: &[u8]) -> Vec<PreviewCandidate> {
    const SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
    const EOI: &[u8] = &[0xFF, 0xD9];

    let mut found = Vec::new();
    let mut pos = 0;
    while pos + SOI.len() <= data.len() {
        if !data[pos..].starts_with(SOI) {
            pos += 1;
            continue;
        }
        match data[pos..].windows(2).position(|w| w == EOI) {
            Some(end_offset) => {
                let end = pos + end_offset + 2;
                if end - pos >= MIN_SCAN_JPEG {
                    found.push(PreviewCandidate {
                        range: pos..end,
                        source: CandidateSource::MarkerScan,
                    });
                }
                pos = end;
            }
            None => break,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, noisy_jpeg_bytes, raf_with_preview, tiff_raw_with_preview};

    #[test]
    fn tiff_jpeg_interchange_found() {
        let jpeg = jpeg_bytes(64, 48);
        let raw = tiff_raw_with_preview(&jpeg, 1);
        let previews = find_previews(&raw, RawFamily::TiffBased);
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].source, CandidateSource::IfdJpeg);
        assert_eq!(&raw[previews[0].range.clone()], jpeg.as_slice());
    }

    #[test]
    fn raf_header_offset_found() {
        let jpeg = jpeg_bytes(32, 32);
        let raf = raf_with_preview(&jpeg);
        let previews = find_previews(&raf, RawFamily::FujiRaf);
        assert_eq!(previews[0].source, CandidateSource::RafHeader);
        assert_eq!(&raf[previews[0].range.clone()], jpeg.as_slice());
    }

    #[test]
    fn marker_scan_fallback() {
        let jpeg = noisy_jpeg_bytes(80, 60);
        assert!(jpeg.len() >= MIN_SCAN_JPEG, "fixture must clear the size floor");
        let mut blob = vec![0u8; 512];
        blob.extend_from_slice(&jpeg);
        blob.extend_from_slice(&[0u8; 256]);
        let previews = find_previews(&blob, RawFamily::SigmaX3f);
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].source, CandidateSource::MarkerScan);
        assert_eq!(previews[0].range, 512..512 + jpeg.len());
    }

    #[test]
    fn marker_scan_ignores_tiny_fragments() {
        let data = [0xFF, 0xD8, 0xFF, 0x00, 0xFF, 0xD9];
        assert!(scan_jpeg_markers(&data).is_empty());
    }

    #[test]
    fn marker_scan_skips_small_jpeg_and_keeps_large_one() {
        let small = jpeg_bytes(8, 8);
        let large = noisy_jpeg_bytes(64, 64);
        assert!(small.len() < MIN_SCAN_JPEG);
        let mut blob = vec![0u8; 64];
        blob.extend_from_slice(&small);
        let start = blob.len() + 32;
        blob.extend_from_slice(&[0u8; 32]);
        blob.extend_from_slice(&large);
        let previews = scan_jpeg_markers(&blob);
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].range, start..start + large.len());
    }

    #[test]
    fn out_of_bounds_offsets_ignored() {
        let jpeg = jpeg_bytes(16, 16);
        let mut raw = tiff_raw_with_preview(&jpeg, 1);
        raw.truncate(raw.len() - 10);
        let previews = tiff_previews(&raw, 0);
        assert!(previews.is_empty());
    }

    #[test]
    fn non_tiff_buffer_yields_nothing() {
        assert!(tiff_previews(b"not a tiff at all", 0).is_empty());
    }

    #[test]
    fn reader_handles_both_byte_orders() {
        let le = [b'I', b'I', 42, 0, 8, 0, 0, 0];
        let be = [b'M', b'M', 0, 42, 0, 0, 0, 8];
        assert_eq!(TiffReader::new(&le, 0).unwrap().first_ifd(), Some(8));
        assert_eq!(TiffReader::new(&be, 0).unwrap().first_ifd(), Some(8));
    }
}
