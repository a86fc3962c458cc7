//! Fragmented MP4 stream splitting
//!
//! A muxer writing fMP4 to a pipe produces one continuous byte stream. This
//! module cuts it back into the units the relay cares about by walking
//! top-level ISO BMFF boxes:
//!
//! ```text
//! ftyp moov │ [styp] [sidx] moof mdat │ moof mdat │ ... │ [mfra]
//! ─ header ─┼─────── fragment ────────┼─ fragment ┼     ┼ trailer
//! ```
//!
//! Header boxes are forwarded one sink write per box. Each fragment is
//! forwarded as a single write so it lands in the store as one entry.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

use super::engine::FragmentWriter;
use super::error::EngineError;
use super::sink::{write_all, SegmentSink};

/// Default ceiling for a single top-level box (64MB)
pub const DEFAULT_MAX_BOX_SIZE: u64 = 64 * 1024 * 1024;

const MOOV: [u8; 4] = *b"moov";
const MOOF: [u8; 4] = *b"moof";
const MDAT: [u8; 4] = *b"mdat";

/// Render a FourCC for diagnostics
pub fn fourcc_to_string(fourcc: &[u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

/// A complete top-level box, header included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    fourcc: [u8; 4],
    data: Bytes,
}

impl Mp4Box {
    /// Box type
    pub fn fourcc(&self) -> [u8; 4] {
        self.fourcc
    }

    /// Raw box bytes, header included
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Total box size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the box is empty (never true for a parsed box)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads whole top-level boxes from a byte stream
///
/// Handles 32-bit sizes, 64-bit extended sizes (`size == 1`) and boxes that
/// extend to end of stream (`size == 0`).
#[derive(Debug)]
pub struct BoxReader<R> {
    reader: R,
    max_box_size: u64,
}

impl<R: Read> BoxReader<R> {
    /// Create a reader with the default box size ceiling
    pub fn new(reader: R) -> Self {
        Self::with_max_box_size(reader, DEFAULT_MAX_BOX_SIZE)
    }

    /// Create a reader with a custom box size ceiling
    pub fn with_max_box_size(reader: R, max_box_size: u64) -> Self {
        Self {
            reader,
            max_box_size,
        }
    }

    /// Read the next box, or `None` on a clean end of stream
    pub fn next_box(&mut self) -> Result<Option<Mp4Box>, EngineError> {
        let mut header = [0u8; 16];

        let n = read_fully(&mut self.reader, &mut header[..8])?;
        if n == 0 {
            return Ok(None);
        }
        if n < 8 {
            return Err(EngineError::Format(format!(
                "truncated box header ({} bytes)",
                n
            )));
        }

        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let fourcc = [header[4], header[5], header[6], header[7]];

        let (size, header_len) = match size32 {
            0 => return self.read_to_end_box(fourcc, &header[..8]).map(Some),
            1 => {
                if read_fully(&mut self.reader, &mut header[8..16])? < 8 {
                    return Err(EngineError::Format(format!(
                        "truncated extended size for box {}",
                        fourcc_to_string(&fourcc)
                    )));
                }
                let ext = u64::from_be_bytes([
                    header[8], header[9], header[10], header[11], header[12], header[13],
                    header[14], header[15],
                ]);
                (ext, 16)
            }
            n => (u64::from(n), 8),
        };

        if size < header_len as u64 {
            return Err(EngineError::Format(format!(
                "box {} has invalid size {}",
                fourcc_to_string(&fourcc),
                size
            )));
        }
        if size > self.max_box_size {
            return Err(EngineError::Format(format!(
                "box {} size {} exceeds limit {}",
                fourcc_to_string(&fourcc),
                size,
                self.max_box_size
            )));
        }

        let size = size as usize;
        let mut data = BytesMut::with_capacity(size);
        data.extend_from_slice(&header[..header_len]);
        data.resize(size, 0);

        self.reader
            .read_exact(&mut data[header_len..])
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => EngineError::Format(format!(
                    "truncated box {} (expected {} bytes)",
                    fourcc_to_string(&fourcc),
                    size
                )),
                _ => EngineError::Io(e),
            })?;

        Ok(Some(Mp4Box {
            fourcc,
            data: data.freeze(),
        }))
    }

    fn read_to_end_box(&mut self, fourcc: [u8; 4], header: &[u8]) -> Result<Mp4Box, EngineError> {
        let mut data = header.to_vec();
        // One byte past the limit so an oversized tail is detectable
        (&mut self.reader)
            .take(self.max_box_size.saturating_sub(header.len() as u64) + 1)
            .read_to_end(&mut data)?;

        if data.len() as u64 > self.max_box_size {
            return Err(EngineError::Format(format!(
                "box {} extends past limit {}",
                fourcc_to_string(&fourcc),
                self.max_box_size
            )));
        }

        Ok(Mp4Box {
            fourcc,
            data: Bytes::from(data),
        })
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// [`FragmentWriter`] over any fMP4 byte stream
#[derive(Debug)]
pub struct Fmp4Output<R> {
    boxes: BoxReader<R>,
    trailer: BytesMut,
    fragments: u64,
}

impl<R: Read> Fmp4Output<R> {
    /// Split the fMP4 stream read from `reader`
    pub fn new(reader: R) -> Self {
        Self::from_box_reader(BoxReader::new(reader))
    }

    /// Split the stream produced by an existing box reader
    pub fn from_box_reader(boxes: BoxReader<R>) -> Self {
        Self {
            boxes,
            trailer: BytesMut::new(),
            fragments: 0,
        }
    }

    /// Number of fragments written so far
    pub fn fragments(&self) -> u64 {
        self.fragments
    }
}

impl<R: Read> FragmentWriter for Fmp4Output<R> {
    fn write_header(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError> {
        loop {
            let Some(mp4_box) = self.boxes.next_box()? else {
                return Err(EngineError::Format(
                    "stream ended before moov".to_string(),
                ));
            };

            let fourcc = mp4_box.fourcc();
            if fourcc == MOOF || fourcc == MDAT {
                return Err(EngineError::Format(format!(
                    "{} before moov",
                    fourcc_to_string(&fourcc)
                )));
            }

            write_all(sink, mp4_box.data())?;

            if fourcc == MOOV {
                return Ok(());
            }
        }
    }

    fn write_fragment(&mut self, sink: &mut dyn SegmentSink) -> Result<bool, EngineError> {
        let mut fragment = BytesMut::new();
        let mut saw_moof = false;

        loop {
            let Some(mp4_box) = self.boxes.next_box()? else {
                if saw_moof {
                    return Err(EngineError::Format(
                        "stream ended inside a fragment".to_string(),
                    ));
                }
                // Whatever followed the last mdat belongs to the trailer
                self.trailer.extend_from_slice(&fragment);
                return Ok(false);
            };

            let fourcc = mp4_box.fourcc();
            if fourcc == MOOF {
                saw_moof = true;
            }
            fragment.extend_from_slice(mp4_box.data());

            if fourcc == MDAT {
                if !saw_moof {
                    return Err(EngineError::Format("mdat without moof".to_string()));
                }
                write_all(sink, &fragment)?;
                self.fragments += 1;
                return Ok(true);
            }
        }
    }

    fn write_trailer(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError> {
        while let Some(mp4_box) = self.boxes.next_box()? {
            self.trailer.extend_from_slice(mp4_box.data());
        }

        if !self.trailer.is_empty() {
            let trailer = self.trailer.split().freeze();
            write_all(sink, &trailer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// Build a box with a 32-bit size header
    pub(crate) fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = (8 + body.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    /// Header, two fragments and a trailer, concatenated as a muxer would
    pub(crate) fn sample_stream() -> Vec<u8> {
        [
            make_box(b"ftyp", b"isom"),
            make_box(b"moov", b"trak"),
            make_box(b"moof", b"1"),
            make_box(b"mdat", b"frame-1"),
            make_box(b"styp", b"msdh"),
            make_box(b"moof", b"2"),
            make_box(b"mdat", b"frame-2"),
            make_box(b"mfra", b"index"),
        ]
        .concat()
    }

    #[test]
    fn test_box_reader_sequence() {
        let data = [make_box(b"ftyp", b"isom"), make_box(b"free", b"")].concat();
        let mut reader = BoxReader::new(Cursor::new(data));

        let first = reader.next_box().unwrap().unwrap();
        assert_eq!(&first.fourcc(), b"ftyp");
        assert_eq!(first.len(), 12);

        let second = reader.next_box().unwrap().unwrap();
        assert_eq!(&second.fourcc(), b"free");

        assert!(reader.next_box().unwrap().is_none());
    }

    #[test]
    fn test_box_reader_extended_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(b"abcd");

        let mut reader = BoxReader::new(Cursor::new(data.clone()));
        let mp4_box = reader.next_box().unwrap().unwrap();

        assert_eq!(&mp4_box.fourcc(), b"mdat");
        assert_eq!(mp4_box.data().as_ref(), data.as_slice());
    }

    #[test]
    fn test_box_reader_size_zero_reads_to_end() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(b"tail-bytes");

        let mut reader = BoxReader::new(Cursor::new(data));
        let mp4_box = reader.next_box().unwrap().unwrap();

        assert_eq!(mp4_box.len(), 18);
        assert!(reader.next_box().unwrap().is_none());
    }

    #[test]
    fn test_box_reader_rejects_bad_sizes() {
        // Size smaller than the header itself
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        let mut reader = BoxReader::new(Cursor::new(data));
        assert!(matches!(reader.next_box(), Err(EngineError::Format(_))));

        // Size above the configured ceiling
        let data = make_box(b"mdat", &[0u8; 32]);
        let mut reader = BoxReader::with_max_box_size(Cursor::new(data), 16);
        assert!(matches!(reader.next_box(), Err(EngineError::Format(_))));
    }

    #[test]
    fn test_box_reader_truncated() {
        let mut data = make_box(b"moov", b"0123456789");
        data.truncate(12);
        let mut reader = BoxReader::new(Cursor::new(data));
        assert!(matches!(reader.next_box(), Err(EngineError::Format(_))));

        let mut reader = BoxReader::new(Cursor::new(vec![0u8, 0, 0]));
        assert!(matches!(reader.next_box(), Err(EngineError::Format(_))));
    }

    #[test]
    fn test_output_splits_header_fragments_trailer() {
        let mut output = Fmp4Output::new(Cursor::new(sample_stream()));
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        // One write per header box
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0], make_box(b"ftyp", b"isom"));
        assert_eq!(sink[1], make_box(b"moov", b"trak"));

        sink.clear();
        assert!(output.write_fragment(&mut sink).unwrap());
        assert!(output.write_fragment(&mut sink).unwrap());
        assert!(!output.write_fragment(&mut sink).unwrap());
        assert_eq!(output.fragments(), 2);

        // Each fragment is a single write, prefix boxes included
        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink[0],
            [make_box(b"moof", b"1"), make_box(b"mdat", b"frame-1")].concat()
        );
        assert_eq!(
            sink[1],
            [
                make_box(b"styp", b"msdh"),
                make_box(b"moof", b"2"),
                make_box(b"mdat", b"frame-2"),
            ]
            .concat()
        );

        sink.clear();
        output.write_trailer(&mut sink).unwrap();
        assert_eq!(sink, vec![make_box(b"mfra", b"index")]);
    }

    #[test]
    fn test_output_header_requires_moov() {
        let data = make_box(b"ftyp", b"isom");
        let mut output = Fmp4Output::new(Cursor::new(data));
        let mut sink: Vec<Vec<u8>> = Vec::new();

        assert!(matches!(
            output.write_header(&mut sink),
            Err(EngineError::Format(_))
        ));
    }

    #[test]
    fn test_output_rejects_fragment_before_moov() {
        let data = [make_box(b"ftyp", b"isom"), make_box(b"moof", b"1")].concat();
        let mut output = Fmp4Output::new(Cursor::new(data));
        let mut sink: Vec<Vec<u8>> = Vec::new();

        assert!(output.write_header(&mut sink).is_err());
    }

    #[test]
    fn test_output_truncated_fragment_is_error() {
        let data = [
            make_box(b"ftyp", b"isom"),
            make_box(b"moov", b"trak"),
            make_box(b"moof", b"1"),
        ]
        .concat();
        let mut output = Fmp4Output::new(Cursor::new(data));
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        assert!(matches!(
            output.write_fragment(&mut sink),
            Err(EngineError::Format(_))
        ));
    }

    #[test]
    fn test_output_empty_trailer_writes_nothing() {
        let data = [
            make_box(b"ftyp", b"isom"),
            make_box(b"moov", b"trak"),
            make_box(b"moof", b"1"),
            make_box(b"mdat", b"x"),
        ]
        .concat();
        let mut output = Fmp4Output::new(Cursor::new(data));
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        while output.write_fragment(&mut sink).unwrap() {}
        sink.clear();
        output.write_trailer(&mut sink).unwrap();

        assert!(sink.is_empty());
    }

    #[test]
    fn test_fourcc_to_string() {
        assert_eq!(fourcc_to_string(b"moov"), "moov");
        assert_eq!(fourcc_to_string(&[0, b'a', 0xff, b'b']), ".a.b");
    }
}
