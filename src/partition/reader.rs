use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a record file, decompressing gzip input transparently.
///
/// Compression is detected from the magic bytes, not the file name.
pub fn open_records<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// One unit of the record stream, with its raw bytes untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Bytes of the record including its header line and trailing newline.
    pub bytes: Vec<u8>,
    /// `false` for bytes preceding the first sigil line.
    pub headed: bool,
}

/// Splits a byte stream into records that begin at sigil lines.
///
/// Concatenating the `bytes` of every yielded record reproduces the input.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    sigil: u8,
    pending: Vec<u8>,
    first: bool,
}

impl<R: BufRead> RecordReader<R> {
    /// Wrap a reader; records start at lines whose first byte is `sigil`.
    pub fn new(inner: R, sigil: u8) -> Self {
        Self {
            inner,
            sigil,
            pending: Vec::new(),
            first: true,
        }
    }

    /// Next record, or `None` at end of input.
    pub fn next_record(&mut self) -> io::Result<Option<RawRecord>> {
        let mut bytes = std::mem::take(&mut self.pending);
        if self.first {
            self.first = false;
            if self.inner.read_until(b'\n', &mut bytes)? == 0 {
                return Ok(None);
            }
        } else if bytes.is_empty() {
            return Ok(None);
        }
        let headed = bytes.first() == Some(&self.sigil);

        loop {
            let mut line = Vec::new();
            if self.inner.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.first() == Some(&self.sigil) {
                self.pending = line;
                break;
            }
            bytes.extend_from_slice(&line);
        }
        Ok(Some(RawRecord { bytes, headed }))
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Count sigil lines without keeping record bytes around.
pub fn count_records<R: Read>(reader: R, sigil: u8) -> io::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut count = 0u64;
    let mut at_line_start = true;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        for &byte in buf {
            if at_line_start && byte == sigil {
                count += 1;
            }
            at_line_start = byte == b'\n';
        }
        let len = buf.len();
        reader.consume(len);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn records(input: &[u8]) -> Vec<RawRecord> {
        RecordReader::new(Cursor::new(input), b'>')
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn splits_on_sigil_lines() {
        let recs = records(b">a\nAC\nGT\n>b\nTT\n");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].bytes, b">a\nAC\nGT\n");
        assert_eq!(recs[1].bytes, b">b\nTT\n");
        assert!(recs.iter().all(|r| r.headed));
    }

    #[test]
    fn keeps_preamble_and_missing_final_newline() {
        let recs = records(b"# comment\n>a\nAC");
        assert_eq!(recs.len(), 2);
        assert!(!recs[0].headed);
        assert_eq!(recs[0].bytes, b"# comment\n");
        assert_eq!(recs[1].bytes, b">a\nAC");
    }

    #[test]
    fn sigil_inside_line_is_not_a_boundary() {
        let recs = records(b">a desc > more\nA>C\n");
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(records(b"").is_empty());
    }

    #[test]
    fn counts_match_reader() {
        let input = b"x\n>a\nAC\n>b\n>c\nG\n";
        let counted = count_records(Cursor::new(&input[..]), b'>').unwrap();
        let headed = records(input).iter().filter(|r| r.headed).count() as u64;
        assert_eq!(counted, 3);
        assert_eq!(counted, headed);
    }

    #[test]
    fn gzip_input_is_detected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b">a\nAC\n>b\nGT\n").unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();

        let mut contents = Vec::new();
        open_records(file.path())
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b">a\nAC\n>b\nGT\n");
    }
}
